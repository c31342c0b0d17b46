use std::error::Error as StdError;

use thiserror::Error;

use crate::{cache::CacheError, infra::error::InfraError};

/// Error chain of a failure, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("no cached value for `{0}`")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status reported by the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NotFound(_) => 2,
            AppError::Validation(_) => 64,
            AppError::Infra(InfraError::Configuration { .. }) => 78,
            AppError::Infra(InfraError::Storage(_)) => 74,
            AppError::Cache(_) => 65,
            AppError::Infra(InfraError::Telemetry(_)) | AppError::Unexpected(_) => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StorageError;

    #[test]
    fn report_walks_error_chain() {
        let error = AppError::from(InfraError::from(StorageError::from(
            std::io::Error::other("disk gone"),
        )));

        let report = error.report();
        assert_eq!(report.messages[0], "cache store unavailable: storage io error: disk gone");
        assert!(report.messages.iter().any(|m| m == "disk gone"));
        assert_eq!(error.exit_code(), 74);
    }

    #[test]
    fn not_found_has_distinct_exit_code() {
        assert_eq!(AppError::NotFound("menu_items".to_string()).exit_code(), 2);
        assert_eq!(AppError::validation("empty").exit_code(), 64);
    }
}
