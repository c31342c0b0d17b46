//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{BackendKind, CacheConfig, ImageCacheConfig, InvalidationConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storefront-cache";
const ENV_PREFIX: &str = "STOREFRONT_CACHE";

/// Command-line arguments for the storefront-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "storefront-cache",
    version,
    about = "Inspect and maintain a storefront cache store"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STOREFRONT_CACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CacheOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print per-backend entry counts.
    Stats,
    /// Remove expired and undecodable entries.
    Sweep,
    /// Remove every cache entry from the selected backends.
    Clear(ClearArgs),
    /// Print the cached value stored under a key.
    Get(GetArgs),
    /// Drop every prefixed entry as a version change would.
    ///
    /// The version itself is not persisted; later runs start from
    /// `cache.initial_version` or `--cache-version`.
    #[command(name = "bump-version")]
    BumpVersion(BumpVersionArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ClearArgs {
    /// Backend to clear.
    #[arg(long, value_enum, default_value_t = ClearTarget::All)]
    pub backend: ClearTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClearTarget {
    All,
    Memory,
    Durable,
    Session,
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    /// Logical cache key, without the reserved prefix.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct BumpVersionArgs {
    /// New schema version.
    #[arg(value_name = "VERSION")]
    pub version: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the durable store directory.
    #[arg(long = "store-dir", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Override the schema version entries are read and written with.
    #[arg(long = "cache-version", value_name = "VERSION", global = true)]
    pub cache_version: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub images: ImageCacheConfig,
    pub invalidation: InvalidationConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    images: RawImageSettings,
    invalidation: RawInvalidationSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(dir) = overrides.store_dir.as_ref() {
            self.cache.durable_dir = Some(dir.clone());
        }
        if let Some(version) = overrides.cache_version.as_ref() {
            self.cache.initial_version = Some(version.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            images,
            invalidation,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            images: build_image_settings(images)?,
            invalidation: build_invalidation_settings(invalidation)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let key_prefix = non_empty(cache.key_prefix, defaults.key_prefix, "cache.key_prefix")?;
    let initial_version = non_empty(
        cache.initial_version,
        defaults.initial_version,
        "cache.initial_version",
    )?;

    let default_ttl_ms = non_zero(
        cache.default_ttl_ms.unwrap_or(defaults.default_ttl_ms),
        "cache.default_ttl_ms",
    )?;

    let default_backend = match cache.default_backend {
        Some(name) => parse_backend(&name)?,
        None => defaults.default_backend,
    };

    let durable_dir = cache.durable_dir.unwrap_or(defaults.durable_dir);
    if durable_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.durable_dir",
            "path must not be empty",
        ));
    }

    Ok(CacheConfig {
        key_prefix,
        initial_version,
        default_ttl_ms,
        default_backend,
        durable_dir,
        durable_quota_bytes: non_zero(
            cache
                .durable_quota_bytes
                .unwrap_or(defaults.durable_quota_bytes),
            "cache.durable_quota_bytes",
        )?,
        session_quota_bytes: non_zero(
            cache
                .session_quota_bytes
                .unwrap_or(defaults.session_quota_bytes),
            "cache.session_quota_bytes",
        )?,
    })
}

fn build_image_settings(images: RawImageSettings) -> Result<ImageCacheConfig, LoadError> {
    let defaults = ImageCacheConfig::default();

    let medium_batch_size = images
        .medium_batch_size
        .unwrap_or(defaults.medium_batch_size as u64);
    let medium_batch_size = usize::try_from(non_zero(medium_batch_size, "images.medium_batch_size")?)
        .map_err(|_| {
            LoadError::invalid(
                "images.medium_batch_size",
                "value exceeds supported range for usize",
            )
        })?;

    Ok(ImageCacheConfig {
        max_item_bytes: non_zero(
            images.max_item_bytes.unwrap_or(defaults.max_item_bytes),
            "images.max_item_bytes",
        )?,
        ttl_ms: non_zero(images.ttl_ms.unwrap_or(defaults.ttl_ms), "images.ttl_ms")?,
        medium_batch_size,
        low_priority_delay_ms: images
            .low_priority_delay_ms
            .unwrap_or(defaults.low_priority_delay_ms),
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationConfig, LoadError> {
    let defaults = InvalidationConfig::default();

    let topic = non_empty(invalidation.topic, defaults.topic, "invalidation.topic")?;
    let force_refresh_ttl_ms = non_zero(
        invalidation
            .force_refresh_ttl_ms
            .unwrap_or(defaults.force_refresh_ttl_ms),
        "invalidation.force_refresh_ttl_ms",
    )?;

    let cascade = invalidation.cascade.unwrap_or(defaults.cascade);
    check_key_table(&cascade, "invalidation.cascade")?;
    let resources = invalidation.resources.unwrap_or(defaults.resources);
    check_key_table(&resources, "invalidation.resources")?;

    Ok(InvalidationConfig {
        topic,
        force_refresh_ttl_ms,
        cascade,
        resources,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    key_prefix: Option<String>,
    initial_version: Option<String>,
    default_ttl_ms: Option<u64>,
    default_backend: Option<String>,
    durable_dir: Option<PathBuf>,
    durable_quota_bytes: Option<u64>,
    session_quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageSettings {
    max_item_bytes: Option<u64>,
    ttl_ms: Option<u64>,
    medium_batch_size: Option<u64>,
    low_priority_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    topic: Option<String>,
    force_refresh_ttl_ms: Option<u64>,
    cascade: Option<BTreeMap<String, Vec<String>>>,
    resources: Option<BTreeMap<String, Vec<String>>>,
}

fn parse_backend(name: &str) -> Result<BackendKind, LoadError> {
    BackendKind::ALL
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.default_backend",
                format!("unknown backend `{name}` (expected memory|durable|session)"),
            )
        })
}

fn non_zero(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn non_empty(
    value: Option<String>,
    default: String,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or(default);
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn check_key_table(
    table: &BTreeMap<String, Vec<String>>,
    key: &'static str,
) -> Result<(), LoadError> {
    for (source, targets) in table {
        if source.trim().is_empty() || targets.iter().any(|target| target.trim().is_empty()) {
            return Err(LoadError::invalid(key, "cache keys must not be empty"));
        }
    }
    Ok(())
}
