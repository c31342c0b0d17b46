//! Client-side caching and real-time invalidation for a storefront with an
//! admin console.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
