//! Infrastructure - configuration, metrics, and the application context
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `context` - Shared components built once at startup

pub mod config;
pub mod context;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use context::AppContext;
pub use metrics::Metrics;
