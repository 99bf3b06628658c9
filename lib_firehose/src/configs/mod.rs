//! # Configuration Modules
//!
//! Typed configuration for the consumer, notifiers and limiter.

/// JSON5-backed application configuration.
pub mod app_config;

pub use app_config::{
    AppConfig, ClientAppConfig, ConfigError, JobClasses, LimiterConfig, NotificationPlugin,
    OAuthCredentials, TwitterConfig,
};
