//! # Application Configuration
//!
//! Typed configuration for the stream consumer, its notifiers and its limiter.
//! Loaded once at startup from a JSON5 file and handed to constructors by
//! value; nothing here is global.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// The path that was read.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON5 or does not match the expected shape.
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// The path that was parsed.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A value is present but unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// OAuth 1.0a consumer and access credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    /// Application consumer key.
    pub consumer_key: String,
    /// Application consumer secret.
    pub consumer_secret: String,
    /// User access token.
    pub access_key: String,
    /// User access token secret.
    pub access_secret: String,
}

/// Upstream stream connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TwitterConfig {
    /// Application consumer key.
    pub consumer_key: String,
    /// Application consumer secret.
    pub consumer_secret: String,
    /// User access token.
    pub access_key: String,
    /// User access token secret.
    pub access_secret: String,
    /// Scheme and host of the streaming API.
    pub stream_url: String,
    /// Path of the filter endpoint.
    pub stream_path: String,
    /// Failed reconnect attempts tolerated before giving up.
    pub max_reconnects: u32,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            consumer_secret: String::new(),
            access_key: String::new(),
            access_secret: String::new(),
            stream_url: "https://stream.twitter.com".to_string(),
            stream_path: "/1.1/statuses/filter.json".to_string(),
            max_reconnects: 10,
        }
    }
}

impl TwitterConfig {
    /// Credentials used to sign the stream request.
    pub fn credentials(&self) -> OAuthCredentials {
        OAuthCredentials {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            access_key: self.access_key.clone(),
            access_secret: self.access_secret.clone(),
        }
    }

    /// Full URL of the filter endpoint.
    pub fn filter_url(&self) -> String {
        format!(
            "{}/{}",
            self.stream_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }
}

/// Which downstream notifier to wire up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPlugin {
    /// Direct HTTP calls to the client application.
    #[default]
    Http,
    /// Resque jobs appended to a Redis list.
    Resque,
}

impl std::str::FromStr for NotificationPlugin {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(NotificationPlugin::Http),
            "resque" => Ok(NotificationPlugin::Resque),
            other => Err(ConfigError::Invalid(format!("unknown notification plugin '{other}'"))),
        }
    }
}

/// Resque job class names written into queue envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobClasses {
    /// Job for a tweet that should be published.
    pub publish: String,
    /// Job for a tweet that should be deleted.
    pub delete: String,
    /// Job for an upstream limit notice.
    pub missed_tweets: String,
    /// Job for a facet set entering rate limiting.
    pub rate_limiting_initiated: String,
}

impl Default for JobClasses {
    fn default() -> Self {
        Self {
            publish: "WeeterPublishTweetJob".to_string(),
            delete: "WeeterDeleteTweetJob".to_string(),
            missed_tweets: "WeeterMissedTweetsJob".to_string(),
            rate_limiting_initiated: "WeeterRateLimitingInitiatedJob".to_string(),
        }
    }
}

/// Downstream client application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientAppConfig {
    /// Endpoint receiving `POST {id, text, twitter_user_id}`.
    pub publish_url: String,
    /// Endpoint receiving `DELETE {id, twitter_user_id}`.
    pub delete_url: String,
    /// Endpoint serving the initial filters.
    pub subscriptions_url: String,
    /// Optional endpoint for upstream limit notices.
    pub missed_tweets_url: Option<String>,
    /// Optional endpoint for rate-limiting notices.
    pub rate_limited_url: Option<String>,
    /// Credentials for signing requests to the client app; unsigned when absent.
    pub oauth: Option<OAuthCredentials>,
    /// Which notifier to use.
    pub notification_plugin: NotificationPlugin,
    /// Resque queue name.
    pub queue: String,
    /// Redis connection string for the Resque notifier.
    pub redis_url: String,
    /// Resque job class names.
    pub job_classes: JobClasses,
    /// Per-request timeout for client app calls.
    pub request_timeout_secs: u64,
    /// Transient-failure retries performed by the HTTP client. Must be zero
    /// when `oauth` is set, since a signed request cannot be replayed.
    pub http_retries: u32,
}

impl Default for ClientAppConfig {
    fn default() -> Self {
        Self {
            publish_url: String::new(),
            delete_url: String::new(),
            subscriptions_url: String::new(),
            missed_tweets_url: None,
            rate_limited_url: None,
            oauth: None,
            notification_plugin: NotificationPlugin::Http,
            queue: "weeter".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            job_classes: JobClasses::default(),
            request_timeout_secs: 30,
            http_retries: 0,
        }
    }
}

impl ClientAppConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Redis list key the Resque notifier appends to.
    pub fn queue_key(&self) -> String {
        format!("resque:queue:{}", self.queue)
    }
}

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimiterConfig {
    /// When false every tweet is published.
    pub enabled: bool,
    /// Hits per facet allowed within the window.
    pub max: usize,
    /// Window length in seconds.
    pub duration_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max: 10,
            duration_secs: 600,
        }
    }
}

impl LimiterConfig {
    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Root configuration object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Stream connection.
    pub twitter: TwitterConfig,
    /// Downstream client application.
    pub client_app: ClientAppConfig,
    /// Rate limiting.
    pub limiter: LimiterConfig,
}

impl AppConfig {
    /// Parses a JSON5 document.
    pub fn from_json5(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = json5::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON5 file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: origin.clone(),
            source,
        })?;
        Self::from_json5(&text, &origin)
    }

    /// Checks the values the notifiers and limiter cannot work without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limiter.enabled && self.limiter.duration_secs == 0 {
            return Err(ConfigError::Invalid("limiter.durationSecs must be positive".into()));
        }
        if self.client_app.notification_plugin == NotificationPlugin::Resque
            && self.client_app.queue.trim().is_empty()
        {
            return Err(ConfigError::Invalid("clientApp.queue must not be empty".into()));
        }
        if self.client_app.oauth.is_some() && self.client_app.http_retries > 0 {
            return Err(ConfigError::Invalid(
                "clientApp.httpRetries must be 0 when clientApp.oauth is set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let config = AppConfig::from_json5("{}", "inline").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.twitter.filter_url(), "https://stream.twitter.com/1.1/statuses/filter.json");
        assert_eq!(config.client_app.queue_key(), "resque:queue:weeter");
        assert!(!config.limiter.enabled);
    }

    #[test]
    fn test_load_json5_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                // stream credentials
                twitter: {{
                    consumerKey: "ck", consumerSecret: "cs",
                    accessKey: "ak", accessSecret: "as",
                    maxReconnects: 3,
                }},
                clientApp: {{
                    publishUrl: "http://app/publish",
                    deleteUrl: "http://app/delete",
                    subscriptionsUrl: "http://app/subscriptions",
                    notificationPlugin: "resque",
                    queue: "tweets",
                    jobClasses: {{ publish: "PublishJob" }},
                }},
                limiter: {{ enabled: true, max: 3, durationSecs: 60 }},
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.twitter.consumer_key, "ck");
        assert_eq!(config.twitter.credentials().access_secret, "as");
        assert_eq!(config.twitter.max_reconnects, 3);
        assert_eq!(config.client_app.notification_plugin, NotificationPlugin::Resque);
        assert_eq!(config.client_app.queue_key(), "resque:queue:tweets");
        assert_eq!(config.client_app.job_classes.publish, "PublishJob");
        assert_eq!(config.client_app.job_classes.delete, "WeeterDeleteTweetJob");
        assert_eq!(config.limiter.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = AppConfig::load(Path::new("/definitely/not/here.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_limiter_window_is_rejected() {
        let err = AppConfig::from_json5("{limiter: {enabled: true, durationSecs: 0}}", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_signed_client_app_rejects_retries() {
        let signed = r#"{clientApp: {
            oauth: {consumerKey: "ck", consumerSecret: "cs", accessKey: "ak", accessSecret: "as"},
            httpRetries: 2,
        }}"#;
        let err = AppConfig::from_json5(signed, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("httpRetries")));

        let unsigned = AppConfig::from_json5("{clientApp: {httpRetries: 2}}", "inline").unwrap();
        assert_eq!(unsigned.client_app.http_retries, 2);
    }

    #[test]
    fn test_plugin_from_str() {
        assert_eq!("HTTP".parse::<NotificationPlugin>().unwrap(), NotificationPlugin::Http);
        assert_eq!("resque".parse::<NotificationPlugin>().unwrap(), NotificationPlugin::Resque);
        assert!("carrier-pigeon".parse::<NotificationPlugin>().is_err());
    }
}
