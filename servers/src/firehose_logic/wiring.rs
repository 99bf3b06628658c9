use anyhow::{Context, Result};
use lib_firehose::configs::{ClientAppConfig, LimiterConfig, NotificationPlugin};
use lib_firehose::connections::RedisJobQueue;
use lib_firehose::limiter::{Limiter, SlidingWindowLimiter, UnlimitedLimiter};
use lib_firehose::notifiers::{Deliveries, HttpNotifier, Notifier, QueueNotifier};
use lib_firehose::retrieve::{ApiClient, OAuthSigner};
use std::sync::Arc;

/// Client for the client application's endpoints, signed when OAuth is configured.
pub fn build_api_client(config: &ClientAppConfig) -> Result<ApiClient> {
    let signer = config.oauth.clone().map(OAuthSigner::new);
    ApiClient::new(config.request_timeout(), config.http_retries, signer).context("Failed to build HTTP client")
}

/// Picks the notifier variant once, at startup.
pub async fn build_notifier(
    config: &ClientAppConfig,
    client: ApiClient,
    deliveries: Deliveries,
) -> Result<Arc<dyn Notifier>> {
    match config.notification_plugin {
        NotificationPlugin::Http => {
            log::info!("Using HTTP notifier ({})", config.publish_url);
            Ok(Arc::new(HttpNotifier::new(client, config, deliveries)))
        }
        NotificationPlugin::Resque => {
            let queue = RedisJobQueue::connect(&config.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
            log::info!("Using Resque notifier (queue {})", config.queue_key());
            Ok(Arc::new(QueueNotifier::new(
                queue,
                config.queue_key(),
                config.job_classes.clone(),
                deliveries,
            )))
        }
    }
}

pub fn build_limiter(config: &LimiterConfig) -> Arc<dyn Limiter> {
    if config.enabled {
        log::info!(
            "Rate limiting enabled: {} per {}s per facet",
            config.max,
            config.duration_secs
        );
        Arc::new(SlidingWindowLimiter::new(config.max, config.window()))
    } else {
        Arc::new(UnlimitedLimiter)
    }
}
