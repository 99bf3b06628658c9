//! # HTTP Notifier
//!
//! Calls the client application directly:
//!
//! - publish: `POST publish_url` with form `{id, text, twitter_user_id}`
//! - delete: `DELETE delete_url?id=..&twitter_user_id=..`
//! - missed tweets / rate limiting: `POST` to the optional notice URLs, or
//!   logged only when none is configured.

use std::sync::Arc;

use crate::configs::ClientAppConfig;
use crate::retrieve::ky_http::{ApiClient, ApiResponse, ApiError};
use crate::stream::item::{DeletedTweet, StreamItem, Tweet};

use super::{Deliveries, Notifier, NotifierError};

#[derive(Debug, Clone)]
struct Endpoints {
    publish: String,
    delete: String,
    missed_tweets: Option<String>,
    rate_limited: Option<String>,
}

/// Notifier that talks to the client application over HTTP.
pub struct HttpNotifier {
    client: ApiClient,
    endpoints: Arc<Endpoints>,
    deliveries: Deliveries,
}

impl HttpNotifier {
    /// Creates a notifier for the URLs in `config`.
    pub fn new(client: ApiClient, config: &ClientAppConfig, deliveries: Deliveries) -> Self {
        Self {
            client,
            endpoints: Arc::new(Endpoints {
                publish: config.publish_url.clone(),
                delete: config.delete_url.clone(),
                missed_tweets: config.missed_tweets_url.clone(),
                rate_limited: config.rate_limited_url.clone(),
            }),
            deliveries,
        }
    }

    fn send(&self, action: &'static str, url: String, params: Vec<(String, String)>, delete: bool) -> Result<(), NotifierError> {
        let client = self.client.clone();
        self.deliveries.spawn(async move {
            let outcome = if delete {
                client.delete(&url, &params).await
            } else {
                client.post_form(&url, &params).await
            };
            report(action, &url, outcome);
        })
    }
}

fn report(action: &str, url: &str, outcome: Result<ApiResponse, ApiError>) {
    match outcome {
        Ok(response) if response.success => {
            log::debug!("{} delivered to {} ({})", action, url, response.status);
        }
        Ok(response) => {
            log::error!(
                "{} to {} failed with response code {}: {}",
                action,
                url,
                response.status,
                response.body
            );
        }
        Err(e) => log::error!("{} to {} failed: {}", action, url, e),
    }
}

impl Notifier for HttpNotifier {
    fn notify_missed_tweets(&self, _item: &StreamItem, count: u64) -> Result<(), NotifierError> {
        log::warn!("Stream reported {} missed tweets", count);
        match &self.endpoints.missed_tweets {
            Some(url) => self.send(
                "Missed tweets notice",
                url.clone(),
                vec![("count".to_string(), count.to_string())],
                false,
            ),
            None => Ok(()),
        }
    }

    fn notify_rate_limiting_initiated(
        &self,
        _item: &StreamItem,
        limited_keys: &[String],
    ) -> Result<(), NotifierError> {
        let keys = limited_keys.join(",");
        log::info!("Rate limiting initiated for {}", keys);
        match &self.endpoints.rate_limited {
            Some(url) => self.send(
                "Rate limiting notice",
                url.clone(),
                vec![("limited_keys".to_string(), keys)],
                false,
            ),
            None => Ok(()),
        }
    }

    fn delete_tweet(&self, _item: &StreamItem, deleted: &DeletedTweet) -> Result<(), NotifierError> {
        log::info!("Deleting tweet {} for user {}", deleted.id, deleted.user_id);
        self.send(
            "Delete",
            self.endpoints.delete.clone(),
            vec![
                ("id".to_string(), deleted.id.clone()),
                ("twitter_user_id".to_string(), deleted.user_id.clone()),
            ],
            true,
        )
    }

    fn publish_tweet(&self, _item: &StreamItem, tweet: &Tweet) -> Result<(), NotifierError> {
        log::info!("Publishing tweet {} from user {}: {}", tweet.id, tweet.user_id, tweet.text);
        self.send(
            "Publish",
            self.endpoints.publish.clone(),
            vec![
                ("id".to_string(), tweet.id.clone()),
                ("text".to_string(), tweet.text.clone()),
                ("twitter_user_id".to_string(), tweet.user_id.clone()),
            ],
            false,
        )
    }
}
