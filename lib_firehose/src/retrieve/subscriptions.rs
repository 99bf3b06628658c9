//! Initial filter retrieval from the client application.

use crate::stream::filter::RawFilterSpec;

use super::ky_http::ApiClient;

/// Fetches the filters the stream should start with.
pub struct SubscriptionSource {
    client: ApiClient,
    url: String,
}

impl SubscriptionSource {
    /// Creates a source reading from `url`.
    pub fn new(client: ApiClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// `GET` the subscriptions endpoint. Anything but a `200` with a
    /// parseable body means "no filters" and is logged.
    pub async fn initial_filters(&self) -> Option<RawFilterSpec> {
        let response = match self.client.get(&self.url).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Initial filters request failed: {}", e);
                return None;
            }
        };

        if response.status != 200 {
            log::error!(
                "Initial filters request failed with response code {}.",
                response.status
            );
            return None;
        }

        match serde_json::from_str::<RawFilterSpec>(&response.body) {
            Ok(filters) => Some(filters),
            Err(e) => {
                log::error!("Initial filters response is not a filter spec: {}", e);
                None
            }
        }
    }
}
