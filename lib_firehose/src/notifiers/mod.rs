//! # Notifier Port
//!
//! Downstream delivery of classified, decision-resolved stream events. Two
//! variants implement [`Notifier`]: direct HTTP calls to the client application
//! (`http`) and Resque jobs appended to a Redis list (`resque`). The variant is
//! picked once at wiring time; the dispatcher never branches on it.
//!
//! Every call is fire-and-forget. The delivery is spawned on the shared
//! [`Deliveries`] tracker and its outcome is only logged, so a slow sink never
//! stalls stream ingestion. A call returns `Err` only when the delivery could
//! not even be started.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use crate::stream::item::{DeletedTweet, StreamItem, Tweet};

/// HTTP notifier.
#[cfg(feature = "http")]
pub mod http;
/// Queue-backed notifier.
pub mod resque;

#[cfg(feature = "http")]
pub use http::HttpNotifier;
pub use resque::{JobEnvelope, JobQueue, QueueNotifier};

/// Delivery failures.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// A payload could not be serialized.
    #[error("Failed to serialize notifier payload: {0}")]
    Serialize(#[from] serde_json::Error),
    /// There is no tokio runtime to run the delivery on.
    #[error("No async runtime available for delivery")]
    NoRuntime,
    /// The queue backend rejected or could not receive the job.
    #[error("Queue append failed: {0}")]
    Queue(String),
}

/// The capability set every downstream sink provides.
pub trait Notifier: Send + Sync {
    /// Upstream dropped `count` tweets before delivery.
    fn notify_missed_tweets(&self, item: &StreamItem, count: u64) -> Result<(), NotifierError>;

    /// The facets in `limited_keys` just crossed the rate-limit threshold.
    fn notify_rate_limiting_initiated(
        &self,
        item: &StreamItem,
        limited_keys: &[String],
    ) -> Result<(), NotifierError>;

    /// A previously published tweet must be removed.
    fn delete_tweet(&self, item: &StreamItem, deleted: &DeletedTweet) -> Result<(), NotifierError>;

    /// A tweet passed the limiter and should be published.
    fn publish_tweet(&self, item: &StreamItem, tweet: &Tweet) -> Result<(), NotifierError>;
}

/// Tracks in-flight notifier deliveries so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct Deliveries {
    tracker: TaskTracker,
}

impl Deliveries {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `delivery` on the current runtime without awaiting it.
    pub fn spawn<F>(&self, delivery: F) -> Result<(), NotifierError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| NotifierError::NoRuntime)?;
        self.tracker.spawn_on(delivery, &handle);
        Ok(())
    }

    /// Number of deliveries still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every delivery spawned so far has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
