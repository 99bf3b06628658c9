//! # Resque Notifier
//!
//! Serializes each event as a Resque job envelope,
//! `{"class": <JobName>, "args": [<tweet payload>, ...]}`, and appends it to a
//! durable list. Workers reading the queue depend on this exact flat shape.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::configs::JobClasses;
use crate::stream::item::{DeletedTweet, StreamItem, Tweet};

use super::{Deliveries, Notifier, NotifierError};

/// An append-only, list-like durable queue.
pub trait JobQueue: Send + Sync + 'static {
    /// Appends one serialized job to the list at `key`.
    fn push(&self, key: &str, job: String) -> impl Future<Output = Result<(), NotifierError>> + Send;
}

/// The flat, unversioned Resque job record.
#[derive(Debug, Serialize)]
pub struct JobEnvelope<'a> {
    /// Worker class name.
    pub class: &'a str,
    /// Positional job arguments.
    pub args: Vec<Value>,
}

impl JobEnvelope<'_> {
    /// Serializes the envelope as one record.
    pub fn to_record(&self) -> Result<String, NotifierError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Notifier that enqueues Resque jobs.
pub struct QueueNotifier<Q: JobQueue> {
    queue: Arc<Q>,
    queue_key: String,
    classes: JobClasses,
    deliveries: Deliveries,
}

impl<Q: JobQueue> QueueNotifier<Q> {
    /// Creates a notifier appending to `queue_key` (e.g. `resque:queue:weeter`).
    pub fn new(queue: Q, queue_key: impl Into<String>, classes: JobClasses, deliveries: Deliveries) -> Self {
        Self {
            queue: Arc::new(queue),
            queue_key: queue_key.into(),
            classes,
            deliveries,
        }
    }

    fn enqueue(&self, class: &str, args: Vec<Value>) -> Result<(), NotifierError> {
        let record = JobEnvelope { class, args }.to_record()?;
        let queue = Arc::clone(&self.queue);
        let key = self.queue_key.clone();
        let class = class.to_string();

        self.deliveries.spawn(async move {
            if let Err(e) = queue.push(&key, record).await {
                log::error!("Failed to enqueue {} job on {}: {}", class, key, e);
            }
        })
    }
}

impl<Q: JobQueue> Notifier for QueueNotifier<Q> {
    fn notify_missed_tweets(&self, item: &StreamItem, count: u64) -> Result<(), NotifierError> {
        log::warn!("Stream reported {} missed tweets", count);
        self.enqueue(&self.classes.missed_tweets, vec![item.as_value().clone(), json!(count)])
    }

    fn notify_rate_limiting_initiated(
        &self,
        item: &StreamItem,
        limited_keys: &[String],
    ) -> Result<(), NotifierError> {
        log::info!("Rate limiting initiated for {}", limited_keys.join(", "));
        self.enqueue(
            &self.classes.rate_limiting_initiated,
            vec![item.as_value().clone(), json!(limited_keys)],
        )
    }

    fn delete_tweet(&self, item: &StreamItem, deleted: &DeletedTweet) -> Result<(), NotifierError> {
        log::info!("Deleting tweet {} for user {}", deleted.id, deleted.user_id);
        self.enqueue(&self.classes.delete, vec![item.as_value().clone()])
    }

    fn publish_tweet(&self, item: &StreamItem, tweet: &Tweet) -> Result<(), NotifierError> {
        log::info!("Publishing tweet {} from user {}: {}", tweet.id, tweet.user_id, tweet.text);
        self.enqueue(&self.classes.publish, vec![item.as_value().clone()])
    }
}
