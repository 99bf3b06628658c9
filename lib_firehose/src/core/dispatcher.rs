//! # Tweet Dispatcher
//!
//! The per-item half of the stream consumer. Every raw line delivered by the
//! transport passes through [`TweetDispatcher::process`] exactly once, in
//! transport order:
//!
//! 1.  **Decode** the line into a [`StreamItem`].
//! 2.  **Classify** it into one [`Category`].
//! 3.  **Route** it:
//!     - `LimitNotice` goes straight to `notify_missed_tweets`.
//!     - `Deletion` goes straight to `delete_tweet`, whatever the limiter state.
//!     - `Publishable` asks the limiter once. `InitiateLimiting` triggers
//!       `notify_rate_limiting_initiated` and suppresses the tweet,
//!       `ContinueLimiting` only suppresses it, `DoNotLimit` publishes it.
//!     - `DisconnectNotice` and `Ignorable` are only logged.
//!
//! ## Failure isolation
//!
//! Any error raised while handling one item, and any panic, is caught here and
//! logged together with the raw payload. The caller always gets an
//! [`Outcome`] back and simply moves on to the next line, so one bad item can
//! never take the connection down.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::limiter::{limiting_facets, LimitDecision, Limiter, LimiterError};
use crate::notifiers::{Notifier, NotifierError};
use crate::stream::filter::FilterSpec;
use crate::stream::item::{classify, Category, StreamItem};

/// Failures while handling one item.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The line is not valid JSON.
    #[error("Failed to decode stream item: {0}")]
    Decode(#[from] serde_json::Error),
    /// The limiter could not answer.
    #[error(transparent)]
    Limiter(#[from] LimiterError),
    /// A notifier call could not be started.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
    /// Handling the item panicked.
    #[error("Item handler panicked: {0}")]
    Panic(String),
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `publish_tweet` was called.
    Published,
    /// `delete_tweet` was called.
    Deleted,
    /// `notify_missed_tweets` was called.
    MissedReported,
    /// `notify_rate_limiting_initiated` was called; nothing was published.
    LimitingInitiated,
    /// The tweet was suppressed by ongoing limiting.
    Suppressed,
    /// Logged only.
    Ignored,
    /// Handling failed; see the log.
    Failed,
}

/// Routes classified items to the limiter and the notifier.
pub struct TweetDispatcher {
    notifier: Arc<dyn Notifier>,
    limiter: Arc<dyn Limiter>,
}

impl TweetDispatcher {
    /// Creates a dispatcher over one notifier and one limiter.
    pub fn new(notifier: Arc<dyn Notifier>, limiter: Arc<dyn Limiter>) -> Self {
        Self { notifier, limiter }
    }

    /// # Process
    ///
    /// Handles one raw line. `filters` supplies the tracked terms used to
    /// build the tweet's limiting facets. Never fails and never panics.
    pub fn process(&self, raw: &[u8], filters: &FilterSpec) -> Outcome {
        let result = catch_unwind(AssertUnwindSafe(|| self.route(raw, filters)))
            .unwrap_or_else(|panic| Err(ItemError::Panic(panic_message(panic.as_ref()))));

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(
                    "Failed to process stream item: {}. Raw item: {}",
                    e,
                    String::from_utf8_lossy(raw)
                );
                Outcome::Failed
            }
        }
    }

    fn route(&self, raw: &[u8], filters: &FilterSpec) -> Result<Outcome, ItemError> {
        let item = StreamItem::decode(raw)?;

        let category = classify(&item);
        log::trace!("Stream item classified as {}", category.name());

        match category {
            Category::LimitNotice { missed } => {
                self.notifier.notify_missed_tweets(&item, missed)?;
                Ok(Outcome::MissedReported)
            }
            Category::Deletion(deleted) => {
                self.notifier.delete_tweet(&item, &deleted)?;
                Ok(Outcome::Deleted)
            }
            Category::Publishable(tweet) => {
                let facets = limiting_facets(&tweet.user_id, &tweet.text, &filters.track);
                match self.limiter.decide(&facets)? {
                    LimitDecision::InitiateLimiting { limited_keys } => {
                        self.notifier.notify_rate_limiting_initiated(&item, &limited_keys)?;
                        Ok(Outcome::LimitingInitiated)
                    }
                    LimitDecision::ContinueLimiting => {
                        log::debug!("Tweet {} suppressed by rate limiting", tweet.id);
                        Ok(Outcome::Suppressed)
                    }
                    LimitDecision::DoNotLimit => {
                        self.notifier.publish_tweet(&item, &tweet)?;
                        Ok(Outcome::Published)
                    }
                }
            }
            Category::DisconnectNotice { code, reason } => {
                log::warn!(
                    "Upstream disconnect notice (code {}): {}",
                    code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                    reason.as_deref().unwrap_or("no reason given")
                );
                Ok(Outcome::Ignored)
            }
            Category::Ignorable => {
                log::debug!("Ignoring stream item: {}", item);
                Ok(Outcome::Ignored)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{SlidingWindowLimiter, UnlimitedLimiter};
    use crate::stream::item::{DeletedTweet, Tweet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Missed(u64),
        Initiated(Vec<String>),
        Delete(DeletedTweet),
        Publish(Tweet),
    }

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<Call>>,
        panic_on_publish_id: Option<String>,
    }

    impl RecordingNotifier {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify_missed_tweets(&self, _item: &StreamItem, count: u64) -> Result<(), NotifierError> {
            self.calls.lock().unwrap().push(Call::Missed(count));
            Ok(())
        }

        fn notify_rate_limiting_initiated(&self, _item: &StreamItem, keys: &[String]) -> Result<(), NotifierError> {
            self.calls.lock().unwrap().push(Call::Initiated(keys.to_vec()));
            Ok(())
        }

        fn delete_tweet(&self, _item: &StreamItem, deleted: &DeletedTweet) -> Result<(), NotifierError> {
            self.calls.lock().unwrap().push(Call::Delete(deleted.clone()));
            Ok(())
        }

        fn publish_tweet(&self, _item: &StreamItem, tweet: &Tweet) -> Result<(), NotifierError> {
            if self.panic_on_publish_id.as_deref() == Some(tweet.id.as_str()) {
                panic!("sink exploded on {}", tweet.id);
            }
            self.calls.lock().unwrap().push(Call::Publish(tweet.clone()));
            Ok(())
        }
    }

    struct FixedLimiter(LimitDecision);

    impl Limiter for FixedLimiter {
        fn decide(&self, _facets: &[String]) -> Result<LimitDecision, LimiterError> {
            Ok(self.0.clone())
        }
    }

    struct DownLimiter;

    impl Limiter for DownLimiter {
        fn decide(&self, _facets: &[String]) -> Result<LimitDecision, LimiterError> {
            Err(LimiterError::Unavailable("backend down".into()))
        }
    }

    fn dispatcher(notifier: Arc<RecordingNotifier>, limiter: impl Limiter + 'static) -> TweetDispatcher {
        TweetDispatcher::new(notifier, Arc::new(limiter))
    }

    const TWEET: &[u8] = br#"{"id_str":"42","text":"hi","user":{"id_str":"7"}}"#;
    const DELETE: &[u8] = br#"{"delete":{"status":{"id":"9","user_id":"3"}}}"#;

    #[test]
    fn test_do_not_limit_publishes_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), UnlimitedLimiter);

        assert_eq!(dispatcher.process(TWEET, &FilterSpec::default()), Outcome::Published);
        assert_eq!(
            notifier.calls(),
            vec![Call::Publish(Tweet { id: "42".into(), text: "hi".into(), user_id: "7".into() })]
        );
    }

    #[test]
    fn test_initiate_limiting_notifies_and_does_not_publish() {
        let notifier = Arc::new(RecordingNotifier::default());
        let decision = LimitDecision::InitiateLimiting { limited_keys: vec!["user:7".into()] };
        let dispatcher = dispatcher(notifier.clone(), FixedLimiter(decision));

        assert_eq!(dispatcher.process(TWEET, &FilterSpec::default()), Outcome::LimitingInitiated);
        assert_eq!(notifier.calls(), vec![Call::Initiated(vec!["user:7".into()])]);
    }

    #[test]
    fn test_continue_limiting_calls_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), FixedLimiter(LimitDecision::ContinueLimiting));

        assert_eq!(dispatcher.process(TWEET, &FilterSpec::default()), Outcome::Suppressed);
        assert!(notifier.calls().is_empty());
    }

    #[test]
    fn test_deletion_ignores_limiter_state() {
        for limiter in [
            FixedLimiter(LimitDecision::ContinueLimiting),
            FixedLimiter(LimitDecision::InitiateLimiting { limited_keys: vec!["user:3".into()] }),
            FixedLimiter(LimitDecision::DoNotLimit),
        ] {
            let notifier = Arc::new(RecordingNotifier::default());
            let dispatcher = dispatcher(notifier.clone(), limiter);

            assert_eq!(dispatcher.process(DELETE, &FilterSpec::default()), Outcome::Deleted);
            assert_eq!(
                notifier.calls(),
                vec![Call::Delete(DeletedTweet { id: "9".into(), user_id: "3".into() })]
            );
        }

        // A failing limiter is never consulted for deletions either.
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), DownLimiter);
        assert_eq!(dispatcher.process(DELETE, &FilterSpec::default()), Outcome::Deleted);
    }

    #[test]
    fn test_limit_notice_reports_missed_count() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), UnlimitedLimiter);

        assert_eq!(
            dispatcher.process(br#"{"limit":{"track":17}}"#, &FilterSpec::default()),
            Outcome::MissedReported
        );
        assert_eq!(notifier.calls(), vec![Call::Missed(17)]);
    }

    #[test]
    fn test_disconnect_and_ignorable_are_log_only() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), UnlimitedLimiter);
        let filters = FilterSpec::default();

        assert_eq!(
            dispatcher.process(br#"{"disconnect":{"code":4,"reason":"duplicate stream"}}"#, &filters),
            Outcome::Ignored
        );
        assert_eq!(dispatcher.process(br#"{"friends":[1,2,3]}"#, &filters), Outcome::Ignored);
        assert!(notifier.calls().is_empty());
    }

    #[test]
    fn test_failed_item_does_not_block_next() {
        let notifier = Arc::new(RecordingNotifier {
            panic_on_publish_id: Some("1".into()),
            ..Default::default()
        });
        let dispatcher = dispatcher(notifier.clone(), UnlimitedLimiter);
        let filters = FilterSpec::default();

        assert_eq!(dispatcher.process(b"{not json", &filters), Outcome::Failed);
        assert_eq!(
            dispatcher.process(br#"{"id_str":"1","text":"boom","user":{"id_str":"7"}}"#, &filters),
            Outcome::Failed
        );
        assert_eq!(dispatcher.process(TWEET, &filters), Outcome::Published);
        assert_eq!(notifier.calls().len(), 1);
    }

    #[test]
    fn test_limiter_error_is_contained() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), DownLimiter);

        assert_eq!(dispatcher.process(TWEET, &FilterSpec::default()), Outcome::Failed);
        assert!(notifier.calls().is_empty());
    }

    #[test]
    fn test_tracked_terms_become_facets() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), SlidingWindowLimiter::new(1, Duration::from_secs(60)));
        let filters = FilterSpec { follow: vec![], track: vec!["Rust".into()] };

        let first = br#"{"id_str":"1","text":"rust is fun","user":{"id_str":"5"}}"#;
        let second = br#"{"id_str":"2","text":"more RUST","user":{"id_str":"6"}}"#;
        let third = br#"{"id_str":"3","text":"rust again","user":{"id_str":"8"}}"#;

        assert_eq!(dispatcher.process(first, &filters), Outcome::Published);
        assert_eq!(dispatcher.process(second, &filters), Outcome::LimitingInitiated);
        assert_eq!(dispatcher.process(third, &filters), Outcome::Suppressed);

        let calls = notifier.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], Call::Initiated(vec!["track:rust".into()]));
    }
}
