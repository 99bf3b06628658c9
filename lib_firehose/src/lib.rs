//! # lib_firehose
//!
//! Consumes a filtered social-media stream over one long-lived connection,
//! classifies each item, applies a rate-limit decision and hands the result to
//! a downstream notifier (direct HTTP calls or Resque jobs).
//!
//! Adapters that pull in network stacks sit behind features: `http` (stream
//! transport, OAuth signing, HTTP notifier, subscriptions client) and `queue`
//! (Redis job queue). Both are on by default.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod core;
pub mod limiter;
pub mod notifiers;
pub mod stream;

#[cfg(feature = "queue")]
pub mod connections;
#[cfg(feature = "http")]
pub mod retrieve;

pub use crate::core::{ConnectionState, StreamConsumer, StreamEndpoint, TweetDispatcher};
pub use configs::AppConfig;
pub use limiter::{LimitDecision, Limiter};
pub use notifiers::{Deliveries, Notifier, NotifierError};
pub use stream::{FilterSpec, RawFilterSpec, StreamItem, StreamSignal, StreamTransport};
