//! # Core Engine Module
//!
//! The stream consumption and dispatch pipeline.
//!
//! ## Core Components:
//!
//! - **`dispatcher`**: the per-item path. Decodes and classifies each raw line,
//!   consults the limiter for publishable tweets and calls the notifier. All
//!   per-item failures, panics included, stop here.
//!
//! - **`upstream_manager`**: the connection manager. Owns the single live
//!   streaming session, feeds its items to the dispatcher in order, forwards
//!   transport signals, and exposes `connect`, `reconnect` and `disconnect`
//!   to a supervising caller.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Per-item routing with failure isolation.
pub mod dispatcher;
/// Session lifecycle and the connection state machine.
pub mod upstream_manager;

pub use dispatcher::{ItemError, Outcome, TweetDispatcher};
pub use upstream_manager::{ConnectionState, StreamConsumer, StreamEndpoint};
