//! # Stream Module
//!
//! Everything between the upstream connection and the dispatcher: the
//! subscription filter, the decoded item and its classification, and the
//! transport that delivers raw lines.
//!
//! ## Contained Modules:
//! - **`filter`**: validates and truncates `follow`/`track` filter parameters.
//! - **`item`**: the decoded [`StreamItem`] and the pure [`classify`] function.
//! - **`transport`**: the [`StreamTransport`] seam, its signals, and the HTTP
//!   streaming implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Filter normalization.
pub mod filter;
/// Stream items and classification.
pub mod item;
/// Streaming transports and their signals.
pub mod transport;

pub use filter::{normalize, normalize_with_report, FilterError, FilterSpec, RawFilterSpec, Truncation};
pub use item::{classify, Category, DeletedTweet, StreamItem, Tweet};
pub use transport::{StreamRequest, StreamSignal, StreamTransport, TransportEvent, TransportSession};
#[cfg(feature = "http")]
pub use transport::HttpStreamTransport;
