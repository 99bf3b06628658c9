//! # Data Retrieval Module
//!
//! HTTP plumbing shared by the notifiers and the stream transport.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with retries and optional OAuth signing.
//! - **`oauth`**: the OAuth 1.0a (HMAC-SHA1) header signer.
//! - **`subscriptions`**: fetches the initial filters from the client app.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// OAuth 1.0a request signing.
pub mod oauth;
/// Initial filter retrieval.
pub mod subscriptions;

pub use ky_http::{ApiClient, ApiError, ApiResponse, ParamPlacement};
pub use oauth::{OAuthError, OAuthSigner};
pub use subscriptions::SubscriptionSource;
