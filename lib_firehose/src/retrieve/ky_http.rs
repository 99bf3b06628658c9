//! # HTTP Retrieval Utilities
//!
//! An asynchronous client for the client application's endpoints, wrapped
//! around `reqwest` with retry middleware. Requests are optionally signed with
//! an OAuth 1.0a `Authorization` header. A non-2xx answer is reported through
//! [`ApiResponse::success`], never as an `Err`.
//!
//! The signature is computed once per request and the retry middleware would
//! replay it with the same nonce, so signed clients never retry.

use std::time::Duration;

use reqwest::{header::AUTHORIZATION, Method};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use thiserror::Error;
use url::Url;

use super::oauth::{OAuthError, OAuthSigner};

/// Failures that prevented a request from producing any response.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The target URL is not an absolute URL.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Parser message.
        message: String,
    },
    /// The request could not be signed.
    #[error("Request signing failed: {0}")]
    Signing(#[from] OAuthError),
    /// Transport failure (connect, timeout, middleware).
    #[error("Request failed: {0}")]
    Transport(String),
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The response body as text.
    pub body: String,
}

/// Where request parameters go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamPlacement {
    /// URL query string.
    Query,
    /// `application/x-www-form-urlencoded` body.
    Form,
}

/// Middleware-enabled HTTP client with optional OAuth signing.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    signer: Option<OAuthSigner>,
}

impl ApiClient {
    /// Creates a client with `timeout` per request and `retries` retries on
    /// transient failures. `retries` is ignored when `signer` is set.
    pub fn new(timeout: Duration, retries: u32, signer: Option<OAuthSigner>) -> Result<Self, ApiError> {
        let retries = if signer.is_some() && retries > 0 {
            log::warn!("Ignoring {} HTTP retries for signed client; nonces are single-use", retries);
            0
        } else {
            retries
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(retries);
        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, signer })
    }

    /// Sends `method url` with `params`, signing when a signer is configured.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        placement: ParamPlacement,
    ) -> Result<ApiResponse, ApiError> {
        let parsed = Url::parse(url).map_err(|e| ApiError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let mut req = self.inner.request(method.clone(), parsed);
        req = match placement {
            ParamPlacement::Query if !params.is_empty() => req.query(params),
            ParamPlacement::Form => req.form(params),
            ParamPlacement::Query => req,
        };

        if let Some(signer) = &self.signer {
            let header = signer.sign(method.as_str(), url, params)?;
            req = req.header(AUTHORIZATION, header);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        Ok(ApiResponse {
            status: status.as_u16(),
            success: status.is_success(),
            body,
        })
    }

    /// `GET url`.
    pub async fn get(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.request(Method::GET, url, &[], ParamPlacement::Query).await
    }

    /// `POST url` with a form body.
    pub async fn post_form(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse, ApiError> {
        self.request(Method::POST, url, params, ParamPlacement::Form).await
    }

    /// `DELETE url` with query parameters.
    pub async fn delete(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse, ApiError> {
        self.request(Method::DELETE, url, params, ParamPlacement::Query).await
    }
}
