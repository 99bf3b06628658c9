//! # Rate Limiter Port
//!
//! The contract between the dispatcher and whatever decides whether a tweet
//! should be suppressed. A limiter is consulted at most once per publishable
//! tweet with that tweet's facets (author id, matched track terms) and answers
//! with a [`LimitDecision`].
//!
//! ## Contained Modules:
//! - **`window`**: an in-process sliding-window limiter.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use thiserror::Error;

/// The in-process sliding-window limiter.
pub mod window;

pub use window::SlidingWindowLimiter;

/// Outcome of a limiter lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    /// At least one facet crossed the threshold on this call.
    InitiateLimiting {
        /// Every facet of the tweet that is currently over threshold.
        limited_keys: Vec<String>,
    },
    /// The facets were already over threshold.
    ContinueLimiting,
    /// Publish normally.
    DoNotLimit,
}

/// Failures reported by a limiter backend.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The limiter's shared state could not be accessed.
    #[error("Limiter state unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether a tweet with the given facets should be limited.
///
/// Facets are keys into the limiter's own state; two calls with the same facets
/// observe the same underlying state.
pub trait Limiter: Send + Sync {
    /// Records one occurrence of `facets` and returns the resulting decision.
    fn decide(&self, facets: &[String]) -> Result<LimitDecision, LimiterError>;
}

/// A limiter that never limits. Used when limiting is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedLimiter;

impl Limiter for UnlimitedLimiter {
    fn decide(&self, _facets: &[String]) -> Result<LimitDecision, LimiterError> {
        Ok(LimitDecision::DoNotLimit)
    }
}

/// Builds the limiting facets of a tweet: its author plus every tracked term
/// that appears in the text (case-insensitive).
pub fn limiting_facets(user_id: &str, text: &str, track: &[String]) -> Vec<String> {
    let mut facets = vec![format!("user:{user_id}")];
    let lowered = text.to_lowercase();
    for term in track {
        let needle = term.trim().to_lowercase();
        if !needle.is_empty() && lowered.contains(&needle) {
            let facet = format!("track:{needle}");
            if !facets.contains(&facet) {
                facets.push(facet);
            }
        }
    }
    facets
}
