//! # Connections Module
//!
//! Persistent connections to external services.

/// Redis list used as the Resque job queue.
pub mod queue_redis;

pub use queue_redis::RedisJobQueue;
