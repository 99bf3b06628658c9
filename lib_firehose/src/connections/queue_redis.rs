//! # Redis Job Queue
//!
//! Appends Resque job records to a Redis list through a reconnecting
//! connection manager.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};

use crate::notifiers::{JobQueue, NotifierError};

/// A [`JobQueue`] backed by Redis `RPUSH`.
#[derive(Clone)]
pub struct RedisJobQueue {
    /// The shared, auto-reconnecting connection.
    conn: ConnectionManager,
}

impl RedisJobQueue {
    /// Connects to Redis at `url`.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        log::info!("Connected job queue to {}", url);
        Ok(Self { conn })
    }
}

impl JobQueue for RedisJobQueue {
    async fn push(&self, key: &str, job: String) -> Result<(), NotifierError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .rpush(key, job)
            .await
            .map_err(|e| NotifierError::Queue(e.to_string()))?;
        Ok(())
    }
}
