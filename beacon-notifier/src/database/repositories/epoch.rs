//! Epoch repository: the cycle boundary source of truth.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;

#[async_trait]
pub trait EpochRepository: Send + Sync {
    /// Latest fully imported epoch, or `0` when none has been imported yet.
    async fn latest_epoch(&self) -> Result<u64>;
}

/// SQLx implementation of EpochRepository.
pub struct SqlxEpochRepository {
    pool: SqlitePool,
}

impl SqlxEpochRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EpochRepository for SqlxEpochRepository {
    async fn latest_epoch(&self) -> Result<u64> {
        let (latest,): (Option<i64>,) = sqlx::query_as("SELECT MAX(epoch) FROM epochs")
            .fetch_one(&self.pool)
            .await?;
        Ok(latest.and_then(|e| u64::try_from(e).ok()).unwrap_or(0))
    }
}
