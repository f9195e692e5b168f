//! # Persistence Layer
//!
//! - **`db_postgres`**: `PgClient`, the pooled PostgreSQL client with one-shot
//!   pool recovery, isolation-checked transactions and portal-based batch reads.
//! - **`tradebot_store`**: the `t_flash_news` / `t_article` tables expressed as
//!   [`ItemStore`] implementations on top of `PgClient`.
//!
//! The two traits defined here are the seams the rest of the crate depends on,
//! so the crawl engine and health endpoint can run against an in-memory store
//! in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::CrawlRecord;

/// Pooled PostgreSQL client.
pub mod db_postgres;
/// Item tables backed by `PgClient`.
pub mod tradebot_store;

pub use db_postgres::{PgClient, PgSettings, SqlParam, TxnIsolation};
pub use tradebot_store::TradebotStore;

/// Custom error types for Database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The store could not be reached, or the pool failed twice in a row.
    #[error("Failed to connect to database: {0}")]
    Connection(String),
    /// The pool is closed or a connection could not be acquired in time.
    #[error("Connection pool unavailable: {0}")]
    PoolUnavailable(String),
    /// A statement failed inside an acquired connection.
    #[error("Query execution failed: {0}")]
    Query(#[from] tokio_postgres::Error),
    /// A row did not map onto the expected record shape.
    #[error("Failed to decode row: {0}")]
    Decode(String),
    /// Only read committed, repeatable read and serializable are accepted.
    #[error("Invalid isolation level: {0}")]
    InvalidIsolationLevel(String),
    /// The pool could not be built from the supplied settings.
    #[error("Invalid pool configuration: {0}")]
    PoolConfig(String),
}

impl DbError {
    /// Whether this failure should trigger the one-shot pool reopen.
    pub fn is_pool_failure(&self) -> bool {
        matches!(self, DbError::PoolUnavailable(_))
    }
}

/// # Store Handle
///
/// Lifecycle surface of a store: what the coordinator opens and closes, and
/// what the health endpoint checks.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Creates the pool if absent and verifies one round trip.
    async fn open(&self) -> Result<(), DbError>;
    /// Releases the pool. Safe to call repeatedly.
    async fn close(&self);
    /// `SELECT 1` round trip; `false` on any error.
    async fn test_connection(&self) -> bool;
}

/// # Item Store
///
/// Persistence operations the crawl engine needs for one record kind.
#[async_trait]
pub trait ItemStore<R: CrawlRecord>: Send + Sync {
    /// Latest `publish_time` recorded for `site`, or `None` when it has no rows.
    async fn last_publish_time(&self, site: R::Site) -> Result<Option<DateTime<Utc>>, DbError>;

    /// Inserts all items in one transaction, ignoring rows whose
    /// `(site, title_md5, publish_time)` already exists. Returns rows written.
    async fn insert_many(&self, items: &[R]) -> Result<u64, DbError>;
}
