//! # PostgreSQL Persistence Client
//!
//! Provides a managed connection pool for PostgreSQL using `deadpool-postgres`
//! and `tokio-postgres`.
//!
//! ## Key Features:
//! - **Lazy, Idempotent Pool**: the pool is created on `open()` or on first use,
//!   verified with a `SELECT 1` round trip, and held behind a lock so concurrent
//!   reopeners coalesce onto a single pool.
//! - **One-Shot Recovery**: when the pool reports itself closed or a connection
//!   acquire times out, the pool reference is discarded, a fresh one is opened
//!   and the operation is retried exactly once. A second consecutive pool failure
//!   surfaces as [`DbError::Connection`].
//! - **Generation-Checked Resets**: every pool carries the generation it was
//!   opened under. A failed call only discards the slot if it still holds the
//!   pool that call ran against, so late resets never close a pool another
//!   caller has just reopened.
//! - **Checked Transactions**: only read committed, repeatable read and
//!   serializable are accepted; anything else fails before a connection is taken.
//!   Transactions commit on success and roll back on error.
//! - **Batched Reads**: `fetch_batched` pulls rows from a server-side portal in
//!   fixed-size chunks inside one transaction.
//!
//! Operations are closures receiving a borrowed client or transaction and
//! returning a boxed future. They may be invoked twice (once per attempt), so
//! captured data is owned and cloned per attempt.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, IsolationLevel, NoTls, Row, Transaction};
use tracing::{debug, error, info, warn};

use super::{DbError, StoreHandle};

/// An owned, thread-safe statement parameter.
pub type SqlParam = Box<dyn ToSql + Send + Sync>;

/// Attempts per operation: the first try plus one reopen-and-retry.
const MAX_POOL_ATTEMPTS: u32 = 2;

/// # Connection Settings
///
/// Everything needed to build the pool. `url`, when present, takes precedence
/// over the discrete host/port/user/password/db fields.
#[derive(Clone)]
pub struct PgSettings {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    /// Upper bound on pooled connections.
    pub pool_max_size: usize,
    /// How long a caller waits for a free connection before the pool times out.
    pub pool_wait_timeout: Duration,
    /// Connect and recycle timeout for individual connections.
    pub connect_timeout: Duration,
    /// Rows per portal round trip in `fetch_batched`.
    pub fetch_batch_size: usize,
}

impl Default for PgSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "tradebotdb".to_string(),
            port: 5432,
            user: "tradebot_user".to_string(),
            password: String::new(),
            db_name: "tradebot_db".to_string(),
            pool_max_size: 10,
            pool_wait_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            fetch_batch_size: 5000,
        }
    }
}

impl PgSettings {
    /// Builds settings around a full connection string.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Connection target without credentials, for logs.
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(url) => match url.rsplit_once('@') {
                Some((_, target)) => format!("postgresql://{target}"),
                None => url.clone(),
            },
            None => format!("postgresql://{}:{}/{}", self.host, self.port, self.db_name),
        }
    }
}

impl fmt::Debug for PgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSettings")
            .field("target", &self.display_target())
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool_max_size", &self.pool_max_size)
            .field("pool_wait_timeout", &self.pool_wait_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("fetch_batch_size", &self.fetch_batch_size)
            .finish()
    }
}

/// # Transaction Isolation
///
/// The isolation levels a transaction may run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnIsolation {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TryFrom<IsolationLevel> for TxnIsolation {
    type Error = DbError;

    fn try_from(level: IsolationLevel) -> Result<Self, Self::Error> {
        match level {
            IsolationLevel::ReadCommitted => Ok(TxnIsolation::ReadCommitted),
            IsolationLevel::RepeatableRead => Ok(TxnIsolation::RepeatableRead),
            IsolationLevel::Serializable => Ok(TxnIsolation::Serializable),
            other => Err(DbError::InvalidIsolationLevel(format!("{other:?}"))),
        }
    }
}

impl From<TxnIsolation> for IsolationLevel {
    fn from(level: TxnIsolation) -> Self {
        match level {
            TxnIsolation::ReadCommitted => IsolationLevel::ReadCommitted,
            TxnIsolation::RepeatableRead => IsolationLevel::RepeatableRead,
            TxnIsolation::Serializable => IsolationLevel::Serializable,
        }
    }
}

impl FromStr for TxnIsolation {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "read committed" => Ok(TxnIsolation::ReadCommitted),
            "repeatable read" => Ok(TxnIsolation::RepeatableRead),
            "serializable" => Ok(TxnIsolation::Serializable),
            _ => Err(DbError::InvalidIsolationLevel(s.to_string())),
        }
    }
}

impl From<PoolError> for DbError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Closed => DbError::PoolUnavailable("pool is closed".to_string()),
            PoolError::Timeout(kind) => {
                DbError::PoolUnavailable(format!("timed out acquiring connection ({kind:?})"))
            }
            other => DbError::Connection(other.to_string()),
        }
    }
}

/// Runs `attempt` and, on a pool failure, calls `reset` and tries exactly once
/// more. A second pool failure becomes [`DbError::Connection`]; any other error
/// is returned unchanged.
pub(crate) async fn with_pool_recovery<R, Op, OpFut, Reset, ResetFut>(
    operation: &str,
    mut attempt: Op,
    mut reset: Reset,
) -> Result<R, DbError>
where
    Op: FnMut(u32) -> OpFut,
    OpFut: Future<Output = Result<R, DbError>>,
    Reset: FnMut() -> ResetFut,
    ResetFut: Future<Output = ()>,
{
    let mut last_failure = String::new();
    for attempt_no in 1..=MAX_POOL_ATTEMPTS {
        match attempt(attempt_no).await {
            Err(e) if e.is_pool_failure() => {
                reset().await;
                if attempt_no < MAX_POOL_ATTEMPTS {
                    warn!(operation, attempt = attempt_no, error = %e, "Pool failure, reopening and retrying once");
                } else {
                    error!(operation, attempt = attempt_no, error = %e, "Pool failure persisted after reopen");
                }
                last_failure = e.to_string();
            }
            other => return other,
        }
    }
    Err(DbError::Connection(format!(
        "{operation}: pool failed {MAX_POOL_ATTEMPTS} times in a row: {last_failure}"
    )))
}

fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| &**p as &(dyn ToSql + Sync)).collect()
}

/// The current pool and the number of pools opened so far.
#[derive(Default)]
struct PoolSlot {
    pool: Option<Pool>,
    generation: u64,
}

/// # PostgreSQL Client
///
/// Owns at most one pool at a time. Cheap to share behind an `Arc`.
pub struct PgClient {
    settings: PgSettings,
    slot: RwLock<PoolSlot>,
}

impl PgClient {
    /// Creates a client; no connection is made until `open()` or first use.
    pub fn new(settings: PgSettings) -> Self {
        Self {
            settings,
            slot: RwLock::new(PoolSlot::default()),
        }
    }

    pub fn settings(&self) -> &PgSettings {
        &self.settings
    }

    /// Whether a pool is currently held.
    pub async fn is_open(&self) -> bool {
        self.slot.read().await.pool.is_some()
    }

    fn build_pool(&self) -> Result<Pool, DbError> {
        let mut cfg = DeadpoolConfig::new();
        match &self.settings.url {
            Some(url) => cfg.url = Some(url.clone()),
            None => {
                cfg.host = Some(self.settings.host.clone());
                cfg.port = Some(self.settings.port);
                cfg.user = Some(self.settings.user.clone());
                cfg.password = Some(self.settings.password.clone());
                cfg.dbname = Some(self.settings.db_name.clone());
            }
        }
        cfg.connect_timeout = Some(self.settings.connect_timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.settings.pool_max_size);
        pool_cfg.timeouts.wait = Some(self.settings.pool_wait_timeout);
        pool_cfg.timeouts.create = Some(self.settings.connect_timeout);
        pool_cfg.timeouts.recycle = Some(self.settings.connect_timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DbError::PoolConfig(e.to_string()))
    }

    async fn verify(pool: &Pool) -> Result<(), DbError> {
        let client = pool
            .get()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Creates and verifies the pool if none is held.
    ///
    /// # Errors
    /// [`DbError::Connection`] when the store is unreachable; no pool is kept.
    pub async fn open(&self) -> Result<(), DbError> {
        self.open_slot().await.map(|_| ())
    }

    /// Returns the held pool, creating it under the write lock if the slot is
    /// empty. Callers racing here all receive the same pool.
    async fn open_slot(&self) -> Result<(Pool, u64), DbError> {
        let mut slot = self.slot.write().await;
        if let Some(pool) = &slot.pool {
            return Ok((pool.clone(), slot.generation));
        }

        let target = self.settings.display_target();
        let pool = self.build_pool()?;
        if let Err(e) = Self::verify(&pool).await {
            pool.close();
            error!(db = %target, error = %e, "Failed to open connection pool");
            return Err(e);
        }

        slot.generation += 1;
        slot.pool = Some(pool.clone());
        info!(
            db = %target,
            max_size = self.settings.pool_max_size,
            generation = slot.generation,
            "Connection pool opened"
        );
        Ok((pool, slot.generation))
    }

    /// Releases the pool, if any.
    pub async fn close(&self) {
        let taken = self.slot.write().await.pool.take();
        if let Some(pool) = taken {
            pool.close();
            info!(db = %self.settings.display_target(), "Connection pool closed");
        }
    }

    /// Drops the pool opened under `failed` so the next attempt opens a fresh
    /// one. A newer pool in the slot is left untouched.
    async fn invalidate(&self, failed: u64) {
        let mut slot = self.slot.write().await;
        if slot.generation != failed {
            debug!(failed, current = slot.generation, "Pool already replaced, keeping it");
            return;
        }
        if let Some(pool) = slot.pool.take() {
            pool.close();
            debug!(generation = failed, "Discarded failed connection pool");
        }
    }

    async fn current_pool(&self) -> Result<(Pool, u64), DbError> {
        {
            let slot = self.slot.read().await;
            if let Some(pool) = &slot.pool {
                return Ok((pool.clone(), slot.generation));
            }
        }
        self.open_slot().await
    }

    async fn query_once<R, F>(&self, op: &F, leased: &AtomicU64) -> Result<R, DbError>
    where
        F: for<'c> Fn(&'c Client) -> BoxFuture<'c, Result<R, DbError>> + Send + Sync,
    {
        let (pool, generation) = self.current_pool().await?;
        leased.store(generation, Ordering::SeqCst);
        let client = pool.get().await?;
        let pg: &Client = &client;
        op(pg).await.map_err(|e| {
            error!(error = %e, "Query failed");
            e
        })
    }

    /// Runs `op` on one pooled connection, returning it to the pool on every
    /// exit path.
    pub async fn query<R, F>(&self, op: F) -> Result<R, DbError>
    where
        R: Send,
        F: for<'c> Fn(&'c Client) -> BoxFuture<'c, Result<R, DbError>> + Send + Sync,
    {
        let op = &op;
        // Generation of the pool the latest attempt ran against.
        let leased = &AtomicU64::new(0);
        with_pool_recovery(
            "query",
            move |_| self.query_once(op, leased),
            move || self.invalidate(leased.load(Ordering::SeqCst)),
        )
        .await
    }

    async fn transaction_once<R, F>(
        &self,
        isolation: TxnIsolation,
        op: &F,
        leased: &AtomicU64,
    ) -> Result<R, DbError>
    where
        F: for<'t> Fn(&'t Transaction<'t>) -> BoxFuture<'t, Result<R, DbError>> + Send + Sync,
    {
        let (pool, generation) = self.current_pool().await?;
        leased.store(generation, Ordering::SeqCst);
        let mut client = pool.get().await?;
        let tx = client
            .build_transaction()
            .isolation_level(isolation.into())
            .start()
            .await?;

        let outcome = {
            let pg_tx: &Transaction<'_> = &tx;
            op(pg_tx).await
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                error!(?isolation, error = %e, "Transaction failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Runs `op` inside a transaction at `isolation`.
    ///
    /// # Errors
    /// [`DbError::InvalidIsolationLevel`] for read uncommitted (or any other
    /// level) before a connection is acquired.
    pub async fn transaction<R, F>(&self, isolation: IsolationLevel, op: F) -> Result<R, DbError>
    where
        R: Send,
        F: for<'t> Fn(&'t Transaction<'t>) -> BoxFuture<'t, Result<R, DbError>> + Send + Sync,
    {
        let isolation = TxnIsolation::try_from(isolation)?;
        let op = &op;
        let leased = &AtomicU64::new(0);
        with_pool_recovery(
            "transaction",
            move |_| self.transaction_once(isolation, op, leased),
            move || self.invalidate(leased.load(Ordering::SeqCst)),
        )
        .await
    }

    /// Executes one statement in a read-committed transaction.
    pub async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> Result<u64, DbError> {
        let sql: Arc<str> = Arc::from(sql);
        let params = Arc::new(params);
        self.transaction(IsolationLevel::ReadCommitted, move |tx| {
            let (sql, params) = (Arc::clone(&sql), Arc::clone(&params));
            Box::pin(async move {
                let refs = param_refs(&params);
                let affected = tx.execute(&*sql, &refs).await?;
                Ok::<_, DbError>(affected)
            })
        })
        .await
    }

    /// Executes `sql` once per row, all-or-nothing. Returns total affected rows.
    pub async fn execute_many(&self, sql: &str, rows: Vec<Vec<SqlParam>>) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql: Arc<str> = Arc::from(sql);
        let rows = Arc::new(rows);
        self.transaction(IsolationLevel::ReadCommitted, move |tx| {
            let (sql, rows) = (Arc::clone(&sql), Arc::clone(&rows));
            Box::pin(async move {
                let statement = tx.prepare(&sql).await?;
                let mut affected = 0;
                for row in rows.iter() {
                    let refs = param_refs(row);
                    affected += tx.execute(&statement, &refs).await?;
                }
                Ok::<_, DbError>(affected)
            })
        })
        .await
    }

    /// Streams the result of `sql` through a portal in chunks of
    /// `fetch_batch_size` rows, mapping each row with `mapper`.
    pub async fn fetch_batched<T, M>(
        &self,
        sql: &str,
        params: Vec<SqlParam>,
        mapper: M,
    ) -> Result<Vec<T>, DbError>
    where
        T: Send + 'static,
        M: Fn(&Row) -> Result<T, DbError> + Send + Sync + 'static,
    {
        let batch_size = i32::try_from(self.settings.fetch_batch_size.max(1)).unwrap_or(i32::MAX);
        let sql: Arc<str> = Arc::from(sql);
        let params = Arc::new(params);
        let mapper = Arc::new(mapper);
        self.transaction(IsolationLevel::ReadCommitted, move |tx| {
            let (sql, params, mapper) = (Arc::clone(&sql), Arc::clone(&params), Arc::clone(&mapper));
            Box::pin(async move {
                let refs = param_refs(&params);
                let portal = tx.bind(&*sql, &refs).await?;
                let mut collected = Vec::new();
                loop {
                    let chunk = tx.query_portal(&portal, batch_size).await?;
                    if chunk.is_empty() {
                        break;
                    }
                    for row in &chunk {
                        collected.push(mapper(row)?);
                    }
                }
                Ok::<_, DbError>(collected)
            })
        })
        .await
    }

    /// `SELECT 1` round trip. Errors are logged and reported as `false`.
    pub async fn test_connection(&self) -> bool {
        let check = self
            .query(|client| {
                Box::pin(async move {
                    let row = client.query_one("SELECT 1 AS test", &[]).await?;
                    Ok::<i32, DbError>(row.try_get("test")?)
                })
            })
            .await;
        match check {
            Ok(1) => true,
            Ok(other) => {
                warn!(value = other, "Unexpected health check result");
                false
            }
            Err(e) => {
                error!(error = %e, "Database health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl StoreHandle for PgClient {
    async fn open(&self) -> Result<(), DbError> {
        PgClient::open(self).await
    }

    async fn close(&self) {
        PgClient::close(self).await
    }

    async fn test_connection(&self) -> bool {
        PgClient::test_connection(self).await
    }
}
