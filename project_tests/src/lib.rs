//! # Test Doubles
//!
//! In-memory stand-ins for the database and the remote sites, shared by the
//! integration tests under `tests/`.
//!
//! - [`MemoryStore`]: both item tables with the `(site, title_md5,
//!   publish_time)` uniqueness rule, plus a scriptable open/health lifecycle.
//! - [`ScriptedFetcher`]: returns a fixed item list and records every cutoff.
//! - [`FailingFetcher`]: fails every call with a network error.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lib_crawler::connections::{DbError, ItemStore, StoreHandle};
use lib_crawler::ingestors::{FetchError, Fetcher};
use lib_crawler::models::{ArticleItem, CrawlRecord, FlashNewsItem, FlashNewsSource, FlashNewsSite};

/// One item table with the store's uniqueness rule.
#[derive(Debug)]
pub struct MemoryTable<R> {
    rows: Mutex<Vec<R>>,
}

impl<R> Default for MemoryTable<R> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }
}

impl<R: CrawlRecord> MemoryTable<R> {
    pub fn rows(&self) -> Vec<R> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows_for(&self, site: R::Site) -> Vec<R> {
        self.rows().into_iter().filter(|r| r.site() == site).collect()
    }

    fn latest(&self, site: R::Site) -> Option<DateTime<Utc>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.site() == site)
            .map(|r| r.publish_time())
            .max()
    }

    /// Inserts rows whose key is new; returns how many were written.
    pub fn insert(&self, items: &[R]) -> u64 {
        let mut rows = self.rows.lock().unwrap();
        let mut inserted = 0;
        for item in items {
            let key = item.dedup_key();
            if rows.iter().all(|r| r.dedup_key() != key) {
                rows.push(item.clone());
                inserted += 1;
            }
        }
        inserted
    }
}

/// # Memory Store
///
/// Implements both [`ItemStore`] kinds and [`StoreHandle`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub flash_news: MemoryTable<FlashNewsItem>,
    pub articles: MemoryTable<ArticleItem>,
    /// `open` fails this many times before succeeding.
    pub open_failures: u32,
    pub open_attempts: AtomicU32,
    pub opened: AtomicBool,
    pub closed: AtomicBool,
    /// When set, `insert_many` fails without writing anything.
    pub fail_inserts: AtomicBool,
    /// When set, `test_connection` reports an outage.
    pub unhealthy: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open(failures: u32) -> Self {
        Self {
            open_failures: failures,
            ..Self::default()
        }
    }

    fn check_insert(&self) -> Result<(), DbError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            Err(DbError::PoolUnavailable("pool closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ItemStore<FlashNewsItem> for MemoryStore {
    async fn last_publish_time(&self, site: FlashNewsSite) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.flash_news.latest(site))
    }

    async fn insert_many(&self, items: &[FlashNewsItem]) -> Result<u64, DbError> {
        self.check_insert()?;
        Ok(self.flash_news.insert(items))
    }
}

#[async_trait]
impl ItemStore<ArticleItem> for MemoryStore {
    async fn last_publish_time(
        &self,
        site: lib_crawler::models::ArticleSite,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.articles.latest(site))
    }

    async fn insert_many(&self, items: &[ArticleItem]) -> Result<u64, DbError> {
        self.check_insert()?;
        Ok(self.articles.insert(items))
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    async fn open(&self) -> Result<(), DbError> {
        let attempt = self.open_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.open_failures {
            return Err(DbError::Connection(format!("attempt {attempt}: connection refused")));
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn test_connection(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.unhealthy.load(Ordering::SeqCst)
    }
}

/// # Scripted Fetcher
///
/// Returns clones of a fixed item list. A conforming fetcher keeps only items
/// strictly after the cutoff, as real fetchers do; a non-conforming one returns
/// everything. An optional delay simulates a slow site.
#[derive(Debug)]
pub struct ScriptedFetcher<R> {
    items: Vec<R>,
    conforming: bool,
    delay: Option<Duration>,
    cutoffs: Mutex<Vec<DateTime<Utc>>>,
}

impl<R: CrawlRecord> ScriptedFetcher<R> {
    pub fn conforming(items: Vec<R>) -> Self {
        Self {
            items,
            conforming: true,
            delay: None,
            cutoffs: Mutex::new(Vec::new()),
        }
    }

    pub fn non_conforming(items: Vec<R>) -> Self {
        Self {
            conforming: false,
            ..Self::conforming(items)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every cutoff this fetcher was called with, in call order.
    pub fn cutoffs(&self) -> Vec<DateTime<Utc>> {
        self.cutoffs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.cutoffs.lock().unwrap().len()
    }
}

#[async_trait]
impl<R: CrawlRecord> Fetcher<R> for ScriptedFetcher<R> {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<R>, FetchError> {
        self.cutoffs.lock().unwrap().push(after);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .items
            .iter()
            .filter(|item| !self.conforming || item.publish_time() > after)
            .cloned()
            .collect())
    }
}

/// Fails every call with a network error.
#[derive(Debug, Default)]
pub struct FailingFetcher {
    calls: AtomicU32,
}

impl FailingFetcher {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: CrawlRecord> Fetcher<R> for FailingFetcher {
    async fn fetch(&self, _after: DateTime<Utc>) -> Result<Vec<R>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Network("connection reset by peer".into()))
    }
}

/// A flash news item for `site` published at `at`.
pub fn flash_item(site: FlashNewsSite, title: &str, at: DateTime<Utc>) -> FlashNewsItem {
    FlashNewsItem::new(FlashNewsSource::Others, site, title, "", None, at)
}
