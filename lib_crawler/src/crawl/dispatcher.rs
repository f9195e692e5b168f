//! # Fetch Dispatcher
//!
//! Runs one batch for one item kind: every active site becomes its own unit
//! (resolve watermark → fetch → one all-or-nothing bulk insert), and all units
//! run concurrently as separate tasks.
//!
//! ## Failure Isolation
//!
//! A unit's error (no fetcher, watermark read failure, fetch failure, insert
//! failure, even a panic inside a fetcher) is logged with the site and
//! recorded in the [`BatchReport`]. Other units are neither aborted nor delayed,
//! and the batch completes once every unit has finished.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use tracing::{error, info};

use super::scheduler::JobAction;
use super::watermark::WatermarkResolver;
use super::CrawlError;
use crate::connections::ItemStore;
use crate::ingestors::FetcherRegistry;
use crate::models::{CrawlRecord, ItemKind, SiteCode};

/// What a successful unit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteReport {
    /// Cutoff passed to the fetcher.
    pub cutoff: DateTime<Utc>,
    /// Items returned by the fetcher.
    pub fetched: usize,
    /// Rows actually written (duplicates excluded).
    pub inserted: u64,
}

/// One site's result within a batch.
#[derive(Debug)]
pub struct SiteOutcome<S> {
    pub site: S,
    pub result: Result<SiteReport, CrawlError>,
}

/// Per-site results of one batch, in the order the sites were requested.
#[derive(Debug)]
pub struct BatchReport<S> {
    pub kind: ItemKind,
    pub outcomes: Vec<SiteOutcome<S>>,
    pub elapsed: Duration,
}

impl<S: SiteCode> BatchReport<S> {
    pub fn succeeded(&self) -> impl Iterator<Item = (&S, &SiteReport)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|r| (&o.site, r)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&S, &CrawlError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.site, e)))
    }

    pub fn total_inserted(&self) -> u64 {
        self.succeeded().map(|(_, r)| r.inserted).sum()
    }

    pub fn outcome(&self, site: S) -> Option<&SiteOutcome<S>> {
        self.outcomes.iter().find(|o| o.site == site)
    }
}

/// # Fetch Dispatcher
///
/// Holds everything a unit needs behind `Arc`s so units can be spawned.
pub struct FetchDispatcher<R: CrawlRecord> {
    store: Arc<dyn ItemStore<R>>,
    fetchers: Arc<FetcherRegistry<R>>,
    watermark: WatermarkResolver<R>,
}

impl<R: CrawlRecord> Clone for FetchDispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            fetchers: Arc::clone(&self.fetchers),
            watermark: self.watermark.clone(),
        }
    }
}

impl<R: CrawlRecord> FetchDispatcher<R> {
    pub fn new(
        store: Arc<dyn ItemStore<R>>,
        fetchers: Arc<FetcherRegistry<R>>,
        lag_window: TimeDelta,
    ) -> Self {
        let watermark = WatermarkResolver::new(Arc::clone(&store), lag_window);
        Self {
            store,
            fetchers,
            watermark,
        }
    }

    pub fn fetchers(&self) -> &FetcherRegistry<R> {
        &self.fetchers
    }

    /// Runs every site in `sites` concurrently and waits for all of them.
    /// Duplicate sites are run once.
    pub async fn run_batch(&self, sites: &[R::Site]) -> BatchReport<R::Site> {
        let started = Instant::now();
        let mut unique: Vec<R::Site> = Vec::with_capacity(sites.len());
        for site in sites {
            if !unique.contains(site) {
                unique.push(*site);
            }
        }

        // --- Phase 1: spawn one task per site ---
        let handles: Vec<_> = unique
            .iter()
            .map(|&site| {
                let unit = self.clone();
                tokio::spawn(async move { unit.run_site(site).await })
            })
            .collect();

        // --- Phase 2: wait for all, converting panics into per-site errors ---
        let results = join_all(handles).await;
        let outcomes: Vec<SiteOutcome<R::Site>> = unique
            .into_iter()
            .zip(results)
            .map(|(site, joined)| {
                let result = joined.unwrap_or_else(|e| Err(CrawlError::Aborted(e.to_string())));
                if let Err(e) = &result {
                    error!(kind = %R::KIND, site = site.code(), error = %e, "Crawl ERROR");
                }
                SiteOutcome { site, result }
            })
            .collect();

        let report = BatchReport {
            kind: R::KIND,
            outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            kind = %R::KIND,
            sites = report.outcomes.len(),
            failed = report.failed().count(),
            inserted = report.total_inserted(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );
        report
    }

    async fn run_site(&self, site: R::Site) -> Result<SiteReport, CrawlError> {
        let fetcher = self
            .fetchers
            .get(site)
            .ok_or_else(|| CrawlError::UnknownSite(site.code().to_string()))?;

        info!(kind = %R::KIND, site = site.code(), "Crawl START");
        let cutoff = self.watermark.resolve(site).await.map_err(CrawlError::Watermark)?;

        let mut items = fetcher.fetch(cutoff).await.map_err(CrawlError::Fetch)?;
        items.iter_mut().for_each(R::ensure_fingerprint);
        let fetched = items.len();

        let inserted = if items.is_empty() {
            0
        } else {
            self.store.insert_many(&items).await.map_err(CrawlError::Persist)?
        };

        info!(
            kind = %R::KIND,
            site = site.code(),
            %cutoff,
            fetched,
            inserted,
            "Crawl END"
        );
        Ok(SiteReport {
            cutoff,
            fetched,
            inserted,
        })
    }

    /// A scheduler action that runs a batch over `sites` each time it fires.
    pub fn job_action(self: &Arc<Self>, sites: Vec<R::Site>) -> JobAction {
        let dispatcher = Arc::clone(self);
        let sites: Arc<[R::Site]> = sites.into();
        Arc::new(move || -> BoxFuture<'static, ()> {
            let dispatcher = Arc::clone(&dispatcher);
            let sites = Arc::clone(&sites);
            async move {
                dispatcher.run_batch(&sites).await;
            }
            .boxed()
        })
    }
}
