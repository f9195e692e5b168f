//! # Watermark Resolution
//!
//! The cutoff handed to a fetcher is the newest stored `publish_time` for the
//! site, unless that is missing or older than the lag window, in which case
//! it is `now - lag_window`. The window bounds how far back a long outage or a
//! brand-new site makes the crawler look.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::connections::{DbError, ItemStore};
use crate::models::{CrawlRecord, SiteCode};

/// Cutoff for a site whose newest record is `latest`, evaluated at `now`.
pub fn effective_cutoff(
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lag_window: TimeDelta,
) -> DateTime<Utc> {
    match latest {
        Some(latest) if now - latest <= lag_window => latest,
        _ => now - lag_window,
    }
}

/// Resolves cutoffs for one item kind against its store.
pub struct WatermarkResolver<R: CrawlRecord> {
    store: Arc<dyn ItemStore<R>>,
    lag_window: TimeDelta,
}

impl<R: CrawlRecord> Clone for WatermarkResolver<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lag_window: self.lag_window,
        }
    }
}

impl<R: CrawlRecord> WatermarkResolver<R> {
    pub fn new(store: Arc<dyn ItemStore<R>>, lag_window: TimeDelta) -> Self {
        Self { store, lag_window }
    }

    pub fn lag_window(&self) -> TimeDelta {
        self.lag_window
    }

    /// Cutoff for `site` as of now.
    pub async fn resolve(&self, site: R::Site) -> Result<DateTime<Utc>, DbError> {
        self.resolve_at(site, Utc::now()).await
    }

    /// Cutoff for `site` as of `now`.
    pub async fn resolve_at(&self, site: R::Site, now: DateTime<Utc>) -> Result<DateTime<Utc>, DbError> {
        let latest = self.store.last_publish_time(site).await?;
        let cutoff = effective_cutoff(latest, now, self.lag_window);
        debug!(
            kind = %R::KIND,
            site = site.code(),
            latest = ?latest,
            %cutoff,
            "Resolved watermark"
        );
        Ok(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlashNewsItem, FlashNewsSite};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct Latest(Option<DateTime<Utc>>);

    #[async_trait]
    impl ItemStore<FlashNewsItem> for Latest {
        async fn last_publish_time(&self, _site: FlashNewsSite) -> Result<Option<DateTime<Utc>>, DbError> {
            Ok(self.0)
        }

        async fn insert_many(&self, _items: &[FlashNewsItem]) -> Result<u64, DbError> {
            Ok(0)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_records_fall_back_to_lag_window() {
        let lag = TimeDelta::days(3);
        assert_eq!(effective_cutoff(None, now(), lag), now() - lag);
    }

    #[test]
    fn stale_record_falls_back_to_lag_window() {
        let lag = TimeDelta::hours(72);
        let latest = now() - TimeDelta::hours(100);
        assert_eq!(effective_cutoff(Some(latest), now(), lag), now() - lag);
    }

    #[test]
    fn recent_record_is_used_unmodified() {
        let lag = TimeDelta::hours(72);
        let latest = now() - TimeDelta::hours(5);
        assert_eq!(effective_cutoff(Some(latest), now(), lag), latest);

        let boundary = now() - lag;
        assert_eq!(effective_cutoff(Some(boundary), now(), lag), boundary);
    }

    #[test]
    fn cutoff_never_precedes_the_window() {
        let lag = TimeDelta::days(21);
        for hours in [0_i64, 1, 100, 503, 504, 505, 10_000] {
            let latest = now() - TimeDelta::hours(hours);
            let cutoff = effective_cutoff(Some(latest), now(), lag);
            assert!(cutoff >= now() - lag, "latest {hours}h ago gave {cutoff}");
        }
    }

    #[tokio::test]
    async fn resolver_reads_latest_from_store() {
        let latest = now() - TimeDelta::hours(1);
        let resolver = WatermarkResolver::<FlashNewsItem>::new(Arc::new(Latest(Some(latest))), TimeDelta::days(3));
        let cutoff = resolver.resolve_at(FlashNewsSite::Finnhub, now()).await.unwrap();
        assert_eq!(cutoff, latest);
    }
}
