//! # Site Fetchers
//!
//! A fetcher turns "everything published after `T`" into items for one site.
//! Implementations own no shared mutable state and may be called concurrently.
//!
//! - **`registry`**: the site → fetcher map the dispatcher looks units up in.
//! - **`http_source`**: the shared `reqwest` client with JSON and text GET helpers.
//! - **`html_page`**: `scraper` helpers shared by the page-scraping fetchers.
//! - **`finnhub`** / **`wallstreetcn`**: JSON-API flash news fetchers.
//! - **`chaincatcher`**: scraped flash news and articles.
//! - **`glassnode`**: scraped newsletter articles.
//!
//! [`collect_after`] is the common tail of every fetcher: it converts raw
//! upstream entries one by one, drops malformed entries with a warning, drops
//! anything not strictly newer than the cutoff and orders the rest oldest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::models::CrawlRecord;

/// Shared HTTP client for JSON APIs.
pub mod http_source;
/// Site → fetcher lookup table.
pub mod registry;
/// Finnhub market news.
pub mod finnhub;
/// WallstreetCn live feed.
pub mod wallstreetcn;
pub(crate) mod html_page;
/// ChainCatcher timeline and articles.
pub mod chaincatcher;
/// Glassnode Insights newsletter.
pub mod glassnode;

pub use chaincatcher::{ChainCatcherArticleFetcher, ChainCatcherFlashNewsFetcher};
pub use finnhub::FinnhubFlashNewsFetcher;
pub use glassnode::GlassnodeArticleFetcher;
pub use http_source::HttpSource;
pub use registry::FetcherRegistry;
pub use wallstreetcn::WallstreetCnFlashNewsFetcher;

/// Errors that abort one site's unit for the current cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect failure, timeout or broken transfer.
    #[error("network error: {0}")]
    Network(String),
    /// The site answered with a non-success status.
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    /// The payload as a whole did not have the expected shape.
    #[error("malformed payload: {0}")]
    Parse(String),
    /// Missing credentials or settings for this fetcher.
    #[error("fetcher not configured: {0}")]
    NotConfigured(String),
}

/// # Fetcher
///
/// Given a cutoff, returns items published strictly after it, oldest first.
/// An empty list means "nothing new".
#[async_trait]
pub trait Fetcher<R: CrawlRecord>: Send + Sync {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<R>, FetchError>;
}

/// Converts raw entries with `convert`, keeping only items newer than `after`.
///
/// `convert` returns `Ok(None)` for entries that are intentionally skipped and
/// `Err` for malformed ones; the latter are logged and dropped without
/// affecting their siblings.
pub fn collect_after<T, R, F>(
    site: &str,
    after: DateTime<Utc>,
    raw: impl IntoIterator<Item = T>,
    mut convert: F,
) -> Vec<R>
where
    R: CrawlRecord,
    F: FnMut(T) -> Result<Option<R>, FetchError>,
{
    let mut items: Vec<R> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match convert(entry) {
            Ok(Some(item)) => Some(item),
            Ok(None) => None,
            Err(e) => {
                warn!(site, index, error = %e, "Dropping malformed item");
                None
            }
        })
        .filter(|item| item.publish_time() > after)
        .collect();
    items.sort_by_key(|item| item.publish_time());
    items
}

/// Interprets an upstream unix timestamp in seconds.
pub(crate) fn unix_seconds(value: f64) -> Result<DateTime<Utc>, FetchError> {
    if !value.is_finite() {
        return Err(FetchError::Parse(format!("invalid timestamp {value}")));
    }
    let secs = value.trunc() as i64;
    let nanos = ((value.fract()) * 1e9).round() as u32;
    DateTime::from_timestamp(secs, nanos.min(999_999_999))
        .ok_or_else(|| FetchError::Parse(format!("timestamp out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlashNewsItem, FlashNewsSite, FlashNewsSource};
    use chrono::{TimeDelta, TimeZone};

    fn item(title: &str, at: DateTime<Utc>) -> FlashNewsItem {
        FlashNewsItem::new(FlashNewsSource::Others, FlashNewsSite::Investing, title, "", None, at)
    }

    #[test]
    fn keeps_only_newer_items_sorted_and_drops_malformed() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let raw = vec![
            Ok(Some(item("late", cutoff + TimeDelta::hours(2)))),
            Err(FetchError::Parse("no headline".into())),
            Ok(Some(item("at cutoff", cutoff))),
            Ok(None),
            Ok(Some(item("early", cutoff + TimeDelta::hours(1)))),
            Ok(Some(item("old", cutoff - TimeDelta::hours(1)))),
        ];

        let kept = collect_after("INVESTING", cutoff, raw, |entry| entry);

        let titles: Vec<&str> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["early", "late"]);
    }

    #[test]
    fn unix_seconds_accepts_fractional_values() {
        let at = unix_seconds(1_700_000_000.5).unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
        assert_eq!(at.timestamp_subsec_millis(), 500);
        assert!(unix_seconds(f64::NAN).is_err());
    }
}
