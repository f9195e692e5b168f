//! # Finnhub Flash News
//!
//! Polls `GET /news?category=<category>` (currently only `crypto`) with the
//! `X-Finnhub-Token` header. Without an API key the fetcher logs a warning and
//! reports nothing new instead of failing the unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::http_source::HttpSource;
use super::{collect_after, unix_seconds, FetchError, Fetcher};
use crate::models::{FlashNewsItem, FlashNewsSite, FlashNewsSource};

pub const FINNHUB_API_BASE_URL: &str = "https://finnhub.io/api/v1";
const NEWS_ENDPOINT: &str = "/news";
const CATEGORIES: &[&str] = &["crypto"];
const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-finnhub-token");

#[derive(Debug, Deserialize)]
struct FinnhubNews {
    datetime: f64,
    headline: String,
    #[serde(default)]
    summary: String,
    url: Option<String>,
    source: Option<String>,
}

pub struct FinnhubFlashNewsFetcher {
    http: HttpSource,
    api_key: Option<String>,
    base_url: String,
}

impl FinnhubFlashNewsFetcher {
    pub fn new(http: HttpSource, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: FINNHUB_API_BASE_URL.to_string(),
        }
    }

    /// Points the fetcher at another API root (mirrors, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn news_to_item(category: &str, news: FinnhubNews) -> Result<FlashNewsItem, FetchError> {
        let source = news
            .source
            .as_deref()
            .map(FlashNewsSource::from_code_or_others)
            .unwrap_or(FlashNewsSource::Others);
        Ok(FlashNewsItem::new(
            source,
            FlashNewsSite::Finnhub,
            format!("[Category: {category}] {}", news.headline),
            news.summary,
            news.url,
            unix_seconds(news.datetime)?,
        ))
    }
}

/// Converts one category's response into items newer than `after`.
pub(crate) fn parse_news(category: &str, entries: Vec<Value>, after: DateTime<Utc>) -> Vec<FlashNewsItem> {
    collect_after(FlashNewsSite::Finnhub.as_str(), after, entries, |entry| {
        let news: FinnhubNews =
            serde_json::from_value(entry).map_err(|e| FetchError::Parse(e.to_string()))?;
        FinnhubFlashNewsFetcher::news_to_item(category, news).map(Some)
    })
}

#[async_trait]
impl Fetcher<FlashNewsItem> for FinnhubFlashNewsFetcher {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<FlashNewsItem>, FetchError> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("Finnhub not authenticated, can't fetch flash news");
            return Ok(Vec::new());
        };

        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(api_key)
            .map_err(|e| FetchError::NotConfigured(format!("finnhub api key: {e}")))?;
        headers.insert(TOKEN_HEADER, token);

        let url = format!("{}{}", self.base_url, NEWS_ENDPOINT);
        let mut items = Vec::new();
        for &category in CATEGORIES {
            let entries: Vec<Value> = self
                .http
                .get_json(&url, &[("category", category)], headers.clone())
                .await?;
            let received = entries.len();
            let fresh = parse_news(category, entries, after);
            debug!(category, received, fresh = fresh.len(), "Finnhub news parsed");
            items.extend(fresh);
        }
        items.sort_by_key(|item| item.publish_time);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn maps_entries_and_filters_by_cutoff() {
        let after = Utc.with_ymd_and_hms(2023, 11, 14, 22, 0, 0).unwrap();
        let entries = vec![
            json!({
                "datetime": 1_700_000_000,
                "headline": "BTC breaks out",
                "summary": "Bitcoin rallies",
                "url": "https://example.com/btc",
                "source": "CoinDesk"
            }),
            json!({
                "datetime": 1_699_000_000,
                "headline": "Too old",
                "summary": "",
                "url": null,
                "source": "Unknown Wire"
            }),
            json!({ "datetime": "soon", "headline": 3 }),
        ];

        let items = parse_news("crypto", entries, after);

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "[Category: crypto] BTC breaks out");
        assert_eq!(item.source, FlashNewsSource::CoinDesk);
        assert_eq!(item.site, FlashNewsSite::Finnhub);
        assert_eq!(item.url.as_deref(), Some("https://example.com/btc"));
        assert_eq!(item.publish_time.timestamp(), 1_700_000_000);
        assert_eq!(item.title_md5, crate::models::title_md5(&item.title));
    }

    #[test]
    fn unknown_source_becomes_others() {
        let after = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let items = parse_news(
            "crypto",
            vec![json!({"datetime": 1_700_000_000, "headline": "h", "summary": "s", "url": null, "source": "Bloomberg"})],
            after,
        );
        assert_eq!(items[0].source, FlashNewsSource::Others);
    }

    #[tokio::test]
    async fn missing_api_key_yields_no_items() {
        let fetcher = FinnhubFlashNewsFetcher::new(HttpSource::new().unwrap(), Some("  ".into()));
        let items = fetcher.fetch(Utc::now()).await.unwrap();
        assert!(items.is_empty());
    }
}
