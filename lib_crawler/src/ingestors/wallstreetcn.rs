//! # WallstreetCn Live Feed
//!
//! Reads the public `content/lives` endpoint. Items without a title are
//! promoted to use their text as the title (the description then stays
//! empty); items with neither are skipped. Titles are prefixed with the
//! Chinese channel names, e.g. `"[类别: 美股, 科技] ..."`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ORIGIN, REFERER};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::http_source::HttpSource;
use super::{collect_after, unix_seconds, FetchError, Fetcher};
use crate::models::{FlashNewsItem, FlashNewsSite, FlashNewsSource};

pub const WALLSTREETCN_LIVES_URL: &str = "https://api-one-wscn.awtmt.com/apiv1/content/lives";

const LIVES_QUERY: &[(&str, &str)] = &[
    ("channel", "global-channel"),
    ("client", "pc"),
    ("limit", "20"),
    ("first_page", "true"),
    ("accept", "live,vip-live"),
];

/// Feed channels and their display names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Global,
    AStock,
    UsStock,
    HkStock,
    Forex,
    Commodity,
    Bond,
    Tech,
    Gold,
    Oil,
}

impl Channel {
    pub fn from_slug(slug: &str) -> Option<Self> {
        Some(match slug {
            "global-channel" => Channel::Global,
            "a-stock-channel" => Channel::AStock,
            "us-stock-channel" => Channel::UsStock,
            "hk-stock-channel" => Channel::HkStock,
            "forex-channel" => Channel::Forex,
            "commodity-channel" => Channel::Commodity,
            "bond-channel" => Channel::Bond,
            "tech-channel" => Channel::Tech,
            "goldc-channel" => Channel::Gold,
            "oil-channel" => Channel::Oil,
            _ => return None,
        })
    }

    pub fn cn_name(&self) -> &'static str {
        match self {
            Channel::Global => "无分类",
            Channel::AStock => "A股",
            Channel::UsStock => "美股",
            Channel::HkStock => "港股",
            Channel::Forex => "外汇",
            Channel::Commodity => "商品",
            Channel::Bond => "债券",
            Channel::Tech => "科技",
            Channel::Gold => "黃金",
            Channel::Oil => "原油",
        }
    }
}

/// Known, non-global channel names; the global name only when nothing else matched.
fn category_names(slugs: &[String]) -> Vec<&'static str> {
    let names: Vec<&'static str> = slugs
        .iter()
        .filter_map(|slug| Channel::from_slug(slug))
        .filter(|channel| *channel != Channel::Global)
        .map(|channel| channel.cn_name())
        .collect();
    if names.is_empty() {
        vec![Channel::Global.cn_name()]
    } else {
        names
    }
}

#[derive(Debug, Deserialize)]
struct LivesEnvelope {
    data: LivesData,
}

#[derive(Debug, Deserialize)]
struct LivesData {
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LiveItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_text: Option<String>,
    #[serde(default)]
    channels: Option<Vec<String>>,
    display_time: f64,
    #[serde(default)]
    uri: Option<String>,
}

fn live_to_item(live: LiveItem) -> Result<Option<FlashNewsItem>, FetchError> {
    let mut title = live.title.unwrap_or_default();
    let mut content = live.content_text.unwrap_or_default();
    if title.is_empty() {
        if content.is_empty() {
            return Ok(None);
        }
        title = std::mem::take(&mut content);
    }
    let categories = category_names(live.channels.as_deref().unwrap_or_default());
    Ok(Some(FlashNewsItem::new(
        FlashNewsSource::WallstreetCn,
        FlashNewsSite::WallstreetCn,
        format!("[类别: {}] {}", categories.join(", "), title),
        content,
        live.uri,
        unix_seconds(live.display_time)?,
    )))
}

/// Parses a full `lives` response body into items newer than `after`.
///
/// # Errors
/// `Parse` when the envelope itself lacks `data.items`.
pub(crate) fn parse_lives(payload: Value, after: DateTime<Utc>) -> Result<Vec<FlashNewsItem>, FetchError> {
    let envelope: LivesEnvelope =
        serde_json::from_value(payload).map_err(|e| FetchError::Parse(e.to_string()))?;
    Ok(collect_after(
        FlashNewsSite::WallstreetCn.as_str(),
        after,
        envelope.data.items,
        |entry| {
            let live: LiveItem =
                serde_json::from_value(entry).map_err(|e| FetchError::Parse(e.to_string()))?;
            live_to_item(live)
        },
    ))
}

pub struct WallstreetCnFlashNewsFetcher {
    http: HttpSource,
    url: String,
}

impl WallstreetCnFlashNewsFetcher {
    pub fn new(http: HttpSource) -> Self {
        Self {
            http,
            url: WALLSTREETCN_LIVES_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(REFERER, HeaderValue::from_static("https://wallstreetcn.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://wallstreetcn.com"));
        headers.insert(HeaderName::from_static("x-client-type"), HeaderValue::from_static("pc"));
        headers.insert(
            HeaderName::from_static("x-ivanka-platform"),
            HeaderValue::from_static("wscn-platform"),
        );
        headers
    }
}

#[async_trait]
impl Fetcher<FlashNewsItem> for WallstreetCnFlashNewsFetcher {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<FlashNewsItem>, FetchError> {
        let payload: Value = self.http.get_json(&self.url, LIVES_QUERY, Self::headers()).await?;
        let items = parse_lives(payload, after)?;
        debug!(fresh = items.len(), "WallstreetCn lives parsed");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn channel_prefix_prefers_specific_channels() {
        let slugs = vec!["global-channel".to_string(), "us-stock-channel".to_string(), "tech-channel".to_string()];
        assert_eq!(category_names(&slugs), vec!["美股", "科技"]);
        assert_eq!(category_names(&["mystery".to_string()]), vec!["无分类"]);
        assert_eq!(category_names(&[]), vec!["无分类"]);
    }

    #[test]
    fn parses_items_and_promotes_content_to_title() {
        let payload = json!({
            "code": 20000,
            "data": {
                "items": [
                    {
                        "title": "",
                        "content_text": "Gold hits record",
                        "channels": ["goldc-channel"],
                        "display_time": 1_700_000_100,
                        "uri": "https://wallstreetcn.com/livenews/1"
                    },
                    {
                        "title": "Fed minutes",
                        "content_text": "Details",
                        "channels": null,
                        "display_time": 1_700_000_050,
                        "uri": "https://wallstreetcn.com/livenews/2"
                    },
                    { "title": "", "content_text": "", "display_time": 1_700_000_200 },
                    { "title": "stale", "display_time": 1_699_999_000 },
                    { "title": "broken", "display_time": "later" }
                ]
            }
        });

        let items = parse_lives(payload, epoch()).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "[类别: 无分类] Fed minutes");
        assert_eq!(items[0].description, "Details");
        assert_eq!(items[1].title, "[类别: 黃金] Gold hits record");
        assert_eq!(items[1].description, "");
        assert_eq!(items[1].source, FlashNewsSource::WallstreetCn);
    }

    #[test]
    fn missing_envelope_fails_the_unit() {
        let result = parse_lives(json!({"code": 50000, "message": "busy"}), epoch());
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }
}
