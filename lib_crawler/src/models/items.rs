//! # Persisted Crawl Records
//!
//! Both record kinds share the uniqueness key `(site, title_md5, publish_time)`.
//! The fingerprint is the lowercase hex MD5 of the UTF-8 title and is always
//! derivable from the title, so constructors compute it and
//! [`CrawlRecord::ensure_fingerprint`] repairs records built field by field.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::sites::{ArticleSite, ArticleSource, FlashNewsSite, FlashNewsSource, SiteCode};

/// Lowercase hex MD5 digest of a title.
pub fn title_md5(title: &str) -> String {
    format!("{:x}", md5::compute(title.as_bytes()))
}

/// # Item Kind
///
/// Distinguishes the two record families. Each kind maps to its own table,
/// job name and default look-back window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Short, timestamped headlines.
    FlashNews,
    /// Long-form articles.
    Article,
}

impl ItemKind {
    /// Stable name used in logs and job names.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ItemKind::FlashNews => "flash_news",
            ItemKind::Article => "article",
        }
    }

    /// Backing table.
    pub const fn table(&self) -> &'static str {
        match self {
            ItemKind::FlashNews => "t_flash_news",
            ItemKind::Article => "t_article",
        }
    }

    /// Default look-back used when a site has no recent records.
    pub fn default_lag_window(&self) -> TimeDelta {
        match self {
            ItemKind::FlashNews => TimeDelta::days(3),
            ItemKind::Article => TimeDelta::days(21),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Crawl Record
///
/// Implemented by every persisted item type so watermark resolution, dispatch
/// and storage can be written once for both kinds.
pub trait CrawlRecord: Clone + fmt::Debug + Send + Sync + 'static {
    /// The site enumeration this kind is keyed by.
    type Site: SiteCode;

    /// Which record family this is.
    const KIND: ItemKind;

    /// Site the item was crawled from.
    fn site(&self) -> Self::Site;

    /// Title used for the fingerprint.
    fn title(&self) -> &str;

    /// Stored fingerprint; empty until computed.
    fn fingerprint(&self) -> &str;

    /// Publication time reported by the site.
    fn publish_time(&self) -> DateTime<Utc>;

    /// Recomputes the fingerprint from the title when it is missing.
    fn ensure_fingerprint(&mut self);

    /// The `(site, title_md5, publish_time)` uniqueness key.
    fn dedup_key(&self) -> (&'static str, String, DateTime<Utc>) {
        let fingerprint = if self.fingerprint().is_empty() {
            title_md5(self.title())
        } else {
            self.fingerprint().to_string()
        };
        (self.site().code(), fingerprint, self.publish_time())
    }
}

/// A flash news row in `t_flash_news`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashNewsItem {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    pub source: FlashNewsSource,
    pub site: FlashNewsSite,
    pub title: String,
    pub title_md5: String,
    pub description: String,
    pub url: Option<String>,
    pub create_time: DateTime<Utc>,
    pub publish_time: DateTime<Utc>,
}

impl FlashNewsItem {
    /// Builds an unsaved item stamped with the current time.
    pub fn new(
        source: FlashNewsSource,
        site: FlashNewsSite,
        title: impl Into<String>,
        description: impl Into<String>,
        url: Option<String>,
        publish_time: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        Self {
            id: None,
            source,
            site,
            title_md5: title_md5(&title),
            title,
            description: description.into(),
            url,
            create_time: Utc::now(),
            publish_time,
        }
    }
}

impl CrawlRecord for FlashNewsItem {
    type Site = FlashNewsSite;
    const KIND: ItemKind = ItemKind::FlashNews;

    fn site(&self) -> FlashNewsSite {
        self.site
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn fingerprint(&self) -> &str {
        &self.title_md5
    }

    fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    fn ensure_fingerprint(&mut self) {
        if self.title_md5.is_empty() {
            self.title_md5 = title_md5(&self.title);
        }
    }
}

/// An article row in `t_article`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleItem {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    pub source: ArticleSource,
    pub site: ArticleSite,
    pub title: String,
    pub title_md5: String,
    pub content: String,
    pub url: Option<String>,
    pub create_time: DateTime<Utc>,
    pub publish_time: DateTime<Utc>,
}

impl ArticleItem {
    /// Builds an unsaved article stamped with the current time.
    pub fn new(
        source: ArticleSource,
        site: ArticleSite,
        title: impl Into<String>,
        content: impl Into<String>,
        url: Option<String>,
        publish_time: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        Self {
            id: None,
            source,
            site,
            title_md5: title_md5(&title),
            title,
            content: content.into(),
            url,
            create_time: Utc::now(),
            publish_time,
        }
    }
}

impl CrawlRecord for ArticleItem {
    type Site = ArticleSite;
    const KIND: ItemKind = ItemKind::Article;

    fn site(&self) -> ArticleSite {
        self.site
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn fingerprint(&self) -> &str {
        &self.title_md5
    }

    fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    fn ensure_fingerprint(&mut self) {
        if self.title_md5.is_empty() {
            self.title_md5 = title_md5(&self.title);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fingerprint_is_lowercase_hex_md5() {
        assert_eq!(title_md5(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(title_md5("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn constructor_derives_fingerprint() {
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let item = FlashNewsItem::new(
            FlashNewsSource::Others,
            FlashNewsSite::Finnhub,
            "hello",
            "body",
            None,
            published,
        );
        assert_eq!(item.title_md5, title_md5("hello"));
        assert_eq!(item.id, None);
        assert_eq!(
            item.dedup_key(),
            ("FINNHUB", title_md5("hello"), published)
        );
    }

    #[test]
    fn ensure_fingerprint_fills_only_missing_values() {
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut article = ArticleItem::new(
            ArticleSource::Glassnode,
            ArticleSite::Glassnode,
            "weekly on-chain",
            "text",
            Some("https://example.org/a".into()),
            published,
        );
        article.title_md5.clear();
        article.ensure_fingerprint();
        assert_eq!(article.title_md5, title_md5("weekly on-chain"));

        article.title_md5 = "preset".into();
        article.ensure_fingerprint();
        assert_eq!(article.title_md5, "preset");
    }

    #[test]
    fn kinds_carry_table_and_lag() {
        assert_eq!(ItemKind::FlashNews.table(), "t_flash_news");
        assert_eq!(ItemKind::Article.table(), "t_article");
        assert_eq!(ItemKind::FlashNews.default_lag_window(), TimeDelta::hours(72));
        assert_eq!(ItemKind::Article.default_lag_window(), TimeDelta::days(21));
        assert_eq!(<ArticleItem as CrawlRecord>::KIND, ItemKind::Article);
    }
}
