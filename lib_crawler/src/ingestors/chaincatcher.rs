//! # ChainCatcher
//!
//! Scrapes the English ChainCatcher site. Page timestamps are Beijing
//! wall-clock time.
//!
//! - **Flash news**: the `/en/news` timeline lists title, time and link; the
//!   description is read from each fresh entry's detail page.
//! - **Articles**: every article linked from `/en/article` is opened for its
//!   time, title, abstract, related labels and body. The stored content is the
//!   cleaned body, preceded by the abstract and the label list when present.
//!
//! A failing listing page fails the unit. A failing or malformed detail page
//! only drops that entry.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, UPGRADE_INSECURE_REQUESTS,
};
use scraper::Html;
use tracing::debug;

use super::html_page::{
    absolute_url, attr_of, beijing_wall_clock, clean_html, escape_text, selector, text_of, CleanRules,
};
use super::http_source::HttpSource;
use super::{collect_after, FetchError, Fetcher};
use crate::models::{ArticleItem, ArticleSite, ArticleSource, FlashNewsItem, FlashNewsSite, FlashNewsSource};

pub const CHAINCATCHER_BASE_URL: &str = "https://www.chaincatcher.com";
const NEWS_PATH: &str = "/en/news";
const ARTICLE_PATH: &str = "/en/article";

/// One timeline entry before its detail page is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewsEntry {
    pub title: String,
    pub url: String,
    pub publish_time: DateTime<Utc>,
}

/// Parses the flash news timeline. Entries without a title or link are skipped.
pub(crate) fn parse_news_timeline(
    html: &str,
    base_url: &str,
) -> Result<Vec<Result<Option<NewsEntry>, FetchError>>, FetchError> {
    let document = Html::parse_document(html);
    let entry_sel = selector("div.v-timeline-item")?;
    let title_sel = selector(".timeline_title > .text")?;
    let time_sel = selector("[timeattr]")?;
    let link_sel = selector("a.timeline_content")?;

    Ok(document
        .select(&entry_sel)
        .map(|entry| {
            let title = entry.select(&title_sel).next().map(text_of).unwrap_or_default();
            if title.is_empty() {
                return Ok(None);
            }
            let raw_time = attr_of(entry.select(&time_sel).next(), "timeattr")
                .ok_or_else(|| FetchError::Parse(format!("{title:?} has no timeattr")))?;
            let publish_time = beijing_wall_clock(raw_time)?;
            let Some(href) = attr_of(entry.select(&link_sel).next(), "href") else {
                return Ok(None);
            };
            Ok(Some(NewsEntry {
                title,
                url: absolute_url(base_url, href),
                publish_time,
            }))
        })
        .collect())
}

/// Reads the description off a flash news detail page.
pub(crate) fn parse_news_detail(html: &str) -> Result<String, FetchError> {
    let document = Html::parse_document(html);
    document
        .select(&selector(".rich_text_content")?)
        .next()
        .map(text_of)
        .ok_or_else(|| FetchError::Parse("news page has no .rich_text_content".to_string()))
}

/// Article links on the listing page, one per `.article_area` card.
pub(crate) fn parse_article_links(html: &str, base_url: &str) -> Result<Vec<String>, FetchError> {
    let document = Html::parse_document(html);
    let card_sel = selector(".article_wraper .article_area")?;
    let link_sel = selector("a")?;
    let title_sel = selector(".article_title")?;

    Ok(document
        .select(&card_sel)
        .filter_map(|card| {
            let link = card
                .select(&link_sel)
                .find(|a| a.select(&title_sel).next().is_some());
            attr_of(link, "href").map(|href| absolute_url(base_url, href))
        })
        .collect())
}

/// Builds an article from its page. `Ok(None)` when the page has no title.
pub(crate) fn parse_article_page(html: &str, url: &str) -> Result<Option<ArticleItem>, FetchError> {
    let document = Html::parse_document(html);
    let missing = |what: &str| FetchError::Parse(format!("{url}: article page has no {what}"));

    let wrapper = document
        .select(&selector(".details_wraper")?)
        .next()
        .ok_or_else(|| missing(".details_wraper"))?;
    let raw_time = wrapper
        .select(&selector(".author .time")?)
        .next()
        .map(text_of)
        .ok_or_else(|| missing("publish time"))?;
    let publish_time = beijing_wall_clock(&raw_time)?;

    let title = document
        .select(&selector("h1")?)
        .next()
        .map(text_of)
        .unwrap_or_default();
    if title.is_empty() {
        return Ok(None);
    }

    let labels: Vec<String> = wrapper
        .select(&selector(".associated_labels .labels_content a")?)
        .map(text_of)
        .filter(|label| !label.is_empty())
        .collect();
    let summary = wrapper
        .select(&selector(".abstract")?)
        .next()
        .map(text_of)
        .unwrap_or_default();
    let body = wrapper
        .select(&selector(".rich_text_content")?)
        .next()
        .ok_or_else(|| missing(".rich_text_content"))?;

    let mut content = clean_html(body, &CleanRules::default());
    if !labels.is_empty() {
        let list: String = labels
            .iter()
            .map(|label| format!("<li>{}</li>", escape_text(label)))
            .collect();
        content = format!("<h3>Related Labels</h3>\n<ul id=\"related_labels\">{list}</ul>\n{content}");
    }
    if !summary.is_empty() {
        content = format!("<h2 id=\"abstract\">{}</h2>\n{content}", escape_text(&summary));
    }

    Ok(Some(ArticleItem::new(
        ArticleSource::ChainCatcher,
        ArticleSite::ChainCatcher,
        title,
        content,
        Some(url.to_string()),
        publish_time,
    )))
}

/// Browser-like headers plus the language cookie; without it the site
/// serves the Chinese edition.
fn article_headers() -> Result<HeaderMap, FetchError> {
    let notice_day = (Utc::now() + TimeDelta::hours(8)).format("%d/%m/%Y");
    let cookie = format!("i18n_redirected=en; auth.strategy=local; noticeTime={notice_day}");

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("document"));
    headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("navigate"));
    headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("same-origin"));
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&cookie).map_err(|e| FetchError::NotConfigured(format!("cookie: {e}")))?,
    );
    Ok(headers)
}

pub struct ChainCatcherFlashNewsFetcher {
    http: HttpSource,
    base_url: String,
}

impl ChainCatcherFlashNewsFetcher {
    pub fn new(http: HttpSource) -> Self {
        Self {
            http,
            base_url: CHAINCATCHER_BASE_URL.to_string(),
        }
    }

    /// Points the fetcher at another site root (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn news_item(&self, entry: NewsEntry) -> Result<FlashNewsItem, FetchError> {
        let page = self.http.get_text(&entry.url, HeaderMap::new()).await?;
        let description = parse_news_detail(&page)?;
        Ok(FlashNewsItem::new(
            FlashNewsSource::ChainCatcher,
            FlashNewsSite::ChainCatcher,
            entry.title,
            description,
            Some(entry.url),
            entry.publish_time,
        ))
    }
}

#[async_trait]
impl Fetcher<FlashNewsItem> for ChainCatcherFlashNewsFetcher {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<FlashNewsItem>, FetchError> {
        let listing_url = absolute_url(&self.base_url, NEWS_PATH);
        let listing = self.http.get_text(&listing_url, HeaderMap::new()).await?;
        let entries = parse_news_timeline(&listing, &self.base_url)?;
        let listed = entries.len();

        // Detail pages only for entries past the cutoff.
        let mut outcomes = Vec::with_capacity(listed);
        for entry in entries {
            let outcome = match entry {
                Ok(Some(news)) if news.publish_time > after => self.news_item(news).await.map(Some),
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            };
            outcomes.push(outcome);
        }

        let items = collect_after(FlashNewsSite::ChainCatcher.as_str(), after, outcomes, |outcome| outcome);
        debug!(listed, fresh = items.len(), "ChainCatcher timeline parsed");
        Ok(items)
    }
}

pub struct ChainCatcherArticleFetcher {
    http: HttpSource,
    base_url: String,
}

impl ChainCatcherArticleFetcher {
    pub fn new(http: HttpSource) -> Self {
        Self {
            http,
            base_url: CHAINCATCHER_BASE_URL.to_string(),
        }
    }

    /// Points the fetcher at another site root (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Fetcher<ArticleItem> for ChainCatcherArticleFetcher {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<ArticleItem>, FetchError> {
        let headers = article_headers()?;
        let listing_url = absolute_url(&self.base_url, ARTICLE_PATH);
        let listing = self.http.get_text(&listing_url, headers.clone()).await?;
        let links = parse_article_links(&listing, &self.base_url)?;
        let listed = links.len();

        // The listing carries no dates, so every linked page is opened.
        let mut pages = Vec::with_capacity(listed);
        for url in links {
            let page = match self.http.get_text(&url, headers.clone()).await {
                Ok(html) => parse_article_page(&html, &url),
                Err(e) => Err(e),
            };
            pages.push(page);
        }

        let items = collect_after(ArticleSite::ChainCatcher.as_str(), after, pages, |page| page);
        debug!(listed, fresh = items.len(), "ChainCatcher articles parsed");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TIMELINE: &str = r#"
        <div class="v-timeline">
          <div class="v-timeline-item">
            <span timeattr="2024-05-02 09:30:00"></span>
            <div class="timeline_title"><span class="text"> ETF inflows hit record </span></div>
            <a class="timeline_content" href="/en/news/101">read</a>
          </div>
          <div class="v-timeline-item">
            <span timeattr="2024-05-02 08:00:00"></span>
            <div class="timeline_title"><span class="text"></span></div>
            <a class="timeline_content" href="/en/news/102">read</a>
          </div>
          <div class="v-timeline-item">
            <span timeattr="soon"></span>
            <div class="timeline_title"><span class="text">Broken time</span></div>
            <a class="timeline_content" href="/en/news/103">read</a>
          </div>
          <div class="v-timeline-item">
            <span timeattr="2024-05-02 07:00:00"></span>
            <div class="timeline_title"><span class="text">No link</span></div>
          </div>
        </div>"#;

    #[test]
    fn timeline_entries_are_parsed_and_skipped_individually() {
        let entries = parse_news_timeline(TIMELINE, "https://www.chaincatcher.com").unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[0].as_ref().unwrap().as_ref().unwrap(),
            &NewsEntry {
                title: "ETF inflows hit record".to_string(),
                url: "https://www.chaincatcher.com/en/news/101".to_string(),
                publish_time: Utc.with_ymd_and_hms(2024, 5, 2, 1, 30, 0).unwrap(),
            }
        );
        assert!(matches!(entries[1], Ok(None)));
        assert!(matches!(entries[2], Err(FetchError::Parse(_))));
        assert!(matches!(entries[3], Ok(None)));
    }

    #[test]
    fn news_detail_requires_a_body() {
        let page = r#"<div class="rich_text_content"><p>Spot ETFs took in</p> <p>$1bn.</p></div>"#;
        assert_eq!(parse_news_detail(page).unwrap(), "Spot ETFs took in $1bn.");
        assert!(matches!(parse_news_detail("<p>gone</p>"), Err(FetchError::Parse(_))));
    }

    #[test]
    fn article_links_come_from_titled_anchors() {
        let listing = r#"
            <div class="article_wraper">
              <div class="article_area">
                <a href="/en/author/7">author</a>
                <a href="/en/article/55"><h3 class="article_title">Restaking</h3></a>
              </div>
              <div class="article_area"><a href="/en/article/56">no title</a></div>
              <div class="article_area">
                <a href="https://mirror.example/a/57"><span class="article_title">L2 fees</span></a>
              </div>
            </div>"#;

        let links = parse_article_links(listing, "https://www.chaincatcher.com/").unwrap();

        assert_eq!(
            links,
            vec!["https://www.chaincatcher.com/en/article/55", "https://mirror.example/a/57"]
        );
    }

    #[test]
    fn article_page_combines_abstract_labels_and_cleaned_body() {
        let page = r#"
            <h1> Restaking, explained </h1>
            <div class="details_wraper">
              <div class="author"><span class="time">2024-05-02 20:00:00</span></div>
              <div class="abstract">Risks &amp; rewards</div>
              <div class="associated_labels"><div class="labels_content">
                <a href="/tag/1">ETH</a><a href="/tag/2">DeFi</a>
              </div></div>
              <div class="rich_text_content" style="margin:0"><p class="lead" data-n="1">Body</p></div>
            </div>"#;

        let item = parse_article_page(page, "https://www.chaincatcher.com/en/article/55")
            .unwrap()
            .unwrap();

        assert_eq!(item.title, "Restaking, explained");
        assert_eq!(item.publish_time, Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap());
        assert_eq!(
            item.content,
            "<h2 id=\"abstract\">Risks &amp; rewards</h2>\n\
             <h3>Related Labels</h3>\n<ul id=\"related_labels\"><li>ETH</li><li>DeFi</li></ul>\n\
             <div><p data-n=\"1\">Body</p></div>"
        );
        assert_eq!(item.site, ArticleSite::ChainCatcher);
        assert_eq!(item.url.as_deref(), Some("https://www.chaincatcher.com/en/article/55"));
    }

    #[test]
    fn article_page_without_structure_is_malformed() {
        let result = parse_article_page("<h1>Title</h1><p>no wrapper</p>", "https://x/1");
        assert!(matches!(result, Err(FetchError::Parse(_))));

        let untitled = r#"<h1> </h1><div class="details_wraper"><div class="author"><span class="time">2024-05-02 20:00:00</span></div><div class="rich_text_content">x</div></div>"#;
        assert!(matches!(parse_article_page(untitled, "https://x/2"), Ok(None)));
    }

    #[test]
    fn article_headers_carry_the_language_cookie() {
        let headers = article_headers().unwrap();
        let cookie = headers.get(COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("i18n_redirected=en; auth.strategy=local; noticeTime="));
    }
}
