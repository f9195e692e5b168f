//! # Glassnode Insights
//!
//! Scrapes the newsletter tag page of Glassnode Insights. Post cards carry a
//! publication date (no time of day, taken as midnight UTC); each fresh post
//! is opened and its article body stored as cleaned HTML. The byline, scripts,
//! images and figures are removed, and so is everything after the first
//! horizontal rule (the subscription footer).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use scraper::Html;
use tracing::debug;

use super::html_page::{absolute_url, attr_of, clean_html, selector, text_of, utc_date, CleanRules};
use super::http_source::HttpSource;
use super::{collect_after, FetchError, Fetcher};
use crate::models::{ArticleItem, ArticleSite, ArticleSource};

pub const GLASSNODE_BASE_URL: &str = "https://insights.glassnode.com";
const NEWSLETTER_PATH: &str = "/tag/newsletter/";

const DROPPED_TAGS: &[&str] = &["script", "noscript", "img", "figure"];
const DROPPED_CLASSES: &[&str] = &["article-byline"];

/// A post card from the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PostCard {
    pub title: String,
    pub url: String,
    pub publish_time: DateTime<Utc>,
}

/// Parses the newsletter listing. Cards missing a link, title or date are skipped.
pub(crate) fn parse_post_cards(
    html: &str,
    base_url: &str,
) -> Result<Vec<Result<Option<PostCard>, FetchError>>, FetchError> {
    let document = Html::parse_document(html);
    let card_sel = selector("article")?;
    let link_sel = selector("a.post-card-content-link")?;
    let title_sel = selector(".post-card-title")?;
    let date_sel = selector("time.post-card-meta-date")?;

    Ok(document
        .select(&card_sel)
        .map(|card| {
            let Some(href) = attr_of(card.select(&link_sel).next(), "href") else {
                return Ok(None);
            };
            let Some(title) = card.select(&title_sel).next().map(text_of) else {
                return Ok(None);
            };
            let Some(raw_date) = attr_of(card.select(&date_sel).next(), "datetime") else {
                return Ok(None);
            };
            Ok(Some(PostCard {
                title,
                url: absolute_url(base_url, href),
                publish_time: utc_date(raw_date)?,
            }))
        })
        .collect())
}

/// Cleaned article body of a post page; `None` when the page has no article.
pub(crate) fn parse_post_body(html: &str) -> Result<Option<String>, FetchError> {
    let document = Html::parse_document(html);
    let Some(article) = document.select(&selector("#site-main > article")?).next() else {
        return Ok(None);
    };
    let rules = CleanRules {
        drop_tags: DROPPED_TAGS,
        drop_classes: DROPPED_CLASSES,
        cut_after: article.select(&selector("hr")?).next(),
    };
    Ok(Some(clean_html(article, &rules)))
}

pub struct GlassnodeArticleFetcher {
    http: HttpSource,
    base_url: String,
}

impl GlassnodeArticleFetcher {
    pub fn new(http: HttpSource) -> Self {
        Self {
            http,
            base_url: GLASSNODE_BASE_URL.to_string(),
        }
    }

    /// Points the fetcher at another site root (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_item(&self, card: PostCard) -> Result<Option<ArticleItem>, FetchError> {
        let page = self.http.get_text(&card.url, HeaderMap::new()).await?;
        let Some(content) = parse_post_body(&page)? else {
            debug!(url = %card.url, "Post page has no article body");
            return Ok(None);
        };
        Ok(Some(ArticleItem::new(
            ArticleSource::Glassnode,
            ArticleSite::Glassnode,
            card.title,
            content,
            Some(card.url),
            card.publish_time,
        )))
    }
}

#[async_trait]
impl Fetcher<ArticleItem> for GlassnodeArticleFetcher {
    async fn fetch(&self, after: DateTime<Utc>) -> Result<Vec<ArticleItem>, FetchError> {
        let listing_url = absolute_url(&self.base_url, NEWSLETTER_PATH);
        let listing = self.http.get_text(&listing_url, HeaderMap::new()).await?;
        let cards = parse_post_cards(&listing, &self.base_url)?;
        let listed = cards.len();

        let mut outcomes = Vec::with_capacity(listed);
        for card in cards {
            let outcome = match card {
                Ok(Some(card)) if card.publish_time > after => self.post_item(card).await,
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            };
            outcomes.push(outcome);
        }

        let items = collect_after(ArticleSite::Glassnode.as_str(), after, outcomes, |outcome| outcome);
        debug!(listed, fresh = items.len(), "Glassnode newsletter parsed");
        Ok(items)
    }
}
