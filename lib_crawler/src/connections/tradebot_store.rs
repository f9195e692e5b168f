//! # Tradebot Item Tables
//!
//! Maps `FlashNewsItem` and `ArticleItem` onto `t_flash_news` and `t_article`.
//! Inserts are a single `execute_many` per batch with
//! `ON CONFLICT (site, title_md5, publish_time) DO NOTHING`, so re-ingesting
//! an item is a silent no-op.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::{debug, info};

use super::db_postgres::{PgClient, SqlParam};
use super::{DbError, ItemStore, StoreHandle};
use crate::models::{
    ArticleItem, ArticleSite, ArticleSource, CrawlRecord, FlashNewsItem, FlashNewsSite,
    FlashNewsSource, SiteCode,
};

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS t_flash_news (
        id BIGSERIAL PRIMARY KEY,
        source VARCHAR(32) NOT NULL,
        site VARCHAR(32) NOT NULL,
        title TEXT NOT NULL,
        title_md5 VARCHAR(32) NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        url TEXT,
        create_time TIMESTAMPTZ NOT NULL DEFAULT now(),
        publish_time TIMESTAMPTZ NOT NULL,
        CONSTRAINT uq_flash_news_site_title_publish UNIQUE (site, title_md5, publish_time)
    )",
    "CREATE TABLE IF NOT EXISTS t_article (
        id BIGSERIAL PRIMARY KEY,
        source VARCHAR(32) NOT NULL,
        site VARCHAR(32) NOT NULL,
        title TEXT NOT NULL,
        title_md5 VARCHAR(32) NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        url TEXT,
        create_time TIMESTAMPTZ NOT NULL DEFAULT now(),
        publish_time TIMESTAMPTZ NOT NULL,
        CONSTRAINT uq_article_site_title_publish UNIQUE (site, title_md5, publish_time)
    )",
];

const INSERT_FLASH_NEWS: &str = "INSERT INTO t_flash_news \
    (source, site, title, title_md5, description, url, create_time, publish_time) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
    ON CONFLICT (site, title_md5, publish_time) DO NOTHING";

const INSERT_ARTICLE: &str = "INSERT INTO t_article \
    (source, site, title, title_md5, content, url, create_time, publish_time) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
    ON CONFLICT (site, title_md5, publish_time) DO NOTHING";

const SELECT_FLASH_NEWS_AFTER: &str = "SELECT id, source, site, title, title_md5, description, url, \
    create_time, publish_time FROM t_flash_news \
    WHERE site = $1 AND publish_time > $2 ORDER BY publish_time";

const SELECT_ARTICLES_AFTER: &str = "SELECT id, source, site, title, title_md5, content, url, \
    create_time, publish_time FROM t_article \
    WHERE site = $1 AND publish_time > $2 ORDER BY publish_time";

/// # Tradebot Store
///
/// The PostgreSQL-backed [`ItemStore`] for both item kinds. Its lifecycle is
/// the wrapped client's; with schema bootstrap enabled, `open()` also creates
/// the tables.
pub struct TradebotStore {
    client: Arc<PgClient>,
    bootstrap_schema: bool,
}

impl TradebotStore {
    pub fn new(client: Arc<PgClient>) -> Self {
        Self {
            client,
            bootstrap_schema: false,
        }
    }

    /// Create missing tables every time the store is opened.
    pub fn with_schema_bootstrap(mut self, enabled: bool) -> Self {
        self.bootstrap_schema = enabled;
        self
    }

    pub fn client(&self) -> &Arc<PgClient> {
        &self.client
    }

    /// Idempotently creates both tables and their uniqueness constraints.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        for statement in SCHEMA_STATEMENTS {
            self.client.execute(statement, Vec::new()).await?;
        }
        info!("Item tables are present");
        Ok(())
    }

    async fn max_publish_time(
        &self,
        table: &'static str,
        site: &'static str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let sql = format!("SELECT MAX(publish_time) AS max_publish_time FROM {table} WHERE site = $1");
        let sql: Arc<str> = Arc::from(sql);
        self.client
            .query(move |client| {
                let sql = Arc::clone(&sql);
                Box::pin(async move {
                    let row = client.query_one(&*sql, &[&site]).await?;
                    let latest: Option<DateTime<Utc>> = row.try_get("max_publish_time")?;
                    Ok::<_, DbError>(latest)
                })
            })
            .await
    }

    /// All stored flash news for `site` published strictly after `after`, oldest first.
    pub async fn flash_news_after(
        &self,
        site: FlashNewsSite,
        after: DateTime<Utc>,
    ) -> Result<Vec<FlashNewsItem>, DbError> {
        let params: Vec<SqlParam> = vec![Box::new(site.code()) as SqlParam, Box::new(after)];
        self.client
            .fetch_batched(SELECT_FLASH_NEWS_AFTER, params, flash_news_from_row)
            .await
    }

    /// All stored articles for `site` published strictly after `after`, oldest first.
    pub async fn articles_after(
        &self,
        site: ArticleSite,
        after: DateTime<Utc>,
    ) -> Result<Vec<ArticleItem>, DbError> {
        let params: Vec<SqlParam> = vec![Box::new(site.code()) as SqlParam, Box::new(after)];
        self.client
            .fetch_batched(SELECT_ARTICLES_AFTER, params, article_from_row)
            .await
    }
}

fn decode_site<S: SiteCode>(raw: &str) -> Result<S, DbError> {
    raw.parse::<S>().map_err(|e| DbError::Decode(e.to_string()))
}

fn flash_news_from_row(row: &Row) -> Result<FlashNewsItem, DbError> {
    let source: String = row.try_get("source")?;
    let site: String = row.try_get("site")?;
    Ok(FlashNewsItem {
        id: row.try_get("id")?,
        source: FlashNewsSource::from_code_or_others(&source),
        site: decode_site(&site)?,
        title: row.try_get("title")?,
        title_md5: row.try_get("title_md5")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        create_time: row.try_get("create_time")?,
        publish_time: row.try_get("publish_time")?,
    })
}

fn article_from_row(row: &Row) -> Result<ArticleItem, DbError> {
    let source: String = row.try_get("source")?;
    let site: String = row.try_get("site")?;
    Ok(ArticleItem {
        id: row.try_get("id")?,
        source: ArticleSource::from_code_or_others(&source),
        site: decode_site(&site)?,
        title: row.try_get("title")?,
        title_md5: row.try_get("title_md5")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        create_time: row.try_get("create_time")?,
        publish_time: row.try_get("publish_time")?,
    })
}

fn flash_news_params(item: &FlashNewsItem) -> Vec<SqlParam> {
    let mut item = item.clone();
    item.ensure_fingerprint();
    vec![
        Box::new(item.source.as_str()) as SqlParam,
        Box::new(item.site.as_str()),
        Box::new(item.title),
        Box::new(item.title_md5),
        Box::new(item.description),
        Box::new(item.url),
        Box::new(item.create_time),
        Box::new(item.publish_time),
    ]
}

fn article_params(item: &ArticleItem) -> Vec<SqlParam> {
    let mut item = item.clone();
    item.ensure_fingerprint();
    vec![
        Box::new(item.source.as_str()) as SqlParam,
        Box::new(item.site.as_str()),
        Box::new(item.title),
        Box::new(item.title_md5),
        Box::new(item.content),
        Box::new(item.url),
        Box::new(item.create_time),
        Box::new(item.publish_time),
    ]
}

#[async_trait]
impl ItemStore<FlashNewsItem> for TradebotStore {
    async fn last_publish_time(&self, site: FlashNewsSite) -> Result<Option<DateTime<Utc>>, DbError> {
        self.max_publish_time(FlashNewsItem::KIND.table(), site.code()).await
    }

    async fn insert_many(&self, items: &[FlashNewsItem]) -> Result<u64, DbError> {
        let rows = items.iter().map(flash_news_params).collect();
        let inserted = self.client.execute_many(INSERT_FLASH_NEWS, rows).await?;
        debug!(offered = items.len(), inserted, "Flash news batch written");
        Ok(inserted)
    }
}

#[async_trait]
impl ItemStore<ArticleItem> for TradebotStore {
    async fn last_publish_time(&self, site: ArticleSite) -> Result<Option<DateTime<Utc>>, DbError> {
        self.max_publish_time(ArticleItem::KIND.table(), site.code()).await
    }

    async fn insert_many(&self, items: &[ArticleItem]) -> Result<u64, DbError> {
        let rows = items.iter().map(article_params).collect();
        let inserted = self.client.execute_many(INSERT_ARTICLE, rows).await?;
        debug!(offered = items.len(), inserted, "Article batch written");
        Ok(inserted)
    }
}

#[async_trait]
impl StoreHandle for TradebotStore {
    async fn open(&self) -> Result<(), DbError> {
        self.client.open().await?;
        if self.bootstrap_schema {
            self.ensure_schema().await?;
        }
        Ok(())
    }

    async fn close(&self) {
        self.client.close().await
    }

    async fn test_connection(&self) -> bool {
        self.client.test_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn insert_params_follow_column_order_and_fill_fingerprint() {
        let mut item = FlashNewsItem::new(
            FlashNewsSource::Cnbc,
            FlashNewsSite::Finnhub,
            "Fed holds rates",
            "summary",
            None,
            Utc.with_ymd_and_hms(2024, 3, 20, 18, 0, 0).unwrap(),
        );
        item.title_md5.clear();
        let params = flash_news_params(&item);
        assert_eq!(params.len(), 8);
        let rendered = format!("{:?}", params[3]);
        assert!(rendered.contains(&crate::models::title_md5("Fed holds rates")));
    }

    #[test]
    fn statements_use_the_uniqueness_key_for_conflicts() {
        for sql in [INSERT_FLASH_NEWS, INSERT_ARTICLE] {
            assert!(sql.contains("ON CONFLICT (site, title_md5, publish_time) DO NOTHING"));
        }
        assert!(SCHEMA_STATEMENTS
            .iter()
            .all(|ddl| ddl.contains("UNIQUE (site, title_md5, publish_time)")));
    }

    #[test]
    fn site_codes_decode_from_rows() {
        assert_eq!(decode_site::<FlashNewsSite>("WALLSTREETCN").unwrap(), FlashNewsSite::WallstreetCn);
        assert!(matches!(decode_site::<ArticleSite>("NOPE"), Err(DbError::Decode(_))));
    }
}
