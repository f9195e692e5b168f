//! # Crawler Configuration
//!
//! Command-line flags with environment fallbacks, parsed with `clap`.
//!
//! ## Key Features:
//! - **Env first-class:** every setting can come from the environment, so the
//!   same binary runs from a shell, a `.env` file or a container.
//! - **Docker secrets:** the database password and the Finnhub key fall back to
//!   files under `--secrets-dir` when neither flag nor variable is set.
//! - **Lenient site lists:** activated sites are comma separated and case
//!   insensitive. Unknown entries are logged and skipped.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use clap::Parser;
use thiserror::Error;
use tracing::warn;

use crate::connections::PgSettings;
use crate::crawl::LifecycleSettings;
use crate::models::{ArticleSite, FlashNewsSite, SiteCode};

pub const DB_PASSWORD_SECRET: &str = "crawler_tradebot_db_password";
pub const FINNHUB_API_KEY_SECRET: &str = "finnhub_api_key";
/// Consulted for the HTTP port when `CRAWLER_HTTP_PORT` is absent.
pub const LEGACY_HTTP_PORT_ENV: &str = "UVICORN_PORT";
pub const DEFAULT_HTTP_PORT: u16 = 9238;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read secret {path}: {source}")]
    SecretRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// # Crawler Configuration
#[derive(Parser, Clone)]
#[clap(
    author,
    version,
    about = "Incremental flash news and article crawler for the tradebot database."
)]
#[clap(long_about = None)]
pub struct CrawlerConfig {
    // --- Database ---
    /// Full connection string; overrides the discrete `--db-*` settings.
    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL")]
    pub database_url: Option<String>,

    #[clap(long, env = "TRADEBOT_DB_HOST", default_value = "tradebotdb", help = "Database host")]
    pub db_host: String,

    #[clap(long, env = "TRADEBOT_DB_PORT", default_value_t = 5432, help = "Database port")]
    pub db_port: u16,

    #[clap(long, env = "TRADEBOT_DB_USER", default_value = "tradebot_user", help = "Database user")]
    pub db_user: String,

    #[clap(
        long,
        env = "TRADEBOT_DB_PASSWORD",
        hide_env_values = true,
        help = "Database password (falls back to the docker secret)"
    )]
    pub db_password: Option<String>,

    #[clap(long, env = "TRADEBOT_DB_NAME", default_value = "tradebot_db", help = "Database name")]
    pub db_name: String,

    #[clap(long, env = "TRADEBOT_DB_POOL_SIZE", default_value_t = 10, help = "Maximum pooled connections")]
    pub pool_max_size: usize,

    #[clap(
        long,
        env = "TRADEBOT_DB_POOL_WAIT_SECS",
        default_value_t = 2,
        help = "Seconds to wait for a free pooled connection"
    )]
    pub pool_wait_timeout_secs: u64,

    #[clap(long, default_value_t = 5000, help = "Rows per round trip for batched reads")]
    pub fetch_batch_size: usize,

    #[clap(long, env = "ENSURE_SCHEMA", help = "Create the item tables on startup if missing")]
    pub ensure_schema: bool,

    // --- Crawl ---
    #[clap(
        long,
        env = "ACTIVATED_FLASH_NEWS_SITES",
        default_value = "",
        help = "Comma-separated flash news sites to crawl"
    )]
    pub activated_flash_news_sites: String,

    #[clap(
        long,
        env = "ACTIVATED_ARTICLE_SITES",
        default_value = "",
        help = "Comma-separated article sites to crawl"
    )]
    pub activated_article_sites: String,

    #[clap(long, env = "FLASH_NEWS_LAG_DAYS", default_value_t = 3, help = "Flash news look-back in days")]
    pub flash_news_lag_days: i64,

    #[clap(long, env = "ARTICLE_LAG_DAYS", default_value_t = 21, help = "Article look-back in days")]
    pub article_lag_days: i64,

    #[clap(
        long,
        env = "FLASH_NEWS_SCHEDULE",
        default_value = "30 * * * * *",
        help = "Six-field UTC cron for the flash news job"
    )]
    pub flash_news_schedule: String,

    #[clap(
        long,
        env = "ARTICLE_SCHEDULE",
        default_value = "30 5 * * * *",
        help = "Six-field UTC cron for the article job"
    )]
    pub article_schedule: String,

    #[clap(
        long,
        env = "FINNHUB_API_KEY",
        hide_env_values = true,
        help = "Finnhub API key (falls back to the docker secret)"
    )]
    pub finnhub_api_key: Option<String>,

    // --- Server & lifecycle ---
    #[clap(long, env = "CRAWLER_HTTP_PORT", help = "Health server port [default: 9238]")]
    pub http_port: Option<u16>,

    #[clap(long, default_value_t = 5, help = "Seconds between store open attempts at startup")]
    pub startup_backoff_secs: u64,

    #[clap(long, default_value_t = 5, help = "Graceful shutdown budget for the health server")]
    pub server_shutdown_timeout_secs: u64,

    #[clap(long, default_value_t = 30, help = "Seconds to wait for in-flight crawl runs on shutdown")]
    pub scheduler_drain_timeout_secs: u64,

    #[clap(long, default_value_t = 60, help = "Overall shutdown limit before the process is forced down")]
    pub shutdown_limit_secs: u64,

    #[clap(long, env = "SECRETS_DIR", default_value = "/run/secrets", help = "Docker secrets directory")]
    pub secrets_dir: PathBuf,

    // --- Logging ---
    #[clap(long, env = "LOG_DIR", default_value = "logs", help = "Directory for the daily JSON log files")]
    pub log_dir: PathBuf,

    #[clap(long, env = "LOG_LEVEL", default_value = "info", help = "Log level when RUST_LOG is unset")]
    pub log_level: String,

    #[clap(long, help = "Print the effective configuration and exit")]
    pub check_config: bool,
}

/// Reads `<dir>/<name>`, trimmed. A missing or blank file is `None`.
pub fn read_secret(dir: &Path, name: &str) -> Result<Option<String>, ConfigError> {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let value = raw.trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::SecretRead { path, source }),
    }
}

/// Parses a comma-separated site list. Entries are trimmed and matched case
/// insensitively; unknown entries are logged and skipped; duplicates collapse.
pub fn parse_site_list<S: SiteCode>(raw: &str) -> Vec<S> {
    let mut sites: Vec<S> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<S>() {
            Ok(site) if !sites.contains(&site) => sites.push(site),
            Ok(_) => {}
            Err(e) => warn!(entry, error = %e, "Skipping unknown site"),
        }
    }
    sites
}

impl CrawlerConfig {
    /// Fills the password and API key from docker secrets when unset.
    pub fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        if self.db_password.is_none() {
            self.db_password = read_secret(&self.secrets_dir, DB_PASSWORD_SECRET)?;
        }
        if self.finnhub_api_key.is_none() {
            self.finnhub_api_key = read_secret(&self.secrets_dir, FINNHUB_API_KEY_SECRET)?;
        }
        Ok(())
    }

    /// Rejects values that would only fail later, after resources are taken.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("pool_max_size", self.pool_max_size as i64),
            ("fetch_batch_size", self.fetch_batch_size as i64),
            ("flash_news_lag_days", self.flash_news_lag_days),
            ("article_lag_days", self.article_lag_days),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: format!("must be greater than zero, got {value}"),
                });
            }
        }
        Ok(())
    }

    pub fn flash_news_sites(&self) -> Vec<FlashNewsSite> {
        parse_site_list(&self.activated_flash_news_sites)
    }

    pub fn article_sites(&self) -> Vec<ArticleSite> {
        parse_site_list(&self.activated_article_sites)
    }

    pub fn flash_news_lag(&self) -> TimeDelta {
        TimeDelta::days(self.flash_news_lag_days)
    }

    pub fn article_lag(&self) -> TimeDelta {
        TimeDelta::days(self.article_lag_days)
    }

    /// `--http-port` / `CRAWLER_HTTP_PORT`, then `UVICORN_PORT`, then 9238.
    pub fn http_port(&self) -> u16 {
        self.http_port
            .or_else(|| {
                std::env::var(LEGACY_HTTP_PORT_ENV)
                    .ok()
                    .and_then(|raw| raw.trim().parse().ok())
            })
            .unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn shutdown_limit(&self) -> Duration {
        Duration::from_secs(self.shutdown_limit_secs)
    }

    pub fn pg_settings(&self) -> PgSettings {
        PgSettings {
            url: self.database_url.clone(),
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone().unwrap_or_default(),
            db_name: self.db_name.clone(),
            pool_max_size: self.pool_max_size,
            pool_wait_timeout: Duration::from_secs(self.pool_wait_timeout_secs),
            fetch_batch_size: self.fetch_batch_size,
            ..PgSettings::default()
        }
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            startup_backoff: Duration::from_secs(self.startup_backoff_secs),
            server_shutdown_timeout: Duration::from_secs(self.server_shutdown_timeout_secs),
            scheduler_drain_timeout: Duration::from_secs(self.scheduler_drain_timeout_secs),
            http_addr: SocketAddr::from(([0, 0, 0, 0], self.http_port())),
        }
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "<set>",
        None => "<unset>",
    }
}

impl fmt::Display for CrawlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes = |sites: Vec<&'static str>| if sites.is_empty() { "<none>".to_string() } else { sites.join(",") };
        writeln!(f, "CrawlerConfig")?;
        writeln!(f, "    Database: {}", self.pg_settings().display_target())?;
        writeln!(f, "    Database user: {}", self.db_user)?;
        writeln!(f, "    Database password: {}", redact(&self.db_password))?;
        writeln!(
            f,
            "    Pool: max {} connections, wait {}s, batch {} rows",
            self.pool_max_size, self.pool_wait_timeout_secs, self.fetch_batch_size
        )?;
        writeln!(f, "    Ensure schema: {}", self.ensure_schema)?;
        writeln!(
            f,
            "    Flash news: sites [{}], lag {}d, schedule \"{}\"",
            codes(self.flash_news_sites().iter().map(|s| s.code()).collect()),
            self.flash_news_lag_days,
            self.flash_news_schedule
        )?;
        writeln!(
            f,
            "    Articles: sites [{}], lag {}d, schedule \"{}\"",
            codes(self.article_sites().iter().map(|s| s.code()).collect()),
            self.article_lag_days,
            self.article_schedule
        )?;
        writeln!(f, "    Finnhub API key: {}", redact(&self.finnhub_api_key))?;
        writeln!(f, "    HTTP port: {}", self.http_port())?;
        writeln!(
            f,
            "    Timeouts: backoff {}s, server shutdown {}s, drain {}s, limit {}s",
            self.startup_backoff_secs,
            self.server_shutdown_timeout_secs,
            self.scheduler_drain_timeout_secs,
            self.shutdown_limit_secs
        )?;
        write!(f, "    Logs: {} at {}", self.log_dir.display(), self.log_level)
    }
}

impl fmt::Debug for CrawlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
