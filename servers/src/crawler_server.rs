//! # Crawler Server
//!
//! Runs the incremental news crawler as a long-lived process.
//!
//! ## Key Features:
//! - **Scheduled crawling:** flash news and article jobs fire on cron schedules;
//!   each run fans out to every activated site concurrently and writes new items
//!   to the tradebot database, skipping rows it already has.
//! - **Patient startup:** an unreachable database delays startup instead of
//!   failing it.
//! - **Health endpoint:** `GET /health` reports database connectivity.
//! - **Graceful shutdown:** SIGINT/SIGTERM stop new crawl runs, let running ones
//!   finish, stop the health server and close the pool, all within an overall
//!   shutdown limit.
//!
//! Configuration comes from flags, environment variables, `.env` files and
//! docker secrets; see `--help`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use static_init::dynamic;
use tokio::sync::oneshot;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lib_crawler::configs::CrawlerConfig;
use lib_crawler::connections::{PgClient, StoreHandle, TradebotStore};
use lib_crawler::crawl::{Coordinator, CrawlJob, CrawlScheduler, FetchDispatcher};
use lib_crawler::ingestors::{
    ChainCatcherArticleFetcher, ChainCatcherFlashNewsFetcher, FetcherRegistry,
    FinnhubFlashNewsFetcher, GlassnodeArticleFetcher, HttpSource, WallstreetCnFlashNewsFetcher,
};
use lib_crawler::loggers::init_logging;
use lib_crawler::models::{ArticleItem, ArticleSite, FlashNewsItem, FlashNewsSite, SiteCode};

const APP_NAME: &str = "crawler_server";

// load .env files before anything else
/// Loads `.env`, then the platform specific `.env.windows` or `.env.linux`.
#[dynamic]
static DOTENV_INIT: () = {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };

    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
};

#[tokio::main]
/// # Main Entry Point
///
/// 1.  Parses configuration and resolves docker secrets.
/// 2.  Sets up structured logging.
/// 3.  Wires fetchers, store, dispatchers and the scheduler into a coordinator.
/// 4.  Runs the coordinator under `tokio-graceful` and waits for it to wind down.
async fn main() -> Result<()> {
    // --- Phase 1: configuration ---
    let mut config = CrawlerConfig::parse();
    config.resolve_secrets().context("failed to read docker secrets")?;
    config.validate().context("invalid configuration")?;

    if config.check_config {
        println!("{config}");
        return Ok(());
    }

    // --- Phase 2: logging ---
    let _log_guard = init_logging(&config.log_dir, &config.log_level, APP_NAME)
        .context("failed to initialize logging")?;
    info!("{}", config);

    // --- Phase 3: wiring ---
    let coordinator = build_coordinator(&config)?;

    // --- Phase 4: run until a signal, or until the coordinator gives up ---
    let (exited_tx, exited_rx) = oneshot::channel::<()>();
    let shutdown = Shutdown::new(async move {
        tokio::select! {
            _ = tokio_graceful::default_signal() => {}
            _ = exited_rx => {}
        }
    });

    shutdown.spawn_task_fn(move |guard| async move {
        let stop = CancellationToken::new();

        let relay_stop = stop.clone();
        let relay_guard = guard.clone_weak();
        tokio::spawn(async move {
            relay_guard.cancelled().await;
            info!("Signal received: initiate graceful shutdown");
            relay_stop.cancel();
        });

        if let Err(e) = coordinator.run(stop).await {
            error!(error = %e, "Crawler stopped with an error");
        }
        let _ = exited_tx.send(());
        drop(guard);
    });

    match shutdown.shutdown_with_limit(config.shutdown_limit()).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            warn!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}

/// Builds the fetcher registries, the store, one dispatcher per item kind and
/// the scheduler, and hands them to a [`Coordinator`].
fn build_coordinator(config: &CrawlerConfig) -> Result<Coordinator> {
    // 1. Fetchers share one HTTP client.
    let http = HttpSource::new().context("failed to build the HTTP client")?;
    let flash_fetchers = FetcherRegistry::<FlashNewsItem>::new()
        .with(
            FlashNewsSite::ChainCatcher,
            Arc::new(ChainCatcherFlashNewsFetcher::new(http.clone())),
        )
        .with(
            FlashNewsSite::Finnhub,
            Arc::new(FinnhubFlashNewsFetcher::new(http.clone(), config.finnhub_api_key.clone())),
        )
        .with(
            FlashNewsSite::WallstreetCn,
            Arc::new(WallstreetCnFlashNewsFetcher::new(http.clone())),
        );
    let article_fetchers = FetcherRegistry::<ArticleItem>::new()
        .with(
            ArticleSite::ChainCatcher,
            Arc::new(ChainCatcherArticleFetcher::new(http.clone())),
        )
        .with(ArticleSite::Glassnode, Arc::new(GlassnodeArticleFetcher::new(http)));

    // 2. Active sites; those without a fetcher are reported on every run.
    let flash_sites = config.flash_news_sites();
    let article_sites = config.article_sites();
    for site in flash_sites.iter().filter(|s| !flash_fetchers.contains(**s)) {
        warn!(site = site.code(), kind = "flash_news", "Activated site has no fetcher");
    }
    for site in article_sites.iter().filter(|s| !article_fetchers.contains(**s)) {
        warn!(site = site.code(), kind = "article", "Activated site has no fetcher");
    }

    // 3. One store serves both item kinds and the health check.
    let client = Arc::new(PgClient::new(config.pg_settings()));
    let store = Arc::new(TradebotStore::new(client).with_schema_bootstrap(config.ensure_schema));

    let flash = Arc::new(FetchDispatcher::<FlashNewsItem>::new(
        store.clone(),
        Arc::new(flash_fetchers),
        config.flash_news_lag(),
    ));
    let articles = Arc::new(FetchDispatcher::<ArticleItem>::new(
        store.clone(),
        Arc::new(article_fetchers),
        config.article_lag(),
    ));

    // 4. One job per item kind.
    let scheduler = Arc::new(CrawlScheduler::new(vec![
        CrawlJob::new(
            "flash_news",
            config.flash_news_schedule.as_str(),
            flash.job_action(flash_sites),
        ),
        CrawlJob::new(
            "article",
            config.article_schedule.as_str(),
            articles.job_action(article_sites),
        ),
    ]));

    let store: Arc<dyn StoreHandle> = store;
    Ok(Coordinator::new(store, scheduler, config.lifecycle_settings()))
}
