//! # Scheduler Tests
//!
//! Crawl jobs driven by the scheduler: overlap skipping with a slow site and
//! real cron ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use lib_crawler::crawl::{CrawlJob, CrawlScheduler, FetchDispatcher, JobState};
use lib_crawler::ingestors::FetcherRegistry;
use lib_crawler::models::{FlashNewsItem, FlashNewsSite};
use project_tests::{MemoryStore, ScriptedFetcher, flash_item};

fn slow_flash_job(store: &Arc<MemoryStore>, fetcher: Arc<ScriptedFetcher<FlashNewsItem>>, schedule: &str) -> CrawlJob {
    let registry = FetcherRegistry::<FlashNewsItem>::new().with(FlashNewsSite::Finnhub, fetcher);
    let dispatcher = Arc::new(FetchDispatcher::<FlashNewsItem>::new(
        store.clone(),
        Arc::new(registry),
        TimeDelta::days(3),
    ));
    CrawlJob::new("flash_news", schedule, dispatcher.job_action(vec![FlashNewsSite::Finnhub]))
}

#[tokio::test]
async fn trigger_while_a_batch_is_running_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(
        ScriptedFetcher::conforming(vec![flash_item(
            FlashNewsSite::Finnhub,
            "slow news",
            Utc::now() - TimeDelta::minutes(1),
        )])
        .with_delay(Duration::from_millis(300)),
    );
    let job = Arc::new(slow_flash_job(&store, fetcher.clone(), "30 * * * * *"));

    let first = job.trigger();
    assert!(!first.is_skipped());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(job.state(), JobState::Running);
    assert!(job.trigger().is_skipped());

    job.wait_idle().await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.flash_news.len(), 1);

    assert!(!job.trigger().is_skipped());
    job.wait_idle().await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(store.flash_news.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cron_ticks_run_batches_until_stopped() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::conforming(Vec::new()));
    let scheduler = CrawlScheduler::new(vec![slow_flash_job(&store, fetcher.clone(), "* * * * * *")]);

    scheduler.start().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while fetcher.calls() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    scheduler.stop().await.unwrap();
    assert!(scheduler.wait_idle(Duration::from_secs(2)).await);

    let seen = fetcher.calls();
    assert!(seen >= 1, "no cron tick fired within the deadline");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(fetcher.calls(), seen, "a tick fired after stop");
}
