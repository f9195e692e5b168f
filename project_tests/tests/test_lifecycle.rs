//! # Lifecycle and Health Tests
//!
//! The coordinator end to end against the in-memory store: patient startup,
//! a live `/health` endpoint, and ordered teardown on the stop signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use lib_crawler::crawl::{Coordinator, CrawlJob, CrawlScheduler, JobAction, LifecycleSettings, health_router};
use project_tests::MemoryStore;

fn free_local_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn quiet_scheduler() -> Arc<CrawlScheduler> {
    let action: JobAction = Arc::new(|| async {}.boxed());
    Arc::new(CrawlScheduler::new(vec![CrawlJob::new("flash_news", "0 0 0 1 1 *", action)]))
}

#[tokio::test]
async fn health_reflects_store_connectivity() {
    let store = Arc::new(MemoryStore::new());
    store.opened.store(true, Ordering::SeqCst);
    let router = health_router(store.clone());

    let ok = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    store.unhealthy.store(true, Ordering::SeqCst);
    let down = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(down.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(down.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Database connection failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coordinator_waits_for_the_store_then_serves_until_stopped() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::failing_open(2));
    let scheduler = quiet_scheduler();
    let addr = free_local_addr();
    let settings = LifecycleSettings {
        startup_backoff: Duration::from_millis(20),
        server_shutdown_timeout: Duration::from_secs(2),
        scheduler_drain_timeout: Duration::from_secs(2),
        http_addr: addr,
    };
    let stop = CancellationToken::new();
    let running = tokio::spawn(Coordinator::new(store.clone(), scheduler.clone(), settings).run(stop.clone()));

    let url = format!("http://{addr}/health");
    let client = reqwest::Client::new();
    let mut status = None;
    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await {
            status = Some(response.status());
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, Some(reqwest::StatusCode::OK));
    assert_eq!(store.open_attempts.load(Ordering::SeqCst), 3);
    for _ in 0..40 {
        if scheduler.is_running().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(scheduler.is_running().await);

    stop.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), running).await??;
    result?;

    assert!(!scheduler.is_running().await);
    assert!(store.closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn stop_during_startup_never_opens_the_server() {
    let store = Arc::new(MemoryStore::failing_open(u32::MAX));
    let scheduler = quiet_scheduler();
    let settings = LifecycleSettings {
        startup_backoff: Duration::from_millis(10),
        http_addr: free_local_addr(),
        ..LifecycleSettings::default()
    };
    let stop = CancellationToken::new();
    let running = tokio::spawn(Coordinator::new(store.clone(), scheduler.clone(), settings).run(stop.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();

    assert!(result.is_ok());
    assert!(store.open_attempts.load(Ordering::SeqCst) >= 2);
    assert!(!store.opened.load(Ordering::SeqCst));
    assert!(!scheduler.is_running().await);
}
