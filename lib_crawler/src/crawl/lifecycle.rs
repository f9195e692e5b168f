//! # Lifecycle Coordinator
//!
//! Owns the order in which the crawler comes up and goes down.
//!
//! ## Key Features:
//! - **Patient startup:** the store is opened in a loop with a fixed backoff.
//!   An unreachable database at boot is waited out, never fatal. Only the stop
//!   signal ends the loop early.
//! - **Shared stop signal:** the scheduler and the health server both observe
//!   one `CancellationToken`. A failing server cancels it too.
//! - **Ordered teardown:** scheduler triggers stop first, in-flight runs are
//!   awaited, the server gets a bounded graceful shutdown (then is aborted),
//!   and only then is the store closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::health::health_router;
use super::scheduler::CrawlScheduler;
use super::LifecycleError;
use crate::connections::StoreHandle;

/// Timing and binding knobs for [`Coordinator::run`].
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Pause between failed store opens.
    pub startup_backoff: Duration,
    /// Graceful shutdown budget for the health server before it is aborted.
    pub server_shutdown_timeout: Duration,
    /// How long to wait for in-flight crawl runs once triggers have stopped.
    pub scheduler_drain_timeout: Duration,
    pub http_addr: SocketAddr,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            startup_backoff: Duration::from_secs(5),
            server_shutdown_timeout: Duration::from_secs(5),
            scheduler_drain_timeout: Duration::from_secs(30),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 9238)),
        }
    }
}

/// Opens `store`, retrying every `backoff` until it succeeds or `stop` fires.
///
/// Returns `true` once the store is open, `false` if stopped first.
pub async fn open_with_retry(
    store: &dyn StoreHandle,
    backoff: Duration,
    stop: &CancellationToken,
) -> bool {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match store.open().await {
            Ok(()) => {
                info!(attempt, "Store opened");
                return true;
            }
            Err(e) => {
                error!(
                    attempt,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Store open failed, retrying"
                );
            }
        }

        tokio::select! {
            _ = stop.cancelled() => {
                warn!(attempt, "Stop requested before the store became available");
                return false;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// # Coordinator
///
/// Runs the store, the scheduler and the health server as one unit.
pub struct Coordinator {
    store: Arc<dyn StoreHandle>,
    scheduler: Arc<CrawlScheduler>,
    settings: LifecycleSettings,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StoreHandle>,
        scheduler: Arc<CrawlScheduler>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            scheduler,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Runs until `stop` is cancelled, then tears everything down.
    ///
    /// # Errors
    /// - `Scheduler`: an invalid schedule (checked before the store is touched)
    ///   or a failure starting the cron driver.
    /// - `Bind`: the health address could not be bound.
    /// - `Server`: the health server failed while running. This also cancels
    ///   `stop`, so the scheduler is wound down before returning.
    pub async fn run(self, stop: CancellationToken) -> Result<(), LifecycleError> {
        // --- Phase 1: configuration checks, before any resource is acquired ---
        self.scheduler.validate()?;

        // --- Phase 2: store ---
        if !open_with_retry(&*self.store, self.settings.startup_backoff, &stop).await {
            return Ok(());
        }

        // --- Phase 3: health server ---
        let addr = self.settings.http_addr;
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.store.close().await;
                return Err(LifecycleError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr().unwrap_or(addr);
        info!(addr = %local_addr, "Health server listening");

        let router = health_router(Arc::clone(&self.store));
        let server_stop = stop.clone();
        let mut server = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(server_stop.clone().cancelled_owned())
                .await;
            if let Err(e) = &served {
                error!(error = %e, "Health server failed");
                server_stop.cancel();
            }
            served
        });

        // --- Phase 4: scheduler, then wait for the stop signal ---
        let started = self.scheduler.start().await;
        if let Err(e) = &started {
            error!(error = %e, "Scheduler failed to start");
            stop.cancel();
        } else {
            stop.cancelled().await;
            info!("Stop signal received, shutting down");
        }

        // --- Phase 5: teardown, store last ---
        if let Err(e) = self.scheduler.stop().await {
            error!(error = %e, "Scheduler did not stop cleanly");
        }
        if self.scheduler.wait_idle(self.settings.scheduler_drain_timeout).await {
            info!("All crawl runs finished");
        }

        let served = match tokio::time::timeout(self.settings.server_shutdown_timeout, &mut server).await {
            Ok(Ok(served)) => served,
            Ok(Err(join)) => {
                error!(error = %join, "Health server task ended abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.server_shutdown_timeout.as_secs(),
                    "Health server did not stop in time, aborting"
                );
                server.abort();
                Ok(())
            }
        };

        self.store.close().await;
        info!("Store closed");

        started?;
        served.map_err(LifecycleError::Server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::DbError;
    use crate::crawl::{CrawlJob, JobAction, SchedulerError};
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Fails `open` until `failures` attempts have been made.
    #[derive(Default)]
    struct FlakyStore {
        failures: u32,
        attempts: AtomicU32,
        closed: AtomicBool,
    }

    impl FlakyStore {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl StoreHandle for FlakyStore {
        async fn open(&self) -> Result<(), DbError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                Err(DbError::Connection("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    fn idle_scheduler(schedule: &str) -> Arc<CrawlScheduler> {
        let action: JobAction = Arc::new(|| async {}.boxed());
        Arc::new(CrawlScheduler::new(vec![CrawlJob::new("flash_news", schedule, action)]))
    }

    fn local_settings() -> LifecycleSettings {
        LifecycleSettings {
            startup_backoff: Duration::from_millis(10),
            server_shutdown_timeout: Duration::from_secs(2),
            scheduler_drain_timeout: Duration::from_secs(2),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_retries_until_the_store_is_up() {
        let store = FlakyStore::failing(3);
        let stop = CancellationToken::new();

        assert!(open_with_retry(&store, Duration::from_secs(5), &stop).await);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_the_open_loop() {
        let store = FlakyStore::failing(u32::MAX);
        let stop = CancellationToken::new();
        let canceller = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        assert!(!open_with_retry(&store, Duration::from_secs(5), &stop).await);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_schedule_fails_before_opening_the_store() {
        let store = Arc::new(FlakyStore::default());
        let coordinator = Coordinator::new(store.clone(), idle_scheduler("not a cron"), local_settings());

        let result = coordinator.run(CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(LifecycleError::Scheduler(SchedulerError::InvalidSchedule { .. }))
        ));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runs_until_stopped_and_closes_the_store() {
        let store = Arc::new(FlakyStore::failing(1));
        let scheduler = idle_scheduler("0 0 0 1 1 *");
        let coordinator = Coordinator::new(store.clone(), scheduler.clone(), local_settings());
        let stop = CancellationToken::new();

        let running = tokio::spawn(coordinator.run(stop.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(scheduler.is_running().await);
        assert!(!store.closed.load(Ordering::SeqCst));

        stop.cancel();
        let result = tokio::time::timeout(Duration::from_secs(10), running)
            .await
            .expect("coordinator did not stop")
            .unwrap();

        assert!(result.is_ok());
        assert!(!scheduler.is_running().await);
        assert!(store.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn bind_failure_closes_the_store() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut settings = local_settings();
        settings.http_addr = taken.local_addr().unwrap();
        let store = Arc::new(FlakyStore::default());
        let coordinator = Coordinator::new(store.clone(), idle_scheduler("0 0 0 1 1 *"), settings);

        let result = coordinator.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(LifecycleError::Bind { .. })));
        assert!(store.closed.load(Ordering::SeqCst));
    }
}
