//! # Crawl Engine Module
//!
//! This module forms the heart of the incremental crawler. It aggregates all
//! the components required to turn a cron tick into persisted, de-duplicated
//! items while keeping one misbehaving site from affecting the others.
//!
//! ## Core Components:
//!
//! - **`watermark`**: decides, per site, the cutoff a fetcher should start
//!   from: the newest stored `publish_time`, or `now - lag_window` when the
//!   site has no rows or its newest row is older than the window.
//!
//! - **`dispatcher`**: fans one batch out into concurrent per-site units
//!   (watermark → fetch → bulk insert) and collects a per-site report. A failing
//!   unit is logged with its site and never aborts its siblings.
//!
//! - **`scheduler`**: cron-driven job runner with an explicit `Idle`/`Running`
//!   state per job, so a tick that lands on an in-flight run is skipped.
//!
//! - **`health`**: the `GET /health` router backed by the store's connection check.
//!
//! - **`lifecycle`**: the coordinator that opens the store (retrying forever
//!   with a fixed backoff), runs the scheduler and health server until a stop
//!   signal, then tears everything down in order.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

use crate::connections::DbError;
use crate::ingestors::FetchError;

/// Cutoff computation per site.
pub mod watermark;
/// Concurrent per-site batch execution.
pub mod dispatcher;
/// Cron jobs with an overlap guard.
pub mod scheduler;
/// `GET /health` router.
pub mod health;
/// Startup, run and shutdown orchestration.
pub mod lifecycle;

// --- Public API Re-exports ---
pub use dispatcher::{BatchReport, FetchDispatcher, SiteOutcome, SiteReport};
pub use health::health_router;
pub use lifecycle::{open_with_retry, Coordinator, LifecycleSettings};
pub use scheduler::{CrawlJob, CrawlScheduler, JobAction, JobState, TriggerOutcome};
pub use watermark::{effective_cutoff, WatermarkResolver};

/// Why a single site's unit failed in a batch.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no fetcher registered for site {0}")]
    UnknownSite(String),
    #[error("failed to resolve watermark: {0}")]
    Watermark(#[source] DbError),
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchError),
    #[error("failed to persist items: {0}")]
    Persist(#[source] DbError),
    /// The unit's task panicked or was cancelled.
    #[error("crawl unit aborted: {0}")]
    Aborted(String),
}

/// Scheduler construction and control failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule {schedule:?} for job {job}: {source}")]
    InvalidSchedule {
        job: String,
        schedule: String,
        #[source]
        source: JobSchedulerError,
    },
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

/// Failures that end the coordinator's run.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("failed to bind health server on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("health server failed: {0}")]
    Server(#[source] std::io::Error),
}
