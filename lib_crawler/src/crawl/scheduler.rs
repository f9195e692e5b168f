//! # Cron Scheduler with Overlap Guard
//!
//! Jobs are registered once at startup and fire on six-field (seconds first)
//! cron schedules in UTC via `tokio-cron-scheduler`.
//!
//! Each [`CrawlJob`] carries its own `Idle`/`Running` state in a
//! `tokio::sync::watch` channel. A trigger claims the job with an atomic
//! idle → running transition; a trigger that finds the job running is skipped,
//! not queued. The running state is released by a drop guard, so a panicking
//! action still returns the job to `Idle`.
//!
//! `stop()` shuts the cron driver down so no further triggers fire. Runs that
//! are already in flight continue; [`CrawlScheduler::wait_idle`] awaits them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{join_all, BoxFuture};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use super::SchedulerError;

/// The work a job performs on each trigger.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Whether a job currently has a run in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Result of firing a job.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A new run was spawned.
    Started(JoinHandle<()>),
    /// A previous run was still in flight; nothing was started.
    Skipped,
}

impl TriggerOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TriggerOutcome::Skipped)
    }
}

/// Resets the job to `Idle` when the run ends, however it ends.
struct RunningGuard<'a> {
    state: &'a watch::Sender<JobState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(JobState::Idle);
    }
}

/// # Crawl Job
///
/// A named action with a cron schedule and an at-most-one-in-flight guard.
pub struct CrawlJob {
    name: String,
    schedule: String,
    action: JobAction,
    state: watch::Sender<JobState>,
}

impl fmt::Debug for CrawlJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlJob")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("state", &self.state())
            .finish()
    }
}

impl CrawlJob {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, action: JobAction) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            name: name.into(),
            schedule: schedule.into(),
            action,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Starts a run unless one is already in flight.
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let claimed = self.state.send_if_modified(|state| match state {
            JobState::Running => false,
            JobState::Idle => {
                *state = JobState::Running;
                true
            }
        });
        if !claimed {
            warn!(job = %self.name, "Previous run still in flight, skipping trigger");
            return TriggerOutcome::Skipped;
        }

        let job = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _running = RunningGuard { state: &job.state };
            info!(job = %job.name, "Job START");
            (job.action)().await;
            info!(job = %job.name, "Job END");
        });
        TriggerOutcome::Started(handle)
    }

    /// Resolves once the job has no run in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == JobState::Idle).await;
    }

    fn cron_job(self: &Arc<Self>) -> Result<Job, SchedulerError> {
        let job = Arc::clone(self);
        Job::new_async_tz(self.schedule.as_str(), Utc, move |_uuid, _scheduler| {
            let job = Arc::clone(&job);
            Box::pin(async move {
                debug!(job = %job.name, "Cron tick");
                job.trigger();
            })
        })
        .map_err(|source| SchedulerError::InvalidSchedule {
            job: self.name.clone(),
            schedule: self.schedule.clone(),
            source,
        })
    }
}

/// # Crawl Scheduler
///
/// Owns the registered jobs and, while started, the cron driver.
pub struct CrawlScheduler {
    jobs: Vec<Arc<CrawlJob>>,
    driver: Mutex<Option<JobScheduler>>,
}

impl CrawlScheduler {
    pub fn new(jobs: Vec<CrawlJob>) -> Self {
        Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            driver: Mutex::new(None),
        }
    }

    pub fn jobs(&self) -> &[Arc<CrawlJob>] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&Arc<CrawlJob>> {
        self.jobs.iter().find(|job| job.name() == name)
    }

    /// Parses every schedule without starting anything.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for job in &self.jobs {
            job.cron_job()?;
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.driver.lock().await.is_some()
    }

    /// Registers all jobs with a fresh cron driver and starts it. No-op when
    /// already started.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            debug!("Scheduler already started");
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;
        for job in &self.jobs {
            scheduler.add(job.cron_job()?).await?;
            info!(job = %job.name(), schedule = %job.schedule(), "Job registered");
        }
        scheduler.start().await?;
        *driver = Some(scheduler);
        info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(())
    }

    /// Stops future triggers. In-flight runs are not aborted. No-op when not
    /// started.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let taken = self.driver.lock().await.take();
        if let Some(mut scheduler) = taken {
            scheduler.shutdown().await?;
            info!("Scheduler stopped");
        }
        Ok(())
    }

    /// Waits up to `timeout` for every job to become idle. Returns `false` if
    /// some run was still in flight when the timeout expired.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let all_idle = join_all(self.jobs.iter().map(|job| job.wait_idle()));
        match tokio::time::timeout(timeout, all_idle).await {
            Ok(_) => true,
            Err(_) => {
                let busy: Vec<&str> = self
                    .jobs
                    .iter()
                    .filter(|job| job.state() == JobState::Running)
                    .map(|job| job.name())
                    .collect();
                error!(?busy, timeout_secs = timeout.as_secs(), "Jobs still running after timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn gated_job(runs: Arc<AtomicUsize>, gate: Arc<Notify>) -> Arc<CrawlJob> {
        let action: JobAction = Arc::new(move || {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
            }
            .boxed()
        });
        Arc::new(CrawlJob::new("gated", "30 * * * * *", action))
    }

    #[tokio::test]
    async fn trigger_during_a_run_is_skipped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let job = gated_job(runs.clone(), gate.clone());

        let first = job.trigger();
        assert!(!first.is_skipped());
        tokio::task::yield_now().await;
        assert_eq!(job.state(), JobState::Running);

        assert!(job.trigger().is_skipped());

        gate.notify_one();
        if let TriggerOutcome::Started(handle) = first {
            handle.await.unwrap();
        }
        assert_eq!(job.state(), JobState::Idle);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let again = job.trigger();
        assert!(!again.is_skipped());
        gate.notify_one();
        job.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_action_returns_job_to_idle() {
        let action: JobAction = Arc::new(|| async { panic!("boom") }.boxed());
        let job = Arc::new(CrawlJob::new("panics", "30 * * * * *", action));

        if let TriggerOutcome::Started(handle) = job.trigger() {
            assert!(handle.await.is_err());
        }
        assert_eq!(job.state(), JobState::Idle);
    }

    #[tokio::test]
    async fn invalid_schedule_is_reported_with_job_name() {
        let action: JobAction = Arc::new(|| async {}.boxed());
        let scheduler = CrawlScheduler::new(vec![CrawlJob::new("broken", "every minute", action)]);
        match scheduler.validate() {
            Err(SchedulerError::InvalidSchedule { job, .. }) => assert_eq!(job, "broken"),
            other => panic!("expected invalid schedule, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let action: JobAction = Arc::new(|| async {}.boxed());
        let scheduler = CrawlScheduler::new(vec![CrawlJob::new("noop", "30 5 * * * *", action)]);

        scheduler.stop().await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        scheduler.stop().await.unwrap();
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);
        assert!(scheduler.wait_idle(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn wait_idle_times_out_while_a_run_is_stuck() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let job = gated_job(runs, gate.clone());
        let scheduler = CrawlScheduler {
            jobs: vec![Arc::clone(&job)],
            driver: Mutex::new(None),
        };

        let _ = job.trigger();
        assert!(!scheduler.wait_idle(Duration::from_millis(20)).await);
        gate.notify_one();
        assert!(scheduler.wait_idle(Duration::from_secs(5)).await);
    }
}
