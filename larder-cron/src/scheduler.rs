//! Cron job scheduler.

use crate::error::{CronError, CronResult};
use crate::expression::CronExpression;
use crate::job::{Job, JobContext, JobFn, JobStatus};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

type Jobs = Arc<RwLock<HashMap<String, Job>>>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick interval for checking scheduled jobs
    pub tick_interval: Duration,

    /// Whether to log job execution at info level
    pub log_execution: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            log_execution: true,
        }
    }
}

/// Cron job scheduler.
///
/// Jobs run on spawned tasks, so a slow job never delays the tick loop or
/// another job. [`CronScheduler::shutdown`] stops the loop and waits for
/// every in-flight execution to finish.
pub struct CronScheduler {
    jobs: Jobs,
    config: SchedulerConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronScheduler {
    /// Create a new scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a new scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        debug!(tick_interval = ?config.tick_interval, "Initializing cron scheduler");
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            handle: Mutex::new(None),
        }
    }

    /// Add a job to the scheduler.
    ///
    /// Registration is immediate; a second job with the same name is rejected.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use larder_cron::*;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), CronError> {
    /// let scheduler = CronScheduler::new();
    ///
    /// scheduler.add_job(
    ///     "cleanup",
    ///     CronPresets::DAILY,
    ///     |ctx| async move {
    ///         tracing::info!(job = %ctx.name, "Running cleanup");
    ///         Ok(())
    ///     },
    /// )?;
    ///
    /// scheduler.start()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_job<F, Fut>(
        &self,
        name: impl Into<String>,
        expression: &str,
        function: F,
    ) -> CronResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        let name = name.into();
        let expr = CronExpression::parse(expression)?;

        let mut jobs = self.jobs.write();
        if jobs.contains_key(&name) {
            return Err(CronError::JobAlreadyExists(name));
        }

        let job = Job::new(name.clone(), expr, function);
        info!(job = %name, schedule = %expression, next_run = ?job.next_run, "Registered cron job");
        jobs.insert(name, job);
        Ok(())
    }

    /// Remove a job from the scheduler.
    ///
    /// An execution already in flight runs to completion.
    pub fn remove_job(&self, name: &str) -> CronResult<()> {
        self.jobs
            .write()
            .remove(name)
            .ok_or_else(|| CronError::JobNotFound(name.to_string()))?;
        debug!(job = %name, "Removed cron job");
        Ok(())
    }

    /// Get a sorted list of all job names.
    pub fn list_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Enable a job.
    pub fn enable_job(&self, name: &str) -> CronResult<()> {
        self.with_job(name, Job::enable)
    }

    /// Disable a job.
    pub fn disable_job(&self, name: &str) -> CronResult<()> {
        self.with_job(name, Job::disable)
    }

    fn with_job(&self, name: &str, f: impl FnOnce(&mut Job)) -> CronResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| CronError::JobNotFound(name.to_string()))?;
        f(job);
        Ok(())
    }

    /// Start the tick loop. Must be called from within a Tokio runtime.
    pub fn start(&self) -> CronResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CronError::SchedulerShutDown);
        }

        let mut handle = self.handle.lock();
        if handle.is_some() {
            warn!("Cron scheduler already running");
            return Err(CronError::SchedulerAlreadyRunning);
        }

        let jobs = self.jobs.clone();
        let tracker = self.tracker.clone();
        let cancel = self.cancel.clone();
        let config = self.config.clone();

        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for (function, context) in take_due(&jobs, Utc::now()) {
                    tracker.spawn(run_job(jobs.clone(), function, context, config.log_execution));
                }
            }

            debug!("Cron tick loop stopped");
        }));

        info!(jobs = self.jobs.read().len(), "Cron scheduler started");
        Ok(())
    }

    /// Check if the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some() && !self.cancel.is_cancelled()
    }

    /// Run a job immediately, outside its schedule, and wait for it.
    ///
    /// Works for disabled jobs. Fails with [`CronError::JobRunning`] if the
    /// job is mid-execution and prevents overlap.
    pub async fn run_now(&self, name: &str) -> CronResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CronError::SchedulerShutDown);
        }

        let (function, context) = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(name)
                .ok_or_else(|| CronError::JobNotFound(name.to_string()))?;
            job.begin(Utc::now())
                .ok_or_else(|| CronError::JobRunning(name.to_string()))?
        };

        let execution = self.tracker.spawn(run_job(
            self.jobs.clone(),
            function,
            context,
            self.config.log_execution,
        ));
        execution
            .await
            .map_err(|e| CronError::ExecutionFailed(e.to_string()))?
    }

    /// Stop the tick loop and wait for in-flight jobs to finish.
    ///
    /// Idempotent. A scheduler that has been shut down cannot be restarted.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Cron tick loop ended abnormally");
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(in_flight = self.tracker.len(), "Waiting for running cron jobs");
        }
        self.tracker.wait().await;
        info!("Cron scheduler stopped");
    }

    /// Get job statistics.
    pub fn get_stats(&self, name: &str) -> CronResult<JobStats> {
        let jobs = self.jobs.read();
        let job = jobs
            .get(name)
            .ok_or_else(|| CronError::JobNotFound(name.to_string()))?;

        Ok(JobStats {
            name: job.name.clone(),
            enabled: job.enabled,
            execution_count: job.execution_count,
            failure_count: job.failure_count,
            last_run: job.last_run,
            next_run: job.next_run,
            status: job.status.clone(),
        })
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Mark every due job running and collect what is needed to execute it.
fn take_due(jobs: &Jobs, now: DateTime<Utc>) -> Vec<(JobFn, JobContext)> {
    jobs.write()
        .values_mut()
        .filter(|job| job.should_run_at(now))
        .filter_map(|job| job.begin(now))
        .collect()
}

async fn run_job(jobs: Jobs, function: JobFn, context: JobContext, log: bool) -> CronResult<()> {
    let name = context.name.clone();
    if log {
        info!(job = %name, scheduled = %context.scheduled_time, "Executing cron job");
    }

    let result = function(context).await;

    match &result {
        Ok(()) if log => info!(job = %name, "Cron job completed"),
        Ok(()) => {}
        Err(e) => error!(job = %name, error = %e, "Cron job failed"),
    }

    if let Some(job) = jobs.write().get_mut(&name) {
        job.finish(&result, Utc::now());
    }
    result
}

/// Job statistics.
#[derive(Debug, Clone)]
pub struct JobStats {
    pub name: String,
    pub enabled: bool,
    pub execution_count: u64,
    pub failure_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn fast() -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(20),
            log_execution: false,
        }
    }

    #[tokio::test]
    async fn test_scheduler_creation() {
        let scheduler = CronScheduler::new();
        assert!(!scheduler.is_running());
        assert!(scheduler.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_add_job_is_immediate() {
        let scheduler = CronScheduler::new();
        scheduler
            .add_job("test", "0 * * * * *", |_| async { Ok(()) })
            .unwrap();
        assert_eq!(scheduler.list_jobs(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let scheduler = CronScheduler::new();
        scheduler
            .add_job("gc", "0 0 0 * * *", |_| async { Ok(()) })
            .unwrap();
        assert!(matches!(
            scheduler.add_job("gc", "0 * * * * *", |_| async { Ok(()) }),
            Err(CronError::JobAlreadyExists(_))
        ));
        assert_eq!(scheduler.list_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_expression_rejected() {
        let scheduler = CronScheduler::new();
        assert!(matches!(
            scheduler.add_job("bad", "every tuesday", |_| async { Ok(()) }),
            Err(CronError::InvalidExpression(_))
        ));
        assert!(scheduler.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_remove_job() {
        let scheduler = CronScheduler::new();
        scheduler
            .add_job("test", "0 * * * * *", |_| async { Ok(()) })
            .unwrap();

        scheduler.remove_job("test").unwrap();
        assert!(scheduler.list_jobs().is_empty());
        assert!(matches!(
            scheduler.remove_job("test"),
            Err(CronError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_and_shutdown() {
        let scheduler = CronScheduler::new();

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start(),
            Err(CronError::SchedulerAlreadyRunning)
        ));

        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
        scheduler.shutdown().await;
        assert!(matches!(scheduler.start(), Err(CronError::SchedulerShutDown)));
    }

    #[tokio::test]
    async fn test_run_now_records_stats() {
        let scheduler = CronScheduler::with_config(fast());
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        scheduler
            .add_job("manual", "0 0 0 1 1 *", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        scheduler.run_now("manual").await.unwrap();
        scheduler.run_now("manual").await.unwrap();

        let stats = scheduler.get_stats("manual").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(stats.execution_count, 2);
        assert_eq!(stats.status, JobStatus::Completed);
        assert!(stats.last_run.is_some());
    }

    #[tokio::test]
    async fn test_run_now_reports_failure() {
        let scheduler = CronScheduler::with_config(fast());
        scheduler
            .add_job("flaky", "0 0 0 1 1 *", |_| async {
                Err(CronError::ExecutionFailed("disk full".to_string()))
            })
            .unwrap();

        assert!(scheduler.run_now("flaky").await.is_err());
        let stats = scheduler.get_stats("flaky").unwrap();
        assert_eq!(stats.failure_count, 1);
        assert!(matches!(stats.status, JobStatus::Failed(_)));
        assert!(matches!(
            scheduler.run_now("missing").await,
            Err(CronError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_job() {
        let scheduler = Arc::new(CronScheduler::with_config(fast()));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        scheduler
            .add_job("slow", "0 0 0 1 1 *", move |_| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        scheduler.start().unwrap();

        let background = scheduler.clone();
        let manual = tokio::spawn(async move { background.run_now("slow").await });
        while scheduler.get_stats("slow").unwrap().status != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(matches!(
            scheduler.run_now("slow").await,
            Err(CronError::JobRunning(_))
        ));

        scheduler.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
        manual.await.unwrap().unwrap();
    }
}
