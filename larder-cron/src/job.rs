//! Job definition and execution.

use crate::error::CronResult;
use crate::expression::CronExpression;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Job execution function type.
pub type JobFn =
    Arc<dyn Fn(JobContext) -> Pin<Box<dyn Future<Output = CronResult<()>> + Send>> + Send + Sync>;

/// Job execution context.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job name
    pub name: String,

    /// Scheduled execution time
    pub scheduled_time: DateTime<Utc>,

    /// Actual execution time
    pub execution_time: DateTime<Utc>,

    /// Execution count (0-based)
    pub execution_count: u64,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(name: String, scheduled_time: DateTime<Utc>, execution_count: u64) -> Self {
        Self {
            name,
            scheduled_time,
            execution_time: Utc::now(),
            execution_count,
        }
    }

    /// Get the delay between scheduled and actual execution time.
    pub fn delay(&self) -> chrono::Duration {
        self.execution_time - self.scheduled_time
    }
}

/// Job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Job is scheduled and waiting
    Scheduled,

    /// Job is currently running
    Running,

    /// Job completed successfully
    Completed,

    /// Job failed
    Failed(String),
}

/// Scheduled job.
pub struct Job {
    /// Job name
    pub name: String,

    /// Cron expression
    pub expression: CronExpression,

    /// Job function
    pub function: JobFn,

    /// Job status
    pub status: JobStatus,

    /// Next execution time
    pub next_run: Option<DateTime<Utc>>,

    /// Last execution time
    pub last_run: Option<DateTime<Utc>>,

    /// Total execution count
    pub execution_count: u64,

    /// Total failed executions
    pub failure_count: u64,

    /// Whether the job is enabled
    pub enabled: bool,

    /// Whether to prevent overlapping executions
    pub prevent_overlap: bool,
}

impl Job {
    /// Create a new job.
    pub fn new<F, Fut>(name: impl Into<String>, expression: CronExpression, function: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        let name = name.into();
        let next_run = expression.next();

        let wrapped_fn = Arc::new(
            move |ctx: JobContext| -> Pin<Box<dyn Future<Output = CronResult<()>> + Send>> {
                Box::pin(function(ctx))
            },
        );

        Self {
            name,
            expression,
            function: wrapped_fn,
            status: JobStatus::Scheduled,
            next_run,
            last_run: None,
            execution_count: 0,
            failure_count: 0,
            enabled: true,
            prevent_overlap: true,
        }
    }

    /// Whether an execution is in flight.
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Check if the job is due at `now`.
    pub fn should_run_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }

        if self.prevent_overlap && self.is_running() {
            return false;
        }

        self.next_run.is_some_and(|next_run| now >= next_run)
    }

    /// Mark the job running and hand out what is needed to execute it.
    ///
    /// Returns `None` if an execution is already in flight and overlap is
    /// prevented.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Option<(JobFn, JobContext)> {
        if self.prevent_overlap && self.is_running() {
            return None;
        }

        let context = JobContext::new(
            self.name.clone(),
            self.next_run.unwrap_or(now),
            self.execution_count,
        );
        self.status = JobStatus::Running;
        // Advance now so a slow run is not picked up again on the next tick.
        self.next_run = self.expression.next_after(now);
        Some((self.function.clone(), context))
    }

    /// Record the outcome of an execution started with [`Job::begin`].
    pub fn finish(&mut self, result: &CronResult<()>, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.execution_count += 1;
        self.status = match result {
            Ok(()) => JobStatus::Completed,
            Err(e) => {
                self.failure_count += 1;
                JobStatus::Failed(e.to_string())
            }
        };
        if self.next_run.is_none_or(|next| next <= now) {
            self.next_run = self.expression.next_after(now);
        }
    }

    /// Execute the job in place.
    pub async fn execute(&mut self) -> CronResult<()> {
        let Some((function, context)) = self.begin(Utc::now()) else {
            return Ok(());
        };
        let result = function(context).await;
        self.finish(&result, Utc::now());
        result
    }

    /// Enable the job.
    pub fn enable(&mut self) {
        self.enabled = true;
        if self.next_run.is_none() {
            self.next_run = self.expression.next();
        }
    }

    /// Disable the job.
    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("expression", &self.expression.expression())
            .field("status", &self.status)
            .field("next_run", &self.next_run)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
