//! Cron-style maintenance scheduling for Larder.
//!
//! Runs named async jobs on six-field cron schedules (seconds first). Jobs
//! never overlap with themselves, a failing run is logged and counted but
//! does not stop the schedule, and [`CronScheduler::shutdown`] waits for
//! in-flight runs before returning.
//!
//! ## Cron Expressions
//!
//! ```
//! use larder_cron::{CronExpression, CronPresets};
//!
//! let daily = CronExpression::parse(CronPresets::DAILY).unwrap();
//!
//! let now = chrono::Utc::now();
//! assert!(daily.next_after(now).unwrap() > now);
//! ```
//!
//! ## Scheduling a Job
//!
//! ```no_run
//! use larder_cron::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CronError> {
//!     let scheduler = CronScheduler::new();
//!
//!     scheduler.add_job("compact", CronPresets::DAILY, |ctx| async move {
//!         tracing::info!(run = ctx.execution_count, "Compacting");
//!         Ok(())
//!     })?;
//!     scheduler.start()?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod expression;
pub mod job;
pub mod scheduler;

pub use error::{CronError, CronResult};
pub use expression::{CronExpression, CronPresets};
pub use job::{Job, JobContext, JobFn, JobStatus};
pub use scheduler::{CronScheduler, JobStats, SchedulerConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CronError, CronResult};
    pub use crate::expression::{CronExpression, CronPresets};
    pub use crate::job::{JobContext, JobStatus};
    pub use crate::scheduler::{CronScheduler, SchedulerConfig};
}
