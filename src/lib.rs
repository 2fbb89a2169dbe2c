//! taskmill: A Persistent, Prioritized Job Scheduling and Execution Engine
//!
//! Jobs reference a registered function by a stable string key, carry JSON
//! arguments, and are persisted to SQLite. A time-based scheduler promotes
//! due jobs and a bounded two-lane worker pool executes them, with durable
//! outcome reconciliation, automatic failure retry, repeating schedules,
//! cooperative cancellation, and progress tracking.
//!
//! # Features
//!
//! - Durable SQLite-backed job store: jobs survive process restarts and are
//!   resumed by any engine over the same database.
//! - Immediate, delayed, absolute-time, and repeating schedules, plus
//!   automatic retry of failed runs at a configurable interval.
//! - Three-level priority (HIGH / REGULAR / LOW) with a reserved high-priority
//!   worker lane so urgent jobs are never starved by bulk work.
//! - Named queue partitions dispatched independently.
//! - Cooperative cancellation and persisted progress via an explicit
//!   [`JobContext`] argument.
//! - Panic isolation: a panicking job function is recorded as FAILED with the
//!   panic message, never taking the engine down.
//! - Built-in metrics collection (queryable snapshot using [`MetricsSnapshot`]).
//! - Graceful and forced shutdown procedures (with optional timeout).
//!
//! # Usage
//!
//! ```no_run
//! use taskmill::{
//!     job_fn, JobOutcome, JobRegistry, JobRequest, JobStorage, Priority, TaskMill,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Basic tracing setup (optional)
//!     // tracing_subscriber::fmt().with_env_filter("warn,taskmill=info").init();
//!
//!     let storage = JobStorage::connect("sqlite:taskmill.db").await?;
//!
//!     let registry = JobRegistry::new()
//!         .register("reports.rebuild", job_fn!(|ctx| {
//!             for step in 0..10 {
//!                 if ctx.check_for_cancel()? {
//!                     return Ok(JobOutcome::Cancelled);
//!                 }
//!                 ctx.update_progress(step, 10).await?;
//!                 tokio::time::sleep(Duration::from_millis(50)).await;
//!             }
//!             Ok(JobOutcome::Complete(serde_json::json!({"steps": 10})))
//!         }));
//!
//!     let mill = TaskMill::builder(storage, registry)
//!         .regular_workers(4)
//!         .high_priority_workers(1)
//!         .build()?;
//!
//!     // Submit a job and watch it run.
//!     let id = mill
//!         .enqueue(
//!             JobRequest::new("reports.rebuild")
//!                 .with_priority(Priority::High)
//!                 .cancellable(true)
//!                 .track_progress(true),
//!         )
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!     let job = mill.get_job(id).await?;
//!     println!("job {} is {} ({}/{})", id, job.state, job.progress, job.total_progress);
//!
//!     mill.shutdown_graceful(Some(Duration::from_secs(10))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use [`TaskMill::builder`] to configure the engine:
//! - `regular_workers`: workers executing jobs of any priority (required).
//! - `high_priority_workers`: extra workers reserved for HIGH priority jobs
//!   once the regular lane is saturated.
//! - `queues`: restrict the pool to named queue partitions.
//! - `scheduler_tick` / `worker_tick`: poll intervals of the background loops.
//!
//! # Job Lifecycle & State
//!
//! - Jobs are described by [`JobRequest`] (function key, arguments, queue,
//!   priority, capability flags) and submitted via `enqueue`, `enqueue_in`,
//!   `enqueue_at`, or `schedule` (with interval/repeat/retry policy).
//! - Rows move `scheduled -> queued -> selected -> running` and finish as
//!   `completed`, `failed`, or `canceled`; `canceling` marks a running job
//!   whose cancellation is pending acknowledgement.
//! - Successful completion of a repeating job writes the next occurrence;
//!   a failed run with a retry interval is re-queued without consuming a
//!   repeat occurrence.
//! - `restart_job` re-queues a failed or canceled job; `clear` deletes rows
//!   (live rows only with `force`).
//!
//! # Observability
//!
//! - Retrieve metrics snapshots using [`TaskMill::metrics_snapshot`].
//! - Query jobs with [`TaskMill::get_job`], [`TaskMill::filter_jobs`], or
//!   [`TaskMill::get_all_jobs`].
//! - Integrate with the `tracing` crate for detailed logs; every execution
//!   runs inside a `job_exec` span carrying the job id, function key, and
//!   queue.

// Declare modules within the crate
pub mod engine;
pub mod error;
pub mod job;
mod macros;
pub mod metrics;
pub mod registry;
mod scheduler;
pub mod storage;
mod worker;

// --- Public Re-exports ---

// Core engine components
pub use engine::{ShutdownMode, TaskMill, TaskMillBuilder};

// Error types
pub use error::{BuildError, ContextError, ShutdownError, StorageError, SubmitError};

// Job related types
pub use job::context::JobContext;
pub use job::{Job, JobId, JobRequest, Priority, Repeat, State, WorkerInfo, DEFAULT_QUEUE};

// Registry related types
pub use registry::{BoxedJobFn, JobFailure, JobFuture, JobOutcome, JobRegistry};

// Storage related types
pub use storage::{JobFilter, JobStorage};

// Metrics related types
pub use metrics::{EngineMetrics, MetricsSnapshot};
