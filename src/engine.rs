use crate::error::{BuildError, ShutdownError, StorageError, SubmitError};
use crate::job::{Job, JobId, JobRequest, Repeat, State};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::storage::{JobFilter, JobStorage};
use crate::worker::{RunningJobs, WorkerPool};

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use parking_lot::Mutex as SyncMutex;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// How the engine's background tasks should wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop claiming new jobs and wait for in-flight jobs to finish.
  Graceful,
  /// Abort in-flight jobs as soon as possible.
  Force,
}

/// Builder for configuring and starting a [`TaskMill`] engine.
///
/// # Example
///
/// ```no_run
/// use taskmill::{JobRegistry, JobStorage, TaskMill};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = JobStorage::connect("sqlite:taskmill.db").await?;
/// let registry = JobRegistry::new(); // .register(...) your functions
///
/// let mill = TaskMill::builder(storage, registry)
///     .regular_workers(4)
///     .high_priority_workers(1)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TaskMillBuilder {
  storage: JobStorage,
  registry: JobRegistry,
  regular_workers: Option<usize>,
  high_priority_workers: usize,
  queues: Option<Vec<String>>,
  scheduler_tick: Duration,
  worker_tick: Duration,
}

impl TaskMillBuilder {
  fn new(storage: JobStorage, registry: JobRegistry) -> Self {
    Self {
      storage,
      registry,
      regular_workers: None,
      high_priority_workers: 0,
      queues: None,
      scheduler_tick: DEFAULT_TICK,
      worker_tick: DEFAULT_TICK,
    }
  }

  /// Sets the number of workers that execute jobs of any priority (required).
  pub fn regular_workers(mut self, count: usize) -> Self {
    self.regular_workers = Some(count);
    self
  }

  /// Sets the number of workers reserved for HIGH priority jobs once the
  /// regular lane is saturated. Defaults to 0.
  pub fn high_priority_workers(mut self, count: usize) -> Self {
    self.high_priority_workers = count;
    self
  }

  /// Restricts the pool to claiming from the named queues only. By default
  /// every queue is served.
  pub fn queues(mut self, queues: Vec<String>) -> Self {
    self.queues = Some(queues);
    self
  }

  /// Sets the interval between scheduler promotion passes. Defaults to 500 ms.
  pub fn scheduler_tick(mut self, tick: Duration) -> Self {
    self.scheduler_tick = tick;
    self
  }

  /// Sets the interval between worker pool dispatch passes. Defaults to 500 ms.
  pub fn worker_tick(mut self, tick: Duration) -> Self {
    self.worker_tick = tick;
    self
  }

  /// Builds and starts the engine, spawning the scheduler and worker pool
  /// tasks on the current Tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns `Err(BuildError::MissingRegularWorkers)` if `regular_workers`
  /// was not set.
  pub fn build(self) -> Result<TaskMill, BuildError> {
    let regular_workers = self.regular_workers.ok_or(BuildError::MissingRegularWorkers)?;
    if regular_workers == 0 && self.high_priority_workers == 0 {
      // Allow building with 0 workers, but log a warning.
      warn!("Engine built with 0 workers. No jobs will execute.");
    }

    let metrics = EngineMetrics::new();
    let registry = Arc::new(self.registry);
    let running: RunningJobs = Arc::new(SyncMutex::new(HashMap::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);

    let scheduler = Scheduler::new(self.storage.clone(), self.scheduler_tick, shutdown_rx.clone());
    let scheduler_handle = Handle::current().spawn(async move {
      scheduler.run().await;
    });

    let pool = WorkerPool::new(
      self.storage.clone(),
      registry.clone(),
      metrics.clone(),
      running.clone(),
      regular_workers,
      self.high_priority_workers,
      self.queues,
      self.worker_tick,
      shutdown_rx,
    );
    let pool_handle = Handle::current().spawn(async move {
      pool.run().await;
    });

    Ok(TaskMill {
      storage: self.storage,
      registry,
      metrics,
      running,
      shutdown_tx,
      task_handles: Arc::new(Mutex::new(vec![scheduler_handle, pool_handle])),
    })
  }
}

/// The main taskmill engine handle.
///
/// Owns the durable store and the function registry, runs the scheduler and
/// worker pool in the background, and exposes the submission, query, and
/// lifecycle surface. Jobs persist across process restarts: a new engine over
/// the same database (with the same registry keys) resumes stored jobs.
///
/// Use [`TaskMill::builder()`] to create and configure an instance.
#[derive(Debug)]
pub struct TaskMill {
  storage: JobStorage,
  registry: Arc<JobRegistry>,
  metrics: EngineMetrics,
  running: RunningJobs,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  // Task handles for shutdown joining
  task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskMill {
  /// Returns a builder over the given store and registry.
  pub fn builder(storage: JobStorage, registry: JobRegistry) -> TaskMillBuilder {
    TaskMillBuilder::new(storage, registry)
  }

  /// Direct access to the underlying store, for inspection or maintenance.
  pub fn storage(&self) -> &JobStorage {
    &self.storage
  }

  // --- Submission ---

  /// Submits a one-shot job for immediate execution.
  pub async fn enqueue(&self, request: JobRequest) -> Result<JobId, SubmitError> {
    self.check_registered(&request)?;
    let id = self.storage.enqueue(request).await?;
    self.metrics.jobs_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    Ok(id)
  }

  /// Submits a one-shot job due after `delay`.
  pub async fn enqueue_in(
    &self,
    delay: Duration,
    request: JobRequest,
  ) -> Result<JobId, SubmitError> {
    self.check_registered(&request)?;
    let id = self.storage.enqueue_in(delay, request).await?;
    self.metrics.jobs_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    Ok(id)
  }

  /// Submits a one-shot job due at `time`.
  pub async fn enqueue_at(
    &self,
    time: DateTime<Utc>,
    request: JobRequest,
  ) -> Result<JobId, SubmitError> {
    self.check_registered(&request)?;
    let id = self.storage.enqueue_at(time, request).await?;
    self.metrics.jobs_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    Ok(id)
  }

  /// Submits a job with a full schedule policy: first run at `time`, then
  /// `repeat` further occurrences spaced by `interval`; a failed run is
  /// re-queued after `retry_interval` if one is given.
  pub async fn schedule(
    &self,
    time: DateTime<Utc>,
    request: JobRequest,
    interval: Duration,
    repeat: Repeat,
    retry_interval: Option<Duration>,
  ) -> Result<JobId, SubmitError> {
    self.check_registered(&request)?;
    let id = self
      .storage
      .schedule(time, request, interval, repeat, retry_interval)
      .await?;
    self.metrics.jobs_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    Ok(id)
  }

  // --- Queries ---

  pub async fn get_job(&self, id: JobId) -> Result<Job, StorageError> {
    self.storage.get_job(id).await
  }

  pub async fn filter_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StorageError> {
    self.storage.filter_jobs(filter).await
  }

  pub async fn get_all_jobs(&self, queue: Option<&str>) -> Result<Vec<Job>, StorageError> {
    self.storage.get_all_jobs(queue).await
  }

  /// Retrieves a snapshot of the current engine metrics.
  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  // --- Lifecycle ---

  /// Requests cancellation of a job.
  ///
  /// A waiting job is canceled outright. An executing job is flagged
  /// `canceling` and its in-process cancel flag raised; a cancellable job
  /// function observes the flag via `JobContext::check_for_cancel` within its
  /// own polling cadence.
  ///
  /// # Errors
  ///
  /// - [`StorageError::JobNotFound`]: no job with this id exists.
  /// - [`StorageError::InvalidTransition`]: the job already finished.
  pub async fn cancel(&self, id: JobId) -> Result<(), StorageError> {
    let new_state = self.storage.cancel(id).await?;
    match new_state {
      State::Canceling => {
        if let Some(entry) = self.running.lock().get(&id) {
          entry.cancel_flag.store(true, AtomicOrdering::Relaxed);
        }
        info!(job_id = %id, "Requested cooperative cancellation of executing job.");
      }
      State::Canceled => {
        self.metrics.jobs_canceled.fetch_add(1, AtomicOrdering::Relaxed);
        info!(job_id = %id, "Canceled waiting job.");
      }
      other => warn!(job_id = %id, state = %other, "Unexpected state after cancel request."),
    }
    Ok(())
  }

  /// Like [`cancel`](Self::cancel), but an unknown id is not an error.
  pub async fn cancel_if_exists(&self, id: JobId) -> Result<(), StorageError> {
    match self.cancel(id).await {
      Err(StorageError::JobNotFound(_)) => Ok(()),
      other => other,
    }
  }

  /// Re-queues a FAILED or CANCELED job as a fresh occurrence under its
  /// original id and definition.
  pub async fn restart_job(&self, id: JobId) -> Result<(), StorageError> {
    self.storage.restart_job(id).await
  }

  /// Deletes job rows, optionally scoped to a queue and/or id. Without
  /// `force` only terminal rows are removed. Returns the number deleted.
  pub async fn clear(
    &self,
    queue: Option<&str>,
    id: Option<JobId>,
    force: bool,
  ) -> Result<u64, StorageError> {
    self.storage.clear(queue, id, force).await
  }

  // --- Shutdown ---

  /// Initiates a graceful shutdown.
  ///
  /// The pool stops claiming and waits for in-flight jobs to complete; queued
  /// and scheduled rows stay durable for the next engine over the same store.
  /// Waits for the background tasks to finish or until `timeout` elapses.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    // send_replace never fails, even after both background tasks have exited.
    self.shutdown_tx.send_replace(Some(ShutdownMode::Graceful));
    self.await_shutdown(timeout).await
  }

  /// Initiates a forced shutdown.
  ///
  /// In-flight job tasks are aborted and their rows recorded canceled before
  /// the pool exits. Waits for the background tasks to finish or until
  /// `timeout` elapses.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self.shutdown_tx.send_replace(Some(ShutdownMode::Force));
    self.await_shutdown(timeout).await
  }

  fn check_registered(&self, request: &JobRequest) -> Result<(), SubmitError> {
    if self.registry.contains(&request.func_ref) {
      Ok(())
    } else {
      Err(SubmitError::UnregisteredFunction(request.func_ref.clone()))
    }
  }

  /// Helper to wait for task handles during shutdown.
  async fn await_shutdown(&self, timeout_duration: Option<Duration>) -> Result<(), ShutdownError> {
    let handles = {
      let mut guard = self.task_handles.lock().await;
      std::mem::take(&mut *guard)
    };
    if handles.is_empty() {
      warn!("No tasks found to await during shutdown.");
      return Ok(());
    }

    let mut tasks = Vec::with_capacity(handles.len());
    for handle in handles {
      tasks.push(tokio::spawn(async move {
        match handle.await {
          Ok(()) => Ok(()),
          Err(e) => {
            error!("Engine task panicked: {:?}", e);
            Err(ShutdownError::TaskPanic)
          }
        }
      }));
    }

    let join_all_fut = try_join_all(tasks);
    let result = if let Some(timeout) = timeout_duration {
      match tokio::time::timeout(timeout, join_all_fut).await {
        Ok(Ok(results)) => {
          // results are the inner Ok/Err values from each wrapper task
          if results.iter().any(|r| r.is_err()) {
            Err(ShutdownError::TaskPanic)
          } else {
            Ok(())
          }
        }
        Ok(Err(join_err)) => {
          error!("A task panicked during shutdown: {:?}", join_err);
          Err(ShutdownError::TaskPanic)
        }
        Err(_) => {
          error!("Shutdown timed out after {:?}", timeout);
          Err(ShutdownError::Timeout)
        }
      }
    } else {
      match join_all_fut.await {
        Ok(results) => {
          if results.iter().any(|r| r.is_err()) {
            Err(ShutdownError::TaskPanic)
          } else {
            Ok(())
          }
        }
        Err(join_err) => {
          error!("A task panicked during shutdown (no timeout): {:?}", join_err);
          Err(ShutdownError::TaskPanic)
        }
      }
    };

    if result.is_ok() {
      info!("All engine tasks joined successfully.");
    }
    result
  }
}

// Note: no Drop implementation; explicit shutdown is strongly recommended so
// in-flight jobs can drain.
