use crate::engine::ShutdownMode;
use crate::error::StorageError;
use crate::job::context::JobContext;
use crate::job::{Job, JobId, Priority, State, WorkerInfo};
use crate::metrics::EngineMetrics;
use crate::registry::{JobFailure, JobOutcome, JobRegistry};
use crate::storage::JobStorage;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Bookkeeping for one in-flight job execution.
#[derive(Debug)]
pub(crate) struct RunningJob {
  /// Raised to request cooperative cancellation of this execution.
  pub cancel_flag: Arc<AtomicBool>,
}

/// Map of currently executing jobs, shared between the dispatcher and the
/// engine handle (which raises cancel flags directly on `cancel` calls).
pub(crate) type RunningJobs = Arc<Mutex<HashMap<JobId, RunningJob>>>;

/// Dispatcher task that polls the store for claimable jobs and executes them
/// under a bounded two-lane concurrency budget.
///
/// With `R` regular workers and `H` high-priority-only workers (`M = R + H`):
/// while fewer than `R` jobs are in flight any due job may be claimed; once
/// the regular lane is saturated the remaining `H` slots claim HIGH priority
/// jobs only; at `M` in flight the tick is skipped. This keeps HIGH jobs
/// flowing even when a burst of LOW/REGULAR work occupies the regular lane.
pub(crate) struct WorkerPool {
  storage: JobStorage,
  registry: Arc<JobRegistry>,
  metrics: EngineMetrics,
  running: RunningJobs,
  regular_workers: usize,
  high_priority_workers: usize,
  queues: Option<Vec<String>>,
  tick: Duration,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
}

impl WorkerPool {
  #[allow(clippy::too_many_arguments)] // Necessary state for pool operation
  pub(crate) fn new(
    storage: JobStorage,
    registry: Arc<JobRegistry>,
    metrics: EngineMetrics,
    running: RunningJobs,
    regular_workers: usize,
    high_priority_workers: usize,
    queues: Option<Vec<String>>,
    tick: Duration,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  ) -> Self {
    Self {
      storage,
      registry,
      metrics,
      running,
      regular_workers,
      high_priority_workers,
      queues,
      tick,
      shutdown_rx,
    }
  }

  /// Runs the dispatch loop until a shutdown signal arrives.
  ///
  /// Graceful shutdown stops claiming and drains in-flight jobs. Forced
  /// shutdown also stops claiming; each supervisor observes the force signal
  /// itself, aborts its job task, and records the row canceled, so the pool
  /// drains within moments.
  pub(crate) async fn run(mut self) {
    info!(
      regular_workers = self.regular_workers,
      high_priority_workers = self.high_priority_workers,
      "Worker pool started."
    );

    let mut draining = false;
    loop {
      tokio::select! {
        biased; // Prioritize checking the shutdown signal

        Ok(()) = self.shutdown_rx.changed() => {
          match *self.shutdown_rx.borrow() {
            Some(ShutdownMode::Force) => {
              info!("Worker pool received forced shutdown signal, aborting in-flight jobs.");
              draining = true;
            }
            Some(ShutdownMode::Graceful) => {
              info!("Worker pool received graceful shutdown signal, draining.");
              draining = true;
            }
            None => {}
          }
        }

        _ = tokio::time::sleep(self.tick) => {
          if !draining {
            self.sync_cancel_requests().await;
            self.dispatch_ready_jobs().await;
          }
        }
      }

      if draining && self.running.lock().is_empty() {
        info!("Worker pool drained.");
        break;
      }
    }

    info!("Worker pool task shutting down.");
  }

  /// Claims and spawns due jobs until the concurrency budget is spent or the
  /// queue runs dry.
  async fn dispatch_ready_jobs(&self) {
    loop {
      let busy = self.running.lock().len();
      let ceiling = if busy < self.regular_workers {
        Priority::Low // all priorities eligible
      } else if busy < self.regular_workers + self.high_priority_workers {
        Priority::High // reserved lane: high priority only
      } else {
        break;
      };

      match self.claim_next(ceiling).await {
        Ok(Some(job)) => {
          self.metrics.jobs_claimed.fetch_add(1, AtomicOrdering::Relaxed);
          self.spawn_job(job);
        }
        Ok(None) => break,
        Err(e) => {
          warn!(error = %e, "Failed to claim next queued job.");
          break;
        }
      }
    }

    self
      .metrics
      .workers_active_current
      .store(self.running.lock().len(), AtomicOrdering::Relaxed);
  }

  /// Claims the next due job at or above `ceiling`, honoring the optional
  /// queue restriction.
  async fn claim_next(&self, ceiling: Priority) -> Result<Option<Job>, StorageError> {
    match &self.queues {
      None => self.storage.get_next_queued_job(ceiling, None).await,
      Some(queues) => {
        for queue in queues {
          if let Some(job) = self.storage.get_next_queued_job(ceiling, Some(queue)).await? {
            return Ok(Some(job));
          }
        }
        Ok(None)
      }
    }
  }

  /// Raises in-process cancel flags for rows another handle flagged
  /// `canceling` in the store.
  async fn sync_cancel_requests(&self) {
    match self.storage.get_canceling_jobs(self.queues.as_deref()).await {
      Ok(jobs) => {
        if jobs.is_empty() {
          return;
        }
        let running = self.running.lock();
        for job in jobs {
          if let Some(entry) = running.get(&job.id) {
            trace!(job_id = %job.id, "Raising cancel flag for executing job.");
            entry.cancel_flag.store(true, AtomicOrdering::Relaxed);
          }
        }
      }
      Err(e) => warn!(error = %e, "Failed to sync cancellation requests."),
    }
  }

  /// Marks the claimed job running and spawns its supervising task.
  fn spawn_job(&self, job: Job) {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let storage = self.storage.clone();
    let registry = self.registry.clone();
    let metrics = self.metrics.clone();
    let running = self.running.clone();
    let shutdown_rx = self.shutdown_rx.clone();
    let id = job.id;
    let flag = cancel_flag.clone();

    // Insert the entry under the lock before the spawned task can observe the
    // map, so its removal at the end of execution cannot be lost.
    let mut guard = self.running.lock();
    tokio::spawn(async move {
      execute_job(storage, registry, metrics, job, flag, shutdown_rx).await;
      running.lock().remove(&id);
    });
    guard.insert(id, RunningJob { cancel_flag });
  }
}

/// Supervises one job execution from `running` transition to terminal write.
async fn execute_job(
  storage: JobStorage,
  registry: Arc<JobRegistry>,
  metrics: EngineMetrics,
  job: Job,
  cancel_flag: Arc<AtomicBool>,
  mut shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
) {
  let job_span = tracing::span!(
    tracing::Level::INFO,
    "job_exec",
    job_id = %job.id,
    func_ref = job.func_ref.as_str(),
    queue = job.queue.as_str(),
  );

  async move {
    let id = job.id;

    match storage.mark_job_as_running(id, &WorkerInfo::current()).await {
      Ok(()) => {}
      Err(StorageError::InvalidTransition { from: State::Canceling, .. }) => {
        // Cancel raced the claim: honor it before the function ever runs.
        info!("Job was canceled between claim and start.");
        finalize_canceled(&storage, &metrics, id).await;
        return;
      }
      Err(e) => {
        warn!(error = %e, "Failed to mark claimed job as running; skipping.");
        return;
      }
    }

    if cancel_flag.load(AtomicOrdering::Relaxed) {
      info!("Cancel flag raised before start; not invoking job function.");
      finalize_canceled(&storage, &metrics, id).await;
      return;
    }

    let Some(func) = registry.resolve(&job.func_ref) else {
      // Submission validates registration, so this only happens when a
      // restarted process registers a different function set.
      error!(func_ref = job.func_ref.as_str(), "No function registered for claimed job.");
      let message = format!("no function registered under '{}'", job.func_ref);
      record_failure(&storage, &metrics, id, "UnregisteredFunction", &message).await;
      finalize_reschedule(&storage, &metrics, id, true).await;
      return;
    };

    let context = JobContext::new(
      id,
      storage.clone(),
      cancel_flag.clone(),
      job.cancellable,
      job.track_progress,
    );

    info!("Starting job execution.");
    let started = Instant::now();
    // Spawn the function as its own task so a panic is contained to it and
    // surfaces here as a JoinError. On forced shutdown the task is aborted,
    // which surfaces as a cancelled JoinError below.
    let mut task = tokio::spawn(func(context));
    let joined = tokio::select! {
      joined = &mut task => joined,
      () = force_signal(&mut shutdown_rx) => {
        warn!("Forced shutdown, aborting job task.");
        task.abort();
        task.await
      }
    };
    let duration = started.elapsed();
    metrics.job_execution_duration.record(duration);

    match joined {
      Ok(Ok(JobOutcome::Complete(result))) => {
        info!(duration_ms = duration.as_millis() as u64, outcome = "Success", "Finished job execution.");
        if let Err(e) = storage.complete_job(id, &result).await {
          warn!(error = %e, "Failed to record job completion.");
          return;
        }
        metrics.jobs_completed.fetch_add(1, AtomicOrdering::Relaxed);
        finalize_reschedule(&storage, &metrics, id, false).await;
      }
      Ok(Ok(JobOutcome::Cancelled)) => {
        info!(duration_ms = duration.as_millis() as u64, outcome = "Cancelled", "Finished job execution.");
        finalize_canceled(&storage, &metrics, id).await;
      }
      Ok(Err(failure)) => {
        info!(
          duration_ms = duration.as_millis() as u64,
          outcome = "Fail",
          exception = failure.kind.as_str(),
          "Finished job execution."
        );
        record_failure(&storage, &metrics, id, &failure.kind, &failure.message).await;
        finalize_reschedule(&storage, &metrics, id, true).await;
      }
      Err(join_error) => {
        if join_error.is_panic() {
          error!("Job function panicked!");
          metrics.jobs_panicked.fetch_add(1, AtomicOrdering::Relaxed);
          let failure = panic_failure(join_error);
          record_failure(&storage, &metrics, id, &failure.kind, &failure.message).await;
          finalize_reschedule(&storage, &metrics, id, true).await;
        } else {
          // Task aborted (forced shutdown); leave a canceled row behind.
          warn!("Job task was cancelled during execution.");
          finalize_canceled(&storage, &metrics, id).await;
        }
      }
    }
  }
  .instrument(job_span)
  .await
}

async fn finalize_canceled(storage: &JobStorage, metrics: &EngineMetrics, id: JobId) {
  match storage.mark_job_as_canceled(id).await {
    Ok(()) => {
      metrics.jobs_canceled.fetch_add(1, AtomicOrdering::Relaxed);
    }
    Err(e) => warn!(error = %e, "Failed to record job cancellation."),
  }
}

async fn record_failure(
  storage: &JobStorage,
  metrics: &EngineMetrics,
  id: JobId,
  exception: &str,
  traceback: &str,
) {
  metrics.jobs_failed.fetch_add(1, AtomicOrdering::Relaxed);
  if let Err(e) = storage.mark_job_as_failed(id, exception, traceback).await {
    warn!(error = %e, "Failed to record job failure.");
  }
}

/// Applies the post-finish reschedule policy and bumps the matching counter.
async fn finalize_reschedule(
  storage: &JobStorage,
  metrics: &EngineMetrics,
  id: JobId,
  failed: bool,
) {
  match storage.reschedule_finished_job_if_needed(id, None).await {
    Ok(true) => {
      debug!("Wrote next occurrence for finished job.");
      let counter = if failed { &metrics.jobs_retried } else { &metrics.jobs_rescheduled };
      counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
    Ok(false) => {}
    Err(e) => warn!(error = %e, "Failed to evaluate reschedule policy."),
  }
}

/// Resolves once a forced shutdown has been signaled. Never resolves for
/// graceful shutdown, nor after the signal sender is gone.
async fn force_signal(rx: &mut watch::Receiver<Option<ShutdownMode>>) {
  loop {
    if matches!(*rx.borrow(), Some(ShutdownMode::Force)) {
      return;
    }
    if rx.changed().await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

/// Extracts a readable message from a panic payload.
fn panic_failure(join_error: tokio::task::JoinError) -> JobFailure {
  let payload = join_error.into_panic();
  let message = if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "job function panicked with a non-string payload".to_string()
  };
  JobFailure::new("Panic", message)
}
