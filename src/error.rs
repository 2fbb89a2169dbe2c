use crate::job::{JobId, State};

use thiserror::Error;

/// Errors that can occur while building a `TaskMill` instance via `TaskMillBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Regular worker count (`regular_workers`) must be specified")]
  MissingRegularWorkers,
  // Add other potential build errors here, e.g., invalid config values
}

// --- Storage Errors ---

/// Errors raised by the durable job store.
///
/// Invariant violations (unknown id, overwriting a running job, invalid state
/// transitions) surface immediately to the caller. Failures raised *inside* an
/// executing job function never travel through this type; they are recorded on
/// the job row as FAILED state and observed by polling `get_job`.
#[derive(Error, Debug)]
pub enum StorageError {
  #[error("Job {0} not found.")]
  JobNotFound(JobId),
  #[error("Job {0} is currently running and cannot be re-scheduled.")]
  JobRunning(JobId),
  #[error("Job {id} is in state '{state}'; only failed or canceled jobs can be restarted.")]
  JobNotRestartable { id: JobId, state: State },
  #[error("Job {id} cannot {action} from state '{from}'.")]
  InvalidTransition {
    id: JobId,
    from: State,
    action: &'static str,
  },
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),
  #[error("Corrupt job row: {0}")]
  CorruptRow(String),
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

// --- Submission Errors ---

/// Errors related to submitting jobs via the `TaskMill` handle.
///
/// The function reference is validated against the registry before anything is
/// persisted, so an unknown `func_ref` fails fast here instead of producing a
/// row that can never execute.
#[derive(Error, Debug)]
pub enum SubmitError {
  #[error("No job function registered under '{0}'.")]
  UnregisteredFunction(String),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

// --- Context Errors ---

/// Errors returned by `JobContext` handles inside an executing job function.
#[derive(Error, Debug)]
pub enum ContextError {
  /// The handle was used on a job submitted without the matching capability
  /// flag (`track_progress` / `cancellable`).
  #[error("{0} is not supported for this job.")]
  NotSupported(&'static str),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

// --- Shutdown Errors ---

/// Errors related to the engine shutdown process (`shutdown_graceful`, `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out waiting for engine tasks (Scheduler, Worker pool) to complete shutdown.")]
  Timeout,
  #[error("A background task panicked during the shutdown process.")]
  TaskPanic,
}
