use crate::error::ContextError;
use crate::job::JobId;
use crate::storage::JobStorage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

/// Handle passed to a job function for its specific execution.
///
/// The context is an explicit argument of every job function; there is no
/// ambient "current job" state to consult. It carries the job id, the
/// capability flags the job was submitted with, a clone of the storage handle,
/// and the in-process cancellation flag the worker pool raises when a
/// `cancel` request arrives for this execution.
#[derive(Clone)]
pub struct JobContext {
  job_id: JobId,
  storage: JobStorage,
  cancel_flag: Arc<AtomicBool>,
  cancellable: bool,
  track_progress: bool,
}

impl JobContext {
  pub(crate) fn new(
    job_id: JobId,
    storage: JobStorage,
    cancel_flag: Arc<AtomicBool>,
    cancellable: bool,
    track_progress: bool,
  ) -> Self {
    Self {
      job_id,
      storage,
      cancel_flag,
      cancellable,
      track_progress,
    }
  }

  /// The id of the job this execution belongs to.
  pub fn job_id(&self) -> JobId {
    self.job_id
  }

  /// Persists a progress update (`progress` out of `total`) on the job row.
  ///
  /// Fails with [`ContextError::NotSupported`] unless the job was submitted
  /// with `track_progress`.
  pub async fn update_progress(&self, progress: i64, total: i64) -> Result<(), ContextError> {
    if !self.track_progress {
      return Err(ContextError::NotSupported("Progress tracking"));
    }
    self
      .storage
      .update_job_progress(self.job_id, progress, total)
      .await?;
    Ok(())
  }

  /// Returns whether cancellation has been requested for this execution.
  ///
  /// This is a cheap in-memory check; the job function should poll it at its
  /// own safe points and return [`JobOutcome::Cancelled`] to acknowledge.
  /// Fails with [`ContextError::NotSupported`] unless the job was submitted
  /// with `cancellable`.
  ///
  /// [`JobOutcome::Cancelled`]: crate::registry::JobOutcome::Cancelled
  pub fn check_for_cancel(&self) -> Result<bool, ContextError> {
    if !self.cancellable {
      return Err(ContextError::NotSupported("Cancellation"));
    }
    Ok(self.cancel_flag.load(Ordering::Relaxed))
  }

  /// Merges `meta` into the job row's `extra_metadata` object, key by key
  /// (last writer wins per key).
  pub async fn save_meta(&self, meta: Map<String, Value>) -> Result<(), ContextError> {
    self.storage.save_job_meta(self.job_id, &meta).await?;
    Ok(())
  }
}

impl std::fmt::Debug for JobContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobContext")
      .field("job_id", &self.job_id)
      .field("cancellable", &self.cancellable)
      .field("track_progress", &self.track_progress)
      .field("cancel_requested", &self.cancel_flag.load(Ordering::Relaxed))
      .finish()
  }
}
