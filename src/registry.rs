use crate::error::{ContextError, StorageError};
use crate::job::context::JobContext;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

// --- Job Function Types ---

/// The value an executing job function resolves to on the success path.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
  /// The job finished its work. The payload is persisted as the row's `result`.
  Complete(serde_json::Value),
  /// The job observed a cancellation request and stopped cooperatively.
  Cancelled,
}

/// A captured job failure: a type-name-like string plus a message.
///
/// Only strings cross the job boundary. A live error value never leaves the
/// job task; callers observe failures through the persisted `exception` and
/// `traceback` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
  /// Short failure classifier, e.g. "TimeoutError" or "Panic".
  pub kind: String,
  /// Human-readable message or backtrace text.
  pub message: String,
}

impl JobFailure {
  pub fn new(kind: &str, message: impl Into<String>) -> Self {
    Self {
      kind: kind.to_string(),
      message: message.into(),
    }
  }
}

impl fmt::Display for JobFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.kind, self.message)
  }
}

impl From<ContextError> for JobFailure {
  fn from(err: ContextError) -> Self {
    JobFailure::new("ContextError", err.to_string())
  }
}

impl From<StorageError> for JobFailure {
  fn from(err: StorageError) -> Self {
    JobFailure::new("StorageError", err.to_string())
  }
}

/// The future type job functions return.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<JobOutcome, JobFailure>> + Send + 'static>>;

/// The function type executed for a job.
///
/// The function receives an explicit [`JobContext`] for the specific execution
/// (progress reporting, cooperative cancel checks, metadata) rather than
/// reading any ambient task-local state.
pub type BoxedJobFn = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync + 'static>;

// --- Registry ---

/// Maps stable string keys (`func_ref`) to executable job functions.
///
/// The registry is populated once at startup and shared immutably with the
/// worker pool. Rows persist only the string key, so a restarted process can
/// resume stored jobs as long as it registers the same keys.
///
/// ```ignore
/// let registry = JobRegistry::new()
///   .register("email.send", job_fn!(|ctx| {
///     // ...
///     Ok(JobOutcome::Complete(serde_json::Value::Null))
///   }));
/// ```
#[derive(Default)]
pub struct JobRegistry {
  entries: HashMap<String, BoxedJobFn>,
}

impl JobRegistry {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }

  /// Registers `func` under `name`, replacing any previous registration for
  /// the same key.
  pub fn register<F>(mut self, name: &str, func: F) -> Self
  where
    F: Fn(JobContext) -> JobFuture + Send + Sync + 'static,
  {
    self.entries.insert(name.to_string(), Arc::new(func));
    self
  }

  /// Looks up the function registered under `name`.
  pub fn resolve(&self, name: &str) -> Option<BoxedJobFn> {
    self.entries.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.entries.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for JobRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
    names.sort_unstable();
    f.debug_struct("JobRegistry").field("entries", &names).finish()
  }
}
