pub mod context;

use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// --- Public Type Aliases ---

/// Type alias for the unique identifier of a job. Uses UUID v4.
pub type JobId = Uuid;

/// The default queue jobs are submitted to when no queue is named.
pub const DEFAULT_QUEUE: &str = "default";

// --- Lifecycle State ---

/// The lifecycle state of a persisted job.
///
/// Transitions: `Scheduled -> Queued -> Selected -> Running -> {Completed,
/// Failed, Canceled}`, with `Canceling` as a transient sub-state of a running
/// job whose cancellation has been requested. `Selected` marks a row claimed
/// by the worker pool but not yet started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
  /// Persisted with a future `scheduled_time`; not yet eligible to run.
  Scheduled,
  /// Due and waiting for a worker to claim it.
  Queued,
  /// Claimed by the worker pool, about to start.
  Selected,
  /// Currently executing.
  Running,
  /// Running, with cancellation requested but not yet acknowledged.
  Canceling,
  /// Terminal: finished successfully, `result` is populated.
  Completed,
  /// Terminal unless retried: `exception`/`traceback` are populated.
  Failed,
  /// Terminal: canceled before or during execution.
  Canceled,
}

impl State {
  /// Returns the lowercase string stored in the database for this state.
  pub fn as_str(&self) -> &'static str {
    match self {
      State::Scheduled => "scheduled",
      State::Queued => "queued",
      State::Selected => "selected",
      State::Running => "running",
      State::Canceling => "canceling",
      State::Completed => "completed",
      State::Failed => "failed",
      State::Canceled => "canceled",
    }
  }

  /// A terminal state admits no further transitions except an explicit
  /// `restart_job` (FAILED/CANCELED) or a post-finish reschedule.
  pub fn is_terminal(&self) -> bool {
    matches!(self, State::Completed | State::Failed | State::Canceled)
  }
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for State {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scheduled" => Ok(State::Scheduled),
      "queued" => Ok(State::Queued),
      "selected" => Ok(State::Selected),
      "running" => Ok(State::Running),
      "canceling" => Ok(State::Canceling),
      "completed" => Ok(State::Completed),
      "failed" => Ok(State::Failed),
      "canceled" => Ok(State::Canceled),
      other => Err(format!("unknown job state '{other}'")),
    }
  }
}

// --- Priority ---

/// Job priority. Lower numeric value means more urgent.
///
/// The set is closed: only these three values are accepted, so queue scans can
/// rely on `priority <= ceiling` comparisons against the stored integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
  High = 5,
  Regular = 10,
  Low = 15,
}

impl Priority {
  /// The integer persisted in the `priority` column.
  pub fn as_i64(&self) -> i64 {
    *self as i64
  }

  /// Maps a stored integer back to a priority. Returns `None` for values
  /// outside the closed set.
  pub fn from_value(value: i64) -> Option<Self> {
    match value {
      5 => Some(Priority::High),
      10 => Some(Priority::Regular),
      15 => Some(Priority::Low),
      _ => None,
    }
  }
}

impl Default for Priority {
  fn default() -> Self {
    Priority::Regular
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Priority::High => f.write_str("high"),
      Priority::Regular => f.write_str("regular"),
      Priority::Low => f.write_str("low"),
    }
  }
}

// --- Repeat Policy ---

/// How many further occurrences a job has after the next one completes.
///
/// `Times(0)` is a one-shot job; `Times(n)` re-schedules `n` more times,
/// decrementing once per *successful* completion; `Forever` never decrements.
/// Failure retries via `retry_interval` do not consume occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
  Times(u32),
  Forever,
}

impl Repeat {
  /// Whether a successful completion should produce another occurrence.
  pub fn wants_reschedule(&self) -> bool {
    match self {
      Repeat::Forever => true,
      Repeat::Times(n) => *n > 0,
    }
  }

  /// Consumes one occurrence. Only meaningful when `wants_reschedule()`.
  pub(crate) fn decremented(&self) -> Repeat {
    match self {
      Repeat::Forever => Repeat::Forever,
      Repeat::Times(n) => Repeat::Times(n.saturating_sub(1)),
    }
  }

  /// Database representation: `NULL` = forever, `n` = n further occurrences.
  pub(crate) fn to_db(self) -> Option<i64> {
    match self {
      Repeat::Forever => None,
      Repeat::Times(n) => Some(i64::from(n)),
    }
  }

  pub(crate) fn from_db(value: Option<i64>) -> Result<Repeat, String> {
    match value {
      None => Ok(Repeat::Forever),
      Some(n) if n >= 0 => {
        let n = u32::try_from(n).map_err(|_| format!("repeat count {n} out of range"))?;
        Ok(Repeat::Times(n))
      }
      Some(n) => Err(format!("negative repeat count {n}")),
    }
  }
}

impl Default for Repeat {
  fn default() -> Self {
    Repeat::Times(0)
  }
}

// --- Worker Provenance ---

/// Advisory provenance stamped onto a row when a worker starts executing it.
/// Informational only; never used for claiming decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
  pub host: String,
  pub process: String,
  pub thread: String,
}

impl WorkerInfo {
  /// Captures the identity of the calling host/process/thread.
  pub fn current() -> Self {
    Self {
      host: std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("localhost")),
      process: std::process::id().to_string(),
      thread: format!("{:?}", std::thread::current().id()),
    }
  }
}

// --- Persisted Job ---

/// A fully materialized job row.
///
/// This is a read-side snapshot: mutating a `Job` value does not write back to
/// storage. All times are UTC; `interval` and `retry_interval` have whole-second
/// resolution (matching the stored columns).
#[derive(Debug, Clone)]
pub struct Job {
  pub id: JobId,
  pub state: State,
  /// Registry key of the function this job executes.
  pub func_ref: String,
  pub args: Vec<Value>,
  pub kwargs: Map<String, Value>,
  pub queue: String,
  pub priority: Priority,
  pub cancellable: bool,
  pub track_progress: bool,
  pub progress: i64,
  pub total_progress: i64,
  /// Free-form JSON object merged per-key by `save_job_meta`.
  pub extra_metadata: Map<String, Value>,
  /// JSON result of the last successful completion.
  pub result: Option<Value>,
  /// Failure type name (e.g. "Panic", "TimeoutError") of the last failure.
  pub exception: Option<String>,
  /// Failure message/backtrace text of the last failure.
  pub traceback: Option<String>,
  pub scheduled_time: DateTime<Utc>,
  /// Gap between repeat occurrences. Zero for one-shot jobs.
  pub interval: StdDuration,
  pub repeat: Repeat,
  /// If set, a FAILED run is automatically re-queued after this delay.
  pub retry_interval: Option<StdDuration>,
  pub worker_host: Option<String>,
  pub worker_process: Option<String>,
  pub worker_thread: Option<String>,
  pub time_created: DateTime<Utc>,
  pub time_updated: DateTime<Utc>,
}

impl Job {
  /// Whether this job still has repeat occurrences ahead of it.
  pub fn is_repeating(&self) -> bool {
    self.repeat.wants_reschedule()
  }
}

// --- Job Request ---

/// The caller-facing description of a job to submit.
///
/// Scheduling policy (when, interval, repeat, retry) is supplied separately at
/// submission time; this struct carries the identity of the work itself.
///
/// ```ignore
/// let request = JobRequest::new("reports.rebuild")
///   .with_args(vec![serde_json::json!("2026-08")])
///   .in_queue("reporting")
///   .with_priority(Priority::High)
///   .cancellable(true);
/// ```
#[derive(Debug, Clone)]
pub struct JobRequest {
  /// Registry key of the function to execute. Validated at submit time.
  pub func_ref: String,
  /// Positional JSON arguments, stored verbatim on the row.
  pub args: Vec<Value>,
  /// Named JSON arguments, stored verbatim on the row.
  pub kwargs: Map<String, Value>,
  /// Queue partition. Defaults to [`DEFAULT_QUEUE`].
  pub queue: String,
  pub priority: Priority,
  /// Allows `JobContext::check_for_cancel` inside the job function.
  pub cancellable: bool,
  /// Allows `JobContext::update_progress` inside the job function.
  pub track_progress: bool,
  /// Caller-chosen id. `None` generates a fresh UUID v4. Re-using the id of an
  /// existing non-running job replaces that row.
  pub job_id: Option<JobId>,
  /// Initial `extra_metadata` object.
  pub extra_metadata: Map<String, Value>,
}

impl JobRequest {
  /// Creates a request for the function registered under `func_ref`, with
  /// default queue, regular priority, and no capability flags.
  pub fn new(func_ref: &str) -> Self {
    Self {
      func_ref: func_ref.to_string(),
      args: Vec::new(),
      kwargs: Map::new(),
      queue: DEFAULT_QUEUE.to_string(),
      priority: Priority::default(),
      cancellable: false,
      track_progress: false,
      job_id: None,
      extra_metadata: Map::new(),
    }
  }

  pub fn with_args(mut self, args: Vec<Value>) -> Self {
    self.args = args;
    self
  }

  pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
    self.kwargs = kwargs;
    self
  }

  pub fn in_queue(mut self, queue: &str) -> Self {
    self.queue = queue.to_string();
    self
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn cancellable(mut self, cancellable: bool) -> Self {
    self.cancellable = cancellable;
    self
  }

  pub fn track_progress(mut self, track_progress: bool) -> Self {
    self.track_progress = track_progress;
    self
  }

  pub fn with_job_id(mut self, id: JobId) -> Self {
    self.job_id = Some(id);
    self
  }

  /// Adds one key to the initial metadata object.
  pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
    self.extra_metadata.insert(key.to_string(), value);
    self
  }
}
