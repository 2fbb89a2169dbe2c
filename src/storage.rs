//! Durable job store over SQLite.
//!
//! `JobStorage` is the sole source of truth for job state. Every lifecycle
//! transition is a guarded `UPDATE` whose `WHERE` clause encodes the legal
//! source states, so invalid transitions surface as
//! [`StorageError::InvalidTransition`] instead of silently clobbering rows.
//! The claim (`get_next_queued_job`) is a single `UPDATE ... RETURNING`
//! statement and therefore atomic under SQLite's serialization: concurrent
//! in-process claimants can never observe the same row twice.

use crate::error::StorageError;
use crate::job::{Job, JobId, JobRequest, Priority, Repeat, State, WorkerInfo};

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{
  SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

const CREATE_JOBS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS jobs (
  id TEXT PRIMARY KEY,
  state TEXT NOT NULL,
  func_ref TEXT NOT NULL,
  args TEXT NOT NULL DEFAULT '[]',
  kwargs TEXT NOT NULL DEFAULT '{}',
  queue TEXT NOT NULL DEFAULT 'default',
  priority INTEGER NOT NULL DEFAULT 10,
  cancellable INTEGER NOT NULL DEFAULT 0,
  track_progress INTEGER NOT NULL DEFAULT 0,
  progress INTEGER NOT NULL DEFAULT 0,
  total_progress INTEGER NOT NULL DEFAULT 0,
  extra_metadata TEXT NOT NULL DEFAULT '{}',
  result TEXT,
  exception TEXT,
  traceback TEXT,
  scheduled_time TEXT NOT NULL,
  interval_secs INTEGER NOT NULL DEFAULT 0,
  repeat INTEGER,
  retry_interval_secs INTEGER,
  worker_host TEXT,
  worker_process TEXT,
  worker_thread TEXT,
  time_created TEXT NOT NULL,
  time_updated TEXT NOT NULL
)";

const CREATE_CLAIM_INDEX: &str =
  "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (state, queue, scheduled_time, priority)";

/// Column list shared by every `SELECT`/`RETURNING` that materializes a [`Job`].
const JOB_COLUMNS: &str = "id, state, func_ref, args, kwargs, queue, priority, cancellable, \
   track_progress, progress, total_progress, extra_metadata, result, exception, traceback, \
   scheduled_time, interval_secs, repeat, retry_interval_secs, worker_host, worker_process, \
   worker_thread, time_created, time_updated";

// --- Row Mapping ---

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
  id: String,
  state: String,
  func_ref: String,
  args: String,
  kwargs: String,
  queue: String,
  priority: i64,
  cancellable: bool,
  track_progress: bool,
  progress: i64,
  total_progress: i64,
  extra_metadata: String,
  result: Option<String>,
  exception: Option<String>,
  traceback: Option<String>,
  scheduled_time: DateTime<Utc>,
  interval_secs: i64,
  repeat: Option<i64>,
  retry_interval_secs: Option<i64>,
  worker_host: Option<String>,
  worker_process: Option<String>,
  worker_thread: Option<String>,
  time_created: DateTime<Utc>,
  time_updated: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
  type Error = StorageError;

  fn try_from(row: JobRow) -> Result<Self, Self::Error> {
    let id = Uuid::parse_str(&row.id)
      .map_err(|e| StorageError::CorruptRow(format!("bad job id '{}': {e}", row.id)))?;
    let state = State::from_str(&row.state).map_err(StorageError::CorruptRow)?;
    let priority = Priority::from_value(row.priority).ok_or_else(|| {
      StorageError::CorruptRow(format!("priority {} outside the closed set", row.priority))
    })?;
    let repeat = Repeat::from_db(row.repeat).map_err(StorageError::CorruptRow)?;
    let interval_secs = u64::try_from(row.interval_secs)
      .map_err(|_| StorageError::CorruptRow(format!("negative interval {}", row.interval_secs)))?;
    let retry_interval = row
      .retry_interval_secs
      .map(|secs| {
        u64::try_from(secs)
          .map(StdDuration::from_secs)
          .map_err(|_| StorageError::CorruptRow(format!("negative retry interval {secs}")))
      })
      .transpose()?;

    Ok(Job {
      id,
      state,
      func_ref: row.func_ref,
      args: serde_json::from_str(&row.args)?,
      kwargs: serde_json::from_str(&row.kwargs)?,
      queue: row.queue,
      priority,
      cancellable: row.cancellable,
      track_progress: row.track_progress,
      progress: row.progress,
      total_progress: row.total_progress,
      extra_metadata: serde_json::from_str(&row.extra_metadata)?,
      result: row.result.map(|s| serde_json::from_str(&s)).transpose()?,
      exception: row.exception,
      traceback: row.traceback,
      scheduled_time: row.scheduled_time,
      interval: StdDuration::from_secs(interval_secs),
      repeat,
      retry_interval,
      worker_host: row.worker_host,
      worker_process: row.worker_process,
      worker_thread: row.worker_thread,
      time_created: row.time_created,
      time_updated: row.time_updated,
    })
  }
}

// --- Query Filter ---

/// Conjunctive filter for `filter_jobs`. Empty filter matches all jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
  /// Match a single queue by name.
  pub queue: Option<String>,
  /// Match any of several queues.
  pub queues: Option<Vec<String>>,
  pub state: Option<State>,
  /// `true` matches jobs with occurrences remaining, `false` one-shot jobs.
  pub repeating: Option<bool>,
  pub func_ref: Option<String>,
}

// --- Storage Handle ---

/// Handle to the durable job store. Cheap to clone (wraps a connection pool).
#[derive(Clone)]
pub struct JobStorage {
  pool: SqlitePool,
}

impl JobStorage {
  /// Opens (creating if missing) a file-backed store at `database_url`
  /// (e.g. `sqlite:taskmill.db`), in WAL mode.
  pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
    let options = SqliteConnectOptions::from_str(database_url)?
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .synchronous(SqliteSynchronous::Normal);
    let pool = SqlitePoolOptions::new()
      .max_connections(5)
      .connect_with(options)
      .await?;
    let storage = Self { pool };
    storage.init_schema().await?;
    Ok(storage)
  }

  /// Opens an in-memory store.
  ///
  /// The pool is pinned to one connection that is never recycled: each SQLite
  /// `:memory:` connection is its own database, so a second connection would
  /// see an empty store.
  pub async fn in_memory() -> Result<Self, StorageError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    let storage = Self { pool };
    storage.init_schema().await?;
    Ok(storage)
  }

  /// Wraps an existing pool. The schema is created if missing.
  pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
    let storage = Self { pool };
    storage.init_schema().await?;
    Ok(storage)
  }

  async fn init_schema(&self) -> Result<(), StorageError> {
    sqlx::query(CREATE_JOBS_TABLE).execute(&self.pool).await?;
    sqlx::query(CREATE_CLAIM_INDEX).execute(&self.pool).await?;
    Ok(())
  }

  // --- Submission ---

  /// Persists a job for execution at `time`.
  ///
  /// If `time` is already due the row is written `queued`; otherwise it is
  /// written `scheduled` and promoted by the scheduler loop once due.
  /// Re-using the id of an existing row replaces it, unless that row is
  /// claimed or executing, which fails with [`StorageError::JobRunning`].
  ///
  /// `interval` is the gap between repeat occurrences and must be non-zero
  /// whenever `repeat` asks for further occurrences. `retry_interval`, if
  /// set, re-queues a failed run after that delay without consuming a repeat.
  pub async fn schedule(
    &self,
    time: DateTime<Utc>,
    request: JobRequest,
    interval: StdDuration,
    repeat: Repeat,
    retry_interval: Option<StdDuration>,
  ) -> Result<JobId, StorageError> {
    if repeat.wants_reschedule() && interval.is_zero() {
      return Err(StorageError::InvalidArgument(
        "a repeating job requires a non-zero interval".to_string(),
      ));
    }

    let id = request.job_id.unwrap_or_else(Uuid::new_v4);
    let now = Utc::now();
    let state = if time <= now { State::Queued } else { State::Scheduled };

    let interval_secs = i64::try_from(interval.as_secs())
      .map_err(|_| StorageError::InvalidArgument("interval out of range".to_string()))?;
    let retry_interval_secs = retry_interval
      .map(|d| {
        i64::try_from(d.as_secs())
          .map_err(|_| StorageError::InvalidArgument("retry interval out of range".to_string()))
      })
      .transpose()?;

    // Single conditional upsert: the running-state guard lives in the
    // statement itself, so there is no read-then-write window in which a
    // concurrent claim could slip past the check. A guarded-out upsert
    // affects zero rows, which surfaces as JobRunning.
    let result = sqlx::query(
      "INSERT INTO jobs (id, state, func_ref, args, kwargs, queue, priority, \
       cancellable, track_progress, progress, total_progress, extra_metadata, result, exception, \
       traceback, scheduled_time, interval_secs, repeat, retry_interval_secs, worker_host, \
       worker_process, worker_thread, time_created, time_updated) \
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, NULL, NULL, NULL, ?, ?, ?, ?, NULL, NULL, \
       NULL, ?, ?) \
       ON CONFLICT(id) DO UPDATE SET \
         state = excluded.state, func_ref = excluded.func_ref, args = excluded.args, \
         kwargs = excluded.kwargs, queue = excluded.queue, priority = excluded.priority, \
         cancellable = excluded.cancellable, track_progress = excluded.track_progress, \
         progress = 0, total_progress = 0, extra_metadata = excluded.extra_metadata, \
         result = NULL, exception = NULL, traceback = NULL, \
         scheduled_time = excluded.scheduled_time, interval_secs = excluded.interval_secs, \
         repeat = excluded.repeat, retry_interval_secs = excluded.retry_interval_secs, \
         worker_host = NULL, worker_process = NULL, worker_thread = NULL, \
         time_created = excluded.time_created, time_updated = excluded.time_updated \
       WHERE jobs.state NOT IN ('selected', 'running', 'canceling')",
    )
    .bind(id.to_string())
    .bind(state.as_str())
    .bind(&request.func_ref)
    .bind(serde_json::to_string(&request.args)?)
    .bind(serde_json::to_string(&request.kwargs)?)
    .bind(&request.queue)
    .bind(request.priority.as_i64())
    .bind(request.cancellable)
    .bind(request.track_progress)
    .bind(serde_json::to_string(&request.extra_metadata)?)
    .bind(time)
    .bind(interval_secs)
    .bind(repeat.to_db())
    .bind(retry_interval_secs)
    .bind(now)
    .bind(now)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StorageError::JobRunning(id));
    }

    debug!(job_id = %id, state = %state, scheduled_time = %time, "Persisted job.");
    Ok(id)
  }

  /// Persists a one-shot job due immediately.
  pub async fn enqueue(&self, request: JobRequest) -> Result<JobId, StorageError> {
    self
      .schedule(Utc::now(), request, StdDuration::ZERO, Repeat::Times(0), None)
      .await
  }

  /// Persists a one-shot job due after `delay`.
  pub async fn enqueue_in(
    &self,
    delay: StdDuration,
    request: JobRequest,
  ) -> Result<JobId, StorageError> {
    let time = delay_from_now(delay)?;
    self
      .schedule(time, request, StdDuration::ZERO, Repeat::Times(0), None)
      .await
  }

  /// Persists a one-shot job due at `time`.
  pub async fn enqueue_at(
    &self,
    time: DateTime<Utc>,
    request: JobRequest,
  ) -> Result<JobId, StorageError> {
    self
      .schedule(time, request, StdDuration::ZERO, Repeat::Times(0), None)
      .await
  }

  // --- Claiming ---

  /// Atomically claims the most urgent due job at or above `ceiling` urgency
  /// (numerically, `priority <= ceiling`), optionally restricted to one queue.
  ///
  /// Ordering among due rows is priority, then scheduled time, then creation
  /// time. The claimed row transitions `queued -> selected` in the same
  /// statement that reads it, so no two claimants can receive the same job.
  pub async fn get_next_queued_job(
    &self,
    ceiling: Priority,
    queue: Option<&str>,
  ) -> Result<Option<Job>, StorageError> {
    let sql = format!(
      "UPDATE jobs SET state = 'selected', time_updated = ?1 \
       WHERE id = ( \
         SELECT id FROM jobs \
         WHERE state = 'queued' AND scheduled_time <= ?1 AND priority <= ?2 \
           AND (?3 IS NULL OR queue = ?3) \
         ORDER BY priority ASC, scheduled_time ASC, time_created ASC \
         LIMIT 1 \
       ) \
       RETURNING {JOB_COLUMNS}"
    );
    let row = sqlx::query_as::<_, JobRow>(&sql)
      .bind(Utc::now())
      .bind(ceiling.as_i64())
      .bind(queue)
      .fetch_optional(&self.pool)
      .await?;
    row.map(Job::try_from).transpose()
  }

  // --- Lifecycle Transitions ---

  /// Transitions a claimed (or directly queued) job to `running`, stamping
  /// the worker's provenance onto the row.
  pub async fn mark_job_as_running(
    &self,
    id: JobId,
    worker: &WorkerInfo,
  ) -> Result<(), StorageError> {
    let result = sqlx::query(
      "UPDATE jobs SET state = 'running', worker_host = ?, worker_process = ?, \
       worker_thread = ?, time_updated = ? WHERE id = ? AND state IN ('selected', 'queued')",
    )
    .bind(&worker.host)
    .bind(&worker.process)
    .bind(&worker.thread)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;
    self.check_transition(result.rows_affected(), id, "start running").await
  }

  /// Records a successful completion with its JSON result.
  pub async fn complete_job(&self, id: JobId, result: &Value) -> Result<(), StorageError> {
    let query_result = sqlx::query(
      "UPDATE jobs SET state = 'completed', result = ?, exception = NULL, traceback = NULL, \
       time_updated = ? WHERE id = ? AND state IN ('running', 'canceling')",
    )
    .bind(serde_json::to_string(result)?)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;
    self.check_transition(query_result.rows_affected(), id, "complete").await
  }

  /// Records a failed execution. `exception` is a type-name-like classifier
  /// and `traceback` the message/backtrace text.
  pub async fn mark_job_as_failed(
    &self,
    id: JobId,
    exception: &str,
    traceback: &str,
  ) -> Result<(), StorageError> {
    let result = sqlx::query(
      "UPDATE jobs SET state = 'failed', exception = ?, traceback = ?, time_updated = ? \
       WHERE id = ? AND state IN ('running', 'canceling', 'selected')",
    )
    .bind(exception)
    .bind(traceback)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;
    self.check_transition(result.rows_affected(), id, "fail").await
  }

  /// Moves a job to the terminal `canceled` state. The row is kept for audit.
  pub async fn mark_job_as_canceled(&self, id: JobId) -> Result<(), StorageError> {
    let result = sqlx::query(
      "UPDATE jobs SET state = 'canceled', time_updated = ? \
       WHERE id = ? AND state IN ('scheduled', 'queued', 'selected', 'running', 'canceling')",
    )
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;
    self.check_transition(result.rows_affected(), id, "cancel").await
  }

  /// Flags an executing (or claimed) job for cooperative cancellation.
  pub async fn mark_job_as_canceling(&self, id: JobId) -> Result<(), StorageError> {
    let result = sqlx::query(
      "UPDATE jobs SET state = 'canceling', time_updated = ? \
       WHERE id = ? AND state IN ('selected', 'running')",
    )
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;
    self.check_transition(result.rows_affected(), id, "request cancel").await
  }

  /// Requests cancellation of a job in any live state and returns the
  /// resulting state: waiting jobs become `canceled` outright, claimed or
  /// executing jobs become `canceling` for the worker to acknowledge.
  pub async fn cancel(&self, id: JobId) -> Result<State, StorageError> {
    let job = self.get_job(id).await?;
    match job.state {
      State::Scheduled | State::Queued => {
        self.mark_job_as_canceled(id).await?;
        Ok(State::Canceled)
      }
      State::Selected | State::Running => {
        self.mark_job_as_canceling(id).await?;
        Ok(State::Canceling)
      }
      State::Canceling => Ok(State::Canceling),
      terminal => Err(StorageError::InvalidTransition {
        id,
        from: terminal,
        action: "cancel",
      }),
    }
  }

  // --- Progress & Metadata ---

  /// Persists a progress update on an executing job.
  pub async fn update_job_progress(
    &self,
    id: JobId,
    progress: i64,
    total: i64,
  ) -> Result<(), StorageError> {
    let result = sqlx::query(
      "UPDATE jobs SET progress = ?, total_progress = ?, time_updated = ? \
       WHERE id = ? AND state IN ('running', 'canceling')",
    )
    .bind(progress)
    .bind(total)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;
    self.check_transition(result.rows_affected(), id, "record progress").await
  }

  /// Merges `meta` into the row's `extra_metadata` object, key by key.
  pub async fn save_job_meta(
    &self,
    id: JobId,
    meta: &Map<String, Value>,
  ) -> Result<(), StorageError> {
    let mut tx = self.pool.begin().await?;

    let row: Option<(String,)> = sqlx::query_as("SELECT extra_metadata FROM jobs WHERE id = ?")
      .bind(id.to_string())
      .fetch_optional(&mut *tx)
      .await?;
    let (stored,) = row.ok_or(StorageError::JobNotFound(id))?;

    let mut merged: Map<String, Value> = serde_json::from_str(&stored)?;
    for (key, value) in meta {
      merged.insert(key.clone(), value.clone());
    }

    sqlx::query("UPDATE jobs SET extra_metadata = ?, time_updated = ? WHERE id = ?")
      .bind(serde_json::to_string(&merged)?)
      .bind(Utc::now())
      .bind(id.to_string())
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(())
  }

  // --- Queries ---

  /// Fetches a job by id.
  pub async fn get_job(&self, id: JobId) -> Result<Job, StorageError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
    let row = sqlx::query_as::<_, JobRow>(&sql)
      .bind(id.to_string())
      .fetch_optional(&self.pool)
      .await?;
    row.ok_or(StorageError::JobNotFound(id))?.try_into()
  }

  pub async fn job_exists(&self, id: JobId) -> Result<bool, StorageError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM jobs WHERE id = ?")
      .bind(id.to_string())
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.is_some())
  }

  /// Lists jobs matching `filter`, ordered by creation time.
  pub async fn filter_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StorageError> {
    let sql = format!(
      "SELECT {JOB_COLUMNS} FROM jobs \
       WHERE (?1 IS NULL OR queue = ?1) AND (?2 IS NULL OR state = ?2) \
         AND (?3 IS NULL OR func_ref = ?3) \
       ORDER BY time_created ASC"
    );
    let rows = sqlx::query_as::<_, JobRow>(&sql)
      .bind(filter.queue.as_deref())
      .bind(filter.state.map(|s| s.as_str()))
      .bind(filter.func_ref.as_deref())
      .fetch_all(&self.pool)
      .await?;

    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
      jobs.push(Job::try_from(row)?);
    }

    if let Some(queues) = &filter.queues {
      jobs.retain(|job| queues.iter().any(|q| q == &job.queue));
    }
    if let Some(repeating) = filter.repeating {
      jobs.retain(|job| job.is_repeating() == repeating);
    }
    Ok(jobs)
  }

  /// Lists all jobs, optionally restricted to one queue.
  pub async fn get_all_jobs(&self, queue: Option<&str>) -> Result<Vec<Job>, StorageError> {
    self
      .filter_jobs(&JobFilter {
        queue: queue.map(String::from),
        ..JobFilter::default()
      })
      .await
  }

  /// Lists jobs flagged `canceling`, optionally restricted to a queue set.
  pub async fn get_canceling_jobs(
    &self,
    queues: Option<&[String]>,
  ) -> Result<Vec<Job>, StorageError> {
    self
      .filter_jobs(&JobFilter {
        queues: queues.map(<[String]>::to_vec),
        state: Some(State::Canceling),
        ..JobFilter::default()
      })
      .await
  }

  // --- Scheduling Maintenance ---

  /// Promotes every due `scheduled` row to `queued`. Returns the number of
  /// rows promoted. Idempotent; safe to run on every scheduler tick.
  pub async fn promote_due_jobs(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
    let result = sqlx::query(
      "UPDATE jobs SET state = 'queued', time_updated = ?1 \
       WHERE state = 'scheduled' AND scheduled_time <= ?1",
    )
    .bind(now)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected())
  }

  /// Re-queues a terminal job for another occurrence if its policy asks for
  /// one. Returns `true` when a new occurrence was written.
  ///
  /// Resolution order:
  /// 1. An explicit `delay` re-schedules once at `now + delay`, leaving the
  ///    repeat bookkeeping untouched.
  /// 2. A FAILED job with a `retry_interval` retries at `now + retry_interval`
  ///    without consuming a repeat occurrence.
  /// 3. A COMPLETED job with occurrences remaining re-schedules at
  ///    `now + interval`, consuming one finite occurrence.
  /// 4. Anything else stays terminal.
  pub async fn reschedule_finished_job_if_needed(
    &self,
    id: JobId,
    delay: Option<StdDuration>,
  ) -> Result<bool, StorageError> {
    let job = self.get_job(id).await?;
    if !job.state.is_terminal() {
      return Err(StorageError::InvalidTransition {
        id,
        from: job.state,
        action: "reschedule after finish",
      });
    }

    let now = Utc::now();
    let (next_time, next_repeat) = if let Some(delay) = delay {
      (delay_from_now(delay)?, job.repeat)
    } else if job.state == State::Failed && job.retry_interval.is_some() {
      let retry = job.retry_interval.unwrap_or_default();
      (delay_from_now(retry)?, job.repeat)
    } else if job.state == State::Completed && job.repeat.wants_reschedule() {
      (delay_from_now(job.interval)?, job.repeat.decremented())
    } else {
      return Ok(false);
    };

    let next_state = if next_time <= now { State::Queued } else { State::Scheduled };
    sqlx::query(
      "UPDATE jobs SET state = ?, scheduled_time = ?, repeat = ?, progress = 0, \
       total_progress = 0, result = NULL, exception = NULL, traceback = NULL, \
       worker_host = NULL, worker_process = NULL, worker_thread = NULL, time_updated = ? \
       WHERE id = ?",
    )
    .bind(next_state.as_str())
    .bind(next_time)
    .bind(next_repeat.to_db())
    .bind(now)
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;

    debug!(job_id = %id, next_run = %next_time, state = %next_state, "Re-scheduled finished job.");
    Ok(true)
  }

  /// Replaces a FAILED or CANCELED job with a fresh queued occurrence of the
  /// same definition (same id, arguments, and schedule policy).
  pub async fn restart_job(&self, id: JobId) -> Result<(), StorageError> {
    let now = Utc::now();
    // The source states are part of the statement, so a row claimed by a
    // concurrent worker between any earlier read and this write is never
    // stomped back to 'queued'.
    let result = sqlx::query(
      "UPDATE jobs SET state = 'queued', scheduled_time = ?, progress = 0, total_progress = 0, \
       result = NULL, exception = NULL, traceback = NULL, worker_host = NULL, \
       worker_process = NULL, worker_thread = NULL, time_created = ?, time_updated = ? \
       WHERE id = ? AND state IN ('failed', 'canceled')",
    )
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(id.to_string())
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      let job = self.get_job(id).await?;
      return Err(StorageError::JobNotRestartable { id, state: job.state });
    }
    Ok(())
  }

  /// Deletes job rows. Without `force` only terminal rows are deleted; with
  /// `force` live rows (including running ones) are deleted as well. Returns
  /// the number of rows removed.
  pub async fn clear(
    &self,
    queue: Option<&str>,
    id: Option<JobId>,
    force: bool,
  ) -> Result<u64, StorageError> {
    let result = sqlx::query(
      "DELETE FROM jobs WHERE (?1 IS NULL OR queue = ?1) AND (?2 IS NULL OR id = ?2) \
       AND (?3 OR state IN ('completed', 'failed', 'canceled'))",
    )
    .bind(queue)
    .bind(id.map(|i| i.to_string()))
    .bind(force)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected())
  }

  // --- Internals ---

  /// Turns a zero-rows-affected guarded transition into a descriptive error.
  async fn check_transition(
    &self,
    rows_affected: u64,
    id: JobId,
    action: &'static str,
  ) -> Result<(), StorageError> {
    if rows_affected > 0 {
      return Ok(());
    }
    let job = self.get_job(id).await?;
    Err(StorageError::InvalidTransition {
      id,
      from: job.state,
      action,
    })
  }
}

impl std::fmt::Debug for JobStorage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobStorage").finish_non_exhaustive()
  }
}

fn delay_from_now(delay: StdDuration) -> Result<DateTime<Utc>, StorageError> {
  let delta = ChronoDuration::from_std(delay)
    .map_err(|e| StorageError::InvalidArgument(format!("delay out of range: {e}")))?;
  Utc::now()
    .checked_add_signed(delta)
    .ok_or_else(|| StorageError::InvalidArgument("delay overflows the time axis".to_string()))
}
