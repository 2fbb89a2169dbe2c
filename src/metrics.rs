use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile information.
/// Uses `Relaxed` ordering for potentially higher performance where strict
/// inter-metric consistency isn't critical.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize, // Store sum of durations in microseconds
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    // Use saturating conversion to prevent overflow panic on absurd durations
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Gets the total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Internal state for tracking engine metrics using atomic counters.
///
/// This struct is cloned and shared between the engine handle, the scheduler
/// loop, and the worker pool. Cloning only clones the `Arc`s, allowing shared
/// access to the underlying atomic values.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
  // --- Counters (Monotonically increasing) ---
  /// Total number of jobs accepted through the submission API.
  pub jobs_enqueued: Arc<AtomicUsize>,
  /// Total number of jobs claimed from the store by the worker pool.
  pub jobs_claimed: Arc<AtomicUsize>,
  /// Total number of job executions that completed successfully.
  pub jobs_completed: Arc<AtomicUsize>,
  /// Total number of job executions that failed (returned an error).
  pub jobs_failed: Arc<AtomicUsize>,
  /// Total number of job executions that panicked.
  pub jobs_panicked: Arc<AtomicUsize>,
  /// Total number of failure retries written back to the store.
  pub jobs_retried: Arc<AtomicUsize>,
  /// Total number of repeat occurrences written back after success.
  pub jobs_rescheduled: Arc<AtomicUsize>,
  /// Total number of jobs that reached the canceled state.
  pub jobs_canceled: Arc<AtomicUsize>,

  // --- Gauges (Current state values) ---
  /// Current number of workers actively executing a job.
  pub workers_active_current: Arc<AtomicUsize>,

  // --- Histograms/Summaries ---
  /// Histogram tracking the execution duration of jobs (in microseconds).
  pub job_execution_duration: Arc<SimpleHistogram>,
}

impl EngineMetrics {
  /// Creates a new `EngineMetrics` instance with all counters initialized to zero.
  pub fn new() -> Self {
    Self {
      jobs_enqueued: Default::default(),
      jobs_claimed: Default::default(),
      jobs_completed: Default::default(),
      jobs_failed: Default::default(),
      jobs_panicked: Default::default(),
      jobs_retried: Default::default(),
      jobs_rescheduled: Default::default(),
      jobs_canceled: Default::default(),
      workers_active_current: Default::default(),
      job_execution_duration: Arc::new(SimpleHistogram::default()),
    }
  }

  /// Creates a snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    // Relaxed is fine for point-in-time snapshots; precise correlation between
    // counters at the snapshot instant is not required.
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_enqueued: self.jobs_enqueued.load(order),
      jobs_claimed: self.jobs_claimed.load(order),
      jobs_completed: self.jobs_completed.load(order),
      jobs_failed: self.jobs_failed.load(order),
      jobs_panicked: self.jobs_panicked.load(order),
      jobs_retried: self.jobs_retried.load(order),
      jobs_rescheduled: self.jobs_rescheduled.load(order),
      jobs_canceled: self.jobs_canceled.load(order),
      workers_active_current: self.workers_active_current.load(order),
      job_execution_duration_count: self.job_execution_duration.get_count(),
      job_execution_duration_sum_micros: self.job_execution_duration.get_sum_micros(),
    }
  }
}

impl Default for EngineMetrics {
  fn default() -> Self {
    Self::new()
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the engine's metrics at a specific point in time.
///
/// This struct contains plain data types and can be easily cloned, serialized,
/// or used for monitoring and analysis.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_enqueued: usize,
  pub jobs_claimed: usize,
  pub jobs_completed: usize,
  pub jobs_failed: usize,
  pub jobs_panicked: usize,
  pub jobs_retried: usize,
  pub jobs_rescheduled: usize,
  pub jobs_canceled: usize,
  // Gauges
  pub workers_active_current: usize,
  // Histogram Data
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Calculates the mean job execution duration in microseconds, if any jobs completed.
  /// Returns `None` if `job_execution_duration_count` is zero.
  pub fn mean_execution_duration_micros(&self) -> Option<f64> {
    if self.job_execution_duration_count == 0 {
      None
    } else {
      Some(self.job_execution_duration_sum_micros as f64 / self.job_execution_duration_count as f64)
    }
  }

  /// Calculates the mean job execution duration, if any jobs completed.
  /// Returns `None` if `job_execution_duration_count` is zero.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    self
      .mean_execution_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
