//! tests/common.rs
//! Shared helper functions for integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use serde_json::json;
use tracing_subscriber::fmt::TestWriter;

use taskmill::{
  BuildError, Job, JobContext, JobFailure, JobFuture, JobId, JobOutcome, JobRegistry, JobStorage,
  State, TaskMill,
};

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds an engine with fast ticks suitable for tests.
pub fn build_mill(
  storage: JobStorage,
  registry: JobRegistry,
  regular_workers: usize,
  high_priority_workers: usize,
) -> Result<TaskMill, BuildError> {
  TaskMill::builder(storage, registry)
    .regular_workers(regular_workers)
    .high_priority_workers(high_priority_workers)
    .scheduler_tick(StdDuration::from_millis(20))
    .worker_tick(StdDuration::from_millis(20))
    .build()
}

// Polls the store until the job reaches `state`, panicking on timeout.
pub async fn wait_for_state(mill: &TaskMill, id: JobId, state: State, timeout: StdDuration) -> Job {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    let job = mill.get_job(id).await.expect("job should exist");
    if job.state == state {
      return job;
    }
    if tokio::time::Instant::now() >= deadline {
      panic!(
        "timed out waiting for job {id} to reach '{state}' (last state '{}')",
        job.state
      );
    }
    tokio::time::sleep(StdDuration::from_millis(10)).await;
  }
}

// Creates a job function that increments a counter, optionally delays,
// and completes or fails depending on `succeeds`.
pub fn counter_job(
  counter: Arc<AtomicUsize>,
  delay: StdDuration,
  succeeds: bool,
) -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
  move |_ctx: JobContext| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(count, succeeds, "Counter job executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      if succeeds {
        Ok(JobOutcome::Complete(json!(count)))
      } else {
        Err(JobFailure::new("TestFailure", "counter job failed on purpose"))
      }
    }) as JobFuture
  }
}

// Creates a job function that sets a flag when executed.
pub fn flag_job(
  flag: Arc<AtomicBool>,
  delay: StdDuration,
) -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
  move |_ctx: JobContext| {
    let flg = flag.clone();
    Box::pin(async move {
      tracing::debug!("Flag job executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      flg.store(true, Ordering::SeqCst);
      Ok(JobOutcome::Complete(json!(null)))
    }) as JobFuture
  }
}

// Creates a job function that panics.
pub fn panic_job() -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
  move |_ctx: JobContext| {
    Box::pin(async move {
      tracing::debug!("Panic job executing...");
      tokio::task::yield_now().await;
      panic!("Job forced panic!");
      // Unreachable, but needed for type check
      #[allow(unreachable_code)]
      Ok(JobOutcome::Complete(json!(null)))
    }) as JobFuture
  }
}

// Creates a job function that records its name into a shared order log.
pub fn order_job(
  order: Arc<Mutex<Vec<String>>>,
  name: &'static str,
  delay: StdDuration,
) -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
  move |_ctx: JobContext| {
    let order = order.clone();
    Box::pin(async move {
      order.lock().unwrap().push(name.to_string());
      tracing::debug!(name, "Order job executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      Ok(JobOutcome::Complete(json!(name)))
    }) as JobFuture
  }
}

// Creates a cancellable job function that polls for cancellation every 10ms.
// Sets `started` when entered and `finished` only if it ran to the end.
pub fn cancellable_job(
  started: Arc<AtomicBool>,
  finished: Arc<AtomicBool>,
) -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
  move |ctx: JobContext| {
    let started = started.clone();
    let finished = finished.clone();
    Box::pin(async move {
      started.store(true, Ordering::SeqCst);
      for _ in 0..500 {
        if ctx.check_for_cancel()? {
          tracing::debug!("Cancellable job observed cancel request");
          return Ok(JobOutcome::Cancelled);
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
      }
      finished.store(true, Ordering::SeqCst);
      Ok(JobOutcome::Complete(json!(null)))
    }) as JobFuture
  }
}
