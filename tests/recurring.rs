//! tests/recurring.rs
//! Repeat occurrences and automatic failure retry.

mod common;

use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::json;
use taskmill::{
  JobContext, JobFailure, JobFuture, JobOutcome, JobRegistry, JobRequest, JobStorage, Repeat,
  State,
};

// Polls until `counter` reaches `target`, panicking on timeout.
async fn wait_for_count(counter: &AtomicUsize, target: usize, timeout: StdDuration) {
  let deadline = tokio::time::Instant::now() + timeout;
  while counter.load(Ordering::SeqCst) < target {
    assert!(
      tokio::time::Instant::now() < deadline,
      "timed out waiting for {target} executions (saw {})",
      counter.load(Ordering::SeqCst)
    );
    tokio::time::sleep(StdDuration::from_millis(20)).await;
  }
}

#[tokio::test]
async fn repeating_job_runs_each_occurrence_then_finishes() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.count",
    counter_job(counter.clone(), StdDuration::ZERO, true),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  // First run now, then two further occurrences one second apart.
  let id = mill
    .schedule(
      Utc::now(),
      JobRequest::new("test.count"),
      StdDuration::from_secs(1),
      Repeat::Times(2),
      None,
    )
    .await
    .expect("Schedule failed");

  wait_for_count(&counter, 3, StdDuration::from_secs(8)).await;

  // No fourth occurrence may appear once the repeat budget is spent.
  tokio::time::sleep(StdDuration::from_millis(1500)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 3, "Repeat budget is exhausted");

  let job = mill.get_job(id).await.expect("Job should exist");
  assert_eq!(job.state, State::Completed);
  assert_eq!(job.repeat, Repeat::Times(0));
  assert!(!job.is_repeating());
  assert_eq!(mill.metrics_snapshot().jobs_rescheduled, 2);

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn failed_run_retries_until_it_succeeds() {
  setup_tracing();
  let attempts = Arc::new(AtomicUsize::new(0));

  // Fails twice, then succeeds.
  let attempts_clone = attempts.clone();
  let flaky = move |_ctx: JobContext| {
    let attempts = attempts_clone.clone();
    Box::pin(async move {
      let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(attempt = n, "Flaky job executing");
      if n < 3 {
        Err(JobFailure::new("TestFailure", "not yet"))
      } else {
        Ok(JobOutcome::Complete(json!(n)))
      }
    }) as JobFuture
  };

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register("test.flaky", flaky);
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .schedule(
      Utc::now(),
      JobRequest::new("test.flaky"),
      StdDuration::ZERO,
      Repeat::Times(0),
      Some(StdDuration::from_secs(1)),
    )
    .await
    .expect("Schedule failed");

  wait_for_count(&attempts, 3, StdDuration::from_secs(10)).await;
  let job = wait_for_state(&mill, id, State::Completed, StdDuration::from_secs(5)).await;

  assert_eq!(job.result, Some(json!(3)));
  assert!(job.exception.is_none(), "Retry that succeeds clears the failure");
  assert!(mill.metrics_snapshot().jobs_retried >= 2);

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn failure_without_retry_interval_is_terminal() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.fail",
    counter_job(counter.clone(), StdDuration::ZERO, false),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  // Repeating schedule, but no retry policy: a failure ends the series.
  let id = mill
    .schedule(
      Utc::now(),
      JobRequest::new("test.fail"),
      StdDuration::from_secs(1),
      Repeat::Times(3),
      None,
    )
    .await
    .expect("Schedule failed");

  let job = wait_for_state(&mill, id, State::Failed, StdDuration::from_secs(5)).await;
  assert_eq!(job.repeat, Repeat::Times(3), "Failure must not consume occurrences");

  tokio::time::sleep(StdDuration::from_millis(1500)).await;
  assert_eq!(
    counter.load(Ordering::SeqCst),
    1,
    "Failed job without retry policy must not run again"
  );
  assert_eq!(
    mill.get_job(id).await.expect("Job should exist").state,
    State::Failed
  );

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn forever_job_keeps_producing_occurrences() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.count",
    counter_job(counter.clone(), StdDuration::ZERO, true),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .schedule(
      Utc::now(),
      JobRequest::new("test.count"),
      StdDuration::from_secs(1),
      Repeat::Forever,
      None,
    )
    .await
    .expect("Schedule failed");

  wait_for_count(&counter, 2, StdDuration::from_secs(8)).await;

  let job = mill.get_job(id).await.expect("Job should exist");
  assert_eq!(job.repeat, Repeat::Forever, "Forever never decrements");
  assert!(job.is_repeating());

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn repeating_schedule_requires_a_positive_interval() {
  setup_tracing();

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.count",
    counter_job(Arc::new(AtomicUsize::new(0)), StdDuration::ZERO, true),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let result = mill
    .schedule(
      Utc::now(),
      JobRequest::new("test.count"),
      StdDuration::ZERO,
      Repeat::Forever,
      None,
    )
    .await;
  assert!(result.is_err(), "Zero interval with repeat must be rejected");

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}
