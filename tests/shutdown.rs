//! tests/shutdown.rs
//! Graceful drain, forced stop, and durability across engine restarts.

mod common;

use common::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use taskmill::{JobRegistry, JobRequest, JobStorage, State};

#[tokio::test]
async fn graceful_shutdown_waits_for_in_flight_jobs() {
  setup_tracing();
  let flag = Arc::new(AtomicBool::new(false));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.slow",
    flag_job(flag.clone(), StdDuration::from_millis(400)),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .enqueue(JobRequest::new("test.slow"))
    .await
    .expect("Enqueue failed");
  // Let the job get claimed and start executing.
  tokio::time::sleep(StdDuration::from_millis(150)).await;

  mill
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .expect("Graceful shutdown failed");

  assert!(
    flag.load(Ordering::SeqCst),
    "Graceful shutdown must let the in-flight job finish"
  );
  let job = mill.get_job(id).await.expect("Job should exist");
  assert_eq!(job.state, State::Completed);
}

#[tokio::test]
async fn graceful_shutdown_leaves_queued_work_untouched() {
  setup_tracing();
  let flag = Arc::new(AtomicBool::new(false));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register("test.flag", flag_job(flag.clone(), StdDuration::ZERO));
  let mill = build_mill(storage.clone(), registry, 1, 0).expect("Engine build failed");

  // Not yet due; the pool has nothing in flight to drain.
  let id = mill
    .enqueue_in(StdDuration::from_millis(600), JobRequest::new("test.flag"))
    .await
    .expect("Enqueue failed");

  mill
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .expect("Graceful shutdown failed");

  let job = storage.get_job(id).await.expect("Job should exist");
  assert_eq!(job.state, State::Scheduled, "The row must survive shutdown");
  assert!(!flag.load(Ordering::SeqCst));

  // A fresh engine over the same store resumes the stored job.
  let registry = JobRegistry::new().register("test.flag", flag_job(flag.clone(), StdDuration::ZERO));
  let mill2 = build_mill(storage, registry, 1, 0).expect("Engine build failed");
  wait_for_state(&mill2, id, State::Completed, StdDuration::from_secs(5)).await;
  assert!(flag.load(Ordering::SeqCst), "The restarted engine should run the job");

  mill2.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn forced_shutdown_returns_promptly() {
  setup_tracing();
  let flag = Arc::new(AtomicBool::new(false));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.endless",
    flag_job(flag.clone(), StdDuration::from_secs(30)),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  mill
    .enqueue(JobRequest::new("test.endless"))
    .await
    .expect("Enqueue failed");
  tokio::time::sleep(StdDuration::from_millis(150)).await;

  let start = tokio::time::Instant::now();
  mill
    .shutdown_force(Some(StdDuration::from_secs(5)))
    .await
    .expect("Forced shutdown failed");
  assert!(
    start.elapsed() < StdDuration::from_secs(5),
    "Forced shutdown must not wait for the 30s job"
  );
  assert!(!flag.load(Ordering::SeqCst), "The aborted job must not have finished");
}

#[tokio::test]
async fn forced_shutdown_aborts_the_job_and_records_cancellation() {
  setup_tracing();
  let flag = Arc::new(AtomicBool::new(false));

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register(
    "test.slow",
    flag_job(flag.clone(), StdDuration::from_millis(600)),
  );
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .enqueue(JobRequest::new("test.slow"))
    .await
    .expect("Enqueue failed");
  tokio::time::sleep(StdDuration::from_millis(150)).await;

  mill
    .shutdown_force(Some(StdDuration::from_secs(5)))
    .await
    .expect("Forced shutdown failed");

  // Wait well past the job's natural duration: an aborted job task must not
  // keep running in the background.
  tokio::time::sleep(StdDuration::from_millis(900)).await;
  assert!(
    !flag.load(Ordering::SeqCst),
    "Job task kept running after forced shutdown"
  );

  // The row is reconciled, not stranded in 'running'.
  let job = mill.get_job(id).await.expect("Job should exist");
  assert_eq!(
    job.state,
    State::Canceled,
    "Forced shutdown must record the aborted job as canceled"
  );
  // A canceled row stays recoverable through the normal surface.
  mill.restart_job(id).await.expect("Restart of the aborted job failed");
}

#[tokio::test]
async fn shutdown_twice_is_harmless() {
  setup_tracing();

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new();
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  mill
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .expect("First shutdown failed");
  // Second call finds no tasks left to join.
  mill
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .expect("Second shutdown failed");
}
