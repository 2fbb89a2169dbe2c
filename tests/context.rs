//! tests/context.rs
//! JobContext capabilities: progress tracking, metadata, capability gating.

mod common;

use common::*;

use std::time::Duration as StdDuration;

use serde_json::json;
use taskmill::{
  JobContext, JobFuture, JobOutcome, JobRegistry, JobRequest, JobStorage, State,
};

// A job that reports progress 3/10 and then waits to be observed.
fn progress_job() -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
  move |ctx: JobContext| {
    Box::pin(async move {
      ctx.update_progress(3, 10).await?;
      tokio::time::sleep(StdDuration::from_millis(400)).await;
      ctx.update_progress(10, 10).await?;
      Ok(JobOutcome::Complete(json!(null)))
    }) as JobFuture
  }
}

#[tokio::test]
async fn progress_updates_are_visible_while_running() {
  setup_tracing();

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register("test.progress", progress_job());
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .enqueue(JobRequest::new("test.progress").track_progress(true))
    .await
    .expect("Enqueue failed");

  // Observe the intermediate progress report while the job sleeps.
  let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
  loop {
    let job = mill.get_job(id).await.expect("Job should exist");
    if job.progress == 3 {
      assert_eq!(job.total_progress, 10);
      assert_eq!(job.state, State::Running);
      break;
    }
    assert!(
      tokio::time::Instant::now() < deadline,
      "Never observed intermediate progress (state '{}', progress {})",
      job.state,
      job.progress
    );
    tokio::time::sleep(StdDuration::from_millis(10)).await;
  }

  let job = wait_for_state(&mill, id, State::Completed, StdDuration::from_secs(5)).await;
  assert_eq!(job.progress, 10);
  assert_eq!(job.total_progress, 10);

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn progress_without_the_flag_is_rejected() {
  setup_tracing();

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register("test.progress", progress_job());
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  // Same function, but the request does not opt in to progress tracking.
  let id = mill
    .enqueue(JobRequest::new("test.progress"))
    .await
    .expect("Enqueue failed");

  let job = wait_for_state(&mill, id, State::Failed, StdDuration::from_secs(5)).await;
  assert_eq!(job.exception.as_deref(), Some("ContextError"));
  assert!(
    job
      .traceback
      .as_deref()
      .is_some_and(|t| t.contains("not supported")),
    "Error should name the missing capability, got {:?}",
    job.traceback
  );
  assert_eq!(job.progress, 0, "No progress may be written without the flag");

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn check_for_cancel_without_the_flag_is_rejected() {
  setup_tracing();

  let not_cancellable = move |ctx: JobContext| {
    Box::pin(async move {
      // Capability was not requested, so this must error.
      let _ = ctx.check_for_cancel()?;
      Ok(JobOutcome::Complete(json!(null)))
    }) as JobFuture
  };

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register("test.poll", not_cancellable);
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .enqueue(JobRequest::new("test.poll"))
    .await
    .expect("Enqueue failed");

  let job = wait_for_state(&mill, id, State::Failed, StdDuration::from_secs(5)).await;
  assert_eq!(job.exception.as_deref(), Some("ContextError"));

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}

#[tokio::test]
async fn save_meta_merges_with_submitted_metadata() {
  setup_tracing();

  let meta_writer = move |ctx: JobContext| {
    Box::pin(async move {
      let mut meta = serde_json::Map::new();
      meta.insert("stage".to_string(), json!("done"));
      meta.insert("rows".to_string(), json!(42));
      ctx.save_meta(meta).await?;
      Ok(JobOutcome::Complete(json!(null)))
    }) as JobFuture
  };

  let storage = JobStorage::in_memory().await.unwrap();
  let registry = JobRegistry::new().register("test.meta", meta_writer);
  let mill = build_mill(storage, registry, 1, 0).expect("Engine build failed");

  let id = mill
    .enqueue(
      JobRequest::new("test.meta")
        .with_metadata("origin", json!("test"))
        .with_metadata("stage", json!("submitted")),
    )
    .await
    .expect("Enqueue failed");

  let job = wait_for_state(&mill, id, State::Completed, StdDuration::from_secs(5)).await;

  // Submitted keys survive; overlapping keys take the job's value.
  assert_eq!(job.extra_metadata.get("origin"), Some(&json!("test")));
  assert_eq!(job.extra_metadata.get("stage"), Some(&json!("done")));
  assert_eq!(job.extra_metadata.get("rows"), Some(&json!(42)));

  mill.shutdown_graceful(None).await.expect("Graceful shutdown failed");
}
