use crate::engine::ShutdownMode;
use crate::storage::JobStorage;

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Background loop that promotes due `scheduled` rows to `queued`.
///
/// The store is the durable record of intent: repeat occurrences and retries
/// are written back as `scheduled` rows by the post-finish reschedule, and
/// this loop moves them into the claimable set once their time arrives. The
/// promotion is a single idempotent `UPDATE` per tick, so a restarted process
/// picks up exactly where the previous one left off.
pub(crate) struct Scheduler {
  storage: JobStorage,
  tick: Duration,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
}

impl Scheduler {
  pub(crate) fn new(
    storage: JobStorage,
    tick: Duration,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  ) -> Self {
    Self {
      storage,
      tick,
      shutdown_rx,
    }
  }

  /// Runs the promotion loop until a shutdown signal arrives.
  pub(crate) async fn run(mut self) {
    info!(tick_ms = self.tick.as_millis() as u64, "Scheduler started.");

    loop {
      tokio::select! {
        biased; // Prioritize checking the shutdown signal

        Ok(()) = self.shutdown_rx.changed() => {
          if self.shutdown_rx.borrow().is_some() {
            info!("Scheduler received shutdown signal.");
            break;
          }
        }

        _ = tokio::time::sleep(self.tick) => {
          match self.storage.promote_due_jobs(Utc::now()).await {
            Ok(0) => {}
            Ok(promoted) => debug!(promoted, "Promoted due jobs to the queue."),
            Err(e) => warn!(error = %e, "Failed to promote due jobs."),
          }
        }
      }
    }

    info!("Scheduler task shutting down.");
  }
}
