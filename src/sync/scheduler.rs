use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::processor::{SyncProcessor, SyncReport};
use crate::remote::RemoteService;

/// Re-runs the sync processor on a timer and on demand.
///
/// Retries happen only through these re-invocations; there is no backoff.
pub struct SyncScheduler<R: RemoteService> {
  processor: SyncProcessor<R>,
  interval: Duration,
  wake: Arc<Notify>,
}

/// Running totals over every pass of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
  pub passes: usize,
  pub successful: usize,
  pub failed: usize,
}

impl SyncTotals {
  fn add(&mut self, report: &SyncReport) {
    self.passes += 1;
    self.successful += report.successful;
    self.failed += report.failed;
  }
}

/// Handle for requesting an immediate pass, e.g. after reconnecting.
#[derive(Clone)]
pub struct SyncTrigger {
  wake: Arc<Notify>,
}

impl SyncTrigger {
  pub fn trigger(&self) {
    self.wake.notify_one();
  }
}

impl<R: RemoteService> SyncScheduler<R> {
  pub fn new(processor: SyncProcessor<R>, interval: Duration) -> Self {
    Self {
      processor,
      interval,
      wake: Arc::new(Notify::new()),
    }
  }

  pub fn trigger_handle(&self) -> SyncTrigger {
    SyncTrigger {
      wake: Arc::clone(&self.wake),
    }
  }

  /// Run passes until `shutdown` becomes true (or its sender is dropped).
  ///
  /// Each pass is logged as it finishes; only the totals are kept.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncTotals {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut totals = SyncTotals::default();

    info!(interval = ?self.interval, "sync scheduler started");
    loop {
      if *shutdown.borrow() {
        break;
      }

      tokio::select! {
        _ = ticker.tick() => {}
        _ = self.wake.notified() => debug!("sync pass triggered"),
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
          continue;
        }
      }

      let report = self.processor.process_sync_queue().await;
      totals.add(&report);
      debug!(pass = totals.passes, ?report, "scheduled sync pass done");
    }

    info!(
      passes = totals.passes,
      successful = totals.successful,
      failed = totals.failed,
      "sync scheduler stopped"
    );
    totals
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::remote::SubmissionUpdate;
  use crate::sync::operation::{NewOperation, OperationKind};
  use crate::sync::queue::SyncQueue;
  use color_eyre::{eyre::eyre, Result};
  use serde_json::{json, Value};

  struct DownRemote;

  impl RemoteService for DownRemote {
    async fn update_submission(&self, _id: &str, _update: &SubmissionUpdate) -> Result<()> {
      Err(eyre!("offline"))
    }

    async fn insert_submission(&self, _record: &Value) -> Result<()> {
      Err(eyre!("offline"))
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_interval_drains_failed_operation() {
    let queue = SyncQueue::new(Database::in_memory());
    queue.add_to_sync_queue(NewOperation::new("op1", OperationKind::Submit, json!({})));
    let scheduler = SyncScheduler::new(
      SyncProcessor::new(queue.clone(), DownRemote),
      Duration::from_secs(30),
    );
    let (tx, rx) = watch::channel(false);

    let stopper = async {
      // First tick is immediate; two more bring the attempts to three
      tokio::time::sleep(Duration::from_secs(75)).await;
      tx.send(true).unwrap();
    };
    let (totals, ()) = tokio::join!(scheduler.run(rx), stopper);

    assert_eq!(
      totals,
      SyncTotals {
        passes: 3,
        successful: 0,
        failed: 1,
      }
    );
    assert_eq!(queue.get_pending_sync_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_trigger_runs_extra_pass() {
    let queue = SyncQueue::new(Database::in_memory());
    let scheduler = SyncScheduler::new(
      SyncProcessor::new(queue.clone(), DownRemote),
      Duration::from_secs(3600),
    );
    let trigger = scheduler.trigger_handle();
    let (tx, rx) = watch::channel(false);

    let driver = async {
      // Let the immediate first tick pass on an empty queue
      tokio::time::sleep(Duration::from_secs(1)).await;
      queue.add_to_sync_queue(NewOperation::new("op1", OperationKind::Submit, json!({})));
      trigger.trigger();
      tokio::time::sleep(Duration::from_secs(1)).await;
      tx.send(true).unwrap();
    };
    let (totals, ()) = tokio::join!(scheduler.run(rx), driver);

    assert_eq!(totals.passes, 2);
    assert_eq!(queue.pending_operations()[0].retry_count, 1);
  }
}
