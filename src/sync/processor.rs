//! Drains the sync queue against the backend.

use chrono::SecondsFormat;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::operation::{OperationKind, OperationState, QueuedOperation};
use super::queue::SyncQueue;
use crate::clock::{Clock, SystemClock};
use crate::remote::types::SavePayload;
use crate::remote::RemoteService;

/// An operation dropped after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
  pub id: String,
  pub kind: OperationKind,
  pub error: String,
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub successful: usize,
  pub failed: usize,
  pub errors: Vec<SyncFailure>,
}

/// Applies queued operations to the backend with bounded retries.
///
/// A pass never schedules anything itself: an operation that fails is only
/// retried when `process_sync_queue` is called again.
pub struct SyncProcessor<R: RemoteService> {
  queue: SyncQueue,
  remote: R,
  clock: Arc<dyn Clock>,
}

impl<R: RemoteService> SyncProcessor<R> {
  pub fn new(queue: SyncQueue, remote: R) -> Self {
    Self {
      queue,
      remote,
      clock: Arc::new(SystemClock),
    }
  }

  #[allow(dead_code)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Apply every operation queued at call start, one at a time.
  ///
  /// Operations queued while the pass runs wait for the next pass.
  pub async fn process_sync_queue(&self) -> SyncReport {
    let pending = self.queue.pending_operations();
    let mut report = SyncReport::default();

    if pending.is_empty() {
      return report;
    }
    debug!(pending = pending.len(), "processing sync queue");

    for mut op in pending {
      match self.apply(&op).await {
        Ok(()) => {
          self.queue.remove(&op.id);
          debug!(id = %op.id, kind = %op.kind, state = ?OperationState::Applied, "applied queued operation");
          report.successful += 1;
        }
        Err(e) => {
          let error = match op.record_failure() {
            OperationState::Pending(attempts) => {
              if self.queue.update(&op) {
                debug!(id = %op.id, attempts, "queued operation failed, will retry: {}", e);
                continue;
              }
              // Retry count lost: drop instead of retrying unbounded
              format!("{} (retry count could not be saved)", e)
            }
            _ => e.to_string(),
          };

          self.queue.remove(&op.id);
          warn!(
            id = %op.id,
            kind = %op.kind,
            attempts = op.retry_count,
            "Dropping queued operation: {}",
            error
          );
          report.failed += 1;
          report.errors.push(SyncFailure {
            id: op.id,
            kind: op.kind,
            error,
          });
        }
      }
    }

    info!(
      successful = report.successful,
      failed = report.failed,
      remaining = self.queue.get_pending_sync_count(),
      "sync pass finished"
    );
    report
  }

  async fn apply(&self, op: &QueuedOperation) -> Result<()> {
    match op.kind {
      OperationKind::Save => {
        let payload: SavePayload = serde_json::from_value(op.data.clone())
          .map_err(|e| eyre!("Invalid save payload: {}", e))?;
        let updated_at = self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let (id, update) = payload.into_update(updated_at);
        self.remote.update_submission(&id, &update).await
      }
      OperationKind::Submit => self.remote.insert_submission(&op.data).await,
    }
  }
}
