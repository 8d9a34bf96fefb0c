//! Backend boundary: the hosted REST service behind the sync queue and cache refreshes.

pub mod cached_client;
pub mod client;
pub mod types;

use color_eyre::Result;
use serde_json::Value;
use std::future::Future;

pub use cached_client::CachedClient;
pub use client::RestClient;
pub use types::SubmissionUpdate;

/// Remote operations the sync queue depends on.
///
/// Any error counts as a failed apply and sends the queued operation down
/// the retry path.
pub trait RemoteService: Send + Sync {
  /// Update the form submission with the given id.
  fn update_submission(
    &self,
    id: &str,
    update: &SubmissionUpdate,
  ) -> impl Future<Output = Result<()>> + Send;

  /// Insert a new form submission record.
  fn insert_submission(&self, record: &Value) -> impl Future<Output = Result<()>> + Send;
}
