use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table the sync queue writes to.
pub const FORM_SUBMISSIONS: &str = "form_submissions";

/// Payload of a queued `save`: an edit to an existing submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
  pub submission_id: String,
  pub answers: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub signature: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Value>,
}

/// Body of the update sent for a `save`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionUpdate {
  pub answers: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub signature: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Value>,
  pub updated_at: String,
}

impl SavePayload {
  /// Build the update body, stamped with `updated_at`.
  pub fn into_update(self, updated_at: String) -> (String, SubmissionUpdate) {
    (
      self.submission_id,
      SubmissionUpdate {
        answers: self.answers,
        signature: self.signature,
        metadata: self.metadata,
        updated_at,
      },
    )
  }
}
