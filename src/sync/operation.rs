//! Queued mutations and their retry state.

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Attempts allowed before an operation is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What a queued operation does on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  /// Update an existing form submission
  Save,
  /// Insert a new form submission
  Submit,
}

impl OperationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Save => "save",
      Self::Submit => "submit",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OperationKind {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "save" => Ok(Self::Save),
      "submit" => Ok(Self::Submit),
      other => Err(eyre!(
        "Unknown operation type '{}' (expected save or submit)",
        other
      )),
    }
  }
}

/// A mutation waiting to reach the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: OperationKind,
  pub data: Value,
  /// When the operation was queued (epoch ms)
  pub timestamp: i64,
  pub retry_count: u32,
  pub max_retries: u32,
}

/// Caller-supplied part of a queued operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: OperationKind,
  pub data: Value,
}

impl NewOperation {
  pub fn new(id: impl Into<String>, kind: OperationKind, data: Value) -> Self {
    Self {
      id: id.into(),
      kind,
      data,
    }
  }
}

/// Where an operation stands after a processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
  /// Still queued, with this many failed attempts so far
  Pending(u32),
  /// Reached the backend; leaves the queue
  Applied,
  /// Out of retries; leaves the queue
  Dropped,
}

impl QueuedOperation {
  pub fn new(op: NewOperation, timestamp: i64, max_retries: u32) -> Self {
    Self {
      id: op.id,
      kind: op.kind,
      data: op.data,
      timestamp,
      retry_count: 0,
      max_retries,
    }
  }

  pub fn state(&self) -> OperationState {
    if self.retry_count >= self.max_retries {
      OperationState::Dropped
    } else {
      OperationState::Pending(self.retry_count)
    }
  }

  /// Count a failed attempt and return the resulting state.
  pub fn record_failure(&mut self) -> OperationState {
    if self.retry_count < self.max_retries {
      self.retry_count += 1;
    }
    self.state()
  }
}
