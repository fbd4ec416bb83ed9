// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire and result types for the operation tracker.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a background operation as reported by the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Queued, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failure,
    /// Cancelled before completion.
    Cancelled,
    /// Any status string this client does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failure | OperationStatus::Cancelled
        )
    }

    /// Map the daemon's numeric status code.
    pub fn from_code(code: u16) -> Self {
        match code {
            105 => OperationStatus::Pending,
            103 => OperationStatus::Running,
            200 => OperationStatus::Success,
            400 => OperationStatus::Failure,
            401 => OperationStatus::Cancelled,
            _ => OperationStatus::Unknown,
        }
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "Pending",
            OperationStatus::Running => "Running",
            OperationStatus::Success => "Success",
            OperationStatus::Failure => "Failure",
            OperationStatus::Cancelled => "Cancelled",
            OperationStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A background operation tracked by the management API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Operation {
    /// Operation ID, assigned by the server.
    pub id: String,
    /// Operation class (`task`, `websocket`, `token`).
    pub class: String,
    /// Human readable description.
    pub description: String,
    /// When the operation was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the operation last changed.
    pub updated_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: OperationStatus,
    /// Numeric status code matching `status`.
    pub status_code: u16,
    /// Resources affected by the operation, keyed by resource type.
    pub resources: Option<BTreeMap<String, Vec<String>>>,
    /// Operation specific metadata.
    pub metadata: Option<serde_json::Value>,
    /// Whether the operation can be cancelled.
    pub may_cancel: bool,
    /// Error string, empty unless the operation failed.
    pub err: String,
    /// Cluster member running the operation.
    pub location: String,
}

impl Operation {
    /// Create an operation with just an ID and status.
    pub fn new(id: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            id: id.into(),
            status,
            ..Self::default()
        }
    }

    /// Set the error string.
    pub fn with_error(mut self, err: impl Into<String>) -> Self {
        self.err = err.into();
        self
    }

    /// The status to act on.
    ///
    /// Falls back to `status_code` when the status string was not recognised.
    pub fn effective_status(&self) -> OperationStatus {
        match self.status {
            OperationStatus::Unknown => OperationStatus::from_code(self.status_code),
            status => status,
        }
    }

    /// The error message, present only for failed operations.
    pub fn error_message(&self) -> Option<&str> {
        if self.effective_status() == OperationStatus::Failure && !self.err.is_empty() {
            Some(&self.err)
        } else {
            None
        }
    }
}

/// Terminal outcome delivered to a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The operation succeeded.
    Success,
    /// The operation failed, was cancelled or was lost.
    Failed(String),
}

impl OperationOutcome {
    /// Check if the outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }

    /// Convert into a plain `Result`.
    pub fn into_result(self) -> std::result::Result<(), String> {
        match self {
            OperationOutcome::Success => Ok(()),
            OperationOutcome::Failed(message) => Err(message),
        }
    }
}

/// Outcome of one item of a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum BulkItemResult {
    /// The item's operation completed successfully.
    Fulfilled,
    /// The item failed locally or remotely.
    Rejected(String),
}

impl BulkItemResult {
    /// Check if the item was fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, BulkItemResult::Fulfilled)
    }
}

impl From<OperationOutcome> for BulkItemResult {
    fn from(outcome: OperationOutcome) -> Self {
        match outcome {
            OperationOutcome::Success => BulkItemResult::Fulfilled,
            OperationOutcome::Failed(message) => BulkItemResult::Rejected(message),
        }
    }
}

/// Per-item outcomes of a bulk submission, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequestResult {
    /// One entry per submitted item.
    pub items: Vec<BulkItemResult>,
}

impl BulkRequestResult {
    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the bulk run had no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of fulfilled items.
    pub fn fulfilled_count(&self) -> usize {
        self.items.iter().filter(|r| r.is_fulfilled()).count()
    }

    /// Number of rejected items.
    pub fn rejected_count(&self) -> usize {
        self.items.len() - self.fulfilled_count()
    }

    /// Check if every item was fulfilled.
    pub fn is_all_fulfilled(&self) -> bool {
        self.items.iter().all(BulkItemResult::is_fulfilled)
    }

    /// Rejected items with their input index.
    pub fn rejections(&self) -> impl Iterator<Item = (usize, &str)> {
        self.items.iter().enumerate().filter_map(|(i, r)| match r {
            BulkItemResult::Rejected(message) => Some((i, message.as_str())),
            BulkItemResult::Fulfilled => None,
        })
    }

    /// One line summary such as `"4 instances deleted, 1 failed"`.
    pub fn summary(&self, noun: &str, verb_past: &str) -> String {
        let fulfilled = self.fulfilled_count();
        let rejected = self.rejected_count();
        let plural = if fulfilled == 1 { "" } else { "s" };
        if rejected == 0 {
            format!("{} {}{} {}", fulfilled, noun, plural, verb_past)
        } else {
            format!("{} {}{} {}, {} failed", fulfilled, noun, plural, verb_past, rejected)
        }
    }
}

impl From<Vec<BulkItemResult>> for BulkRequestResult {
    fn from(items: Vec<BulkItemResult>) -> Self {
        Self { items }
    }
}

/// Kind of response envelope returned by the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// The request completed synchronously.
    Sync,
    /// The request started a background operation.
    Async,
    /// The request failed.
    Error,
}

/// Standard response envelope of the management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    /// Status text for sync/async responses.
    #[serde(default)]
    pub status: String,
    /// Status code for sync/async responses.
    #[serde(default)]
    pub status_code: u16,
    /// URL of the background operation for async responses.
    #[serde(default)]
    pub operation: String,
    /// HTTP code for error responses.
    #[serde(default)]
    pub error_code: u16,
    /// Error text for error responses.
    #[serde(default)]
    pub error: String,
    /// Response payload.
    pub metadata: Option<T>,
}

/// Result of submitting a request to the management API.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The server finished the request immediately.
    Sync(serde_json::Value),
    /// The server started a background operation.
    Async(Operation),
}

impl Submission {
    /// ID of the background operation, if one was started.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Submission::Async(op) => Some(op.id.as_str()),
            Submission::Sync(_) => None,
        }
    }
}

/// Server details returned by the API root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    /// API version string.
    #[serde(default)]
    pub api_version: String,
    /// Whether this client is trusted (`trusted` / `untrusted`).
    #[serde(default)]
    pub auth: String,
    /// Server environment details.
    #[serde(default)]
    pub environment: ServerEnvironment,
}

/// Subset of the server environment block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerEnvironment {
    /// Daemon version.
    #[serde(default)]
    pub server_version: String,
    /// Host name of the server.
    #[serde(default)]
    pub server_name: String,
    /// Whether the server is part of a cluster.
    #[serde(default)]
    pub server_clustered: bool,
}

/// Instance state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceAction {
    /// Start a stopped instance.
    Start,
    /// Stop a running instance.
    Stop,
    /// Restart a running instance.
    Restart,
    /// Freeze (pause) a running instance.
    Freeze,
    /// Unfreeze a frozen instance.
    Unfreeze,
}

/// Body of an instance state change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateChange {
    /// Requested transition.
    pub action: InstanceAction,
    /// Seconds to wait for a clean shutdown, -1 for the server default.
    pub timeout: i32,
    /// Force the transition.
    pub force: bool,
    /// Keep runtime state across stop/start.
    pub stateful: bool,
}

impl InstanceStateChange {
    /// Create a state change with server defaults.
    pub fn new(action: InstanceAction) -> Self {
        Self {
            action,
            timeout: -1,
            force: false,
            stateful: false,
        }
    }

    /// Force the transition.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the clean shutdown timeout in seconds.
    pub fn with_timeout(mut self, seconds: i32) -> Self {
        self.timeout = seconds;
        self
    }

    /// Preserve runtime state.
    pub fn with_stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }
}
