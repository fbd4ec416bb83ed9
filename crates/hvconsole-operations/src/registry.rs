// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation registry.
//!
//! Maps operation IDs to completion callbacks and delivers each callback
//! exactly once, when the operation reaches a terminal status. The registry
//! is an explicit object shared by `Arc` between the poller and whoever
//! submits operations; there is no process-wide instance.
//!
//! Entries are removed from the map before their callback runs, and no map
//! lock is held while a callback executes. A callback may therefore register
//! or dispatch other operations, and a panicking callback cannot cause a
//! second delivery.

use dashmap::DashMap;
use tracing::debug;

use crate::types::{OperationOutcome, OperationStatus};

/// Callback invoked once with the terminal outcome of an operation.
pub type CompletionCallback = Box<dyn FnOnce(OperationOutcome) + Send + Sync + 'static>;

/// Table of live registrations keyed by operation ID.
#[derive(Default)]
pub struct OperationRegistry {
    registrations: DashMap<String, CompletionCallback>,
}

impl OperationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion callback for an operation.
    ///
    /// A second registration for the same ID replaces the first; the replaced
    /// callback is dropped without being called. Returns `true` if a
    /// registration was replaced.
    pub fn register<F>(&self, id: impl Into<String>, on_complete: F) -> bool
    where
        F: FnOnce(OperationOutcome) + Send + Sync + 'static,
    {
        let id = id.into();
        debug!(operation_id = %id, "Registering operation");
        self.registrations
            .insert(id, Box::new(on_complete))
            .is_some()
    }

    /// Register separate success, failure and finally callbacks.
    ///
    /// `on_finally` always runs after `on_success` or `on_failure`.
    pub fn register_callbacks<S, F, Z>(
        &self,
        id: impl Into<String>,
        on_success: S,
        on_failure: F,
        on_finally: Z,
    ) -> bool
    where
        S: FnOnce() + Send + Sync + 'static,
        F: FnOnce(String) + Send + Sync + 'static,
        Z: FnOnce() + Send + Sync + 'static,
    {
        self.register(id, move |outcome| {
            match outcome {
                OperationOutcome::Success => on_success(),
                OperationOutcome::Failed(message) => on_failure(message),
            }
            on_finally();
        })
    }

    /// Deliver a status for an operation.
    ///
    /// Non-terminal statuses and unknown IDs are ignored. For a terminal
    /// status the registration is removed and its callback invoked. Returns
    /// `true` if a callback was invoked.
    pub fn dispatch(&self, id: &str, status: OperationStatus, message: Option<&str>) -> bool {
        if !status.is_terminal() {
            return false;
        }

        let Some((_, callback)) = self.registrations.remove(id) else {
            return false;
        };

        let outcome = match status {
            OperationStatus::Success => OperationOutcome::Success,
            OperationStatus::Cancelled => OperationOutcome::Failed(
                message.unwrap_or("operation cancelled").to_string(),
            ),
            _ => OperationOutcome::Failed(message.unwrap_or("operation failed").to_string()),
        };

        debug!(operation_id = %id, status = %status, "Dispatching operation outcome");
        callback(outcome);
        true
    }

    /// Check whether an operation has a live registration.
    pub fn is_registered(&self, id: &str) -> bool {
        self.registrations.contains_key(id)
    }

    /// Snapshot of all registered operation IDs.
    pub fn tracked_ids(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Check if there are no live registrations.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Drop every registration without invoking it.
    ///
    /// Returns the number of registrations dropped.
    pub fn dispose(&self) -> usize {
        let dropped = self.registrations.len();
        self.registrations.clear();
        if dropped > 0 {
            debug!(dropped, "Disposed operation registry");
        }
        dropped
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}
