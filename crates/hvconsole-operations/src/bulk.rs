// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk submission with a single aggregate result.
//!
//! [`run_bulk`] submits every item, tracks each returned operation through
//! the [`OperationRegistry`], and resolves once all items have reached a
//! terminal outcome. Slots keep input order regardless of completion order.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::ConsoleClient;
use crate::error::Result;
use crate::registry::OperationRegistry;
use crate::types::{BulkItemResult, BulkRequestResult, InstanceAction, InstanceStateChange};

/// Rejection message for slots whose registration was dropped before it
/// could complete, e.g. because the registry was disposed.
pub const TRACKING_STOPPED_MESSAGE: &str = "operation tracking stopped before completion";

/// Submit every item and wait until each one has a terminal outcome.
///
/// Submissions run concurrently. `submit` either fails locally (the slot is rejected with the error's
/// message and nothing is registered) or returns an operation ID that is
/// registered with `registry` as soon as that submission resolves. The returned future completes once the number
/// of completed slots equals `items.len()`; something must be driving the
/// registry (usually an [`OperationPoller`](crate::OperationPoller)).
pub async fn run_bulk<T, F, Fut, E>(
    registry: &Arc<OperationRegistry>,
    items: &[T],
    submit: F,
) -> BulkRequestResult
where
    F: Fn(&T) -> Fut,
    Fut: Future<Output = std::result::Result<String, E>>,
    E: Display,
{
    let total = items.len();
    let mut slots: Vec<Option<BulkItemResult>> = vec![None; total];
    if total == 0 {
        return BulkRequestResult::default();
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, BulkItemResult)>();
    let mut completed = 0usize;

    let mut submissions: FuturesUnordered<_> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let submission = submit(item);
            async move { (index, submission.await) }
        })
        .collect();

    // Register each ID as soon as its submit resolves so a fast operation
    // is tracked while slower siblings are still submitting.
    while let Some((index, submission)) = submissions.next().await {
        match submission {
            Ok(operation_id) => {
                debug!(index, operation_id = %operation_id, "Tracking bulk item");
                let tx = tx.clone();
                registry.register(operation_id, move |outcome| {
                    let _ = tx.send((index, BulkItemResult::from(outcome)));
                });
            }
            Err(e) => {
                debug!(index, error = %e, "Bulk item rejected locally");
                slots[index] = Some(BulkItemResult::Rejected(e.to_string()));
                completed += 1;
            }
        }
    }
    // Only registrations hold senders from here on.
    drop(tx);

    while completed < total {
        match rx.recv().await {
            Some((index, result)) => {
                if slots[index].is_none() {
                    slots[index] = Some(result);
                    completed += 1;
                }
            }
            None => break,
        }
    }

    let result = BulkRequestResult::from(
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| BulkItemResult::Rejected(TRACKING_STOPPED_MESSAGE.into()))
            })
            .collect::<Vec<_>>(),
    );

    info!(
        total,
        fulfilled = result.fulfilled_count(),
        rejected = result.rejected_count(),
        "Bulk request complete"
    );
    result
}

/// Instance actions that can be applied in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Delete,
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

impl BulkAction {
    /// Parse a CLI verb.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "delete" => Some(BulkAction::Delete),
            "start" => Some(BulkAction::Start),
            "stop" => Some(BulkAction::Stop),
            "restart" => Some(BulkAction::Restart),
            "freeze" => Some(BulkAction::Freeze),
            "unfreeze" => Some(BulkAction::Unfreeze),
            _ => None,
        }
    }

    /// Past tense used in summaries.
    pub fn past_tense(&self) -> &'static str {
        match self {
            BulkAction::Delete => "deleted",
            BulkAction::Start => "started",
            BulkAction::Stop => "stopped",
            BulkAction::Restart => "restarted",
            BulkAction::Freeze => "frozen",
            BulkAction::Unfreeze => "unfrozen",
        }
    }

    fn state_action(&self) -> Option<InstanceAction> {
        match self {
            BulkAction::Delete => None,
            BulkAction::Start => Some(InstanceAction::Start),
            BulkAction::Stop => Some(InstanceAction::Stop),
            BulkAction::Restart => Some(InstanceAction::Restart),
            BulkAction::Freeze => Some(InstanceAction::Freeze),
            BulkAction::Unfreeze => Some(InstanceAction::Unfreeze),
        }
    }

    /// Submit this action for one instance, returning the operation ID.
    pub async fn submit(
        &self,
        client: &ConsoleClient,
        instance: &str,
        force: bool,
        timeout: Option<i32>,
    ) -> Result<String> {
        match self.state_action() {
            None => client.delete_instance(instance).await,
            Some(action) => {
                let mut change = InstanceStateChange::new(action).with_force(force);
                if let Some(seconds) = timeout {
                    change = change.with_timeout(seconds);
                }
                client.update_instance_state(instance, change).await
            }
        }
    }
}
