// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Management API abstraction used by the poller.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Operation;

/// Source of operation state.
///
/// The poller only needs to list operations, so it depends on this trait
/// rather than on [`ConsoleClient`](crate::ConsoleClient) directly.
#[async_trait]
pub trait OperationsApi: Send + Sync {
    /// Fetch every operation the server currently knows about.
    ///
    /// Operations of one status group keep the server's order. Groups are
    /// concatenated in status-name order, so no ordering holds across
    /// groups.
    async fn list_operations(&self) -> Result<Vec<Operation>>;
}
