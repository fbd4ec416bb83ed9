// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! hvconsole Operations
//!
//! Tracking of long-running operations for the hvconsole management client.
//!
//! The management daemon answers many requests (deleting an instance,
//! changing its state, ...) with a background operation instead of a
//! result. This crate correlates those operations with the code waiting on
//! them.
//!
//! # Architecture
//!
//! - [`OperationRegistry`]: operation ID -> completion callback, delivered once
//! - [`OperationPoller`]: lists operations on a fixed interval and feeds the
//!   registry, failing operations that vanish without a terminal status
//! - [`run_bulk`]: submits many requests and resolves with one ordered
//!   [`BulkRequestResult`]
//! - [`ConsoleClient`]: REST client for the daemon, implementing
//!   [`OperationsApi`] for the poller
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hvconsole_operations::{
//!     ConsoleClient, OperationPoller, OperationRegistry, run_bulk,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(ConsoleClient::from_env()?);
//! let registry = Arc::new(OperationRegistry::new());
//!
//! let mut poller = OperationPoller::new(
//!     client.clone(),
//!     registry.clone(),
//!     client.config().poller_config(),
//! );
//! poller.start(client.config().poll_interval)?;
//!
//! let instances = vec!["web1".to_string(), "web2".to_string()];
//! let result = run_bulk(&registry, &instances, |name| {
//!     let client = client.clone();
//!     let name = name.clone();
//!     async move { client.delete_instance(&name).await }
//! })
//! .await;
//! println!("{}", result.summary("instance", "deleted"));
//!
//! poller.shutdown().await;
//! registry.dispose();
//! # Ok(())
//! # }
//! ```

mod api;
mod bulk;
mod client;
mod config;
mod error;
mod poller;
mod registry;
mod types;

pub use api::OperationsApi;
pub use bulk::{BulkAction, TRACKING_STOPPED_MESSAGE, run_bulk};
pub use client::ConsoleClient;
pub use config::ConsoleConfig;
pub use error::{ConsoleError, Result};
pub use poller::{
    ORPHANED_OPERATION_MESSAGE, OperationPoller, PollReport, PollerConfig, PollerState,
};
pub use registry::{CompletionCallback, OperationRegistry};
pub use types::{
    ApiResponse, BulkItemResult, BulkRequestResult, InstanceAction, InstanceStateChange,
    Operation, OperationOutcome, OperationStatus, ResponseType, ServerEnvironment, ServerInfo,
    Submission,
};
