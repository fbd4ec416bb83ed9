// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background poller that drives the operation registry.
//!
//! The poller periodically lists operations from the management API and
//! dispatches terminal statuses to the [`OperationRegistry`]. It is an
//! explicit state machine:
//!
//! ```text
//! Idle --start--> Polling --stop--> Stopped
//! ```
//!
//! # Orphaned operations
//!
//! The server purges finished operations after a while. If a poll races
//! that purge, a tracked operation can vanish from the listing without its
//! terminal status ever being observed. Every ID that was registered before
//! the fetch started and is absent from a successful poll is marked with the time it was first missed; once
//! it has been missing for the grace period it is failed with
//! [`ORPHANED_OPERATION_MESSAGE`]. An ID that shows up again is unmarked.
//!
//! Failed polls are logged and retried on the next tick at the same
//! interval. They never dispatch anything and never advance the missing
//! clock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OperationsApi;
use crate::error::{ConsoleError, Result};
use crate::registry::OperationRegistry;
use crate::types::OperationStatus;

/// Failure message delivered to registrations whose operation disappeared.
pub const ORPHANED_OPERATION_MESSAGE: &str =
    "operation result unknown: no longer reported by the server";

/// Configuration for the operation poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How long a registered operation may be missing from poll results
    /// before it is failed as orphaned.
    pub orphan_grace_period: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            orphan_grace_period: Duration::from_secs(10),
        }
    }
}

/// Lifecycle state of an [`OperationPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Created, never started.
    Idle,
    /// Background polling is active.
    Polling,
    /// Stopped; a stopped poller cannot be restarted.
    Stopped,
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Operations reported by the server.
    pub seen: usize,
    /// Registrations completed from a reported terminal status.
    pub dispatched: usize,
    /// Registrations failed as orphaned.
    pub orphaned: usize,
}

/// Shared between the poller handle and its background task.
struct PollWorker {
    api: Arc<dyn OperationsApi>,
    registry: Arc<OperationRegistry>,
    config: PollerConfig,
    /// When each registered-but-unreported operation was first missed.
    missing_since: Mutex<HashMap<String, Instant>>,
}

impl PollWorker {
    async fn poll_once(&self) -> Result<PollReport> {
        // Only IDs tracked before the fetch started can be judged missing
        // from its result.
        let candidates = self.registry.tracked_ids();
        let operations = self.api.list_operations().await?;

        let mut missing = self.missing_since.lock().await;
        let now = Instant::now();
        let mut report = PollReport {
            seen: operations.len(),
            ..PollReport::default()
        };

        let mut reported = HashSet::with_capacity(operations.len());
        for op in &operations {
            reported.insert(op.id.as_str());
            missing.remove(&op.id);

            let status = op.effective_status();
            if status.is_terminal()
                && self
                    .registry
                    .dispatch(&op.id, status, op.error_message())
            {
                report.dispatched += 1;
            }
        }

        for id in candidates {
            if reported.contains(id.as_str()) {
                continue;
            }

            let first_missed = *missing.entry(id.clone()).or_insert(now);
            if now.duration_since(first_missed) < self.config.orphan_grace_period {
                continue;
            }

            missing.remove(&id);
            if self.registry.dispatch(
                &id,
                OperationStatus::Failure,
                Some(ORPHANED_OPERATION_MESSAGE),
            ) {
                warn!(
                    operation_id = %id,
                    missing_for_ms = now.duration_since(first_missed).as_millis() as u64,
                    "Operation disappeared from the server, failing registration"
                );
                report.orphaned += 1;
            }
        }

        missing.retain(|id, _| self.registry.is_registered(id));

        Ok(report)
    }
}

/// Periodically polls the management API and feeds the registry.
pub struct OperationPoller {
    worker: Arc<PollWorker>,
    state: PollerState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl OperationPoller {
    /// Create an idle poller.
    pub fn new(
        api: Arc<dyn OperationsApi>,
        registry: Arc<OperationRegistry>,
        config: PollerConfig,
    ) -> Self {
        Self {
            worker: Arc::new(PollWorker {
                api,
                registry,
                config,
                missing_since: Mutex::new(HashMap::new()),
            }),
            state: PollerState::Idle,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Current state.
    ///
    /// A poller whose background task has ended on its own (a registration
    /// callback panicked inside it) reports `Stopped`.
    pub fn state(&self) -> PollerState {
        match (&self.state, &self.handle) {
            (PollerState::Polling, Some(handle)) if handle.is_finished() => PollerState::Stopped,
            (state, _) => *state,
        }
    }

    /// The registry this poller dispatches to.
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.worker.registry
    }

    /// Start polling every `interval`. The first poll runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, interval: Duration) -> Result<()> {
        match self.state {
            PollerState::Idle => {}
            PollerState::Polling => {
                return Err(ConsoleError::InvalidState(
                    "poller is already running".to_string(),
                ));
            }
            PollerState::Stopped => {
                return Err(ConsoleError::InvalidState(
                    "poller has been stopped".to_string(),
                ));
            }
        }
        if interval.is_zero() {
            return Err(ConsoleError::InvalidInput(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let worker = self.worker.clone();
        let cancel = self.cancel.clone();

        self.handle = Some(tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                grace_ms = worker.config.orphan_grace_period.as_millis() as u64,
                "Operation poller started"
            );

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    result = worker.poll_once() => match result {
                        Ok(report) => debug!(
                            seen = report.seen,
                            dispatched = report.dispatched,
                            orphaned = report.orphaned,
                            "Operation poll complete"
                        ),
                        Err(e) => warn!(error = %e, "Operation poll failed, retrying next tick"),
                    },
                }

                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    _ = tokio::time::sleep(interval) => {}
                }
            }

            info!("Operation poller stopped");
        }));
        self.state = PollerState::Polling;

        Ok(())
    }

    /// Stop polling.
    ///
    /// Safe to call repeatedly or on a poller that was never started.
    /// Registrations that are still pending are left untouched.
    pub fn stop(&mut self) {
        if self.state != PollerState::Polling {
            return;
        }
        self.cancel.cancel();
        self.state = PollerState::Stopped;
        debug!("Operation poller cancellation requested");
    }

    /// Stop polling and wait for the background task to exit.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Operation poller task ended abnormally");
            }
        }
    }

    /// Run one poll on the caller's task, independent of the timer.
    pub async fn poll_once(&self) -> Result<PollReport> {
        self.worker.poll_once().await
    }
}

impl Drop for OperationPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, OperationOutcome};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        operations: StdMutex<Vec<Operation>>,
        failing: AtomicBool,
        calls: AtomicUsize,
        /// Runs while the listing is being fetched.
        during_fetch: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl FakeApi {
        fn set(&self, operations: Vec<Operation>) {
            *self.operations.lock().unwrap() = operations;
        }
    }

    #[async_trait]
    impl OperationsApi for FakeApi {
        async fn list_operations(&self) -> Result<Vec<Operation>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hook = self.during_fetch.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(ConsoleError::Connection("connection refused".to_string()));
            }
            Ok(self.operations.lock().unwrap().clone())
        }
    }

    fn setup(grace: Duration) -> (Arc<FakeApi>, Arc<OperationRegistry>, OperationPoller) {
        let api = Arc::new(FakeApi::default());
        let registry = Arc::new(OperationRegistry::new());
        let poller = OperationPoller::new(
            api.clone(),
            registry.clone(),
            PollerConfig {
                orphan_grace_period: grace,
            },
        );
        (api, registry, poller)
    }

    fn collect(registry: &OperationRegistry, id: &str) -> Arc<StdMutex<Vec<OperationOutcome>>> {
        let outcomes = Arc::new(StdMutex::new(Vec::new()));
        let sink = outcomes.clone();
        registry.register(id, move |outcome| sink.lock().unwrap().push(outcome));
        outcomes
    }

    #[tokio::test]
    async fn test_poll_dispatches_terminal_statuses() {
        let (api, registry, poller) = setup(Duration::from_secs(10));
        let ok = collect(&registry, "op-1");
        let failed = collect(&registry, "op-2");
        let running = collect(&registry, "op-3");

        api.set(vec![
            Operation::new("op-1", OperationStatus::Success),
            Operation::new("op-2", OperationStatus::Failure).with_error("disk full"),
            Operation::new("op-3", OperationStatus::Running),
            Operation::new("untracked", OperationStatus::Success),
        ]);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(
            report,
            PollReport {
                seen: 4,
                dispatched: 2,
                orphaned: 0
            }
        );
        assert_eq!(*ok.lock().unwrap(), vec![OperationOutcome::Success]);
        assert_eq!(
            *failed.lock().unwrap(),
            vec![OperationOutcome::Failed("disk full".to_string())]
        );
        assert!(running.lock().unwrap().is_empty());
        assert!(registry.is_registered("op-3"));
    }

    #[tokio::test]
    async fn test_dispatch_follows_response_order() {
        let (api, registry, poller) = setup(Duration::from_secs(10));
        let log = Arc::new(StdMutex::new(Vec::new()));
        for id in ["op-1", "op-2", "op-3"] {
            let log = log.clone();
            registry.register(id, move |outcome| {
                log.lock().unwrap().push((id, outcome));
            });
        }

        api.set(vec![
            Operation::new("op-2", OperationStatus::Success),
            Operation::new("op-1", OperationStatus::Success),
            Operation::new("op-3", OperationStatus::Failure).with_error("quota exceeded"),
        ]);
        assert_eq!(poller.poll_once().await.unwrap().dispatched, 3);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("op-2", OperationOutcome::Success),
                ("op-1", OperationOutcome::Success),
                (
                    "op-3",
                    OperationOutcome::Failed("quota exceeded".to_string())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_registration_during_fetch_is_not_orphaned() {
        let (api, registry, poller) = setup(Duration::ZERO);
        let outcomes = Arc::new(StdMutex::new(Vec::new()));

        let late = registry.clone();
        let sink = outcomes.clone();
        *api.during_fetch.lock().unwrap() = Some(Box::new(move || {
            late.register("op-late", move |outcome| sink.lock().unwrap().push(outcome));
        }));

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.orphaned, 0);
        assert!(registry.is_registered("op-late"));
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognised_status_falls_back_to_code() {
        let (api, registry, poller) = setup(Duration::from_secs(10));
        let outcomes = collect(&registry, "op-1");
        let pending = collect(&registry, "op-2");

        let mut cancelled = Operation::new("op-1", OperationStatus::Unknown);
        cancelled.status_code = 401;
        let mut cancelling = Operation::new("op-2", OperationStatus::Unknown);
        cancelling.status_code = 104;
        api.set(vec![cancelled, cancelling]);

        assert_eq!(poller.poll_once().await.unwrap().dispatched, 1);
        assert_eq!(
            *outcomes.lock().unwrap(),
            vec![OperationOutcome::Failed("operation cancelled".to_string())]
        );
        assert!(pending.lock().unwrap().is_empty());
        assert!(registry.is_registered("op-2"));
    }

    #[tokio::test]
    async fn test_poll_failure_dispatches_nothing() {
        let (api, registry, poller) = setup(Duration::ZERO);
        let outcomes = collect(&registry, "op-1");
        api.failing.store(true, Ordering::SeqCst);

        assert!(poller.poll_once().await.is_err());
        assert!(registry.is_registered("op-1"));
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_fails_once_after_grace_period() {
        let (_api, registry, poller) = setup(Duration::from_secs(10));
        let outcomes = collect(&registry, "op-1");

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.orphaned, 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(poller.poll_once().await.unwrap().orphaned, 0);
        assert!(outcomes.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(poller.poll_once().await.unwrap().orphaned, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(poller.poll_once().await.unwrap().orphaned, 0);

        assert_eq!(
            *outcomes.lock().unwrap(),
            vec![OperationOutcome::Failed(
                ORPHANED_OPERATION_MESSAGE.to_string()
            )]
        );
        assert!(!registry.is_registered("op-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reappearing_operation_resets_missing_clock() {
        let (api, registry, poller) = setup(Duration::from_secs(10));
        let outcomes = collect(&registry, "op-1");

        poller.poll_once().await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        api.set(vec![Operation::new("op-1", OperationStatus::Running)]);
        poller.poll_once().await.unwrap();

        api.set(vec![]);
        tokio::time::advance(Duration::from_secs(1)).await;
        poller.poll_once().await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(poller.poll_once().await.unwrap().orphaned, 0);
        assert!(outcomes.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(poller.poll_once().await.unwrap().orphaned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_do_not_advance_missing_clock() {
        let (api, registry, poller) = setup(Duration::from_secs(10));
        let outcomes = collect(&registry, "op-1");

        api.failing.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            assert!(poller.poll_once().await.is_err());
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        assert!(outcomes.lock().unwrap().is_empty());

        api.failing.store(false, Ordering::SeqCst);
        assert_eq!(poller.poll_once().await.unwrap().orphaned, 0);
        assert!(registry.is_registered("op-1"));
    }

    #[tokio::test]
    async fn test_state_machine() {
        let (_api, _registry, mut poller) = setup(Duration::from_secs(10));
        assert_eq!(poller.state(), PollerState::Idle);

        poller.stop();
        assert_eq!(poller.state(), PollerState::Idle);

        poller.start(Duration::from_millis(50)).unwrap();
        assert_eq!(poller.state(), PollerState::Polling);
        assert!(matches!(
            poller.start(Duration::from_millis(50)),
            Err(ConsoleError::InvalidState(_))
        ));

        poller.stop();
        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);
        assert!(matches!(
            poller.start(Duration::from_millis(50)),
            Err(ConsoleError::InvalidState(_))
        ));

        poller.shutdown().await;
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_rejects_zero_interval() {
        let (_api, _registry, mut poller) = setup(Duration::from_secs(10));
        assert!(matches!(
            poller.start(Duration::ZERO),
            Err(ConsoleError::InvalidInput(_))
        ));
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_polling_dispatches() {
        let (api, registry, mut poller) = setup(Duration::from_secs(60));
        let (tx, rx) = tokio::sync::oneshot::channel();
        registry.register("op-1", move |outcome| {
            let _ = tx.send(outcome);
        });

        api.set(vec![Operation::new("op-1", OperationStatus::Running)]);
        poller.start(Duration::from_millis(100)).unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(registry.is_registered("op-1"));

        api.set(vec![Operation::new("op-1", OperationStatus::Success)]);
        let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("poller did not dispatch")
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Success);

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_polling_survives_failures() {
        let (api, registry, mut poller) = setup(Duration::ZERO);
        let outcomes = collect(&registry, "op-1");
        api.failing.store(true, Ordering::SeqCst);

        poller.start(Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert!(api.calls.load(Ordering::SeqCst) >= 5);
        assert_eq!(poller.state(), PollerState::Polling);
        assert!(registry.is_registered("op-1"));
        assert!(outcomes.lock().unwrap().is_empty());

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_pending_registrations() {
        let (api, registry, mut poller) = setup(Duration::ZERO);
        let outcomes = collect(&registry, "op-1");
        api.set(vec![Operation::new("op-1", OperationStatus::Running)]);

        poller.start(Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        poller.shutdown().await;

        api.set(vec![Operation::new("op-1", OperationStatus::Success)]);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(registry.is_registered("op-1"));
        assert!(outcomes.lock().unwrap().is_empty());
    }
}
