// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Claims queued runs up to a parallelism limit and drives them to completion.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::report;
use flowlane_core::{
    NewRunEvent, NodeError, OwnerId, QueueStatus, RecoveryReason, RunEventKind, RunId, RunPatch,
    RunQueueItem, RunStatus,
};
use flowlane_state::{EventsBus, RecoveredItem, StateStore};
use futures::future::{BoxFuture, FutureExt as _};
use indexmap::{IndexMap, IndexSet};

use crate::control::RunControl;
use crate::error::StateResultExt as _;
use crate::keepalive::{Keepalive, KeepaliveGuard};
use crate::lease_manager::{BackgroundLoop, LeaseManager, default_heartbeat_interval};
use crate::runner::{RunExecutor, RunOutcome};
use crate::{ExecutionError, Result};

/// Tag under which the scheduler holds the keepalive.
pub const SCHEDULER_KEEPALIVE_TAG: &str = "run-scheduler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently executing runs. Zero disables claiming.
    pub max_parallel_runs: usize,
    /// Interval of the expired-lease sweep. Zero disables it.
    pub reclaim_interval: Duration,
    /// Lease renewal interval. Defaults to a third of the lease TTL.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_runs: 3,
            reclaim_interval: Duration::from_secs(15),
            heartbeat_interval: None,
        }
    }
}

/// Diagnostic snapshot of a scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub started: bool,
    pub owner_id: OwnerId,
    pub max_parallel_runs: usize,
    pub active_run_ids: Vec<RunId>,
    /// Paused runs waiting for a free slot to resume.
    pub resuming_run_ids: Vec<RunId>,
}

#[derive(Default)]
struct Runtime {
    started: bool,
    active: IndexMap<RunId, RunControl>,
    /// Resumes are served before new claims, in request order.
    resuming: IndexSet<RunId>,
    keepalive: Option<KeepaliveGuard>,
    reclaim: Option<BackgroundLoop>,
}

struct SchedulerInner {
    owner_id: OwnerId,
    config: SchedulerConfig,
    store: Arc<dyn StateStore>,
    events: EventsBus,
    executor: Arc<dyn RunExecutor>,
    keepalive: Arc<dyn Keepalive>,
    lease_manager: LeaseManager,
    /// Serializes claiming so concurrent kicks never exceed capacity.
    claim_lock: tokio::sync::Mutex<()>,
    runtime: Mutex<Runtime>,
}

/// Schedules runs of one owner.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct RunScheduler {
    inner: Arc<SchedulerInner>,
}

impl RunScheduler {
    /// Fails if `owner_id` is empty or the heartbeat interval does not fit the
    /// store's lease TTL.
    pub fn new(
        owner_id: OwnerId,
        config: SchedulerConfig,
        store: Arc<dyn StateStore>,
        events: EventsBus,
        executor: Arc<dyn RunExecutor>,
        keepalive: Arc<dyn Keepalive>,
    ) -> Result<Self> {
        if owner_id.is_empty() {
            return Err(report!(ExecutionError::EmptyOwnerId));
        }
        let heartbeat_interval = config
            .heartbeat_interval
            .unwrap_or_else(|| default_heartbeat_interval(store.lease_ttl()));
        let lease_manager = LeaseManager::new(store.clone(), owner_id.clone(), heartbeat_interval)?;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                owner_id,
                config,
                store,
                events,
                executor,
                keepalive,
                lease_manager,
                claim_lock: tokio::sync::Mutex::new(()),
                runtime: Mutex::new(Runtime::default()),
            }),
        })
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.inner.owner_id
    }

    pub fn lease_manager(&self) -> &LeaseManager {
        &self.inner.lease_manager
    }

    /// Start heartbeating and the reclaim sweep, then claim work.
    ///
    /// Calling `start` on a started scheduler only kicks it.
    pub async fn start(&self) -> Result<()> {
        {
            let mut runtime = self.inner.runtime();
            if !runtime.started {
                log::info!(
                    "Starting run scheduler {} (maxParallelRuns={}, reclaimInterval={:?})",
                    self.inner.owner_id,
                    self.inner.config.max_parallel_runs,
                    self.inner.config.reclaim_interval
                );
                runtime.started = true;
                runtime.keepalive = Some(self.inner.keepalive.acquire(SCHEDULER_KEEPALIVE_TAG));
                self.inner.lease_manager.start_heartbeat();
                if !self.inner.config.reclaim_interval.is_zero() {
                    runtime.reclaim = Some(self.spawn_reclaim_loop());
                }
            }
        }
        self.kick().await
    }

    fn spawn_reclaim_loop(&self) -> BackgroundLoop {
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        BackgroundLoop::spawn(
            "Lease reclaim",
            self.inner.config.reclaim_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let scheduler = RunScheduler { inner };
                    if let Err(e) = scheduler.reclaim_expired_leases(Utc::now()).await {
                        log::warn!("Reclaiming expired leases failed: {e:?}");
                    }
                }
            },
        )
    }

    /// Stop heartbeating, stop the reclaim sweep and release the keepalive.
    ///
    /// Runs already executing are left to finish; nothing new is claimed.
    pub fn stop(&self) {
        let mut runtime = self.inner.runtime();
        if !runtime.started {
            return;
        }
        log::info!("Stopping run scheduler {}", self.inner.owner_id);
        runtime.started = false;
        self.inner.lease_manager.stop_heartbeat();
        if let Some(reclaim) = runtime.reclaim.take() {
            reclaim.stop();
        }
        if let Some(keepalive) = runtime.keepalive.take() {
            keepalive.release();
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.runtime().started
    }

    pub fn state(&self) -> SchedulerState {
        let runtime = self.inner.runtime();
        SchedulerState {
            started: runtime.started,
            owner_id: self.inner.owner_id.clone(),
            max_parallel_runs: self.inner.config.max_parallel_runs,
            active_run_ids: runtime.active.keys().copied().collect(),
            resuming_run_ids: runtime.resuming.iter().copied().collect(),
        }
    }

    /// Claim queued runs until capacity is reached or the queue is empty.
    ///
    /// Safe to call concurrently. Does nothing while the scheduler is stopped.
    pub fn kick(&self) -> BoxFuture<'static, Result<()>> {
        let inner = self.inner.clone();
        async move { inner.kick().await }.boxed()
    }

    /// Continue a paused run that is leased to this owner.
    ///
    /// The resume waits for a free slot like any claim, so it may start
    /// after this returns. Resumes take precedence over queued runs.
    pub async fn resume(&self, run_id: RunId) -> Result<()> {
        if !self.is_started() {
            return Err(report!(ExecutionError::NotStarted));
        }
        let item = self
            .inner
            .store
            .get_item(run_id)
            .await
            .into_execution()?
            .ok_or_else(|| report!(ExecutionError::QueueItemNotFound(run_id)))?;
        if item.status != QueueStatus::Paused {
            return Err(report!(ExecutionError::IllegalQueueStatus {
                run_id,
                operation: "resume",
                status: item.status,
            }));
        }
        if self.inner.runtime().resuming.insert(run_id) {
            log::debug!("Run {run_id} waiting for a slot to resume");
        }
        self.kick().await
    }

    /// Control handle of a run executing in this scheduler.
    pub fn control(&self, run_id: RunId) -> Option<RunControl> {
        self.inner.runtime().active.get(&run_id).cloned()
    }

    /// Requeue runs whose lease expired before `now`, then claim work.
    ///
    /// This owner's leases are renewed at `now` first, so a sweep never
    /// takes back a run executing here. Each reclaimed run's record goes back
    /// to `queued` and gets a `run.recovered` event.
    pub async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<RecoveredItem>> {
        if let Err(e) = self.inner.lease_manager.heartbeat_once(now).await {
            log::warn!("Renewing own leases before reclaim failed: {e:?}");
        }
        let reclaimed = self.inner.lease_manager.reclaim_expired(now).await?;
        for item in &reclaimed {
            if self.inner.runtime().active.contains_key(&item.run_id) {
                // The next claim hands the item back to the execution
                // already running here.
                log::warn!(
                    "Lease of locally executing run {} expired and was reclaimed",
                    item.run_id
                );
                continue;
            }
            requeue_record(
                &self.inner.store,
                &self.inner.events,
                item,
                RecoveryReason::LeaseExpired,
                now,
            )
            .await?;
        }
        if !reclaimed.is_empty() {
            self.kick().await?;
        }
        Ok(reclaimed)
    }
}

impl std::fmt::Debug for RunScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunScheduler")
            .field("state", &self.state())
            .finish()
    }
}

impl SchedulerInner {
    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn has_capacity(&self) -> bool {
        let runtime = self.runtime();
        runtime.started && runtime.active.len() < self.config.max_parallel_runs
    }

    fn next_resume(&self) -> Option<RunId> {
        self.runtime().resuming.shift_remove_index(0)
    }

    async fn kick(self: &Arc<Self>) -> Result<()> {
        let _claiming = self.claim_lock.lock().await;
        while self.has_capacity() {
            if let Some(run_id) = self.next_resume() {
                match self
                    .store
                    .mark_running(run_id, self.owner_id.clone(), Utc::now())
                    .await
                {
                    Ok(item) => {
                        log::info!("Resuming run {run_id} (attempt {})", item.attempt);
                        self.spawn_run(item);
                    }
                    Err(e) => log::warn!("Cannot resume run {run_id}: {e:?}"),
                }
                continue;
            }
            let Some(item) = self
                .store
                .claim_next(self.owner_id.clone(), Utc::now())
                .await
                .into_execution()?
            else {
                break;
            };
            log::info!(
                "Claimed run {} of flow '{}' (attempt {})",
                item.id,
                item.flow_id,
                item.attempt
            );
            self.spawn_run(item);
        }
        Ok(())
    }

    /// Execute `item` in the background. The executor runs in its own task so
    /// that a panic is caught and does not affect other runs.
    ///
    /// An item already executing here is left to that execution.
    fn spawn_run(self: &Arc<Self>, item: RunQueueItem) -> bool {
        let run_id = item.id;
        let control = RunControl::new();
        {
            let mut runtime = self.runtime();
            if runtime.active.contains_key(&run_id) {
                log::warn!("Run {run_id} is already executing, not starting it again");
                return false;
            }
            runtime.active.insert(run_id, control.clone());
        }

        let inner = self.clone();
        tokio::spawn(async move {
            let executor = inner.executor.clone();
            let execution =
                tokio::spawn(async move { executor.execute(item, control).await }).await;
            inner.finish_run(run_id, execution).await;
            inner.runtime().active.shift_remove(&run_id);

            let scheduler = RunScheduler {
                inner: inner.clone(),
            };
            if let Err(e) = scheduler.kick().await {
                log::warn!("Backfill after run {run_id} failed: {e:?}");
            }
        });
        true
    }

    async fn finish_run(
        &self,
        run_id: RunId,
        execution: std::result::Result<Result<RunOutcome>, tokio::task::JoinError>,
    ) {
        match execution {
            Ok(Ok(RunOutcome::Paused)) => {
                log::debug!("Run {run_id} paused, keeping its queue item");
                return;
            }
            Ok(Ok(outcome)) => log::debug!("Run {run_id} finished: {outcome:?}"),
            Ok(Err(e)) => {
                log::error!("Run {run_id} failed to execute: {e:?}");
                let error = NodeError::internal(format!(
                    "run execution failed: {}",
                    e.current_context()
                ));
                self.fail_run(run_id, error).await;
            }
            Err(e) => {
                log::error!("Run {run_id} panicked: {e}");
                let error = NodeError::internal(ExecutionError::RunPanic.to_string());
                self.fail_run(run_id, error).await;
            }
        }

        if let Err(e) = self.store.mark_done(run_id, Utc::now()).await {
            log::error!("Failed to remove run {run_id} from the queue: {e:?}");
        }
    }

    /// Record a failure the runner could not record itself.
    async fn fail_run(&self, run_id: RunId, error: NodeError) {
        let record = match self.store.get_run(run_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                log::error!("Failed to load run {run_id}: {e:?}");
                return;
            }
        };
        if record.status.is_terminal() {
            return;
        }

        let patch = RunPatch::at(Utc::now())
            .status(RunStatus::Failed)
            .error(error.clone());
        if let Err(e) = self.store.patch_run(run_id, patch).await {
            log::error!("Failed to mark run {run_id} failed: {e:?}");
            return;
        }
        let event = NewRunEvent::new(
            run_id,
            RunEventKind::RunFailed {
                error,
                node_id: record.current_node_id,
            },
        );
        if let Err(e) = self.events.append(event).await {
            log::error!("Failed to append run.failed for run {run_id}: {e:?}");
        }
    }
}

/// Put the record of a requeued run back to `queued` and append
/// `run.recovered`. Shared by lease reclaim and startup recovery.
pub(crate) async fn requeue_record(
    store: &Arc<dyn StateStore>,
    events: &EventsBus,
    item: &RecoveredItem,
    reason: RecoveryReason,
    now: DateTime<Utc>,
) -> Result<()> {
    match store.get_run(item.run_id).await.into_execution()? {
        Some(record) if !record.status.is_terminal() => {
            store
                .patch_run(item.run_id, RunPatch::at(now).status(RunStatus::Queued))
                .await
                .into_execution()?;
        }
        Some(_) => {}
        None => log::warn!("Requeued run {} has no run record", item.run_id),
    }
    events
        .append(
            NewRunEvent::new(
                item.run_id,
                RunEventKind::RunRecovered {
                    reason,
                    from_status: item.from_status,
                    to_status: QueueStatus::Queued,
                    prev_owner_id: item.prev_owner_id.clone(),
                },
            )
            .at(now),
        )
        .await
        .into_execution()?;
    log::info!(
        "Run {} requeued from {} ({reason:?})",
        item.run_id,
        item.from_status
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::{CountingKeepalive, NoOpKeepalive};
    use crate::testing::{Harness, OWNER, eventually, linear_flow};
    use flowlane_core::ErrorCode;
    use flowlane_mock::MockGate;
    use flowlane_state::{InMemoryStateStore, RunQueue as _, RunStore as _};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor whose behavior is picked by flow id.
    #[derive(Default)]
    struct TestExecutor {
        gate: MockGate,
        active: AtomicUsize,
        max_active: AtomicUsize,
        executed: Mutex<Vec<RunId>>,
    }

    impl TestExecutor {
        fn open(gate_open: bool) -> Arc<Self> {
            let executor = Self::default();
            if gate_open {
                executor.gate.open();
            }
            Arc::new(executor)
        }

        fn executed(&self) -> Vec<RunId> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl RunExecutor for TestExecutor {
        fn execute(
            &self,
            item: RunQueueItem,
            _control: RunControl,
        ) -> BoxFuture<'_, Result<RunOutcome>> {
            async move {
                self.executed.lock().unwrap().push(item.id);
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(active, Ordering::SeqCst);
                let gate = self.gate.clone();
                let outcome = async move {
                    match item.flow_id.as_str() {
                        "panic" => panic!("executor exploded"),
                        "error" => Err(report!(ExecutionError::internal("executor error"))),
                        "pause" => Ok(RunOutcome::Paused),
                        _ => {
                            gate_pass(&gate).await;
                            Ok(RunOutcome::Succeeded)
                        }
                    }
                }
                .await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                outcome
            }
            .boxed()
        }
    }

    async fn gate_pass(gate: &MockGate) {
        while !gate.is_open() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn scheduler(
        harness: &Harness,
        executor: Arc<TestExecutor>,
        max_parallel_runs: usize,
    ) -> RunScheduler {
        RunScheduler::new(
            OwnerId::new(OWNER),
            SchedulerConfig {
                max_parallel_runs,
                reclaim_interval: Duration::ZERO,
                heartbeat_interval: None,
            },
            harness.state_store(),
            harness.events.clone(),
            executor,
            Arc::new(NoOpKeepalive),
        )
        .unwrap()
    }

    async fn queue_len(harness: &Harness) -> usize {
        harness.store.list_items(None).await.unwrap().len()
    }

    #[test]
    fn test_empty_owner_is_rejected() {
        let harness = Harness::new();
        let result = RunScheduler::new(
            OwnerId::new(""),
            SchedulerConfig::default(),
            harness.state_store(),
            harness.events.clone(),
            TestExecutor::open(true),
            Arc::new(NoOpKeepalive),
        );
        assert_eq!(
            result.unwrap_err().current_context(),
            &ExecutionError::EmptyOwnerId
        );
    }

    #[tokio::test]
    async fn test_respects_max_parallel_runs() {
        let harness = Harness::new();
        for _ in 0..5 {
            harness.queued_run(linear_flow("work", &["a"]), None).await;
        }
        let executor = TestExecutor::open(false);
        let scheduler = scheduler(&harness, executor.clone(), 2);

        scheduler.start().await.unwrap();
        // Concurrent kicks must not over-claim.
        futures::future::join_all((0..4).map(|_| scheduler.kick())).await;
        let state = scheduler.state();
        assert!(state.started);
        assert_eq!(state.active_run_ids.len(), 2);
        assert_eq!(state.owner_id, OwnerId::new(OWNER));

        executor.gate.open();
        eventually("queue to drain", || async { queue_len(&harness).await == 0 }).await;
        eventually("runs to finish", || async {
            scheduler.state().active_run_ids.is_empty()
        })
        .await;
        assert_eq!(executor.executed().len(), 5);
        assert!(executor.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_never_claims() {
        let harness = Harness::new();
        harness.queued_run(linear_flow("work", &["a"]), None).await;
        let executor = TestExecutor::open(true);
        let scheduler = scheduler(&harness, executor.clone(), 0);

        scheduler.start().await.unwrap();
        scheduler.kick().await.unwrap();
        assert!(executor.executed().is_empty());
        assert_eq!(queue_len(&harness).await, 1);
    }

    #[tokio::test]
    async fn test_kick_before_start_is_noop() {
        let harness = Harness::new();
        harness.queued_run(linear_flow("work", &["a"]), None).await;
        let executor = TestExecutor::open(true);
        let scheduler = scheduler(&harness, executor.clone(), 1);

        scheduler.kick().await.unwrap();
        assert!(executor.executed().is_empty());
        assert!(!scheduler.state().started);
    }

    #[tokio::test]
    async fn test_panicking_executor_is_isolated() {
        let harness = Harness::new();
        let panicking = harness.queued_run(linear_flow("panic", &["a"]), None).await;
        let healthy = harness.queued_run(linear_flow("work", &["a"]), None).await;
        let executor = TestExecutor::open(true);
        let scheduler = scheduler(&harness, executor.clone(), 1);

        scheduler.start().await.unwrap();
        eventually("queue to drain", || async { queue_len(&harness).await == 0 }).await;
        assert_eq!(executor.executed(), vec![panicking, healthy]);

        let record = harness.record(panicking).await;
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.unwrap().code, ErrorCode::Internal);
        assert_eq!(harness.event_types(panicking).await, vec!["run.failed"]);
    }

    #[tokio::test]
    async fn test_executor_error_fails_run() {
        let harness = Harness::new();
        let run_id = harness.queued_run(linear_flow("error", &["a"]), None).await;
        let scheduler = scheduler(&harness, TestExecutor::open(true), 1);

        scheduler.start().await.unwrap();
        eventually("queue to drain", || async { queue_len(&harness).await == 0 }).await;
        eventually("run to fail", || async {
            harness.record(run_id).await.status == RunStatus::Failed
        })
        .await;
    }

    #[tokio::test]
    async fn test_paused_run_keeps_queue_item() {
        let harness = Harness::new();
        let run_id = harness.queued_run(linear_flow("pause", &["a"]), None).await;
        let scheduler = scheduler(&harness, TestExecutor::open(true), 1);

        scheduler.start().await.unwrap();
        eventually("run to leave the active set", || async {
            scheduler.state().active_run_ids.is_empty()
        })
        .await;
        let item = harness.store.get_item(run_id).await.unwrap();
        assert!(item.is_some(), "paused runs stay in the queue");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_keepalive() {
        let harness = Harness::new();
        let keepalive = CountingKeepalive::new();
        let scheduler = RunScheduler::new(
            OwnerId::new(OWNER),
            SchedulerConfig::default(),
            harness.state_store(),
            harness.events.clone(),
            TestExecutor::open(true),
            Arc::new(keepalive.clone()),
        )
        .unwrap();

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(keepalive.holds(SCHEDULER_KEEPALIVE_TAG), 1);
        assert!(scheduler.lease_manager().is_heartbeat_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!keepalive.is_active());
        assert!(!scheduler.lease_manager().is_heartbeat_running());
        assert!(!scheduler.state().started);
    }

    #[tokio::test]
    async fn test_reclaim_requeues_and_reruns() {
        let store = Arc::new(InMemoryStateStore::new().with_lease_ttl(Duration::from_secs(30)));
        let harness = Harness::with_store(store.clone());
        let run_id = harness.queued_run(linear_flow("work", &["a"]), None).await;
        let claimed = store
            .claim_next(OwnerId::new("crashed"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        store
            .patch_run(run_id, RunPatch::at(Utc::now()).status(RunStatus::Running))
            .await
            .unwrap();

        let executor = TestExecutor::open(true);
        let scheduler = scheduler(&harness, executor.clone(), 1);
        scheduler.start().await.unwrap();
        assert!(executor.executed().is_empty(), "item is leased elsewhere");

        let expires_at = claimed.lease.unwrap().expires_at;
        assert!(
            scheduler
                .reclaim_expired_leases(expires_at)
                .await
                .unwrap()
                .is_empty()
        );
        let reclaimed = scheduler
            .reclaim_expired_leases(expires_at + chrono::TimeDelta::milliseconds(1))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);

        let events = harness.events(run_id).await;
        assert!(matches!(
            &events[0].kind,
            RunEventKind::RunRecovered {
                reason: RecoveryReason::LeaseExpired,
                from_status: QueueStatus::Running,
                to_status: QueueStatus::Queued,
                prev_owner_id: Some(owner),
            } if owner.as_str() == "crashed"
        ));
        eventually("reclaimed run to execute", || async {
            executor.executed() == vec![run_id]
        })
        .await;
    }

    #[tokio::test]
    async fn test_resume_requires_start() {
        let harness = Harness::new();
        let scheduler = scheduler(&harness, TestExecutor::open(true), 1);
        let err = scheduler.resume(uuid::Uuid::now_v7()).await.unwrap_err();
        assert_eq!(err.current_context(), &ExecutionError::NotStarted);
    }

    #[tokio::test]
    async fn test_resume_waits_for_a_free_slot() {
        let harness = Harness::new();
        let paused = harness.queued_run(linear_flow("pause", &["a"]), None).await;
        let work = harness.queued_run(linear_flow("work", &["a"]), None).await;
        let executor = TestExecutor::open(false);
        let scheduler = scheduler(&harness, executor.clone(), 1);

        scheduler.start().await.unwrap();
        eventually("second run to take the slot", || async {
            executor.executed() == vec![paused, work]
        })
        .await;
        harness
            .store
            .mark_paused(paused, OwnerId::new(OWNER), Utc::now())
            .await
            .unwrap();

        scheduler.resume(paused).await.unwrap();
        let state = scheduler.state();
        assert_eq!(state.active_run_ids, vec![work]);
        assert_eq!(state.resuming_run_ids, vec![paused]);
        assert_eq!(executor.executed().len(), 2);

        executor.gate.open();
        eventually("paused run to resume", || async {
            executor.executed() == vec![paused, work, paused]
        })
        .await;
        assert!(scheduler.state().resuming_run_ids.is_empty());
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_rejects_items_that_are_not_paused() {
        let harness = Harness::new();
        let run_id = harness.queued_run(linear_flow("work", &["a"]), None).await;
        let scheduler = scheduler(&harness, TestExecutor::open(false), 0);
        scheduler.start().await.unwrap();

        let err = scheduler.resume(run_id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::IllegalQueueStatus {
                operation: "resume",
                status: QueueStatus::Queued,
                ..
            }
        ));
        let missing = uuid::Uuid::now_v7();
        let err = scheduler.resume(missing).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::QueueItemNotFound(missing)
        );
        assert!(scheduler.state().resuming_run_ids.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_leases_of_local_runs() {
        let harness = Harness::new();
        let run_id = harness.queued_run(linear_flow("work", &["a"]), None).await;
        let executor = TestExecutor::open(false);
        let scheduler = scheduler(&harness, executor.clone(), 2);
        scheduler.start().await.unwrap();
        eventually("run to start", || async { executor.executed() == vec![run_id] }).await;

        // Far past the lease TTL, as if the heartbeat task had stalled.
        let later = Utc::now() + chrono::TimeDelta::minutes(5);
        let reclaimed = scheduler.reclaim_expired_leases(later).await.unwrap();
        assert!(reclaimed.is_empty());

        let item = harness.store.get_item(run_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Running);
        assert!(item.is_leased_by(&OwnerId::new(OWNER)));
        assert!(harness.event_types(run_id).await.is_empty());

        executor.gate.open();
        eventually("queue to drain", || async { queue_len(&harness).await == 0 }).await;
        assert_eq!(executor.executed(), vec![run_id]);
    }

    #[tokio::test]
    async fn test_reclaimed_local_run_is_not_started_twice() {
        let harness = Harness::new();
        let run_id = harness.queued_run(linear_flow("work", &["a"]), None).await;
        let executor = TestExecutor::open(false);
        let scheduler = scheduler(&harness, executor.clone(), 2);
        scheduler.start().await.unwrap();
        eventually("run to start", || async { executor.executed() == vec![run_id] }).await;

        // Another process reclaimed the lease behind this owner's back.
        let later = Utc::now() + chrono::TimeDelta::minutes(5);
        let reclaimed = harness.store.reclaim_expired_leases(later).await.unwrap();
        assert_eq!(reclaimed.len(), 1);

        scheduler.kick().await.unwrap();
        assert_eq!(scheduler.state().active_run_ids, vec![run_id]);
        assert_eq!(executor.executed(), vec![run_id]);
        assert_eq!(executor.active.load(Ordering::SeqCst), 1);

        executor.gate.open();
        eventually("queue to drain", || async { queue_len(&harness).await == 0 }).await;
        assert_eq!(executor.executed(), vec![run_id]);
    }
}
