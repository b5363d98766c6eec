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

//! The engine facade: programmatic enqueue, trigger fire handling, queue
//! inspection and run control on top of the scheduler.

use std::sync::Arc;

use chrono::Utc;
use error_stack::{ResultExt as _, report};
use flowlane_core::{
    DebugConfig, FlowDefinition, NewQueueItem, NewRunEvent, NodeError, OwnerId, QueueStatus, RunEvent,
    RunEventKind, RunId, RunPatch, RunQueueItem, RunRecord, RunStatus, TriggerFireContext,
    TriggerInfo, TriggerSpec, Vars,
};
use flowlane_state::{EventSubscription, EventsBus, StateStore};
use uuid::Uuid;

use crate::completion_notifier::RunCompletionNotifier;
use crate::error::StateResultExt as _;
use crate::recovery::{RecoveryResult, recover_orphaned_runs};
use crate::scheduler::{RunScheduler, SchedulerState};
use crate::{ExecutionError, Result};

/// Options accepted by [`Engine::enqueue_run`].
///
/// `priority` and `max_attempts` arrive as floating point numbers from
/// untyped callers; they must be finite integers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueRunOptions {
    /// Higher runs first. Defaults to 0.
    pub priority: Option<f64>,
    /// Defaults to 1.
    pub max_attempts: Option<f64>,
    pub args: Option<serde_json::Value>,
    pub debug: Option<DebugConfig>,
    /// Overrides the flow's entry node.
    pub start_node_id: Option<String>,
}

impl EnqueueRunOptions {
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: f64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_start_node(mut self, node_id: impl Into<String>) -> Self {
        self.start_node_id = Some(node_id.into());
        self
    }
}

fn validate_priority(priority: Option<f64>) -> Result<i64> {
    let Some(priority) = priority else {
        return Ok(0);
    };
    if !priority.is_finite()
        || priority.fract() != 0.0
        || priority < i64::MIN as f64
        || priority >= i64::MAX as f64
    {
        return Err(report!(ExecutionError::InvalidPriority)
            .attach_printable(format!("priority: {priority}")));
    }
    Ok(priority as i64)
}

fn validate_max_attempts(max_attempts: Option<f64>) -> Result<u32> {
    let Some(max_attempts) = max_attempts else {
        return Ok(1);
    };
    let invalid = |message: &str| report!(ExecutionError::InvalidMaxAttempts(message.to_string()));
    if !max_attempts.is_finite() {
        return Err(invalid("maxAttempts must be a finite number"));
    }
    if max_attempts < 1.0 {
        return Err(invalid("maxAttempts must be >= 1"));
    }
    if max_attempts.fract() != 0.0 {
        return Err(invalid("maxAttempts must be an integer"));
    }
    if max_attempts > f64::from(u32::MAX) {
        return Err(invalid("maxAttempts is too large"));
    }
    Ok(max_attempts as u32)
}

/// Initial vars: flow variable defaults, overridden by object `args`.
fn seed_vars(flow: &FlowDefinition, args: Option<&serde_json::Value>) -> Vars {
    let mut vars = flow.default_vars();
    if let Some(serde_json::Value::Object(args)) = args {
        for (key, value) in args {
            vars.insert(key.clone(), value.clone());
        }
    }
    vars
}

/// Everything needed to create and enqueue one run.
struct NewRun {
    flow: Arc<FlowDefinition>,
    priority: i64,
    max_attempts: u32,
    args: Option<serde_json::Value>,
    debug: Option<DebugConfig>,
    start_node_id: Option<String>,
    trigger: Option<TriggerInfo>,
}

/// A single-process workflow engine.
///
/// Built with [`EngineBuilder`](crate::EngineBuilder). Call
/// [`start`](Self::start) before expecting queued runs to execute; runs can be
/// enqueued at any time.
pub struct Engine {
    store: Arc<dyn StateStore>,
    events: EventsBus,
    scheduler: RunScheduler,
    completions: RunCompletionNotifier,
}

impl Engine {
    pub(crate) fn new(
        store: Arc<dyn StateStore>,
        events: EventsBus,
        scheduler: RunScheduler,
    ) -> Self {
        let completions = RunCompletionNotifier::attach(&events);
        Self {
            store,
            events,
            scheduler,
            completions,
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        self.scheduler.owner_id()
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn events(&self) -> &EventsBus {
        &self.events
    }

    pub fn scheduler(&self) -> &RunScheduler {
        &self.scheduler
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Recover work left by previous processes, then start scheduling.
    pub async fn start(&self) -> Result<RecoveryResult> {
        let recovery =
            recover_orphaned_runs(&self.store, &self.events, self.owner_id(), Utc::now()).await?;
        self.scheduler.start().await?;
        Ok(recovery)
    }

    /// Stop scheduling. Runs in flight keep executing until they end or the
    /// process exits; their leases are recovered on the next start.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Validate and store a flow, replacing any flow with the same id.
    pub async fn register_flow(&self, flow: FlowDefinition) -> Result<()> {
        if let Err(e) = flow.validate() {
            return Err(report!(ExecutionError::InvalidFlow(flow.id.clone()))
                .attach_printable(e.to_string()));
        }
        log::info!("Registering flow '{}'", flow.id);
        self.store.put_flow(Arc::new(flow)).await.into_execution()
    }

    pub async fn get_flow(&self, flow_id: &str) -> Result<Option<Arc<FlowDefinition>>> {
        self.store.get_flow(flow_id).await.into_execution()
    }

    /// Store a trigger. Its flow must already be registered.
    pub async fn register_trigger(&self, trigger: TriggerSpec) -> Result<()> {
        self.load_flow(&trigger.flow_id).await?;
        log::info!(
            "Registering {} trigger '{}' for flow '{}'",
            trigger.kind,
            trigger.id,
            trigger.flow_id
        );
        self.store.put_trigger(trigger).await.into_execution()
    }

    /// Create a queued run of `flow_id` and wake the scheduler.
    pub async fn enqueue_run(&self, flow_id: &str, options: EnqueueRunOptions) -> Result<RunId> {
        let priority = validate_priority(options.priority)?;
        let max_attempts = validate_max_attempts(options.max_attempts)?;
        let flow = self.load_flow(flow_id).await?;
        self.create_run(NewRun {
            flow,
            priority,
            max_attempts,
            args: options.args,
            debug: options.debug,
            start_node_id: options.start_node_id,
            trigger: None,
        })
        .await
    }

    /// Handle a trigger firing: enqueue a run with the trigger's args, debug
    /// settings and priority.
    pub async fn on_trigger_fire(
        &self,
        trigger_id: &str,
        context: TriggerFireContext,
    ) -> Result<RunId> {
        let trigger = self
            .store
            .get_trigger(trigger_id)
            .await
            .into_execution()?
            .ok_or_else(|| report!(ExecutionError::TriggerNotFound(trigger_id.to_string())))?;
        if !trigger.enabled {
            return Err(report!(ExecutionError::TriggerDisabled(trigger.id)));
        }

        let flow = self.load_flow(&trigger.flow_id).await?;
        log::info!("Trigger '{}' fired for flow '{}'", trigger.id, flow.id);
        self.create_run(NewRun {
            flow,
            priority: trigger.priority.unwrap_or(0),
            max_attempts: 1,
            args: trigger.args,
            debug: trigger.debug,
            start_node_id: None,
            trigger: Some(TriggerInfo {
                trigger_id: trigger.id,
                kind: trigger.kind,
                fired_at: Utc::now(),
                source_tab_id: context.source_tab_id,
                source_url: context.source_url,
            }),
        })
        .await
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Arc<FlowDefinition>> {
        self.store
            .get_flow(flow_id)
            .await
            .into_execution()?
            .ok_or_else(|| report!(ExecutionError::FlowNotFound(flow_id.to_string())))
    }

    async fn create_run(&self, new_run: NewRun) -> Result<RunId> {
        let NewRun {
            flow,
            priority,
            max_attempts,
            args,
            debug,
            start_node_id,
            trigger,
        } = new_run;

        if let Some(node_id) = &start_node_id
            && !flow.has_node(node_id)
        {
            return Err(report!(ExecutionError::StartNodeNotFound {
                flow_id: flow.id.clone(),
                node_id: node_id.clone(),
            }));
        }

        let now = Utc::now();
        let run_id = Uuid::now_v7();
        let trigger_id = trigger.as_ref().map(|trigger| trigger.trigger_id.clone());

        let mut record = RunRecord::queued(run_id, flow.id.clone(), now);
        record.flow_version = flow.version;
        record.max_attempts = max_attempts;
        record.vars = seed_vars(&flow, args.as_ref());
        record.start_node_id = start_node_id;
        record.args = args;
        record.debug = debug;
        record.trigger = trigger;
        self.store.create_run(record).await.into_execution()?;

        let queued = self.queue_created_run(run_id, &flow, priority, max_attempts, trigger_id);
        if let Err(e) = queued.await {
            self.abandon_run(run_id, &e).await;
            return Err(e);
        }
        log::info!("Queued run {run_id} of flow '{}' (priority {priority})", flow.id);

        self.scheduler.kick().await?;
        Ok(run_id)
    }

    async fn queue_created_run(
        &self,
        run_id: RunId,
        flow: &FlowDefinition,
        priority: i64,
        max_attempts: u32,
        trigger_id: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        self.store
            .enqueue(
                NewQueueItem {
                    id: run_id,
                    flow_id: flow.id.clone(),
                    priority,
                    max_attempts,
                },
                now,
            )
            .await
            .into_execution()?;
        self.events
            .append(
                NewRunEvent::new(
                    run_id,
                    RunEventKind::RunQueued {
                        flow_id: flow.id.clone(),
                        priority,
                        trigger_id,
                    },
                )
                .at(now),
            )
            .await
            .into_execution()?;
        Ok(())
    }

    /// Fail a record whose queue item could not be set up, withdrawing the
    /// item if it was created. A run that was already claimed is left alone.
    async fn abandon_run(&self, run_id: RunId, cause: &error_stack::Report<ExecutionError>) {
        log::error!("Failed to queue run {run_id}: {cause:?}");
        match self.store.cancel(run_id, Utc::now(), None).await.into_execution() {
            Ok(_) => {}
            Err(e) if matches!(e.current_context(), ExecutionError::QueueItemNotFound(_)) => {}
            Err(e) => {
                log::warn!("Run {run_id} could not be withdrawn from the queue: {e:?}");
                return;
            }
        }
        let error = NodeError::internal(format!(
            "failed to queue run: {}",
            cause.current_context()
        ));
        let patch = RunPatch::at(Utc::now())
            .status(RunStatus::Failed)
            .error(error);
        if let Err(e) = self.store.patch_run(run_id, patch).await {
            log::error!("Failed to mark run {run_id} failed: {e:?}");
        }
    }

    /// Queue items in claim order, optionally filtered by status.
    pub async fn list_queue(&self, status: Option<QueueStatus>) -> Result<Vec<RunQueueItem>> {
        self.store.list_items(status).await.into_execution()
    }

    /// Remove a queued run and mark it canceled.
    ///
    /// Fails with `IllegalQueueStatus` if the run has already been claimed.
    pub async fn cancel_queue_item(
        &self,
        run_id: RunId,
        reason: Option<String>,
    ) -> Result<RunRecord> {
        let now = Utc::now();
        self.store
            .cancel(run_id, now, reason.clone())
            .await
            .into_execution()?;
        let record = self
            .store
            .patch_run(run_id, RunPatch::at(now).status(RunStatus::Canceled))
            .await
            .into_execution()?;
        self.events
            .append(NewRunEvent::new(run_id, RunEventKind::RunCanceled { reason }).at(now))
            .await
            .into_execution()?;
        log::info!("Canceled queued run {run_id}");
        Ok(record)
    }

    /// Ask a run executing in this engine to pause before its next node.
    pub fn pause_run(&self, run_id: RunId) -> Result<()> {
        let control = self
            .scheduler
            .control(run_id)
            .ok_or_else(|| report!(ExecutionError::RunNotActive(run_id)))?;
        log::info!("Pause requested for run {run_id}");
        control.request_pause();
        Ok(())
    }

    /// Continue a paused run from where it stopped, once a scheduler slot is
    /// free.
    pub async fn resume_run(&self, run_id: RunId) -> Result<()> {
        let record = self.get_run(run_id).await?;
        if record.status != RunStatus::Paused {
            return Err(report!(ExecutionError::UnexpectedRunStatus {
                run_id,
                status: record.status,
                expected: RunStatus::Paused,
            }));
        }
        self.scheduler
            .resume(run_id)
            .await
            .attach_printable_lazy(|| format!("resuming run {run_id}"))
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<RunRecord> {
        self.store
            .get_run(run_id)
            .await
            .into_execution()?
            .ok_or_else(|| report!(ExecutionError::RunNotFound(run_id)))
    }

    pub async fn list_events(&self, run_id: RunId) -> Result<Vec<RunEvent>> {
        self.events.list(run_id).await.into_execution()
    }

    /// Receive every event appended from now on, across all runs.
    pub fn subscribe<F>(&self, listener: F) -> EventSubscription
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// Wait until the run is terminal or paused.
    pub async fn wait_for_run(&self, run_id: RunId) -> Result<RunRecord> {
        self.completions.wait_for_run(&self.store, run_id).await
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use flowlane_core::{ErrorCode, NodeError, NodePolicy, OnErrorPolicy, VariableDef};
    use flowlane_mock::{MockBehavior, MockGate};
    use flowlane_state::{InMemoryStateStore, RunQueue as _, RunStore as _};
    use serde_json::json;

    use crate::testing::{
        EnqueueFailingStore, Harness, OWNER, edge, eventually, flow, linear_flow, mock_node,
    };
    use crate::{EngineBuilder, SchedulerConfig};

    fn engine(harness: &Harness) -> Engine {
        EngineBuilder::new(harness.state_store())
            .owner_id(OwnerId::new(OWNER))
            .events(harness.events.clone())
            .registry(harness.registry.clone())
            .build()
            .unwrap()
    }

    fn with_on_error(node: flowlane_core::Node, on_error: OnErrorPolicy) -> flowlane_core::Node {
        node.with_policy(NodePolicy {
            on_error: Some(on_error),
            ..NodePolicy::default()
        })
    }

    #[tokio::test]
    async fn test_enqueue_runs_to_success() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("checkout", &["a", "b"]))
            .await
            .unwrap();
        engine.start().await.unwrap();

        let run_id = engine
            .enqueue_run("checkout", EnqueueRunOptions::default())
            .await
            .unwrap();
        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(harness.mock.started_nodes(), vec!["a", "b"]);

        let types = harness.event_types(run_id).await;
        assert_eq!(types.first(), Some(&"run.queued"));
        assert_eq!(types.last(), Some(&"run.succeeded"));

        eventually("queue to drain", || async {
            engine.list_queue(None).await.unwrap().is_empty()
        })
        .await;
        engine.stop();
    }

    #[tokio::test]
    async fn test_stop_policy_runs_only_first_node() {
        let harness = Harness::new();
        harness.mock.behavior("a", MockBehavior::fail("boom"));
        let engine = engine(&harness);
        engine
            .register_flow(flow(
                "f",
                vec![with_on_error(mock_node("a"), OnErrorPolicy::Stop), mock_node("b")],
                vec![edge("a", "b", "default")],
            ))
            .await
            .unwrap();
        engine.start().await.unwrap();

        let run_id = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();
        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.map(|e| e.code), Some(ErrorCode::ToolError));
        assert_eq!(harness.mock.started_nodes(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_enqueue_fails_the_record() {
        let harness = Harness::new();
        let store = Arc::new(EnqueueFailingStore {
            inner: harness.store.clone(),
        });
        let engine = EngineBuilder::new(store)
            .owner_id(OwnerId::new(OWNER))
            .events(harness.events.clone())
            .registry(harness.registry.clone())
            .build()
            .unwrap();
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();
        engine.start().await.unwrap();

        let err = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.current_context(), &ExecutionError::StateError);

        let runs = harness.store.list_runs(Default::default()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_ref().unwrap().code, ErrorCode::Internal);
        assert!(runs[0].finished_at.is_some());
        assert!(harness.store.list_items(None).await.unwrap().is_empty());
        assert!(harness.event_types(runs[0].id).await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_validation() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();

        let err = engine
            .enqueue_run("f", EnqueueRunOptions::default().with_max_attempts(0.0))
            .await
            .unwrap_err();
        assert_eq!(err.current_context().to_string(), "maxAttempts must be >= 1");

        for priority in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            let err = engine
                .enqueue_run("f", EnqueueRunOptions::default().with_priority(priority))
                .await
                .unwrap_err();
            assert_eq!(err.current_context(), &ExecutionError::InvalidPriority);
        }

        let err = engine
            .enqueue_run("f", EnqueueRunOptions::default().with_max_attempts(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::InvalidMaxAttempts(_)
        ));

        let err = engine
            .enqueue_run("f", EnqueueRunOptions::default().with_start_node("missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::StartNodeNotFound { node_id, .. } if node_id == "missing"
        ));

        let err = engine
            .enqueue_run("nope", EnqueueRunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::FlowNotFound("nope".to_string())
        );

        assert!(engine.list_queue(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_while_stopped_records_everything() {
        let harness = Harness::new();
        let engine = engine(&harness);
        let mut definition = linear_flow("f", &["a", "b"]);
        definition.variables = vec![
            VariableDef {
                key: "greeting".to_string(),
                default: Some(json!("hello")),
            },
            VariableDef {
                key: "count".to_string(),
                default: None,
            },
        ];
        engine.register_flow(definition).await.unwrap();

        let run_id = engine
            .enqueue_run(
                "f",
                EnqueueRunOptions::default()
                    .with_priority(7.0)
                    .with_max_attempts(3.0)
                    .with_args(json!({"count": 2}))
                    .with_start_node("b"),
            )
            .await
            .unwrap();

        let record = engine.get_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Queued);
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.start_node_id.as_deref(), Some("b"));
        assert_eq!(record.vars.get("greeting"), Some(&json!("hello")));
        assert_eq!(record.vars.get("count"), Some(&json!(2)));

        let queue = engine.list_queue(Some(QueueStatus::Queued)).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].priority, 7);
        assert_eq!(queue[0].attempt, 0);

        let events = engine.list_events(run_id).await.unwrap();
        assert!(matches!(
            &events[0].kind,
            RunEventKind::RunQueued { priority: 7, trigger_id: None, .. }
        ));
        assert!(harness.mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_queue_in_claim_order() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for priority in [1.0, 10.0, 5.0] {
            ids.push(
                engine
                    .enqueue_run("f", EnqueueRunOptions::default().with_priority(priority))
                    .await
                    .unwrap(),
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let listed: Vec<RunId> = engine
            .list_queue(None)
            .await
            .unwrap()
            .iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(listed, vec![ids[1], ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn test_cancel_queue_item() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();

        let run_id = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();
        let record = engine
            .cancel_queue_item(run_id, Some("user".to_string()))
            .await
            .unwrap();
        assert_eq!(record.status, RunStatus::Canceled);
        assert!(record.finished_at.is_some());
        assert!(engine.list_queue(None).await.unwrap().is_empty());
        assert_eq!(
            harness.event_types(run_id).await,
            vec!["run.queued", "run.canceled"]
        );

        let err = engine.cancel_queue_item(run_id, None).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::QueueItemNotFound(run_id)
        );
    }

    #[tokio::test]
    async fn test_cancel_running_item_names_status() {
        let harness = Harness::new();
        let gate = MockGate::new();
        harness
            .mock
            .behavior("a", MockBehavior::wait(&gate, MockBehavior::succeed()));
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();
        engine.start().await.unwrap();

        let run_id = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();
        gate.wait_entered(1).await;

        let err = engine.cancel_queue_item(run_id, None).await.unwrap_err();
        assert!(err.current_context().to_string().contains("status is running"));
        assert_eq!(engine.get_run(run_id).await.unwrap().status, RunStatus::Running);

        gate.open();
        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_trigger_fire() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();
        let trigger = TriggerSpec {
            id: "on-url".to_string(),
            flow_id: "f".to_string(),
            kind: "url".to_string(),
            enabled: true,
            args: Some(json!({"q": "shoes"})),
            debug: Some(DebugConfig {
                breakpoints: vec!["a".to_string()],
                pause_on_start: false,
            }),
            priority: Some(4),
        };
        engine.register_trigger(trigger.clone()).await.unwrap();

        let run_id = engine
            .on_trigger_fire(
                "on-url",
                TriggerFireContext {
                    source_tab_id: Some(12),
                    source_url: Some("https://example.test/".to_string()),
                },
            )
            .await
            .unwrap();

        let record = engine.get_run(run_id).await.unwrap();
        let info = record.trigger.unwrap();
        assert_eq!(info.trigger_id, "on-url");
        assert_eq!(info.kind, "url");
        assert_eq!(info.source_tab_id, Some(12));
        assert_eq!(record.args, trigger.args);
        assert_eq!(record.debug, trigger.debug);
        assert_eq!(record.vars.get("q"), Some(&json!("shoes")));
        assert_eq!(engine.list_queue(None).await.unwrap()[0].priority, 4);

        let events = engine.list_events(run_id).await.unwrap();
        assert!(matches!(
            &events[0].kind,
            RunEventKind::RunQueued { trigger_id: Some(id), .. } if id == "on-url"
        ));

        engine
            .register_trigger(TriggerSpec {
                enabled: false,
                ..trigger.clone()
            })
            .await
            .unwrap();
        let err = engine
            .on_trigger_fire("on-url", TriggerFireContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::TriggerDisabled("on-url".to_string())
        );

        let err = engine
            .on_trigger_fire("missing", TriggerFireContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::TriggerNotFound("missing".to_string())
        );

        let err = engine
            .register_trigger(TriggerSpec {
                flow_id: "nope".to_string(),
                ..trigger
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::FlowNotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_register_invalid_flow() {
        let harness = Harness::new();
        let engine = engine(&harness);
        let mut definition = linear_flow("f", &["a"]);
        definition.entry_node_id = "missing".to_string();
        let err = engine.register_flow(definition).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &ExecutionError::InvalidFlow("f".to_string())
        );
        assert!(engine.get_flow("f").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_breakpoint_pause_and_resume() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a", "b"]))
            .await
            .unwrap();
        engine.start().await.unwrap();

        let run_id = engine
            .enqueue_run(
                "f",
                EnqueueRunOptions::default().with_debug(DebugConfig {
                    breakpoints: vec!["b".to_string()],
                    pause_on_start: false,
                }),
            )
            .await
            .unwrap();
        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Paused);
        assert_eq!(record.current_node_id.as_deref(), Some("b"));

        eventually("paused run to leave the scheduler", || async {
            engine.scheduler_state().active_run_ids.is_empty()
        })
        .await;
        let item = harness.store.get_item(run_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Paused);
        assert!(item.is_leased_by(&OwnerId::new(OWNER)));

        engine.resume_run(run_id).await.unwrap();
        eventually("resumed run to finish", || async {
            engine.get_run(run_id).await.unwrap().status == RunStatus::Succeeded
        })
        .await;
        assert_eq!(harness.mock.started_nodes(), vec!["a", "b"]);
        assert!(harness.event_types(run_id).await.contains(&"run.resumed"));

        let err = engine.resume_run(run_id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ExecutionError::UnexpectedRunStatus { status: RunStatus::Succeeded, .. }
        ));
    }

    #[tokio::test]
    async fn test_pause_requested_while_running() {
        let harness = Harness::new();
        let gate = MockGate::new();
        harness
            .mock
            .behavior("a", MockBehavior::wait(&gate, MockBehavior::succeed()));
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a", "b"]))
            .await
            .unwrap();

        let run_id = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();
        let err = engine.pause_run(run_id).unwrap_err();
        assert_eq!(err.current_context(), &ExecutionError::RunNotActive(run_id));

        engine.start().await.unwrap();
        gate.wait_entered(1).await;
        engine.pause_run(run_id).unwrap();
        gate.open();

        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Paused);
        assert_eq!(record.current_node_id.as_deref(), Some("b"));
        assert_eq!(harness.mock.started_nodes(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_events_in_order() {
        let harness = Harness::new();
        let engine = engine(&harness);
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = engine.subscribe(move |event| {
            sink.lock().unwrap().push(event.kind.type_name());
        });
        engine.start().await.unwrap();
        let run_id = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();
        engine.wait_for_run(run_id).await.unwrap();
        eventually("listener to see the final event", || async {
            seen.lock().unwrap().last() == Some(&"run.succeeded")
        })
        .await;
        drop(subscription);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, harness.event_types(run_id).await);
    }

    #[tokio::test]
    async fn test_start_recovers_previous_owner() {
        let store = Arc::new(InMemoryStateStore::new());
        let harness = Harness::with_store(store.clone());
        let run_id = harness.queued_run(linear_flow("f", &["a"]), None).await;
        let now = Utc::now();
        store
            .claim_next(OwnerId::new("crashed"), now)
            .await
            .unwrap()
            .unwrap();
        store
            .patch_run(run_id, RunPatch::at(now).status(RunStatus::Running))
            .await
            .unwrap();

        let engine = engine(&harness);
        let recovery = engine.start().await.unwrap();
        assert_eq!(recovery.requeued_running, vec![run_id]);

        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(record.attempt, 2);
        let types = harness.event_types(run_id).await;
        assert_eq!(types[0], "run.recovered");
    }

    #[tokio::test]
    async fn test_continue_policy_runs_next_node() {
        let harness = Harness::new();
        harness.mock.behavior(
            "a",
            MockBehavior::Fail(NodeError::new(ErrorCode::TargetNotFound, "no button")),
        );
        let engine = engine(&harness);
        engine
            .register_flow(flow(
                "f",
                vec![
                    with_on_error(mock_node("a"), OnErrorPolicy::Continue),
                    mock_node("b"),
                ],
                vec![edge("a", "b", "default")],
            ))
            .await
            .unwrap();
        engine.start().await.unwrap();

        let run_id = engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();
        let record = engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(harness.mock.started_nodes(), vec!["a", "b"]);
    }

    #[test]
    fn test_validate_numbers() {
        assert_eq!(validate_priority(None).unwrap(), 0);
        assert_eq!(validate_priority(Some(-3.0)).unwrap(), -3);
        assert_eq!(validate_max_attempts(None).unwrap(), 1);
        assert_eq!(validate_max_attempts(Some(5.0)).unwrap(), 5);
        assert!(validate_max_attempts(Some(2.5)).is_err());
        assert!(validate_max_attempts(Some(-1.0)).is_err());
        assert!(validate_max_attempts(Some(1e12)).is_err());
    }

    #[tokio::test]
    async fn test_scheduler_config_is_applied() {
        let harness = Harness::new();
        let engine = EngineBuilder::new(harness.state_store())
            .owner_id(OwnerId::new(OWNER))
            .registry(harness.registry.clone())
            .scheduler_config(SchedulerConfig {
                max_parallel_runs: 0,
                ..SchedulerConfig::default()
            })
            .build()
            .unwrap();
        engine
            .register_flow(linear_flow("f", &["a"]))
            .await
            .unwrap();
        engine.start().await.unwrap();
        engine
            .enqueue_run("f", EnqueueRunOptions::default())
            .await
            .unwrap();

        let state = engine.scheduler_state();
        assert!(state.started);
        assert_eq!(state.max_parallel_runs, 0);
        assert!(state.active_run_ids.is_empty());
        assert_eq!(
            engine.list_queue(Some(QueueStatus::Queued)).await.unwrap().len(),
            1
        );
    }
}
