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

//! Node-by-node execution of a single run.
//!
//! The runner walks the flow graph from the run's current position, applying
//! each node's error policy. Every position change is written to the run
//! record before the next node starts, so a paused or crashed run resumes
//! from durable state only.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use error_stack::report;
use flowlane_core::{
    Backoff, DebugConfig, EDGE_LABEL_DEFAULT, EDGE_LABEL_ON_ERROR, FailureDecision, FlowGraph,
    GotoTarget, NewRunEvent, NextTarget, Node, NodeError, NodeExecutionResult, NodePolicy,
    NodeSuccess, OnErrorPolicy, OwnerId, PauseReason, RetryPolicy, RunEvent, RunEventKind,
    RunPatch, RunQueueItem, RunRecord, RunStatus, Vars, apply_vars_patch,
};
use flowlane_observability::{NodeIdGuard, RunInfoGuard};
use flowlane_plugin::{NodeContext, NodeDefinition, NodeRegistry, RunContext};
use flowlane_state::{EventsBus, StateStore};
use futures::future::{BoxFuture, FutureExt as _};
use indexmap::IndexMap;
use tokio::time::Instant;

use crate::control::RunControl;
use crate::error::StateResultExt as _;
use crate::{ExecutionError, Result};

/// How a call to [`Runner::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Canceled,
    /// Suspended between nodes; the queue item stays leased and `paused`.
    Paused,
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunOutcome::Paused)
    }

    fn for_terminal_status(status: RunStatus) -> Option<Self> {
        match status {
            RunStatus::Succeeded => Some(RunOutcome::Succeeded),
            RunStatus::Failed => Some(RunOutcome::Failed),
            RunStatus::Canceled => Some(RunOutcome::Canceled),
            RunStatus::Queued | RunStatus::Running | RunStatus::Paused => None,
        }
    }
}

/// Executes claimed queue items on behalf of the scheduler.
pub trait RunExecutor: Send + Sync {
    fn execute(
        &self,
        item: RunQueueItem,
        control: RunControl,
    ) -> BoxFuture<'_, Result<RunOutcome>>;
}

/// Runs flows with the node kinds of one registry.
#[derive(Clone)]
pub struct Runner {
    owner_id: OwnerId,
    store: Arc<dyn StateStore>,
    events: EventsBus,
    registry: Arc<NodeRegistry>,
}

impl Runner {
    pub fn new(
        owner_id: OwnerId,
        store: Arc<dyn StateStore>,
        events: EventsBus,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            owner_id,
            store,
            events,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Execute the run behind `item` until it ends or pauses.
    ///
    /// The item must be leased to this runner's owner. A record that is
    /// already terminal is left untouched. A record that is `paused` is
    /// resumed at its current node.
    pub async fn run(&self, item: RunQueueItem, control: RunControl) -> Result<RunOutcome> {
        let record = self
            .store
            .get_run(item.id)
            .await
            .into_execution()?
            .ok_or_else(|| report!(ExecutionError::RunNotFound(item.id)))?;

        if let Some(outcome) = RunOutcome::for_terminal_status(record.status) {
            log::info!(
                "Run {} is already {}, nothing to execute",
                record.id,
                record.status
            );
            return Ok(outcome);
        }

        let resumed = record.status == RunStatus::Paused;
        let graph = match self.load_graph(&record).await? {
            Ok(graph) => graph,
            Err(error) => return self.fail_before_start(&record, error).await,
        };

        let start_node_id = record
            .current_node_id
            .clone()
            .or_else(|| record.start_node_id.clone())
            .unwrap_or_else(|| graph.entry_node_id().to_string());
        if graph.node(&start_node_id).is_none() {
            let error = NodeError::validation(format!(
                "start node '{start_node_id}' not found in flow '{}'",
                record.flow_id
            ));
            return self.fail_before_start(&record, error).await;
        }

        let execution = RunExecution::new(self, record, graph, control, item.attempt, resumed);
        execution.execute(start_node_id).await
    }

    async fn load_graph(
        &self,
        record: &RunRecord,
    ) -> Result<std::result::Result<FlowGraph, NodeError>> {
        let flow = self.store.get_flow(&record.flow_id).await.into_execution()?;
        Ok(match flow {
            None => Err(NodeError::validation(format!(
                "flow '{}' not found",
                record.flow_id
            ))),
            Some(flow) => FlowGraph::new(flow).map_err(|e| {
                NodeError::validation(format!("invalid flow '{}': {e}", record.flow_id))
            }),
        })
    }

    /// Fail a run that cannot start at all (missing flow or start node).
    async fn fail_before_start(&self, record: &RunRecord, error: NodeError) -> Result<RunOutcome> {
        log::warn!("Run {} cannot start: {}", record.id, error.message);
        self.store
            .patch_run(
                record.id,
                RunPatch::at(Utc::now())
                    .status(RunStatus::Failed)
                    .error(error.clone()),
            )
            .await
            .into_execution()?;
        self.events
            .append(NewRunEvent::new(
                record.id,
                RunEventKind::RunFailed {
                    error,
                    node_id: None,
                },
            ))
            .await
            .into_execution()?;
        Ok(RunOutcome::Failed)
    }
}

impl RunExecutor for Runner {
    fn execute(
        &self,
        item: RunQueueItem,
        control: RunControl,
    ) -> BoxFuture<'_, Result<RunOutcome>> {
        self.run(item, control).boxed()
    }
}

/// Where control goes after a node.
#[derive(Debug)]
enum Step {
    Next(String),
    End,
    Fail {
        error: NodeError,
        node_id: Option<String>,
    },
    Canceled,
}

#[derive(Debug)]
enum FailureAction {
    /// End the run failed with the node's error.
    Fail,
    Retry(Duration),
    Advance(Step),
}

enum Wait {
    Elapsed,
    Canceled,
    RunTimedOut,
}

/// State of one [`Runner::run`] call.
struct RunExecution<'a> {
    runner: &'a Runner,
    run: Arc<RunContext>,
    graph: FlowGraph,
    control: RunControl,
    debug: DebugConfig,
    vars: Vars,
    outputs: IndexMap<String, serde_json::Value>,
    resumed: bool,
    pause_on_start: bool,
    /// Breakpoint to ignore once, at the node a paused run resumes from.
    skip_breakpoint: Option<String>,
    /// Persisted retry attempt of the first node executed.
    resume_attempt: u32,
    started: Instant,
    deadline: Option<Instant>,
    run_timeout_ms: Option<u64>,
}

impl<'a> RunExecution<'a> {
    fn new(
        runner: &'a Runner,
        record: RunRecord,
        graph: FlowGraph,
        control: RunControl,
        attempt: u32,
        resumed: bool,
    ) -> Self {
        let debug = record.debug.unwrap_or_default();
        let pause_on_start = debug.pause_on_start && !resumed && record.current_node_id.is_none();
        let skip_breakpoint = if resumed {
            record.current_node_id.clone()
        } else {
            None
        };
        let resume_attempt = record.node_attempt;
        let run_timeout_ms = graph.flow().policy.run_timeout_ms;
        let started = Instant::now();
        let run = RunContext {
            run_id: record.id,
            flow_id: record.flow_id,
            run_attempt: attempt,
            args: record.args,
            trigger: record.trigger,
        };

        Self {
            runner,
            run: Arc::new(run),
            graph,
            control,
            debug,
            vars: record.vars,
            outputs: record.outputs,
            resumed,
            pause_on_start,
            skip_breakpoint,
            resume_attempt,
            started,
            deadline: run_timeout_ms.map(|ms| started + Duration::from_millis(ms)),
            run_timeout_ms,
        }
    }

    async fn execute(mut self, start_node_id: String) -> Result<RunOutcome> {
        self.patch(
            RunPatch::at(Utc::now())
                .status(RunStatus::Running)
                .attempt(self.run.run_attempt)
                .current_node(start_node_id.as_str()),
        )
        .await?;
        let started = if self.resumed {
            RunEventKind::RunResumed {
                attempt: self.run.run_attempt,
                node_id: start_node_id.clone(),
            }
        } else {
            RunEventKind::RunStarted {
                attempt: self.run.run_attempt,
                node_id: start_node_id.clone(),
            }
        };
        self.emit(started).await?;
        self.log(
            None,
            log::Level::Info,
            format_args!(
                "Run {} {} at node '{start_node_id}' (attempt {})",
                self.run.run_id,
                if self.resumed { "resumed" } else { "started" },
                self.run.run_attempt
            ),
        );

        let mut current = start_node_id;
        loop {
            if self.control.is_canceled() {
                return self.finish_canceled().await;
            }
            if self.deadline_passed() {
                let step = self.run_timeout_step(&current);
                return self.finish(step).await;
            }
            if let Some(reason) = self.pause_reason(&current) {
                return self.pause(current, reason).await;
            }

            match self.execute_node(&current).await? {
                Step::Next(next) => {
                    self.patch(
                        RunPatch::at(Utc::now())
                            .current_node(next.as_str())
                            .node_attempt(0)
                            .vars(self.vars.clone())
                            .outputs(self.outputs.clone()),
                    )
                    .await?;
                    current = next;
                }
                step => return self.finish(step).await,
            }
        }
    }

    fn pause_reason(&mut self, node_id: &str) -> Option<PauseReason> {
        if self.control.is_pause_requested() {
            return Some(PauseReason::Requested);
        }
        if std::mem::take(&mut self.pause_on_start) {
            return Some(PauseReason::PauseOnStart);
        }
        if let Some(skip) = self.skip_breakpoint.take()
            && skip == node_id
        {
            return None;
        }
        if self.debug.has_breakpoint(node_id) {
            return Some(PauseReason::Breakpoint);
        }
        None
    }

    async fn pause(&mut self, node_id: String, reason: PauseReason) -> Result<RunOutcome> {
        let now = Utc::now();
        self.patch(
            RunPatch::at(now)
                .status(RunStatus::Paused)
                .current_node(node_id.as_str())
                .vars(self.vars.clone())
                .outputs(self.outputs.clone()),
        )
        .await?;
        self.runner
            .store
            .mark_paused(self.run.run_id, self.runner.owner_id.clone(), now)
            .await
            .into_execution()?;
        self.emit(RunEventKind::RunPaused {
            node_id: node_id.clone(),
            reason,
        })
        .await?;
        self.log(
            Some(&node_id),
            log::Level::Info,
            format_args!("Run {} paused before node '{node_id}' ({reason:?})", self.run.run_id),
        );
        Ok(RunOutcome::Paused)
    }

    /// Run every attempt of one node and decide where control goes next.
    async fn execute_node(&mut self, node_id: &str) -> Result<Step> {
        let Some(node) = self.graph.node(node_id).cloned() else {
            return Ok(Step::Fail {
                error: NodeError::validation(format!("node '{node_id}' not found")),
                node_id: Some(node_id.to_string()),
            });
        };
        let policy = self.graph.policy_for(&node);
        let definition = self.runner.registry.get(&node.kind);

        let mut attempt = std::mem::take(&mut self.resume_attempt).max(1);
        if attempt > 1 {
            log::debug!(
                "Run {} continues node '{node_id}' at attempt {attempt}",
                self.run.run_id
            );
        }
        loop {
            self.emit(RunEventKind::NodeStarted {
                node_id: node.id.clone(),
                attempt,
            })
            .await?;
            let started = Instant::now();

            let result = match &definition {
                Some(definition) => {
                    match self
                        .invoke(definition.as_ref(), &node, attempt, policy.timeout_ms)
                        .await
                    {
                        Some(result) => result,
                        None => return Ok(self.run_timeout_step(&node.id)),
                    }
                }
                None => NodeExecutionResult::Failed {
                    error: NodeError::unsupported_node(&node.kind),
                },
            };

            let error = match result {
                NodeExecutionResult::Succeeded(success) => {
                    return self
                        .on_success(&node, attempt, success, started.elapsed())
                        .await;
                }
                NodeExecutionResult::Failed { error } => error,
            };

            if self.control.is_canceled() {
                self.emit_node_failed(&node, attempt, &error, FailureDecision::Stop)
                    .await?;
                return Ok(Step::Canceled);
            }

            let (decision, action) = self.decide(&node, &policy, attempt, &error);
            self.log(
                Some(&node.id),
                log::Level::Info,
                format_args!(
                    "Node '{}' failed on attempt {attempt} with {}: {} (decision {decision:?})",
                    node.id, error.code, error.message
                ),
            );
            self.emit_node_failed(&node, attempt, &error, decision).await?;

            match action {
                FailureAction::Fail => {
                    return Ok(Step::Fail {
                        error,
                        node_id: Some(node.id.clone()),
                    });
                }
                FailureAction::Advance(step) => return Ok(step),
                FailureAction::Retry(delay) => {
                    self.patch(RunPatch::at(Utc::now()).node_attempt(attempt + 1))
                        .await?;
                    match self.wait(delay).await {
                        Wait::Elapsed => attempt += 1,
                        Wait::Canceled => return Ok(Step::Canceled),
                        Wait::RunTimedOut => return Ok(self.run_timeout_step(&node.id)),
                    }
                }
            }
        }
    }

    /// Execute one attempt. Returns `None` if the run deadline passed first.
    async fn invoke(
        &self,
        definition: &dyn NodeDefinition,
        node: &Node,
        attempt: u32,
        timeout_ms: Option<u64>,
    ) -> Option<NodeExecutionResult> {
        let context = NodeContext::new(
            self.run.clone(),
            node.id.clone(),
            attempt,
            self.vars.clone(),
            self.runner.store.clone(),
            self.runner.events.clone(),
            self.control.cancellation_token().clone(),
        );

        let execution = async {
            let execution = definition.execute(&context, node);
            match timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), execution).await
                {
                    Ok(result) => result,
                    Err(_) => NodeExecutionResult::Failed {
                        error: NodeError::timeout(format!(
                            "node '{}' timed out after {ms}ms",
                            node.id
                        )),
                    },
                },
                None => execution.await,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                result = execution => Some(result),
                _ = tokio::time::sleep_until(deadline) => None,
            },
            None => Some(execution.await),
        }
    }

    async fn on_success(
        &mut self,
        node: &Node,
        attempt: u32,
        success: NodeSuccess,
        took: Duration,
    ) -> Result<Step> {
        let NodeSuccess {
            vars_patch,
            next,
            outputs,
        } = success;

        if !vars_patch.is_empty() {
            apply_vars_patch(&mut self.vars, &vars_patch);
            self.emit(RunEventKind::VarsPatched {
                node_id: node.id.clone(),
                patch: vars_patch,
            })
            .await?;
        }
        if let Some(outputs) = outputs {
            self.outputs.insert(node.id.clone(), outputs);
        }
        self.emit(RunEventKind::NodeSucceeded {
            node_id: node.id.clone(),
            attempt,
            took_ms: millis(took),
        })
        .await?;

        Ok(match next {
            None => self.follow_edge(&node.id, EDGE_LABEL_DEFAULT),
            Some(NextTarget::EdgeLabel { label }) => self.follow_edge(&node.id, &label),
            Some(NextTarget::Node { node_id }) => self.jump(&node.id, node_id),
            Some(NextTarget::End) => Step::End,
        })
    }

    /// Evaluate the error policy of a failed attempt.
    fn decide(
        &self,
        node: &Node,
        policy: &NodePolicy,
        attempt: u32,
        error: &NodeError,
    ) -> (FailureDecision, FailureAction) {
        match &policy.on_error {
            Some(OnErrorPolicy::Stop) => (FailureDecision::Stop, FailureAction::Fail),
            Some(OnErrorPolicy::Continue) => (
                FailureDecision::Continue,
                FailureAction::Advance(self.follow_edge(&node.id, EDGE_LABEL_DEFAULT)),
            ),
            Some(OnErrorPolicy::Retry) => {
                let retry = policy
                    .retry
                    .clone()
                    .unwrap_or_else(|| RetryPolicy::new(0, 0, Backoff::Fixed));
                // Exhaustion still reports `retry`: the decision is made
                // before the budget is checked.
                if attempt < retry.max_attempts() {
                    (
                        FailureDecision::Retry,
                        FailureAction::Retry(retry.delay(attempt)),
                    )
                } else {
                    (FailureDecision::Retry, FailureAction::Fail)
                }
            }
            Some(OnErrorPolicy::Goto { target }) => {
                let step = match target {
                    GotoTarget::EdgeLabel { edge_label } => {
                        match self.graph.edge(&node.id, edge_label) {
                            Some(edge) => Step::Next(edge.to.clone()),
                            None => Step::Fail {
                                error: NodeError::validation(format!(
                                    "node '{}' has no outgoing edge labeled '{edge_label}'",
                                    node.id
                                ))
                                .with_data(serde_json::json!({ "cause": error })),
                                node_id: Some(node.id.clone()),
                            },
                        }
                    }
                    GotoTarget::Node { node_id } => self.jump(&node.id, node_id.clone()),
                };
                (FailureDecision::Goto, FailureAction::Advance(step))
            }
            None => match self.graph.edge(&node.id, EDGE_LABEL_ON_ERROR) {
                Some(edge) => (
                    FailureDecision::Goto,
                    FailureAction::Advance(Step::Next(edge.to.clone())),
                ),
                None => (FailureDecision::Stop, FailureAction::Fail),
            },
        }
    }

    /// Follow the edge labeled `label`, ending the run if there is none.
    fn follow_edge(&self, from: &str, label: &str) -> Step {
        match self.graph.edge(from, label) {
            Some(edge) => Step::Next(edge.to.clone()),
            None => Step::End,
        }
    }

    fn jump(&self, from: &str, node_id: String) -> Step {
        if self.graph.node(&node_id).is_some() {
            Step::Next(node_id)
        } else {
            Step::Fail {
                error: NodeError::validation(format!("target node '{node_id}' not found")),
                node_id: Some(from.to_string()),
            }
        }
    }

    /// Sleep before a retry, unless the run is canceled or times out first.
    async fn wait(&self, delay: Duration) -> Wait {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => Wait::Elapsed,
            _ = self.control.canceled() => Wait::Canceled,
            _ = deadline => Wait::RunTimedOut,
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn run_timeout_step(&self, node_id: &str) -> Step {
        Step::Fail {
            error: NodeError::timeout(format!(
                "run exceeded its timeout of {}ms",
                self.run_timeout_ms.unwrap_or_default()
            )),
            node_id: Some(node_id.to_string()),
        }
    }

    async fn finish(&mut self, step: Step) -> Result<RunOutcome> {
        match step {
            Step::End => self.finish_succeeded().await,
            Step::Fail { error, node_id } => self.finish_failed(error, node_id).await,
            Step::Canceled => self.finish_canceled().await,
            Step::Next(node_id) => Err(report!(ExecutionError::internal(format!(
                "cannot finish run at pending node '{node_id}'"
            )))),
        }
    }

    async fn finish_succeeded(&mut self) -> Result<RunOutcome> {
        self.patch(
            RunPatch::at(Utc::now())
                .status(RunStatus::Succeeded)
                .vars(self.vars.clone())
                .outputs(self.outputs.clone()),
        )
        .await?;
        let took_ms = millis(self.started.elapsed());
        self.emit(RunEventKind::RunSucceeded {
            took_ms,
            outputs: self.outputs.clone(),
        })
        .await?;
        self.log(
            None,
            log::Level::Info,
            format_args!("Run {} succeeded in {took_ms}ms", self.run.run_id),
        );
        Ok(RunOutcome::Succeeded)
    }

    async fn finish_failed(
        &mut self,
        error: NodeError,
        node_id: Option<String>,
    ) -> Result<RunOutcome> {
        self.patch(
            RunPatch::at(Utc::now())
                .status(RunStatus::Failed)
                .vars(self.vars.clone())
                .outputs(self.outputs.clone())
                .error(error.clone()),
        )
        .await?;
        self.log(
            node_id.as_deref(),
            log::Level::Info,
            format_args!(
                "Run {} failed with {}: {}",
                self.run.run_id, error.code, error.message
            ),
        );
        self.emit(RunEventKind::RunFailed { error, node_id }).await?;
        Ok(RunOutcome::Failed)
    }

    async fn finish_canceled(&mut self) -> Result<RunOutcome> {
        self.patch(
            RunPatch::at(Utc::now())
                .status(RunStatus::Canceled)
                .vars(self.vars.clone())
                .outputs(self.outputs.clone()),
        )
        .await?;
        self.emit(RunEventKind::RunCanceled { reason: None }).await?;
        self.log(
            None,
            log::Level::Info,
            format_args!("Run {} canceled", self.run.run_id),
        );
        Ok(RunOutcome::Canceled)
    }

    async fn emit_node_failed(
        &self,
        node: &Node,
        attempt: u32,
        error: &NodeError,
        decision: FailureDecision,
    ) -> Result<()> {
        self.emit(RunEventKind::NodeFailed {
            node_id: node.id.clone(),
            attempt,
            error: error.clone(),
            decision,
        })
        .await?;
        Ok(())
    }

    async fn patch(&self, patch: RunPatch) -> Result<RunRecord> {
        self.runner
            .store
            .patch_run(self.run.run_id, patch)
            .await
            .into_execution()
    }

    async fn emit(&self, kind: RunEventKind) -> Result<RunEvent> {
        self.runner
            .events
            .append(NewRunEvent::new(self.run.run_id, kind))
            .await
            .into_execution()
    }

    /// Log with the run and node attached. The diagnostic guards live only for
    /// this call, never across an await point.
    fn log(&self, node_id: Option<&str>, level: log::Level, args: std::fmt::Arguments<'_>) {
        let _run = RunInfoGuard::new(self.run.flow_id.as_str(), self.run.run_id.to_string());
        let _node = node_id.map(NodeIdGuard::new);
        log::log!(level, "{args}");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
