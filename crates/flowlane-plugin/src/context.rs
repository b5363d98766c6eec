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

//! Execution context handed to node definitions.

use std::sync::Arc;

use flowlane_core::{EventLogLevel, NewRunEvent, RunEventKind, RunId, TriggerInfo, Vars};
use flowlane_state::{EventsBus, StateStore};
use tokio_util::sync::CancellationToken;

/// Run-level information shared by every node of one run execution.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub flow_id: String,
    /// Queue attempt of the run (not of the node).
    pub run_attempt: u32,
    pub args: Option<serde_json::Value>,
    pub trigger: Option<TriggerInfo>,
}

/// Context for a single node attempt.
///
/// Holds a snapshot of the run variables taken before the attempt. Nodes
/// change variables by returning a vars patch, never through the context.
#[derive(Clone)]
pub struct NodeContext {
    run: Arc<RunContext>,
    node_id: String,
    attempt: u32,
    vars: Vars,
    store: Arc<dyn StateStore>,
    events: EventsBus,
    cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(
        run: Arc<RunContext>,
        node_id: impl Into<String>,
        attempt: u32,
        vars: Vars,
        store: Arc<dyn StateStore>,
        events: EventsBus,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run,
            node_id: node_id.into(),
            attempt,
            vars,
            store,
            events,
            cancellation,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run.run_id
    }

    pub fn flow_id(&self) -> &str {
        &self.run.flow_id
    }

    pub fn run_attempt(&self) -> u32 {
        self.run.run_attempt
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Attempt number of this node, starting at 1 and increasing with retries.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn var(&self, name: &str) -> Option<&serde_json::Value> {
        self.vars.get(name)
    }

    pub fn args(&self) -> Option<&serde_json::Value> {
        self.run.args.as_ref()
    }

    /// A field of the run arguments, when they are an object.
    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.run.args.as_ref()?.as_object()?.get(name)
    }

    pub fn trigger(&self) -> Option<&TriggerInfo> {
        self.run.trigger.as_ref()
    }

    /// Cancelled when the run is canceled. Long-running nodes should watch it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn get_persistent_var(
        &self,
        key: &str,
    ) -> flowlane_state::Result<Option<serde_json::Value>> {
        self.store.get_var(key).await
    }

    pub async fn set_persistent_var(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> flowlane_state::Result<()> {
        self.store.set_var(key, value).await
    }

    pub async fn delete_persistent_var(&self, key: &str) -> flowlane_state::Result<bool> {
        self.store.delete_var(key).await
    }

    /// Append a `log` event to the run's history.
    ///
    /// Logging is best effort: a failed append is reported through `log` and
    /// otherwise ignored.
    pub async fn log(&self, level: EventLogLevel, message: impl Into<String>) {
        let event = NewRunEvent::new(
            self.run.run_id,
            RunEventKind::Log {
                level,
                message: message.into(),
                node_id: Some(self.node_id.clone()),
            },
        );
        if let Err(e) = self.events.append(event).await {
            log::warn!(
                "Failed to append log event for run {}: {e:?}",
                self.run.run_id
            );
        }
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("run", &self.run)
            .field("node_id", &self.node_id)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
