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

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use flowlane_core::{ErrorCode, Node, NodeError, NodeExecutionResult, NodeSuccess};
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};

use crate::MockGate;

/// Kind a [`MockNode`] registers under unless told otherwise.
pub const MOCK_KIND: &str = "mock";

/// What a mock node does on one attempt.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed(NodeSuccess),
    Fail(NodeError),
    /// Sleep, then behave as `then`. Returns a failure if the run is canceled
    /// while sleeping.
    Delay {
        duration: Duration,
        then: Box<MockBehavior>,
    },
    /// Park on `gate` until it opens, then behave as `then`.
    Wait {
        gate: MockGate,
        then: Box<MockBehavior>,
    },
    Panic(String),
}

impl MockBehavior {
    pub fn succeed() -> Self {
        Self::Succeed(NodeSuccess::default())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(NodeError::new(ErrorCode::ToolError, message))
    }

    pub fn delay(duration: Duration, then: MockBehavior) -> Self {
        Self::Delay {
            duration,
            then: Box::new(then),
        }
    }

    pub fn wait(gate: &MockGate, then: MockBehavior) -> Self {
        Self::Wait {
            gate: gate.clone(),
            then: Box::new(then),
        }
    }
}

impl From<NodeSuccess> for MockBehavior {
    fn from(success: NodeSuccess) -> Self {
        Self::Succeed(success)
    }
}

impl From<NodeError> for MockBehavior {
    fn from(error: NodeError) -> Self {
        Self::Fail(error)
    }
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub run_id: flowlane_core::RunId,
    pub node_id: String,
    pub attempt: u32,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, Vec<MockBehavior>>,
    calls: Vec<MockCall>,
}

/// A node definition whose behavior is scripted per node id.
///
/// The script for a node is a list indexed by attempt; the last entry repeats
/// once the list is exhausted. Nodes without a script succeed.
#[derive(Debug)]
pub struct MockNode {
    kind: String,
    state: Mutex<MockState>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    pub fn new() -> Self {
        Self::with_kind(MOCK_KIND)
    }

    pub fn with_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Use `behavior` for every attempt of `node_id`.
    pub fn behavior(&self, node_id: impl Into<String>, behavior: MockBehavior) -> &Self {
        self.script(node_id, vec![behavior])
    }

    /// Use `behaviors[attempt - 1]` for each attempt of `node_id`.
    pub fn script(&self, node_id: impl Into<String>, behaviors: Vec<MockBehavior>) -> &Self {
        self.lock().scripts.insert(node_id.into(), behaviors);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Node ids in invocation order, retries included.
    pub fn started_nodes(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|call| call.node_id.clone())
            .collect()
    }

    /// Attempts recorded for `node_id`, in invocation order.
    pub fn attempts(&self, node_id: &str) -> Vec<u32> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.node_id == node_id)
            .map(|call| call.attempt)
            .collect()
    }

    fn behavior_for(&self, context: &NodeContext) -> MockBehavior {
        let mut state = self.lock();
        state.calls.push(MockCall {
            run_id: context.run_id(),
            node_id: context.node_id().to_string(),
            attempt: context.attempt(),
        });
        let index = context.attempt().saturating_sub(1) as usize;
        state
            .scripts
            .get(context.node_id())
            .and_then(|script| script.get(index).or_else(|| script.last()))
            .cloned()
            .unwrap_or_else(MockBehavior::succeed)
    }
}

fn perform<'a>(
    behavior: MockBehavior,
    context: &'a NodeContext,
) -> BoxFuture<'a, NodeExecutionResult> {
    async move {
        match behavior {
            MockBehavior::Succeed(success) => NodeExecutionResult::Succeeded(success),
            MockBehavior::Fail(error) => NodeExecutionResult::Failed { error },
            MockBehavior::Delay { duration, then } => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => perform(*then, context).await,
                    _ = context.cancellation().cancelled() => {
                        NodeExecutionResult::failed(ErrorCode::Internal, "canceled while delayed")
                    }
                }
            }
            MockBehavior::Wait { gate, then } => {
                tokio::select! {
                    _ = gate.pass() => perform(*then, context).await,
                    _ = context.cancellation().cancelled() => {
                        NodeExecutionResult::failed(ErrorCode::Internal, "canceled while waiting")
                    }
                }
            }
            MockBehavior::Panic(message) => panic!("{message}"),
        }
    }
    .boxed()
}

impl NodeDefinition for MockNode {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        let behavior = self.behavior_for(context);
        log::debug!(
            "Mock node '{}' attempt {}: {behavior:?}",
            node.id,
            context.attempt()
        );
        perform(behavior, context)
    }
}
