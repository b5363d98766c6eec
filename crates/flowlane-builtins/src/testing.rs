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

//! Fixtures for built-in node tests.

use std::sync::Arc;

use flowlane_core::{Node, NodeExecutionResult, Vars};
use flowlane_plugin::{NodeContext, NodeDefinition, RunContext};
use flowlane_state::{EventStore, EventsBus, InMemoryStateStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) struct TestContext {
    pub store: Arc<InMemoryStateStore>,
    pub events: EventsBus,
    pub cancellation: CancellationToken,
    pub context: NodeContext,
}

impl TestContext {
    pub fn new(vars: serde_json::Value, args: Option<serde_json::Value>) -> Self {
        let store = Arc::new(InMemoryStateStore::new());
        let event_store: Arc<dyn EventStore> = store.clone();
        let events = EventsBus::new(event_store);
        let cancellation = CancellationToken::new();
        let vars: Vars = serde_json::from_value(vars).unwrap();
        let run = RunContext {
            run_id: Uuid::now_v7(),
            flow_id: "flow".to_string(),
            run_attempt: 1,
            args,
            trigger: None,
        };
        let context = NodeContext::new(
            Arc::new(run),
            "node",
            1,
            vars,
            store.clone(),
            events.clone(),
            cancellation.clone(),
        );
        Self {
            store,
            events,
            cancellation,
            context,
        }
    }

    pub async fn execute(
        &self,
        definition: &dyn NodeDefinition,
        config: serde_json::Value,
    ) -> NodeExecutionResult {
        let node = Node::new("node", definition.kind()).with_config(config);
        definition.execute(&self.context, &node).await
    }
}

pub(crate) fn context_with(vars: serde_json::Value, args: Option<serde_json::Value>) -> NodeContext {
    TestContext::new(vars, args).context
}
