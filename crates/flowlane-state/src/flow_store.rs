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

use std::sync::Arc;

use flowlane_core::{FlowDefinition, TriggerSpec};
use futures::future::BoxFuture;

use crate::Result;

/// Storage of flow definitions, keyed by flow id.
pub trait FlowStore: Send + Sync {
    /// Store a flow, replacing any previous definition with the same id.
    fn put_flow(&self, flow: Arc<FlowDefinition>) -> BoxFuture<'_, Result<()>>;

    fn get_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Arc<FlowDefinition>>>>;

    fn list_flows(&self) -> BoxFuture<'_, Result<Vec<Arc<FlowDefinition>>>>;

    /// Returns whether a flow was removed.
    fn delete_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<bool>>;
}

/// Storage of trigger specifications, keyed by trigger id.
pub trait TriggerStore: Send + Sync {
    fn put_trigger(&self, trigger: TriggerSpec) -> BoxFuture<'_, Result<()>>;

    fn get_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<Option<TriggerSpec>>>;

    fn list_triggers(&self) -> BoxFuture<'_, Result<Vec<TriggerSpec>>>;

    fn delete_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<bool>>;
}
