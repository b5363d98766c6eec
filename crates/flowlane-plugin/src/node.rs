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

use flowlane_core::{Node, NodeExecutionResult};
use futures::future::BoxFuture;

use crate::NodeContext;

/// An executable node kind.
///
/// Failures are reported as [`NodeExecutionResult::Failed`] so that the
/// runner can apply the node's error policy. Implementations should not panic;
/// a panic fails the whole run with an `INTERNAL` error.
pub trait NodeDefinition: Send + Sync {
    /// The `kind` this definition is registered under.
    fn kind(&self) -> &str;

    /// JSON schema of the node's `config`.
    fn schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult>;
}
