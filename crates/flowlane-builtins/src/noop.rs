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
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};

/// Does nothing and follows the `default` edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNode;

impl NodeDefinition for NoopNode {
    fn kind(&self) -> &str {
        "noop"
    }

    fn execute<'a>(
        &'a self,
        _context: &'a NodeContext,
        _node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        async { NodeExecutionResult::succeeded() }.boxed()
    }
}
