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

use std::time::Duration;

use flowlane_core::{ErrorCode, Node, NodeExecutionResult};
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};
use serde::Deserialize;

use crate::config::parse_config;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DelayConfig {
    ms: u64,
}

/// Sleeps for `ms` milliseconds.
///
/// Fails with `INTERNAL` if the run is canceled while sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayNode;

impl NodeDefinition for DelayNode {
    fn kind(&self) -> &str {
        "delay"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "ms": { "type": "integer", "minimum": 0 } },
            "required": ["ms"],
            "additionalProperties": false,
        })
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        async move {
            let config: DelayConfig = match parse_config(node) {
                Ok(config) => config,
                Err(error) => return error.into(),
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(config.ms)) => {
                    NodeExecutionResult::succeeded()
                }
                _ = context.cancellation().cancelled() => {
                    NodeExecutionResult::failed(ErrorCode::Internal, "run canceled during delay")
                }
            }
        }
        .boxed()
    }
}
