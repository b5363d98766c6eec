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

use flowlane_core::{EventLogLevel, Node, NodeExecutionResult};
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};
use serde::Deserialize;

use crate::config::{parse_config, resolve_value};

fn default_level() -> EventLogLevel {
    EventLogLevel::Info
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LogConfig {
    /// A string, or a `$var`/`$arg` reference rendered as JSON.
    message: serde_json::Value,
    #[serde(default = "default_level")]
    level: EventLogLevel,
}

/// Appends a `log` event to the run history.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNode;

impl NodeDefinition for LogNode {
    fn kind(&self) -> &str {
        "log"
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        async move {
            let config: LogConfig = match parse_config(node) {
                Ok(config) => config,
                Err(error) => return error.into(),
            };
            let message = match resolve_value(context, &config.message) {
                serde_json::Value::String(message) => message,
                other => other.to_string(),
            };
            log::debug!("Run {} node '{}': {message}", context.run_id(), node.id);
            context.log(config.level, message).await;
            NodeExecutionResult::succeeded()
        }
        .boxed()
    }
}
