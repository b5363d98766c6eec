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

use flowlane_core::{ErrorCode, Node, NodeError, NodeExecutionResult};
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};
use serde::Deserialize;

use crate::config::{parse_config, resolve_value};

fn default_code() -> ErrorCode {
    ErrorCode::ToolError
}

fn default_message() -> String {
    "failed by flow".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FailConfig {
    #[serde(default = "default_code")]
    code: ErrorCode,
    #[serde(default = "default_message")]
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Always fails with the configured error, handing control to the node's
/// error policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailNode;

impl NodeDefinition for FailNode {
    fn kind(&self) -> &str {
        "fail"
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        async move {
            let config: FailConfig = match parse_config(node) {
                Ok(config) => config,
                Err(error) => return error.into(),
            };
            let mut error = NodeError::new(config.code, config.message);
            if let Some(data) = &config.data {
                error = error.with_data(resolve_value(context, data));
            }
            error.into()
        }
        .boxed()
    }
}
