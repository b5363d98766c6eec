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

use flowlane_core::{NextTarget, Node, NodeExecutionResult, NodeSuccess};
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};
use serde::Deserialize;

use crate::config::{parse_config, resolve_value};

pub const EDGE_LABEL_TRUE: &str = "true";
pub const EDGE_LABEL_FALSE: &str = "false";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IfConfig {
    /// Variable to test.
    var: String,
    /// Compare for equality instead of testing truthiness.
    #[serde(default)]
    equals: Option<serde_json::Value>,
}

/// `null`, `false`, `0`, `""` and empty collections are false.
fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(serde_json::Value::Object(object)) => !object.is_empty(),
    }
}

/// Branches on a run variable by following the `true` or `false` edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct IfNode;

impl NodeDefinition for IfNode {
    fn kind(&self) -> &str {
        "if"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "var": { "type": "string" },
                "equals": {},
            },
            "required": ["var"],
            "additionalProperties": false,
        })
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        async move {
            let config: IfConfig = match parse_config(node) {
                Ok(config) => config,
                Err(error) => return error.into(),
            };
            let value = context.var(&config.var);
            let outcome = match &config.equals {
                Some(expected) => value
                    .is_some_and(|value| value == &resolve_value(context, expected)),
                None => is_truthy(value),
            };
            let label = if outcome {
                EDGE_LABEL_TRUE
            } else {
                EDGE_LABEL_FALSE
            };
            NodeSuccess::default()
                .with_next(NextTarget::edge_label(label))
                .into()
        }
        .boxed()
    }
}
