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

use flowlane_core::{ErrorCode, Node, NodeExecutionResult, NodeSuccess, VarsPatchOp};
use flowlane_plugin::{NodeContext, NodeDefinition};
use futures::future::{BoxFuture, FutureExt as _};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::config::{parse_config, resolve_value};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetVarsConfig {
    /// Variables to set. Values may reference `$var`/`$arg`.
    #[serde(default)]
    set: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    delete: Vec<String>,
    /// Persistent vars to write, surviving the run.
    #[serde(default)]
    persist: IndexMap<String, serde_json::Value>,
}

/// Patches run variables from its config.
///
/// Sets are applied before deletes, in config order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetVarsNode;

impl NodeDefinition for SetVarsNode {
    fn kind(&self) -> &str {
        "setVars"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "set": { "type": "object" },
                "delete": { "type": "array", "items": { "type": "string" } },
                "persist": { "type": "object" },
            },
            "additionalProperties": false,
        })
    }

    fn execute<'a>(
        &'a self,
        context: &'a NodeContext,
        node: &'a Node,
    ) -> BoxFuture<'a, NodeExecutionResult> {
        async move {
            let config: SetVarsConfig = match parse_config(node) {
                Ok(config) => config,
                Err(error) => return error.into(),
            };

            for (key, value) in &config.persist {
                let value = resolve_value(context, value);
                if let Err(e) = context.set_persistent_var(key, value).await {
                    return NodeExecutionResult::failed(
                        ErrorCode::Internal,
                        format!("failed to persist '{key}': {}", e.current_context()),
                    );
                }
            }

            let mut patch: Vec<VarsPatchOp> = config
                .set
                .iter()
                .map(|(name, value)| VarsPatchOp::set(name, resolve_value(context, value)))
                .collect();
            patch.extend(config.delete.into_iter().map(VarsPatchOp::delete));
            NodeSuccess::default().with_vars_patch(patch).into()
        }
        .boxed()
    }
}
