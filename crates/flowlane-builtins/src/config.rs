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

use flowlane_core::{Node, NodeError};
use flowlane_plugin::NodeContext;
use serde::de::DeserializeOwned;

/// Deserialize a node's `config`. A missing config reads as `{}`.
pub fn parse_config<T: DeserializeOwned>(node: &Node) -> Result<T, NodeError> {
    let config = if node.config.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        node.config.clone()
    };
    serde_json::from_value(config).map_err(|e| {
        NodeError::validation(format!(
            "invalid config for {} node '{}': {e}",
            node.kind, node.id
        ))
    })
}

/// Resolve references in a config value.
///
/// `{"$var": "name"}` reads a run variable and `{"$arg": "name"}` a run
/// argument; both read as `null` when absent. Arrays and objects are resolved
/// recursively, everything else is returned as is.
pub fn resolve_value(context: &NodeContext, value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(object) if object.len() == 1 => {
            if let Some(serde_json::Value::String(name)) = object.get("$var") {
                return context.var(name).cloned().unwrap_or_default();
            }
            if let Some(serde_json::Value::String(name)) = object.get("$arg") {
                return context.arg(name).cloned().unwrap_or_default();
            }
            resolve_object(context, object)
        }
        serde_json::Value::Object(object) => resolve_object(context, object),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| resolve_value(context, item))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_object(
    context: &NodeContext,
    object: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    serde_json::Value::Object(
        object
            .iter()
            .map(|(key, value)| (key.clone(), resolve_value(context, value)))
            .collect(),
    )
}
