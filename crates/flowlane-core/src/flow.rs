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

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::policy::NodePolicy;

/// Label of the edge followed after a successful node.
pub const EDGE_LABEL_DEFAULT: &str = "default";
/// Label of the edge followed on failure when the node sets no `onError` policy.
pub const EDGE_LABEL_ON_ERROR: &str = "onError";

/// An immutable graph of typed nodes and labeled edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Version recorded on runs started from this definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub entry_node_id: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Variables seeded into every new run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableDef>,
    #[serde(default, skip_serializing_if = "FlowPolicy::is_empty")]
    pub policy: FlowPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_node_policy: Option<NodePolicy>,
}

impl FlowPolicy {
    pub fn is_empty(&self) -> bool {
        self.run_timeout_ms.is_none() && self.default_node_policy.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique within the flow.
    pub id: String,
    /// Key into the node registry.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kind-specific configuration, opaque to the engine.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<NodePolicy>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: None,
            config: serde_json::Value::Null,
            policy: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_edge_label")]
    pub label: String,
}

fn default_edge_label() -> String {
    EDGE_LABEL_DEFAULT.to_string()
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowValidationError {
    #[error("flow has no nodes")]
    Empty,
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("duplicate edge id '{0}'")]
    DuplicateEdge(String),
    #[error("entry node '{0}' does not exist")]
    MissingEntryNode(String),
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },
    #[error("node '{from}' has more than one outgoing edge labeled '{label}'")]
    AmbiguousEdge { from: String, label: String },
}

impl FlowDefinition {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.node(node_id).is_some()
    }

    /// Check structural well-formedness of the graph.
    ///
    /// Cycles are allowed; runs are bounded by `policy.runTimeoutMs` instead.
    pub fn validate(&self) -> Result<(), FlowValidationError> {
        if self.nodes.is_empty() {
            return Err(FlowValidationError::Empty);
        }

        let mut node_ids = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !node_ids.insert(node.id.as_str()) {
                return Err(FlowValidationError::DuplicateNode(node.id.clone()));
            }
        }

        if !node_ids.contains(self.entry_node_id.as_str()) {
            return Err(FlowValidationError::MissingEntryNode(
                self.entry_node_id.clone(),
            ));
        }

        let mut edge_ids = HashSet::with_capacity(self.edges.len());
        let mut labels = HashSet::with_capacity(self.edges.len());
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(FlowValidationError::DuplicateEdge(edge.id.clone()));
            }
            for endpoint in [&edge.from, &edge.to] {
                if !node_ids.contains(endpoint.as_str()) {
                    return Err(FlowValidationError::DanglingEdge {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
            if !labels.insert((edge.from.as_str(), edge.label.as_str())) {
                return Err(FlowValidationError::AmbiguousEdge {
                    from: edge.from.clone(),
                    label: edge.label.clone(),
                });
            }
        }

        Ok(())
    }

    /// Initial run variables from the declared variable defaults.
    pub fn default_vars(&self) -> crate::Vars {
        self.variables
            .iter()
            .map(|var| {
                (
                    var.key.clone(),
                    var.default.clone().unwrap_or(serde_json::Value::Null),
                )
            })
            .collect()
    }
}
