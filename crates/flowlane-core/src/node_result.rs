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

use serde::{Deserialize, Serialize};

use crate::Vars;
use crate::error_code::{ErrorCode, NodeError};

/// One mutation of the run variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum VarsPatchOp {
    Set {
        name: String,
        value: serde_json::Value,
    },
    Delete {
        name: String,
    },
}

impl VarsPatchOp {
    pub fn set(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self::Set {
            name: name.into(),
            value,
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::Delete { name: name.into() }
    }
}

/// Apply a patch to `vars` in order. Later ops on the same name win.
pub fn apply_vars_patch(vars: &mut Vars, patch: &[VarsPatchOp]) {
    for op in patch {
        match op {
            VarsPatchOp::Set { name, value } => {
                vars.insert(name.clone(), value.clone());
            }
            VarsPatchOp::Delete { name } => {
                vars.shift_remove(name);
            }
        }
    }
}

/// Explicit successor chosen by a node instead of its `default` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum NextTarget {
    /// Follow the outgoing edge with this label (e.g. `true`/`false`).
    EdgeLabel { label: String },
    /// Jump to this node.
    #[serde(rename_all = "camelCase")]
    Node { node_id: String },
    /// Finish the run successfully.
    End,
}

impl NextTarget {
    pub fn edge_label(label: impl Into<String>) -> Self {
        Self::EdgeLabel {
            label: label.into(),
        }
    }
}

/// Successful outcome of a node attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSuccess {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars_patch: Vec<VarsPatchOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
}

impl NodeSuccess {
    pub fn with_vars_patch(mut self, patch: Vec<VarsPatchOp>) -> Self {
        self.vars_patch = patch;
        self
    }

    pub fn with_next(mut self, next: NextTarget) -> Self {
        self.next = Some(next);
        self
    }

    pub fn with_outputs(mut self, outputs: serde_json::Value) -> Self {
        self.outputs = Some(outputs);
        self
    }
}

/// Result of invoking a node definition once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum NodeExecutionResult {
    Succeeded(NodeSuccess),
    Failed { error: NodeError },
}

impl NodeExecutionResult {
    pub fn succeeded() -> Self {
        Self::Succeeded(NodeSuccess::default())
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failed {
            error: NodeError::new(code, message),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

impl From<NodeSuccess> for NodeExecutionResult {
    fn from(success: NodeSuccess) -> Self {
        Self::Succeeded(success)
    }
}

impl From<NodeError> for NodeExecutionResult {
    fn from(error: NodeError) -> Self {
        Self::Failed { error }
    }
}
