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

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error_code::NodeError;
use crate::status::RunStatus;
use crate::{RunId, Vars};

/// Where a run came from when started by a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    pub trigger_id: String,
    pub kind: String,
    pub fired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tab_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Debugging options attached to a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfig {
    /// Node ids to pause before.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakpoints: Vec<String>,
    /// Pause before the first node.
    #[serde(default)]
    pub pause_on_start: bool,
}

impl DebugConfig {
    pub fn has_breakpoint(&self, node_id: &str) -> bool {
        self.breakpoints.iter().any(|id| id == node_id)
    }
}

/// Durable, authoritative lifecycle state of one flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: RunId,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_version: Option<u32>,
    pub status: RunStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub vars: Vars,
    /// Overrides the flow's entry node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,
    /// Node the run will execute (or re-execute) next; the resume point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    /// Attempt `current_node_id` continues at after a retry backoff. Zero
    /// until the node has failed and is due a retry.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub node_attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugConfig>,
    /// Outputs captured from succeeded nodes, keyed by node id.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// A freshly queued run with no attempts yet.
    pub fn queued(id: RunId, flow_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            flow_id: flow_id.into(),
            flow_version: None,
            status: RunStatus::Queued,
            attempt: 0,
            max_attempts: 1,
            vars: Vars::new(),
            start_node_id: None,
            current_node_id: None,
            node_attempt: 0,
            trigger: None,
            args: None,
            debug: None,
            outputs: IndexMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn apply(&mut self, patch: RunPatch) {
        let RunPatch {
            status,
            attempt,
            vars,
            current_node_id,
            node_attempt,
            outputs,
            error,
            finished_at,
            updated_at,
        } = patch;

        if let Some(status) = status {
            self.status = status;
        }
        if let Some(attempt) = attempt {
            self.attempt = attempt;
        }
        if let Some(vars) = vars {
            self.vars = vars;
        }
        if let Some(node_id) = current_node_id {
            self.current_node_id = Some(node_id);
        }
        if let Some(node_attempt) = node_attempt {
            self.node_attempt = node_attempt;
        }
        if let Some(outputs) = outputs {
            self.outputs = outputs;
        }
        if let Some(error) = error {
            self.error = Some(error);
        }
        if let Some(finished_at) = finished_at {
            self.finished_at = Some(finished_at);
        }
        self.updated_at = updated_at;
    }
}

/// Partial update of a [`RunRecord`]; unset fields are left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub attempt: Option<u32>,
    pub vars: Option<Vars>,
    pub current_node_id: Option<String>,
    pub node_attempt: Option<u32>,
    pub outputs: Option<IndexMap<String, serde_json::Value>>,
    pub error: Option<NodeError>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RunPatch {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            attempt: None,
            vars: None,
            current_node_id: None,
            node_attempt: None,
            outputs: None,
            error: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        if status.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn vars(mut self, vars: Vars) -> Self {
        self.vars = Some(vars);
        self
    }

    pub fn current_node(mut self, node_id: impl Into<String>) -> Self {
        self.current_node_id = Some(node_id.into());
        self
    }

    pub fn node_attempt(mut self, attempt: u32) -> Self {
        self.node_attempt = Some(attempt);
        self
    }

    pub fn outputs(mut self, outputs: IndexMap<String, serde_json::Value>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn error(mut self, error: NodeError) -> Self {
        self.error = Some(error);
        self
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_patch_terminal_sets_finished_at() {
        let now = Utc::now();
        let mut record = RunRecord::queued(Uuid::now_v7(), "flow", now);

        record.apply(RunPatch::at(now).status(RunStatus::Running).attempt(1));
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.attempt, 1);
        assert!(record.finished_at.is_none());

        let later = now + chrono::TimeDelta::seconds(5);
        record.apply(RunPatch::at(later).status(RunStatus::Succeeded));
        assert_eq!(record.finished_at, Some(later));
        assert_eq!(record.updated_at, later);
        assert_eq!(record.attempt, 1);
    }

    #[test]
    fn test_patch_leaves_unset_fields() {
        let now = Utc::now();
        let mut record = RunRecord::queued(Uuid::now_v7(), "flow", now);
        record.vars.insert("x".to_string(), json!(1));
        record.current_node_id = Some("a".to_string());

        record.apply(RunPatch::at(now).error(NodeError::internal("boom")));
        assert_eq!(record.vars.get("x"), Some(&json!(1)));
        assert_eq!(record.current_node_id.as_deref(), Some("a"));
        assert_eq!(record.status, RunStatus::Queued);
    }

    #[test]
    fn test_node_attempt_survives_other_patches() {
        let now = Utc::now();
        let mut record = RunRecord::queued(Uuid::now_v7(), "flow", now);
        record.apply(RunPatch::at(now).current_node("a").node_attempt(2));
        record.apply(RunPatch::at(now).vars(Vars::new()));
        assert_eq!(record.node_attempt, 2);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["nodeAttempt"], json!(2));

        record.apply(RunPatch::at(now).current_node("b").node_attempt(0));
        assert_eq!(record.node_attempt, 0);
    }

    #[test]
    fn test_record_serialization() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mut record = RunRecord::queued(Uuid::nil(), "flow", now);
        record.debug = Some(DebugConfig {
            breakpoints: vec!["b".to_string()],
            pause_on_start: false,
        });

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], json!("queued"));
        assert_eq!(value["flowId"], json!("flow"));
        assert_eq!(value["debug"]["breakpoints"], json!(["b"]));
        assert!(value.get("finishedAt").is_none());
        assert!(value.get("nodeAttempt").is_none());

        let parsed: RunRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
