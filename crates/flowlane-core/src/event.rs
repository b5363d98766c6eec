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

//! Run events: the append-only, per-run causal history.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::RunId;
use crate::error_code::NodeError;
use crate::node_result::VarsPatchOp;
use crate::queue::OwnerId;
use crate::status::QueueStatus;

/// Per-run event sequence number, assigned on append.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error-policy decision recorded on `node.failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureDecision {
    Stop,
    Continue,
    Retry,
    Goto,
}

/// Why a run was moved back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    /// A new process identity found the run owned by a previous instance.
    SwRestart,
    /// The owner stopped renewing its lease.
    LeaseExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    Breakpoint,
    PauseOnStart,
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Type-specific payload of a [`RunEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEventKind {
    #[serde(rename = "run.queued", rename_all = "camelCase")]
    RunQueued {
        flow_id: String,
        priority: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger_id: Option<String>,
    },
    #[serde(rename = "run.started", rename_all = "camelCase")]
    RunStarted { attempt: u32, node_id: String },
    #[serde(rename = "run.resumed", rename_all = "camelCase")]
    RunResumed { attempt: u32, node_id: String },
    #[serde(rename = "run.paused", rename_all = "camelCase")]
    RunPaused { node_id: String, reason: PauseReason },
    #[serde(rename = "run.recovered", rename_all = "camelCase")]
    RunRecovered {
        reason: RecoveryReason,
        from_status: QueueStatus,
        to_status: QueueStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev_owner_id: Option<OwnerId>,
    },
    #[serde(rename = "run.canceled", rename_all = "camelCase")]
    RunCanceled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "run.succeeded", rename_all = "camelCase")]
    RunSucceeded {
        took_ms: u64,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        outputs: IndexMap<String, serde_json::Value>,
    },
    #[serde(rename = "run.failed", rename_all = "camelCase")]
    RunFailed {
        error: NodeError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
    #[serde(rename = "node.started", rename_all = "camelCase")]
    NodeStarted { node_id: String, attempt: u32 },
    #[serde(rename = "node.succeeded", rename_all = "camelCase")]
    NodeSucceeded {
        node_id: String,
        attempt: u32,
        took_ms: u64,
    },
    #[serde(rename = "node.failed", rename_all = "camelCase")]
    NodeFailed {
        node_id: String,
        attempt: u32,
        error: NodeError,
        decision: FailureDecision,
    },
    #[serde(rename = "vars.patched", rename_all = "camelCase")]
    VarsPatched {
        node_id: String,
        patch: Vec<VarsPatchOp>,
    },
    #[serde(rename = "log", rename_all = "camelCase")]
    Log {
        level: EventLogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
}

impl RunEventKind {
    /// The wire name of the event type, e.g. `node.failed`.
    pub fn type_name(&self) -> &'static str {
        match self {
            RunEventKind::RunQueued { .. } => "run.queued",
            RunEventKind::RunStarted { .. } => "run.started",
            RunEventKind::RunResumed { .. } => "run.resumed",
            RunEventKind::RunPaused { .. } => "run.paused",
            RunEventKind::RunRecovered { .. } => "run.recovered",
            RunEventKind::RunCanceled { .. } => "run.canceled",
            RunEventKind::RunSucceeded { .. } => "run.succeeded",
            RunEventKind::RunFailed { .. } => "run.failed",
            RunEventKind::NodeStarted { .. } => "node.started",
            RunEventKind::NodeSucceeded { .. } => "node.succeeded",
            RunEventKind::NodeFailed { .. } => "node.failed",
            RunEventKind::VarsPatched { .. } => "vars.patched",
            RunEventKind::Log { .. } => "log",
        }
    }

    /// Node id carried by node-scoped events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunEventKind::NodeStarted { node_id, .. }
            | RunEventKind::NodeSucceeded { node_id, .. }
            | RunEventKind::NodeFailed { node_id, .. }
            | RunEventKind::VarsPatched { node_id, .. }
            | RunEventKind::RunStarted { node_id, .. }
            | RunEventKind::RunResumed { node_id, .. }
            | RunEventKind::RunPaused { node_id, .. } => Some(node_id.as_str()),
            RunEventKind::RunFailed { node_id, .. } | RunEventKind::Log { node_id, .. } => {
                node_id.as_deref()
            }
            _ => None,
        }
    }
}

/// A persisted run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub run_id: RunId,
    pub seq: SequenceNumber,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

/// An event before it is appended; `seq` is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunEvent {
    pub run_id: RunId,
    /// Defaults to the append time.
    pub ts: Option<DateTime<Utc>>,
    pub kind: RunEventKind,
}

impl NewRunEvent {
    pub fn new(run_id: RunId, kind: RunEventKind) -> Self {
        Self {
            run_id,
            ts: None,
            kind,
        }
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = Some(ts);
        self
    }

    pub fn into_event(self, seq: SequenceNumber, now: DateTime<Utc>) -> RunEvent {
        RunEvent {
            run_id: self.run_id,
            seq,
            ts: self.ts.unwrap_or(now),
            kind: self.kind,
        }
    }
}
