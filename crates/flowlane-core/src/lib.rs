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

//! Data model of the flowlane run execution engine.
//!
//! Everything in this crate is plain data plus pure helpers; persistence and
//! execution live in `flowlane-state` and `flowlane-execution`.

mod error_code;
mod event;
mod flow;
mod graph;
mod node_result;
mod policy;
mod queue;
mod run;
mod status;
mod trigger;

pub use error_code::{ErrorCode, NodeError};
pub use event::{
    EventLogLevel, FailureDecision, NewRunEvent, PauseReason, RecoveryReason, RunEvent,
    RunEventKind, SequenceNumber,
};
pub use flow::{
    EDGE_LABEL_DEFAULT, EDGE_LABEL_ON_ERROR, Edge, FlowDefinition, FlowPolicy,
    FlowValidationError, Node, VariableDef,
};
pub use graph::FlowGraph;
pub use node_result::{NextTarget, NodeExecutionResult, NodeSuccess, VarsPatchOp, apply_vars_patch};
pub use policy::{Backoff, GotoTarget, NodePolicy, OnErrorPolicy, RetryPolicy};
pub use queue::{Lease, NewQueueItem, OwnerId, RunQueueItem, claim_order};
pub use run::{DebugConfig, RunPatch, RunRecord, TriggerInfo};
pub use status::{QueueStatus, RunStatus, UnknownStatus};
pub use trigger::{TriggerFireContext, TriggerSpec};

/// Identifier of a run (shared by its record and queue item).
pub type RunId = uuid::Uuid;

/// Run variables, in insertion order.
pub type Vars = indexmap::IndexMap<String, serde_json::Value>;
