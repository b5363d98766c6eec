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

use flowlane_core::{QueueStatus, RunId, RunStatus};
use flowlane_state::StateError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ExecutionError {
    #[error("owner id must not be empty")]
    EmptyOwnerId,
    #[error("flow '{0}' not found")]
    FlowNotFound(String),
    #[error("invalid flow '{0}'")]
    InvalidFlow(String),
    #[error("start node '{node_id}' not found in flow '{flow_id}'")]
    StartNodeNotFound { flow_id: String, node_id: String },
    #[error("priority must be a finite integer")]
    InvalidPriority,
    #[error("{0}")]
    InvalidMaxAttempts(String),
    #[error("trigger '{0}' not found")]
    TriggerNotFound(String),
    #[error("trigger '{0}' is disabled")]
    TriggerDisabled(String),
    #[error("run {0} not found")]
    RunNotFound(RunId),
    #[error("run {run_id} is {status}, expected {expected}")]
    UnexpectedRunStatus {
        run_id: RunId,
        status: RunStatus,
        expected: RunStatus,
    },
    #[error("run {0} is not active in this engine")]
    RunNotActive(RunId),
    #[error("queue item not found: {0}")]
    QueueItemNotFound(RunId),
    #[error("Cannot {operation} queue item {run_id}: status is {status}")]
    IllegalQueueStatus {
        run_id: RunId,
        operation: &'static str,
        status: QueueStatus,
    },
    #[error(
        "heartbeat interval {interval:?} must be non-zero and at least 1s shorter than the lease ttl {lease_ttl:?}"
    )]
    InvalidHeartbeatInterval {
        interval: std::time::Duration,
        lease_ttl: std::time::Duration,
    },
    #[error("scheduler is not started")]
    NotStarted,
    #[error("error accessing state store")]
    StateError,
    #[error("run execution panicked")]
    RunPanic,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type Result<T, E = error_stack::Report<ExecutionError>> = std::result::Result<T, E>;

/// Convert a state error, surfacing queue contract violations as their own
/// variants so callers can match on them.
pub(crate) fn from_state_error(
    report: error_stack::Report<StateError>,
) -> error_stack::Report<ExecutionError> {
    let context = match report.current_context() {
        StateError::EmptyOwnerId => ExecutionError::EmptyOwnerId,
        StateError::QueueItemNotFound { run_id } => ExecutionError::QueueItemNotFound(*run_id),
        StateError::IllegalQueueStatus {
            run_id,
            operation,
            status,
        } => ExecutionError::IllegalQueueStatus {
            run_id: *run_id,
            operation: *operation,
            status: *status,
        },
        StateError::RunNotFound { run_id } => ExecutionError::RunNotFound(*run_id),
        _ => ExecutionError::StateError,
    };
    report.change_context(context)
}

/// `ResultExt`-style adapter for [`from_state_error`].
pub(crate) trait StateResultExt<T> {
    fn into_execution(self) -> Result<T>;
}

impl<T> StateResultExt<T> for flowlane_state::Result<T> {
    fn into_execution(self) -> Result<T> {
        self.map_err(from_state_error)
    }
}
