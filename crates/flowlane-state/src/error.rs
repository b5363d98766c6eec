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

use flowlane_core::{QueueStatus, RunId};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State store initialization error")]
    Initialization,

    #[error("State store connection error")]
    Connection,

    #[error("Internal state store error")]
    Internal,

    #[error("Serialization error")]
    Serialization,

    #[error("Owner id must not be empty")]
    EmptyOwnerId,

    #[error("Queue item already exists: {run_id}")]
    QueueItemExists { run_id: RunId },

    #[error("Queue item not found: {run_id}")]
    QueueItemNotFound { run_id: RunId },

    #[error("Cannot {operation} queue item {run_id}: status is {status}")]
    IllegalQueueStatus {
        run_id: RunId,
        operation: &'static str,
        status: QueueStatus,
    },

    #[error("Queue item {run_id} is not leased by owner {owner_id}")]
    LeaseNotHeld { run_id: RunId, owner_id: String },

    #[error("Run already exists: {run_id}")]
    RunExists { run_id: RunId },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: RunId },
}

pub type Result<T, E = error_stack::Report<StateError>> = std::result::Result<T, E>;
