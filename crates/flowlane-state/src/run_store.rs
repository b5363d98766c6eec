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

use flowlane_core::{RunId, RunPatch, RunRecord, RunStatus};
use futures::future::BoxFuture;

use crate::Result;

/// Filters for [`RunStore::list_runs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub flow_id: Option<String>,
    pub limit: Option<usize>,
}

/// Storage of run records.
///
/// Records are created on enqueue and only changed through
/// [`patch_run`](Self::patch_run). The engine never deletes them.
pub trait RunStore: Send + Sync {
    /// Create a run record. Fails with `RunExists` for a duplicate id.
    fn create_run(&self, record: RunRecord) -> BoxFuture<'_, Result<()>>;

    fn get_run(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunRecord>>>;

    /// Apply a patch and return the updated record.
    ///
    /// Fails with `RunNotFound` if the run does not exist.
    fn patch_run(&self, run_id: RunId, patch: RunPatch) -> BoxFuture<'_, Result<RunRecord>>;

    /// List runs, oldest first.
    fn list_runs(&self, filter: RunFilter) -> BoxFuture<'_, Result<Vec<RunRecord>>>;
}
