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

use flowlane_core::{NewRunEvent, RunEvent, RunId};
use futures::future::BoxFuture;

use crate::Result;

/// Append-only storage of run events.
pub trait EventStore: Send + Sync {
    /// Persist an event, assigning the next sequence number for its run
    /// (starting at 1) and a timestamp if it has none.
    fn append_event(&self, event: NewRunEvent) -> BoxFuture<'_, Result<RunEvent>>;

    /// The full history of a run in sequence order.
    fn list_events(&self, run_id: RunId) -> BoxFuture<'_, Result<Vec<RunEvent>>>;
}
