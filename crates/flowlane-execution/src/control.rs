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

use tokio_util::sync::CancellationToken;

/// Signals from the engine to one executing run.
///
/// Both signals are observed by the runner between nodes. Cancellation is
/// also exposed to node definitions through their context.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    pause: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the run is canceled.
    pub async fn canceled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the run to pause before its next node.
    pub fn request_pause(&self) {
        self.pause.cancel();
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause.is_cancelled()
    }
}
