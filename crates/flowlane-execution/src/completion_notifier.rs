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

//! Waiting for runs to settle without polling.

use std::sync::Arc;

use error_stack::report;
use flowlane_core::{RunEventKind, RunId, RunRecord, RunStatus};
use flowlane_state::{EventSubscription, EventsBus, StateStore};
use tokio::sync::broadcast;

use crate::error::StateResultExt as _;
use crate::{ExecutionError, Result};

/// Whether a run has stopped making progress on its own.
///
/// Terminal runs are done for good; paused runs wait for an explicit resume.
pub fn is_settled(status: RunStatus) -> bool {
    status.is_terminal() || status == RunStatus::Paused
}

fn settles_run(kind: &RunEventKind) -> bool {
    matches!(
        kind,
        RunEventKind::RunSucceeded { .. }
            | RunEventKind::RunFailed { .. }
            | RunEventKind::RunCanceled { .. }
            | RunEventKind::RunPaused { .. }
    )
}

/// Broadcasts the ids of runs that just settled.
///
/// Fed by an [`EventsBus`] subscription, so it sees every terminal or pause
/// event appended through that bus. Events are emitted after the run record
/// is patched, so a waiter that wakes up reads the settled record.
pub struct RunCompletionNotifier {
    sender: broadcast::Sender<RunId>,
    _subscription: EventSubscription,
}

impl RunCompletionNotifier {
    pub fn attach(events: &EventsBus) -> Self {
        // Lagging receivers re-read the record, so a small buffer is enough.
        let (sender, _) = broadcast::channel(256);
        let publisher = sender.clone();
        let subscription = events.subscribe(move |event| {
            if settles_run(&event.kind) {
                // No receivers just means nobody is waiting.
                let _ = publisher.send(event.run_id);
            }
        });
        Self {
            sender,
            _subscription: subscription,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunId> {
        self.sender.subscribe()
    }

    /// Wait until `run_id` is terminal or paused and return its record.
    ///
    /// Subscribes before reading the record so a run settling in between is
    /// not missed.
    pub async fn wait_for_run(
        &self,
        store: &Arc<dyn StateStore>,
        run_id: RunId,
    ) -> Result<RunRecord> {
        let mut receiver = self.subscribe();
        loop {
            let record = store
                .get_run(run_id)
                .await
                .into_execution()?
                .ok_or_else(|| report!(ExecutionError::RunNotFound(run_id)))?;
            if is_settled(record.status) {
                return Ok(record);
            }

            loop {
                match receiver.recv().await {
                    Ok(settled) if settled == run_id => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::debug!("Completion waiter for run {run_id} missed {missed} events");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(report!(ExecutionError::internal(
                            "completion notifier closed"
                        )));
                    }
                }
            }
        }
    }
}
