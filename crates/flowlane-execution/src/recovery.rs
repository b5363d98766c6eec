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

//! Startup recovery of runs left behind by a previous process.
//!
//! Recovery runs once, before the scheduler claims anything:
//!
//! 1. Orphaned leases are recovered through the queue. Running items owned by
//!    another identity go back to `queued`; paused items are adopted.
//! 2. Each requeued run's record goes back to `queued` with a `run.recovered`
//!    event (`sw_restart`). Adopted paused runs are left as they are.
//! 3. Queue items whose run record is terminal or missing are removed. This
//!    repairs a process that finished a run but died before `markDone`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use error_stack::report;
use flowlane_core::{OwnerId, RecoveryReason, RunId};
use flowlane_state::{EventsBus, StateStore};

use crate::error::StateResultExt as _;
use crate::scheduler::requeue_record;
use crate::{ExecutionError, Result};

/// What [`recover_orphaned_runs`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    pub requeued_running: Vec<RunId>,
    pub adopted_paused: Vec<RunId>,
    pub cleaned_terminal: Vec<RunId>,
}

impl RecoveryResult {
    pub fn is_empty(&self) -> bool {
        self.requeued_running.is_empty()
            && self.adopted_paused.is_empty()
            && self.cleaned_terminal.is_empty()
    }
}

/// Recover orphaned runs for `owner_id`. Fails fast on an empty owner.
pub async fn recover_orphaned_runs(
    store: &Arc<dyn StateStore>,
    events: &EventsBus,
    owner_id: &OwnerId,
    now: DateTime<Utc>,
) -> Result<RecoveryResult> {
    if owner_id.is_empty() {
        return Err(report!(ExecutionError::EmptyOwnerId));
    }

    let orphans = store
        .recover_orphan_leases(owner_id.clone(), now)
        .await
        .into_execution()?;

    let mut result = RecoveryResult::default();
    for item in &orphans.requeued_running {
        requeue_record(store, events, item, RecoveryReason::SwRestart, now).await?;
        result.requeued_running.push(item.run_id);
    }
    for item in &orphans.adopted_paused {
        log::info!(
            "Adopted paused run {} from {}",
            item.run_id,
            item.prev_owner_id
                .as_ref()
                .map_or("no owner", |owner| owner.as_str())
        );
        result.adopted_paused.push(item.run_id);
    }

    for item in store.list_items(None).await.into_execution()? {
        let finished = match store.get_run(item.id).await.into_execution()? {
            Some(record) => record.status.is_terminal(),
            None => true,
        };
        if finished && store.mark_done(item.id, now).await.into_execution()? {
            log::info!("Removed stale queue item for finished run {}", item.id);
            result.cleaned_terminal.push(item.id);
        }
    }

    if result.is_empty() {
        log::info!("No runs to recover");
    } else {
        log::info!(
            "Recovery complete: {} requeued, {} adopted, {} cleaned",
            result.requeued_running.len(),
            result.adopted_paused.len(),
            result.cleaned_terminal.len()
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, linear_flow};
    use flowlane_core::{QueueStatus, RunEventKind, RunPatch, RunStatus};

    #[tokio::test]
    async fn test_recovers_running_adopts_paused_and_cleans() {
        let harness = Harness::new();
        let store = harness.state_store();
        let old = OwnerId::new("old-process");
        let now = Utc::now();

        let running = harness.queued_run(linear_flow("f", &["a"]), None).await;
        store.claim_next(old.clone(), now).await.unwrap().unwrap();
        store
            .patch_run(running, RunPatch::at(now).status(RunStatus::Running))
            .await
            .unwrap();

        let paused = harness.queued_run(linear_flow("f", &["a"]), None).await;
        store.claim_next(old.clone(), now).await.unwrap().unwrap();
        store.mark_paused(paused, old.clone(), now).await.unwrap();
        store
            .patch_run(paused, RunPatch::at(now).status(RunStatus::Paused))
            .await
            .unwrap();

        let finished = harness.queued_run(linear_flow("f", &["a"]), None).await;
        store
            .patch_run(finished, RunPatch::at(now).status(RunStatus::Succeeded))
            .await
            .unwrap();

        let owner = OwnerId::new("new-process");
        let result = recover_orphaned_runs(&store, &harness.events, &owner, now)
            .await
            .unwrap();
        assert_eq!(result.requeued_running, vec![running]);
        assert_eq!(result.adopted_paused, vec![paused]);
        assert_eq!(result.cleaned_terminal, vec![finished]);

        let item = store.get_item(running).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.attempt, 1);
        assert_eq!(harness.record(running).await.status, RunStatus::Queued);
        let events = harness.events(running).await;
        assert!(matches!(
            &events[0].kind,
            RunEventKind::RunRecovered {
                reason: RecoveryReason::SwRestart,
                from_status: QueueStatus::Running,
                to_status: QueueStatus::Queued,
                prev_owner_id: Some(prev),
            } if prev == &old
        ));

        let item = store.get_item(paused).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Paused);
        assert!(item.is_leased_by(&owner));
        assert_eq!(harness.record(paused).await.status, RunStatus::Paused);
        assert!(harness.events(paused).await.is_empty());

        assert!(store.get_item(finished).await.unwrap().is_none());

        let again = recover_orphaned_runs(&store, &harness.events, &owner, now)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_cleaned() {
        let harness = Harness::new();
        let store = harness.state_store();
        store
            .enqueue(
                flowlane_core::NewQueueItem {
                    id: uuid::Uuid::now_v7(),
                    flow_id: "f".to_string(),
                    priority: 0,
                    max_attempts: 1,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let result =
            recover_orphaned_runs(&store, &harness.events, &OwnerId::new("me"), Utc::now())
                .await
                .unwrap();
        assert_eq!(result.cleaned_terminal.len(), 1);
        assert!(store.list_items(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_owner_fails() {
        let harness = Harness::new();
        let err = recover_orphaned_runs(
            &harness.state_store(),
            &harness.events,
            &OwnerId::new(""),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.current_context(), &ExecutionError::EmptyOwnerId);
    }
}
