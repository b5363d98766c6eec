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

//! Compliance test suite for `RunQueue` implementations.
//!
//! Every backend must pass these tests. Each test expects an empty queue, so
//! run them with a fresh store per test:
//!
//! ```ignore
//! #[tokio::test]
//! async fn queue_compliance() {
//!     QueueComplianceTests::run_all_isolated(|| async { MyStore::new().await.unwrap() }).await;
//! }
//! ```

use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use flowlane_core::{NewQueueItem, OwnerId, QueueStatus, RunId};
use uuid::Uuid;

use crate::{RunQueue, StateError};

/// Compliance test suite for RunQueue implementations.
pub struct QueueComplianceTests;

fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).expect("valid timestamp")
}

fn new_item(priority: i64) -> NewQueueItem {
    NewQueueItem {
        id: Uuid::now_v7(),
        flow_id: "compliance-flow".to_string(),
        priority,
        max_attempts: 3,
    }
}

async fn enqueue_at<Q: RunQueue>(queue: &Q, priority: i64, offset_ms: i64) -> RunId {
    queue
        .enqueue(new_item(priority), base_time() + TimeDelta::milliseconds(offset_ms))
        .await
        .expect("enqueue should succeed")
        .id
}

impl QueueComplianceTests {
    /// Run every test, creating a fresh queue for each one.
    pub async fn run_all_isolated<Q, F, Fut>(factory: F)
    where
        Q: RunQueue,
        F: Fn() -> Fut,
        Fut: Future<Output = Q>,
    {
        Self::test_enqueue_creates_queued_item(&factory().await).await;
        Self::test_enqueue_rejects_duplicate(&factory().await).await;
        Self::test_claim_empty_queue(&factory().await).await;
        Self::test_claim_order_by_priority(&factory().await).await;
        Self::test_claim_fifo_within_priority(&factory().await).await;
        Self::test_concurrent_claims_are_distinct(&factory().await).await;
        Self::test_empty_owner_rejected(&factory().await).await;
        Self::test_reclaim_boundary_is_strict(&factory().await).await;
        Self::test_attempt_preserved_across_reclaim(&factory().await).await;
        Self::test_heartbeat_renews_only_own_leases(&factory().await).await;
        Self::test_pause_and_resume_transitions(&factory().await).await;
        Self::test_recover_orphan_leases(&factory().await).await;
        Self::test_recover_orphan_leases_is_idempotent(&factory().await).await;
        Self::test_cancel_only_queued(&factory().await).await;
        Self::test_mark_done_removes_item(&factory().await).await;
        Self::test_list_filters_by_status(&factory().await).await;
    }

    // =========================================================================
    // enqueue() tests
    // =========================================================================

    /// Contract: a new item is queued, unleased, with attempt 0 and both
    /// timestamps set to `now`.
    pub async fn test_enqueue_creates_queued_item<Q: RunQueue>(queue: &Q) {
        let now = base_time();
        let item = queue
            .enqueue(new_item(7), now)
            .await
            .expect("enqueue should succeed");

        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.attempt, 0);
        assert_eq!(item.priority, 7);
        assert!(item.lease.is_none());
        assert_eq!(item.created_at, now);
        assert_eq!(item.updated_at, now);

        let stored = queue
            .get_item(item.id)
            .await
            .expect("get_item should succeed")
            .expect("item should exist");
        assert_eq!(stored, item);
    }

    /// Contract: enqueueing an existing id fails.
    pub async fn test_enqueue_rejects_duplicate<Q: RunQueue>(queue: &Q) {
        let item = new_item(0);
        queue
            .enqueue(item.clone(), base_time())
            .await
            .expect("first enqueue should succeed");

        let err = queue
            .enqueue(item, base_time())
            .await
            .expect_err("duplicate enqueue should fail");
        assert!(matches!(
            err.current_context(),
            StateError::QueueItemExists { .. }
        ));
    }

    // =========================================================================
    // claim_next() tests
    // =========================================================================

    /// Contract: claiming from an empty queue returns nothing.
    pub async fn test_claim_empty_queue<Q: RunQueue>(queue: &Q) {
        let claimed = queue
            .claim_next(OwnerId::new("owner"), base_time())
            .await
            .expect("claim_next should succeed");
        assert!(claimed.is_none());
    }

    /// Contract: priorities [1, 10, 5] enqueued as low, high, medium are
    /// claimed as high, medium, low.
    pub async fn test_claim_order_by_priority<Q: RunQueue>(queue: &Q) {
        let low = enqueue_at(queue, 1, 0).await;
        let high = enqueue_at(queue, 10, 1).await;
        let medium = enqueue_at(queue, 5, 2).await;

        let owner = OwnerId::new("owner");
        let now = base_time() + TimeDelta::seconds(1);
        let mut claimed = Vec::new();
        while let Some(item) = queue
            .claim_next(owner.clone(), now)
            .await
            .expect("claim_next should succeed")
        {
            assert_eq!(item.status, QueueStatus::Running);
            assert_eq!(item.attempt, 1);
            let lease = item.lease.expect("claimed item is leased");
            assert_eq!(lease.owner_id, owner);
            assert_eq!(
                lease.expires_at,
                now + TimeDelta::from_std(queue.lease_ttl()).expect("ttl fits")
            );
            claimed.push(item.id);
        }

        assert_eq!(claimed, vec![high, medium, low]);
    }

    /// Contract: equal priorities are claimed oldest first.
    pub async fn test_claim_fifo_within_priority<Q: RunQueue>(queue: &Q) {
        let second = enqueue_at(queue, 3, 20).await;
        let first = enqueue_at(queue, 3, 10).await;

        let owner = OwnerId::new("owner");
        let a = queue.claim_next(owner.clone(), base_time()).await.unwrap();
        let b = queue.claim_next(owner, base_time()).await.unwrap();
        assert_eq!(a.map(|i| i.id), Some(first));
        assert_eq!(b.map(|i| i.id), Some(second));
    }

    /// Contract: concurrent claims never return the same item.
    pub async fn test_concurrent_claims_are_distinct<Q: RunQueue>(queue: &Q) {
        let count = 8;
        for i in 0..count {
            enqueue_at(queue, i % 3, i).await;
        }

        let claims = (0..count + 2).map(|i| {
            queue.claim_next(OwnerId::new(format!("owner-{i}")), base_time())
        });
        let results = futures::future::join_all(claims).await;

        let mut ids: Vec<RunId> = results
            .into_iter()
            .filter_map(|result| result.expect("claim_next should succeed"))
            .map(|item| item.id)
            .collect();
        assert_eq!(ids.len(), count as usize);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count as usize, "claims must be pairwise distinct");
    }

    /// Contract: owner-taking operations reject an empty owner id.
    pub async fn test_empty_owner_rejected<Q: RunQueue>(queue: &Q) {
        let id = enqueue_at(queue, 0, 0).await;
        let empty = OwnerId::new("");

        let claim = queue.claim_next(empty.clone(), base_time()).await;
        assert!(matches!(
            claim.expect_err("empty owner").current_context(),
            StateError::EmptyOwnerId
        ));
        assert!(queue.heartbeat(empty.clone(), base_time()).await.is_err());
        assert!(
            queue
                .recover_orphan_leases(empty.clone(), base_time())
                .await
                .is_err()
        );
        assert!(queue.mark_running(id, empty, base_time()).await.is_err());

        let item = queue.get_item(id).await.unwrap().expect("item exists");
        assert_eq!(item.status, QueueStatus::Queued);
    }

    // =========================================================================
    // reclaim_expired_leases() tests
    // =========================================================================

    /// Contract: a lease expiring exactly at `now` is kept, one millisecond
    /// later it is reclaimed.
    pub async fn test_reclaim_boundary_is_strict<Q: RunQueue>(queue: &Q) {
        let id = enqueue_at(queue, 0, 0).await;
        let claimed = queue
            .claim_next(OwnerId::new("owner"), base_time())
            .await
            .unwrap()
            .expect("item claimed");
        let expires_at = claimed.lease.expect("leased").expires_at;

        let reclaimed = queue.reclaim_expired_leases(expires_at).await.unwrap();
        assert!(reclaimed.is_empty(), "now == expiresAt reclaims nothing");

        let reclaimed = queue
            .reclaim_expired_leases(expires_at + TimeDelta::milliseconds(1))
            .await
            .unwrap();
        assert_eq!(
            reclaimed.iter().map(|r| r.run_id).collect::<Vec<_>>(),
            vec![id]
        );
        assert_eq!(reclaimed[0].from_status, QueueStatus::Running);
        assert_eq!(reclaimed[0].prev_owner_id, Some(OwnerId::new("owner")));
    }

    /// Contract: reclaim requeues without resetting the attempt; the next
    /// claim increments it.
    pub async fn test_attempt_preserved_across_reclaim<Q: RunQueue>(queue: &Q) {
        let id = enqueue_at(queue, 0, 0).await;
        let owner = OwnerId::new("owner");
        queue.claim_next(owner.clone(), base_time()).await.unwrap();

        let later = base_time() + TimeDelta::days(1);
        queue.reclaim_expired_leases(later).await.unwrap();

        let item = queue.get_item(id).await.unwrap().expect("item exists");
        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.attempt, 1);
        assert!(item.lease.is_none());

        let item = queue
            .claim_next(owner, later)
            .await
            .unwrap()
            .expect("requeued item claimable");
        assert_eq!(item.attempt, 2);
    }

    // =========================================================================
    // heartbeat() tests
    // =========================================================================

    /// Contract: heartbeat extends the caller's leases only, and is a no-op
    /// for an owner holding nothing.
    pub async fn test_heartbeat_renews_only_own_leases<Q: RunQueue>(queue: &Q) {
        let mine = enqueue_at(queue, 1, 0).await;
        let theirs = enqueue_at(queue, 0, 1).await;
        let me = OwnerId::new("me");
        let them = OwnerId::new("them");
        queue.claim_next(me.clone(), base_time()).await.unwrap();
        queue.claim_next(them.clone(), base_time()).await.unwrap();

        let later = base_time() + TimeDelta::seconds(5);
        let renewed = queue.heartbeat(me.clone(), later).await.unwrap();
        assert_eq!(renewed, 1);

        let ttl = TimeDelta::from_std(queue.lease_ttl()).expect("ttl fits");
        let mine = queue.get_item(mine).await.unwrap().expect("exists");
        assert_eq!(mine.lease.expect("leased").expires_at, later + ttl);
        let theirs = queue.get_item(theirs).await.unwrap().expect("exists");
        assert_eq!(theirs.lease.expect("leased").expires_at, base_time() + ttl);

        let renewed = queue
            .heartbeat(OwnerId::new("nobody"), later)
            .await
            .unwrap();
        assert_eq!(renewed, 0);
    }

    // =========================================================================
    // mark_paused() / mark_running() tests
    // =========================================================================

    /// Contract: pausing keeps the lease and attempt; resuming increments the
    /// attempt.
    pub async fn test_pause_and_resume_transitions<Q: RunQueue>(queue: &Q) {
        let id = enqueue_at(queue, 0, 0).await;
        let owner = OwnerId::new("owner");
        queue.claim_next(owner.clone(), base_time()).await.unwrap();

        let paused = queue
            .mark_paused(id, owner.clone(), base_time())
            .await
            .expect("pause running item");
        assert_eq!(paused.status, QueueStatus::Paused);
        assert_eq!(paused.attempt, 1);
        assert!(paused.is_leased_by(&owner));

        let resumed = queue
            .mark_running(id, owner.clone(), base_time())
            .await
            .expect("resume paused item");
        assert_eq!(resumed.status, QueueStatus::Running);
        assert_eq!(resumed.attempt, 2);

        let err = queue
            .mark_paused(Uuid::now_v7(), owner, base_time())
            .await
            .expect_err("unknown id");
        assert!(matches!(
            err.current_context(),
            StateError::QueueItemNotFound { .. }
        ));
    }

    // =========================================================================
    // recover_orphan_leases() tests
    // =========================================================================

    /// Contract: running items of other owners are requeued, paused ones are
    /// adopted, the caller's own items are untouched.
    pub async fn test_recover_orphan_leases<Q: RunQueue>(queue: &Q) {
        let running = enqueue_at(queue, 3, 0).await;
        let paused = enqueue_at(queue, 2, 1).await;
        let own = enqueue_at(queue, 1, 2).await;
        let waiting = enqueue_at(queue, 0, 3).await;

        let old = OwnerId::new("old-process");
        let new = OwnerId::new("new-process");
        queue.claim_next(old.clone(), base_time()).await.unwrap();
        queue.claim_next(old.clone(), base_time()).await.unwrap();
        queue.mark_paused(paused, old.clone(), base_time()).await.unwrap();
        queue.claim_next(new.clone(), base_time()).await.unwrap();

        let now = base_time() + TimeDelta::seconds(1);
        let recovery = queue
            .recover_orphan_leases(new.clone(), now)
            .await
            .expect("recover should succeed");

        assert_eq!(recovery.requeued_running.len(), 1);
        assert_eq!(recovery.requeued_running[0].run_id, running);
        assert_eq!(recovery.requeued_running[0].prev_owner_id, Some(old.clone()));
        assert_eq!(recovery.adopted_paused.len(), 1);
        assert_eq!(recovery.adopted_paused[0].run_id, paused);

        let running = queue.get_item(running).await.unwrap().expect("exists");
        assert_eq!(running.status, QueueStatus::Queued);
        assert_eq!(running.attempt, 1);
        assert!(running.lease.is_none());

        let paused = queue.get_item(paused).await.unwrap().expect("exists");
        assert_eq!(paused.status, QueueStatus::Paused);
        assert!(paused.is_leased_by(&new));

        let own_item = queue.get_item(own).await.unwrap().expect("exists");
        assert_eq!(own_item.status, QueueStatus::Running);
        assert_eq!(own_item.updated_at, base_time());

        let waiting = queue.get_item(waiting).await.unwrap().expect("exists");
        assert_eq!(waiting.status, QueueStatus::Queued);
        assert_eq!(waiting.attempt, 0);
    }

    /// Contract: a second call with the same owner and time changes nothing.
    pub async fn test_recover_orphan_leases_is_idempotent<Q: RunQueue>(queue: &Q) {
        enqueue_at(queue, 1, 0).await;
        let paused = enqueue_at(queue, 0, 1).await;
        let old = OwnerId::new("old-process");
        queue.claim_next(old.clone(), base_time()).await.unwrap();
        queue.claim_next(old.clone(), base_time()).await.unwrap();
        queue.mark_paused(paused, old, base_time()).await.unwrap();

        let new = OwnerId::new("new-process");
        let now = base_time() + TimeDelta::seconds(1);
        let first = queue.recover_orphan_leases(new.clone(), now).await.unwrap();
        assert!(!first.is_empty());
        let snapshot = queue.list_items(None).await.unwrap();

        let second = queue.recover_orphan_leases(new, now).await.unwrap();
        assert!(second.is_empty(), "second recovery must be a no-op");
        assert_eq!(queue.list_items(None).await.unwrap(), snapshot);
    }

    // =========================================================================
    // cancel() / mark_done() tests
    // =========================================================================

    /// Contract: queued items can be canceled; running items cannot, and the
    /// error names the status.
    pub async fn test_cancel_only_queued<Q: RunQueue>(queue: &Q) {
        let running = enqueue_at(queue, 1, 0).await;
        let queued = enqueue_at(queue, 0, 1).await;
        queue
            .claim_next(OwnerId::new("owner"), base_time())
            .await
            .unwrap();

        let err = queue
            .cancel(running, base_time(), Some("user".to_string()))
            .await
            .expect_err("running items cannot be canceled");
        assert!(matches!(
            err.current_context(),
            StateError::IllegalQueueStatus {
                status: QueueStatus::Running,
                ..
            }
        ));
        assert!(err.to_string().contains("running"));

        let canceled = queue
            .cancel(queued, base_time(), None)
            .await
            .expect("queued items can be canceled");
        assert_eq!(canceled.id, queued);
        assert!(queue.get_item(queued).await.unwrap().is_none());
        assert!(queue.get_item(running).await.unwrap().is_some());
    }

    /// Contract: mark_done removes the item whatever its status.
    pub async fn test_mark_done_removes_item<Q: RunQueue>(queue: &Q) {
        let id = enqueue_at(queue, 0, 0).await;
        queue
            .claim_next(OwnerId::new("owner"), base_time())
            .await
            .unwrap();

        assert!(queue.mark_done(id, base_time()).await.unwrap());
        assert!(queue.get_item(id).await.unwrap().is_none());
        assert!(!queue.mark_done(id, base_time()).await.unwrap());
    }

    /// Contract: list filters by status and keeps claim order.
    pub async fn test_list_filters_by_status<Q: RunQueue>(queue: &Q) {
        let first = enqueue_at(queue, 9, 0).await;
        let second = enqueue_at(queue, 5, 1).await;
        let third = enqueue_at(queue, 5, 2).await;
        queue
            .claim_next(OwnerId::new("owner"), base_time())
            .await
            .unwrap();

        let all: Vec<_> = queue
            .list_items(None)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(all, vec![first, second, third]);

        let queued: Vec<_> = queue
            .list_items(Some(QueueStatus::Queued))
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(queued, vec![second, third]);

        let running = queue.list_items(Some(QueueStatus::Running)).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, first);
    }
}
