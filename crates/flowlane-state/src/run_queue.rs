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

//! The durable run queue with lease-based claiming.

use std::time::Duration;

use chrono::{DateTime, Utc};
use flowlane_core::{NewQueueItem, OwnerId, QueueStatus, RunId, RunQueueItem};
use futures::future::BoxFuture;

use crate::Result;

/// A queue item that lost its lease, as seen just before the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredItem {
    pub run_id: RunId,
    pub from_status: QueueStatus,
    pub prev_owner_id: Option<OwnerId>,
}

/// Outcome of [`RunQueue::recover_orphan_leases`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanRecovery {
    /// Running items moved back to `queued`.
    pub requeued_running: Vec<RecoveredItem>,
    /// Paused items whose lease now belongs to the recovering owner.
    pub adopted_paused: Vec<RecoveredItem>,
}

impl OrphanRecovery {
    pub fn is_empty(&self) -> bool {
        self.requeued_running.is_empty() && self.adopted_paused.is_empty()
    }
}

/// Durable, priority-ordered work list of runs.
///
/// Claim order is priority descending, then `created_at` ascending, then id
/// (see [`flowlane_core::claim_order`]). Every operation that takes an owner
/// rejects an empty owner id with [`StateError::EmptyOwnerId`](crate::StateError).
///
/// Implementations must make [`claim_next`](Self::claim_next) a single atomic
/// compare-and-set against durable storage: two concurrent callers never
/// receive the same item.
pub trait RunQueue: Send + Sync {
    /// Lease duration granted by claims, renewals and adoptions.
    fn lease_ttl(&self) -> Duration;

    /// Insert a new item with `status=queued` and `attempt=0`.
    ///
    /// Fails with `QueueItemExists` if the id is already queued.
    fn enqueue(
        &self,
        item: NewQueueItem,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>>;

    fn get_item(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunQueueItem>>>;

    /// List items in claim order, optionally filtered by status.
    fn list_items(
        &self,
        status: Option<QueueStatus>,
    ) -> BoxFuture<'_, Result<Vec<RunQueueItem>>>;

    /// Atomically claim the highest-ranked queued item.
    ///
    /// The item becomes `running`, its attempt is incremented and it is leased
    /// to `owner_id` until `now + lease_ttl`.
    fn claim_next(
        &self,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<RunQueueItem>>>;

    /// Transition a queued item, or a paused item leased by `owner_id`, to
    /// `running`. Increments the attempt.
    fn mark_running(
        &self,
        run_id: RunId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>>;

    /// Transition a running item leased by `owner_id` to `paused`, keeping the
    /// lease. Does not touch the attempt.
    fn mark_paused(
        &self,
        run_id: RunId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>>;

    /// Remove the item. Returns whether it was present.
    fn mark_done(&self, run_id: RunId, now: DateTime<Utc>) -> BoxFuture<'_, Result<bool>>;

    /// Remove a `queued` item. Fails with `IllegalQueueStatus` otherwise.
    fn cancel(
        &self,
        run_id: RunId,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<RunQueueItem>>;

    /// Extend every running or paused lease held by `owner_id`.
    ///
    /// Returns the number of renewed leases.
    fn heartbeat(&self, owner_id: OwnerId, now: DateTime<Utc>) -> BoxFuture<'_, Result<usize>>;

    /// Requeue every leased item whose lease expired strictly before `now`.
    ///
    /// The attempt is preserved.
    fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<RecoveredItem>>>;

    /// Take over work left behind by previous owner identities.
    ///
    /// Running items not leased by `owner_id` are requeued, paused items not
    /// leased by `owner_id` are re-leased to it. Idempotent for a given owner.
    fn recover_orphan_leases(
        &self,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<OrphanRecovery>>;
}
