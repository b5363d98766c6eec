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

//! Queue state transitions shared by every [`RunQueue`](crate::RunQueue) backend.
//!
//! Backends are responsible for making each transition atomic against their
//! storage; these functions only decide what the new item looks like.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use error_stack::report;
use flowlane_core::{Lease, OwnerId, QueueStatus, RunQueueItem};

use crate::{RecoveredItem, Result, StateError};

pub fn validate_owner(owner_id: &OwnerId) -> Result<()> {
    if owner_id.is_empty() {
        return Err(report!(StateError::EmptyOwnerId));
    }
    Ok(())
}

pub fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn new_lease(owner_id: &OwnerId, now: DateTime<Utc>, ttl: Duration) -> Lease {
    Lease {
        owner_id: owner_id.clone(),
        expires_at: lease_expiry(now, ttl),
    }
}

/// Claim a queued item for `owner_id`.
pub fn claim(item: &mut RunQueueItem, owner_id: &OwnerId, now: DateTime<Utc>, ttl: Duration) {
    debug_assert_eq!(item.status, QueueStatus::Queued);
    item.status = QueueStatus::Running;
    item.attempt += 1;
    item.lease = Some(new_lease(owner_id, now, ttl));
    item.updated_at = now;
}

pub fn mark_running(
    item: &mut RunQueueItem,
    owner_id: &OwnerId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<()> {
    match item.status {
        QueueStatus::Queued => {}
        QueueStatus::Paused if item.is_leased_by(owner_id) => {}
        QueueStatus::Paused => return Err(lease_not_held(item, owner_id)),
        QueueStatus::Running => return Err(illegal(item, "mark running")),
    }
    item.status = QueueStatus::Running;
    item.attempt += 1;
    item.lease = Some(new_lease(owner_id, now, ttl));
    item.updated_at = now;
    Ok(())
}

pub fn mark_paused(
    item: &mut RunQueueItem,
    owner_id: &OwnerId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<()> {
    match item.status {
        QueueStatus::Running | QueueStatus::Paused if item.is_leased_by(owner_id) => {}
        QueueStatus::Running | QueueStatus::Paused => return Err(lease_not_held(item, owner_id)),
        QueueStatus::Queued => return Err(illegal(item, "pause")),
    }
    item.status = QueueStatus::Paused;
    item.lease = Some(new_lease(owner_id, now, ttl));
    item.updated_at = now;
    Ok(())
}

/// Only queued items may be canceled through the queue.
pub fn check_cancel(item: &RunQueueItem) -> Result<()> {
    if item.status != QueueStatus::Queued {
        return Err(illegal(item, "cancel"));
    }
    Ok(())
}

/// Renew the lease if `owner_id` holds it. Returns whether it was renewed.
pub fn renew(item: &mut RunQueueItem, owner_id: &OwnerId, now: DateTime<Utc>, ttl: Duration) -> bool {
    if !item.status.is_leased() || !item.is_leased_by(owner_id) {
        return false;
    }
    item.lease = Some(new_lease(owner_id, now, ttl));
    item.updated_at = now;
    true
}

/// Requeue the item if its lease expired strictly before `now`.
pub fn reclaim_if_expired(item: &mut RunQueueItem, now: DateTime<Utc>) -> Option<RecoveredItem> {
    let lease = item.lease.as_ref()?;
    if !lease.is_expired_at(now) {
        return None;
    }
    Some(requeue(item, now))
}

/// How [`recover_orphan`] changed an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanOutcome {
    Requeued(RecoveredItem),
    Adopted(RecoveredItem),
}

/// Take over an item left behind by another owner identity.
pub fn recover_orphan(
    item: &mut RunQueueItem,
    owner_id: &OwnerId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Option<OrphanOutcome> {
    if item.is_leased_by(owner_id) {
        return None;
    }
    match item.status {
        QueueStatus::Queued => None,
        QueueStatus::Running => Some(OrphanOutcome::Requeued(requeue(item, now))),
        QueueStatus::Paused => {
            let recovered = RecoveredItem {
                run_id: item.id,
                from_status: item.status,
                prev_owner_id: item.lease_owner().cloned(),
            };
            item.lease = Some(new_lease(owner_id, now, ttl));
            item.updated_at = now;
            Some(OrphanOutcome::Adopted(recovered))
        }
    }
}

fn requeue(item: &mut RunQueueItem, now: DateTime<Utc>) -> RecoveredItem {
    let recovered = RecoveredItem {
        run_id: item.id,
        from_status: item.status,
        prev_owner_id: item.lease.take().map(|lease| lease.owner_id),
    };
    item.status = QueueStatus::Queued;
    item.updated_at = now;
    recovered
}

fn illegal(item: &RunQueueItem, operation: &'static str) -> error_stack::Report<StateError> {
    report!(StateError::IllegalQueueStatus {
        run_id: item.id,
        operation,
        status: item.status,
    })
}

fn lease_not_held(item: &RunQueueItem, owner_id: &OwnerId) -> error_stack::Report<StateError> {
    report!(StateError::LeaseNotHeld {
        run_id: item.id,
        owner_id: owner_id.to_string(),
    })
    .attach_printable(format!(
        "current owner: {}",
        item.lease_owner().map(OwnerId::as_str).unwrap_or("<none>")
    ))
}
