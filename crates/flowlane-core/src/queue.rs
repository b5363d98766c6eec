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

//! Run queue items and leases.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RunId;
use crate::status::QueueStatus;

/// Identity of one engine process instance.
///
/// A fresh identity is normally generated on every process start, which is
/// what lets recovery tell orphaned leases apart from its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random owner ID.
    pub fn random() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Time-bounded exclusive ownership of a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub owner_id: OwnerId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_owned_by(&self, owner_id: &OwnerId) -> bool {
        &self.owner_id == owner_id
    }

    /// Expired strictly before `now`; a lease expiring exactly at `now` is still held.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Input for enqueueing a new run onto a run queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueItem {
    pub id: RunId,
    pub flow_id: String,
    pub priority: i64,
    pub max_attempts: u32,
}

/// A run that is eligible for execution or currently owned by a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueueItem {
    /// Same as the run record id.
    pub id: RunId,
    pub flow_id: String,
    pub priority: i64,
    pub status: QueueStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunQueueItem {
    pub fn new(item: NewQueueItem, now: DateTime<Utc>) -> Self {
        Self {
            id: item.id,
            flow_id: item.flow_id,
            priority: item.priority,
            status: QueueStatus::Queued,
            attempt: 0,
            max_attempts: item.max_attempts,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lease_owner(&self) -> Option<&OwnerId> {
        self.lease.as_ref().map(|lease| &lease.owner_id)
    }

    pub fn is_leased_by(&self, owner_id: &OwnerId) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.is_owned_by(owner_id))
    }
}

/// Total claim order: priority descending, then `createdAt` ascending, then id.
pub fn claim_order(a: &RunQueueItem, b: &RunQueueItem) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
