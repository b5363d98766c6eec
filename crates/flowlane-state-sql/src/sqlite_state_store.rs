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

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::{ResultExt as _, report};
use flowlane_core::{
    FlowDefinition, Lease, NewQueueItem, NewRunEvent, OwnerId, QueueStatus, RunEvent,
    RunEventKind, RunId, RunPatch, RunQueueItem, RunRecord, SequenceNumber, TriggerSpec,
};
use flowlane_state::queue_rules::{self, OrphanOutcome};
use flowlane_state::{
    DEFAULT_LEASE_TTL, EventStore, FlowStore, OrphanRecovery, PersistentVarStore, RecoveredItem,
    Result, RunFilter, RunQueue, RunStore, StateError, TriggerStore,
};
use futures::future::{BoxFuture, FutureExt as _};
use indexmap::IndexMap;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, SqlitePool};
use uuid::Uuid;

use crate::migrations;

/// Attempts at a compare-and-set update before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

const QUEUE_COLUMNS: &str = "id, flow_id, priority, status, attempt, max_attempts, \
     lease_owner, lease_expires_at_ms, created_at_ms, updated_at_ms";

/// Configuration for SqliteStateStore
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteStateStoreConfig {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_auto_migrate() -> bool {
    true
}

/// SQLite-backed implementation of every storage port.
///
/// Queue transitions are applied with optimistic compare-and-set updates so
/// that several processes can share one database file.
pub struct SqliteStateStore {
    pool: SqlitePool,
    lease_ttl: Duration,
}

impl SqliteStateStore {
    /// Create a new SqliteStateStore with the given configuration
    pub async fn new(config: SqliteStateStoreConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .change_context(StateError::Connection)
            .attach_printable_lazy(|| format!("Database URL: {}", config.database_url))?;

        Self::from_pool(pool, config.auto_migrate).await
    }

    /// Create SqliteStateStore directly from a database URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let config = SqliteStateStoreConfig {
            database_url: database_url.to_string(),
            max_connections: default_max_connections(),
            auto_migrate: default_auto_migrate(),
        };
        Self::new(config).await
    }

    /// A private in-memory database.
    ///
    /// Every pooled connection to `sqlite::memory:` opens its own database, so
    /// the pool is pinned to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .change_context(StateError::Connection)?;

        Self::from_pool(pool, true).await
    }

    async fn from_pool(pool: SqlitePool, auto_migrate: bool) -> Result<Self> {
        if auto_migrate {
            migrations::run_migrations(&pool).await?;
        }
        Ok(Self {
            pool,
            lease_ttl: DEFAULT_LEASE_TTL,
        })
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    async fn fetch_item(&self, run_id: RunId) -> Result<Option<RunQueueItem>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM queue_items WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .change_context(StateError::Internal)?;
        row.as_ref().map(queue_item_from_row).transpose()
    }

    async fn fetch_items(&self, status: Option<QueueStatus>) -> Result<Vec<RunQueueItem>> {
        let order = "ORDER BY priority DESC, created_at_ms ASC, id ASC";
        let rows = match status {
            Some(status) => {
                let sql =
                    format!("SELECT {QUEUE_COLUMNS} FROM queue_items WHERE status = ? {order}");
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT {QUEUE_COLUMNS} FROM queue_items {order}");
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .change_context(StateError::Internal)?;

        rows.iter().map(queue_item_from_row).collect()
    }

    /// Replace `current` with `next` if the stored row still matches `current`.
    ///
    /// Returns false when another writer changed the row first.
    async fn compare_and_set(&self, current: &RunQueueItem, next: &RunQueueItem) -> Result<bool> {
        let sql = r#"
            UPDATE queue_items
            SET status = ?, attempt = ?, lease_owner = ?, lease_expires_at_ms = ?, updated_at_ms = ?
            WHERE id = ? AND status = ? AND attempt = ? AND lease_owner IS ?
                AND lease_expires_at_ms IS ? AND updated_at_ms = ?
        "#;

        let result = sqlx::query(sql)
            .bind(next.status.as_str())
            .bind(i64::from(next.attempt))
            .bind(lease_owner(next))
            .bind(lease_expires_at_ms(next))
            .bind(next.updated_at.timestamp_millis())
            .bind(current.id.to_string())
            .bind(current.status.as_str())
            .bind(i64::from(current.attempt))
            .bind(lease_owner(current))
            .bind(lease_expires_at_ms(current))
            .bind(current.updated_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;

        Ok(result.rows_affected() == 1)
    }

    /// Read, transform and conditionally write one queue item, retrying when
    /// the row changes underneath.
    async fn update_item<F>(&self, run_id: RunId, mut apply: F) -> Result<RunQueueItem>
    where
        F: FnMut(&mut RunQueueItem) -> Result<()> + Send,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .fetch_item(run_id)
                .await?
                .ok_or_else(|| report!(StateError::QueueItemNotFound { run_id }))?;
            let mut next = current.clone();
            apply(&mut next)?;
            if self.compare_and_set(&current, &next).await? {
                return Ok(next);
            }
            log::debug!("queue item {run_id} changed concurrently, retrying");
        }
        Err(report!(StateError::Internal))
            .attach_printable(format!("queue item {run_id} kept changing during update"))
    }
}

fn lease_owner(item: &RunQueueItem) -> Option<String> {
    item.lease_owner().map(|owner| owner.as_str().to_string())
}

fn lease_expires_at_ms(item: &RunQueueItem) -> Option<i64> {
    item.lease.as_ref().map(|lease| lease.expires_at.timestamp_millis())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| report!(StateError::Serialization))
        .attach_printable_lazy(|| format!("timestamp out of range: {ms}"))
}

/// Drop sub-millisecond precision so returned values match what is stored.
fn truncate_millis(ts: DateTime<Utc>) -> Result<DateTime<Utc>> {
    from_millis(ts.timestamp_millis())
}

/// Round up to the next whole millisecond. A lease stored in milliseconds
/// expired before `ts` exactly when it is below this bound.
fn ceil_millis(ts: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let ms = ts.timestamp_millis();
    if ts.timestamp_subsec_nanos() % 1_000_000 == 0 {
        from_millis(ms)
    } else {
        from_millis(ms.saturating_add(1))
    }
}

fn parse_run_id(value: &str) -> Result<RunId> {
    Uuid::parse_str(value)
        .change_context(StateError::Serialization)
        .attach_printable_lazy(|| format!("invalid run id: {value}"))
}

fn queue_item_from_row(row: &SqliteRow) -> Result<RunQueueItem> {
    let id: String = row.try_get("id").change_context(StateError::Internal)?;
    let status: String = row.try_get("status").change_context(StateError::Internal)?;
    let attempt: i64 = row.try_get("attempt").change_context(StateError::Internal)?;
    let max_attempts: i64 = row
        .try_get("max_attempts")
        .change_context(StateError::Internal)?;
    let lease_owner: Option<String> = row
        .try_get("lease_owner")
        .change_context(StateError::Internal)?;
    let lease_expires_at_ms: Option<i64> = row
        .try_get("lease_expires_at_ms")
        .change_context(StateError::Internal)?;

    let lease = match (lease_owner, lease_expires_at_ms) {
        (Some(owner_id), Some(expires_at_ms)) => Some(Lease {
            owner_id: OwnerId::new(owner_id),
            expires_at: from_millis(expires_at_ms)?,
        }),
        _ => None,
    };

    Ok(RunQueueItem {
        id: parse_run_id(&id)?,
        flow_id: row.try_get("flow_id").change_context(StateError::Internal)?,
        priority: row.try_get("priority").change_context(StateError::Internal)?,
        status: status
            .parse::<QueueStatus>()
            .change_context(StateError::Serialization)
            .attach_printable_lazy(|| format!("queue item {id}"))?,
        attempt: u32::try_from(attempt).change_context(StateError::Serialization)?,
        max_attempts: u32::try_from(max_attempts).change_context(StateError::Serialization)?,
        lease,
        created_at: from_millis(
            row.try_get("created_at_ms")
                .change_context(StateError::Internal)?,
        )?,
        updated_at: from_millis(
            row.try_get("updated_at_ms")
                .change_context(StateError::Internal)?,
        )?,
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let json: String = row.try_get(column).change_context(StateError::Internal)?;
    serde_json::from_str(&json)
        .change_context(StateError::Serialization)
        .attach_printable_lazy(|| format!("column: {column}"))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).change_context(StateError::Serialization)
}

impl FlowStore for SqliteStateStore {
    fn put_flow(&self, flow: Arc<FlowDefinition>) -> BoxFuture<'_, Result<()>> {
        async move {
            let definition_json = encode_json(flow.as_ref())?;
            sqlx::query(
                "INSERT INTO flows (id, definition_json) VALUES (?, ?) \
                 ON CONFLICT(id) DO UPDATE SET definition_json = excluded.definition_json",
            )
            .bind(&flow.id)
            .bind(definition_json)
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn get_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Arc<FlowDefinition>>>> {
        let flow_id = flow_id.to_string();
        async move {
            let row = sqlx::query("SELECT definition_json FROM flows WHERE id = ?")
                .bind(&flow_id)
                .fetch_optional(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            row.map(|row| decode_json::<FlowDefinition>(&row, "definition_json").map(Arc::new))
                .transpose()
        }
        .boxed()
    }

    fn list_flows(&self) -> BoxFuture<'_, Result<Vec<Arc<FlowDefinition>>>> {
        async move {
            let rows = sqlx::query("SELECT definition_json FROM flows ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            rows.iter()
                .map(|row| decode_json::<FlowDefinition>(row, "definition_json").map(Arc::new))
                .collect()
        }
        .boxed()
    }

    fn delete_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<bool>> {
        let flow_id = flow_id.to_string();
        async move {
            let result = sqlx::query("DELETE FROM flows WHERE id = ?")
                .bind(&flow_id)
                .execute(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }
}

impl TriggerStore for SqliteStateStore {
    fn put_trigger(&self, trigger: TriggerSpec) -> BoxFuture<'_, Result<()>> {
        async move {
            let spec_json = encode_json(&trigger)?;
            sqlx::query(
                "INSERT INTO triggers (id, flow_id, spec_json) VALUES (?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET flow_id = excluded.flow_id, spec_json = excluded.spec_json",
            )
            .bind(&trigger.id)
            .bind(&trigger.flow_id)
            .bind(spec_json)
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn get_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<Option<TriggerSpec>>> {
        let trigger_id = trigger_id.to_string();
        async move {
            let row = sqlx::query("SELECT spec_json FROM triggers WHERE id = ?")
                .bind(&trigger_id)
                .fetch_optional(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            row.map(|row| decode_json(&row, "spec_json")).transpose()
        }
        .boxed()
    }

    fn list_triggers(&self) -> BoxFuture<'_, Result<Vec<TriggerSpec>>> {
        async move {
            let rows = sqlx::query("SELECT spec_json FROM triggers ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            rows.iter().map(|row| decode_json(row, "spec_json")).collect()
        }
        .boxed()
    }

    fn delete_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<bool>> {
        let trigger_id = trigger_id.to_string();
        async move {
            let result = sqlx::query("DELETE FROM triggers WHERE id = ?")
                .bind(&trigger_id)
                .execute(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }
}

impl RunStore for SqliteStateStore {
    fn create_run(&self, record: RunRecord) -> BoxFuture<'_, Result<()>> {
        async move {
            let record_json = encode_json(&record)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO runs (id, flow_id, status, created_at_ms, record_json) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(&record.flow_id)
            .bind(record.status.as_str())
            .bind(record.created_at.timestamp_millis())
            .bind(record_json)
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;

            if result.rows_affected() == 0 {
                return Err(report!(StateError::RunExists { run_id: record.id }));
            }
            Ok(())
        }
        .boxed()
    }

    fn get_run(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunRecord>>> {
        async move {
            let row = sqlx::query("SELECT record_json FROM runs WHERE id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            row.map(|row| decode_json(&row, "record_json")).transpose()
        }
        .boxed()
    }

    fn patch_run(&self, run_id: RunId, patch: RunPatch) -> BoxFuture<'_, Result<RunRecord>> {
        async move {
            for _ in 0..MAX_CAS_ATTEMPTS {
                let row = sqlx::query("SELECT version, record_json FROM runs WHERE id = ?")
                    .bind(run_id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .change_context(StateError::Internal)?
                    .ok_or_else(|| report!(StateError::RunNotFound { run_id }))?;
                let version: i64 = row.try_get("version").change_context(StateError::Internal)?;
                let mut record: RunRecord = decode_json(&row, "record_json")?;
                record.apply(patch.clone());

                let result = sqlx::query(
                    "UPDATE runs SET status = ?, version = version + 1, record_json = ? \
                     WHERE id = ? AND version = ?",
                )
                .bind(record.status.as_str())
                .bind(encode_json(&record)?)
                .bind(run_id.to_string())
                .bind(version)
                .execute(&self.pool)
                .await
                .change_context(StateError::Internal)?;

                if result.rows_affected() == 1 {
                    return Ok(record);
                }
                log::debug!("run {run_id} changed concurrently, retrying patch");
            }
            Err(report!(StateError::Internal))
                .attach_printable(format!("run {run_id} kept changing during patch"))
        }
        .boxed()
    }

    fn list_runs(&self, filter: RunFilter) -> BoxFuture<'_, Result<Vec<RunRecord>>> {
        async move {
            let limit = filter
                .limit
                .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
                .unwrap_or(-1);
            let rows = sqlx::query(
                "SELECT record_json FROM runs \
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR flow_id = ?2) \
                 ORDER BY created_at_ms ASC, id ASC LIMIT ?3",
            )
            .bind(filter.status.map(|status| status.as_str()))
            .bind(filter.flow_id.as_deref())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .change_context(StateError::Internal)?;

            rows.iter().map(|row| decode_json(row, "record_json")).collect()
        }
        .boxed()
    }
}

impl RunQueue for SqliteStateStore {
    fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    fn enqueue(
        &self,
        item: NewQueueItem,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>> {
        async move {
            let item = RunQueueItem::new(item, truncate_millis(now)?);
            let result = sqlx::query(
                "INSERT OR IGNORE INTO queue_items \
                 (id, flow_id, priority, status, attempt, max_attempts, created_at_ms, updated_at_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(item.id.to_string())
            .bind(&item.flow_id)
            .bind(item.priority)
            .bind(item.status.as_str())
            .bind(i64::from(item.attempt))
            .bind(i64::from(item.max_attempts))
            .bind(item.created_at.timestamp_millis())
            .bind(item.updated_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;

            if result.rows_affected() == 0 {
                return Err(report!(StateError::QueueItemExists { run_id: item.id }));
            }
            Ok(item)
        }
        .boxed()
    }

    fn get_item(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunQueueItem>>> {
        async move { self.fetch_item(run_id).await }.boxed()
    }

    fn list_items(
        &self,
        status: Option<QueueStatus>,
    ) -> BoxFuture<'_, Result<Vec<RunQueueItem>>> {
        async move { self.fetch_items(status).await }.boxed()
    }

    fn claim_next(
        &self,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<RunQueueItem>>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let expires_at = queue_rules::lease_expiry(now, self.lease_ttl);

            // Selecting and updating in one statement keeps the claim atomic
            // across connections.
            let sql = format!(
                r#"
                UPDATE queue_items
                SET status = 'running', attempt = attempt + 1, lease_owner = ?,
                    lease_expires_at_ms = ?, updated_at_ms = ?
                WHERE id = (
                    SELECT id FROM queue_items WHERE status = 'queued'
                    ORDER BY priority DESC, created_at_ms ASC, id ASC
                    LIMIT 1
                ) AND status = 'queued'
                RETURNING {QUEUE_COLUMNS}
                "#
            );
            let row = sqlx::query(&sql)
                .bind(owner_id.as_str())
                .bind(expires_at.timestamp_millis())
                .bind(now.timestamp_millis())
                .fetch_optional(&self.pool)
                .await
                .change_context(StateError::Internal)?;

            row.as_ref().map(queue_item_from_row).transpose()
        }
        .boxed()
    }

    fn mark_running(
        &self,
        run_id: RunId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let now = truncate_millis(now)?;
            self.update_item(run_id, |item| {
                queue_rules::mark_running(item, &owner_id, now, self.lease_ttl)
            })
            .await
        }
        .boxed()
    }

    fn mark_paused(
        &self,
        run_id: RunId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let now = truncate_millis(now)?;
            self.update_item(run_id, |item| {
                queue_rules::mark_paused(item, &owner_id, now, self.lease_ttl)
            })
            .await
        }
        .boxed()
    }

    fn mark_done(&self, run_id: RunId, _now: DateTime<Utc>) -> BoxFuture<'_, Result<bool>> {
        async move {
            let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
                .bind(run_id.to_string())
                .execute(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }

    fn cancel(
        &self,
        run_id: RunId,
        _now: DateTime<Utc>,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<RunQueueItem>> {
        async move {
            let sql = format!(
                "DELETE FROM queue_items WHERE id = ? AND status = 'queued' RETURNING {QUEUE_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .change_context(StateError::Internal)?;

            match row {
                Some(row) => {
                    log::debug!(
                        "canceled queue item {run_id}: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    queue_item_from_row(&row)
                }
                None => {
                    let item = self
                        .fetch_item(run_id)
                        .await?
                        .ok_or_else(|| report!(StateError::QueueItemNotFound { run_id }))?;
                    queue_rules::check_cancel(&item)?;
                    Err(report!(StateError::Internal))
                        .attach_printable(format!("queue item {run_id} changed during cancel"))
                }
            }
        }
        .boxed()
    }

    fn heartbeat(&self, owner_id: OwnerId, now: DateTime<Utc>) -> BoxFuture<'_, Result<usize>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let expires_at = queue_rules::lease_expiry(now, self.lease_ttl);
            let result = sqlx::query(
                "UPDATE queue_items SET lease_expires_at_ms = ?, updated_at_ms = ? \
                 WHERE lease_owner = ? AND status IN ('running', 'paused')",
            )
            .bind(expires_at.timestamp_millis())
            .bind(now.timestamp_millis())
            .bind(owner_id.as_str())
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;

            Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
        }
        .boxed()
    }

    fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<RecoveredItem>>> {
        async move {
            let now = ceil_millis(now)?;
            let sql = format!(
                "SELECT {QUEUE_COLUMNS} FROM queue_items \
                 WHERE lease_expires_at_ms IS NOT NULL AND lease_expires_at_ms < ? ORDER BY id"
            );
            let rows = sqlx::query(&sql)
                .bind(now.timestamp_millis())
                .fetch_all(&self.pool)
                .await
                .change_context(StateError::Internal)?;

            let mut reclaimed = Vec::new();
            for row in &rows {
                let current = queue_item_from_row(row)?;
                let mut next = current.clone();
                let Some(recovered) = queue_rules::reclaim_if_expired(&mut next, now) else {
                    continue;
                };
                // A lost race means the owner renewed or finished the item.
                if self.compare_and_set(&current, &next).await? {
                    reclaimed.push(recovered);
                }
            }
            Ok(reclaimed)
        }
        .boxed()
    }

    fn recover_orphan_leases(
        &self,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<OrphanRecovery>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let now = truncate_millis(now)?;

            let mut recovery = OrphanRecovery::default();
            for current in self.fetch_items(None).await? {
                let mut next = current.clone();
                let Some(outcome) =
                    queue_rules::recover_orphan(&mut next, &owner_id, now, self.lease_ttl)
                else {
                    continue;
                };
                if !self.compare_and_set(&current, &next).await? {
                    continue;
                }
                match outcome {
                    OrphanOutcome::Requeued(recovered) => recovery.requeued_running.push(recovered),
                    OrphanOutcome::Adopted(recovered) => recovery.adopted_paused.push(recovered),
                }
            }
            Ok(recovery)
        }
        .boxed()
    }
}

impl EventStore for SqliteStateStore {
    fn append_event(&self, event: NewRunEvent) -> BoxFuture<'_, Result<RunEvent>> {
        async move {
            let ts = truncate_millis(event.ts.unwrap_or_else(Utc::now))?;
            let event = event.at(ts);
            let event_json = encode_json(&event.kind)?;
            let run_id = event.run_id.to_string();

            // The sequence number is derived inside the insert so concurrent
            // appends for one run cannot share a number.
            let row = sqlx::query(
                "INSERT INTO run_events (run_id, seq, ts_ms, event_type, event_json) \
                 SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ? FROM run_events WHERE run_id = ? \
                 RETURNING seq",
            )
            .bind(&run_id)
            .bind(ts.timestamp_millis())
            .bind(event.kind.type_name())
            .bind(event_json)
            .bind(&run_id)
            .fetch_one(&self.pool)
            .await
            .change_context(StateError::Internal)?;

            let seq: i64 = row.try_get("seq").change_context(StateError::Internal)?;
            let seq = u64::try_from(seq).change_context(StateError::Serialization)?;
            Ok(event.into_event(SequenceNumber::new(seq), ts))
        }
        .boxed()
    }

    fn list_events(&self, run_id: RunId) -> BoxFuture<'_, Result<Vec<RunEvent>>> {
        async move {
            let rows = sqlx::query(
                "SELECT seq, ts_ms, event_json FROM run_events WHERE run_id = ? ORDER BY seq",
            )
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await
            .change_context(StateError::Internal)?;

            rows.iter()
                .map(|row| {
                    let seq: i64 = row.try_get("seq").change_context(StateError::Internal)?;
                    let ts_ms: i64 = row.try_get("ts_ms").change_context(StateError::Internal)?;
                    let kind: RunEventKind = decode_json(row, "event_json")?;
                    Ok(RunEvent {
                        run_id,
                        seq: SequenceNumber::new(
                            u64::try_from(seq).change_context(StateError::Serialization)?,
                        ),
                        ts: from_millis(ts_ms)?,
                        kind,
                    })
                })
                .collect()
        }
        .boxed()
    }
}

impl PersistentVarStore for SqliteStateStore {
    fn get_var(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>>> {
        let key = key.to_string();
        async move {
            let row = sqlx::query("SELECT value_json FROM persistent_vars WHERE key = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            row.map(|row| decode_json(&row, "value_json")).transpose()
        }
        .boxed()
    }

    fn set_var(&self, key: &str, value: serde_json::Value) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        async move {
            sqlx::query(
                "INSERT INTO persistent_vars (key, value_json) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
            )
            .bind(&key)
            .bind(encode_json(&value)?)
            .execute(&self.pool)
            .await
            .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn delete_var(&self, key: &str) -> BoxFuture<'_, Result<bool>> {
        let key = key.to_string();
        async move {
            let result = sqlx::query("DELETE FROM persistent_vars WHERE key = ?")
                .bind(&key)
                .execute(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }

    fn list_vars(&self) -> BoxFuture<'_, Result<IndexMap<String, serde_json::Value>>> {
        async move {
            let rows = sqlx::query("SELECT key, value_json FROM persistent_vars ORDER BY key")
                .fetch_all(&self.pool)
                .await
                .change_context(StateError::Internal)?;
            rows.iter()
                .map(|row| {
                    let key: String = row.try_get("key").change_context(StateError::Internal)?;
                    Ok((key, decode_json(row, "value_json")?))
                })
                .collect()
        }
        .boxed()
    }
}
