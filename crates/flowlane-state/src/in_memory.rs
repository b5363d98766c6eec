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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::report;
use flowlane_core::{
    FlowDefinition, NewQueueItem, NewRunEvent, OwnerId, QueueStatus, RunEvent, RunId, RunPatch,
    RunQueueItem, RunRecord, SequenceNumber, TriggerSpec, claim_order,
};
use futures::future::{BoxFuture, FutureExt as _};
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::queue_rules::{self, OrphanOutcome};
use crate::{
    DEFAULT_LEASE_TTL, EventStore, FlowStore, OrphanRecovery, PersistentVarStore, RecoveredItem,
    Result, RunFilter, RunQueue, RunStore, StateError, TriggerStore,
};

/// In-memory implementation of every storage trait.
///
/// Suitable for tests and single-process use where losing state on exit is
/// acceptable. Each queue operation runs under one write lock, which makes
/// `claim_next` atomic within the process.
pub struct InMemoryStateStore {
    flows: Arc<RwLock<HashMap<String, Arc<FlowDefinition>>>>,
    triggers: Arc<RwLock<HashMap<String, TriggerSpec>>>,
    runs: Arc<RwLock<HashMap<RunId, RunRecord>>>,
    queue: Arc<RwLock<HashMap<RunId, RunQueueItem>>>,
    events: Arc<RwLock<HashMap<RunId, Vec<RunEvent>>>>,
    vars: Arc<RwLock<BTreeMap<String, serde_json::Value>>>,
    lease_ttl: Duration,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            triggers: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(HashMap::new())),
            vars: Arc::new(RwLock::new(BTreeMap::new())),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowStore for InMemoryStateStore {
    fn put_flow(&self, flow: Arc<FlowDefinition>) -> BoxFuture<'_, Result<()>> {
        async move {
            self.flows.write().await.insert(flow.id.clone(), flow);
            Ok(())
        }
        .boxed()
    }

    fn get_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Arc<FlowDefinition>>>> {
        let flow_id = flow_id.to_string();
        async move { Ok(self.flows.read().await.get(&flow_id).cloned()) }.boxed()
    }

    fn list_flows(&self) -> BoxFuture<'_, Result<Vec<Arc<FlowDefinition>>>> {
        async move {
            let mut flows: Vec<_> = self.flows.read().await.values().cloned().collect();
            flows.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(flows)
        }
        .boxed()
    }

    fn delete_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<bool>> {
        let flow_id = flow_id.to_string();
        async move { Ok(self.flows.write().await.remove(&flow_id).is_some()) }.boxed()
    }
}

impl TriggerStore for InMemoryStateStore {
    fn put_trigger(&self, trigger: TriggerSpec) -> BoxFuture<'_, Result<()>> {
        async move {
            self.triggers
                .write()
                .await
                .insert(trigger.id.clone(), trigger);
            Ok(())
        }
        .boxed()
    }

    fn get_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<Option<TriggerSpec>>> {
        let trigger_id = trigger_id.to_string();
        async move { Ok(self.triggers.read().await.get(&trigger_id).cloned()) }.boxed()
    }

    fn list_triggers(&self) -> BoxFuture<'_, Result<Vec<TriggerSpec>>> {
        async move {
            let mut triggers: Vec<_> = self.triggers.read().await.values().cloned().collect();
            triggers.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(triggers)
        }
        .boxed()
    }

    fn delete_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<bool>> {
        let trigger_id = trigger_id.to_string();
        async move { Ok(self.triggers.write().await.remove(&trigger_id).is_some()) }.boxed()
    }
}

impl RunStore for InMemoryStateStore {
    fn create_run(&self, record: RunRecord) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut runs = self.runs.write().await;
            if runs.contains_key(&record.id) {
                return Err(report!(StateError::RunExists { run_id: record.id }));
            }
            runs.insert(record.id, record);
            Ok(())
        }
        .boxed()
    }

    fn get_run(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunRecord>>> {
        async move { Ok(self.runs.read().await.get(&run_id).cloned()) }.boxed()
    }

    fn patch_run(&self, run_id: RunId, patch: RunPatch) -> BoxFuture<'_, Result<RunRecord>> {
        async move {
            let mut runs = self.runs.write().await;
            let record = runs
                .get_mut(&run_id)
                .ok_or_else(|| report!(StateError::RunNotFound { run_id }))?;
            record.apply(patch);
            Ok(record.clone())
        }
        .boxed()
    }

    fn list_runs(&self, filter: RunFilter) -> BoxFuture<'_, Result<Vec<RunRecord>>> {
        async move {
            let runs = self.runs.read().await;
            let mut matching: Vec<RunRecord> = runs
                .values()
                .filter(|run| filter.status.is_none_or(|status| run.status == status))
                .filter(|run| {
                    filter
                        .flow_id
                        .as_ref()
                        .is_none_or(|flow_id| &run.flow_id == flow_id)
                })
                .cloned()
                .collect();
            matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            if let Some(limit) = filter.limit {
                matching.truncate(limit);
            }
            Ok(matching)
        }
        .boxed()
    }
}

impl RunQueue for InMemoryStateStore {
    fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    fn enqueue(
        &self,
        item: NewQueueItem,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RunQueueItem>> {
        async move {
            let mut queue = self.queue.write().await;
            if queue.contains_key(&item.id) {
                return Err(report!(StateError::QueueItemExists { run_id: item.id }));
            }
            let item = RunQueueItem::new(item, now);
            queue.insert(item.id, item.clone());
            Ok(item)
        }
        .boxed()
    }

    fn get_item(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunQueueItem>>> {
        async move { Ok(self.queue.read().await.get(&run_id).cloned()) }.boxed()
    }

    fn list_items(
        &self,
        status: Option<QueueStatus>,
    ) -> BoxFuture<'_, Result<Vec<RunQueueItem>>> {
        async move {
            let queue = self.queue.read().await;
            let mut items: Vec<_> = queue
                .values()
                .filter(|item| status.is_none_or(|status| item.status == status))
                .cloned()
                .collect();
            items.sort_by(claim_order);
            Ok(items)
        }
        .boxed()
    }

    fn claim_next(
        &self,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<RunQueueItem>>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let mut queue = self.queue.write().await;
            let Some(next_id) = queue
                .values()
                .filter(|item| item.status == QueueStatus::Queued)
                .min_by(|a, b| claim_order(a, b))
                .map(|item| item.id)
            else {
                return Ok(None);
            };

            let item = queue
                .get_mut(&next_id)
                .ok_or_else(|| report!(StateError::Internal))?;
            queue_rules::claim(item, &owner_id, now, self.lease_ttl);
            Ok(Some(item.clone()))
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
            let mut queue = self.queue.write().await;
            let item = queue
                .get_mut(&run_id)
                .ok_or_else(|| report!(StateError::QueueItemNotFound { run_id }))?;
            queue_rules::mark_running(item, &owner_id, now, self.lease_ttl)?;
            Ok(item.clone())
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
            let mut queue = self.queue.write().await;
            let item = queue
                .get_mut(&run_id)
                .ok_or_else(|| report!(StateError::QueueItemNotFound { run_id }))?;
            queue_rules::mark_paused(item, &owner_id, now, self.lease_ttl)?;
            Ok(item.clone())
        }
        .boxed()
    }

    fn mark_done(&self, run_id: RunId, _now: DateTime<Utc>) -> BoxFuture<'_, Result<bool>> {
        async move { Ok(self.queue.write().await.remove(&run_id).is_some()) }.boxed()
    }

    fn cancel(
        &self,
        run_id: RunId,
        _now: DateTime<Utc>,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<RunQueueItem>> {
        async move {
            let mut queue = self.queue.write().await;
            let item = queue
                .get(&run_id)
                .ok_or_else(|| report!(StateError::QueueItemNotFound { run_id }))?;
            queue_rules::check_cancel(item)?;
            log::debug!(
                "canceling queue item {run_id}: {}",
                reason.as_deref().unwrap_or("no reason given")
            );
            queue
                .remove(&run_id)
                .ok_or_else(|| report!(StateError::Internal))
        }
        .boxed()
    }

    fn heartbeat(&self, owner_id: OwnerId, now: DateTime<Utc>) -> BoxFuture<'_, Result<usize>> {
        async move {
            queue_rules::validate_owner(&owner_id)?;
            let mut queue = self.queue.write().await;
            let renewed = queue
                .values_mut()
                .map(|item| queue_rules::renew(item, &owner_id, now, self.lease_ttl))
                .filter(|renewed| *renewed)
                .count();
            Ok(renewed)
        }
        .boxed()
    }

    fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<RecoveredItem>>> {
        async move {
            let mut queue = self.queue.write().await;
            let mut reclaimed: Vec<RecoveredItem> = queue
                .values_mut()
                .filter_map(|item| queue_rules::reclaim_if_expired(item, now))
                .collect();
            reclaimed.sort_by_key(|item| item.run_id);
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
            let mut queue = self.queue.write().await;
            let mut items: Vec<&mut RunQueueItem> = queue.values_mut().collect();
            items.sort_by(|a, b| claim_order(a, b));

            let mut recovery = OrphanRecovery::default();
            for item in items {
                match queue_rules::recover_orphan(item, &owner_id, now, self.lease_ttl) {
                    Some(OrphanOutcome::Requeued(recovered)) => {
                        recovery.requeued_running.push(recovered)
                    }
                    Some(OrphanOutcome::Adopted(recovered)) => {
                        recovery.adopted_paused.push(recovered)
                    }
                    None => {}
                }
            }
            Ok(recovery)
        }
        .boxed()
    }
}

impl EventStore for InMemoryStateStore {
    fn append_event(&self, event: NewRunEvent) -> BoxFuture<'_, Result<RunEvent>> {
        async move {
            let mut events = self.events.write().await;
            let history = events.entry(event.run_id).or_default();
            let seq = history
                .last()
                .map(|last| last.seq.next())
                .unwrap_or(SequenceNumber::new(1));
            let event = event.into_event(seq, Utc::now());
            history.push(event.clone());
            Ok(event)
        }
        .boxed()
    }

    fn list_events(&self, run_id: RunId) -> BoxFuture<'_, Result<Vec<RunEvent>>> {
        async move {
            Ok(self
                .events
                .read()
                .await
                .get(&run_id)
                .cloned()
                .unwrap_or_default())
        }
        .boxed()
    }
}

impl PersistentVarStore for InMemoryStateStore {
    fn get_var(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>>> {
        let key = key.to_string();
        async move { Ok(self.vars.read().await.get(&key).cloned()) }.boxed()
    }

    fn set_var(&self, key: &str, value: serde_json::Value) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        async move {
            self.vars.write().await.insert(key, value);
            Ok(())
        }
        .boxed()
    }

    fn delete_var(&self, key: &str) -> BoxFuture<'_, Result<bool>> {
        let key = key.to_string();
        async move { Ok(self.vars.write().await.remove(&key).is_some()) }.boxed()
    }

    fn list_vars(&self) -> BoxFuture<'_, Result<IndexMap<String, serde_json::Value>>> {
        async move {
            Ok(self
                .vars
                .read()
                .await
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect())
        }
        .boxed()
    }
}
