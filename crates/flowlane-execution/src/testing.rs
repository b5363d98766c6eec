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

//! Fixtures shared by the execution tests.

use std::sync::Arc;

use chrono::Utc;
use flowlane_core::{
    DebugConfig, EDGE_LABEL_DEFAULT, Edge, FlowDefinition, FlowPolicy, NewQueueItem, Node,
    OwnerId, RunEvent, RunId, RunQueueItem, RunRecord,
};
use flowlane_mock::{MOCK_KIND, MockNode};
use flowlane_plugin::NodeRegistry;
use flowlane_state::{
    EventsBus, FlowStore, InMemoryStateStore, RunQueue, RunStore, StateStore,
};
use uuid::Uuid;

use crate::Runner;

pub(crate) const OWNER: &str = "owner-test";

pub(crate) fn mock_node(id: &str) -> Node {
    Node::new(id, MOCK_KIND)
}

pub(crate) fn edge(from: &str, to: &str, label: &str) -> Edge {
    Edge::new(format!("{from}-{label}-{to}"), from, to, label)
}

pub(crate) fn flow(id: &str, nodes: Vec<Node>, edges: Vec<Edge>) -> FlowDefinition {
    let entry_node_id = nodes
        .first()
        .map(|node| node.id.clone())
        .unwrap_or_default();
    FlowDefinition {
        id: id.to_string(),
        name: None,
        version: None,
        entry_node_id,
        nodes,
        edges,
        variables: Vec::new(),
        policy: FlowPolicy::default(),
    }
}

/// Mock nodes `ids[0] -> ids[1] -> ...` joined by default edges.
pub(crate) fn linear_flow(id: &str, ids: &[&str]) -> FlowDefinition {
    let nodes = ids.iter().map(|id| mock_node(id)).collect();
    let edges = ids
        .windows(2)
        .map(|pair| edge(pair[0], pair[1], EDGE_LABEL_DEFAULT))
        .collect();
    flow(id, nodes, edges)
}

pub(crate) struct Harness {
    pub store: Arc<InMemoryStateStore>,
    pub events: EventsBus,
    pub mock: Arc<MockNode>,
    pub registry: Arc<NodeRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStateStore::new()))
    }

    pub fn with_store(store: Arc<InMemoryStateStore>) -> Self {
        let mock = Arc::new(MockNode::new());
        let mut registry = NodeRegistry::new();
        registry.register_arc(mock.clone());
        registry.extend(flowlane_builtins::registry());
        Self {
            events: EventsBus::new(store.clone()),
            store,
            mock,
            registry: Arc::new(registry),
        }
    }

    pub fn state_store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn runner(&self) -> Runner {
        Runner::new(
            OwnerId::new(OWNER),
            self.state_store(),
            self.events.clone(),
            self.registry.clone(),
        )
    }

    /// Store `flow`, create a queued run for it and claim it for [`OWNER`].
    pub async fn claimed_run(
        &self,
        flow: FlowDefinition,
        debug: Option<DebugConfig>,
    ) -> RunQueueItem {
        let run_id = self.queued_run(flow, debug).await;
        let item = self
            .store
            .claim_next(OwnerId::new(OWNER), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.id, run_id);
        item
    }

    /// Store `flow` and enqueue a run for it.
    pub async fn queued_run(&self, flow: FlowDefinition, debug: Option<DebugConfig>) -> RunId {
        let now = Utc::now();
        let flow_id = flow.id.clone();
        self.store.put_flow(Arc::new(flow)).await.unwrap();

        let run_id = Uuid::now_v7();
        let mut record = RunRecord::queued(run_id, flow_id.clone(), now);
        record.debug = debug;
        self.store.create_run(record).await.unwrap();
        self.store
            .enqueue(
                NewQueueItem {
                    id: run_id,
                    flow_id,
                    priority: 0,
                    max_attempts: 1,
                },
                now,
            )
            .await
            .unwrap();
        run_id
    }

    pub async fn record(&self, run_id: RunId) -> RunRecord {
        self.store.get_run(run_id).await.unwrap().unwrap()
    }

    pub async fn events(&self, run_id: RunId) -> Vec<RunEvent> {
        self.events.list(run_id).await.unwrap()
    }

    pub async fn event_types(&self, run_id: RunId) -> Vec<&'static str> {
        self.events(run_id)
            .await
            .iter()
            .map(|event| event.kind.type_name())
            .collect()
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub(crate) async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Delegates to an in-memory store but refuses every enqueue.
pub(crate) struct EnqueueFailingStore {
    pub inner: Arc<InMemoryStateStore>,
}

mod enqueue_failing {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use error_stack::report;
    use flowlane_core::{
        FlowDefinition, NewQueueItem, NewRunEvent, OwnerId, QueueStatus, RunEvent, RunId,
        RunPatch, RunQueueItem, RunRecord, TriggerSpec,
    };
    use flowlane_state::{
        EventStore, FlowStore, OrphanRecovery, PersistentVarStore, RecoveredItem, Result,
        RunFilter, RunQueue, RunStore, StateError, TriggerStore,
    };
    use futures::future::{BoxFuture, FutureExt as _};
    use indexmap::IndexMap;
    use std::sync::Arc;

    use super::EnqueueFailingStore;

    impl FlowStore for EnqueueFailingStore {
        fn put_flow(&self, flow: Arc<FlowDefinition>) -> BoxFuture<'_, Result<()>> {
            self.inner.put_flow(flow)
        }
        fn get_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Arc<FlowDefinition>>>> {
            self.inner.get_flow(flow_id)
        }
        fn list_flows(&self) -> BoxFuture<'_, Result<Vec<Arc<FlowDefinition>>>> {
            self.inner.list_flows()
        }
        fn delete_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<bool>> {
            self.inner.delete_flow(flow_id)
        }
    }

    impl TriggerStore for EnqueueFailingStore {
        fn put_trigger(&self, trigger: TriggerSpec) -> BoxFuture<'_, Result<()>> {
            self.inner.put_trigger(trigger)
        }
        fn get_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<Option<TriggerSpec>>> {
            self.inner.get_trigger(trigger_id)
        }
        fn list_triggers(&self) -> BoxFuture<'_, Result<Vec<TriggerSpec>>> {
            self.inner.list_triggers()
        }
        fn delete_trigger(&self, trigger_id: &str) -> BoxFuture<'_, Result<bool>> {
            self.inner.delete_trigger(trigger_id)
        }
    }

    impl RunStore for EnqueueFailingStore {
        fn create_run(&self, record: RunRecord) -> BoxFuture<'_, Result<()>> {
            self.inner.create_run(record)
        }
        fn get_run(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunRecord>>> {
            self.inner.get_run(run_id)
        }
        fn patch_run(&self, run_id: RunId, patch: RunPatch) -> BoxFuture<'_, Result<RunRecord>> {
            self.inner.patch_run(run_id, patch)
        }
        fn list_runs(&self, filter: RunFilter) -> BoxFuture<'_, Result<Vec<RunRecord>>> {
            self.inner.list_runs(filter)
        }
    }

    impl RunQueue for EnqueueFailingStore {
        fn lease_ttl(&self) -> Duration {
            self.inner.lease_ttl()
        }
        fn enqueue(
            &self,
            _item: NewQueueItem,
            _now: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<RunQueueItem>> {
            async { Err(report!(StateError::Connection)) }.boxed()
        }
        fn get_item(&self, run_id: RunId) -> BoxFuture<'_, Result<Option<RunQueueItem>>> {
            self.inner.get_item(run_id)
        }
        fn list_items(
            &self,
            status: Option<QueueStatus>,
        ) -> BoxFuture<'_, Result<Vec<RunQueueItem>>> {
            self.inner.list_items(status)
        }
        fn claim_next(
            &self,
            owner_id: OwnerId,
            now: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<Option<RunQueueItem>>> {
            self.inner.claim_next(owner_id, now)
        }
        fn mark_running(
            &self,
            run_id: RunId,
            owner_id: OwnerId,
            now: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<RunQueueItem>> {
            self.inner.mark_running(run_id, owner_id, now)
        }
        fn mark_paused(
            &self,
            run_id: RunId,
            owner_id: OwnerId,
            now: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<RunQueueItem>> {
            self.inner.mark_paused(run_id, owner_id, now)
        }
        fn mark_done(&self, run_id: RunId, now: DateTime<Utc>) -> BoxFuture<'_, Result<bool>> {
            self.inner.mark_done(run_id, now)
        }
        fn cancel(
            &self,
            run_id: RunId,
            now: DateTime<Utc>,
            reason: Option<String>,
        ) -> BoxFuture<'_, Result<RunQueueItem>> {
            self.inner.cancel(run_id, now, reason)
        }
        fn heartbeat(&self, owner_id: OwnerId, now: DateTime<Utc>) -> BoxFuture<'_, Result<usize>> {
            self.inner.heartbeat(owner_id, now)
        }
        fn reclaim_expired_leases(
            &self,
            now: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<Vec<RecoveredItem>>> {
            self.inner.reclaim_expired_leases(now)
        }
        fn recover_orphan_leases(
            &self,
            owner_id: OwnerId,
            now: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<OrphanRecovery>> {
            self.inner.recover_orphan_leases(owner_id, now)
        }
    }

    impl EventStore for EnqueueFailingStore {
        fn append_event(&self, event: NewRunEvent) -> BoxFuture<'_, Result<RunEvent>> {
            self.inner.append_event(event)
        }
        fn list_events(&self, run_id: RunId) -> BoxFuture<'_, Result<Vec<RunEvent>>> {
            self.inner.list_events(run_id)
        }
    }

    impl PersistentVarStore for EnqueueFailingStore {
        fn get_var(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>>> {
            self.inner.get_var(key)
        }
        fn set_var(&self, key: &str, value: serde_json::Value) -> BoxFuture<'_, Result<()>> {
            self.inner.set_var(key, value)
        }
        fn delete_var(&self, key: &str) -> BoxFuture<'_, Result<bool>> {
            self.inner.delete_var(key)
        }
        fn list_vars(&self) -> BoxFuture<'_, Result<IndexMap<String, serde_json::Value>>> {
            self.inner.list_vars()
        }
    }
}
