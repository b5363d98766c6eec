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

//! Tests for the SQL state store implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use flowlane_core::{
    FlowDefinition, NewQueueItem, NewRunEvent, Node, OwnerId, QueueStatus, RunEventKind,
    RunPatch, RunRecord, RunStatus, TriggerSpec,
};
use flowlane_state::event_compliance::EventComplianceTests;
use flowlane_state::queue_compliance::QueueComplianceTests;
use flowlane_state::{
    EventStore as _, FlowStore as _, PersistentVarStore as _, RunFilter, RunQueue as _,
    RunStore as _, StateError, TriggerStore as _,
};
use serde_json::json;
use uuid::Uuid;

use crate::{SqliteStateStore, SqliteStateStoreConfig};

fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

fn file_config(dir: &tempfile::TempDir) -> SqliteStateStoreConfig {
    SqliteStateStoreConfig {
        database_url: format!("sqlite://{}?mode=rwc", dir.path().join("flowlane.db").display()),
        max_connections: 4,
        auto_migrate: true,
    }
}

#[tokio::test]
async fn queue_compliance() {
    QueueComplianceTests::run_all_isolated(|| async {
        SqliteStateStore::in_memory().await.unwrap()
    })
    .await;
}

#[tokio::test]
async fn event_compliance() {
    let store = SqliteStateStore::in_memory().await.unwrap();
    EventComplianceTests::run_all(&store).await;
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    SqliteStateStore::new(file_config(&dir)).await.unwrap();
    SqliteStateStore::new(file_config(&dir)).await.unwrap();
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let owner = OwnerId::new("before-restart");
    let run_id = Uuid::now_v7();

    {
        let store = SqliteStateStore::new(file_config(&dir)).await.unwrap();
        store
            .enqueue(
                NewQueueItem {
                    id: run_id,
                    flow_id: "flow".to_string(),
                    priority: 5,
                    max_attempts: 2,
                },
                base_time(),
            )
            .await
            .unwrap();
        store.claim_next(owner.clone(), base_time()).await.unwrap();
    }

    let store = SqliteStateStore::new(file_config(&dir))
        .await
        .unwrap()
        .with_lease_ttl(Duration::from_secs(10));
    let item = store.get_item(run_id).await.unwrap().expect("item persisted");
    assert_eq!(item.status, QueueStatus::Running);
    assert_eq!(item.attempt, 1);
    assert!(item.is_leased_by(&owner));

    let recovery = store
        .recover_orphan_leases(OwnerId::new("after-restart"), base_time())
        .await
        .unwrap();
    assert_eq!(recovery.requeued_running.len(), 1);
    assert_eq!(recovery.requeued_running[0].prev_owner_id, Some(owner));

    let item = store.get_item(run_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Queued);
    assert_eq!(item.attempt, 1);
    assert!(item.lease.is_none());
}

#[tokio::test]
async fn test_reclaim_with_sub_millisecond_now() {
    let store = SqliteStateStore::in_memory()
        .await
        .unwrap()
        .with_lease_ttl(Duration::from_secs(30));
    let run_id = Uuid::now_v7();
    store
        .enqueue(
            NewQueueItem {
                id: run_id,
                flow_id: "flow".to_string(),
                priority: 0,
                max_attempts: 1,
            },
            base_time(),
        )
        .await
        .unwrap();
    let claimed = store
        .claim_next(OwnerId::new("gone"), base_time())
        .await
        .unwrap()
        .unwrap();
    let expires_at = claimed.lease.unwrap().expires_at;

    assert!(store.reclaim_expired_leases(expires_at).await.unwrap().is_empty());

    let just_after = expires_at + TimeDelta::microseconds(500);
    let reclaimed = store.reclaim_expired_leases(just_after).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].run_id, run_id);
    assert_eq!(
        store.get_item(run_id).await.unwrap().unwrap().status,
        QueueStatus::Queued
    );
}

#[tokio::test]
async fn test_claims_across_connections_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStateStore::new(file_config(&dir)).await.unwrap());
    for i in 0..6 {
        store
            .enqueue(
                NewQueueItem {
                    id: Uuid::now_v7(),
                    flow_id: "flow".to_string(),
                    priority: 0,
                    max_attempts: 1,
                },
                base_time() + TimeDelta::milliseconds(i),
            )
            .await
            .unwrap();
    }

    let claims = futures::future::join_all((0..6).map(|i| {
        let store = store.clone();
        async move {
            store
                .claim_next(OwnerId::new(format!("owner-{i}")), base_time())
                .await
                .unwrap()
        }
    }))
    .await;

    let mut ids: Vec<_> = claims.into_iter().flatten().map(|item| item.id).collect();
    assert_eq!(ids.len(), 6);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

#[tokio::test]
async fn test_run_records() {
    let store = SqliteStateStore::in_memory().await.unwrap();
    let run_id = Uuid::now_v7();
    let record = RunRecord::queued(run_id, "flow", base_time());
    store.create_run(record.clone()).await.unwrap();

    let err = store.create_run(record).await.unwrap_err();
    assert!(matches!(err.current_context(), StateError::RunExists { .. }));

    let mut vars = flowlane_core::Vars::new();
    vars.insert("count".to_string(), json!(3));
    let patched = store
        .patch_run(
            run_id,
            RunPatch::at(base_time())
                .status(RunStatus::Succeeded)
                .vars(vars.clone()),
        )
        .await
        .unwrap();
    assert_eq!(patched.status, RunStatus::Succeeded);
    assert!(patched.finished_at.is_some());

    let stored = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.vars, vars);
    assert_eq!(stored.status, RunStatus::Succeeded);

    let succeeded = store
        .list_runs(RunFilter {
            status: Some(RunStatus::Succeeded),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(succeeded.len(), 1);

    let missing = store
        .patch_run(Uuid::now_v7(), RunPatch::at(base_time()))
        .await
        .unwrap_err();
    assert!(matches!(
        missing.current_context(),
        StateError::RunNotFound { .. }
    ));
}

#[tokio::test]
async fn test_list_runs_filter_and_limit() {
    let store = SqliteStateStore::in_memory().await.unwrap();
    for (i, flow_id) in ["a", "b", "a", "a"].into_iter().enumerate() {
        let now = base_time() + TimeDelta::milliseconds(i as i64);
        store
            .create_run(RunRecord::queued(Uuid::now_v7(), flow_id, now))
            .await
            .unwrap();
    }

    let runs = store
        .list_runs(RunFilter {
            flow_id: Some("a".to_string()),
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs[0].created_at <= runs[1].created_at);
    assert!(runs.iter().all(|run| run.flow_id == "a"));
}

#[tokio::test]
async fn test_flows_and_triggers() {
    let store = SqliteStateStore::in_memory().await.unwrap();
    let flow = FlowDefinition {
        id: "flow".to_string(),
        name: Some("Flow".to_string()),
        version: Some(3),
        entry_node_id: "start".to_string(),
        nodes: vec![Node::new("start", "noop")],
        edges: vec![],
        variables: vec![],
        policy: Default::default(),
    };
    store.put_flow(Arc::new(flow.clone())).await.unwrap();
    assert_eq!(store.get_flow("flow").await.unwrap().as_deref(), Some(&flow));
    assert_eq!(store.list_flows().await.unwrap().len(), 1);

    let trigger = TriggerSpec {
        id: "t1".to_string(),
        flow_id: "flow".to_string(),
        kind: "manual".to_string(),
        enabled: false,
        args: None,
        debug: None,
        priority: Some(2),
    };
    store.put_trigger(trigger.clone()).await.unwrap();
    assert_eq!(store.get_trigger("t1").await.unwrap(), Some(trigger));

    assert!(store.delete_trigger("t1").await.unwrap());
    assert!(store.delete_flow("flow").await.unwrap());
    assert!(store.get_flow("flow").await.unwrap().is_none());
}

#[tokio::test]
async fn test_events_keep_payload() {
    let store = SqliteStateStore::in_memory().await.unwrap();
    let run_id = Uuid::now_v7();
    let event = store
        .append_event(NewRunEvent::new(
            run_id,
            RunEventKind::RunStarted {
                attempt: 1,
                node_id: "start".to_string(),
            },
        ))
        .await
        .unwrap();

    let history = store.list_events(run_id).await.unwrap();
    assert_eq!(history, vec![event]);
}

#[tokio::test]
async fn test_persistent_vars() {
    let store = SqliteStateStore::in_memory().await.unwrap();
    store.set_var("b", json!({"x": 1})).await.unwrap();
    store.set_var("a", json!(null)).await.unwrap();
    store.set_var("b", json!(2)).await.unwrap();

    assert_eq!(store.get_var("a").await.unwrap(), Some(json!(null)));
    assert_eq!(store.get_var("missing").await.unwrap(), None);

    let vars = store.list_vars().await.unwrap();
    assert_eq!(vars.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(vars["b"], json!(2));

    assert!(store.delete_var("a").await.unwrap());
    assert!(!store.delete_var("a").await.unwrap());
}
