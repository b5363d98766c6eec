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

//! Compliance test suite for `EventStore` implementations.

use chrono::DateTime;
use flowlane_core::{FailureDecision, NewRunEvent, NodeError, RunEventKind};
use uuid::Uuid;

use crate::EventStore;

/// Compliance test suite for EventStore implementations.
pub struct EventComplianceTests;

impl EventComplianceTests {
    /// Run all compliance tests against one store. Tests use fresh run ids,
    /// so sharing a store is fine.
    pub async fn run_all<E: EventStore>(store: &E) {
        Self::test_sequence_starts_at_one(store).await;
        Self::test_sequence_is_per_run(store).await;
        Self::test_explicit_timestamp_kept(store).await;
        Self::test_payload_round_trips(store).await;
        Self::test_unknown_run_has_no_history(store).await;
    }

    fn started(run_id: Uuid, node_id: &str) -> NewRunEvent {
        NewRunEvent::new(
            run_id,
            RunEventKind::NodeStarted {
                node_id: node_id.to_string(),
                attempt: 1,
            },
        )
    }

    /// Contract: the first event of a run gets seq 1, then seq increases by one.
    pub async fn test_sequence_starts_at_one<E: EventStore>(store: &E) {
        let run_id = Uuid::now_v7();
        for expected in 1..=3u64 {
            let event = store
                .append_event(Self::started(run_id, "a"))
                .await
                .expect("append should succeed");
            assert_eq!(event.seq.value(), expected);
        }
    }

    /// Contract: sequences of different runs are independent.
    pub async fn test_sequence_is_per_run<E: EventStore>(store: &E) {
        let run_a = Uuid::now_v7();
        let run_b = Uuid::now_v7();
        store.append_event(Self::started(run_a, "a")).await.unwrap();
        store.append_event(Self::started(run_a, "b")).await.unwrap();
        let b1 = store.append_event(Self::started(run_b, "a")).await.unwrap();
        assert_eq!(b1.seq.value(), 1);

        let history = store.list_events(run_a).await.expect("list should succeed");
        let nodes: Vec<_> = history.iter().filter_map(|e| e.kind.node_id()).collect();
        assert_eq!(nodes, vec!["a", "b"]);
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    /// Contract: a supplied timestamp is stored unchanged.
    pub async fn test_explicit_timestamp_kept<E: EventStore>(store: &E) {
        let ts = DateTime::from_timestamp_millis(1_600_000_000_123).expect("valid");
        let run_id = Uuid::now_v7();
        let event = store
            .append_event(Self::started(run_id, "a").at(ts))
            .await
            .unwrap();
        assert_eq!(event.ts, ts);

        let stored = store.list_events(run_id).await.unwrap();
        assert_eq!(stored[0].ts, ts);
    }

    /// Contract: type-specific fields survive storage.
    pub async fn test_payload_round_trips<E: EventStore>(store: &E) {
        let run_id = Uuid::now_v7();
        let kind = RunEventKind::NodeFailed {
            node_id: "a".to_string(),
            attempt: 2,
            error: NodeError::timeout("slow").with_data(serde_json::json!({"ms": 10})),
            decision: FailureDecision::Retry,
        };
        let appended = store
            .append_event(NewRunEvent::new(run_id, kind.clone()))
            .await
            .unwrap();

        let stored = store.list_events(run_id).await.unwrap();
        assert_eq!(stored, vec![appended]);
        assert_eq!(stored[0].kind, kind);
    }

    /// Contract: listing an unknown run returns an empty history.
    pub async fn test_unknown_run_has_no_history<E: EventStore>(store: &E) {
        let events = store.list_events(Uuid::now_v7()).await.unwrap();
        assert!(events.is_empty());
    }
}
