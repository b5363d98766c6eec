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

//! Storage port of the flowlane engine.
//!
//! The traits here are what the engine needs from durable storage: flows,
//! triggers, run records, the run queue, run events and persistent
//! variables. [`InMemoryStateStore`] implements all of them; other backends
//! are checked against the [`queue_compliance`] and [`event_compliance`]
//! suites.

use std::time::Duration;

mod error;
mod event_store;
mod events_bus;
mod flow_store;
mod in_memory;
mod run_queue;
mod run_store;
mod state_store;
mod var_store;

pub mod event_compliance;
pub mod queue_compliance;
pub mod queue_rules;

pub use error::{Result, StateError};
pub use event_store::EventStore;
pub use events_bus::{EventSubscription, EventsBus};
pub use flow_store::{FlowStore, TriggerStore};
pub use in_memory::InMemoryStateStore;
pub use run_queue::{OrphanRecovery, RecoveredItem, RunQueue};
pub use run_store::{RunFilter, RunStore};
pub use state_store::StateStore;
pub use var_store::PersistentVarStore;

/// Lease duration used when a store is not configured otherwise.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);
