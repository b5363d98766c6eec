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

//! Run execution for flowlane.
//!
//! - [`Engine`] - enqueue, trigger fire handling, queue inspection, pause/resume
//! - [`RunScheduler`] - claims queued runs up to `max_parallel_runs`
//! - [`LeaseManager`] - heartbeat and expired-lease reclaim loops
//! - [`recover_orphaned_runs`] - startup recovery of a previous process's work
//! - [`Runner`] - the node-by-node state machine of one run
//!
//! ## Ports
//!
//! - [`Keepalive`] - keeps the host from evicting the process while scheduling
//! - [`RunExecutor`] - what the scheduler calls for each claimed run

mod completion_notifier;
mod control;
mod engine;
mod engine_builder;
mod error;
mod keepalive;
mod lease_manager;
mod recovery;
mod runner;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ExecutionError, Result};

pub use engine::{EnqueueRunOptions, Engine};
pub use engine_builder::EngineBuilder;

pub use completion_notifier::{RunCompletionNotifier, is_settled};
pub use control::RunControl;
pub use keepalive::{CountingKeepalive, Keepalive, KeepaliveGuard, NoOpKeepalive};
pub use lease_manager::{HEARTBEAT_SAFETY_MARGIN, LeaseManager, default_heartbeat_interval};
pub use recovery::{RecoveryResult, recover_orphaned_runs};
pub use runner::{RunExecutor, RunOutcome, Runner};
pub use scheduler::{RunScheduler, SCHEDULER_KEEPALIVE_TAG, SchedulerConfig, SchedulerState};
