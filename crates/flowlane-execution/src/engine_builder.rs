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

//! Builder for [`Engine`] instances.

use std::sync::Arc;

use flowlane_core::OwnerId;
use flowlane_plugin::NodeRegistry;
use flowlane_state::{EventStore, EventsBus, StateStore};

use crate::engine::Engine;
use crate::keepalive::{Keepalive, NoOpKeepalive};
use crate::runner::Runner;
use crate::scheduler::{RunScheduler, SchedulerConfig};
use crate::Result;

/// Builder for [`Engine`].
///
/// Only the state store is required:
///
/// ```ignore
/// let engine = EngineBuilder::new(store)
///     .owner_id(OwnerId::new("worker-1"))
///     .registry(Arc::new(flowlane_builtins::registry()))
///     .scheduler_config(SchedulerConfig { max_parallel_runs: 5, ..Default::default() })
///     .build()?;
/// engine.start().await?;
/// ```
pub struct EngineBuilder {
    store: Arc<dyn StateStore>,
    owner_id: Option<OwnerId>,
    events: Option<EventsBus>,
    registry: Option<Arc<NodeRegistry>>,
    scheduler_config: SchedulerConfig,
    keepalive: Option<Arc<dyn Keepalive>>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            owner_id: None,
            events: None,
            registry: None,
            scheduler_config: SchedulerConfig::default(),
            keepalive: None,
        }
    }

    /// Identity of this process in queue leases (default: a fresh random id).
    ///
    /// Use a stable id to keep paused runs across restarts without adoption.
    pub fn owner_id(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Share an events bus with other components (default: a new bus over the store).
    pub fn events(mut self, events: EventsBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Node kinds available to runs (default: empty registry).
    pub fn registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Keepalive port held while the scheduler is started (default: no-op).
    pub fn keepalive(mut self, keepalive: Arc<dyn Keepalive>) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// Fails on an empty owner id or a heartbeat interval that does not fit
    /// the store's lease TTL.
    pub fn build(self) -> Result<Engine> {
        let owner_id = self.owner_id.unwrap_or_else(OwnerId::random);
        let events = self.events.unwrap_or_else(|| {
            let event_store: Arc<dyn EventStore> = self.store.clone();
            EventsBus::new(event_store)
        });
        let registry = self.registry.unwrap_or_default();
        let keepalive = self
            .keepalive
            .unwrap_or_else(|| Arc::new(NoOpKeepalive) as Arc<dyn Keepalive>);

        log::debug!("Building engine {owner_id} with {} node kinds", registry.len());
        let runner = Runner::new(owner_id.clone(), self.store.clone(), events.clone(), registry);
        let scheduler = RunScheduler::new(
            owner_id,
            self.scheduler_config,
            self.store.clone(),
            events.clone(),
            Arc::new(runner),
            keepalive,
        )?;
        Ok(Engine::new(self.store, events, scheduler))
    }
}
