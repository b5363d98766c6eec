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

//! Configuration for flowlane processes.
//!
//! A [`FlowlaneConfig`] is read from YAML and turned into a running
//! [`Engine`]:
//!
//! ```yaml
//! ownerId: worker-1
//! scheduler:
//!   maxParallelRuns: 3
//!   reclaimIntervalSecs: 15
//! lease:
//!   leaseTtlSecs: 30
//! stateStore:
//!   type: sqlite
//!   databaseUrl: "sqlite:flowlane.db?mode=rwc"
//! logging:
//!   level: info
//!   format: json
//! ```

mod scheduler_settings;
mod storage_config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt as _, report};
use flowlane_core::OwnerId;
use flowlane_execution::{Engine, EngineBuilder, Keepalive, SchedulerConfig};
use flowlane_observability::LoggingConfig;
use flowlane_plugin::NodeRegistry;
use flowlane_state::StateStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use scheduler_settings::{
    HEARTBEAT_SAFETY_MARGIN, LEASE_DEFAULT_TTL_SECS, LeaseConfig,
    SCHEDULER_DEFAULT_MAX_PARALLEL_RUNS, SCHEDULER_DEFAULT_RECLAIM_INTERVAL_SECS,
    SchedulerSettings,
};
pub use storage_config::StateStoreConfig;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Configuration error")]
    Configuration,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to create state store")]
    StateStore,
    #[error("Failed to build engine")]
    Engine,
}

pub type Result<T, E = Report<ConfigError>> = std::result::Result<T, E>;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FlowlaneConfig {
    /// Identity of this process in queue leases.
    ///
    /// Defaults to a fresh id per process. A stable id lets a restarted
    /// process keep its paused runs without adopting them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub scheduler: SchedulerSettings,
    pub lease: LeaseConfig,
    /// State store configuration. If not specified, uses in-memory storage.
    pub state_store: StateStoreConfig,
    pub logging: LoggingConfig,
}

/// Load configuration from a YAML file.
pub async fn load_config(path: &Path) -> Result<FlowlaneConfig> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .change_context(ConfigError::Configuration)
        .attach_printable_lazy(|| format!("Failed to read config file: {}", path.display()))?;
    FlowlaneConfig::from_yaml(&contents)
        .attach_printable_lazy(|| format!("Config file: {}", path.display()))
}

impl FlowlaneConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: FlowlaneConfig = serde_yaml_ng::from_str(contents)
            .change_context(ConfigError::Configuration)
            .attach_printable("Failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.as_deref().is_some_and(str::is_empty) {
            return Err(report!(ConfigError::Invalid(
                "ownerId must not be empty".to_string()
            )));
        }
        self.lease
            .check()
            .map_err(|message| report!(ConfigError::Invalid(message)))?;
        self.logging
            .validate()
            .change_context(ConfigError::Invalid("logging".to_string()))?;
        Ok(())
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
            .as_deref()
            .map(OwnerId::new)
            .unwrap_or_else(OwnerId::random)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_parallel_runs: self.scheduler.max_parallel_runs,
            reclaim_interval: Duration::from_secs(self.scheduler.reclaim_interval_secs),
            heartbeat_interval: Some(self.lease.heartbeat_interval()),
        }
    }

    pub async fn create_state_store(&self) -> Result<Arc<dyn StateStore>> {
        self.state_store
            .create_state_store(self.lease.lease_ttl())
            .await
    }

    /// Build an engine with the built-in node kinds plus `registry`.
    ///
    /// Kinds in `registry` replace built-ins of the same name.
    pub async fn create_engine(
        &self,
        registry: NodeRegistry,
        keepalive: Option<Arc<dyn Keepalive>>,
    ) -> Result<Engine> {
        self.validate()?;
        let store = self.create_state_store().await?;

        let mut kinds = flowlane_builtins::registry();
        kinds.extend(registry);
        log::info!("Node kinds: {:?}", kinds.kinds());

        let mut builder = EngineBuilder::new(store)
            .owner_id(self.owner_id())
            .registry(Arc::new(kinds))
            .scheduler_config(self.scheduler_config());
        if let Some(keepalive) = keepalive {
            builder = builder.keepalive(keepalive);
        }
        builder.build().change_context(ConfigError::Engine)
    }
}
