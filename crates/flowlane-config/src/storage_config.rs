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

use error_stack::ResultExt as _;
use flowlane_state::{InMemoryStateStore, StateStore};
use flowlane_state_sql::{SqliteStateStore, SqliteStateStoreConfig};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateStoreConfig {
    /// In-memory state store (default, for testing and demos)
    #[default]
    InMemory,
    /// SQLite-based persistent state store
    Sqlite(SqliteStateStoreConfig),
}

impl StateStoreConfig {
    /// Create a StateStore instance from this configuration.
    ///
    /// Leases granted by the store last `lease_ttl`.
    pub async fn create_state_store(&self, lease_ttl: Duration) -> Result<Arc<dyn StateStore>> {
        match self {
            StateStoreConfig::InMemory => {
                log::info!("Using in-memory state store");
                Ok(Arc::new(InMemoryStateStore::new().with_lease_ttl(lease_ttl)))
            }
            StateStoreConfig::Sqlite(config) => {
                log::info!("Using SQLite state store at {}", config.database_url);
                let store = SqliteStateStore::new(config.clone())
                    .await
                    .change_context(ConfigError::StateStore)?;
                Ok(Arc::new(store.with_lease_ttl(lease_ttl)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqlite() {
        let config: StateStoreConfig = serde_yaml_ng::from_str(
            "type: sqlite\ndatabaseUrl: \"sqlite:flowlane.db?mode=rwc\"\nmaxConnections: 2",
        )
        .unwrap();
        let StateStoreConfig::Sqlite(sqlite) = config else {
            panic!("expected sqlite config");
        };
        assert_eq!(sqlite.database_url, "sqlite:flowlane.db?mode=rwc");
        assert_eq!(sqlite.max_connections, 2);
        assert!(sqlite.auto_migrate);
    }

    #[tokio::test]
    async fn test_create_in_memory() {
        let store = StateStoreConfig::InMemory
            .create_state_store(Duration::from_secs(12))
            .await
            .unwrap();
        assert_eq!(store.lease_ttl(), Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_create_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let config = StateStoreConfig::Sqlite(SqliteStateStoreConfig {
            database_url: format!("sqlite:{}?mode=rwc", path.display()),
            max_connections: 2,
            auto_migrate: true,
        });
        let store = config
            .create_state_store(Duration::from_secs(30))
            .await
            .unwrap();
        assert!(store.list_items(None).await.unwrap().is_empty());
        assert!(path.exists());
    }
}
