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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default: three runs at a time.
pub const SCHEDULER_DEFAULT_MAX_PARALLEL_RUNS: usize = 3;

/// Default: sweep expired leases every 15 seconds.
pub const SCHEDULER_DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 15;

/// Default: leases last 30 seconds without renewal.
pub const LEASE_DEFAULT_TTL_SECS: u64 = 30;

pub use flowlane_execution::HEARTBEAT_SAFETY_MARGIN;

/// Run scheduling settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerSettings {
    /// Upper bound on concurrently executing runs. 0 stops claiming entirely.
    pub max_parallel_runs: usize,

    /// Seconds between sweeps for expired leases. 0 disables the sweep.
    pub reclaim_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_parallel_runs: SCHEDULER_DEFAULT_MAX_PARALLEL_RUNS,
            reclaim_interval_secs: SCHEDULER_DEFAULT_RECLAIM_INTERVAL_SECS,
        }
    }
}

/// Queue lease settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaseConfig {
    /// How long a claimed run stays leased without a heartbeat. Default: 30.
    pub lease_ttl_secs: u64,

    /// Seconds between lease renewals.
    ///
    /// Defaults to a third of the TTL. Must stay below the TTL by at least
    /// [`HEARTBEAT_SAFETY_MARGIN`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: LEASE_DEFAULT_TTL_SECS,
            heartbeat_interval_secs: None,
        }
    }
}

impl LeaseConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// The configured interval, or the default derived from the TTL.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| flowlane_execution::default_heartbeat_interval(self.lease_ttl()))
    }

    /// Check that a live owner renews its leases well before they expire.
    pub(crate) fn check(&self) -> Result<(), String> {
        let ttl = self.lease_ttl();
        let heartbeat = self.heartbeat_interval();
        if heartbeat.is_zero() {
            return Err("lease.heartbeatIntervalSecs must be greater than 0".to_string());
        }
        if heartbeat + HEARTBEAT_SAFETY_MARGIN >= ttl {
            return Err(format!(
                "heartbeat interval {heartbeat:?} must be less than lease TTL {ttl:?} minus {HEARTBEAT_SAFETY_MARGIN:?}"
            ));
        }
        Ok(())
    }
}
