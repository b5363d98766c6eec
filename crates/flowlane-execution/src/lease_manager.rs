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

//! Lease renewal and expiry for the runs owned by this process.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::report;
use flowlane_core::OwnerId;
use flowlane_state::{RecoveredItem, StateStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StateResultExt as _;
use crate::{ExecutionError, Result};

/// Minimum gap between the heartbeat interval and the lease TTL.
pub const HEARTBEAT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Heartbeat interval used when none is configured: a third of the lease TTL.
pub fn default_heartbeat_interval(lease_ttl: Duration) -> Duration {
    lease_ttl / 3
}

/// A spawned periodic task and the token that stops it.
#[derive(Debug)]
pub(crate) struct BackgroundLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundLoop {
    /// Spawn `tick` every `interval` until stopped. The first tick runs
    /// immediately.
    pub(crate) fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => tick().await,
                }
            }
            log::debug!("{name} loop exiting");
        });
        Self { cancel, handle }
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Keeps the leases of one owner alive and reclaims expired ones.
///
/// The heartbeat runs as a background task renewing every lease held by the
/// owner. Reclaiming is a separate step so that its interval can be tuned
/// independently (the scheduler drives it).
pub struct LeaseManager {
    store: Arc<dyn StateStore>,
    owner_id: OwnerId,
    heartbeat_interval: Duration,
    heartbeat: Mutex<Option<BackgroundLoop>>,
}

impl LeaseManager {
    /// Fails if the owner is empty or the interval does not renew leases at
    /// least [`HEARTBEAT_SAFETY_MARGIN`] before they expire.
    pub fn new(
        store: Arc<dyn StateStore>,
        owner_id: OwnerId,
        heartbeat_interval: Duration,
    ) -> Result<Self> {
        if owner_id.is_empty() {
            return Err(report!(ExecutionError::EmptyOwnerId));
        }
        let lease_ttl = store.lease_ttl();
        if heartbeat_interval.is_zero()
            || heartbeat_interval.saturating_add(HEARTBEAT_SAFETY_MARGIN) >= lease_ttl
        {
            return Err(report!(ExecutionError::InvalidHeartbeatInterval {
                interval: heartbeat_interval,
                lease_ttl,
            }));
        }
        Ok(Self {
            store,
            owner_id,
            heartbeat_interval,
            heartbeat: Mutex::new(None),
        })
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn lease_ttl(&self) -> Duration {
        self.store.lease_ttl()
    }

    fn heartbeat_slot(&self) -> MutexGuard<'_, Option<BackgroundLoop>> {
        self.heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start renewing this owner's leases. Does nothing if already running.
    pub fn start_heartbeat(&self) {
        let mut slot = self.heartbeat_slot();
        if slot.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }

        log::info!(
            "Starting lease heartbeat for {}: ttl={:?}, interval={:?}",
            self.owner_id,
            self.store.lease_ttl(),
            self.heartbeat_interval
        );
        let store = self.store.clone();
        let owner_id = self.owner_id.clone();
        *slot = Some(BackgroundLoop::spawn(
            "Lease heartbeat",
            self.heartbeat_interval,
            move || {
                let store = store.clone();
                let owner_id = owner_id.clone();
                async move {
                    match store.heartbeat(owner_id, Utc::now()).await {
                        Ok(renewed) => log::debug!("Heartbeat renewed {renewed} lease(s)"),
                        Err(e) => log::warn!("Heartbeat failed: {e:?}"),
                    }
                }
            },
        ));
    }

    /// Stop the heartbeat. Safe to call when it is not running.
    pub fn stop_heartbeat(&self) {
        if let Some(running) = self.heartbeat_slot().take() {
            log::info!("Stopping lease heartbeat for {}", self.owner_id);
            running.stop();
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat_slot()
            .as_ref()
            .is_some_and(|running| !running.is_finished())
    }

    /// Renew every lease held by this owner once. Returns how many were renewed.
    pub async fn heartbeat_once(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store
            .heartbeat(self.owner_id.clone(), now)
            .await
            .into_execution()
    }

    /// Return every item whose lease expired before `now` to the queue.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<RecoveredItem>> {
        let reclaimed = self
            .store
            .reclaim_expired_leases(now)
            .await
            .into_execution()?;
        if !reclaimed.is_empty() {
            log::info!("Reclaimed {} expired lease(s)", reclaimed.len());
        }
        Ok(reclaimed)
    }
}

impl Drop for LeaseManager {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

impl std::fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("owner_id", &self.owner_id)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}
