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

//! Keepalive port: a best-effort request that the host not evict the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Host hook that discourages process eviction while a guard is held.
pub trait Keepalive: Send + Sync {
    /// Start holding the process alive on behalf of `tag`. The hold is
    /// released when the returned guard is dropped.
    fn acquire(&self, tag: &str) -> KeepaliveGuard;
}

/// Releases its keepalive hold when dropped.
pub struct KeepaliveGuard {
    tag: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl KeepaliveGuard {
    pub fn new(tag: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            tag: tag.into(),
            release: Some(Box::new(release)),
        }
    }

    /// A guard that releases nothing.
    pub fn noop(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            release: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for KeepaliveGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for KeepaliveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepaliveGuard")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Keepalive for hosts that never evict the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpKeepalive;

impl Keepalive for NoOpKeepalive {
    fn acquire(&self, tag: &str) -> KeepaliveGuard {
        KeepaliveGuard::noop(tag)
    }
}

/// Counts outstanding holds per tag.
///
/// Useful where the host exposes a single on/off signal: the process should
/// be kept alive while [`is_active`](Self::is_active) is true.
#[derive(Debug, Clone, Default)]
pub struct CountingKeepalive {
    holds: Arc<Mutex<HashMap<String, usize>>>,
}

fn lock(holds: &Mutex<HashMap<String, usize>>) -> MutexGuard<'_, HashMap<String, usize>> {
    holds
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CountingKeepalive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holds(&self, tag: &str) -> usize {
        lock(&self.holds).get(tag).copied().unwrap_or(0)
    }

    pub fn total_holds(&self) -> usize {
        lock(&self.holds).values().sum()
    }

    pub fn is_active(&self) -> bool {
        self.total_holds() > 0
    }
}

impl Keepalive for CountingKeepalive {
    fn acquire(&self, tag: &str) -> KeepaliveGuard {
        *lock(&self.holds).entry(tag.to_string()).or_insert(0) += 1;
        log::debug!("Keepalive acquired: {tag}");

        let holds = self.holds.clone();
        let released = tag.to_string();
        KeepaliveGuard::new(tag, move || {
            let mut holds = lock(&holds);
            if let Some(count) = holds.get_mut(&released) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    holds.remove(&released);
                }
            }
            log::debug!("Keepalive released: {released}");
        })
    }
}
