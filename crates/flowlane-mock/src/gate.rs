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
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    open: AtomicBool,
    entered: AtomicUsize,
    opened: Notify,
    entered_changed: Notify,
}

/// A latch that holds mock nodes until the test opens it.
///
/// Clones share the same state. Nodes waiting on a gate also bump an
/// "entered" counter, so a test can wait until a run is parked on it.
#[derive(Debug, Clone, Default)]
pub struct MockGate {
    state: Arc<GateState>,
}

impl MockGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every current and future waiter.
    pub fn open(&self) {
        self.state.open.store(true, Ordering::SeqCst);
        self.state.opened.notify_waiters();
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Number of times a node has started waiting on this gate.
    pub fn entered(&self) -> usize {
        self.state.entered.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` nodes have reached the gate.
    pub async fn wait_entered(&self, count: usize) {
        loop {
            let changed = self.state.entered_changed.notified();
            if self.entered() >= count {
                return;
            }
            changed.await;
        }
    }

    pub(crate) async fn pass(&self) {
        self.state.entered.fetch_add(1, Ordering::SeqCst);
        self.state.entered_changed.notify_waiters();
        loop {
            let opened = self.state.opened.notified();
            if self.is_open() {
                return;
            }
            opened.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_releases_waiters() {
        let gate = MockGate::new();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.pass().await }
        });

        gate.wait_entered(1).await;
        assert!(!waiter.is_finished());

        gate.open();
        waiter.await.unwrap();
        assert!(gate.is_open());

        // An open gate does not block.
        gate.pass().await;
        assert_eq!(gate.entered(), 2);
    }
}
