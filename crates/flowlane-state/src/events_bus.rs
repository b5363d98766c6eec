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

//! Append-only event log with process-local live subscriptions.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use flowlane_core::{NewRunEvent, RunEvent, RunId};

use crate::{EventStore, Result};

type Listener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

fn lock(listeners: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    listeners
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    store: Arc<dyn EventStore>,
    listeners: Arc<Mutex<Listeners>>,
    /// Serializes append + fan-out so listeners observe events in `seq` order.
    append_lock: tokio::sync::Mutex<()>,
}

/// Persists run events and fans them out to live listeners.
///
/// Subscriptions are not durable; listeners only see events appended while
/// they are subscribed. Use [`list`](Self::list) for history.
#[derive(Clone)]
pub struct EventsBus {
    inner: Arc<Inner>,
}

impl EventsBus {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                listeners: Arc::new(Mutex::new(Listeners::default())),
                append_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Persist `event` and deliver it synchronously to every listener.
    ///
    /// Listeners run after the event is durable. A listener must not block.
    pub async fn append(&self, event: NewRunEvent) -> Result<RunEvent> {
        let _guard = self.inner.append_lock.lock().await;
        let event = self.inner.store.append_event(event).await?;
        log::trace!(
            "run {} event #{} {}",
            event.run_id,
            event.seq,
            event.kind.type_name()
        );
        self.dispatch(&event);
        Ok(event)
    }

    /// The ordered history of a run.
    pub async fn list(&self, run_id: RunId) -> Result<Vec<RunEvent>> {
        self.inner.store.list_events(run_id).await
    }

    /// Register a listener; it is removed when the returned subscription drops.
    pub fn subscribe<F>(&self, listener: F) -> EventSubscription
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));

        EventSubscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).entries.len()
    }

    fn dispatch(&self, event: &RunEvent) {
        // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Guard for a live listener registered with [`EventsBus::subscribe`].
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct EventSubscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl EventSubscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).entries.retain(|(id, _)| *id != self.id);
        }
    }
}
