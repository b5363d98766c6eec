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

use crate::{EventStore, FlowStore, PersistentVarStore, RunQueue, RunStore, TriggerStore};

/// The complete storage port used by the engine.
///
/// Implemented automatically for any type that implements every store trait.
pub trait StateStore:
    FlowStore + TriggerStore + RunStore + RunQueue + EventStore + PersistentVarStore
{
}

impl<T> StateStore for T where
    T: FlowStore + TriggerStore + RunStore + RunQueue + EventStore + PersistentVarStore
{
}
