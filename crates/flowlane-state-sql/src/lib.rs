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

//! SQLite storage backend for flowlane.
//!
//! Implements every storage port on a single SQLite database so that queued
//! runs, leases and event history survive process restarts.

mod migrations;
mod sqlite_state_store;

#[cfg(test)]
mod tests;

pub use sqlite_state_store::{SqliteStateStore, SqliteStateStoreConfig};
