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

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::Result;

/// Key/value variables that outlive individual runs.
///
/// `get_var` returns `None` for an absent key and `Some(Value::Null)` for a
/// stored null.
pub trait PersistentVarStore: Send + Sync {
    fn get_var(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>>>;

    fn set_var(&self, key: &str, value: serde_json::Value) -> BoxFuture<'_, Result<()>>;

    /// Returns whether the key existed.
    fn delete_var(&self, key: &str) -> BoxFuture<'_, Result<bool>>;

    /// All variables ordered by key.
    fn list_vars(&self) -> BoxFuture<'_, Result<IndexMap<String, serde_json::Value>>>;
}
