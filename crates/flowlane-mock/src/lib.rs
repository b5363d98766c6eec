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

//! Scriptable node kind for engine tests.
//!
//! A [`MockNode`] is registered under one kind (`mock` by default) and looks
//! up its behavior by node id and attempt. It records every invocation so
//! tests can assert on start order and attempt numbers.

mod gate;
mod mock_node;

pub use gate::MockGate;
pub use mock_node::{MOCK_KIND, MockBehavior, MockCall, MockNode};
