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

//! Node plugin interface for flowlane.
//!
//! Node kinds are provided by [`NodeDefinition`] implementations collected in a
//! [`NodeRegistry`]. The runner dispatches on `Node::kind` through the registry
//! and never special-cases a kind by name.

mod context;
mod node;
mod registry;

pub use context::{NodeContext, RunContext};
pub use node::NodeDefinition;
pub use registry::NodeRegistry;
