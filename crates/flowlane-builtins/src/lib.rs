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

//! Built-in node kinds.
//!
//! These are engine-level building blocks that do not touch the outside
//! world:
//!
//! | kind | behavior |
//! |---|---|
//! | `noop` | succeeds |
//! | `setVars` | sets and deletes run variables, optionally persists values |
//! | `if` | follows the `true` or `false` edge depending on a variable |
//! | `delay` | sleeps, observing run cancellation |
//! | `fail` | fails with a configured error |
//! | `log` | appends a `log` event to the run history |

mod config;
mod delay;
mod fail;
mod if_node;
mod log_node;
mod noop;
mod set_vars;

#[cfg(test)]
pub(crate) mod testing;

use flowlane_plugin::NodeRegistry;

pub use config::{parse_config, resolve_value};
pub use delay::DelayNode;
pub use fail::FailNode;
pub use if_node::{EDGE_LABEL_FALSE, EDGE_LABEL_TRUE, IfNode};
pub use log_node::LogNode;
pub use noop::NoopNode;
pub use set_vars::SetVarsNode;

/// A registry holding every built-in kind.
pub fn registry() -> NodeRegistry {
    NodeRegistry::new()
        .with(NoopNode)
        .with(SetVarsNode)
        .with(IfNode)
        .with(DelayNode)
        .with(FailNode)
        .with(LogNode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_kinds() {
        let registry = registry();
        let mut kinds = registry.kinds();
        kinds.sort_unstable();
        assert_eq!(kinds, vec!["delay", "fail", "if", "log", "noop", "setVars"]);
    }
}
