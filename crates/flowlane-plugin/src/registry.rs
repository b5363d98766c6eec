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

use std::collections::HashMap;
use std::sync::Arc;

use crate::NodeDefinition;

/// Maps node kinds to their definitions.
///
/// Each engine owns its registry, so engines running side by side (in tests,
/// for instance) can register different kinds.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    definitions: HashMap<String, Arc<dyn NodeDefinition>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its kind, replacing any previous one.
    pub fn register<D: NodeDefinition + 'static>(&mut self, definition: D) -> &mut Self {
        self.register_arc(Arc::new(definition))
    }

    pub fn register_arc(&mut self, definition: Arc<dyn NodeDefinition>) -> &mut Self {
        let kind = definition.kind().to_string();
        if self.definitions.insert(kind.clone(), definition).is_some() {
            log::warn!("Replacing node definition for kind '{kind}'");
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<D: NodeDefinition + 'static>(mut self, definition: D) -> Self {
        self.register(definition);
        self
    }

    /// Merge every definition of `other` into this registry.
    pub fn extend(&mut self, other: NodeRegistry) -> &mut Self {
        for definition in other.definitions.into_values() {
            self.register_arc(definition);
        }
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeDefinition>> {
        self.definitions.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.definitions.contains_key(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeContext;
    use flowlane_core::{Node, NodeExecutionResult};
    use futures::future::{BoxFuture, FutureExt as _};

    struct Named(&'static str);

    impl NodeDefinition for Named {
        fn kind(&self) -> &str {
            self.0
        }

        fn execute<'a>(
            &'a self,
            _context: &'a NodeContext,
            _node: &'a Node,
        ) -> BoxFuture<'a, NodeExecutionResult> {
            async { NodeExecutionResult::succeeded() }.boxed()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = NodeRegistry::new().with(Named("b")).with(Named("a"));
        assert_eq!(registry.kinds(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.get("b").unwrap().schema()["type"], "object");
    }

    #[test]
    fn test_register_replaces_kind() {
        let mut registry = NodeRegistry::new();
        registry.register(Named("a")).register(Named("a"));
        assert_eq!(registry.len(), 1);

        let mut merged = NodeRegistry::new().with(Named("x"));
        merged.extend(registry);
        assert_eq!(merged.kinds(), vec!["a", "x"]);
    }
}
