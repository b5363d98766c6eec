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

use crate::flow::{Edge, FlowDefinition, FlowValidationError, Node};
use crate::policy::NodePolicy;

/// Node-id indexed view over a validated [`FlowDefinition`].
///
/// The runner resolves the next node one step at a time through this index,
/// so cyclic graphs need no recursion.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flow: Arc<FlowDefinition>,
    nodes: HashMap<String, usize>,
    /// `(from, label)` to edge index.
    outgoing: HashMap<(String, String), usize>,
}

impl FlowGraph {
    pub fn new(flow: Arc<FlowDefinition>) -> Result<Self, FlowValidationError> {
        flow.validate()?;

        let nodes = flow
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id.clone(), index))
            .collect();
        let outgoing = flow
            .edges
            .iter()
            .enumerate()
            .map(|(index, edge)| ((edge.from.clone(), edge.label.clone()), index))
            .collect();

        Ok(Self {
            flow,
            nodes,
            outgoing,
        })
    }

    pub fn flow(&self) -> &Arc<FlowDefinition> {
        &self.flow
    }

    pub fn entry_node_id(&self) -> &str {
        &self.flow.entry_node_id
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id).map(|index| &self.flow.nodes[*index])
    }

    /// The outgoing edge of `from` with the given label, if any.
    pub fn edge(&self, from: &str, label: &str) -> Option<&Edge> {
        self.outgoing
            .get(&(from.to_string(), label.to_string()))
            .map(|index| &self.flow.edges[*index])
    }

    /// Effective policy for a node: its own policy over the flow default.
    pub fn policy_for(&self, node: &Node) -> NodePolicy {
        let own = node.policy.clone().unwrap_or_default();
        match &self.flow.policy.default_node_policy {
            Some(defaults) => own.merged_over(defaults),
            None => own,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{EDGE_LABEL_DEFAULT, EDGE_LABEL_ON_ERROR};
    use crate::policy::{OnErrorPolicy, RetryPolicy};

    fn flow() -> FlowDefinition {
        FlowDefinition {
            id: "f".to_string(),
            name: None,
            version: None,
            entry_node_id: "a".to_string(),
            nodes: vec![
                Node::new("a", "task"),
                Node::new("b", "task"),
                Node::new("c", "task").with_policy(NodePolicy {
                    on_error: Some(OnErrorPolicy::Stop),
                    ..Default::default()
                }),
            ],
            edges: vec![
                Edge::new("e1", "a", "b", EDGE_LABEL_DEFAULT),
                Edge::new("e2", "a", "c", EDGE_LABEL_ON_ERROR),
            ],
            variables: vec![],
            policy: crate::flow::FlowPolicy {
                run_timeout_ms: None,
                default_node_policy: Some(NodePolicy {
                    on_error: Some(OnErrorPolicy::Retry),
                    retry: Some(RetryPolicy::new(1, 0, Default::default())),
                    timeout_ms: None,
                }),
            },
        }
    }

    #[test]
    fn test_edge_lookup() {
        let graph = FlowGraph::new(Arc::new(flow())).unwrap();
        assert_eq!(graph.edge("a", EDGE_LABEL_DEFAULT).unwrap().to, "b");
        assert_eq!(graph.edge("a", EDGE_LABEL_ON_ERROR).unwrap().to, "c");
        assert!(graph.edge("b", EDGE_LABEL_DEFAULT).is_none());
        assert!(graph.node("z").is_none());
    }

    #[test]
    fn test_policy_resolution() {
        let graph = FlowGraph::new(Arc::new(flow())).unwrap();

        let a = graph.node("a").unwrap();
        assert_eq!(graph.policy_for(a).on_error, Some(OnErrorPolicy::Retry));

        let c = graph.node("c").unwrap();
        let policy = graph.policy_for(c);
        assert_eq!(policy.on_error, Some(OnErrorPolicy::Stop));
        assert_eq!(policy.retry.map(|r| r.retries), Some(1));
    }

    #[test]
    fn test_invalid_flow_rejected() {
        let mut invalid = flow();
        invalid.entry_node_id = "nope".to_string();
        assert!(FlowGraph::new(Arc::new(invalid)).is_err());
    }
}
