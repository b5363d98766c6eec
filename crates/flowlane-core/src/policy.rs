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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-node error and retry policy.
///
/// Every field is optional so that a node policy can be layered over the
/// flow's `defaultNodePolicy` field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Upper bound on a single attempt of the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl NodePolicy {
    /// Layer `self` over `defaults`: fields set on `self` win.
    pub fn merged_over(&self, defaults: &NodePolicy) -> NodePolicy {
        NodePolicy {
            on_error: self.on_error.clone().or_else(|| defaults.on_error.clone()),
            retry: self.retry.clone().or_else(|| defaults.retry.clone()),
            timeout_ms: self.timeout_ms.or(defaults.timeout_ms),
        }
    }
}

/// What to do when a node attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum OnErrorPolicy {
    /// The run ends `failed`.
    Stop,
    /// Ignore the error and follow the `default` edge.
    Continue,
    /// Re-run the node according to the node's retry policy.
    Retry,
    /// Jump to another node, either through a labeled edge or directly.
    Goto { target: GotoTarget },
}

/// Destination of a `goto` error policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GotoTarget {
    /// Follow the outgoing edge with this label from the failing node.
    EdgeLabel {
        #[serde(rename = "edgeLabel")]
        edge_label: String,
    },
    /// Jump directly to the node with this id.
    Node {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
}

impl GotoTarget {
    pub fn edge_label(label: impl Into<String>) -> Self {
        Self::EdgeLabel {
            edge_label: label.into(),
        }
    }

    pub fn node(node_id: impl Into<String>) -> Self {
        Self::Node {
            node_id: node_id.into(),
        }
    }
}

/// Shape of the delay between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub retries: u32,
    /// Base delay between attempts.
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Optional cap on the computed delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,
}

impl RetryPolicy {
    pub fn new(retries: u32, interval_ms: u64, backoff: Backoff) -> Self {
        Self {
            retries,
            interval_ms,
            backoff,
            max_interval_ms: None,
        }
    }

    /// Total attempts allowed, counting the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.interval_ms;
        let ms = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Linear => base.saturating_mul(u64::from(attempt)),
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        let ms = match self.max_interval_ms {
            Some(cap) => ms.min(cap),
            None => ms,
        };
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let fixed = RetryPolicy::new(3, 100, Backoff::Fixed);
        assert_eq!(fixed.delay(1), Duration::from_millis(100));
        assert_eq!(fixed.delay(3), Duration::from_millis(100));

        let linear = RetryPolicy::new(3, 100, Backoff::Linear);
        assert_eq!(linear.delay(1), Duration::from_millis(100));
        assert_eq!(linear.delay(3), Duration::from_millis(300));

        let exponential = RetryPolicy::new(3, 100, Backoff::Exponential);
        assert_eq!(exponential.delay(1), Duration::from_millis(100));
        assert_eq!(exponential.delay(2), Duration::from_millis(200));
        assert_eq!(exponential.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_cap_and_overflow() {
        let mut policy = RetryPolicy::new(100, 1_000, Backoff::Exponential);
        assert_eq!(policy.delay(80).as_millis(), u128::from(u64::MAX));

        policy.max_interval_ms = Some(5_000);
        assert_eq!(policy.delay(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_on_error_deserialization() {
        let stop: OnErrorPolicy = serde_yaml_ng::from_str("kind: stop").unwrap();
        assert_eq!(stop, OnErrorPolicy::Stop);

        let goto_label: OnErrorPolicy =
            serde_yaml_ng::from_str("kind: goto\ntarget:\n  edgeLabel: onError").unwrap();
        assert_eq!(
            goto_label,
            OnErrorPolicy::Goto {
                target: GotoTarget::edge_label("onError")
            }
        );

        let goto_node: OnErrorPolicy =
            serde_yaml_ng::from_str("kind: goto\ntarget:\n  nodeId: cleanup").unwrap();
        assert_eq!(
            goto_node,
            OnErrorPolicy::Goto {
                target: GotoTarget::node("cleanup")
            }
        );
    }

    #[test]
    fn test_policy_merge() {
        let defaults = NodePolicy {
            on_error: Some(OnErrorPolicy::Retry),
            retry: Some(RetryPolicy::new(2, 10, Backoff::Fixed)),
            timeout_ms: Some(1_000),
        };
        let node = NodePolicy {
            on_error: Some(OnErrorPolicy::Continue),
            ..Default::default()
        };

        let merged = node.merged_over(&defaults);
        assert_eq!(merged.on_error, Some(OnErrorPolicy::Continue));
        assert_eq!(merged.retry, defaults.retry);
        assert_eq!(merged.timeout_ms, Some(1_000));
    }
}
