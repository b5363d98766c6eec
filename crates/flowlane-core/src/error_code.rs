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

use serde::{Deserialize, Serialize};

/// Kind of a node-level failure.
///
/// Node failures are data consumed by the error policy of the node, so the
/// code is what policies and observers match on rather than a type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Timeout,
    TabNotFound,
    FrameNotFound,
    TargetNotFound,
    ElementNotVisible,
    NavigationFailed,
    NetworkRequestFailed,
    ScriptFailed,
    ToolError,
    RunPaused,
    UnsupportedNode,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::TabNotFound => "TAB_NOT_FOUND",
            ErrorCode::FrameNotFound => "FRAME_NOT_FOUND",
            ErrorCode::TargetNotFound => "TARGET_NOT_FOUND",
            ErrorCode::ElementNotVisible => "ELEMENT_NOT_VISIBLE",
            ErrorCode::NavigationFailed => "NAVIGATION_FAILED",
            ErrorCode::NetworkRequestFailed => "NETWORK_REQUEST_FAILED",
            ErrorCode::ScriptFailed => "SCRIPT_FAILED",
            ErrorCode::ToolError => "TOOL_ERROR",
            ErrorCode::RunPaused => "RUN_PAUSED",
            ErrorCode::UnsupportedNode => "UNSUPPORTED_NODE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure reported by a node or by the runner itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NodeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn unsupported_node(kind: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedNode,
            format!("no node definition registered for kind '{kind}'"),
        )
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_code_wire_names() {
        let codes = [
            (ErrorCode::ValidationError, "VALIDATION_ERROR"),
            (ErrorCode::ElementNotVisible, "ELEMENT_NOT_VISIBLE"),
            (ErrorCode::NetworkRequestFailed, "NETWORK_REQUEST_FAILED"),
            (ErrorCode::UnsupportedNode, "UNSUPPORTED_NODE"),
        ];
        for (code, name) in codes {
            assert_eq!(serde_json::to_value(code).unwrap(), json!(name));
            assert_eq!(code.as_str(), name);
        }
    }

    #[test]
    fn test_node_error_serialization_skips_missing_data() {
        let error = NodeError::timeout("took too long");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"code": "TIMEOUT", "message": "took too long"})
        );

        let error = error.with_data(json!({"ms": 500}));
        let parsed: NodeError =
            serde_json::from_value(serde_json::to_value(&error).unwrap()).unwrap();
        assert_eq!(parsed.data, Some(json!({"ms": 500})));
        assert_eq!(parsed.to_string(), "TIMEOUT: took too long");
    }
}
