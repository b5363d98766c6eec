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

//! Run diagnostic context for log records.
//!
//! Thread-local storage for the run and node being executed, injected into
//! every log record by [`RunDiagnostic`]. The guards are meant to be scoped
//! around synchronous logging; they must not be held across an `.await`.

use std::cell::RefCell;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunInfo {
    flow_id: String,
    run_id: String,
}

impl RunInfo {
    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

thread_local! {
    static RUN_INFO: RefCell<Option<RunInfo>> = const { RefCell::new(None) };
    static NODE_ID: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Sets the current run on creation and clears it on drop.
pub struct RunInfoGuard {
    _private: (),
}

impl RunInfoGuard {
    pub fn new(flow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        let run_info = RunInfo {
            flow_id: flow_id.into(),
            run_id: run_id.into(),
        };
        RUN_INFO.with(|r| {
            *r.borrow_mut() = Some(run_info);
        });
        Self { _private: () }
    }
}

impl Drop for RunInfoGuard {
    fn drop(&mut self) {
        RUN_INFO.with(|r| {
            *r.borrow_mut() = None;
        });
    }
}

/// Sets the current node on creation and clears it on drop.
pub struct NodeIdGuard {
    _private: (),
}

impl NodeIdGuard {
    pub fn new(node_id: impl Into<String>) -> Self {
        NODE_ID.with(|s| {
            *s.borrow_mut() = Some(node_id.into());
        });
        Self { _private: () }
    }
}

impl Drop for NodeIdGuard {
    fn drop(&mut self) {
        NODE_ID.with(|s| {
            *s.borrow_mut() = None;
        });
    }
}

pub fn get_run_info() -> Option<RunInfo> {
    RUN_INFO.with(|r| r.borrow().clone())
}

pub fn get_node_id() -> Option<String> {
    NODE_ID.with(|s| s.borrow().clone())
}

/// Diagnostic that adds `run_id`, `flow_id` and `node_id` to log records.
#[derive(Debug, Default)]
pub struct RunDiagnostic;

impl logforth::diagnostic::Diagnostic for RunDiagnostic {
    fn visit(&self, visitor: &mut dyn logforth::kv::Visitor) -> Result<(), logforth::Error> {
        use logforth::kv::{Key, Value};

        if let Some(run_info) = get_run_info() {
            visitor.visit(Key::new("run_id"), Value::from_str(&run_info.run_id))?;
            visitor.visit(Key::new("flow_id"), Value::from_display(&run_info.flow_id))?;
        }

        if let Some(node_id) = get_node_id() {
            visitor.visit(Key::new("node_id"), Value::from_display(&node_id))?;
        }

        Ok(())
    }
}
