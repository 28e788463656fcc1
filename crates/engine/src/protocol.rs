// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Wire protocol between the debugger and the client IDE.
//!
//! Requests and responses are JSON objects tagged by `type`, one per line
//! on a persistent socket. Responses to requests carry `status`
//! success/error; `breakpoint_hit` events are pushed by the server without a
//! matching request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether a breakpoint request arms or disarms breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Arm the matched breakpoints.
    Add,
    /// Disarm the matched breakpoints.
    Remove,
}

/// Simulation-control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Resume evaluation in the current mode.
    Continue,
    /// Resume and fire the next breakpoint in execution order.
    StepOver,
    /// End the simulation and close the session.
    Stop,
}

/// What the client wants listed in a `debugger_info` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebuggerInfoKind {
    /// The active breakpoint set.
    Breakpoints,
}

/// A request from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Open a debug session against a symbol table.
    Connection {
        /// Path of the symbol table to load.
        db_filename: String,
        /// Optional source-path remap (DB prefix -> client prefix).
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        path_mapping: BTreeMap<String, String>,
    },
    /// Arm or disarm breakpoints by source location.
    Breakpoint {
        /// Add or remove.
        action: Action,
        /// Client-side source path.
        filename: String,
        /// 1-based source line.
        line_num: u32,
        /// Column; zero matches any column at the line.
        #[serde(default)]
        column_num: u32,
        /// Extra guard condition, ANDed onto the table condition.
        #[serde(default)]
        condition: String,
    },
    /// Arm or disarm one breakpoint by table id.
    BreakpointId {
        /// Add or remove.
        action: Action,
        /// Breakpoint id.
        id: u32,
        /// Extra guard condition, ANDed onto the table condition.
        #[serde(default)]
        condition: String,
    },
    /// List eligible breakpoints at a location.
    BpLocation {
        /// Client-side source path.
        filename: String,
        /// Restrict to one line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_num: Option<u32>,
        /// Restrict to one column.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column_num: Option<u32>,
    },
    /// Pace the simulation.
    Command {
        /// The command.
        command: CommandKind,
    },
    /// Introspect the debugger.
    DebuggerInfo {
        /// What to list.
        command: DebuggerInfoKind,
    },
    /// An error report from the client; acknowledged and dropped.
    Error {},
}

/// Success/error discriminator on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The request was handled.
    Success,
    /// The request failed; `reason` says why.
    Error,
}

/// One breakpoint location entry in a [`Response::BpLocationResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpLocation {
    /// Breakpoint id.
    pub id: u32,
    /// Source path as stored in the table.
    pub filename: String,
    /// 1-based source line.
    pub line_num: u32,
    /// Column within the line.
    pub column_num: u32,
}

/// A response or event sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Plain acknowledgement.
    Generic {
        /// Outcome.
        status: Status,
        /// Failure reason, present on errors.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Answer to a `bp_location` request.
    BpLocationResponse {
        /// Matching breakpoints.
        breakpoints: Vec<BpLocation>,
    },
    /// Pushed when a breakpoint fires.
    BreakpointHit {
        /// Simulation time of the hit.
        time: u64,
        /// Owning instance id.
        instance_id: u64,
        /// Owning instance hierarchical name.
        instance_name: String,
        /// Breakpoint id.
        id: u32,
        /// Source path.
        filename: String,
        /// 1-based source line.
        line_num: u32,
        /// Column within the line.
        column_num: u32,
        /// Context variable snapshot (name -> rendered value).
        locals: BTreeMap<String, String>,
        /// Generator variable snapshot (name -> rendered value).
        generators: BTreeMap<String, String>,
    },
    /// Answer to a `debugger_info` request.
    DebuggerInfoResponse {
        /// The active breakpoint set.
        breakpoints: Vec<BpLocation>,
    },
}

impl Response {
    /// Plain success.
    pub fn success() -> Self {
        Self::Generic { status: Status::Success, reason: None }
    }

    /// Error with a reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Generic { status: Status::Error, reason: Some(reason.into()) }
    }

    /// Serialize for the wire. Protocol types always serialize.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"generic","status":"error","reason":"serialization failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let req: Request = serde_json::from_str(
            r#"{"type": "breakpoint", "action": "add", "filename": "alu.py",
                "line_num": 42, "condition": "a > 0"}"#,
        )
        .unwrap();
        match req {
            Request::Breakpoint { action, filename, line_num, column_num, condition } => {
                assert_eq!(action, Action::Add);
                assert_eq!(filename, "alu.py");
                assert_eq!(line_num, 42);
                assert_eq!(column_num, 0);
                assert_eq!(condition, "a > 0");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_command_serialization() {
        let req: Request =
            serde_json::from_str(r#"{"type": "command", "command": "step_over"}"#).unwrap();
        assert!(matches!(req, Request::Command { command: CommandKind::StepOver }));

        let req: Request =
            serde_json::from_str(r#"{"type": "command", "command": "continue"}"#).unwrap();
        assert!(matches!(req, Request::Command { command: CommandKind::Continue }));
    }

    #[test]
    fn test_connection_without_mapping() {
        let req: Request =
            serde_json::from_str(r#"{"type": "connection", "db_filename": "debug.db"}"#).unwrap();
        match req {
            Request::Connection { db_filename, path_mapping } => {
                assert_eq!(db_filename, "debug.db");
                assert!(path_mapping.is_empty());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_request() {
        assert!(serde_json::from_str::<Request>(r#"{"type": "unknown"}"#).is_err());
        assert!(serde_json::from_str::<Request>("not json").is_err());
    }

    #[test]
    fn test_response_serialization() {
        let json = Response::success().to_json();
        assert!(json.contains(r#""type":"generic""#));
        assert!(json.contains(r#""status":"success""#));
        assert!(!json.contains("reason"));

        let json = Response::error("no such breakpoint").to_json();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""reason":"no such breakpoint""#));
    }

    #[test]
    fn test_breakpoint_hit_serialization() {
        let mut locals = BTreeMap::new();
        locals.insert("a".to_string(), "7".to_string());
        let hit = Response::BreakpointHit {
            time: 40,
            instance_id: 1,
            instance_name: "top.inst".to_string(),
            id: 3,
            filename: "alu.py".to_string(),
            line_num: 9,
            column_num: 0,
            locals,
            generators: BTreeMap::new(),
        };
        let json = hit.to_json();
        assert!(json.contains(r#""type":"breakpoint_hit""#));
        assert!(json.contains(r#""time":40"#));
        assert!(json.contains(r#""a":"7""#));
    }
}
