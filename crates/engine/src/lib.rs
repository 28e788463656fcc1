// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! HDB Engine - The debug session
//!
//! Owns the breakpoint evaluation state machine, the request dispatcher,
//! and the socket server the client IDE connects to. The simulator (live or
//! replayed) drives [`Debugger::eval`] on every evaluation tick; the server
//! thread mutates the active breakpoint set and paces the simulator through
//! the wait/ready latch.

mod debugger;
pub mod protocol;
mod server;

pub use debugger::{Debugger, EvaluationMode};
pub use server::DebugServer;

/// Plus-arg that selects the listen port (`+DEBUG_PORT=<n>`).
pub const DEBUG_PORT_PLUS_ARG: &str = "+DEBUG_PORT=";
/// Plus-arg that enables info logging (`+DEBUG_LOG`).
pub const DEBUG_LOG_PLUS_ARG: &str = "+DEBUG_LOG";
/// CLI flag that suppresses symbol-table loading on connect (test hook).
pub const DEBUG_SKIP_DB_LOAD_FLAG: &str = "--debug-skip-db-load";
/// Default listen port when `+DEBUG_PORT` is absent or unparseable.
pub const DEFAULT_PORT: u16 = 8888;
