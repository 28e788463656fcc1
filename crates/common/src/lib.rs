// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! HDB Common - Shared data model for HDB components
//!
//! This crate provides the types shared between the symbol database client,
//! the evaluation engine, and the replay tooling: breakpoint and variable
//! records, the compiled guard expression, and the wait/ready latch that
//! paces the simulator.

pub mod expression;
pub mod latch;
pub mod types;

pub use expression::{DebugExpression, ExpressionError};
pub use latch::WaitLatch;
pub use types::*;

/// Value rendered to the client in place of an RTL value that could not be
/// read (missing handle, `x`/`z` bits, simulator refusal).
pub const ERROR_VALUE_STR: &str = "ERROR";
