// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! HDB Utils - Shared functionality for HDB components

pub mod logging;

pub use logging::*;
