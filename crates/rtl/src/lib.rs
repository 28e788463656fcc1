// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! HDB RTL - Simulator interface abstraction
//!
//! The debugger never talks to the simulator's procedural interface
//! directly. [`SimProvider`] is the capability seam: a native VPI binding
//! implements it inside a live simulator process (behind the `vpi` feature),
//! and the replay provider implements it atop a waveform database.
//! [`RtlClient`] layers name translation and handle caching on top of
//! whichever provider is installed.

mod client;
mod provider;
#[cfg(feature = "vpi")]
pub mod vpi;

pub use client::RtlClient;
pub use provider::{
    CallbackData, CallbackHandle, ModuleInfo, RewindRequest, SignalIterKind, SimHandle,
    SimProvider, ValueCallback,
};
