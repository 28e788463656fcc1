// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! HDB DB - Debug symbol table client
//!
//! The symbol table is produced out-of-band by the hardware compiler and is
//! strictly read-only here. [`SymbolStore`] is the on-disk document;
//! [`SymbolDatabaseClient`] layers queries, source-path remapping, and the
//! global breakpoint execution ordering on top of it.

mod client;
mod store;

pub use client::SymbolDatabaseClient;
pub use store::{Annotation, ScopeEntry, SymbolStore};
