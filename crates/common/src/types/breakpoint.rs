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

//! Breakpoint and instance records.
//!
//! Both are immutable rows from the prebuilt symbol table. A [`BreakPoint`]
//! is an *eligible* stopping point compiled into the design; whether it is
//! armed at runtime is the evaluation engine's business, not the record's.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A source-level breakpoint record from the symbol table.
///
/// Each `(filename, line_num, column_num)` triple may map to any number of
/// records (one per instantiation of the surrounding generator); `id` is
/// unique across the whole table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPoint {
    /// Stable identifier, unique across the symbol table.
    pub id: u32,
    /// Owning design instance, if the builder recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
    /// Source file this breakpoint belongs to (DB-side path).
    pub filename: String,
    /// 1-based source line.
    pub line_num: u32,
    /// Column within the line. `0` means "any column" in queries.
    #[serde(default)]
    pub column_num: u32,
    /// Guard expression attached at build time. Empty means always true.
    #[serde(default)]
    pub condition: String,
}

impl Display for BreakPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.filename, self.line_num)?;
        if self.column_num > 0 {
            write!(f, ":{}", self.column_num)?;
        }
        if !self.condition.is_empty() {
            write!(f, " if {}", self.condition)?;
        }
        Ok(())
    }
}

/// A node in the design instance hierarchy.
///
/// `name` is the dot-separated hierarchical path as the symbol table builder
/// saw it, e.g. `top.inst`. Names are unique; ids are arbitrary but stable
/// for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier.
    pub id: u64,
    /// Dot-separated hierarchical path.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_display() {
        let bp = BreakPoint {
            id: 0,
            instance_id: Some(1),
            filename: "alu.py".to_string(),
            line_num: 42,
            column_num: 0,
            condition: String::new(),
        };
        assert_eq!(bp.to_string(), "alu.py:42");

        let bp = BreakPoint { column_num: 8, condition: "a > 0".to_string(), ..bp };
        assert_eq!(bp.to_string(), "alu.py:42:8 if a > 0");
    }

    #[test]
    fn test_breakpoint_deserialize_defaults() {
        // column_num, condition and instance_id are optional in the table
        let bp: BreakPoint =
            serde_json::from_str(r#"{"id": 3, "filename": "mod.py", "line_num": 7}"#).unwrap();
        assert_eq!(bp.id, 3);
        assert_eq!(bp.instance_id, None);
        assert_eq!(bp.column_num, 0);
        assert!(bp.condition.is_empty());
    }
}
