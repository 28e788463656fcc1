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

//! On-disk symbol table document.
//!
//! The table is a single JSON document with one array per table. Variables
//! are referenced by id from the context/generator rows. The optional
//! `scopes` table lists scope entries in pre-order; flattening it in row
//! order yields the global breakpoint execution ordering.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use eyre::{Context, Result};
use hdb_common::{BreakPoint, ContextVariable, GeneratorVariable, Instance, Variable};
use serde::{Deserialize, Serialize};

/// A key/value annotation attached by the symbol table builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation key; multiple rows may share one key.
    pub name: String,
    /// Annotation payload.
    pub value: String,
}

/// One scope-tree node, pre-flattened to the breakpoint ids it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    /// Scope identifier.
    pub scope: u32,
    /// Breakpoint ids inside this scope, in source order.
    pub breakpoints: Vec<u32>,
}

/// The complete debug symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolStore {
    /// All eligible breakpoints.
    pub breakpoints: Vec<BreakPoint>,
    /// The design instance hierarchy.
    pub instances: Vec<Instance>,
    /// Variable rows referenced by context/generator variables.
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Locals visible at breakpoints.
    #[serde(default)]
    pub context_variables: Vec<ContextVariable>,
    /// Parameters of design instances.
    #[serde(default)]
    pub generator_variables: Vec<GeneratorVariable>,
    /// Builder annotations.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Scope table in pre-order; absent when the builder did not emit scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<ScopeEntry>>,
}

impl SymbolStore {
    /// Load a symbol table from disk.
    ///
    /// This is the only fallible entry point of the database layer: a table
    /// that does not exist or does not parse is a fatal session error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("unable to open symbol table {}", path.display()))?;
        let store = serde_json::from_reader(BufReader::new(file))
            .wrap_err_with(|| format!("malformed symbol table {}", path.display()))?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "breakpoints": [
                    {{"id": 0, "instance_id": 0, "filename": "alu.py", "line_num": 4}}
                ],
                "instances": [{{"id": 0, "name": "top"}}]
            }}"#
        )
        .unwrap();

        let store = SymbolStore::load(file.path()).unwrap();
        assert_eq!(store.breakpoints.len(), 1);
        assert_eq!(store.instances[0].name, "top");
        assert!(store.variables.is_empty());
        assert!(store.scopes.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = SymbolStore::load("/nonexistent/table.json").unwrap_err();
        assert!(err.to_string().contains("unable to open"));
    }

    #[test]
    fn test_load_malformed_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = SymbolStore::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
