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

//! Variable binding records.

use serde::{Deserialize, Serialize};

/// A binding target referenced by context and generator variables.
///
/// When `is_rtl` is set, `value` holds a scoped RTL signal name that must be
/// resolved through the simulator interface; otherwise `value` is a literal
/// encoded as a decimal integer string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Row identifier referenced by [`ContextVariable`]/[`GeneratorVariable`].
    pub id: u32,
    /// Scoped RTL name or literal value, depending on `is_rtl`.
    pub value: String,
    /// Whether `value` names an RTL signal.
    pub is_rtl: bool,
}

impl Variable {
    /// The literal value as an integer, if this is a non-RTL variable whose
    /// string parses as one.
    pub fn static_value(&self) -> Option<i64> {
        if self.is_rtl {
            return None;
        }
        self.value.parse().ok()
    }
}

/// A local binding visible at a breakpoint's source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextVariable {
    /// Source-level name of the local.
    pub name: String,
    /// Owning breakpoint.
    pub breakpoint_id: u32,
    /// Referenced [`Variable`] row.
    pub variable_id: u32,
}

/// A parameter of the hardware instance owning a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorVariable {
    /// Source-level name of the parameter.
    pub name: String,
    /// Owning instance.
    pub instance_id: u64,
    /// Referenced [`Variable`] row.
    pub variable_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_value() {
        let v = Variable { id: 0, value: "42".to_string(), is_rtl: false };
        assert_eq!(v.static_value(), Some(42));

        // RTL variables never have a static value, even if numeric
        let v = Variable { id: 1, value: "42".to_string(), is_rtl: true };
        assert_eq!(v.static_value(), None);

        let v = Variable { id: 2, value: "mod.signal".to_string(), is_rtl: false };
        assert_eq!(v.static_value(), None);

        let v = Variable { id: 3, value: "-7".to_string(), is_rtl: false };
        assert_eq!(v.static_value(), Some(-7));
    }
}
