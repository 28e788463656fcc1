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

//! The waveform database seam.
//!
//! Concrete databases decode VCD or FSDB files; the replay provider only
//! sees this trait. Values are raw bit strings as dumped (`"1"`, `"10"`,
//! `"x"`), in MSB-first order.

/// A signal recorded in the waveform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformSignal {
    /// Database-local signal identifier.
    pub id: u64,
    /// Local name within the owning instance (e.g. `b`, `result[2]`).
    pub name: String,
    /// Bit width.
    pub width: u32,
}

/// An instance (scope) recorded in the waveform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformInstance {
    /// Database-local instance identifier.
    pub id: u64,
    /// Local name within the parent scope.
    pub name: String,
}

/// Read-only view over a decoded waveform.
pub trait WaveformDatabase: Send + Sync {
    /// Instance id by full hierarchical name.
    fn get_instance_id(&self, full_name: &str) -> Option<u64>;

    /// Signal id by full hierarchical name.
    fn get_signal_id(&self, full_name: &str) -> Option<u64>;

    /// All signals directly inside an instance.
    fn get_instance_signals(&self, instance_id: u64) -> Vec<WaveformSignal>;

    /// Direct child instances of an instance.
    fn get_child_instances(&self, instance_id: u64) -> Vec<WaveformInstance>;

    /// Signal metadata by id.
    fn get_signal(&self, signal_id: u64) -> Option<WaveformSignal>;

    /// Full hierarchical name of an instance.
    fn get_instance(&self, instance_id: u64) -> Option<String>;

    /// The raw value of a signal at a time: the latest change at or before
    /// `time`. `None` before the first recorded change.
    fn get_signal_value(&self, signal_id: u64, time: u64) -> Option<String>;

    /// The full change history of a signal, ascending in time.
    fn signal_changes(&self, signal_id: u64) -> Vec<(u64, String)>;

    /// Full names of every instance, in declaration order.
    fn instance_names(&self) -> Vec<String>;

    /// Locate the design-definition names of the symbol table inside this
    /// waveform's hierarchy.
    ///
    /// Waveforms carry no definition names, so this is a containment
    /// heuristic: the candidate instance must contain every relative path
    /// the symbol table mentions below the definition; the deepest candidate
    /// wins. Returns the definition name and the matching instance prefix
    /// with a trailing separator.
    fn compute_instance_mapping(&self, instance_names: &[String]) -> Option<(String, String)> {
        let top = instance_names.first().map(|name| split_top(name).0)?;
        let tails: Vec<&str> = instance_names
            .iter()
            .filter_map(|name| {
                let (t, tail) = split_top(name);
                (t == top && !tail.is_empty()).then_some(tail)
            })
            .collect();

        let all_names = self.instance_names();
        let mut best: Option<&String> = None;
        for candidate in &all_names {
            let contains_all = tails
                .iter()
                .all(|tail| self.get_instance_id(&format!("{candidate}.{tail}")).is_some());
            if !contains_all {
                continue;
            }
            let depth = candidate.matches('.').count();
            if best.map_or(true, |b| depth > b.matches('.').count()) {
                best = Some(candidate);
            }
        }
        best.map(|name| (top.to_string(), format!("{name}.")))
    }
}

fn split_top(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((top, tail)) => (top, tail),
        None => (name, ""),
    }
}
