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

//! VCD waveform database.
//!
//! Parses IEEE 1364 Value Change Dump files into per-signal time-ordered
//! change histories plus the instance tree. Values are kept as dumped; the
//! provider layer decides how to render them.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use thiserror::Error;

use crate::waveform::{WaveformDatabase, WaveformInstance, WaveformSignal};

/// Errors that can occur while loading a VCD file.
#[derive(Debug, Error)]
pub enum VcdError {
    /// An I/O error occurred while reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A parse error at a specific line number.
    #[error("parse error at line {line}: {message}")]
    Parse {
        /// The 1-based line number where the error occurred.
        line: usize,
        /// Description of the error.
        message: String,
    },
}

#[derive(Debug)]
struct InstanceRecord {
    full_name: String,
}

#[derive(Debug)]
struct SignalRecord {
    name: String,
    width: u32,
}

/// A fully decoded VCD waveform.
#[derive(Debug, Default)]
pub struct VcdDatabase {
    instances: Vec<InstanceRecord>,
    instance_index: HashMap<String, u64>,
    instance_children: Vec<Vec<u64>>,
    instance_vars: Vec<Vec<u64>>,
    signals: Vec<SignalRecord>,
    signal_index: HashMap<String, u64>,
    histories: Vec<Vec<(u64, String)>>,
}

impl VcdDatabase {
    /// Load a VCD file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VcdError> {
        let file = std::fs::File::open(path)?;
        Self::parse(std::io::BufReader::new(file))
    }

    /// Parse VCD text from a buffered reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, VcdError> {
        let mut db = Self::default();
        let mut scope_stack: Vec<u64> = Vec::new();
        let mut id_codes: HashMap<String, u64> = HashMap::new();
        let mut in_definitions = true;
        let mut current_time: u64 = 0;
        let mut line_num = 0usize;

        // multi-line keyword collection ($scope ... $end may span lines)
        let mut pending_keyword: Option<String> = None;
        let mut pending_body = String::new();

        for line in reader.lines() {
            let line = line?;
            line_num += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(keyword) = pending_keyword.clone() {
                if let Some(pos) = trimmed.find("$end") {
                    pending_body.push(' ');
                    pending_body.push_str(trimmed[..pos].trim());
                    db.process_keyword(
                        &keyword,
                        pending_body.trim(),
                        &mut scope_stack,
                        &mut id_codes,
                        line_num,
                    )?;
                    pending_keyword = None;
                    pending_body.clear();
                } else {
                    pending_body.push(' ');
                    pending_body.push_str(trimmed);
                }
                continue;
            }

            if in_definitions {
                if trimmed.starts_with("$enddefinitions") {
                    in_definitions = false;
                    continue;
                }
                if let Some(keyword) = extract_keyword(trimmed) {
                    let body = extract_keyword_body(trimmed);
                    if trimmed.contains("$end") {
                        db.process_keyword(
                            &keyword,
                            &body,
                            &mut scope_stack,
                            &mut id_codes,
                            line_num,
                        )?;
                    } else {
                        pending_keyword = Some(keyword);
                        pending_body = body;
                    }
                }
                continue;
            }

            if trimmed.starts_with("$dumpvars") || trimmed.starts_with("$end") {
                continue;
            }

            if let Some(time_str) = trimmed.strip_prefix('#') {
                current_time = time_str.parse().map_err(|_| VcdError::Parse {
                    line: line_num,
                    message: format!("invalid timestamp: {trimmed}"),
                })?;
                continue;
            }

            db.parse_value_change(trimmed, current_time, &id_codes, line_num)?;
        }

        Ok(db)
    }

    fn process_keyword(
        &mut self,
        keyword: &str,
        body: &str,
        scope_stack: &mut Vec<u64>,
        id_codes: &mut HashMap<String, u64>,
        line_num: usize,
    ) -> Result<(), VcdError> {
        match keyword {
            "scope" => {
                // "module <name>", "begin <name>", ...
                let name = body.split_whitespace().last().unwrap_or_default();
                let full_name = match scope_stack.last() {
                    Some(&parent) => {
                        format!("{}.{}", self.instances[parent as usize].full_name, name)
                    }
                    None => name.to_string(),
                };
                let id = self.instances.len() as u64;
                self.instances.push(InstanceRecord { full_name: full_name.clone() });
                self.instance_index.insert(full_name, id);
                self.instance_children.push(Vec::new());
                self.instance_vars.push(Vec::new());
                if let Some(&parent) = scope_stack.last() {
                    self.instance_children[parent as usize].push(id);
                }
                scope_stack.push(id);
            }
            "upscope" => {
                scope_stack.pop();
            }
            "var" => {
                // "<type> <width> <id_code> <name> [range]"
                let parts: Vec<&str> = body.split_whitespace().collect();
                if parts.len() < 4 {
                    return Err(VcdError::Parse {
                        line: line_num,
                        message: format!("invalid $var: {body}"),
                    });
                }
                let width: u32 = parts[1].parse().map_err(|_| VcdError::Parse {
                    line: line_num,
                    message: format!("invalid width in $var: {}", parts[1]),
                })?;
                let id_code = parts[2];
                let mut name = parts[3].to_string();
                // "data [3:0]" carries a vector range to drop; "mem [2]" is
                // part of the name
                if let Some(extra) = parts.get(4) {
                    if extra.starts_with('[') && !extra.contains(':') {
                        name.push_str(extra);
                    }
                }

                let Some(&parent) = scope_stack.last() else {
                    return Err(VcdError::Parse {
                        line: line_num,
                        message: format!("$var outside of any scope: {body}"),
                    });
                };
                let full_name =
                    format!("{}.{}", self.instances[parent as usize].full_name, name);

                // a repeated id code aliases an existing signal
                let id = match id_codes.get(id_code) {
                    Some(&id) => id,
                    None => {
                        let id = self.signals.len() as u64;
                        self.signals.push(SignalRecord { name: name.clone(), width });
                        self.histories.push(Vec::new());
                        id_codes.insert(id_code.to_string(), id);
                        id
                    }
                };
                self.signal_index.insert(full_name, id);
                self.instance_vars[parent as usize].push(id);
            }
            _ => {
                // $date, $version, $comment, $timescale, ...
            }
        }
        Ok(())
    }

    fn parse_value_change(
        &mut self,
        line: &str,
        time: u64,
        id_codes: &HashMap<String, u64>,
        line_num: usize,
    ) -> Result<(), VcdError> {
        let first = line.as_bytes()[0];
        match first {
            b'b' | b'B' => {
                let rest = &line[1..];
                let (bits, id_code) =
                    rest.split_once(char::is_whitespace).ok_or_else(|| VcdError::Parse {
                        line: line_num,
                        message: format!("invalid vector change: {line}"),
                    })?;
                if let Some(&id) = id_codes.get(id_code.trim()) {
                    self.histories[id as usize].push((time, bits.to_string()));
                }
            }
            b'0' | b'1' | b'x' | b'X' | b'z' | b'Z' => {
                let value = (first as char).to_ascii_lowercase();
                let id_code = &line[1..];
                if let Some(&id) = id_codes.get(id_code) {
                    self.histories[id as usize].push((time, value.to_string()));
                }
            }
            _ => {
                // $dumpoff/$dumpon sections, real values, ...
            }
        }
        Ok(())
    }
}

impl WaveformDatabase for VcdDatabase {
    fn get_instance_id(&self, full_name: &str) -> Option<u64> {
        self.instance_index.get(full_name).copied()
    }

    fn get_signal_id(&self, full_name: &str) -> Option<u64> {
        self.signal_index.get(full_name).copied()
    }

    fn get_instance_signals(&self, instance_id: u64) -> Vec<WaveformSignal> {
        let Some(ids) = self.instance_vars.get(instance_id as usize) else { return vec![] };
        ids.iter()
            .filter_map(|&id| self.get_signal(id))
            .collect()
    }

    fn get_child_instances(&self, instance_id: u64) -> Vec<WaveformInstance> {
        let Some(children) = self.instance_children.get(instance_id as usize) else {
            return vec![];
        };
        children
            .iter()
            .map(|&id| {
                let full_name = &self.instances[id as usize].full_name;
                let name =
                    full_name.rsplit('.').next().unwrap_or(full_name.as_str()).to_string();
                WaveformInstance { id, name }
            })
            .collect()
    }

    fn get_signal(&self, signal_id: u64) -> Option<WaveformSignal> {
        self.signals.get(signal_id as usize).map(|record| WaveformSignal {
            id: signal_id,
            name: record.name.clone(),
            width: record.width,
        })
    }

    fn get_instance(&self, instance_id: u64) -> Option<String> {
        self.instances.get(instance_id as usize).map(|record| record.full_name.clone())
    }

    fn get_signal_value(&self, signal_id: u64, time: u64) -> Option<String> {
        let history = self.histories.get(signal_id as usize)?;
        let idx = history.partition_point(|(t, _)| *t <= time);
        if idx == 0 {
            None
        } else {
            Some(history[idx - 1].1.clone())
        }
    }

    fn signal_changes(&self, signal_id: u64) -> Vec<(u64, String)> {
        self.histories.get(signal_id as usize).cloned().unwrap_or_default()
    }

    fn instance_names(&self) -> Vec<String> {
        self.instances.iter().map(|record| record.full_name.clone()).collect()
    }
}

fn extract_keyword(line: &str) -> Option<String> {
    let rest = line.strip_prefix('$')?;
    let end = rest.find(|c: char| c.is_whitespace() || c == '$').unwrap_or(rest.len());
    let keyword = &rest[..end];
    (!keyword.is_empty()).then(|| keyword.to_lowercase())
}

fn extract_keyword_body(line: &str) -> String {
    let Some(pos) = line.find(|c: char| c.is_whitespace()) else { return String::new() };
    let after = &line[pos..];
    let body = match after.find("$end") {
        Some(end) => &after[..end],
        None => after,
    };
    body.trim().to_string()
}
