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

//! FSDB waveform database.
//!
//! The vendor reader library exposes a C++ API (`ffrAPI.h`); this module
//! talks to it through a small C shim (`hdb_ffr_*`) that flattens the scope
//! tree walk into callbacks and renders signal values as bit strings. Both
//! the shim and the reader library are proprietary-adjacent and only link
//! inside the `fsdb` feature.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::sync::Mutex;

use crate::waveform::{WaveformDatabase, WaveformInstance, WaveformSignal};

const EVENT_SCOPE: c_int = 0;
const EVENT_UPSCOPE: c_int = 1;
const EVENT_VAR: c_int = 2;

extern "C" {
    fn hdb_ffr_open(path: *const c_char) -> *mut c_void;
    fn hdb_ffr_close(reader: *mut c_void);
    fn hdb_ffr_read_scope_var_tree(
        reader: *mut c_void,
        callback: extern "C" fn(c_int, *const c_char, u32, u64, *mut c_void),
        data: *mut c_void,
    ) -> c_int;
    fn hdb_ffr_create_traverse_handle(reader: *mut c_void, idcode: u64) -> *mut c_void;
    fn hdb_ffr_free_traverse_handle(handle: *mut c_void);
    /// Seek the cursor to the last value change at or before `time`.
    fn hdb_ffr_goto_time(handle: *mut c_void, time: u64) -> c_int;
    /// Read the value at the cursor as a bit string; returns the change time.
    fn hdb_ffr_get_vc(handle: *mut c_void, out: *mut c_char, capacity: usize, time: *mut u64)
        -> c_int;
    /// Step the cursor forward; non-zero while more changes exist.
    fn hdb_ffr_next_vc(handle: *mut c_void) -> c_int;
}

#[derive(Default)]
struct TreeBuilder {
    scopes: Vec<String>,
    scope_ids: Vec<u64>,
    instances: Vec<String>,
    instance_index: HashMap<String, u64>,
    instance_children: Vec<Vec<u64>>,
    instance_vars: Vec<Vec<u64>>,
    signals: HashMap<u64, WaveformSignal>,
    signal_index: HashMap<String, u64>,
}

impl TreeBuilder {
    fn full_name(&self, name: &str) -> String {
        if self.scopes.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.scopes.join("."), name)
        }
    }
}

extern "C" fn tree_event(
    event: c_int,
    name: *const c_char,
    width: u32,
    idcode: u64,
    data: *mut c_void,
) {
    let builder = unsafe { &mut *(data as *mut TreeBuilder) };
    let name = if name.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    };
    match event {
        EVENT_SCOPE => {
            let full_name = builder.full_name(&name);
            let id = builder.instances.len() as u64;
            builder.instances.push(full_name.clone());
            builder.instance_index.insert(full_name, id);
            builder.instance_children.push(Vec::new());
            builder.instance_vars.push(Vec::new());
            if let Some(&parent) = builder.scope_ids.last() {
                builder.instance_children[parent as usize].push(id);
            }
            builder.scopes.push(name);
            builder.scope_ids.push(id);
        }
        EVENT_UPSCOPE => {
            builder.scopes.pop();
            builder.scope_ids.pop();
        }
        EVENT_VAR => {
            let full_name = builder.full_name(&name);
            // the FSDB idcode is the signal id, avoiding a translation layer
            builder.signals.insert(idcode, WaveformSignal { id: idcode, name, width });
            builder.signal_index.insert(full_name, idcode);
            if let Some(&parent) = builder.scope_ids.last() {
                builder.instance_vars[parent as usize].push(idcode);
            }
        }
        _ => {}
    }
}

/// [`WaveformDatabase`] over an FSDB file.
pub struct FsdbDatabase {
    reader: *mut c_void,
    tree: TreeBuilder,
    /// The reader's traversal handles are not thread-safe.
    traverse_lock: Mutex<()>,
}

// the reader object is only touched under `traverse_lock`
unsafe impl Send for FsdbDatabase {}
unsafe impl Sync for FsdbDatabase {}

impl FsdbDatabase {
    /// Open an FSDB file. Returns `None` when the file is not a valid FSDB
    /// or the reader refuses it.
    pub fn open(path: &str) -> Option<Self> {
        let c_path = CString::new(path).ok()?;
        let reader = unsafe { hdb_ffr_open(c_path.as_ptr()) };
        if reader.is_null() {
            return None;
        }
        let mut tree = TreeBuilder::default();
        let ok = unsafe {
            hdb_ffr_read_scope_var_tree(reader, tree_event, &mut tree as *mut _ as *mut c_void)
        };
        if ok == 0 || !tree.scopes.is_empty() {
            unsafe { hdb_ffr_close(reader) };
            return None;
        }
        Some(Self { reader, tree, traverse_lock: Mutex::new(()) })
    }

    fn read_value_at(&self, idcode: u64, time: u64) -> Option<(u64, String)> {
        let _guard = self.traverse_lock.lock().unwrap_or_else(|e| e.into_inner());
        let handle = unsafe { hdb_ffr_create_traverse_handle(self.reader, idcode) };
        if handle.is_null() {
            return None;
        }
        let result = (unsafe { hdb_ffr_goto_time(handle, time) } != 0)
            .then(|| read_cursor(handle))
            .flatten();
        unsafe { hdb_ffr_free_traverse_handle(handle) };
        result
    }
}

fn read_cursor(handle: *mut c_void) -> Option<(u64, String)> {
    let mut buffer = [0 as c_char; 4096];
    let mut time = 0u64;
    let ok = unsafe { hdb_ffr_get_vc(handle, buffer.as_mut_ptr(), buffer.len(), &mut time) };
    if ok == 0 {
        return None;
    }
    let value = unsafe { CStr::from_ptr(buffer.as_ptr()) }.to_string_lossy().into_owned();
    Some((time, value))
}

impl Drop for FsdbDatabase {
    fn drop(&mut self) {
        unsafe { hdb_ffr_close(self.reader) };
    }
}

impl WaveformDatabase for FsdbDatabase {
    fn get_instance_id(&self, full_name: &str) -> Option<u64> {
        self.tree.instance_index.get(full_name).copied()
    }

    fn get_signal_id(&self, full_name: &str) -> Option<u64> {
        // arrays and structs are reachable by either spelling
        self.tree
            .signal_index
            .get(full_name)
            .or_else(|| {
                self.tree
                    .signal_index
                    .get(&full_name.replace('[', ".").replace(']', ""))
            })
            .copied()
    }

    fn get_instance_signals(&self, instance_id: u64) -> Vec<WaveformSignal> {
        let Some(ids) = self.tree.instance_vars.get(instance_id as usize) else { return vec![] };
        ids.iter().filter_map(|id| self.tree.signals.get(id).cloned()).collect()
    }

    fn get_child_instances(&self, instance_id: u64) -> Vec<WaveformInstance> {
        let Some(children) = self.tree.instance_children.get(instance_id as usize) else {
            return vec![];
        };
        children
            .iter()
            .map(|&id| {
                let full = &self.tree.instances[id as usize];
                let name = full.rsplit('.').next().unwrap_or(full.as_str()).to_string();
                WaveformInstance { id, name }
            })
            .collect()
    }

    fn get_signal(&self, signal_id: u64) -> Option<WaveformSignal> {
        self.tree.signals.get(&signal_id).cloned()
    }

    fn get_instance(&self, instance_id: u64) -> Option<String> {
        self.tree.instances.get(instance_id as usize).cloned()
    }

    fn get_signal_value(&self, signal_id: u64, time: u64) -> Option<String> {
        self.read_value_at(signal_id, time).map(|(_, value)| value)
    }

    fn signal_changes(&self, signal_id: u64) -> Vec<(u64, String)> {
        let _guard = self.traverse_lock.lock().unwrap_or_else(|e| e.into_inner());
        let handle = unsafe { hdb_ffr_create_traverse_handle(self.reader, signal_id) };
        if handle.is_null() {
            return vec![];
        }
        let mut changes = Vec::new();
        while let Some(change) = read_cursor(handle) {
            changes.push(change);
            if unsafe { hdb_ffr_next_vc(handle) } == 0 {
                break;
            }
        }
        unsafe { hdb_ffr_free_traverse_handle(handle) };
        changes
    }

    fn instance_names(&self) -> Vec<String> {
        self.tree.instances.clone()
    }
}
