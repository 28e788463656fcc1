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

//! The emulated procedural interface.
//!
//! Implements [`SimProvider`] over a [`WaveformDatabase`] so the debugger
//! runs unchanged against a dump. Handles are indices into an internal
//! target table; the current simulation time is whatever the emulation
//! engine (or an explicit [`set_timestamp`](ReplayProvider::set_timestamp))
//! last set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hdb_rtl::{
    CallbackData, CallbackHandle, ModuleInfo, RewindRequest, SignalIterKind, SimHandle,
    SimProvider, ValueCallback,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::value::{convert_str_value, parse_int_value};
use crate::waveform::WaveformDatabase;

#[derive(Debug, Clone, Copy)]
enum HandleTarget {
    Signal(u64),
    Instance(u64),
}

struct RegisteredCallback {
    signal_id: u64,
    handle: SimHandle,
    last_value: Option<String>,
    callback: ValueCallback,
}

#[derive(Default)]
struct Inner {
    targets: Vec<HandleTarget>,
    handle_index: HashMap<String, Option<SimHandle>>,
    /// Synthetic `prefix[i][j]` names aliasing `prefix.i.j` signals.
    array_aliases: HashMap<String, u64>,
    /// Ordered so callbacks fire in registration order.
    callbacks: BTreeMap<u64, RegisteredCallback>,
    next_callback_id: u64,
    /// Instance full name -> definition name, installed from the symbol
    /// table mapping heuristic.
    def_names: HashMap<String, String>,
    /// Callbacks removed while they were firing.
    tombstones: HashSet<u64>,
    rewind: Option<RewindRequest>,
}

/// Replay implementation of the simulator interface.
pub struct ReplayProvider {
    db: Arc<dyn WaveformDatabase>,
    timestamp: AtomicU64,
    finished: AtomicBool,
    argv: Mutex<Vec<String>>,
    inner: Mutex<Inner>,
}

impl ReplayProvider {
    /// Wrap a waveform database.
    pub fn new(db: Arc<dyn WaveformDatabase>) -> Self {
        Self {
            db,
            timestamp: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            argv: Mutex::new(Vec::new()),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The wrapped waveform database.
    pub fn database(&self) -> &Arc<dyn WaveformDatabase> {
        &self.db
    }

    /// Install the argv reported to plus-arg discovery.
    pub fn set_argv(&self, argv: Vec<String>) {
        *self.argv.lock() = argv;
    }

    /// Pin the current simulation time, so value queries made before the
    /// engine runs observe the waveform at `time`.
    pub fn set_timestamp(&self, time: u64) {
        self.timestamp.store(time, Ordering::SeqCst);
    }

    /// Install definition names for instances, from
    /// [`WaveformDatabase::compute_instance_mapping`]: the instance at
    /// `prefix` (trailing separator trimmed) reports `def_name` during
    /// design-tree walks.
    pub fn set_instance_mapping(&self, def_name: &str, prefix: &str) {
        let full_name = prefix.trim_end_matches('.');
        self.inner.lock().def_names.insert(full_name.to_string(), def_name.to_string());
    }

    /// Pre-register synthetic `prefix[i][j]` names for dotted array signals
    /// (`prefix.i.j`), so either form resolves to the same signal.
    pub fn build_array_table(&self, names: &[String]) {
        let mut inner = self.inner.lock();
        for name in names {
            let Some(id) = self.db.get_signal_id(name) else { continue };
            inner.array_aliases.insert(dotted_to_indexed(name), id);
        }
    }

    /// The raw value of a signal handle in the client string encoding.
    pub fn get_value_str(&self, handle: SimHandle) -> Option<String> {
        let target = self.target(handle)?;
        let HandleTarget::Signal(id) = target else { return None };
        let raw = self.db.get_signal_value(id, self.timestamp.load(Ordering::SeqCst))?;
        Some(convert_str_value(&raw))
    }

    /// Whether `finish` was issued.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn target(&self, handle: SimHandle) -> Option<HandleTarget> {
        let inner = self.inner.lock();
        inner.targets.get((handle.0 as usize).checked_sub(1)?).copied()
    }

    fn intern(inner: &mut Inner, target: HandleTarget) -> SimHandle {
        inner.targets.push(target);
        SimHandle(inner.targets.len() as u64)
    }

    fn resolve_name(&self, inner: &mut Inner, full_name: &str) -> Option<SimHandle> {
        if let Some(&cached) = inner.handle_index.get(full_name) {
            return cached;
        }
        let target = self
            .db
            .get_signal_id(full_name)
            .or_else(|| inner.array_aliases.get(full_name).copied())
            .or_else(|| {
                // indexed selects fall back to the dotted spelling
                full_name
                    .contains('[')
                    .then(|| self.db.get_signal_id(&indexed_to_dotted(full_name)))
                    .flatten()
            })
            .map(HandleTarget::Signal)
            .or_else(|| self.db.get_instance_id(full_name).map(HandleTarget::Instance));
        let handle = target.map(|t| Self::intern(inner, t));
        inner.handle_index.insert(full_name.to_string(), handle);
        handle
    }

    // engine-facing internals

    pub(crate) fn tracked_signals(&self) -> Vec<u64> {
        let inner = self.inner.lock();
        let mut ids: Vec<u64> = inner.callbacks.values().map(|cb| cb.signal_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Fire every callback whose signal value at `time` differs from its
    /// last observed value.
    pub(crate) fn fire_callbacks_at(&self, time: u64) {
        self.timestamp.store(time, Ordering::SeqCst);
        let due: Vec<(u64, Option<String>)> = {
            let inner = self.inner.lock();
            inner
                .callbacks
                .iter()
                .filter_map(|(&id, cb)| {
                    let value = self.db.get_signal_value(cb.signal_id, time);
                    (value != cb.last_value).then_some((id, value))
                })
                .collect()
        };
        for (id, value) in due {
            // callbacks may re-enter the provider (rewind, value reads), so
            // each one runs with its entry taken out of the locked map
            let Some(mut cb) = self.inner.lock().callbacks.remove(&id) else { continue };
            cb.last_value = value.clone();
            let data = CallbackData {
                handle: cb.handle,
                value: value.as_deref().and_then(parse_int_value),
                time,
            };
            (cb.callback)(&data);
            let mut inner = self.inner.lock();
            if !inner.tombstones.remove(&id) {
                inner.callbacks.insert(id, cb);
            }
        }
    }

    /// Forget every last-observed value, so replayed changes re-fire.
    pub(crate) fn reset_observed(&self) {
        let mut inner = self.inner.lock();
        for cb in inner.callbacks.values_mut() {
            cb.last_value = None;
        }
    }

    pub(crate) fn take_rewind(&self) -> Option<RewindRequest> {
        self.inner.lock().rewind.take()
    }

    /// The greatest time at or before `request.time` at which any listed
    /// clock rises. Replay resumes from that edge.
    pub(crate) fn rewind_target(&self, request: &RewindRequest) -> Option<u64> {
        let mut best: Option<u64> = None;
        for &clock in &request.clock_signals {
            let Some(HandleTarget::Signal(id)) = self.target(clock) else { continue };
            let mut previous_high = false;
            for (time, value) in self.db.signal_changes(id) {
                let high = parse_int_value(&value).is_some_and(|v| v != 0);
                if high && !previous_high && time <= request.time {
                    best = Some(best.map_or(time, |b| b.max(time)));
                }
                previous_high = high;
            }
        }
        best
    }
}

impl SimProvider for ReplayProvider {
    fn product(&self) -> String {
        "hdb-replay".to_string()
    }

    fn argv(&self) -> Vec<String> {
        self.argv.lock().clone()
    }

    fn simulation_time(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    fn handle_by_name(&self, full_name: &str) -> Option<SimHandle> {
        let mut inner = self.inner.lock();
        self.resolve_name(&mut inner, full_name)
    }

    fn get_value(&self, handle: SimHandle) -> Option<i64> {
        let HandleTarget::Signal(id) = self.target(handle)? else { return None };
        let raw = self.db.get_signal_value(id, self.timestamp.load(Ordering::SeqCst))?;
        parse_int_value(&raw)
    }

    fn child_modules(&self, parent: Option<SimHandle>) -> Vec<ModuleInfo> {
        let mut inner = self.inner.lock();
        let children: Vec<(u64, String)> = match parent {
            None => {
                // top instances are the ones without a separator
                self.db
                    .instance_names()
                    .into_iter()
                    .filter(|name| !name.contains('.'))
                    .filter_map(|name| self.db.get_instance_id(&name).map(|id| (id, name)))
                    .collect()
            }
            Some(handle) => {
                let target = (handle.0 as usize)
                    .checked_sub(1)
                    .and_then(|i| inner.targets.get(i).copied());
                let Some(HandleTarget::Instance(id)) = target else {
                    return vec![];
                };
                let Some(parent_name) = self.db.get_instance(id) else { return vec![] };
                self.db
                    .get_child_instances(id)
                    .into_iter()
                    .map(|child| (child.id, format!("{parent_name}.{}", child.name)))
                    .collect()
            }
        };
        children
            .into_iter()
            .map(|(id, full_name)| {
                let handle = match inner.handle_index.get(&full_name) {
                    Some(&Some(handle)) => handle,
                    _ => {
                        let handle = Self::intern(&mut inner, HandleTarget::Instance(id));
                        inner.handle_index.insert(full_name.clone(), Some(handle));
                        handle
                    }
                };
                let def_name = inner
                    .def_names
                    .get(&full_name)
                    .cloned()
                    .unwrap_or_else(|| {
                        full_name.rsplit('.').next().unwrap_or(&full_name).to_string()
                    });
                ModuleInfo { handle, def_name, full_name }
            })
            .collect()
    }

    fn module_signals(&self, module: SimHandle, _kind: SignalIterKind) -> Vec<(String, SimHandle)> {
        let Some(HandleTarget::Instance(id)) = self.target(module) else { return vec![] };
        let Some(instance_name) = self.db.get_instance(id) else { return vec![] };
        let signals = self.db.get_instance_signals(id);
        let mut inner = self.inner.lock();
        signals
            .into_iter()
            .filter_map(|signal| {
                let full_name = format!("{instance_name}.{}", signal.name);
                self.resolve_name(&mut inner, &full_name)
                    .map(|handle| (signal.name, handle))
            })
            .collect()
    }

    fn register_value_callback(
        &self,
        handle: SimHandle,
        callback: ValueCallback,
    ) -> Option<CallbackHandle> {
        let HandleTarget::Signal(signal_id) = self.target(handle)? else { return None };
        let mut inner = self.inner.lock();
        inner.next_callback_id += 1;
        let id = inner.next_callback_id;
        inner.callbacks.insert(
            id,
            RegisteredCallback { signal_id, handle, last_value: None, callback },
        );
        debug!(callback = id, signal = signal_id, "value-change callback registered");
        Some(CallbackHandle(id))
    }

    fn remove_callback(&self, callback: CallbackHandle) {
        let mut inner = self.inner.lock();
        if inner.callbacks.remove(&callback.0).is_none() {
            // currently firing; make sure it does not come back
            inner.tombstones.insert(callback.0);
        }
    }

    fn stop(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn rewind(&self, request: &RewindRequest) -> bool {
        self.inner.lock().rewind = Some(request.clone());
        true
    }
}

/// `prefix.0.1` -> `prefix[0][1]`: trailing all-numeric segments become
/// index selects.
fn dotted_to_indexed(name: &str) -> String {
    let segments: Vec<&str> = name.split('.').collect();
    let mut first_index = segments.len();
    while first_index > 1 && segments[first_index - 1].bytes().all(|b| b.is_ascii_digit()) {
        first_index -= 1;
    }
    let mut result = segments[..first_index].join(".");
    for index in &segments[first_index..] {
        result.push('[');
        result.push_str(index);
        result.push(']');
    }
    result
}

/// `prefix[0][1]` -> `prefix.0.1`.
fn indexed_to_dotted(name: &str) -> String {
    name.replace('[', ".").replace(']', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_to_indexed() {
        assert_eq!(dotted_to_indexed("top.dut.a.0.1"), "top.dut.a[0][1]");
        assert_eq!(dotted_to_indexed("top.dut.a"), "top.dut.a");
        assert_eq!(dotted_to_indexed("a.3"), "a[3]");
    }

    #[test]
    fn test_indexed_to_dotted() {
        assert_eq!(indexed_to_dotted("top.dut.a[0][1]"), "top.dut.a.0.1");
        assert_eq!(indexed_to_dotted("plain"), "plain");
    }
}
