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

//! Client over a [`SimProvider`].
//!
//! The symbol table names design objects relative to their defining module
//! (`mod.sub.signal`); the simulator wants full instance paths
//! (`tb.dut.sub.signal`). The client computes the definition-name to
//! instance-path prefix map once by walking the design tree, then rewrites
//! names on every lookup. Handles are memoized for the whole session; the
//! simulator never invalidates them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::provider::{
    CallbackHandle, RewindRequest, SignalIterKind, SimHandle, SimProvider, ValueCallback,
};

/// Cached, name-translating view of the simulator.
pub struct RtlClient {
    provider: Arc<dyn SimProvider>,
    is_verilator: bool,
    /// Definition top segment -> full instance prefix with trailing `.`.
    hierarchy_prefix: Mutex<HashMap<String, String>>,
    /// Full name -> handle, monotonic within a session.
    handles: Mutex<HashMap<String, SimHandle>>,
    /// Module name -> (local signal name -> handle).
    module_signals: Mutex<HashMap<String, HashMap<String, SimHandle>>>,
    /// Named callback registrations, for removal by name.
    callbacks: Mutex<HashMap<String, CallbackHandle>>,
}

impl RtlClient {
    /// Wrap a provider. The Verilator signal-iterator quirk is recorded here
    /// and never re-queried.
    pub fn new(provider: Arc<dyn SimProvider>) -> Self {
        let is_verilator = provider.product() == "Verilator";
        Self {
            provider,
            is_verilator,
            hierarchy_prefix: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            module_signals: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// The provider this client wraps.
    pub fn provider(&self) -> &Arc<dyn SimProvider> {
        &self.provider
    }

    /// Whether the simulator identified itself as Verilator.
    pub fn is_verilator(&self) -> bool {
        self.is_verilator
    }

    /// Compute the hierarchy prefix map from the symbol table's instance
    /// names. Each name's top segment is a definition name to locate in the
    /// design tree.
    pub fn initialize_instance_mapping(&self, instance_names: &[String]) {
        let tops: HashSet<String> =
            instance_names.iter().map(|name| split_path(name).0.to_string()).collect();
        self.compute_hierarchy_name_prefix(tops);
    }

    /// Translate a scoped name into a full hierarchical name.
    ///
    /// Unknown top segments return the input unchanged: the caller may
    /// already hold a full name, and name translation must never fail.
    pub fn get_full_name(&self, name: &str) -> String {
        let (top, path) = split_path(name);
        let prefixes = self.hierarchy_prefix.lock();
        match prefixes.get(top) {
            None => name.to_string(),
            Some(prefix) => {
                if path.is_empty() {
                    prefix[..prefix.len() - 1].to_string()
                } else {
                    format!("{prefix}{path}")
                }
            }
        }
    }

    /// Resolve a handle by scoped name, memoizing non-null results.
    pub fn get_handle(&self, name: &str) -> Option<SimHandle> {
        let full_name = self.get_full_name(name);
        let mut handles = self.handles.lock();
        if let Some(&handle) = handles.get(&full_name) {
            return Some(handle);
        }
        let handle = self.provider.handle_by_name(&full_name)?;
        handles.insert(full_name, handle);
        Some(handle)
    }

    /// Read a scalar value through a handle.
    pub fn get_value_by_handle(&self, handle: SimHandle) -> Option<i64> {
        self.provider.get_value(handle)
    }

    /// Read a scalar value by scoped name.
    pub fn get_value(&self, name: &str) -> Option<i64> {
        let handle = self.get_handle(name)?;
        self.provider.get_value(handle)
    }

    /// Local-name -> handle map of all signals in a module, memoized per
    /// module name. Verilator designs iterate regs instead of nets.
    pub fn get_module_signals(&self, name: &str) -> HashMap<String, SimHandle> {
        if let Some(cached) = self.module_signals.lock().get(name) {
            return cached.clone();
        }
        let Some(module) = self.get_handle(name) else { return HashMap::new() };
        let kind = if self.is_verilator { SignalIterKind::Reg } else { SignalIterKind::Net };
        let signals: HashMap<String, SimHandle> =
            self.provider.module_signals(module, kind).into_iter().collect();
        self.module_signals.lock().insert(name.to_string(), signals.clone());
        signals
    }

    /// Current simulation time.
    pub fn get_simulation_time(&self) -> u64 {
        self.provider.simulation_time()
    }

    /// The simulator argv.
    pub fn get_argv(&self) -> Vec<String> {
        self.provider.argv()
    }

    /// Register a value-change callback under a caller-chosen name.
    pub fn add_callback(
        &self,
        name: &str,
        signal: SimHandle,
        callback: ValueCallback,
    ) -> Option<CallbackHandle> {
        let handle = self.provider.register_value_callback(signal, callback);
        match handle {
            Some(handle) => {
                self.callbacks.lock().insert(name.to_string(), handle);
                Some(handle)
            }
            None => {
                warn!(callback = name, "callback registration failed");
                None
            }
        }
    }

    /// Remove a callback previously registered under `name`.
    pub fn remove_callback(&self, name: &str) {
        if let Some(handle) = self.callbacks.lock().remove(name) {
            self.provider.remove_callback(handle);
        }
    }

    /// Remove every remaining callback. Called at session teardown.
    pub fn remove_all_callbacks(&self) {
        let mut callbacks = self.callbacks.lock();
        for (_, handle) in callbacks.drain() {
            self.provider.remove_callback(handle);
        }
    }

    /// Forward a rewind request to the provider.
    pub fn rewind(&self, request: &RewindRequest) -> bool {
        self.provider.rewind(request)
    }

    /// Pause the simulation.
    pub fn stop_sim(&self) {
        self.provider.stop();
    }

    /// End the simulation.
    pub fn finish_sim(&self) {
        self.provider.finish();
    }

    /// Breadth-first walk of the design tree, recording the full instance
    /// path of the first module whose definition name matches each pending
    /// target. Stops as soon as every target is found.
    fn compute_hierarchy_name_prefix(&self, mut pending: HashSet<String>) {
        let mut queue: VecDeque<Option<SimHandle>> = VecDeque::new();
        queue.push_back(None);
        let mut prefixes = self.hierarchy_prefix.lock();
        while let Some(parent) = queue.pop_front() {
            if pending.is_empty() {
                break;
            }
            for module in self.provider.child_modules(parent) {
                if pending.remove(&module.def_name) {
                    let prefix = format!("{}.", module.full_name);
                    debug!(def = %module.def_name, prefix = %prefix, "hierarchy prefix resolved");
                    prefixes.insert(module.def_name, prefix);
                }
                queue.push_back(Some(module.handle));
            }
        }
        if !pending.is_empty() {
            warn!(unresolved = ?pending, "definition names not found in design tree");
        }
    }
}

/// Split a scoped name at the first separator into `(top, tail)`.
fn split_path(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((top, tail)) => (top, tail),
        None => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ModuleInfo, ValueCallback};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A two-level design: tb -> dut (def "mod") -> sub (def "child").
    struct FakeProvider {
        values: Mutex<HashMap<&'static str, i64>>,
        lookups: AtomicU64,
        product: &'static str,
    }

    impl FakeProvider {
        fn new(product: &'static str) -> Self {
            let values =
                HashMap::from([("tb.dut.a", 7i64), ("tb.dut.sub.b", 3), ("tb.clk", 1)]);
            Self { values: Mutex::new(values), lookups: AtomicU64::new(0), product }
        }

        fn handle_of(name: &str) -> SimHandle {
            // stable fake handles derived from the name
            SimHandle(name.bytes().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64)))
        }

        fn name_of(&self, handle: SimHandle) -> Option<&'static str> {
            self.values.lock().keys().copied().find(|n| Self::handle_of(n) == handle)
        }
    }

    impl SimProvider for FakeProvider {
        fn product(&self) -> String {
            self.product.to_string()
        }

        fn argv(&self) -> Vec<String> {
            vec!["simv".to_string(), "+DEBUG_PORT=9999".to_string()]
        }

        fn simulation_time(&self) -> u64 {
            0
        }

        fn handle_by_name(&self, full_name: &str) -> Option<SimHandle> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.values.lock().contains_key(full_name).then(|| Self::handle_of(full_name))
        }

        fn get_value(&self, handle: SimHandle) -> Option<i64> {
            let name = self.name_of(handle)?;
            self.values.lock().get(name).copied()
        }

        fn child_modules(&self, parent: Option<SimHandle>) -> Vec<ModuleInfo> {
            let module = |def: &str, full: &str| ModuleInfo {
                handle: Self::handle_of(full),
                def_name: def.to_string(),
                full_name: full.to_string(),
            };
            match parent {
                None => vec![module("tb", "tb")],
                Some(h) if h == Self::handle_of("tb") => vec![module("mod", "tb.dut")],
                Some(h) if h == Self::handle_of("tb.dut") => {
                    vec![module("child", "tb.dut.sub")]
                }
                Some(_) => vec![],
            }
        }

        fn module_signals(
            &self,
            module: SimHandle,
            kind: SignalIterKind,
        ) -> Vec<(String, SimHandle)> {
            if self.product == "Verilator" && kind != SignalIterKind::Reg {
                return vec![];
            }
            if module == Self::handle_of("tb.dut") {
                vec![("a".to_string(), Self::handle_of("tb.dut.a"))]
            } else {
                vec![]
            }
        }

        fn register_value_callback(
            &self,
            _handle: SimHandle,
            _callback: ValueCallback,
        ) -> Option<CallbackHandle> {
            Some(CallbackHandle(1))
        }

        fn remove_callback(&self, _callback: CallbackHandle) {}

        fn stop(&self) {}

        fn finish(&self) {}
    }

    fn client(product: &'static str) -> RtlClient {
        let client = RtlClient::new(Arc::new(FakeProvider::new(product)));
        client.initialize_instance_mapping(&["mod".to_string(), "mod.sub".to_string()]);
        client
    }

    #[test]
    fn test_get_full_name() {
        let client = client("Icarus");
        assert_eq!(client.get_full_name("mod.a"), "tb.dut.a");
        assert_eq!(client.get_full_name("mod.sub.b"), "tb.dut.sub.b");
        // bare definition name: prefix with the trailing separator trimmed
        assert_eq!(client.get_full_name("mod"), "tb.dut");
        // unknown tops pass through untouched
        assert_eq!(client.get_full_name("other.a"), "other.a");
    }

    #[test]
    fn test_get_full_name_idempotent() {
        let client = client("Icarus");
        let full = client.get_full_name("mod.a");
        assert_eq!(client.get_full_name(&full), full);
    }

    #[test]
    fn test_handle_cache() {
        let fake = Arc::new(FakeProvider::new("Icarus"));
        let client = RtlClient::new(fake.clone());
        client.initialize_instance_mapping(&["mod".to_string()]);

        let h1 = client.get_handle("mod.a").unwrap();
        let h2 = client.get_handle("mod.a").unwrap();
        assert_eq!(h1, h2);

        // second lookup must come from the cache
        assert_eq!(fake.lookups.load(Ordering::SeqCst), 1);

        // misses are not cached
        assert!(client.get_handle("mod.nothing").is_none());
        assert!(client.get_handle("mod.nothing").is_none());
    }

    #[test]
    fn test_get_value() {
        let client = client("Icarus");
        assert_eq!(client.get_value("mod.a"), Some(7));
        assert_eq!(client.get_value("mod.sub.b"), Some(3));
        assert_eq!(client.get_value("mod.missing"), None);
    }

    #[test]
    fn test_module_signals_verilator_quirk() {
        // net iteration yields nothing under Verilator in the fake; the
        // client must have switched to reg iteration
        let client1 = client("Verilator");
        assert!(client1.is_verilator());
        let signals = client1.get_module_signals("mod");
        assert_eq!(signals.len(), 1);
        assert!(signals.contains_key("a"));

        let client2 = client("Icarus");
        assert!(!client2.is_verilator());
        let signals = client2.get_module_signals("mod");
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn test_callback_by_name() {
        let client = client("Icarus");
        let signal = client.get_handle("mod.a").unwrap();
        let registered = client.add_callback("clk_mon", signal, Box::new(|_| {}));
        assert!(registered.is_some());
        client.remove_callback("clk_mon");
        // removing twice is a no-op
        client.remove_callback("clk_mon");
    }
}
