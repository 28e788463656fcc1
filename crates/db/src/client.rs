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

//! Query layer over the symbol table.
//!
//! All queries take `&self` and are safe from any thread; the table and the
//! source remap sit behind one mutex held only for the duration of a single
//! call. The execution ordering and the base-name flag are computed once at
//! open and are immutable afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use eyre::Result;
use hdb_common::{BreakPoint, ContextVariable, GeneratorVariable, Variable};
use parking_lot::Mutex;
use tracing::debug;

use crate::store::SymbolStore;

/// Read-only client over a loaded [`SymbolStore`].
#[derive(Debug)]
pub struct SymbolDatabaseClient {
    inner: Mutex<Inner>,
    use_base_name: bool,
    execution_bp_orders: Vec<u32>,
}

#[derive(Debug)]
struct Inner {
    store: SymbolStore,
    /// DB-side path prefix -> client-side path prefix.
    src_remap: BTreeMap<String, String>,
    bp_index: HashMap<u32, usize>,
    instance_index: HashMap<u64, usize>,
    instance_name_index: HashMap<String, u64>,
    variable_index: HashMap<u32, usize>,
    /// All RTL signal names known to the table, for scoped-name search.
    signal_names: HashSet<String>,
}

impl SymbolDatabaseClient {
    /// Open a symbol table from disk. Failure here is fatal to the session.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = SymbolStore::load(path)?;
        Ok(Self::from_store(store))
    }

    /// Take over an already-loaded table. Normally used for testing.
    pub fn from_store(store: SymbolStore) -> Self {
        let use_base_name = compute_use_base_name(&store);
        let execution_bp_orders = compute_execution_order(&store);
        debug!(
            breakpoints = store.breakpoints.len(),
            instances = store.instances.len(),
            use_base_name,
            "symbol table opened"
        );

        let bp_index =
            store.breakpoints.iter().enumerate().map(|(i, bp)| (bp.id, i)).collect();
        let instance_index =
            store.instances.iter().enumerate().map(|(i, inst)| (inst.id, i)).collect();
        let instance_name_index =
            store.instances.iter().map(|inst| (inst.name.clone(), inst.id)).collect();
        let variable_index =
            store.variables.iter().enumerate().map(|(i, v)| (v.id, i)).collect();
        let signal_names = store
            .variables
            .iter()
            .filter(|v| v.is_rtl)
            .map(|v| v.value.clone())
            .collect();

        Self {
            inner: Mutex::new(Inner {
                store,
                src_remap: BTreeMap::new(),
                bp_index,
                instance_index,
                instance_name_index,
                variable_index,
                signal_names,
            }),
            use_base_name,
            execution_bp_orders,
        }
    }

    /// The global breakpoint execution ordering (see module docs on how it
    /// is derived). Stable for the lifetime of this client.
    pub fn execution_bp_orders(&self) -> &[u32] {
        &self.execution_bp_orders
    }

    /// Whether all stored filenames are bare base names.
    pub fn use_base_name(&self) -> bool {
        self.use_base_name
    }

    /// Breakpoints at a `(filename, line)` location. A `col_num` of zero
    /// matches any column; a non-zero column must match exactly.
    pub fn get_breakpoints(&self, filename: &str, line_num: u32, col_num: u32) -> Vec<BreakPoint> {
        let inner = self.inner.lock();
        let target = self.resolve_to_db(&inner, filename);
        inner
            .store
            .breakpoints
            .iter()
            .filter(|bp| {
                self.file_eq(&bp.filename, &target)
                    && bp.line_num == line_num
                    && (col_num == 0 || bp.column_num == col_num)
            })
            .cloned()
            .collect()
    }

    /// All breakpoints in a file.
    pub fn get_file_breakpoints(&self, filename: &str) -> Vec<BreakPoint> {
        let inner = self.inner.lock();
        let target = self.resolve_to_db(&inner, filename);
        inner
            .store
            .breakpoints
            .iter()
            .filter(|bp| self.file_eq(&bp.filename, &target))
            .cloned()
            .collect()
    }

    /// Look up one breakpoint by id.
    pub fn get_breakpoint(&self, breakpoint_id: u32) -> Option<BreakPoint> {
        let inner = self.inner.lock();
        inner.bp_index.get(&breakpoint_id).map(|&i| inner.store.breakpoints[i].clone())
    }

    /// The hierarchical name of the instance owning a breakpoint.
    pub fn get_instance_name_from_bp(&self, breakpoint_id: u32) -> Option<String> {
        let inner = self.inner.lock();
        let instance_id = inner.breakpoint(breakpoint_id)?.instance_id?;
        inner.instance_name(instance_id)
    }

    /// The hierarchical name of an instance.
    pub fn get_instance_name(&self, instance_id: u64) -> Option<String> {
        self.inner.lock().instance_name(instance_id)
    }

    /// Instance id by hierarchical name.
    pub fn get_instance_id(&self, instance_name: &str) -> Option<u64> {
        self.inner.lock().instance_name_index.get(instance_name).copied()
    }

    /// The owning instance id of a breakpoint.
    pub fn get_instance_id_from_bp(&self, breakpoint_id: u32) -> Option<u64> {
        self.inner.lock().breakpoint(breakpoint_id)?.instance_id
    }

    /// Context variables visible at a breakpoint, paired with their bindings.
    ///
    /// With `resolve_hierarchy`, RTL binding targets are rewritten to
    /// absolute scoped names by searching the owning instance's scope chain,
    /// and relative scoped names of literal bindings are qualified with the
    /// owning scope.
    pub fn get_context_variables(
        &self,
        breakpoint_id: u32,
        resolve_hierarchy: bool,
    ) -> Vec<(ContextVariable, Variable)> {
        let inner = self.inner.lock();
        let instance_name = inner
            .breakpoint(breakpoint_id)
            .and_then(|bp| bp.instance_id)
            .and_then(|id| inner.instance_name(id));
        let mut result = Vec::new();
        for cv in &inner.store.context_variables {
            if cv.breakpoint_id != breakpoint_id {
                continue;
            }
            let Some(&vi) = inner.variable_index.get(&cv.variable_id) else { continue };
            let mut cv = cv.clone();
            let mut var = inner.store.variables[vi].clone();
            if resolve_hierarchy {
                if let Some(instance_name) = instance_name.as_deref() {
                    resolve_variable(&inner, instance_name, &mut cv.name, &mut var);
                }
            }
            result.push((cv, var));
        }
        result
    }

    /// Generator variables (instance parameters), paired with their bindings.
    pub fn get_generator_variables(
        &self,
        instance_id: u64,
        resolve_hierarchy: bool,
    ) -> Vec<(GeneratorVariable, Variable)> {
        let inner = self.inner.lock();
        let instance_name = inner.instance_name(instance_id);
        let mut result = Vec::new();
        for gv in &inner.store.generator_variables {
            if gv.instance_id != instance_id {
                continue;
            }
            let Some(&vi) = inner.variable_index.get(&gv.variable_id) else { continue };
            let mut gv = gv.clone();
            let mut var = inner.store.variables[vi].clone();
            if resolve_hierarchy {
                if let Some(instance_name) = instance_name.as_deref() {
                    resolve_variable(&inner, instance_name, &mut gv.name, &mut var);
                }
            }
            result.push((gv, var));
        }
        result
    }

    /// Name -> value map of the non-RTL context variables at a breakpoint
    /// whose literal strings parse as integers. Unparseable literals are
    /// skipped.
    pub fn get_context_static_values(&self, breakpoint_id: u32) -> HashMap<String, i64> {
        self.get_context_variables(breakpoint_id, false)
            .into_iter()
            .filter_map(|(cv, var)| var.static_value().map(|v| (cv.name, v)))
            .collect()
    }

    /// All instance names, in table order.
    pub fn get_instance_names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.store.instances.iter().map(|inst| inst.name.clone()).collect()
    }

    /// All RTL signal names known to the table, sorted and deduplicated.
    pub fn get_all_signal_names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<_> = inner.signal_names.iter().cloned().collect();
        names.sort();
        names
    }

    /// Values of every annotation row with the given key.
    pub fn get_annotation_values(&self, name: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .store
            .annotations
            .iter()
            .filter(|a| a.name == name)
            .map(|a| a.value.clone())
            .collect()
    }

    /// Install the source-path remap (DB prefix -> client prefix).
    pub fn set_src_mapping(&self, mapping: BTreeMap<String, String>) {
        self.inner.lock().src_remap = mapping;
    }

    /// Map a client-side path into the DB-side path space.
    pub fn resolve_filename_to_db(&self, filename: &str) -> String {
        let inner = self.inner.lock();
        self.resolve_to_db(&inner, filename)
    }

    /// Map a DB-side path into the client-side path space.
    pub fn resolve_filename_to_client(&self, filename: &str) -> String {
        let inner = self.inner.lock();
        // longest DB-side prefix wins
        let best = inner
            .src_remap
            .iter()
            .filter(|(db, _)| filename.starts_with(db.as_str()))
            .max_by_key(|(db, _)| db.len());
        match best {
            Some((db, client)) => resolve(db, client, filename),
            None => filename.to_string(),
        }
    }

    /// Resolve a possibly-shortened scoped symbol relative to a breakpoint's
    /// owning scope, searching progressively outer scopes.
    pub fn resolve_scoped_name_breakpoint(
        &self,
        scoped_name: &str,
        breakpoint_id: u32,
    ) -> Option<String> {
        let inner = self.inner.lock();
        let instance_id = inner.breakpoint(breakpoint_id)?.instance_id?;
        let instance_name = inner.instance_name(instance_id)?;
        resolve_scoped_name(&inner, scoped_name, &instance_name)
    }

    /// Resolve a possibly-shortened scoped symbol relative to an instance.
    pub fn resolve_scoped_name_instance(
        &self,
        scoped_name: &str,
        instance_id: u64,
    ) -> Option<String> {
        let inner = self.inner.lock();
        let instance_name = inner.instance_name(instance_id)?;
        resolve_scoped_name(&inner, scoped_name, &instance_name)
    }

    fn resolve_to_db(&self, inner: &Inner, filename: &str) -> String {
        // longest client-side prefix wins; the remap stores db -> client
        let best = inner
            .src_remap
            .iter()
            .filter(|(_, client)| filename.starts_with(client.as_str()))
            .max_by_key(|(_, client)| client.len());
        let resolved = match best {
            Some((db, client)) => resolve(client, db, filename),
            None => filename.to_string(),
        };
        if self.use_base_name {
            base_name(&resolved).to_string()
        } else {
            resolved
        }
    }

    fn file_eq(&self, stored: &str, target_db: &str) -> bool {
        if self.use_base_name {
            base_name(stored) == target_db
        } else {
            stored == target_db
        }
    }
}

impl Inner {
    fn breakpoint(&self, id: u32) -> Option<&BreakPoint> {
        self.bp_index.get(&id).map(|&i| &self.store.breakpoints[i])
    }

    fn instance_name(&self, id: u64) -> Option<String> {
        self.instance_index.get(&id).map(|&i| self.store.instances[i].name.clone())
    }
}

/// Replace the `src` prefix of `target` with `dst`.
fn resolve(src: &str, dst: &str, target: &str) -> String {
    match target.strip_prefix(src) {
        Some(rest) => format!("{dst}{rest}"),
        None => target.to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn compute_use_base_name(store: &SymbolStore) -> bool {
    store.breakpoints.iter().all(|bp| !bp.filename.contains(['/', '\\']))
}

/// Flatten the scope table in pre-order when present; otherwise fall back to
/// grouping breakpoints by `(filename, instance)` in first-appearance order,
/// sorted by `(line, column, id)` within each group.
fn compute_execution_order(store: &SymbolStore) -> Vec<u32> {
    if let Some(scopes) = &store.scopes {
        if !scopes.is_empty() {
            return scopes.iter().flat_map(|s| s.breakpoints.iter().copied()).collect();
        }
    }

    let mut group_keys: Vec<(&str, Option<u64>)> = Vec::new();
    let mut groups: HashMap<(&str, Option<u64>), Vec<&BreakPoint>> = HashMap::new();
    for bp in &store.breakpoints {
        let key = (bp.filename.as_str(), bp.instance_id);
        let group = groups.entry(key).or_default();
        if group.is_empty() {
            group_keys.push(key);
        }
        group.push(bp);
    }

    let mut orders = Vec::with_capacity(store.breakpoints.len());
    for key in group_keys {
        let mut bps = groups.remove(&key).unwrap_or_default();
        bps.sort_by_key(|bp| (bp.line_num, bp.column_num, bp.id));
        orders.extend(bps.iter().map(|bp| bp.id));
    }
    orders
}

/// Search progressively outer scopes for a scoped symbol: try the full
/// instance path as a prefix, then drop one trailing segment at a time, and
/// finally the bare name.
fn resolve_scoped_name(inner: &Inner, scoped_name: &str, instance_name: &str) -> Option<String> {
    let segments: Vec<&str> = instance_name.split('.').collect();
    for depth in (0..=segments.len()).rev() {
        let candidate = if depth == 0 {
            scoped_name.to_string()
        } else {
            format!("{}.{}", segments[..depth].join("."), scoped_name)
        };
        if inner.signal_names.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Hierarchy resolution applied to one (name, variable) pair: RTL binding
/// targets are absolutized through the scope-chain search; literal bindings
/// with a relative scoped name get qualified with the owning scope.
fn resolve_variable(inner: &Inner, instance_name: &str, name: &mut String, var: &mut Variable) {
    if var.is_rtl {
        if let Some(resolved) = resolve_scoped_name(inner, &var.value, instance_name) {
            var.value = resolved;
        }
    } else if name.contains('.') && !name.starts_with(instance_name) {
        *name = format!("{instance_name}.{name}");
    }
}
