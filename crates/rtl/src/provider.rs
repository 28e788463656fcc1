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

//! The simulator capability trait.
//!
//! Every operation is total: missing handles and unreadable values surface
//! as `None`, never as panics or errors. Nothing here retries.

/// Opaque simulator object handle.
///
/// In the native binding this wraps the `vpiHandle` pointer value; replay
/// providers hand out their own identifiers. Zero is never a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimHandle(pub u64);

/// Handle to a registered callback, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

/// Which iterator a module-signal walk uses.
///
/// Verilator exposes design signals as registers rather than nets; the
/// client picks the kind once at init from the product string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalIterKind {
    /// `vpiNet` iteration, the common case.
    Net,
    /// `vpiReg` iteration, the Verilator case.
    Reg,
}

/// One module discovered while walking the design tree.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Handle for further iteration.
    pub handle: SimHandle,
    /// Definition (declaration) name of the module.
    pub def_name: String,
    /// Full hierarchical instance name.
    pub full_name: String,
}

/// Payload delivered to a value-change callback.
#[derive(Debug, Clone)]
pub struct CallbackData {
    /// The signal the callback was registered on.
    pub handle: SimHandle,
    /// New value, absent when unreadable (`x`/`z`).
    pub value: Option<i64>,
    /// Simulation time of the change.
    pub time: u64,
}

/// A registered value-change callback.
pub type ValueCallback = Box<dyn FnMut(&CallbackData) + Send>;

/// Rewind request issued from inside a value-change callback (replay only).
#[derive(Debug, Clone)]
pub struct RewindRequest {
    /// Target simulation time to rewind to.
    pub time: u64,
    /// Clock signals whose rising edges delimit valid resume points.
    pub clock_signals: Vec<SimHandle>,
}

/// Capability set of the simulator's procedural interface.
///
/// Implementations use interior mutability; all methods take `&self` so one
/// provider can be shared between the session and the replay engine.
pub trait SimProvider: Send + Sync {
    /// Simulator product string, e.g. `"Verilator"`.
    fn product(&self) -> String;

    /// The simulator process argv, for plus-arg discovery.
    fn argv(&self) -> Vec<String>;

    /// Current simulation time.
    fn simulation_time(&self) -> u64;

    /// Resolve an object handle by full hierarchical name.
    fn handle_by_name(&self, full_name: &str) -> Option<SimHandle>;

    /// Read a scalar value as a 64-bit integer. `None` when the value is
    /// unavailable or carries `x`/`z` bits.
    fn get_value(&self, handle: SimHandle) -> Option<i64>;

    /// Child modules of `parent`, or the top modules when `parent` is
    /// `None`.
    fn child_modules(&self, parent: Option<SimHandle>) -> Vec<ModuleInfo>;

    /// `(local_name, handle)` pairs of the signals in a module.
    fn module_signals(&self, module: SimHandle, kind: SignalIterKind) -> Vec<(String, SimHandle)>;

    /// Register a value-change callback. `None` when registration fails;
    /// failures are not retried.
    fn register_value_callback(
        &self,
        handle: SimHandle,
        callback: ValueCallback,
    ) -> Option<CallbackHandle>;

    /// Remove a previously registered callback, releasing its handle.
    fn remove_callback(&self, callback: CallbackHandle);

    /// Pause the simulation.
    fn stop(&self);

    /// End the simulation.
    fn finish(&self);

    /// Rewind to an earlier time (replay providers only).
    fn rewind(&self, request: &RewindRequest) -> bool {
        let _ = request;
        false
    }
}
