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

//! Native VPI binding.
//!
//! Implements [`SimProvider`] over the simulator's C procedural interface.
//! The `vpi_*` symbols resolve at load time when this library is injected
//! into a simulator process, so this module is behind the `vpi` feature and
//! never part of a standalone build.

#![allow(non_camel_case_types)]

use std::collections::HashMap;
use std::ffi::{c_char, c_double, c_int, c_void, CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::provider::{
    CallbackData, CallbackHandle, ModuleInfo, SignalIterKind, SimHandle, SimProvider,
    ValueCallback,
};

type vpiHandle = *mut c_void;

const VPI_TYPE: c_int = 1;
const VPI_FULL_NAME: c_int = 3;
const VPI_DEF_NAME: c_int = 9;
const VPI_NAME: c_int = 2;
const VPI_MODULE: c_int = 32;
const VPI_NET: c_int = 36;
const VPI_REG: c_int = 48;
const VPI_SIM_TIME: c_int = 2;
const VPI_INT_VAL: c_int = 3;
const CB_VALUE_CHANGE: c_int = 1;
const VPI_STOP: c_int = 66;
const VPI_FINISH: c_int = 67;

#[repr(C)]
struct t_vpi_time {
    type_: c_int,
    high: u32,
    low: u32,
    real: c_double,
}

#[repr(C)]
union vpi_value_union {
    str_: *mut c_char,
    scalar: c_int,
    integer: c_int,
    real: c_double,
    misc: *mut c_void,
}

#[repr(C)]
struct t_vpi_value {
    format: c_int,
    value: vpi_value_union,
}

#[repr(C)]
struct t_cb_data {
    reason: c_int,
    cb_rtn: Option<extern "C" fn(*mut t_cb_data) -> c_int>,
    obj: vpiHandle,
    time: *mut t_vpi_time,
    value: *mut t_vpi_value,
    index: c_int,
    user_data: *mut c_char,
}

#[repr(C)]
struct t_vpi_vlog_info {
    argc: c_int,
    argv: *mut *mut c_char,
    product: *mut c_char,
    version: *mut c_char,
}

extern "C" {
    fn vpi_handle_by_name(name: *mut c_char, scope: vpiHandle) -> vpiHandle;
    fn vpi_get_value(expr: vpiHandle, value: *mut t_vpi_value);
    fn vpi_get(property: c_int, object: vpiHandle) -> c_int;
    fn vpi_get_str(property: c_int, object: vpiHandle) -> *mut c_char;
    fn vpi_iterate(type_: c_int, ref_handle: vpiHandle) -> vpiHandle;
    fn vpi_scan(iterator: vpiHandle) -> vpiHandle;
    fn vpi_get_time(object: vpiHandle, time: *mut t_vpi_time);
    fn vpi_get_vlog_info(info: *mut t_vpi_vlog_info) -> c_int;
    fn vpi_register_cb(cb_data: *mut t_cb_data) -> vpiHandle;
    fn vpi_remove_cb(cb_obj: vpiHandle) -> c_int;
    fn vpi_release_handle(object: vpiHandle) -> c_int;
    fn vpi_control(operation: c_int, ...) -> c_int;
}

struct CallbackState {
    signal: SimHandle,
    callback: ValueCallback,
    // the simulator reads these through the registered cb_data for the
    // lifetime of the callback, so they live in the leaked state
    time: t_vpi_time,
    value: t_vpi_value,
}

extern "C" fn value_change_trampoline(cb_data: *mut t_cb_data) -> c_int {
    // user_data is the Box<CallbackState> leaked at registration
    let state = unsafe { &mut *((*cb_data).user_data as *mut CallbackState) };
    let (value, time) = unsafe {
        let value = ((*cb_data).value as *const t_vpi_value)
            .as_ref()
            .map(|v| v.value.integer as i64);
        let time = ((*cb_data).time as *const t_vpi_time)
            .as_ref()
            .map(|t| (u64::from(t.high) << 32) | u64::from(t.low))
            .unwrap_or_default();
        (value, time)
    };
    let data = CallbackData { handle: state.signal, value, time };
    (state.callback)(&data);
    0
}

/// [`SimProvider`] over the live simulator.
#[derive(Default)]
pub struct VpiProvider {
    /// Registered callbacks: id -> (leaked state pointer, vpi cb handle),
    /// both reclaimed on removal.
    callbacks: Mutex<HashMap<u64, (usize, usize)>>,
    next_id: AtomicU64,
}

impl VpiProvider {
    /// Create a provider. There is exactly one simulator per process; the
    /// provider is stateless apart from callback bookkeeping.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_str(property: c_int, object: vpiHandle) -> String {
        let raw = unsafe { vpi_get_str(property, object) };
        if raw.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
        }
    }
}

// vpiHandle values are plain identifiers once wrapped; the simulator owns
// the pointed-to objects and outlives the provider.
unsafe impl Send for VpiProvider {}
unsafe impl Sync for VpiProvider {}

impl SimProvider for VpiProvider {
    fn product(&self) -> String {
        let mut info = t_vpi_vlog_info {
            argc: 0,
            argv: std::ptr::null_mut(),
            product: std::ptr::null_mut(),
            version: std::ptr::null_mut(),
        };
        if unsafe { vpi_get_vlog_info(&mut info) } != 0 && !info.product.is_null() {
            unsafe { CStr::from_ptr(info.product) }.to_string_lossy().into_owned()
        } else {
            String::new()
        }
    }

    fn argv(&self) -> Vec<String> {
        let mut info = t_vpi_vlog_info {
            argc: 0,
            argv: std::ptr::null_mut(),
            product: std::ptr::null_mut(),
            version: std::ptr::null_mut(),
        };
        let mut result = Vec::new();
        if unsafe { vpi_get_vlog_info(&mut info) } != 0 {
            for i in 0..info.argc {
                let arg = unsafe { *info.argv.offset(i as isize) };
                if !arg.is_null() {
                    result.push(unsafe { CStr::from_ptr(arg) }.to_string_lossy().into_owned());
                }
            }
        }
        result
    }

    fn simulation_time(&self) -> u64 {
        let mut time = t_vpi_time { type_: VPI_SIM_TIME, high: 0, low: 0, real: 0.0 };
        unsafe { vpi_get_time(std::ptr::null_mut(), &mut time) };
        (u64::from(time.high) << 32) | u64::from(time.low)
    }

    fn handle_by_name(&self, full_name: &str) -> Option<SimHandle> {
        let name = CString::new(full_name).ok()?;
        let handle = unsafe { vpi_handle_by_name(name.as_ptr() as *mut c_char, std::ptr::null_mut()) };
        if handle.is_null() {
            None
        } else {
            Some(SimHandle(handle as u64))
        }
    }

    fn get_value(&self, handle: SimHandle) -> Option<i64> {
        let mut value =
            t_vpi_value { format: VPI_INT_VAL, value: vpi_value_union { integer: 0 } };
        unsafe { vpi_get_value(handle.0 as vpiHandle, &mut value) };
        Some(unsafe { value.value.integer } as i64)
    }

    fn child_modules(&self, parent: Option<SimHandle>) -> Vec<ModuleInfo> {
        let parent = parent.map_or(std::ptr::null_mut(), |h| h.0 as vpiHandle);
        let iterator = unsafe { vpi_iterate(VPI_MODULE, parent) };
        let mut result = Vec::new();
        if iterator.is_null() {
            return result;
        }
        loop {
            let child = unsafe { vpi_scan(iterator) };
            if child.is_null() {
                break;
            }
            result.push(ModuleInfo {
                handle: SimHandle(child as u64),
                def_name: Self::get_str(VPI_DEF_NAME, child),
                full_name: Self::get_str(VPI_FULL_NAME, child),
            });
        }
        result
    }

    fn module_signals(&self, module: SimHandle, kind: SignalIterKind) -> Vec<(String, SimHandle)> {
        let module = module.0 as vpiHandle;
        if unsafe { vpi_get(VPI_TYPE, module) } != VPI_MODULE {
            return Vec::new();
        }
        let target = match kind {
            SignalIterKind::Net => VPI_NET,
            SignalIterKind::Reg => VPI_REG,
        };
        let iterator = unsafe { vpi_iterate(target, module) };
        let mut result = Vec::new();
        if iterator.is_null() {
            return result;
        }
        loop {
            let net = unsafe { vpi_scan(iterator) };
            if net.is_null() {
                break;
            }
            result.push((Self::get_str(VPI_NAME, net), SimHandle(net as u64)));
        }
        result
    }

    fn register_value_callback(
        &self,
        handle: SimHandle,
        callback: ValueCallback,
    ) -> Option<CallbackHandle> {
        let state = Box::into_raw(Box::new(CallbackState {
            signal: handle,
            callback,
            time: t_vpi_time { type_: VPI_SIM_TIME, high: 0, low: 0, real: 0.0 },
            value: t_vpi_value { format: VPI_INT_VAL, value: vpi_value_union { integer: 0 } },
        }));
        let mut cb_data = t_cb_data {
            reason: CB_VALUE_CHANGE,
            cb_rtn: Some(value_change_trampoline),
            obj: handle.0 as vpiHandle,
            time: unsafe { &mut (*state).time },
            value: unsafe { &mut (*state).value },
            index: 0,
            user_data: state as *mut c_char,
        };
        let cb_handle = unsafe { vpi_register_cb(&mut cb_data) };
        if cb_handle.is_null() {
            // reclaim the state we just leaked
            drop(unsafe { Box::from_raw(state) });
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.callbacks.lock().insert(id, (state as usize, cb_handle as usize));
        Some(CallbackHandle(id))
    }

    fn remove_callback(&self, callback: CallbackHandle) {
        let entry = self.callbacks.lock().remove(&callback.0);
        if let Some((state, handle)) = entry {
            unsafe {
                vpi_remove_cb(handle as vpiHandle);
                vpi_release_handle(handle as vpiHandle);
                drop(Box::from_raw(state as *mut CallbackState));
            }
        }
    }

    fn stop(&self) {
        unsafe { vpi_control(VPI_STOP, 1 as c_int) };
    }

    fn finish(&self) {
        unsafe { vpi_control(VPI_FINISH, 1 as c_int) };
    }
}
