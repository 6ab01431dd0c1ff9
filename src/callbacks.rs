//! Callbacks from the managed side into the native runtime.

use std::ffi::c_void;

use abi_stable::std_types::{ROption, RStr};

use crate::env::{CompletionContext, Env, LogLevel};
use crate::handle::Handle;
use crate::msg::CmdResult;

/// Function table the native runtime provides for one environment.
///
/// Every function receives the `user_data` pointer the env was created with.
#[repr(C)]
pub struct NativeEnvVTable {
    /// Log a message. Level: 1=debug, 2=info, 3=warn, 4=error, 5=fatal.
    /// Falls back to `tracing` when absent.
    pub log: ROption<extern "C" fn(*mut c_void, u8, RStr<'_>)>,

    /// Instantiation completion: instance handle (0 = failed) and the
    /// caller's context.
    pub on_create_instance_done: extern "C" fn(*mut c_void, u64, usize),

    pub on_configure_done: extern "C" fn(*mut c_void),
    pub on_init_done: extern "C" fn(*mut c_void),
    pub on_start_done: extern "C" fn(*mut c_void),
    pub on_stop_done: extern "C" fn(*mut c_void),
    pub on_deinit_done: extern "C" fn(*mut c_void),

    /// Command result as JSON.
    pub return_result: extern "C" fn(*mut c_void, RStr<'_>),
}

/// [`Env`] backed by a native function table.
pub struct NativeEnv {
    vtable: &'static NativeEnvVTable,
    user_data: *mut c_void,
}

// SAFETY: `NativeEnv::new` requires the native callbacks to be callable from
// any thread with the given `user_data`.
unsafe impl Send for NativeEnv {}
unsafe impl Sync for NativeEnv {}

impl NativeEnv {
    /// Create an env over a native function table.
    ///
    /// # Safety
    /// The vtable must stay valid for the rest of the process, and its
    /// functions must accept `user_data` from any thread until the env
    /// handle is released and every in-flight call has returned.
    pub unsafe fn new(vtable: &'static NativeEnvVTable, user_data: *mut c_void) -> Self {
        Self { vtable, user_data }
    }
}

impl Env for NativeEnv {
    fn log(&self, level: LogLevel, message: &str) {
        match &self.vtable.log {
            ROption::RSome(log) => log(self.user_data, level.as_u8(), RStr::from(message)),
            ROption::RNone => level.trace(message),
        }
    }

    fn on_create_instance_done(&self, instance: Option<Handle>, context: CompletionContext) {
        (self.vtable.on_create_instance_done)(self.user_data, Handle::into_raw(instance), context);
    }

    fn on_configure_done(&self) {
        (self.vtable.on_configure_done)(self.user_data);
    }

    fn on_init_done(&self) {
        (self.vtable.on_init_done)(self.user_data);
    }

    fn on_start_done(&self) {
        (self.vtable.on_start_done)(self.user_data);
    }

    fn on_stop_done(&self) {
        (self.vtable.on_stop_done)(self.user_data);
    }

    fn on_deinit_done(&self) {
        (self.vtable.on_deinit_done)(self.user_data);
    }

    fn return_result(&self, result: CmdResult) {
        let json = result.to_json();
        (self.vtable.return_result)(self.user_data, RStr::from(json.as_str()));
    }
}
