//! C ABI entry points over the process-wide bridge.
//!
//! Handles cross the boundary as `u64`, with `0` meaning none. No entry point
//! returns an error: desynchronization and panics go to the bridge's fatal
//! handler, which aborts the process unless an embedder installed another
//! bridge with [`install`].

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use abi_stable::std_types::RStr;
use once_cell::sync::OnceCell;

use crate::addon::Addon;
use crate::bridge::Bridge;
use crate::callbacks::{NativeEnv, NativeEnvVTable};
use crate::config::BridgeConfig;
use crate::env::LogLevel;
use crate::error::{BridgeError, ObjectKind, Result};
use crate::fatal;
use crate::handle::Handle;
use crate::msg::{Cmd, CmdResult};

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Install the process-wide bridge. Fails if one is already in use.
pub fn install(bridge: Bridge) -> std::result::Result<(), Bridge> {
    BRIDGE.set(bridge)
}

/// The process-wide bridge, created with the default configuration on first
/// use.
pub fn global() -> &'static Bridge {
    BRIDGE.get_or_init(|| {
        Bridge::new(BridgeConfig::default()).unwrap_or_else(|err| fatal::abort(&err))
    })
}

/// Register an addon on the process-wide bridge.
pub fn register_addon_as_extension(name: &str, addon: impl Addon + 'static) -> Result<Handle> {
    global().register_addon(name, addon)
}

fn handle(raw: u64, kind: ObjectKind, operation: &'static str) -> Result<Handle> {
    Handle::from_raw(raw).ok_or(BridgeError::NullHandle { kind, operation })
}

/// Run a boundary call, turning errors and panics into fatal reports.
fn guarded(operation: &'static str, call: impl FnOnce(&Bridge) -> Result<()>) {
    let bridge = global();
    match catch_unwind(AssertUnwindSafe(|| call(bridge))) {
        Ok(result) => bridge.settle(result),
        Err(_) => bridge.fatal(&BridgeError::Panicked(operation)),
    }
}

#[no_mangle]
pub extern "C" fn addon_bridge_create_instance(
    addon: u64,
    env: u64,
    name: RStr<'_>,
    context: usize,
) {
    const OP: &str = "create_instance";
    guarded(OP, |bridge| {
        let addon = handle(addon, ObjectKind::Addon, OP)?;
        let env = handle(env, ObjectKind::Env, OP)?;
        bridge.create_instance(addon, env, name.as_str(), context)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_destroy_instance(instance: u64) {
    const OP: &str = "destroy_instance";
    guarded(OP, |bridge| {
        bridge.destroy_instance(handle(instance, ObjectKind::Instance, OP)?)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_destroy_addon(addon: u64) {
    const OP: &str = "destroy_addon";
    guarded(OP, |bridge| {
        bridge.destroy_addon(handle(addon, ObjectKind::Addon, OP)?)
    });
}

/// Handle of the addon registered as `name`, or 0.
#[no_mangle]
pub extern "C" fn addon_bridge_lookup_addon(name: RStr<'_>) -> u64 {
    Handle::into_raw(global().addon_handle(name.as_str()))
}

/// Register a native environment and return its handle.
///
/// # Safety
/// `vtable` must point to a table valid for the rest of the process, and the
/// requirements of [`NativeEnv::new`] apply to `user_data`.
#[no_mangle]
pub unsafe extern "C" fn addon_bridge_env_create(
    vtable: *const NativeEnvVTable,
    user_data: *mut c_void,
) -> u64 {
    let bridge = global();
    let Some(vtable) = vtable.as_ref() else {
        bridge.fatal(&BridgeError::InvalidVTable);
        return 0;
    };

    let env = NativeEnv::new(vtable, user_data);
    bridge.register_env(Arc::new(env)).as_raw()
}

#[no_mangle]
pub extern "C" fn addon_bridge_env_release(env: u64) {
    const OP: &str = "release_env";
    guarded(OP, |bridge| bridge.release_env(handle(env, ObjectKind::Env, OP)?));
}

fn dispatch(
    operation: &'static str,
    instance: u64,
    env: u64,
    call: impl FnOnce(&Bridge, Handle, Handle) -> Result<()>,
) {
    guarded(operation, |bridge| {
        let instance = handle(instance, ObjectKind::Instance, operation)?;
        let env = handle(env, ObjectKind::Env, operation)?;
        call(bridge, instance, env)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_extension_on_configure(instance: u64, env: u64) {
    dispatch("on_configure", instance, env, |bridge, instance, env| {
        bridge.on_configure(instance, env)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_extension_on_init(instance: u64, env: u64) {
    dispatch("on_init", instance, env, |bridge, instance, env| {
        bridge.on_init(instance, env)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_extension_on_start(instance: u64, env: u64) {
    dispatch("on_start", instance, env, |bridge, instance, env| {
        bridge.on_start(instance, env)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_extension_on_stop(instance: u64, env: u64) {
    dispatch("on_stop", instance, env, |bridge, instance, env| {
        bridge.on_stop(instance, env)
    });
}

#[no_mangle]
pub extern "C" fn addon_bridge_extension_on_deinit(instance: u64, env: u64) {
    dispatch("on_deinit", instance, env, |bridge, instance, env| {
        bridge.on_deinit(instance, env)
    });
}

/// Deliver a JSON-encoded command. An undecodable command is answered with
/// an error result instead of reaching the extension.
#[no_mangle]
pub extern "C" fn addon_bridge_extension_on_cmd(instance: u64, env: u64, cmd_json: RStr<'_>) {
    dispatch("on_cmd", instance, env, |bridge, instance, env| {
        match Cmd::from_json(cmd_json.as_str()) {
            Ok(cmd) => bridge.on_cmd(instance, env, cmd),
            Err(e) => {
                let env = bridge.env(env)?;
                env.log(LogLevel::Error, &format!("Failed to decode command: {}", e));
                env.return_result(CmdResult::invalid(e.to_string()));
                Ok(())
            }
        }
    });
}
