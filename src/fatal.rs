//! Handling of unrecoverable protocol errors.
//!
//! A desynchronization means the native and managed sides no longer agree on
//! which objects exist. The default handler logs a diagnostic and aborts the
//! process. Embedders that prefer another policy install their own handler
//! with [`Bridge::with_fatal_handler`](crate::Bridge::with_fatal_handler).

use std::sync::Arc;

use crate::error::BridgeError;

/// Callback receiving fatal bridge errors.
pub type FatalHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// Handler that logs and aborts.
pub fn abort_handler() -> FatalHandler {
    Arc::new(|err: &BridgeError| {
        abort(err);
    })
}

/// Log a fatal error and abort the process.
pub fn abort(err: &BridgeError) -> ! {
    tracing::error!("Fatal bridge error: {}", err);
    // Subscribers may not flush before the abort.
    eprintln!("addon-bridge: fatal: {}", err);
    std::process::abort()
}
