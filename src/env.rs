//! Environment handed to addons and extensions.
//!
//! An [`Env`] is the managed view of a native runtime context. It is the only
//! observability hook at this layer and the channel through which every
//! asynchronous completion travels back to the native side.

use crate::handle::Handle;
use crate::msg::CmdResult;

/// Opaque correlation token echoed back with an instantiation completion.
pub type CompletionContext = usize;

/// Log levels understood by the native logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl LogLevel {
    /// Wire value for the native logger.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Emit a message through `tracing` at the matching level.
    pub fn trace(self, message: &str) {
        match self {
            LogLevel::Debug => tracing::debug!("[extension] {}", message),
            LogLevel::Info => tracing::info!("[extension] {}", message),
            LogLevel::Warn => tracing::warn!("[extension] {}", message),
            LogLevel::Error | LogLevel::Fatal => tracing::error!("[extension] {}", message),
        }
    }
}

/// Runtime context callbacks.
///
/// Implementations must be callable from any thread: completions for an
/// instantiation are delivered from a managed worker, lifecycle completions
/// from whichever thread the native runtime used to dispatch.
pub trait Env: Send + Sync {
    /// Log a message.
    fn log(&self, level: LogLevel, message: &str);

    /// Report the outcome of an instantiation. `None` means construction
    /// failed.
    fn on_create_instance_done(&self, instance: Option<Handle>, context: CompletionContext);

    fn on_configure_done(&self);

    fn on_init_done(&self);

    fn on_start_done(&self);

    fn on_stop_done(&self);

    fn on_deinit_done(&self);

    /// Deliver the result of a command.
    fn return_result(&self, result: CmdResult);
}
