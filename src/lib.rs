//! Bridge between a native host runtime and extensions written in Rust.
//!
//! The native runtime never holds a Rust reference. Addons, environments and
//! extension instances live in a handle table and cross the boundary as
//! opaque numeric handles. The native side asks for instances by addon
//! handle and learns the result through a completion callback.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use addon_bridge::{register_addon_as_extension, Env, Extension, ExtensionAddon, LogLevel};
//!
//! struct Echo;
//!
//! impl Extension for Echo {
//!     fn on_start(&mut self, env: &Arc<dyn Env>) {
//!         env.log(LogLevel::Debug, "OnStart");
//!         env.on_start_done();
//!     }
//! }
//!
//! fn register() -> Result<(), addon_bridge::BridgeError> {
//!     register_addon_as_extension("echo", ExtensionAddon::new(|_name| Some(Echo)))?;
//!     Ok(())
//! }
//! ```

mod addon;
mod bridge;
mod callbacks;
mod config;
mod env;
mod error;
mod extension;
pub mod fatal;
pub mod ffi;
mod handle;
mod msg;
mod registry;

pub use addon::*;
pub use bridge::*;
pub use callbacks::*;
pub use config::*;
pub use env::*;
pub use error::*;
pub use extension::*;
pub use ffi::{global, install, register_addon_as_extension};
pub use handle::*;
pub use msg::*;
pub use registry::*;

// Re-export for native env vtables built from Rust
pub use abi_stable;
