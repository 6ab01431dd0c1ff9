//! Name index of registered addons.
//!
//! Addons live in the handle table; this index lets the native runtime find
//! an addon's handle by the name it was registered under.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{BridgeError, Result};
use crate::handle::Handle;

/// Thread-safe addon name index.
pub struct AddonRegistry {
    addons: RwLock<HashMap<String, Handle>>,
}

impl AddonRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            addons: RwLock::new(HashMap::new()),
        }
    }

    /// Reserve a name for an addon handle.
    ///
    /// `register` runs while the write lock is held, so a name is claimed and
    /// bound to its handle atomically.
    pub fn insert_with(&self, name: &str, register: impl FnOnce() -> Handle) -> Result<Handle> {
        if name.trim().is_empty() {
            return Err(BridgeError::InvalidAddonName(name.to_string()));
        }

        let mut addons = self.write();
        if addons.contains_key(name) {
            return Err(BridgeError::AddonAlreadyRegistered(name.to_string()));
        }

        let handle = register();
        tracing::info!("Registered addon: {} (handle {})", name, handle);
        addons.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Lookup an addon handle by name.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.read().get(name).copied()
    }

    /// Drop the name bound to `handle`, if it is still the current binding.
    pub fn unregister(&self, name: &str, handle: Handle) {
        let mut addons = self.write();
        if addons.get(name) == Some(&handle) {
            addons.remove(name);
            tracing::info!("Unregistered addon: {} (handle {})", name, handle);
        }
    }

    /// List registered addon names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered addons.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The map is only touched by infallible operations, so a poisoned lock
    // still guards a consistent index.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Handle>> {
        self.addons.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Handle>> {
        self.addons.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::new()
    }
}
