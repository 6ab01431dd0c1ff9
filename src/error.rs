//! Error types for bridge operations.

use thiserror::Error;

use crate::handle::Handle;

/// Kind of object stored behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Addon,
    Env,
    Instance,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Addon => f.write_str("addon"),
            ObjectKind::Env => f.write_str("env"),
            ObjectKind::Instance => f.write_str("addon instance"),
        }
    }
}

/// Errors reported by the handle table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// No live entry for the handle
    #[error("Handle not found: {0}")]
    NotFound(Handle),

    /// Entry was registered as single-owner and cannot be replaced
    #[error("Handle is immutable: {0}")]
    Immutable(Handle),
}

/// Errors raised by the bridge.
///
/// Apart from the registration and runtime start-up errors, every variant is
/// fatal: it means the native and managed sides disagree about shared state,
/// and it goes to the fatal handler instead of back across the boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A handle the caller believed live is not in the table
    #[error("Failed to get {kind} from handle map, id: {handle} (operation: {operation})")]
    HandleNotFound {
        kind: ObjectKind,
        handle: Handle,
        operation: &'static str,
    },

    /// The handle resolves, but to an object of another kind
    #[error("Handle {handle} refers to {actual}, expected {expected} (operation: {operation})")]
    KindMismatch {
        handle: Handle,
        expected: ObjectKind,
        actual: ObjectKind,
        operation: &'static str,
    },

    /// The native side passed the null handle
    #[error("Null {kind} handle passed to {operation}")]
    NullHandle {
        kind: ObjectKind,
        operation: &'static str,
    },

    /// An extension addon was registered without a constructor
    #[error("Extension constructor is not provided (instance: {0})")]
    MissingConstructor(String),

    /// A native env vtable pointer was null
    #[error("Invalid native env vtable")]
    InvalidVTable,

    /// Managed code panicked inside a boundary call
    #[error("Panic while handling {0}")]
    Panicked(&'static str),

    /// Addon name already taken
    #[error("Addon already registered: {0}")]
    AddonAlreadyRegistered(String),

    /// Addon names must be non-empty
    #[error("Invalid addon name: {0:?}")]
    InvalidAddonName(String),

    /// Worker runtime could not be started
    #[error("Failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn not_found(kind: ObjectKind, handle: Handle, operation: &'static str) -> Self {
        BridgeError::HandleNotFound {
            kind,
            handle,
            operation,
        }
    }

    /// Whether this error indicates a native/managed desynchronization.
    pub fn is_desync(&self) -> bool {
        !matches!(
            self,
            BridgeError::Runtime(_)
                | BridgeError::AddonAlreadyRegistered(_)
                | BridgeError::InvalidAddonName(_)
        )
    }
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
