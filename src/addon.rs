//! Addons: named factories that produce extension instances.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bridge::ManagedObject;
use crate::env::{CompletionContext, Env, LogLevel};
use crate::error::{BridgeError, Result};
use crate::extension::{Extension, ExtensionWrapper};
use crate::handle::{Handle, HandlePolicy, HandleTable};

/// A factory capability the native runtime instantiates by handle.
pub trait Addon: Send + Sync {
    /// Create an instance called `name` and settle `pending`.
    ///
    /// Construction failure is reported through [`PendingInstance::fail`].
    /// An `Err` means the addon itself is defective and is treated as fatal.
    fn on_create_instance(&self, env: &dyn Env, name: &str, pending: PendingInstance)
        -> Result<()>;
}

/// Builds an extension for an instance name, `None` on failure.
pub type ExtensionConstructor = Box<dyn Fn(&str) -> Option<Box<dyn Extension>> + Send + Sync>;

/// Addon that creates extensions from a constructor function.
#[derive(Default)]
pub struct ExtensionAddon {
    constructor: Option<ExtensionConstructor>,
}

impl ExtensionAddon {
    /// Create an addon from a typed constructor.
    pub fn new<F, E>(constructor: F) -> Self
    where
        F: Fn(&str) -> Option<E> + Send + Sync + 'static,
        E: Extension + 'static,
    {
        Self::from_boxed(Box::new(move |name| {
            constructor(name).map(|ext| Box::new(ext) as Box<dyn Extension>)
        }))
    }

    /// Create an addon from a boxed constructor.
    pub fn from_boxed(constructor: ExtensionConstructor) -> Self {
        Self {
            constructor: Some(constructor),
        }
    }

    /// Check if a constructor was provided.
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }
}

impl Addon for ExtensionAddon {
    fn on_create_instance(
        &self,
        env: &dyn Env,
        name: &str,
        pending: PendingInstance,
    ) -> Result<()> {
        let Some(constructor) = &self.constructor else {
            pending.abandon();
            return Err(BridgeError::MissingConstructor(name.to_string()));
        };

        match constructor(name) {
            Some(extension) => {
                let handle = pending.complete(extension);
                tracing::debug!("Created extension {} as handle {}", name, handle);
            }
            None => {
                env.log(LogLevel::Error, &format!("Failed to create extension {}", name));
                pending.fail();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ExtensionAddon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionAddon")
            .field("has_constructor", &self.has_constructor())
            .finish()
    }
}

/// Completion token for one instantiation request.
///
/// Settling consumes the token, so the completion fires at most once. A token
/// dropped unsettled (an addon that forgot, or a panicking constructor) fires
/// the empty completion, so it also fires at least once.
pub struct PendingInstance {
    handles: Arc<HandleTable<ManagedObject>>,
    env: Arc<dyn Env>,
    name: String,
    context: CompletionContext,
    settled: bool,
}

impl PendingInstance {
    pub(crate) fn new(
        handles: Arc<HandleTable<ManagedObject>>,
        env: Arc<dyn Env>,
        name: impl Into<String>,
        context: CompletionContext,
    ) -> Self {
        Self {
            handles,
            env,
            name: name.into(),
            context,
            settled: false,
        }
    }

    /// Instance name requested by the native side.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Correlation token echoed back with the completion.
    pub fn context(&self) -> CompletionContext {
        self.context
    }

    /// Register the extension and report its handle.
    ///
    /// The handle is in the table before the native side learns it.
    pub fn complete(mut self, extension: Box<dyn Extension>) -> Handle {
        let wrapper = Arc::new(ExtensionWrapper::new(self.name.clone(), extension));
        let handle = self
            .handles
            .register(ManagedObject::Instance(wrapper), HandlePolicy::SingleOwner);
        self.settle(Some(handle));
        handle
    }

    /// Report a construction failure.
    pub fn fail(mut self) {
        self.settle(None);
    }

    /// Drop without reporting; only for fatal paths.
    pub(crate) fn abandon(mut self) {
        self.settled = true;
    }

    fn settle(&mut self, instance: Option<Handle>) {
        self.settled = true;
        self.env.on_create_instance_done(instance, self.context);
    }
}

impl Drop for PendingInstance {
    fn drop(&mut self) {
        if !self.settled {
            self.env.log(
                LogLevel::Error,
                &format!("Instance {} was never completed", self.name),
            );
            self.settle(None);
        }
    }
}

/// Registered addon stored behind an addon handle.
pub struct AddonEntry {
    name: String,
    addon: Box<dyn Addon>,
    in_flight: AtomicUsize,
}

impl AddonEntry {
    pub(crate) fn new(name: impl Into<String>, addon: Box<dyn Addon>) -> Self {
        Self {
            name: name.into(),
            addon,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Addon name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of instantiations queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Count one instantiation until the returned ticket is dropped.
    pub(crate) fn enter(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight {
            entry: self.clone(),
        }
    }
}

/// One counted instantiation of an addon, queued or running.
///
/// Dropping the ticket releases the count, including when the queued work is
/// discarded or the constructor unwinds.
pub(crate) struct InFlight {
    entry: Arc<AddonEntry>,
}

impl InFlight {
    pub(crate) fn create_instance(
        &self,
        env: &dyn Env,
        name: &str,
        pending: PendingInstance,
    ) -> Result<()> {
        self.entry.addon.on_create_instance(env, name, pending)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for AddonEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonEntry")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
