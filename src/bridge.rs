//! Native-facing instantiation bridge.
//!
//! The native runtime drives every state change through a [`Bridge`]:
//! instance creation and destruction, addon destruction, and lifecycle
//! dispatch into live instances. All objects are addressed by [`Handle`].
//!
//! Entry points return `Err` only for desynchronization (an unknown handle,
//! an object of the wrong kind, a defective addon). Callers at the C boundary
//! hand those to [`Bridge::fatal`] instead of reporting them back.

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::addon::{Addon, AddonEntry, PendingInstance};
use crate::config::BridgeConfig;
use crate::env::{CompletionContext, Env};
use crate::error::{BridgeError, ObjectKind, Result};
use crate::extension::ExtensionWrapper;
use crate::fatal::{self, FatalHandler};
use crate::handle::{Handle, HandlePolicy, HandleTable};
use crate::msg::Cmd;
use crate::registry::AddonRegistry;

/// Object stored behind a handle.
#[derive(Clone)]
pub enum ManagedObject {
    Addon(Arc<AddonEntry>),
    Env(Arc<dyn Env>),
    Instance(Arc<ExtensionWrapper>),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Addon(_) => ObjectKind::Addon,
            ManagedObject::Env(_) => ObjectKind::Env,
            ManagedObject::Instance(_) => ObjectKind::Instance,
        }
    }
}

/// The set of entry points the native runtime calls.
pub struct Bridge {
    handles: Arc<HandleTable<ManagedObject>>,
    addons: AddonRegistry,
    runtime: Runtime,
    on_fatal: FatalHandler,
}

impl Bridge {
    /// Create a bridge with its own handle table and worker runtime.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = config.build_runtime()?;

        Ok(Self {
            handles: Arc::new(HandleTable::new()),
            addons: AddonRegistry::new(),
            runtime,
            on_fatal: fatal::abort_handler(),
        })
    }

    /// Replace the default log-and-abort fatal handler.
    pub fn with_fatal_handler(
        mut self,
        handler: impl Fn(&BridgeError) + Send + Sync + 'static,
    ) -> Self {
        self.on_fatal = Arc::new(handler);
        self
    }

    /// The handle table.
    pub fn handles(&self) -> &HandleTable<ManagedObject> {
        &self.handles
    }

    /// The addon name index.
    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    /// Deliver a fatal error to the configured handler.
    pub fn fatal(&self, err: &BridgeError) {
        (self.on_fatal)(err);
    }

    /// Route the error of a boundary call, if any, to the fatal handler.
    pub fn settle(&self, result: Result<()>) {
        if let Err(err) = result {
            self.fatal(&err);
        }
    }

    // === Registration ===

    /// Register an addon under a process-unique name.
    pub fn register_addon(&self, name: &str, addon: impl Addon + 'static) -> Result<Handle> {
        self.addons.insert_with(name, || {
            let entry = Arc::new(AddonEntry::new(name, Box::new(addon)));
            self.handles
                .register(ManagedObject::Addon(entry), HandlePolicy::SingleOwner)
        })
    }

    /// Lookup an addon handle by name.
    pub fn addon_handle(&self, name: &str) -> Option<Handle> {
        self.addons.lookup(name)
    }

    /// Names of all registered addons.
    pub fn addon_names(&self) -> Vec<String> {
        self.addons.names()
    }

    /// Register a runtime environment. Either side may release it.
    pub fn register_env(&self, env: Arc<dyn Env>) -> Handle {
        self.handles
            .register(ManagedObject::Env(env), HandlePolicy::Removable)
    }

    /// Release an environment handle.
    pub fn release_env(&self, env: Handle) -> Result<()> {
        self.take(env, ObjectKind::Env, "release_env")?;
        Ok(())
    }

    // === Instantiation ===

    /// Start creating an instance of `addon` called `name`.
    ///
    /// Both handles are resolved before returning. The addon runs on a
    /// managed worker and the outcome arrives only through
    /// [`Env::on_create_instance_done`], carrying `context`.
    pub fn create_instance(
        &self,
        addon: Handle,
        env: Handle,
        name: &str,
        context: CompletionContext,
    ) -> Result<()> {
        let entry = self.resolve_addon(addon, "create_instance")?;
        let env = self.resolve_env(env, "create_instance")?;

        let pending = PendingInstance::new(self.handles.clone(), env.clone(), name, context);
        let name = name.to_string();
        let on_fatal = self.on_fatal.clone();

        tracing::debug!(
            "Creating instance {} of addon {} (context {})",
            name,
            entry.name(),
            context
        );

        // Counted from here so a queued request is already in flight.
        let ticket = entry.enter();
        self.runtime.spawn_blocking(move || {
            if let Err(err) = ticket.create_instance(env.as_ref(), &name, pending) {
                on_fatal(&err);
            }
        });
        Ok(())
    }

    /// Destroy an instance. The handle must be live.
    pub fn destroy_instance(&self, instance: Handle) -> Result<()> {
        if let ManagedObject::Instance(wrapper) =
            self.take(instance, ObjectKind::Instance, "destroy_instance")?
        {
            tracing::debug!("Destroyed instance {} (handle {})", wrapper.name(), instance);
        }
        Ok(())
    }

    /// Destroy an addon. The handle must be live.
    ///
    /// Instantiations already running keep their own reference to the addon
    /// and still complete.
    pub fn destroy_addon(&self, addon: Handle) -> Result<()> {
        if let ManagedObject::Addon(entry) = self.take(addon, ObjectKind::Addon, "destroy_addon")? {
            self.addons.unregister(entry.name(), addon);
            if entry.in_flight() > 0 {
                tracing::warn!(
                    "Addon {} destroyed with {} instantiation(s) in flight",
                    entry.name(),
                    entry.in_flight()
                );
            }
        }
        Ok(())
    }

    /// Resolve a live environment.
    pub fn env(&self, env: Handle) -> Result<Arc<dyn Env>> {
        self.resolve_env(env, "resolve_env")
    }

    /// Resolve a live instance.
    pub fn instance(&self, instance: Handle) -> Result<Arc<ExtensionWrapper>> {
        self.resolve_instance(instance, "resolve_instance")
    }

    // === Lifecycle dispatch ===
    //
    // Only handle resolution can fail here. Phase ordering is the native
    // runtime's business; the wrapper logs unusual sequences and delivers them.

    pub fn on_configure(&self, instance: Handle, env: Handle) -> Result<()> {
        let (wrapper, env) = self.dispatch_target(instance, env, "on_configure")?;
        wrapper.on_configure(env);
        Ok(())
    }

    pub fn on_init(&self, instance: Handle, env: Handle) -> Result<()> {
        let (wrapper, env) = self.dispatch_target(instance, env, "on_init")?;
        wrapper.on_init(env);
        Ok(())
    }

    pub fn on_start(&self, instance: Handle, env: Handle) -> Result<()> {
        let (wrapper, env) = self.dispatch_target(instance, env, "on_start")?;
        wrapper.on_start(env);
        Ok(())
    }

    pub fn on_stop(&self, instance: Handle, env: Handle) -> Result<()> {
        let (wrapper, env) = self.dispatch_target(instance, env, "on_stop")?;
        wrapper.on_stop(env);
        Ok(())
    }

    pub fn on_deinit(&self, instance: Handle, env: Handle) -> Result<()> {
        let (wrapper, env) = self.dispatch_target(instance, env, "on_deinit")?;
        wrapper.on_deinit(env);
        Ok(())
    }

    pub fn on_cmd(&self, instance: Handle, env: Handle, cmd: Cmd) -> Result<()> {
        let (wrapper, env) = self.dispatch_target(instance, env, "on_cmd")?;
        wrapper.on_cmd(env, cmd);
        Ok(())
    }

    fn dispatch_target(
        &self,
        instance: Handle,
        env: Handle,
        operation: &'static str,
    ) -> Result<(Arc<ExtensionWrapper>, Arc<dyn Env>)> {
        Ok((
            self.resolve_instance(instance, operation)?,
            self.resolve_env(env, operation)?,
        ))
    }

    // === Handle resolution ===

    fn lookup(
        &self,
        handle: Handle,
        kind: ObjectKind,
        operation: &'static str,
    ) -> Result<ManagedObject> {
        self.handles
            .resolve(handle)
            .map_err(|_| BridgeError::not_found(kind, handle, operation))
    }

    fn resolve_addon(&self, handle: Handle, operation: &'static str) -> Result<Arc<AddonEntry>> {
        match self.lookup(handle, ObjectKind::Addon, operation)? {
            ManagedObject::Addon(entry) => Ok(entry),
            other => Err(mismatch(handle, ObjectKind::Addon, &other, operation)),
        }
    }

    fn resolve_env(&self, handle: Handle, operation: &'static str) -> Result<Arc<dyn Env>> {
        match self.lookup(handle, ObjectKind::Env, operation)? {
            ManagedObject::Env(env) => Ok(env),
            other => Err(mismatch(handle, ObjectKind::Env, &other, operation)),
        }
    }

    fn resolve_instance(
        &self,
        handle: Handle,
        operation: &'static str,
    ) -> Result<Arc<ExtensionWrapper>> {
        match self.lookup(handle, ObjectKind::Instance, operation)? {
            ManagedObject::Instance(wrapper) => Ok(wrapper),
            other => Err(mismatch(handle, ObjectKind::Instance, &other, operation)),
        }
    }

    /// Remove an object of the expected kind, leaving other kinds in place.
    fn take(
        &self,
        handle: Handle,
        kind: ObjectKind,
        operation: &'static str,
    ) -> Result<ManagedObject> {
        let mut actual = kind;
        let taken = self
            .handles
            .take_if(handle, |object| {
                actual = object.kind();
                actual == kind
            })
            .map_err(|_| BridgeError::not_found(kind, handle, operation))?;

        taken.ok_or(BridgeError::KindMismatch {
            handle,
            expected: kind,
            actual,
            operation,
        })
    }
}

fn mismatch(
    handle: Handle,
    expected: ObjectKind,
    actual: &ManagedObject,
    operation: &'static str,
) -> BridgeError {
    BridgeError::KindMismatch {
        handle,
        expected,
        actual: actual.kind(),
        operation,
    }
}
