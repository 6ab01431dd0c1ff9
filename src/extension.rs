//! Extension lifecycle contract and the wrapper the bridge dispatches into.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::env::Env;
use crate::msg::{Cmd, CmdResult, StatusCode};

/// A plug-in component driven by the native runtime.
///
/// Every method has a default that completes the phase immediately, so an
/// extension only overrides the phases it cares about. An override must
/// eventually call the matching `*_done` on the env (or
/// [`Env::return_result`] for commands). It may keep a clone of the env and
/// complete later from another thread.
pub trait Extension: Send {
    fn on_configure(&mut self, env: &Arc<dyn Env>) {
        env.on_configure_done();
    }

    fn on_init(&mut self, env: &Arc<dyn Env>) {
        env.on_init_done();
    }

    fn on_start(&mut self, env: &Arc<dyn Env>) {
        env.on_start_done();
    }

    fn on_stop(&mut self, env: &Arc<dyn Env>) {
        env.on_stop_done();
    }

    fn on_deinit(&mut self, env: &Arc<dyn Env>) {
        env.on_deinit_done();
    }

    fn on_cmd(&mut self, env: &Arc<dyn Env>, cmd: Cmd) {
        env.return_result(CmdResult::new(StatusCode::Ok, &cmd));
    }
}

/// Extension that keeps every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtension;

impl Extension for DefaultExtension {}

/// Lifecycle stage of a wrapped extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Created,
    Configured,
    Initialized,
    Started,
    Stopped,
    Deinitialized,
}

/// Event dispatched into a wrapped extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Configure,
    Init,
    Start,
    Stop,
    Deinit,
    Cmd,
}

impl LifecycleEvent {
    /// Stage a phase event leads to. Commands leave the stage alone.
    pub fn target(self) -> Option<LifecycleStage> {
        match self {
            LifecycleEvent::Configure => Some(LifecycleStage::Configured),
            LifecycleEvent::Init => Some(LifecycleStage::Initialized),
            LifecycleEvent::Start => Some(LifecycleStage::Started),
            LifecycleEvent::Stop => Some(LifecycleStage::Stopped),
            LifecycleEvent::Deinit => Some(LifecycleStage::Deinitialized),
            LifecycleEvent::Cmd => None,
        }
    }
}

impl LifecycleStage {
    /// Whether `event` is the usual next step from this stage.
    ///
    /// Commands may arrive at any time, including while a phase is still
    /// waiting for its `*_done`.
    pub fn expects(self, event: LifecycleEvent) -> bool {
        use LifecycleEvent as E;
        use LifecycleStage as S;

        matches!(
            (self, event),
            (_, E::Cmd)
                | (S::Created, E::Configure)
                | (S::Configured, E::Init)
                | (S::Initialized, E::Start)
                | (S::Started, E::Stop)
                | (S::Initialized | S::Stopped, E::Deinit)
        )
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleStage::Created => "created",
            LifecycleStage::Configured => "configured",
            LifecycleStage::Initialized => "initialized",
            LifecycleStage::Started => "started",
            LifecycleStage::Stopped => "stopped",
            LifecycleStage::Deinitialized => "deinitialized",
        };
        f.write_str(s)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleEvent::Configure => "on_configure",
            LifecycleEvent::Init => "on_init",
            LifecycleEvent::Start => "on_start",
            LifecycleEvent::Stop => "on_stop",
            LifecycleEvent::Deinit => "on_deinit",
            LifecycleEvent::Cmd => "on_cmd",
        };
        f.write_str(s)
    }
}

/// One queued call into the extension.
enum Call {
    Configure,
    Init,
    Start,
    Stop,
    Deinit,
    Cmd(Cmd),
}

impl Call {
    fn event(&self) -> LifecycleEvent {
        match self {
            Call::Configure => LifecycleEvent::Configure,
            Call::Init => LifecycleEvent::Init,
            Call::Start => LifecycleEvent::Start,
            Call::Stop => LifecycleEvent::Stop,
            Call::Deinit => LifecycleEvent::Deinit,
            Call::Cmd(_) => LifecycleEvent::Cmd,
        }
    }

    fn deliver(self, extension: &mut dyn Extension, env: &Arc<dyn Env>) {
        match self {
            Call::Configure => extension.on_configure(env),
            Call::Init => extension.on_init(env),
            Call::Start => extension.on_start(env),
            Call::Stop => extension.on_stop(env),
            Call::Deinit => extension.on_deinit(env),
            Call::Cmd(cmd) => extension.on_cmd(env, cmd),
        }
    }
}

struct WrapperState {
    stage: LifecycleStage,
    mailbox: VecDeque<(Call, Arc<dyn Env>)>,
    /// Taken out while a dispatching thread runs the extension.
    extension: Option<Box<dyn Extension>>,
}

/// Adapts a user extension to the dispatch contract the bridge expects.
///
/// Calls into one instance run one at a time and in arrival order, with no
/// lock held while the extension runs. A call that arrives while another is
/// running (from a second thread, or re-entrantly from inside a completion
/// callback) is queued and delivered by the running dispatcher before it
/// returns.
pub struct ExtensionWrapper {
    name: String,
    state: Mutex<WrapperState>,
}

impl ExtensionWrapper {
    /// Wrap a freshly constructed extension.
    pub fn new(name: impl Into<String>, extension: Box<dyn Extension>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(WrapperState {
                stage: LifecycleStage::Created,
                mailbox: VecDeque::new(),
                extension: Some(extension),
            }),
        }
    }

    /// Instance name the extension was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage of the last phase dispatched. The extension may not have
    /// reported that phase done yet.
    pub fn stage(&self) -> LifecycleStage {
        self.lock().stage
    }

    pub fn on_configure(&self, env: Arc<dyn Env>) {
        self.dispatch(Call::Configure, env);
    }

    pub fn on_init(&self, env: Arc<dyn Env>) {
        self.dispatch(Call::Init, env);
    }

    pub fn on_start(&self, env: Arc<dyn Env>) {
        self.dispatch(Call::Start, env);
    }

    pub fn on_stop(&self, env: Arc<dyn Env>) {
        self.dispatch(Call::Stop, env);
    }

    pub fn on_deinit(&self, env: Arc<dyn Env>) {
        self.dispatch(Call::Deinit, env);
    }

    pub fn on_cmd(&self, env: Arc<dyn Env>, cmd: Cmd) {
        self.dispatch(Call::Cmd(cmd), env);
    }

    // No user code runs under this lock, so poisoning cannot leave the state
    // half-updated.
    fn lock(&self) -> MutexGuard<'_, WrapperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, call: Call, env: Arc<dyn Env>) {
        let mut state = self.lock();
        self.advance(&mut state, call.event());
        state.mailbox.push_back((call, env));

        let Some(extension) = state.extension.take() else {
            // The running dispatcher delivers it.
            return;
        };

        let mut runner = Runner {
            wrapper: self,
            extension: Some(extension),
        };
        loop {
            let next = state.mailbox.pop_front();
            let Some((call, env)) = next else {
                // Returned under the same lock that saw the mailbox empty.
                state.extension = runner.extension.take();
                return;
            };
            drop(state);
            runner.run(call, &env);
            state = self.lock();
        }
    }

    fn advance(&self, state: &mut WrapperState, event: LifecycleEvent) {
        let Some(target) = event.target() else {
            return;
        };

        if state.stage.expects(event) {
            tracing::debug!("Extension {}: {} ({} -> {})", self.name, event, state.stage, target);
        } else {
            tracing::warn!(
                "Extension {} received {} while {}",
                self.name,
                event,
                state.stage
            );
        }
        state.stage = target;
    }
}

/// Holds the extension while a dispatcher runs it, and puts it back if an
/// extension callback unwinds.
struct Runner<'a> {
    wrapper: &'a ExtensionWrapper,
    extension: Option<Box<dyn Extension>>,
}

impl Runner<'_> {
    fn run(&mut self, call: Call, env: &Arc<dyn Env>) {
        if let Some(extension) = self.extension.as_deref_mut() {
            call.deliver(extension, env);
        }
    }
}

impl Drop for Runner<'_> {
    fn drop(&mut self) {
        if let Some(extension) = self.extension.take() {
            self.wrapper.lock().extension = Some(extension);
        }
    }
}

impl fmt::Debug for ExtensionWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionWrapper")
            .field("name", &self.name)
            .field("stage", &self.stage())
            .finish()
    }
}
