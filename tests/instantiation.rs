mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use addon_bridge::{
    Bridge, BridgeConfig, BridgeError, Cmd, CmdResult, CompletionContext, DefaultExtension, Env,
    Extension, ExtensionAddon, Handle, LifecycleStage, LogLevel, ObjectKind, StatusCode,
};
use common::RecordingEnv;
use serde_json::json;

type Fatals = Arc<Mutex<Vec<String>>>;

fn bridge() -> (Bridge, Fatals) {
    let fatals: Fatals = Arc::new(Mutex::new(Vec::new()));
    let sink = fatals.clone();
    let bridge = Bridge::new(BridgeConfig::new().with_max_blocking_threads(4))
        .unwrap()
        .with_fatal_handler(move |err| sink.lock().unwrap().push(err.to_string()));
    (bridge, fatals)
}

fn wait_for_fatal(fatals: &Fatals) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while fatals.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    fatals.lock().unwrap().clone()
}

struct Echo {
    name: String,
}

impl Extension for Echo {
    fn on_cmd(&mut self, env: &Arc<dyn Env>, cmd: Cmd) {
        env.log(LogLevel::Debug, &format!("{} got {}", self.name, cmd.name));
        let result = CmdResult::new(StatusCode::Ok, &cmd).with_properties(cmd.properties.clone());
        env.return_result(result);
    }
}

#[test]
fn successful_factory_completes_with_resolvable_handle() {
    let (bridge, fatals) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("echo", ExtensionAddon::new(|_| Some(DefaultExtension)))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "inst-1", 42).unwrap();

    let completions = env.wait_for_completions(1);
    assert_eq!(completions.len(), 1);
    let (instance, context) = completions[0];
    assert_eq!(context, 42);

    let wrapper = bridge.instance(instance.unwrap()).unwrap();
    assert_eq!(wrapper.name(), "inst-1");
    assert_eq!(wrapper.stage(), LifecycleStage::Created);
    assert!(fatals.lock().unwrap().is_empty());
}

#[test]
fn failing_factory_logs_and_completes_empty() {
    let (bridge, _) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("broken", ExtensionAddon::new(|_| None::<DefaultExtension>))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());
    let live_before = bridge.handles().len();

    bridge.create_instance(addon, env_handle, "inst-x", 7).unwrap();

    assert_eq!(env.wait_for_completions(1), vec![(None, 7)]);
    let logs = env.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].0, LogLevel::Error);
    assert!(logs[0].1.contains("inst-x"));
    assert_eq!(bridge.handles().len(), live_before);
}

#[test]
fn second_destroy_of_instance_is_desync() {
    let (bridge, fatals) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("echo", ExtensionAddon::new(|_| Some(DefaultExtension)))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "inst-2", 0).unwrap();
    let instance = env.wait_for_completions(1)[0].0.unwrap();

    bridge.settle(bridge.destroy_instance(instance));
    assert!(fatals.lock().unwrap().is_empty());
    assert!(bridge.instance(instance).is_err());

    bridge.settle(bridge.destroy_instance(instance));
    let fatals = fatals.lock().unwrap();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("addon instance"));
    assert!(fatals[0].contains("destroy_instance"));
}

#[test]
fn concurrent_instantiation_yields_distinct_handles() {
    let (bridge, _) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon(
            "echo",
            ExtensionAddon::new(|name| {
                Some(Echo {
                    name: name.to_string(),
                })
            }),
        )
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    std::thread::scope(|scope| {
        for i in 0..16usize {
            let bridge = &bridge;
            scope.spawn(move || {
                bridge
                    .create_instance(addon, env_handle, &format!("inst-{}", i), i)
                    .unwrap();
            });
        }
    });

    let completions = env.wait_for_completions(16);
    assert_eq!(completions.len(), 16);

    let handles: HashSet<_> = completions.iter().map(|(h, _)| h.unwrap()).collect();
    let contexts: HashSet<_> = completions.iter().map(|(_, c)| *c).collect();
    assert_eq!(handles.len(), 16);
    assert_eq!(contexts, (0..16).collect::<HashSet<usize>>());

    for (handle, context) in completions {
        let wrapper = bridge.instance(handle.unwrap()).unwrap();
        assert_eq!(wrapper.name(), format!("inst-{}", context));
    }
}

#[test]
fn addon_without_constructor_is_fatal() {
    let (bridge, fatals) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("hollow", ExtensionAddon::default())
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "inst", 3).unwrap();

    let fatals = wait_for_fatal(&fatals);
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("constructor is not provided"));
    assert!(env.completions().is_empty());
}

#[test]
fn unknown_handles_are_rejected_before_dispatch() {
    let (bridge, _) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("echo", ExtensionAddon::new(|_| Some(DefaultExtension)))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    // An env handle in the addon position.
    let err = bridge
        .create_instance(env_handle, env_handle, "inst", 1)
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::KindMismatch {
            expected: ObjectKind::Addon,
            actual: ObjectKind::Env,
            ..
        }
    ));

    bridge.release_env(env_handle).unwrap();
    let err = bridge.create_instance(addon, env_handle, "inst", 1).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::HandleNotFound {
            kind: ObjectKind::Env,
            ..
        }
    ));
    assert!(env.completions().is_empty());
}

#[test]
fn full_lifecycle_through_bridge() {
    let (bridge, fatals) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon(
            "echo",
            ExtensionAddon::new(|name| {
                Some(Echo {
                    name: name.to_string(),
                })
            }),
        )
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "echo-1", 0).unwrap();
    let instance = env.wait_for_completions(1)[0].0.unwrap();

    bridge.on_configure(instance, env_handle).unwrap();
    bridge.on_init(instance, env_handle).unwrap();
    bridge.on_start(instance, env_handle).unwrap();
    bridge
        .on_cmd(
            instance,
            env_handle,
            Cmd::new("echo").with_properties(json!({"text": "hi"})),
        )
        .unwrap();
    bridge.on_stop(instance, env_handle).unwrap();
    bridge.on_deinit(instance, env_handle).unwrap();
    bridge.destroy_instance(instance).unwrap();

    let events = env.events();
    assert_eq!(&events[..3], ["configure_done", "init_done", "start_done"]);
    let result: CmdResult =
        serde_json::from_str(events[3].strip_prefix("result:").unwrap()).unwrap();
    assert_eq!(result.cmd_name, "echo");
    assert_eq!(result.properties, json!({"text": "hi"}));
    assert_eq!(&events[4..], ["stop_done", "deinit_done"]);
    assert_eq!(env.logs(), vec![(LogLevel::Debug, "echo-1 got echo".to_string())]);
    assert!(fatals.lock().unwrap().is_empty());
}

#[test]
fn out_of_order_lifecycle_is_delivered() {
    let (bridge, fatals) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("echo", ExtensionAddon::new(|_| Some(DefaultExtension)))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "early", 0).unwrap();
    let instance = env.wait_for_completions(1)[0].0.unwrap();

    bridge.on_start(instance, env_handle).unwrap();

    assert_eq!(env.events(), ["start_done"]);
    assert!(fatals.lock().unwrap().is_empty());
}

/// Parks its env in `on_stop` and reports done later.
struct SlowStop {
    parked: Arc<Mutex<Option<Arc<dyn Env>>>>,
}

impl Extension for SlowStop {
    fn on_stop(&mut self, env: &Arc<dyn Env>) {
        *self.parked.lock().unwrap() = Some(env.clone());
    }
}

#[test]
fn command_while_stop_pending_is_answered() {
    let (bridge, fatals) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let parked = Arc::new(Mutex::new(None));
    let slot = parked.clone();
    let addon = bridge
        .register_addon(
            "slow",
            ExtensionAddon::new(move |_| {
                Some(SlowStop {
                    parked: slot.clone(),
                })
            }),
        )
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "slow-1", 0).unwrap();
    let instance = env.wait_for_completions(1)[0].0.unwrap();

    bridge.on_configure(instance, env_handle).unwrap();
    bridge.on_init(instance, env_handle).unwrap();
    bridge.on_start(instance, env_handle).unwrap();
    bridge.on_stop(instance, env_handle).unwrap();
    bridge.on_cmd(instance, env_handle, Cmd::new("late")).unwrap();

    let stop_env = parked.lock().unwrap().take().unwrap();
    std::thread::spawn(move || stop_env.on_stop_done())
        .join()
        .unwrap();
    bridge.on_deinit(instance, env_handle).unwrap();

    let events = env.events();
    assert_eq!(&events[..3], ["configure_done", "init_done", "start_done"]);
    assert!(events[3].contains("\"cmd_name\":\"late\""));
    assert_eq!(&events[4..], ["stop_done", "deinit_done"]);
    assert!(fatals.lock().unwrap().is_empty());
}

/// Env whose configure completion drives the next phase on the same thread,
/// the way a native runtime may chain phases from its callbacks.
#[derive(Default)]
struct ChainEnv {
    inner: RecordingEnv,
    next: Mutex<Option<(Arc<Bridge>, Handle, Handle)>>,
}

impl Env for ChainEnv {
    fn log(&self, level: LogLevel, message: &str) {
        self.inner.log(level, message);
    }

    fn on_create_instance_done(&self, instance: Option<Handle>, context: CompletionContext) {
        self.inner.on_create_instance_done(instance, context);
    }

    fn on_configure_done(&self) {
        self.inner.on_configure_done();
        let next = self.next.lock().unwrap().take();
        if let Some((bridge, instance, env)) = next {
            bridge.on_init(instance, env).unwrap();
        }
    }

    fn on_init_done(&self) {
        self.inner.on_init_done();
    }

    fn on_start_done(&self) {
        self.inner.on_start_done();
    }

    fn on_stop_done(&self) {
        self.inner.on_stop_done();
    }

    fn on_deinit_done(&self) {
        self.inner.on_deinit_done();
    }

    fn return_result(&self, result: CmdResult) {
        self.inner.return_result(result);
    }
}

#[test]
fn phase_driven_from_completion_callback() {
    let (bridge, fatals) = bridge();
    let bridge = Arc::new(bridge);
    let env = Arc::new(ChainEnv::default());
    let addon = bridge
        .register_addon("echo", ExtensionAddon::new(|_| Some(DefaultExtension)))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "chained", 0).unwrap();
    let instance = env.inner.wait_for_completions(1)[0].0.unwrap();
    *env.next.lock().unwrap() = Some((bridge.clone(), instance, env_handle));

    bridge.on_configure(instance, env_handle).unwrap();

    assert_eq!(env.inner.events(), ["configure_done", "init_done"]);
    assert_eq!(
        bridge.instance(instance).unwrap().stage(),
        LifecycleStage::Initialized
    );
    assert!(fatals.lock().unwrap().is_empty());
}

#[test]
fn destroying_addon_leaves_instances_alive() {
    let (bridge, _) = bridge();
    let env = Arc::new(RecordingEnv::default());
    let addon = bridge
        .register_addon("echo", ExtensionAddon::new(|_| Some(DefaultExtension)))
        .unwrap();
    let env_handle = bridge.register_env(env.clone());

    bridge.create_instance(addon, env_handle, "survivor", 0).unwrap();
    let instance = env.wait_for_completions(1)[0].0.unwrap();

    bridge.destroy_addon(addon).unwrap();

    assert_eq!(bridge.addon_handle("echo"), None);
    assert!(bridge.create_instance(addon, env_handle, "late", 1).is_err());
    assert_eq!(bridge.instance(instance).unwrap().name(), "survivor");
    bridge.destroy_instance(instance).unwrap();
}
