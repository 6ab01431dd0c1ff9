#![allow(dead_code)]

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use addon_bridge::{CmdResult, CompletionContext, Env, Handle, LogLevel};

/// Env that records what the managed side reports back.
#[derive(Default)]
pub struct RecordingEnv {
    logs: Mutex<Vec<(LogLevel, String)>>,
    events: Mutex<Vec<String>>,
    completions: Mutex<Vec<(Option<Handle>, CompletionContext)>>,
    completed: Condvar,
}

impl RecordingEnv {
    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.logs.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<(Option<Handle>, CompletionContext)> {
        self.completions.lock().unwrap().clone()
    }

    pub fn wait_for_completions(&self, count: usize) -> Vec<(Option<Handle>, CompletionContext)> {
        let guard = self.completions.lock().unwrap();
        let (guard, timeout) = self
            .completed
            .wait_timeout_while(guard, Duration::from_secs(5), |c| c.len() < count)
            .unwrap();
        assert!(!timeout.timed_out(), "timed out waiting for {} completion(s)", count);
        guard.clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl Env for RecordingEnv {
    fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn on_create_instance_done(&self, instance: Option<Handle>, context: CompletionContext) {
        self.completions.lock().unwrap().push((instance, context));
        self.completed.notify_all();
    }

    fn on_configure_done(&self) {
        self.push("configure_done");
    }

    fn on_init_done(&self) {
        self.push("init_done");
    }

    fn on_start_done(&self) {
        self.push("start_done");
    }

    fn on_stop_done(&self) {
        self.push("stop_done");
    }

    fn on_deinit_done(&self) {
        self.push("deinit_done");
    }

    fn return_result(&self, result: CmdResult) {
        self.push(format!("result:{}", result.to_json()));
    }
}
