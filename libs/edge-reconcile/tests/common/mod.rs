#![allow(dead_code)]

//! In-memory runtime that records every call and fails on demand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_reconcile::{Command, FatalError, Module, ModuleRuntime, Plan};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Always,
    Times(u32),
    Fatal,
}

#[derive(Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, Failure>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl RecordingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn ModuleRuntime> {
        self.clone()
    }

    /// `call` is the recorded form, e.g. `"create hub"`.
    pub fn fail_always(&self, call: &str) {
        self.failures.lock().insert(call.to_owned(), Failure::Always);
    }

    pub fn fail_times(&self, call: &str, times: u32) {
        self.failures
            .lock()
            .insert(call.to_owned(), Failure::Times(times));
    }

    pub fn fail_fatal(&self, call: &str) {
        self.failures.lock().insert(call.to_owned(), Failure::Fatal);
    }

    pub fn heal(&self, call: &str) {
        self.failures.lock().remove(call);
    }

    pub fn delay(&self, call: &str, by: Duration) {
        self.delays.lock().insert(call.to_owned(), by);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock())
    }

    async fn record(&self, call: String) -> anyhow::Result<()> {
        let delay = self.delays.lock().get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().push(call.clone());

        let mut failures = self.failures.lock();
        match failures.get(&call).copied() {
            None => Ok(()),
            Some(Failure::Always) => Err(anyhow::anyhow!("{call}: runtime error")),
            Some(Failure::Fatal) => Err(FatalError::new(format!("{call}: host fault")).into()),
            Some(Failure::Times(left)) => {
                if left <= 1 {
                    failures.remove(&call);
                } else {
                    failures.insert(call.clone(), Failure::Times(left - 1));
                }
                Err(anyhow::anyhow!("{call}: transient runtime error"))
            }
        }
    }
}

#[async_trait]
impl ModuleRuntime for RecordingRuntime {
    async fn create(&self, module: &Module, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.record(format!("create {}", module.name)).await
    }

    async fn start(&self, name: &str, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.record(format!("start {name}")).await
    }

    async fn stop(&self, name: &str, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.record(format!("stop {name}")).await
    }

    async fn update(
        &self,
        _current: &Module,
        next: &Module,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(format!("update {}", next.name)).await
    }

    async fn remove(&self, name: &str, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.record(format!("remove {name}")).await
    }
}

/// Plan of `start <name>` commands.
pub fn start_plan(runtime: &Arc<RecordingRuntime>, names: &[&str]) -> Plan {
    let handle = runtime.handle();
    names
        .iter()
        .map(|name| Command::start(&handle, *name))
        .collect()
}

/// Runtime that cancels `token` when `call` is executed.
pub struct CancellingRuntime {
    pub inner: Arc<RecordingRuntime>,
    pub token: CancellationToken,
    pub trigger: String,
}

#[async_trait]
impl ModuleRuntime for CancellingRuntime {
    async fn create(&self, module: &Module, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.inner.create(module, cancel).await
    }

    async fn start(&self, name: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        let result = self.inner.start(name, cancel).await;
        if format!("start {name}") == self.trigger {
            self.token.cancel();
        }
        result
    }

    async fn stop(&self, name: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.inner.stop(name, cancel).await
    }

    async fn update(
        &self,
        current: &Module,
        next: &Module,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.inner.update(current, next, cancel).await
    }

    async fn remove(&self, name: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.inner.remove(name, cancel).await
    }
}
