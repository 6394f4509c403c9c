//! Lifecycle commands.
//!
//! A [`Command`] is one executable, undoable action against a
//! [`ModuleRuntime`]. The set of actions is closed; runtime-specific behavior
//! lives behind the runtime trait, and multi-step actions are expressed as a
//! [`Command::Group`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::Module;

/// Boxed future returned by [`Command::execute`] and [`Command::undo`].
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Client for the container or pod runtime that commands act upon.
///
/// Implementations perform the actual side effects. They may observe the
/// cancellation token to abort long operations.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    async fn create(&self, module: &Module, cancel: &CancellationToken) -> anyhow::Result<()>;
    async fn start(&self, name: &str, cancel: &CancellationToken) -> anyhow::Result<()>;
    async fn stop(&self, name: &str, cancel: &CancellationToken) -> anyhow::Result<()>;
    async fn update(
        &self,
        current: &Module,
        next: &Module,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
    async fn remove(&self, name: &str, cancel: &CancellationToken) -> anyhow::Result<()>;
}

/// A single lifecycle action with a stable identity.
#[derive(Clone)]
pub enum Command {
    Create {
        runtime: Arc<dyn ModuleRuntime>,
        module: Module,
    },
    Start {
        runtime: Arc<dyn ModuleRuntime>,
        name: String,
    },
    Stop {
        runtime: Arc<dyn ModuleRuntime>,
        name: String,
    },
    Update {
        runtime: Arc<dyn ModuleRuntime>,
        current: Module,
        next: Module,
    },
    Remove {
        runtime: Arc<dyn ModuleRuntime>,
        name: String,
    },
    /// Runs the inner commands in order and fails on the first failing step.
    Group { label: String, commands: Vec<Command> },
    Noop { label: String },
}

impl Command {
    #[must_use]
    pub fn create(runtime: &Arc<dyn ModuleRuntime>, module: Module) -> Self {
        Self::Create {
            runtime: Arc::clone(runtime),
            module,
        }
    }

    #[must_use]
    pub fn start(runtime: &Arc<dyn ModuleRuntime>, name: impl Into<String>) -> Self {
        Self::Start {
            runtime: Arc::clone(runtime),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn stop(runtime: &Arc<dyn ModuleRuntime>, name: impl Into<String>) -> Self {
        Self::Stop {
            runtime: Arc::clone(runtime),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn update(runtime: &Arc<dyn ModuleRuntime>, current: Module, next: Module) -> Self {
        Self::Update {
            runtime: Arc::clone(runtime),
            current,
            next,
        }
    }

    #[must_use]
    pub fn remove(runtime: &Arc<dyn ModuleRuntime>, name: impl Into<String>) -> Self {
        Self::Remove {
            runtime: Arc::clone(runtime),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn group(label: impl Into<String>, commands: Vec<Command>) -> Self {
        Self::Group {
            label: label.into(),
            commands,
        }
    }

    #[must_use]
    pub fn noop(label: impl Into<String>) -> Self {
        Self::Noop {
            label: label.into(),
        }
    }

    /// Identity used to track retries across reconciliation cycles.
    ///
    /// The same logical action always yields the same id. A group's id is
    /// built from its children's ids in sorted order, so it does not depend on
    /// the order in which the children were enumerated.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Create { module, .. } => format!("create:{}", module.name),
            Self::Start { name, .. } => format!("start:{name}"),
            Self::Stop { name, .. } => format!("stop:{name}"),
            Self::Update { next, .. } => format!("update:{}", next.name),
            Self::Remove { name, .. } => format!("remove:{name}"),
            Self::Group { commands, .. } => {
                let mut ids: Vec<String> = commands.iter().map(Self::id).collect();
                ids.sort_unstable();
                format!("group[{}]", ids.join(","))
            }
            Self::Noop { label } => format!("noop:{label}"),
        }
    }

    /// Human-readable summary for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Create { module, .. } => {
                format!("create module {} from image {}", module.name, module.image)
            }
            Self::Start { name, .. } => format!("start module {name}"),
            Self::Stop { name, .. } => format!("stop module {name}"),
            Self::Update { current, next, .. } => format!(
                "update module {} from image {} to image {}",
                next.name, current.image, next.image
            ),
            Self::Remove { name, .. } => format!("remove module {name}"),
            Self::Group { label, commands } => {
                let steps: Vec<String> = commands.iter().map(Self::describe).collect();
                format!("{label}: [{}]", steps.join("; "))
            }
            Self::Noop { label } => format!("no-op ({label})"),
        }
    }

    /// Performs the side effect.
    ///
    /// The token is handed to the runtime; the command itself does not stop
    /// early when it is cancelled.
    pub fn execute<'a>(&'a self, cancel: &'a CancellationToken) -> CommandFuture<'a> {
        Box::pin(async move {
            match self {
                Self::Create { runtime, module } => runtime.create(module, cancel).await,
                Self::Start { runtime, name } => runtime.start(name, cancel).await,
                Self::Stop { runtime, name } => runtime.stop(name, cancel).await,
                Self::Update {
                    runtime,
                    current,
                    next,
                } => runtime.update(current, next, cancel).await,
                Self::Remove { runtime, name } => runtime.remove(name, cancel).await,
                Self::Group { label, commands } => {
                    for step in commands {
                        step.execute(cancel)
                            .await
                            .with_context(|| format!("{label}: step '{}' failed", step.id()))?;
                    }
                    Ok(())
                }
                Self::Noop { .. } => Ok(()),
            }
        })
    }

    /// Best-effort compensating action.
    ///
    /// Removal cannot be reverted and is a no-op. A group undoes every step in
    /// reverse order and reports the first error it saw.
    pub fn undo<'a>(&'a self, cancel: &'a CancellationToken) -> CommandFuture<'a> {
        Box::pin(async move {
            match self {
                Self::Create { runtime, module } => runtime.remove(&module.name, cancel).await,
                Self::Start { runtime, name } => runtime.stop(name, cancel).await,
                Self::Stop { runtime, name } => runtime.start(name, cancel).await,
                Self::Update {
                    runtime,
                    current,
                    next,
                } => runtime.update(next, current, cancel).await,
                Self::Remove { name, .. } => {
                    tracing::debug!(module = %name, "remove cannot be undone, skipping");
                    Ok(())
                }
                Self::Group { commands, .. } => {
                    let mut first_error = None;
                    for step in commands.iter().rev() {
                        if let Err(e) = step.undo(cancel).await {
                            tracing::warn!(
                                command_id = %step.id(),
                                error = %e,
                                "undo step failed"
                            );
                            first_error.get_or_insert(e);
                        }
                    }
                    first_error.map_or(Ok(()), Err)
                }
                Self::Noop { .. } => Ok(()),
            }
        })
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id())
            .field("description", &self.describe())
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct LogRuntime {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl LogRuntime {
        fn record(&self, call: String) -> anyhow::Result<()> {
            let fail = self.fail_on.is_some_and(|f| call == f);
            self.calls.lock().push(call);
            if fail {
                anyhow::bail!("runtime refused");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ModuleRuntime for LogRuntime {
        async fn create(&self, module: &Module, _: &CancellationToken) -> anyhow::Result<()> {
            self.record(format!("create {}", module.name))
        }
        async fn start(&self, name: &str, _: &CancellationToken) -> anyhow::Result<()> {
            self.record(format!("start {name}"))
        }
        async fn stop(&self, name: &str, _: &CancellationToken) -> anyhow::Result<()> {
            self.record(format!("stop {name}"))
        }
        async fn update(
            &self,
            current: &Module,
            next: &Module,
            _: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.record(format!("update {} {}->{}", next.name, current.image, next.image))
        }
        async fn remove(&self, name: &str, _: &CancellationToken) -> anyhow::Result<()> {
            self.record(format!("remove {name}"))
        }
    }

    fn runtime(fail_on: Option<&'static str>) -> (Arc<LogRuntime>, Arc<dyn ModuleRuntime>) {
        let rt = Arc::new(LogRuntime {
            calls: Mutex::new(Vec::new()),
            fail_on,
        });
        let dyn_rt: Arc<dyn ModuleRuntime> = rt.clone();
        (rt, dyn_rt)
    }

    #[test]
    fn ids_are_stable_per_action() {
        let (_, rt) = runtime(None);
        let a = Command::create(&rt, Module::new("hub", "hub:1"));
        let b = Command::create(&rt, Module::new("hub", "hub:2"));
        assert_eq!(a.id(), "create:hub");
        assert_eq!(a.id(), b.id());
        assert_eq!(Command::remove(&rt, "hub").id(), "remove:hub");
    }

    #[test]
    fn group_id_ignores_child_order() {
        let (_, rt) = runtime(None);
        let forward = Command::group(
            "secrets",
            vec![Command::start(&rt, "a"), Command::start(&rt, "b")],
        );
        let backward = Command::group(
            "secrets",
            vec![Command::start(&rt, "b"), Command::start(&rt, "a")],
        );
        assert_eq!(forward.id(), backward.id());
        assert_eq!(forward.id(), "group[start:a,start:b]");
    }

    #[tokio::test]
    async fn group_stops_at_first_failing_step() {
        let (log, rt) = runtime(Some("start a"));
        let cmd = Command::group(
            "bring-up",
            vec![
                Command::create(&rt, Module::new("a", "a:1")),
                Command::start(&rt, "a"),
                Command::start(&rt, "b"),
            ],
        );

        let err = cmd.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("runtime refused"));
        assert_eq!(*log.calls.lock(), vec!["create a", "start a"]);
    }

    #[tokio::test]
    async fn undo_reverses_actions() {
        let (log, rt) = runtime(None);
        let cancel = CancellationToken::new();
        let cmd = Command::group(
            "bring-up",
            vec![
                Command::create(&rt, Module::new("a", "a:1")),
                Command::start(&rt, "a"),
                Command::update(&rt, Module::new("b", "b:1"), Module::new("b", "b:2")),
                Command::remove(&rt, "c"),
            ],
        );

        cmd.undo(&cancel).await.unwrap();
        assert_eq!(*log.calls.lock(), vec!["update b b:2->b:1", "stop a", "remove a"]);
    }

    #[test]
    fn describe_mentions_images() {
        let (_, rt) = runtime(None);
        let cmd = Command::update(&rt, Module::new("hub", "hub:1"), Module::new("hub", "hub:2"));
        assert_eq!(
            cmd.describe(),
            "update module hub from image hub:1 to image hub:2"
        );
        assert_eq!(format!("{cmd}"), cmd.describe());
    }
}
