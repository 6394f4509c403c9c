//! Plans and the planner that derives them from a [`Diff`].

use std::sync::Arc;

use crate::command::{Command, ModuleRuntime};
use crate::diff::Diff;
use crate::model::{ModuleSet, ModuleStatus};

/// An ordered sequence of commands for one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    commands: Vec<Command>,
}

impl Plan {
    #[must_use]
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

impl FromIterator<Command> for Plan {
    fn from_iter<T: IntoIterator<Item = Command>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Builds plans against a single runtime.
///
/// Ordering:
/// 1. removals, each as `stop` then `remove`;
/// 2. updates of modules already present in the current state;
/// 3. creations of new modules, followed by `start` when they should run.
///
/// An updated module whose desired status is stopped gets a trailing `stop`.
pub struct Planner {
    runtime: Arc<dyn ModuleRuntime>,
}

impl Planner {
    #[must_use]
    pub fn new(runtime: Arc<dyn ModuleRuntime>) -> Self {
        Self { runtime }
    }

    #[must_use]
    pub fn plan(&self, current: &ModuleSet, diff: &Diff) -> Plan {
        let mut commands = Vec::new();

        for name in diff.removed() {
            if current.contains(name) {
                commands.push(Command::stop(&self.runtime, name.as_str()));
            }
            commands.push(Command::remove(&self.runtime, name.as_str()));
        }

        let (changed, added): (Vec<_>, Vec<_>) = diff
            .updated()
            .iter()
            .partition(|module| current.contains(&module.name));

        for next in changed {
            let Some(existing) = current.get(&next.name) else {
                continue;
            };
            commands.push(Command::update(
                &self.runtime,
                existing.clone(),
                next.clone(),
            ));
            if next.desired_status == ModuleStatus::Stopped {
                commands.push(Command::stop(&self.runtime, next.name.as_str()));
            }
        }

        for module in added {
            commands.push(Command::create(&self.runtime, module.clone()));
            if module.desired_status == ModuleStatus::Running {
                commands.push(Command::start(&self.runtime, module.name.as_str()));
            }
        }

        tracing::debug!(
            removed = diff.removed().len(),
            updated = diff.updated().len(),
            commands = commands.len(),
            "built reconciliation plan"
        );

        Plan::new(commands)
    }

    /// Convenience wrapper: diff `desired` against `current` and plan the result.
    #[must_use]
    pub fn plan_for(&self, desired: &ModuleSet, current: &ModuleSet) -> Plan {
        self.plan(current, &desired.diff(current))
    }
}
