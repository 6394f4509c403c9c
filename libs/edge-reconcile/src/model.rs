//! Module and module set snapshots.
//!
//! A [`ModuleSet`] is the unit being reconciled: one snapshot of either the
//! desired or the currently running workload. Sets are never mutated after
//! construction; derived sets are produced with [`ModuleSet::with_module`] and
//! [`ModuleSet::without_module`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diff::Diff;

/// Errors raised while assembling model values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("module name must not be empty")]
    EmptyName,
    #[error("duplicate module '{name}'")]
    DuplicateModule { name: String },
    #[error("module '{name}' appears in both the update and removal lists")]
    ConflictingDiff { name: String },
}

/// When the runtime should restart a module that exited.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    Never,
    OnFailure,
    OnUnhealthy,
    #[default]
    Always,
}

/// Runtime status the module is expected to be in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    #[default]
    Running,
    Stopped,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// A named unit of workload configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub desired_status: ModuleStatus,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            restart_policy: RestartPolicy::default(),
            desired_status: ModuleStatus::default(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    #[must_use]
    pub fn with_desired_status(mut self, status: ModuleStatus) -> Self {
        self.desired_status = status;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Immutable mapping from module name to [`Module`].
///
/// Cloning is cheap: the map is shared behind an `Arc` and only copied when a
/// derived set is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSet {
    modules: Arc<BTreeMap<String, Module>>,
}

impl ModuleSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from modules, keyed by their names.
    ///
    /// # Errors
    /// Returns [`ModelError::EmptyName`] for a module without a name and
    /// [`ModelError::DuplicateModule`] when two modules share a name.
    pub fn from_modules<I>(modules: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = Module>,
    {
        let mut map = BTreeMap::new();
        for module in modules {
            if module.name.is_empty() {
                return Err(ModelError::EmptyName);
            }
            if map.contains_key(&module.name) {
                return Err(ModelError::DuplicateModule { name: module.name });
            }
            map.insert(module.name.clone(), module);
        }
        Ok(Self {
            modules: Arc::new(map),
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Modules in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Returns a new set with `module` added or replacing the entry of the same name.
    #[must_use]
    pub fn with_module(&self, module: Module) -> Self {
        let mut map = BTreeMap::clone(&self.modules);
        map.insert(module.name.clone(), module);
        Self {
            modules: Arc::new(map),
        }
    }

    /// Returns a new set without the module called `name`.
    #[must_use]
    pub fn without_module(&self, name: &str) -> Self {
        if !self.contains(name) {
            return self.clone();
        }
        let mut map = BTreeMap::clone(&self.modules);
        map.remove(name);
        Self {
            modules: Arc::new(map),
        }
    }

    /// Computes the changes needed to move from `current` to `self`.
    ///
    /// Modules missing from `current` or whose configuration differs are
    /// updates; names only present in `current` are removals.
    #[must_use]
    pub fn diff(&self, current: &ModuleSet) -> Diff {
        let updated: Vec<Module> = self
            .iter()
            .filter(|desired| current.get(&desired.name) != Some(*desired))
            .cloned()
            .collect();

        let removed: Vec<String> = current
            .names()
            .filter(|name| !self.contains(name))
            .map(str::to_owned)
            .collect();

        Diff::from_disjoint(updated, removed)
    }
}

impl<'a> IntoIterator for &'a ModuleSet {
    type Item = &'a Module;
    type IntoIter = std::collections::btree_map::Values<'a, String, Module>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.values()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn module(name: &str, image: &str) -> Module {
        Module::new(name, image)
    }

    #[test]
    fn from_modules_rejects_duplicates() {
        let err = ModuleSet::from_modules([module("a", "img:1"), module("a", "img:2")])
            .expect_err("duplicate names must be rejected");
        assert_eq!(
            err,
            ModelError::DuplicateModule {
                name: "a".to_owned()
            }
        );
    }

    #[test]
    fn from_modules_rejects_empty_name() {
        let err = ModuleSet::from_modules([module("", "img:1")]).unwrap_err();
        assert_eq!(err, ModelError::EmptyName);
    }

    #[test]
    fn derived_sets_leave_original_untouched() {
        let base = ModuleSet::from_modules([module("a", "img:1")]).unwrap();
        let added = base.with_module(module("b", "img:1"));
        let removed = added.without_module("a");

        assert_eq!(base.len(), 1);
        assert_eq!(added.len(), 2);
        assert_eq!(removed.names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn diff_detects_new_changed_and_removed_modules() {
        let current = ModuleSet::from_modules([
            module("same", "img:1"),
            module("changed", "img:1"),
            module("gone", "img:1"),
        ])
        .unwrap();
        let desired = ModuleSet::from_modules([
            module("same", "img:1"),
            module("changed", "img:2"),
            module("fresh", "img:1"),
        ])
        .unwrap();

        let diff = desired.diff(&current);

        let updated: Vec<_> = diff.updated().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(updated, vec!["changed", "fresh"]);
        assert_eq!(diff.removed(), ["gone".to_owned()]);
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let set = ModuleSet::from_modules([module("a", "img:1").with_env("K", "V")]).unwrap();
        assert!(set.diff(&set.clone()).is_empty());
    }

    #[test]
    fn module_deserializes_with_defaults() {
        let module: Module =
            serde_json::from_str(r#"{"name":"edge","image":"edge:1.0"}"#).unwrap();
        assert_eq!(module.restart_policy, RestartPolicy::Always);
        assert_eq!(module.desired_status, ModuleStatus::Running);
        assert!(module.env.is_empty());
    }
}
