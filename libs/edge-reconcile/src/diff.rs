use std::collections::BTreeSet;

use crate::model::{ModelError, Module};

/// Delta between two [`ModuleSet`](crate::ModuleSet)s.
///
/// A module name appears in at most one of the two lists. The empty diff means
/// no action is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    updated: Vec<Module>,
    removed: Vec<String>,
}

impl Diff {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a diff from modules to create or update and names to remove.
    ///
    /// # Errors
    /// Returns [`ModelError::DuplicateModule`] if a name repeats within one
    /// list, or [`ModelError::ConflictingDiff`] if a name is in both.
    pub fn new(updated: Vec<Module>, removed: Vec<String>) -> Result<Self, ModelError> {
        let mut updated_names = BTreeSet::new();
        for module in &updated {
            if !updated_names.insert(module.name.as_str()) {
                return Err(ModelError::DuplicateModule {
                    name: module.name.clone(),
                });
            }
        }

        let mut removed_names = BTreeSet::new();
        for name in &removed {
            if updated_names.contains(name.as_str()) {
                return Err(ModelError::ConflictingDiff { name: name.clone() });
            }
            if !removed_names.insert(name.as_str()) {
                return Err(ModelError::DuplicateModule { name: name.clone() });
            }
        }

        Ok(Self::from_disjoint(updated, removed))
    }

    /// Callers guarantee the lists are disjoint and free of duplicates.
    pub(crate) fn from_disjoint(updated: Vec<Module>, removed: Vec<String>) -> Self {
        Self { updated, removed }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }

    /// Modules to create, or whose configuration changed.
    #[must_use]
    pub fn updated(&self) -> &[Module] {
        &self.updated
    }

    /// Names present in the current state but absent from the desired state.
    #[must_use]
    pub fn removed(&self) -> &[String] {
        &self.removed
    }
}
