//! Failure types produced by plan runners.
//!
//! Command bodies report errors as [`anyhow::Error`]. A [`FailureClassifier`]
//! decides whether an error is fatal (abort the pass) or a regular command
//! failure (record it and continue). Recorded failures are surfaced together
//! as one [`ExecutionFailure`] per pass.

use std::fmt;
use std::sync::Arc;

/// Marker for host-level faults that must abort a pass immediately.
///
/// Commands signal a fatal condition by returning this error, directly or
/// anywhere in the error chain.
#[derive(thiserror::Error, Debug)]
#[error("fatal: {reason}")]
pub struct FatalError {
    reason: String,
}

impl FatalError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Policy that separates fatal errors from regular command failures.
pub trait FailureClassifier: Send + Sync {
    fn is_fatal(&self, error: &anyhow::Error) -> bool;
}

/// Treats [`FatalError`] and out-of-memory I/O errors as fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFailureClassifier;

impl FailureClassifier for DefaultFailureClassifier {
    fn is_fatal(&self, error: &anyhow::Error) -> bool {
        error.chain().any(|cause| {
            cause.is::<FatalError>()
                || cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::OutOfMemory)
        })
    }
}

/// One command that failed during a pass.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    command_id: String,
    description: String,
    error: Arc<anyhow::Error>,
}

impl CommandFailure {
    pub(crate) fn new(command_id: String, description: String, error: Arc<anyhow::Error>) -> Self {
        Self {
            command_id,
            description,
            error,
        }
    }

    #[must_use]
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command '{}' failed: {:#}", self.command_id, self.error)
    }
}

impl std::error::Error for CommandFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + Send + Sync + 'static) = (*self.error).as_ref();
        Some(inner)
    }
}

/// Composite failure carrying every command failure of one pass, in the
/// order they occurred.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    failures: Vec<CommandFailure>,
}

impl ExecutionFailure {
    pub(crate) fn new(failures: Vec<CommandFailure>) -> Self {
        Self { failures }
    }

    #[must_use]
    pub fn failures(&self) -> &[CommandFailure] {
        &self.failures
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn into_failures(self) -> Vec<CommandFailure> {
        self.failures
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} command(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|first| first as &(dyn std::error::Error + 'static))
    }
}

/// Error returned by [`PlanRunner::execute`](crate::runner::PlanRunner::execute).
#[derive(thiserror::Error, Debug)]
pub enum PlanRunnerError {
    #[error("plan execution failed: {0}")]
    Failed(#[source] ExecutionFailure),
    #[error("fatal error while executing command '{command_id}'")]
    Fatal {
        command_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PlanRunnerError {
    /// Command failures of the pass; empty for a fatal error.
    #[must_use]
    pub fn failures(&self) -> &[CommandFailure] {
        match self {
            Self::Failed(composite) => composite.failures(),
            Self::Fatal { .. } => &[],
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn fatal_marker_is_found_through_context() {
        let err = Err::<(), _>(FatalError::new("disk gone"))
            .context("creating module")
            .unwrap_err();
        assert!(DefaultFailureClassifier.is_fatal(&err));
    }

    #[test]
    fn out_of_memory_is_fatal() {
        let err = anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::OutOfMemory));
        assert!(DefaultFailureClassifier.is_fatal(&err));
    }

    #[test]
    fn ordinary_errors_are_not_fatal() {
        let err = anyhow::anyhow!("image pull failed");
        assert!(!DefaultFailureClassifier.is_fatal(&err));
        let io = anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(!DefaultFailureClassifier.is_fatal(&io));
    }

    #[test]
    fn composite_lists_every_failure() {
        let composite = ExecutionFailure::new(vec![
            CommandFailure::new(
                "create:a".to_owned(),
                "create module a".to_owned(),
                Arc::new(anyhow::anyhow!("boom")),
            ),
            CommandFailure::new(
                "start:b".to_owned(),
                "start module b".to_owned(),
                Arc::new(anyhow::anyhow!("bang")),
            ),
        ]);

        let text = composite.to_string();
        assert!(text.starts_with("2 command(s) failed"));
        assert!(text.contains("create:a"));
        assert!(text.contains("bang"));

        let err = PlanRunnerError::Failed(composite);
        assert_eq!(err.failures().len(), 2);
        assert!(!err.is_fatal());
    }
}
