//! Plan runners.
//!
//! A runner executes the commands of a [`Plan`] in order, once per call,
//! continuing past regular command failures and aborting on fatal ones.
//! Two strategies are provided:
//!
//! - [`OrderedPlanRunner`] runs every command on every call;
//! - [`OrderedRetryPlanRunner`] additionally skips commands that keep failing,
//!   with an exponentially growing cool-off, until a new deployment arrives.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::clock::SystemClock;
use crate::command::Command;
use crate::config::{ConfigError, RunnerConfig, RunnerStrategy};
use crate::error::{CommandFailure, ExecutionFailure, FailureClassifier, PlanRunnerError};
use crate::plan::Plan;

pub mod ordered;
pub mod retry;
pub mod stats;

pub use ordered::OrderedPlanRunner;
pub use retry::OrderedRetryPlanRunner;
pub use stats::{CommandRunStats, RunDecision};

/// Marker distinguishing one deployment from the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(pub i64);

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for DeploymentId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Executes a reconciliation plan.
#[async_trait]
pub trait PlanRunner: Send + Sync {
    /// Runs `plan` for `deployment_id`.
    ///
    /// Returns `Ok(true)` when every command of the pass ran and succeeded,
    /// `Ok(false)` when some commands were held back and the state has not
    /// fully converged yet.
    ///
    /// # Errors
    /// [`PlanRunnerError::Failed`] when one or more commands failed;
    /// [`PlanRunnerError::Fatal`] when a command hit a fatal error.
    async fn execute(
        &self,
        deployment_id: DeploymentId,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<bool, PlanRunnerError>;
}

/// Builds the runner selected by `config`.
///
/// # Errors
/// Returns [`ConfigError`] when the configuration is invalid.
pub fn build_runner(config: &RunnerConfig) -> Result<Arc<dyn PlanRunner>, ConfigError> {
    config.validate()?;
    let runner: Arc<dyn PlanRunner> = match config.strategy {
        RunnerStrategy::Ordered => Arc::new(OrderedPlanRunner::new()),
        RunnerStrategy::OrderedRetry => Arc::new(OrderedRetryPlanRunner::new(
            config.max_run_count,
            config.cool_off_unit,
            Arc::new(SystemClock),
        )?),
    };
    tracing::debug!(strategy = ?config.strategy, "plan runner built");
    Ok(runner)
}

/// Result of running a single command that did not fail fatally.
pub(crate) enum CommandOutcome {
    Succeeded,
    Failed(Arc<anyhow::Error>),
}

/// Executes one command and classifies its error.
pub(crate) async fn run_command(
    deployment_id: DeploymentId,
    command: &Command,
    command_id: &str,
    cancel: &CancellationToken,
    classifier: &dyn FailureClassifier,
) -> Result<CommandOutcome, PlanRunnerError> {
    tracing::debug!(
        %deployment_id,
        command_id,
        command = %command.describe(),
        "executing command"
    );

    match command.execute(cancel).await {
        Ok(()) => Ok(CommandOutcome::Succeeded),
        Err(e) if classifier.is_fatal(&e) => {
            tracing::error!(
                %deployment_id,
                command_id,
                error = %format!("{e:#}"),
                "fatal error while executing command, aborting plan"
            );
            Err(PlanRunnerError::Fatal {
                command_id: command_id.to_owned(),
                source: e,
            })
        }
        Err(e) => {
            tracing::warn!(
                %deployment_id,
                command_id,
                error = %format!("{e:#}"),
                "command failed"
            );
            Ok(CommandOutcome::Failed(Arc::new(e)))
        }
    }
}

/// Turns the failures recorded during a pass into the pass result.
pub(crate) fn finish_pass(
    deployment_id: DeploymentId,
    failures: Vec<CommandFailure>,
) -> Result<(), PlanRunnerError> {
    if failures.is_empty() {
        tracing::info!(%deployment_id, "plan execution finished");
        return Ok(());
    }
    tracing::warn!(
        %deployment_id,
        failed = failures.len(),
        "plan execution finished with failures"
    );
    Err(PlanRunnerError::Failed(ExecutionFailure::new(failures)))
}
