//! Ordered runner with per-command exponential backoff.
//!
//! Retry state survives across calls for the same deployment:
//!
//! - a command that fails is held back for `cool_off_unit * 2^run_count`
//!   before it may be attempted again;
//! - after `max_run_count` consecutive failures it is not attempted again;
//! - a success resets the command's state;
//! - a different deployment id clears the state of every command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::stats::{self, CommandRunStats, RunDecision};
use super::{CommandOutcome, DeploymentId, PlanRunner, finish_pass, run_command};
use crate::clock::Clock;
use crate::config::ConfigError;
use crate::error::{CommandFailure, DefaultFailureClassifier, FailureClassifier, PlanRunnerError};
use crate::plan::Plan;

fn duration_to_u64_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Default)]
struct RetryState {
    last_deployment: Option<DeploymentId>,
    stats: HashMap<String, CommandRunStats>,
}

impl RetryState {
    fn observe_deployment(&mut self, deployment_id: DeploymentId) {
        let previous = self.last_deployment.replace(deployment_id);
        if let Some(previous) = previous.filter(|previous| *previous != deployment_id) {
            tracing::info!(
                %previous,
                %deployment_id,
                tracked = self.stats.len(),
                "new deployment detected, clearing command retry state"
            );
            self.stats.clear();
        }
    }
}

/// Ordered runner that backs off commands which keep failing.
///
/// `execute` calls on one instance are serialized; a second call waits for
/// the first to finish.
pub struct OrderedRetryPlanRunner {
    max_run_count: u32,
    cool_off_unit: Duration,
    clock: Arc<dyn Clock>,
    classifier: Arc<dyn FailureClassifier>,
    state: Mutex<RetryState>,
}

impl OrderedRetryPlanRunner {
    /// # Errors
    /// Returns [`ConfigError::InvalidMaxRunCount`] when `max_run_count` is zero.
    pub fn new(
        max_run_count: u32,
        cool_off_unit: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        if max_run_count == 0 {
            return Err(ConfigError::InvalidMaxRunCount);
        }
        Ok(Self {
            max_run_count,
            cool_off_unit,
            clock,
            classifier: Arc::new(DefaultFailureClassifier),
            state: Mutex::new(RetryState::default()),
        })
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn max_run_count(&self) -> u32 {
        self.max_run_count
    }

    #[must_use]
    pub fn cool_off_unit(&self) -> Duration {
        self.cool_off_unit
    }

    /// Snapshot of the retry state, keyed by command id.
    ///
    /// Waits for a running `execute` call to finish.
    pub async fn run_stats(&self) -> HashMap<String, CommandRunStats> {
        self.state.lock().await.stats.clone()
    }

    fn report_skip(deployment_id: DeploymentId, command_id: &str, decision: RunDecision) {
        match decision {
            RunDecision::Run => {}
            RunDecision::CoolingOff {
                run_count,
                cool_off,
                elapsed,
            } => {
                tracing::warn!(
                    %deployment_id,
                    command_id,
                    run_count,
                    cool_off_ms = duration_to_u64_ms(cool_off),
                    elapsed_ms = duration_to_u64_ms(elapsed),
                    "skipping command, still cooling off after previous failure"
                );
            }
            RunDecision::GaveUp {
                run_count,
                first_notice: true,
            } => {
                tracing::error!(
                    %deployment_id,
                    command_id,
                    run_count,
                    "giving up on command after reaching the maximum run count"
                );
            }
            RunDecision::GaveUp {
                run_count,
                first_notice: false,
            } => {
                tracing::debug!(
                    %deployment_id,
                    command_id,
                    run_count,
                    "skipping command, already gave up"
                );
            }
        }
    }
}

#[async_trait]
impl PlanRunner for OrderedRetryPlanRunner {
    async fn execute(
        &self,
        deployment_id: DeploymentId,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<bool, PlanRunnerError> {
        let mut state = self.state.lock().await;
        state.observe_deployment(deployment_id);

        tracing::info!(%deployment_id, commands = plan.len(), "executing plan");

        let mut failures = Vec::new();
        let mut skipped = 0_usize;

        for command in plan {
            if cancel.is_cancelled() {
                tracing::info!(%deployment_id, "plan execution cancelled");
                break;
            }

            let command_id = command.id();
            let decision = stats::decide(
                state.stats.get_mut(&command_id),
                self.clock.utc_now(),
                self.max_run_count,
                self.cool_off_unit,
            );
            if !decision.should_run() {
                skipped += 1;
                Self::report_skip(deployment_id, &command_id, decision);
                continue;
            }

            let outcome = run_command(
                deployment_id,
                command,
                &command_id,
                cancel,
                self.classifier.as_ref(),
            )
            .await?;

            match outcome {
                CommandOutcome::Succeeded => {
                    if let Some(entry) = state.stats.get_mut(&command_id) {
                        if !entry.is_reset() {
                            tracing::info!(
                                %deployment_id,
                                command_id = %command_id,
                                previous_failures = entry.run_count(),
                                "command succeeded after previous failures"
                            );
                        }
                        *entry = CommandRunStats::reset();
                    }
                }
                CommandOutcome::Failed(error) => {
                    let now = self.clock.utc_now();
                    state
                        .stats
                        .entry(command_id.clone())
                        .and_modify(|entry| entry.record_failure(now, Arc::clone(&error)))
                        .or_insert_with(|| CommandRunStats::first_failure(now, Arc::clone(&error)));
                    failures.push(CommandFailure::new(command_id, command.describe(), error));
                }
            }
        }

        if skipped > 0 {
            tracing::info!(%deployment_id, skipped, "plan left commands for a later pass");
        }

        finish_pass(deployment_id, failures)?;
        Ok(skipped == 0)
    }
}
