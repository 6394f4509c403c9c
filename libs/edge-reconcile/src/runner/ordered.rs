use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CommandOutcome, DeploymentId, PlanRunner, finish_pass, run_command};
use crate::error::{CommandFailure, DefaultFailureClassifier, FailureClassifier, PlanRunnerError};
use crate::plan::Plan;

/// Runs every command of a plan once, in order.
///
/// Stateless across calls; the deployment id is only used for diagnostics.
pub struct OrderedPlanRunner {
    classifier: Arc<dyn FailureClassifier>,
}

impl OrderedPlanRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            classifier: Arc::new(DefaultFailureClassifier),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

impl Default for OrderedPlanRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanRunner for OrderedPlanRunner {
    async fn execute(
        &self,
        deployment_id: DeploymentId,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<bool, PlanRunnerError> {
        tracing::info!(%deployment_id, commands = plan.len(), "executing plan");

        let mut failures = Vec::new();
        for command in plan {
            if cancel.is_cancelled() {
                tracing::info!(%deployment_id, "plan execution cancelled");
                break;
            }

            let command_id = command.id();
            let outcome = run_command(
                deployment_id,
                command,
                &command_id,
                cancel,
                self.classifier.as_ref(),
            )
            .await?;

            if let CommandOutcome::Failed(error) = outcome {
                failures.push(CommandFailure::new(command_id, command.describe(), error));
            }
        }

        finish_pass(deployment_id, failures)?;
        Ok(true)
    }
}
