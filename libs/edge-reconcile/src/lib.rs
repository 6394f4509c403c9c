#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Reconciliation core for edge module orchestration.
//!
//! Given the desired and the currently running [`ModuleSet`], a [`Diff`] is
//! computed, turned into an ordered [`Plan`] of [`Command`]s, and executed by a
//! [`PlanRunner`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use edge_reconcile::{DeploymentId, ModuleRuntime, ModuleSet, PlanRunner, Planner, RunnerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn reconcile(runtime: Arc<dyn ModuleRuntime>, desired: ModuleSet, current: ModuleSet) -> anyhow::Result<()> {
//! let runner = edge_reconcile::build_runner(&RunnerConfig::load(None)?)?;
//! let plan = Planner::new(runtime).plan_for(&desired, &current);
//! let converged = runner.execute(DeploymentId(42), &plan, &CancellationToken::new()).await?;
//! # let _ = converged;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod diff;
pub mod error;
pub mod model;
pub mod plan;
pub mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, ModuleRuntime};
pub use config::{ConfigError, RunnerConfig, RunnerStrategy};
pub use diff::Diff;
pub use error::{
    CommandFailure, DefaultFailureClassifier, ExecutionFailure, FailureClassifier, FatalError,
    PlanRunnerError,
};
pub use model::{ModelError, Module, ModuleSet, ModuleStatus, RestartPolicy};
pub use plan::{Plan, Planner};
pub use runner::{
    CommandRunStats, DeploymentId, OrderedPlanRunner, OrderedRetryPlanRunner, PlanRunner,
    RunDecision, build_runner,
};
