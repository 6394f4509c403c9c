//! Per-command retry bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Retry state of one command, keyed by command id.
///
/// Absent until the command first fails. A success replaces it with the
/// [`reset`](Self::reset) value so a later failure starts backing off from the
/// first tier again.
#[derive(Debug, Clone)]
pub struct CommandRunStats {
    run_count: u32,
    last_run_utc: Option<DateTime<Utc>>,
    last_error: Option<Arc<anyhow::Error>>,
    give_up_reported: bool,
}

impl CommandRunStats {
    pub(crate) fn first_failure(now: DateTime<Utc>, error: Arc<anyhow::Error>) -> Self {
        Self {
            run_count: 1,
            last_run_utc: Some(now),
            last_error: Some(error),
            give_up_reported: false,
        }
    }

    pub(crate) fn reset() -> Self {
        Self {
            run_count: 0,
            last_run_utc: None,
            last_error: None,
            give_up_reported: false,
        }
    }

    pub(crate) fn record_failure(&mut self, now: DateTime<Utc>, error: Arc<anyhow::Error>) {
        self.run_count = self.run_count.saturating_add(1);
        self.last_run_utc = Some(now);
        self.last_error = Some(error);
        self.give_up_reported = false;
    }

    /// Marks the give-up as reported; returns `true` only the first time.
    pub(crate) fn report_give_up(&mut self) -> bool {
        !std::mem::replace(&mut self.give_up_reported, true)
    }

    /// Consecutive failed attempts.
    #[must_use]
    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    #[must_use]
    pub fn last_run_utc(&self) -> Option<DateTime<Utc>> {
        self.last_run_utc
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&anyhow::Error> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn is_reset(&self) -> bool {
        self.run_count == 0
    }
}

/// Whether a command should be attempted in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDecision {
    Run,
    /// Still inside the cool-off window of the last failure.
    CoolingOff {
        run_count: u32,
        cool_off: Duration,
        elapsed: Duration,
    },
    /// Reached the maximum attempt count for this deployment.
    GaveUp {
        run_count: u32,
        first_notice: bool,
    },
}

impl RunDecision {
    #[must_use]
    pub fn should_run(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Cool-off before the attempt following `run_count` failures: `unit * 2^run_count`.
pub(crate) fn cool_off_period(unit: Duration, run_count: u32) -> Duration {
    2_u32
        .checked_pow(run_count)
        .and_then(|factor| unit.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Decides whether the command owning `stats` may run at `now`.
pub(crate) fn decide(
    stats: Option<&mut CommandRunStats>,
    now: DateTime<Utc>,
    max_run_count: u32,
    cool_off_unit: Duration,
) -> RunDecision {
    let Some(stats) = stats else {
        return RunDecision::Run;
    };
    if stats.is_reset() {
        return RunDecision::Run;
    }
    if stats.run_count >= max_run_count {
        return RunDecision::GaveUp {
            run_count: stats.run_count,
            first_notice: stats.report_give_up(),
        };
    }

    let cool_off = cool_off_period(cool_off_unit, stats.run_count);
    let elapsed = stats
        .last_run_utc
        .map_or(Duration::MAX, |last| {
            now.signed_duration_since(last)
                .to_std()
                .unwrap_or(Duration::ZERO)
        });

    if elapsed > cool_off {
        RunDecision::Run
    } else {
        RunDecision::CoolingOff {
            run_count: stats.run_count,
            cool_off,
            elapsed,
        }
    }
}
