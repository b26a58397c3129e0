//! # Scheduling
//!
//! Reconcile-rate tiers and the drift detector deciding, per tick, whether a
//! full resync is needed.

use std::time::Duration;
use tracing::warn;

/// Subscription-declared reconcile rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileRate {
    /// Reconcile once at start, then only on external triggers
    Off,
    Low,
    #[default]
    Medium,
    High,
}

/// Timing of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSchedule {
    /// Period between ticks, `None` for the `off` tier
    pub period: Option<Duration>,
    /// Sleep between attempts of the initial invocation
    pub retry_interval: Duration,
    /// Extra attempts of the initial invocation
    pub retries: u32,
}

impl ReconcileRate {
    /// Parse the `reconcile-rate` annotation; unknown values fall back to medium
    #[must_use]
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Medium,
            Some(v) if v.eq_ignore_ascii_case("off") => Self::Off,
            Some(v) if v.eq_ignore_ascii_case("low") => Self::Low,
            Some(v) if v.eq_ignore_ascii_case("medium") => Self::Medium,
            Some(v) if v.eq_ignore_ascii_case("high") => Self::High,
            Some(other) => {
                warn!("Unknown reconcile rate '{other}', using medium");
                Self::Medium
            }
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileRate::Off => "off",
            ReconcileRate::Low => "low",
            ReconcileRate::Medium => "medium",
            ReconcileRate::High => "high",
        }
    }

    #[must_use]
    pub fn schedule(&self) -> SyncSchedule {
        match self {
            ReconcileRate::Off => SyncSchedule {
                period: None,
                retry_interval: Duration::from_secs(120),
                retries: 3,
            },
            ReconcileRate::Low => SyncSchedule {
                period: Some(Duration::from_secs(60 * 60)),
                retry_interval: Duration::from_secs(180),
                retries: 3,
            },
            ReconcileRate::Medium => SyncSchedule {
                period: Some(Duration::from_secs(180)),
                retry_interval: Duration::from_secs(90),
                retries: 1,
            },
            ReconcileRate::High => SyncSchedule {
                period: Some(Duration::from_secs(120)),
                retry_interval: Duration::from_secs(60),
                retries: 1,
            },
        }
    }

    /// Only the medium tier may skip ticks on an unchanged commit
    #[must_use]
    pub fn skips_unchanged_commits(&self) -> bool {
        matches!(self, ReconcileRate::Medium)
    }
}

/// Decision of the drift detector for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Commit unchanged and last apply succeeded inside the skip window
    Skip,
    /// Fetch, classify and apply
    FullResync(ResyncReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    FirstRun,
    NewCommit,
    LastAttemptFailed,
    Forced,
    /// Tiers other than medium resync on every tick
    EveryTick,
}

impl ResyncReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResyncReason::FirstRun => "first-run",
            ResyncReason::NewCommit => "new-commit",
            ResyncReason::LastAttemptFailed => "last-attempt-failed",
            ResyncReason::Forced => "forced",
            ResyncReason::EveryTick => "every-tick",
        }
    }
}

/// Counts ticks since the last full resync of a medium-tier subscription.
///
/// Inside the window (`forced_resync_ticks - 1` ticks after a resync) a tick is
/// skipped when the remote commit equals the last applied one and that apply
/// succeeded. The tick that reaches `forced_resync_ticks` always resyncs.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    ticks_since_resync: u32,
    forced_resync_ticks: u32,
}

impl DriftDetector {
    #[must_use]
    pub fn new(forced_resync_ticks: u32) -> Self {
        Self {
            ticks_since_resync: 0,
            forced_resync_ticks: forced_resync_ticks.max(1),
        }
    }

    #[must_use]
    pub fn ticks_since_resync(&self) -> u32 {
        self.ticks_since_resync
    }

    pub fn reset(&mut self) {
        self.ticks_since_resync = 0;
    }

    /// Decide the current tick. Any full resync restarts the window.
    pub fn evaluate(
        &mut self,
        last_commit: Option<&str>,
        remote_commit: &str,
        last_successful: bool,
    ) -> SyncDecision {
        let Some(last_commit) = last_commit.filter(|c| !c.is_empty()) else {
            self.reset();
            return SyncDecision::FullResync(ResyncReason::FirstRun);
        };

        self.ticks_since_resync += 1;
        let decision = if self.ticks_since_resync >= self.forced_resync_ticks {
            SyncDecision::FullResync(ResyncReason::Forced)
        } else if last_commit != remote_commit {
            SyncDecision::FullResync(ResyncReason::NewCommit)
        } else if !last_successful {
            SyncDecision::FullResync(ResyncReason::LastAttemptFailed)
        } else {
            SyncDecision::Skip
        };

        if decision != SyncDecision::Skip {
            self.reset();
        }
        decision
    }
}
