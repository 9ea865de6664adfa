//! Freshness state owned by the scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where the scheduler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No known update.
    #[default]
    Idle,
    /// A probe started from `Idle` is in flight.
    Checking,
    /// A stale build was detected and has not been acted on.
    UpdatePending,
    /// The user deferred the prompt; it reappears after the cool-down.
    Dismissed,
    /// Caches are being purged and the client reloaded. Terminal.
    Refreshing,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::UpdatePending => "update_pending",
            Self::Dismissed => "dismissed",
            Self::Refreshing => "refreshing",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Refreshing)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state exposed to the presentation layer.
///
/// `is_checking` is tracked separately from `phase` because a development-mode
/// client keeps probing while an update is already pending.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FreshnessState {
    pub phase: Phase,
    /// Set only by a stale probe result or a re-prompt; cleared by dismiss
    /// or refresh.
    pub update_available: bool,
    /// True strictly while a probe is in flight.
    pub is_checking: bool,
    /// End of the most recent probe attempt, success or failure.
    pub last_check: Option<DateTime<Utc>>,
}
