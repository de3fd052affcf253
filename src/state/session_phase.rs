//! Session phase as observed by a worker
//!
//! The phase is derived from the remaining budget and the frontier counts at
//! the moment of observation. It is never stored: two workers observing the
//! same session a few milliseconds apart may legitimately disagree.

use std::fmt;

/// Snapshot of a session's frontier, split by link status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub pending: u64,
    pub claimed: u64,
    /// Claimed links older than the staleness threshold (a subset of `claimed`)
    pub stale: u64,
    pub done: u64,
}

impl FrontierCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.done
    }
}

/// Phase of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Budget remains; workers keep claiming links
    Active,

    /// Budget is spent; claims still in flight are allowed to finish
    Draining,

    /// Budget is spent and at least one claim has gone stale
    Reconciling,

    /// Nothing left to do: no claims outstanding, and either the budget is
    /// spent or the frontier is empty
    Terminal,
}

impl SessionPhase {
    /// Derives the phase from a budget reading and frontier counts
    pub fn observe(remaining_budget: i64, counts: &FrontierCounts) -> Self {
        let has_budget = remaining_budget > 0;

        if !has_budget && counts.stale > 0 {
            Self::Reconciling
        } else if has_budget && (counts.pending > 0 || counts.claimed > 0) {
            Self::Active
        } else if counts.claimed > 0 {
            Self::Draining
        } else {
            Self::Terminal
        }
    }

    /// Returns true if workers should keep claiming new links
    pub fn accepts_claims(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Reconciling => "reconciling",
            Self::Terminal => "terminal",
        };
        write!(f, "{}", name)
    }
}
