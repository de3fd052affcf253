//! Statistics generation from the frontier database
//!
//! This module provides functionality for extracting and displaying
//! per-session statistics from the store.

use crate::state::{FrontierCounts, LinkStatus, SessionPhase};
use crate::storage::{FrontierStore, SessionRecord};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Session statistics summary
#[derive(Debug, Clone)]
pub struct SessionStatistics {
    pub session: SessionRecord,

    /// Pages stored for the session
    pub pages: u64,

    /// Count of links by status
    pub links_by_status: BTreeMap<LinkStatus, u64>,

    /// Claims older than the staleness threshold
    pub stale_claims: u64,

    /// Phase observed when the statistics were loaded
    pub phase: SessionPhase,
}

impl SessionStatistics {
    /// Budget units spent so far, including reservations that produced no page
    pub fn budget_spent(&self) -> i64 {
        self.session.initial_budget - self.session.remaining_budget.max(0)
    }

    pub fn total_links(&self) -> u64 {
        self.links_by_status.values().sum()
    }
}

/// Loads statistics for one session
///
/// # Arguments
///
/// * `store` - The store to query
/// * `session_id` - The session to describe
/// * `stale_before` - Claims taken at or before this instant count as stale
///
/// # Returns
///
/// * `Ok(SessionStatistics)` - Successfully loaded statistics
/// * `Err(CrawlError)` - The session does not exist or a query failed
pub fn load_statistics(
    store: &dyn FrontierStore,
    session_id: i64,
    stale_before: DateTime<Utc>,
) -> Result<SessionStatistics, CrawlError> {
    let session = store
        .get_session(session_id)?
        .ok_or(CrawlError::SessionNotFound(session_id))?;

    let pages = store.count_pages(session_id)?;
    let counts: FrontierCounts = store.frontier_counts(session_id, stale_before)?;

    let links_by_status = BTreeMap::from([
        (LinkStatus::Pending, counts.pending),
        (LinkStatus::Claimed, counts.claimed),
        (LinkStatus::Done, counts.done),
    ]);

    Ok(SessionStatistics {
        phase: SessionPhase::observe(session.remaining_budget, &counts),
        session,
        pages,
        links_by_status,
        stale_claims: counts.stale,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &SessionStatistics) {
    println!("=== Session {} ===\n", stats.session.id);

    println!("Overview:");
    println!("  Seed URL: {}", stats.session.url);
    println!("  Created: {}", stats.session.created_at);
    println!("  Phase: {}", stats.phase);
    println!();

    println!("Budget:");
    println!("  Initial: {}", stats.session.initial_budget);
    println!("  Remaining: {}", stats.session.remaining_budget.max(0));
    println!("  Spent: {}", stats.budget_spent());
    println!("  Pages stored: {}", stats.pages);
    println!();

    let total = stats.total_links();
    println!("Links by Status ({} total):", total);
    for (status, count) in &stats.links_by_status {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }

    if stats.stale_claims > 0 {
        println!();
        println!(
            "Stale claims: {} (run with --reconcile to resolve them)",
            stats.stale_claims
        );
    }
}
