//! Storage traits and error types
//!
//! This module defines the Frontier Store contract and its error type.

use crate::state::{FrontierCounts, LinkStatus};
use crate::storage::{
    DiscoveredLink, LinkRecord, NewPage, PageRecord, ReclaimOutcome, SessionRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// A page for this (session, link) already exists
    #[error("Duplicate page for session {session_id}: {link}")]
    DuplicatePage { session_id: i64, link: String },

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Returns true for failures that are expected to clear on retry
    ///
    /// Lock contention between worker processes and IO hiccups on the
    /// database file fall in this class; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Contract of the shared Frontier Store
///
/// Each mutating method must be implementable as one atomic read-modify-write
/// of one record, or one insert. Callers never read a record and write it back
/// separately; they go through these methods.
pub trait FrontierStore {
    // ===== Sessions =====

    /// Creates a session for `url` with `initial_budget` pages to spend
    fn create_session(&mut self, url: &str, initial_budget: i64) -> StoreResult<SessionRecord>;

    /// Finds the most recent session for a seed URL
    ///
    /// Returns `None` while the session write is not yet visible.
    fn find_session_by_url(&self, url: &str) -> StoreResult<Option<SessionRecord>>;

    /// Gets a session by ID
    fn get_session(&self, session_id: i64) -> StoreResult<Option<SessionRecord>>;

    /// Atomically decrements the remaining budget and returns the session
    /// as it is after the decrement
    fn decrement_budget(&mut self, session_id: i64) -> StoreResult<SessionRecord>;

    // ===== Pages =====

    /// Inserts a page and returns its ID
    ///
    /// Fails with [`StoreError::DuplicatePage`] if the (session, link) pair
    /// already exists.
    fn insert_page(&mut self, page: &NewPage<'_>) -> StoreResult<i64>;

    /// Finds the page stored for a canonical link in a session
    fn find_page(&self, session_id: i64, link: &str) -> StoreResult<Option<PageRecord>>;

    /// Counts pages stored for a session
    fn count_pages(&self, session_id: i64) -> StoreResult<u64>;

    /// Lists all pages of a session, oldest first
    fn list_pages(&self, session_id: i64) -> StoreResult<Vec<PageRecord>>;

    // ===== Frontier =====

    /// Appends discovered links to the frontier as `Pending`
    ///
    /// An empty batch is a no-op. Links are not deduplicated against the
    /// existing frontier.
    fn insert_links(
        &mut self,
        page_id: i64,
        session_id: i64,
        links: &[DiscoveredLink],
    ) -> StoreResult<()>;

    /// Atomically moves one `Pending` link of the session to `Claimed`
    ///
    /// Returns `None` when no pending link is visible. Polling is the
    /// caller's job.
    fn claim_next_pending_link(&mut self, session_id: i64) -> StoreResult<Option<LinkRecord>>;

    /// Atomically moves a specific link from `Pending` to `Claimed`
    fn claim_link(&mut self, link_id: i64) -> StoreResult<Option<LinkRecord>>;

    /// Resolves one claim taken at or before `claimed_before`
    ///
    /// The link returns to `Pending` if no page exists for it, or becomes
    /// `Done` if one does. The decision and the write are one statement.
    fn reclaim_stale_claim(
        &mut self,
        session_id: i64,
        claimed_before: DateTime<Utc>,
    ) -> StoreResult<Option<ReclaimOutcome>>;

    /// Moves a `Claimed` link to `Done`
    ///
    /// Returns false if the link was not claimed (already done, or reclaimed).
    fn mark_done(&mut self, link_id: i64) -> StoreResult<bool>;

    /// Gets a link by ID
    fn get_link(&self, link_id: i64) -> StoreResult<Option<LinkRecord>>;

    /// Counts links of a session in one status
    fn count_links_by_status(&self, session_id: i64, status: LinkStatus) -> StoreResult<u64>;

    /// Counts a session's links by status, flagging claims taken at or
    /// before `stale_before`
    fn frontier_counts(
        &self,
        session_id: i64,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<FrontierCounts>;
}
