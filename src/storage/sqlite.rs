//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the FrontierStore
//! trait. Each worker opens its own connection to the same database file; the
//! database in WAL mode is what the workers share.

use crate::state::{FrontierCounts, LinkStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, StoreError, StoreResult};
use crate::storage::{
    timestamp, DiscoveredLink, LinkRecord, NewPage, PageRecord, ReclaimOutcome, SessionRecord,
};
use crate::url::canonical_link;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SESSION_COLUMNS: &str = "id, url, created_at, initial_budget, remaining_budget";

const PAGE_COLUMNS: &str = "id, session_id, link, content, title, metadata, created_at";

const LINK_COLUMNS: &str =
    "id, session_id, page_id, url, canonical, anchor_text, status, claimed_at, created_at";

/// SQLite-backed Frontier Store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the shared database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `busy_timeout` - How long to wait on a lock held by another worker
    ///   before the call fails with a transient error
    pub fn open(path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates a private in-memory database
    ///
    /// Only useful for single-connection tools and tests: nothing else can
    /// open the same database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        created_at: row.get(2)?,
        initial_budget: row.get(3)?,
        remaining_budget: row.get(4)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    let metadata: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(PageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        link: row.get(2)?,
        content: row.get(3)?,
        title: row.get(4)?,
        metadata,
        created_at: row.get(6)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LinkRecord> {
    let status: String = row.get(6)?;
    let status = LinkStatus::from_db_string(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown link status '{}'", status).into(),
        )
    })?;

    Ok(LinkRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        page_id: row.get(2)?,
        url: row.get(3)?,
        canonical: row.get(4)?,
        anchor_text: row.get(5)?,
        status,
        claimed_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl FrontierStore for SqliteStore {
    // ===== Sessions =====

    fn create_session(&mut self, url: &str, initial_budget: i64) -> StoreResult<SessionRecord> {
        let now = timestamp(Utc::now());
        let session = self.conn.query_row(
            &format!(
                "INSERT INTO sessions (url, created_at, initial_budget, remaining_budget)
                 VALUES (?1, ?2, ?3, ?3) RETURNING {}",
                SESSION_COLUMNS
            ),
            params![url, now, initial_budget],
            session_from_row,
        )?;
        Ok(session)
    }

    fn find_session_by_url(&self, url: &str) -> StoreResult<Option<SessionRecord>> {
        let session = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE url = ?1 ORDER BY id DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                params![url],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn get_session(&self, session_id: i64) -> StoreResult<Option<SessionRecord>> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn decrement_budget(&mut self, session_id: i64) -> StoreResult<SessionRecord> {
        self.conn
            .query_row(
                &format!(
                    "UPDATE sessions SET remaining_budget = remaining_budget - 1
                     WHERE id = ?1 RETURNING {}",
                    SESSION_COLUMNS
                ),
                params![session_id],
                session_from_row,
            )
            .optional()?
            .ok_or(StoreError::SessionNotFound(session_id))
    }

    // ===== Pages =====

    fn insert_page(&mut self, page: &NewPage<'_>) -> StoreResult<i64> {
        let metadata = serde_json::to_string(page.metadata)?;
        let now = timestamp(Utc::now());

        let result = self.conn.execute(
            "INSERT INTO pages (session_id, link, content, title, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                page.session_id,
                page.link,
                page.content,
                page.title,
                metadata,
                now
            ],
        );

        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StoreError::DuplicatePage {
                    session_id: page.session_id,
                    link: page.link.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_page(&self, session_id: i64, link: &str) -> StoreResult<Option<PageRecord>> {
        let page = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM pages WHERE session_id = ?1 AND link = ?2",
                    PAGE_COLUMNS
                ),
                params![session_id, link],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn count_pages(&self, session_id: i64) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn list_pages(&self, session_id: i64) -> StoreResult<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pages WHERE session_id = ?1 ORDER BY id",
            PAGE_COLUMNS
        ))?;

        let pages = stmt
            .query_map(params![session_id], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }

    // ===== Frontier =====

    fn insert_links(
        &mut self,
        page_id: i64,
        session_id: i64,
        links: &[DiscoveredLink],
    ) -> StoreResult<()> {
        if links.is_empty() {
            return Ok(());
        }

        let now = timestamp(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO links
                     (session_id, page_id, url, canonical, anchor_text, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for link in links {
                stmt.execute(params![
                    session_id,
                    page_id,
                    link.url,
                    canonical_link(&link.url),
                    link.anchor_text,
                    LinkStatus::Pending.to_db_string(),
                    now
                ])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn claim_next_pending_link(&mut self, session_id: i64) -> StoreResult<Option<LinkRecord>> {
        let now = timestamp(Utc::now());
        let link = self
            .conn
            .query_row(
                &format!(
                    "UPDATE links SET status = ?2, claimed_at = ?3
                     WHERE id = (
                         SELECT id FROM links
                         WHERE session_id = ?1 AND status = ?4
                         ORDER BY id LIMIT 1
                     ) AND status = ?4
                     RETURNING {}",
                    LINK_COLUMNS
                ),
                params![
                    session_id,
                    LinkStatus::Claimed.to_db_string(),
                    now,
                    LinkStatus::Pending.to_db_string()
                ],
                link_from_row,
            )
            .optional()?;
        Ok(link)
    }

    fn claim_link(&mut self, link_id: i64) -> StoreResult<Option<LinkRecord>> {
        let now = timestamp(Utc::now());
        let link = self
            .conn
            .query_row(
                &format!(
                    "UPDATE links SET status = ?2, claimed_at = ?3
                     WHERE id = ?1 AND status = ?4
                     RETURNING {}",
                    LINK_COLUMNS
                ),
                params![
                    link_id,
                    LinkStatus::Claimed.to_db_string(),
                    now,
                    LinkStatus::Pending.to_db_string()
                ],
                link_from_row,
            )
            .optional()?;
        Ok(link)
    }

    fn reclaim_stale_claim(
        &mut self,
        session_id: i64,
        claimed_before: DateTime<Utc>,
    ) -> StoreResult<Option<ReclaimOutcome>> {
        // Page existence is checked inside the UPDATE so the decision and
        // the write happen under the same lock.
        let link = self
            .conn
            .query_row(
                &format!(
                    "UPDATE links
                     SET status = CASE
                             WHEN EXISTS (
                                 SELECT 1 FROM pages p
                                 WHERE p.session_id = links.session_id AND p.link = links.canonical
                             ) THEN ?3
                             ELSE ?4
                         END,
                         claimed_at = CASE
                             WHEN EXISTS (
                                 SELECT 1 FROM pages p
                                 WHERE p.session_id = links.session_id AND p.link = links.canonical
                             ) THEN claimed_at
                             ELSE NULL
                         END
                     WHERE id = (
                         SELECT id FROM links
                         WHERE session_id = ?1 AND status = ?5 AND claimed_at <= ?2
                         ORDER BY claimed_at LIMIT 1
                     ) AND status = ?5
                     RETURNING {}",
                    LINK_COLUMNS
                ),
                params![
                    session_id,
                    timestamp(claimed_before),
                    LinkStatus::Done.to_db_string(),
                    LinkStatus::Pending.to_db_string(),
                    LinkStatus::Claimed.to_db_string()
                ],
                link_from_row,
            )
            .optional()?;

        Ok(link.map(|link| match link.status {
            LinkStatus::Done => ReclaimOutcome::Finalized(link),
            _ => ReclaimOutcome::Requeued(link),
        }))
    }

    fn mark_done(&mut self, link_id: i64) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "UPDATE links SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![
                link_id,
                LinkStatus::Done.to_db_string(),
                LinkStatus::Claimed.to_db_string()
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_link(&self, link_id: i64) -> StoreResult<Option<LinkRecord>> {
        let link = self
            .conn
            .query_row(
                &format!("SELECT {} FROM links WHERE id = ?1", LINK_COLUMNS),
                params![link_id],
                link_from_row,
            )
            .optional()?;
        Ok(link)
    }

    fn count_links_by_status(&self, session_id: i64, status: LinkStatus) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM links WHERE session_id = ?1 AND status = ?2",
            params![session_id, status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn frontier_counts(
        &self,
        session_id: i64,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<FrontierCounts> {
        let counts = self.conn.query_row(
            "SELECT
                 COALESCE(SUM(status = ?2), 0),
                 COALESCE(SUM(status = ?3), 0),
                 COALESCE(SUM(status = ?3 AND claimed_at <= ?5), 0),
                 COALESCE(SUM(status = ?4), 0)
             FROM links WHERE session_id = ?1",
            params![
                session_id,
                LinkStatus::Pending.to_db_string(),
                LinkStatus::Claimed.to_db_string(),
                LinkStatus::Done.to_db_string(),
                timestamp(stale_before)
            ],
            |row| {
                Ok(FrontierCounts {
                    pending: row.get::<_, i64>(0)? as u64,
                    claimed: row.get::<_, i64>(1)? as u64,
                    stale: row.get::<_, i64>(2)? as u64,
                    done: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(counts)
    }
}
