//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the frontier database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl run
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    initial_budget INTEGER NOT NULL,
    remaining_budget INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_url ON sessions(url);

-- Fetched and parsed documents
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    link TEXT NOT NULL,
    content TEXT NOT NULL,
    title TEXT,
    metadata TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    UNIQUE(session_id, link)
);

-- Frontier entries
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    page_id INTEGER NOT NULL REFERENCES pages(id),
    url TEXT NOT NULL,
    canonical TEXT NOT NULL,
    anchor_text TEXT NOT NULL,
    status TEXT NOT NULL,
    claimed_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_session_status ON links(session_id, status);
CREATE INDEX IF NOT EXISTS idx_links_page ON links(page_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
