//! Storage module: the shared Frontier Store
//!
//! This module holds every piece of state workers share:
//! - Sessions and their remaining page budget
//! - Pages, unique per (session, canonical link)
//! - Frontier links and their claim status
//!
//! Every mutating operation is a single statement against a single row (or a
//! single batch insert into one table), so concurrent workers in separate
//! processes never observe a half-applied change.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{FrontierStore, StoreError, StoreResult};

use crate::state::LinkStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Formats a timestamp the way the store persists it
///
/// Fixed microsecond precision with a `Z` suffix keeps lexical order equal to
/// chronological order, which the staleness queries rely on.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One crawl run for a seed URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: i64,
    pub url: String,
    pub created_at: String,
    pub initial_budget: i64,
    pub remaining_budget: i64,
}

/// A (kind, value) pair taken from a heading or an emphasis span
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub kind: String,
    pub value: String,
}

impl MetadataEntry {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// A stored page
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: i64,
    pub session_id: i64,
    pub link: String,
    pub content: String,
    pub title: Option<String>,
    pub metadata: Vec<MetadataEntry>,
    pub created_at: String,
}

/// A page about to be written
#[derive(Debug, Clone, Copy)]
pub struct NewPage<'a> {
    pub session_id: i64,
    /// Canonical link; together with the session it must be unique
    pub link: &'a str,
    pub content: &'a str,
    pub title: Option<&'a str>,
    pub metadata: &'a [MetadataEntry],
}

/// An outbound link found on a page, before it enters the frontier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiscoveredLink {
    pub url: String,
    pub anchor_text: String,
}

impl DiscoveredLink {
    pub fn new(url: impl Into<String>, anchor_text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anchor_text: anchor_text.into(),
        }
    }
}

/// A frontier entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub id: i64,
    pub session_id: i64,
    /// Page the link was discovered on
    pub page_id: i64,
    pub url: String,
    /// Canonical form of `url`; the key a page for this link is stored under
    pub canonical: String,
    pub anchor_text: String,
    pub status: LinkStatus,
    pub claimed_at: Option<String>,
    pub created_at: String,
}

/// Result of resolving one stale claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// No page existed for the link; it went back to `Pending`
    Requeued(LinkRecord),

    /// A page already existed; the link was finalized as `Done`
    Finalized(LinkRecord),
}

impl ReclaimOutcome {
    pub fn link(&self) -> &LinkRecord {
        match self {
            Self::Requeued(link) | Self::Finalized(link) => link,
        }
    }
}
