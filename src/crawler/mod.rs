//! Crawler module for fetching pages and coordinating workers
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry logic
//! - HTML extraction of titles, headings, emphasis and links
//! - Session coordination over the shared store
//! - The worker loop and one-time seeding

mod backoff;
mod coordinator;
mod fetcher;
mod parser;
mod seed;
mod worker;

pub use backoff::ExponentialBackoff;
pub use coordinator::{BudgetReservation, PageWrite, SessionCoordinator};
pub use fetcher::{
    build_http_client, user_agent_string, CookieState, FetchOutcome, FetchedPage, HttpFetcher,
    PageFetcher, RetryPolicy,
};
pub use parser::{
    extract_emphasis, extract_headings, extract_links, extract_page, extract_title, ExtractedPage,
};
pub use seed::{seed_session, SeedOutcome};
pub use worker::{Worker, WorkerReport};

use crate::config::Config;
use crate::storage::SqliteStore;
use crate::CrawlError;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Opens a fresh store connection and wraps it in a coordinator
pub fn open_coordinator(config: &Config) -> Result<SessionCoordinator<SqliteStore>, CrawlError> {
    let store = SqliteStore::open(
        Path::new(&config.storage.database_path),
        config.storage.busy_timeout(),
    )?;
    Ok(SessionCoordinator::new(store, config.coordinator.clone()))
}

/// Runs a crawl for `seed_url` in this process
///
/// If `seed` is set, the seed page is fetched and the session created first;
/// otherwise the workers join an existing session (waiting for it to appear).
/// The configured number of workers then run concurrently, each over its own
/// store connection.
///
/// # Returns
///
/// * `Ok(Vec<WorkerReport>)` - One report per worker that ran to completion
/// * `Err(CrawlError)` - Seeding failed, or a store connection could not be opened
pub async fn crawl<F>(
    config: &Config,
    fetcher: Arc<F>,
    seed_url: &str,
    seed: bool,
) -> Result<Vec<WorkerReport>, CrawlError>
where
    F: PageFetcher + 'static,
{
    if seed {
        let mut coordinator = open_coordinator(config)?;
        seed_session(
            &mut coordinator,
            fetcher.as_ref(),
            seed_url,
            config.session.initial_budget,
        )
        .await?;
    }

    let mut workers = JoinSet::new();
    for id in 0..config.coordinator.worker_count as usize {
        let worker = Worker::new(id, open_coordinator(config)?, Arc::clone(&fetcher));
        let seed_url = seed_url.to_string();
        workers.spawn(async move { worker.run(&seed_url).await });
    }

    let mut reports = Vec::with_capacity(workers.len());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!("Worker task failed: {}", e),
        }
    }

    reports.sort_by_key(|r| r.worker_id);
    Ok(reports)
}

/// Resolves every stale claim of the session for `seed_url`
///
/// Returns the number of claims resolved, or `CrawlError::UnknownSession` if
/// no session exists for the URL.
pub async fn reconcile_session(config: &Config, seed_url: &str) -> Result<usize, CrawlError> {
    let mut coordinator = open_coordinator(config)?;
    let session = coordinator
        .find_session(seed_url)
        .await?
        .ok_or_else(|| CrawlError::UnknownSession(seed_url.to_string()))?;

    let outcomes = coordinator.reconcile_all(session.id).await?;
    tracing::info!(
        session_id = session.id,
        "Resolved {} stale claims",
        outcomes.len()
    );
    Ok(outcomes.len())
}
