//! Session coordinator
//!
//! Owns one worker's view of a session: finding it, spending its budget,
//! polling the frontier for work, and resolving claims abandoned by dead
//! workers. The coordinator never caches session state; every decision is
//! made on a fresh read from the store.
//!
//! Every store call goes through [`SessionCoordinator::retrying`], so a
//! transient failure (a locked database, an IO hiccup) is retried with capped
//! backoff and never reaches the worker.

use crate::config::CoordinatorConfig;
use crate::crawler::backoff::ExponentialBackoff;
use crate::state::{FrontierCounts, SessionPhase};
use crate::storage::{
    DiscoveredLink, FrontierStore, LinkRecord, NewPage, PageRecord, ReclaimOutcome,
    SessionRecord, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Outcome of reserving one unit of a session's budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetReservation {
    /// The page may be written
    Granted { remaining: i64 },

    /// The budget was already spent; the page must not be written
    Refused { remaining: i64 },
}

impl BudgetReservation {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Outcome of writing a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWrite {
    Created(i64),

    /// Another worker already stored a page for this link
    Duplicate,
}

/// Per-worker coordinator over a Frontier Store
pub struct SessionCoordinator<S: FrontierStore> {
    store: S,
    config: CoordinatorConfig,
    store_backoff: ExponentialBackoff,
    claim_backoff: ExponentialBackoff,
}

impl<S: FrontierStore> SessionCoordinator<S> {
    pub fn new(store: S, config: CoordinatorConfig) -> Self {
        let store_backoff =
            ExponentialBackoff::new(config.store_retry_base(), config.store_retry_max());
        let claim_backoff =
            ExponentialBackoff::new(config.claim_poll_interval(), config.claim_poll_max());

        Self {
            store,
            config,
            store_backoff,
            claim_backoff,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs a store operation, retrying transient failures until it succeeds
    ///
    /// Permanent failures are returned on the first occurrence.
    async fn retrying<T, F>(&mut self, operation: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut(&mut S) -> StoreResult<T>,
    {
        let mut attempt = 0u32;

        loop {
            match op(&mut self.store) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    let delay = self.store_backoff.delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        "Transient store failure during {}: {} (retrying in {:?})",
                        operation,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn stale_cutoff(&self) -> DateTime<Utc> {
        self.config.stale_cutoff(Utc::now())
    }

    // ===== Sessions =====

    /// Creates a new session for `url`
    pub async fn start_session(
        &mut self,
        url: &str,
        initial_budget: i64,
    ) -> StoreResult<SessionRecord> {
        let session = self
            .retrying("create session", |s| s.create_session(url, initial_budget))
            .await?;
        tracing::info!(
            session_id = session.id,
            "Created session for {} with budget {}",
            url,
            initial_budget
        );
        Ok(session)
    }

    /// Looks up the latest session for `url` without waiting
    pub async fn find_session(&mut self, url: &str) -> StoreResult<Option<SessionRecord>> {
        self.retrying("find session", |s| s.find_session_by_url(url))
            .await
    }

    /// Waits until a session for `url` is visible and returns it
    ///
    /// Polls without a deadline: a worker started before the seeding process
    /// has written the session simply waits for it.
    pub async fn resolve_session(&mut self, url: &str) -> StoreResult<SessionRecord> {
        let mut announced = false;

        loop {
            if let Some(session) = self.find_session(url).await? {
                return Ok(session);
            }

            if !announced {
                tracing::info!("Waiting for a session for {}", url);
                announced = true;
            }
            tokio::time::sleep(self.config.session_poll_interval()).await;
        }
    }

    /// Reads a session, failing if it does not exist
    pub async fn session(&mut self, session_id: i64) -> StoreResult<SessionRecord> {
        self.retrying("get session", |s| s.get_session(session_id))
            .await?
            .ok_or(StoreError::SessionNotFound(session_id))
    }

    /// Counts the session's links, flagging claims older than the staleness threshold
    pub async fn counts(&mut self, session_id: i64) -> StoreResult<FrontierCounts> {
        let cutoff = self.stale_cutoff();
        self.retrying("count links", |s| s.frontier_counts(session_id, cutoff))
            .await
    }

    /// Observes the session's current phase
    pub async fn phase(&mut self, session_id: i64) -> StoreResult<SessionPhase> {
        let session = self.session(session_id).await?;
        let counts = self.counts(session_id).await?;
        Ok(SessionPhase::observe(session.remaining_budget, &counts))
    }

    /// Spends one unit of budget ahead of a page write
    ///
    /// The page may be written only if the counter is still non-negative after
    /// the decrement; across all workers that admits at most the initial
    /// budget's worth of pages.
    pub async fn reserve_budget(&mut self, session_id: i64) -> StoreResult<BudgetReservation> {
        let session = self
            .retrying("decrement budget", |s| s.decrement_budget(session_id))
            .await?;
        let remaining = session.remaining_budget;

        if remaining >= 0 {
            Ok(BudgetReservation::Granted { remaining })
        } else {
            Ok(BudgetReservation::Refused { remaining })
        }
    }

    // ===== Pages =====

    /// Writes a page, treating a duplicate as another worker's success
    pub async fn record_page(&mut self, page: &NewPage<'_>) -> StoreResult<PageWrite> {
        match self.retrying("insert page", |s| s.insert_page(page)).await {
            Ok(page_id) => Ok(PageWrite::Created(page_id)),
            Err(StoreError::DuplicatePage { session_id, link }) => {
                tracing::info!(session_id, "Page for {} already stored by another worker", link);
                Ok(PageWrite::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn find_page(
        &mut self,
        session_id: i64,
        link: &str,
    ) -> StoreResult<Option<PageRecord>> {
        self.retrying("find page", |s| s.find_page(session_id, link))
            .await
    }

    // ===== Frontier =====

    /// Appends a page's outbound links to the frontier
    pub async fn append_links(
        &mut self,
        page_id: i64,
        session_id: i64,
        links: &[DiscoveredLink],
    ) -> StoreResult<()> {
        self.retrying("insert links", |s| s.insert_links(page_id, session_id, links))
            .await?;
        tracing::debug!(session_id, page_id, "Appended {} links", links.len());
        Ok(())
    }

    /// Claims the next pending link, polling while the session is Active
    ///
    /// Returns `None` once the budget is spent, or once the frontier has had
    /// no pending links and no live claims for the idle timeout. While other
    /// workers hold fresh claims the poll continues, since their pages may
    /// still add links; stale claims do not keep it alive.
    pub async fn next_link(&mut self, session_id: i64) -> StoreResult<Option<LinkRecord>> {
        let mut polls = 0u32;
        let mut idle_since: Option<Instant> = None;

        loop {
            let session = self.session(session_id).await?;
            if session.remaining_budget <= 0 {
                tracing::debug!(session_id, "Budget spent, no further claims");
                return Ok(None);
            }

            if let Some(link) = self
                .retrying("claim link", |s| s.claim_next_pending_link(session_id))
                .await?
            {
                tracing::debug!(session_id, link_id = link.id, "Claimed {}", link.url);
                return Ok(Some(link));
            }

            let counts = self.counts(session_id).await?;
            if counts.pending == 0 && counts.claimed == counts.stale {
                let since = *idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.config.idle_timeout() {
                    tracing::info!(session_id, "Frontier is empty, session complete");
                    return Ok(None);
                }
            } else {
                idle_since = None;
            }

            let delay = self.claim_backoff.delay(polls);
            polls = polls.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Claims one specific pending link
    pub async fn claim(&mut self, link_id: i64) -> StoreResult<Option<LinkRecord>> {
        self.retrying("claim link", |s| s.claim_link(link_id)).await
    }

    /// Marks a claimed link done
    ///
    /// Returns false if the link was no longer claimed, which happens when a
    /// reconciling worker took it back after this worker ran past the
    /// staleness threshold.
    pub async fn complete(&mut self, link: &LinkRecord) -> StoreResult<bool> {
        let done = self.retrying("mark link done", |s| s.mark_done(link.id)).await?;
        if !done {
            tracing::warn!(
                session_id = link.session_id,
                link_id = link.id,
                "Claim on {} was taken back before it completed",
                link.url
            );
        }
        Ok(done)
    }

    // ===== Recovery =====

    /// Resolves one stale claim, if any
    pub async fn reconcile(&mut self, session_id: i64) -> StoreResult<Option<ReclaimOutcome>> {
        let cutoff = self.stale_cutoff();
        let outcome = self
            .retrying("reclaim stale claim", |s| s.reclaim_stale_claim(session_id, cutoff))
            .await?;

        match &outcome {
            Some(ReclaimOutcome::Requeued(link)) => tracing::info!(
                session_id,
                link_id = link.id,
                "Requeued abandoned claim on {}",
                link.url
            ),
            Some(ReclaimOutcome::Finalized(link)) => tracing::info!(
                session_id,
                link_id = link.id,
                "Finalized abandoned claim on {} (page already stored)",
                link.url
            ),
            None => tracing::debug!(session_id, "No stale claims"),
        }

        Ok(outcome)
    }

    /// Resolves stale claims until none remain
    pub async fn reconcile_all(&mut self, session_id: i64) -> StoreResult<Vec<ReclaimOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.reconcile(session_id).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}
