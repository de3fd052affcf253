//! Worker loop
//!
//! A worker joins the session for a seed URL and repeatedly:
//! 1. Claims a pending link
//! 2. Fetches it
//! 3. Extracts title, metadata and in-scope links
//! 4. Reserves one unit of budget and, if granted, stores the page and its links
//! 5. Marks the link done, whatever happened above
//!
//! When no further link can be claimed it makes one reconciling pass over
//! stale claims, then observes the session phase: an Active session (new
//! links arrived, or a requeued claim left budget behind) sends it back to
//! claiming, anything else ends the run.

use crate::crawler::backoff::ExponentialBackoff;
use crate::crawler::coordinator::{BudgetReservation, PageWrite, SessionCoordinator};
use crate::crawler::fetcher::{FetchOutcome, FetchedPage, PageFetcher};
use crate::crawler::parser::{
    extract_emphasis, extract_headings, extract_page, extract_title, ExtractedPage,
};
use crate::storage::{
    FrontierStore, LinkRecord, NewPage, ReclaimOutcome, SessionRecord, StoreError, StoreResult,
};
use crate::url::scope_domain;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Counters describing what one worker did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub session_id: Option<i64>,
    pub pages_written: u64,
    pub links_completed: u64,
    pub fetch_failures: u64,
    pub duplicates: u64,
    pub budget_refusals: u64,
    pub reconciled: u64,
    /// Claims taken back by a reconciler before this worker completed them
    pub lost_claims: u64,
}

impl WorkerReport {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Self::default()
        }
    }

    /// Sums the counters of several reports
    pub fn total<'a>(reports: impl IntoIterator<Item = &'a WorkerReport>) -> WorkerReport {
        reports
            .into_iter()
            .fold(WorkerReport::default(), |mut acc, r| {
                acc.session_id = acc.session_id.or(r.session_id);
                acc.pages_written += r.pages_written;
                acc.links_completed += r.links_completed;
                acc.fetch_failures += r.fetch_failures;
                acc.duplicates += r.duplicates;
                acc.budget_refusals += r.budget_refusals;
                acc.reconciled += r.reconciled;
                acc.lost_claims += r.lost_claims;
                acc
            })
    }
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages written, {} links completed, {} fetch failures, {} duplicates, \
             {} budget refusals, {} reconciled, {} lost claims",
            self.pages_written,
            self.links_completed,
            self.fetch_failures,
            self.duplicates,
            self.budget_refusals,
            self.reconciled,
            self.lost_claims
        )
    }
}

/// What a worker knows about the session it serves
struct SessionContext {
    id: i64,
    scope: String,
}

impl SessionContext {
    fn new(session: &SessionRecord) -> Self {
        let scope = Url::parse(&session.url)
            .ok()
            .and_then(|url| scope_domain(&url))
            .unwrap_or_default();

        if scope.is_empty() {
            tracing::warn!(
                session_id = session.id,
                "Cannot derive a scope from {}; no links will be followed",
                session.url
            );
        }

        Self {
            id: session.id,
            scope,
        }
    }
}

/// One worker: a coordinator over its own store connection plus a shared fetcher
pub struct Worker<S: FrontierStore, F: PageFetcher> {
    id: usize,
    coordinator: SessionCoordinator<S>,
    fetcher: Arc<F>,
    error_backoff: ExponentialBackoff,
    consecutive_errors: u32,
    report: WorkerReport,
}

impl<S: FrontierStore, F: PageFetcher> Worker<S, F> {
    pub fn new(id: usize, coordinator: SessionCoordinator<S>, fetcher: Arc<F>) -> Self {
        let config = coordinator.config();
        let error_backoff =
            ExponentialBackoff::new(config.store_retry_base(), config.store_retry_max());

        Self {
            id,
            coordinator,
            fetcher,
            error_backoff,
            consecutive_errors: 0,
            report: WorkerReport::new(id),
        }
    }

    /// Serves the session for `seed_url` until it has nothing left to hand out
    ///
    /// Store failures are logged and retried here; they never end the loop.
    pub async fn run(mut self, seed_url: &str) -> WorkerReport {
        let session = loop {
            match self.coordinator.resolve_session(seed_url).await {
                Ok(session) => break session,
                Err(e) => self.pause_after_error("resolve session", &e).await,
            }
        };

        let ctx = SessionContext::new(&session);
        self.report.session_id = Some(ctx.id);
        tracing::info!(
            worker = self.id,
            session_id = ctx.id,
            "Worker joined session for {}",
            session.url
        );

        loop {
            self.claim_until_exhausted(&ctx).await;
            self.reconcile_once(&ctx).await;

            match self.coordinator.phase(ctx.id).await {
                Ok(phase) if phase.accepts_claims() => {
                    tracing::debug!(worker = self.id, session_id = ctx.id, "Session still {}", phase);
                }
                Ok(phase) => {
                    tracing::debug!(worker = self.id, session_id = ctx.id, "Session {}", phase);
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        worker = self.id,
                        session_id = ctx.id,
                        "Failed to observe session phase: {}",
                        e
                    );
                    break;
                }
            }
        }

        tracing::info!(worker = self.id, session_id = ctx.id, "Worker finished: {}", self.report);
        self.report
    }

    /// Claims and processes links until `next_link` has nothing more to hand out
    async fn claim_until_exhausted(&mut self, ctx: &SessionContext) {
        loop {
            match self.coordinator.next_link(ctx.id).await {
                Ok(Some(link)) => {
                    self.consecutive_errors = 0;
                    self.process(ctx, link).await;

                    if self.report.links_completed > 0 && self.report.links_completed % 10 == 0 {
                        tracing::info!(
                            worker = self.id,
                            session_id = ctx.id,
                            "Progress: {} links completed, {} pages written",
                            self.report.links_completed,
                            self.report.pages_written
                        );
                    }
                }
                Ok(None) => return,
                Err(e) => self.pause_after_error("claim link", &e).await,
            }
        }
    }

    /// Fetches, stores and completes one claimed link
    async fn process(&mut self, ctx: &SessionContext, link: LinkRecord) {
        match self.fetcher.fetch(&link.url, None).await {
            FetchOutcome::Fetched(page) => {
                if let Err(e) = self.store_page(ctx, &link, &page).await {
                    tracing::error!(
                        worker = self.id,
                        link_id = link.id,
                        "Failed to store {}: {}",
                        link.url,
                        e
                    );
                }
            }
            FetchOutcome::Failed {
                attempts,
                last_error,
            } => {
                self.report.fetch_failures += 1;
                tracing::warn!(
                    worker = self.id,
                    link_id = link.id,
                    "Abandoning {} after {} attempts: {}",
                    link.url,
                    attempts,
                    last_error
                );
            }
        }

        match self.coordinator.complete(&link).await {
            Ok(true) => self.report.links_completed += 1,
            Ok(false) => self.report.lost_claims += 1,
            Err(e) => tracing::error!(
                worker = self.id,
                link_id = link.id,
                "Failed to mark {} done: {}",
                link.url,
                e
            ),
        }
    }

    async fn store_page(
        &mut self,
        ctx: &SessionContext,
        link: &LinkRecord,
        page: &FetchedPage,
    ) -> StoreResult<()> {
        let extracted = extract(ctx, link, page);

        match self.coordinator.reserve_budget(ctx.id).await? {
            BudgetReservation::Granted { remaining } => {
                tracing::debug!(session_id = ctx.id, "Budget reserved, {} left", remaining);
            }
            BudgetReservation::Refused { remaining } => {
                self.report.budget_refusals += 1;
                tracing::debug!(
                    session_id = ctx.id,
                    "Budget spent ({}), not storing {}",
                    remaining,
                    link.url
                );
                return Ok(());
            }
        }

        let metadata = extracted.metadata();
        let new_page = NewPage {
            session_id: ctx.id,
            link: &link.canonical,
            content: &page.text,
            title: extracted.title.as_deref(),
            metadata: &metadata,
        };

        match self.coordinator.record_page(&new_page).await? {
            PageWrite::Created(page_id) => {
                self.report.pages_written += 1;
                let links = extracted.link_batch();
                self.coordinator.append_links(page_id, ctx.id, &links).await?;
                tracing::info!(
                    worker = self.id,
                    session_id = ctx.id,
                    page_id,
                    "Stored {} ({} links)",
                    link.canonical,
                    links.len()
                );
            }
            PageWrite::Duplicate => self.report.duplicates += 1,
        }

        Ok(())
    }

    /// One pass over stale claims, with a best-effort handoff of what it finds
    async fn reconcile_once(&mut self, ctx: &SessionContext) {
        let outcome = match self.coordinator.reconcile(ctx.id).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(worker = self.id, session_id = ctx.id, "Reconciling failed: {}", e);
                return;
            }
        };
        self.report.reconciled += 1;

        match outcome {
            ReclaimOutcome::Requeued(link) => match self.coordinator.claim(link.id).await {
                Ok(Some(claimed)) => self.process(ctx, claimed).await,
                Ok(None) => tracing::debug!(
                    link_id = link.id,
                    "Requeued link {} was taken by another worker",
                    link.url
                ),
                Err(e) => tracing::error!(link_id = link.id, "Failed to claim {}: {}", link.url, e),
            },
            ReclaimOutcome::Finalized(link) => {
                if let Err(e) = self.recover_links(ctx, &link).await {
                    tracing::error!(
                        link_id = link.id,
                        "Failed to recover links of {}: {}",
                        link.url,
                        e
                    );
                }
            }
        }
    }

    /// Re-extracts a stored page's links and appends them under the existing page
    ///
    /// A worker that died between storing a page and appending its links
    /// leaves a page with no frontier entries; this puts them back.
    async fn recover_links(&mut self, ctx: &SessionContext, link: &LinkRecord) -> StoreResult<()> {
        let Some(stored) = self.coordinator.find_page(ctx.id, &link.canonical).await? else {
            return Ok(());
        };

        match self.fetcher.fetch(&link.url, None).await {
            FetchOutcome::Fetched(page) => {
                let links = extract(ctx, link, &page).link_batch();
                self.coordinator.append_links(stored.id, ctx.id, &links).await?;
                tracing::info!(
                    page_id = stored.id,
                    "Recovered {} links for {}",
                    links.len(),
                    link.canonical
                );
            }
            FetchOutcome::Failed { last_error, .. } => {
                self.report.fetch_failures += 1;
                tracing::warn!("Could not re-fetch {}: {}", link.url, last_error);
            }
        }

        Ok(())
    }

    async fn pause_after_error(&mut self, operation: &str, error: &StoreError) {
        let delay = self.error_backoff.delay(self.consecutive_errors);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        tracing::error!(
            worker = self.id,
            "Store failure during {}: {} (retrying in {:?})",
            operation,
            error,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

/// Extracts a fetched page, resolving links against where the fetch ended up
fn extract(ctx: &SessionContext, link: &LinkRecord, page: &FetchedPage) -> ExtractedPage {
    match Url::parse(&page.final_url).or_else(|_| Url::parse(&link.url)) {
        Ok(base) => extract_page(&page.text, &base, &ctx.scope),
        Err(e) => {
            tracing::warn!("Cannot resolve links of {}: {}", link.url, e);
            ExtractedPage {
                title: extract_title(&page.text),
                headings: extract_headings(&page.text),
                emphasis: extract_emphasis(&page.text),
                links: BTreeSet::new(),
            }
        }
    }
}
