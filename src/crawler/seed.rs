//! One-time seeding of a session
//!
//! Fetches the seed URL and, only if that succeeds, creates the session and
//! stores the seed page with its in-scope links. The seed page is paid for
//! out of the session's budget like any other page.

use crate::crawler::coordinator::{PageWrite, SessionCoordinator};
use crate::crawler::fetcher::{FetchOutcome, PageFetcher};
use crate::crawler::parser::extract_page;
use crate::storage::{FrontierStore, NewPage, SessionRecord};
use crate::url::{canonical_link, scope_domain};
use crate::{CrawlError, UrlError};
use url::Url;

/// What seeding produced
#[derive(Debug, Clone)]
pub struct SeedOutcome {
    pub session: SessionRecord,
    /// Seed page id; `None` only if the budget did not admit it
    pub page_id: Option<i64>,
    /// Number of links added to the frontier
    pub links: usize,
}

/// Seeds a new session for `seed_url`
///
/// # Errors
///
/// * `CrawlError::UrlParse` / `CrawlError::UrlError` - The seed URL is not usable
/// * `CrawlError::SeedFetch` - The seed could not be fetched; nothing was created
/// * `CrawlError::Store` - A permanent store failure
pub async fn seed_session<S, F>(
    coordinator: &mut SessionCoordinator<S>,
    fetcher: &F,
    seed_url: &str,
    initial_budget: i64,
) -> Result<SeedOutcome, CrawlError>
where
    S: FrontierStore,
    F: PageFetcher + ?Sized,
{
    let url = Url::parse(seed_url)?;
    let scope = scope_domain(&url).ok_or(UrlError::MissingDomain)?;

    let page = match fetcher.fetch(seed_url, None).await {
        FetchOutcome::Fetched(page) => page,
        FetchOutcome::Failed {
            attempts,
            last_error,
        } => {
            return Err(CrawlError::SeedFetch {
                url: seed_url.to_string(),
                attempts,
                reason: last_error,
            });
        }
    };

    let base = Url::parse(&page.final_url).unwrap_or(url);
    let extracted = extract_page(&page.text, &base, &scope);

    let session = coordinator.start_session(seed_url, initial_budget).await?;

    if !coordinator.reserve_budget(session.id).await?.is_granted() {
        tracing::warn!(session_id = session.id, "Budget admits no pages, seed not stored");
        return Ok(SeedOutcome {
            session,
            page_id: None,
            links: 0,
        });
    }

    let link = canonical_link(seed_url);
    let metadata = extracted.metadata();
    let write = coordinator
        .record_page(&NewPage {
            session_id: session.id,
            link: &link,
            content: &page.text,
            title: extracted.title.as_deref(),
            metadata: &metadata,
        })
        .await?;

    let PageWrite::Created(page_id) = write else {
        return Ok(SeedOutcome {
            session,
            page_id: None,
            links: 0,
        });
    };

    let links = extracted.link_batch();
    coordinator.append_links(page_id, session.id, &links).await?;

    tracing::info!(
        session_id = session.id,
        page_id,
        "Seeded {} (scope {}, {} links)",
        seed_url,
        scope,
        links.len()
    );

    Ok(SeedOutcome {
        session,
        page_id: Some(page_id),
        links: links.len(),
    })
}
