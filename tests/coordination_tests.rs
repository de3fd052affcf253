//! Integration tests for worker coordination
//!
//! Pages come from a scripted in-memory fetcher; the frontier lives in a
//! SQLite file in a temporary directory so that several connections (standing
//! in for several worker processes) can share it.

use async_trait::async_trait;
use crawl_frontier::config::{
    Config, CoordinatorConfig, FetcherConfig, SessionConfig, StorageConfig, UserAgentConfig,
};
use crawl_frontier::crawler::{
    crawl, open_coordinator, seed_session, CookieState, FetchOutcome, FetchedPage, PageFetcher,
    Worker, WorkerReport,
};
use crawl_frontier::storage::{
    DiscoveredLink, FrontierStore, MetadataEntry, NewPage, ReclaimOutcome, SqliteStore,
};
use crawl_frontier::{CrawlError, LinkStatus, SessionPhase};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

const SEED: &str = "https://example.com/a";

/// Serves fixed HTML per URL; any other URL fails permanently
struct ScriptedFetcher {
    pages: HashMap<String, String>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.to_string()))
                .collect(),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _cookies: Option<&CookieState>) -> FetchOutcome {
        self.requested.lock().unwrap().push(url.to_string());

        match self.pages.get(url) {
            Some(html) => FetchOutcome::Fetched(FetchedPage {
                final_url: url.to_string(),
                bytes: html.as_bytes().to_vec(),
                text: html.clone(),
                cookies: CookieState::new(),
            }),
            None => FetchOutcome::Failed {
                attempts: 10,
                last_error: "HTTP 404".to_string(),
            },
        }
    }
}

/// Delays one URL and records how many fetches of it overlap
struct SlowFetcher {
    inner: ScriptedFetcher,
    slow_url: String,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl PageFetcher for SlowFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&CookieState>) -> FetchOutcome {
        if url != self.slow_url {
            return self.inner.fetch(url, cookies).await;
        }

        let overlapping = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(overlapping, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let outcome = self.inner.fetch(url, cookies).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Takes the claim on one URL back the first time it is fetched, the way a
/// reconciler does when it presumes the claiming worker dead
struct ReclaimingFetcher {
    inner: ScriptedFetcher,
    db_path: PathBuf,
    target: String,
    fired: AtomicBool,
}

#[async_trait]
impl PageFetcher for ReclaimingFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&CookieState>) -> FetchOutcome {
        if url == self.target && !self.fired.swap(true, Ordering::SeqCst) {
            let mut store = SqliteStore::open(&self.db_path, Duration::from_secs(5)).unwrap();
            let session = store.find_session_by_url(SEED).unwrap().unwrap();
            let outcome = store.reclaim_stale_claim(session.id, Utc::now()).unwrap();
            assert!(matches!(outcome, Some(ReclaimOutcome::Requeued(_))));
        }

        self.inner.fetch(url, cookies).await
    }
}

fn create_test_config(db_path: &Path, budget: i64) -> Config {
    Config {
        session: SessionConfig {
            initial_budget: budget,
        },
        coordinator: CoordinatorConfig {
            worker_count: 1,
            claim_poll_interval_ms: 2,
            claim_poll_max_ms: 10,
            session_poll_interval_ms: 5,
            stale_claim_after_secs: 120,
            idle_timeout_secs: 0,
            store_retry_base_ms: 2,
            store_retry_max_ms: 20,
        },
        fetcher: FetcherConfig::default(),
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        storage: StorageConfig {
            database_path: db_path.to_string_lossy().into_owned(),
            busy_timeout_ms: 5_000,
        },
    }
}

/// A separate connection standing in for another worker process
fn other_process(config: &Config) -> SqliteStore {
    SqliteStore::open(
        Path::new(&config.storage.database_path),
        config.storage.busy_timeout(),
    )
    .unwrap()
}

async fn seed(config: &Config, fetcher: &ScriptedFetcher) -> i64 {
    let mut coordinator = open_coordinator(config).unwrap();
    seed_session(&mut coordinator, fetcher, SEED, config.session.initial_budget)
        .await
        .unwrap()
        .session
        .id
}

async fn run_worker(config: &Config, fetcher: &Arc<ScriptedFetcher>) -> WorkerReport {
    Worker::new(0, open_coordinator(config).unwrap(), Arc::clone(fetcher))
        .run(SEED)
        .await
}

#[tokio::test]
async fn test_budget_of_two_stops_after_one_followed_link() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 2);
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (
            SEED,
            r#"<a href="/b">B</a> <a href="/c">C</a> <a href="https://other.org/x">X</a>"#,
        ),
        ("https://example.com/b", "<title>B</title>"),
        ("https://example.com/c", "<title>C</title>"),
    ]));

    let session_id = seed(&config, &fetcher).await;

    let store = other_process(&config);
    assert_eq!(store.count_pages(session_id).unwrap(), 1);
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 1);
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Pending).unwrap(), 2);

    let report = run_worker(&config, &fetcher).await;
    assert_eq!(report.pages_written, 1);
    assert_eq!(report.links_completed, 1);

    assert_eq!(store.count_pages(session_id).unwrap(), 2);
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 0);
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Done).unwrap(), 1);
    // Leftover pending links are kept once the budget is spent
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Pending).unwrap(), 1);

    let mut coordinator = open_coordinator(&config).unwrap();
    assert_eq!(coordinator.phase(session_id).await.unwrap(), SessionPhase::Terminal);
}

#[tokio::test]
async fn test_seed_page_metadata_is_stored() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 3);
    let fetcher = ScriptedFetcher::new(&[(
        SEED,
        "<title>Seed</title><h1>Welcome</h1><h2>News</h2><p><em>fast</em> and <b>bold</b></p>",
    )]);

    let session_id = seed(&config, &fetcher).await;

    let page = other_process(&config).find_page(session_id, SEED).unwrap().unwrap();
    assert_eq!(page.title.as_deref(), Some("Seed"));
    for entry in [
        MetadataEntry::new("h1", "Welcome"),
        MetadataEntry::new("h2", "News"),
        MetadataEntry::new("em", "fast"),
        MetadataEntry::new("b", "bold"),
    ] {
        assert!(page.metadata.contains(&entry), "missing {:?}", entry);
    }
}

#[tokio::test]
async fn test_failed_seed_creates_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 3);
    let fetcher = ScriptedFetcher::new(&[]);

    let mut coordinator = open_coordinator(&config).unwrap();
    let result = seed_session(&mut coordinator, &fetcher, SEED, 3).await;

    assert!(matches!(result, Err(CrawlError::SeedFetch { attempts: 10, .. })));
    assert!(coordinator.find_session(SEED).await.unwrap().is_none());
}

#[tokio::test]
async fn test_permanent_fetch_failure_completes_link_without_page() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 5);
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (SEED, r#"<a href="/missing">M</a> <a href="/c">C</a>"#),
        ("https://example.com/c", "<title>C</title>"),
    ]));

    let session_id = seed(&config, &fetcher).await;
    let report = run_worker(&config, &fetcher).await;

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.pages_written, 1);
    assert_eq!(report.links_completed, 2);

    let store = other_process(&config);
    assert!(store
        .find_page(session_id, "https://example.com/missing")
        .unwrap()
        .is_none());
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Done).unwrap(), 2);
    // A failed fetch spends no budget
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 3);
}

#[tokio::test]
async fn test_links_with_one_canonical_form_store_one_page() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 10);
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (
            SEED,
            r#"<a href="/b">one</a> <a href="/b/">two</a> <a href="/b?utm_source=x">three</a>"#,
        ),
        ("https://example.com/b", "<title>B</title>"),
        ("https://example.com/b/", "<title>B</title>"),
        ("https://example.com/b?utm_source=x", "<title>B</title>"),
    ]));

    let session_id = seed(&config, &fetcher).await;
    let report = run_worker(&config, &fetcher).await;

    assert_eq!(report.pages_written, 1);
    assert_eq!(report.duplicates, 2);

    let store = other_process(&config);
    assert_eq!(store.count_pages(session_id).unwrap(), 2);
    assert!(store.find_page(session_id, "https://example.com/b").unwrap().is_some());
    // Each fetched duplicate still spent its reservation
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 6);
}

#[test]
fn test_concurrent_claimers_split_one_link() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 5);

    let mut store = other_process(&config);
    let session = store.create_session(SEED, 5).unwrap();
    let page_id = store
        .insert_page(&NewPage {
            session_id: session.id,
            link: SEED,
            content: "",
            title: None,
            metadata: &[],
        })
        .unwrap();
    store
        .insert_links(
            page_id,
            session.id,
            &[DiscoveredLink::new("https://example.com/b", "b")],
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let mut store = other_process(&config);
            let session_id = session.id;
            std::thread::spawn(move || {
                barrier.wait();
                store.claim_next_pending_link(session_id).unwrap()
            })
        })
        .collect();

    let claimed: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, LinkStatus::Claimed);
    assert_eq!(store.count_links_by_status(session.id, LinkStatus::Claimed).unwrap(), 1);
}

#[tokio::test]
async fn test_abandoned_claim_without_page_is_requeued_and_crawled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&temp_dir.path().join("frontier.db"), 3);
    config.coordinator.stale_claim_after_secs = 0;
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (SEED, r#"<a href="/b">B</a>"#),
        ("https://example.com/b", "<title>B</title>"),
    ]));

    let session_id = seed(&config, &fetcher).await;

    // A worker claims /b and dies before fetching it
    let mut dead = other_process(&config);
    let orphan = dead.claim_next_pending_link(session_id).unwrap().unwrap();
    drop(dead);

    let report = run_worker(&config, &fetcher).await;
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.pages_written, 1);

    let store = other_process(&config);
    assert_eq!(store.get_link(orphan.id).unwrap().unwrap().status, LinkStatus::Done);
    assert!(store.find_page(session_id, "https://example.com/b").unwrap().is_some());
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 1);
}

#[tokio::test]
async fn test_abandoned_claim_with_page_recovers_its_links() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&temp_dir.path().join("frontier.db"), 2);
    config.coordinator.stale_claim_after_secs = 0;
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (SEED, r#"<a href="/b">B</a>"#),
        ("https://example.com/b", r#"<title>B</title><a href="/c">C</a>"#),
    ]));

    let session_id = seed(&config, &fetcher).await;

    // A worker stores /b, spending the last unit of budget, and dies before
    // appending its links or completing it
    let mut dead = other_process(&config);
    let orphan = dead.claim_next_pending_link(session_id).unwrap().unwrap();
    dead.decrement_budget(session_id).unwrap();
    let page_b = dead
        .insert_page(&NewPage {
            session_id,
            link: &orphan.canonical,
            content: "<title>B</title>",
            title: Some("B"),
            metadata: &[],
        })
        .unwrap();
    drop(dead);

    let report = run_worker(&config, &fetcher).await;
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.pages_written, 0);

    let mut store = other_process(&config);
    assert_eq!(store.get_link(orphan.id).unwrap().unwrap().status, LinkStatus::Done);
    assert_eq!(store.count_pages(session_id).unwrap(), 2);

    let recovered = store.claim_next_pending_link(session_id).unwrap().unwrap();
    assert_eq!(recovered.url, "https://example.com/c");
    assert_eq!(recovered.page_id, page_b);
}

#[tokio::test]
async fn test_recovered_links_are_crawled_while_budget_remains() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&temp_dir.path().join("frontier.db"), 5);
    config.coordinator.stale_claim_after_secs = 0;
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (SEED, r#"<a href="/b">B</a>"#),
        ("https://example.com/b", r#"<title>B</title><a href="/c">C</a>"#),
        ("https://example.com/c", "<title>C</title>"),
    ]));

    let session_id = seed(&config, &fetcher).await;

    let mut dead = other_process(&config);
    let orphan = dead.claim_next_pending_link(session_id).unwrap().unwrap();
    dead.decrement_budget(session_id).unwrap();
    dead.insert_page(&NewPage {
        session_id,
        link: &orphan.canonical,
        content: "<title>B</title>",
        title: Some("B"),
        metadata: &[],
    })
    .unwrap();
    drop(dead);

    let report = run_worker(&config, &fetcher).await;
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.pages_written, 1);
    assert_eq!(report.links_completed, 1);

    let store = other_process(&config);
    assert!(store.find_page(session_id, "https://example.com/c").unwrap().is_some());
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Pending).unwrap(), 0);
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Claimed).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_waits_for_session_to_appear() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&temp_dir.path().join("frontier.db"), 3);
    let fetcher = Arc::new(ScriptedFetcher::new(&[(SEED, "<title>A</title>")]));

    let worker = Worker::new(0, open_coordinator(&config).unwrap(), Arc::clone(&fetcher));
    let handle = tokio::spawn(async move { worker.run(SEED).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let session_id = seed(&config, &fetcher).await;

    let report = handle.await.unwrap();
    assert_eq!(report.session_id, Some(session_id));
    assert_eq!(report.links_completed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_workers_never_exceed_budget() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&temp_dir.path().join("frontier.db"), 5);
    config.coordinator.worker_count = 4;

    let links: String = (1..=12)
        .map(|i| format!(r#"<a href="/p{i}">P{i}</a>"#))
        .collect();
    let urls: Vec<String> = std::iter::once(SEED.to_string())
        .chain((1..=12).map(|i| format!("https://example.com/p{i}")))
        .collect();
    let script: Vec<(&str, &str)> = urls.iter().map(|u| (u.as_str(), links.as_str())).collect();
    let fetcher = Arc::new(ScriptedFetcher::new(&script));

    let reports = crawl(&config, Arc::clone(&fetcher), SEED, true).await.unwrap();
    assert_eq!(reports.len(), 4);

    let store = other_process(&config);
    let session = store.find_session_by_url(SEED).unwrap().unwrap();
    let pages = store.count_pages(session.id).unwrap();
    let written: u64 = reports.iter().map(|r| r.pages_written).sum();

    assert!(pages <= 5);
    assert_eq!(pages, written + 1);
    assert!(session.remaining_budget <= 0);
    assert_eq!(store.count_links_by_status(session.id, LinkStatus::Claimed).unwrap(), 0);
    assert!(fetcher.requested().len() >= 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_fetch_is_not_taken_over_by_a_second_worker() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&temp_dir.path().join("frontier.db"), 5);
    config.coordinator.worker_count = 2;
    config.coordinator.stale_claim_after_secs = 5;

    let fetcher = Arc::new(SlowFetcher {
        inner: ScriptedFetcher::new(&[
            (SEED, r#"<a href="/b">B</a>"#),
            ("https://example.com/b", "<title>B</title>"),
        ]),
        slow_url: "https://example.com/b".to_string(),
        delay: Duration::from_millis(500),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });

    let session_id = seed(&config, &fetcher.inner).await;
    let reports = crawl(&config, Arc::clone(&fetcher), SEED, false).await.unwrap();
    let total = WorkerReport::total(&reports);

    // The idle worker waits on the live claim instead of reclaiming it
    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    let fetches_of_b = fetcher
        .inner
        .requested()
        .iter()
        .filter(|u| u.as_str() == "https://example.com/b")
        .count();
    assert_eq!(fetches_of_b, 1);
    assert_eq!(total.reconciled, 0);
    assert_eq!(total.duplicates, 0);
    assert_eq!(total.lost_claims, 0);
    assert_eq!(total.pages_written, 1);

    let store = other_process(&config);
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 3);
}

#[tokio::test]
async fn test_claim_taken_back_mid_fetch_is_not_counted_as_completed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("frontier.db");
    let config = create_test_config(&db_path, 5);

    let fetcher = Arc::new(ReclaimingFetcher {
        inner: ScriptedFetcher::new(&[
            (SEED, r#"<a href="/b">B</a>"#),
            ("https://example.com/b", "<title>B</title>"),
        ]),
        db_path,
        target: "https://example.com/b".to_string(),
        fired: AtomicBool::new(false),
    });

    let session_id = seed(&config, &fetcher.inner).await;
    let report = Worker::new(0, open_coordinator(&config).unwrap(), Arc::clone(&fetcher))
        .run(SEED)
        .await;

    // The first pass loses its claim; the requeued link is then processed again
    assert_eq!(report.lost_claims, 1);
    assert_eq!(report.links_completed, 1);
    assert_eq!(report.pages_written, 1);
    assert_eq!(report.duplicates, 1);

    let store = other_process(&config);
    assert_eq!(store.count_pages(session_id).unwrap(), 2);
    assert_eq!(store.count_links_by_status(session_id, LinkStatus::Done).unwrap(), 1);
    assert_eq!(store.get_session(session_id).unwrap().unwrap().remaining_budget, 2);
}
