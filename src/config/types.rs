use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Crawl-Frontier
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
}

/// Per-session settings applied when a session is created
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Number of pages a new session may accept (the seed page included)
    #[serde(rename = "initial-budget", default = "default_initial_budget")]
    pub initial_budget: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_budget: default_initial_budget(),
        }
    }
}

/// Worker and session coordination settings
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of worker tasks started by this process
    #[serde(rename = "worker-count", default = "default_worker_count")]
    pub worker_count: u32,

    /// First delay between polls for a pending link (milliseconds)
    #[serde(
        rename = "claim-poll-interval-ms",
        default = "default_claim_poll_interval_ms"
    )]
    pub claim_poll_interval_ms: u64,

    /// Cap on the claim poll delay (milliseconds)
    #[serde(rename = "claim-poll-max-ms", default = "default_claim_poll_max_ms")]
    pub claim_poll_max_ms: u64,

    /// Delay between lookups while a session is not yet visible (milliseconds)
    #[serde(
        rename = "session-poll-interval-ms",
        default = "default_session_poll_interval_ms"
    )]
    pub session_poll_interval_ms: u64,

    /// Age after which a claimed link is presumed abandoned (seconds)
    #[serde(
        rename = "stale-claim-after-secs",
        default = "default_stale_claim_after_secs"
    )]
    pub stale_claim_after_secs: u64,

    /// How long a frontier with no pending and no claimed links is waited on (seconds)
    #[serde(rename = "idle-timeout-secs", default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Base delay for retrying transient store failures (milliseconds)
    #[serde(rename = "store-retry-base-ms", default = "default_store_retry_base_ms")]
    pub store_retry_base_ms: u64,

    /// Cap on the store retry delay (milliseconds)
    #[serde(rename = "store-retry-max-ms", default = "default_store_retry_max_ms")]
    pub store_retry_max_ms: u64,
}

impl CoordinatorConfig {
    pub fn claim_poll_interval(&self) -> Duration {
        Duration::from_millis(self.claim_poll_interval_ms)
    }

    pub fn claim_poll_max(&self) -> Duration {
        Duration::from_millis(self.claim_poll_max_ms)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session_poll_interval_ms)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_after_secs)
    }

    /// Claims taken at or before the returned instant are presumed abandoned
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.stale_claim_after())
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn store_retry_base(&self) -> Duration {
        Duration::from_millis(self.store_retry_base_ms)
    }

    pub fn store_retry_max(&self) -> Duration {
        Duration::from_millis(self.store_retry_max_ms)
    }
}

impl FetcherConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Longest a single fetch may take: every attempt timing out, with the
    /// retry delay between attempts
    pub fn worst_case_fetch(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.request_timeout()
            .saturating_mul(attempts)
            .saturating_add(self.retry_delay().saturating_mul(attempts - 1))
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            claim_poll_interval_ms: default_claim_poll_interval_ms(),
            claim_poll_max_ms: default_claim_poll_max_ms(),
            session_poll_interval_ms: default_session_poll_interval_ms(),
            stale_claim_after_secs: default_stale_claim_after_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            store_retry_base_ms: default_store_retry_base_ms(),
            store_retry_max_ms: default_store_retry_max_ms(),
        }
    }
}

/// HTTP fetch settings
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Attempts per URL before the fetch is considered permanently failed
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Timeout for a single HTTP attempt (seconds)
    #[serde(
        rename = "request-timeout-secs",
        default = "default_request_timeout_secs"
    )]
    pub request_timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Shared store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file shared by all workers
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// How long a connection waits on a locked database (milliseconds)
    #[serde(rename = "busy-timeout-ms", default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_initial_budget() -> i64 {
    9
}

fn default_worker_count() -> u32 {
    1
}

fn default_claim_poll_interval_ms() -> u64 {
    500
}

fn default_claim_poll_max_ms() -> u64 {
    5_000
}

fn default_session_poll_interval_ms() -> u64 {
    1_000
}

fn default_stale_claim_after_secs() -> u64 {
    600
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_store_retry_base_ms() -> u64 {
    250
}

fn default_store_retry_max_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}
