//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Bounded retries with a fixed delay between attempts
//! - Carrying cookie state from one attempt (and one call) to the next

use crate::config::{Config, FetcherConfig, UserAgentConfig};
use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{redirect::Policy, Client};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cookies carried between fetch attempts
///
/// The state is passed into a fetch and handed back with the result; the
/// fetcher itself holds no cookie jar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieState {
    cookies: BTreeMap<String, String>,
}

impl CookieState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Merges one `Set-Cookie` header value
    ///
    /// Only the leading `name=value` pair is kept; attributes such as `Path`
    /// or `Expires` are ignored. Malformed values are skipped.
    pub fn merge_set_cookie(&mut self, header: &str) {
        let pair = header.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                self.cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }

    /// Value for an outgoing `Cookie` header, if any cookie is set
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// A successfully fetched document
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// Raw response body
    pub bytes: Vec<u8>,
    /// Body decoded as text (lossy UTF-8)
    pub text: String,
    /// Cookie state after the successful attempt
    pub cookies: CookieState,
}

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedPage),

    /// Every attempt failed
    Failed { attempts: u32, last_error: String },
}

/// How many times a URL is tried and how long to wait between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &FetcherConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }
}

/// Fetches pages for the crawler
///
/// Implementations must retry on their own; a `Failed` outcome is final.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cookies: Option<&CookieState>) -> FetchOutcome;
}

/// Formats the user agent string
///
/// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Timeout for one request attempt
///
/// # Example
///
/// ```no_run
/// use crawl_frontier::config::UserAgentConfig;
/// use crawl_frontier::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "CrawlFrontier".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Production fetcher over `reqwest`
///
/// Any non-2xx status and any transport error is retried until the policy's
/// attempts are used up.
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_http_client(&config.user_agent, config.fetcher.request_timeout())?;
        Ok(Self::new(client, RetryPolicy::from_config(&config.fetcher)))
    }

    async fn attempt(&self, url: &str, cookies: &mut CookieState) -> Result<FetchedPage, String> {
        let mut request = self.client.get(url);
        if let Some(header) = cookies.header_value() {
            request = request.header(COOKIE, header);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                format!("Connection failed: {}", e)
            } else {
                e.to_string()
            }
        })?;

        // Cookies set on a failed attempt still go out with the next one
        for value in response.headers().get_all(SET_COOKIE) {
            if let Ok(value) = value.to_str() {
                cookies.merge_set_cookie(value);
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?.to_vec();
        let text = String::from_utf8_lossy(&bytes).into_owned();

        Ok(FetchedPage {
            final_url,
            bytes,
            text,
            cookies: cookies.clone(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&CookieState>) -> FetchOutcome {
        let mut state = cookies.cloned().unwrap_or_default();
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(url, &mut state).await {
                Ok(page) => return FetchOutcome::Fetched(page),
                Err(e) => {
                    tracing::debug!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        url,
                        e
                    );
                    last_error = e;
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        FetchOutcome::Failed {
            attempts: self.policy.max_attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestCrawler".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        let config = create_test_config();
        let client = build_http_client(&config, Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn test_user_agent_format() {
        assert_eq!(
            user_agent_string(&create_test_config()),
            "TestCrawler/1.0 (+https://example.com/about; admin@example.com)"
        );
    }

    #[test]
    fn test_retry_policy_has_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_cookie_merge_ignores_attributes() {
        let mut cookies = CookieState::new();
        cookies.merge_set_cookie("sid=abc123; Path=/; HttpOnly");
        cookies.merge_set_cookie("theme=dark");

        assert_eq!(cookies.get("sid"), Some("abc123"));
        assert_eq!(cookies.header_value().as_deref(), Some("sid=abc123; theme=dark"));
    }

    #[test]
    fn test_cookie_merge_overwrites_and_skips_garbage() {
        let mut cookies = CookieState::new();
        cookies.merge_set_cookie("sid=old");
        cookies.merge_set_cookie("sid=new; Secure");
        cookies.merge_set_cookie("no-equals-sign");
        cookies.merge_set_cookie("=orphan");

        assert_eq!(cookies.get("sid"), Some("new"));
        assert_eq!(cookies.header_value().as_deref(), Some("sid=new"));
    }

    #[test]
    fn test_empty_cookie_state_sends_no_header() {
        assert!(CookieState::new().header_value().is_none());
        assert!(CookieState::new().is_empty());
    }
}
