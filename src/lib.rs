//! Crawl-Frontier: a crawler whose workers coordinate through a shared store
//!
//! This crate implements a web crawler in which any number of independent worker
//! processes share one crawl frontier persisted in SQLite. Workers claim links
//! atomically, spend a per-session page budget, and recover links abandoned by
//! workers that died mid-fetch.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Crawl-Frontier operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Seed fetch failed for {url} after {attempts} attempts: {reason}")]
    SeedFetch {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("No session exists for {0}")]
    UnknownSession(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

// Re-export commonly used types
pub use config::Config;
pub use state::{LinkStatus, SessionPhase};
pub use url::{extract_domain, normalize_url, scope_domain};
