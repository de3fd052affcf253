//! URL handling module for Crawl-Frontier
//!
//! This module provides canonicalization of fetched links (the key a Page is
//! stored under) and the domain-scope predicate applied to discovered links
//! before they reach the frontier.

mod domain;
mod normalize;

pub use domain::{extract_domain, is_in_scope, scope_domain};
pub use normalize::{canonical_link, normalize_url};
