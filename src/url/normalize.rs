use crate::UrlError;
use url::Url;

/// Query parameters that never change page content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "ref", "source"];

/// Normalizes a URL into the canonical form pages are keyed by
///
/// # Normalization Steps
///
/// 1. Parse; only `http` and `https` are accepted
/// 2. Lowercase the host and drop a leading `www.`
/// 3. Collapse empty path segments and drop the trailing slash (root stays `/`)
/// 4. Drop the fragment
/// 5. Drop tracking parameters (`utm_*` and a fixed list), sort the rest
///
/// Dot segments are already resolved by the `url` parser.
///
/// # Examples
///
/// ```
/// use crawl_frontier::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/page/?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    if let Some(stripped) = host.strip_prefix("www.") {
        let stripped = stripped.to_string();
        url.set_host(Some(&stripped))
            .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    }

    let path = collapse_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Returns the canonical string a page for this link is stored under
///
/// Links that cannot be normalized are kept verbatim so that they still
/// participate in duplicate detection.
pub fn canonical_link(link: &str) -> String {
    match normalize_url(link) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::debug!("Keeping unnormalizable link {} verbatim: {}", link, e);
            link.to_string()
        }
    }
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

fn collapse_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
