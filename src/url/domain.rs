use url::{Host, Url};

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use crawl_frontier::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Derives the crawl scope from a seed URL
///
/// The scope is the last two labels of the host (`blog.example.com` and
/// `www.example.com` both scope to `example.com`). IP hosts and single-label
/// hosts such as `localhost` are used verbatim.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use crawl_frontier::url::scope_domain;
///
/// let url = Url::parse("https://www.news.example.com/a").unwrap();
/// assert_eq!(scope_domain(&url), Some("example.com".to_string()));
/// ```
pub fn scope_domain(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
        Host::Domain(host) => {
            let host = host.to_lowercase();
            let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
            if labels.len() <= 2 {
                Some(labels.join("."))
            } else {
                Some(labels[labels.len() - 2..].join("."))
            }
        }
    }
}

/// Returns true if the URL's host is the scope domain or one of its subdomains
pub fn is_in_scope(url: &Url, scope: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };

    let host = host.trim_start_matches('[').trim_end_matches(']').to_lowercase();
    host == scope || host.ends_with(&format!(".{}", scope))
}
