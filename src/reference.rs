//! Reference classification: what kind of link is this, and where does it point?
//!
//! A raw attribute value goes through three filters before anything looks at the
//! filesystem:
//!
//! 1. **Archive wrapper.** `https://web.archive.org/web/20200101000000/https://site.example/a`
//!    and the hostless `/web/20200101000000/https://site.example/a` both become
//!    `https://site.example/a`. Nested wrappers are peeled repeatedly.
//! 2. **Scheme.** Anything with a scheme other than http(s), empty values and
//!    pure fragments are never touched.
//! 3. **Host.** Absolute and protocol-relative URLs are local only when their host
//!    is the site's host or a subdomain of it (`www.` is ignored on both sides).
//!
//! What survives is a [`Target::Local`] path, still carrying its query and
//! fragment, ready for the [resolver](crate::resolve).

use url::Url;

/// Schemes that never point at a page of this site.
const NON_NAVIGABLE_SCHEMES: &[&str] = &["mailto", "tel", "javascript", "data", "blob", "about"];

/// Path segment that introduces an archived capture.
const ARCHIVE_SEGMENT: &str = "/web/";

/// Wrappers nest when an archived page links to another archived page.
const MAX_UNWRAP: usize = 4;

/// Classified reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Nothing to do: empty, a fragment, a non-http scheme, or another site.
    Skip,
    /// A reference into this site. `path` keeps query and fragment.
    Local { path: String, relative: bool },
}

/// Whether `host` equals `base` or is a dot-boundary subdomain of it.
pub fn host_matches(host: &str, base: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let base = base.trim_end_matches('.').to_ascii_lowercase();
    if base.is_empty() {
        return false;
    }
    host == base || host.ends_with(&format!(".{base}"))
}

/// Site identity: both hosts compared without a leading `www.`.
pub fn same_site(host: &str, base_host: &str) -> bool {
    host_matches(strip_www(host), strip_www(base_host))
}

/// Host with a leading `www.` removed.
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.")
        .or_else(|| host.strip_prefix("WWW."))
        .unwrap_or(host)
}

/// Host part of a user-supplied domain (`https://Example.com:8080/` → `example.com`).
///
/// Bare hostnames are accepted as well. Returns `None` when no host can be
/// extracted.
pub fn domain_host(domain: &str) -> Option<String> {
    let domain = domain.trim();
    let candidate = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };
    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(strip_www(&host).to_string())
}

/// Scheme of a reference, if it has one (`mailto:x` → `mailto`).
///
/// A colon only counts when it comes before any `/`, `?` or `#`, and the scheme
/// starts with a letter.
pub fn scheme(raw: &str) -> Option<&str> {
    let end = raw.find(['/', '?', '#']).unwrap_or(raw.len());
    let colon = raw[..end].find(':')?;
    let scheme = &raw[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

/// Whether a reference is never rewritten regardless of the site.
pub fn is_non_navigable(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return true;
    }
    match scheme(raw) {
        Some(s) => {
            let s = s.to_ascii_lowercase();
            NON_NAVIGABLE_SCHEMES.contains(&s.as_str()) || (s != "http" && s != "https")
        }
        None => false,
    }
}

/// Split `scheme://host/rest` into its host and the rest (starting at `/`, `?`,
/// `#`, or empty). Protocol-relative `//host/rest` is accepted too.
fn split_authority(raw: &str) -> Option<(&str, &str)> {
    let lower_prefix: String = raw.chars().take(8).collect::<String>().to_ascii_lowercase();
    let after = if lower_prefix.starts_with("https://") {
        &raw[8..]
    } else if lower_prefix.starts_with("http://") {
        &raw[7..]
    } else if raw.starts_with("//") {
        &raw[2..]
    } else {
        return None;
    };
    let end = after.find(['/', '?', '#']).unwrap_or(after.len());
    let authority = &after[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.split_once(':').map_or(host, |(h, _)| h);
    Some((host, &after[end..]))
}

/// The archived URL inside `/web/<timestamp>/<url>`, if `path` has that shape.
fn unwrap_capture(path: &str) -> Option<String> {
    let rest = path.strip_prefix(ARCHIVE_SEGMENT)?;
    let (timestamp, target) = rest.split_once('/')?;
    if timestamp.is_empty() {
        return None;
    }
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(target.to_string());
    }
    // Some captures collapse the double slash: `/web/2020/https:/site.example/`.
    for scheme in ["https:/", "http:/"] {
        if lower.starts_with(scheme) {
            return Some(format!("{}/{}", &target[..scheme.len()], &target[scheme.len()..]));
        }
    }
    None
}

/// Peel one archive wrapper, if present.
fn strip_once(raw: &str, archive_hosts: &[String]) -> Option<String> {
    if raw.starts_with(ARCHIVE_SEGMENT) {
        return unwrap_capture(raw);
    }
    let (host, rest) = split_authority(raw)?;
    if !archive_hosts.iter().any(|h| host_matches(host, h)) {
        return None;
    }
    unwrap_capture(rest)
}

/// Remove every archive wrapper around `raw`. Unwrapped input is returned as is.
pub fn strip_archive_wrapper(raw: &str, archive_hosts: &[String]) -> String {
    let mut current = raw.trim().to_string();
    for _ in 0..MAX_UNWRAP {
        match strip_once(&current, archive_hosts) {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

/// Build an archive capture URL; the inverse of [`strip_archive_wrapper`].
pub fn wrap(url: &str, timestamp: &str, archive_host: &str) -> String {
    format!("https://{archive_host}{ARCHIVE_SEGMENT}{timestamp}/{url}")
}

/// Classify a raw reference against the site's base host.
///
/// With no base host every absolute URL is foreign.
pub fn classify(raw: &str, archive_hosts: &[String], base_host: Option<&str>) -> Target {
    if is_non_navigable(raw) {
        return Target::Skip;
    }
    let unwrapped = strip_archive_wrapper(raw, archive_hosts);
    if is_non_navigable(&unwrapped) {
        return Target::Skip;
    }

    if let Some((host, rest)) = split_authority(&unwrapped) {
        return match base_host {
            Some(base) if same_site(host, base) => Target::Local {
                path: if rest.starts_with('/') {
                    rest.to_string()
                } else {
                    format!("/{rest}")
                },
                relative: false,
            },
            _ => Target::Skip,
        };
    }

    Target::Local {
        relative: !unwrapped.starts_with('/'),
        path: unwrapped,
    }
}

/// Split `path?query#fragment` into its three parts.
pub fn split_suffix(reference: &str) -> (&str, Option<&str>, Option<&str>) {
    let (rest, fragment) = match reference.split_once('#') {
        Some((r, f)) => (r, Some(f)),
        None => (reference, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    (path, query, fragment)
}
