//! URL canonicalization.
//!
//! Two URLs that point at the same article must compare equal after
//! [`Canonicalizer::canonicalize`]. The rules are narrow: scheme, host
//! case and trailing slashes on a non-root path. Query strings and the
//! rest of the path are left untouched.

use url::Url;

/// Normalizes URLs into a stable comparable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canonicalizer {
    /// Rewrite `http` to `https`.
    pub force_https: bool,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self { force_https: true }
    }
}

impl Canonicalizer {
    pub fn new(force_https: bool) -> Self {
        Self { force_https }
    }

    /// Canonicalize `raw`. Input that does not parse as an absolute URL is
    /// returned trimmed but otherwise unchanged.
    ///
    /// Only the scheme, the host and trailing slashes are touched; the
    /// path, query and fragment are copied through byte for byte. The
    /// function is a projection: applying it twice gives the same result
    /// as applying it once.
    pub fn canonicalize(&self, raw: &str) -> String {
        let raw = raw.trim();
        if Url::parse(raw).is_err() {
            return raw.to_string();
        }
        let Some((scheme, rest)) = raw.split_once("://") else {
            return raw.to_string();
        };

        let mut scheme = scheme.to_ascii_lowercase();
        if self.force_https && scheme == "http" {
            scheme = "https".to_string();
        }

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let authority = match authority.rsplit_once('@') {
            Some((userinfo, host)) => format!("{userinfo}@{}", host.to_ascii_lowercase()),
            None => authority.to_ascii_lowercase(),
        };

        let path_end = tail.find(['?', '#']).unwrap_or(tail.len());
        let (path, suffix) = tail.split_at(path_end);
        // Strip the whole run of slashes so a second pass is a no-op.
        let path = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };

        format!("{scheme}://{authority}{path}{suffix}")
    }
}

/// Canonicalize with the default rules (`https` forced).
pub fn canonicalize(raw: &str) -> String {
    Canonicalizer::default().canonicalize(raw)
}

/// Lower-cased host of `raw`, if it parses.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}
