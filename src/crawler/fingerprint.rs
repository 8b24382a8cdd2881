//! Item fingerprints
//!
//! A fingerprint is the SHA-256 hex digest of an item's canonical identity.
//! Sources whose URLs identify items derive it before fetching; otherwise it
//! is computed from the fetched page.

use crate::crawler::IdentityRule;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Query parameters that never contribute to identity
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "mc_eid", "ref", "source", "from", "spm",
];

/// SHA-256 hex digest of canonical item identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes arbitrary identity bytes
    pub fn digest(input: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(input);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Wraps an already computed hex digest, e.g. one read back from storage
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which this fingerprint lives in the cache
    pub fn cache_key(&self) -> String {
        format!("fp:{}", self.0)
    }

    /// Derives a fingerprint from the item URL alone
    ///
    /// Returns `None` when the rule needs the fetched content, or when the URL
    /// lacks what the rule keys on (e.g. the query parameter is missing).
    pub fn from_url(url: &str, rule: &IdentityRule) -> Option<Self> {
        match rule {
            IdentityRule::QueryParam(param) => {
                let parsed = Url::parse(url).ok()?;
                let host = canonical_host(&parsed)?;
                let value = parsed
                    .query_pairs()
                    .find(|(k, v)| k == param.as_str() && !v.is_empty())
                    .map(|(_, v)| v.into_owned())?;
                Some(Self::digest(format!("{}|{}={}", host, param, value).as_bytes()))
            }
            IdentityRule::Path => {
                canonicalize_url(url).map(|canonical| Self::digest(canonical.as_bytes()))
            }
            IdentityRule::Content => None,
        }
    }

    /// Derives a fingerprint from a fetched page
    ///
    /// The canonical link wins when present and parseable; otherwise the final
    /// URL and the body are hashed together.
    pub fn from_page(final_url: &str, canonical: Option<&str>, body: &str) -> Self {
        if let Some(canonical) = canonical.and_then(canonicalize_url) {
            return Self::digest(canonical.as_bytes());
        }

        let mut hasher = Sha256::new();
        hasher.update(final_url.as_bytes());
        hasher.update(b"\n");
        hasher.update(body.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduces a URL to its identity-bearing parts
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject anything but HTTP(S)
/// 2. Drop the scheme so http and https variants collide
/// 3. Lowercase the host and strip a `www.` prefix, keep a non-default port
/// 4. Remove dot segments, empty segments and a trailing slash
/// 5. Drop the fragment and tracking parameters, sort what remains
///
/// # Examples
///
/// ```
/// use harvest_engine::crawler::canonicalize_url;
///
/// let canonical = canonicalize_url("http://WWW.Example.com/a/../b/?z=1&a=2#top").unwrap();
/// assert_eq!(canonical, "example.com/b?a=2&z=1");
/// ```
pub fn canonicalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }

    let mut canonical = canonical_host(&parsed)?;
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{}", port));
    }
    canonical.push_str(&normalize_path(parsed.path()));

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if !params.is_empty() {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        canonical.push('?');
        canonical.push_str(&query);
    }

    Some(canonical)
}

fn canonical_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
