//! Cache key derivation.
//!
//! A key is `METHOD|path`, followed by `|canonical-query` unless the query is
//! ignored. The canonical query lists the parameters stably sorted by name, so
//! `?b=2&a=1` and `?a=1&b=2` share a key while the order of repeated values for
//! one name (`?a=2&a=1`) is kept. Nothing else is normalized: case and
//! percent-escapes are compared exactly as sent.

use std::fmt;

use crate::Request;
use crate::http::Method;

const SEPARATOR: char = '|';

/// The bytes identifying a request under the active cache policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Builds the key from its parts.
    ///
    /// # Examples
    ///
    /// ```
    /// use rttp_cache::cache::CacheKey;
    /// use rttp_cache::http::Method;
    ///
    /// let key = CacheKey::new(&Method::Get, "/items", Some("page=2&sort=asc"), false);
    /// assert_eq!(key.as_bytes(), b"GET|/items|page=2&sort=asc");
    ///
    /// let key = CacheKey::new(&Method::Get, "/items", Some("page=2"), true);
    /// assert_eq!(key.as_bytes(), b"GET|/items");
    /// ```
    pub fn new(method: &Method, path: &str, query: Option<&str>, ignore_query: bool) -> Self {
        let mut key = String::with_capacity(method.as_str().len() + path.len() + 16);
        key.push_str(method.as_str());
        key.push(SEPARATOR);
        key.push_str(path);
        if !ignore_query {
            key.push(SEPARATOR);
            key.push_str(&canonical_query(query.unwrap_or("")));
        }
        Self(key.into_bytes())
    }

    /// Builds the key for `request`.
    pub fn from_request(request: &Request, ignore_query: bool) -> Self {
        Self::new(
            request.method(),
            request.path(),
            request.query_string(),
            ignore_query,
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Re-encodes a raw query string with its parameters in canonical order.
///
/// Empty segments (`a=1&&b=2`) are dropped and a bare name is written as
/// `name=`.
pub fn canonical_query(raw: &str) -> String {
    let mut pairs: Vec<(&str, &str)> = raw
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();

    // Stable: values repeated under one name keep their order.
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = String::with_capacity(raw.len() + 1);
    for (i, (name, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}
