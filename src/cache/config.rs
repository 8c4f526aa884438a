//! Cache middleware configuration.
//!
//! A [`CacheConfig`] is built once, with every unset option filled from the
//! defaults below, and never changes afterwards.
//!
//! | Option         | Default        |
//! |----------------|----------------|
//! | `ttl`          | 60 seconds     |
//! | `methods`      | `GET`          |
//! | `status_codes` | `200`, `404`   |
//! | `ignore_query` | `false`        |
//! | `refresh`      | none           |
//! | `cache_if`     | none           |
//!
//! Settings can also be loaded from JSON through [`CacheSettings`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::context::Context;
use crate::http::{InvalidStatusCode, Method, StatusCode};

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_METHODS: [Method; 1] = [Method::Get];
pub const DEFAULT_STATUS_CODES: [StatusCode; 2] = [StatusCode::Ok, StatusCode::NotFound];

/// A per-request decision hook.
pub type RequestPredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Errors raised while turning [`CacheSettings`] into a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid cache settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cacheable status: {0}")]
    Status(#[from] InvalidStatusCode),
}

/// Immutable cache middleware configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::cache::CacheConfig;
/// use rttp_cache::http::{Method, StatusCode};
///
/// let config = CacheConfig::builder()
///     .ttl(Duration::from_secs(5))
///     .methods([Method::Get, Method::Head])
///     .ignore_query(true)
///     .build();
///
/// assert_eq!(config.ttl_secs(), 5);
/// assert_eq!(config.status_codes(), &[StatusCode::Ok, StatusCode::NotFound]);
/// ```
#[derive(Clone)]
pub struct CacheConfig {
    pub(crate) ttl: Duration,
    pub(crate) methods: Vec<Method>,
    pub(crate) status_codes: Vec<StatusCode>,
    pub(crate) ignore_query: bool,
    pub(crate) refresh: Option<RequestPredicate>,
    pub(crate) cache_if: Option<RequestPredicate>,
}

impl CacheConfig {
    /// Starts a builder with nothing set.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The TTL handed to the store, in whole seconds.
    ///
    /// Fractions are dropped, except that a non-zero TTL under one second
    /// becomes `1` so it cannot turn into the store's "never expires" `0`.
    pub fn ttl_secs(&self) -> u32 {
        if self.ttl.is_zero() {
            return 0;
        }
        u32::try_from(self.ttl.as_secs())
            .unwrap_or(u32::MAX)
            .max(1)
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn status_codes(&self) -> &[StatusCode] {
        &self.status_codes
    }

    pub fn ignore_query(&self) -> bool {
        self.ignore_query
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("methods", &self.methods)
            .field("status_codes", &self.status_codes)
            .field("ignore_query", &self.ignore_query)
            .field("refresh", &self.refresh.is_some())
            .field("cache_if", &self.cache_if.is_some())
            .finish()
    }
}

/// Builder for [`CacheConfig`]; unset options take their defaults in [`build`](Self::build).
#[derive(Default)]
pub struct CacheConfigBuilder {
    ttl: Option<Duration>,
    methods: Option<Vec<Method>>,
    status_codes: Option<Vec<StatusCode>>,
    ignore_query: Option<bool>,
    refresh: Option<RequestPredicate>,
    cache_if: Option<RequestPredicate>,
}

impl CacheConfigBuilder {
    /// Starts from declarative settings; any field left out stays unset.
    pub fn from_settings(settings: CacheSettings) -> Result<Self, ConfigError> {
        let status_codes = settings
            .status_codes
            .map(|codes| {
                codes
                    .into_iter()
                    .map(StatusCode::try_from)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let methods = settings.methods.map(|names| {
            names
                .iter()
                .map(|name| match name.to_ascii_uppercase().parse::<Method>() {
                    Ok(method) => method,
                    Err(never) => match never {},
                })
                .collect()
        });

        Ok(Self {
            ttl: settings.ttl_secs.map(Duration::from_secs),
            methods,
            status_codes,
            ignore_query: settings.ignore_query,
            refresh: None,
            cache_if: None,
        })
    }

    /// How long stored entries stay valid.
    ///
    /// Stores work in whole seconds: fractions are dropped, anything between
    /// zero and one second is stored as one second, and [`Duration::ZERO`]
    /// asks the store to keep entries until evicted.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Methods eligible for caching when no [`cache_if`](Self::cache_if) predicate is set.
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Response statuses worth storing.
    #[must_use]
    pub fn status_codes(mut self, codes: impl IntoIterator<Item = StatusCode>) -> Self {
        self.status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Leave the query string out of cache keys.
    #[must_use]
    pub fn ignore_query(mut self, ignore: bool) -> Self {
        self.ignore_query = Some(ignore);
        self
    }

    /// Skips the lookup, and so regenerates the entry, whenever `predicate` is true.
    #[must_use]
    pub fn refresh<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.refresh = Some(Arc::new(predicate));
        self
    }

    /// Decides eligibility per request; the method list is ignored once this is set.
    #[must_use]
    pub fn cache_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.cache_if = Some(Arc::new(predicate));
        self
    }

    /// Fills every unset option with its default.
    pub fn build(self) -> CacheConfig {
        if let Some(ttl) = self.ttl {
            if !ttl.is_zero() && ttl < Duration::from_secs(1) {
                warn!(ttl = ?ttl, "cache TTL below one second is rounded up to 1s");
            }
        }

        CacheConfig {
            ttl: self.ttl.unwrap_or(DEFAULT_TTL),
            methods: self.methods.unwrap_or_else(|| DEFAULT_METHODS.to_vec()),
            status_codes: self
                .status_codes
                .unwrap_or_else(|| DEFAULT_STATUS_CODES.to_vec()),
            ignore_query: self.ignore_query.unwrap_or(false),
            refresh: self.refresh,
            cache_if: self.cache_if,
        }
    }
}

/// Declarative form of the data-only options, e.g. from a config file.
///
/// ```json
/// { "ttl_secs": 30, "methods": ["GET", "HEAD"], "status_codes": [200], "ignore_query": true }
/// ```
///
/// `status_codes` accepts any code in `100..=999`, named or not.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    #[serde(default)]
    pub status_codes: Option<Vec<u16>>,
    #[serde(default)]
    pub ignore_query: Option<bool>,
}

impl CacheSettings {
    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}
