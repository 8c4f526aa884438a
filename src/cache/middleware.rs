//! The caching middleware.
//!
//! Per request:
//!
//! 1. Requests failing the eligibility check go straight to the next stage.
//! 2. Otherwise the cache key is built and, unless a refresh is requested, the
//!    store is consulted. A decodable entry is replayed and the next stage is
//!    never called.
//! 3. On a miss the writer is wrapped in a [`ResponseRecorder`], the next stage
//!    runs, and the recorded response is stored if its status qualifies. A
//!    stage that fails before writing anything leaves nothing to store.
//!
//! Store failures and corrupt entries are logged and handled as misses; the
//! caller always gets the handler's own result.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::Context;
use crate::middleware::{Handler, HandlerResult, Middleware, handler_fn};

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::key::CacheKey;
use super::recorder::ResponseRecorder;
use super::store::{CacheStore, StoreError};

/// What the cache did with a request; stored in the request's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Not eligible; passed through without lookup or capture.
    Bypass,
    /// Served from the store.
    Hit,
    /// Nothing usable stored; the handler ran and its response was captured.
    Miss,
    /// Lookup skipped by the refresh predicate; the handler ran and was captured.
    Refresh,
}

/// Response caching middleware.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rttp_cache::StatusCode;
/// use rttp_cache::cache::{CacheConfig, CacheMiddleware, MemoryStore};
/// use rttp_cache::middleware::{Pipeline, handler_fn};
///
/// let cache = CacheMiddleware::new(CacheConfig::default(), MemoryStore::new());
/// let handler = Pipeline::new()
///     .layer(Arc::new(cache))
///     .finish(handler_fn(|ctx| Box::pin(async move { ctx.string(StatusCode::Ok, "hi") })));
/// ```
#[derive(Clone)]
pub struct CacheMiddleware {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
}

enum Lookup {
    Hit(CacheEntry),
    Miss,
    Refresh,
}

impl CacheMiddleware {
    pub fn new(config: CacheConfig, store: impl CacheStore + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store: Arc::new(store),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl Middleware for CacheMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        let inner = Arc::clone(&self.inner);
        handler_fn(move |ctx| {
            let inner = Arc::clone(&inner);
            let next = Arc::clone(&next);
            Box::pin(async move { inner.serve(ctx, &next).await })
        })
    }
}

impl Inner {
    async fn serve(&self, ctx: &mut Context, next: &Handler) -> HandlerResult {
        if !self.config.is_cacheable(ctx) {
            ctx.extensions_mut().insert(CacheOutcome::Bypass);
            return next(ctx).await;
        }

        let method = ctx.request().method();
        if method.may_have_body() {
            warn!(method = %method, "caching a request that may carry a body; the body is not part of the key");
        }

        let key = CacheKey::from_request(ctx.request(), self.config.ignore_query());

        let outcome = match self.lookup(&key, ctx) {
            Lookup::Hit(entry) => {
                debug!(key = %key, status = entry.status().as_u16(), "cache hit");
                ctx.extensions_mut().insert(CacheOutcome::Hit);
                entry.replay(ctx.writer_mut())?;
                return Ok(());
            }
            Lookup::Miss => CacheOutcome::Miss,
            Lookup::Refresh => CacheOutcome::Refresh,
        };
        ctx.extensions_mut().insert(outcome);

        ctx.wrap_writer(|real| Box::new(ResponseRecorder::new(real)));
        let result = next(ctx).await;

        match ctx.writer_as::<ResponseRecorder>() {
            Some(recorder) => {
                let committed = recorder.is_committed();
                let (real, entry) = recorder.finish();
                ctx.replace_writer(real);
                // An error with nothing written is answered by an outer layer.
                if result.is_err() && !committed {
                    debug!(key = %key, "handler failed without a response; not cached");
                } else {
                    self.store(&key, &entry);
                }
            }
            None => {
                error!(key = %key, "response recorder was replaced downstream; response not cached")
            }
        }

        result
    }

    fn lookup(&self, key: &CacheKey, ctx: &Context) -> Lookup {
        if self.config.should_refresh(ctx) {
            debug!(key = %key, "cache refresh requested");
            return Lookup::Refresh;
        }

        let payload = match self.store.get(key.as_bytes()) {
            Ok(payload) => payload,
            Err(StoreError::NotFound) => return Lookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed");
                return Lookup::Miss;
            }
        };

        match CacheEntry::decode(&payload) {
            Ok(entry) => Lookup::Hit(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
                Lookup::Miss
            }
        }
    }

    fn store(&self, key: &CacheKey, entry: &CacheEntry) {
        if !self.config.is_status_cacheable(entry.status()) {
            debug!(key = %key, status = entry.status().as_u16(), "status not cacheable");
            return;
        }

        if let Err(e) = self
            .store
            .set(key.as_bytes(), entry.encode(), self.config.ttl_secs())
        {
            error!(key = %key, error = %e, "cache write failed");
        }
    }
}
