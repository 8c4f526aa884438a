//! Response caching layer.
//!
//! [`CacheMiddleware`] sits in a [`Pipeline`](crate::middleware::Pipeline) and
//! answers repeated requests from a [`CacheStore`] instead of running the
//! handler again.
//!
//! ## Pieces
//!
//! - [`CacheKey`] — `METHOD|path|canonical-query` lookup key.
//! - [`CacheConfig`] — which requests and statuses are cached, for how long.
//! - [`ResponseRecorder`] — writer wrapper capturing what the handler sends.
//! - [`CacheEntry`] — captured response plus its binary storage format.
//! - [`CacheStore`] / [`RawStore`] / [`Classified`] — storage seam;
//!   [`MemoryStore`] is the bundled in-process backend.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rttp_cache::StatusCode;
//! use rttp_cache::cache::{CacheConfig, CacheMiddleware, MemoryStore};
//! use rttp_cache::middleware::{LoggerMiddleware, Pipeline, handler_fn};
//!
//! let config = CacheConfig::builder()
//!     .ttl(Duration::from_secs(30))
//!     .ignore_query(true)
//!     .build();
//!
//! let handler = Pipeline::new()
//!     .layer(Arc::new(LoggerMiddleware))
//!     .layer(Arc::new(CacheMiddleware::new(config, MemoryStore::new())))
//!     .finish(handler_fn(|ctx| Box::pin(async move { ctx.string(StatusCode::Ok, "expensive") })));
//! ```

mod config;
mod entry;
mod key;
mod middleware;
mod policy;
mod recorder;
mod store;

pub use config::{
    CacheConfig, CacheConfigBuilder, CacheSettings, ConfigError, DEFAULT_METHODS,
    DEFAULT_STATUS_CODES, DEFAULT_TTL, RequestPredicate,
};
pub use entry::{CacheEntry, DecodeError};
pub use key::{CacheKey, canonical_query};
pub use middleware::{CacheMiddleware, CacheOutcome};
pub use recorder::ResponseRecorder;
pub use store::{CacheStore, Classified, DEFAULT_CAPACITY, MemoryStore, RawStore, StoreError};
