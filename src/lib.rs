//! # rttp-cache
//!
//! HTTP response caching middleware on top of a small async HTTP/1.1 server.
//!
//! Handlers are composed into a [`Pipeline`](middleware::Pipeline); placing a
//! [`CacheMiddleware`](cache::CacheMiddleware) in it serves repeated requests
//! from a [`CacheStore`](cache::CacheStore) instead of re-running the handler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rttp_cache::server::Server;
//! use rttp_cache::StatusCode;
//! use rttp_cache::cache::{CacheConfig, CacheMiddleware, MemoryStore};
//! use rttp_cache::middleware::{Pipeline, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = Pipeline::new()
//!         .layer(Arc::new(CacheMiddleware::new(CacheConfig::default(), MemoryStore::new())))
//!         .finish(handler_fn(|ctx| {
//!             Box::pin(async move { ctx.string(StatusCode::Ok, "Hello, World!") })
//!         }));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://127.0.0.1:8080");
//!     server.run(handler).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
