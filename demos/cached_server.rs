//! A small server with response caching in front of a slow endpoint.
//!
//! ```text
//! RUST_LOG=debug cargo run --example cached_server -- [settings.json]
//! curl -i 'http://127.0.0.1:8080/report?b=2&a=1'
//! ```
//!
//! The optional settings file uses the `CacheSettings` JSON shape, e.g.
//! `{ "ttl_secs": 10, "ignore_query": true }`.

use std::sync::Arc;
use std::time::Duration;

use rttp_cache::StatusCode;
use rttp_cache::cache::{
    CacheConfig, CacheConfigBuilder, CacheMiddleware, CacheOutcome, CacheSettings, MemoryStore,
};
use rttp_cache::middleware::{Handler, LoggerMiddleware, Middleware, Pipeline, handler_fn};
use rttp_cache::server::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs whether each request was served from the cache.
struct OutcomeLogger;

impl Middleware for OutcomeLogger {
    fn wrap(&self, next: Handler) -> Handler {
        handler_fn(move |ctx| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let result = next(ctx).await;
                if let Some(outcome) = ctx.extensions().get::<CacheOutcome>() {
                    info!(path = %ctx.request().path(), outcome = ?outcome, "cache");
                }
                result
            })
        })
    }
}

fn load_config() -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(CacheConfig::builder()
            .ttl(Duration::from_secs(10))
            .refresh(|ctx| ctx.request().headers().get("cache-control") == Some("no-cache"))
            .build());
    };

    let settings = CacheSettings::from_json(&std::fs::read_to_string(path)?)?;
    Ok(CacheConfigBuilder::from_settings(settings)?.build())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rttp_cache=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    info!(?config, "cache configured");

    let handler = Pipeline::new()
        .layer(Arc::new(LoggerMiddleware))
        .layer(Arc::new(OutcomeLogger))
        .layer(Arc::new(CacheMiddleware::new(
            config,
            MemoryStore::with_capacity(1024),
        )))
        .finish(handler_fn(|ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let body = format!(
                    "report for {} ({})\n",
                    ctx.request().path(),
                    ctx.request().query_string().unwrap_or("no query")
                );
                ctx.string(StatusCode::Ok, body)
            })
        }));

    let server = Server::bind("127.0.0.1:8080").await?;
    server.run(handler).await?;
    Ok(())
}
