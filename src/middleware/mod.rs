//! Middleware pipeline — composable wrappers around request handlers.
//!
//! Every stage of the pipeline has the same shape: it receives the per-request
//! [`Context`] by mutable reference and resolves to `Result<(), HandlerError>`.
//! A middleware takes the next stage and returns a new stage of that same
//! shape, so any number of them can be stacked around an endpoint.
//!
//! ## Core types
//!
//! - [`Handler`] — type-erased, cheaply-cloneable pipeline stage.
//! - [`handler_fn`] — turns an async closure into a [`Handler`].
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Pipeline`] — ordered middleware stack wrapped around an endpoint.
//! - [`LoggerMiddleware`] — built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};

use thiserror::Error;
use tokio::time::Instant;

use crate::{StatusCode, context::Context};

/// A boxed, `Send` future borrowing from the request context.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The outcome of a pipeline stage.
pub type HandlerResult = Result<(), HandlerError>;

/// A type-erased, reference-counted pipeline stage.
///
/// The [`Arc`] wrapper makes handlers cheap to clone so a middleware can hold
/// on to the stage it wraps and call it once per request.
pub type Handler = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync>;

/// Errors a handler reports back up the pipeline.
///
/// Middleware pass these through untouched; the server turns an error into a
/// response only when the handler did not write one itself.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Status`].
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// The status the server answers with when this error reaches it.
    pub fn response_status(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            _ => StatusCode::InternalServerError,
        }
    }
}

/// Converts an async closure into a [`Handler`].
///
/// The closure receives the context and must return a boxed future that
/// borrows it, which is what `Box::pin(async move { .. })` produces.
///
/// # Examples
///
/// ```
/// use rttp_cache::StatusCode;
/// use rttp_cache::middleware::handler_fn;
///
/// let hello = handler_fn(|ctx| Box::pin(async move { ctx.string(StatusCode::Ok, "hello") }));
/// ```
pub fn handler_fn<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The core trait for all middleware.
///
/// `wrap` receives the next stage and returns the stage that replaces it. The
/// returned handler may:
///
/// - **Pass through** — call `next(ctx).await` unchanged.
/// - **Short-circuit** — write a response through the context without calling `next`.
/// - **Decorate** — swap the context's writer or extensions around the call to `next`.
///
/// Implementations must be `Send + Sync` because the produced handlers are
/// shared across Tokio tasks.
pub trait Middleware: Send + Sync {
    /// Wraps `next`, returning a stage with the same signature.
    fn wrap(&self, next: Handler) -> Handler;
}

/// An ordered middleware stack.
///
/// Layers added first are outermost: they see the request first and the
/// outcome last.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rttp_cache::StatusCode;
/// use rttp_cache::middleware::{LoggerMiddleware, Pipeline, handler_fn};
///
/// let handler = Pipeline::new()
///     .layer(Arc::new(LoggerMiddleware))
///     .finish(handler_fn(|ctx| Box::pin(async move { ctx.string(StatusCode::Ok, "ok") })));
/// ```
#[derive(Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware inside the ones already added.
    #[must_use]
    pub fn layer(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Returns the number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no layer has been added.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps `endpoint` in every layer and returns the outermost stage.
    pub fn finish(self, endpoint: Handler) -> Handler {
        self.layers
            .iter()
            .rev()
            .fold(endpoint, |next, layer| layer.wrap(next))
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream handler completes,
/// in the format:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// Handler errors are logged at `warn` and returned unchanged.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        handler_fn(move |ctx| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let start = Instant::now();
                let method = ctx.request().method().as_str().to_string();
                let path = ctx.request().path().to_string();

                let result = next(ctx).await;

                let duration = start.elapsed();
                let status = ctx.writer().status().map_or(0, StatusCode::as_u16);

                match &result {
                    Ok(()) => tracing::info!("{} {} - {} ({:?})", method, path, status, duration),
                    Err(e) => tracing::warn!(
                        error = %e,
                        "{} {} - {} ({:?})",
                        method,
                        path,
                        status,
                        duration
                    ),
                }

                result
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use crate::http::ResponseBuffer;
    use std::sync::Mutex;

    fn context(method: &str, path: &str) -> Context {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req, Box::new(ResponseBuffer::new()))
    }

    struct Tag {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Tag {
        fn wrap(&self, next: Handler) -> Handler {
            let name = self.name;
            let seen = Arc::clone(&self.seen);
            handler_fn(move |ctx| {
                let next = Arc::clone(&next);
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(format!("{name}:in"));
                    let result = next(ctx).await;
                    seen.lock().unwrap().push(format!("{name}:out"));
                    result
                })
            })
        }
    }

    #[tokio::test]
    async fn pipeline_runs_layers_outside_in() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let endpoint_seen = Arc::clone(&seen);
        let handler = Pipeline::new()
            .layer(Arc::new(Tag {
                name: "outer",
                seen: Arc::clone(&seen),
            }))
            .layer(Arc::new(Tag {
                name: "inner",
                seen: Arc::clone(&seen),
            }))
            .finish(handler_fn(move |ctx| {
                let seen = Arc::clone(&endpoint_seen);
                Box::pin(async move {
                    seen.lock().unwrap().push("endpoint".to_string());
                    ctx.string(StatusCode::Ok, "ok")
                })
            }));

        let mut ctx = context("GET", "/");
        handler(&mut ctx).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["outer:in", "inner:in", "endpoint", "inner:out", "outer:out"]
        );
    }

    #[tokio::test]
    async fn empty_pipeline_is_endpoint() {
        let pipeline = Pipeline::new();
        assert!(pipeline.is_empty());
        let handler = pipeline.finish(handler_fn(|ctx| {
            Box::pin(async move { ctx.string(StatusCode::NoContent, "") })
        }));

        let mut ctx = context("GET", "/");
        handler(&mut ctx).await.unwrap();
        assert_eq!(ctx.writer().status(), Some(StatusCode::NoContent));
    }

    #[tokio::test]
    async fn logger_passes_errors_through() {
        let handler = Pipeline::new()
            .layer(Arc::new(LoggerMiddleware))
            .finish(handler_fn(|_ctx| {
                Box::pin(async move { Err::<(), _>(HandlerError::status(StatusCode::Conflict, "taken")) })
            }));

        let mut ctx = context("POST", "/names");
        let err = handler(&mut ctx).await.unwrap_err();
        assert_eq!(err.response_status(), StatusCode::Conflict);
    }

    #[test]
    fn io_error_maps_to_500() {
        let err = HandlerError::from(std::io::Error::other("boom"));
        assert_eq!(err.response_status(), StatusCode::InternalServerError);
    }
}
