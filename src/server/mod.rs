//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and runs each HTTP/1.1 request through a pipeline
//! [`Handler`]. Supports HTTP/1.1 persistent connections (keep-alive) out of the box.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::http::{
    ResponseBuffer, ResponseWriter, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::Handler;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// pipeline handler.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::server::Server;
/// use rttp_cache::StatusCode;
/// use rttp_cache::middleware::handler_fn;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run(handler_fn(|ctx| Box::pin(async move { ctx.string(StatusCode::Ok, "Hello!") })))
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// Every request gets a fresh [`Context`] whose writer buffers the
    /// response; once the handler returns, the buffered response is written to
    /// the socket. A handler error that left no response behind is answered
    /// with the error's status.
    ///
    /// This method runs until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, handler: Handler) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "rttp listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Handler,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered.
        if buf.is_empty() || matches!(Request::parse(&buf), Err(RequestError::Incomplete)) {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
        }

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            let err = RequestError::BodyTooLarge {
                max_bytes: MAX_REQUEST_SIZE,
            };
            warn!(peer = %peer_addr, error = %err, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body(err.to_string())
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed mid-body");
                break;
            }
            continue;
        }
        request.truncate_body(content_length);

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = dispatch(&handler, request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

/// Runs one request through the pipeline and collects what it wrote.
async fn dispatch(handler: &Handler, request: Request) -> Response {
    let mut ctx = Context::new(request, Box::new(ResponseBuffer::new()));

    let result = handler(&mut ctx).await;
    if let Err(e) = result {
        warn!(
            method = %ctx.request().method(),
            path = %ctx.request().path(),
            error = %e,
            "handler failed"
        );
        let writer = ctx.writer_mut();
        if writer.status().is_none() {
            let status = e.response_status();
            writer.add_header("Content-Type", "text/plain; charset=utf-8");
            writer.write_status(status);
            if let Err(e) = writer.write(e.to_string().as_bytes()) {
                error!(error = %e, "failed to write error response");
            }
        }
    }

    match ctx.writer_as::<ResponseBuffer>() {
        Some(buffer) => buffer.take_response(),
        None => {
            error!("response writer was not restored by middleware");
            Response::new(StatusCode::InternalServerError).body("Internal Server Error")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::cache::{CacheConfig, CacheMiddleware, MemoryStore};
    use crate::middleware::{HandlerError, Pipeline, handler_fn};

    async fn spawn(handler: Handler) -> SocketAddr {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(handler));
        addr
    }

    async fn exchange(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    async fn get(addr: SocketAddr, target: &str) -> String {
        exchange(
            addr,
            &format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
        )
        .await
    }

    fn cached_counter() -> Handler {
        let calls = Arc::new(AtomicUsize::new(0));
        Pipeline::new()
            .layer(Arc::new(CacheMiddleware::new(
                CacheConfig::default(),
                MemoryStore::new(),
            )))
            .finish(handler_fn(move |ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move { ctx.string(StatusCode::Ok, format!("test_{n}")) })
            }))
    }

    #[tokio::test]
    async fn serves_cached_responses_over_tcp() {
        let addr = spawn(cached_counter()).await;

        let first = get(addr, "/").await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(first.ends_with("\r\n\r\ntest_1"));

        assert!(get(addr, "/").await.ends_with("test_1"));
        assert!(get(addr, "/foo").await.ends_with("test_2"));
        assert!(get(addr, "/?foo=42&bar=84").await.ends_with("test_3"));
        assert!(get(addr, "/?bar=84&foo=42").await.ends_with("test_3"));
    }

    #[tokio::test]
    async fn cached_response_has_single_content_length() {
        let addr = spawn(cached_counter()).await;

        get(addr, "/").await;
        let hit = get(addr, "/").await;
        assert_eq!(hit.matches("Content-Length").count(), 1);
        assert!(hit.contains("Content-Length: 6\r\n"));
        assert!(hit.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn pipelined_requests_on_one_connection() {
        let addr = spawn(cached_counter()).await;

        let out = exchange(
            addr,
            "GET /a HTTP/1.1\r\nHost: localhost\r\n\r\n\
             GET /a HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert_eq!(out.matches("test_1").count(), 2);
    }

    #[tokio::test]
    async fn handler_error_becomes_status_response() {
        let addr = spawn(handler_fn(|_ctx| {
            Box::pin(async move {
                Err::<(), _>(HandlerError::status(StatusCode::ServiceUnavailable, "try later"))
            })
        }))
        .await;

        let out = get(addr, "/").await;
        assert!(out.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(out.ends_with("try later"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let addr = spawn(cached_counter()).await;
        let out = exchange(addr, "NOT A REQUEST\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
