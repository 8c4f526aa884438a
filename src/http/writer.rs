//! Response sinks, the write side of a request.
//!
//! Handlers never build the wire bytes themselves; they write a status, headers
//! and body chunks into a [`ResponseWriter`]. Middleware may wrap the writer to
//! observe or transform what is written (see the cache recorder).
//!
//! The status follows HTTP semantics: the first status written wins, and writing
//! body bytes before any status finalizes it as `200 OK`. Headers added after the
//! status is finalized never reach the client.

use std::any::Any;
use std::io;

use super::{Headers, Response, StatusCode};

/// The outgoing half of an HTTP exchange.
///
/// Implementations must be `Send` so the owning [`Context`](crate::context::Context)
/// can cross `.await` points on a multi-threaded runtime.
pub trait ResponseWriter: Send {
    /// Appends a header. Ignored once the status has been finalized.
    fn add_header(&mut self, name: &str, value: &str);

    /// Sets the response status. Only the first call has any effect.
    fn write_status(&mut self, status: StatusCode);

    /// Writes a chunk of body bytes, finalizing the status as `200 OK` if none
    /// was written yet.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Returns the finalized status, or `None` if nothing has been written.
    fn status(&self) -> Option<StatusCode>;

    /// Exposes the concrete writer so a wrapping layer can recover its own type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// In-memory sink used by the server: collects everything written and turns it
/// into a [`Response`] once the handler is done.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{ResponseBuffer, ResponseWriter, StatusCode};
///
/// let mut buffer = ResponseBuffer::new();
/// buffer.add_header("X-Trace", "abc");
/// buffer.write(b"hello").unwrap();
/// buffer.write_status(StatusCode::NotFound); // too late, already 200
///
/// let response = buffer.take_response();
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.body_slice(), b"hello");
/// ```
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuffer {
    /// Creates an empty buffer with no status written.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a status has been finalized.
    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }

    /// Drains the buffer into a [`Response`], defaulting the status to `200 OK`.
    pub fn take_response(&mut self) -> Response {
        let taken = std::mem::take(self);
        let mut response =
            Response::new(taken.status.unwrap_or(StatusCode::Ok)).body_bytes(taken.body);
        for (name, value) in taken.headers.iter() {
            response.add_header(name, value);
        }
        response
    }
}

impl ResponseWriter for ResponseBuffer {
    fn add_header(&mut self, name: &str, value: &str) {
        if self.status.is_none() {
            self.headers.insert(name, value);
        }
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_status(StatusCode::Ok);
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// Placeholder held by a context while its real writer is being swapped out.
#[derive(Debug, Default)]
pub(crate) struct Detached;

impl ResponseWriter for Detached {
    fn add_header(&mut self, _name: &str, _value: &str) {}

    fn write_status(&mut self, _status: StatusCode) {}

    fn write(&mut self, _chunk: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "response writer is detached",
        ))
    }

    fn status(&self) -> Option<StatusCode> {
        None
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_status_wins() {
        let mut buf = ResponseBuffer::new();
        buf.write_status(StatusCode::Created);
        buf.write_status(StatusCode::BadRequest);
        assert_eq!(buf.status(), Some(StatusCode::Created));
    }

    #[test]
    fn body_write_finalizes_ok() {
        let mut buf = ResponseBuffer::new();
        assert!(!buf.is_committed());
        buf.write(b"x").unwrap();
        assert_eq!(buf.status(), Some(StatusCode::Ok));
    }

    #[test]
    fn headers_after_status_are_dropped() {
        let mut buf = ResponseBuffer::new();
        buf.add_header("X-Before", "1");
        buf.write_status(StatusCode::Ok);
        buf.add_header("X-After", "2");
        let response = buf.take_response();
        assert_eq!(response.headers().get("x-before"), Some("1"));
        assert!(!response.headers().contains("x-after"));
    }

    #[test]
    fn take_response_resets_buffer() {
        let mut buf = ResponseBuffer::new();
        buf.write_status(StatusCode::NotFound);
        buf.write(b"gone").unwrap();
        let response = buf.take_response();
        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(!buf.is_committed());
        assert_eq!(buf.take_response().body_slice(), b"");
    }

    #[test]
    fn detached_rejects_body() {
        let mut w = Detached;
        assert!(w.write(b"x").is_err());
        assert_eq!(w.status(), None);
    }
}
