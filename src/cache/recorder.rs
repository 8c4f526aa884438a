//! Response capture proxy.
//!
//! [`ResponseRecorder`] stands in for the real writer while a handler runs on a
//! cache miss. Everything is forwarded to the real writer as it happens and a
//! copy is kept, so the client sees no difference and the middleware ends up
//! with exactly what was sent.

use std::any::Any;
use std::io;

use bytes::BytesMut;

use crate::http::writer::Detached;
use crate::http::{Headers, ResponseWriter, StatusCode};

use super::entry::CacheEntry;

/// A [`ResponseWriter`] that tees every write into an in-memory snapshot.
pub struct ResponseRecorder {
    inner: Box<dyn ResponseWriter>,
    status: Option<StatusCode>,
    headers: Headers,
    body: BytesMut,
}

impl ResponseRecorder {
    /// Wraps the real writer.
    pub fn new(inner: Box<dyn ResponseWriter>) -> Self {
        Self {
            inner,
            status: None,
            headers: Headers::new(),
            body: BytesMut::new(),
        }
    }

    /// Whether a status has been finalized, i.e. the handler produced a response.
    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }

    /// Freezes the snapshot and hands back the wrapped writer.
    ///
    /// A response that never set a status is recorded as `200 OK`. The recorder
    /// is left detached and records nothing further.
    pub fn finish(&mut self) -> (Box<dyn ResponseWriter>, CacheEntry) {
        let inner = std::mem::replace(&mut self.inner, Box::new(Detached));
        let entry = CacheEntry::new(
            self.status.take().unwrap_or(StatusCode::Ok),
            std::mem::take(&mut self.headers),
            self.body.split().freeze(),
        );
        (inner, entry)
    }
}

impl ResponseWriter for ResponseRecorder {
    fn add_header(&mut self, name: &str, value: &str) {
        if self.status.is_none() {
            self.headers.insert(name, value);
        }
        self.inner.add_header(name, value);
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.inner.write_status(status);
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_status(StatusCode::Ok);
        self.inner.write(chunk)?;
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
