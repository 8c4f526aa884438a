//! Per-request context: the request, its response sink and request extensions.
//!
//! A [`Context`] is created by the server for every request and handed by
//! mutable reference down the middleware pipeline. Middleware may swap the
//! response writer (for example to record what the handler writes) and stash
//! typed values in the [`Extensions`] map for outer layers to read.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::http::writer::Detached;
use crate::http::{Response, ResponseWriter, StatusCode};
use crate::middleware::HandlerResult;
use crate::Request;

/// Type-erased request extensions map — used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        return Self {
            map: HashMap::new(),
        };
    }

    /// Insert a value into the extensions map, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Per-request context handed through the middleware pipeline.
pub struct Context {
    request: Request,
    writer: Box<dyn ResponseWriter>,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request and the sink its response goes to
    pub fn new(request: Request, writer: Box<dyn ResponseWriter>) -> Self {
        return Self {
            request,
            writer,
            extensions: Extensions::new(),
        };
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The active response writer.
    pub fn writer(&self) -> &dyn ResponseWriter {
        self.writer.as_ref()
    }

    pub fn writer_mut(&mut self) -> &mut dyn ResponseWriter {
        self.writer.as_mut()
    }

    /// Returns the active writer as `T` if that is its concrete type.
    pub fn writer_as<T>(&mut self) -> Option<&mut T>
    where
        T: ResponseWriter + 'static,
    {
        self.writer.as_any_mut().downcast_mut::<T>()
    }

    /// Installs `writer` and returns the one it replaces.
    pub fn replace_writer(&mut self, writer: Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter> {
        std::mem::replace(&mut self.writer, writer)
    }

    /// Replaces the active writer with the one `wrap` builds around it.
    pub fn wrap_writer<F>(&mut self, wrap: F)
    where
        F: FnOnce(Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter>,
    {
        let current = self.replace_writer(Box::new(Detached));
        self.writer = wrap(current);
    }

    /// Writes a whole [`Response`]: headers, then status, then body.
    pub fn send(&mut self, response: Response) -> HandlerResult {
        let (status, headers, body) = response.into_parts();
        for (name, value) in headers.iter() {
            self.writer.add_header(name, value);
        }
        self.writer.write_status(status);
        if !body.is_empty() {
            self.writer.write(&body)?;
        }
        Ok(())
    }

    /// Responds with a plain-text body.
    pub fn string(&mut self, status: StatusCode, body: impl Into<String>) -> HandlerResult {
        self.send(
            Response::new(status)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(body),
        )
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.request.body();
        serde_json::from_slice(body)
    }
}
