//! Captured responses and their storage encoding.
//!
//! Wire format (version 1, big-endian):
//!
//! ```text
//! magic "RTCE" | version u8 | status u16 | header count u32
//! { name len u32 | name | value len u32 | value } * header count
//! body len u64 | body
//! ```
//!
//! Decoding is strict: any truncation, trailing byte, unknown version or
//! status outside `100..=999` makes the whole entry invalid.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::http::{Headers, ResponseWriter, StatusCode};

const MAGIC: &[u8; 4] = b"RTCE";
const VERSION: u8 = 1;

/// Errors produced when a stored payload cannot be turned back into an entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cache entry truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("cache entry has an invalid magic prefix")]
    BadMagic,

    #[error("unsupported cache entry version {0}")]
    UnsupportedVersion(u8),

    #[error("cache entry stores invalid status {0}")]
    InvalidStatus(u16),

    #[error("cache entry header is not valid UTF-8")]
    InvalidHeader,

    #[error("cache entry has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// An immutable captured response: status, headers (in write order) and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl CacheEntry {
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the entry for the store.
    pub fn encode(&self) -> Bytes {
        let headers_len: usize = self
            .headers
            .iter()
            .map(|(name, value)| 8 + name.len() + value.len())
            .sum();
        let mut buf = BytesMut::with_capacity(4 + 1 + 2 + 4 + headers_len + 8 + self.body.len());

        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u16(self.status.as_u16());
        buf.put_u32(self.headers.len() as u32);
        for (name, value) in self.headers.iter() {
            put_str(&mut buf, name);
            put_str(&mut buf, value);
        }
        buf.put_u64(self.body.len() as u64);
        buf.put_slice(&self.body);

        buf.freeze()
    }

    /// Parses a payload produced by [`encode`](Self::encode).
    pub fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.remaining() < MAGIC.len() {
            return Err(DecodeError::Truncated { field: "magic" });
        }
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        buf.advance(MAGIC.len());

        let version = get_u8(&mut buf, "version")?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let code = get_u16(&mut buf, "status")?;
        let status = StatusCode::try_from(code).map_err(|e| DecodeError::InvalidStatus(e.0))?;

        let count = get_u32(&mut buf, "header count")? as usize;
        // Each header needs at least its two length prefixes.
        if buf.remaining() < count.saturating_mul(8) {
            return Err(DecodeError::Truncated { field: "headers" });
        }
        let mut headers = Headers::with_capacity(count);
        for _ in 0..count {
            let name = get_str(&mut buf, "header name")?;
            let value = get_str(&mut buf, "header value")?;
            headers.insert(name, value);
        }

        let body_len = get_u64(&mut buf, "body length")?;
        let body_len = usize::try_from(body_len)
            .ok()
            .filter(|len| *len <= buf.remaining())
            .ok_or(DecodeError::Truncated { field: "body" })?;
        let body = Bytes::copy_from_slice(&buf[..body_len]);
        buf.advance(body_len);

        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Writes the entry to `writer`: every header in stored order, the status,
    /// then the body. Nothing is filtered.
    pub fn replay(&self, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        for (name, value) in self.headers.iter() {
            writer.add_header(name, value);
        }
        writer.write_status(self.status);
        if !self.body.is_empty() {
            writer.write(&self.body)?;
        }
        Ok(())
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::Truncated { field });
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8], field: &'static str) -> Result<u16, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated { field });
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated { field });
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut &[u8], field: &'static str) -> Result<u64, DecodeError> {
    if buf.remaining() < 8 {
        return Err(DecodeError::Truncated { field });
    }
    Ok(buf.get_u64())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, DecodeError> {
    let len = get_u32(buf, field)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated { field });
    }
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| DecodeError::InvalidHeader)?
        .to_owned();
    buf.advance(len);
    Ok(text)
}
