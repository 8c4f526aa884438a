//! Storage backends for cached responses.
//!
//! The middleware only needs byte-oriented `get`/`set` with a TTL, and one
//! way to tell "no such key" apart from a real failure. [`CacheStore`] encodes
//! that as [`StoreError::NotFound`]. Stores with their own error idiom can
//! implement [`RawStore`] instead and be wrapped in [`Classified`] with a
//! function that recognises their miss error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

/// Outcome of a failed store call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is not present (or has expired).
    #[error("cache key not found")]
    NotFound,

    #[error("cache backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// A shared, TTL-aware byte store.
///
/// Calls are synchronous and shared by every in-flight request; any locking
/// and expiry is up to the implementation.
pub trait CacheStore: Send + Sync {
    /// Fetches the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Bytes, StoreError>;

    /// Stores `value` under `key` for `ttl_secs` seconds.
    fn set(&self, key: &[u8], value: Bytes, ttl_secs: u32) -> Result<(), StoreError>;
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    fn get(&self, key: &[u8]) -> Result<Bytes, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: Bytes, ttl_secs: u32) -> Result<(), StoreError> {
        (**self).set(key, value, ttl_secs)
    }
}

/// A store that reports misses through its own error type.
pub trait RawStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get(&self, key: &[u8]) -> Result<Bytes, Self::Error>;

    fn set(&self, key: &[u8], value: Bytes, ttl_secs: u32) -> Result<(), Self::Error>;
}

/// Adapts a [`RawStore`] by classifying which of its errors means "not found".
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use rttp_cache::cache::{CacheStore, Classified, RawStore, StoreError};
///
/// #[derive(Debug, thiserror::Error)]
/// enum KvError {
///     #[error("missing")]
///     Missing,
/// }
///
/// struct Kv;
///
/// impl RawStore for Kv {
///     type Error = KvError;
///     fn get(&self, _key: &[u8]) -> Result<Bytes, KvError> { Err(KvError::Missing) }
///     fn set(&self, _key: &[u8], _value: Bytes, _ttl: u32) -> Result<(), KvError> { Ok(()) }
/// }
///
/// let store = Classified::new(Kv, |err: &KvError| matches!(err, KvError::Missing));
/// assert!(matches!(store.get(b"k"), Err(StoreError::NotFound)));
/// ```
pub struct Classified<S, F> {
    inner: S,
    is_not_found: F,
}

impl<S, F> Classified<S, F>
where
    S: RawStore,
    F: Fn(&S::Error) -> bool + Send + Sync,
{
    pub fn new(inner: S, is_not_found: F) -> Self {
        Self {
            inner,
            is_not_found,
        }
    }

    fn classify(&self, err: S::Error) -> StoreError {
        if (self.is_not_found)(&err) {
            StoreError::NotFound
        } else {
            StoreError::backend(err)
        }
    }
}

impl<S, F> CacheStore for Classified<S, F>
where
    S: RawStore,
    F: Fn(&S::Error) -> bool + Send + Sync,
{
    fn get(&self, key: &[u8]) -> Result<Bytes, StoreError> {
        self.inner.get(key).map_err(|e| self.classify(e))
    }

    fn set(&self, key: &[u8], value: Bytes, ttl_secs: u32) -> Result<(), StoreError> {
        self.inner
            .set(key, value, ttl_secs)
            .map_err(|e| self.classify(e))
    }
}

/// Entry limit of [`MemoryStore::new`].
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Slot {
    value: Bytes,
    expires_at: Option<Instant>,
    seq: u64,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Default)]
struct Slots {
    map: HashMap<Vec<u8>, Slot>,
    next_seq: u64,
}

impl Slots {
    /// Frees one place for a new key: expired entries go first, then the
    /// least recently written one.
    fn make_room(&mut self, capacity: usize, now: Instant) {
        if self.map.len() < capacity {
            return;
        }
        self.map.retain(|_, slot| slot.is_live(now));
        if self.map.len() < capacity {
            return;
        }
        if let Some(oldest) = self
            .map
            .iter()
            .min_by_key(|(_, slot)| slot.seq)
            .map(|(key, _)| key.clone())
        {
            self.map.remove(&oldest);
        }
    }
}

/// In-process TTL store with a fixed entry limit.
///
/// Expired entries are dropped lazily when read, when a write finds the
/// store full, or when swept with [`purge_expired`](Self::purge_expired). A
/// full store with nothing expired evicts the entry written longest ago. A TTL
/// of `0` never expires. Time is read from the Tokio clock, so paused-time
/// tests can advance it.
pub struct MemoryStore {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryStore {
    /// A store holding at most [`DEFAULT_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, expired ones included until they are swept.
    pub fn len(&self) -> usize {
        self.slots().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots();
        let before = slots.map.len();
        slots.map.retain(|_, slot| slot.is_live(now));
        before - slots.map.len()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Bytes, StoreError> {
        let now = Instant::now();
        let mut slots = self.slots();
        if let Some(slot) = slots.map.get(key) {
            if slot.is_live(now) {
                return Ok(slot.value.clone());
            }
            slots.map.remove(key);
        }
        Err(StoreError::NotFound)
    }

    fn set(&self, key: &[u8], value: Bytes, ttl_secs: u32) -> Result<(), StoreError> {
        let now = Instant::now();
        let expires_at = (ttl_secs > 0).then(|| now + Duration::from_secs(u64::from(ttl_secs)));

        let mut slots = self.slots();
        if !slots.map.contains_key(key) {
            slots.make_room(self.capacity, now);
        }
        let seq = slots.next_seq;
        slots.next_seq += 1;
        slots.map.insert(
            key.to_vec(),
            Slot {
                value,
                expires_at,
                seq,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    enum KvError {
        #[error("no such key")]
        Missing,
        #[error("connection refused")]
        Down,
    }

    struct FlakyKv {
        down: bool,
    }

    impl RawStore for FlakyKv {
        type Error = KvError;

        fn get(&self, _key: &[u8]) -> Result<Bytes, KvError> {
            if self.down {
                Err(KvError::Down)
            } else {
                Err(KvError::Missing)
            }
        }

        fn set(&self, _key: &[u8], _value: Bytes, _ttl_secs: u32) -> Result<(), KvError> {
            if self.down { Err(KvError::Down) } else { Ok(()) }
        }
    }

    fn classified(down: bool) -> impl CacheStore {
        Classified::new(FlakyKv { down }, |e: &KvError| matches!(e, KvError::Missing))
    }

    #[test]
    fn classified_maps_sentinel_to_not_found() {
        assert!(matches!(classified(false).get(b"k"), Err(StoreError::NotFound)));
        assert!(classified(false).set(b"k", Bytes::new(), 1).is_ok());
    }

    #[test]
    fn classified_keeps_other_errors() {
        let err = classified(true).get(b"k").unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(err.to_string(), "cache backend error: connection refused");
        assert!(matches!(
            classified(true).set(b"k", Bytes::new(), 1),
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn memory_get_set() {
        let store = MemoryStore::new();
        assert!(matches!(store.get(b"a"), Err(StoreError::NotFound)));

        store.set(b"a", Bytes::from_static(b"1"), 60).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Bytes::from_static(b"1"));

        store.set(b"a", Bytes::from_static(b"2"), 60).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Bytes::from_static(b"2"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_entries_expire() {
        let store = MemoryStore::new();
        store.set(b"a", Bytes::from_static(b"1"), 1).unwrap();

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(store.get(b"a").is_ok());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(matches!(store.get(b"a"), Err(StoreError::NotFound)));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set(b"a", Bytes::from_static(b"1"), 0).unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(store.get(b"a").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = MemoryStore::new();
        store.set(b"short", Bytes::new(), 1).unwrap();
        store.set(b"long", Bytes::new(), 10).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(b"long").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn full_store_sweeps_expired_first() {
        let store = MemoryStore::with_capacity(100);
        for i in 0..100u32 {
            store.set(&i.to_be_bytes(), Bytes::new(), 1).unwrap();
        }
        store.set(b"keep", Bytes::new(), 0).unwrap();
        assert_eq!(store.len(), 100);

        tokio::time::advance(Duration::from_secs(3600)).await;
        store.set(b"fresh", Bytes::new(), 60).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(b"keep").is_ok());
        assert!(store.get(b"fresh").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn full_store_evicts_oldest_write() {
        let store = MemoryStore::with_capacity(3);
        store.set(b"a", Bytes::from_static(b"1"), 0).unwrap();
        store.set(b"b", Bytes::from_static(b"2"), 0).unwrap();
        store.set(b"c", Bytes::from_static(b"3"), 0).unwrap();
        // Rewriting makes "a" the newest.
        store.set(b"a", Bytes::from_static(b"1'"), 0).unwrap();
        assert_eq!(store.len(), 3);

        store.set(b"d", Bytes::from_static(b"4"), 0).unwrap();
        assert_eq!(store.len(), 3);
        assert!(matches!(store.get(b"b"), Err(StoreError::NotFound)));
        assert_eq!(store.get(b"a").unwrap(), Bytes::from_static(b"1'"));
        assert!(store.get(b"c").is_ok());
        assert!(store.get(b"d").is_ok());
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(MemoryStore::new().capacity(), DEFAULT_CAPACITY);
        let store = MemoryStore::with_capacity(0);
        assert_eq!(store.capacity(), 1);
        store.set(b"a", Bytes::new(), 0).unwrap();
        store.set(b"b", Bytes::new(), 0).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(b"b").is_ok());
    }

    #[test]
    fn shared_store_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let handle: Arc<dyn CacheStore> = Arc::new(Arc::clone(&store));
        handle.set(b"k", Bytes::from_static(b"v"), 0).unwrap();
        assert_eq!(store.len(), 1);
    }
}
