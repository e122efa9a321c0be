//! Read cache types.

use crate::{config::ReadConfig, Inode, ReadResult};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A cached byte range of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The file offset of the first cached byte.
    pub start: u64,

    /// The cached bytes.
    pub data: bytes::Bytes,

    /// When the bytes were inserted.
    pub inserted_at: Instant,

    /// When the bytes stop being valid.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// The file range covered by this entry.
    pub fn range(&self) -> Range<u64> {
        self.start..self.end()
    }

    /// The file offset just past the last cached byte.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    /// True once the entry may no longer be served.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// The answer to a [CacheStore::get].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// An unexpired entry covers the first requested byte.
    Hit(CacheEntry),

    /// The first requested byte is not cached. Neither is anything up to
    /// (but excluding) `end`, which is either the start of the next
    /// unexpired entry or the end of the requested range.
    Miss {
        /// Where the uncached run stops.
        end: u64,
    },
}

/// Per-session storage for recently read bytes.
///
/// Entries for one inode never overlap and expired entries are never
/// returned. Lookups may run concurrently. Inserts are exclusive so the
/// same bytes are never inserted twice.
pub trait CacheStore: 'static + Send + Sync + std::fmt::Debug {
    /// Look up the start of `range`.
    fn get(&self, inode: Inode, range: Range<u64>) -> CacheLookup;

    /// Insert `data` read at file offset `start`, valid for `ttl`.
    /// Overlapped parts of older entries are dropped.
    fn put(&self, inode: Inode, start: u64, data: bytes::Bytes, ttl: Duration);

    /// Drop every cached byte of `inode` within `range`.
    fn invalidate(&self, inode: Inode, range: Range<u64>);
}

/// Trait-object [CacheStore].
pub type DynCacheStore = Arc<dyn CacheStore>;

/// A factory for creating the cache of each new session.
pub trait CacheStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Construct an empty cache store for a new session.
    fn create(&self, config: Arc<ReadConfig>) -> ReadResult<DynCacheStore>;
}

/// Trait-object [CacheStoreFactory].
pub type DynCacheStoreFactory = Arc<dyn CacheStoreFactory>;
