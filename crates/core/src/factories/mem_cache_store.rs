//! The in-memory cache store implementation provided by chunkread.

use bytes::Bytes;
use chunkread_api::{cache::*, config::ReadConfig, *};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// The in-memory cache store implementation provided by chunkread.
/// Every session gets its own store.
#[derive(Debug)]
pub struct MemCacheStoreFactory {}

impl MemCacheStoreFactory {
    /// Construct a new MemCacheStoreFactory.
    pub fn create() -> DynCacheStoreFactory {
        let out: DynCacheStoreFactory = Arc::new(MemCacheStoreFactory {});
        out
    }
}

impl CacheStoreFactory for MemCacheStoreFactory {
    fn create(&self, _config: Arc<ReadConfig>) -> ReadResult<DynCacheStore> {
        let out: DynCacheStore = Arc::new(MemCacheStore::default());
        Ok(out)
    }
}

/// Entries of one inode, keyed by their start offset.
type Entries = BTreeMap<u64, CacheEntry>;

#[derive(Debug, Default)]
struct MemCacheStore {
    inodes: RwLock<HashMap<Inode, Entries>>,
}

impl CacheStore for MemCacheStore {
    fn get(&self, inode: Inode, range: Range<u64>) -> CacheLookup {
        if range.is_empty() {
            return CacheLookup::Miss { end: range.end };
        }

        let now = Instant::now();
        let lock = self.inodes.read().unwrap();
        let Some(entries) = lock.get(&inode) else {
            return CacheLookup::Miss { end: range.end };
        };

        if let Some((_, entry)) = entries.range(..=range.start).next_back() {
            if entry.end() > range.start && !entry.is_expired(now) {
                return CacheLookup::Hit(entry.clone());
            }
        }

        let end = entries
            .range(range.start + 1..range.end)
            .find(|(_, e)| !e.is_expired(now))
            .map(|(start, _)| *start)
            .unwrap_or(range.end);
        CacheLookup::Miss { end }
    }

    fn put(&self, inode: Inode, start: u64, data: Bytes, ttl: Duration) {
        if ttl.is_zero() || data.is_empty() {
            return;
        }

        let now = Instant::now();
        let end = start + data.len() as u64;
        let mut lock = self.inodes.write().unwrap();
        let entries = lock.entry(inode).or_default();

        entries.retain(|_, e| !e.is_expired(now));
        carve(entries, start..end);
        entries.insert(
            start,
            CacheEntry {
                start,
                data,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    fn invalidate(&self, inode: Inode, range: Range<u64>) {
        let mut lock = self.inodes.write().unwrap();
        if let Some(entries) = lock.get_mut(&inode) {
            carve(entries, range);
            if entries.is_empty() {
                lock.remove(&inode);
            }
        }
    }
}

/// Remove `range` from `entries`, keeping the parts of partially
/// overlapped entries that lie outside of it.
fn carve(entries: &mut Entries, range: Range<u64>) {
    if range.is_empty() {
        return;
    }

    let overlapped: Vec<u64> = entries
        .range(..range.end)
        .filter(|(_, e)| e.end() > range.start)
        .map(|(start, _)| *start)
        .collect();

    for start in overlapped {
        let Some(entry) = entries.remove(&start) else {
            continue;
        };
        if entry.start < range.start {
            let keep = (range.start - entry.start) as usize;
            entries.insert(
                entry.start,
                CacheEntry {
                    data: entry.data.slice(..keep),
                    ..entry.clone()
                },
            );
        }
        if entry.end() > range.end {
            let skip = (range.end - entry.start) as usize;
            entries.insert(
                range.end,
                CacheEntry {
                    start: range.end,
                    data: entry.data.slice(skip..),
                    ..entry
                },
            );
        }
    }
}
