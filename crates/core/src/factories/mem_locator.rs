//! The in-memory stub locator implementation provided by chunkread.

use chunkread_api::{chunk::*, locator::*, *};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MemFile {
    length: u64,
    chunks: HashMap<u32, (ChunkId, u32, Vec<Holder>)>,
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<Inode, MemFile>,
    cached: HashMap<(Inode, u32), ChunkDescriptor>,
    locates: u64,
    invalidations: u64,
    fail_next: u32,
}

/// The in-memory stub locator implementation provided by chunkread.
/// This is NOT a production module. It is for testing only.
///
/// Holds an authoritative table of files and remembers every descriptor
/// it hands out, the way a real client caches lookups. A changed chunk
/// is only seen after [Locator::invalidate] was called for it.
#[derive(Debug, Default)]
pub struct MemLocator {
    inner: Mutex<Inner>,
}

impl MemLocator {
    /// Construct a new MemLocator without any files.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create `inode` if needed and set its length.
    pub fn set_file_length(&self, inode: Inode, length: u64) {
        self.inner
            .lock()
            .unwrap()
            .files
            .entry(inode)
            .or_default()
            .length = length;
    }

    /// Create `inode` if needed and set where chunk `chunk_index` lives.
    /// Chunks never set read as holes.
    pub fn set_chunk(
        &self,
        inode: Inode,
        chunk_index: u32,
        chunk_id: ChunkId,
        version: u32,
        holders: Vec<Holder>,
    ) {
        self.inner
            .lock()
            .unwrap()
            .files
            .entry(inode)
            .or_default()
            .chunks
            .insert(chunk_index, (chunk_id, version, holders));
    }

    /// Make the next `count` lookups fail.
    pub fn fail_next_locates(&self, count: u32) {
        self.inner.lock().unwrap().fail_next = count;
    }

    /// How many lookups were made.
    pub fn locate_count(&self) -> u64 {
        self.inner.lock().unwrap().locates
    }

    /// How many invalidations were requested.
    pub fn invalidate_count(&self) -> u64 {
        self.inner.lock().unwrap().invalidations
    }
}

impl Locator for MemLocator {
    fn locate(
        &self,
        inode: Inode,
        chunk_index: u32,
    ) -> BoxFut<'_, ReadResult<ChunkDescriptor>> {
        Box::pin(async move {
            let mut lock = self.inner.lock().unwrap();
            lock.locates += 1;

            if lock.fail_next > 0 {
                lock.fail_next -= 1;
                return Err(ReadError::location_src(
                    inode,
                    chunk_index,
                    ReadError::other("injected failure"),
                ));
            }

            if let Some(desc) = lock.cached.get(&(inode, chunk_index)) {
                return Ok(desc.clone());
            }

            let file = lock.files.get(&inode).ok_or_else(|| {
                ReadError::location_src(
                    inode,
                    chunk_index,
                    ReadError::other("no such inode"),
                )
            })?;
            let desc = match file.chunks.get(&chunk_index) {
                Some((chunk_id, version, holders)) => ChunkDescriptor {
                    chunk_id: *chunk_id,
                    version: *version,
                    file_length: file.length,
                    holders: holders.clone(),
                },
                None => ChunkDescriptor {
                    chunk_id: ChunkId::HOLE,
                    version: 0,
                    file_length: file.length,
                    holders: Vec::new(),
                },
            };

            lock.cached.insert((inode, chunk_index), desc.clone());
            Ok(desc)
        })
    }

    fn invalidate(&self, inode: Inode, chunk_index: u32) {
        let mut lock = self.inner.lock().unwrap();
        lock.invalidations += 1;
        lock.cached.remove(&(inode, chunk_index));
    }
}

#[cfg(test)]
mod test;
