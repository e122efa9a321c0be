//! Chunk location types.

use crate::{chunk::ChunkDescriptor, BoxFut, Inode, ReadResult};
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::sync::Arc;

/// Resolves which storage nodes hold a given chunk of a file.
///
/// Implementations are free to cache descriptors. The read pipeline calls
/// [Locator::invalidate] when it suspects a cached descriptor is stale,
/// and expects the next [Locator::locate] for that chunk to go back to
/// the authoritative source.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait Locator: 'static + Send + Sync + std::fmt::Debug {
    /// Look up chunk `chunk_index` of `inode`.
    fn locate(
        &self,
        inode: Inode,
        chunk_index: u32,
    ) -> BoxFut<'_, ReadResult<ChunkDescriptor>>;

    /// Drop any cached knowledge about chunk `chunk_index` of `inode`.
    fn invalidate(&self, inode: Inode, chunk_index: u32);
}

/// Trait-object [Locator].
pub type DynLocator = Arc<dyn Locator>;
