//! Storage node transport types.

use crate::{chunk::ChunkPart, BoxFut, ChunkId, HolderAddr, ReadResult};
use std::sync::Arc;
use std::time::Duration;

/// A request for a byte range of one stored chunk part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartRequest {
    /// The chunk to read from.
    pub chunk_id: ChunkId,

    /// The chunk version the caller expects.
    pub version: u32,

    /// Which stored part of the chunk to read.
    pub part: ChunkPart,

    /// Where to start, in part coordinates.
    pub offset: u64,

    /// How many bytes to read.
    pub length: u64,
}

/// An established connection to a storage node.
///
/// A connection serves one fetch at a time. Dropping a connection
/// without calling [Connection::abandon] is allowed but the pipeline
/// always abandons connections whose attempts lost a race.
pub trait Connection: 'static + Send + Sync + std::fmt::Debug {
    /// Fetch a byte range of a chunk part. Implementations must give up
    /// with an error once `read_timeout` has elapsed.
    ///
    /// A successful reply is exactly `request.length` bytes long. Parts
    /// shorter than the requested range are an error, the caller is
    /// responsible for clipping requests to the part length.
    fn fetch(
        &self,
        request: PartRequest,
        read_timeout: Duration,
    ) -> BoxFut<'_, ReadResult<bytes::Bytes>>;

    /// Close the connection and discard anything it was receiving.
    /// Must not block.
    fn abandon(&self);
}

/// Trait-object [Connection].
pub type DynConnection = Arc<dyn Connection>;

/// Opens connections to storage nodes.
pub trait Transport: 'static + Send + Sync + std::fmt::Debug {
    /// Connect to `addr`, giving up with a connect error once
    /// `connect_timeout` has elapsed.
    fn connect(
        &self,
        addr: HolderAddr,
        connect_timeout: Duration,
    ) -> BoxFut<'_, ReadResult<DynConnection>>;
}

/// Trait-object [Transport].
pub type DynTransport = Arc<dyn Transport>;
