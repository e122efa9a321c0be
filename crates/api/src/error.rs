//! Chunkread error types.

use crate::{chunk::ChunkPart, ChunkId, HolderAddr, Inode, SessionId};
use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The chunkread error type.
///
/// The first three variants describe a single attempt against a single
/// holder. They are absorbed by the wave scheduler and never returned
/// from a logical read. The rest are fatal for the sub-range (or the
/// whole read) they are raised for.
///
/// This type is `Clone` so results can be shared between racing tasks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReadError {
    /// The holder could not be reached within the connect timeout.
    #[error("cannot connect to {addr} (src: {src})")]
    Connect {
        /// The unreachable holder.
        addr: HolderAddr,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// An attempt did not produce a reply within one wave.
    #[error("no reply from {addr} within {timeout_ms} ms")]
    WaveTimeout {
        /// The holder that stayed silent.
        addr: HolderAddr,

        /// The wave timeout that elapsed.
        timeout_ms: u64,
    },

    /// An established connection failed or replied with garbage.
    #[error("fetch from {addr} failed: {ctx} (src: {src})")]
    Fetch {
        /// The holder that failed.
        addr: HolderAddr,

        /// What went wrong.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// Every holder failed or the retry budget was exhausted.
    #[error("all holders failed for chunk {chunk_id} after {attempts} attempts")]
    AllHoldersFailed {
        /// The chunk that could not be read.
        chunk_id: ChunkId,

        /// How many attempts were made.
        attempts: u32,
    },

    /// The logical read exceeded the total read timeout.
    #[error("read did not complete within {timeout_ms} ms")]
    TotalTimeout {
        /// The total read timeout that elapsed.
        timeout_ms: u64,
    },

    /// The locator could not resolve a chunk.
    #[error("cannot locate chunk {chunk_index} of inode {inode} (src: {src})")]
    Location {
        /// The inode being read.
        inode: Inode,

        /// The index of the chunk within the file.
        chunk_index: u32,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// Too few sibling fragments could be fetched to rebuild a part.
    #[error("cannot reconstruct {part} of chunk {chunk_id}: {ctx}")]
    Reconstruction {
        /// The chunk being read.
        chunk_id: ChunkId,

        /// The part that was being rebuilt.
        part: ChunkPart,

        /// Why reconstruction gave up.
        ctx: Arc<str>,
    },

    /// The session handle does not refer to an open session.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(Arc<str>),

    /// Generic chunkread internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl ReadError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a connect error without an inner source.
    pub fn connect(addr: HolderAddr) -> Self {
        Self::Connect {
            addr,
            src: DynInnerError::default(),
        }
    }

    /// Construct a fetch error for an established connection.
    pub fn fetch<C: std::fmt::Display>(addr: HolderAddr, ctx: C) -> Self {
        Self::Fetch {
            addr,
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a location error with an inner source error.
    pub fn location_src<S: std::error::Error + 'static + Send + Sync>(
        inode: Inode,
        chunk_index: u32,
        src: S,
    ) -> Self {
        Self::Location {
            inode,
            chunk_index,
            src: DynInnerError::new(src),
        }
    }

    /// Construct a reconstruction error.
    pub fn reconstruction<C: std::fmt::Display>(
        chunk_id: ChunkId,
        part: ChunkPart,
        ctx: C,
    ) -> Self {
        Self::Reconstruction {
            chunk_id,
            part,
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct a config error.
    pub fn config<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Config(ctx.to_string().into_boxed_str().into())
    }

    /// True for errors that only concern a single attempt against a
    /// single holder. These advance the wave instead of failing a read.
    pub fn is_attempt_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::WaveTimeout { .. } | Self::Fetch { .. }
        )
    }

    /// True for errors that are worth one retry after the locator has
    /// been asked to refresh the chunk location.
    pub fn is_stale_location_hint(&self) -> bool {
        matches!(
            self,
            Self::AllHoldersFailed { .. }
                | Self::Reconstruction { .. }
                | Self::Location { .. }
        )
    }
}

/// The chunkread result type.
pub type ReadResult<T> = Result<T, ReadError>;
