//! Identity types for files, chunks, holders and sessions.

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

/// Identifies a file in the store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Inode(pub u64);

imp_deref!(Inode, u64);
imp_from!(Inode, u64, i => Inode(i));

impl std::fmt::Display for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a chunk across the whole store.
///
/// The id `0` is reserved for chunks that were never written. Such a
/// chunk has no holders and reads as zeros.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

imp_deref!(ChunkId, u64);
imp_from!(ChunkId, u64, i => ChunkId(i));

impl ChunkId {
    /// The id of a chunk that was never written.
    pub const HOLE: ChunkId = ChunkId(0);

    /// True if this id refers to a chunk that was never written.
    pub fn is_hole(&self) -> bool {
        *self == Self::HOLE
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// The network address of a storage node holding chunk parts.
///
/// The pipeline treats this as opaque; only the transport interprets it.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct HolderAddr(pub std::sync::Arc<str>);

imp_deref!(HolderAddr, str);
imp_from!(HolderAddr, &str, s => HolderAddr(s.into()));
imp_from!(HolderAddr, String, s => HolderAddr(s.into_boxed_str().into()));

impl std::fmt::Display for HolderAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle for a read session owned by a reader's session registry.
///
/// Handles are never reused for the lifetime of the reader, so a stale
/// handle can only ever resolve to "unknown session".
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

imp_deref!(SessionId, u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
