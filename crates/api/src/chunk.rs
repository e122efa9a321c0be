//! Chunk location and XOR stripe layout types.
//!
//! A file is split into chunks of `chunk_size` bytes. Every chunk is
//! either stored as full replicas or as an XOR stripe: the chunk is cut
//! into [BLOCK_SIZE] blocks which are dealt round-robin onto `level` data
//! parts, plus one parity part holding the XOR of every stripe of blocks.
//!
//! ```text
//! chunk blocks:  b0 b1 b2 b3 b4 b5 b6      (level = 3)
//! data part 0:   b0 b3 b6
//! data part 1:   b1 b4
//! data part 2:   b2 b5
//! parity:        b0^b1^b2  b3^b4^b5  b6
//! ```

use crate::*;
use std::ops::Range;

/// The unit of XOR interleaving.
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// The default size of a chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// The smallest supported XOR level.
pub const MIN_XOR_LEVEL: u8 = 2;

/// The largest supported XOR level.
pub const MAX_XOR_LEVEL: u8 = 9;

/// Which piece of a chunk a holder stores.
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
#[serde(rename_all = "camelCase")]
pub enum ChunkPart {
    /// A full copy of the chunk.
    Replica,

    /// Data part `index` (zero based) of an XOR stripe of `level` parts.
    XorData {
        /// Number of data parts in the stripe.
        level: u8,
        /// Which data part this is.
        index: u8,
    },

    /// The parity part of an XOR stripe of `level` data parts.
    XorParity {
        /// Number of data parts in the stripe.
        level: u8,
    },
}

impl std::fmt::Display for ChunkPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replica => f.write_str("replica"),
            Self::XorData { level, index } => write!(f, "xor {index}/{level}"),
            Self::XorParity { level } => write!(f, "xor parity/{level}"),
        }
    }
}

impl ChunkPart {
    /// The XOR level of this part, if it is a stripe part.
    pub fn xor_level(&self) -> Option<u8> {
        match self {
            Self::Replica => None,
            Self::XorData { level, .. } | Self::XorParity { level } => {
                Some(*level)
            }
        }
    }
}

/// A storage node holding one part of a chunk.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Holder {
    /// Where the node can be reached.
    pub addr: HolderAddr,

    /// What the node stores.
    pub part: ChunkPart,
}

impl Holder {
    /// Construct a new holder.
    pub fn new(addr: impl Into<HolderAddr>, part: ChunkPart) -> Self {
        Self {
            addr: addr.into(),
            part,
        }
    }
}

/// Where to find one chunk of a file, as reported by a
/// [Locator](crate::locator::Locator).
///
/// Descriptors are immutable. If a holder turns out to be stale, ask the
/// locator for a fresh descriptor rather than patching this one.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// The chunk id, [ChunkId::HOLE] if the chunk was never written.
    pub chunk_id: ChunkId,

    /// The chunk version the holders are expected to serve.
    pub version: u32,

    /// The length of the whole file at the time of the lookup.
    pub file_length: u64,

    /// Holders in order of preference, primary first.
    pub holders: Vec<Holder>,
}

/// How a chunk is laid out across its holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLayout {
    /// The chunk was never written and reads as zeros.
    Hole,

    /// At least one full replica exists.
    Replicated,

    /// The chunk is only available as an XOR stripe.
    Xor {
        /// Number of data parts.
        level: u8,
    },
}

impl ChunkDescriptor {
    /// The number of bytes of chunk `chunk_index` that lie within the
    /// file, given the store's chunk size.
    pub fn chunk_length(&self, chunk_index: u32, chunk_size: u64) -> u64 {
        let start = chunk_index as u64 * chunk_size;
        self.file_length.saturating_sub(start).min(chunk_size)
    }

    /// Work out how this chunk can be read.
    ///
    /// Replicas are preferred over stripe parts when both exist.
    pub fn layout(&self) -> ReadResult<ChunkLayout> {
        if self.chunk_id.is_hole() {
            return Ok(ChunkLayout::Hole);
        }
        if self.holders.is_empty() {
            return Err(ReadError::other(format!(
                "chunk {} has no holders",
                self.chunk_id
            )));
        }
        if self.holders.iter().any(|h| h.part == ChunkPart::Replica) {
            return Ok(ChunkLayout::Replicated);
        }

        let level = self.holders[0].part.xor_level().unwrap_or_default();
        if self
            .holders
            .iter()
            .any(|h| h.part.xor_level() != Some(level))
        {
            return Err(ReadError::other(format!(
                "chunk {} mixes xor levels",
                self.chunk_id
            )));
        }
        if !(MIN_XOR_LEVEL..=MAX_XOR_LEVEL).contains(&level) {
            return Err(ReadError::other(format!(
                "chunk {} has unsupported xor level {level}",
                self.chunk_id
            )));
        }

        Ok(ChunkLayout::Xor { level })
    }

    /// The addresses of every holder of `part`, in preference order.
    pub fn holders_of(&self, part: ChunkPart) -> Vec<HolderAddr> {
        self.holders
            .iter()
            .filter(|h| h.part == part)
            .map(|h| h.addr.clone())
            .collect()
    }
}

/// The length of data part `index` of a stripe of `level` parts for a
/// chunk of `chunk_length` bytes.
pub fn xor_part_length(chunk_length: u64, level: u8, index: u8) -> u64 {
    let level = level as u64;
    let index = index as u64;
    let blocks = chunk_length.div_ceil(BLOCK_SIZE);
    if blocks == 0 {
        return 0;
    }

    let count = blocks / level + u64::from(index < blocks % level);
    let tail = chunk_length % BLOCK_SIZE;
    if tail != 0 && (blocks - 1) % level == index {
        (count - 1) * BLOCK_SIZE + tail
    } else {
        count * BLOCK_SIZE
    }
}

/// The length of the parity part, which matches the longest data part.
pub fn xor_parity_length(chunk_length: u64, level: u8) -> u64 {
    xor_part_length(chunk_length, level, 0)
}

/// A read against one data part of an XOR stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorPartRead {
    /// Which data part to read.
    pub index: u8,

    /// Where to start, in part coordinates.
    pub part_offset: u64,

    /// How many bytes of the part to read.
    pub length: u64,
}

/// One contiguous run of logical chunk bytes that lives inside a single
/// block of a single data part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    index: u8,
    logical: u64,
    part_offset: u64,
    length: u64,
}

fn segments(level: u8, range: Range<u64>) -> impl Iterator<Item = Segment> {
    let level_n = level as u64;
    let first_block = range.start / BLOCK_SIZE;
    let last_block = range.end.saturating_sub(1) / BLOCK_SIZE;
    let blocks = if range.is_empty() {
        0..0
    } else {
        first_block..last_block + 1
    };
    blocks.map(move |b| {
        let block_start = b * BLOCK_SIZE;
        let logical = range.start.max(block_start);
        let end = range.end.min(block_start + BLOCK_SIZE);
        Segment {
            index: (b % level_n) as u8,
            logical,
            part_offset: (b / level_n) * BLOCK_SIZE + (logical - block_start),
            length: end - logical,
        }
    })
}

/// Split a logical range of a striped chunk into one contiguous read per
/// touched data part.
///
/// Consecutive blocks of one part are adjacent in part coordinates, so
/// the bytes a range needs from each part always form a single run.
pub fn xor_plan(level: u8, range: Range<u64>) -> Vec<XorPartRead> {
    let mut out: Vec<XorPartRead> = Vec::new();
    for seg in segments(level, range) {
        match out.iter_mut().find(|r| r.index == seg.index) {
            Some(read) => {
                read.length = seg.part_offset + seg.length - read.part_offset;
            }
            None => out.push(XorPartRead {
                index: seg.index,
                part_offset: seg.part_offset,
                length: seg.length,
            }),
        }
    }
    out.sort_by_key(|r| r.index);
    out
}

/// Copy the bytes fetched for `read` into `out`, which holds the logical
/// `range` of the chunk.
///
/// `data` must be exactly `read.length` bytes long.
pub fn xor_scatter(
    level: u8,
    range: Range<u64>,
    read: &XorPartRead,
    data: &[u8],
    out: &mut [u8],
) {
    let base = range.start;
    for seg in segments(level, range).filter(|s| s.index == read.index) {
        let src = (seg.part_offset - read.part_offset) as usize;
        let dst = (seg.logical - base) as usize;
        let len = seg.length as usize;
        out[dst..dst + len].copy_from_slice(&data[src..src + len]);
    }
}

/// XOR `src` into `dst`. Missing bytes of a shorter `src` count as zero.
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= *s;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn desc(holders: Vec<Holder>) -> ChunkDescriptor {
        ChunkDescriptor {
            chunk_id: ChunkId(1),
            version: 1,
            file_length: 10 * BLOCK_SIZE,
            holders,
        }
    }

    #[test]
    fn part_lengths_cover_the_chunk() {
        for len in [
            0,
            1,
            BLOCK_SIZE - 1,
            BLOCK_SIZE,
            3 * BLOCK_SIZE,
            7 * BLOCK_SIZE + 5,
        ] {
            for level in MIN_XOR_LEVEL..=MAX_XOR_LEVEL {
                let total: u64 = (0..level)
                    .map(|i| xor_part_length(len, level, i))
                    .sum();
                assert_eq!(len, total, "len {len} level {level}");
            }
        }
    }

    #[test]
    fn final_part_may_be_shorter() {
        let len = 2 * BLOCK_SIZE + 100;
        assert_eq!(BLOCK_SIZE, xor_part_length(len, 3, 0));
        assert_eq!(BLOCK_SIZE, xor_part_length(len, 3, 1));
        assert_eq!(100, xor_part_length(len, 3, 2));
        assert_eq!(BLOCK_SIZE, xor_parity_length(len, 3));
    }

    #[test]
    fn plan_single_block() {
        let plan = xor_plan(3, BLOCK_SIZE + 10..BLOCK_SIZE + 20);
        assert_eq!(
            vec![XorPartRead {
                index: 1,
                part_offset: 10,
                length: 10,
            }],
            plan
        );
    }

    #[test]
    fn plan_spanning_stripes_is_contiguous_per_part() {
        // blocks 2..=4 partially: b2 -> part 2, b3 -> part 0, b4 -> part 1
        let range = 2 * BLOCK_SIZE + 7..4 * BLOCK_SIZE + 9;
        let plan = xor_plan(3, range);
        assert_eq!(
            vec![
                XorPartRead {
                    index: 0,
                    part_offset: BLOCK_SIZE,
                    length: BLOCK_SIZE,
                },
                XorPartRead {
                    index: 1,
                    part_offset: BLOCK_SIZE,
                    length: 9,
                },
                XorPartRead {
                    index: 2,
                    part_offset: 7,
                    length: BLOCK_SIZE - 7,
                },
            ],
            plan
        );
    }

    #[test]
    fn plan_then_scatter_rebuilds_the_range() {
        let level = 3;
        let len = 7 * BLOCK_SIZE + 333;
        let chunk: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        // deal the blocks onto parts
        let mut parts = vec![Vec::new(); level as usize];
        for (b, block) in chunk.chunks(BLOCK_SIZE as usize).enumerate() {
            parts[b % level as usize].extend_from_slice(block);
        }

        let range = BLOCK_SIZE / 2..5 * BLOCK_SIZE + 17;
        let mut out = vec![0; (range.end - range.start) as usize];
        for read in xor_plan(level, range.clone()) {
            let start = read.part_offset as usize;
            let end = start + read.length as usize;
            let data = &parts[read.index as usize][start..end];
            xor_scatter(level, range.clone(), &read, data, &mut out);
        }
        assert_eq!(&chunk[range.start as usize..range.end as usize], &out[..]);
    }

    #[test]
    fn empty_range_plans_nothing() {
        assert!(xor_plan(4, 10..10).is_empty());
    }

    #[test]
    fn xor_into_pads_short_sources() {
        let mut dst = vec![0b1010, 0b1111, 0b0001];
        xor_into(&mut dst, &[0b0110, 0b1111]);
        assert_eq!(vec![0b1100, 0, 0b0001], dst);
    }

    #[test]
    fn layout_prefers_replicas() {
        let d = desc(vec![
            Holder::new("a", ChunkPart::XorData { level: 2, index: 0 }),
            Holder::new("b", ChunkPart::Replica),
        ]);
        assert_eq!(ChunkLayout::Replicated, d.layout().unwrap());
    }

    #[test]
    fn layout_xor_and_errors() {
        let d = desc(vec![
            Holder::new("a", ChunkPart::XorData { level: 2, index: 0 }),
            Holder::new("b", ChunkPart::XorData { level: 2, index: 1 }),
            Holder::new("c", ChunkPart::XorParity { level: 2 }),
        ]);
        assert_eq!(ChunkLayout::Xor { level: 2 }, d.layout().unwrap());
        assert_eq!(
            vec![HolderAddr::from("c")],
            d.holders_of(ChunkPart::XorParity { level: 2 })
        );

        let mixed = desc(vec![
            Holder::new("a", ChunkPart::XorData { level: 2, index: 0 }),
            Holder::new("b", ChunkPart::XorData { level: 3, index: 1 }),
        ]);
        assert!(mixed.layout().is_err());
        assert!(desc(vec![]).layout().is_err());

        let hole = ChunkDescriptor {
            chunk_id: ChunkId::HOLE,
            ..desc(vec![])
        };
        assert_eq!(ChunkLayout::Hole, hole.layout().unwrap());
    }

    #[test]
    fn chunk_length_clips_at_eof() {
        let d = ChunkDescriptor {
            file_length: 250,
            ..desc(vec![])
        };
        assert_eq!(100, d.chunk_length(0, 100));
        assert_eq!(100, d.chunk_length(1, 100));
        assert_eq!(50, d.chunk_length(2, 100));
        assert_eq!(0, d.chunk_length(3, 100));
    }
}
