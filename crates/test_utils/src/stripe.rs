//! Test utilities for building XOR striped chunks.

use bytes::Bytes;
use chunkread_api::chunk::{xor_into, xor_parity_length, BLOCK_SIZE};

/// The stored parts of one XOR striped chunk.
#[derive(Debug, Clone)]
pub struct XorParts {
    /// Data parts, indexed by part index.
    pub data: Vec<Bytes>,

    /// The parity part.
    pub parity: Bytes,
}

/// Deal the blocks of `chunk` onto `level` data parts and compute the
/// parity part, the way a writer would have stored them.
pub fn xor_encode(chunk: &[u8], level: u8) -> XorParts {
    let mut data = vec![Vec::new(); level as usize];
    for (b, block) in chunk.chunks(BLOCK_SIZE as usize).enumerate() {
        data[b % level as usize].extend_from_slice(block);
    }

    let parity_length = xor_parity_length(chunk.len() as u64, level);
    let stripe_length = (BLOCK_SIZE * level as u64) as usize;
    let mut parity = vec![0; parity_length as usize];
    for (stripe, blocks) in chunk.chunks(stripe_length).enumerate() {
        let base = stripe * BLOCK_SIZE as usize;
        for block in blocks.chunks(BLOCK_SIZE as usize) {
            xor_into(&mut parity[base..base + block.len()], block);
        }
    }

    XorParts {
        data: data.into_iter().map(Bytes::from).collect(),
        parity: parity.into(),
    }
}
