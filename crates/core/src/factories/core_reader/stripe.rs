//! Rebuilding an XOR stripe data part from its siblings.

use super::wave::WaveScheduler;
use bytes::Bytes;
use chunkread_api::{
    chunk::{
        xor_into, xor_parity_length, xor_part_length, ChunkDescriptor,
        ChunkPart,
    },
    transport::PartRequest,
    *,
};
use std::sync::Arc;
use tokio::time::Instant;

/// What to rebuild.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StripeTarget {
    /// Bytes of the chunk that lie within the file.
    pub chunk_length: u64,
    pub level: u8,
    pub index: u8,
    pub part_offset: u64,
    pub length: u64,
}

#[derive(Debug)]
pub(crate) struct StripeReconstructor {
    waves: Arc<WaveScheduler>,
}

impl StripeReconstructor {
    pub fn new(waves: Arc<WaveScheduler>) -> Self {
        Self { waves }
    }

    /// Fetch the same part range from every other data part and the
    /// parity part, and XOR them together.
    ///
    /// Siblings shorter than the range count as zeros past their end.
    pub async fn reconstruct(
        &self,
        desc: &ChunkDescriptor,
        target: StripeTarget,
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        let StripeTarget {
            chunk_length,
            level,
            index,
            part_offset,
            length,
        } = target;
        let target_part = ChunkPart::XorData { level, index };

        let siblings = (0..level)
            .filter(|i| *i != index)
            .map(|i| {
                (
                    ChunkPart::XorData { level, index: i },
                    xor_part_length(chunk_length, level, i),
                )
            })
            .chain(std::iter::once((
                ChunkPart::XorParity { level },
                xor_parity_length(chunk_length, level),
            )));

        let mut fetches = Vec::new();
        for (part, part_length) in siblings {
            let available =
                part_length.saturating_sub(part_offset).min(length);
            if available == 0 {
                continue;
            }

            let holders = desc.holders_of(part);
            if holders.is_empty() {
                return Err(ReadError::reconstruction(
                    desc.chunk_id,
                    target_part,
                    format!("no holder of {part}"),
                ));
            }

            let request = PartRequest {
                chunk_id: desc.chunk_id,
                version: desc.version,
                part,
                offset: part_offset,
                length: available,
            };
            fetches.push(async move {
                self.waves
                    .fetch(request, &holders, deadline)
                    .await
                    .map_err(|err| match err {
                        ReadError::TotalTimeout { .. } => err,
                        err => ReadError::reconstruction(
                            desc.chunk_id,
                            target_part,
                            format!("{part}: {err}"),
                        ),
                    })
            });
        }

        tracing::debug!(
            chunk_id = %desc.chunk_id,
            part = %target_part,
            part_offset,
            length,
            siblings = fetches.len(),
            "reconstructing"
        );

        let mut out = vec![0; length as usize];
        for data in futures::future::try_join_all(fetches).await? {
            xor_into(&mut out, &data);
        }
        Ok(out.into())
    }
}
