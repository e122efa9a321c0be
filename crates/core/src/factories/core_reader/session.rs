//! One open file: cache lookups, chunk fetches and readahead.

use super::bandwidth::BandwidthGovernor;
use super::readahead::ReadaheadPlanner;
use super::stripe::{StripeReconstructor, StripeTarget};
use super::wave::WaveScheduler;
use super::SessionStats;
use bytes::{Bytes, BytesMut};
use chunkread_api::{
    cache::{CacheLookup, DynCacheStore},
    chunk::*,
    config::ReadConfig,
    locator::DynLocator,
    transport::{DynTransport, PartRequest},
    *,
};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct ReadSession {
    inner: Arc<SessionInner>,
    planner: Mutex<ReadaheadPlanner>,
    background: Mutex<JoinSet<()>>,
}

#[derive(Debug)]
struct SessionInner {
    inode: Inode,
    config: Arc<ReadConfig>,
    locator: DynLocator,
    cache: DynCacheStore,
    waves: Arc<WaveScheduler>,
    reconstructor: StripeReconstructor,
    governor: BandwidthGovernor,
    hit_bytes: AtomicU64,
    miss_bytes: AtomicU64,
    prefetched_bytes: AtomicU64,
    in_flight: Mutex<Vec<Range<u64>>>,

    /// Bumped by every invalidation. Fetches started under an older
    /// generation must not populate the cache.
    generation: Mutex<u64>,
}

impl ReadSession {
    pub fn new(
        inode: Inode,
        config: Arc<ReadConfig>,
        locator: DynLocator,
        transport: DynTransport,
        cache: DynCacheStore,
    ) -> Self {
        let waves = Arc::new(WaveScheduler::new(config.clone(), transport));
        let planner = ReadaheadPlanner::new(
            config.readahead_max_window(),
            config.round_trip_time(),
        );
        Self {
            inner: Arc::new(SessionInner {
                inode,
                locator,
                cache,
                reconstructor: StripeReconstructor::new(waves.clone()),
                waves,
                governor: BandwidthGovernor::new(config.bandwidth_overuse),
                hit_bytes: AtomicU64::new(0),
                miss_bytes: AtomicU64::new(0),
                prefetched_bytes: AtomicU64::new(0),
                in_flight: Mutex::new(Vec::new()),
                generation: Mutex::new(0),
                config,
            }),
            planner: Mutex::new(planner),
            background: Mutex::new(JoinSet::new()),
        }
    }

    pub fn inode(&self) -> Inode {
        self.inner.inode
    }

    /// Read up to `size` bytes at `offset`. Fewer bytes are returned only
    /// at the end of the file.
    pub async fn read(&self, offset: u64, size: u32) -> ReadResult<Bytes> {
        if size == 0 {
            return Ok(Bytes::new());
        }

        let deadline =
            Instant::now() + self.inner.config.total_read_timeout();
        let range = offset..offset.saturating_add(size as u64);
        let (data, _) = match tokio::time::timeout_at(
            deadline,
            self.inner.read_range(range, deadline, true),
        )
        .await
        {
            Ok(r) => r?,
            Err(_) => {
                tracing::debug!(
                    inode = %self.inner.inode,
                    offset,
                    size,
                    "read timed out"
                );
                return Err(self.inner.total_timeout());
            }
        };

        self.inner.governor.record_foreground(data.len() as u64);
        if data.len() == size as usize {
            self.schedule_readahead(offset, data.len() as u64);
        }
        Ok(data)
    }

    /// Drop every cached byte of this session.
    pub fn invalidate(&self) {
        let mut generation = self.inner.generation.lock().unwrap();
        *generation += 1;
        self.inner.cache.invalidate(self.inner.inode, 0..u64::MAX);
    }

    /// Abort every background prefetch.
    pub fn close(&self) {
        self.background.lock().unwrap().abort_all();
    }

    pub fn stats(&self) -> SessionStats {
        let (foreground_bytes, background_bytes, _) =
            self.inner.governor.counters();
        SessionStats {
            inode: self.inner.inode,
            hit_bytes: self.inner.hit_bytes.load(Ordering::Acquire),
            miss_bytes: self.inner.miss_bytes.load(Ordering::Acquire),
            prefetched_bytes: self
                .inner
                .prefetched_bytes
                .load(Ordering::Acquire),
            readahead_window: self.planner.lock().unwrap().window(),
            recent_foreground_bytes: foreground_bytes,
            recent_background_bytes: background_bytes,
            background_tasks: {
                let mut background = self.background.lock().unwrap();
                while background.try_join_next().is_some() {}
                background.len()
            },
        }
    }

    fn schedule_readahead(&self, offset: u64, served: u64) {
        let proposal = {
            let mut planner = self.planner.lock().unwrap();
            planner.observe(offset, served);
            planner.propose()
        };
        let Some(mut range) = proposal else {
            return;
        };
        if self.inner.config.cache_ttl().is_zero() {
            // nowhere to keep prefetched bytes
            return;
        }

        let inner = &self.inner;
        while let CacheLookup::Hit(entry) =
            inner.cache.get(inner.inode, range.clone())
        {
            range.start = entry.end().min(range.end);
            if range.is_empty() {
                return;
            }
        }

        let granted = inner.governor.allow(range.end - range.start);
        if granted == 0 {
            tracing::trace!(
                inode = %inner.inode,
                ?range,
                "readahead throttled"
            );
            return;
        }
        range.end = range.start + granted;

        {
            let mut in_flight = inner.in_flight.lock().unwrap();
            if in_flight
                .iter()
                .any(|r| r.start < range.end && range.start < r.end)
            {
                inner.governor.release(granted);
                return;
            }
            in_flight.push(range.clone());
        }

        let inner = inner.clone();
        let mut background = self.background.lock().unwrap();
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            tracing::trace!(inode = %inner.inode, ?range, "readahead");
            let deadline =
                Instant::now() + inner.config.total_read_timeout();
            let res = tokio::time::timeout_at(
                deadline,
                inner.read_range(range.clone(), deadline, false),
            )
            .await
            .unwrap_or_else(|_| Err(inner.total_timeout()));

            match res {
                Ok((_, fetched)) => {
                    inner.governor.record_background(fetched, granted);
                    inner
                        .prefetched_bytes
                        .fetch_add(fetched, Ordering::AcqRel);
                }
                Err(err) => {
                    inner.governor.release(granted);
                    tracing::warn!(
                        inode = %inner.inode,
                        ?range,
                        ?err,
                        "readahead failed"
                    );
                }
            }
            inner.in_flight.lock().unwrap().retain(|r| *r != range);
        });
    }
}

impl SessionInner {
    fn total_timeout(&self) -> ReadError {
        ReadError::TotalTimeout {
            timeout_ms: self.config.chunkserver_total_read_timeout_ms as u64,
        }
    }

    /// Serve `range` from the cache where possible and fetch the rest.
    /// Returns the bytes and how many of them came from the network.
    async fn read_range(
        &self,
        range: Range<u64>,
        deadline: Instant,
        foreground: bool,
    ) -> ReadResult<(Bytes, u64)> {
        let mut out =
            BytesMut::with_capacity((range.end - range.start) as usize);
        let mut pos = range.start;
        let mut fetched = 0;
        let generation = *self.generation.lock().unwrap();

        while pos < range.end {
            match self.cache.get(self.inode, pos..range.end) {
                CacheLookup::Hit(entry) => {
                    let end = entry.end().min(range.end);
                    let from = (pos - entry.start) as usize;
                    let to = (end - entry.start) as usize;
                    out.extend_from_slice(&entry.data[from..to]);
                    if foreground {
                        self.hit_bytes.fetch_add(end - pos, Ordering::AcqRel);
                    }
                    pos = end;
                }
                CacheLookup::Miss { end } => {
                    let end = if end > pos {
                        end.min(range.end)
                    } else {
                        range.end
                    };
                    let data = self
                        .fetch_uncached(pos..end, generation, deadline)
                        .await?;
                    let got = data.len() as u64;
                    fetched += got;
                    if foreground {
                        self.miss_bytes.fetch_add(got, Ordering::AcqRel);
                    }
                    out.extend_from_slice(&data);
                    if got < end - pos {
                        // end of file
                        break;
                    }
                    pos = end;
                }
            }
        }

        Ok((out.freeze(), fetched))
    }

    /// Fetch an uncached range, chunk by chunk, and cache the result
    /// unless the session was invalidated since `generation`.
    async fn fetch_uncached(
        &self,
        range: Range<u64>,
        generation: u64,
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        let chunk_size = self.config.chunk_size;
        let mut pieces = Vec::new();
        let mut pos = range.start;
        while pos < range.end {
            let chunk_index =
                u32::try_from(pos / chunk_size).map_err(|_| {
                    ReadError::other(format!(
                        "offset {pos} is beyond the last chunk"
                    ))
                })?;
            let chunk_start = chunk_index as u64 * chunk_size;
            let end = range.end.min(chunk_start + chunk_size);
            pieces.push((chunk_index, pos - chunk_start..end - chunk_start));
            pos = end;
        }

        let wanted: Vec<u64> =
            pieces.iter().map(|(_, r)| r.end - r.start).collect();
        let fetched = futures::future::try_join_all(
            pieces
                .into_iter()
                .map(|(index, range)| self.read_chunk(index, range, deadline)),
        )
        .await?;

        let capacity = wanted.iter().sum::<u64>() as usize;
        let mut out = BytesMut::with_capacity(capacity);
        for (piece, wanted) in fetched.iter().zip(wanted) {
            out.extend_from_slice(piece);
            if (piece.len() as u64) < wanted {
                // the file ends within this chunk
                break;
            }
        }
        let data = out.freeze();

        let current = self.generation.lock().unwrap();
        if *current == generation {
            self.cache.put(
                self.inode,
                range.start,
                data.clone(),
                self.config.cache_ttl(),
            );
        } else {
            tracing::debug!(
                inode = %self.inode,
                ?range,
                "file changed during fetch, not caching"
            );
        }
        Ok(data)
    }

    /// Read `range` (chunk coordinates) of chunk `chunk_index`, retrying
    /// once with a fresh location if the chunk looks stale.
    async fn read_chunk(
        &self,
        chunk_index: u32,
        range: Range<u64>,
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        let desc = self.locate(chunk_index).await?;
        match self
            .read_located(chunk_index, &desc, range.clone(), deadline)
            .await
        {
            Err(err) if err.is_stale_location_hint() => {
                tracing::debug!(
                    inode = %self.inode,
                    chunk_index,
                    ?err,
                    "refreshing chunk location"
                );
                self.locator.invalidate(self.inode, chunk_index);
                let desc = self
                    .locator
                    .locate(self.inode, chunk_index)
                    .await
                    .map_err(|err| self.location_error(chunk_index, err))?;
                self.read_located(chunk_index, &desc, range, deadline).await
            }
            res => res,
        }
    }

    async fn locate(&self, chunk_index: u32) -> ReadResult<ChunkDescriptor> {
        let err = match self.locator.locate(self.inode, chunk_index).await {
            Ok(desc) => return Ok(desc),
            Err(err) => err,
        };
        tracing::debug!(
            inode = %self.inode,
            chunk_index,
            ?err,
            "locate failed, retrying once"
        );
        self.locator.invalidate(self.inode, chunk_index);
        self.locator
            .locate(self.inode, chunk_index)
            .await
            .map_err(|err| self.location_error(chunk_index, err))
    }

    fn location_error(&self, chunk_index: u32, err: ReadError) -> ReadError {
        match err {
            ReadError::Location { .. } => err,
            err => ReadError::location_src(self.inode, chunk_index, err),
        }
    }

    async fn read_located(
        &self,
        chunk_index: u32,
        desc: &ChunkDescriptor,
        range: Range<u64>,
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        let chunk_length =
            desc.chunk_length(chunk_index, self.config.chunk_size);
        let range = range.start..range.end.min(chunk_length);
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let length = range.end - range.start;

        let layout = desc.layout().map_err(|err| {
            ReadError::location_src(self.inode, chunk_index, err)
        })?;
        match layout {
            ChunkLayout::Hole => Ok(vec![0u8; length as usize].into()),
            ChunkLayout::Replicated => {
                let request = PartRequest {
                    chunk_id: desc.chunk_id,
                    version: desc.version,
                    part: ChunkPart::Replica,
                    offset: range.start,
                    length,
                };
                let holders = desc.holders_of(ChunkPart::Replica);
                self.waves.fetch(request, &holders, deadline).await
            }
            ChunkLayout::Xor { level } => {
                let plan = xor_plan(level, range.clone());
                let parts =
                    futures::future::try_join_all(plan.iter().map(|read| {
                        self.fetch_xor_part(
                            desc,
                            chunk_length,
                            level,
                            *read,
                            deadline,
                        )
                    }))
                    .await?;

                let mut out = vec![0; length as usize];
                for (read, data) in plan.iter().zip(parts.iter()) {
                    xor_scatter(level, range.clone(), read, data, &mut out);
                }
                Ok(out.into())
            }
        }
    }

    /// Fetch one contiguous run of a stripe data part, from its holders or
    /// rebuilt from its siblings. Bytes always come from exactly one of
    /// the two sources.
    async fn fetch_xor_part(
        &self,
        desc: &ChunkDescriptor,
        chunk_length: u64,
        level: u8,
        read: XorPartRead,
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        let part = ChunkPart::XorData {
            level,
            index: read.index,
        };
        let target = StripeTarget {
            chunk_length,
            level,
            index: read.index,
            part_offset: read.part_offset,
            length: read.length,
        };

        let holders = desc.holders_of(part);
        if holders.is_empty() {
            return self
                .reconstructor
                .reconstruct(desc, target, deadline)
                .await;
        }

        let request = PartRequest {
            chunk_id: desc.chunk_id,
            version: desc.version,
            part,
            offset: read.part_offset,
            length: read.length,
        };
        let primary = self.waves.fetch(request, &holders, deadline);
        tokio::pin!(primary);

        if self.config.prefetch_xor_stripes {
            let stall = tokio::time::sleep(self.config.wave_read_timeout());
            tokio::select! {
                biased;
                res = &mut primary => {
                    return self
                        .after_primary(desc, target, res, deadline)
                        .await;
                }
                _ = stall => (),
            }

            tracing::debug!(
                chunk_id = %desc.chunk_id,
                %part,
                "part stalled, racing reconstruction"
            );
            let rebuild =
                self.reconstructor.reconstruct(desc, target, deadline);
            tokio::pin!(rebuild);

            // on a tie the primary wins
            tokio::select! {
                biased;
                res = &mut primary => match res {
                    Ok(data) => Ok(data),
                    Err(err) => {
                        tracing::debug!(?err, "primary failed during race");
                        rebuild.await
                    }
                },
                res = &mut rebuild => match res {
                    Ok(data) => Ok(data),
                    Err(err) => {
                        tracing::debug!(
                            ?err,
                            "reconstruction failed during race"
                        );
                        primary.await
                    }
                },
            }
        } else {
            let res = primary.await;
            self.after_primary(desc, target, res, deadline).await
        }
    }

    /// A primary that failed for good is replaced by a reconstruction.
    async fn after_primary(
        &self,
        desc: &ChunkDescriptor,
        target: StripeTarget,
        res: ReadResult<Bytes>,
        deadline: Instant,
    ) -> ReadResult<Bytes> {
        match res {
            Err(ReadError::AllHoldersFailed { .. }) => {
                tracing::debug!(
                    chunk_id = %desc.chunk_id,
                    index = target.index,
                    "part unavailable, reconstructing"
                );
                self.reconstructor.reconstruct(desc, target, deadline).await
            }
            res => res,
        }
    }
}
