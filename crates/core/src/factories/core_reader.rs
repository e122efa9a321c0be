//! The core reader implementation provided by chunkread.
//!
//! A [CoreReader] owns the open read sessions of one process. Each
//! session serves byte-range reads of one file:
//!
//! - Cached bytes are served from the session's cache store.
//! - Missing bytes are split at chunk boundaries. Every chunk is located
//!   and then read from its holders in competing waves.
//! - Chunks stored as XOR stripes are read part by part. A part whose
//!   holders fail (or, with `prefetchXorStripes`, stall for one wave) is
//!   rebuilt from its siblings and the parity part.
//! - Chunks that keep failing are located once more before giving up.
//! - Sequential readers get a trailing range prefetched into the cache,
//!   within a budget relative to the bytes they actually consume.
//!
//! Every logical read is bounded by the total read timeout.

use chunkread_api::{builder::Builder, cache::*, config::ReadConfig, *};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

mod back_off;
mod bandwidth;
mod readahead;
mod session;
mod stripe;
mod wave;

use session::ReadSession;

/// Diagnostic counters of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The inode the session reads.
    pub inode: Inode,

    /// Bytes returned to callers straight from the cache.
    pub hit_bytes: u64,

    /// Bytes returned to callers that had to be fetched.
    pub miss_bytes: u64,

    /// Bytes fetched by background readahead.
    pub prefetched_bytes: u64,

    /// The current readahead window.
    pub readahead_window: u64,

    /// Decaying count of bytes returned to callers.
    pub recent_foreground_bytes: u64,

    /// Decaying count of bytes fetched by readahead.
    pub recent_background_bytes: u64,

    /// Readahead tasks still running.
    pub background_tasks: usize,
}

/// The core reader implementation provided by chunkread.
#[derive(Debug)]
pub struct CoreReader {
    config: Arc<ReadConfig>,
    locator: locator::DynLocator,
    transport: transport::DynTransport,
    cache: DynCacheStoreFactory,
    sessions: Mutex<HashMap<SessionId, Arc<ReadSession>>>,
    next_id: AtomicU64,
}

impl CoreReader {
    /// Validate the builder's configuration and construct a reader.
    pub fn init(builder: Builder) -> ReadResult<Self> {
        builder.validate()?;
        let Builder {
            config,
            locator,
            transport,
            cache,
        } = builder;
        tracing::debug!(?config, "reader initialized");

        Ok(Self {
            config: Arc::new(config),
            locator,
            transport,
            cache,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// The frozen configuration shared by every session.
    pub fn config(&self) -> &Arc<ReadConfig> {
        &self.config
    }

    /// Open a read session for `inode`.
    pub fn open_session(&self, inode: Inode) -> ReadResult<SessionId> {
        let cache = self.cache.create(self.config.clone())?;
        let session = Arc::new(ReadSession::new(
            inode,
            self.config.clone(),
            self.locator.clone(),
            self.transport.clone(),
            cache,
        ));

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().unwrap().insert(id, session);
        tracing::debug!(%id, %inode, "session opened");
        Ok(id)
    }

    /// Read up to `size` bytes at `offset` of the file open in `session`.
    ///
    /// Fewer bytes are returned only when the read reaches the end of the
    /// file.
    pub async fn read(
        &self,
        session: SessionId,
        offset: u64,
        size: u32,
    ) -> ReadResult<bytes::Bytes> {
        self.session(session)?.read(offset, size).await
    }

    /// Close `session`, aborting its background prefetches. The id is
    /// never handed out again.
    pub fn close_session(&self, session: SessionId) -> ReadResult<()> {
        let s = self
            .sessions
            .lock()
            .unwrap()
            .remove(&session)
            .ok_or(ReadError::UnknownSession(session))?;
        s.close();
        tracing::debug!(id = %session, inode = %s.inode(), "session closed");
        Ok(())
    }

    /// Drop the cached bytes of `inode` in every open session, because
    /// the file was changed.
    pub fn invalidate_inode(&self, inode: Inode) {
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.inode() == inode)
            .cloned()
            .collect();
        for s in sessions {
            s.invalidate();
        }
    }

    /// Diagnostic counters of `session`.
    pub fn session_stats(
        &self,
        session: SessionId,
    ) -> ReadResult<SessionStats> {
        Ok(self.session(session)?.stats())
    }

    /// Shut the reader down, closing any session left open.
    pub fn terminate(self) {
        let sessions = self.sessions.into_inner().unwrap();
        for (id, s) in sessions {
            tracing::warn!(%id, inode = %s.inode(), "closing leftover session");
            s.close();
        }
    }

    fn session(&self, session: SessionId) -> ReadResult<Arc<ReadSession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session)
            .cloned()
            .ok_or(ReadError::UnknownSession(session))
    }
}

#[cfg(test)]
mod test;
