//! The in-memory stub transport implementation provided by chunkread.

use bytes::Bytes;
use chunkread_api::{chunk::ChunkPart, transport::*, *};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a stub storage node answers connection attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Accept the connection (after [NodeBehavior::connect_delay]).
    #[default]
    Accept,

    /// Refuse the connection right away.
    Refuse,

    /// Never answer, the caller runs into its connect timeout.
    Hang,
}

/// How a stub storage node behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeBehavior {
    /// What happens on connect.
    pub connect: ConnectBehavior,

    /// How long an accepted connect takes.
    pub connect_delay: Duration,

    /// How long every reply takes.
    pub reply_delay: Duration,

    /// Accept fetches but never reply.
    pub stall: bool,

    /// Fail every fetch with an error.
    pub fail_reads: bool,

    /// Reply with one byte less than requested.
    pub truncate_replies: bool,
}

/// Counters kept per stub storage node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Connection attempts.
    pub connects: u64,

    /// Fetch requests received.
    pub fetches: u64,

    /// Connections abandoned by the client.
    pub abandons: u64,
}

impl std::ops::Add for NodeStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            connects: self.connects + rhs.connects,
            fetches: self.fetches + rhs.fetches,
            abandons: self.abandons + rhs.abandons,
        }
    }
}

#[derive(Debug, Default)]
struct MemNode {
    behavior: NodeBehavior,
    parts: HashMap<(ChunkId, ChunkPart), (u32, Bytes)>,
    stats: NodeStats,
}

type Nodes = Arc<Mutex<HashMap<HolderAddr, MemNode>>>;

/// The in-memory stub transport implementation provided by chunkread.
/// This is NOT a production module. It is for testing only.
/// Storage nodes are plain maps of chunk parts living in this process,
/// with configurable misbehavior.
#[derive(Debug, Default)]
pub struct MemTransport {
    nodes: Nodes,
}

impl MemTransport {
    /// Construct a new MemTransport without any nodes.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store `data` as `part` of version `version` of chunk `chunk_id`
    /// on node `addr`, creating the node if needed.
    pub fn store(
        &self,
        addr: impl Into<HolderAddr>,
        chunk_id: ChunkId,
        version: u32,
        part: ChunkPart,
        data: Bytes,
    ) {
        self.nodes
            .lock()
            .unwrap()
            .entry(addr.into())
            .or_default()
            .parts
            .insert((chunk_id, part), (version, data));
    }

    /// Change the behavior of node `addr`, creating the node if needed.
    pub fn set_behavior(
        &self,
        addr: impl Into<HolderAddr>,
        behavior: NodeBehavior,
    ) {
        self.nodes
            .lock()
            .unwrap()
            .entry(addr.into())
            .or_default()
            .behavior = behavior;
    }

    /// Counters of node `addr`.
    pub fn node_stats(&self, addr: impl Into<HolderAddr>) -> NodeStats {
        self.nodes
            .lock()
            .unwrap()
            .get(&addr.into())
            .map(|n| n.stats)
            .unwrap_or_default()
    }

    /// Counters summed over every node.
    pub fn total_stats(&self) -> NodeStats {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .fold(NodeStats::default(), |acc, n| acc + n.stats)
    }
}

impl Transport for MemTransport {
    fn connect(
        &self,
        addr: HolderAddr,
        connect_timeout: Duration,
    ) -> BoxFut<'_, ReadResult<DynConnection>> {
        Box::pin(async move {
            let behavior = {
                let mut lock = self.nodes.lock().unwrap();
                match lock.get_mut(&addr) {
                    None => return Err(ReadError::connect(addr)),
                    Some(node) => {
                        node.stats.connects += 1;
                        node.behavior.clone()
                    }
                }
            };

            let nodes = self.nodes.clone();
            let accept = async {
                match behavior.connect {
                    ConnectBehavior::Refuse => {
                        Err(ReadError::connect(addr.clone()))
                    }
                    ConnectBehavior::Hang => std::future::pending().await,
                    ConnectBehavior::Accept => {
                        tokio::time::sleep(behavior.connect_delay).await;
                        let out: DynConnection = Arc::new(MemConnection {
                            addr: addr.clone(),
                            nodes,
                            abandoned: AtomicBool::new(false),
                        });
                        Ok(out)
                    }
                }
            };

            let out = tokio::time::timeout(connect_timeout, accept).await;
            out.unwrap_or_else(|_| Err(ReadError::connect(addr)))
        })
    }
}

#[derive(Debug)]
struct MemConnection {
    addr: HolderAddr,
    nodes: Nodes,
    abandoned: AtomicBool,
}

impl MemConnection {
    fn serve(
        &self,
        request: &PartRequest,
    ) -> ReadResult<(NodeBehavior, Bytes)> {
        let mut lock = self.nodes.lock().unwrap();
        let node = lock.get_mut(&self.addr).ok_or_else(|| {
            ReadError::fetch(self.addr.clone(), "node is gone")
        })?;
        node.stats.fetches += 1;

        let (version, data) = node
            .parts
            .get(&(request.chunk_id, request.part))
            .ok_or_else(|| {
                ReadError::fetch(
                    self.addr.clone(),
                    format!(
                        "no {} of chunk {} stored",
                        request.part, request.chunk_id
                    ),
                )
            })?;
        if *version != request.version {
            return Err(ReadError::fetch(
                self.addr.clone(),
                format!(
                    "wrong chunk version {} (stored {version})",
                    request.version
                ),
            ));
        }

        let end = request.offset + request.length;
        if end > data.len() as u64 {
            return Err(ReadError::fetch(
                self.addr.clone(),
                format!("range beyond part end {}", data.len()),
            ));
        }

        let mut out = data.slice(request.offset as usize..end as usize);
        if node.behavior.truncate_replies && !out.is_empty() {
            out.truncate(out.len() - 1);
        }
        Ok((node.behavior.clone(), out))
    }
}

impl Connection for MemConnection {
    fn fetch(
        &self,
        request: PartRequest,
        read_timeout: Duration,
    ) -> BoxFut<'_, ReadResult<Bytes>> {
        Box::pin(async move {
            if self.abandoned.load(Ordering::Acquire) {
                return Err(ReadError::fetch(
                    self.addr.clone(),
                    "connection abandoned",
                ));
            }

            let reply = async {
                let (behavior, data) = self.serve(&request)?;
                if behavior.stall {
                    std::future::pending::<()>().await;
                }
                tokio::time::sleep(behavior.reply_delay).await;
                if behavior.fail_reads {
                    return Err(ReadError::fetch(
                        self.addr.clone(),
                        "read error",
                    ));
                }
                Ok(data)
            };

            match tokio::time::timeout(read_timeout, reply).await {
                Ok(r) => r,
                Err(_) => Err(ReadError::fetch(
                    self.addr.clone(),
                    "read timed out",
                )),
            }
        })
    }

    fn abandon(&self) {
        if !self.abandoned.swap(true, Ordering::AcqRel) {
            if let Some(node) = self.nodes.lock().unwrap().get_mut(&self.addr)
            {
                node.stats.abandons += 1;
            }
        }
    }
}

#[cfg(test)]
mod test;
