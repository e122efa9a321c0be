#![deny(missing_docs)]
//! Chunkread API contains the collaborator traits and the basic types
//! required to define the client-side read pipeline of a chunk-based
//! distributed file store.
//!
//! If you want the pipeline itself, please see the chunkread_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub mod builder;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod locator;
pub mod transport;

mod error;
pub use error::*;

pub mod id;
pub use id::{ChunkId, HolderAddr, Inode, SessionId};
