#![deny(missing_docs)]
//! Chunkread client-side read pipeline.
//!
//! Serves byte-range reads of open files from a chunk-based distributed
//! store: chunks are located through a [Locator](locator::Locator),
//! fetched from their holders in competing waves, rebuilt from XOR
//! stripe siblings when a part is slow or lost, cached per session and
//! prefetched ahead of sequential readers within a bandwidth budget.

use chunkread_api::{builder::Builder, config::ReadConfig, *};

/// Construct a default builder around the given collaborators.
///
/// - `config` - The default configuration is [ReadConfig::default].
/// - `cache` - The default cache is [factories::MemCacheStoreFactory].
pub fn default_builder(
    locator: locator::DynLocator,
    transport: transport::DynTransport,
) -> Builder {
    Builder {
        config: ReadConfig::default(),
        locator,
        transport,
        cache: factories::MemCacheStoreFactory::create(),
    }
}

pub mod factories;
