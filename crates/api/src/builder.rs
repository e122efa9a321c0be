//! Builder-related types.

use crate::*;

/// The general chunkread builder.
/// This contains both configuration and collaborator instances,
/// allowing construction of a reader.
#[derive(Debug)]
pub struct Builder {
    /// The configuration to be used by every session.
    /// This can be loaded from disk or modified before building.
    pub config: config::ReadConfig,

    /// The [locator::Locator] used to resolve chunk holders.
    pub locator: locator::DynLocator,

    /// The [transport::Transport] used to reach storage nodes.
    pub transport: transport::DynTransport,

    /// The [cache::CacheStoreFactory] used to create the cache
    /// of each session.
    pub cache: cache::DynCacheStoreFactory,
}

impl Builder {
    /// Replace the configuration.
    pub fn with_config(mut self, config: config::ReadConfig) -> Self {
        self.config = config;
        self
    }

    /// Check the configuration before it gets frozen.
    pub fn validate(&self) -> ReadResult<()> {
        self.config.validate()
    }
}
