//! Factories and implementations of the chunkread read pipeline.

pub mod core_reader;
pub use core_reader::{CoreReader, SessionStats};

mod mem_cache_store;
pub use mem_cache_store::*;

mod mem_locator;
pub use mem_locator::*;

mod mem_transport;
pub use mem_transport::*;
