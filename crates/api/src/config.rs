//! Configuration of the read pipeline.
//!
//! A [ReadConfig] is constructed once, validated, frozen in an `Arc` and
//! handed to every session. Nothing reads configuration from global state.

use crate::*;
use std::time::Duration;

/// Read pipeline configuration.
///
/// The serialized form is camelCase JSON. Loading is tolerant of missing
/// properties, which take the defaults documented on each field.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadConfig {
    /// How many attempts (waves) a single part fetch may make in total.
    /// Default: 30.
    pub retries: u32,

    /// Estimated round trip time to a storage node. Used to size the
    /// readahead window from observed throughput and as the pause before
    /// re-contacting a holder that already failed. Default: 200 ms.
    pub chunkserver_round_trip_time_ms: u32,

    /// Connection establishment timeout. Must be shorter than the wave
    /// read timeout. Default: 250 ms.
    pub chunkserver_connect_timeout_ms: u32,

    /// How long an attempt may stay silent before the next wave starts.
    /// Default: 500 ms.
    pub chunkserver_wave_read_timeout_ms: u32,

    /// Deadline for a whole logical read. Default: 2000 ms.
    pub chunkserver_total_read_timeout_ms: u32,

    /// How long cached bytes stay valid. 0 disables the cache.
    /// Default: 0 ms.
    pub cache_expiration_time_ms: u32,

    /// Upper bound of the readahead window. 0 disables readahead.
    /// Default: 16384 KiB.
    pub readahead_max_window_size_kb: u32,

    /// Start rebuilding a stalled stripe part from its siblings after one
    /// wave timeout. Default: false.
    pub prefetch_xor_stripes: bool,

    /// Largest allowed ratio of background prefetch bytes to foreground
    /// bytes. Default: 1.0.
    pub bandwidth_overuse: f64,

    /// Size of a chunk in bytes. A multiple of
    /// [BLOCK_SIZE](crate::chunk::BLOCK_SIZE). Default: 64 MiB.
    pub chunk_size: u64,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            retries: 30,
            chunkserver_round_trip_time_ms: 200,
            chunkserver_connect_timeout_ms: 250,
            chunkserver_wave_read_timeout_ms: 500,
            chunkserver_total_read_timeout_ms: 2000,
            cache_expiration_time_ms: 0,
            readahead_max_window_size_kb: 16384,
            prefetch_xor_stripes: false,
            bandwidth_overuse: 1.0,
            chunk_size: chunk::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ReadConfig {
    /// Load a configuration from JSON. Missing properties get defaults.
    /// The result is validated.
    pub fn from_json(json: &str) -> ReadResult<Self> {
        let out: Self = serde_json::from_str(json)
            .map_err(|e| ReadError::other_src("decode read config", e))?;
        out.validate()?;
        Ok(out)
    }

    /// Check the configuration for values the pipeline cannot work with.
    pub fn validate(&self) -> ReadResult<()> {
        if self.retries == 0 {
            return Err(ReadError::config("retries must be at least 1"));
        }
        if self.chunkserver_connect_timeout_ms == 0
            || self.chunkserver_wave_read_timeout_ms == 0
            || self.chunkserver_total_read_timeout_ms == 0
        {
            return Err(ReadError::config("timeouts must be non-zero"));
        }
        if self.chunkserver_connect_timeout_ms
            >= self.chunkserver_wave_read_timeout_ms
        {
            return Err(ReadError::config(
                "connect timeout must be shorter than the wave read timeout",
            ));
        }
        if self.chunkserver_wave_read_timeout_ms
            > self.chunkserver_total_read_timeout_ms
        {
            return Err(ReadError::config(
                "wave read timeout must not exceed the total read timeout",
            ));
        }
        if !self.bandwidth_overuse.is_finite() || self.bandwidth_overuse < 0.0
        {
            return Err(ReadError::config(
                "bandwidth overuse must be a non-negative number",
            ));
        }
        if self.chunk_size == 0 || self.chunk_size % chunk::BLOCK_SIZE != 0 {
            return Err(ReadError::config(format!(
                "chunk size must be a non-zero multiple of {}",
                chunk::BLOCK_SIZE
            )));
        }
        Ok(())
    }

    /// [Self::chunkserver_round_trip_time_ms] as a duration.
    pub fn round_trip_time(&self) -> Duration {
        Duration::from_millis(self.chunkserver_round_trip_time_ms as u64)
    }

    /// [Self::chunkserver_connect_timeout_ms] as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.chunkserver_connect_timeout_ms as u64)
    }

    /// [Self::chunkserver_wave_read_timeout_ms] as a duration.
    pub fn wave_read_timeout(&self) -> Duration {
        Duration::from_millis(self.chunkserver_wave_read_timeout_ms as u64)
    }

    /// [Self::chunkserver_total_read_timeout_ms] as a duration.
    pub fn total_read_timeout(&self) -> Duration {
        Duration::from_millis(self.chunkserver_total_read_timeout_ms as u64)
    }

    /// [Self::cache_expiration_time_ms] as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_expiration_time_ms as u64)
    }

    /// [Self::readahead_max_window_size_kb] in bytes.
    pub fn readahead_max_window(&self) -> u64 {
        self.readahead_max_window_size_kb as u64 * 1024
    }
}
