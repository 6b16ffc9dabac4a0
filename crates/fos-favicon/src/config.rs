//! Favicon cache and ICO decoder configuration
//!
//! Both structs deserialize with defaults for missing fields, so they can be
//! embedded in a larger engine config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cache budget for evictable payloads
pub const DEFAULT_MAX_SIZE_BYTES: usize = 512 * 1024;

/// Widest favicon kept in the cache; wider inserts are downscaled
pub const DEFAULT_MAX_CACHED_WIDTH: u32 = 128;

/// How long a failed favicon load is remembered (4 hours)
pub const DEFAULT_FAILURE_RETRY_SECS: u64 = 4 * 60 * 60;

/// Preferred pixel depth when choosing between ICO entries of one width
pub const DEFAULT_MAX_BPP: u32 = 32;

/// ICO entries wider than this are "oversized"; only the narrowest survives
pub const DEFAULT_LARGEST_FAVICON_SIZE: u32 = 128;

/// Reclaimable bytes above which a pruned ICO buffer is compacted
pub const DEFAULT_COMPACT_THRESHOLD: usize = 4000;

/// Favicon cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaviconCacheConfig {
    /// Byte budget for evictable payloads
    pub max_size_bytes: usize,
    /// Widest payload stored; larger inserts are downscaled
    pub max_cached_width: u32,
    /// Failure memo lifetime in seconds
    pub failure_retry_secs: u64,
}

impl Default for FaviconCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_cached_width: DEFAULT_MAX_CACHED_WIDTH,
            failure_retry_secs: DEFAULT_FAILURE_RETRY_SECS,
        }
    }
}

impl FaviconCacheConfig {
    pub fn with_max_size_bytes(mut self, bytes: usize) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_max_cached_width(mut self, width: u32) -> Self {
        self.max_cached_width = width.max(1);
        self
    }

    pub fn with_failure_retry(mut self, retry: Duration) -> Self {
        self.failure_retry_secs = retry.as_secs();
        self
    }

    pub fn failure_retry(&self) -> Duration {
        Duration::from_secs(self.failure_retry_secs)
    }
}

/// ICO decoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcoDecoderConfig {
    /// Target pixel depth for entry selection
    pub max_bpp: u32,
    /// Widest entry considered interesting
    pub largest_favicon_size: u32,
    /// Compaction threshold in bytes
    pub compact_threshold: usize,
}

impl Default for IcoDecoderConfig {
    fn default() -> Self {
        Self {
            max_bpp: DEFAULT_MAX_BPP,
            largest_favicon_size: DEFAULT_LARGEST_FAVICON_SIZE,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl IcoDecoderConfig {
    pub fn with_max_bpp(mut self, bpp: u32) -> Self {
        self.max_bpp = bpp;
        self
    }

    pub fn with_largest_favicon_size(mut self, width: u32) -> Self {
        self.largest_favicon_size = width;
        self
    }

    pub fn with_compact_threshold(mut self, bytes: usize) -> Self {
        self.compact_threshold = bytes;
        self
    }
}
