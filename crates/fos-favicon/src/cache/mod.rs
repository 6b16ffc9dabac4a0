//! Favicon cache
//!
//! Per-URL buckets of payloads sorted by size, a global LRU ordering over
//! every evictable payload, and the [`FaviconCache`] that ties them together.

mod bucket;
mod favicon_cache;
mod ordering;

pub use bucket::{CachedImage, FaviconBucket};
pub use favicon_cache::{CacheStats, FaviconCache, FaviconMatch, TargetSize};
