//! Favicon cache
//!
//! Two maps keyed by favicon URL sit behind one reader/writer lock: the
//! evictable map, whose payloads are charged against a byte budget and
//! threaded through a global LRU ordering, and the permanent map, which is
//! never culled. Lookups take the read lock; structural changes take the
//! write lock. Touching an entry only reorders the LRU, which has its own
//! mutex so hits never need the write lock.
//!
//! Rescaling for a missing size happens with no lock held. The result is
//! committed under the write lock only if the URL's bucket was not replaced
//! in the meantime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::bucket::FaviconBucket;
use super::ordering::{LruOrdering, OrderingEntry};
use crate::config::FaviconCacheConfig;
use crate::image::{DefaultImageBackend, ImageBackend, RasterImage};
use crate::time::{Clock, SystemClock};
use crate::Color;

/// Upscaling never goes past this factor
const MAX_UPSCALE_FACTOR: u32 = 2;

/// Requested favicon size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSize {
    /// Largest primary available, returned as is
    Largest,
    /// Side length in pixels
    Pixels(u32),
}

impl From<u32> for TargetSize {
    fn from(size: u32) -> Self {
        Self::Pixels(size)
    }
}

/// A payload returned by [`FaviconCache::get_favicon_for_dimensions`]
#[derive(Debug, Clone)]
pub struct FaviconMatch {
    image: Arc<RasterImage>,
    requested: TargetSize,
}

impl FaviconMatch {
    pub fn image(&self) -> &Arc<RasterImage> {
        &self.image
    }

    pub fn into_image(self) -> Arc<RasterImage> {
        self.image
    }

    pub fn requested(&self) -> TargetSize {
        self.requested
    }

    /// Width of the returned payload
    pub fn size(&self) -> u32 {
        self.image.width()
    }

    /// False for best-effort upscales that fall short of the request
    pub fn is_exact(&self) -> bool {
        match self.requested {
            TargetSize::Largest => true,
            TargetSize::Pixels(size) => self.image.width() == size,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Payloads synthesized by rescaling a primary
    pub scaled: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    scaled: AtomicU64,
    evictions: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            scaled: self.scaled.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Everything guarded by the reader/writer lock
#[derive(Debug, Default)]
struct BackingMaps {
    backing: HashMap<Arc<str>, FaviconBucket>,
    permanent: HashMap<Arc<str>, FaviconBucket>,
    /// Locked on its own under the read lock, via `get_mut` under the write lock
    ordering: Mutex<LruOrdering>,
    /// Sum of the byte sizes of everything in `ordering`
    current_size_bytes: usize,
}

impl BackingMaps {
    /// Permanent entries shadow evictable ones
    fn lookup(&self, url: &str) -> Option<&FaviconBucket> {
        self.permanent.get(url).or_else(|| self.backing.get(url))
    }

    /// Drop a bucket's payloads from the ordering and the running size
    fn release(&mut self, bucket: &FaviconBucket) {
        let ordering = self.ordering.get_mut();
        for slot in bucket.slots() {
            if let Some(entry) = ordering.remove(slot) {
                self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.bytes);
            }
        }
    }

    fn remove_evictable(&mut self, url: &str) -> bool {
        match self.backing.remove(url) {
            Some(old) => {
                self.release(&old);
                true
            }
            None => false,
        }
    }

    /// Replace the evictable bucket for its URL and mark all of its
    /// payloads most recently used, smallest first.
    fn insert_evictable(&mut self, bucket: FaviconBucket) {
        let url = Arc::clone(bucket.url());
        self.remove_evictable(&url);

        let BackingMaps { backing, ordering, current_size_bytes, .. } = self;
        let ordering = ordering.get_mut();
        let bucket = backing.entry(Arc::clone(&url)).or_insert(bucket);

        let mut slots = Vec::with_capacity(bucket.len());
        for (index, element) in bucket.favicons().iter().enumerate() {
            if element.is_invalidated() {
                continue;
            }
            let bytes = element.byte_size();
            let slot = ordering.push_front(OrderingEntry {
                url: Arc::clone(&url),
                size: element.size(),
                bytes,
            });
            *current_size_bytes += bytes;
            slots.push((index, slot));
        }
        for (index, slot) in slots {
            bucket.set_slot(index, slot);
        }
    }

    /// Evict least recently used payloads until the budget holds.
    /// Returns how many were evicted.
    fn cull(&mut self, max_size_bytes: usize) -> u64 {
        let ordering = self.ordering.get_mut();
        let mut evicted = 0;

        while self.current_size_bytes > max_size_bytes {
            let Some(entry) = ordering.pop_back() else {
                tracing::warn!(
                    "Favicon cache accounts {} bytes with nothing left to evict",
                    self.current_size_bytes
                );
                self.current_size_bytes = 0;
                break;
            };
            self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.bytes);
            evicted += 1;

            match self.backing.get_mut(&entry.url).map(|bucket| bucket.evict(entry.size)) {
                Some(true) => {
                    tracing::debug!("Culled {}px favicon for {}", entry.size, entry.url);
                }
                _ => {
                    tracing::warn!(
                        "Culled {}px favicon for {} had no matching cache entry",
                        entry.size,
                        entry.url
                    );
                }
            }
        }

        evicted
    }

    fn evict_all(&mut self) {
        self.backing.clear();
        self.ordering.get_mut().clear();
        self.current_size_bytes = 0;
    }
}

/// Outcome of the read phase of a dimension lookup
enum Probe {
    Miss,
    Hit(Arc<RasterImage>),
    /// No payload of the requested size; `source` is the primary to rescale
    Scale { source: Arc<RasterImage>, source_size: u32, generation: u64 },
}

/// Size-bounded, multi-resolution favicon cache
pub struct FaviconCache<B: ImageBackend = DefaultImageBackend> {
    maps: RwLock<BackingMaps>,
    backend: B,
    config: FaviconCacheConfig,
    clock: Arc<dyn Clock>,
    /// The platform's default favicon, never worth caching
    placeholder: Option<RasterImage>,
    next_generation: AtomicU64,
    stats: StatCounters,
}

impl FaviconCache {
    pub fn new(config: FaviconCacheConfig) -> Self {
        Self::with_backend(config, DefaultImageBackend)
    }
}

impl Default for FaviconCache {
    fn default() -> Self {
        Self::new(FaviconCacheConfig::default())
    }
}

impl<B: ImageBackend> FaviconCache<B> {
    pub fn with_backend(config: FaviconCacheConfig, backend: B) -> Self {
        Self {
            maps: RwLock::new(BackingMaps::default()),
            backend,
            config,
            clock: Arc::new(SystemClock),
            placeholder: None,
            next_generation: AtomicU64::new(0),
            stats: StatCounters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Inserts equal to `placeholder` are dropped
    pub fn with_placeholder(mut self, placeholder: RasterImage) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn config(&self) -> &FaviconCacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Bytes held by evictable payloads
    pub fn current_size_bytes(&self) -> usize {
        self.maps.read().current_size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.config.max_size_bytes
    }

    /// Number of evictable URLs, failure memos included
    pub fn len(&self) -> usize {
        self.maps.read().backing.len()
    }

    pub fn is_empty(&self) -> bool {
        let maps = self.maps.read();
        maps.backing.is_empty() && maps.permanent.is_empty()
    }

    pub fn permanent_len(&self) -> usize {
        self.maps.read().permanent.len()
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ========================================================================
    // Failure memos
    // ========================================================================

    /// Whether a load of `url` failed recently enough not to retry yet
    pub fn is_failed_favicon(&self, url: &str) -> bool {
        let retry = self.config.failure_retry();
        {
            let maps = self.maps.read();
            match maps.backing.get(url) {
                Some(bucket) if bucket.has_failed() => {
                    let age = self.clock.now().saturating_duration_since(bucket.timestamp());
                    if age < retry {
                        return true;
                    }
                }
                _ => return false,
            }
        }

        // Expired: drop the memo unless someone replaced it meanwhile
        let mut maps = self.maps.write();
        match maps.backing.get(url) {
            Some(bucket) if bucket.has_failed() => {
                let age = self.clock.now().saturating_duration_since(bucket.timestamp());
                if age < retry {
                    return true;
                }
            }
            _ => return false,
        }
        maps.remove_evictable(url);
        tracing::debug!("Favicon failure for {} expired", url);
        false
    }

    /// Remember that loading `url` failed
    pub fn put_failed(&self, url: &str) {
        let bucket = FaviconBucket::failed(Arc::from(url), self.clock.now(), self.generation());
        let mut maps = self.maps.write();
        maps.insert_evictable(bucket);
        tracing::debug!("Favicon for {} marked as failed", url);
    }

    // ========================================================================
    // Inserts
    // ========================================================================

    /// Copy of `image` suitable for caching, or `None` for the placeholder
    fn cacheable_copy(&self, image: RasterImage) -> Option<RasterImage> {
        if self.placeholder.as_ref() == Some(&image) {
            return None;
        }
        if image.width() > self.config.max_cached_width {
            return Some(self.scale_to_width(&image, self.config.max_cached_width));
        }
        Some(image)
    }

    fn scale_to_width(&self, image: &RasterImage, width: u32) -> RasterImage {
        let height = (u64::from(image.height()) * u64::from(width) / u64::from(image.width()))
            .clamp(1, u64::from(u32::MAX)) as u32;
        self.backend.scale(image, width, height)
    }

    /// Replace the cached payloads for `url` with a single primary
    ///
    /// A missing or placeholder image leaves the cache untouched.
    pub fn put_single_favicon(&self, url: &str, image: impl Into<Option<RasterImage>>) {
        let Some(image) = image.into().and_then(|image| self.cacheable_copy(image)) else {
            tracing::debug!("No cacheable favicon for {}", url);
            return;
        };
        let mut bucket = self.fresh_bucket(url);
        bucket.add_primary(Arc::new(image));
        self.splice(bucket, false);
    }

    /// Replace the cached payloads for `url` with one primary per usable
    /// image. Permanent entries are never culled and do not count against
    /// the byte budget.
    ///
    /// The previous bucket is replaced even when no image is usable, so a
    /// stale favicon is never served after a failed refresh.
    ///
    /// Rescales of a permanent entry are kept for good as well: every
    /// distinct requested size adds a payload that is never culled.
    pub fn put_favicons<I>(&self, url: &str, images: I, permanently: bool)
    where
        I: IntoIterator,
        I::Item: Into<Option<RasterImage>>,
    {
        let mut bucket = self.fresh_bucket(url);
        for image in images {
            if let Some(image) = image.into().and_then(|image| self.cacheable_copy(image)) {
                bucket.add_primary(Arc::new(image));
            }
        }
        if bucket.is_empty() {
            tracing::debug!("No cacheable favicon for {}", url);
        }
        self.splice(bucket, permanently);
    }

    fn fresh_bucket(&self, url: &str) -> FaviconBucket {
        FaviconBucket::with_generation(Arc::from(url), self.clock.now(), self.generation())
    }

    /// Install `bucket` in place of whatever is cached for its URL
    fn splice(&self, bucket: FaviconBucket, permanently: bool) {
        let mut maps = self.maps.write();
        if permanently {
            maps.remove_evictable(bucket.url());
            maps.permanent.insert(Arc::clone(bucket.url()), bucket);
        } else {
            maps.insert_evictable(bucket);
            let evicted = maps.cull(self.config.max_size_bytes);
            StatCounters::bump(&self.stats.evictions, evicted);
        }
        tracing::trace!(
            "Favicon cache at {}/{} bytes",
            maps.current_size_bytes,
            self.config.max_size_bytes
        );
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Payload for `url` at `size`, rescaling a cached primary if needed
    ///
    /// Returns `None` when nothing is cached for `url`, or when the primary
    /// that would be used has been evicted and must be reloaded from
    /// storage. Upscaling stops at twice the primary's size, in which case
    /// the match is not [`exact`](FaviconMatch::is_exact).
    pub fn get_favicon_for_dimensions(
        &self,
        url: &str,
        size: impl Into<TargetSize>,
    ) -> Option<FaviconMatch> {
        let requested = size.into();
        if requested == TargetSize::Pixels(0) {
            tracing::debug!("Zero-sized favicon requested for {}", url);
            return None;
        }
        let image = match self.probe(url, requested) {
            Probe::Miss => {
                StatCounters::bump(&self.stats.misses, 1);
                return None;
            }
            Probe::Hit(image) => image,
            Probe::Scale { source, source_size, generation } => {
                let TargetSize::Pixels(target) = requested else {
                    return None;
                };
                let (scaled, best_effort) = self.synthesize(&source, source_size, target);
                self.commit(url, generation, target, Arc::new(scaled), best_effort)
            }
        };
        StatCounters::bump(&self.stats.hits, 1);
        Some(FaviconMatch { image, requested })
    }

    /// Read phase: find a payload or the primary to rescale
    fn probe(&self, url: &str, requested: TargetSize) -> Probe {
        let maps = self.maps.read();
        let Some(bucket) = maps.lookup(url) else {
            return Probe::Miss;
        };

        let from = match requested {
            TargetSize::Largest => bucket.len(),
            TargetSize::Pixels(target) => match bucket.next_highest_index(target) {
                Some(index) => {
                    let element = &bucket.favicons()[index];
                    let Some(payload) = element.payload() else {
                        return Probe::Miss;
                    };
                    if element.size() == target {
                        if let Some(slot) = element.slot() {
                            maps.ordering.lock().move_to_front(slot);
                        }
                        return Probe::Hit(Arc::clone(payload));
                    }
                    index
                }
                None => bucket.len(),
            },
        };

        let Some(primary) = bucket.next_primary(from) else {
            return Probe::Miss;
        };
        let Some(payload) = primary.payload() else {
            return Probe::Miss;
        };
        if requested == TargetSize::Largest {
            if let Some(slot) = primary.slot() {
                maps.ordering.lock().move_to_front(slot);
            }
            return Probe::Hit(Arc::clone(payload));
        }

        Probe::Scale {
            source: Arc::clone(payload),
            source_size: primary.size(),
            generation: bucket.generation(),
        }
    }

    /// Rescale `source` toward `target`. The flag is set when the 2x
    /// upscale cap kept the result short of `target`.
    fn synthesize(&self, source: &RasterImage, source_size: u32, target: u32) -> (RasterImage, bool) {
        if source_size >= target {
            return (self.scale_to_width(source, target), false);
        }
        let capped = source_size.saturating_mul(MAX_UPSCALE_FACTOR);
        if capped >= target {
            (self.scale_to_width(source, target), false)
        } else {
            (self.scale_to_width(source, capped.max(1)), true)
        }
    }

    /// Write phase: file `image` under `target` as a secondary
    fn commit(
        &self,
        url: &str,
        generation: u64,
        target: u32,
        image: Arc<RasterImage>,
        best_effort: bool,
    ) -> Arc<RasterImage> {
        let mut maps = self.maps.write();
        let BackingMaps { backing, permanent, ordering, current_size_bytes } = &mut *maps;

        let (bucket, is_permanent) = match permanent.get_mut(url) {
            Some(bucket) => (bucket, true),
            None => match backing.get_mut(url) {
                Some(bucket) => (bucket, false),
                None => return image,
            },
        };
        if bucket.generation() != generation {
            tracing::debug!("Favicon for {} replaced while rescaling, not caching", url);
            return image;
        }

        if best_effort {
            bucket.ensure_dominant_color(&self.backend);
        }

        let (index, inserted) = bucket.add_secondary(Arc::clone(&image), target);
        if !inserted {
            // Another thread got there first
            return bucket.favicons()[index].payload().cloned().unwrap_or(image);
        }
        StatCounters::bump(&self.stats.scaled, 1);

        if !is_permanent {
            let bytes = image.byte_size();
            let slot = ordering.get_mut().push_front(OrderingEntry {
                url: Arc::clone(bucket.url()),
                size: target,
                bytes,
            });
            bucket.set_slot(index, slot);
            *current_size_bytes += bytes;

            let evicted = maps.cull(self.config.max_size_bytes);
            StatCounters::bump(&self.stats.evictions, evicted);
        }
        image
    }

    /// Dominant colour of the favicon for `url`, white if unknown
    pub fn get_dominant_color(&self, url: &str) -> Color {
        let maps = self.maps.read();
        match maps.lookup(url) {
            Some(bucket) => bucket.ensure_dominant_color(&self.backend),
            None => {
                tracing::warn!("Dominant colour requested for uncached favicon {}", url);
                Color::WHITE
            }
        }
    }

    /// Drop every evictable entry; permanent entries stay
    pub fn evict_all(&self) {
        let mut maps = self.maps.write();
        let count = maps.backing.len();
        maps.evict_all();
        tracing::debug!("Evicted all {} evictable favicon entries", count);
    }
}

impl<B: ImageBackend> std::fmt::Debug for FaviconCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaviconCache")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
