//! Per-URL favicon payloads
//!
//! A [`FaviconBucket`] holds every cached payload for one favicon URL,
//! ascending by size with at most one payload per size. Primaries come
//! straight from a decoded favicon; secondaries are local rescales of them.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use super::ordering::SlotId;
use crate::image::{ImageBackend, RasterImage};
use crate::Color;

/// One cached payload
#[derive(Debug, Clone)]
pub struct CachedImage {
    size: u32,
    is_primary: bool,
    /// `None` once invalidated
    payload: Option<Arc<RasterImage>>,
    /// Node in the global ordering; `None` for permanent or evicted entries
    slot: Option<SlotId>,
}

impl CachedImage {
    fn new(image: Arc<RasterImage>, size: u32, is_primary: bool) -> Self {
        Self { size, is_primary, payload: Some(image), slot: None }
    }

    /// Side length this payload is filed under
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// An invalidated primary only remembers that a payload of this size existed
    pub fn is_invalidated(&self) -> bool {
        self.payload.is_none()
    }

    pub fn payload(&self) -> Option<&Arc<RasterImage>> {
        self.payload.as_ref()
    }

    /// Bytes charged against the cache budget
    pub fn byte_size(&self) -> usize {
        self.payload.as_ref().map_or(0, |image| image.byte_size())
    }

    pub(crate) fn slot(&self) -> Option<SlotId> {
        self.slot
    }
}

/// All cached payloads for one favicon URL
#[derive(Debug)]
pub struct FaviconBucket {
    url: Arc<str>,
    favicons: Vec<CachedImage>,
    dominant_color: OnceLock<Color>,
    timestamp: Instant,
    has_failed: bool,
    generation: u64,
}

impl FaviconBucket {
    pub fn new(url: impl Into<Arc<str>>) -> Self {
        Self::with_generation(url.into(), Instant::now(), 0)
    }

    pub(crate) fn with_generation(url: Arc<str>, timestamp: Instant, generation: u64) -> Self {
        Self {
            url,
            favicons: Vec::new(),
            dominant_color: OnceLock::new(),
            timestamp,
            has_failed: false,
            generation,
        }
    }

    /// Empty bucket recording a failed load at `timestamp`
    pub(crate) fn failed(url: Arc<str>, timestamp: Instant, generation: u64) -> Self {
        Self { has_failed: true, ..Self::with_generation(url, timestamp, generation) }
    }

    pub fn url(&self) -> &Arc<str> {
        &self.url
    }

    /// Payloads ascending by size
    pub fn favicons(&self) -> &[CachedImage] {
        &self.favicons
    }

    pub fn len(&self) -> usize {
        self.favicons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.favicons.is_empty()
    }

    pub fn has_failed(&self) -> bool {
        self.has_failed
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Add a decoded payload at its natural width.
    /// Returns its index and whether it was inserted.
    pub fn add_primary(&mut self, image: Arc<RasterImage>) -> (usize, bool) {
        let size = image.width();
        self.insert(CachedImage::new(image, size, true))
    }

    /// Add a rescaled payload filed under `size`, which may exceed the
    /// image's real width when upscaling was capped.
    pub fn add_secondary(&mut self, image: Arc<RasterImage>, size: u32) -> (usize, bool) {
        self.insert(CachedImage::new(image, size, false))
    }

    /// An existing payload of the same size wins; the new one is dropped
    fn insert(&mut self, element: CachedImage) -> (usize, bool) {
        match self.search(element.size) {
            Ok(index) => (index, false),
            Err(index) => {
                self.favicons.insert(index, element);
                (index, true)
            }
        }
    }

    /// `Ok(index)` of an exact size match, else `Err(insertion point)`
    fn search(&self, size: u32) -> Result<usize, usize> {
        self.favicons.binary_search_by_key(&size, CachedImage::size)
    }

    /// Index of the smallest payload at least `size` wide
    pub fn next_highest_index(&self, size: u32) -> Option<usize> {
        match self.search(size) {
            Ok(index) => Some(index),
            Err(index) if index < self.favicons.len() => Some(index),
            Err(_) => None,
        }
    }

    /// Nearest primary at or after `from`, else the nearest before it.
    ///
    /// `None` if the nearest primary has been invalidated: the caller must
    /// reload it from storage rather than settle for a smaller one.
    pub fn next_primary(&self, from: usize) -> Option<&CachedImage> {
        let from = from.min(self.favicons.len());
        let nearest = self.favicons[from..]
            .iter()
            .find(|e| e.is_primary)
            .or_else(|| self.favicons[..from].iter().rev().find(|e| e.is_primary));

        match nearest {
            Some(element) if element.is_invalidated() => None,
            Some(element) => Some(element),
            None => {
                if !self.has_failed {
                    tracing::debug!("No primary favicon cached for {}", self.url);
                }
                None
            }
        }
    }

    /// Dominant colour of the first live payload, white if there is none.
    /// Computed once.
    pub fn ensure_dominant_color<B: ImageBackend + ?Sized>(&self, backend: &B) -> Color {
        *self.dominant_color.get_or_init(|| {
            self.favicons
                .iter()
                .find_map(CachedImage::payload)
                .map_or(Color::WHITE, |image| backend.dominant_color(image))
        })
    }

    pub(crate) fn set_slot(&mut self, index: usize, slot: SlotId) {
        if let Some(element) = self.favicons.get_mut(index) {
            element.slot = Some(slot);
        }
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.favicons.iter().filter_map(CachedImage::slot)
    }

    /// Evict the payload filed under `size`: primaries are invalidated in
    /// place, secondaries are dropped.
    pub(crate) fn evict(&mut self, size: u32) -> bool {
        let Ok(index) = self.search(size) else {
            return false;
        };
        if self.favicons[index].is_primary {
            let element = &mut self.favicons[index];
            element.payload = None;
            element.slot = None;
        } else {
            self.favicons.remove(index);
        }
        true
    }
}
