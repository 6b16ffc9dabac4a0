//! ICO/Favicon Support
//!
//! Directory parser for the Windows ICO container as served by websites.
//! The directory is pruned to one entry per width (plus the narrowest
//! oversized entry), the image count in the header is patched to match, and
//! when pruning frees enough space the buffer is compacted. Embedded images
//! are decoded lazily, one index at a time.
//!
//! Layout: a 6 byte header (reserved `0`, type `1`, image count) followed by
//! 16 byte directory entries, followed by raw BMP (DIB) or PNG payloads.

use std::cmp::Ordering;
use std::collections::btree_map::{BTreeMap, Entry};
use std::iter::FusedIterator;
use std::ops::Range;
use std::sync::Arc;

use super::decode::{DecodeResult, FaviconBitmaps};
use super::raster::{ImageBackend, ImageError, RasterImage};
use super::sniff::{buffer_starts_with, PNG_SIGNATURE};
use crate::config::IcoDecoderConfig;

/// Fixed header size
pub const ICO_HEADER_LENGTH: usize = 6;

/// Size of one directory entry
pub const ICO_DIRENTRY_LENGTH: usize = 16;

/// Header type field value for icons (cursors use 2)
const ICO_TYPE_ICON: u16 = 1;

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// One directory entry. Offsets are relative to the start of the ICO region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconDirEntry {
    /// Position in the directory
    pub index: usize,
    /// Width (stored 0 means 256)
    pub width: u32,
    /// Height (stored 0 means 256)
    pub height: u32,
    /// Number of colors in palette (0 = no palette)
    pub palette_size: u32,
    /// Bits per pixel, multiplied by the plane count when that exceeds 1
    pub bits_per_pixel: u32,
    pub payload_size: usize,
    pub payload_offset: usize,
    pub payload_is_png: bool,
}

impl IconDirEntry {
    /// Parse the entry at `index`. `None` marks an erroneous entry.
    fn parse(region: &[u8], index: usize) -> Option<Self> {
        let at = ICO_HEADER_LENGTH + index * ICO_DIRENTRY_LENGTH;
        let raw = region.get(at..at + ICO_DIRENTRY_LENGTH)?;

        // Reserved byte
        if raw[3] != 0 {
            return None;
        }

        let dimension = |b: u8| if b == 0 { 256 } else { b as u32 };
        let color_planes = read_u16(raw, 4) as u32;
        let mut bits_per_pixel = read_u16(raw, 6) as u32;
        if color_planes > 1 {
            bits_per_pixel = bits_per_pixel.saturating_mul(color_planes);
        }

        // Sizes and offsets are signed 32-bit in practice; the top bit marks garbage
        let payload_size = read_u32(raw, 8);
        let payload_offset = read_u32(raw, 12);
        if payload_size > i32::MAX as u32 || payload_offset > i32::MAX as u32 {
            return None;
        }
        let (payload_size, payload_offset) = (payload_size as usize, payload_offset as usize);
        let payload = region.get(payload_offset..payload_offset.checked_add(payload_size)?)?;

        Some(Self {
            index,
            width: dimension(raw[0]),
            height: dimension(raw[1]),
            palette_size: raw[2] as u32,
            bits_per_pixel,
            payload_size,
            payload_offset,
            payload_is_png: buffer_starts_with(payload, PNG_SIGNATURE, 0),
        })
    }

    /// Offset of this entry's 16 directory bytes within the region
    pub fn directory_offset(&self) -> usize {
        ICO_HEADER_LENGTH + self.index * ICO_DIRENTRY_LENGTH
    }

    pub fn payload_range(&self) -> Range<usize> {
        self.payload_offset..self.payload_offset + self.payload_size
    }

    fn directory_range(&self) -> Range<usize> {
        let start = self.directory_offset();
        start..start + ICO_DIRENTRY_LENGTH
    }

    /// Preference between two entries of the same width; `Greater` means
    /// `self` is the better pick.
    ///
    /// Pixel depth closest to `max_bpp` from above wins, then the larger
    /// palette, then the smaller payload, then PNG over BMP.
    pub fn preference(&self, other: &Self, max_bpp: u32) -> Ordering {
        let depth = if self.bits_per_pixel >= max_bpp && other.bits_per_pixel >= max_bpp {
            other.bits_per_pixel.cmp(&self.bits_per_pixel)
        } else {
            self.bits_per_pixel.cmp(&other.bits_per_pixel)
        };

        depth
            .then(self.palette_size.cmp(&other.palette_size))
            .then(other.payload_size.cmp(&self.payload_size))
            .then(self.payload_is_png.cmp(&other.payload_is_png))
    }
}

/// Reasons an ICO region is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IcoError {
    #[error("Region {offset}+{length} exceeds buffer of {buffer_len} bytes")]
    RegionOutOfBounds { offset: usize, length: usize, buffer_len: usize },
    #[error("File too small")]
    TooSmall,
    #[error("Invalid header")]
    InvalidHeader,
    #[error("No images in file")]
    NoImages,
    #[error("Directory of {count} entries does not fit in {length} bytes")]
    TruncatedDirectory { count: usize, length: usize },
    #[error("No usable directory entries")]
    NoUsableEntries,
}

/// Pruned, immutable ICO directory over its (possibly compacted) buffer
#[derive(Debug)]
pub struct IconDirectory {
    bytes: Arc<[u8]>,
    offset: usize,
    length: usize,
    entries: Vec<IconDirEntry>,
}

impl IconDirectory {
    /// Retained entries, ascending by width, oversized survivor last
    pub fn entries(&self) -> &[IconDirEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// The ICO bytes
    pub fn region(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.length]
    }

    /// Decode the embedded image at `index`
    pub fn decode_bitmap_at_index<B: ImageBackend + ?Sized>(
        &self,
        index: usize,
        backend: &B,
    ) -> Result<RasterImage, ImageError> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| ImageError::DecodeFailed(format!("no icon directory entry {index}")))?;

        if entry.payload_is_png {
            return backend.decode(&self.region()[entry.payload_range()]);
        }
        backend.decode(&self.single_image_ico(entry))
    }

    /// Wrap a BMP payload in a one-entry ICO; bare DIBs have no file header
    /// a general decoder can recognize.
    fn single_image_ico(&self, entry: &IconDirEntry) -> Vec<u8> {
        let region = self.region();
        let payload_at = ICO_HEADER_LENGTH + ICO_DIRENTRY_LENGTH;

        let mut buf = Vec::with_capacity(payload_at + entry.payload_size);
        buf.extend_from_slice(&[0, 0, ICO_TYPE_ICON as u8, 0, 1, 0]);
        buf.extend_from_slice(&region[entry.directory_range()]);
        buf.extend_from_slice(&region[entry.payload_range()]);
        write_u32(&mut buf, ICO_HEADER_LENGTH + 12, payload_at as u32);
        buf
    }
}

#[derive(Debug)]
enum DecodeState {
    Unparsed,
    Invalid(IcoError),
    Valid(Arc<IconDirectory>),
}

/// ICO decoder
///
/// Owns the input buffer until the directory is parsed; the outcome is
/// memoized, so later calls never re-parse.
#[derive(Debug)]
pub struct IconContainerDecoder {
    bytes: Vec<u8>,
    offset: usize,
    length: usize,
    config: IcoDecoderConfig,
    state: DecodeState,
}

impl IconContainerDecoder {
    /// Decoder over a whole buffer
    pub fn new(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self::with_region(bytes, 0, length)
    }

    /// Decoder over `bytes[offset..offset + length]`
    pub fn with_region(bytes: Vec<u8>, offset: usize, length: usize) -> Self {
        Self {
            bytes,
            offset,
            length,
            config: IcoDecoderConfig::default(),
            state: DecodeState::Unparsed,
        }
    }

    pub fn with_config(mut self, config: IcoDecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Parse, prune and possibly compact the directory (once)
    pub fn decode_directory(&mut self) -> Result<Arc<IconDirectory>, IcoError> {
        match &self.state {
            DecodeState::Valid(directory) => return Ok(Arc::clone(directory)),
            DecodeState::Invalid(err) => return Err(err.clone()),
            DecodeState::Unparsed => {}
        }

        let result = self.parse_directory();
        self.state = match &result {
            Ok(directory) => DecodeState::Valid(Arc::clone(directory)),
            Err(err) => {
                tracing::debug!("Rejected ICO container: {}", err);
                DecodeState::Invalid(err.clone())
            }
        };
        result
    }

    pub fn is_valid(&mut self) -> bool {
        self.decode_directory().is_ok()
    }

    /// Decode a single embedded image of the pruned directory
    pub fn decode_bitmap_at_index<B: ImageBackend + ?Sized>(
        &mut self,
        index: usize,
        backend: &B,
    ) -> Option<RasterImage> {
        let directory = self.decode_directory().ok()?;
        match directory.decode_bitmap_at_index(index, backend) {
            Ok(image) => Some(image),
            Err(err) => {
                tracing::debug!("ICO entry {} failed to decode: {}", index, err);
                None
            }
        }
    }

    /// Lazy iterator over the embedded images, `None` if the container is invalid
    pub fn iterator<'b, B: ImageBackend + ?Sized>(
        &mut self,
        backend: &'b B,
    ) -> Option<IcoBitmaps<'b, B>> {
        let directory = self.decode_directory().ok()?;
        Some(IcoBitmaps { directory, backend, next: 0 })
    }

    /// Package the directory, its buffer and the lazy image iterator
    pub fn decode<'b, B: ImageBackend + ?Sized>(
        mut self,
        backend: &'b B,
    ) -> Option<DecodeResult<'b, B>> {
        let bitmaps = self.iterator(backend)?;
        let directory = Arc::clone(&bitmaps.directory);
        Some(DecodeResult::new(
            Arc::clone(directory.bytes()),
            directory.offset(),
            directory.length(),
            true,
            FaviconBitmaps::Ico(bitmaps),
        ))
    }

    fn parse_directory(&mut self) -> Result<Arc<IconDirectory>, IcoError> {
        let (offset, length) = (self.offset, self.length);
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(IcoError::RegionOutOfBounds { offset, length, buffer_len: self.bytes.len() })?;
        if length < ICO_HEADER_LENGTH {
            return Err(IcoError::TooSmall);
        }

        let region = &self.bytes[offset..end];
        if read_u16(region, 0) != 0 || read_u16(region, 2) != ICO_TYPE_ICON {
            return Err(IcoError::InvalidHeader);
        }

        let count = read_u16(region, 4) as usize;
        if count == 0 {
            return Err(IcoError::NoImages);
        }
        if length < ICO_HEADER_LENGTH + count * ICO_DIRENTRY_LENGTH {
            return Err(IcoError::TruncatedDirectory { count, length });
        }

        let mut entries = self.prune(region, count);
        if entries.is_empty() {
            return Err(IcoError::NoUsableEntries);
        }

        let retained = entries.iter().fold(ICO_HEADER_LENGTH, |acc, entry| {
            acc.saturating_add(ICO_DIRENTRY_LENGTH).saturating_add(entry.payload_size)
        });
        let reclaimable = length.saturating_sub(retained);

        let mut bytes = std::mem::take(&mut self.bytes);
        let region = &mut bytes[offset..end];
        region[4..6].copy_from_slice(&(entries.len() as u16).to_le_bytes());

        let directory = if reclaimable > self.config.compact_threshold {
            let compacted = compacting_copy(region, &mut entries, retained);
            tracing::debug!(
                "Compacted ICO from {} to {} bytes ({} entries kept of {})",
                length,
                compacted.len(),
                entries.len(),
                count
            );
            IconDirectory { length: compacted.len(), bytes: compacted.into(), offset: 0, entries }
        } else {
            rewrite_directory(region, &mut entries);
            IconDirectory { bytes: bytes.into(), offset, length, entries }
        };
        Ok(Arc::new(directory))
    }

    /// Keep the best entry per width and the narrowest oversized entry
    fn prune(&self, region: &[u8], count: usize) -> Vec<IconDirEntry> {
        let max_bpp = self.config.max_bpp;
        let mut by_width: BTreeMap<u32, IconDirEntry> = BTreeMap::new();
        let mut oversized: Option<IconDirEntry> = None;

        for index in 0..count {
            let Some(entry) = IconDirEntry::parse(region, index) else {
                tracing::trace!("Skipping erroneous ICO directory entry {}", index);
                continue;
            };

            if entry.width > self.config.largest_favicon_size {
                let better = match &oversized {
                    None => true,
                    Some(current) => {
                        entry.width < current.width
                            || (entry.width == current.width
                                && entry.preference(current, max_bpp) == Ordering::Greater)
                    }
                };
                if better {
                    oversized = Some(entry);
                }
                continue;
            }

            match by_width.entry(entry.width) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(mut slot) => {
                    if entry.preference(slot.get(), max_bpp) == Ordering::Greater {
                        slot.insert(entry);
                    }
                }
            }
        }

        let mut entries: Vec<IconDirEntry> = by_width.into_values().collect();
        entries.extend(oversized);
        entries
    }
}

/// Move the retained directory entries to the front of the directory so the
/// patched count and the directory agree. Payloads stay where they are.
fn rewrite_directory(region: &mut [u8], entries: &mut [IconDirEntry]) {
    let raw: Vec<[u8; ICO_DIRENTRY_LENGTH]> = entries
        .iter()
        .map(|entry| {
            let mut bytes = [0u8; ICO_DIRENTRY_LENGTH];
            bytes.copy_from_slice(&region[entry.directory_range()]);
            bytes
        })
        .collect();

    for (index, (entry, bytes)) in entries.iter_mut().zip(raw).enumerate() {
        entry.index = index;
        region[entry.directory_range()].copy_from_slice(&bytes);
    }
}

/// Header, retained directory entries and their payloads in a fresh buffer,
/// with payload offsets rewritten
fn compacting_copy(region: &[u8], entries: &mut [IconDirEntry], retained: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(retained);
    buf.extend_from_slice(&region[..ICO_HEADER_LENGTH]);
    for entry in entries.iter() {
        buf.extend_from_slice(&region[entry.directory_range()]);
    }

    let mut payload_at = ICO_HEADER_LENGTH + entries.len() * ICO_DIRENTRY_LENGTH;
    for (index, entry) in entries.iter_mut().enumerate() {
        buf.extend_from_slice(&region[entry.payload_range()]);
        write_u32(&mut buf, ICO_HEADER_LENGTH + index * ICO_DIRENTRY_LENGTH + 12, payload_at as u32);
        entry.index = index;
        entry.payload_offset = payload_at;
        payload_at += entry.payload_size;
    }
    buf
}

/// Lazily decoded images of an ICO directory, in directory order.
/// Each item is `None` when that entry fails to decode.
pub struct IcoBitmaps<'b, B: ?Sized> {
    directory: Arc<IconDirectory>,
    backend: &'b B,
    next: usize,
}

impl<B: ?Sized> IcoBitmaps<'_, B> {
    pub fn directory(&self) -> &Arc<IconDirectory> {
        &self.directory
    }
}

impl<B: ImageBackend + ?Sized> Iterator for IcoBitmaps<'_, B> {
    type Item = Option<RasterImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.directory.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;

        match self.directory.decode_bitmap_at_index(index, self.backend) {
            Ok(image) => Some(Some(image)),
            Err(err) => {
                tracing::debug!("ICO entry {} failed to decode: {}", index, err);
                Some(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.directory.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<B: ImageBackend + ?Sized> ExactSizeIterator for IcoBitmaps<'_, B> {}
impl<B: ImageBackend + ?Sized> FusedIterator for IcoBitmaps<'_, B> {}

/// Check if data is ICO
pub fn is_ico(data: &[u8]) -> bool {
    data.len() >= ICO_HEADER_LENGTH
        && read_u16(data, 0) == 0
        && read_u16(data, 2) == ICO_TYPE_ICON
        && read_u16(data, 4) != 0
}
