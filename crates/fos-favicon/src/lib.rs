//! fOS Favicon - Favicon Cache
//!
//! In-memory, size-bounded, multi-resolution favicon cache for the browser
//! chrome, together with the ICO container decoder that feeds it.
//!
//! This crate provides:
//! - Magic-number sniffing of raw bitmap payloads (PNG, GIF, JPEG, BMP, WEBP)
//! - ICO directory parsing with per-width pruning and buffer compaction
//! - Lazy per-entry decoding of ICO payloads
//! - A per-URL bucket of cached payloads ordered by size
//! - A global LRU over all URLs with a byte budget, permanent entries,
//!   on-demand rescaling and failure memoisation

pub mod cache;
pub mod config;
pub mod image;
pub mod time;

pub use cache::{CacheStats, CachedImage, FaviconBucket, FaviconCache, FaviconMatch, TargetSize};
pub use config::{FaviconCacheConfig, IcoDecoderConfig};
pub use crate::image::{
    decode_favicon, is_ico, is_recognized_container, buffer_starts_with, DecodeResult,
    DefaultImageBackend, FaviconBitmaps, IcoBitmaps, IcoError, IconContainerDecoder,
    IconDirEntry, IconDirectory, ImageBackend, ImageError, ImageFormat, RasterImage,
    ICO_DIRENTRY_LENGTH, ICO_HEADER_LENGTH,
};
pub use time::{Clock, ManualClock, SystemClock};

/// Color (RGBA)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const TRANSPARENT: Color = Color { r: 0, g: 0, b: 0, a: 0 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from a packed `0xRRGGBB` value
    pub const fn from_rgb24(rgb: u32) -> Self {
        Self::rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
    }

    /// Packed `0xRRGGBB` value, alpha dropped
    pub const fn to_rgb24(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_constants() {
        assert_eq!(Color::WHITE.to_rgb24(), 0xFFFFFF);
        assert_eq!(Color::BLACK.to_rgb24(), 0);
        assert_eq!(Color::TRANSPARENT.a, 0);
    }

    #[test]
    fn test_color_rgb24() {
        let c = Color::from_rgb24(0x12AB34);
        assert_eq!(c, Color::rgb(0x12, 0xAB, 0x34));
        assert_eq!(c.to_rgb24(), 0x12AB34);
    }
}
