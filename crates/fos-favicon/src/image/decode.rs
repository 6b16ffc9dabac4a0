//! Favicon payload decoding
//!
//! Entry point for raw favicon bytes: payloads the raster decoder understands
//! are decoded directly, everything else is treated as an ICO container.

use std::sync::Arc;

use super::ico::{IcoBitmaps, IconContainerDecoder};
use super::raster::{ImageBackend, RasterImage};
use super::sniff::is_recognized_container;
use crate::config::IcoDecoderConfig;

/// Decoded images of one favicon payload
pub enum FaviconBitmaps<'b, B: ?Sized> {
    /// A plain PNG/GIF/JPEG/BMP/WEBP payload, decoded eagerly
    Single(Option<RasterImage>),
    /// ICO entries, decoded on demand
    Ico(IcoBitmaps<'b, B>),
}

impl<B: ImageBackend + ?Sized> Iterator for FaviconBitmaps<'_, B> {
    type Item = Option<RasterImage>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Single(image) => image.take().map(Some),
            Self::Ico(bitmaps) => bitmaps.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Single(image) => {
                let n = usize::from(image.is_some());
                (n, Some(n))
            }
            Self::Ico(bitmaps) => bitmaps.size_hint(),
        }
    }
}

/// Result of decoding a favicon payload
pub struct DecodeResult<'b, B: ?Sized> {
    bytes: Arc<[u8]>,
    offset: usize,
    length: usize,
    is_ico: bool,
    bitmaps: FaviconBitmaps<'b, B>,
}

impl<'b, B: ?Sized> DecodeResult<'b, B> {
    pub(crate) fn new(
        bytes: Arc<[u8]>,
        offset: usize,
        length: usize,
        is_ico: bool,
        bitmaps: FaviconBitmaps<'b, B>,
    ) -> Self {
        Self { bytes, offset, length, is_ico, bitmaps }
    }

    /// Backing buffer; compacted ICOs get a fresh one
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_ico(&self) -> bool {
        self.is_ico
    }

    /// Exactly the favicon bytes, as they should be persisted
    pub fn bytes_for_storage(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.length]
    }

    pub fn bitmaps(&mut self) -> &mut FaviconBitmaps<'b, B> {
        &mut self.bitmaps
    }

    pub fn into_bitmaps(self) -> FaviconBitmaps<'b, B> {
        self.bitmaps
    }
}

/// Decode the favicon in `bytes[offset..offset + length]`
///
/// Returns `None` if the region is out of bounds, a recognized raster
/// payload fails to decode, or the ICO container is malformed.
pub fn decode_favicon<'b, B: ImageBackend + ?Sized>(
    bytes: Vec<u8>,
    offset: usize,
    length: usize,
    backend: &'b B,
    config: IcoDecoderConfig,
) -> Option<DecodeResult<'b, B>> {
    if is_recognized_container(&bytes, offset) {
        let end = offset.checked_add(length).filter(|&end| end <= bytes.len())?;
        let image = match backend.decode(&bytes[offset..end]) {
            Ok(image) => image,
            Err(err) => {
                tracing::debug!("Favicon payload failed to decode: {}", err);
                return None;
            }
        };
        return Some(DecodeResult::new(
            bytes.into(),
            offset,
            length,
            false,
            FaviconBitmaps::Single(Some(image)),
        ));
    }

    IconContainerDecoder::with_region(bytes, offset, length)
        .with_config(config)
        .decode(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::DefaultImageBackend;
    use crate::Color;

    fn png_bytes(size: u32) -> Vec<u8> {
        let pixels = [0u8, 128, 0, 255].repeat((size * size) as usize);
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, size, size);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&pixels).unwrap();
        }
        out
    }

    #[test]
    fn test_plain_png_decodes_directly() {
        let png = png_bytes(24);
        let len = png.len();
        let mut result =
            decode_favicon(png.clone(), 0, len, &DefaultImageBackend, IcoDecoderConfig::default())
                .unwrap();

        assert!(!result.is_ico());
        assert_eq!(result.bytes_for_storage(), &png[..]);
        let images: Vec<_> = result.bitmaps().collect();
        assert_eq!(images.len(), 1);
        let image = images[0].as_ref().unwrap();
        assert_eq!(image.width(), 24);
        assert_eq!(image.get_pixel(1, 1), Some(Color::rgb(0, 128, 0)));
    }

    #[test]
    fn test_png_inside_larger_buffer() {
        let png = png_bytes(8);
        let len = png.len();
        let mut buffer = vec![0u8; 5];
        buffer.extend_from_slice(&png);

        let result =
            decode_favicon(buffer, 5, len, &DefaultImageBackend, IcoDecoderConfig::default())
                .unwrap();
        assert_eq!(result.offset(), 5);
        assert_eq!(result.bytes_for_storage(), &png[..]);
    }

    #[test]
    fn test_corrupt_png_is_none() {
        let mut png = png_bytes(8);
        png.truncate(16);
        let len = png.len();
        assert!(decode_favicon(png, 0, len, &DefaultImageBackend, IcoDecoderConfig::default())
            .is_none());
    }

    #[test]
    fn test_unknown_payload_goes_through_ico() {
        let junk = b"<html>not a favicon</html>".to_vec();
        let len = junk.len();
        assert!(decode_favicon(junk, 0, len, &DefaultImageBackend, IcoDecoderConfig::default())
            .is_none());
    }

    #[test]
    fn test_region_past_end_is_none() {
        let png = png_bytes(8);
        let len = png.len();
        assert!(decode_favicon(png, 0, len + 1, &DefaultImageBackend, IcoDecoderConfig::default())
            .is_none());
    }
}
