//! Raster payloads and the decode/scale backend
//!
//! The cache never touches pixels itself: decoding, resampling and the
//! dominant-colour computation go through [`ImageBackend`]. The default
//! backend uses the image crate.

use crate::Color;
use image::{imageops::FilterType, DynamicImage, RgbaImage};

/// A decoded RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl RasterImage {
    /// Create from raw RGBA data
    pub fn from_rgba(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, ImageError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or(ImageError::InvalidDimensions { width, height })?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(ImageError::InvalidDimensions { width, height });
        }
        Ok(Self { pixels, width, height })
    }

    /// Image filled with one color
    pub fn solid(width: u32, height: u32, color: Color) -> Result<Self, ImageError> {
        let count = (width as usize).saturating_mul(height as usize);
        let pixels = [color.r, color.g, color.b, color.a].repeat(count);
        Self::from_rgba(pixels, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory size in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.pixels.get(idx..idx + 4)?;
        Some(Color::rgba(px[0], px[1], px[2], px[3]))
    }

    fn from_dynamic(img: DynamicImage) -> Result<Self, ImageError> {
        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(rgba.into_raw(), width, height)
    }

    fn to_rgba_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// Image decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Raster capability consumed by the cache and the ICO decoder
pub trait ImageBackend: Send + Sync {
    /// Decode an encoded image (PNG, JPEG, GIF, WEBP, BMP or single-image ICO)
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, ImageError>;

    /// Resample to exactly `width` x `height`
    fn scale(&self, image: &RasterImage, width: u32, height: u32) -> RasterImage;

    /// Representative colour of the image
    fn dominant_color(&self, image: &RasterImage) -> Color;
}

impl<B: ImageBackend + ?Sized> ImageBackend for &B {
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, ImageError> {
        (**self).decode(bytes)
    }

    fn scale(&self, image: &RasterImage, width: u32, height: u32) -> RasterImage {
        (**self).scale(image, width, height)
    }

    fn dominant_color(&self, image: &RasterImage) -> Color {
        (**self).dominant_color(image)
    }
}

/// Backend built on the image crate
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultImageBackend;

/// Hue histogram resolution for dominant colour
const HUE_BINS: usize = 36;

/// Pixels below this saturation or value do not vote for a hue
const HSV_THRESHOLD: f32 = 0.35;

#[derive(Debug, Default, Clone, Copy)]
struct HueBin {
    count: u64,
    r: u64,
    g: u64,
    b: u64,
}

impl HueBin {
    fn add(&mut self, px: &[u8]) {
        self.count += 1;
        self.r += px[0] as u64;
        self.g += px[1] as u64;
        self.b += px[2] as u64;
    }

    fn average(&self) -> Option<Color> {
        if self.count == 0 {
            return None;
        }
        Some(Color::rgb(
            (self.r / self.count) as u8,
            (self.g / self.count) as u8,
            (self.b / self.count) as u8,
        ))
    }
}

/// Hue in degrees, saturation and value in [0, 1]
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

impl ImageBackend for DefaultImageBackend {
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, ImageError> {
        let format = image::guess_format(bytes).map_err(|_| ImageError::UnsupportedFormat)?;
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
        RasterImage::from_dynamic(img)
    }

    fn scale(&self, image: &RasterImage, width: u32, height: u32) -> RasterImage {
        let (width, height) = (width.max(1), height.max(1));
        if image.width == width && image.height == height {
            return image.clone();
        }
        let resized = match image.to_rgba_image() {
            Some(src) => image::imageops::resize(&src, width, height, FilterType::Triangle),
            None => RgbaImage::new(width, height),
        };
        RasterImage { pixels: resized.into_raw(), width, height }
    }

    fn dominant_color(&self, image: &RasterImage) -> Color {
        let mut bins = [HueBin::default(); HUE_BINS];
        let mut opaque = HueBin::default();

        for px in image.pixels.chunks_exact(4) {
            if px[3] < 128 {
                continue;
            }
            opaque.add(px);
            let (hue, saturation, value) = rgb_to_hsv(px[0], px[1], px[2]);
            if saturation <= HSV_THRESHOLD || value <= HSV_THRESHOLD {
                continue;
            }
            let bin = ((hue / 10.0) as usize).min(HUE_BINS - 1);
            bins[bin].add(px);
        }

        bins.iter()
            .max_by_key(|bin| bin.count)
            .and_then(HueBin::average)
            .or_else(|| opaque.average())
            .unwrap_or(Color::WHITE)
    }
}
