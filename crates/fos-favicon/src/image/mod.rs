//! Favicon image handling
//!
//! Raster payloads, format sniffing and the ICO container decoder.

mod decode;
mod ico;
mod raster;
mod sniff;

pub use decode::{decode_favicon, DecodeResult, FaviconBitmaps};
pub use ico::{
    is_ico, IcoBitmaps, IcoError, IconContainerDecoder, IconDirEntry, IconDirectory,
    ICO_DIRENTRY_LENGTH, ICO_HEADER_LENGTH,
};
pub use raster::{DefaultImageBackend, ImageBackend, ImageError, RasterImage};
pub use sniff::{buffer_starts_with, is_recognized_container, ImageFormat};
