//! Raw bitmap format sniffing
//!
//! Decides whether a favicon payload can go straight to the raster decoder
//! or has to be unpacked as an ICO container first.

/// Formats recognized by magic number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Gif,
    Jpeg,
    Bmp,
    WebP,
    Ico,
    Unknown,
}

/// One magic-number fragment: bytes expected at a position past the start
struct MagicPart {
    at: usize,
    bytes: &'static [u8],
}

struct Magic {
    format: ImageFormat,
    parts: &'static [MagicPart],
}

pub(crate) const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Containers the raster decoder accepts directly
const RECOGNIZED: &[Magic] = &[
    Magic { format: ImageFormat::Png, parts: &[MagicPart { at: 0, bytes: PNG_SIGNATURE }] },
    Magic { format: ImageFormat::Gif, parts: &[MagicPart { at: 0, bytes: b"GIF8" }] },
    Magic { format: ImageFormat::Jpeg, parts: &[MagicPart { at: 0, bytes: &[0xFF, 0xD8, 0xFF] }] },
    Magic { format: ImageFormat::Bmp, parts: &[MagicPart { at: 0, bytes: b"BM" }] },
    // RIFF....WEBP
    Magic {
        format: ImageFormat::WebP,
        parts: &[MagicPart { at: 0, bytes: b"RIFF" }, MagicPart { at: 8, bytes: b"WEBP" }],
    },
];

impl Magic {
    fn matches(&self, buffer: &[u8], offset: usize) -> bool {
        self.parts.iter().all(|part| {
            offset
                .checked_add(part.at)
                .is_some_and(|start| buffer_starts_with(buffer, part.bytes, start))
        })
    }
}

impl ImageFormat {
    /// Detect format from magic bytes at the start of `data`
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::at_offset(data, 0)
    }

    /// Detect format from magic bytes starting at `offset`
    pub fn at_offset(data: &[u8], offset: usize) -> Self {
        if let Some(magic) = RECOGNIZED.iter().find(|m| m.matches(data, offset)) {
            return magic.format;
        }
        match data.get(offset..) {
            Some(rest) if super::ico::is_ico(rest) => Self::Ico,
            _ => Self::Unknown,
        }
    }

    /// Whether the raster decoder takes this format without unpacking
    pub fn is_recognized_container(self) -> bool {
        !matches!(self, Self::Ico | Self::Unknown)
    }
}

/// Bounds-checked prefix match of `pattern` against `buffer[offset..]`
pub fn buffer_starts_with(buffer: &[u8], pattern: &[u8], offset: usize) -> bool {
    match offset.checked_add(pattern.len()) {
        Some(end) if end <= buffer.len() => &buffer[offset..end] == pattern,
        _ => false,
    }
}

/// True if `buffer` at `offset` starts a PNG, GIF, JPEG, BMP or WEBP payload
pub fn is_recognized_container(buffer: &[u8], offset: usize) -> bool {
    RECOGNIZED.iter().any(|m| m.matches(buffer, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection_png() {
        assert_eq!(ImageFormat::from_bytes(PNG_SIGNATURE), ImageFormat::Png);
        assert!(is_recognized_container(PNG_SIGNATURE, 0));
    }

    #[test]
    fn test_format_detection_jpeg() {
        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        assert_eq!(ImageFormat::from_bytes(&jpeg_header), ImageFormat::Jpeg);
    }

    #[test]
    fn test_format_detection_webp() {
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0x24, 0, 0, 0]);
        webp.extend_from_slice(b"WEBPVP8 ");
        assert_eq!(ImageFormat::from_bytes(&webp), ImageFormat::WebP);

        // RIFF without WEBP is some other RIFF container
        let wav = b"RIFF\0\0\0\0WAVE";
        assert_eq!(ImageFormat::from_bytes(wav), ImageFormat::Unknown);
    }

    #[test]
    fn test_format_detection_at_offset() {
        let mut data = vec![0xAA; 3];
        data.extend_from_slice(b"GIF89a");
        assert!(!is_recognized_container(&data, 0));
        assert!(is_recognized_container(&data, 3));
        assert_eq!(ImageFormat::at_offset(&data, 3), ImageFormat::Gif);
    }

    #[test]
    fn test_ico_is_not_directly_decodable() {
        let ico_header = [0, 0, 1, 0, 1, 0];
        assert_eq!(ImageFormat::from_bytes(&ico_header), ImageFormat::Ico);
        assert!(!ImageFormat::Ico.is_recognized_container());
        assert!(!is_recognized_container(&ico_header, 0));
    }

    #[test]
    fn test_buffer_starts_with_bounds() {
        assert!(buffer_starts_with(b"BMxx", b"BM", 0));
        assert!(!buffer_starts_with(b"xB", b"BM", 1));
        assert!(!buffer_starts_with(b"BM", b"BM", 1));
        assert!(!buffer_starts_with(b"BM", b"BM", usize::MAX));
        assert!(buffer_starts_with(b"", b"", 0));
    }
}
