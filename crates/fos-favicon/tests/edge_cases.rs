//! Edge case tests for fos-favicon
//!
//! Exercises the public API end to end: raw bytes through the decoder into
//! the cache, budget pressure, failure memos and concurrent access.

use fos_favicon::*;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn png_bytes(size: u32, color: Color) -> Vec<u8> {
    let pixels = [color.r, color.g, color.b, color.a].repeat((size * size) as usize);
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

/// ICO container from `(width, bpp, payload)` triples
fn ico_bytes(entries: &[(u8, u16, Vec<u8>)]) -> Vec<u8> {
    let mut buf = vec![0, 0, 1, 0];
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    let mut payload_at = ICO_HEADER_LENGTH + entries.len() * ICO_DIRENTRY_LENGTH;
    for (width, bpp, payload) in entries {
        buf.extend_from_slice(&[*width, *width, 0, 0]);
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&bpp.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(payload_at as u32).to_le_bytes());
        payload_at += payload.len();
    }
    for (_, _, payload) in entries {
        buf.extend_from_slice(payload);
    }
    buf
}

fn solid(size: u32) -> RasterImage {
    RasterImage::solid(size, size, Color::rgb(30, 160, 30)).unwrap()
}

// ============================================================================
// SNIFFING EDGE CASES
// ============================================================================

#[test]
fn test_sniff_known_formats() {
    assert_eq!(ImageFormat::from_bytes(&png_bytes(1, Color::BLACK)), ImageFormat::Png);
    assert_eq!(ImageFormat::from_bytes(b"GIF89a...."), ImageFormat::Gif);
    assert_eq!(ImageFormat::from_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
    assert_eq!(ImageFormat::from_bytes(b"BM\0\0"), ImageFormat::Bmp);
    assert_eq!(ImageFormat::from_bytes(b"RIFF\0\0\0\0WEBPVP8 "), ImageFormat::WebP);
}

#[test]
fn test_sniff_short_and_offset_buffers() {
    assert!(!is_recognized_container(&[], 0));
    assert!(!is_recognized_container(b"GIF", 0));
    assert!(!is_recognized_container(b"RIFF\0\0\0\0WEB", 0));
    assert!(!is_recognized_container(b"BM", 5));
    assert!(is_recognized_container(b"xxBMyy", 2));
    assert!(!buffer_starts_with(b"abc", b"bc", usize::MAX));
}

#[test]
fn test_ico_is_not_a_recognized_container() {
    let ico = ico_bytes(&[(16, 32, png_bytes(16, Color::BLACK))]);
    assert!(!is_recognized_container(&ico, 0));
    assert!(is_ico(&ico));
}

// ============================================================================
// ICO EDGE CASES
// ============================================================================

#[test]
fn test_ico_prunes_to_one_entry_per_width() {
    let ico = ico_bytes(&[
        (16, 32, vec![1; 20]),
        (32, 4, vec![2; 20]),
        (32, 24, vec![3; 20]),
        (48, 32, vec![4; 20]),
    ]);
    let mut decoder = IconContainerDecoder::new(ico);
    let directory = decoder.decode_directory().unwrap();

    let widths: Vec<u32> = directory.entries().iter().map(|e| e.width).collect();
    assert_eq!(widths, vec![16, 32, 48]);
    assert_eq!(directory.entries()[1].bits_per_pixel, 24);
}

#[test]
fn test_ico_count_larger_than_directory() {
    let mut ico = ico_bytes(&[(16, 32, vec![1; 8]), (32, 32, vec![2; 8])]);
    ico[4] = 5;
    ico.truncate(ICO_HEADER_LENGTH + 2 * ICO_DIRENTRY_LENGTH);

    let mut decoder = IconContainerDecoder::new(ico);
    assert!(matches!(decoder.decode_directory(), Err(IcoError::TruncatedDirectory { count: 5, .. })));
    assert!(!decoder.is_valid());
    assert!(decoder.iterator(&DefaultImageBackend).is_none());
}

#[test]
fn test_ico_garbage_never_panics() {
    let mut seed = 0x2545_f491_u32;
    for len in 0..64 {
        let mut bytes = vec![0, 0, 1, 0];
        for _ in 0..len {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            bytes.push(seed as u8);
        }
        let total = bytes.len();
        let _ = decode_favicon(bytes, 0, total, &DefaultImageBackend, IcoDecoderConfig::default());
    }
}

#[test]
fn test_ico_corrupt_entry_is_local() {
    let ico = ico_bytes(&[
        (16, 32, png_bytes(16, Color::rgb(200, 0, 0))),
        (32, 32, vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0]),
    ]);
    let len = ico.len();
    let result =
        decode_favicon(ico, 0, len, &DefaultImageBackend, IcoDecoderConfig::default()).unwrap();
    assert!(result.is_ico());

    let images: Vec<Option<RasterImage>> = result.into_bitmaps().collect();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].as_ref().unwrap().width(), 16);
    assert!(images[1].is_none());
}

// ============================================================================
// DECODE TO CACHE PIPELINE
// ============================================================================

#[test]
fn test_ico_feeds_cache() {
    init_tracing();
    let ico = ico_bytes(&[
        (16, 32, png_bytes(16, Color::rgb(0, 0, 220))),
        (32, 32, png_bytes(32, Color::rgb(0, 0, 220))),
    ]);
    let len = ico.len();
    let result =
        decode_favicon(ico, 0, len, &DefaultImageBackend, IcoDecoderConfig::default()).unwrap();
    let stored = result.bytes_for_storage().to_vec();
    assert!(is_ico(&stored));

    let cache = FaviconCache::default();
    cache.put_favicons("http://site/favicon.ico", result.into_bitmaps(), false);

    let found = cache.get_favicon_for_dimensions("http://site/favicon.ico", 32).unwrap();
    assert!(found.is_exact());
    let found = cache.get_favicon_for_dimensions("http://site/favicon.ico", 24).unwrap();
    assert_eq!(found.size(), 24);
    assert_eq!(cache.get_dominant_color("http://site/favicon.ico"), Color::rgb(0, 0, 220));
}

#[test]
fn test_png_feeds_cache() {
    let png = png_bytes(16, Color::rgb(0, 128, 0));
    let len = png.len();
    let result =
        decode_favicon(png, 0, len, &DefaultImageBackend, IcoDecoderConfig::default()).unwrap();
    assert!(!result.is_ico());

    let cache = FaviconCache::default();
    cache.put_favicons("http://site/icon.png", result.into_bitmaps(), false);
    let found = cache.get_favicon_for_dimensions("http://site/icon.png", TargetSize::Largest).unwrap();
    assert_eq!(found.size(), 16);
}

// ============================================================================
// CACHE EDGE CASES
// ============================================================================

#[test]
fn test_zero_budget_keeps_nothing_evictable() {
    let cache = FaviconCache::new(FaviconCacheConfig::default().with_max_size_bytes(0));
    cache.put_single_favicon("a", solid(16));
    assert_eq!(cache.current_size_bytes(), 0);
    assert!(cache.get_favicon_for_dimensions("a", 16).is_none());

    cache.put_favicons("b", [solid(16)], true);
    assert!(cache.get_favicon_for_dimensions("b", 16).is_some());
}

#[test]
fn test_budget_is_never_exceeded() {
    let budget = 10 * 1024;
    let cache = FaviconCache::new(FaviconCacheConfig::default().with_max_size_bytes(budget));
    for i in 0..50u32 {
        let url = format!("http://site{}/icon", i % 7);
        cache.put_favicons(&url, [solid(8 + i % 5), solid(16)], false);
        cache.get_favicon_for_dimensions(&url, 10 + i % 20);
        assert!(cache.current_size_bytes() <= budget);
    }
    assert!(cache.stats().evictions > 0);
}

#[test]
fn test_failure_memo_expires() {
    let clock = Arc::new(ManualClock::new());
    let config = FaviconCacheConfig::default().with_failure_retry(Duration::from_secs(60));
    let cache = FaviconCache::new(config).with_clock(clock.clone());

    cache.put_failed("http://down/icon");
    assert!(cache.is_failed_favicon("http://down/icon"));
    clock.advance(Duration::from_secs(61));
    assert!(!cache.is_failed_favicon("http://down/icon"));
    assert!(cache.get_favicon_for_dimensions("http://down/icon", 16).is_none());
    assert!(!cache.is_failed_favicon("http://down/icon"));
}

#[test]
fn test_zero_target_size() {
    let cache = FaviconCache::default();
    cache.put_single_favicon("a", solid(16));
    assert!(cache.get_favicon_for_dimensions("a", 0).is_none());
    assert_eq!(cache.current_size_bytes(), 16 * 16 * 4);
}

#[test]
fn test_stats_hit_rate() {
    let cache = FaviconCache::default();
    cache.put_single_favicon("a", solid(16));
    cache.get_favicon_for_dimensions("a", 16);
    cache.get_favicon_for_dimensions("b", 16);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_access() {
    init_tracing();
    let budget = 64 * 1024;
    let cache = FaviconCache::new(FaviconCacheConfig::default().with_max_size_bytes(budget));
    cache.put_favicons("builtin", [solid(32)], true);

    std::thread::scope(|scope| {
        for worker in 0..4u32 {
            let cache = &cache;
            scope.spawn(move || {
                for i in 0..200u32 {
                    let url = format!("http://site{}/icon", (i + worker) % 10);
                    match i % 5 {
                        0 => cache.put_favicons(&url, [solid(16), solid(32)], false),
                        1 => {
                            cache.get_favicon_for_dimensions(&url, 8 + i % 40);
                        }
                        2 => {
                            cache.get_dominant_color(&url);
                        }
                        3 => {
                            cache.is_failed_favicon(&url);
                        }
                        _ => {
                            if i % 50 == 4 {
                                cache.evict_all();
                            } else {
                                cache.put_failed(&url);
                            }
                        }
                    }
                    assert!(cache.current_size_bytes() <= budget);
                    assert!(cache.get_favicon_for_dimensions("builtin", 32).is_some());
                }
            });
        }
    });

    let largest = cache.get_favicon_for_dimensions("builtin", TargetSize::Largest).unwrap();
    assert_eq!(largest.size(), 32);
}
