//! Image normalization: make listing photos easier for a VLM to read.
//!
//! Listing screenshots are often small, low-contrast JPEGs with compression
//! noise around the text. The normalizer applies a fixed sequence of local
//! transforms before recognition:
//!
//! 1. decode and convert to 8-bit RGB
//! 2. upscale (Lanczos3) until the shorter side reaches `min_short_side`
//! 3. contrast boost ×1.5 around the mean luminance
//! 4. sharpness boost ×2.0 against a 3×3 smoothed copy
//! 5. 3×3 median denoise
//! 6. re-encode as JPEG quality 95
//!
//! ## Fail-open
//!
//! [`normalize`] never fails. Any decode or encode error is logged and the
//! original bytes are returned unchanged; a photo the normalizer cannot handle
//! may still be perfectly readable by the model.
//!
//! Everything here is CPU-bound and synchronous. The orchestrator runs it
//! inside `spawn_blocking`.

use crate::config::ExtractionConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageResult, Rgb, RgbImage};
use imageproc::filter::median_filter;
use std::borrow::Cow;
use tracing::{debug, warn};

pub const CONTRAST_FACTOR: f32 = 1.5;
pub const SHARPNESS_FACTOR: f32 = 2.0;
pub const JPEG_QUALITY: u8 = 95;

/// Bounding box and quality for oversize recompression.
const OVERSIZE_BOX: (u32, u32) = (1920, 1440);
const OVERSIZE_QUALITY: u8 = 85;

/// Centre weight of the 3×3 smoothing kernel; the eight neighbours weigh 1.
const SMOOTH_CENTRE_WEIGHT: u32 = 5;
const SMOOTH_DIVISOR: u32 = 13;

/// Tunables for [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    pub min_short_side: u32,
    pub max_upscaled_side: u32,
    pub contrast: f32,
    pub sharpness: f32,
    pub denoise_radius: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            min_short_side: 1200,
            max_upscaled_side: 4096,
            contrast: CONTRAST_FACTOR,
            sharpness: SHARPNESS_FACTOR,
            denoise_radius: 1,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

impl From<&ExtractionConfig> for NormalizeOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            min_short_side: config.min_short_side,
            max_upscaled_side: config.max_upscaled_side,
            ..Self::default()
        }
    }
}

/// Normalize raw image bytes into a recognition-friendly JPEG.
///
/// Returns the input unchanged if any step fails.
pub fn normalize(raw: &[u8], opts: &NormalizeOptions) -> Vec<u8> {
    match try_normalize(raw, opts) {
        Ok(out) => out,
        Err(e) => {
            warn!("Image normalization failed, sending original bytes: {}", e);
            raw.to_vec()
        }
    }
}

/// Fallible core of [`normalize`].
pub fn try_normalize(raw: &[u8], opts: &NormalizeOptions) -> ImageResult<Vec<u8>> {
    let rgb = image::load_from_memory(raw)?.to_rgb8();
    let (w, h) = rgb.dimensions();

    let rgb = upscale_if_small(rgb, opts.min_short_side, opts.max_upscaled_side);
    let rgb = enhance_contrast(rgb, opts.contrast);
    let rgb = enhance_sharpness(rgb, opts.sharpness);
    let rgb = if opts.denoise_radius > 0 {
        median_filter(&rgb, opts.denoise_radius, opts.denoise_radius)
    } else {
        rgb
    };

    let out = encode_jpeg(&rgb, opts.jpeg_quality)?;
    debug!(
        "Normalized {}x{} → {}x{} ({} → {} bytes)",
        w,
        h,
        rgb.width(),
        rgb.height(),
        raw.len(),
        out.len()
    );
    Ok(out)
}

/// Shrink and recompress images above `max_bytes` so the request stays within
/// provider payload limits. Fail-open like [`normalize`].
pub fn compress_oversized(raw: &[u8], max_bytes: usize) -> Cow<'_, [u8]> {
    if raw.len() <= max_bytes {
        return Cow::Borrowed(raw);
    }
    let attempt = || -> ImageResult<Vec<u8>> {
        let img = image::load_from_memory(raw)?;
        let (bw, bh) = OVERSIZE_BOX;
        let img = if img.width() > bw || img.height() > bh {
            img.thumbnail(bw, bh)
        } else {
            img
        };
        encode_jpeg(&img.to_rgb8(), OVERSIZE_QUALITY)
    };
    match attempt() {
        Ok(out) => {
            debug!("Compressed oversized image {} → {} bytes", raw.len(), out.len());
            Cow::Owned(out)
        }
        Err(e) => {
            warn!("Oversized image could not be recompressed: {}", e);
            Cow::Borrowed(raw)
        }
    }
}

/// Upscale so the shorter side reaches `min_short_side`, capping the longer
/// side at `max_side`. Never shrinks.
pub fn upscale_if_small(rgb: RgbImage, min_short_side: u32, max_side: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let short = w.min(h);
    let long = w.max(h);
    if short == 0 || short >= min_short_side {
        return rgb;
    }

    let scale = (min_short_side as f64 / short as f64).min(max_side as f64 / long as f64);
    if scale <= 1.0 {
        return rgb;
    }

    let nw = ((w as f64 * scale).round() as u32).max(w);
    let nh = ((h as f64 * scale).round() as u32).max(h);
    imageops::resize(&rgb, nw, nh, FilterType::Lanczos3)
}

/// Stretch every channel away from the image's mean luminance.
pub fn enhance_contrast(mut rgb: RgbImage, factor: f32) -> RgbImage {
    let n = (rgb.width() as u64 * rgb.height() as u64).max(1);
    let luma_sum: u64 = rgb
        .pixels()
        .map(|p| (p[0] as u64 * 299 + p[1] as u64 * 587 + p[2] as u64 * 114) / 1000)
        .sum();
    let mean = (luma_sum as f32 / n as f32).round();

    for p in rgb.pixels_mut() {
        for c in 0..3 {
            p[c] = clamp_u8(mean + factor * (p[c] as f32 - mean));
        }
    }
    rgb
}

/// Push every pixel away from a smoothed copy of the image.
pub fn enhance_sharpness(mut rgb: RgbImage, factor: f32) -> RgbImage {
    let smooth = smooth3x3(&rgb);
    for (p, s) in rgb.pixels_mut().zip(smooth.pixels()) {
        for c in 0..3 {
            let base = s[c] as f32;
            p[c] = clamp_u8(base + factor * (p[c] as f32 - base));
        }
    }
    rgb
}

/// 3×3 weighted mean; the one-pixel border is copied unchanged.
fn smooth3x3(rgb: &RgbImage) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let mut out = rgb.clone();
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0u32; 3];
            for dy in 0..3 {
                for dx in 0..3 {
                    let weight = if dx == 1 && dy == 1 { SMOOTH_CENTRE_WEIGHT } else { 1 };
                    let p = rgb.get_pixel(x + dx - 1, y + dy - 1);
                    for c in 0..3 {
                        acc[c] += weight * p[c] as u32;
                    }
                }
            }
            let half = SMOOTH_DIVISOR / 2;
            out.put_pixel(
                x,
                y,
                Rgb([
                    ((acc[0] + half) / SMOOTH_DIVISOR) as u8,
                    ((acc[1] + half) / SMOOTH_DIVISOR) as u8,
                    ((acc[2] + half) / SMOOTH_DIVISOR) as u8,
                ]),
            );
        }
    }
    out
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    fn small_opts() -> NormalizeOptions {
        NormalizeOptions {
            min_short_side: 120,
            max_upscaled_side: 1000,
            ..NormalizeOptions::default()
        }
    }

    #[test]
    fn garbage_input_is_returned_unchanged() {
        let raw = b"definitely not an image".to_vec();
        assert_eq!(normalize(&raw, &NormalizeOptions::default()), raw);
    }

    #[test]
    fn output_is_jpeg() {
        let raw = png_bytes(DynamicImage::ImageRgb8(gradient(40, 30)));
        let out = normalize(&raw, &small_opts());
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn small_image_upscaled_on_shorter_side() {
        let raw = png_bytes(DynamicImage::ImageRgb8(gradient(600, 400)));
        let out = normalize(&raw, &NormalizeOptions::default());
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (1800, 1200));
    }

    #[test]
    fn grayscale_input_becomes_three_channel() {
        let gray = GrayImage::from_pixel(50, 50, Luma([90]));
        let out = normalize(&png_bytes(DynamicImage::ImageLuma8(gray)), &small_opts());
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn large_image_is_never_resized_and_renormalizing_is_stable() {
        let raw = png_bytes(DynamicImage::ImageRgb8(gradient(300, 200)));
        let once = normalize(&raw, &small_opts());
        let twice = normalize(&once, &small_opts());
        let a = image::load_from_memory(&once).unwrap();
        let b = image::load_from_memory(&twice).unwrap();
        assert_eq!((a.width(), a.height()), (300, 200));
        assert_eq!((b.width(), b.height()), (300, 200));
    }

    #[test]
    fn upscale_respects_long_side_cap() {
        let img = upscale_if_small(gradient(50, 1000), 1200, 4096);
        assert_eq!(img.height(), 4096);
        assert_eq!(img.width(), 205);
    }

    #[test]
    fn upscale_never_shrinks_when_cap_is_below_long_side() {
        let img = upscale_if_small(gradient(100, 5000), 1200, 4096);
        assert_eq!(img.dimensions(), (100, 5000));
    }

    #[test]
    fn contrast_spreads_values_around_mean() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        img.put_pixel(1, 0, Rgb([150, 150, 150]));
        let out = enhance_contrast(img, CONTRAST_FACTOR);
        assert_eq!(out.get_pixel(0, 0)[0], 88);
        assert_eq!(out.get_pixel(1, 0)[0], 163);
    }

    #[test]
    fn sharpness_leaves_flat_regions_alone() {
        let img = RgbImage::from_pixel(8, 8, Rgb([77, 77, 77]));
        let out = enhance_sharpness(img.clone(), SHARPNESS_FACTOR);
        assert_eq!(out, img);
    }

    #[test]
    fn compress_oversized_fits_bounding_box() {
        let raw = png_bytes(DynamicImage::ImageRgb8(gradient(2400, 60)));
        let out = compress_oversized(&raw, 16);
        let img = image::load_from_memory(&out).unwrap();
        assert!(img.width() <= 1920 && img.height() <= 1440);
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn compress_oversized_passes_small_images_through() {
        let raw = png_bytes(DynamicImage::ImageRgb8(gradient(10, 10)));
        assert!(matches!(compress_oversized(&raw, usize::MAX), Cow::Borrowed(_)));
    }
}
