//! Image preprocessing variants for the local OCR engine.
//!
//! Question images are small formula renders with low contrast. The local
//! engine is tried against up to three progressively harsher variants:
//!
//! - `Mild`: contrast ×1.3, sharpness ×1.2
//! - `Strong`: contrast ×1.8, sharpness ×1.5, 3×3 median denoise
//! - `Binarize`: grayscale, contrast ×2.0, threshold at 180
//!
//! Enhancement factors follow the usual "blend with a degenerate image"
//! definition: 1.0 leaves the image unchanged, larger values push pixels away
//! from the degenerate (mean-gray or smoothed) image.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;

/// Images smaller than this on either side are upscaled.
const MIN_DIMENSION: u32 = 100;

/// Images larger than this on either side are downscaled.
const MAX_DIMENSION: u32 = 2000;

/// Gray level above which a binarized pixel becomes white.
const BINARIZE_THRESHOLD: u8 = 180;

/// Smoothing kernel used as the degenerate image for sharpness enhancement.
const SMOOTH_KERNEL: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

/// One preprocessing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Mild,
    Strong,
    Binarize,
}

impl Variant {
    /// Variants in the order they are attempted.
    pub const ALL: [Variant; 3] = [Variant::Mild, Variant::Strong, Variant::Binarize];
}

/// Apply `variant` and return PNG bytes.
///
/// Undecodable input is passed through unchanged so the engine can still try
/// the original bytes.
pub fn prepare(bytes: &[u8], variant: Variant) -> Vec<u8> {
    match try_prepare(bytes, variant) {
        Ok(png) => png,
        Err(e) => {
            tracing::debug!("Image preprocessing failed ({variant:?}): {e}");
            bytes.to_vec()
        }
    }
}

fn try_prepare(bytes: &[u8], variant: Variant) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = fit_dimensions(flatten_on_white(&decoded));

    let output = match variant {
        Variant::Mild => sharpness(&contrast(&rgb, 1.3), 1.2),
        Variant::Strong => median3x3(&sharpness(&contrast(&rgb, 1.8), 1.5)),
        Variant::Binarize => {
            let gray = contrast_gray(&imageops::grayscale(&rgb), 2.0);
            let bw: GrayImage = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
                let Luma([v]) = *gray.get_pixel(x, y);
                Luma([if v > BINARIZE_THRESHOLD { 255 } else { 0 }])
            });
            DynamicImage::ImageLuma8(bw).to_rgb8()
        }
    };

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(output).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Convert to RGB, compositing any transparency onto a white background.
fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    ImageBuffer::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let alpha = p[3] as f32 / 255.0;
        let mix = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        Rgb([mix(p[0]), mix(p[1]), mix(p[2])])
    })
}

/// Upscale tiny images and downscale huge ones, preserving aspect ratio.
fn fit_dimensions(image: RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image;
    }

    let mut scale = 1.0_f32;
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        scale = (MIN_DIMENSION as f32 / width as f32)
            .max(MIN_DIMENSION as f32 / height as f32)
            .max(2.0);
    }
    let (scaled_w, scaled_h) = (width as f32 * scale, height as f32 * scale);
    if scaled_w > MAX_DIMENSION as f32 || scaled_h > MAX_DIMENSION as f32 {
        scale *= (MAX_DIMENSION as f32 / scaled_w).min(MAX_DIMENSION as f32 / scaled_h);
    }

    if (scale - 1.0).abs() < f32::EPSILON {
        return image;
    }
    let new_w = ((width as f32 * scale) as u32).max(1);
    let new_h = ((height as f32 * scale) as u32).max(1);
    imageops::resize(&image, new_w, new_h, FilterType::Lanczos3)
}

/// `degenerate + factor * (image - degenerate)`, per channel, clamped.
fn blend(degenerate: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let d = degenerate.get_pixel(x, y).0;
        let s = image.get_pixel(x, y).0;
        let mix = |i: usize| {
            (d[i] as f32 + factor * (s[i] as f32 - d[i] as f32))
                .round()
                .clamp(0.0, 255.0) as u8
        };
        Rgb([mix(0), mix(1), mix(2)])
    })
}

fn mean_luma(image: &RgbImage) -> u8 {
    let gray = imageops::grayscale(image);
    mean_gray(&gray)
}

fn mean_gray(image: &GrayImage) -> u8 {
    let count = (image.width() as u64 * image.height() as u64).max(1);
    let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
    ((sum as f64 / count as f64) + 0.5) as u8
}

fn contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let m = mean_luma(image);
    let degenerate = RgbImage::from_pixel(image.width(), image.height(), Rgb([m, m, m]));
    blend(&degenerate, image, factor)
}

fn contrast_gray(image: &GrayImage, factor: f32) -> GrayImage {
    let m = mean_gray(image) as f32;
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0] as f32;
        Luma([(m + factor * (v - m)).round().clamp(0.0, 255.0) as u8])
    })
}

fn sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    let smoothed = map_neighborhood(image, |window| {
        let weighted: f32 = window
            .iter()
            .zip(SMOOTH_KERNEL.iter())
            .map(|(&v, &k)| v as f32 * k)
            .sum();
        (weighted / SMOOTH_KERNEL.iter().sum::<f32>()).round() as u8
    });
    blend(&smoothed, image, factor)
}

/// 3×3 median filter per channel.
fn median3x3(image: &RgbImage) -> RgbImage {
    map_neighborhood(image, |mut window| {
        window.sort_unstable();
        window[4]
    })
}

/// Reduce each channel's 3×3 neighborhood (row-major, edges clamped) to one value.
fn map_neighborhood<F>(image: &RgbImage, reduce: F) -> RgbImage
where
    F: Fn([u8; 9]) -> u8,
{
    let (width, height) = image.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let mut out = [0u8; 3];
        for (c, slot) in out.iter_mut().enumerate() {
            let mut window = [0u8; 9];
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                    let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                    window[n] = image.get_pixel(nx, ny).0[c];
                    n += 1;
                }
            }
            *slot = reduce(window);
        }
        Rgb(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_small_image_is_upscaled() {
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            40,
            20,
            Rgb([200, 200, 200]),
        )));
        let out = image::load_from_memory(&prepare(&bytes, Variant::Mild)).unwrap();
        // max(100/40, 100/20, 2.0) = 5.0
        assert_eq!((out.width(), out.height()), (200, 100));
    }

    #[test]
    fn test_large_image_is_downscaled() {
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(4000, 1000)));
        let out = image::load_from_memory(&prepare(&bytes, Variant::Mild)).unwrap();
        assert_eq!((out.width(), out.height()), (2000, 500));
    }

    #[test]
    fn test_binarize_outputs_only_black_and_white() {
        let img = RgbImage::from_fn(120, 120, |x, _| {
            let v = (x * 2) as u8;
            Rgb([v, v, v])
        });
        let out = image::load_from_memory(&prepare(
            &png_bytes(DynamicImage::ImageRgb8(img)),
            Variant::Binarize,
        ))
        .unwrap()
        .to_rgb8();
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0] || p.0 == [255, 255, 255]));
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let rgba = image::RgbaImage::from_pixel(120, 120, image::Rgba([0, 0, 0, 0]));
        let out = image::load_from_memory(&prepare(
            &png_bytes(DynamicImage::ImageRgba8(rgba)),
            Variant::Mild,
        ))
        .unwrap()
        .to_rgb8();
        assert_eq!(out.get_pixel(60, 60).0, [255, 255, 255]);
    }

    #[test]
    fn test_median_removes_isolated_speck() {
        let mut img = RgbImage::from_pixel(5, 5, Rgb([255, 255, 255]));
        img.put_pixel(2, 2, Rgb([0, 0, 0]));
        let out = median3x3(&img);
        assert_eq!(out.get_pixel(2, 2).0, [255, 255, 255]);
    }

    #[test]
    fn test_contrast_factor_one_is_identity() {
        let img = RgbImage::from_fn(10, 10, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 90]));
        assert_eq!(contrast(&img, 1.0), img);
    }

    #[test]
    fn test_undecodable_bytes_pass_through() {
        let raw = b"not an image".to_vec();
        assert_eq!(prepare(&raw, Variant::Strong), raw);
    }
}
