use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, ImageResult, Rgb, RgbImage};

use crate::config::{BINARIZE_THRESHOLD, UPSCALE_FACTOR};

/// Second-tier preprocessing for low-confidence scans.
pub struct OcrPreProcess {
    pub upscale: f64,
    pub threshold: u8,
}

impl Default for OcrPreProcess {
    fn default() -> Self {
        Self {
            upscale: UPSCALE_FACTOR,
            threshold: BINARIZE_THRESHOLD,
        }
    }
}

impl OcrPreProcess {
    pub fn new(upscale: f64, threshold: u8) -> Self {
        Self { upscale, threshold }
    }

    /// Grayscale, upscale, auto-contrast, binarize. Returns the processed
    /// image and the factor its coordinates must be divided by.
    pub fn run(&self, img: &DynamicImage) -> (DynamicImage, f64) {
        let gray = img.to_luma8();
        let resized = self.resize(&gray);
        let mut enhanced = autocontrast(&resized);
        binarize(&mut enhanced, self.threshold);
        (DynamicImage::ImageLuma8(enhanced), self.upscale)
    }

    fn resize(&self, gray: &GrayImage) -> GrayImage {
        if self.upscale == 1.0 {
            return gray.clone();
        }
        let width = ((gray.width() as f64 * self.upscale) as u32).max(1);
        let height = ((gray.height() as f64 * self.upscale) as u32).max(1);
        imageops::resize(gray, width, height, FilterType::Lanczos3)
    }
}

/// Stretches the occupied intensity range to the full `0..=255` span.
pub fn autocontrast(img: &GrayImage) -> GrayImage {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let lo = histogram.iter().position(|&count| count > 0);
    let hi = histogram.iter().rposition(|&count| count > 0);
    let (lo, hi) = match (lo, hi) {
        (Some(lo), Some(hi)) if hi > lo => (lo as f64, hi as f64),
        _ => return img.clone(),
    };

    let lut: Vec<u8> = (0..256)
        .map(|ix| ((ix as f64 - lo) * 255.0 / (hi - lo)).clamp(0.0, 255.0) as u8)
        .collect();

    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
    out
}

/// Pixels strictly above `threshold` become white, everything else black.
pub fn binarize(img: &mut GrayImage, threshold: u8) {
    for pixel in img.pixels_mut() {
        pixel[0] = if pixel[0] > threshold { 255 } else { 0 };
    }
}

/// Decodes an image and applies its EXIF orientation.
pub fn load_oriented(path: &Path) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Scales `img` to fit the canvas, keeping its aspect ratio, and centers it on white.
pub fn fit_to_canvas(img: &DynamicImage, target_width: u32, target_height: u32) -> RgbImage {
    let white = Rgb([255u8, 255, 255]);
    let mut canvas = RgbImage::from_pixel(target_width, target_height, white);

    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return canvas;
    }

    let mut scale = (target_width as f64 / width as f64).min(target_height as f64 / height as f64);
    if scale <= 0.0 {
        scale = 1.0;
    }
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);

    let resized = if (new_width, new_height) != (width, height) {
        imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3)
    } else {
        rgb
    };

    let x = target_width.saturating_sub(resized.width()) / 2;
    let y = target_height.saturating_sub(resized.height()) / 2;
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
    canvas
}
