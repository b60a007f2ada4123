use std::io::Cursor;
use std::path::Path;

use chrono::Local;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use imageproc::contrast::{adaptive_threshold, otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::{close, open};
use log::{debug, info, warn};

use crate::models::CaptchaCandidateSet;
use crate::utils::ScraperError;

/// Anything smaller cannot be a real captcha image.
pub const MIN_IMAGE_BYTES: usize = 100;
/// OCR accuracy drops sharply below this size.
pub const MIN_WIDTH: u32 = 150;
pub const MIN_HEIGHT: u32 = 50;
pub const MIN_SCALE: f32 = 2.0;

// Pipeline 1: moderate contrast plus sharpening before Otsu
const BOOST_CONTRAST: f32 = 22.5;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;
// Pipeline 2: 11x11 neighbourhood
const ADAPTIVE_BLOCK_RADIUS: u32 = 5;
// Pipeline 3: stronger contrast, darker baseline, fixed cut
const ALT_CONTRAST: f32 = 45.0;
const ALT_BRIGHTNESS: i32 = -15;
const FIXED_THRESHOLD: u8 = 140;

/// ImageProcessor turns one raw captcha into several independently cleaned
/// bitmaps, each tuned for a different noise or contrast pattern.
pub struct ImageProcessor;

impl ImageProcessor {
    /// Produce the candidate set. An empty set means the image is unusable.
    pub fn preprocess(raw_bytes: &[u8]) -> CaptchaCandidateSet {
        match Self::try_preprocess(raw_bytes) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Captcha preprocessing failed: {}", e);
                Vec::new()
            }
        }
    }

    fn try_preprocess(raw_bytes: &[u8]) -> Result<CaptchaCandidateSet, ScraperError> {
        if raw_bytes.len() < MIN_IMAGE_BYTES {
            return Err(ScraperError::ImageProcessing(format!(
                "Captcha image too small ({} bytes)",
                raw_bytes.len()
            )));
        }

        let image = image::load_from_memory(raw_bytes)?;
        let rgb = Self::upscale(image.to_rgb8());

        // Pipeline 1: contrast + sharpness, grayscale, median denoise, Otsu
        let boosted = DynamicImage::ImageRgb8(rgb.clone())
            .adjust_contrast(BOOST_CONTRAST)
            .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD);
        let denoised = median_filter(&boosted.to_luma8(), 1, 1);
        let otsu = threshold(&denoised, otsu_level(&denoised));

        // Pipeline 2: same denoise, locally thresholded for uneven lighting
        let adaptive = adaptive_threshold(&denoised, ADAPTIVE_BLOCK_RADIUS);

        // Pipeline 3: different tone baseline, fixed threshold
        let toned = DynamicImage::ImageRgb8(rgb)
            .adjust_contrast(ALT_CONTRAST)
            .brighten(ALT_BRIGHTNESS)
            .to_luma8();
        let fixed = threshold(&toned, FIXED_THRESHOLD);

        // Pipeline 4: close small stroke gaps, then drop speckle
        let morphed = open(&close(&otsu, Norm::LInf, 1), Norm::LInf, 1);

        // Pipeline 5: inverted polarity of pipeline 1
        let mut inverted = otsu.clone();
        imageops::invert(&mut inverted);

        debug!(
            "Captcha candidates built at {}x{}",
            otsu.width(),
            otsu.height()
        );
        Ok(vec![otsu, adaptive, fixed, morphed, inverted])
    }

    /// Resize with Lanczos so both axes reach the OCR floor.
    fn upscale(image: RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let Some(scale) = Self::scale_factor(width, height) else {
            return image;
        };

        let new_width = (width as f32 * scale).round() as u32;
        let new_height = (height as f32 * scale).round() as u32;
        info!(
            "Resized captcha from {}x{} to {}x{}",
            width, height, new_width, new_height
        );
        imageops::resize(&image, new_width, new_height, FilterType::Lanczos3)
    }

    /// `None` when the image already meets the size floor.
    pub fn scale_factor(width: u32, height: u32) -> Option<f32> {
        if width == 0 || height == 0 {
            return None;
        }
        if width >= MIN_WIDTH && height >= MIN_HEIGHT {
            return None;
        }
        let by_width = MIN_WIDTH as f32 / width as f32;
        let by_height = MIN_HEIGHT as f32 / height as f32;
        Some(by_width.max(by_height).max(MIN_SCALE))
    }

    /// Write the raw captcha and every candidate to `dir` as PNG for offline review.
    pub fn save_debug_images(
        dir: &Path,
        raw_bytes: &[u8],
        candidates: &[GrayImage],
    ) -> Result<(), ScraperError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| ScraperError::ImageProcessing(format!("Failed to create debug dir: {}", e)))?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S%3f");

        image::load_from_memory(raw_bytes)?.save(dir.join(format!("captcha_{}_raw.png", stamp)))?;
        for (index, candidate) in candidates.iter().enumerate() {
            candidate.save(dir.join(format!("captcha_{}_p{}.png", stamp, index + 1)))?;
        }
        info!("Debug captcha images saved to {:?}", dir);
        Ok(())
    }

    /// Encode a bitmap as PNG.
    pub fn encode_png(bitmap: &GrayImage) -> Result<Vec<u8>, ScraperError> {
        let mut buffer = Vec::with_capacity(bitmap.width() as usize * bitmap.height() as usize / 4);
        let mut cursor = Cursor::new(&mut buffer);
        DynamicImage::ImageLuma8(bitmap.clone()).write_to(&mut cursor, ImageFormat::Png)?;
        Ok(buffer)
    }
}
