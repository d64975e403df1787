//! Image cleanup before OCR.
//!
//! Receipts are photographed under uneven light; a Gaussian adaptive
//! threshold turns them into clean black-on-white text. Any failure falls
//! back to the untouched image.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, warn};

/// Gaussian sigma matching an 11x11 neighbourhood.
pub const THRESHOLD_SIGMA: f32 = 2.0;
/// Constant subtracted from the weighted neighbourhood mean.
pub const THRESHOLD_OFFSET: i16 = 2;

/// Image bytes ready for the vision model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub preprocessed: bool,
}

/// Binarize `gray`: a pixel becomes white when it is brighter than its
/// Gaussian-weighted neighbourhood mean minus `offset`, black otherwise.
pub fn adaptive_threshold(gray: &GrayImage, sigma: f32, offset: i16) -> GrayImage {
    let mean = gaussian_blur_f32(gray, sigma);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let src = gray.get_pixel(x, y)[0] as i16;
        let threshold = mean.get_pixel(x, y)[0] as i16 - offset;
        if src > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Decode, grayscale, threshold and re-encode as PNG.
pub fn preprocess(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let gray = image::load_from_memory(bytes)?.to_luma8();
    let binary = adaptive_threshold(&gray, THRESHOLD_SIGMA, THRESHOLD_OFFSET);

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(binary).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Preprocess when enabled; on any error keep the original image.
pub fn prepare_image(bytes: &[u8], mime_type: &str, enabled: bool) -> PreparedImage {
    let original = || PreparedImage {
        bytes: bytes.to_vec(),
        mime_type: mime_type.to_string(),
        preprocessed: false,
    };
    if !enabled {
        return original();
    }
    match preprocess(bytes) {
        Ok(png) => {
            debug!(before = bytes.len(), after = png.len(), "Image preprocessed");
            PreparedImage {
                bytes: png,
                mime_type: "image/png".to_string(),
                preprocessed: true,
            }
        }
        Err(e) => {
            warn!(error = %e, "Image preprocessing failed, using original image");
            original()
        }
    }
}
