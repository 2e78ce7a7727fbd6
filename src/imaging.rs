//! Image decode/resize/encode helpers used at the adapter boundaries.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::config::UploadLimits;
use crate::error::{Result, TransformError};

/// Largest input dimension accepted by the local pipeline before downscaling.
pub const MAX_LOCAL_DIMENSION: u32 = 1024;

/// The nine resolution pairs the SDXL engine accepts (width, height).
pub static SDXL_DIMENSIONS: [(u32, u32); 9] = [
    (1024, 1024), // square
    (1152, 896),  // landscape
    (1216, 832),
    (1344, 768),
    (1536, 640),
    (640, 1536), // portrait
    (768, 1344),
    (832, 1216),
    (896, 1152),
];

/// Decode an encoded raster image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| TransformError::InvalidImage(e.to_string()))
}

/// Encode a bitmap as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| TransformError::InvalidImage(format!("PNG encoding failed: {}", e)))?;
    Ok(buf.into_inner())
}

/// Shrink the image so its largest dimension does not exceed `max`,
/// preserving aspect ratio. Images already within bounds pass through.
pub fn downscale_to_max(img: DynamicImage, max: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w.max(h) <= max {
        return img;
    }
    let ratio = max as f64 / w.max(h) as f64;
    let new_w = ((w as f64 * ratio) as u32).max(1);
    let new_h = ((h as f64 * ratio) as u32).max(1);
    img.resize(new_w, new_h, FilterType::Lanczos3)
}

/// Pick the SDXL dimension pair whose aspect ratio is closest to the input's.
pub fn nearest_sdxl_dimensions(width: u32, height: u32) -> (u32, u32) {
    let aspect = width as f64 / height as f64;
    let mut best = SDXL_DIMENSIONS[0];
    let mut best_diff = f64::INFINITY;
    for &(w, h) in &SDXL_DIMENSIONS {
        let diff = (w as f64 / h as f64 - aspect).abs();
        if diff < best_diff {
            best_diff = diff;
            best = (w, h);
        }
    }
    best
}

/// Remap an image to the nearest SDXL-supported resolution.
pub fn resize_for_sdxl(img: &DynamicImage) -> DynamicImage {
    let (w, h) = nearest_sdxl_dimensions(img.width(), img.height());
    if (img.width(), img.height()) == (w, h) {
        return img.clone();
    }
    log::debug!(
        "resizing {}x{} to SDXL dimensions {}x{}",
        img.width(),
        img.height(),
        w,
        h
    );
    img.resize_exact(w, h, FilterType::Lanczos3)
}

/// Validate an upload against size/extension limits and make sure the bytes
/// decode as an image.
pub fn validate_upload(bytes: &[u8], filename: &str, limits: &UploadLimits) -> Result<()> {
    if !limits.allows_extension(filename) {
        return Err(TransformError::InvalidImage(format!(
            "unsupported file type ({}); allowed: {}",
            filename,
            limits.allowed_extensions.join(", ")
        )));
    }
    if bytes.len() as u64 > limits.max_bytes() {
        return Err(TransformError::InvalidImage(format!(
            "file is {:.1} MB; the limit is {} MB",
            bytes.len() as f64 / (1024.0 * 1024.0),
            limits.max_file_size_mb
        )));
    }
    decode_image(bytes)?;
    Ok(())
}
