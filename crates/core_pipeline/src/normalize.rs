//! Image normalization module
//!
//! Keeps an uploaded image under the pixel ceiling of the upstream API:
//! - Images already under the ceiling pass through untouched
//! - Larger images are scaled down, aspect ratio preserved
//! - Scaled images are re-encoded as JPEG and re-checked before release

use crate::types::{pixel_count, EncodedImage, PixelCeiling};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageError, ImageReader, Limits};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, error, info};

/// Upper bound on correction steps after the initial scale estimate
pub const MAX_SHRINK_ITERATIONS: u32 = 15;

/// Factor applied to the running scale on each correction step
pub const SHRINK_FACTOR: f64 = 0.8;

/// JPEG quality used when a resized image is re-encoded
pub const JPEG_QUALITY: u8 = 85;

/// Largest width or height a baseline JPEG can record
pub const MAX_JPEG_DIMENSION: u32 = 65_535;

/// Allocation budget for decoding one upload
///
/// Covers a 16384x16384 RGBA image, well past anything the pixel ceiling
/// is meant to accept before resizing.
pub const DECODE_ALLOC_LIMIT: u64 = 1 << 30;

/// Errors raised while normalizing an image
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Image content is empty")]
    Empty,

    #[error("Invalid image format: {0}")]
    Undecodable(#[source] ImageError),

    #[error("Image too large to decode: {0}")]
    TooLargeToDecode(#[source] ImageError),

    #[error("Unable to resize {width}x{height} image to acceptable dimensions (max {ceiling} pixels)")]
    DimensionUnderflow { width: u32, height: u32, ceiling: u64 },

    #[error("Failed to resize {width}x{height} image below {ceiling} pixels after {iterations} iterations")]
    CeilingUnreachable {
        width: u32,
        height: u32,
        ceiling: u64,
        iterations: u32,
    },

    #[error("Cannot encode {width}x{height} image as JPEG (max side {max})")]
    ExceedsEncoderBounds { width: u32, height: u32, max: u32 },

    #[error("Resized image exceeds limit: {pixels} pixels (max: {ceiling})")]
    VerificationFailed { pixels: u64, ceiling: u64 },

    #[error("Failed to encode resized image: {0}")]
    Encode(#[source] ImageError),
}

impl NormalizeError {
    /// True when the caller's image is at fault rather than this process
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}

/// Normalize an image so that width x height does not exceed `ceiling`
///
/// Images already under the ceiling are returned as-is, same buffer, no
/// re-encoding. Anything larger is resampled with Lanczos3, written as JPEG
/// and decoded again to confirm the ceiling holds.
///
/// # Errors
/// * [`NormalizeError::Empty`] / [`NormalizeError::Undecodable`] for bad input
/// * [`NormalizeError::TooLargeToDecode`] past [`DECODE_ALLOC_LIMIT`]
/// * [`NormalizeError::DimensionUnderflow`] / [`NormalizeError::CeilingUnreachable`] /
///   [`NormalizeError::ExceedsEncoderBounds`] when no valid target size exists
/// * [`NormalizeError::VerificationFailed`] if the encoded output is too large
pub fn normalize(image: EncodedImage, ceiling: PixelCeiling) -> Result<EncodedImage, NormalizeError> {
    normalize_with_limits(image, ceiling, decode_limits(DECODE_ALLOC_LIMIT))
}

/// [`normalize`] with caller-supplied decoder limits
pub fn normalize_with_limits(
    image: EncodedImage,
    ceiling: PixelCeiling,
    limits: Limits,
) -> Result<EncodedImage, NormalizeError> {
    if image.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let decoded = decode(image.as_bytes(), limits)?;
    let (width, height) = (decoded.width(), decoded.height());
    let total = pixel_count(width, height);
    info!("Original image dimensions: {}x{} ({} pixels)", width, height, total);

    if ceiling.admits(width, height) {
        debug!("No resizing needed for {}x{} (max {} pixels)", width, height, ceiling);
        return Ok(image);
    }

    let (target_width, target_height) = plan_dimensions(width, height, ceiling)?;
    if target_width > MAX_JPEG_DIMENSION || target_height > MAX_JPEG_DIMENSION {
        return Err(NormalizeError::ExceedsEncoderBounds {
            width: target_width,
            height: target_height,
            max: MAX_JPEG_DIMENSION,
        });
    }
    debug!("Resizing to {}x{}", target_width, target_height);

    // JPEG has no alpha channel
    let resized = imageops::resize(
        &decoded.to_rgb8(),
        target_width,
        target_height,
        FilterType::Lanczos3,
    );

    let mut encoded = Vec::new();
    resized
        .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY))
        .map_err(NormalizeError::Encode)?;

    let output = EncodedImage::new(encoded);
    let (final_width, final_height) = output.dimensions().map_err(NormalizeError::Encode)?;
    let final_pixels = pixel_count(final_width, final_height);

    if final_pixels > ceiling.get() {
        error!(
            "Resized image still exceeds limit: {} pixels (max: {})",
            final_pixels, ceiling
        );
        return Err(NormalizeError::VerificationFailed {
            pixels: final_pixels,
            ceiling: ceiling.get(),
        });
    }

    info!(
        "Resized image from {}x{} ({} pixels) to {}x{} ({} pixels)",
        width, height, total, final_width, final_height, final_pixels
    );
    Ok(output)
}

/// Decoder limits allowing at most `max_alloc` bytes and no per-side cap
pub fn decode_limits(max_alloc: u64) -> Limits {
    let mut limits = Limits::no_limits();
    limits.max_alloc = Some(max_alloc);
    limits
}

fn decode(bytes: &[u8], limits: Limits) -> Result<image::DynamicImage, NormalizeError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| NormalizeError::Undecodable(ImageError::IoError(err)))?;
    reader.limits(limits);

    reader.decode().map_err(|err| match err {
        ImageError::Limits(_) => NormalizeError::TooLargeToDecode(err),
        other => NormalizeError::Undecodable(other),
    })
}

/// Compute target dimensions for a `width` x `height` image under `ceiling`
///
/// Starts from the exact linear scale `sqrt(ceiling / (width * height))` and
/// hands the floored candidate to [`shrink_to_fit`].
pub fn plan_dimensions(
    width: u32,
    height: u32,
    ceiling: PixelCeiling,
) -> Result<(u32, u32), NormalizeError> {
    let total = pixel_count(width, height);
    if total <= ceiling.get() {
        return Ok((width, height));
    }

    let start_scale = (ceiling.get() as f64 / total as f64).sqrt();
    shrink_to_fit(width, height, ceiling, start_scale)
}

/// Scale `width` x `height` by `start_scale`, shrinking by [`SHRINK_FACTOR`]
/// until the floored result fits under `ceiling`
///
/// At most [`MAX_SHRINK_ITERATIONS`] correction steps are taken. A candidate
/// with a zero side fails immediately.
pub fn shrink_to_fit(
    width: u32,
    height: u32,
    ceiling: PixelCeiling,
    start_scale: f64,
) -> Result<(u32, u32), NormalizeError> {
    let mut scale = start_scale;
    let mut iterations = 0;

    loop {
        let (candidate_width, candidate_height) = scale_dimensions(width, height, scale);

        if candidate_width < 1 || candidate_height < 1 {
            return Err(NormalizeError::DimensionUnderflow {
                width,
                height,
                ceiling: ceiling.get(),
            });
        }

        if ceiling.admits(candidate_width, candidate_height) {
            return Ok((candidate_width, candidate_height));
        }

        if iterations == MAX_SHRINK_ITERATIONS {
            return Err(NormalizeError::CeilingUnreachable {
                width,
                height,
                ceiling: ceiling.get(),
                iterations,
            });
        }

        scale *= SHRINK_FACTOR;
        iterations += 1;
        debug!(
            "Iteration {}: {}x{} ({} pixels) over ceiling, scale now {:.6}",
            iterations,
            candidate_width,
            candidate_height,
            pixel_count(candidate_width, candidate_height),
            scale
        );
    }
}

fn scale_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    // `as` saturates, so NaN and negatives land on 0
    (
        (f64::from(width) * scale).floor() as u32,
        (f64::from(height) * scale).floor() as u32,
    )
}
