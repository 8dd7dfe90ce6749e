//! Core types for the dualvision pipeline
//!
//! An upload enters the system as an [`EncodedImage`] paired with a text
//! query. Both are validated once, at construction of a [`QueryRequest`].

use image::{ImageFormat, ImageReader};
use std::fmt;
use std::io::Cursor;
use std::num::NonZeroU64;
use std::sync::OnceLock;
use thiserror::Error;

/// MIME type used when the raster format cannot be guessed from the bytes
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// An encoded raster image (JPEG, PNG, ...) as received or produced
///
/// Pixel dimensions are read from the image header the first time they are
/// requested and cached afterwards.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    dimensions: OnceLock<(u32, u32)>,
}

impl EncodedImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            dimensions: OnceLock::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Width and height in pixels, decoded from the header only
    pub fn dimensions(&self) -> image::ImageResult<(u32, u32)> {
        if let Some(dimensions) = self.dimensions.get() {
            return Ok(*dimensions);
        }

        let dimensions = ImageReader::new(Cursor::new(self.bytes.as_slice()))
            .with_guessed_format()?
            .into_dimensions()?;

        Ok(*self.dimensions.get_or_init(|| dimensions))
    }

    /// Raster format guessed from the magic bytes
    pub fn format(&self) -> Option<ImageFormat> {
        image::guess_format(&self.bytes).ok()
    }

    pub fn mime_type(&self) -> &'static str {
        self.format()
            .map(|format| format.to_mime_type())
            .unwrap_or(FALLBACK_MIME_TYPE)
    }
}

impl From<Vec<u8>> for EncodedImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Maximum width x height product allowed for an image leaving the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelCeiling(NonZeroU64);

impl PixelCeiling {
    /// The upstream API's limit (33 177 600 pixels)
    pub const DEFAULT: Self = match NonZeroU64::new(33_177_600) {
        Some(value) => Self(value),
        None => panic!("pixel ceiling must be non-zero"),
    };

    /// Returns `None` for a zero ceiling
    pub fn new(pixels: u64) -> Option<Self> {
        NonZeroU64::new(pixels).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Whether an image of the given dimensions fits under the ceiling
    pub fn admits(self, width: u32, height: u32) -> bool {
        pixel_count(width, height) <= self.get()
    }
}

impl Default for PixelCeiling {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PixelCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel count of a width x height raster, without overflow
pub fn pixel_count(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height)
}

/// Rejected caller input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Empty file")]
    EmptyImage,
    #[error("Query must not be empty")]
    EmptyQuery,
}

/// One inbound call: an image and the question asked about it
#[derive(Debug, Clone)]
pub struct QueryRequest {
    image: EncodedImage,
    query: String,
}

impl QueryRequest {
    pub fn new(image: impl Into<EncodedImage>, query: impl Into<String>) -> Result<Self, InputError> {
        let image = image.into();
        let query = query.into();

        if image.is_empty() {
            return Err(InputError::EmptyImage);
        }
        if query.trim().is_empty() {
            return Err(InputError::EmptyQuery);
        }

        Ok(Self { image, query })
    }

    pub fn image(&self) -> &EncodedImage {
        &self.image
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn into_parts(self) -> (EncodedImage, String) {
        (self.image, self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_pixel_ceiling_rejects_zero() {
        assert!(PixelCeiling::new(0).is_none());
        assert_eq!(PixelCeiling::new(10).unwrap().get(), 10);
    }

    #[test]
    fn test_pixel_ceiling_default() {
        assert_eq!(PixelCeiling::default().get(), 33_177_600);
    }

    #[test]
    fn test_pixel_ceiling_admits() {
        let ceiling = PixelCeiling::new(100).unwrap();
        assert!(ceiling.admits(10, 10));
        assert!(!ceiling.admits(10, 11));
    }

    #[test]
    fn test_pixel_count_does_not_overflow() {
        assert_eq!(pixel_count(u32::MAX, 2), u64::from(u32::MAX) * 2);
    }

    #[test]
    fn test_encoded_image_reads_dimensions_from_header() {
        let image = EncodedImage::new(png_bytes(7, 3));
        assert_eq!(image.dimensions().unwrap(), (7, 3));
        // Second call is served from the cache
        assert_eq!(image.dimensions().unwrap(), (7, 3));
        assert_eq!(image.format(), Some(ImageFormat::Png));
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn test_encoded_image_unknown_format() {
        let image = EncodedImage::new(b"not an image".to_vec());
        assert!(image.dimensions().is_err());
        assert_eq!(image.format(), None);
        assert_eq!(image.mime_type(), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn test_query_request_rejects_empty_image() {
        let result = QueryRequest::new(Vec::<u8>::new(), "what is this?");
        assert_eq!(result.unwrap_err(), InputError::EmptyImage);
    }

    #[test]
    fn test_query_request_rejects_blank_query() {
        let result = QueryRequest::new(png_bytes(1, 1), "   ");
        assert_eq!(result.unwrap_err(), InputError::EmptyQuery);
    }

    #[test]
    fn test_query_request_valid() {
        let request = QueryRequest::new(png_bytes(2, 2), "describe").unwrap();
        assert_eq!(request.query(), "describe");
        assert_eq!(request.image().dimensions().unwrap(), (2, 2));
    }
}
