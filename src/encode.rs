//! Image re-encoding.
//!
//! The optimizer does its CPU work through the [`ImageEncoder`] trait so the
//! resize step can be swapped out (tests use slow or failing encoders).
//! [`RustEncoder`] is the production implementation on top of the `image`
//! crate.
//!
//! | Input format | Output |
//! |---|---|
//! | JPEG | JPEG at `quality × 100` |
//! | PNG | PNG (lossless) |
//! | WebP | WebP (lossless) |
//! | anything else | [`EncodeError::Unsupported`], file left as uploaded |
//!
//! EXIF orientation is applied to the pixels before resizing, since the
//! re-encoded output drops metadata.
//!
//! GIF is deliberately unsupported: decoding keeps only the first frame and
//! would flatten animations.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("unsupported image format: {0}")]
    Unsupported(String),

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

/// Resizes and re-encodes an image held in memory.
///
/// Called on the blocking thread pool; implementations may take as long as
/// they need.
pub trait ImageEncoder: Send + Sync {
    /// Scale `input` down to at most `target_width` pixels wide (aspect ratio
    /// preserved) and re-encode it at `quality` in `(0.0, 1.0]`.
    fn reencode(&self, input: &[u8], target_width: u32, quality: f32) -> Result<Vec<u8>, EncodeError>;
}

/// [`ImageEncoder`] backed by the `image` crate with Lanczos3 resampling.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustEncoder;

impl ImageEncoder for RustEncoder {
    fn reencode(&self, input: &[u8], target_width: u32, quality: f32) -> Result<Vec<u8>, EncodeError> {
        let format = image::guess_format(input)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) {
            return Err(EncodeError::Unsupported(format!("{:?}", format)));
        }

        // Output carries no EXIF, so bake the orientation into the pixels
        // before measuring the width.
        let mut decoder = ImageReader::with_format(Cursor::new(input), format).into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut img = DynamicImage::from_decoder(decoder)?;
        img.apply_orientation(orientation);
        let img = scale_to_width(img, target_width);

        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality(quality));
                DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
            }
            _ => {
                img.write_to(&mut Cursor::new(&mut out), format)?;
            }
        }
        Ok(out)
    }
}

/// Downscale so the width is at most `target_width`. Narrower images are
/// returned unchanged rather than stretched up to `target_width`.
fn scale_to_width(img: DynamicImage, target_width: u32) -> DynamicImage {
    if img.width() <= target_width {
        return img;
    }
    let (width, height) = scaled_dimensions(img.width(), img.height(), target_width);
    img.resize_exact(width, height, FilterType::Lanczos3)
}

/// Target dimensions for a width-bounded resize.
fn scaled_dimensions(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    let h = (u64::from(height) * u64::from(target_width) + u64::from(width) / 2) / u64::from(width);
    (target_width, h.max(1) as u32)
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}
