//! Pure Rust recompression backend built on the `image` crate.
//!
//! ## Format mapping
//!
//! | Input | Re-encoded as |
//! |---|---|
//! | JPEG | `JpegEncoder` at the configured quality (default 85) |
//! | PNG | `PngEncoder` with best compression, adaptive filtering |
//! | WebP | `WebPEncoder::new_lossless` |
//!
//! The encoded bytes go to a sibling `*.opt.tmp` file which replaces the
//! original only when strictly smaller. Decoding or encoding failures leave the
//! original untouched.

use super::backend::{CodecError, ImageCodec, Recompression};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Extensions [`RustCodec`] knows how to recompress.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

fn format_for(path: &Path) -> Result<ImageFormat, CodecError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "png" => Ok(ImageFormat::Png),
        "webp" => Ok(ImageFormat::WebP),
        other => Err(CodecError::Unsupported(other.to_string())),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".opt.tmp");
    path.with_file_name(name)
}

/// Recompression backend using the `image` crate's pure Rust codecs.
pub struct RustCodec {
    jpeg_quality: u8,
}

impl RustCodec {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat, out: &Path) -> Result<(), CodecError> {
        let writer = BufWriter::new(fs::File::create(out)?);
        let result = match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(writer, self.jpeg_quality))
            }
            ImageFormat::Png => img.write_with_encoder(PngEncoder::new_with_quality(
                writer,
                CompressionType::Best,
                FilterType::Adaptive,
            )),
            _ => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                rgba.write_with_encoder(WebPEncoder::new_lossless(writer))
            }
        };
        result.map_err(|e| {
            CodecError::ProcessingFailed(format!("Failed to encode {}: {}", out.display(), e))
        })
    }
}

impl Default for RustCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ImageCodec for RustCodec {
    fn recompress(&self, path: &Path) -> Result<Recompression, CodecError> {
        let format = format_for(path)?;
        let old_size = fs::metadata(path)?.len();

        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| {
                CodecError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
            })?;

        let tmp = temp_path(path);
        if let Err(e) = self.encode(&img, format, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        let new_size = fs::metadata(&tmp)?.len();
        if new_size > 0 && new_size < old_size {
            fs::rename(&tmp, path)?;
            Ok(Recompression {
                changed: true,
                old_size,
                new_size,
            })
        } else {
            fs::remove_file(&tmp)?;
            Ok(Recompression::unchanged(old_size))
        }
    }
}
