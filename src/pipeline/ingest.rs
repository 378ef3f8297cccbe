//! Image ingestion: validate an upload and normalise it to an 8-bit luma
//! bitmap.
//!
//! ## Order of checks
//!
//! Cheap checks run before expensive ones so hostile input is rejected
//! early: byte size, then declared MIME type, then magic-byte sniffing, then
//! the image header (pixel dimensions), and only then the full decode. The
//! pixel buffer is never allocated for an image that exceeds
//! [`IngestConfig::max_dimension`].
//!
//! Phone photos carry their rotation in EXIF; it is applied during decoding
//! so the detector always sees upright handwriting.
//!
//! HEIC/HEIF is decoded through libheif when the `heic` feature is enabled.
//! Without it such uploads are still recognised, then fail with
//! [`HandTexError::DecodeError`].

use crate::config::IngestConfig;
use crate::error::HandTexError;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Luma};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, warn};

/// Container formats the ingestor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Jpeg,
    Png,
    Heic,
    WebP,
}

impl SourceFormat {
    /// Map a declared MIME type (parameters ignored, case-insensitive).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(SourceFormat::Jpeg),
            "image/png" => Some(SourceFormat::Png),
            "image/heic" | "image/heif" | "image/heic-sequence" | "image/heif-sequence" => {
                Some(SourceFormat::Heic)
            }
            "image/webp" => Some(SourceFormat::WebP),
            _ => None,
        }
    }

    /// Identify the container from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
        const HEIF_BRANDS: &[&[u8]] = &[
            b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
        ];

        if bytes.starts_with(PNG) {
            Some(SourceFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(SourceFormat::Jpeg)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(SourceFormat::WebP)
        } else if bytes.len() >= 12
            && &bytes[4..8] == b"ftyp"
            && HEIF_BRANDS.iter().any(|brand| *brand == &bytes[8..12])
        {
            Some(SourceFormat::Heic)
        } else {
            None
        }
    }

    /// Extension-based guess for local files.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(SourceFormat::Jpeg),
            "png" => Some(SourceFormat::Png),
            "heic" | "heif" => Some(SourceFormat::Heic),
            "webp" => Some(SourceFormat::WebP),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Png => "image/png",
            SourceFormat::Heic => "image/heic",
            SourceFormat::WebP => "image/webp",
        }
    }
}

/// A decoded, upright, 8-bit luma bitmap. Immutable once built.
#[derive(Debug, Clone)]
pub struct Image {
    pixels: GrayImage,
    format: Option<SourceFormat>,
    color_depth: u16,
}

impl Image {
    /// Wrap an in-memory luma buffer (synthetic input, tests).
    pub fn from_luma(pixels: GrayImage) -> Self {
        Self {
            pixels,
            format: None,
            color_depth: 8,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    /// Luma at `(x, y)`; out-of-bounds reads as white paper.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        if x < self.width() && y < self.height() {
            self.pixels.get_pixel(x, y).0[0]
        } else {
            255
        }
    }

    /// Container the bytes were decoded from, if any.
    pub fn source_format(&self) -> Option<SourceFormat> {
        self.format
    }

    /// Bits per pixel of the source before normalisation.
    pub fn color_depth(&self) -> u16 {
        self.color_depth
    }
}

/// Validate and decode `bytes` declared as `declared_mime`.
pub fn ingest(bytes: &[u8], declared_mime: &str, config: &IngestConfig) -> Result<Image, HandTexError> {
    if bytes.len() as u64 > config.max_bytes {
        return Err(HandTexError::ImageTooLarge {
            actual: bytes.len() as u64,
            limit: config.max_bytes,
            unit: "bytes",
        });
    }

    let declared = SourceFormat::from_mime(declared_mime).ok_or_else(|| {
        HandTexError::UnsupportedFormat {
            mime: declared_mime.to_string(),
        }
    })?;

    let sniffed = SourceFormat::sniff(bytes).ok_or_else(|| HandTexError::DecodeError {
        detail: "bytes do not match any supported image container".to_string(),
    })?;
    if sniffed != declared {
        warn!(
            declared = declared.mime(),
            sniffed = sniffed.mime(),
            "Declared MIME type disagrees with image contents; using sniffed type"
        );
    }

    let (img, color_depth) = match sniffed {
        SourceFormat::Heic => decode_heic(bytes, config)?,
        SourceFormat::Png => decode_raster(bytes, ImageFormat::Png, config)?,
        SourceFormat::Jpeg => decode_raster(bytes, ImageFormat::Jpeg, config)?,
        SourceFormat::WebP => decode_raster(bytes, ImageFormat::WebP, config)?,
    };

    let pixels = flatten_to_luma(&img);
    debug!(
        width = pixels.width(),
        height = pixels.height(),
        color_depth,
        format = sniffed.mime(),
        "Image ingested"
    );

    Ok(Image {
        pixels,
        format: Some(sniffed),
        color_depth,
    })
}

fn check_dimensions(width: u32, height: u32, config: &IngestConfig) -> Result<(), HandTexError> {
    let largest = width.max(height);
    if largest > config.max_dimension {
        return Err(HandTexError::ImageTooLarge {
            actual: largest as u64,
            limit: config.max_dimension as u64,
            unit: "pixels",
        });
    }
    Ok(())
}

fn decode_raster(
    bytes: &[u8],
    format: ImageFormat,
    config: &IngestConfig,
) -> Result<(DynamicImage, u16), HandTexError> {
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format)
        .into_decoder()
        .map_err(decode_error)?;

    let (width, height) = decoder.dimensions();
    check_dimensions(width, height, config)?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let color_depth = decoder.original_color_type().bits_per_pixel();
    let mut img = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    if orientation != Orientation::NoTransforms {
        debug!(?orientation, "Applying EXIF orientation");
        img.apply_orientation(orientation);
    }
    Ok((img, color_depth))
}

/// Decode the primary image of a HEIF container. libheif applies the
/// container's rotation and mirroring itself.
#[cfg(feature = "heic")]
fn decode_heic(bytes: &[u8], config: &IngestConfig) -> Result<(DynamicImage, u16), HandTexError> {
    use libheif_rs::{ColorSpace, HeifContext, HeifError, LibHeif, RgbChroma};

    fn heif_error(e: HeifError) -> HandTexError {
        HandTexError::DecodeError {
            detail: format!("HEIF: {e}"),
        }
    }
    let truncated = || HandTexError::DecodeError {
        detail: "HEIF: decoded plane is shorter than its dimensions".to_string(),
    };

    let ctx = HeifContext::read_from_bytes(bytes).map_err(heif_error)?;
    let handle = ctx.primary_image_handle().map_err(heif_error)?;
    check_dimensions(handle.width(), handle.height(), config)?;
    let channels = if handle.has_alpha_channel() { 4 } else { 3 };
    let color_depth = handle.luma_bits_per_pixel() as u16 * channels;

    let decoded = LibHeif::new()
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgba), None)
        .map_err(heif_error)?;
    let planes = decoded.planes();
    let plane = planes.interleaved.ok_or_else(|| HandTexError::DecodeError {
        detail: "HEIF: decoder returned no interleaved plane".to_string(),
    })?;

    let row = plane.width as usize * 4;
    let mut rgba = Vec::with_capacity(row * plane.height as usize);
    for line in plane.data.chunks(plane.stride).take(plane.height as usize) {
        rgba.extend_from_slice(line.get(..row).ok_or_else(truncated)?);
    }
    let img = image::RgbaImage::from_raw(plane.width, plane.height, rgba).ok_or_else(truncated)?;
    Ok((DynamicImage::ImageRgba8(img), color_depth))
}

#[cfg(not(feature = "heic"))]
fn decode_heic(_bytes: &[u8], _config: &IngestConfig) -> Result<(DynamicImage, u16), HandTexError> {
    Err(HandTexError::DecodeError {
        detail: "HEIC/HEIF decoding needs the `heic` feature; convert to JPEG or PNG".to_string(),
    })
}

fn decode_error(e: image::ImageError) -> HandTexError {
    HandTexError::DecodeError {
        detail: e.to_string(),
    }
}

/// Luma on a white background: transparent regions become paper, not ink.
fn flatten_to_luma(img: &DynamicImage) -> GrayImage {
    if !img.color().has_alpha() {
        return img.to_luma8();
    }
    let la = img.to_luma_alpha8();
    GrayImage::from_fn(la.width(), la.height(), |x, y| {
        let [l, a] = la.get_pixel(x, y).0;
        let (l, a) = (l as u32, a as u32);
        Luma([(255 - (a * (255 - l)) / 255) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn white(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([255])))
    }

    #[test]
    fn decodes_png_to_luma() {
        let mut gray = GrayImage::from_pixel(20, 10, Luma([255]));
        gray.put_pixel(3, 4, Luma([0]));
        let bytes = png_bytes(DynamicImage::ImageLuma8(gray));

        let img = ingest(&bytes, "image/png", &IngestConfig::default()).unwrap();
        assert_eq!((img.width(), img.height()), (20, 10));
        assert_eq!(img.luma(3, 4), 0);
        assert_eq!(img.luma(0, 0), 255);
        assert_eq!(img.luma(100, 100), 255);
        assert_eq!(img.source_format(), Some(SourceFormat::Png));
        assert_eq!(img.color_depth(), 8);
    }

    #[test]
    fn rejects_oversized_bytes() {
        let bytes = png_bytes(white(8, 8));
        let config = IngestConfig {
            max_bytes: 10,
            ..IngestConfig::default()
        };
        let err = ingest(&bytes, "image/png", &config).unwrap_err();
        assert!(matches!(err, HandTexError::ImageTooLarge { unit: "bytes", limit: 10, .. }));
    }

    #[test]
    fn rejects_oversized_dimensions() {
        let bytes = png_bytes(white(40, 5));
        let config = IngestConfig {
            max_dimension: 32,
            ..IngestConfig::default()
        };
        let err = ingest(&bytes, "image/png", &config).unwrap_err();
        assert!(matches!(
            err,
            HandTexError::ImageTooLarge {
                actual: 40,
                unit: "pixels",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unsupported_mime() {
        let bytes = png_bytes(white(4, 4));
        let err = ingest(&bytes, "image/gif", &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, HandTexError::UnsupportedFormat { .. }));
    }

    #[test]
    fn unknown_container_is_decode_error() {
        let err = ingest(b"definitely not an image", "image/png", &IngestConfig::default())
            .unwrap_err();
        assert!(matches!(err, HandTexError::DecodeError { .. }));
    }

    #[test]
    fn sniffed_type_wins_over_declared() {
        let bytes = png_bytes(white(6, 6));
        let img = ingest(&bytes, "image/jpeg", &IngestConfig::default()).unwrap();
        assert_eq!(img.source_format(), Some(SourceFormat::Png));
    }

    fn heic_header_only() -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 24];
        bytes.extend_from_slice(b"ftypheic");
        bytes.extend_from_slice(&[0; 16]);
        bytes
    }

    #[cfg(not(feature = "heic"))]
    #[test]
    fn heic_is_recognised_but_needs_feature() {
        let bytes = heic_header_only();
        assert_eq!(SourceFormat::sniff(&bytes), Some(SourceFormat::Heic));
        let err = ingest(&bytes, "image/heic", &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, HandTexError::DecodeError { ref detail } if detail.contains("`heic` feature")));
    }

    #[cfg(feature = "heic")]
    #[test]
    fn broken_heic_is_decode_error() {
        let bytes = heic_header_only();
        assert_eq!(SourceFormat::sniff(&bytes), Some(SourceFormat::Heic));
        let err = ingest(&bytes, "image/heic", &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, HandTexError::DecodeError { ref detail } if detail.starts_with("HEIF")));
    }

    #[cfg(feature = "heic")]
    #[test]
    fn decodes_heic_to_luma() {
        use libheif_rs::{Channel, ColorSpace, CompressionFormat, HeifContext, LibHeif, RgbChroma};

        let lib = LibHeif::new();
        // Builds of libheif without an HEVC encoder can still decode; nothing to test here.
        let Ok(mut encoder) = lib.encoder_for_format(CompressionFormat::Hevc) else {
            return;
        };

        let (w, h) = (64u32, 32u32);
        let mut source = libheif_rs::Image::new(w, h, ColorSpace::Rgb(RgbChroma::Rgb)).unwrap();
        source.create_plane(Channel::Interleaved, w, h, 8).unwrap();
        {
            let mut planes = source.planes_mut();
            let plane = planes.interleaved.as_mut().unwrap();
            let stride = plane.stride;
            for y in 0..h as usize {
                for x in 0..w as usize {
                    let ink = (16..32).contains(&x) && (8..24).contains(&y);
                    let v = if ink { 0 } else { 255 };
                    plane.data[y * stride + x * 3..][..3].copy_from_slice(&[v, v, v]);
                }
            }
        }
        let mut ctx = HeifContext::new().unwrap();
        ctx.encode_image(&source, &mut encoder, None).unwrap();
        let bytes = ctx.write_to_bytes().unwrap();

        let img = ingest(&bytes, "image/heic", &IngestConfig::default()).unwrap();
        assert_eq!((img.width(), img.height()), (w, h));
        assert_eq!(img.source_format(), Some(SourceFormat::Heic));
        assert!(img.luma(20, 16) < 64);
        assert!(img.luma(50, 4) > 192);

        let small = IngestConfig {
            max_dimension: 32,
            ..IngestConfig::default()
        };
        assert!(matches!(
            ingest(&bytes, "image/heic", &small),
            Err(HandTexError::ImageTooLarge { actual: 64, unit: "pixels", .. })
        ));
    }

    #[test]
    fn transparency_becomes_paper() {
        let mut rgba = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let bytes = png_bytes(DynamicImage::ImageRgba8(rgba));
        let img = ingest(&bytes, "image/png", &IngestConfig::default()).unwrap();
        assert_eq!(img.luma(0, 0), 255);
        assert_eq!(img.luma(1, 1), 0);
        assert_eq!(img.color_depth(), 32);
    }

    #[test]
    fn mime_parsing_ignores_case_and_parameters() {
        assert_eq!(SourceFormat::from_mime("IMAGE/PNG; q=1"), Some(SourceFormat::Png));
        assert_eq!(SourceFormat::from_mime("image/heif"), Some(SourceFormat::Heic));
        assert_eq!(SourceFormat::from_mime("application/pdf"), None);
        assert_eq!(SourceFormat::from_extension("JPG"), Some(SourceFormat::Jpeg));
    }
}
