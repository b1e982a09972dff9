//! Core types for scene image generation.

use crate::error::{Result, SceneGenError};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format.
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Maps a MIME type reported by the API.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }

    fn to_image_crate(self) -> ::image::ImageFormat {
        match self {
            Self::Png => ::image::ImageFormat::Png,
            Self::Jpeg => ::image::ImageFormat::Jpeg,
            Self::WebP => ::image::ImageFormat::WebP,
        }
    }

    /// Upper-case display name ("PNG", "JPEG", "WEBP").
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::WebP => "WEBP",
        }
    }
}

/// Metadata about one generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Model used for generation.
    pub model: Option<String>,
    /// Round-trip duration in milliseconds.
    pub duration_ms: Option<u64>,
}

/// A single request to the image model: the combined prompt and the person photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The combined prompt text.
    pub prompt: String,
    /// Source photo (raw bytes), sent alongside the prompt.
    #[serde(skip)]
    pub input_image: Option<Vec<u8>>,
}

impl GenerationRequest {
    /// Creates a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            input_image: None,
        }
    }

    /// Attaches the source photo.
    pub fn with_input_image(mut self, image: Vec<u8>) -> Self {
        self.input_image = Some(image);
        self
    }
}

/// A generated image: the bytes the model returned plus the decoded pixels.
#[derive(Debug, Clone)]
#[must_use = "generated image should be saved or displayed"]
pub struct GeneratedImage {
    /// Raw image bytes as returned by the model.
    pub data: Vec<u8>,
    /// Format of `data`.
    pub format: ImageFormat,
    /// Generation metadata.
    pub metadata: GenerationMetadata,
    pixels: ::image::DynamicImage,
}

impl GeneratedImage {
    /// Decodes raw bytes into an image.
    ///
    /// The format is taken from the magic bytes, falling back to `hint`.
    pub fn decode(
        data: Vec<u8>,
        hint: Option<ImageFormat>,
        metadata: GenerationMetadata,
    ) -> Result<Self> {
        let format = ImageFormat::from_magic_bytes(&data)
            .or(hint)
            .ok_or_else(|| SceneGenError::Decode("unknown image format".into()))?;
        let pixels = ::image::load_from_memory_with_format(&data, format.to_image_crate())?;
        Ok(Self {
            data,
            format,
            metadata,
            pixels,
        })
    }

    /// Pixel width.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Pixel height.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Re-encodes the pixels as PNG.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_png(&self.pixels)
    }
}

pub(crate) fn encode_png(pixels: &::image::DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    pixels.write_to(&mut buf, ::image::ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// An uploaded person photo. Only PNG and JPEG are accepted.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// File name shown to the user.
    pub file_name: String,
    /// Raw bytes, sent to the model unchanged.
    pub data: Vec<u8>,
    /// Detected format.
    pub format: ImageFormat,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
}

impl SourceImage {
    /// Reads and validates a photo from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match ImageFormat::from_extension(ext) {
            Some(ImageFormat::Png | ImageFormat::Jpeg) => {}
            _ => {
                return Err(SceneGenError::InvalidRequest(format!(
                    "unsupported file type '{}': expected png, jpg or jpeg",
                    path.display()
                )))
            }
        }

        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(file_name, data)
    }

    /// Validates an in-memory upload.
    pub fn from_bytes(file_name: impl Into<String>, data: Vec<u8>) -> Result<Self> {
        let format = match ImageFormat::from_magic_bytes(&data) {
            Some(f @ (ImageFormat::Png | ImageFormat::Jpeg)) => f,
            _ => {
                return Err(SceneGenError::InvalidRequest(
                    "uploaded image must be PNG or JPEG".into(),
                ))
            }
        };

        let pixels = ::image::load_from_memory_with_format(&data, format.to_image_crate())
            .map_err(|e| SceneGenError::Decode(format!("cannot read uploaded image: {e}")))?;

        Ok(Self {
            file_name: file_name.into(),
            format,
            width: pixels.width(),
            height: pixels.height(),
            data,
        })
    }

    /// Size in kilobytes.
    pub fn size_kb(&self) -> f64 {
        self.data.len() as f64 / 1024.0
    }

    /// Description of the upload for display.
    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            file_name: self.file_name.clone(),
            width: self.width,
            height: self.height,
            format: self.format.display_name().to_string(),
            size_kb: (self.size_kb() * 10.0).round() / 10.0,
        }
    }
}

/// Displayable facts about a [`SourceImage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    /// File name.
    pub file_name: String,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Upper-case format name.
    pub format: String,
    /// Size in KB, one decimal.
    pub size_kb: f64,
}

impl std::fmt::Display for SourceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "File name: {}", self.file_name)?;
        writeln!(f, "Dimensions: {} × {} px", self.width, self.height)?;
        writeln!(f, "Format: {}", self.format)?;
        write!(f, "Size: {:.1} KB", self.size_kb)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::solid_image;
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a"), None);
    }

    #[test]
    fn test_format_from_extension_and_mime() {
        assert_eq!(ImageFormat::from_extension("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("gif"), None);
        assert_eq!(
            ImageFormat::from_mime_type("image/jpeg"),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_mime_type("text/plain"), None);
    }

    #[test]
    fn test_png_reencode_keeps_dimensions() {
        let jpeg = solid_image(37, 21, ImageFormat::Jpeg);
        let image =
            GeneratedImage::decode(jpeg, None, GenerationMetadata::default()).unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);

        let png = image.to_png_bytes().unwrap();
        assert_eq!(ImageFormat::from_magic_bytes(&png), Some(ImageFormat::Png));

        let again = GeneratedImage::decode(png, None, GenerationMetadata::default()).unwrap();
        assert_eq!(again.dimensions(), (37, 21));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = GeneratedImage::decode(vec![1, 2, 3], None, GenerationMetadata::default())
            .unwrap_err();
        assert!(matches!(err, SceneGenError::Decode(_)));

        let mut truncated = solid_image(8, 8, ImageFormat::Png);
        truncated.truncate(20);
        let err =
            GeneratedImage::decode(truncated, None, GenerationMetadata::default()).unwrap_err();
        assert!(matches!(err, SceneGenError::Image(_)));
    }

    #[test]
    fn test_source_from_bytes() {
        let data = solid_image(64, 48, ImageFormat::Png);
        let len = data.len();
        let source = SourceImage::from_bytes("me.png", data).unwrap();
        assert_eq!(source.format, ImageFormat::Png);
        assert_eq!((source.width, source.height), (64, 48));

        let summary = source.summary();
        assert_eq!(summary.file_name, "me.png");
        assert_eq!(summary.format, "PNG");
        assert!((summary.size_kb - len as f64 / 1024.0).abs() < 0.051);
        assert!(summary.to_string().contains("64 × 48"));
    }

    #[test]
    fn test_source_rejects_webp_and_garbage() {
        let webp = solid_image(4, 4, ImageFormat::WebP);
        assert!(matches!(
            SourceImage::from_bytes("x.webp", webp),
            Err(SceneGenError::InvalidRequest(_))
        ));
        assert!(matches!(
            SourceImage::from_bytes("x.png", PNG_MAGIC.to_vec()),
            Err(SceneGenError::Decode(_))
        ));
    }

    #[test]
    fn test_source_from_path_checks_extension() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("me.gif");
        std::fs::write(&gif, b"GIF89a").unwrap();
        assert!(matches!(
            SourceImage::from_path(&gif),
            Err(SceneGenError::InvalidRequest(_))
        ));

        let jpg = dir.path().join("me.JPG");
        std::fs::write(&jpg, solid_image(10, 12, ImageFormat::Jpeg)).unwrap();
        let source = SourceImage::from_path(&jpg).unwrap();
        assert_eq!(source.file_name, "me.JPG");
        assert_eq!(source.format, ImageFormat::Jpeg);
        assert_eq!((source.width, source.height), (10, 12));
    }
}
