//! Content-type detection for stored receipt images.

use std::path::Path;

use image::ImageFormat;

const OCTET_STREAM: &str = "application/octet-stream";

/// Image formats a phone or scanner is likely to hand us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Heic,
}

impl ImageKind {
    pub const ALL: [ImageKind; 7] = [
        ImageKind::Jpeg,
        ImageKind::Png,
        ImageKind::Gif,
        ImageKind::Webp,
        ImageKind::Bmp,
        ImageKind::Tiff,
        ImageKind::Heic,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
            ImageKind::Bmp => "image/bmp",
            ImageKind::Tiff => "image/tiff",
            ImageKind::Heic => "image/heic",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let kind = match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" => ImageKind::Jpeg,
            "png" => ImageKind::Png,
            "gif" => ImageKind::Gif,
            "webp" => ImageKind::Webp,
            "bmp" => ImageKind::Bmp,
            "tif" | "tiff" => ImageKind::Tiff,
            "heic" | "heif" => ImageKind::Heic,
            _ => return None,
        };
        Some(kind)
    }

    /// Identify the format from its leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => Some(ImageKind::Jpeg),
            Ok(ImageFormat::Png) => Some(ImageKind::Png),
            Ok(ImageFormat::Gif) => Some(ImageKind::Gif),
            Ok(ImageFormat::WebP) => Some(ImageKind::Webp),
            Ok(ImageFormat::Bmp) => Some(ImageKind::Bmp),
            Ok(ImageFormat::Tiff) => Some(ImageKind::Tiff),
            _ => is_heic(bytes).then_some(ImageKind::Heic),
        }
    }

    /// Browsers render these directly; the rest are served as downloads.
    pub fn renders_inline(self) -> bool {
        !matches!(self, ImageKind::Tiff | ImageKind::Heic)
    }
}

/// HEIF container with a HEIC brand; `image` has no HEIC support.
fn is_heic(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"heic" | b"heix" | b"mif1")
}

/// MIME type for a stored object, guessed from its extension.
pub fn detect_mime_type(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ImageKind::from_extension)
        .map_or(OCTET_STREAM, ImageKind::mime)
}

pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    ImageKind::sniff(bytes).map(ImageKind::mime)
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

pub fn is_inline_safe(mime: &str) -> bool {
    ImageKind::ALL
        .iter()
        .any(|kind| kind.renders_inline() && kind.mime() == mime)
}
