//! Image format tags

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recognized image file types.
///
/// Declaration order is the rank used when sorting a catalog by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpg,
    Gif,
    Webp,
    Tga,
    Png,
    Tif,
    Bmp,
    Dds,
    Hdr,
    Exr,
    Ico,
}

/// Extensions picked up by a directory scan (compared lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "gif", "webp", "tga", "png", "tif", "tiff", "bmp", "dds", "hdr", "rgbe", "exr",
    "ico",
];

impl ImageFormat {
    /// Map a file extension (any case, no dot) to a format tag
    pub fn from_extension(ext: &str) -> Option<Self> {
        let format = match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => ImageFormat::Jpg,
            "gif" => ImageFormat::Gif,
            "webp" => ImageFormat::Webp,
            "tga" => ImageFormat::Tga,
            "png" => ImageFormat::Png,
            "tif" | "tiff" => ImageFormat::Tif,
            "bmp" => ImageFormat::Bmp,
            "dds" => ImageFormat::Dds,
            "hdr" | "rgbe" => ImageFormat::Hdr,
            "exr" => ImageFormat::Exr,
            "ico" => ImageFormat::Ico,
            _ => return None,
        };
        Some(format)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Sort rank for "by type" ordering
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Canonical lowercase extension
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Tga => "tga",
            ImageFormat::Png => "png",
            ImageFormat::Tif => "tif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Dds => "dds",
            ImageFormat::Hdr => "hdr",
            ImageFormat::Exr => "exr",
            ImageFormat::Ico => "ico",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Check if a file is a supported image format
pub fn is_supported_image(path: &Path) -> bool {
    ImageFormat::from_path(path).is_some()
}
