//! # Tile Image Codecs
//!
//! Tiles are persisted as single-channel or packed-color rasters. The mosaic
//! only needs three things from a codec: does a resource exist, decode it,
//! encode it. Everything else (file formats, compression) stays behind the
//! [`ImageCodec`] trait.
//!
//! ## Implementations
//!
//! | Codec         | Backing              | Used for                        |
//! |---------------|----------------------|---------------------------------|
//! | [`PngCodec`]  | PNG files on disk    | Persistent datasets             |
//! | [`MemoryCodec`] | `HashMap` in memory | Tests and transient datasets    |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{MosaicError, MosaicResult};

/// Decoded pixel storage, row-major from the top (north) row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PixelData {
    /// 8-bit luminance.
    L8(Vec<u8>),
    /// 16-bit luminance.
    L16(Vec<u16>),
    /// 8-bit RGB, 3 bytes per pixel.
    Rgb8(Vec<u8>),
    /// 8-bit RGBA, 4 bytes per pixel.
    Rgba8(Vec<u8>),
}

impl PixelData {
    /// Number of storage elements per pixel.
    #[inline]
    #[must_use]
    pub const fn channels(&self) -> usize {
        match self {
            Self::L8(_) | Self::L16(_) => 1,
            Self::Rgb8(_) => 3,
            Self::Rgba8(_) => 4,
        }
    }

    /// Number of storage elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::L8(v) | Self::Rgb8(v) | Self::Rgba8(v) => v.len(),
            Self::L16(v) => v.len(),
        }
    }

    /// True if there are no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short format name for diagnostics.
    #[must_use]
    pub const fn format_name(&self) -> &'static str {
        match self {
            Self::L8(_) => "L8",
            Self::L16(_) => "L16",
            Self::Rgb8(_) => "RGB8",
            Self::Rgba8(_) => "RGBA8",
        }
    }
}

/// A decoded raster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel data.
    pub pixels: PixelData,
}

impl RawImage {
    /// Checks that the pixel buffer matches the dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::Image`] naming `path` if the sizes disagree.
    pub fn validate(&self, path: &Path) -> MosaicResult<()> {
        let expected = self.width as usize * self.height as usize * self.pixels.channels();
        if self.pixels.len() == expected {
            Ok(())
        } else {
            Err(MosaicError::Image {
                path: path.to_path_buf(),
                reason: format!(
                    "{}x{} {} image carries {} elements, expected {expected}",
                    self.width,
                    self.height,
                    self.pixels.format_name(),
                    self.pixels.len()
                ),
            })
        }
    }
}

/// Load/save collaborator for tile rasters.
pub trait ImageCodec: Send + Sync {
    /// True if a raster exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Decodes the raster at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::Image`] or [`MosaicError::UnsupportedPixelFormat`]
    /// if the resource cannot be decoded into a [`RawImage`].
    fn load(&self, path: &Path) -> MosaicResult<RawImage>;

    /// Encodes `image` to `path`, replacing any existing resource.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::Image`] or [`MosaicError::Io`] on failure.
    fn save(&self, path: &Path, image: &RawImage) -> MosaicResult<()>;
}

/// PNG files through the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngCodec;

fn codec_error(path: &Path, err: impl std::fmt::Display) -> MosaicError {
    MosaicError::Image {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn shape_error(path: &Path) -> MosaicError {
    MosaicError::Image {
        path: path.to_path_buf(),
        reason: "pixel buffer does not match image dimensions".to_owned(),
    }
}

impl ImageCodec for PngCodec {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load(&self, path: &Path) -> MosaicResult<RawImage> {
        let decoded = image::open(path).map_err(|e| codec_error(path, e))?;
        let (width, height) = (decoded.width(), decoded.height());
        let pixels = match decoded {
            DynamicImage::ImageLuma8(buf) => PixelData::L8(buf.into_raw()),
            DynamicImage::ImageLuma16(buf) => PixelData::L16(buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => PixelData::Rgb8(buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => PixelData::Rgba8(buf.into_raw()),
            other => {
                return Err(MosaicError::UnsupportedPixelFormat(format!(
                    "{:?} in {}",
                    other.color(),
                    path.display()
                )))
            }
        };
        trace!("decoded {}x{} tile image {}", width, height, path.display());
        Ok(RawImage {
            width,
            height,
            pixels,
        })
    }

    fn save(&self, path: &Path, image: &RawImage) -> MosaicResult<()> {
        image.validate(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MosaicError::io(parent, e))?;
        }
        let (w, h) = (image.width, image.height);
        let result = match &image.pixels {
            PixelData::L8(v) => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v.as_slice())
                .ok_or_else(|| shape_error(path))?
                .save(path),
            PixelData::L16(v) => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v.as_slice())
                .ok_or_else(|| shape_error(path))?
                .save(path),
            PixelData::Rgb8(v) => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v.as_slice())
                .ok_or_else(|| shape_error(path))?
                .save(path),
            PixelData::Rgba8(v) => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, v.as_slice())
                .ok_or_else(|| shape_error(path))?
                .save(path),
        };
        result.map_err(|e| codec_error(path, e))
    }
}

/// In-memory codec. Rasters are keyed by path and never touch the disk.
#[derive(Debug, Default)]
pub struct MemoryCodec {
    images: Mutex<HashMap<PathBuf, RawImage>>,
}

impl MemoryCodec {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an image directly, as if it had been saved.
    pub fn insert(&self, path: impl Into<PathBuf>, image: RawImage) {
        self.images.lock().insert(path.into(), image);
    }

    /// Returns a copy of a stored image.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<RawImage> {
        self.images.lock().get(path).cloned()
    }

    /// Number of stored images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    /// True if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }
}

impl ImageCodec for MemoryCodec {
    fn exists(&self, path: &Path) -> bool {
        self.images.lock().contains_key(path)
    }

    fn load(&self, path: &Path) -> MosaicResult<RawImage> {
        self.images.lock().get(path).cloned().ok_or_else(|| {
            MosaicError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no image stored at this path"),
            )
        })
    }

    fn save(&self, path: &Path, image: &RawImage) -> MosaicResult<()> {
        image.validate(path)?;
        self.images.lock().insert(path.to_path_buf(), image.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("stratum_codec_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_png_round_trip_l16() {
        let path = temp_path("height.png");
        let image = RawImage {
            width: 4,
            height: 2,
            pixels: PixelData::L16(vec![0, 1, 2, 3, 1000, 40000, 65535, 7]),
        };
        PngCodec.save(&path, &image).unwrap();
        assert!(PngCodec.exists(&path));
        assert_eq!(PngCodec.load(&path).unwrap(), image);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_png_round_trip_rgba() {
        let path = temp_path("splat.png");
        let image = RawImage {
            width: 2,
            height: 2,
            pixels: PixelData::Rgba8((0..16).collect()),
        };
        PngCodec.save(&path, &image).unwrap();
        assert_eq!(PngCodec.load(&path).unwrap(), image);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_png_missing_file() {
        let path = temp_path("does_not_exist.png");
        assert!(!PngCodec.exists(&path));
        assert!(matches!(PngCodec.load(&path), Err(MosaicError::Image { .. })));
    }

    #[test]
    fn test_validate_rejects_short_buffer() {
        let image = RawImage {
            width: 3,
            height: 3,
            pixels: PixelData::Rgb8(vec![0; 10]),
        };
        assert!(image.validate(Path::new("x.png")).is_err());
        assert!(MemoryCodec::new().save(Path::new("x.png"), &image).is_err());
    }

    #[test]
    fn test_memory_codec() {
        let codec = MemoryCodec::new();
        let path = Path::new("mem/a.png");
        assert!(!codec.exists(path));
        assert!(codec.load(path).is_err());

        let image = RawImage {
            width: 1,
            height: 1,
            pixels: PixelData::L8(vec![9]),
        };
        codec.save(path, &image).unwrap();
        assert!(codec.exists(path));
        assert_eq!(codec.load(path).unwrap(), image);
        assert_eq!(codec.len(), 1);
    }
}
