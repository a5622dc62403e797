//! # Resource Locator
//!
//! Resolves where a dataset's master file and tile images live.

use std::path::{Path, PathBuf};

use crate::description::MASTER_FILE_EXT;

/// Maps dataset names and tile coordinates to resource paths.
pub trait ResourceLocator: Send + Sync {
    /// Path of the master file for `base_name`.
    fn master_file_path(&self, base_name: &str) -> PathBuf;

    /// Path of one tile image. `flipped_tile_z` is already in file orientation.
    fn tile_path(&self, base_name: &str, tile_x: u32, flipped_tile_z: u32, file_ext: &str) -> PathBuf;
}

/// Tile image file name: `{base}_x{tx}y{ty}.{ext}`.
#[must_use]
pub fn tile_file_name(base_name: &str, tile_x: u32, flipped_tile_z: u32, file_ext: &str) -> String {
    format!("{base_name}_x{tile_x}y{flipped_tile_z}.{file_ext}")
}

/// Keeps every file of a dataset in one directory.
#[derive(Clone, Debug)]
pub struct DirectoryLocator {
    root: PathBuf,
}

impl DirectoryLocator {
    /// Creates a locator rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceLocator for DirectoryLocator {
    fn master_file_path(&self, base_name: &str) -> PathBuf {
        self.root.join(format!("{base_name}.{MASTER_FILE_EXT}"))
    }

    fn tile_path(&self, base_name: &str, tile_x: u32, flipped_tile_z: u32, file_ext: &str) -> PathBuf {
        self.root
            .join(tile_file_name(base_name, tile_x, flipped_tile_z, file_ext))
    }
}
