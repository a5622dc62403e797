//! # Stratum Mosaic
//!
//! Sparse, tile-subdivided raster datasets streamed on demand.
//!
//! ## Design Principles
//!
//! 1. **Lazy**: Tiles load on first touch or when the camera comes near
//! 2. **Sparse**: Tiles that never existed cost nothing until written
//! 3. **Power-of-two**: Sample and tile addressing is shift/mask arithmetic
//! 4. **Explicit saves**: Nothing reaches disk until `save` is called
//!
//! ## Core Components
//!
//! - `MosaicDescription`: Dataset metadata and the master-file format
//! - `Mosaic`: Generic tile grid with preloading and dirty tracking
//! - `DataMosaic`: Raw 8/16/24/32-bit sample tiles
//! - `HeightfieldMosaic`: Heights in millimeters with bilinear edits
//! - `TextureMosaic`: Splat tiles with UV windows and packed layer indices
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum_mosaic::{HeightfieldMosaic, MosaicConfig, MosaicStorage};
//!
//! let storage = MosaicStorage::png_directory("world/height");
//! let mut height = HeightfieldMosaic::open("height", storage, &MosaicConfig::default())?;
//!
//! height.camera_moved(120.0, -40.0)?;
//! height.set_world_height_mm(120.0, -40.0, 15_000.0)?;
//! height.save(false)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod codec;
pub mod config;
pub mod data;
pub mod description;
pub mod error;
pub mod heightfield;
pub mod locator;
pub mod mosaic;
pub mod texture;
pub mod tile;

pub use codec::{ImageCodec, MemoryCodec, PixelData, PngCodec, RawImage};
pub use config::MosaicConfig;
pub use data::{DataMosaic, DataMosaicTile, SampleDepth, TileData};
pub use description::{MosaicDescription, MosaicLayout, MASTER_FILE_EXT};
pub use error::{MosaicError, MosaicResult};
pub use heightfield::{height_to_raw, raw_to_height, HeightfieldMosaic, MM_PER_M};
pub use locator::{tile_file_name, DirectoryLocator, ResourceLocator};
pub use mosaic::{Mosaic, MosaicEvent, MosaicStorage, SamplePos, TileSample};
pub use texture::{TextureMosaic, TextureWindow};
pub use tile::{MosaicTile, TileContext, TileCoord, TileFormat, TileNotice, TileSeed};
