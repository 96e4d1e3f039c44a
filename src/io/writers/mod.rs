//! Format writers.
//!
//! Every backend is a pure streaming consumer: it accepts tiles in the
//! exact order the chunk planner produces them and never seeks back into
//! pixel data it has already written. Each writer exclusively owns its
//! output handle until `finalize`.
use std::path::Path;

use thiserror::Error;

use crate::core::catalog::SceneShape;
use crate::core::metadata::{MetadataRecord, MetadataWarning};
use crate::core::pipeline::ConversionOptions;
use crate::core::tile::Tile;
use crate::types::{PixelType, TargetFormat};

pub mod metadata;
pub mod ome_tiff;
pub mod univ;
pub mod zarr;

pub use ome_tiff::OmeTiffWriter;
pub use univ::UnivWriter;
pub use zarr::ZarrWriter;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error(
        "tile out of order: expected tile {expected_index} (plane {expected_plane}, row {expected_row}, col {expected_col}), got plane {plane}, row {row}, col {col}"
    )]
    TileOrder {
        expected_index: usize,
        expected_plane: usize,
        expected_row: u64,
        expected_col: u64,
        plane: usize,
        row: u64,
        col: u64,
    },

    #[error("tile data mismatch: {detail}")]
    TileMismatch { detail: String },

    #[error("incomplete tile stream: expected {expected} tiles, received {received}")]
    IncompleteStream { expected: usize, received: usize },

    #[error("metadata encoding error: {0}")]
    Metadata(String),
}

/// Everything a writer needs at open time.
pub struct WriterConfig<'a> {
    pub path: &'a Path,
    pub shape: &'a SceneShape,
    pub pixel_type: PixelType,
    pub metadata: &'a MetadataRecord,
    pub options: &'a ConversionOptions,
    /// Tile edge chosen by the chunk planner; fixes the tile/chunk grid
    /// for the grid-based backends.
    pub tile_edge: u64,
}

/// Summary returned by a successful `finalize`.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub bytes_written: u64,
    pub warnings: Vec<MetadataWarning>,
}

/// Append-only consumer of the planner's tile stream.
pub trait FormatWriter {
    /// Accept the next tile. Tiles must arrive in exact planner order.
    fn append_tile(&mut self, tile: &Tile) -> Result<(), WriterError>;

    /// Flush auxiliary structures and close the output.
    fn finalize(self: Box<Self>) -> Result<WriteSummary, WriterError>;
}

/// Open the writer backend for `format`. Returns the writer plus any
/// metadata-translation warnings produced while mapping the record onto
/// the target schema.
pub fn open_writer(
    format: TargetFormat,
    config: &WriterConfig<'_>,
) -> Result<(Box<dyn FormatWriter>, Vec<MetadataWarning>), WriterError> {
    match format {
        TargetFormat::Univ => {
            let (writer, warnings) = UnivWriter::open(config)?;
            Ok((Box::new(writer), warnings))
        }
        TargetFormat::OmeTiff => {
            let (writer, warnings) = OmeTiffWriter::open(config)?;
            Ok((Box::new(writer), warnings))
        }
        TargetFormat::OmeZarr => {
            let (writer, warnings) = ZarrWriter::open(config)?;
            Ok((Box::new(writer), warnings))
        }
    }
}
