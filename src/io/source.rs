//! The decoder-adapter capability consumed by the pipeline.
//!
//! Vendor binary parsing lives behind [`SlideSource`]; this crate only
//! relies on scene enumeration and bounded region reads. Callers must
//! never request a region whose byte size exceeds their declared budget;
//! the chunk planner guarantees that for pipeline reads.
use std::path::Path;

use thiserror::Error;

use crate::core::catalog::SceneShape;
use crate::core::metadata::{MetadataRecord, PhysicalPixelSize};
use crate::core::tile::PixelBuffer;
use crate::types::PixelType;

/// One scene as reported by the underlying decoder, before
/// classification.
#[derive(Debug, Clone)]
pub struct RawScene {
    pub index: usize,
    pub name: String,
    pub shape: SceneShape,
    pub pixel_type: PixelType,
    pub physical_pixel_size: Option<PhysicalPixelSize>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF decode error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("scene {scene_index} not found in source")]
    SceneNotFound { scene_index: usize },

    #[error(
        "region plane={plane} y={y} x={x} {height}x{width} out of bounds for scene {scene_index}"
    )]
    RegionOutOfBounds {
        scene_index: usize,
        plane: usize,
        y: u64,
        x: u64,
        height: u64,
        width: u64,
    },

    #[error("region mismatch reading scene {scene_index}: {detail}")]
    RegionMismatch { scene_index: usize, detail: String },

    #[error("unsupported source data: {0}")]
    Unsupported(String),
}

/// Chunk-addressable, read-only access to a multi-scene image source.
pub trait SlideSource {
    /// Path the source was opened from; its base name drives scene
    /// classification.
    fn source_path(&self) -> &Path;

    /// Short format label for provenance metadata.
    fn format_name(&self) -> &'static str;

    /// Report every scene. Invoked once per catalog build.
    fn enumerate(&self) -> Result<Vec<RawScene>, SourceError>;

    /// Read exactly the requested region of one plane, all channels.
    fn read_region(
        &self,
        scene_index: usize,
        plane: usize,
        y: u64,
        x: u64,
        height: u64,
        width: u64,
    ) -> Result<PixelBuffer, SourceError>;

    /// Source-level metadata for one scene (calibration, channels,
    /// acquisition time, vendor tags).
    fn scene_metadata(&self, scene_index: usize) -> Result<MetadataRecord, SourceError>;
}
