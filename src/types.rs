//! Shared types and enums used across SLIDEPRO.
//! Includes `SceneCategory`, `PixelType`, `TargetFormat`, and `Compression`.
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Classification of one scene inside a multi-series source file.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize,
)]
pub enum SceneCategory {
    MainImage,
    Overview,
    Label,
    Macro,
    Unknown,
}

impl SceneCategory {
    /// Only MainImage series carry more than one resolution level.
    pub fn is_pyramidal(self) -> bool {
        matches!(self, SceneCategory::MainImage)
    }
}

impl std::fmt::Display for SceneCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SceneCategory::MainImage => "MainImage",
            SceneCategory::Overview => "Overview",
            SceneCategory::Label => "Label",
            SceneCategory::Macro => "Macro",
            SceneCategory::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Pixel sample type of a scene.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
    F32,
}

impl PixelType {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
            PixelType::F32 => 4,
        }
    }

    pub const fn bits_per_sample(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PixelType::U8 => "uint8",
            PixelType::U16 => "uint16",
            PixelType::F32 => "float",
        };
        write!(f, "{}", s)
    }
}

/// Output container format.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum TargetFormat {
    /// Self-describing HDF5 container (`.univ`).
    Univ,
    /// BigTIFF with embedded OME-XML (`.ome.tif`).
    OmeTiff,
    /// Zarr v2 directory store (`.zarr`).
    OmeZarr,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Univ => ".univ",
            TargetFormat::OmeTiff => ".ome.tif",
            TargetFormat::OmeZarr => ".zarr",
        }
    }

    /// Directory-shaped outputs need recursive cleanup on abort.
    pub fn is_directory(self) -> bool {
        matches!(self, TargetFormat::OmeZarr)
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetFormat::Univ => "univ",
            TargetFormat::OmeTiff => "ome-tiff",
            TargetFormat::OmeZarr => "ome-zarr",
        };
        write!(f, "{}", s)
    }
}

/// Block compression applied by the format writers. `Gzip` maps to the
/// deflate family native to each container (HDF5 deflate, TIFF Adobe
/// deflate, Zarr zlib codec).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum Compression {
    None,
    Gzip,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
        };
        write!(f, "{}", s)
    }
}
