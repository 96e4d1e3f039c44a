//! Metadata carried from a source scene to a format writer.
//!
//! The record travels untouched except for unit/axis-order translation
//! inside the writers; fields a target format cannot express are dropped
//! there and surfaced as [`MetadataWarning`]s, never as failures.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-axis physical pixel size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPixelSize {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    /// Unit as reported by the source, e.g. "µm" or "nm".
    pub unit: String,
}

impl PhysicalPixelSize {
    pub fn micrometers(x: f64, y: f64) -> Self {
        PhysicalPixelSize {
            x,
            y,
            z: None,
            unit: "µm".to_string(),
        }
    }
}

/// Channel name and optional display color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub color: Option<[u8; 3]>,
}

impl ChannelInfo {
    pub fn named(name: impl Into<String>) -> Self {
        ChannelInfo {
            name: name.into(),
            color: None,
        }
    }
}

/// Everything a writer may persist about the converted scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub source_file: String,
    pub source_format: String,
    pub scene_index: usize,
    pub scene_name: String,
    pub pyramid_level: u32,
    pub physical_pixel_size: Option<PhysicalPixelSize>,
    pub channels: Vec<ChannelInfo>,
    /// Acquisition timestamp as reported by the source (RFC 3339 where
    /// the source provides one).
    pub acquisition_time: Option<String>,
    /// Free-form vendor tags, passed through verbatim where possible.
    pub tags: BTreeMap<String, String>,
}

/// Non-fatal loss during metadata translation, accumulated and returned
/// with the conversion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataWarning {
    /// The source field that could not be carried over.
    pub field: String,
    /// Target format the field was dropped for.
    pub target: String,
    pub reason: String,
}

impl MetadataWarning {
    pub fn dropped(field: impl Into<String>, target: impl Into<String>, reason: impl Into<String>) -> Self {
        MetadataWarning {
            field: field.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for MetadataWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "metadata field `{}` dropped for {}: {}",
            self.field, self.target, self.reason
        )
    }
}
