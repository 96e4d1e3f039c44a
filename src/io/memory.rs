//! In-memory slide source.
//!
//! Serves fully materialized scenes from RAM. Used by the test suite and
//! as the embedding path for callers that already hold decoded pixel
//! data and only want the conversion pipeline.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array4, s};

use crate::core::catalog::SceneShape;
use crate::core::metadata::{ChannelInfo, MetadataRecord, PhysicalPixelSize};
use crate::core::tile::PixelBuffer;
use crate::io::source::{RawScene, SlideSource, SourceError};
use crate::types::PixelType;

/// Pixel data of one scene, planar (planes, channels, height, width).
#[derive(Debug, Clone)]
pub enum SceneData {
    U8(Array4<u8>),
    U16(Array4<u16>),
    F32(Array4<f32>),
}

impl SceneData {
    pub fn pixel_type(&self) -> PixelType {
        match self {
            SceneData::U8(_) => PixelType::U8,
            SceneData::U16(_) => PixelType::U16,
            SceneData::F32(_) => PixelType::F32,
        }
    }

    pub fn shape(&self) -> SceneShape {
        let (p, c, h, w) = match self {
            SceneData::U8(a) => a.dim(),
            SceneData::U16(a) => a.dim(),
            SceneData::F32(a) => a.dim(),
        };
        SceneShape {
            planes: p,
            channels: c,
            height: h as u64,
            width: w as u64,
        }
    }

    fn slice_region(&self, plane: usize, y: u64, x: u64, height: u64, width: u64) -> PixelBuffer {
        let (y0, x0) = (y as usize, x as usize);
        let (y1, x1) = (y0 + height as usize, x0 + width as usize);
        match self {
            SceneData::U8(a) => {
                PixelBuffer::U8(a.slice(s![plane, .., y0..y1, x0..x1]).to_owned())
            }
            SceneData::U16(a) => {
                PixelBuffer::U16(a.slice(s![plane, .., y0..y1, x0..x1]).to_owned())
            }
            SceneData::F32(a) => {
                PixelBuffer::F32(a.slice(s![plane, .., y0..y1, x0..x1]).to_owned())
            }
        }
    }
}

/// One scene held in memory, with optional calibration and channel info.
#[derive(Debug, Clone)]
pub struct MemoryScene {
    pub name: String,
    pub data: SceneData,
    pub physical_pixel_size: Option<PhysicalPixelSize>,
    pub channels: Vec<ChannelInfo>,
    pub acquisition_time: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl MemoryScene {
    pub fn new(name: impl Into<String>, data: SceneData) -> Self {
        MemoryScene {
            name: name.into(),
            data,
            physical_pixel_size: None,
            channels: Vec::new(),
            acquisition_time: None,
            tags: BTreeMap::new(),
        }
    }

    /// Synthetic u8 scene with a deterministic ramp fill.
    pub fn ramp_u8(name: impl Into<String>, planes: usize, channels: usize, height: usize, width: usize) -> Self {
        let data = Array4::from_shape_fn((planes, channels, height, width), |(p, c, y, x)| {
            (p * 31 + c * 17 + y * 3 + x) as u8
        });
        Self::new(name, SceneData::U8(data))
    }

    /// Synthetic u16 scene with a deterministic ramp fill.
    pub fn ramp_u16(name: impl Into<String>, planes: usize, channels: usize, height: usize, width: usize) -> Self {
        let data = Array4::from_shape_fn((planes, channels, height, width), |(p, c, y, x)| {
            (p * 7919 + c * 1031 + y * 131 + x) as u16
        });
        Self::new(name, SceneData::U16(data))
    }

    pub fn with_pixel_size(mut self, size: PhysicalPixelSize) -> Self {
        self.physical_pixel_size = Some(size);
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChannelInfo>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A [`SlideSource`] over a vector of in-memory scenes.
#[derive(Debug, Clone)]
pub struct MemorySource {
    path: PathBuf,
    scenes: Vec<MemoryScene>,
}

impl MemorySource {
    pub fn new(path: impl Into<PathBuf>, scenes: Vec<MemoryScene>) -> Self {
        MemorySource {
            path: path.into(),
            scenes,
        }
    }

    fn scene(&self, scene_index: usize) -> Result<&MemoryScene, SourceError> {
        self.scenes
            .get(scene_index)
            .ok_or(SourceError::SceneNotFound { scene_index })
    }
}

impl SlideSource for MemorySource {
    fn source_path(&self) -> &Path {
        &self.path
    }

    fn format_name(&self) -> &'static str {
        "memory"
    }

    fn enumerate(&self) -> Result<Vec<RawScene>, SourceError> {
        Ok(self
            .scenes
            .iter()
            .enumerate()
            .map(|(index, scene)| RawScene {
                index,
                name: scene.name.clone(),
                shape: scene.data.shape(),
                pixel_type: scene.data.pixel_type(),
                physical_pixel_size: scene.physical_pixel_size.clone(),
            })
            .collect())
    }

    fn read_region(
        &self,
        scene_index: usize,
        plane: usize,
        y: u64,
        x: u64,
        height: u64,
        width: u64,
    ) -> Result<PixelBuffer, SourceError> {
        let scene = self.scene(scene_index)?;
        let shape = scene.data.shape();
        if plane >= shape.planes || y + height > shape.height || x + width > shape.width {
            return Err(SourceError::RegionOutOfBounds {
                scene_index,
                plane,
                y,
                x,
                height,
                width,
            });
        }
        Ok(scene.data.slice_region(plane, y, x, height, width))
    }

    fn scene_metadata(&self, scene_index: usize) -> Result<MetadataRecord, SourceError> {
        let scene = self.scene(scene_index)?;
        let shape = scene.data.shape();
        let channels = if scene.channels.is_empty() {
            (0..shape.channels)
                .map(|i| ChannelInfo::named(format!("Channel {}", i)))
                .collect()
        } else {
            scene.channels.clone()
        };
        Ok(MetadataRecord {
            source_file: self
                .path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_format: self.format_name().to_string(),
            scene_index,
            scene_name: scene.name.clone(),
            pyramid_level: 0,
            physical_pixel_size: scene.physical_pixel_size.clone(),
            channels,
            acquisition_time: scene.acquisition_time.clone(),
            tags: scene.tags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_read_matches_backing_array() {
        let src = MemorySource::new("slide.vsi", vec![MemoryScene::ramp_u8("slide.vsi", 1, 2, 8, 8)]);
        let buf = src.read_region(0, 0, 2, 3, 4, 5).unwrap();
        let (c, h, w) = buf.dim();
        assert_eq!((c, h, w), (2, 4, 5));
        match buf {
            PixelBuffer::U8(a) => {
                // ramp fill: p*31 + c*17 + y*3 + x
                assert_eq!(a[[0, 0, 0]], (2 * 3 + 3) as u8);
                assert_eq!(a[[1, 3, 4]], (17 + 5 * 3 + 7) as u8);
            }
            _ => panic!("expected u8 buffer"),
        }
    }

    #[test]
    fn out_of_bounds_region_is_rejected() {
        let src = MemorySource::new("slide.vsi", vec![MemoryScene::ramp_u8("slide.vsi", 1, 1, 8, 8)]);
        let err = src.read_region(0, 0, 4, 4, 8, 8).unwrap_err();
        assert!(matches!(err, SourceError::RegionOutOfBounds { .. }));
        let err = src.read_region(0, 1, 0, 0, 1, 1).unwrap_err();
        assert!(matches!(err, SourceError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn missing_scene_is_rejected() {
        let src = MemorySource::new("slide.vsi", vec![]);
        let err = src.read_region(0, 0, 0, 0, 1, 1).unwrap_err();
        assert!(matches!(err, SourceError::SceneNotFound { .. }));
    }

    #[test]
    fn default_channel_names_are_generated() {
        let src = MemorySource::new("slide.vsi", vec![MemoryScene::ramp_u8("slide.vsi", 1, 3, 4, 4)]);
        let meta = src.scene_metadata(0).unwrap();
        assert_eq!(meta.channels.len(), 3);
        assert_eq!(meta.channels[0].name, "Channel 0");
    }
}
