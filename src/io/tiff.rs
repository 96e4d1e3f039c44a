//! TIFF slide source.
//!
//! A [`SlideSource`] over plain and pyramidal TIFF files using the `tiff`
//! crate's chunked decoder. Successive directories are treated as the
//! resolution ladder of the main image, so a pyramidal TIFF enumerates
//! as one MainImage series with levels 0..n. Region reads decode only
//! the strips/tiles that intersect the request, keeping reads bounded by
//! the caller's budget plus one source chunk.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::Array3;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tracing::info;

use crate::core::catalog::SceneShape;
use crate::core::metadata::{ChannelInfo, MetadataRecord};
use crate::core::tile::PixelBuffer;
use crate::io::source::{RawScene, SlideSource, SourceError};
use crate::types::PixelType;

#[derive(Debug, Clone)]
struct TiffSceneInfo {
    name: String,
    width: u64,
    height: u64,
    channels: usize,
    pixel_type: PixelType,
}

pub struct TiffSource {
    path: PathBuf,
    scenes: Vec<TiffSceneInfo>,
    decoder: Mutex<Decoder<BufReader<File>>>,
}

impl TiffSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;

        // Whole-slide sources carry large strips/tiles; raise the decode
        // limits well past the defaults.
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024;
        limits.ifd_value_size = 1024 * 1024 * 1024;
        limits.intermediate_buffer_size = 1024 * 1024 * 1024;

        let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(limits);
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut scenes = Vec::new();
        loop {
            let (width, height) = decoder.dimensions()?;
            let (channels, pixel_type) = map_color_type(decoder.colortype()?)?;
            let name = if scenes.is_empty() {
                file_name.clone()
            } else {
                format!("{} #{}", file_name, scenes.len())
            };
            scenes.push(TiffSceneInfo {
                name,
                width: width as u64,
                height: height as u64,
                channels,
                pixel_type,
            });
            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
        }

        info!("tiff: opened {:?} with {} directorie(s)", path, scenes.len());
        Ok(TiffSource {
            path: path.to_path_buf(),
            scenes,
            decoder: Mutex::new(decoder),
        })
    }

    fn scene(&self, scene_index: usize) -> Result<&TiffSceneInfo, SourceError> {
        self.scenes
            .get(scene_index)
            .ok_or(SourceError::SceneNotFound { scene_index })
    }
}

fn map_color_type(color_type: ColorType) -> Result<(usize, PixelType), SourceError> {
    match color_type {
        ColorType::Gray(8) => Ok((1, PixelType::U8)),
        ColorType::Gray(16) => Ok((1, PixelType::U16)),
        ColorType::RGB(8) => Ok((3, PixelType::U8)),
        ColorType::RGB(16) => Ok((3, PixelType::U16)),
        ColorType::RGBA(8) => Ok((4, PixelType::U8)),
        other => Err(SourceError::Unsupported(format!(
            "TIFF color type {:?}",
            other
        ))),
    }
}

/// Copy the overlap of one decoded chunk into the planar output region.
#[allow(clippy::too_many_arguments)]
fn copy_chunk<T: Copy>(
    out: &mut Array3<T>,
    chunk: &[T],
    channels: usize,
    chunk_w: usize,
    chunk_origin: (u64, u64),
    chunk_dims: (u64, u64),
    region_origin: (u64, u64),
) {
    let (_, out_h, out_w) = out.dim();
    let (cy0, cx0) = chunk_origin;
    let (ch, cw) = chunk_dims;
    let (ry0, rx0) = region_origin;
    let y_start = ry0.max(cy0);
    let y_end = (ry0 + out_h as u64).min(cy0 + ch);
    let x_start = rx0.max(cx0);
    let x_end = (rx0 + out_w as u64).min(cx0 + cw);
    for gy in y_start..y_end {
        for gx in x_start..x_end {
            let src = ((gy - cy0) as usize * chunk_w + (gx - cx0) as usize) * channels;
            for c in 0..channels {
                out[[c, (gy - ry0) as usize, (gx - rx0) as usize]] = chunk[src + c];
            }
        }
    }
}

impl SlideSource for TiffSource {
    fn source_path(&self) -> &Path {
        &self.path
    }

    fn format_name(&self) -> &'static str {
        "TIFF"
    }

    fn enumerate(&self) -> Result<Vec<RawScene>, SourceError> {
        Ok(self
            .scenes
            .iter()
            .enumerate()
            .map(|(index, scene)| RawScene {
                index,
                name: scene.name.clone(),
                shape: SceneShape {
                    planes: 1,
                    channels: scene.channels,
                    height: scene.height,
                    width: scene.width,
                },
                pixel_type: scene.pixel_type,
                physical_pixel_size: None,
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
        let scene = self.scene(scene_index)?.clone();
        if plane != 0 || y + height > scene.height || x + width > scene.width {
            return Err(SourceError::RegionOutOfBounds {
                scene_index,
                plane,
                y,
                x,
                height,
                width,
            });
        }

        let mut decoder = match self.decoder.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        decoder.seek_to_image(scene_index)?;

        let (chunk_w, chunk_h) = decoder.chunk_dimensions();
        let (chunk_w, chunk_h) = (chunk_w as u64, chunk_h as u64);
        let chunks_across = scene.width.div_ceil(chunk_w);

        let mut out = PixelBuffer::zeros(
            scene.pixel_type,
            scene.channels,
            height as usize,
            width as usize,
        );

        let row0 = y / chunk_h;
        let row1 = (y + height - 1) / chunk_h;
        let col0 = x / chunk_w;
        let col1 = (x + width - 1) / chunk_w;
        for chunk_row in row0..=row1 {
            for chunk_col in col0..=col1 {
                let index = (chunk_row * chunks_across + chunk_col) as u32;
                let (data_w, data_h) = decoder.chunk_data_dimensions(index);
                let origin = (chunk_row * chunk_h, chunk_col * chunk_w);
                let dims = (data_h as u64, data_w as u64);
                match (decoder.read_chunk(index)?, &mut out) {
                    (DecodingResult::U8(chunk), PixelBuffer::U8(a)) => copy_chunk(
                        a,
                        &chunk,
                        scene.channels,
                        data_w as usize,
                        origin,
                        dims,
                        (y, x),
                    ),
                    (DecodingResult::U16(chunk), PixelBuffer::U16(a)) => copy_chunk(
                        a,
                        &chunk,
                        scene.channels,
                        data_w as usize,
                        origin,
                        dims,
                        (y, x),
                    ),
                    (DecodingResult::F32(chunk), PixelBuffer::F32(a)) => copy_chunk(
                        a,
                        &chunk,
                        scene.channels,
                        data_w as usize,
                        origin,
                        dims,
                        (y, x),
                    ),
                    _ => {
                        return Err(SourceError::Unsupported(
                            "TIFF chunk sample type does not match directory color type".into(),
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    fn scene_metadata(&self, scene_index: usize) -> Result<MetadataRecord, SourceError> {
        let scene = self.scene(scene_index)?.clone();
        let mut tags = BTreeMap::new();
        let mut acquisition_time = None;

        let mut decoder = match self.decoder.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        decoder.seek_to_image(scene_index)?;
        if let Ok(Some(value)) = decoder.find_tag(tiff::tags::Tag::ImageDescription) {
            if let Ok(text) = value.into_string() {
                tags.insert("image_description".to_string(), text);
            }
        }
        if let Ok(Some(value)) = decoder.find_tag(tiff::tags::Tag::DateTime) {
            if let Ok(text) = value.into_string() {
                acquisition_time = Some(text);
            }
        }
        if let Ok(Some(value)) = decoder.find_tag(tiff::tags::Tag::Software) {
            if let Ok(text) = value.into_string() {
                tags.insert("software".to_string(), text);
            }
        }
        drop(decoder);

        Ok(MetadataRecord {
            source_file: self
                .path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_format: self.format_name().to_string(),
            scene_index,
            scene_name: scene.name,
            pyramid_level: 0,
            physical_pixel_size: None,
            channels: (0..scene.channels)
                .map(|i| ChannelInfo::named(format!("Channel {}", i)))
                .collect(),
            acquisition_time,
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{TiffEncoder, colortype};

    fn ramp(width: usize, height: usize) -> Vec<u8> {
        (0..width * height).map(|i| (i % 251) as u8).collect()
    }

    fn write_pyramid_tiff(path: &Path) -> (Vec<u8>, Vec<u8>) {
        let level0 = ramp(64, 64);
        let level1 = ramp(32, 32);
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        encoder
            .write_image::<colortype::Gray8>(64, 64, &level0)
            .unwrap();
        encoder
            .write_image::<colortype::Gray8>(32, 32, &level1)
            .unwrap();
        (level0, level1)
    }

    #[test]
    fn directories_enumerate_as_pyramid_levels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.tif");
        write_pyramid_tiff(&path);

        let source = TiffSource::open(&path).unwrap();
        let scenes = source.enumerate().unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].name, "slide.tif");
        assert_eq!(scenes[1].name, "slide.tif #1");
        assert_eq!(scenes[0].shape.width, 64);
        assert_eq!(scenes[1].shape.width, 32);
        assert_eq!(scenes[0].pixel_type, PixelType::U8);
    }

    #[test]
    fn region_read_matches_encoded_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.tif");
        let (level0, level1) = write_pyramid_tiff(&path);

        let source = TiffSource::open(&path).unwrap();
        let region = source.read_region(0, 0, 10, 20, 16, 24).unwrap();
        match &region {
            PixelBuffer::U8(a) => {
                assert_eq!(a.dim(), (1, 16, 24));
                for dy in 0..16usize {
                    for dx in 0..24usize {
                        assert_eq!(a[[0, dy, dx]], level0[(10 + dy) * 64 + 20 + dx]);
                    }
                }
            }
            _ => panic!("expected u8 buffer"),
        }

        let region = source.read_region(1, 0, 0, 0, 32, 32).unwrap();
        match &region {
            PixelBuffer::U8(a) => {
                assert_eq!(a[[0, 31, 31]], level1[31 * 32 + 31]);
            }
            _ => panic!("expected u8 buffer"),
        }
    }

    #[test]
    fn oversized_region_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.tif");
        write_pyramid_tiff(&path);

        let source = TiffSource::open(&path).unwrap();
        let err = source.read_region(0, 0, 60, 60, 10, 10).unwrap_err();
        assert!(matches!(err, SourceError::RegionOutOfBounds { .. }));
        let err = source.read_region(0, 1, 0, 0, 4, 4).unwrap_err();
        assert!(matches!(err, SourceError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn rgb_directories_report_three_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tif");
        let data: Vec<u8> = (0..16 * 16 * 3).map(|i| (i % 255) as u8).collect();
        let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
        encoder
            .write_image::<colortype::RGB8>(16, 16, &data)
            .unwrap();

        let source = TiffSource::open(&path).unwrap();
        let scenes = source.enumerate().unwrap();
        assert_eq!(scenes[0].shape.channels, 3);

        let region = source.read_region(0, 0, 2, 3, 4, 4).unwrap();
        match &region {
            PixelBuffer::U8(a) => {
                // interleaved source: pixel (2,3), channel 1
                assert_eq!(a[[1, 0, 0]], data[(2 * 16 + 3) * 3 + 1]);
            }
            _ => panic!("expected u8 buffer"),
        }
    }
}
