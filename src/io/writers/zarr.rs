//! Zarr v2 directory-store writer.
//!
//! Emits one array store per output: a root group with multiscale and
//! channel attributes, plus array `0` holding the plane set in TCZYX
//! order. The chunk grid is derived from the planner's tile edge (one
//! incoming tile maps to one chunk per channel), so writing stays
//! append-only. Edge chunks are zero-padded to the full chunk extent as
//! the format requires; the declared array shape keeps the true plane
//! dimensions.
use std::io::Write;
use std::path::PathBuf;

use flate2::write::ZlibEncoder;
use serde_json::json;
use tracing::info;

use crate::core::catalog::SceneShape;
use crate::core::metadata::MetadataWarning;
use crate::core::tile::Tile;
use crate::io::writers::metadata::{hex_color, pixel_size_micrometers, zarr_dtype};
use crate::io::writers::{WriteSummary, WriterConfig, WriterError};
use crate::types::{Compression, PixelType};

pub struct ZarrWriter {
    root: PathBuf,
    array_dir: PathBuf,
    shape: SceneShape,
    pixel_type: PixelType,
    chunk_edge: u64,
    rows: u64,
    cols: u64,
    compression: Compression,
    compression_level: u8,
    bytes_written: u64,
    expected_tiles: usize,
    received_tiles: usize,
    warnings: Vec<MetadataWarning>,
}

impl ZarrWriter {
    pub fn open(config: &WriterConfig<'_>) -> Result<(Self, Vec<MetadataWarning>), WriterError> {
        let shape = *config.shape;
        let record = config.metadata;
        let mut warnings = Vec::new();
        let (pixel_size, mut size_warnings) = pixel_size_micrometers(record, "ome-zarr");
        warnings.append(&mut size_warnings);
        if record.acquisition_time.is_some() {
            warnings.push(MetadataWarning::dropped(
                "acquisition_time",
                "ome-zarr",
                "no multiscales equivalent",
            ));
        }
        if !record.tags.is_empty() {
            warnings.push(MetadataWarning::dropped(
                "free-form source tags",
                "ome-zarr",
                "no multiscales equivalent",
            ));
        }

        let root = config.path.to_path_buf();
        let array_dir = root.join("0");
        std::fs::create_dir_all(&array_dir)?;

        let mut writer = ZarrWriter {
            root,
            array_dir,
            shape,
            pixel_type: config.pixel_type,
            chunk_edge: config.tile_edge,
            rows: shape.height.div_ceil(config.tile_edge),
            cols: shape.width.div_ceil(config.tile_edge),
            compression: config.options.compression,
            compression_level: config.options.compression_level,
            bytes_written: 0,
            expected_tiles: 0,
            received_tiles: 0,
            // Translation warnings are handed back from `open`; the
            // summary only reports warnings raised while streaming.
            warnings: Vec::new(),
        };
        writer.expected_tiles = shape.planes * (writer.rows * writer.cols) as usize;

        writer.write_json(
            &writer.root.join(".zgroup"),
            &json!({ "zarr_format": 2 }),
        )?;

        let (scale_y, scale_x, scale_z) = match pixel_size {
            Some((x, y, z)) => (y, x, z.unwrap_or(1.0)),
            None => (1.0, 1.0, 1.0),
        };
        let channels: Vec<serde_json::Value> = record
            .channels
            .iter()
            .map(|c| {
                json!({
                    "label": c.name,
                    "color": c.color.map(hex_color).unwrap_or_else(|| "FFFFFF".to_string()),
                })
            })
            .collect();
        let root_attrs = json!({
            "multiscales": [{
                "version": "0.4",
                "name": record.scene_name,
                "axes": [
                    { "name": "t", "type": "time" },
                    { "name": "c", "type": "channel" },
                    { "name": "z", "type": "space", "unit": "micrometer" },
                    { "name": "y", "type": "space", "unit": "micrometer" },
                    { "name": "x", "type": "space", "unit": "micrometer" },
                ],
                "datasets": [{
                    "path": "0",
                    "coordinateTransformations": [{
                        "type": "scale",
                        "scale": [1.0, 1.0, scale_z, scale_y, scale_x],
                    }],
                }],
            }],
            "omero": { "channels": channels },
        });
        writer.write_json(&writer.root.join(".zattrs"), &root_attrs)?;

        let compressor = match writer.compression {
            Compression::None => serde_json::Value::Null,
            Compression::Gzip => json!({ "id": "zlib", "level": writer.compression_level }),
        };
        let zarray = json!({
            "zarr_format": 2,
            "shape": [1, shape.channels, shape.planes, shape.height, shape.width],
            "chunks": [1, 1, 1, writer.chunk_edge, writer.chunk_edge],
            "dtype": zarr_dtype(writer.pixel_type),
            "compressor": compressor,
            "fill_value": 0,
            "order": "C",
            "filters": serde_json::Value::Null,
            "dimension_separator": ".",
        });
        writer.write_json(&writer.array_dir.join(".zarray"), &zarray)?;
        writer.write_json(
            &writer.array_dir.join(".zattrs"),
            &json!({ "_ARRAY_DIMENSIONS": ["t", "c", "z", "y", "x"] }),
        )?;

        info!(
            "zarr: opened {:?}, chunk grid {}x{} per channel plane",
            writer.root, writer.rows, writer.cols
        );
        Ok((writer, warnings))
    }

    fn write_json(&mut self, path: &std::path::Path, value: &serde_json::Value) -> Result<(), WriterError> {
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(path, &text)?;
        self.bytes_written += text.len() as u64;
        Ok(())
    }

    fn encode_chunk(&self, raw: Vec<u8>) -> Result<Vec<u8>, WriterError> {
        match self.compression {
            Compression::None => Ok(raw),
            Compression::Gzip => {
                let mut encoder = ZlibEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(self.compression_level as u32),
                );
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
        }
    }
}

impl crate::io::writers::FormatWriter for ZarrWriter {
    fn append_tile(&mut self, tile: &Tile) -> Result<(), WriterError> {
        if tile.data.pixel_type() != self.pixel_type {
            return Err(WriterError::TileMismatch {
                detail: format!(
                    "expected {} samples, got {}",
                    self.pixel_type,
                    tile.data.pixel_type()
                ),
            });
        }
        let region = &tile.region;
        if region.y != region.row * self.chunk_edge || region.x != region.col * self.chunk_edge {
            return Err(WriterError::TileMismatch {
                detail: format!(
                    "tile at y={} x={} is not aligned to the {} chunk grid",
                    region.y, region.x, self.chunk_edge
                ),
            });
        }

        let edge = self.chunk_edge as usize;
        for channel in 0..self.shape.channels {
            let raw = tile.data.channel_plane_padded_bytes(channel, edge, edge);
            let encoded = self.encode_chunk(raw)?;
            // Chunk keys follow TCZYX: t.c.z.y.x with dot separators.
            let key = format!(
                "0.{}.{}.{}.{}",
                channel, region.plane, region.row, region.col
            );
            std::fs::write(self.array_dir.join(&key), &encoded)?;
            self.bytes_written += encoded.len() as u64;
        }
        self.received_tiles += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<WriteSummary, WriterError> {
        if self.received_tiles != self.expected_tiles {
            return Err(WriterError::IncompleteStream {
                expected: self.expected_tiles,
                received: self.received_tiles,
            });
        }
        info!(
            "zarr: finalized {:?} ({} chunk file(s))",
            self.root,
            self.received_tiles * self.shape.channels
        );
        Ok(WriteSummary {
            bytes_written: self.bytes_written,
            warnings: self.warnings.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::{ChannelInfo, PhysicalPixelSize};
    use crate::core::naming::OutputNamer;
    use crate::core::pipeline::{CancelToken, ConversionJob, ConversionOptions};
    use crate::core::selector::SelectionRequest;
    use crate::io::memory::{MemoryScene, MemorySource, SceneData};
    use crate::io::source::SlideSource;
    use crate::types::{SceneCategory, TargetFormat};
    use std::io::Read;

    fn convert_zarr(
        source: &MemorySource,
        dir: &std::path::Path,
        budget: usize,
        compression: Compression,
    ) -> std::path::PathBuf {
        let job = ConversionJob {
            input: source.source_path().to_path_buf(),
            request: SelectionRequest::Category {
                category: SceneCategory::MainImage,
                level: 0,
            },
            output: dir.join("out.zarr"),
            format: TargetFormat::OmeZarr,
            options: ConversionOptions {
                byte_budget: budget,
                compression,
                ..Default::default()
            },
        };
        crate::core::pipeline::convert(&job, source, &OutputNamer::new(), &CancelToken::new(), None)
            .unwrap()
            .output_path
    }

    #[test]
    fn zarray_metadata_matches_plane() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u16("slide.vsi", 1, 2, 48, 80)
            .with_pixel_size(PhysicalPixelSize::micrometers(0.25, 0.3))
            .with_channels(vec![
                ChannelInfo {
                    name: "DAPI".into(),
                    color: Some([0, 0, 255]),
                },
                ChannelInfo::named("GFP"),
            ]);
        let source = MemorySource::new("slide.vsi", vec![scene]);
        let output = convert_zarr(&source, dir.path(), 32 * 32 * 2 * 2, Compression::None);

        let zarray: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(output.join("0/.zarray")).unwrap(),
        )
        .unwrap();
        assert_eq!(zarray["shape"], serde_json::json!([1, 2, 1, 48, 80]));
        assert_eq!(zarray["chunks"], serde_json::json!([1, 1, 1, 32, 32]));
        assert_eq!(zarray["dtype"], "<u2");
        assert!(zarray["compressor"].is_null());

        let attrs: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(output.join(".zattrs")).unwrap(),
        )
        .unwrap();
        assert_eq!(attrs["multiscales"][0]["datasets"][0]["path"], "0");
        // scale is [t, c, z, y, x]
        assert_eq!(
            attrs["multiscales"][0]["datasets"][0]["coordinateTransformations"][0]["scale"][4],
            0.25
        );
        assert_eq!(attrs["omero"]["channels"][0]["label"], "DAPI");
        assert_eq!(attrs["omero"]["channels"][0]["color"], "0000FF");
    }

    #[test]
    fn raw_chunk_bytes_match_source_with_padding() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u8("slide.vsi", 1, 1, 40, 40);
        let expected = match &scene.data {
            SceneData::U8(a) => a.clone(),
            _ => unreachable!(),
        };
        let source = MemorySource::new("slide.vsi", vec![scene]);
        // 32px chunks over a 40px plane: edge chunks are padded.
        let output = convert_zarr(&source, dir.path(), 32 * 32, Compression::None);

        let chunk = std::fs::read(output.join("0/0.0.0.0.0")).unwrap();
        assert_eq!(chunk.len(), 32 * 32);
        assert_eq!(chunk[0], expected[[0, 0, 0, 0]]);
        assert_eq!(chunk[32 * 5 + 7], expected[[0, 0, 5, 7]]);

        // Bottom-right edge chunk holds an 8x8 corner, zero-padded.
        let edge_chunk = std::fs::read(output.join("0/0.0.0.1.1")).unwrap();
        assert_eq!(edge_chunk.len(), 32 * 32);
        assert_eq!(edge_chunk[0], expected[[0, 0, 32, 32]]);
        assert_eq!(edge_chunk[8], 0, "beyond-boundary columns are fill");
    }

    #[test]
    fn zlib_chunks_decompress_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u8("slide.vsi", 1, 1, 32, 32);
        let expected = match &scene.data {
            SceneData::U8(a) => a.clone(),
            _ => unreachable!(),
        };
        let source = MemorySource::new("slide.vsi", vec![scene]);
        let output = convert_zarr(&source, dir.path(), 32 * 32, Compression::Gzip);

        let zarray: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(output.join("0/.zarray")).unwrap(),
        )
        .unwrap();
        assert_eq!(zarray["compressor"]["id"], "zlib");

        let compressed = std::fs::read(output.join("0/0.0.0.0.0")).unwrap();
        let mut decoder = flate2::read::ZlibDecoder::new(compressed.as_slice());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).unwrap();
        assert_eq!(raw.len(), 32 * 32);
        assert_eq!(raw[3], expected[[0, 0, 0, 3]]);
    }

    #[test]
    fn chunk_count_covers_multi_plane_scene() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(
            "slide.vsi",
            vec![MemoryScene::ramp_u8("slide.vsi", 2, 3, 40, 40)],
        );
        let output = convert_zarr(&source, dir.path(), 32 * 32 * 3, Compression::None);

        let chunks = std::fs::read_dir(output.join("0"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .count();
        // 2 planes x 3 channels x 2x2 grid
        assert_eq!(chunks, 24);
    }
}
