//! OME-TIFF writer.
//!
//! Streams tiles into a BigTIFF with a fixed tile grid and an OME-XML
//! `ImageDescription` block. Tile data is laid out append-only in exact
//! planner order; directories are written at finalize. The tile edge is
//! fixed for the whole file: partial tiles at the right/bottom plane
//! boundary are zero-padded to the full grid cell, while the declared
//! image shape keeps the true plane dimensions. Multi-plane scenes get
//! one directory per plane.
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::PathBuf;

use flate2::write::ZlibEncoder;
use quick_xml::Writer as XmlWriter;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::info;

use crate::core::catalog::SceneShape;
use crate::core::metadata::{MetadataRecord, MetadataWarning};
use crate::core::tile::Tile;
use crate::io::writers::metadata::{ome_color, ome_pixel_type, pixel_size_micrometers};
use crate::io::writers::{WriteSummary, WriterConfig, WriterError};
use crate::types::{Compression, PixelType};

const OME_NS: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";

// TIFF tag ids.
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_IMAGE_DESCRIPTION: u16 = 270;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_PLANAR_CONFIG: u16 = 284;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_EXTRA_SAMPLES: u16 = 338;
const TAG_SAMPLE_FORMAT: u16 = 339;

// TIFF field types.
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_LONG8: u16 = 16;

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_DEFLATE: u16 = 8;
const PHOTOMETRIC_MINISBLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;

/// One directory entry with its raw value bytes; values longer than the
/// 8-byte inline field are spilled before the directory.
struct IfdEntry {
    tag: u16,
    ftype: u16,
    count: u64,
    data: Vec<u8>,
}

pub struct OmeTiffWriter {
    file: BufWriter<File>,
    path: PathBuf,
    pos: u64,
    shape: SceneShape,
    pixel_type: PixelType,
    tile_edge: u64,
    rows: u64,
    cols: u64,
    compression: Compression,
    compression_level: u8,
    /// Per-plane tile offsets/byte counts, planner order.
    tile_offsets: Vec<Vec<u64>>,
    tile_counts: Vec<Vec<u64>>,
    next_index: usize,
    ome_xml: String,
    warnings: Vec<MetadataWarning>,
}

impl OmeTiffWriter {
    pub fn open(config: &WriterConfig<'_>) -> Result<(Self, Vec<MetadataWarning>), WriterError> {
        let shape = *config.shape;
        let mut warnings = Vec::new();
        let (pixel_size, mut size_warnings) = pixel_size_micrometers(config.metadata, "ome-tiff");
        warnings.append(&mut size_warnings);
        if shape.channels > 1 && config.metadata.channels.len() > 1 {
            warnings.push(MetadataWarning::dropped(
                "channel names beyond the first",
                "ome-tiff",
                "interleaved samples share a single OME channel",
            ));
        }
        if !config.metadata.tags.is_empty() {
            warnings.push(MetadataWarning::dropped(
                "free-form source tags",
                "ome-tiff",
                "no OME-XML equivalent",
            ));
        }
        let ome_xml = build_ome_xml(config.metadata, &shape, config.pixel_type, pixel_size)?;

        let mut file = BufWriter::new(File::create(config.path)?);
        // BigTIFF header: byte order, magic 43, offset size 8, reserved,
        // then the first-directory offset patched in at finalize.
        file.write_all(b"II")?;
        file.write_all(&43u16.to_le_bytes())?;
        file.write_all(&8u16.to_le_bytes())?;
        file.write_all(&0u16.to_le_bytes())?;
        file.write_all(&0u64.to_le_bytes())?;

        let rows = shape.height.div_ceil(config.tile_edge);
        let cols = shape.width.div_ceil(config.tile_edge);
        info!(
            "ome-tiff: opened {:?}, {}x{} tile grid per plane, edge {}",
            config.path, rows, cols, config.tile_edge
        );

        let writer = OmeTiffWriter {
            file,
            path: config.path.to_path_buf(),
            pos: 16,
            shape,
            pixel_type: config.pixel_type,
            tile_edge: config.tile_edge,
            rows,
            cols,
            compression: config.options.compression,
            compression_level: config.options.compression_level,
            tile_offsets: vec![Vec::new(); shape.planes],
            tile_counts: vec![Vec::new(); shape.planes],
            next_index: 0,
            ome_xml,
            // Translation warnings are handed back from `open`; the
            // summary only reports warnings raised while streaming.
            warnings: Vec::new(),
        };
        Ok((writer, warnings))
    }

    fn expected_position(&self) -> (usize, u64, u64) {
        let per_plane = (self.rows * self.cols) as usize;
        let plane = self.next_index / per_plane;
        let rem = (self.next_index % per_plane) as u64;
        (plane, rem / self.cols, rem % self.cols)
    }

    fn pad_to_even(&mut self) -> Result<(), WriterError> {
        if self.pos % 2 == 1 {
            self.file.write_all(&[0u8])?;
            self.pos += 1;
        }
        Ok(())
    }

    fn encode_tile(&self, tile: &Tile) -> Result<Vec<u8>, WriterError> {
        let edge = self.tile_edge as usize;
        let raw = tile.data.interleaved_padded_bytes(edge, edge);
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

    fn plane_entries(&self, plane: usize, first: bool) -> Vec<IfdEntry> {
        let channels = self.shape.channels;
        let photometric = if channels == 3 {
            PHOTOMETRIC_RGB
        } else {
            PHOTOMETRIC_MINISBLACK
        };
        let compression = match self.compression {
            Compression::None => COMPRESSION_NONE,
            Compression::Gzip => COMPRESSION_DEFLATE,
        };
        let sample_format = match self.pixel_type {
            PixelType::U8 | PixelType::U16 => 1u16,
            PixelType::F32 => 3u16,
        };

        let mut entries = vec![
            long_entry(TAG_IMAGE_WIDTH, self.shape.width as u32),
            long_entry(TAG_IMAGE_LENGTH, self.shape.height as u32),
            shorts_entry(
                TAG_BITS_PER_SAMPLE,
                &vec![self.pixel_type.bits_per_sample(); channels],
            ),
            shorts_entry(TAG_COMPRESSION, &[compression]),
            shorts_entry(TAG_PHOTOMETRIC, &[photometric]),
        ];
        if first {
            entries.push(ascii_entry(TAG_IMAGE_DESCRIPTION, &self.ome_xml));
        }
        entries.push(shorts_entry(TAG_SAMPLES_PER_PIXEL, &[channels as u16]));
        entries.push(shorts_entry(TAG_PLANAR_CONFIG, &[1]));
        entries.push(long_entry(TAG_TILE_WIDTH, self.tile_edge as u32));
        entries.push(long_entry(TAG_TILE_LENGTH, self.tile_edge as u32));
        entries.push(long8s_entry(TAG_TILE_OFFSETS, &self.tile_offsets[plane]));
        entries.push(long8s_entry(TAG_TILE_BYTE_COUNTS, &self.tile_counts[plane]));
        let base_samples = if photometric == PHOTOMETRIC_RGB { 3 } else { 1 };
        if channels > base_samples {
            entries.push(shorts_entry(
                TAG_EXTRA_SAMPLES,
                &vec![0u16; channels - base_samples],
            ));
        }
        entries.push(shorts_entry(
            TAG_SAMPLE_FORMAT,
            &vec![sample_format; channels],
        ));
        entries
    }
}

impl crate::io::writers::FormatWriter for OmeTiffWriter {
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
        let (plane, row, col) = self.expected_position();
        let region = &tile.region;
        if region.plane != plane || region.row != row || region.col != col {
            return Err(WriterError::TileOrder {
                expected_index: self.next_index,
                expected_plane: plane,
                expected_row: row,
                expected_col: col,
                plane: region.plane,
                row: region.row,
                col: region.col,
            });
        }

        let encoded = self.encode_tile(tile)?;
        self.pad_to_even()?;
        self.tile_offsets[plane].push(self.pos);
        self.tile_counts[plane].push(encoded.len() as u64);
        self.file.write_all(&encoded)?;
        self.pos += encoded.len() as u64;
        self.next_index += 1;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<WriteSummary, WriterError> {
        let expected = self.shape.planes * (self.rows * self.cols) as usize;
        if self.next_index != expected {
            return Err(WriterError::IncompleteStream {
                expected,
                received: self.next_index,
            });
        }

        self.pad_to_even()?;
        let base = self.pos;

        // Two passes over the directories: first compute every blob and
        // directory offset, then serialize against those offsets.
        let mut ifd_offsets = Vec::with_capacity(self.shape.planes);
        let mut cursor = base;
        for plane in 0..self.shape.planes {
            let entries = self.plane_entries(plane, plane == 0);
            for entry in &entries {
                if entry.data.len() > 8 {
                    cursor += entry.data.len() as u64;
                    cursor += cursor % 2;
                }
            }
            ifd_offsets.push(cursor);
            cursor += 8 + entries.len() as u64 * 20 + 8;
        }

        let mut block = Vec::with_capacity((cursor - base) as usize);
        for plane in 0..self.shape.planes {
            let entries = self.plane_entries(plane, plane == 0);
            let mut spill_offsets = Vec::with_capacity(entries.len());
            for entry in &entries {
                if entry.data.len() > 8 {
                    spill_offsets.push(base + block.len() as u64);
                    block.extend_from_slice(&entry.data);
                    if block.len() % 2 == 1 {
                        block.push(0);
                    }
                } else {
                    spill_offsets.push(0);
                }
            }
            debug_assert_eq!(base + block.len() as u64, ifd_offsets[plane]);
            block.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            for (entry, spill) in entries.iter().zip(&spill_offsets) {
                block.extend_from_slice(&entry.tag.to_le_bytes());
                block.extend_from_slice(&entry.ftype.to_le_bytes());
                block.extend_from_slice(&entry.count.to_le_bytes());
                if entry.data.len() > 8 {
                    block.extend_from_slice(&spill.to_le_bytes());
                } else {
                    let mut inline = [0u8; 8];
                    inline[..entry.data.len()].copy_from_slice(&entry.data);
                    block.extend_from_slice(&inline);
                }
            }
            let next = if plane + 1 < self.shape.planes {
                ifd_offsets[plane + 1]
            } else {
                0
            };
            block.extend_from_slice(&next.to_le_bytes());
        }
        self.file.write_all(&block)?;
        self.pos += block.len() as u64;

        // Patch the header with the first directory offset.
        self.file.flush()?;
        let mut inner = self.file.into_inner().map_err(|e| e.into_error())?;
        inner.seek(SeekFrom::Start(8))?;
        inner.write_all(&ifd_offsets[0].to_le_bytes())?;
        inner.sync_all()?;

        info!("ome-tiff: finalized {:?} ({} directories)", self.path, self.shape.planes);
        Ok(WriteSummary {
            bytes_written: self.pos,
            warnings: self.warnings.clone(),
        })
    }
}

fn long_entry(tag: u16, value: u32) -> IfdEntry {
    IfdEntry {
        tag,
        ftype: TYPE_LONG,
        count: 1,
        data: value.to_le_bytes().to_vec(),
    }
}

fn shorts_entry(tag: u16, values: &[u16]) -> IfdEntry {
    IfdEntry {
        tag,
        ftype: TYPE_SHORT,
        count: values.len() as u64,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn long8s_entry(tag: u16, values: &[u64]) -> IfdEntry {
    IfdEntry {
        tag,
        ftype: TYPE_LONG8,
        count: values.len() as u64,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn ascii_entry(tag: u16, value: &str) -> IfdEntry {
    let mut data = value.as_bytes().to_vec();
    data.push(0);
    IfdEntry {
        tag,
        ftype: TYPE_ASCII,
        count: data.len() as u64,
        data,
    }
}

/// Serialize the OME metadata block. The declared shape and pixel sizes
/// must match the pixel data exactly; consumers validate against it.
fn build_ome_xml(
    record: &MetadataRecord,
    shape: &SceneShape,
    pixel_type: PixelType,
    pixel_size: Option<(f64, f64, Option<f64>)>,
) -> Result<String, WriterError> {
    let mut writer = XmlWriter::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let schema_location = format!("{} {}/ome.xsd", OME_NS, OME_NS);
    let mut ome = BytesStart::new("OME");
    ome.push_attribute(("xmlns", OME_NS));
    ome.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
    ome.push_attribute(("xsi:schemaLocation", schema_location.as_str()));
    ome.push_attribute((
        "Creator",
        concat!("slidepro ", env!("CARGO_PKG_VERSION")),
    ));
    writer.write_event(Event::Start(ome))?;

    let mut image = BytesStart::new("Image");
    image.push_attribute(("ID", "Image:0"));
    image.push_attribute(("Name", record.scene_name.as_str()));
    writer.write_event(Event::Start(image))?;

    if let Some(acquired) = &record.acquisition_time {
        writer.write_event(Event::Start(BytesStart::new("AcquisitionDate")))?;
        writer.write_event(Event::Text(BytesText::new(acquired)))?;
        writer.write_event(Event::End(BytesEnd::new("AcquisitionDate")))?;
    }

    let size_x = shape.width.to_string();
    let size_y = shape.height.to_string();
    let size_c = shape.channels.to_string();
    let size_z = shape.planes.to_string();
    let physical = pixel_size.map(|(x, y, z)| (x.to_string(), y.to_string(), z.map(|z| z.to_string())));
    let mut pixels = BytesStart::new("Pixels");
    pixels.push_attribute(("ID", "Pixels:0"));
    pixels.push_attribute(("DimensionOrder", "XYCZT"));
    pixels.push_attribute(("Type", ome_pixel_type(pixel_type)));
    pixels.push_attribute(("SizeX", size_x.as_str()));
    pixels.push_attribute(("SizeY", size_y.as_str()));
    pixels.push_attribute(("SizeC", size_c.as_str()));
    pixels.push_attribute(("SizeZ", size_z.as_str()));
    pixels.push_attribute(("SizeT", "1"));
    pixels.push_attribute(("Interleaved", "true"));
    pixels.push_attribute(("BigEndian", "false"));
    if let Some((x, y, z)) = &physical {
        pixels.push_attribute(("PhysicalSizeX", x.as_str()));
        pixels.push_attribute(("PhysicalSizeXUnit", "µm"));
        pixels.push_attribute(("PhysicalSizeY", y.as_str()));
        pixels.push_attribute(("PhysicalSizeYUnit", "µm"));
        if let Some(z) = z {
            pixels.push_attribute(("PhysicalSizeZ", z.as_str()));
            pixels.push_attribute(("PhysicalSizeZUnit", "µm"));
        }
    }
    writer.write_event(Event::Start(pixels))?;

    // Interleaved samples map onto a single OME channel.
    let samples = shape.channels.to_string();
    let color = record
        .channels
        .first()
        .and_then(|info| info.color)
        .map(|rgb| ome_color(rgb).to_string());
    let mut channel = BytesStart::new("Channel");
    channel.push_attribute(("ID", "Channel:0:0"));
    channel.push_attribute(("SamplesPerPixel", samples.as_str()));
    if let Some(info) = record.channels.first() {
        if !info.name.is_empty() {
            channel.push_attribute(("Name", info.name.as_str()));
        }
    }
    if let Some(color) = &color {
        channel.push_attribute(("Color", color.as_str()));
    }
    writer.write_event(Event::Empty(channel))?;
    writer.write_event(Event::Empty(BytesStart::new("TiffData")))?;

    writer.write_event(Event::End(BytesEnd::new("Pixels")))?;
    writer.write_event(Event::End(BytesEnd::new("Image")))?;
    writer.write_event(Event::End(BytesEnd::new("OME")))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| WriterError::Metadata(format!("OME-XML is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::PhysicalPixelSize;
    use crate::core::naming::OutputNamer;
    use crate::core::pipeline::{CancelToken, ConversionJob, ConversionOptions};
    use crate::core::selector::SelectionRequest;
    use crate::io::memory::{MemoryScene, MemorySource, SceneData};
    use crate::io::source::SlideSource;
    use crate::types::{SceneCategory, TargetFormat};
    use tiff::decoder::{Decoder, DecodingResult};

    fn convert_ome(
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
            output: dir.join("out.ome.tif"),
            format: TargetFormat::OmeTiff,
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
    fn rgb_output_decodes_with_exact_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u8("slide.vsi", 1, 3, 50, 70);
        let expected = match &scene.data {
            SceneData::U8(a) => a.clone(),
            _ => unreachable!(),
        };
        let source = MemorySource::new("slide.vsi", vec![scene]);
        // 32px tiles: 2x3 grid with padded edges.
        let output = convert_ome(&source, dir.path(), 32 * 32 * 3, Compression::None);

        let mut decoder = Decoder::new(std::fs::File::open(&output).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (70, 50));
        assert_eq!(
            decoder.colortype().unwrap(),
            tiff::ColorType::RGB(8)
        );
        let image = match decoder.read_image().unwrap() {
            DecodingResult::U8(data) => data,
            other => panic!("unexpected decoding result: {:?}", other),
        };
        assert_eq!(image.len(), 50 * 70 * 3);
        for y in 0..50usize {
            for x in 0..70usize {
                for c in 0..3usize {
                    assert_eq!(
                        image[(y * 70 + x) * 3 + c],
                        expected[[0, c, y, x]],
                        "mismatch at y={} x={} c={}",
                        y,
                        x,
                        c
                    );
                }
            }
        }
    }

    #[test]
    fn deflate_compressed_output_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u16("slide.vsi", 1, 1, 40, 40);
        let expected = match &scene.data {
            SceneData::U16(a) => a.clone(),
            _ => unreachable!(),
        };
        let source = MemorySource::new("slide.vsi", vec![scene]);
        let output = convert_ome(&source, dir.path(), 16 * 16 * 2, Compression::Gzip);

        let mut decoder = Decoder::new(std::fs::File::open(&output).unwrap()).unwrap();
        let image = match decoder.read_image().unwrap() {
            DecodingResult::U16(data) => data,
            other => panic!("unexpected decoding result: {:?}", other),
        };
        for y in 0..40usize {
            for x in 0..40usize {
                assert_eq!(image[y * 40 + x], expected[[0, 0, y, x]]);
            }
        }
    }

    #[test]
    fn ome_xml_declares_exact_shape() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u8("slide.vsi", 1, 3, 50, 70)
            .with_pixel_size(PhysicalPixelSize::micrometers(0.5, 0.5));
        let source = MemorySource::new("slide.vsi", vec![scene]);
        let output = convert_ome(&source, dir.path(), 32 * 32 * 3, Compression::None);

        let mut decoder = Decoder::new(std::fs::File::open(&output).unwrap()).unwrap();
        let description = decoder
            .get_tag_ascii_string(tiff::tags::Tag::ImageDescription)
            .unwrap();
        assert!(description.contains("SizeX=\"70\""));
        assert!(description.contains("SizeY=\"50\""));
        assert!(description.contains("SizeC=\"3\""));
        assert!(description.contains("PhysicalSizeX=\"0.5\""));
        assert!(description.contains(OME_NS));
    }

    #[test]
    fn tile_grid_uses_planner_edge() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(
            "slide.vsi",
            vec![MemoryScene::ramp_u8("slide.vsi", 1, 1, 100, 100)],
        );
        let output = convert_ome(&source, dir.path(), 32 * 32, Compression::None);

        let mut decoder = Decoder::new(std::fs::File::open(&output).unwrap()).unwrap();
        let tile_width = decoder
            .get_tag_u32(tiff::tags::Tag::TileWidth)
            .unwrap();
        assert_eq!(tile_width, 32);
    }

    #[test]
    fn out_of_order_tiles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shape = SceneShape {
            planes: 1,
            channels: 1,
            height: 64,
            width: 64,
        };
        let record = MetadataRecord::default();
        let options = ConversionOptions::default();
        let path = dir.path().join("x.ome.tif");
        let config = WriterConfig {
            path: &path,
            shape: &shape,
            pixel_type: PixelType::U8,
            metadata: &record,
            options: &options,
            tile_edge: 32,
        };
        let (mut writer, _) = OmeTiffWriter::open(&config).unwrap();

        let plan = crate::core::planner::TilePlan::new(&shape, PixelType::U8, 32 * 32).unwrap();
        let regions: Vec<_> = plan.iter().collect();
        let tile = Tile {
            region: regions[3],
            data: crate::core::tile::PixelBuffer::zeros(PixelType::U8, 1, 32, 32),
        };
        let err = crate::io::writers::FormatWriter::append_tile(&mut writer, &tile).unwrap_err();
        assert!(matches!(err, WriterError::TileOrder { .. }));
    }
}
