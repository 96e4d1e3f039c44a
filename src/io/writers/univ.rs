//! Universal container writer.
//!
//! One self-describing HDF5 file per output: the full plane set under
//! `ImageData/Resolution_0` (TCZYX, T=1), a `Metadata` block readable
//! without re-running conversion, provenance, a small thumbnail, and
//! optional decimated resolution levels. Writing is append-only per the
//! planner's tile stream; the finished file supports arbitrary random
//! access.
//!
//! Lower-resolution levels are accumulated in memory by 2x nearest
//! neighbour decimation of the incoming stream. A level whose buffer
//! would exceed [`PYRAMID_LEVEL_CAP_BYTES`] is skipped with a warning so
//! peak memory stays bounded for arbitrarily large planes.
use std::path::PathBuf;

use hdf5::types::VarLenUnicode;
use ndarray::{Array3, Array4, Axis, s};
use tracing::info;

use crate::core::metadata::MetadataWarning;
use crate::core::planner::TileRegion;
use crate::core::tile::{PixelBuffer, Tile};
use crate::io::writers::metadata::pixel_size_micrometers;
use crate::io::writers::{WriteSummary, WriterConfig, WriterError};
use crate::types::{Compression, PixelType};

/// Largest in-memory buffer allowed for one accumulated pyramid level.
pub const PYRAMID_LEVEL_CAP_BYTES: u128 = 256 << 20;

/// Long side of the stored thumbnail.
const THUMBNAIL_EDGE: u64 = 256;

/// Smallest level the pyramid descends to, matching the resolution
/// ladder of the source format.
const PYRAMID_MIN_EDGE: u64 = 256;

/// Build a chunked dataset, optionally deflate-compressed.
macro_rules! build_dataset {
    ($parent:expr, $t:ty, $name:expr, $shape:expr, $chunk:expr, $gzip:expr) => {{
        let builder = $parent.new_dataset::<$t>().shape($shape).chunk($chunk);
        let builder = match $gzip {
            Some(level) => builder.deflate(level),
            None => builder,
        };
        builder.create($name)
    }};
}

enum PixelStore {
    U8 {
        thumb: Array3<u8>,
        levels: Vec<Array4<u8>>,
    },
    U16 {
        thumb: Array3<u16>,
        levels: Vec<Array4<u16>>,
    },
    F32 {
        thumb: Array3<f32>,
        levels: Vec<Array4<f32>>,
    },
}

pub struct UnivWriter {
    file: hdf5::File,
    path: PathBuf,
    dataset: hdf5::Dataset,
    pixel_type: PixelType,
    gzip: Option<u8>,
    thumb_stride: u64,
    level_factors: Vec<u64>,
    store: PixelStore,
    expected_tiles: usize,
    received_tiles: usize,
    warnings: Vec<MetadataWarning>,
}

impl UnivWriter {
    pub fn open(config: &WriterConfig<'_>) -> Result<(Self, Vec<MetadataWarning>), WriterError> {
        let shape = *config.shape;
        let file = hdf5::File::create(config.path)?;
        let gzip = match config.options.compression {
            Compression::Gzip => Some(config.options.compression_level),
            Compression::None => None,
        };

        write_str_attr(&file, "format", "univ")?;
        write_str_attr(&file, "version", "1.0")?;
        write_str_attr(&file, "schema_version", "1.0")?;

        let image_group = file.create_group("ImageData")?;
        let shape5 = (
            1usize,
            shape.channels,
            shape.planes,
            shape.height as usize,
            shape.width as usize,
        );
        let chunk5 = (
            1usize,
            1usize,
            1usize,
            (shape.height as usize).min(512),
            (shape.width as usize).min(512),
        );
        let dataset = match config.pixel_type {
            PixelType::U8 => build_dataset!(image_group, u8, "Resolution_0", shape5, chunk5, gzip)?,
            PixelType::U16 => {
                build_dataset!(image_group, u16, "Resolution_0", shape5, chunk5, gzip)?
            }
            PixelType::F32 => {
                build_dataset!(image_group, f32, "Resolution_0", shape5, chunk5, gzip)?
            }
        };

        let mut warnings = write_metadata(&file, config)?;

        let long_side = shape.height.max(shape.width);
        let thumb_stride = long_side.div_ceil(THUMBNAIL_EDGE).max(1);
        let thumb_dims = (
            shape.channels,
            shape.height.div_ceil(thumb_stride) as usize,
            shape.width.div_ceil(thumb_stride) as usize,
        );

        let mut level_factors = Vec::new();
        if config.options.pyramid {
            let mut factor = 2u64;
            loop {
                let lh = shape.height.div_ceil(factor);
                let lw = shape.width.div_ceil(factor);
                if lh.min(lw) < PYRAMID_MIN_EDGE {
                    break;
                }
                let bytes = shape.planes as u128
                    * shape.channels as u128
                    * lh as u128
                    * lw as u128
                    * config.pixel_type.bytes_per_sample() as u128;
                if bytes > PYRAMID_LEVEL_CAP_BYTES {
                    warnings.push(MetadataWarning::dropped(
                        format!("pyramid level {}", level_factors.len() + 1),
                        "univ",
                        format!("accumulation buffer of {} bytes exceeds cap", bytes),
                    ));
                    break;
                }
                level_factors.push(factor);
                factor *= 2;
            }
        }

        let level_dims = |factor: &u64| {
            (
                shape.planes,
                shape.channels,
                shape.height.div_ceil(*factor) as usize,
                shape.width.div_ceil(*factor) as usize,
            )
        };
        let store = match config.pixel_type {
            PixelType::U8 => PixelStore::U8 {
                thumb: Array3::zeros(thumb_dims),
                levels: level_factors.iter().map(|f| Array4::zeros(level_dims(f))).collect(),
            },
            PixelType::U16 => PixelStore::U16 {
                thumb: Array3::zeros(thumb_dims),
                levels: level_factors.iter().map(|f| Array4::zeros(level_dims(f))).collect(),
            },
            PixelType::F32 => PixelStore::F32 {
                thumb: Array3::zeros(thumb_dims),
                levels: level_factors.iter().map(|f| Array4::zeros(level_dims(f))).collect(),
            },
        };

        let rows = shape.height.div_ceil(config.tile_edge);
        let cols = shape.width.div_ceil(config.tile_edge);
        let expected_tiles = shape.planes * (rows * cols) as usize;

        info!(
            "univ: opened {:?} ({} pyramid level(s) queued)",
            config.path,
            level_factors.len()
        );

        let writer = UnivWriter {
            file,
            path: config.path.to_path_buf(),
            dataset,
            pixel_type: config.pixel_type,
            gzip,
            thumb_stride,
            level_factors,
            store,
            expected_tiles,
            received_tiles: 0,
            warnings: Vec::new(),
        };
        Ok((writer, warnings))
    }

    fn write_tile_slice(&self, tile: &Tile) -> Result<(), WriterError> {
        let region = &tile.region;
        let (c, h, w) = tile.data.dim();
        let (y0, x0) = (region.y as usize, region.x as usize);
        let z = region.plane;
        match &tile.data {
            PixelBuffer::U8(a) => {
                let view = a.view().insert_axis(Axis(0)).insert_axis(Axis(2));
                self.dataset
                    .write_slice(view, s![0..1, 0..c, z..z + 1, y0..y0 + h, x0..x0 + w])?;
            }
            PixelBuffer::U16(a) => {
                let view = a.view().insert_axis(Axis(0)).insert_axis(Axis(2));
                self.dataset
                    .write_slice(view, s![0..1, 0..c, z..z + 1, y0..y0 + h, x0..x0 + w])?;
            }
            PixelBuffer::F32(a) => {
                let view = a.view().insert_axis(Axis(0)).insert_axis(Axis(2));
                self.dataset
                    .write_slice(view, s![0..1, 0..c, z..z + 1, y0..y0 + h, x0..x0 + w])?;
            }
        }
        Ok(())
    }
}

impl crate::io::writers::FormatWriter for UnivWriter {
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
        self.write_tile_slice(tile)?;

        let region = tile.region;
        let stride = self.thumb_stride;
        match (&mut self.store, &tile.data) {
            (PixelStore::U8 { thumb, levels }, PixelBuffer::U8(data)) => {
                accumulate(thumb, stride, levels, &self.level_factors, &region, data);
            }
            (PixelStore::U16 { thumb, levels }, PixelBuffer::U16(data)) => {
                accumulate(thumb, stride, levels, &self.level_factors, &region, data);
            }
            (PixelStore::F32 { thumb, levels }, PixelBuffer::F32(data)) => {
                accumulate(thumb, stride, levels, &self.level_factors, &region, data);
            }
            _ => {
                return Err(WriterError::TileMismatch {
                    detail: "pixel type changed mid-stream".into(),
                });
            }
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

        let image_group = self.file.group("ImageData")?;
        match &self.store {
            PixelStore::U8 { thumb, levels } => {
                write_levels(&image_group, levels, self.gzip)?;
                write_thumbnail(&self.file, thumb)?;
            }
            PixelStore::U16 { thumb, levels } => {
                write_levels(&image_group, levels, self.gzip)?;
                write_thumbnail(&self.file, thumb)?;
            }
            PixelStore::F32 { thumb, levels } => {
                write_levels(&image_group, levels, self.gzip)?;
                write_thumbnail(&self.file, thumb)?;
            }
        }

        self.file.flush()?;
        let bytes_written = std::fs::metadata(&self.path)?.len();
        info!(
            "univ: finalized {:?} ({} resolution level(s))",
            self.path,
            self.level_factors.len() + 1
        );
        Ok(WriteSummary {
            bytes_written,
            warnings: self.warnings.clone(),
        })
    }
}

/// Nearest-neighbour decimation of one incoming tile into the thumbnail
/// and every queued pyramid level.
fn accumulate<T: Copy>(
    thumb: &mut Array3<T>,
    thumb_stride: u64,
    levels: &mut [Array4<T>],
    factors: &[u64],
    region: &TileRegion,
    data: &Array3<T>,
) {
    if region.plane == 0 {
        decimate_plane(thumb, region, data, thumb_stride);
    }
    for (level, factor) in levels.iter_mut().zip(factors) {
        decimate_volume(level, region, data, *factor);
    }
}

fn decimate_plane<T: Copy>(dst: &mut Array3<T>, region: &TileRegion, src: &Array3<T>, factor: u64) {
    let (channels, height, width) = src.dim();
    let (_, dst_h, dst_w) = dst.dim();
    for c in 0..channels {
        for dy in 0..height {
            let gy = region.y + dy as u64;
            if gy % factor != 0 {
                continue;
            }
            let oy = (gy / factor) as usize;
            if oy >= dst_h {
                continue;
            }
            for dx in 0..width {
                let gx = region.x + dx as u64;
                if gx % factor != 0 {
                    continue;
                }
                let ox = (gx / factor) as usize;
                if ox < dst_w {
                    dst[[c, oy, ox]] = src[[c, dy, dx]];
                }
            }
        }
    }
}

fn decimate_volume<T: Copy>(dst: &mut Array4<T>, region: &TileRegion, src: &Array3<T>, factor: u64) {
    let (channels, height, width) = src.dim();
    let (_, _, dst_h, dst_w) = dst.dim();
    for c in 0..channels {
        for dy in 0..height {
            let gy = region.y + dy as u64;
            if gy % factor != 0 {
                continue;
            }
            let oy = (gy / factor) as usize;
            if oy >= dst_h {
                continue;
            }
            for dx in 0..width {
                let gx = region.x + dx as u64;
                if gx % factor != 0 {
                    continue;
                }
                let ox = (gx / factor) as usize;
                if ox < dst_w {
                    dst[[region.plane, c, oy, ox]] = src[[c, dy, dx]];
                }
            }
        }
    }
}

fn write_levels<T: hdf5::H5Type + Copy>(
    image_group: &hdf5::Group,
    levels: &[Array4<T>],
    gzip: Option<u8>,
) -> Result<(), WriterError> {
    for (i, level) in levels.iter().enumerate() {
        let (planes, channels, h, w) = level.dim();
        let name = format!("Resolution_{}", i + 1);
        let dataset = build_dataset!(
            image_group,
            T,
            &name,
            (1usize, channels, planes, h, w),
            (1usize, 1usize, 1usize, h.min(256), w.min(256)),
            gzip
        )?;
        // Stored as TCZYX: swap the accumulator's (planes, channels) axes
        // and materialize so the buffer is standard-layout again.
        let reordered = level
            .view()
            .permuted_axes([1, 0, 2, 3])
            .insert_axis(Axis(0))
            .to_owned();
        dataset.write(&reordered)?;
    }
    Ok(())
}

fn write_thumbnail<T: hdf5::H5Type + Copy>(
    file: &hdf5::File,
    thumb: &Array3<T>,
) -> Result<(), WriterError> {
    let (c, h, w) = thumb.dim();
    let dataset = build_dataset!(file, T, "Thumbnail", (c, h, w), (c, h, w), Some(4u8))?;
    dataset.write(thumb)?;
    Ok(())
}

fn write_metadata(
    file: &hdf5::File,
    config: &WriterConfig<'_>,
) -> Result<Vec<MetadataWarning>, WriterError> {
    let record = config.metadata;
    let shape = config.shape;

    let meta = file.create_group("Metadata")?;

    let dims = meta.create_group("Dimensions")?;
    write_u64_attr(&dims, "SizeT", 1)?;
    write_u64_attr(&dims, "SizeC", shape.channels as u64)?;
    write_u64_attr(&dims, "SizeZ", shape.planes as u64)?;
    write_u64_attr(&dims, "SizeY", shape.height)?;
    write_u64_attr(&dims, "SizeX", shape.width)?;
    write_str_attr(&dims, "DimensionOrder", "TCZYX")?;

    let (size, warnings) = pixel_size_micrometers(record, "univ");
    if let Some((x, y, z)) = size {
        let phys = meta.create_group("PhysicalSize")?;
        write_f64_attr(&phys, "X", x)?;
        write_f64_attr(&phys, "Y", y)?;
        write_f64_attr(&phys, "Z", z.unwrap_or(1.0))?;
        write_str_attr(&phys, "Unit", "µm")?;
    }

    let source = meta.create_group("Source")?;
    write_str_attr(&source, "OriginalFile", &record.source_file)?;
    write_str_attr(&source, "OriginalFormat", &record.source_format)?;
    write_str_attr(&source, "SceneName", &record.scene_name)?;
    write_u64_attr(&source, "SceneIndex", record.scene_index as u64)?;
    write_u64_attr(&source, "PyramidLevel", record.pyramid_level as u64)?;
    write_str_attr(&source, "ConversionDate", &chrono::Utc::now().to_rfc3339())?;
    if let Some(acquired) = &record.acquisition_time {
        write_str_attr(&source, "AcquisitionDate", acquired)?;
    }

    if !record.channels.is_empty() {
        let channels = meta.create_group("Channels")?;
        for (i, channel) in record.channels.iter().enumerate() {
            write_str_attr(&channels, &format!("Channel_{}", i), &channel.name)?;
            if let Some(color) = channel.color {
                write_str_attr(
                    &channels,
                    &format!("Channel_{}_Color", i),
                    &super::metadata::hex_color(color),
                )?;
            }
        }
    }

    if !record.tags.is_empty() {
        let tags = meta.create_group("Tags")?;
        for (key, value) in &record.tags {
            write_str_attr(&tags, key, value)?;
        }
    }

    let provenance = file.create_group("Provenance")?;
    write_str_attr(&provenance, "created", &chrono::Utc::now().to_rfc3339())?;
    write_str_attr(&provenance, "creator", "slidepro")?;
    write_str_attr(&provenance, "source_format", &record.source_format)?;
    write_str_attr(&provenance, "source_file", &record.source_file)?;
    let history = serde_json::json!({
        "conversion_tool": "slidepro",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "source": record.source_file,
        "scene": record.scene_name,
        "level": record.pyramid_level,
    });
    let history_value: VarLenUnicode = serde_json::to_string_pretty(&history)?
        .parse()
        .map_err(|e| WriterError::Metadata(format!("conversion history: {}", e)))?;
    provenance
        .new_dataset::<VarLenUnicode>()
        .create("conversion_history")?
        .write_scalar(&history_value)?;

    Ok(warnings)
}

fn write_str_attr(loc: &hdf5::Group, name: &str, value: &str) -> Result<(), WriterError> {
    let value: VarLenUnicode = value
        .parse()
        .map_err(|e| WriterError::Metadata(format!("attribute {}: {}", name, e)))?;
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn write_u64_attr(loc: &hdf5::Group, name: &str, value: u64) -> Result<(), WriterError> {
    loc.new_attr::<u64>().create(name)?.write_scalar(&value)?;
    Ok(())
}

fn write_f64_attr(loc: &hdf5::Group, name: &str, value: f64) -> Result<(), WriterError> {
    loc.new_attr::<f64>().create(name)?.write_scalar(&value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::PhysicalPixelSize;
    use crate::core::pipeline::{CancelToken, ConversionJob, ConversionOptions, convert};
    use crate::core::naming::OutputNamer;
    use crate::core::selector::SelectionRequest;
    use crate::io::memory::{MemoryScene, MemorySource};
    use crate::io::source::SlideSource;
    use crate::types::{SceneCategory, TargetFormat};

    fn convert_univ(source: &MemorySource, dir: &std::path::Path, budget: usize) -> std::path::PathBuf {
        let job = ConversionJob {
            input: source.source_path().to_path_buf(),
            request: SelectionRequest::Category {
                category: SceneCategory::MainImage,
                level: 0,
            },
            output: dir.join("out.univ"),
            format: TargetFormat::Univ,
            options: ConversionOptions {
                byte_budget: budget,
                ..Default::default()
            },
        };
        convert(&job, source, &OutputNamer::new(), &CancelToken::new(), None)
            .unwrap()
            .output_path
    }

    #[test]
    fn roundtrip_preserves_pixels_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::ramp_u16("slide.vsi", 1, 2, 64, 48)
            .with_pixel_size(PhysicalPixelSize::micrometers(0.25, 0.25));
        let expected = match &scene.data {
            crate::io::memory::SceneData::U16(a) => a.clone(),
            _ => unreachable!(),
        };
        let source = MemorySource::new("slide.vsi", vec![scene]);
        // 32x32 tiles -> 4 partial tiles over 64x48.
        let output = convert_univ(&source, dir.path(), 32 * 32 * 2 * 2);

        let file = hdf5::File::open(&output).unwrap();
        let data = file
            .dataset("ImageData/Resolution_0")
            .unwrap()
            .read_dyn::<u16>()
            .unwrap();
        assert_eq!(data.shape(), &[1, 2, 1, 64, 48]);
        for c in 0..2 {
            for y in 0..64 {
                for x in 0..48 {
                    assert_eq!(data[[0, c, 0, y, x]], expected[[0, c, y, x]]);
                }
            }
        }

        let dims = file.group("Metadata/Dimensions").unwrap();
        assert_eq!(dims.attr("SizeC").unwrap().read_scalar::<u64>().unwrap(), 2);
        assert_eq!(dims.attr("SizeX").unwrap().read_scalar::<u64>().unwrap(), 48);

        let phys = file.group("Metadata/PhysicalSize").unwrap();
        assert_eq!(phys.attr("X").unwrap().read_scalar::<f64>().unwrap(), 0.25);
    }

    #[test]
    fn thumbnail_is_bounded_and_decimated() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(
            "slide.vsi",
            vec![MemoryScene::ramp_u8("slide.vsi", 1, 1, 512, 512)],
        );
        let output = convert_univ(&source, dir.path(), 128 * 128);

        let file = hdf5::File::open(&output).unwrap();
        let thumb = file.dataset("Thumbnail").unwrap().read_dyn::<u8>().unwrap();
        assert_eq!(thumb.shape(), &[1, 256, 256]);
        let full = file
            .dataset("ImageData/Resolution_0")
            .unwrap()
            .read_dyn::<u8>()
            .unwrap();
        assert_eq!(thumb[[0, 10, 20]], full[[0, 0, 0, 20, 40]]);
    }

    #[test]
    fn pyramid_level_is_decimated_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(
            "slide.vsi",
            vec![MemoryScene::ramp_u8("slide.vsi", 1, 1, 600, 600)],
        );
        let output = convert_univ(&source, dir.path(), 256 * 256);

        let file = hdf5::File::open(&output).unwrap();
        let level1 = file
            .dataset("ImageData/Resolution_1")
            .unwrap()
            .read_dyn::<u8>()
            .unwrap();
        assert_eq!(level1.shape(), &[1, 1, 1, 300, 300]);
        let full = file
            .dataset("ImageData/Resolution_0")
            .unwrap()
            .read_dyn::<u8>()
            .unwrap();
        assert_eq!(level1[[0, 0, 0, 17, 101]], full[[0, 0, 0, 34, 202]]);
        // factor 4 would be 150x150, below the minimum edge.
        assert!(file.dataset("ImageData/Resolution_2").is_err());
    }

    #[test]
    fn no_pyramid_option_writes_single_level() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(
            "slide.vsi",
            vec![MemoryScene::ramp_u8("slide.vsi", 1, 1, 600, 600)],
        );
        let job = ConversionJob {
            input: source.source_path().to_path_buf(),
            request: SelectionRequest::Explicit {
                scene_index: 0,
                level: 0,
            },
            output: dir.path().join("flat.univ"),
            format: TargetFormat::Univ,
            options: ConversionOptions {
                byte_budget: 256 * 256,
                pyramid: false,
                ..Default::default()
            },
        };
        let outcome = convert(&job, &source, &OutputNamer::new(), &CancelToken::new(), None)
            .unwrap();
        let file = hdf5::File::open(&outcome.output_path).unwrap();
        assert!(file.dataset("ImageData/Resolution_0").is_ok());
        assert!(file.dataset("ImageData/Resolution_1").is_err());
    }
}
