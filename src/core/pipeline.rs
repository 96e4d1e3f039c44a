//! The chunked conversion pipeline.
//!
//! Orchestrates one conversion job: claim output name, discover and
//! resolve the scene, plan tiles under the byte budget, stream tiles
//! from the source into a format writer, finalize. Peak memory is
//! bounded by the byte budget regardless of plane size. Any failure or
//! cancellation after the writer opens removes the partial artifact so a
//! corrupt file is never left at the claimed path.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::catalog::SceneCatalog;
use crate::core::metadata::MetadataWarning;
use crate::core::naming::OutputNamer;
use crate::core::planner::TilePlan;
use crate::core::selector::{SelectionRequest, resolve};
use crate::core::tile::Tile;
use crate::error::{Error, Result};
use crate::io::source::{SlideSource, SourceError};
use crate::io::writers::{WriterConfig, open_writer};
use crate::types::{Compression, TargetFormat};

/// Default per-tile byte budget: 64 MiB.
pub const DEFAULT_BYTE_BUDGET: usize = 64 << 20;

/// Options shared by all conversion jobs; suitable for config files and
/// GUI presets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub compression: Compression,
    /// Deflate level (1-9) when compression is enabled.
    pub compression_level: u8,
    /// Maximum in-memory byte size of one tile read.
    pub byte_budget: usize,
    /// Let the universal container accumulate lower-resolution levels.
    pub pyramid: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            compression: Compression::None,
            compression_level: 4,
            byte_budget: DEFAULT_BYTE_BUDGET,
            pyramid: true,
        }
    }
}

/// One fully-specified conversion request. Lives for a single pipeline
/// run; nothing is persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub request: SelectionRequest,
    /// Requested output path; the namer may suffix it.
    pub output: PathBuf,
    pub format: TargetFormat,
    pub options: ConversionOptions,
}

/// Result of a finished job.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    /// The path actually written (after duplicate-safe naming).
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub tiles_written: usize,
    pub warnings: Vec<MetadataWarning>,
}

/// Cooperative cancellation flag, checked at tile boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-tile progress callback: (tiles done, tiles total).
pub type ProgressFn<'a> = dyn Fn(usize, usize) + 'a;

/// Run one conversion job against an already-open source.
pub fn convert(
    job: &ConversionJob,
    source: &dyn SlideSource,
    namer: &OutputNamer,
    cancel: &CancelToken,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ConversionOutcome> {
    if job.options.byte_budget == 0 {
        return Err(Error::InvalidArgument {
            arg: "byte_budget",
            value: "0".to_string(),
        });
    }
    if job.options.compression == Compression::Gzip
        && !(1..=9).contains(&job.options.compression_level)
    {
        return Err(Error::InvalidArgument {
            arg: "compression_level",
            value: job.options.compression_level.to_string(),
        });
    }
    if let Some(parent) = job.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Naming runs before any data is written so a claim failure can
    // never leave a partial file behind.
    let output = namer.claim(&job.output);
    info!("converting {:?} -> {:?} ({})", job.input, output, job.format);

    let catalog = SceneCatalog::from_source(source)?;
    let selection = resolve(&catalog, &job.request)?;
    let scene = catalog
        .scene(selection.scene_index)
        .ok_or(Error::Selection(
            crate::core::selector::SelectionError::NotFound {
                request: job.request.to_string(),
            },
        ))?;

    let mut metadata = source.scene_metadata(selection.scene_index)?;
    metadata.scene_index = selection.scene_index;
    metadata.scene_name = scene.name.clone();
    metadata.pyramid_level = selection.pyramid_level;
    metadata.physical_pixel_size = scene.physical_pixel_size.clone();

    let plan = TilePlan::new(&selection.shape, selection.pixel_type, job.options.byte_budget)?;
    info!(
        "scene {} level {}: plane {} as {} tile(s) of edge {}",
        selection.scene_index,
        selection.pyramid_level,
        selection.shape,
        plan.len(),
        plan.tile_edge()
    );

    let config = WriterConfig {
        path: &output,
        shape: &selection.shape,
        pixel_type: selection.pixel_type,
        metadata: &metadata,
        options: &job.options,
        tile_edge: plan.tile_edge(),
    };
    let (mut writer, mut warnings) = match open_writer(job.format, &config) {
        Ok(opened) => opened,
        Err(e) => {
            remove_artifact(&output);
            return Err(e.into());
        }
    };

    let streamed = stream_tiles(
        source,
        &selection,
        &plan,
        writer.as_mut(),
        cancel,
        progress,
        &output,
    );
    let tiles_written = match streamed {
        Ok(count) => count,
        Err(e) => {
            drop(writer);
            remove_artifact(&output);
            return Err(e);
        }
    };

    let summary = match writer.finalize() {
        Ok(summary) => summary,
        Err(e) => {
            remove_artifact(&output);
            return Err(e.into());
        }
    };
    warnings.extend(summary.warnings);
    for warning in &warnings {
        warn!("{}", warning);
    }
    info!(
        "finished {:?}: {} tile(s), {} byte(s)",
        output, tiles_written, summary.bytes_written
    );

    Ok(ConversionOutcome {
        output_path: output,
        bytes_written: summary.bytes_written,
        tiles_written,
        warnings,
    })
}

fn stream_tiles(
    source: &dyn SlideSource,
    selection: &crate::core::selector::ResolutionSelection,
    plan: &TilePlan,
    writer: &mut dyn crate::io::writers::FormatWriter,
    cancel: &CancelToken,
    progress: Option<&ProgressFn<'_>>,
    output: &Path,
) -> Result<usize> {
    let total = plan.len();
    let mut done = 0usize;
    for region in plan {
        // Cancellation is tile-granular, never mid-tile.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                path: output.to_path_buf(),
            });
        }
        let data = source.read_region(
            selection.scene_index,
            region.plane,
            region.y,
            region.x,
            region.height,
            region.width,
        )?;
        let (c, h, w) = data.dim();
        if c != selection.shape.channels || h as u64 != region.height || w as u64 != region.width {
            return Err(Error::Source(SourceError::RegionMismatch {
                scene_index: selection.scene_index,
                detail: format!(
                    "requested {}x{}x{} at plane {} y {} x {}, got {}x{}x{}",
                    selection.shape.channels,
                    region.height,
                    region.width,
                    region.plane,
                    region.y,
                    region.x,
                    c,
                    h,
                    w
                ),
            }));
        }
        writer.append_tile(&Tile { region, data })?;
        done += 1;
        if let Some(callback) = progress {
            callback(done, total);
        }
    }
    Ok(done)
}

/// Remove a partially-written output artifact, logging (not failing) on
/// cleanup errors.
fn remove_artifact(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        Ok(())
    };
    if let Err(e) = result {
        warn!("failed to remove partial output {:?}: {}", path, e);
    } else {
        info!("removed partial output {:?}", path);
    }
}
