//! High-level, ergonomic library API: enumerate scenes, resolve
//! selections, and run single or batch conversions. These are the
//! entry points the CLI and any embedding GUI call; each is a pure
//! function over explicit arguments with no hidden configuration.
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::core::catalog::{Scene, SceneCatalog};
use crate::core::naming::OutputNamer;
use crate::core::pipeline::{CancelToken, ConversionJob, ConversionOutcome, ProgressFn};
use crate::core::selector::{ResolutionSelection, SelectionRequest, resolve};
use crate::error::{Error, Result};
use crate::io::source::SlideSource;
use crate::io::tiff::TiffSource;

/// Open the decoder adapter for `path` based on its extension.
///
/// The in-tree adapter covers plain and pyramidal TIFF. Vendor formats
/// (e.g. VSI) are served by external [`SlideSource`] implementations
/// passed to [`convert_with_source`].
pub fn open_source(path: &Path) -> Result<Box<dyn SlideSource>> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tif") || name.ends_with(".tiff") {
        return Ok(Box::new(TiffSource::open(path)?));
    }
    Err(Error::UnsupportedInput {
        path: path.to_path_buf(),
    })
}

/// Enumerate and classify every scene of a source file.
pub fn list_scenes(path: &Path) -> Result<Vec<Scene>> {
    let source = open_source(path)?;
    let catalog = SceneCatalog::from_source(source.as_ref())?;
    Ok(catalog.scenes().to_vec())
}

/// Resolve a selection request against a source file without converting.
pub fn resolve_selection(path: &Path, request: &SelectionRequest) -> Result<ResolutionSelection> {
    let source = open_source(path)?;
    let catalog = SceneCatalog::from_source(source.as_ref())?;
    Ok(resolve(&catalog, request)?)
}

/// Run one conversion job, opening the source from the job's input path.
pub fn convert(
    job: &ConversionJob,
    namer: &OutputNamer,
    cancel: &CancelToken,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ConversionOutcome> {
    let source = open_source(&job.input)?;
    crate::core::pipeline::convert(job, source.as_ref(), namer, cancel, progress)
}

/// Run one conversion job against an already-open source (embedding
/// path for callers with their own decoder adapter).
pub fn convert_with_source(
    job: &ConversionJob,
    source: &dyn SlideSource,
    namer: &OutputNamer,
    cancel: &CancelToken,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ConversionOutcome> {
    crate::core::pipeline::convert(job, source, namer, cancel, progress)
}

/// Outcome of one job within a batch.
#[derive(Debug)]
pub struct JobReport {
    pub input: PathBuf,
    pub requested_output: PathBuf,
    pub result: Result<ConversionOutcome>,
}

/// Independent per-job results of a batch run; one job's failure never
/// aborts its siblings.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }
}

/// Convert every job, running them as independent parallel workers.
/// Each worker owns its source and writer handles; the shared namer
/// serializes path claims.
pub fn convert_batch(jobs: Vec<ConversionJob>, namer: &OutputNamer, cancel: &CancelToken) -> BatchReport {
    let reports: Vec<JobReport> = jobs
        .into_par_iter()
        .map(|job| {
            let result = convert(&job, namer, cancel, None);
            match &result {
                Ok(outcome) => info!(
                    "batch: {:?} -> {:?} ({} bytes)",
                    job.input, outcome.output_path, outcome.bytes_written
                ),
                Err(e) => warn!("batch: {:?} failed: {}", job.input, e),
            }
            JobReport {
                input: job.input.clone(),
                requested_output: job.output.clone(),
                result,
            }
        })
        .collect();
    BatchReport { jobs: reports }
}
