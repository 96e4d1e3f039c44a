#![doc = r#"
SLIDEPRO — a streaming converter for multi-scene, pyramidal whole-slide
microscopy images.

This crate provides a typed, ergonomic API for converting individual
scenes and resolution levels of multi-series image sources into
self-describing interchange containers: a universal HDF5 file (`.univ`),
BigTIFF with embedded OME-XML (`.ome.tif`), or a Zarr v2 array store
(`.zarr`). Conversion is chunked end to end: pixel data moves through a
bounded tile stream, so planes far larger than memory convert without
ever materializing a full plane. It powers the SLIDEPRO CLI and can be
embedded in your own Rust applications.

Stability
---------
The public library API is experimental in initial releases. It is built
on top of a working MVP used by the CLI and is robust, but may evolve as
the crate stabilizes. Breaking changes can occur.

Requirements
------------
- HDF5 development headers and runtime available on your system (for
  the `.univ` writer).
- Rust 2024 edition toolchain.

Quick start: convert one scene to a file
----------------------------------------
```rust,no_run
use std::path::PathBuf;
use slidepro::{
    CancelToken, ConversionJob, ConversionOptions, OutputNamer,
    SceneCategory, SelectionRequest, TargetFormat,
};

fn main() -> slidepro::Result<()> {
    let job = ConversionJob {
        input: PathBuf::from("/data/slide.tif"),
        request: SelectionRequest::Category {
            category: SceneCategory::MainImage,
            level: 1,
        },
        output: PathBuf::from("/out/slide.ome.tif"),
        format: TargetFormat::OmeTiff,
        options: ConversionOptions::default(),
    };

    let namer = OutputNamer::new();
    let outcome = slidepro::api::convert(&job, &namer, &CancelToken::new(), None)?;
    println!(
        "wrote {:?}: {} tiles, {} bytes",
        outcome.output_path, outcome.tiles_written, outcome.bytes_written
    );
    Ok(())
}
```

Inspect a source before converting
----------------------------------
```rust,no_run
use std::path::Path;

fn main() -> slidepro::Result<()> {
    for scene in slidepro::api::list_scenes(Path::new("/data/slide.tif"))? {
        println!(
            "[{}] {} ({}, level {}): {}",
            scene.scene_index, scene.name, scene.category, scene.pyramid_level, scene.shape
        );
    }
    Ok(())
}
```

Batch helpers
-------------
```rust,no_run
use std::path::PathBuf;
use slidepro::{
    CancelToken, ConversionJob, ConversionOptions, OutputNamer,
    SceneCategory, SelectionRequest, TargetFormat,
};

fn main() {
    let jobs: Vec<ConversionJob> = ["a.tif", "b.tif"]
        .iter()
        .map(|name| ConversionJob {
            input: PathBuf::from(name),
            request: SelectionRequest::Category {
                category: SceneCategory::MainImage,
                level: 0,
            },
            output: PathBuf::from("/out").join(name).with_extension("zarr"),
            format: TargetFormat::OmeZarr,
            options: ConversionOptions::default(),
        })
        .collect();

    let namer = OutputNamer::new();
    let report = slidepro::api::convert_batch(jobs, &namer, &CancelToken::new());
    println!("{} succeeded, {} failed", report.succeeded(), report.failed());
}
```

Custom decoder adapters
-----------------------
Vendor formats plug in through the [`SlideSource`] capability trait:
implement scene enumeration plus bounded region reads, then call
[`api::convert_with_source`]. The in-tree adapters are
[`io::TiffSource`] (plain and pyramidal TIFF) and [`io::MemorySource`]
(pixel data you already hold).

Error handling
--------------
All public functions return `slidepro::Result<T>`; match on
`slidepro::Error` to handle specific cases, e.g. catalog inconsistencies
or writer failures. Metadata translation loss is never an error: it is
reported through `ConversionOutcome::warnings`.

Useful modules
--------------
- [`api`] — high-level, ergonomic entry points.
- [`types`] — enums and core types (e.g. `SceneCategory`, `TargetFormat`).
- [`core`] — catalog, selector, planner, pipeline, naming.
- [`io`] — source adapters and format writers.
- [`error`] — crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Curated public API surface
// Types
pub use core::catalog::{CatalogError, Scene, SceneCatalog, SceneShape};
pub use core::metadata::{ChannelInfo, MetadataRecord, MetadataWarning, PhysicalPixelSize};
pub use core::naming::OutputNamer;
pub use core::pipeline::{
    CancelToken, ConversionJob, ConversionOptions, ConversionOutcome, DEFAULT_BYTE_BUDGET,
};
pub use core::planner::{PlanError, TilePlan, TileRegion};
pub use core::selector::{ResolutionSelection, SelectionError, SelectionRequest};
pub use core::tile::{PixelBuffer, Tile};
pub use error::{Error, Result};
pub use types::{Compression, PixelType, SceneCategory, TargetFormat};

// Sources and writers
pub use io::source::{RawScene, SlideSource, SourceError};
pub use io::writers::{FormatWriter, WriteSummary, WriterError};

// High-level API re-exports
pub use api::{
    BatchReport, JobReport, convert, convert_batch, convert_with_source, list_scenes,
    open_source, resolve_selection,
};
