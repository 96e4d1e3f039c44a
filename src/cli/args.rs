use clap::Parser;
use std::path::PathBuf;

use slidepro::types::{Compression, SceneCategory, TargetFormat};

#[derive(Parser)]
#[command(name = "slidepro", version, about = "SLIDEPRO CLI")]
pub struct CliArgs {
    /// Input image file (single file mode)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Input directory containing image files (batch mode)
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Output filename (single file mode)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing (batch mode)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Output format (univ, ome-tiff or ome-zarr)
    #[arg(short = 'f', long, value_enum, default_value_t = TargetFormat::Univ)]
    pub format: TargetFormat,

    /// Scene category to convert
    #[arg(long, value_enum, default_value_t = SceneCategory::MainImage)]
    pub category: SceneCategory,

    /// Explicit scene index; overrides --category
    #[arg(long)]
    pub scene: Option<usize>,

    /// Pyramid level to convert (0 = full resolution)
    #[arg(long, default_value_t = 0)]
    pub level: u32,

    /// Block compression for the output container
    #[arg(long, value_enum, default_value_t = Compression::None)]
    pub compression: Compression,

    /// Compression level 1-9 when compression is enabled
    #[arg(long, default_value_t = 4)]
    pub compression_level: u8,

    /// Per-tile byte budget in MiB
    #[arg(long, default_value_t = 64)]
    pub byte_budget_mb: usize,

    /// Do not accumulate lower-resolution levels in .univ outputs
    #[arg(long, default_value_t = false)]
    pub no_pyramid: bool,

    /// List the scenes of the input and exit
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Enable logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
