//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying catalog, selection, source, planner, and writer errors,
//! and provides semantic variants for argument validation and cancellation.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scene catalog error: {0}")]
    Catalog(#[from] crate::core::catalog::CatalogError),

    #[error("selection error: {0}")]
    Selection(#[from] crate::core::selector::SelectionError),

    #[error("source read error: {0}")]
    Source(#[from] crate::io::source::SourceError),

    #[error("chunk planning error: {0}")]
    Plan(#[from] crate::core::planner::PlanError),

    #[error("writer error: {0}")]
    Writer(#[from] crate::io::writers::WriterError),

    #[error("unsupported input format: {path:?}")]
    UnsupportedInput { path: PathBuf },

    #[error("invalid argument: {arg}={value}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("conversion cancelled, partial output removed: {path:?}")]
    Cancelled { path: PathBuf },
}
