use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Byte budget must be greater than 0")]
    ZeroBudget,

    #[error("No supported input files found in {dir}")]
    EmptyBatch { dir: String },

    #[error("{failed} of {total} batch job(s) failed")]
    BatchFailures { failed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Slidepro(#[from] slidepro::Error),
}
