//! Error types for bat-products.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for product operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, rebinning or writing BAT data products.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied arguments are inconsistent or incomplete.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required file does not exist.
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// An external HEASoft task exited with a nonzero status.
    #[error("{task} failed: {message}")]
    ExternalToolFailure { task: String, message: String },

    /// The requested operation is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Malformed or unexpected FITS content.
    #[error(transparent)]
    Fits(#[from] bat_fits::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Array contents do not fit the requested shape.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}
