//! Error types for tiffstack-core.

use thiserror::Error;

/// Result type alias for tiffstack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tiffstack operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Array shape is not usable (zero-length axis, empty shape).
    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: String },

    /// Chunk specification does not fit the array it is applied to.
    #[error("invalid chunk specification: {0}")]
    InvalidChunkSpec(String),

    /// Unknown pixel type name.
    #[error("unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
