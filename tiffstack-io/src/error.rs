//! I/O error types.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Zero or several initial TIFF files matched the channel pattern.
    #[error("expected one initial TIFF file, found {}: [{}]. Pattern: {}", .matches.len(), MatchList(.matches), .pattern.display())]
    Discovery {
        pattern: PathBuf,
        matches: Vec<PathBuf>,
    },

    /// The TIFF stack or its metadata could not be opened or decoded.
    #[error("failed to read TIFF stack {}: {message}", .path.display())]
    SourceRead { path: PathBuf, message: String },

    /// The HDF5 output could not be created or written.
    #[error("failed to write {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    /// File name pattern could not be compiled.
    #[error("invalid file pattern: {0}")]
    Pattern(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] tiffstack_core::Error),
}

/// Failure class of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    SourceRead,
    Write,
    Other,
}

impl Error {
    pub(crate) fn source_read(path: &Path, err: impl fmt::Display) -> Self {
        Self::SourceRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, err: impl fmt::Display) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Failure class, for callers that only care which stage failed.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Discovery { .. } => ErrorKind::Discovery,
            Self::SourceRead { .. } => ErrorKind::SourceRead,
            Self::Write { .. } => ErrorKind::Write,
            Self::Pattern(_) | Self::Io(_) | Self::CoreError(_) => ErrorKind::Other,
        }
    }
}

struct MatchList<'a>(&'a [PathBuf]);

impl fmt::Display for MatchList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_message_lists_pattern_and_matches() {
        let err = Error::Discovery {
            pattern: PathBuf::from("/tiff/run/*_Cycle00001_Ch1_000001.ome.tif"),
            matches: vec![
                PathBuf::from("/tiff/run/a_Cycle00001_Ch1_000001.ome.tif"),
                PathBuf::from("/tiff/run/b_Cycle00001_Ch1_000001.ome.tif"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("found 2"));
        assert!(msg.contains("/tiff/run/*_Cycle00001_Ch1_000001.ome.tif"));
        assert!(msg.contains("a_Cycle00001_Ch1_000001.ome.tif, /tiff/run/b_Cycle"));
        assert_eq!(err.kind(), ErrorKind::Discovery);
    }

    #[test]
    fn test_discovery_message_with_no_matches() {
        let err = Error::Discovery {
            pattern: PathBuf::from("dir/*_Cycle00001_Ch2_000001.ome.tif"),
            matches: Vec::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("found 0: []"));
        assert!(msg.contains("Ch2"));
    }
}
