//! Caller-supplied conversion context and options.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where to look for TIFF files and where to put the HDF5 output.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionContext {
    /// Directory the acquisition software wrote its TIFF output to.
    pub tiff_path: PathBuf,
    /// Raw acquisition directory. Only its final component is used.
    pub raw_path: PathBuf,
    /// Destination HDF5 file.
    pub hdf5_path: PathBuf,
    /// Dataset key inside the HDF5 file (`/`-separated groups allowed).
    pub hdf5_key: String,
}

impl ConversionContext {
    #[must_use]
    pub fn new(
        tiff_path: impl Into<PathBuf>,
        raw_path: impl Into<PathBuf>,
        hdf5_path: impl Into<PathBuf>,
        hdf5_key: impl Into<String>,
    ) -> Self {
        Self {
            tiff_path: tiff_path.into(),
            raw_path: raw_path.into(),
            hdf5_path: hdf5_path.into(),
            hdf5_key: hdf5_key.into(),
        }
    }

    /// Directory holding the TIFF files for this acquisition.
    ///
    /// The acquisition software appends the raw directory's base name to the
    /// output directory it is given, so the same is done here.
    #[must_use]
    pub fn search_dir(&self) -> PathBuf {
        match self.raw_path.file_name() {
            Some(name) => self.tiff_path.join(name),
            None => self.tiff_path.clone(),
        }
    }

    /// Parent directory of the HDF5 output, if it has one.
    #[must_use]
    pub fn hdf5_dir(&self) -> Option<&Path> {
        self.hdf5_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
    }

    /// Checks that the context can be used for a conversion.
    ///
    /// # Errors
    /// Returns an error if the dataset key or output path is empty.
    pub fn validate(&self) -> Result<()> {
        if self.hdf5_key.trim_matches('/').is_empty() {
            return Err(Error::ConfigError("hdf5_key must not be empty".to_string()));
        }
        if self.hdf5_path.as_os_str().is_empty() {
            return Err(Error::ConfigError("hdf5_path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// A [`ConversionContext`] that may still be missing fields.
///
/// Context files and command-line flags each supply some of the fields;
/// [`PartialContext::or`] layers them and [`PartialContext::complete`] builds
/// the final context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PartialContext {
    pub tiff_path: Option<PathBuf>,
    pub raw_path: Option<PathBuf>,
    pub hdf5_path: Option<PathBuf>,
    pub hdf5_key: Option<String>,
}

impl PartialContext {
    /// Fields set in `self` win over those in `base`.
    #[must_use]
    pub fn or(self, base: Self) -> Self {
        Self {
            tiff_path: self.tiff_path.or(base.tiff_path),
            raw_path: self.raw_path.or(base.raw_path),
            hdf5_path: self.hdf5_path.or(base.hdf5_path),
            hdf5_key: self.hdf5_key.or(base.hdf5_key),
        }
    }

    /// Names of the fields that are still unset, in declaration order.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.tiff_path.is_none() {
            missing.push("tiff_path");
        }
        if self.raw_path.is_none() {
            missing.push("raw_path");
        }
        if self.hdf5_path.is_none() {
            missing.push("hdf5_path");
        }
        if self.hdf5_key.is_none() {
            missing.push("hdf5_key");
        }
        missing
    }

    /// Builds the context.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] naming every unset field.
    pub fn complete(self) -> Result<ConversionContext> {
        let missing = self.missing_fields();
        match (self.tiff_path, self.raw_path, self.hdf5_path, self.hdf5_key) {
            (Some(tiff_path), Some(raw_path), Some(hdf5_path), Some(hdf5_key)) => {
                Ok(ConversionContext {
                    tiff_path,
                    raw_path,
                    hdf5_path,
                    hdf5_key,
                })
            }
            _ => Err(Error::ConfigError(format!(
                "missing context field(s): {}",
                missing.join(", ")
            ))),
        }
    }
}

impl From<ConversionContext> for PartialContext {
    fn from(ctx: ConversionContext) -> Self {
        Self {
            tiff_path: Some(ctx.tiff_path),
            raw_path: Some(ctx.raw_path),
            hdf5_path: Some(ctx.hdf5_path),
            hdf5_key: Some(ctx.hdf5_key),
        }
    }
}

/// How an existing output file is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WriteMode {
    /// Replace the whole file.
    #[default]
    Truncate,
    /// Keep the file and its other datasets; replace the dataset at the key.
    Append,
}

/// Conversion options beyond the context.
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// Acquisition channel to convert.
    pub channel: u32,
    /// Explicit byte target for auto-sized chunks.
    pub chunk_bytes: Option<usize>,
    /// Upper bound on the chunk target as a fraction of available memory
    /// (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    pub write_mode: WriteMode,
    /// Deflate level (0-9).
    pub compression: Option<u8>,
    pub shuffle: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            channel: 1,
            chunk_bytes: None,
            memory_fraction: 0.25,
            write_mode: WriteMode::Truncate,
            compression: None,
            shuffle: false,
        }
    }
}

impl ConvertOptions {
    #[must_use]
    pub fn for_channel(channel: u32) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    /// Set an explicit byte target for auto-sized chunks.
    #[must_use]
    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Enable deflate compression. [`ConvertOptions::validate`] rejects
    /// levels above 9.
    #[must_use]
    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression = Some(level);
        self
    }

    #[must_use]
    pub fn with_shuffle(mut self, enabled: bool) -> Self {
        self.shuffle = enabled;
        self
    }

    /// Checks option ranges.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is outside `(0.0, 1.0]`, the
    /// chunk target is zero or the compression level exceeds 9.
    pub fn validate(&self) -> Result<()> {
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::ConfigError(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        if self.chunk_bytes == Some(0) {
            return Err(Error::ConfigError(
                "chunk_bytes must be at least 1".to_string(),
            ));
        }
        if let Some(level) = self.compression {
            if level > 9 {
                return Err(Error::ConfigError(format!(
                    "compression level {level} is outside 0-9"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_dir_appends_raw_base_name() {
        let ctx = ConversionContext::new(
            "/data/tiff",
            "/mnt/raw/2024-01-01/mouse1-001",
            "/data/out/run.h5",
            "data",
        );
        assert_eq!(ctx.search_dir(), PathBuf::from("/data/tiff/mouse1-001"));
    }

    #[test]
    fn test_search_dir_without_raw_name() {
        let ctx = ConversionContext::new("/data/tiff", "/", "out.h5", "data");
        assert_eq!(ctx.search_dir(), PathBuf::from("/data/tiff"));
    }

    #[test]
    fn test_hdf5_dir() {
        let ctx = ConversionContext::new("t", "r", "out/run.h5", "data");
        assert_eq!(ctx.hdf5_dir(), Some(Path::new("out")));

        let ctx = ConversionContext::new("t", "r", "run.h5", "data");
        assert_eq!(ctx.hdf5_dir(), None);
    }

    #[test]
    fn test_context_validation() {
        let ctx = ConversionContext::new("t", "r", "run.h5", "/");
        assert!(matches!(ctx.validate(), Err(Error::ConfigError(_))));

        let ctx = ConversionContext::new("t", "r", "", "data");
        assert!(matches!(ctx.validate(), Err(Error::ConfigError(_))));

        let ctx = ConversionContext::new("t", "r", "run.h5", "data");
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        assert!(ConvertOptions::default().validate().is_ok());
        assert!(ConvertOptions::default()
            .with_memory_fraction(0.0)
            .validate()
            .is_err());
        assert!(ConvertOptions::default()
            .with_memory_fraction(1.5)
            .validate()
            .is_err());
        assert!(ConvertOptions::default()
            .with_chunk_bytes(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_compression_level_out_of_range_is_rejected() {
        let options = ConvertOptions::default().with_compression(12);
        assert_eq!(options.compression, Some(12));
        assert!(matches!(options.validate(), Err(Error::ConfigError(_))));
        assert!(ConvertOptions::default()
            .with_compression(9)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_partial_context_layers_and_completes() {
        let flags = PartialContext {
            hdf5_path: Some(PathBuf::from("/flag/run.h5")),
            ..PartialContext::default()
        };
        let file = PartialContext {
            tiff_path: Some(PathBuf::from("/data/tiff")),
            raw_path: Some(PathBuf::from("/raw/run-001")),
            hdf5_path: Some(PathBuf::from("/file/run.h5")),
            hdf5_key: None,
        };

        let merged = flags.or(file);
        assert_eq!(merged.missing_fields(), vec!["hdf5_key"]);
        let err = merged.clone().complete().unwrap_err();
        assert!(err.to_string().contains("hdf5_key"));

        let ctx = PartialContext {
            hdf5_key: Some("data".to_string()),
            ..PartialContext::default()
        }
        .or(merged)
        .complete()
        .unwrap();
        assert_eq!(ctx.hdf5_path, PathBuf::from("/flag/run.h5"));
        assert_eq!(ctx.search_dir(), PathBuf::from("/data/tiff/run-001"));
        assert_eq!(PartialContext::from(ctx).missing_fields(), Vec::<&str>::new());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_context_from_json() {
        let json = r#"{
            "tiff_path": "/data/tiff",
            "raw_path": "/raw/run-001",
            "hdf5_path": "/data/out/run.h5",
            "hdf5_key": "data"
        }"#;
        let ctx: ConversionContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.search_dir(), PathBuf::from("/data/tiff/run-001"));
        assert_eq!(ctx.hdf5_key, "data");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_context_from_json_ignores_unknown_fields() {
        let json = r#"{"tiff_path": "/data/tiff", "hdf5_key": "data", "session": 3}"#;
        let partial: PartialContext = serde_json::from_str(json).unwrap();
        assert_eq!(partial.tiff_path, Some(PathBuf::from("/data/tiff")));
        assert_eq!(partial.missing_fields(), vec!["raw_path", "hdf5_path"]);
    }
}
