//! Locating the TIFF files of one acquisition channel.
//!
//! The acquisition software names every file
//! `<run>_Cycle<NNNNN>_Ch<c>_<IIIIII>.ome.tif`. The first file of a channel
//! carries the metadata needed to open the whole stack, so discovery only has
//! to find that one file.

use crate::{Error, Result};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Template for the first file of a channel.
pub const TIFF_GLOB_INIT: &str = "*_Cycle00001_Ch{channel}_000001.ome.tif";
/// Template for every file of a channel.
pub const TIFF_GLOB_ALL: &str = "*_Cycle*_Ch{channel}_*.ome.tif";

/// Glob pattern matching the first TIFF file of `channel`.
#[must_use]
pub fn initial_pattern(channel: u32) -> String {
    TIFF_GLOB_INIT.replace("{channel}", &channel.to_string())
}

/// Glob pattern matching all TIFF files of `channel`.
#[must_use]
pub fn sibling_pattern(channel: u32) -> String {
    TIFF_GLOB_ALL.replace("{channel}", &channel.to_string())
}

/// A shell-style file name pattern.
///
/// `*` matches any run of characters, `?` matches one character and every
/// other character matches itself.
#[derive(Clone, Debug)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compiles a file name pattern.
    ///
    /// # Errors
    /// Returns an error if the translated expression cannot be compiled.
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut buf = [0u8; 4];
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut buf))),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|e| Error::Pattern(e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn is_match(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    /// Regular files (or links to them) in `dir` whose names match, sorted
    /// by path.
    ///
    /// A missing directory yields no matches.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be listed.
    pub fn matches_in(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            // Follows symlinks; directories are skipped.
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if self.is_match(name) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

/// Finds the single initial TIFF file of `channel` in `dir`.
///
/// # Errors
/// Returns [`Error::Discovery`] with the attempted pattern and every match
/// when the number of matches is not exactly one.
pub fn find_initial_tiff(dir: &Path, channel: u32) -> Result<PathBuf> {
    let glob = GlobPattern::new(&initial_pattern(channel))?;
    let mut matches = glob.matches_in(dir)?;
    log::debug!(
        "{} match(es) for {} in {}",
        matches.len(),
        glob.as_str(),
        dir.display()
    );
    if matches.len() != 1 {
        return Err(Error::Discovery {
            pattern: dir.join(glob.as_str()),
            matches,
        });
    }
    Ok(matches.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_initial_pattern_for_channels() {
        assert_eq!(initial_pattern(1), "*_Cycle00001_Ch1_000001.ome.tif");
        assert_eq!(initial_pattern(2), "*_Cycle00001_Ch2_000001.ome.tif");
        assert_eq!(initial_pattern(13), "*_Cycle00001_Ch13_000001.ome.tif");
        assert_eq!(sibling_pattern(3), "*_Cycle*_Ch3_*.ome.tif");
    }

    #[test]
    fn test_glob_matches_literally() {
        let glob = GlobPattern::new(&initial_pattern(1)).unwrap();
        assert!(glob.is_match("run-001_Cycle00001_Ch1_000001.ome.tif"));
        assert!(!glob.is_match("run-001_Cycle00001_Ch1_000002.ome.tif"));
        assert!(!glob.is_match("run-001_Cycle00002_Ch1_000001.ome.tif"));
        assert!(!glob.is_match("run-001_Cycle00001_Ch12_000001.ome.tif"));
        // The dots are literal.
        assert!(!glob.is_match("run-001_Cycle00001_Ch1_000001xomextif"));
        assert!(!glob.is_match("_Cycle00001_Ch1_000001.ome.tif.bak"));
    }

    #[test]
    fn test_question_mark_matches_one_character() {
        let glob = GlobPattern::new("frame_?.tif").unwrap();
        assert!(glob.is_match("frame_1.tif"));
        assert!(!glob.is_match("frame_12.tif"));
    }

    #[test]
    fn test_find_single_initial_file() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "run_Cycle00001_Ch1_000001.ome.tif");
        touch(dir.path(), "run_Cycle00001_Ch1_000002.ome.tif");
        touch(dir.path(), "run_Cycle00002_Ch1_000001.ome.tif");
        touch(dir.path(), "run_Cycle00001_Ch2_000001.ome.tif");

        let found = find_initial_tiff(dir.path(), 1).unwrap();
        assert_eq!(found, dir.path().join("run_Cycle00001_Ch1_000001.ome.tif"));
    }

    #[test]
    fn test_no_match_is_discovery_error() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "run_Cycle00001_Ch1_000001.ome.tif");

        let err = find_initial_tiff(dir.path(), 2).unwrap_err();
        match &err {
            Error::Discovery { pattern, matches } => {
                assert!(matches.is_empty());
                assert_eq!(
                    pattern,
                    &dir.path().join("*_Cycle00001_Ch2_000001.ome.tif")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("*_Cycle00001_Ch2_000001.ome.tif"));
    }

    #[test]
    fn test_ambiguous_match_is_discovery_error() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a_Cycle00001_Ch1_000001.ome.tif");
        touch(dir.path(), "b_Cycle00001_Ch1_000001.ome.tif");

        let err = find_initial_tiff(dir.path(), 1).unwrap_err();
        match &err {
            Error::Discovery { matches, .. } => assert_eq!(matches.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("a_Cycle00001_Ch1_000001.ome.tif"));
        assert!(msg.contains("b_Cycle00001_Ch1_000001.ome.tif"));
        assert!(msg.contains("*_Cycle00001_Ch1_000001.ome.tif"));
    }

    #[test]
    fn test_directories_are_ignored() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("x_Cycle00001_Ch1_000001.ome.tif")).unwrap();
        touch(dir.path(), "run_Cycle00001_Ch1_000001.ome.tif");

        let found = find_initial_tiff(dir.path(), 1).unwrap();
        assert_eq!(found, dir.path().join("run_Cycle00001_Ch1_000001.ome.tif"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_files_are_found() {
        let data = tempdir().unwrap();
        let search = tempdir().unwrap();
        let target = data.path().join("run_Cycle00001_Ch1_000001.ome.tif");
        touch(data.path(), "run_Cycle00001_Ch1_000001.ome.tif");
        let link = search.path().join("run_Cycle00001_Ch1_000001.ome.tif");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        // Links to directories still do not count.
        std::os::unix::fs::symlink(data.path(), search.path().join("x_Cycle00001_Ch1_000001.ome.tif"))
            .unwrap();

        let found = find_initial_tiff(search.path(), 1).unwrap();
        assert_eq!(found, link);
    }

    #[test]
    fn test_missing_directory_is_discovery_error() {
        let dir = tempdir().unwrap();
        let err = find_initial_tiff(&dir.path().join("absent"), 1).unwrap_err();
        assert!(matches!(err, Error::Discovery { ref matches, .. } if matches.is_empty()));
    }
}
