//! Chunk specifications and their resolution against an array shape.

use crate::{Error, Result};
use std::fmt;

/// Default byte target for auto-sized chunks (128 MiB).
pub const DEFAULT_AUTO_CHUNK_BYTES: usize = 128 * 1024 * 1024;

/// Chunking policy for a single axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkDim {
    /// Sized from the byte budget.
    Auto,
    /// The whole axis forms one chunk.
    Whole,
}

/// Axis-wise chunk sizing policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkSpec {
    /// One entry per axis.
    PerAxis(Vec<ChunkDim>),
    /// The whole array as one chunk, whatever its rank.
    WholeArray,
}

impl ChunkSpec {
    /// Number of entries in the specification.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::PerAxis(dims) => dims.len(),
            Self::WholeArray => 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the specification to a concrete chunk shape.
    ///
    /// Auto axes share `target_bytes` after the whole axes are accounted for,
    /// are clamped to `[1, axis length]` and then evened out so the last chunk
    /// along an axis is not much smaller than the others.
    ///
    /// # Errors
    /// Returns an error if the shape has a zero-length axis or the number of
    /// entries does not match the array rank.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve(
        &self,
        shape: &[usize],
        itemsize: usize,
        target_bytes: usize,
    ) -> Result<Vec<usize>> {
        if shape.contains(&0) {
            return Err(Error::InvalidShape {
                shape: shape.to_vec(),
                reason: "every axis must have a positive length".to_string(),
            });
        }

        let dims = match self {
            Self::WholeArray => return Ok(shape.to_vec()),
            Self::PerAxis(dims) => dims,
        };
        if dims.len() != shape.len() {
            return Err(Error::InvalidChunkSpec(format!(
                "{} entries for a {}-D array",
                dims.len(),
                shape.len()
            )));
        }

        let whole_elems: usize = dims
            .iter()
            .zip(shape)
            .filter(|(dim, _)| **dim == ChunkDim::Whole)
            .map(|(_, &len)| len)
            .product();
        let chunk_bytes = whole_elems.saturating_mul(itemsize.max(1));
        let mut remaining = (target_bytes / chunk_bytes.max(1)).max(1);
        let mut autos_left = dims.iter().filter(|dim| **dim == ChunkDim::Auto).count();

        let mut chunks = Vec::with_capacity(shape.len());
        for (dim, &len) in dims.iter().zip(shape) {
            let size = match dim {
                ChunkDim::Whole => len,
                ChunkDim::Auto => {
                    let share = if autos_left > 1 {
                        (remaining as f64).powf(1.0 / autos_left as f64).floor() as usize
                    } else {
                        remaining
                    };
                    autos_left -= 1;
                    let size = balance(len, share.clamp(1, len));
                    remaining = (remaining / size).max(1);
                    size
                }
            };
            chunks.push(size);
        }
        Ok(chunks)
    }
}

/// Evens out chunks along an axis without increasing their count.
fn balance(len: usize, chunk: usize) -> usize {
    let count = len.div_ceil(chunk);
    len.div_ceil(count)
}

impl fmt::Display for ChunkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WholeArray => f.write_str("(whole array)"),
            Self::PerAxis(dims) => {
                let names: Vec<&str> = dims
                    .iter()
                    .map(|dim| match dim {
                        ChunkDim::Auto => "auto",
                        ChunkDim::Whole => "whole",
                    })
                    .collect();
                write!(f, "({})", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AxisLayout;

    #[test]
    fn test_whole_array_resolves_to_shape() {
        let chunks = ChunkSpec::WholeArray.resolve(&[7, 3], 2, 16).unwrap();
        assert_eq!(chunks, vec![7, 3]);
    }

    #[test]
    fn test_auto_fits_whole_axis_under_default_budget() {
        let spec = AxisLayout::guess(4).chunk_spec();
        let chunks = spec
            .resolve(&[3, 5, 16, 16], 2, DEFAULT_AUTO_CHUNK_BYTES)
            .unwrap();
        assert_eq!(chunks, vec![3, 5, 16, 16]);
    }

    #[test]
    fn test_auto_respects_small_budget() {
        let spec = AxisLayout::guess(3).chunk_spec();
        // One frame is 8 * 8 * 2 = 128 bytes, the budget holds 10 frames.
        let chunks = spec.resolve(&[100, 8, 8], 2, 1280).unwrap();
        assert_eq!(chunks, vec![10, 8, 8]);
    }

    #[test]
    fn test_auto_chunks_are_balanced() {
        let spec = AxisLayout::guess(3).chunk_spec();
        // Budget allows 11 frames; 100 / 11 needs 10 chunks, so 10 frames each.
        let chunks = spec.resolve(&[100, 8, 8], 2, 11 * 128).unwrap();
        assert_eq!(chunks, vec![10, 8, 8]);

        // 10 frames with room for 6 → two chunks of 5.
        let chunks = spec.resolve(&[10, 8, 8], 2, 6 * 128).unwrap();
        assert_eq!(chunks, vec![5, 8, 8]);
    }

    #[test]
    fn test_auto_never_below_one() {
        let spec = AxisLayout::guess(3).chunk_spec();
        let chunks = spec.resolve(&[4, 64, 64], 8, 1).unwrap();
        assert_eq!(chunks, vec![1, 64, 64]);
    }

    #[test]
    fn test_multiple_auto_axes_share_budget() {
        let spec = ChunkSpec::PerAxis(vec![ChunkDim::Auto, ChunkDim::Auto, ChunkDim::Whole]);
        let chunks = spec.resolve(&[100, 100, 4], 1, 4 * 110).unwrap();
        assert_eq!(chunks, vec![10, 10, 4]);
    }

    #[test]
    fn test_rank_mismatch_is_rejected() {
        let spec = AxisLayout::guess(4).chunk_spec();
        let err = spec.resolve(&[3, 16, 16], 2, 1024).unwrap_err();
        assert!(matches!(err, Error::InvalidChunkSpec(_)));
    }

    #[test]
    fn test_zero_axis_is_rejected() {
        let err = ChunkSpec::WholeArray.resolve(&[0, 16], 2, 1024).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { .. }));
    }

    #[test]
    fn test_resolved_rank_matches_array_rank() {
        for rank in 1..=6 {
            let shape = vec![2; rank];
            let chunks = AxisLayout::guess(rank)
                .chunk_spec()
                .resolve(&shape, 2, DEFAULT_AUTO_CHUNK_BYTES)
                .unwrap();
            assert_eq!(chunks.len(), rank);
        }
    }
}
