//! Lazily-evaluated chunked view over a [`TiffStack`].
//!
//! Building a [`LazyArray`] only resolves the chunk shape. Pixel data is read
//! when the array is persisted, one slab of chunk rows at a time.

use crate::stack::TiffStack;
use crate::Result;
use std::ops::Range;
use sysinfo::System;
use tiffstack_core::{ChunkSpec, PixelType, DEFAULT_AUTO_CHUNK_BYTES};

/// Byte target for auto-sized chunks.
#[derive(Clone, Debug)]
pub struct ChunkBudget {
    /// Explicit target. If set, `memory_fraction` is ignored.
    pub target_bytes: Option<usize>,
    /// Cap the default target at this fraction of available memory.
    pub memory_fraction: f64,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            target_bytes: None,
            memory_fraction: 0.25,
        }
    }
}

impl ChunkBudget {
    /// Resolves the target in bytes.
    ///
    /// Without an explicit target this is [`DEFAULT_AUTO_CHUNK_BYTES`],
    /// lowered to `memory_fraction` of available memory on small machines.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is outside `(0.0, 1.0]`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.target_bytes {
            return Ok(bytes.max(1));
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(tiffstack_core::Error::ConfigError(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            )
            .into());
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Ok(DEFAULT_AUTO_CHUNK_BYTES);
        }
        let cap = (available as f64 * self.memory_fraction).floor() as u64;
        let cap = usize::try_from(cap).unwrap_or(usize::MAX).max(1);
        Ok(DEFAULT_AUTO_CHUNK_BYTES.min(cap))
    }
}

/// Rows of axis 0 and the planes that back them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slab {
    pub rows: Range<usize>,
    pub planes: Range<usize>,
}

/// A chunked, not yet materialised view of a stack.
#[derive(Debug)]
pub struct LazyArray<'a> {
    source: &'a TiffStack,
    spec: ChunkSpec,
    chunks: Vec<usize>,
}

impl<'a> LazyArray<'a> {
    /// Describes `source` chunked by `spec`. No pixel data is read.
    ///
    /// # Errors
    /// Returns an error if `spec` does not fit the source shape.
    pub fn new(source: &'a TiffStack, spec: ChunkSpec, target_bytes: usize) -> Result<Self> {
        let chunks = spec.resolve(source.shape(), source.dtype().size_bytes(), target_bytes)?;
        Ok(Self {
            source,
            spec,
            chunks,
        })
    }

    #[must_use]
    pub fn source(&self) -> &'a TiffStack {
        self.source
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.source.shape()
    }

    #[must_use]
    pub fn dtype(&self) -> PixelType {
        self.source.dtype()
    }

    #[must_use]
    pub fn spec(&self) -> &ChunkSpec {
        &self.spec
    }

    /// Resolved chunk shape, same rank as the source.
    #[must_use]
    pub fn chunks(&self) -> &[usize] {
        &self.chunks
    }

    /// Total number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.shape()
            .iter()
            .zip(&self.chunks)
            .map(|(&len, &chunk)| len.div_ceil(chunk))
            .product()
    }

    /// Size of one full chunk in bytes.
    #[must_use]
    pub fn chunk_bytes(&self) -> usize {
        self.chunks.iter().product::<usize>() * self.dtype().size_bytes()
    }

    /// Slabs covering the array, one chunk row along axis 0 each.
    ///
    /// A 2-D array is a single slab over its only plane.
    #[must_use]
    pub fn slabs(&self) -> Vec<Slab> {
        let shape = self.shape();
        if shape.len() <= 2 {
            return vec![Slab {
                rows: 0..1,
                planes: 0..self.source.plane_count(),
            }];
        }
        let rows = shape[0];
        let planes_per_row: usize = shape[1..shape.len() - 2].iter().product();
        let step = self.chunks[0].max(1);
        (0..rows)
            .step_by(step)
            .map(|start| {
                let end = (start + step).min(rows);
                Slab {
                    rows: start..end,
                    planes: start * planes_per_row..end * planes_per_row,
                }
            })
            .collect()
    }

    /// Shape of the data held by `slab`.
    #[must_use]
    pub fn slab_shape(&self, slab: &Slab) -> Vec<usize> {
        let mut shape = self.shape().to_vec();
        if shape.len() > 2 {
            shape[0] = slab.rows.len();
        }
        shape
    }
}
