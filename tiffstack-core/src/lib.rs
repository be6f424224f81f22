//! tiffstack-core: Core types and policies for OME-TIFF to HDF5 conversion.
//!
//! This crate holds everything that does not touch the filesystem: the
//! conversion context handed in by the caller, pixel types, the rank-based
//! axis heuristic and the chunk specification it produces.
//!

pub mod chunking;
pub mod context;
pub mod error;
pub mod layout;
pub mod pixel;

pub use chunking::{ChunkDim, ChunkSpec, DEFAULT_AUTO_CHUNK_BYTES};
pub use context::{ConversionContext, ConvertOptions, PartialContext, WriteMode};
pub use error::{Error, Result};
pub use layout::{Axis, AxisLayout};
pub use pixel::PixelType;
