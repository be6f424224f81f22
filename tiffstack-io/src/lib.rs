//! File I/O for tiffstack.
//!
//! This crate provides:
//! - Discovery of the initial OME-TIFF file of a channel
//! - A lazy, plane-addressable view of a multi-file TIFF stack
//! - Chunk planning and chunked HDF5 output (feature `hdf5`)
//! - The conversion pipeline tying these together
//!
//! # Example
//!
//! ```ignore
//! use tiffstack_core::{ConversionContext, ConvertOptions};
//! use tiffstack_io::convert;
//!
//! let ctx = ConversionContext::new("/data/tiff", "/raw/run-001", "/data/run.h5", "data");
//! let report = convert(&ctx, &ConvertOptions::for_channel(1))?;
//! println!("wrote {:?}", report.persist.shape);
//! ```

mod error;

pub mod discovery;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod lazy;
pub mod ome;
pub mod pipeline;
pub mod plane;
pub mod stack;

pub use discovery::{find_initial_tiff, GlobPattern, TIFF_GLOB_ALL, TIFF_GLOB_INIT};
pub use error::{Error, ErrorKind, Result};
#[cfg(feature = "hdf5")]
pub use self::hdf5::{DatasetInfo, PersistReport, WriteOptions};
pub use lazy::{ChunkBudget, LazyArray, Slab};
pub use pipeline::{Conversion, ConversionPlan, ConversionState};
#[cfg(feature = "hdf5")]
pub use pipeline::{convert, ConversionReport};
pub use plane::{PlaneData, PlaneElement};
pub use stack::{StackSource, TiffStack};
