//! Conversion of one channel's TIFF stack into an HDF5 dataset.
//!
//! A [`Conversion`] walks through [`ConversionState`]s in order:
//! discovery of the initial file, opening the stack, planning the chunk
//! layout, and writing. Nothing is written before the `Writing` state, so a
//! conversion that fails earlier leaves the output location untouched.

use crate::discovery::find_initial_tiff;
use crate::lazy::{ChunkBudget, LazyArray};
use crate::stack::TiffStack;
use crate::Result;
use std::fmt;
use std::path::PathBuf;
use tiffstack_core::{AxisLayout, ChunkSpec, ConversionContext, ConvertOptions};

#[cfg(feature = "hdf5")]
use crate::hdf5::{PersistReport, WriteOptions};
#[cfg(feature = "hdf5")]
use std::time::Instant;

/// Stage of a [`Conversion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionState {
    Discovering,
    Opening,
    Planning,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::Opening => "opening",
            Self::Planning => "planning",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything decided before any output is written.
#[derive(Debug)]
pub struct ConversionPlan {
    pub initial_tiff: PathBuf,
    pub stack: TiffStack,
    /// Guessed from the rank alone.
    pub layout: AxisLayout,
    pub spec: ChunkSpec,
    pub target_bytes: usize,
}

impl ConversionPlan {
    /// Lazy chunked view of the planned stack.
    ///
    /// # Errors
    /// Returns an error if the chunk spec does not fit the stack shape.
    pub fn lazy(&self) -> Result<LazyArray<'_>> {
        LazyArray::new(&self.stack, self.spec.clone(), self.target_bytes)
    }
}

/// Outcome of a finished conversion.
#[cfg(feature = "hdf5")]
#[derive(Debug)]
pub struct ConversionReport {
    pub initial_tiff: PathBuf,
    pub layout: AxisLayout,
    pub persist: PersistReport,
}

/// A single-channel conversion.
#[derive(Debug)]
pub struct Conversion<'c> {
    context: &'c ConversionContext,
    options: &'c ConvertOptions,
    state: ConversionState,
}

impl<'c> Conversion<'c> {
    #[must_use]
    pub fn new(context: &'c ConversionContext, options: &'c ConvertOptions) -> Self {
        Self {
            context,
            options,
            state: ConversionState::Discovering,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConversionState {
        self.state
    }

    fn enter(&mut self, next: ConversionState) {
        log::debug!("Conversion {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs discovery, opening and planning. Writes nothing.
    ///
    /// # Errors
    /// Returns [`crate::Error::Discovery`] unless exactly one initial file
    /// matches, [`crate::Error::SourceRead`] if the stack cannot be opened,
    /// and a core error for invalid options.
    pub fn plan(&mut self) -> Result<ConversionPlan> {
        let result = self.plan_stages();
        if result.is_err() {
            self.enter(ConversionState::Failed);
        }
        result
    }

    fn plan_stages(&mut self) -> Result<ConversionPlan> {
        self.context.validate()?;
        self.options.validate()?;

        let search_dir = self.context.search_dir();
        log::info!("Reading TIFF files from {}", search_dir.display());
        let initial_tiff = find_initial_tiff(&search_dir, self.options.channel)?;

        self.enter(ConversionState::Opening);
        let stack = TiffStack::open(&initial_tiff)?;
        log::info!(
            "Found TIFF data with shape {:?} and type {}",
            stack.shape(),
            stack.dtype()
        );

        self.enter(ConversionState::Planning);
        let layout = AxisLayout::guess(stack.rank());
        if layout.axes().is_some() {
            log::info!("Assuming axes are {layout}");
        } else {
            log::info!("Unrecognised {}-D layout, writing a single chunk", stack.rank());
        }
        let budget = ChunkBudget {
            target_bytes: self.options.chunk_bytes,
            memory_fraction: self.options.memory_fraction,
        };
        let target_bytes = budget.resolve_bytes()?;

        Ok(ConversionPlan {
            initial_tiff,
            stack,
            spec: layout.chunk_spec(),
            layout,
            target_bytes,
        })
    }

    /// Runs the whole conversion.
    ///
    /// # Errors
    /// Any error of [`Conversion::plan`], plus [`crate::Error::Write`] if the
    /// output cannot be written.
    #[cfg(feature = "hdf5")]
    pub fn run(&mut self) -> Result<ConversionReport> {
        let plan = self.plan()?;
        let result = self.write(&plan);
        match &result {
            Ok(_) => self.enter(ConversionState::Done),
            Err(_) => self.enter(ConversionState::Failed),
        }
        result
    }

    #[cfg(feature = "hdf5")]
    fn write(&mut self, plan: &ConversionPlan) -> Result<ConversionReport> {
        let lazy = plan.lazy()?;
        log::debug!(
            "Chunks {:?} ({} chunks of {} bytes)",
            lazy.chunks(),
            lazy.chunk_count(),
            lazy.chunk_bytes()
        );

        self.enter(ConversionState::Writing);
        let path = &self.context.hdf5_path;
        log::info!("Writing data to hdf5: {}", path.display());
        let start = Instant::now();
        let options = WriteOptions {
            mode: self.options.write_mode,
            compression: self.options.compression,
            shuffle: self.options.shuffle,
        };
        let persist = lazy.persist(path, &self.context.hdf5_key, &options)?;
        log::info!(
            "Done writing hdf5 ({:.2}s)",
            start.elapsed().as_secs_f64()
        );

        Ok(ConversionReport {
            initial_tiff: plan.initial_tiff.clone(),
            layout: plan.layout,
            persist,
        })
    }
}

/// Converts one channel as described by `context` and `options`.
///
/// # Errors
/// See [`Conversion::run`].
#[cfg(feature = "hdf5")]
pub fn convert(context: &ConversionContext, options: &ConvertOptions) -> Result<ConversionReport> {
    Conversion::new(context, options).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::fs::{self, File};
    use std::path::Path;
    use tempfile::tempdir;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_pages(path: &Path, pages: usize) {
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        for page in 0..pages {
            let data: Vec<u8> = (0..16).map(|i| (page * 16 + i) as u8).collect();
            encoder.write_image::<colortype::Gray8>(4, 4, &data).unwrap();
        }
    }

    fn context(root: &Path) -> ConversionContext {
        ConversionContext::new(
            root.join("tiff"),
            "/raw/run-001",
            root.join("out").join("run.h5"),
            "data",
        )
    }

    #[test]
    fn test_plan_single_file() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let search = ctx.search_dir();
        fs::create_dir_all(&search).unwrap();
        write_pages(&search.join("run_Cycle00001_Ch1_000001.ome.tif"), 6);

        let options = ConvertOptions::for_channel(1).with_chunk_bytes(32);
        let mut conversion = Conversion::new(&ctx, &options);
        let plan = conversion.plan().unwrap();
        assert_eq!(conversion.state(), ConversionState::Planning);
        assert_eq!(plan.stack.shape(), &[6, 4, 4]);
        assert_eq!(plan.layout, AxisLayout::TimeYX);
        assert_eq!(plan.target_bytes, 32);
        assert_eq!(plan.lazy().unwrap().chunks(), &[2, 4, 4]);

        // Planning writes nothing.
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_discovery_failure_marks_failed() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        fs::create_dir_all(ctx.search_dir()).unwrap();

        let options = ConvertOptions::for_channel(2);
        let mut conversion = Conversion::new(&ctx, &options);
        let err = conversion.plan().unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
        assert_eq!(conversion.state(), ConversionState::Failed);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_invalid_options_fail_before_discovery() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let options = ConvertOptions::for_channel(1).with_memory_fraction(2.0);
        let err = Conversion::new(&ctx, &options).plan().unwrap_err();
        assert!(matches!(err, Error::CoreError(_)));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_run_reaches_done() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let search = ctx.search_dir();
        fs::create_dir_all(&search).unwrap();
        write_pages(&search.join("run_Cycle00001_Ch1_000001.ome.tif"), 3);

        let options = ConvertOptions::for_channel(1);
        let mut conversion = Conversion::new(&ctx, &options);
        let report = conversion.run().unwrap();
        assert_eq!(conversion.state(), ConversionState::Done);
        assert_eq!(report.persist.shape, vec![3, 4, 4]);
        assert_eq!(report.persist.chunks, vec![3, 4, 4]);
        assert!(ctx.hdf5_path.is_file());
    }
}
