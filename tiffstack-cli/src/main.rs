//! tiffstack CLI
//!
//! Converts one acquisition channel's OME-TIFF stack into a chunked HDF5
//! dataset.
#![allow(clippy::uninlined_format_args)]

use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tiffstack_core::{ConversionContext, ConvertOptions, PartialContext, WriteMode};
use tiffstack_io::Conversion;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TiffstackIo(#[from] tiffstack_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tiffstack_core::Error),

    #[error("invalid context file {}: {source}", .path.display())]
    Context {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Usage(String),

    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage(_) | Self::Context { .. } => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

/// Convert multi-file OME-TIFF stacks to chunked HDF5.
#[derive(Parser)]
#[command(name = "tiffstack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for plane decoding (default: all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one channel's TIFF stack into an HDF5 dataset
    Tiff2hdf5 {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Show the stack and chunk plan without writing anything
    Info {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        options: OptionArgs,
    },
}

#[derive(Args, Debug)]
struct ContextArgs {
    /// JSON file with tiff_path, raw_path, hdf5_path and hdf5_key
    #[arg(long)]
    context: Option<PathBuf>,

    /// Directory the TIFF output was written to
    #[arg(long)]
    tiff_path: Option<PathBuf>,

    /// Raw acquisition directory (only its base name is used)
    #[arg(long)]
    raw_path: Option<PathBuf>,

    /// Output HDF5 file
    #[arg(long)]
    hdf5_path: Option<PathBuf>,

    /// Dataset key inside the HDF5 file
    #[arg(long)]
    hdf5_key: Option<String>,
}

#[derive(Args, Debug)]
struct OptionArgs {
    /// Acquisition channel
    #[arg(short, long)]
    channel: u32,

    /// Byte target for auto-sized chunks (default: 128 MiB, memory permitting)
    #[arg(long)]
    chunk_bytes: Option<usize>,

    /// Cap the default chunk target at this fraction of available memory
    #[arg(long, default_value = "0.25")]
    memory_fraction: f64,

    /// Deflate compression level (0-9)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    compression: Option<u8>,

    /// Enable the shuffle filter
    #[arg(long)]
    shuffle: bool,

    /// Keep an existing output file and replace only the dataset at the key
    #[arg(long)]
    append: bool,
}

impl ContextArgs {
    /// Merges the context file (if any) with flags; flags win.
    fn resolve(self) -> Result<ConversionContext> {
        let file = match &self.context {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                serde_json::from_str::<PartialContext>(&text).map_err(|source| {
                    CliError::Context {
                        path: path.clone(),
                        source,
                    }
                })?
            }
            None => PartialContext::default(),
        };

        let flags = PartialContext {
            tiff_path: self.tiff_path,
            raw_path: self.raw_path,
            hdf5_path: self.hdf5_path,
            hdf5_key: self.hdf5_key,
        };
        let merged = flags.or(file);
        if let Some(field) = merged.missing_fields().first() {
            return Err(CliError::Usage(format!(
                "missing --{} (or \"{field}\" in the --context file)",
                field.replace('_', "-")
            )));
        }
        Ok(merged.complete()?)
    }
}

impl OptionArgs {
    fn to_options(&self) -> ConvertOptions {
        let mut options = ConvertOptions::for_channel(self.channel)
            .with_memory_fraction(self.memory_fraction)
            .with_shuffle(self.shuffle);
        if let Some(bytes) = self.chunk_bytes {
            options = options.with_chunk_bytes(bytes);
        }
        if let Some(level) = self.compression {
            options = options.with_compression(level);
        }
        if self.append {
            options = options.with_write_mode(WriteMode::Append);
        }
        options
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(threads) = cli.threads {
        if threads == 0 {
            return Err(CliError::Usage("--threads must be at least 1".to_string()));
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match cli.command {
        Commands::Tiff2hdf5 { context, options } => {
            let context = context.resolve()?;
            let options = options.to_options();
            let report = Conversion::new(&context, &options).run()?;
            log::debug!(
                "Wrote {} ({} bytes in {} slabs)",
                report.persist.path.display(),
                report.persist.bytes,
                report.persist.slabs
            );
        }
        Commands::Info { context, options } => {
            let context = context.resolve()?;
            let options = options.to_options();
            let plan = Conversion::new(&context, &options).plan()?;
            let lazy = plan.lazy()?;

            println!("Initial file: {}", plan.initial_tiff.display());
            println!(
                "Layout from:  {} ({} file(s), {} plane(s))",
                plan.stack.source(),
                plan.stack.files().len(),
                plan.stack.plane_count()
            );
            println!("Shape:        {:?}", lazy.shape());
            println!("Type:         {}", lazy.dtype());
            println!("Axes (guess): {}", plan.layout);
            println!("Chunk spec:   {}", lazy.spec());
            println!(
                "Chunks:       {:?} ({} chunk(s), {} bytes each)",
                lazy.chunks(),
                lazy.chunk_count(),
                lazy.chunk_bytes()
            );
            println!(
                "Output:       {}:{}",
                context.hdf5_path.display(),
                context.hdf5_key
            );
        }
    }

    Ok(())
}
