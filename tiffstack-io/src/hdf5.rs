//! HDF5 output for lazily-read stacks.

use crate::lazy::{LazyArray, Slab};
use crate::plane::PlaneElement;
use crate::{Error, Result};
use hdf5::types::{FloatSize, H5Type, IntSize, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, ArrayViewD, IxDyn};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tiffstack_core::{PixelType, WriteMode};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Dataset write configuration.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub mode: WriteMode,
    pub compression: Option<u8>,
    pub shuffle: bool,
}

/// Summary of a completed write.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PersistReport {
    pub path: PathBuf,
    pub key: String,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: PixelType,
    pub slabs: usize,
    pub bytes: usize,
}

/// Shape, chunking and element type of a stored dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DatasetInfo {
    pub shape: Vec<usize>,
    pub chunks: Option<Vec<usize>>,
    pub dtype: Option<PixelType>,
}

impl LazyArray<'_> {
    /// Materialises the array into dataset `key` of the HDF5 file at `path`.
    ///
    /// The parent directory is created first. Slabs are decoded and written
    /// one after another; a failure part-way leaves an incomplete file behind.
    ///
    /// # Errors
    /// Returns [`Error::Write`] if the file or dataset cannot be created or
    /// written, and [`Error::SourceRead`] if a plane cannot be decoded.
    pub fn persist<P: AsRef<Path>>(
        &self,
        path: P,
        key: &str,
        options: &WriteOptions,
    ) -> Result<PersistReport> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
        }

        match self.dtype() {
            PixelType::Int8 => self.persist_typed::<i8>(path, key, options),
            PixelType::Uint8 => self.persist_typed::<u8>(path, key, options),
            PixelType::Int16 => self.persist_typed::<i16>(path, key, options),
            PixelType::Uint16 => self.persist_typed::<u16>(path, key, options),
            PixelType::Int32 => self.persist_typed::<i32>(path, key, options),
            PixelType::Uint32 => self.persist_typed::<u32>(path, key, options),
            PixelType::Int64 => self.persist_typed::<i64>(path, key, options),
            PixelType::Uint64 => self.persist_typed::<u64>(path, key, options),
            PixelType::Float32 => self.persist_typed::<f32>(path, key, options),
            PixelType::Float64 => self.persist_typed::<f64>(path, key, options),
        }
    }

    fn persist_typed<T: PlaneElement + H5Type>(
        &self,
        path: &Path,
        key: &str,
        options: &WriteOptions,
    ) -> Result<PersistReport> {
        let file = open_output(path, options.mode)?;
        let dataset =
            create_dataset::<T>(&file, path, key, self.shape(), self.chunks(), options)?;
        set_attr_str(
            &dataset,
            path,
            "source_file",
            &self.source().path().display().to_string(),
        )?;

        let slabs = self.slabs();
        let mut bytes = 0usize;
        for (i, slab) in slabs.iter().enumerate() {
            let data: Vec<T> = self.source().read_slab(slab.planes.clone())?;
            write_slab(&dataset, path, slab, &self.slab_shape(slab), &data)?;
            bytes += data.len() * std::mem::size_of::<T>();
            log::debug!(
                "Wrote slab {}/{} (rows {:?}, {} bytes)",
                i + 1,
                slabs.len(),
                slab.rows,
                data.len() * std::mem::size_of::<T>()
            );
        }
        file.flush().map_err(|e| Error::write(path, e))?;

        Ok(PersistReport {
            path: path.to_path_buf(),
            key: key.to_string(),
            shape: self.shape().to_vec(),
            chunks: self.chunks().to_vec(),
            dtype: self.dtype(),
            slabs: slabs.len(),
            bytes,
        })
    }
}

fn open_output(path: &Path, mode: WriteMode) -> Result<File> {
    let file = match mode {
        WriteMode::Truncate => File::create(path),
        WriteMode::Append => File::append(path),
    };
    file.map_err(|e| Error::write(path, e))
}

/// Opens (creating as needed) the groups above `key` and returns the last
/// group together with the dataset name.
fn parent_group<'k>(file: &File, path: &Path, key: &'k str) -> Result<(Group, &'k str)> {
    let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
    let Some((name, groups)) = parts.split_last() else {
        return Err(Error::write(path, "empty dataset key"));
    };

    let mut group = file.group("/").map_err(|e| Error::write(path, e))?;
    for part in groups {
        group = if group.link_exists(part) {
            group.group(part)
        } else {
            group.create_group(part)
        }
        .map_err(|e| Error::write(path, format!("group {part}: {e}")))?;
    }
    Ok((group, name))
}

fn create_dataset<T: H5Type>(
    file: &File,
    path: &Path,
    key: &str,
    shape: &[usize],
    chunks: &[usize],
    options: &WriteOptions,
) -> Result<Dataset> {
    let (group, name) = parent_group(file, path, key)?;
    if group.link_exists(name) {
        log::info!("Replacing existing dataset {key} in {}", path.display());
        group
            .unlink(name)
            .map_err(|e| Error::write(path, format!("dataset {key}: {e}")))?;
    }

    let mut builder = group
        .new_dataset::<T>()
        .shape(shape.to_vec())
        .chunk(chunks.to_vec());

    if let Some(level) = options.compression {
        builder = builder.deflate(level);
    }

    if options.shuffle {
        builder = builder.shuffle();
    }

    builder
        .create(name)
        .map_err(|e| Error::write(path, format!("dataset {key}: {e}")))
}

fn write_slab<T: H5Type>(
    dataset: &Dataset,
    path: &Path,
    slab: &Slab,
    slab_shape: &[usize],
    data: &[T],
) -> Result<()> {
    let view = ArrayViewD::from_shape(IxDyn(slab_shape), data)
        .map_err(|e| Error::write(path, format!("slab shape mismatch: {e}")))?;
    let rows = slab.rows.clone();

    let written = match slab_shape.len() {
        2 => dataset.write(view),
        3 => dataset.write_slice(view, s![rows, .., ..]),
        4 => dataset.write_slice(view, s![rows, .., .., ..]),
        5 => dataset.write_slice(view, s![rows, .., .., .., ..]),
        rank => {
            return Err(Error::write(
                path,
                format!("{rank}-D arrays are not supported"),
            ))
        }
    };
    written.map_err(|e| Error::write(path, format!("rows {:?}: {e}", slab.rows)))
}

fn set_attr_str(dataset: &Dataset, path: &Path, name: &str, value: &str) -> Result<()> {
    let value = VarLenUnicode::from_str(value)
        .map_err(|e| Error::write(path, format!("invalid utf-8 attribute: {e}")))?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(|e| Error::write(path, e))
}

/// Reads shape, chunking and element type of dataset `key`.
///
/// # Errors
/// Returns [`Error::SourceRead`] if the file or dataset cannot be opened.
pub fn read_dataset_info<P: AsRef<Path>>(path: P, key: &str) -> Result<DatasetInfo> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::source_read(path, e))?;
    let dataset = file
        .dataset(key)
        .map_err(|e| Error::source_read(path, format!("dataset {key}: {e}")))?;
    let descriptor = dataset
        .dtype()
        .and_then(|dtype| dtype.to_descriptor())
        .map_err(|e| Error::source_read(path, e))?;

    Ok(DatasetInfo {
        shape: dataset.shape(),
        chunks: dataset.chunk(),
        dtype: pixel_type_of(&descriptor),
    })
}

/// Reads dataset `key` as a flat row-major buffer.
///
/// # Errors
/// Returns [`Error::SourceRead`] if the dataset cannot be read as `T`.
pub fn read_dataset_raw<T: H5Type, P: AsRef<Path>>(path: P, key: &str) -> Result<Vec<T>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::source_read(path, e))?;
    let dataset = file
        .dataset(key)
        .map_err(|e| Error::source_read(path, format!("dataset {key}: {e}")))?;
    dataset
        .read_raw::<T>()
        .map_err(|e| Error::source_read(path, e))
}

/// Names of the members of the group at `group` (`"/"` for the root).
///
/// # Errors
/// Returns [`Error::SourceRead`] if the file or group cannot be opened.
pub fn member_names<P: AsRef<Path>>(path: P, group: &str) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::source_read(path, e))?;
    file.group(group)
        .and_then(|g| g.member_names())
        .map_err(|e| Error::source_read(path, e))
}

fn pixel_type_of(descriptor: &TypeDescriptor) -> Option<PixelType> {
    match descriptor {
        TypeDescriptor::Integer(IntSize::U1) => Some(PixelType::Int8),
        TypeDescriptor::Integer(IntSize::U2) => Some(PixelType::Int16),
        TypeDescriptor::Integer(IntSize::U4) => Some(PixelType::Int32),
        TypeDescriptor::Integer(IntSize::U8) => Some(PixelType::Int64),
        TypeDescriptor::Unsigned(IntSize::U1) => Some(PixelType::Uint8),
        TypeDescriptor::Unsigned(IntSize::U2) => Some(PixelType::Uint16),
        TypeDescriptor::Unsigned(IntSize::U4) => Some(PixelType::Uint32),
        TypeDescriptor::Unsigned(IntSize::U8) => Some(PixelType::Uint64),
        TypeDescriptor::Float(FloatSize::U4) => Some(PixelType::Float32),
        TypeDescriptor::Float(FloatSize::U8) => Some(PixelType::Float64),
        _ => None,
    }
}
