//! Multi-file TIFF stacks exposed as one lazily-read array.
//!
//! Opening a stack reads metadata and probes a single plane; pixel data is
//! only decoded when planes are requested. The stack layout comes from, in
//! order of preference:
//!
//! 1. OME-XML in the first file's `ImageDescription`,
//! 2. the `_Cycle<N>_Ch<c>_<I>.ome.tif` names of the sibling files,
//! 3. the pages of the initial file alone.

use crate::discovery::{sibling_pattern, GlobPattern};
use crate::ome::{is_ome_xml, parse_ome_xml, OmePixels};
use crate::plane::{DecodedPage, PageReader, PlaneData, PlaneElement};
use crate::{Error, Result};
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tiffstack_core::PixelType;

#[cfg(feature = "serde")]
use serde::Serialize;

/// How the stack layout was inferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StackSource {
    OmeXml,
    FilenameSeries,
    SingleFile,
}

impl fmt::Display for StackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OmeXml => "OME-XML",
            Self::FilenameSeries => "file name series",
            Self::SingleFile => "single file",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PlaneRef {
    file: usize,
    ifd: usize,
}

/// A read-only N-D view over the planes of one acquisition.
///
/// The last two axes are always `(y, x)`. Leading axes of length one are
/// dropped.
#[derive(Clone, Debug)]
pub struct TiffStack {
    path: PathBuf,
    source: StackSource,
    files: Vec<PathBuf>,
    planes: Vec<PlaneRef>,
    shape: Vec<usize>,
    dtype: PixelType,
}

/// Layout before the probe plane is decoded.
struct Layout {
    source: StackSource,
    files: Vec<PathBuf>,
    planes: Vec<PlaneRef>,
    leading: Vec<usize>,
    expected: Option<(usize, usize, PixelType)>,
}

impl TiffStack {
    /// Opens the stack anchored at `path`.
    ///
    /// # Errors
    /// Returns [`Error::SourceRead`] if the file or its siblings cannot be
    /// read, the metadata is inconsistent, or a sibling file is missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = PageReader::open(path)?;
        let description = reader.description()?;

        let layout = match description.as_deref().filter(|d| is_ome_xml(d)) {
            Some(xml) => {
                let pixels = parse_ome_xml(xml).map_err(|e| Error::source_read(path, e))?;
                ome_layout(path, &pixels)?
            }
            None => {
                let pages = reader.count_pages()?;
                match filename_layout(path, pages)? {
                    Some(layout) => layout,
                    None => single_file_layout(path, pages),
                }
            }
        };

        for file in &layout.files {
            if !file.is_file() {
                return Err(Error::source_read(
                    path,
                    format!("missing sibling file {}", file.display()),
                ));
            }
        }

        let probe_ref = layout.planes[0];
        let probe = if probe_ref.file == 0 {
            reader.read_page(probe_ref.ifd)?
        } else {
            PageReader::open(&layout.files[probe_ref.file])?.read_page(probe_ref.ifd)?
        };
        let dtype = probe.data.pixel_type();
        if let Some((width, height, expected)) = layout.expected {
            check_probe(path, &probe, width, height, expected)?;
        }

        let mut shape: Vec<usize> = layout.leading.into_iter().filter(|&n| n != 1).collect();
        shape.push(probe.height);
        shape.push(probe.width);

        let stack = Self {
            path: path.to_path_buf(),
            source: layout.source,
            files: layout.files,
            planes: layout.planes,
            shape,
            dtype,
        };
        log::debug!(
            "Opened {} stack over {} file(s), {} plane(s)",
            stack.source,
            stack.files.len(),
            stack.planes.len()
        );
        Ok(stack)
    }

    /// The file the stack was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source(&self) -> StackSource {
        self.source
    }

    /// Every file backing the stack; the initial file comes first.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn dtype(&self) -> PixelType {
        self.dtype
    }

    /// Number of 2-D planes, i.e. the product of all but the last two axes.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Elements per plane.
    #[must_use]
    pub fn plane_len(&self) -> usize {
        self.shape[self.rank() - 2..].iter().product()
    }

    /// Decodes planes `range` (in row-major order over the leading axes).
    ///
    /// Pages that live in the same file are decoded through one reader; the
    /// files themselves are decoded in parallel.
    ///
    /// # Errors
    /// Returns [`Error::SourceRead`] if a page cannot be decoded or does not
    /// match the stack's plane shape and element type.
    pub fn read_planes(&self, range: Range<usize>) -> Result<Vec<PlaneData>> {
        if range.end > self.planes.len() || range.start > range.end {
            return Err(Error::source_read(
                &self.path,
                format!(
                    "plane range {range:?} is outside 0..{}",
                    self.planes.len()
                ),
            ));
        }

        let mut groups: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for (slot, index) in range.clone().enumerate() {
            let plane = self.planes[index];
            groups.entry(plane.file).or_default().push((slot, plane.ifd));
        }

        let decoded: Vec<Vec<(usize, PlaneData)>> = groups
            .into_par_iter()
            .map(|(file, pages)| self.decode_file_pages(file, &pages))
            .collect::<Result<_>>()?;

        let mut out: Vec<Option<PlaneData>> = vec![None; range.len()];
        for (slot, data) in decoded.into_iter().flatten() {
            out[slot] = Some(data);
        }
        out.into_iter()
            .map(|plane| {
                plane.ok_or_else(|| Error::source_read(&self.path, "plane was not decoded"))
            })
            .collect()
    }

    /// Decodes planes `range` into one contiguous buffer of `T`.
    ///
    /// # Errors
    /// Returns [`Error::SourceRead`] if decoding fails or `T` is not the
    /// stack's element type.
    pub fn read_slab<T: PlaneElement>(&self, range: Range<usize>) -> Result<Vec<T>> {
        if T::PIXEL_TYPE != self.dtype {
            return Err(Error::source_read(
                &self.path,
                format!("requested {} from a {} stack", T::PIXEL_TYPE, self.dtype),
            ));
        }
        let plane_len = self.plane_len();
        let mut slab = Vec::with_capacity(range.len() * plane_len);
        for plane in self.read_planes(range)? {
            let pixels = T::unpack(plane).ok_or_else(|| {
                Error::source_read(&self.path, "plane element type changed within the stack")
            })?;
            slab.extend_from_slice(&pixels);
        }
        Ok(slab)
    }

    fn decode_file_pages(
        &self,
        file: usize,
        pages: &[(usize, usize)],
    ) -> Result<Vec<(usize, PlaneData)>> {
        let path = &self.files[file];
        let mut reader = PageReader::open(path)?;
        let (height, width) = (self.shape[self.rank() - 2], self.shape[self.rank() - 1]);
        pages
            .iter()
            .map(|&(slot, ifd)| {
                let page = reader.read_page(ifd)?;
                check_probe(path, &page, width, height, self.dtype)?;
                Ok((slot, page.data))
            })
            .collect()
    }
}

fn check_probe(
    path: &Path,
    page: &DecodedPage,
    width: usize,
    height: usize,
    dtype: PixelType,
) -> Result<()> {
    if (page.width, page.height) != (width, height) {
        return Err(Error::source_read(
            path,
            format!(
                "plane is {}x{}, expected {width}x{height}",
                page.width, page.height
            ),
        ));
    }
    if page.data.pixel_type() != dtype {
        return Err(Error::source_read(
            path,
            format!(
                "plane holds {} pixels, expected {dtype}",
                page.data.pixel_type()
            ),
        ));
    }
    Ok(())
}

fn ome_layout(path: &Path, pixels: &OmePixels) -> Result<Layout> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let total = pixels.plane_count();
    let mut files = vec![path.to_path_buf()];
    let mut planes: Vec<Option<PlaneRef>> = vec![None; total];

    let mut file_index = |name: Option<&str>| -> usize {
        let Some(name) = name else {
            return 0;
        };
        let candidate = dir.join(name);
        if let Some(pos) = files.iter().position(|f| *f == candidate) {
            pos
        } else {
            files.push(candidate);
            files.len() - 1
        }
    };

    if pixels.tiff_data.is_empty() {
        for (ifd, plane) in planes.iter_mut().enumerate() {
            *plane = Some(PlaneRef { file: 0, ifd });
        }
    }

    for block in &pixels.tiff_data {
        if block.first_z >= pixels.size_z
            || block.first_c >= pixels.size_c
            || block.first_t >= pixels.size_t
        {
            return Err(Error::source_read(
                path,
                format!(
                    "TiffData start (Z={}, C={}, T={}) is outside the image",
                    block.first_z, block.first_c, block.first_t
                ),
            ));
        }
        let start = pixels.plane_index(block.first_z, block.first_c, block.first_t);
        let count = match (block.plane_count, block.ifd) {
            (Some(count), _) => count,
            (None, Some(_)) => 1,
            (None, None) => total - start,
        };
        let file = file_index(block.file_name.as_deref());
        let first_ifd = block.ifd.unwrap_or(0);
        for (offset, plane) in planes.iter_mut().skip(start).take(count).enumerate() {
            *plane = Some(PlaneRef {
                file,
                ifd: first_ifd + offset,
            });
        }
    }

    let planes = planes
        .into_iter()
        .enumerate()
        .map(|(index, plane)| {
            plane.ok_or_else(|| {
                Error::source_read(
                    path,
                    format!("plane {index} of {total} is not mapped to any TIFF page"),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Layout {
        source: StackSource::OmeXml,
        files,
        planes,
        leading: pixels.leading_shape().iter().map(|&(_, n)| n).collect(),
        expected: Some((pixels.size_x, pixels.size_y, pixels.pixel_type)),
    })
}

fn series_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<run>.*)_Cycle(?P<cycle>\d+)_Ch(?P<channel>\d+)_(?P<index>\d+)\.ome\.tif$")
            .expect("static regex is valid")
    })
}

struct SeriesName {
    run: String,
    cycle: u32,
    channel: u32,
    index: u32,
}

fn parse_series_name(path: &Path) -> Option<SeriesName> {
    let name = path.file_name()?.to_str()?;
    let caps = series_regex().captures(name)?;
    Some(SeriesName {
        run: caps["run"].to_string(),
        cycle: caps["cycle"].parse().ok()?,
        channel: caps["channel"].parse().ok()?,
        index: caps["index"].parse().ok()?,
    })
}

fn filename_layout(path: &Path, pages: usize) -> Result<Option<Layout>> {
    let Some(initial) = parse_series_name(path) else {
        return Ok(None);
    };
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let glob = GlobPattern::new(&sibling_pattern(initial.channel))?;

    let mut grid: BTreeMap<(u32, u32), PathBuf> = BTreeMap::new();
    let siblings = glob
        .matches_in(dir)
        .map_err(|e| Error::source_read(path, format!("listing siblings: {e}")))?;
    for sibling in siblings {
        let Some(name) = parse_series_name(&sibling) else {
            continue;
        };
        if name.run != initial.run || name.channel != initial.channel {
            continue;
        }
        grid.insert((name.cycle, name.index), sibling);
    }
    grid.insert((initial.cycle, initial.index), path.to_path_buf());

    let cycles: BTreeSet<u32> = grid.keys().map(|&(cycle, _)| cycle).collect();
    let indices: BTreeSet<u32> = grid.keys().map(|&(_, index)| index).collect();

    let mut files = vec![path.to_path_buf()];
    let mut planes = Vec::with_capacity(cycles.len() * indices.len() * pages);
    for &cycle in &cycles {
        for &index in &indices {
            let sibling = grid.get(&(cycle, index)).ok_or_else(|| {
                Error::source_read(
                    path,
                    format!("missing sibling file for cycle {cycle}, index {index}"),
                )
            })?;
            let file = if sibling == path {
                0
            } else {
                files.push(sibling.clone());
                files.len() - 1
            };
            planes.extend((0..pages).map(|ifd| PlaneRef { file, ifd }));
        }
    }

    Ok(Some(Layout {
        source: StackSource::FilenameSeries,
        files,
        planes,
        leading: vec![cycles.len(), indices.len(), pages],
        expected: None,
    }))
}

fn single_file_layout(path: &Path, pages: usize) -> Layout {
    Layout {
        source: StackSource::SingleFile,
        files: vec![path.to_path_buf()],
        planes: (0..pages).map(|ifd| PlaneRef { file: 0, ifd }).collect(),
        leading: vec![pages],
        expected: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;
    use tiff::encoder::{colortype, TiffEncoder};
    use tiff::tags::Tag;

    fn frame(seed: u16, len: usize) -> Vec<u16> {
        (0..len).map(|i| seed.wrapping_mul(100).wrapping_add(i as u16)).collect()
    }

    fn write_pages(path: &Path, width: u32, height: u32, seeds: &[u16], description: Option<&str>) {
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        let len = (width * height) as usize;
        for (i, &seed) in seeds.iter().enumerate() {
            let mut image = encoder
                .new_image::<colortype::Gray16>(width, height)
                .unwrap();
            if i == 0 {
                if let Some(desc) = description {
                    image.encoder().write_tag(Tag::ImageDescription, desc).unwrap();
                }
            }
            image.write_data(&frame(seed, len)).unwrap();
        }
    }

    #[test]
    fn test_single_file_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        write_pages(&path, 4, 3, &[0, 1, 2], None);

        let stack = TiffStack::open(&path).unwrap();
        assert_eq!(stack.source(), StackSource::SingleFile);
        assert_eq!(stack.shape(), &[3, 3, 4]);
        assert_eq!(stack.dtype(), PixelType::Uint16);

        let slab: Vec<u16> = stack.read_slab(1..3).unwrap();
        let mut expected = frame(1, 12);
        expected.extend(frame(2, 12));
        assert_eq!(slab, expected);
    }

    #[test]
    fn test_single_page_is_two_dimensional() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.tif");
        write_pages(&path, 5, 2, &[7], None);

        let stack = TiffStack::open(&path).unwrap();
        assert_eq!(stack.shape(), &[2, 5]);
        assert_eq!(stack.plane_count(), 1);
    }

    #[test]
    fn test_filename_series() {
        let dir = tempdir().unwrap();
        for cycle in 1..=2u16 {
            for index in 1..=3u16 {
                let name = format!("run_Cycle{cycle:05}_Ch1_{index:06}.ome.tif");
                write_pages(&dir.path().join(name), 4, 4, &[cycle * 10 + index], None);
            }
        }
        // Other channel and other run are ignored.
        write_pages(&dir.path().join("run_Cycle00001_Ch2_000001.ome.tif"), 4, 4, &[0], None);
        write_pages(&dir.path().join("other_Cycle00001_Ch1_000001.ome.tif"), 4, 4, &[0], None);

        let stack = TiffStack::open(dir.path().join("run_Cycle00001_Ch1_000001.ome.tif")).unwrap();
        assert_eq!(stack.source(), StackSource::FilenameSeries);
        assert_eq!(stack.shape(), &[2, 3, 4, 4]);
        assert_eq!(stack.files().len(), 6);

        let planes = stack.read_planes(3..5).unwrap();
        assert_eq!(planes[0], PlaneData::U16(frame(21, 16)));
        assert_eq!(planes[1], PlaneData::U16(frame(22, 16)));
    }

    #[test]
    fn test_filename_series_with_gap_fails() {
        let dir = tempdir().unwrap();
        write_pages(&dir.path().join("run_Cycle00001_Ch1_000001.ome.tif"), 2, 2, &[1], None);
        write_pages(&dir.path().join("run_Cycle00001_Ch1_000002.ome.tif"), 2, 2, &[2], None);
        write_pages(&dir.path().join("run_Cycle00002_Ch1_000001.ome.tif"), 2, 2, &[3], None);

        let err = TiffStack::open(dir.path().join("run_Cycle00001_Ch1_000001.ome.tif")).unwrap_err();
        assert!(matches!(err, Error::SourceRead { .. }));
        assert!(err.to_string().contains("cycle 2, index 2"));
    }

    #[test]
    fn test_sibling_listing_failure_is_source_read() {
        let dir = tempdir().unwrap();
        // The "directory" holding the initial file is a regular file.
        let not_a_dir = dir.path().join("run.tif");
        std::fs::write(&not_a_dir, b"").unwrap();
        let path = not_a_dir.join("run_Cycle00001_Ch1_000001.ome.tif");

        let err = filename_layout(&path, 1).err().unwrap();
        assert!(matches!(err, Error::SourceRead { .. }));
        assert!(err.to_string().contains("listing siblings"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_stack_source_serializes() {
        assert_eq!(
            serde_json::to_string(&StackSource::FilenameSeries).unwrap(),
            "\"filename_series\""
        );
        assert_eq!(serde_json::to_string(&StackSource::OmeXml).unwrap(), "\"ome_xml\"");
    }

    fn ome_description(files: &[String], size_z: usize, size_t: usize) -> String {
        let mut blocks = String::new();
        for (i, name) in files.iter().enumerate() {
            let (z, t) = (i % size_z, i / size_z);
            blocks.push_str(&format!(
                r#"<TiffData IFD="0" FirstZ="{z}" FirstT="{t}" FirstC="0" PlaneCount="1"><UUID FileName="{name}">urn:uuid:{i}</UUID></TiffData>"#
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06"><Image ID="Image:0"><Pixels DimensionOrder="XYZCT" Type="uint16" SizeX="4" SizeY="2" SizeZ="{size_z}" SizeC="1" SizeT="{size_t}">{blocks}</Pixels></Image></OME>"#
        )
    }

    #[test]
    fn test_ome_stack_across_files() {
        let dir = tempdir().unwrap();
        // Names outside the cycle convention: only the metadata can link them.
        let names: Vec<String> = (0..6).map(|i| format!("frame{i}.ome.tif")).collect();
        let xml = ome_description(&names, 3, 2);
        for (i, name) in names.iter().enumerate() {
            let desc = (i == 0).then_some(xml.as_str());
            write_pages(&dir.path().join(name), 4, 2, &[i as u16], desc);
        }

        let stack = TiffStack::open(dir.path().join(&names[0])).unwrap();
        assert_eq!(stack.source(), StackSource::OmeXml);
        assert_eq!(stack.shape(), &[2, 3, 2, 4]);
        assert_eq!(stack.plane_count(), 6);

        let planes = stack.read_planes(0..6).unwrap();
        for (i, plane) in planes.iter().enumerate() {
            assert_eq!(plane, &PlaneData::U16(frame(i as u16, 8)));
        }
    }

    #[test]
    fn test_ome_missing_sibling_fails() {
        let dir = tempdir().unwrap();
        let names: Vec<String> = (0..2).map(|i| format!("frame{i}.ome.tif")).collect();
        let xml = ome_description(&names, 2, 1);
        write_pages(&dir.path().join(&names[0]), 4, 2, &[0], Some(&xml));

        let err = TiffStack::open(dir.path().join(&names[0])).unwrap_err();
        assert!(matches!(err, Error::SourceRead { .. }));
        assert!(err.to_string().contains("missing sibling file"));
    }

    #[test]
    fn test_ome_size_mismatch_fails() {
        let dir = tempdir().unwrap();
        let names = vec!["frame0.ome.tif".to_string()];
        let xml = ome_description(&names, 1, 1);
        // Metadata says 4x2, the page is 3x2.
        write_pages(&dir.path().join(&names[0]), 3, 2, &[0], Some(&xml));

        let err = TiffStack::open(dir.path().join(&names[0])).unwrap_err();
        assert!(err.to_string().contains("expected 4x2"));
    }

    #[test]
    fn test_read_slab_rejects_wrong_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        write_pages(&path, 2, 2, &[0, 1], None);

        let stack = TiffStack::open(&path).unwrap();
        let err = stack.read_slab::<u8>(0..1).unwrap_err();
        assert!(matches!(err, Error::SourceRead { .. }));
        assert!(stack.read_planes(1..3).is_err());
    }
}
