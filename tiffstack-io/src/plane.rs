//! Decoded TIFF pages.

use crate::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiffstack_core::PixelType;

/// Pixel data of one 2-D plane, in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub enum PlaneData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl PlaneData {
    #[must_use]
    pub fn pixel_type(&self) -> PixelType {
        match self {
            Self::I8(_) => PixelType::Int8,
            Self::U8(_) => PixelType::Uint8,
            Self::I16(_) => PixelType::Int16,
            Self::U16(_) => PixelType::Uint16,
            Self::I32(_) => PixelType::Int32,
            Self::U32(_) => PixelType::Uint32,
            Self::I64(_) => PixelType::Int64,
            Self::U64(_) => PixelType::Uint64,
            Self::F32(_) => PixelType::Float32,
            Self::F64(_) => PixelType::Float64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_decoding(result: DecodingResult) -> Option<Self> {
        match result {
            DecodingResult::I8(v) => Some(Self::I8(v)),
            DecodingResult::U8(v) => Some(Self::U8(v)),
            DecodingResult::I16(v) => Some(Self::I16(v)),
            DecodingResult::U16(v) => Some(Self::U16(v)),
            DecodingResult::I32(v) => Some(Self::I32(v)),
            DecodingResult::U32(v) => Some(Self::U32(v)),
            DecodingResult::I64(v) => Some(Self::I64(v)),
            DecodingResult::U64(v) => Some(Self::U64(v)),
            DecodingResult::F32(v) => Some(Self::F32(v)),
            DecodingResult::F64(v) => Some(Self::F64(v)),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

/// Element types a plane can be unpacked into.
pub trait PlaneElement: Copy + Send + Sync + 'static {
    const PIXEL_TYPE: PixelType;

    /// Returns the pixels if the plane holds this element type.
    fn unpack(plane: PlaneData) -> Option<Vec<Self>>;
}

macro_rules! impl_plane_element {
    ($t:ty, $variant:ident, $pixel:ident) => {
        impl PlaneElement for $t {
            const PIXEL_TYPE: PixelType = PixelType::$pixel;

            fn unpack(plane: PlaneData) -> Option<Vec<Self>> {
                match plane {
                    PlaneData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_plane_element!(i8, I8, Int8);
impl_plane_element!(u8, U8, Uint8);
impl_plane_element!(i16, I16, Int16);
impl_plane_element!(u16, U16, Uint16);
impl_plane_element!(i32, I32, Int32);
impl_plane_element!(u32, U32, Uint32);
impl_plane_element!(i64, I64, Int64);
impl_plane_element!(u64, U64, Uint64);
impl_plane_element!(f32, F32, Float32);
impl_plane_element!(f64, F64, Float64);

/// A decoded page and its dimensions.
#[derive(Clone, Debug)]
pub struct DecodedPage {
    pub width: usize,
    pub height: usize,
    pub data: PlaneData,
}

/// Sequential page reader over one TIFF file.
pub(crate) struct PageReader<'p> {
    path: &'p Path,
    decoder: Decoder<BufReader<File>>,
    current: usize,
}

impl<'p> PageReader<'p> {
    pub(crate) fn open(path: &'p Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::source_read(path, e))?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| Error::source_read(path, e))?
            .with_limits(Limits::unlimited());
        Ok(Self {
            path,
            decoder,
            current: 0,
        })
    }

    /// `ImageDescription` of the current page, if present.
    pub(crate) fn description(&mut self) -> Result<Option<String>> {
        let value = self
            .decoder
            .find_tag(Tag::ImageDescription)
            .map_err(|e| Error::source_read(self.path, e))?;
        value
            .map(|v| v.into_string().map_err(|e| Error::source_read(self.path, e)))
            .transpose()
    }

    /// Counts the pages of the file, leaving the reader on the last one.
    pub(crate) fn count_pages(&mut self) -> Result<usize> {
        while self.decoder.more_images() {
            self.decoder
                .next_image()
                .map_err(|e| Error::source_read(self.path, e))?;
            self.current += 1;
        }
        Ok(self.current + 1)
    }

    /// Decodes page `ifd` (0-based).
    pub(crate) fn read_page(&mut self, ifd: usize) -> Result<DecodedPage> {
        if ifd != self.current {
            self.decoder
                .seek_to_image(ifd)
                .map_err(|e| Error::source_read(self.path, format!("page {ifd}: {e}")))?;
            self.current = ifd;
        }

        let (width, height) = self
            .decoder
            .dimensions()
            .map_err(|e| Error::source_read(self.path, e))?;
        let result = self
            .decoder
            .read_image()
            .map_err(|e| Error::source_read(self.path, format!("page {ifd}: {e}")))?;
        let data = PlaneData::from_decoding(result).ok_or_else(|| {
            Error::source_read(self.path, format!("page {ifd}: unsupported sample format"))
        })?;

        let (width, height) = (width as usize, height as usize);
        if data.len() != width * height {
            return Err(Error::source_read(
                self.path,
                format!(
                    "page {ifd}: expected a single-sample {width}x{height} plane, got {} samples",
                    data.len()
                ),
            ));
        }

        Ok(DecodedPage {
            width,
            height,
            data,
        })
    }
}
