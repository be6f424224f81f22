//! OME-XML metadata parsing.
//!
//! Only the parts needed to rebuild a multi-file stack are read: the first
//! `Image/Pixels` element and its `TiffData` blocks.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tiffstack_core::PixelType;

/// Errors raised while reading OME-XML.
#[derive(Error, Debug)]
pub enum OmeError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("no Pixels element found")]
    MissingPixels,

    #[error("missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("invalid value {value:?} for attribute {name}")]
    InvalidAttribute { name: &'static str, value: String },
}

/// Non-spatial OME dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dim {
    Z,
    C,
    T,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Z => "Z",
            Self::C => "C",
            Self::T => "T",
        })
    }
}

/// Plane ordering, fastest-varying dimension first (`XYZCT` → `[Z, C, T]`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DimensionOrder(pub [Dim; 3]);

impl FromStr for DimensionOrder {
    type Err = OmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OmeError::InvalidAttribute {
            name: "DimensionOrder",
            value: s.to_string(),
        };
        let rest = s.strip_prefix("XY").ok_or_else(invalid)?;
        let dims: Vec<Dim> = rest
            .chars()
            .map(|c| match c {
                'Z' => Ok(Dim::Z),
                'C' => Ok(Dim::C),
                'T' => Ok(Dim::T),
                _ => Err(invalid()),
            })
            .collect::<Result<_, _>>()?;
        match dims.as_slice() {
            &[a, b, c] if a != b && b != c && a != c => Ok(Self([a, b, c])),
            _ => Err(invalid()),
        }
    }
}

/// One `TiffData` block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TiffData {
    pub ifd: Option<usize>,
    pub first_z: usize,
    pub first_c: usize,
    pub first_t: usize,
    pub plane_count: Option<usize>,
    /// `UUID@FileName`; `None` means the file holding the metadata.
    pub file_name: Option<String>,
}

/// The first `Pixels` element of an OME-XML document.
#[derive(Clone, Debug, PartialEq)]
pub struct OmePixels {
    pub dimension_order: DimensionOrder,
    pub pixel_type: PixelType,
    pub size_x: usize,
    pub size_y: usize,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub tiff_data: Vec<TiffData>,
}

impl OmePixels {
    #[must_use]
    pub fn size_of(&self, dim: Dim) -> usize {
        match dim {
            Dim::Z => self.size_z,
            Dim::C => self.size_c,
            Dim::T => self.size_t,
        }
    }

    /// Total number of 2-D planes.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.size_z * self.size_c * self.size_t
    }

    /// Sizes of the non-spatial axes, slowest-varying first.
    #[must_use]
    pub fn leading_shape(&self) -> [(Dim, usize); 3] {
        let [a, b, c] = self.dimension_order.0;
        [
            (c, self.size_of(c)),
            (b, self.size_of(b)),
            (a, self.size_of(a)),
        ]
    }

    /// Linear plane index of `(z, c, t)` in dimension order.
    #[must_use]
    pub fn plane_index(&self, z: usize, c: usize, t: usize) -> usize {
        let coord = |dim: Dim| match dim {
            Dim::Z => z,
            Dim::C => c,
            Dim::T => t,
        };
        let [a, b, d] = self.dimension_order.0;
        coord(a) + self.size_of(a) * (coord(b) + self.size_of(b) * coord(d))
    }
}

/// Returns true if a TIFF `ImageDescription` holds OME-XML.
#[must_use]
pub fn is_ome_xml(description: &str) -> bool {
    description.trim_start().starts_with('<') && description.contains("<OME")
}

/// Parses the first `Pixels` element of an OME-XML document.
///
/// # Errors
/// Returns an error if the XML is malformed, has no `Pixels` element, or a
/// required attribute is missing or invalid.
pub fn parse_ome_xml(xml: &str) -> Result<OmePixels, OmeError> {
    let mut reader = Reader::from_str(xml);
    let mut pixels: Option<OmePixels> = None;
    let mut in_pixels = false;
    let mut open_tiff_data: Option<TiffData> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| OmeError::Xml(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"Pixels" if pixels.is_none() => {
                        pixels = Some(parse_pixels(e)?);
                        in_pixels = !is_empty;
                    }
                    b"TiffData" if in_pixels => {
                        let block = parse_tiff_data(e)?;
                        if is_empty {
                            push_block(&mut pixels, block);
                        } else {
                            open_tiff_data = Some(block);
                        }
                    }
                    b"UUID" => {
                        if let Some(block) = open_tiff_data.as_mut() {
                            block.file_name = attributes(e)?.remove("FileName");
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"TiffData" => {
                    if let Some(block) = open_tiff_data.take() {
                        push_block(&mut pixels, block);
                    }
                }
                b"Pixels" if in_pixels => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    pixels.ok_or(OmeError::MissingPixels)
}

fn push_block(pixels: &mut Option<OmePixels>, block: TiffData) {
    if let Some(pixels) = pixels.as_mut() {
        pixels.tiff_data.push(block);
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>, OmeError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| OmeError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| OmeError::Xml(err.to_string()))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn parse_pixels(e: &BytesStart<'_>) -> Result<OmePixels, OmeError> {
    let attrs = attributes(e)?;
    let dimension_order = required(&attrs, "DimensionOrder")?.parse()?;
    let type_name = required(&attrs, "Type")?;
    let pixel_type = PixelType::from_ome(type_name).map_err(|_| OmeError::InvalidAttribute {
        name: "Type",
        value: type_name.to_string(),
    })?;

    Ok(OmePixels {
        dimension_order,
        pixel_type,
        size_x: positive(&attrs, "SizeX")?,
        size_y: positive(&attrs, "SizeY")?,
        size_z: positive(&attrs, "SizeZ")?,
        size_c: positive(&attrs, "SizeC")?,
        size_t: positive(&attrs, "SizeT")?,
        tiff_data: Vec::new(),
    })
}

fn parse_tiff_data(e: &BytesStart<'_>) -> Result<TiffData, OmeError> {
    let attrs = attributes(e)?;
    Ok(TiffData {
        ifd: optional(&attrs, "IFD")?,
        first_z: optional(&attrs, "FirstZ")?.unwrap_or(0),
        first_c: optional(&attrs, "FirstC")?.unwrap_or(0),
        first_t: optional(&attrs, "FirstT")?.unwrap_or(0),
        plane_count: optional(&attrs, "PlaneCount")?,
        file_name: None,
    })
}

fn required<'a>(
    attrs: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, OmeError> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or(OmeError::MissingAttribute(name))
}

fn optional(attrs: &HashMap<String, String>, name: &'static str) -> Result<Option<usize>, OmeError> {
    attrs
        .get(name)
        .map(|value| {
            value.trim().parse().map_err(|_| OmeError::InvalidAttribute {
                name,
                value: value.clone(),
            })
        })
        .transpose()
}

fn positive(attrs: &HashMap<String, String>, name: &'static str) -> Result<usize, OmeError> {
    let value = required(attrs, name)?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(OmeError::InvalidAttribute {
            name,
            value: value.to_string(),
        }),
    }
}
