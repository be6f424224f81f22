//! Rank-based axis layout heuristic.
//!
//! The acquisition metadata is not consulted here: the axis meaning is guessed
//! from the number of dimensions alone. A 4-D stack is taken to be
//! `(time, z, y, x)` and a 3-D stack `(time, y, x)`; anything else is left
//! unlabelled. The guess only drives chunking and is never cross-checked.

use crate::chunking::{ChunkDim, ChunkSpec};
use std::fmt;

/// Semantic label of one array axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Time,
    Z,
    Y,
    X,
}

impl Axis {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Z => "z",
            Self::Y => "y",
            Self::X => "x",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const TIME_Z_Y_X: [Axis; 4] = [Axis::Time, Axis::Z, Axis::Y, Axis::X];
const TIME_Y_X: [Axis; 3] = [Axis::Time, Axis::Y, Axis::X];

/// Guessed axis layout of a source array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisLayout {
    /// Rank 4: `(time, z, y, x)`.
    TimeZYX,
    /// Rank 3: `(time, y, x)`.
    TimeYX,
    /// Any other rank; no axis decomposition is attempted.
    Unknown { rank: usize },
}

impl AxisLayout {
    /// Guesses the layout from the array rank.
    #[must_use]
    pub fn guess(rank: usize) -> Self {
        match rank {
            4 => Self::TimeZYX,
            3 => Self::TimeYX,
            rank => Self::Unknown { rank },
        }
    }

    /// Number of axes the layout describes.
    #[must_use]
    pub fn rank(self) -> usize {
        match self {
            Self::TimeZYX => 4,
            Self::TimeYX => 3,
            Self::Unknown { rank } => rank,
        }
    }

    /// Axis labels, or `None` when the rank is not recognised.
    #[must_use]
    pub fn axes(self) -> Option<&'static [Axis]> {
        match self {
            Self::TimeZYX => Some(&TIME_Z_Y_X),
            Self::TimeYX => Some(&TIME_Y_X),
            Self::Unknown { .. } => None,
        }
    }

    /// Chunk specification for this layout.
    ///
    /// Time is auto-sized and every other labelled axis is kept whole. An
    /// unknown layout becomes a single chunk covering the whole array.
    #[must_use]
    pub fn chunk_spec(self) -> ChunkSpec {
        match self.axes() {
            Some(axes) => ChunkSpec::PerAxis(
                axes.iter()
                    .map(|axis| match axis {
                        Axis::Time => ChunkDim::Auto,
                        Axis::Z | Axis::Y | Axis::X => ChunkDim::Whole,
                    })
                    .collect(),
            ),
            None => ChunkSpec::WholeArray,
        }
    }
}

impl fmt::Display for AxisLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.axes() {
            Some(axes) => {
                let names: Vec<&str> = axes.iter().map(|axis| axis.name()).collect();
                write!(f, "{}", names.join(", "))
            }
            None => write!(f, "unknown ({}-D)", self.rank()),
        }
    }
}
