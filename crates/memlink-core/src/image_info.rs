//! Image interpretation of a tensor descriptor.

use serde::{Deserialize, Serialize};

use crate::error::{MemError, Result};
use crate::tensor_info::TensorInfo;

/// Dimension order of an image tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum ImageLayout {
    Any,
    HW,
    HWC,
    CHW,
    NHWC,
    NCHW,
}

impl ImageLayout {
    /// Guess the layout from the shape alone.  Channel counts above 4 are
    /// not treated as channels.
    pub fn from_shape(shape: &[usize]) -> Self {
        match shape {
            [_, _] => Self::HW,
            [_, _, c] if *c <= 4 => Self::HWC,
            [c, _, _] if *c <= 4 => Self::CHW,
            [_, _, _, c] if *c <= 4 => Self::NHWC,
            [_, c, _, _] if *c <= 4 => Self::NCHW,
            _ => Self::Any,
        }
    }

    const fn rank(self) -> Option<usize> {
        match self {
            Self::Any => None,
            Self::HW => Some(2),
            Self::HWC | Self::CHW => Some(3),
            Self::NHWC | Self::NCHW => Some(4),
        }
    }

    // (h, w, c, n) positions
    const fn positions(self) -> (usize, usize, Option<usize>, Option<usize>) {
        match self {
            Self::Any | Self::HW => (0, 1, None, None),
            Self::HWC => (0, 1, Some(2), None),
            Self::CHW => (1, 2, Some(0), None),
            Self::NHWC => (1, 2, Some(3), Some(0)),
            Self::NCHW => (2, 3, Some(1), Some(0)),
        }
    }
}

/// Borrowed image view over a [`TensorInfo`].
#[derive(Clone, Copy, Debug)]
pub struct ImageInfo<'a> {
    info: &'a TensorInfo,
    layout: ImageLayout,
}

impl<'a> ImageInfo<'a> {
    /// Wrap `info` with an explicit layout.  `ImageLayout::Any` infers it.
    pub fn new(info: &'a TensorInfo, layout: ImageLayout) -> Result<Self> {
        let layout = match layout {
            ImageLayout::Any => ImageLayout::from_shape(info.shape()),
            explicit => explicit,
        };
        match layout.rank() {
            Some(rank) if rank == info.rank() => Ok(Self { info, layout }),
            Some(rank) => Err(MemError::invalid(format!(
                "layout {layout:?} needs rank {rank}, shape {:?} has rank {}",
                info.shape(),
                info.rank()
            ))),
            None => Err(MemError::invalid(format!(
                "cannot infer image layout from shape {:?}",
                info.shape()
            ))),
        }
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn width(&self) -> usize {
        self.info.shape()[self.layout.positions().1]
    }

    pub fn height(&self) -> usize {
        self.info.shape()[self.layout.positions().0]
    }

    pub fn channels(&self) -> usize {
        self.layout
            .positions()
            .2
            .map_or(1, |c| self.info.shape()[c])
    }

    pub fn batch(&self) -> usize {
        self.layout
            .positions()
            .3
            .map_or(1, |n| self.info.shape()[n])
    }

    /// Bytes between consecutive rows.
    pub fn row_stride(&self) -> usize {
        self.info.stride()[self.layout.positions().0]
    }

    /// Bytes between horizontally adjacent pixels.
    pub fn pixel_stride(&self) -> usize {
        self.info.stride()[self.layout.positions().1]
    }

    /// Bytes of one packed row of pixels (no pitch padding).
    pub fn packed_row_bytes(&self) -> usize {
        let per_pixel = match self.layout {
            ImageLayout::HWC | ImageLayout::NHWC => self.channels(),
            _ => 1,
        };
        self.width() * per_pixel * self.info.dtype().itemsize()
    }
}
