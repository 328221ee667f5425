//! Tensor and frame descriptors.
//!
//! A [`TensorInfo`] is immutable once built: shape, byte strides and element
//! type.  Equality and ordering are structural, so descriptors can key maps
//! and be compared across contexts.

use serde::{Deserialize, Serialize};

use crate::error::{MemError, Result};
use crate::types::{DataType, Fourcc, ImageFormat, MediaType, MemoryType};

/// Shape, byte strides and element type of one tensor.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TensorInfo {
    shape: Vec<usize>,
    stride: Vec<usize>,
    dtype: DataType,
}

impl TensorInfo {
    /// Row-major contiguous descriptor.
    pub fn new(shape: Vec<usize>, dtype: DataType) -> Self {
        let stride = Self::contiguous_stride(&shape, dtype);
        Self {
            shape,
            stride,
            dtype,
        }
    }

    /// Descriptor with explicit strides.  An empty `stride` means contiguous.
    pub fn with_stride(shape: Vec<usize>, dtype: DataType, stride: Vec<usize>) -> Result<Self> {
        if stride.is_empty() {
            return Ok(Self::new(shape, dtype));
        }
        if stride.len() != shape.len() {
            return Err(MemError::invalid(format!(
                "stride rank {} does not match shape rank {}",
                stride.len(),
                shape.len()
            )));
        }
        let info = Self {
            shape,
            stride,
            dtype,
        };
        info.span()?;
        Ok(info)
    }

    /// Descriptor from a textual dtype name, as found in configuration.
    pub fn parse(shape: Vec<usize>, dtype: &str, stride: Vec<usize>) -> Result<Self> {
        Self::with_stride(shape, dtype.parse()?, stride)
    }

    /// `stride[last] = itemsize`, `stride[i] = stride[i+1] * shape[i+1]`.
    pub fn contiguous_stride(shape: &[usize], dtype: DataType) -> Vec<usize> {
        let mut stride = vec![0usize; shape.len()];
        let mut acc = dtype.itemsize();
        for i in (0..shape.len()).rev() {
            stride[i] = acc;
            acc = acc.saturating_mul(shape[i]);
        }
        stride
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn stride(&self) -> &[usize] {
        &self.stride
    }

    #[inline]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements, saturating at `usize::MAX`.
    pub fn size(&self) -> usize {
        self.shape.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    /// Byte extent of the memory covered by this descriptor, saturating at
    /// `usize::MAX`.  Allocation paths use [`checked_nbytes`](Self::checked_nbytes).
    pub fn nbytes(&self) -> usize {
        self.checked_nbytes().unwrap_or(usize::MAX)
    }

    /// Byte extent, or `InvalidArgument` when it does not fit in `usize`.
    ///
    /// Taken from the outer-most non-unit dimension (`shape[i] * stride[i]`)
    /// so a leading batch of 1 with an arbitrary stride never inflates it.
    pub fn checked_nbytes(&self) -> Result<usize> {
        if self.shape.is_empty() {
            return Ok(self.dtype.itemsize());
        }
        match self.shape.iter().position(|&d| d != 1) {
            Some(i) => self.shape[i]
                .checked_mul(self.stride[i])
                .ok_or_else(|| self.overflow()),
            None => Ok(self.stride[0]),
        }
    }

    /// Bytes from element zero to one past the last element.
    pub fn span(&self) -> Result<usize> {
        if self.shape.contains(&0) {
            return Ok(0);
        }
        self.shape
            .iter()
            .zip(&self.stride)
            .try_fold(self.dtype.itemsize(), |acc, (&d, &s)| {
                (d - 1).checked_mul(s).and_then(|extent| acc.checked_add(extent))
            })
            .ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> MemError {
        MemError::invalid(format!(
            "shape {:?} with stride {:?} overflows the address space",
            self.shape, self.stride
        ))
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == Self::contiguous_stride(&self.shape, self.dtype)
    }
}

// ─── Frames ─────────────────────────────────────────────────────────────────

/// Ordered plane descriptors plus the frame-level format pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameInfo {
    pub media_type: MediaType,
    pub format: Fourcc,
    pub memory_type: MemoryType,
    pub planes: Vec<TensorInfo>,
}

impl FrameInfo {
    pub fn new(media_type: MediaType, format: Fourcc, memory_type: MemoryType) -> Self {
        Self {
            media_type,
            format,
            memory_type,
            planes: Vec::new(),
        }
    }

    /// Plane layout of a `width`x`height` host image in `format`.
    ///
    /// Chroma planes of NV12/I420 round odd dimensions up.
    pub fn image(format: ImageFormat, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MemError::invalid(format!(
                "image dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let u8 = DataType::UInt8;
        let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
        let planes = match format {
            ImageFormat::Bgr | ImageFormat::Rgb => vec![TensorInfo::new(vec![height, width, 3], u8)],
            ImageFormat::Bgrx | ImageFormat::Rgbx | ImageFormat::Bgra | ImageFormat::Rgba => {
                vec![TensorInfo::new(vec![height, width, 4], u8)]
            }
            ImageFormat::Gray8 => vec![TensorInfo::new(vec![height, width], u8)],
            ImageFormat::Bgrp | ImageFormat::Rgbp => {
                vec![TensorInfo::new(vec![height, width], u8); 3]
            }
            ImageFormat::Nv12 => vec![
                TensorInfo::new(vec![height, width], u8),
                TensorInfo::new(vec![ch, cw, 2], u8),
            ],
            ImageFormat::I420 => vec![
                TensorInfo::new(vec![height, width], u8),
                TensorInfo::new(vec![ch, cw], u8),
                TensorInfo::new(vec![ch, cw], u8),
            ],
        };
        Ok(Self {
            media_type: MediaType::Image,
            format: format.fourcc(),
            memory_type: MemoryType::Cpu,
            planes,
        })
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    /// Total bytes across planes.
    pub fn nbytes(&self) -> usize {
        self.planes
            .iter()
            .fold(0usize, |acc, plane| acc.saturating_add(plane.nbytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nchw_float_stride_is_row_major() {
        let info = TensorInfo::new(vec![1, 3, 224, 224], DataType::Float32);
        assert_eq!(info.stride(), &[602_112, 200_704, 896, 4]);
        assert_eq!(info.nbytes(), 602_112);
        assert_eq!(info.size(), 3 * 224 * 224);
        assert!(info.is_contiguous());
    }

    #[test]
    fn nbytes_matches_product_without_unit_dims() {
        for (shape, dtype) in [
            (vec![7usize, 5, 3], DataType::UInt8),
            (vec![2, 9], DataType::Int64),
            (vec![4, 6, 2, 3], DataType::Int32),
            (vec![11], DataType::Float32),
        ] {
            let info = TensorInfo::new(shape.clone(), dtype);
            let product: usize = shape.iter().product();
            assert_eq!(info.nbytes(), product * dtype.itemsize(), "{shape:?}");
            assert!(info.is_contiguous());
        }
    }

    #[test]
    fn singleton_outer_dim_does_not_inflate_nbytes() {
        // Batch of one with a padded batch stride.
        let info = TensorInfo::with_stride(vec![1, 4, 8], DataType::UInt8, vec![4096, 8, 1])
            .expect("valid stride");
        assert_eq!(info.nbytes(), 32);
        assert!(!info.is_contiguous());
    }

    #[test]
    fn all_unit_and_scalar_shapes() {
        let ones = TensorInfo::new(vec![1, 1], DataType::Float32);
        assert_eq!(ones.nbytes(), 4);
        let scalar = TensorInfo::new(Vec::new(), DataType::Int64);
        assert_eq!(scalar.nbytes(), 8);
        assert_eq!(scalar.size(), 1);
    }

    #[test]
    fn stride_rank_mismatch_is_rejected() {
        let err = TensorInfo::with_stride(vec![2, 2], DataType::UInt8, vec![2])
            .expect_err("rank mismatch");
        assert!(matches!(err, MemError::InvalidArgument(_)));
    }

    #[test]
    fn unknown_dtype_fails_at_construction() {
        let err = TensorInfo::parse(vec![4], "bfloat16", Vec::new()).expect_err("unknown dtype");
        assert!(matches!(err, MemError::InvalidArgument(_)));
    }

    #[test]
    fn structural_equality_and_ordering() {
        let a = TensorInfo::new(vec![2, 3], DataType::UInt8);
        let b = TensorInfo::with_stride(vec![2, 3], DataType::UInt8, vec![3, 1]).expect("valid");
        let c = TensorInfo::new(vec![2, 4], DataType::UInt8);
        assert_eq!(a, b);
        assert!(a < c);
    }

    #[test]
    fn nv12_frame_has_two_planes() {
        let info = FrameInfo::image(ImageFormat::Nv12, 64, 48).expect("nv12");
        assert_eq!(info.planes.len(), 2);
        assert_eq!(info.planes[0].shape(), &[48, 64]);
        assert_eq!(info.planes[1].shape(), &[24, 32, 2]);
        assert_eq!(info.nbytes(), 64 * 48 * 3 / 2);
        assert_eq!(info.format, ImageFormat::Nv12.fourcc());
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        assert!(FrameInfo::image(ImageFormat::Bgra, 0, 10).is_err());
    }

    #[test]
    fn oversized_shapes_report_overflow() {
        let info = TensorInfo::new(vec![usize::MAX / 2, 4], DataType::UInt8);
        assert!(matches!(info.checked_nbytes(), Err(MemError::InvalidArgument(_))));
        assert!(matches!(info.span(), Err(MemError::InvalidArgument(_))));
        assert_eq!(info.nbytes(), usize::MAX);
        assert_eq!(info.size(), usize::MAX);

        let err = TensorInfo::with_stride(vec![3, usize::MAX], DataType::Float32, vec![8, 4])
            .expect_err("span overflows");
        assert!(matches!(err, MemError::InvalidArgument(_)));
    }
}
