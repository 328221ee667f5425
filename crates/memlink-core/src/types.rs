//! Core scalar and tag types shared by every memory domain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MemError, Result};

/// Opaque native resource handle (pointer-sized integer).
pub type Handle = isize;

// ─── Data types ─────────────────────────────────────────────────────────────

/// Element type of a tensor.  Closed set; each variant has a fixed size.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    UInt8,
    Int32,
    Int64,
    Float32,
}

impl DataType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn itemsize(self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 => 8,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uint8" | "u8" => Ok(Self::UInt8),
            "int32" | "i32" => Ok(Self::Int32),
            "int64" | "i64" => Ok(Self::Int64),
            "float32" | "f32" | "fp32" => Ok(Self::Float32),
            other => Err(MemError::invalid(format!("unknown data type '{other}'"))),
        }
    }
}

/// Rust scalar with a fixed [`DataType`] tag, used by typed accessors.
pub trait Scalar: Copy + Send + Sync + 'static {
    const DTYPE: DataType;
}

impl Scalar for u8 {
    const DTYPE: DataType = DataType::UInt8;
}
impl Scalar for i32 {
    const DTYPE: DataType = DataType::Int32;
}
impl Scalar for i64 {
    const DTYPE: DataType = DataType::Int64;
}
impl Scalar for f32 {
    const DTYPE: DataType = DataType::Float32;
}

// ─── Memory domains ─────────────────────────────────────────────────────────

/// Memory domain tag.  Exactly one per context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Placeholder for frames without planes.
    Any,
    /// Plain host memory.
    Cpu,
    /// Unified shared memory (host-addressable device allocation).
    Usm,
    /// DMA-shareable handle (dma-buf fd, NT handle).
    Dma,
    /// OpenCL buffer object.
    OpenCl,
    /// GPU texture / surface.
    GpuSurface,
    /// Buffer owned by the host pipeline framework.
    HostPipeline,
    /// Hardware codec surface.
    CodecSurface,
    /// Array allocated on a compute device.
    DeviceArray,
}

impl MemoryType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::Cpu => "CPU",
            Self::Usm => "USM",
            Self::Dma => "DMA",
            Self::OpenCl => "OpenCL",
            Self::GpuSurface => "GPUSurface",
            Self::HostPipeline => "HostPipeline",
            Self::CodecSurface => "CodecSurface",
            Self::DeviceArray => "DeviceArray",
        }
    }

    /// Whether tensors of this type expose an addressable `data()` pointer.
    pub const fn is_host_addressable(self) -> bool {
        matches!(self, Self::Cpu | Self::Usm | Self::HostPipeline)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of payload carried by a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Any,
    Tensors,
    Image,
    Audio,
}

// ─── Formats ────────────────────────────────────────────────────────────────

/// Four-character media format code (little-endian packed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fourcc(pub u32);

impl Fourcc {
    pub const fn from_bytes(code: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(code))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("ANY");
        }
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Image pixel formats understood by the descriptor helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Bgr,
    Rgb,
    Bgrx,
    Rgbx,
    Bgra,
    Rgba,
    /// Planar BGR, one plane per channel.
    Bgrp,
    /// Planar RGB, one plane per channel.
    Rgbp,
    /// Luma plane + interleaved UV plane at half resolution.
    Nv12,
    /// Luma plane + separate U and V planes at half resolution.
    I420,
    Gray8,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 11] = [
        Self::Bgr,
        Self::Rgb,
        Self::Bgrx,
        Self::Rgbx,
        Self::Bgra,
        Self::Rgba,
        Self::Bgrp,
        Self::Rgbp,
        Self::Nv12,
        Self::I420,
        Self::Gray8,
    ];

    pub const fn fourcc(self) -> Fourcc {
        Fourcc::from_bytes(match self {
            Self::Bgr => *b"BGR ",
            Self::Rgb => *b"RGB ",
            Self::Bgrx => *b"BGRX",
            Self::Rgbx => *b"RGBX",
            Self::Bgra => *b"BGRA",
            Self::Rgba => *b"RGBA",
            Self::Bgrp => *b"BGRP",
            Self::Rgbp => *b"RGBP",
            Self::Nv12 => *b"NV12",
            Self::I420 => *b"I420",
            Self::Gray8 => *b"GRAY",
        })
    }

    /// Number of planes in memory.
    pub const fn planes(self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::I420 | Self::Bgrp | Self::Rgbp => 3,
            _ => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bgr => "bgr",
            Self::Rgb => "rgb",
            Self::Bgrx => "bgrx",
            Self::Rgbx => "rgbx",
            Self::Bgra => "bgra",
            Self::Rgba => "rgba",
            Self::Bgrp => "bgrp",
            Self::Rgbp => "rgbp",
            Self::Nv12 => "nv12",
            Self::I420 => "i420",
            Self::Gray8 => "gray8",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| MemError::invalid(format!("unknown image format '{s}'")))
    }
}

impl TryFrom<Fourcc> for ImageFormat {
    type Error = MemError;

    fn try_from(code: Fourcc) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.fourcc() == code)
            .ok_or_else(|| MemError::invalid(format!("fourcc {code} is not an image format")))
    }
}

// ─── Access ─────────────────────────────────────────────────────────────────

/// How the caller intends to use a mapped view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    /// Mapped view must observe the source contents.
    #[inline]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Modifications to the mapped view must reach the source.
    #[inline]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itemsize_is_fixed_per_dtype() {
        assert_eq!(DataType::UInt8.itemsize(), 1);
        assert_eq!(DataType::Int32.itemsize(), 4);
        assert_eq!(DataType::Int64.itemsize(), 8);
        assert_eq!(DataType::Float32.itemsize(), 4);
    }

    #[test]
    fn unknown_dtype_name_is_invalid_argument() {
        let err = "float16".parse::<DataType>().expect_err("float16 is not supported");
        match err {
            MemError::InvalidArgument(msg) => assert!(msg.contains("float16")),
            other => panic!("unexpected error variant: {other:?}"),
        }
        assert_eq!("F32".parse::<DataType>().expect("alias"), DataType::Float32);
    }

    #[test]
    fn fourcc_roundtrips_through_image_format() {
        for format in ImageFormat::ALL {
            let back = ImageFormat::try_from(format.fourcc()).expect("known fourcc");
            assert_eq!(back, format);
        }
        assert_eq!(ImageFormat::Nv12.fourcc().to_string(), "NV12");
        assert!(ImageFormat::try_from(Fourcc(0)).is_err());
    }

    #[test]
    fn access_mode_predicates() {
        assert!(AccessMode::Read.reads() && !AccessMode::Read.writes());
        assert!(!AccessMode::Write.reads() && AccessMode::Write.writes());
        assert!(AccessMode::ReadWrite.reads() && AccessMode::ReadWrite.writes());
    }
}
