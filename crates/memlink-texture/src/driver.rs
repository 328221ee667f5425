//! Vendor driver seam.
//!
//! A [`TextureDriver`] is the raw device-context API of one physical device.
//! It is not reentrant: every method takes a [`DeviceGuard`] so callers can
//! only reach it while holding that device's lock.

use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use memlink_core::geometry::Rect;
use memlink_core::{AccessMode, Fourcc, Handle, ImageFormat, MemError, Result};
use serde::{Deserialize, Serialize};

use crate::lock::DeviceGuard;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub u64);

/// Completion handle of an asynchronous device operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

// ─── Formats ────────────────────────────────────────────────────────────────

/// Surface formats the adaptor can allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    Nv12,
    Bgra,
    Rgba,
    Bgrx,
    Gray8,
}

impl TextureFormat {
    pub const ALL: [Self; 5] = [Self::Nv12, Self::Bgra, Self::Rgba, Self::Bgrx, Self::Gray8];

    pub const fn planes(self) -> usize {
        match self {
            Self::Nv12 => 2,
            _ => 1,
        }
    }

    /// Bytes per texel of `plane`.
    pub const fn bytes_per_texel(self, plane: usize) -> usize {
        match (self, plane) {
            (Self::Nv12, 0) | (Self::Gray8, _) => 1,
            (Self::Nv12, _) => 2,
            (Self::Bgra | Self::Rgba | Self::Bgrx, _) => 4,
        }
    }

    /// `(width, height)` of `plane` in texels.
    pub const fn plane_size(self, plane: usize, width: usize, height: usize) -> (usize, usize) {
        match (self, plane) {
            (Self::Nv12, 1) => (width.div_ceil(2), height.div_ceil(2)),
            _ => (width, height),
        }
    }

    pub const fn is_packed_rgb(self) -> bool {
        matches!(self, Self::Bgra | Self::Rgba | Self::Bgrx)
    }

    pub const fn image_format(self) -> ImageFormat {
        match self {
            Self::Nv12 => ImageFormat::Nv12,
            Self::Bgra => ImageFormat::Bgra,
            Self::Rgba => ImageFormat::Rgba,
            Self::Bgrx => ImageFormat::Bgrx,
            Self::Gray8 => ImageFormat::Gray8,
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.image_format() == format)
            .ok_or_else(|| {
                MemError::InvalidArgument(format!("{format} has no texture representation"))
            })
    }

    pub fn from_fourcc(code: Fourcc) -> Result<Self> {
        Self::from_image_format(ImageFormat::try_from(code)?)
    }

    pub const fn as_str(self) -> &'static str {
        self.image_format().as_str()
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextureFormat {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_image_format(s.parse()?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Device-local, not CPU accessible.
    #[default]
    Default,
    /// CPU-mappable copy target/source.
    Staging,
    /// Exportable as a DMA handle.
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: usize,
    pub height: usize,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub const fn new(width: usize, height: usize, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            usage: TextureUsage::Default,
        }
    }

    pub const fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub const fn plane_size(&self, plane: usize) -> (usize, usize) {
        self.format.plane_size(plane, self.width, self.height)
    }

    /// Tightly packed bytes of one row of `plane`.
    pub const fn plane_row_bytes(&self, plane: usize) -> usize {
        self.plane_size(plane).0 * self.format.bytes_per_texel(plane)
    }
}

/// CPU view of one mapped plane of a staging texture.
#[derive(Clone, Copy, Debug)]
pub struct MappedPlane {
    pub data: NonNull<u8>,
    pub row_pitch: usize,
    pub rows: usize,
}

/// Scale/convert parameters for one blit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BltParams {
    pub src_rect: Rect,
    pub dst_rect: Rect,
    /// RGBA; the border outside `dst_rect` is filled with it.
    pub fill: [u8; 4],
}

/// Processor configurations are keyed by their input and output sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorKey {
    pub in_width: usize,
    pub in_height: usize,
    pub out_width: usize,
    pub out_height: usize,
}

impl ProcessorKey {
    pub const fn new(in_width: usize, in_height: usize, out_width: usize, out_height: usize) -> Self {
        Self {
            in_width,
            in_height,
            out_width,
            out_height,
        }
    }
}

// ─── Driver trait ───────────────────────────────────────────────────────────

pub trait TextureDriver: Send + Sync {
    fn name(&self) -> &str;

    fn create_texture(&self, guard: &DeviceGuard<'_>, desc: &TextureDesc) -> Result<TextureId>;

    fn destroy_texture(&self, guard: &DeviceGuard<'_>, texture: TextureId) -> Result<()>;

    /// Full-resource copy between textures of identical description.
    fn copy_resource(&self, guard: &DeviceGuard<'_>, dst: TextureId, src: TextureId) -> Result<()>;

    /// Map one plane of a staging texture for CPU access.
    fn map(
        &self,
        guard: &DeviceGuard<'_>,
        texture: TextureId,
        plane: usize,
        mode: AccessMode,
    ) -> Result<MappedPlane>;

    fn unmap(&self, guard: &DeviceGuard<'_>, texture: TextureId, plane: usize) -> Result<()>;

    fn create_processor(&self, guard: &DeviceGuard<'_>, key: &ProcessorKey) -> Result<ProcessorId>;

    fn destroy_processor(&self, guard: &DeviceGuard<'_>, processor: ProcessorId) -> Result<()>;

    /// Queue a scale/convert blit; completion is observed through the fence.
    fn blt(
        &self,
        guard: &DeviceGuard<'_>,
        processor: ProcessorId,
        src: TextureId,
        dst: TextureId,
        params: &BltParams,
    ) -> Result<FenceId>;

    /// `true` once the fenced operation has completed.
    fn query_fence(&self, guard: &DeviceGuard<'_>, fence: FenceId) -> Result<bool>;

    /// Export a shared texture as a DMA handle.
    fn export_shared(&self, guard: &DeviceGuard<'_>, texture: TextureId) -> Result<Handle>;

    /// Open a DMA handle exported by this or another device.
    fn import_shared(&self, guard: &DeviceGuard<'_>, handle: Handle) -> Result<(TextureId, TextureDesc)>;

    /// Close an exported handle.  Textures already imported from it stay valid.
    fn release_shared(&self, guard: &DeviceGuard<'_>, handle: Handle) -> Result<()>;
}

/// Map a driver status code to a result; negative codes are failures.
#[inline]
pub fn check_status(status: i32, call: &str) -> Result<()> {
    if status >= 0 {
        Ok(())
    } else {
        Err(MemError::DeviceOperationFailed {
            call: call.to_string(),
            status,
        })
    }
}
