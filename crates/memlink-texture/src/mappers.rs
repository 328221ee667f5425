//! Texture storage and the mappers between texture, host and DMA domains.
//!
//! Every mapper here moves a whole texture per device transaction: a frame
//! readback copies into one staging texture and maps all of its planes under
//! one lock hold.  Mapping a single plane tensor maps the whole texture and
//! returns the requested plane.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use memlink_core::storage::{ExternalMemory, Storage, StorageRef};
use memlink_core::{
    AccessMode, ContextRef, DataType, Frame, FrameInfo, FrameRef, Handle, MapperEndpoints,
    MediaType, MemError, MemoryMapper, MemoryType, Result, Tensor, TensorInfo, TensorRef,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::device::TextureDevice;
use crate::driver::{FenceId, MappedPlane, TextureDesc, TextureFormat, TextureId, TextureUsage};
use crate::lock::DeviceGuard;
use crate::staging::{StagingKey, StagingTexture};

pub const TEXTURE_HANDLE: &str = "texture";
pub const PLANE_HANDLE: &str = "plane";
pub const DMA_HANDLE: &str = "dma";

// ─── Texture storage ────────────────────────────────────────────────────────

struct TextureInner {
    device: Arc<TextureDevice>,
    id: TextureId,
    desc: TextureDesc,
    pending: Mutex<Option<FenceId>>,
}

impl Drop for TextureInner {
    fn drop(&mut self) {
        let guard = self.device.lock();
        self.device.destroy_quietly(&guard, self.id);
    }
}

/// A device texture; the storage behind every plane of a texture frame.
///
/// Destroyed when the last plane (and every view parented on it) is gone.
#[derive(Clone)]
pub struct TextureResource {
    inner: Arc<TextureInner>,
}

impl TextureResource {
    pub(crate) fn new(device: Arc<TextureDevice>, id: TextureId, desc: TextureDesc) -> Self {
        Self {
            inner: Arc::new(TextureInner {
                device,
                id,
                desc,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Texture behind a tensor produced by this crate.
    pub fn of(tensor: &Tensor) -> Result<&Self> {
        tensor.storage_as::<Self>().ok_or_else(|| {
            MemError::InvalidArgument(format!(
                "{} tensor is not backed by a texture",
                tensor.memory_type()
            ))
        })
    }

    pub fn id(&self) -> TextureId {
        self.inner.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.inner.desc
    }

    pub fn device(&self) -> &Arc<TextureDevice> {
        &self.inner.device
    }

    pub fn same_texture(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Record an in-flight operation writing this texture.
    pub fn set_pending(&self, fence: FenceId) {
        *self.inner.pending.lock() = Some(fence);
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Wait for the pending operation, if any.  Must not be called while
    /// holding the device lock.
    pub fn wait_idle(&self) -> Result<()> {
        let Some(fence) = self.inner.pending.lock().take() else {
            return Ok(());
        };
        self.inner.device.wait_fence(fence).inspect_err(|_| {
            *self.inner.pending.lock() = Some(fence);
        })
    }
}

impl fmt::Debug for TextureResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureResource")
            .field("id", &self.inner.id)
            .field("desc", &self.inner.desc)
            .finish()
    }
}

impl Storage for TextureResource {
    fn data(&self) -> Option<std::ptr::NonNull<u8>> {
        None
    }

    fn byte_len(&self) -> usize {
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The single texture behind every plane of `frame`.
pub(crate) fn frame_resource(frame: &Frame) -> Result<TextureResource> {
    let first = frame
        .tensor(0)
        .ok_or_else(|| MemError::InvalidArgument("frame has no planes".into()))?;
    let resource = TextureResource::of(first)?;
    for plane in frame.iter().skip(1) {
        if !TextureResource::of(plane)?.same_texture(resource) {
            return Err(MemError::InvalidArgument(
                "frame planes span several textures".into(),
            ));
        }
    }
    Ok(resource.clone())
}

fn plane_index(tensor: &Tensor) -> usize {
    usize::try_from(tensor.handle_or(PLANE_HANDLE, 0)).unwrap_or(0)
}

fn require_output(endpoints: &MapperEndpoints) -> Result<ContextRef> {
    endpoints.live_output()?.ok_or_else(|| {
        MemError::InvalidArgument(format!(
            "{} mapper needs an output context",
            endpoints.output_memory_type()
        ))
    })
}

fn same_device(mapper: &Arc<TextureDevice>, resource: &TextureResource) -> Result<()> {
    if Arc::ptr_eq(mapper, resource.device()) {
        Ok(())
    } else {
        Err(MemError::InvalidArgument(
            "texture belongs to a different device".into(),
        ))
    }
}

// ─── Plane assembly ─────────────────────────────────────────────────────────

/// Shared description of the planes of one mapped texture.
struct PlaneSet<'a> {
    desc: &'a TextureDesc,
    storage: StorageRef,
    memory_type: MemoryType,
    context: Option<ContextRef>,
    handles: Vec<(&'static str, Handle)>,
}

impl PlaneSet<'_> {
    fn plane_infos(&self) -> Result<Vec<TensorInfo>> {
        Ok(FrameInfo::image(self.desc.format.image_format(), self.desc.width, self.desc.height)?.planes)
    }

    fn build_plane(&self, index: usize, info: TensorInfo, parent: Option<&TensorRef>) -> Result<TensorRef> {
        let mut builder = Tensor::builder(info, Arc::clone(&self.storage))
            .memory_type(self.memory_type)
            .context(self.context.clone())
            .handle(PLANE_HANDLE, index as Handle);
        for (key, handle) in &self.handles {
            builder = builder.handle(*key, *handle);
        }
        if let Some(parent) = parent {
            builder = builder.parent(Arc::clone(parent));
        }
        builder.build()
    }

    fn tensor(&self, index: usize, parent: &TensorRef) -> Result<TensorRef> {
        let info = self
            .plane_infos()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| MemError::InvalidArgument(format!("plane {index} out of range")))?;
        self.build_plane(index, info, Some(parent))
    }

    fn frame(&self, parent: Option<&FrameRef>) -> Result<FrameRef> {
        let mut planes = Vec::with_capacity(self.desc.format.planes());
        for (index, info) in self.plane_infos()?.into_iter().enumerate() {
            let parent_plane = parent.and_then(|f| f.tensor(index));
            planes.push(self.build_plane(index, info, parent_plane)?);
        }
        let mut builder = Frame::builder(MediaType::Image, self.desc.format.image_format().fourcc())
            .memory_type(self.memory_type)
            .context(self.context.clone())
            .tensors(planes);
        if let Some(parent) = parent {
            builder = builder.parent(Arc::clone(parent));
        }
        builder.build()
    }
}

/// Texture-frame view of `resource` bound to `context`.
pub(crate) fn texture_frame(
    context: &ContextRef,
    resource: TextureResource,
    parent: Option<&FrameRef>,
) -> Result<FrameRef> {
    let id = resource.id().0 as Handle;
    let desc = *resource.desc();
    PlaneSet {
        desc: &desc,
        storage: Arc::new(resource),
        memory_type: MemoryType::GpuSurface,
        context: Some(Arc::clone(context)),
        handles: vec![(TEXTURE_HANDLE, id)],
    }
    .frame(parent)
}

// ─── Texture -> host ────────────────────────────────────────────────────────

/// Staging texture mapped for CPU access.  Unmaps, optionally writes back,
/// and returns the staging texture to the pool when dropped.
struct StagingMapping {
    device: Arc<TextureDevice>,
    staging: StagingTexture,
    planes: Vec<MappedPlane>,
    writeback: Option<TextureResource>,
}

// SAFETY: the mapped pointers stay valid until Drop unmaps them, and the
// staging texture is exclusively owned by this mapping in the meantime.
unsafe impl Send for StagingMapping {}
unsafe impl Sync for StagingMapping {}

impl Drop for StagingMapping {
    fn drop(&mut self) {
        let guard = self.device.lock();
        let driver = self.device.driver();
        for plane in 0..self.planes.len() {
            if let Err(e) = driver.unmap(&guard, self.staging.id, plane) {
                warn!(id = self.staging.id.0, plane, error = %e, "Staging unmap failed");
            }
        }
        if let Some(target) = &self.writeback {
            if let Err(e) = driver.copy_resource(&guard, target.id(), self.staging.id) {
                warn!(id = target.id().0, error = %e, "Staging write-back failed");
            }
        }
        self.device.recycle_staging(&guard, self.staging);
    }
}

/// One mapped plane as tensor storage.
struct MappedPlaneStorage {
    mapping: Arc<StagingMapping>,
    plane: usize,
}

impl fmt::Debug for MappedPlaneStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedPlaneStorage")
            .field("staging", &self.mapping.staging.id)
            .field("plane", &self.plane)
            .finish()
    }
}

impl Storage for MappedPlaneStorage {
    fn data(&self) -> Option<std::ptr::NonNull<u8>> {
        Some(self.mapping.planes[self.plane].data)
    }

    fn byte_len(&self) -> usize {
        let p = &self.mapping.planes[self.plane];
        p.row_pitch * p.rows
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Readback into pooled staging memory.
pub struct TextureToHostMapper {
    endpoints: MapperEndpoints,
    device: Arc<TextureDevice>,
}

impl TextureToHostMapper {
    pub fn new(
        device: &Arc<TextureDevice>,
        input: Option<&ContextRef>,
        output: Option<&ContextRef>,
    ) -> Self {
        Self {
            endpoints: MapperEndpoints::new(input, output),
            device: Arc::clone(device),
        }
    }

    fn read_back(&self, resource: &TextureResource, mode: AccessMode) -> Result<Arc<StagingMapping>> {
        same_device(&self.device, resource)?;
        resource.wait_idle()?;
        let key = StagingKey::of(resource.desc());

        // One hold covers copy-to-staging and mapping every plane.
        let guard = self.device.lock();
        let staging = self.device.acquire_staging(&guard, key)?;
        let planes = match map_staging(&self.device, &guard, resource, staging, mode) {
            Ok(planes) => planes,
            Err(e) => {
                self.device.recycle_staging(&guard, staging);
                return Err(e);
            }
        };
        drop(guard);

        debug!(id = resource.id().0, staging = staging.id.0, ?mode, "Texture read back");
        Ok(Arc::new(StagingMapping {
            device: Arc::clone(&self.device),
            staging,
            planes,
            writeback: mode.writes().then(|| resource.clone()),
        }))
    }

    fn host_plane(
        &self,
        mapping: &Arc<StagingMapping>,
        desc: &TextureDesc,
        index: usize,
        output: Option<ContextRef>,
        parent: Option<&TensorRef>,
    ) -> Result<TensorRef> {
        let plane = mapping
            .planes
            .get(index)
            .ok_or_else(|| MemError::InvalidArgument(format!("plane {index} out of range")))?;
        let info = FrameInfo::image(desc.format.image_format(), desc.width, desc.height)?
            .planes
            .into_iter()
            .nth(index)
            .ok_or_else(|| MemError::InvalidArgument(format!("plane {index} out of range")))?;
        let shape = info.shape().to_vec();
        let stride = match shape.as_slice() {
            [_, _, channels] => vec![plane.row_pitch, *channels, 1],
            _ => vec![plane.row_pitch, 1],
        };
        let storage: StorageRef = Arc::new(MappedPlaneStorage {
            mapping: Arc::clone(mapping),
            plane: index,
        });
        let mut builder = Tensor::builder(TensorInfo::with_stride(shape, DataType::UInt8, stride)?, storage)
            .memory_type(self.endpoints.output_memory_type())
            .context(output)
            .handle(PLANE_HANDLE, index as Handle);
        if let Some(parent) = parent {
            builder = builder.parent(Arc::clone(parent));
        }
        builder.build()
    }
}

fn map_staging(
    device: &TextureDevice,
    guard: &DeviceGuard<'_>,
    resource: &TextureResource,
    staging: StagingTexture,
    mode: AccessMode,
) -> Result<Vec<MappedPlane>> {
    let driver = device.driver();
    if mode.reads() {
        driver.copy_resource(guard, staging.id, resource.id())?;
    }
    let count = resource.desc().format.planes();
    let mut planes = Vec::with_capacity(count);
    for plane in 0..count {
        match driver.map(guard, staging.id, plane, mode) {
            Ok(mapped) => planes.push(mapped),
            Err(e) => {
                for done in 0..planes.len() {
                    if let Err(unmap_err) = driver.unmap(guard, staging.id, done) {
                        warn!(plane = done, error = %unmap_err, "Staging unmap failed");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(planes)
}

impl MemoryMapper for TextureToHostMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, mode: AccessMode) -> Result<TensorRef> {
        let resource = TextureResource::of(src)?;
        let mapping = self.read_back(resource, mode)?;
        let output = self.endpoints.live_output()?;
        self.host_plane(&mapping, resource.desc(), plane_index(src), output, Some(src))
    }

    fn map_frame(&self, src: &FrameRef, mode: AccessMode) -> Result<FrameRef> {
        let resource = frame_resource(src)?;
        let mapping = self.read_back(&resource, mode)?;
        let output = self.endpoints.live_output()?;
        let planes = (0..mapping.planes.len())
            .map(|i| self.host_plane(&mapping, resource.desc(), i, output.clone(), src.tensor(i)))
            .collect::<Result<Vec<_>>>()?;
        Frame::builder(src.media_type(), src.format())
            .memory_type(self.endpoints.output_memory_type())
            .context(output)
            .tensors(planes)
            .parent(Arc::clone(src))
            .build()
    }
}

// ─── Host -> texture ────────────────────────────────────────────────────────

/// Upload through a pooled staging texture into a fresh device texture.
pub struct HostToTextureMapper {
    endpoints: MapperEndpoints,
    device: Arc<TextureDevice>,
}

/// Rows, packed row bytes and row stride of a host plane.
fn host_rows(plane: &Tensor, desc: &TextureDesc, index: usize) -> Result<(usize, usize, usize)> {
    let info = plane.info();
    let (width, height) = desc.plane_size(index);
    let bpp = desc.format.bytes_per_texel(index);
    let shape = info.shape();
    let stride = info.stride();
    let layout_ok = match (shape, stride) {
        ([h, w], [_, 1]) => *h == height && *w == width && bpp == 1,
        ([h, w, c], [_, sc, 1]) => *h == height && *w == width && *c == bpp && sc == c,
        _ => false,
    };
    if info.dtype() != DataType::UInt8 || !layout_ok {
        return Err(MemError::InvalidArgument(format!(
            "plane {index} shape {shape:?} stride {stride:?} does not match {} {}x{}",
            desc.format, desc.width, desc.height
        )));
    }
    Ok((height, width * bpp, stride[0]))
}

impl HostToTextureMapper {
    pub fn new(
        device: &Arc<TextureDevice>,
        input: Option<&ContextRef>,
        output: Option<&ContextRef>,
    ) -> Self {
        Self {
            endpoints: MapperEndpoints::new(input, output),
            device: Arc::clone(device),
        }
    }

    fn upload(&self, planes: &[&TensorRef], desc: TextureDesc, mode: AccessMode) -> Result<TextureResource> {
        if planes.len() != desc.format.planes() {
            return Err(MemError::InvalidArgument(format!(
                "{} needs {} planes, got {}",
                desc.format,
                desc.format.planes(),
                planes.len()
            )));
        }
        let mut rows = Vec::with_capacity(planes.len());
        for (index, plane) in planes.iter().enumerate() {
            if plane.data().is_none() {
                return Err(MemError::MappingUnavailable {
                    from: plane.memory_type(),
                    to: MemoryType::GpuSurface,
                });
            }
            rows.push(host_rows(plane, &desc, index)?);
        }

        let guard = self.device.lock();
        let id = self.device.create_texture(&guard, &desc)?;
        if mode.reads() {
            if let Err(e) = self.write_planes(&guard, id, &desc, planes, &rows) {
                self.device.destroy_quietly(&guard, id);
                return Err(e);
            }
        }
        drop(guard);
        debug!(id = id.0, format = %desc.format, ?mode, "Texture uploaded");
        Ok(TextureResource::new(Arc::clone(&self.device), id, desc))
    }

    fn write_planes(
        &self,
        guard: &DeviceGuard<'_>,
        texture: TextureId,
        desc: &TextureDesc,
        planes: &[&TensorRef],
        rows: &[(usize, usize, usize)],
    ) -> Result<()> {
        let driver = self.device.driver();
        let staging = self.device.acquire_staging(guard, StagingKey::of(desc))?;
        let result = (|| {
            for (index, (plane, &(count, row_bytes, src_pitch))) in planes.iter().zip(rows).enumerate() {
                let mapped = driver.map(guard, staging.id, index, AccessMode::Write)?;
                let Some(src) = plane.data() else {
                    driver.unmap(guard, staging.id, index)?;
                    continue;
                };
                for row in 0..count.min(mapped.rows) {
                    // SAFETY: `host_rows` checked the plane geometry against
                    // the texture; the source spans `count` rows of
                    // `src_pitch` bytes and the mapping `rows` rows of
                    // `row_pitch >= row_bytes` bytes.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            src.as_ptr().add(row * src_pitch),
                            mapped.data.as_ptr().add(row * mapped.row_pitch),
                            row_bytes,
                        );
                    }
                }
                driver.unmap(guard, staging.id, index)?;
            }
            driver.copy_resource(guard, texture, staging.id)
        })();
        self.device.recycle_staging(guard, staging);
        result
    }

    fn output(&self) -> Result<ContextRef> {
        require_output(&self.endpoints)
    }
}

impl MemoryMapper for HostToTextureMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    /// A lone tensor uploads as `gray8` (`[h, w]`) or `bgra` (`[h, w, 4]`).
    fn map_tensor(&self, src: &TensorRef, mode: AccessMode) -> Result<TensorRef> {
        let format = match src.info().shape() {
            [_, _] => TextureFormat::Gray8,
            [_, _, 4] => TextureFormat::Bgra,
            other => {
                return Err(MemError::InvalidArgument(format!(
                    "cannot infer a texture format for shape {other:?}"
                )));
            }
        };
        let shape = src.info().shape();
        let desc = TextureDesc::new(shape[1], shape[0], format).with_usage(TextureUsage::Shared);
        let resource = self.upload(&[src], desc, mode)?;
        let context = self.output()?;
        let id = resource.id().0 as Handle;
        PlaneSet {
            desc: &desc,
            storage: Arc::new(resource),
            memory_type: MemoryType::GpuSurface,
            context: Some(context),
            handles: vec![(TEXTURE_HANDLE, id)],
        }
        .tensor(0, src)
    }

    fn map_frame(&self, src: &FrameRef, mode: AccessMode) -> Result<FrameRef> {
        let format = TextureFormat::from_fourcc(src.format())?;
        let first = src
            .tensor(0)
            .ok_or_else(|| MemError::InvalidArgument("frame has no planes".into()))?;
        let (height, width) = match first.info().shape() {
            [h, w, ..] => (*h, *w),
            other => {
                return Err(MemError::InvalidArgument(format!(
                    "plane 0 shape {other:?} is not an image"
                )));
            }
        };
        let desc = TextureDesc::new(width, height, format).with_usage(TextureUsage::Shared);
        let planes: Vec<&TensorRef> = src.iter().collect();
        let resource = self.upload(&planes, desc, mode)?;
        texture_frame(&self.output()?, resource, Some(src))
    }
}

// ─── Texture -> DMA ─────────────────────────────────────────────────────────

/// Exports a texture as a shareable DMA handle.  The DMA view keeps the
/// exporting texture alive through `parent()`.
pub struct TextureToDmaMapper {
    endpoints: MapperEndpoints,
    device: Arc<TextureDevice>,
}

impl TextureToDmaMapper {
    pub fn new(device: &Arc<TextureDevice>, input: &ContextRef, output: &ContextRef) -> Self {
        Self {
            endpoints: MapperEndpoints::new(Some(input), Some(output)),
            device: Arc::clone(device),
        }
    }

    fn export(&self, resource: &TextureResource) -> Result<PlaneSetOwned> {
        same_device(&self.device, resource)?;
        resource.wait_idle()?;
        let handle = {
            let guard = self.device.lock();
            self.device.driver().export_shared(&guard, resource.id())?
        };
        debug!(id = resource.id().0, handle, "Texture exported");
        let device = Arc::clone(&self.device);
        Ok(PlaneSetOwned {
            desc: *resource.desc(),
            storage: Arc::new(ExternalMemory::handle_only(handle, move || {
                release_export(&device, handle)
            })),
            handle,
        })
    }
}

/// Runs when the last DMA view of an export is dropped.
fn release_export(device: &TextureDevice, handle: Handle) {
    let guard = device.lock();
    match device.driver().release_shared(&guard, handle) {
        Ok(()) => debug!(handle, "DMA handle released"),
        Err(e) => warn!(handle, error = %e, "DMA handle release failed"),
    }
}

/// Owned inputs for a DMA [`PlaneSet`].
struct PlaneSetOwned {
    desc: TextureDesc,
    storage: StorageRef,
    handle: Handle,
}

impl PlaneSetOwned {
    fn planes(&self, context: ContextRef) -> PlaneSet<'_> {
        PlaneSet {
            desc: &self.desc,
            storage: Arc::clone(&self.storage),
            memory_type: MemoryType::Dma,
            context: Some(context),
            handles: vec![(DMA_HANDLE, self.handle)],
        }
    }
}

impl MemoryMapper for TextureToDmaMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, _mode: AccessMode) -> Result<TensorRef> {
        let exported = self.export(TextureResource::of(src)?)?;
        exported
            .planes(require_output(&self.endpoints)?)
            .tensor(plane_index(src), src)
    }

    fn map_frame(&self, src: &FrameRef, _mode: AccessMode) -> Result<FrameRef> {
        let exported = self.export(&frame_resource(src)?)?;
        exported
            .planes(require_output(&self.endpoints)?)
            .frame(Some(src))
    }
}

// ─── DMA -> texture ─────────────────────────────────────────────────────────

/// Imports a DMA handle as a texture on this device.
pub struct DmaToTextureMapper {
    endpoints: MapperEndpoints,
    device: Arc<TextureDevice>,
}

impl DmaToTextureMapper {
    pub fn new(device: &Arc<TextureDevice>, input: &ContextRef, output: &ContextRef) -> Self {
        Self {
            endpoints: MapperEndpoints::new(Some(input), Some(output)),
            device: Arc::clone(device),
        }
    }

    fn import(&self, src: &Tensor) -> Result<TextureResource> {
        let handle = src.handle(DMA_HANDLE)?;
        let (id, desc) = {
            let guard = self.device.lock();
            self.device.driver().import_shared(&guard, handle)?
        };
        debug!(id = id.0, handle, "DMA handle imported");
        Ok(TextureResource::new(Arc::clone(&self.device), id, desc))
    }
}

impl MemoryMapper for DmaToTextureMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, _mode: AccessMode) -> Result<TensorRef> {
        let resource = self.import(src)?;
        let id = resource.id().0 as Handle;
        let desc = *resource.desc();
        PlaneSet {
            desc: &desc,
            storage: Arc::new(resource),
            memory_type: MemoryType::GpuSurface,
            context: Some(require_output(&self.endpoints)?),
            handles: vec![(TEXTURE_HANDLE, id)],
        }
        .tensor(plane_index(src), src)
    }

    fn map_frame(&self, src: &FrameRef, _mode: AccessMode) -> Result<FrameRef> {
        let first = src
            .tensor(0)
            .ok_or_else(|| MemError::InvalidArgument("frame has no planes".into()))?;
        let resource = self.import(first)?;
        texture_frame(&require_output(&self.endpoints)?, resource, Some(src))
    }
}
