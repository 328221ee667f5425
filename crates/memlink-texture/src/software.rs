//! In-memory [`TextureDriver`].
//!
//! Textures are host allocations with an aligned row pitch.  Blits run
//! synchronously (nearest-neighbour scale plus format conversion) but
//! report completion only after a configurable number of fence queries.
//! Failures can be injected per call, and every call is checked for
//! reentrancy so tests can prove the device lock is doing its job.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicUsize, Ordering};

use memlink_core::geometry::Rect;
use memlink_core::storage::HostBuffer;
use memlink_core::{AccessMode, Handle, MemError, Result};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::device::DeviceConfig;
use crate::driver::{
    BltParams, FenceId, MappedPlane, ProcessorId, ProcessorKey, TextureDesc, TextureDriver,
    TextureFormat, TextureId, TextureUsage, check_status,
};
use crate::lock::DeviceGuard;

// Status codes reported by the software driver.
const E_INVALID_ARG: i32 = -2;
const E_MISMATCH: i32 = -3;
const E_NOT_MAPPABLE: i32 = -4;
const E_NOT_MAPPED: i32 = -5;
const E_UNSUPPORTED: i32 = -7;

fn fail<T>(status: i32, call: &str) -> Result<T> {
    Err(MemError::DeviceOperationFailed {
        call: call.to_string(),
        status,
    })
}

// ─── Shared handles ─────────────────────────────────────────────────────────

/// Cross-device DMA handle namespace.  Drivers sharing one table can import
/// each other's exports; the imported texture aliases the exported memory.
pub struct SharedHandleTable {
    entries: Mutex<HashMap<Handle, Arc<SoftTexture>>>,
    next: AtomicIsize,
}

impl SharedHandleTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            next: AtomicIsize::new(100),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Texture memory ─────────────────────────────────────────────────────────

struct SoftPlane {
    buf: HostBuffer,
    row_pitch: usize,
    rows: usize,
}

struct SoftTexture {
    desc: TextureDesc,
    planes: Vec<SoftPlane>,
}

impl SoftTexture {
    fn new(desc: TextureDesc, alignment: usize) -> Result<Self> {
        let mut planes = Vec::with_capacity(desc.format.planes());
        for plane in 0..desc.format.planes() {
            let row_pitch = desc.plane_row_bytes(plane).next_multiple_of(alignment);
            let rows = desc.plane_size(plane).1;
            planes.push(SoftPlane {
                buf: HostBuffer::zeroed(row_pitch * rows)?,
                row_pitch,
                rows,
            });
        }
        Ok(Self { desc, planes })
    }

    /// Address of texel `(x, y)` in `plane`.
    ///
    /// # Safety
    ///
    /// `x`/`y` must lie inside the plane.
    unsafe fn texel(&self, plane: usize, x: usize, y: usize) -> *mut u8 {
        let p = &self.planes[plane];
        let offset = y * p.row_pitch + x * self.desc.format.bytes_per_texel(plane);
        // SAFETY: in-bounds per the caller contract.
        unsafe { p.buf.as_ptr().as_ptr().add(offset) }
    }

    fn read_rgba(&self, x: usize, y: usize) -> [u8; 4] {
        // SAFETY: callers clamp coordinates to the source rectangle, which
        // was validated against the texture size.
        unsafe {
            match self.desc.format {
                TextureFormat::Nv12 => {
                    let luma = *self.texel(0, x, y);
                    let uv = self.texel(1, x / 2, y / 2);
                    yuv_to_rgba(luma, *uv, *uv.add(1))
                }
                TextureFormat::Gray8 => {
                    let v = *self.texel(0, x, y);
                    [v, v, v, 255]
                }
                TextureFormat::Bgra | TextureFormat::Bgrx => {
                    let p = self.texel(0, x, y);
                    [*p.add(2), *p.add(1), *p, *p.add(3)]
                }
                TextureFormat::Rgba => {
                    let p = self.texel(0, x, y);
                    [*p, *p.add(1), *p.add(2), *p.add(3)]
                }
            }
        }
    }
}

// SAFETY: plane memory is only touched inside driver calls (serialized by
// the device lock) or through an exclusive staging mapping.
unsafe impl Send for SoftTexture {}
unsafe impl Sync for SoftTexture {}

/// BT.601 limited-range YUV to RGBA.
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = 1.164 * (f32::from(y) - 16.0);
    let d = f32::from(u) - 128.0;
    let e = f32::from(v) - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
        255,
    ]
}

fn luma(rgba: [u8; 4]) -> u8 {
    let [r, g, b, _] = rgba.map(f32::from);
    (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
}

/// Bytes of one texel of `plane` holding the RGBA color `rgba`.
fn encode_texel(format: TextureFormat, plane: usize, rgba: [u8; 4]) -> ([u8; 4], usize) {
    let [r, g, b, a] = rgba;
    match (format, plane) {
        (TextureFormat::Bgra | TextureFormat::Bgrx, _) => ([b, g, r, a], 4),
        (TextureFormat::Rgba, _) => ([r, g, b, a], 4),
        (TextureFormat::Gray8, _) | (TextureFormat::Nv12, 0) => ([luma(rgba), 0, 0, 0], 1),
        (TextureFormat::Nv12, _) => ([128, 128, 0, 0], 2),
    }
}

/// Source texel for destination texel `(x, y)`, or `None` in the border.
fn source_point(src: &Rect, dst: &Rect, x: usize, y: usize) -> Option<(usize, usize)> {
    if x < dst.x || y < dst.y || x >= dst.right() || y >= dst.bottom() {
        return None;
    }
    let sx = src.x + (x - dst.x) * src.width / dst.width;
    let sy = src.y + (y - dst.y) * src.height / dst.height;
    Some((sx.min(src.right() - 1), sy.min(src.bottom() - 1)))
}

fn blit(src: &SoftTexture, dst: &SoftTexture, params: &BltParams) -> Result<()> {
    let (sfmt, dfmt) = (src.desc.format, dst.desc.format);
    let fits = |r: &Rect, d: &TextureDesc| {
        !r.is_empty() && r.right() <= d.width && r.bottom() <= d.height
    };
    if !fits(&params.src_rect, &src.desc) || !fits(&params.dst_rect, &dst.desc) {
        return fail(E_INVALID_ARG, "blt");
    }

    if sfmt == dfmt {
        // Raw texel copy per plane; chroma planes sample at half resolution.
        for plane in 0..dfmt.planes() {
            let sub = if plane == 0 { 1 } else { 2 };
            let (pw, ph) = dst.desc.plane_size(plane);
            let (fill, bpp) = encode_texel(dfmt, plane, params.fill);
            for py in 0..ph {
                for px in 0..pw {
                    // SAFETY: (px, py) iterates the destination plane and the
                    // source point lies inside the validated source rect.
                    unsafe {
                        let out = dst.texel(plane, px, py);
                        match source_point(&params.src_rect, &params.dst_rect, px * sub, py * sub) {
                            Some((sx, sy)) => {
                                let from = src.texel(plane, sx / sub, sy / sub);
                                std::ptr::copy(from, out, bpp);
                            }
                            None => std::ptr::copy_nonoverlapping(fill.as_ptr(), out, bpp),
                        }
                    }
                }
            }
        }
        return Ok(());
    }

    if dfmt == TextureFormat::Nv12 {
        return fail(E_UNSUPPORTED, "blt");
    }
    for y in 0..dst.desc.height {
        for x in 0..dst.desc.width {
            let rgba = match source_point(&params.src_rect, &params.dst_rect, x, y) {
                Some((sx, sy)) => src.read_rgba(sx, sy),
                None => params.fill,
            };
            let (bytes, bpp) = encode_texel(dfmt, 0, rgba);
            // SAFETY: (x, y) iterates the destination texture.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.texel(0, x, y), bpp) };
        }
    }
    Ok(())
}

// ─── Driver ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SoftState {
    next_id: u64,
    textures: HashMap<TextureId, Arc<SoftTexture>>,
    mapped: HashSet<(TextureId, usize)>,
    processors: HashMap<ProcessorId, ProcessorKey>,
    fences: HashMap<FenceId, u32>,
    failures: HashMap<&'static str, i32>,
}

impl SoftState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn texture(&self, id: TextureId, call: &str) -> Result<Arc<SoftTexture>> {
        match self.textures.get(&id) {
            Some(t) => Ok(Arc::clone(t)),
            None => fail(E_INVALID_ARG, call),
        }
    }
}

pub struct SoftwareDriver {
    name: String,
    row_pitch_alignment: usize,
    fence_latency: u32,
    shared: Arc<SharedHandleTable>,
    state: Mutex<SoftState>,
    in_flight: AtomicUsize,
    violations: AtomicUsize,
    calls: AtomicU64,
}

/// Marks one driver call in flight.
struct CallScope<'a>(&'a AtomicUsize);

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self {
            name: "software".into(),
            row_pitch_alignment: 64,
            fence_latency: 0,
            shared: SharedHandleTable::new(),
            state: Mutex::new(SoftState::default()),
            in_flight: AtomicUsize::new(0),
            violations: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Driver honouring the construction hints of `config`.
    pub fn for_config(config: &DeviceConfig) -> Self {
        Self::new().with_row_pitch_alignment(config.row_pitch_alignment)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_row_pitch_alignment(mut self, alignment: usize) -> Self {
        self.row_pitch_alignment = alignment.max(1);
        self
    }

    /// Fence queries answered "busy" before a blit reports completion.
    pub fn with_fence_latency(mut self, polls: u32) -> Self {
        self.fence_latency = polls;
        self
    }

    pub fn with_shared_table(mut self, table: Arc<SharedHandleTable>) -> Self {
        self.shared = table;
        self
    }

    pub fn into_driver(self) -> Arc<dyn TextureDriver> {
        Arc::new(self)
    }

    /// Make the next invocation of `call` fail with `status`.
    pub fn fail_next(&self, call: &'static str, status: i32) {
        self.state.lock().failures.insert(call, status);
    }

    /// Calls that overlapped another call on this driver.
    pub fn reentrancy_violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn mapped_planes(&self) -> usize {
        self.state.lock().mapped.len()
    }

    pub fn pending_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    fn enter(&self, call: &'static str) -> Result<CallScope<'_>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
            error!(driver = %self.name, call, "Reentrant driver call detected");
        }
        let scope = CallScope(&self.in_flight);
        if let Some(status) = self.state.lock().failures.remove(call) {
            check_status(status, call)?;
        }
        Ok(scope)
    }
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoftwareDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDriver")
            .field("name", &self.name)
            .field("live_textures", &self.live_textures())
            .field("violations", &self.reentrancy_violations())
            .finish()
    }
}

impl TextureDriver for SoftwareDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_texture(&self, _guard: &DeviceGuard<'_>, desc: &TextureDesc) -> Result<TextureId> {
        let _scope = self.enter("create_texture")?;
        if desc.width == 0 || desc.height == 0 {
            return fail(E_INVALID_ARG, "create_texture");
        }
        let texture = Arc::new(SoftTexture::new(*desc, self.row_pitch_alignment)?);
        let mut state = self.state.lock();
        let id = TextureId(state.next());
        state.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&self, _guard: &DeviceGuard<'_>, texture: TextureId) -> Result<()> {
        let _scope = self.enter("destroy_texture")?;
        let mut state = self.state.lock();
        if state.textures.remove(&texture).is_none() {
            return fail(E_INVALID_ARG, "destroy_texture");
        }
        state.mapped.retain(|(id, _)| *id != texture);
        Ok(())
    }

    fn copy_resource(&self, _guard: &DeviceGuard<'_>, dst: TextureId, src: TextureId) -> Result<()> {
        let _scope = self.enter("copy_resource")?;
        let state = self.state.lock();
        let (to, from) = (state.texture(dst, "copy_resource")?, state.texture(src, "copy_resource")?);
        let same_shape = to.desc.width == from.desc.width
            && to.desc.height == from.desc.height
            && to.desc.format == from.desc.format;
        if !same_shape {
            return fail(E_MISMATCH, "copy_resource");
        }
        if Arc::ptr_eq(&to, &from) {
            return Ok(());
        }
        for plane in 0..to.desc.format.planes() {
            let row_bytes = to.desc.plane_row_bytes(plane);
            for row in 0..to.planes[plane].rows {
                // SAFETY: both textures have identical plane geometry and
                // distinct allocations.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        from.texel(plane, 0, row),
                        to.texel(plane, 0, row),
                        row_bytes,
                    );
                }
            }
        }
        Ok(())
    }

    fn map(
        &self,
        _guard: &DeviceGuard<'_>,
        texture: TextureId,
        plane: usize,
        _mode: AccessMode,
    ) -> Result<MappedPlane> {
        let _scope = self.enter("map")?;
        let mut state = self.state.lock();
        let tex = state.texture(texture, "map")?;
        if tex.desc.usage != TextureUsage::Staging || plane >= tex.planes.len() {
            return fail(E_NOT_MAPPABLE, "map");
        }
        if !state.mapped.insert((texture, plane)) {
            return fail(E_NOT_MAPPABLE, "map");
        }
        let p = &tex.planes[plane];
        Ok(MappedPlane {
            data: p.buf.as_ptr(),
            row_pitch: p.row_pitch,
            rows: p.rows,
        })
    }

    fn unmap(&self, _guard: &DeviceGuard<'_>, texture: TextureId, plane: usize) -> Result<()> {
        let _scope = self.enter("unmap")?;
        if !self.state.lock().mapped.remove(&(texture, plane)) {
            return fail(E_NOT_MAPPED, "unmap");
        }
        Ok(())
    }

    fn create_processor(&self, _guard: &DeviceGuard<'_>, key: &ProcessorKey) -> Result<ProcessorId> {
        let _scope = self.enter("create_processor")?;
        let mut state = self.state.lock();
        let id = ProcessorId(state.next());
        state.processors.insert(id, *key);
        debug!(?key, id = id.0, "Software processor created");
        Ok(id)
    }

    fn destroy_processor(&self, _guard: &DeviceGuard<'_>, processor: ProcessorId) -> Result<()> {
        let _scope = self.enter("destroy_processor")?;
        match self.state.lock().processors.remove(&processor) {
            Some(_) => Ok(()),
            None => fail(E_INVALID_ARG, "destroy_processor"),
        }
    }

    fn blt(
        &self,
        _guard: &DeviceGuard<'_>,
        processor: ProcessorId,
        src: TextureId,
        dst: TextureId,
        params: &BltParams,
    ) -> Result<FenceId> {
        let _scope = self.enter("blt")?;
        let mut state = self.state.lock();
        let Some(key) = state.processors.get(&processor).copied() else {
            return fail(E_INVALID_ARG, "blt");
        };
        let (from, to) = (state.texture(src, "blt")?, state.texture(dst, "blt")?);
        let configured = key.in_width == from.desc.width
            && key.in_height == from.desc.height
            && key.out_width == to.desc.width
            && key.out_height == to.desc.height;
        if !configured {
            return fail(E_MISMATCH, "blt");
        }
        blit(&from, &to, params)?;
        let fence = FenceId(state.next());
        state.fences.insert(fence, self.fence_latency);
        Ok(fence)
    }

    fn query_fence(&self, _guard: &DeviceGuard<'_>, fence: FenceId) -> Result<bool> {
        let _scope = self.enter("query_fence")?;
        let mut state = self.state.lock();
        let Some(remaining) = state.fences.get_mut(&fence) else {
            return fail(E_INVALID_ARG, "query_fence");
        };
        if *remaining == 0 {
            state.fences.remove(&fence);
            return Ok(true);
        }
        *remaining -= 1;
        Ok(false)
    }

    fn export_shared(&self, _guard: &DeviceGuard<'_>, texture: TextureId) -> Result<Handle> {
        let _scope = self.enter("export_shared")?;
        let tex = self.state.lock().texture(texture, "export_shared")?;
        if tex.desc.usage == TextureUsage::Staging {
            return fail(E_UNSUPPORTED, "export_shared");
        }
        let handle = self.shared.next.fetch_add(1, Ordering::Relaxed);
        self.shared.entries.lock().insert(handle, tex);
        Ok(handle)
    }

    fn import_shared(&self, _guard: &DeviceGuard<'_>, handle: Handle) -> Result<(TextureId, TextureDesc)> {
        let _scope = self.enter("import_shared")?;
        let Some(tex) = self.shared.entries.lock().get(&handle).cloned() else {
            return fail(E_INVALID_ARG, "import_shared");
        };
        let desc = tex.desc.with_usage(TextureUsage::Default);
        let mut state = self.state.lock();
        let id = TextureId(state.next());
        state.textures.insert(id, tex);
        Ok((id, desc))
    }

    fn release_shared(&self, _guard: &DeviceGuard<'_>, handle: Handle) -> Result<()> {
        let _scope = self.enter("release_shared")?;
        match self.shared.entries.lock().remove(&handle) {
            Some(_) => Ok(()),
            None => fail(E_INVALID_ARG, "release_shared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MutexDeviceLock;

    fn fill_rgba(driver: &SoftwareDriver, id: TextureId, rgba: [u8; 4]) {
        let state = driver.state.lock();
        let tex = &state.textures[&id];
        for y in 0..tex.desc.height {
            for x in 0..tex.desc.width {
                let (bytes, bpp) = encode_texel(tex.desc.format, 0, rgba);
                // SAFETY: in-bounds test texture.
                unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), tex.texel(0, x, y), bpp) };
            }
        }
    }

    fn pixel(driver: &SoftwareDriver, id: TextureId, x: usize, y: usize) -> [u8; 4] {
        driver.state.lock().textures[&id].read_rgba(x, y)
    }

    #[test]
    fn row_pitch_is_aligned() {
        let driver = SoftwareDriver::new().with_row_pitch_alignment(256);
        let lock = MutexDeviceLock::new();
        let guard = DeviceGuard::acquire(&lock);
        let desc = TextureDesc::new(10, 4, TextureFormat::Bgra).with_usage(TextureUsage::Staging);
        let id = driver.create_texture(&guard, &desc).expect("texture");
        let mapped = driver.map(&guard, id, 0, AccessMode::Read).expect("map");
        assert_eq!(mapped.row_pitch, 256);
        assert_eq!(mapped.rows, 4);
        assert!(driver.map(&guard, id, 0, AccessMode::Read).is_err(), "double map");
        driver.unmap(&guard, id, 0).expect("unmap");
        assert!(driver.unmap(&guard, id, 0).is_err());
    }

    #[test]
    fn blit_scales_converts_and_fills() {
        let driver = SoftwareDriver::new();
        let lock = MutexDeviceLock::new();
        let guard = DeviceGuard::acquire(&lock);
        let src = driver
            .create_texture(&guard, &TextureDesc::new(2, 1, TextureFormat::Bgra))
            .expect("src");
        let dst = driver
            .create_texture(&guard, &TextureDesc::new(4, 4, TextureFormat::Rgba))
            .expect("dst");
        fill_rgba(&driver, src, [200, 100, 50, 255]);

        let key = ProcessorKey::new(2, 1, 4, 4);
        let processor = driver.create_processor(&guard, &key).expect("processor");
        let params = BltParams {
            src_rect: Rect::new(0, 0, 2, 1),
            dst_rect: Rect::new(0, 1, 4, 2),
            fill: [9, 8, 7, 255],
        };
        let fence = driver.blt(&guard, processor, src, dst, &params).expect("blt");
        assert!(driver.query_fence(&guard, fence).expect("query"));

        assert_eq!(pixel(&driver, dst, 0, 0), [9, 8, 7, 255]);
        assert_eq!(pixel(&driver, dst, 3, 2), [200, 100, 50, 255]);
        assert_eq!(pixel(&driver, dst, 1, 3), [9, 8, 7, 255]);
    }

    #[test]
    fn blit_rejects_unconfigured_sizes() {
        let driver = SoftwareDriver::new();
        let lock = MutexDeviceLock::new();
        let guard = DeviceGuard::acquire(&lock);
        let src = driver
            .create_texture(&guard, &TextureDesc::new(8, 8, TextureFormat::Gray8))
            .expect("src");
        let dst = driver
            .create_texture(&guard, &TextureDesc::new(4, 4, TextureFormat::Gray8))
            .expect("dst");
        let processor = driver
            .create_processor(&guard, &ProcessorKey::new(16, 16, 4, 4))
            .expect("processor");
        let params = BltParams {
            src_rect: Rect::new(0, 0, 8, 8),
            dst_rect: Rect::new(0, 0, 4, 4),
            fill: [0, 0, 0, 255],
        };
        let err = driver.blt(&guard, processor, src, dst, &params).expect_err("size mismatch");
        assert!(matches!(err, MemError::DeviceOperationFailed { status: E_MISMATCH, .. }));
    }

    #[test]
    fn fence_latency_and_injected_failure() {
        let driver = SoftwareDriver::new().with_fence_latency(2);
        let lock = MutexDeviceLock::new();
        let guard = DeviceGuard::acquire(&lock);
        let tex = driver
            .create_texture(&guard, &TextureDesc::new(2, 2, TextureFormat::Gray8))
            .expect("tex");
        let processor = driver
            .create_processor(&guard, &ProcessorKey::new(2, 2, 2, 2))
            .expect("processor");
        let params = BltParams {
            src_rect: Rect::new(0, 0, 2, 2),
            dst_rect: Rect::new(0, 0, 2, 2),
            fill: [0, 0, 0, 255],
        };
        let fence = driver.blt(&guard, processor, tex, tex, &params).expect("blt");
        assert!(!driver.query_fence(&guard, fence).expect("busy"));
        assert!(!driver.query_fence(&guard, fence).expect("busy"));
        assert!(driver.query_fence(&guard, fence).expect("done"));
        assert_eq!(driver.pending_fences(), 0);

        driver.fail_next("create_texture", -11);
        let err = driver
            .create_texture(&guard, &TextureDesc::new(2, 2, TextureFormat::Gray8))
            .expect_err("injected");
        assert!(matches!(err, MemError::DeviceOperationFailed { status: -11, .. }));
        assert_eq!(driver.reentrancy_violations(), 0);
    }

    #[test]
    fn nv12_to_rgba_converts_mid_gray() {
        let driver = SoftwareDriver::new();
        let lock = MutexDeviceLock::new();
        let guard = DeviceGuard::acquire(&lock);
        let src = driver
            .create_texture(&guard, &TextureDesc::new(2, 2, TextureFormat::Nv12))
            .expect("src");
        {
            let state = driver.state.lock();
            let tex = &state.textures[&src];
            // SAFETY: in-bounds writes to a 2x2 NV12 texture.
            unsafe {
                for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    *tex.texel(0, x, y) = 126;
                }
                let uv = tex.texel(1, 0, 0);
                *uv = 128;
                *uv.add(1) = 128;
            }
        }
        assert_eq!(pixel(&driver, src, 1, 1), [128, 128, 128, 255]);
    }

    #[test]
    fn released_export_cannot_be_imported() {
        let driver = SoftwareDriver::new();
        let lock = MutexDeviceLock::new();
        let guard = DeviceGuard::acquire(&lock);
        let tex = driver
            .create_texture(&guard, &TextureDesc::new(4, 2, TextureFormat::Bgra))
            .expect("tex");
        let handle = driver.export_shared(&guard, tex).expect("export");
        let (imported, desc) = driver.import_shared(&guard, handle).expect("import");
        assert_eq!((desc.width, desc.height), (4, 2));

        driver.release_shared(&guard, handle).expect("release");
        assert!(driver.shared.is_empty());
        assert!(driver.import_shared(&guard, handle).is_err());
        assert!(driver.release_shared(&guard, handle).is_err());
        // The import aliases the texture memory, not the handle.
        fill_rgba(&driver, tex, [1, 2, 3, 255]);
        assert_eq!(pixel(&driver, imported, 0, 0), [1, 2, 3, 255]);
    }
}
