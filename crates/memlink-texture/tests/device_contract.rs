use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use memlink_core::host::host_frame;
use memlink_core::{
    AccessMode, Context, FrameRef, ImageFormat, MemError, MemoryMapper, MemoryType, OffsetAlign,
    PreprocessConfig, TensorRef, create_mapper,
};
use memlink_texture::{
    CompletionPolicy, ConvertTarget, DeviceConfig, DeviceLock, MutexDeviceLock, PLANE_HANDLE,
    SharedHandleTable, SoftwareDriver, TextureContext, TextureDevice, TextureFormat,
};

/// Device lock that counts acquisitions.
struct CountingLock {
    inner: MutexDeviceLock,
    acquired: AtomicUsize,
}

impl CountingLock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MutexDeviceLock::new(),
            acquired: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl DeviceLock for CountingLock {
    fn lock(&self) {
        self.inner.lock();
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn try_lock(&self) -> bool {
        let locked = self.inner.try_lock();
        if locked {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        locked
    }

    unsafe fn unlock(&self) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.inner.unlock() }
    }
}

fn software_device(
    driver: SoftwareDriver,
    config: DeviceConfig,
) -> (Arc<SoftwareDriver>, Arc<TextureContext>) {
    let soft = Arc::new(driver);
    let device = TextureDevice::new(soft.clone(), config).expect("device");
    (soft, TextureContext::new(device))
}

fn pattern(x: usize, y: usize) -> [u8; 4] {
    [(x * 10) as u8, (y * 10) as u8, 50, 255]
}

fn bgra_host_frame(width: usize, height: usize) -> FrameRef {
    let frame = host_frame(ImageFormat::Bgra, width, height).expect("host frame");
    let plane = frame.tensor(0).expect("plane");
    for y in 0..height {
        for x in 0..width {
            let texel = plane
                .data_at::<u8>(&[y, x], OffsetAlign::Front)
                .expect("texel");
            // SAFETY: four bytes per BGRA texel inside a fresh host buffer.
            unsafe { std::ptr::copy_nonoverlapping(pattern(x, y).as_ptr(), texel.as_ptr(), 4) };
        }
    }
    frame
}

fn texel(plane: &TensorRef, x: usize, y: usize) -> [u8; 4] {
    let ptr = plane
        .data_at::<u8>(&[y, x], OffsetAlign::Front)
        .expect("texel");
    let mut out = [0u8; 4];
    // SAFETY: reading one in-bounds texel of a live mapping.
    unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), out.as_mut_ptr(), 4) };
    out
}

#[test]
fn upload_then_readback_preserves_pixels() {
    let (soft, tex) = software_device(SoftwareDriver::new(), DeviceConfig::default());
    let src = bgra_host_frame(7, 5);

    let gpu = src
        .map(Some(&tex.as_context()), AccessMode::Read)
        .expect("upload");
    assert_eq!(gpu.memory_type(), MemoryType::GpuSurface);
    assert!(gpu.tensor(0).expect("plane").data().is_none());

    let host = gpu.map(None, AccessMode::Read).expect("readback");
    assert_eq!(host.memory_type(), MemoryType::Cpu);
    assert!(Arc::ptr_eq(host.parent().expect("parent"), &gpu));
    let plane = host.tensor(0).expect("plane");
    assert_eq!(plane.info().shape(), &[5, 7, 4]);
    assert_eq!(plane.info().stride(), &[64, 4, 1]);
    for (x, y) in [(0, 0), (6, 0), (3, 2), (6, 4)] {
        assert_eq!(texel(plane, x, y), pattern(x, y));
    }

    assert_eq!(soft.mapped_planes(), 1);
    drop(host);
    assert_eq!(soft.mapped_planes(), 0);
    assert_eq!(soft.reentrancy_violations(), 0);
}

#[test]
fn configured_row_pitch_reaches_the_driver() {
    let config = DeviceConfig {
        row_pitch_alignment: 256,
        ..DeviceConfig::default()
    };
    let (_soft, tex) = software_device(SoftwareDriver::for_config(&config), config);
    let host = bgra_host_frame(7, 5)
        .map(Some(&tex.as_context()), AccessMode::Read)
        .expect("upload")
        .map(None, AccessMode::Read)
        .expect("readback");
    let plane = host.tensor(0).expect("plane");
    assert_eq!(plane.info().stride(), &[256, 4, 1]);
    assert_eq!(texel(plane, 6, 4), pattern(6, 4));
}

#[test]
fn staging_textures_are_pooled_and_evicted() {
    let config = DeviceConfig {
        staging_capacity: 1,
        ..DeviceConfig::default()
    };
    let (soft, tex) = software_device(SoftwareDriver::new(), config);
    let big = tex
        .allocate_frame(TextureFormat::Bgra, 16, 16)
        .expect("allocate");
    for _ in 0..2 {
        let host = big.map(None, AccessMode::Read).expect("readback");
        drop(host);
    }

    let small = tex
        .allocate_frame(TextureFormat::Bgra, 8, 8)
        .expect("allocate");
    drop(small.map(None, AccessMode::Read).expect("readback"));

    let pool = tex.device().staging_pool();
    let stats = pool.stats();
    assert_eq!(stats.hits.load(Ordering::Relaxed), 1);
    assert_eq!(stats.misses.load(Ordering::Relaxed), 2);
    assert_eq!(stats.evictions.load(Ordering::Relaxed), 1);
    assert_eq!(pool.idle_len(), 1);
    // Two frames plus the one idle staging texture.
    assert_eq!(soft.live_textures(), 3);
}

#[test]
fn nv12_readback_maps_both_planes_in_one_lock_hold() {
    let lock = CountingLock::new();
    let soft = Arc::new(SoftwareDriver::new());
    let device =
        TextureDevice::with_lock(soft.clone(), lock.clone(), DeviceConfig::default()).expect("device");
    let tex = TextureContext::new(device);
    let frame = tex
        .allocate_frame(TextureFormat::Nv12, 16, 8)
        .expect("allocate");

    let before = lock.count();
    let host = frame.map(None, AccessMode::Read).expect("readback");
    assert_eq!(lock.count() - before, 1);
    assert_eq!(host.num_tensors(), 2);
    assert_eq!(host.tensor(0).expect("luma").info().shape(), &[8, 16]);
    assert_eq!(host.tensor(1).expect("chroma").info().shape(), &[4, 8, 2]);
    assert_eq!(soft.mapped_planes(), 2);

    drop(host);
    assert_eq!(lock.count() - before, 2);
    assert_eq!(soft.mapped_planes(), 0);
}

#[test]
fn concurrent_users_never_overlap_driver_calls() {
    let (soft, tex) = software_device(
        SoftwareDriver::new().with_fence_latency(2),
        DeviceConfig::default(),
    );
    let src = bgra_host_frame(32, 16)
        .map(Some(&tex.as_context()), AccessMode::Read)
        .expect("upload");
    let config: PreprocessConfig = "resize=keep-aspect".parse().expect("config");

    std::thread::scope(|s| {
        for worker in 0..8 {
            let (tex, src, config) = (&tex, &src, &config);
            s.spawn(move || {
                for i in 0..20 {
                    let size = 8 + (worker + i) % 3 * 8;
                    let target = ConvertTarget::new(size, size, TextureFormat::Rgba);
                    let (out, _) = tex
                        .convert(src, None, target, config, None)
                        .expect("convert");
                    let host = out.map(None, AccessMode::Read).expect("readback");
                    assert_eq!(host.tensor(0).expect("plane").info().shape()[0], size);
                }
            });
        }
    });

    assert_eq!(soft.reentrancy_violations(), 0);
    assert_eq!(soft.pending_fences(), 0);
    assert_eq!(tex.device().processors().len(), 3);
}

#[test]
fn convert_letterboxes_and_readback_waits_for_the_blit() {
    let (soft, tex) = software_device(
        SoftwareDriver::new().with_fence_latency(3),
        DeviceConfig::default(),
    );
    let src = bgra_host_frame(8, 4)
        .map(Some(&tex.as_context()), AccessMode::Read)
        .expect("upload");
    let config: PreprocessConfig = "resize=keep-aspect".parse().expect("config");

    let (out, record) = tex
        .convert(
            &src,
            None,
            ConvertTarget::new(8, 8, TextureFormat::Bgra),
            &config,
            None,
        )
        .expect("convert");
    assert!(Arc::ptr_eq(out.parent().expect("parent"), &src));
    assert_eq!(soft.pending_fences(), 1);
    assert_eq!(record.restore_point(0.0, 2.0), (0.0, 0.0));

    let host = out.map(None, AccessMode::Read).expect("readback");
    assert_eq!(soft.pending_fences(), 0);
    let plane = host.tensor(0).expect("plane");
    assert_eq!(texel(plane, 3, 0), [0, 0, 0, 255]);
    assert_eq!(texel(plane, 3, 2), pattern(3, 0));
    assert_eq!(texel(plane, 7, 5), pattern(7, 3));
    assert_eq!(texel(plane, 7, 7), [0, 0, 0, 255]);
}

#[test]
fn corner_crop_of_odd_sized_frame_converts() {
    let (_soft, tex) = software_device(SoftwareDriver::new(), DeviceConfig::default());
    let src = bgra_host_frame(20, 53)
        .map(Some(&tex.as_context()), AccessMode::Read)
        .expect("upload");
    let config: PreprocessConfig = "resize=keep-aspect;crop=bottom-right"
        .parse()
        .expect("config");

    let (out, record) = tex
        .convert(
            &src,
            None,
            ConvertTarget::new(13, 13, TextureFormat::Bgra),
            &config,
            None,
        )
        .expect("convert");
    assert!(record.was_crop);
    let host = out.map(None, AccessMode::Read).expect("readback");
    assert_eq!(host.tensor(0).expect("plane").info().shape(), &[13, 13, 4]);
}

#[test]
fn unfinished_blit_is_a_timeout() {
    let config = DeviceConfig {
        completion: CompletionPolicy {
            max_polls: 50,
            deadline_ms: None,
        },
        ..DeviceConfig::default()
    };
    let (_soft, tex) = software_device(SoftwareDriver::new().with_fence_latency(u32::MAX), config);
    let src = tex
        .allocate_frame(TextureFormat::Bgra, 4, 4)
        .expect("allocate");
    let (out, _) = tex
        .convert(
            &src,
            None,
            ConvertTarget::new(2, 2, TextureFormat::Bgra),
            &PreprocessConfig::default(),
            None,
        )
        .expect("convert");

    for _ in 0..2 {
        let err = out.map(None, AccessMode::Read).expect_err("blit never completes");
        match err {
            MemError::Timeout {
                operation, polls, ..
            } => {
                assert_eq!(operation, "blt");
                assert_eq!(polls, 50);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}

#[test]
fn derived_contexts_are_siblings_of_another_type() {
    let (_soft, tex) = software_device(SoftwareDriver::new(), DeviceConfig::default());
    let me = tex.as_context();

    let dma = Arc::clone(&me)
        .derive_context(MemoryType::Dma)
        .expect("dma sibling");
    assert_eq!(dma.memory_type(), MemoryType::Dma);
    let parent = dma.parent().expect("parent alive");
    assert!(Arc::ptr_eq(&parent, &me));
    let again = Arc::clone(&me)
        .derive_context(MemoryType::Dma)
        .expect("dma sibling");
    assert!(Arc::ptr_eq(&again, &dma));

    assert!(Arc::clone(&me).derive_context(MemoryType::GpuSurface).is_none());
    assert!(Arc::clone(&me).derive_context(MemoryType::Cpu).is_none());
}

#[test]
fn dma_chain_moves_a_frame_between_devices() {
    let table = SharedHandleTable::new();
    let (soft_a, tex_a) = software_device(
        SoftwareDriver::new()
            .named("a")
            .with_shared_table(Arc::clone(&table)),
        DeviceConfig::default(),
    );
    let (soft_b, tex_b) = software_device(
        SoftwareDriver::new()
            .named("b")
            .with_shared_table(Arc::clone(&table)),
        DeviceConfig::default(),
    );
    let dma = tex_a.dma_context();
    tex_b.attach_dma_import(&dma);
    create_mapper(
        &[tex_a.as_context(), dma.as_context(), tex_b.as_context()],
        false,
    )
    .expect("chain");

    let on_a = bgra_host_frame(6, 3)
        .map(Some(&tex_a.as_context()), AccessMode::Read)
        .expect("upload");
    let on_b = on_a
        .map(Some(&tex_b.as_context()), AccessMode::Read)
        .expect("chain map");
    assert_eq!(on_b.memory_type(), MemoryType::GpuSurface);
    let via = on_b.parent().expect("intermediate");
    assert_eq!(via.memory_type(), MemoryType::Dma);
    assert!(Arc::ptr_eq(&on_b.root(), &on_a.root()));
    assert_eq!(table.len(), 1);

    let host = on_b.map(None, AccessMode::Read).expect("readback on b");
    let plane = host.tensor(0).expect("plane");
    for (x, y) in [(0, 0), (5, 2), (2, 1)] {
        assert_eq!(texel(plane, x, y), pattern(x, y));
    }
    assert_eq!(soft_a.reentrancy_violations() + soft_b.reentrancy_violations(), 0);
}

#[test]
fn dma_exports_are_released_with_their_views() {
    let table = SharedHandleTable::new();
    let (soft_a, tex_a) = software_device(
        SoftwareDriver::new()
            .named("a")
            .with_shared_table(Arc::clone(&table)),
        DeviceConfig::default(),
    );
    let (_soft_b, tex_b) = software_device(
        SoftwareDriver::new()
            .named("b")
            .with_shared_table(Arc::clone(&table)),
        DeviceConfig::default(),
    );
    let dma = tex_a.dma_context();
    tex_b.attach_dma_import(&dma);
    create_mapper(
        &[tex_a.as_context(), dma.as_context(), tex_b.as_context()],
        false,
    )
    .expect("chain");

    let mut on_b = Vec::new();
    for _ in 0..10 {
        let on_a = tex_a
            .allocate_frame(TextureFormat::Nv12, 16, 8)
            .expect("allocate");
        on_b.push(
            on_a.map(Some(&tex_b.as_context()), AccessMode::Read)
                .expect("chain map"),
        );
    }
    assert_eq!(table.len(), 10);

    on_b.truncate(4);
    assert_eq!(table.len(), 4);
    drop(on_b);
    assert!(table.is_empty());
    assert_eq!(soft_a.reentrancy_violations(), 0);
}

#[test]
fn cached_export_maps_each_plane_separately() {
    let (_soft, tex) = software_device(SoftwareDriver::new(), DeviceConfig::default());
    let dma = tex.dma_context();
    let mapper = create_mapper(&[tex.as_context(), dma.as_context()], true).expect("cached");
    let frame = tex
        .allocate_frame(TextureFormat::Nv12, 16, 8)
        .expect("allocate");

    let luma = mapper
        .map_tensor(frame.tensor(0).expect("luma"), AccessMode::Read)
        .expect("map luma");
    let chroma = mapper
        .map_tensor(frame.tensor(1).expect("chroma"), AccessMode::Read)
        .expect("map chroma");
    assert_eq!(luma.info().shape(), &[8, 16]);
    assert_eq!(chroma.info().shape(), &[4, 8, 2]);
    assert_eq!(luma.handle(PLANE_HANDLE).expect("plane"), 0);
    assert_eq!(chroma.handle(PLANE_HANDLE).expect("plane"), 1);
    assert_eq!(chroma.memory_type(), MemoryType::Dma);

    let again = mapper
        .map_tensor(frame.tensor(1).expect("chroma"), AccessMode::Read)
        .expect("map chroma again");
    assert!(Arc::ptr_eq(&again, &chroma));
}

#[test]
fn write_mapping_writes_back_on_release() {
    let (_soft, tex) = software_device(SoftwareDriver::new(), DeviceConfig::default());
    let gpu = tex
        .allocate_frame(TextureFormat::Bgra, 4, 4)
        .expect("allocate");
    {
        let host = gpu.map(None, AccessMode::Write).expect("write map");
        let plane = host.tensor(0).expect("plane");
        for y in 0..4 {
            for x in 0..4 {
                let ptr = plane
                    .data_at::<u8>(&[y, x], OffsetAlign::Front)
                    .expect("texel");
                // SAFETY: one in-bounds texel of a live write mapping.
                unsafe { std::ptr::copy_nonoverlapping(pattern(x, y).as_ptr(), ptr.as_ptr(), 4) };
            }
        }
    }
    let host = gpu.map(None, AccessMode::Read).expect("read map");
    assert_eq!(texel(host.tensor(0).expect("plane"), 3, 2), pattern(3, 2));
}

#[test]
fn failed_upload_releases_the_new_texture() {
    let (soft, tex) = software_device(SoftwareDriver::new(), DeviceConfig::default());
    soft.fail_next("copy_resource", -9);
    let err = bgra_host_frame(4, 4)
        .map(Some(&tex.as_context()), AccessMode::Read)
        .expect_err("copy fails");
    assert!(matches!(err, MemError::DeviceOperationFailed { status: -9, .. }));
    // Only the recycled staging texture survives.
    assert_eq!(soft.live_textures(), 1);
    assert_eq!(tex.device().staging_pool().idle_len(), 1);
    assert_eq!(soft.mapped_planes(), 0);
}
