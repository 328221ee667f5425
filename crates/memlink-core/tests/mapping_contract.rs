use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use memlink_core::storage::{HostBuffer, StorageRef};
use memlink_core::{
    AccessMode, BaseContext, ContextId, ContextRef, DataType, MapperCache, MapperEndpoints,
    MapperRef, MemError, MemoryMapper, MemoryType, Result, Tensor, TensorInfo, TensorRef,
    create_mapper,
};

/// Copies the source bytes into a fresh host allocation tagged with the
/// output context.
struct CopyMapper {
    endpoints: MapperEndpoints,
    fail: bool,
    calls: AtomicUsize,
}

impl MemoryMapper for CopyMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, _mode: AccessMode) -> Result<TensorRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MemError::DeviceOperationFailed {
                call: "copy".into(),
                status: -5,
            });
        }
        let ptr = src.data().ok_or(MemError::MappingUnavailable {
            from: src.memory_type(),
            to: self.endpoints.output_memory_type(),
        })?;
        // SAFETY: test tensors are contiguous host buffers of nbytes().
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), src.info().nbytes()) };
        let storage: StorageRef = Arc::new(HostBuffer::from_bytes(bytes)?);
        Tensor::builder(src.info().clone(), storage)
            .memory_type(self.endpoints.output_memory_type())
            .context(self.endpoints.live_output()?)
            .parent(Arc::clone(src))
            .build()
    }
}

fn copy_mapper(input: &ContextRef, output: &ContextRef, fail: bool) -> Arc<CopyMapper> {
    Arc::new(CopyMapper {
        endpoints: MapperEndpoints::new(Some(input), Some(output)),
        fail,
        calls: AtomicUsize::new(0),
    })
}

fn device(memory_type: MemoryType) -> (Arc<BaseContext>, ContextRef) {
    let ctx = Arc::new(BaseContext::new(memory_type));
    let as_ref: ContextRef = ctx.clone();
    (ctx, as_ref)
}

fn bound_tensor(ctx: &ContextRef, values: &[u8]) -> TensorRef {
    let storage: StorageRef = Arc::new(HostBuffer::from_bytes(values).expect("alloc"));
    Tensor::builder(TensorInfo::new(vec![values.len()], DataType::UInt8), storage)
        .context(Some(Arc::clone(ctx)))
        .build()
        .expect("tensor")
}

fn bytes_of(t: &TensorRef) -> Vec<u8> {
    // SAFETY: contiguous host-backed tensor, read only.
    unsafe { t.as_slice::<u8>() }.expect("host slice").to_vec()
}

#[test]
fn context_free_tensor_maps_to_itself() {
    let t = memlink_core::host::host_tensor(TensorInfo::new(vec![1, 3, 224, 224], DataType::Float32))
        .expect("host tensor");
    let mapped = t.map(None, AccessMode::Read).expect("identity");
    assert!(Arc::ptr_eq(&t, &mapped));
    assert_eq!(mapped.info().stride(), &[602112, 200704, 896, 4]);
}

#[test]
fn same_context_maps_to_itself() {
    let (_a, a_ref) = device(MemoryType::Usm);
    let t = bound_tensor(&a_ref, &[1, 2, 3]);
    let mapped = t.map(Some(&a_ref), AccessMode::ReadWrite).expect("identity");
    assert!(Arc::ptr_eq(&t, &mapped));
}

#[test]
fn single_hop_links_parent_and_output_context() {
    let (_a, a_ref) = device(MemoryType::Usm);
    let (_b, b_ref) = device(MemoryType::Dma);
    b_ref.attach_mapper(copy_mapper(&a_ref, &b_ref, false));

    let src = bound_tensor(&a_ref, &[7, 8, 9, 10]);
    let mapped = src.map(Some(&b_ref), AccessMode::Read).expect("mapped");

    assert_eq!(mapped.memory_type(), MemoryType::Dma);
    assert_eq!(ContextId::of_opt(mapped.context()), Some(ContextId::of(&b_ref)));
    assert!(Arc::ptr_eq(mapped.parent().expect("parent"), &src));
    assert_eq!(bytes_of(&mapped), vec![7, 8, 9, 10]);
}

#[test]
fn unregistered_pair_is_mapping_unavailable() {
    let (_a, a_ref) = device(MemoryType::Usm);
    let (_b, b_ref) = device(MemoryType::OpenCl);
    let src = bound_tensor(&a_ref, &[0; 4]);
    let err = src.map(Some(&b_ref), AccessMode::Read).expect_err("no mapper");
    match err {
        MemError::MappingUnavailable { from, to } => {
            assert_eq!(from, MemoryType::Usm);
            assert_eq!(to, MemoryType::OpenCl);
        }
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn chain_resolves_through_intermediate_domain() {
    let (_a, a_ref) = device(MemoryType::GpuSurface);
    let (_dma, dma_ref) = device(MemoryType::Dma);
    let (_b, b_ref) = device(MemoryType::OpenCl);
    a_ref.attach_mapper(copy_mapper(&a_ref, &dma_ref, false));
    b_ref.attach_mapper(copy_mapper(&dma_ref, &b_ref, false));

    let chain = create_mapper(&[a_ref.clone(), dma_ref.clone(), b_ref.clone()], false)
        .expect("chain");
    assert_eq!(chain.endpoints().input_id(), Some(ContextId::of(&a_ref)));
    assert_eq!(chain.endpoints().output_id(), Some(ContextId::of(&b_ref)));

    // Registered on both ends: a plain top-level map now resolves A -> B.
    let src = bound_tensor(&a_ref, &[1, 2, 3, 4]);
    let mapped = src.map(Some(&b_ref), AccessMode::Read).expect("chained map");
    assert_eq!(mapped.memory_type(), MemoryType::OpenCl);
    let hop = mapped.parent().expect("intermediate");
    assert_eq!(hop.memory_type(), MemoryType::Dma);
    assert!(Arc::ptr_eq(&mapped.root(), &src));
    assert_eq!(bytes_of(&mapped), vec![1, 2, 3, 4]);
}

#[test]
fn failing_hop_releases_intermediates() {
    let (_a, a_ref) = device(MemoryType::GpuSurface);
    let (_dma, dma_ref) = device(MemoryType::Dma);
    let (_b, b_ref) = device(MemoryType::OpenCl);
    let first = copy_mapper(&a_ref, &dma_ref, false);
    a_ref.attach_mapper(first.clone());
    b_ref.attach_mapper(copy_mapper(&dma_ref, &b_ref, true));

    let chain = create_mapper(&[a_ref.clone(), dma_ref, b_ref], false).expect("chain");
    let src = bound_tensor(&a_ref, &[5; 8]);
    let err = chain.map_tensor(&src, AccessMode::Read).expect_err("second hop fails");
    assert!(matches!(err, MemError::DeviceOperationFailed { status: -5, .. }));
    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    // The DMA intermediate held the only other reference to `src`.
    assert_eq!(Arc::strong_count(&src), 1);
}

#[test]
fn dropping_a_context_cleans_partner_registry() {
    let (a, a_ref) = device(MemoryType::Usm);
    let (b, b_ref) = device(MemoryType::Dma);
    let mapper: MapperRef = copy_mapper(&a_ref, &b_ref, false);
    a.attach_mapper(mapper.clone());
    b.attach_mapper(mapper.clone());
    assert_eq!(b.mappers().len(), 1);

    drop(a_ref);
    drop(a);
    assert!(b.mappers().is_empty());
    drop(b_ref);
}

#[test]
fn cached_mapper_keeps_views_of_one_storage_apart() {
    let (_a, a_ref) = device(MemoryType::Usm);
    let (_b, b_ref) = device(MemoryType::Dma);
    let inner = copy_mapper(&a_ref, &b_ref, false);
    b_ref.attach_mapper(inner.clone());
    let mapper = create_mapper(&[a_ref.clone(), b_ref.clone()], true).expect("cached");

    let storage: StorageRef = Arc::new(HostBuffer::from_bytes(&[7u8; 24]).expect("alloc"));
    let plane = |index: isize, info: TensorInfo| {
        Tensor::builder(info, Arc::clone(&storage))
            .context(Some(Arc::clone(&a_ref)))
            .handle("plane", index)
            .build()
            .expect("plane")
    };
    let luma = plane(0, TensorInfo::new(vec![4, 4], DataType::UInt8));
    let chroma = plane(1, TensorInfo::new(vec![2, 2, 2], DataType::UInt8));

    let mapped_luma = mapper.map_tensor(&luma, AccessMode::Read).expect("luma");
    let mapped_chroma = mapper.map_tensor(&chroma, AccessMode::Read).expect("chroma");
    assert!(!Arc::ptr_eq(&mapped_luma, &mapped_chroma));
    assert_eq!(mapped_chroma.info().shape(), &[2, 2, 2]);
    assert!(Arc::ptr_eq(mapped_chroma.parent().expect("parent"), &chroma));
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

    // A fresh view with the same layout over the same storage is a hit.
    let again = plane(1, TensorInfo::new(vec![2, 2, 2], DataType::UInt8));
    let hit = mapper.map_tensor(&again, AccessMode::Read).expect("hit");
    assert!(Arc::ptr_eq(&hit, &mapped_chroma));
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn cached_mapper_reuses_live_results() {
    let (_a, a_ref) = device(MemoryType::Usm);
    let (_b, b_ref) = device(MemoryType::Dma);
    let inner = copy_mapper(&a_ref, &b_ref, false);
    b_ref.attach_mapper(inner.clone());

    let mapper = create_mapper(&[a_ref.clone(), b_ref.clone()], true).expect("cached");
    let src = bound_tensor(&a_ref, &[3; 16]);

    let first = mapper.map_tensor(&src, AccessMode::Read).expect("first");
    let second = mapper.map_tensor(&src, AccessMode::Read).expect("second");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

    let write = mapper.map_tensor(&src, AccessMode::Write).expect("other mode");
    assert!(!Arc::ptr_eq(&first, &write));
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

    drop((first, second, write));
    let _fresh = mapper.map_tensor(&src, AccessMode::Read).expect("fresh");
    assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

    let cache = MapperCache::new(inner);
    assert!(cache.is_empty());
}
