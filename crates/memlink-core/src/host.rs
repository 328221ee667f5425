//! Reference host backend.
//!
//! [`HostContext`] is a CPU context that can allocate host tensors, and
//! [`HostViewMapper`] maps any direct-pointer tensor into a host-addressable
//! domain without copying: the result shares the source storage and points
//! back at it through `parent()`.

use std::any::Any;
use std::sync::Arc;

use crate::context::{BaseContext, Context, ContextId, ContextRef};
use crate::error::{MemError, Result};
use crate::frame::{Frame, FrameRef};
use crate::mapper::{MapperEndpoints, MapperRef, MemoryMapper};
use crate::storage::{ExternalMemory, HostBuffer, StorageRef};
use crate::tensor::{Tensor, TensorRef};
use crate::tensor_info::{FrameInfo, TensorInfo};
use crate::types::{AccessMode, Handle, ImageFormat, MemoryType, Scalar};

/// Allocate a zeroed, context-free host tensor.
pub fn host_tensor(info: TensorInfo) -> Result<TensorRef> {
    let storage: StorageRef = Arc::new(HostBuffer::zeroed(info.checked_nbytes()?)?);
    Tensor::builder(info, storage).build()
}

/// Contiguous host tensor holding a copy of `values`.
pub fn host_tensor_from<T: Scalar>(shape: Vec<usize>, values: &[T]) -> Result<TensorRef> {
    let info = TensorInfo::new(shape, T::DTYPE);
    if info.size() != values.len() {
        return Err(MemError::invalid(format!(
            "{} values for shape {:?}",
            values.len(),
            info.shape()
        )));
    }
    // SAFETY: T is a plain scalar; viewing it as bytes is always valid.
    let bytes = unsafe {
        std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values))
    };
    let storage: StorageRef = Arc::new(HostBuffer::from_bytes(bytes)?);
    Tensor::builder(info, storage).build()
}

/// Context-free host image with one zeroed buffer per plane.
pub fn host_frame(format: ImageFormat, width: usize, height: usize) -> Result<FrameRef> {
    allocate_frame(None, format, width, height)
}

/// View over memory owned by the host pipeline framework.
///
/// No bytes are copied; `memory`'s release callback runs when the last view
/// (including every mapped descendant) is dropped.
pub fn wrap_external(
    info: TensorInfo,
    memory: ExternalMemory,
    memory_type: MemoryType,
) -> Result<TensorRef> {
    let handle = memory.native_handle();
    let storage: StorageRef = Arc::new(memory);
    let mut builder = Tensor::builder(info, storage).memory_type(memory_type);
    if let Some(handle) = handle {
        builder = builder.handle("native", handle);
    }
    builder.build()
}

fn allocate_frame(
    context: Option<ContextRef>,
    format: ImageFormat,
    width: usize,
    height: usize,
) -> Result<FrameRef> {
    let info = FrameInfo::image(format, width, height)?;
    let mut planes = Vec::with_capacity(info.planes.len());
    for plane in info.planes {
        let storage: StorageRef = Arc::new(HostBuffer::zeroed(plane.checked_nbytes()?)?);
        planes.push(
            Tensor::builder(plane, storage)
                .context(context.clone())
                .memory_type(MemoryType::Cpu)
                .build()?,
        );
    }
    Frame::builder(info.media_type, info.format)
        .memory_type(MemoryType::Cpu)
        .context(context)
        .tensors(planes)
        .build()
}

// ─── Context ────────────────────────────────────────────────────────────────

/// CPU context with zero-copy views to and from context-free host memory.
pub struct HostContext {
    base: BaseContext,
}

impl HostContext {
    pub fn new() -> Arc<Self> {
        let ctx = Arc::new(Self {
            base: BaseContext::new(MemoryType::Cpu),
        });
        let as_dyn: ContextRef = ctx.clone();
        ctx.base
            .attach_mapper(Arc::new(HostViewMapper::between(None, Some(&as_dyn))));
        ctx.base
            .attach_mapper(Arc::new(HostViewMapper::between(Some(&as_dyn), None)));
        ctx
    }

    pub fn as_context(self: &Arc<Self>) -> ContextRef {
        self.clone()
    }

    pub fn allocate(self: &Arc<Self>, info: TensorInfo) -> Result<TensorRef> {
        let storage: StorageRef = Arc::new(HostBuffer::zeroed(info.checked_nbytes()?)?);
        Tensor::builder(info, storage)
            .context(Some(self.as_context()))
            .build()
    }

    pub fn allocate_frame(
        self: &Arc<Self>,
        format: ImageFormat,
        width: usize,
        height: usize,
    ) -> Result<FrameRef> {
        allocate_frame(Some(self.as_context()), format, width, height)
    }

    pub fn mapper_count(&self) -> usize {
        self.base.mappers().len()
    }
}

impl Context for HostContext {
    fn memory_type(&self) -> MemoryType {
        self.base.memory_type()
    }

    fn handle(&self, key: &str) -> Option<Handle> {
        self.base.handle(key)
    }

    fn parent(&self) -> Option<ContextRef> {
        self.base.parent()
    }

    fn get_mapper(
        &self,
        input: Option<ContextId>,
        output: Option<ContextId>,
    ) -> Option<MapperRef> {
        self.base.get_mapper(input, output)
    }

    fn attach_mapper(&self, mapper: MapperRef) {
        self.base.attach_mapper(mapper);
    }

    fn remove_mapper(&self, mapper: &MapperRef) {
        self.base.remove_mapper(mapper);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Mapper ─────────────────────────────────────────────────────────────────

/// Zero-copy view of direct-pointer memory in a host-addressable domain.
pub struct HostViewMapper {
    endpoints: MapperEndpoints,
}

impl HostViewMapper {
    /// Mapping into a non-addressable output fails `MappingUnavailable`.
    pub fn between(input: Option<&ContextRef>, output: Option<&ContextRef>) -> Self {
        Self {
            endpoints: MapperEndpoints::new(input, output),
        }
    }
}

impl MemoryMapper for HostViewMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, _mode: AccessMode) -> Result<TensorRef> {
        let target = self.endpoints.output_memory_type();
        if !target.is_host_addressable() {
            return Err(MemError::MappingUnavailable {
                from: src.memory_type(),
                to: target,
            });
        }
        if src.data().is_none() {
            return Err(MemError::MappingUnavailable {
                from: src.memory_type(),
                to: target,
            });
        }
        let output = self.endpoints.live_output()?;
        Tensor::builder(src.info().clone(), Arc::clone(src.storage()))
            .memory_type(target)
            .context(output)
            .handles(src.handles().clone())
            .parent(Arc::clone(src))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn host_context_registers_both_directions() {
        let host = HostContext::new();
        let id = ContextId::of(&host);
        assert!(host.get_mapper(None, Some(id)).is_some());
        assert!(host.get_mapper(Some(id), None).is_some());
        assert_eq!(host.mapper_count(), 2);
    }

    #[test]
    fn view_shares_storage() {
        let host = HostContext::new();
        let src = host_tensor_from(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0]).expect("src");
        let view = src
            .map(Some(&host.as_context()), AccessMode::Read)
            .expect("map into host context");
        assert_eq!(view.data(), src.data());
        assert!(Arc::ptr_eq(view.storage(), src.storage()));
        assert_eq!(view.memory_type(), MemoryType::Cpu);
    }

    #[test]
    fn wrap_external_exposes_native_handle() {
        let mut backing = vec![0u8; 16];
        // SAFETY: backing outlives the tensor in this test.
        let memory =
            unsafe { ExternalMemory::new(backing.as_mut_ptr(), backing.len(), || {}) }.expect("mem");
        let tensor = wrap_external(
            TensorInfo::new(vec![4, 4], DataType::UInt8),
            memory,
            MemoryType::HostPipeline,
        )
        .expect("wrap");
        assert_eq!(tensor.memory_type(), MemoryType::HostPipeline);
        assert_eq!(tensor.handle_or("native", -1), -1);
        assert_eq!(tensor.data().map(|p| p.as_ptr()), Some(backing.as_mut_ptr()));
    }

    #[test]
    fn value_count_must_match_shape() {
        assert!(host_tensor_from(vec![2, 2], &[1u8, 2, 3]).is_err());
    }

    #[test]
    fn oversized_allocation_is_invalid_not_a_panic() {
        let err = host_tensor(TensorInfo::new(vec![usize::MAX / 2, 3], DataType::Float32))
            .expect_err("overflow");
        assert!(matches!(err, MemError::InvalidArgument(_)));
    }
}
