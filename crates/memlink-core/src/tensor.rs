//! Typed views over memory.
//!
//! A [`Tensor`] pairs a [`TensorInfo`] with the [`Storage`] that owns the
//! bytes, the context the memory belongs to, named native handles and a
//! provenance link.  Mapped tensors never own their source resource; they
//! hold the source through `parent()` so the chain keeps the original alive.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::context::{ContextRef, memory_type_of};
use crate::error::{MemError, Result};
use crate::mapping;
use crate::storage::{Storage, StorageRef, StorageView};
use crate::tensor_info::TensorInfo;
use crate::types::{AccessMode, Handle, MemoryType, Scalar};

pub type TensorRef = Arc<Tensor>;

/// Which end of the shape a partial offset vector is aligned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetAlign {
    /// `offset[i]` indexes dimension `i`.
    Front,
    /// `offset[n-1-i]` indexes dimension `rank-1-i`.
    Back,
}

pub struct Tensor {
    info: TensorInfo,
    memory_type: MemoryType,
    context: Option<ContextRef>,
    storage: StorageRef,
    handles: HashMap<String, Handle>,
    parent: Option<TensorRef>,
}

impl Tensor {
    pub fn builder(info: TensorInfo, storage: StorageRef) -> TensorBuilder {
        TensorBuilder {
            info,
            storage,
            memory_type: None,
            context: None,
            handles: HashMap::new(),
            parent: None,
        }
    }

    #[inline]
    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    #[inline]
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    #[inline]
    pub fn context(&self) -> Option<&ContextRef> {
        self.context.as_ref()
    }

    #[inline]
    pub fn storage(&self) -> &StorageRef {
        &self.storage
    }

    /// Recover a backend-specific storage type.
    pub fn storage_as<S: Storage>(&self) -> Option<&S> {
        self.storage.as_any().downcast_ref::<S>()
    }

    /// Host address of element zero; `None` for handle-only memory.
    #[inline]
    pub fn data(&self) -> Option<NonNull<u8>> {
        self.storage.data()
    }

    /// Mandatory handle lookup.
    pub fn handle(&self, key: &str) -> Result<Handle> {
        self.handles.get(key).copied().ok_or_else(|| {
            MemError::NotFound(format!(
                "handle '{key}' on {} tensor",
                self.memory_type
            ))
        })
    }

    /// Handle lookup with a fallback; never fails.
    pub fn handle_or(&self, key: &str, default: Handle) -> Handle {
        self.handles.get(key).copied().unwrap_or(default)
    }

    pub fn handles(&self) -> &HashMap<String, Handle> {
        &self.handles
    }

    #[inline]
    pub fn parent(&self) -> Option<&TensorRef> {
        self.parent.as_ref()
    }

    /// Original tensor at the end of the provenance chain.
    pub fn root(self: &Arc<Self>) -> TensorRef {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// Map into `output` (`None` for plain host memory).
    pub fn map(self: &Arc<Self>, output: Option<&ContextRef>, mode: AccessMode) -> Result<TensorRef> {
        mapping::map_tensor(self, output, mode)
    }

    // ── Typed access ───────────────────────────────────────────────────

    fn host_base(&self) -> Result<NonNull<u8>> {
        self.data().ok_or_else(|| {
            MemError::invalid(format!(
                "{} tensor has no host address; use handle()",
                self.memory_type
            ))
        })
    }

    fn check_dtype<T: Scalar>(&self) -> Result<()> {
        if T::DTYPE != self.info.dtype() {
            return Err(MemError::TypeMismatch {
                requested: T::DTYPE,
                actual: self.info.dtype(),
            });
        }
        Ok(())
    }

    /// Typed pointer to element zero.
    pub fn data_as<T: Scalar>(&self) -> Result<NonNull<T>> {
        self.data_at::<T>(&[], OffsetAlign::Front)
    }

    /// Typed pointer to the element at a (possibly partial) index.
    pub fn data_at<T: Scalar>(&self, offset: &[usize], align: OffsetAlign) -> Result<NonNull<T>> {
        self.check_dtype::<T>()?;
        let base = self.host_base()?;
        let bytes = self.byte_offset(offset, align)?;
        // SAFETY: byte_offset only returns in-bounds offsets, and the builder
        // checked that the storage covers the tensor's span.
        let ptr = unsafe { base.as_ptr().add(bytes) };
        if (ptr as usize) % std::mem::align_of::<T>() != 0 {
            return Err(MemError::invalid(format!(
                "element at byte offset {bytes} is not aligned for {}",
                T::DTYPE
            )));
        }
        // SAFETY: derived from a non-null base.
        Ok(unsafe { NonNull::new_unchecked(ptr.cast::<T>()) })
    }

    /// Byte offset of a partial index from the stride vector.
    pub fn byte_offset(&self, offset: &[usize], align: OffsetAlign) -> Result<usize> {
        let shape = self.info.shape();
        let stride = self.info.stride();
        let rank = shape.len();
        if offset.len() > rank {
            return Err(MemError::invalid(format!(
                "offset {offset:?} has more dimensions than shape {shape:?}"
            )));
        }
        let n = offset.len();
        let mut total = 0usize;
        for i in 0..n {
            let (idx, dim) = match align {
                OffsetAlign::Front => (offset[i], i),
                OffsetAlign::Back => (offset[n - 1 - i], rank - 1 - i),
            };
            if idx >= shape[dim] {
                return Err(MemError::invalid(format!(
                    "index {idx} out of bounds for dimension {dim} of {shape:?}"
                )));
            }
            total += idx * stride[dim];
        }
        Ok(total)
    }

    /// Contiguous element slice.
    ///
    /// # Safety
    ///
    /// No other view may write these bytes while the slice is alive.
    pub unsafe fn as_slice<T: Scalar>(&self) -> Result<&[T]> {
        let ptr = self.contiguous_ptr::<T>()?;
        // SAFETY: contiguous_ptr validated dtype, alignment and extent; the
        // caller guarantees no concurrent writers.
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.info.size()) })
    }

    /// Mutable contiguous element slice.
    ///
    /// # Safety
    ///
    /// No other view may read or write these bytes while the slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<T: Scalar>(&self) -> Result<&mut [T]> {
        let ptr = self.contiguous_ptr::<T>()?;
        // SAFETY: as above; the caller guarantees exclusive access.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.info.size()) })
    }

    fn contiguous_ptr<T: Scalar>(&self) -> Result<NonNull<T>> {
        if !self.info.is_contiguous() {
            return Err(MemError::invalid(format!(
                "tensor with stride {:?} is not contiguous",
                self.info.stride()
            )));
        }
        self.data_as::<T>()
    }

    // ── Views ──────────────────────────────────────────────────────────

    /// Zero-copy sub-region; `ranges` is front-aligned, missing trailing
    /// dimensions are taken whole.
    pub fn slice(self: &Arc<Self>, ranges: &[Range<usize>]) -> Result<TensorRef> {
        self.host_base()?;
        let shape = self.info.shape();
        let stride = self.info.stride();
        if ranges.len() > shape.len() {
            return Err(MemError::invalid(format!(
                "{} slice ranges for rank-{} tensor",
                ranges.len(),
                shape.len()
            )));
        }
        let mut new_shape = shape.to_vec();
        let mut offset = 0usize;
        for (dim, range) in ranges.iter().enumerate() {
            if range.start > range.end || range.end > shape[dim] {
                return Err(MemError::invalid(format!(
                    "slice {range:?} out of bounds for dimension {dim} of {shape:?}"
                )));
            }
            new_shape[dim] = range.len();
            offset = range
                .start
                .checked_mul(stride[dim])
                .and_then(|step| offset.checked_add(step))
                .ok_or_else(|| MemError::invalid(format!("slice {range:?} offset overflows")))?;
        }
        let info = TensorInfo::with_stride(new_shape, self.info.dtype(), stride.to_vec())?;
        let span = info.span()?;
        let view = StorageView::new(Arc::clone(&self.storage), offset, span)?;
        Tensor::builder(info, Arc::new(view))
            .memory_type(self.memory_type)
            .context(self.context.clone())
            .parent(Arc::clone(self))
            .build()
    }

    /// Release callback for handing this view to a host pipeline buffer;
    /// the view stays alive until the callback runs.
    pub fn into_release_callback(self: Arc<Self>) -> Box<dyn FnOnce() + Send> {
        Box::new(move || drop(self))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("info", &self.info)
            .field("memory_type", &self.memory_type)
            .field("has_context", &self.context.is_some())
            .field("storage", &self.storage)
            .field("handles", &self.handles)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

pub struct TensorBuilder {
    info: TensorInfo,
    storage: StorageRef,
    memory_type: Option<MemoryType>,
    context: Option<ContextRef>,
    handles: HashMap<String, Handle>,
    parent: Option<TensorRef>,
}

impl TensorBuilder {
    /// Defaults to the context's memory type (CPU without a context).
    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn context(mut self, context: Option<ContextRef>) -> Self {
        self.context = context;
        self
    }

    pub fn handle(mut self, key: impl Into<String>, handle: Handle) -> Self {
        self.handles.insert(key.into(), handle);
        self
    }

    pub fn handles(mut self, handles: HashMap<String, Handle>) -> Self {
        self.handles.extend(handles);
        self
    }

    pub fn parent(mut self, parent: TensorRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Result<TensorRef> {
        let span = self.info.span()?;
        if self.storage.data().is_some() && self.storage.byte_len() < span {
            return Err(MemError::invalid(format!(
                "storage of {} bytes cannot hold tensor spanning {span} bytes",
                self.storage.byte_len()
            )));
        }
        let memory_type = self
            .memory_type
            .unwrap_or_else(|| memory_type_of(self.context.as_ref()));
        Ok(Arc::new(Tensor {
            info: self.info,
            memory_type,
            context: self.context,
            storage: self.storage,
            handles: self.handles,
            parent: self.parent,
        }))
    }
}
