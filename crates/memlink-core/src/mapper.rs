//! The mapper contract.
//!
//! A [`MemoryMapper`] converts a tensor or frame bound to its input context
//! into an equivalent view bound to its output context.  Results must point
//! back at their source through `parent()` so the source resource outlives
//! every view derived from it.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::context::{Context, ContextId, ContextRef, MapperKey, memory_type_of};
use crate::error::{MemError, Result};
use crate::frame::{Frame, FrameRef};
use crate::tensor::TensorRef;
use crate::types::{AccessMode, MemoryType};

pub type MapperRef = Arc<dyn MemoryMapper>;

/// Identity of a mapper: its `(input, output)` context pair.
///
/// Contexts are held weakly; their ids and memory types are captured at
/// construction so deregistration and error reporting keep working after an
/// endpoint has gone.
pub struct MapperEndpoints {
    input: Option<Weak<dyn Context>>,
    output: Option<Weak<dyn Context>>,
    input_id: Option<ContextId>,
    output_id: Option<ContextId>,
    input_type: MemoryType,
    output_type: MemoryType,
}

impl MapperEndpoints {
    pub fn new(input: Option<&ContextRef>, output: Option<&ContextRef>) -> Self {
        Self {
            input: input.map(Arc::downgrade),
            output: output.map(Arc::downgrade),
            input_id: ContextId::of_opt(input),
            output_id: ContextId::of_opt(output),
            input_type: memory_type_of(input),
            output_type: memory_type_of(output),
        }
    }

    pub fn input(&self) -> Option<ContextRef> {
        self.input.as_ref().and_then(Weak::upgrade)
    }

    pub fn output(&self) -> Option<ContextRef> {
        self.output.as_ref().and_then(Weak::upgrade)
    }

    pub fn input_id(&self) -> Option<ContextId> {
        self.input_id
    }

    pub fn output_id(&self) -> Option<ContextId> {
        self.output_id
    }

    pub fn key(&self) -> MapperKey {
        (self.input_id, self.output_id)
    }

    pub fn input_memory_type(&self) -> MemoryType {
        self.input_type
    }

    pub fn output_memory_type(&self) -> MemoryType {
        self.output_type
    }

    /// Output context for a result about to be produced.
    ///
    /// `Ok(None)` for the context-free host domain; an error if the output
    /// context existed but has been dropped.
    pub fn live_output(&self) -> Result<Option<ContextRef>> {
        match &self.output {
            None => Ok(None),
            Some(weak) => weak.upgrade().map(Some).ok_or_else(|| {
                MemError::NotFound(format!("{} output context was dropped", self.output_type))
            }),
        }
    }
}

impl fmt::Debug for MapperEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperEndpoints")
            .field("input", &self.input_id)
            .field("input_type", &self.input_type)
            .field("output", &self.output_id)
            .field("output_type", &self.output_type)
            .finish()
    }
}

/// Converts views from one context to another.
pub trait MemoryMapper: Send + Sync {
    fn endpoints(&self) -> &MapperEndpoints;

    fn input_context(&self) -> Option<ContextRef> {
        self.endpoints().input()
    }

    fn output_context(&self) -> Option<ContextRef> {
        self.endpoints().output()
    }

    /// Map one tensor.  `result.context()` is the output context and
    /// `result.parent()` is `src` (or, for composites, a view rooted at it).
    fn map_tensor(&self, src: &TensorRef, mode: AccessMode) -> Result<TensorRef>;

    /// Map a frame.  The default maps plane by plane; backends that need a
    /// single device transaction per frame override it.
    fn map_frame(&self, src: &FrameRef, mode: AccessMode) -> Result<FrameRef> {
        map_frame_planes(self, src, mode)
    }
}

/// Pointer identity of two mapper handles, ignoring vtables.
pub fn same_mapper(a: &MapperRef, b: &MapperRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Map every plane with `map_tensor` and assemble the output frame.
pub fn map_frame_planes<M: MemoryMapper + ?Sized>(
    mapper: &M,
    src: &FrameRef,
    mode: AccessMode,
) -> Result<FrameRef> {
    let output = mapper.endpoints().live_output()?;
    let planes = src
        .tensors()
        .iter()
        .map(|plane| mapper.map_tensor(plane, mode))
        .collect::<Result<Vec<_>>>()?;
    Frame::builder(src.media_type(), src.format())
        .memory_type(mapper.endpoints().output_memory_type())
        .context(output)
        .tensors(planes)
        .parent(Arc::clone(src))
        .build()
}
