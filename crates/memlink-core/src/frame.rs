//! Frames: ordered tensor planes sharing one format and context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::{ContextId, ContextRef, memory_type_of};
use crate::error::{MemError, Result};
use crate::mapping;
use crate::tensor::TensorRef;
use crate::tensor_info::FrameInfo;
use crate::types::{AccessMode, Fourcc, Handle, MediaType, MemoryType};

pub type FrameRef = Arc<Frame>;

pub struct Frame {
    media_type: MediaType,
    format: Fourcc,
    memory_type: MemoryType,
    context: Option<ContextRef>,
    tensors: Vec<TensorRef>,
    handles: HashMap<String, Handle>,
    parent: Option<FrameRef>,
}

impl Frame {
    pub fn builder(media_type: MediaType, format: Fourcc) -> FrameBuilder {
        FrameBuilder {
            media_type,
            format,
            memory_type: None,
            context: None,
            tensors: Vec::new(),
            handles: HashMap::new(),
            parent: None,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn format(&self) -> Fourcc {
        self.format
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn context(&self) -> Option<&ContextRef> {
        self.context.as_ref()
    }

    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    pub fn tensor(&self, index: usize) -> Option<&TensorRef> {
        self.tensors.get(index)
    }

    pub fn tensors(&self) -> &[TensorRef] {
        &self.tensors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorRef> {
        self.tensors.iter()
    }

    pub fn handle(&self, key: &str) -> Result<Handle> {
        self.handles
            .get(key)
            .copied()
            .ok_or_else(|| MemError::NotFound(format!("handle '{key}' on {} frame", self.memory_type)))
    }

    pub fn handle_or(&self, key: &str, default: Handle) -> Handle {
        self.handles.get(key).copied().unwrap_or(default)
    }

    pub fn parent(&self) -> Option<&FrameRef> {
        self.parent.as_ref()
    }

    pub fn root(self: &Arc<Self>) -> FrameRef {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// Descriptor snapshot of all planes.
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            media_type: self.media_type,
            format: self.format,
            memory_type: self.memory_type,
            planes: self.tensors.iter().map(|t| t.info().clone()).collect(),
        }
    }

    pub fn map(self: &Arc<Self>, output: Option<&ContextRef>, mode: AccessMode) -> Result<FrameRef> {
        mapping::map_frame(self, output, mode)
    }
}

impl<'a> IntoIterator for &'a Frame {
    type Item = &'a TensorRef;
    type IntoIter = std::slice::Iter<'a, TensorRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("media_type", &self.media_type)
            .field("format", &format_args!("{}", self.format))
            .field("memory_type", &self.memory_type)
            .field("planes", &self.tensors.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

pub struct FrameBuilder {
    media_type: MediaType,
    format: Fourcc,
    memory_type: Option<MemoryType>,
    context: Option<ContextRef>,
    tensors: Vec<TensorRef>,
    handles: HashMap<String, Handle>,
    parent: Option<FrameRef>,
}

impl FrameBuilder {
    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    /// Frame context; defaults to the first plane's context.
    pub fn context(mut self, context: Option<ContextRef>) -> Self {
        self.context = context;
        self
    }

    pub fn tensor(mut self, tensor: TensorRef) -> Self {
        self.tensors.push(tensor);
        self
    }

    pub fn tensors(mut self, tensors: impl IntoIterator<Item = TensorRef>) -> Self {
        self.tensors.extend(tensors);
        self
    }

    pub fn handle(mut self, key: impl Into<String>, handle: Handle) -> Self {
        self.handles.insert(key.into(), handle);
        self
    }

    pub fn parent(mut self, parent: FrameRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Fails `InvalidArgument` when planes disagree on memory type or
    /// context.
    pub fn build(self) -> Result<FrameRef> {
        let context = match self.context {
            Some(ctx) => Some(ctx),
            None => self.tensors.first().and_then(|t| t.context().cloned()),
        };
        let memory_type = match (self.memory_type, self.tensors.first()) {
            (Some(mt), _) => mt,
            (None, Some(first)) => first.memory_type(),
            (None, None) if context.is_some() => memory_type_of(context.as_ref()),
            (None, None) => MemoryType::Any,
        };
        let ctx_id = ContextId::of_opt(context.as_ref());
        for (i, plane) in self.tensors.iter().enumerate() {
            if plane.memory_type() != memory_type {
                return Err(MemError::invalid(format!(
                    "plane {i} is {} memory, frame is {memory_type}",
                    plane.memory_type()
                )));
            }
            if ContextId::of_opt(plane.context()) != ctx_id {
                return Err(MemError::invalid(format!(
                    "plane {i} is bound to a different context than the frame"
                )));
            }
        }
        Ok(Arc::new(Frame {
            media_type: self.media_type,
            format: self.format,
            memory_type,
            context,
            tensors: self.tensors,
            handles: self.handles,
            parent: self.parent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostContext, host_frame, host_tensor};
    use crate::tensor_info::TensorInfo;
    use crate::types::{DataType, ImageFormat};

    #[test]
    fn planes_iterate_in_order() {
        let frame = host_frame(ImageFormat::I420, 8, 6).expect("frame");
        assert_eq!(frame.num_tensors(), 3);
        let shapes: Vec<_> = frame.iter().map(|t| t.info().shape().to_vec()).collect();
        assert_eq!(shapes, vec![vec![6, 8], vec![3, 4], vec![3, 4]]);
        assert_eq!(frame.info().format, ImageFormat::I420.fourcc());
        assert_eq!(frame.memory_type(), MemoryType::Cpu);
        assert!(frame.context().is_none());
    }

    #[test]
    fn mixed_contexts_are_rejected() {
        let host = HostContext::new();
        let bound = host
            .allocate(TensorInfo::new(vec![4], DataType::UInt8))
            .expect("bound");
        let free = host_tensor(TensorInfo::new(vec![4], DataType::UInt8)).expect("free");
        let err = Frame::builder(MediaType::Tensors, Fourcc(0))
            .tensor(bound)
            .tensor(free)
            .build()
            .expect_err("mixed contexts");
        assert!(matches!(err, MemError::InvalidArgument(_)));
    }

    #[test]
    fn empty_frame_is_any_memory() {
        let frame = Frame::builder(MediaType::Tensors, Fourcc(0))
            .build()
            .expect("empty");
        assert_eq!(frame.memory_type(), MemoryType::Any);
        assert_eq!(frame.num_tensors(), 0);
        assert_eq!(frame.handle_or("x", 9), 9);
    }
}
