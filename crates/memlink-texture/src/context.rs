//! GPU-surface and DMA contexts.

use std::any::Any;
use std::sync::{Arc, Weak};

use memlink_core::context::same_context;
use memlink_core::geometry::{Rect, Size, TransformRecord, plan_geometry};
use memlink_core::{
    BaseContext, Context, ContextId, ContextRef, FrameRef, Handle, MapperRef, MemError,
    MemoryType, PreprocessConfig, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::TextureDevice;
use crate::driver::{BltParams, ProcessorKey, TextureDesc, TextureFormat, TextureUsage};
use crate::mappers::{
    DmaToTextureMapper, HostToTextureMapper, TextureResource, TextureToDmaMapper,
    TextureToHostMapper, frame_resource, texture_frame,
};

/// Output geometry of [`TextureContext::convert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertTarget {
    pub width: usize,
    pub height: usize,
    pub format: TextureFormat,
}

impl ConvertTarget {
    pub const fn new(width: usize, height: usize, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }
}

// ─── Texture context ────────────────────────────────────────────────────────

/// GPU-surface memory of one [`TextureDevice`].
///
/// Registers `texture -> host` and `host -> texture` mappers for the
/// context-free host domain at construction.
pub struct TextureContext {
    base: BaseContext,
    device: Arc<TextureDevice>,
    dma: Mutex<Weak<DmaContext>>,
}

impl TextureContext {
    pub fn new(device: Arc<TextureDevice>) -> Arc<Self> {
        let handle = Arc::as_ptr(&device) as Handle;
        let ctx = Arc::new(Self {
            base: BaseContext::new(MemoryType::GpuSurface).with_handle("device", handle),
            device,
            dma: Mutex::new(Weak::new()),
        });
        let as_dyn = ctx.as_context();
        ctx.base.attach_mapper(Arc::new(TextureToHostMapper::new(
            &ctx.device,
            Some(&as_dyn),
            None,
        )));
        ctx.base.attach_mapper(Arc::new(HostToTextureMapper::new(
            &ctx.device,
            None,
            Some(&as_dyn),
        )));
        info!(driver = ctx.device.driver().name(), "Texture context created");
        ctx
    }

    pub fn device(&self) -> &Arc<TextureDevice> {
        &self.device
    }

    pub fn as_context(self: &Arc<Self>) -> ContextRef {
        self.clone()
    }

    /// Register readback and upload mappers against a host context.
    pub fn attach_host(self: &Arc<Self>, host: &ContextRef) {
        let me = self.as_context();
        let down: MapperRef = Arc::new(TextureToHostMapper::new(&self.device, Some(&me), Some(host)));
        let up: MapperRef = Arc::new(HostToTextureMapper::new(&self.device, Some(host), Some(&me)));
        for mapper in [down, up] {
            self.base.attach_mapper(Arc::clone(&mapper));
            host.attach_mapper(mapper);
        }
    }

    /// Allocate an uninitialized, exportable texture frame.
    pub fn allocate_frame(
        self: &Arc<Self>,
        format: TextureFormat,
        width: usize,
        height: usize,
    ) -> Result<FrameRef> {
        let desc = TextureDesc::new(width, height, format).with_usage(TextureUsage::Shared);
        let id = {
            let guard = self.device.lock();
            self.device.create_texture(&guard, &desc)?
        };
        let resource = TextureResource::new(Arc::clone(&self.device), id, desc);
        texture_frame(&self.as_context(), resource, None)
    }

    /// DMA domain of this device, created on first use.
    ///
    /// Holds the `texture -> DMA` export mapper and the `DMA -> texture`
    /// import back into this context.
    pub fn dma_context(self: &Arc<Self>) -> Arc<DmaContext> {
        let mut slot = self.dma.lock();
        if let Some(existing) = slot.upgrade() {
            return existing;
        }
        let me = self.as_context();
        let dma = Arc::new(DmaContext {
            base: BaseContext::new(MemoryType::Dma).with_parent(&me),
        });
        let dma_ref = dma.as_context();
        let export: MapperRef = Arc::new(TextureToDmaMapper::new(&self.device, &me, &dma_ref));
        self.base.attach_mapper(Arc::clone(&export));
        dma.base.attach_mapper(export);
        self.attach_dma_import(&dma);
        *slot = Arc::downgrade(&dma);
        debug!("DMA context derived");
        dma
    }

    /// Accept DMA handles from `dma` (possibly another device's domain).
    pub fn attach_dma_import(self: &Arc<Self>, dma: &Arc<DmaContext>) {
        let me = self.as_context();
        let import: MapperRef = Arc::new(DmaToTextureMapper::new(&self.device, &dma.as_context(), &me));
        self.base.attach_mapper(Arc::clone(&import));
        dma.base.attach_mapper(import);
    }

    /// Scale and convert `src` (a frame of this context) into a new texture.
    ///
    /// The blit is submitted, not awaited: the result carries the fence and
    /// any later readback or export waits for it first.
    pub fn convert(
        self: &Arc<Self>,
        src: &FrameRef,
        roi: Option<Rect>,
        target: ConvertTarget,
        config: &PreprocessConfig,
        prior: Option<&TransformRecord>,
    ) -> Result<(FrameRef, TransformRecord)> {
        let me = self.as_context();
        if !same_context(src.context(), Some(&me)) {
            return Err(MemError::InvalidArgument(
                "convert source is not a frame of this context".into(),
            ));
        }
        let source = frame_resource(src)?;
        let src_desc = *source.desc();
        let plan = plan_geometry(
            config,
            Size::new(src_desc.width, src_desc.height),
            roi,
            Size::new(target.width, target.height),
            prior,
        )?;
        source.wait_idle()?;

        let dst_desc =
            TextureDesc::new(target.width, target.height, target.format).with_usage(TextureUsage::Shared);
        let key = ProcessorKey::new(src_desc.width, src_desc.height, target.width, target.height);
        let params = BltParams {
            src_rect: plan.src_rect,
            dst_rect: plan.dst_rect,
            fill: plan.fill,
        };
        let (dst, fence) = {
            let guard = self.device.lock();
            let processor = self.device.processor(&guard, key)?;
            let dst = self.device.create_texture(&guard, &dst_desc)?;
            match self
                .device
                .driver()
                .blt(&guard, processor, source.id(), dst, &params)
            {
                Ok(fence) => (dst, fence),
                Err(e) => {
                    self.device.destroy_quietly(&guard, dst);
                    return Err(e);
                }
            }
        };
        debug!(
            src = source.id().0,
            dst = dst.0,
            src_rect = ?plan.src_rect,
            dst_rect = ?plan.dst_rect,
            "Blit submitted"
        );

        let output = TextureResource::new(Arc::clone(&self.device), dst, dst_desc);
        output.set_pending(fence);
        let frame = texture_frame(&me, output, Some(src))?;
        Ok((frame, plan.transform))
    }
}

impl Context for TextureContext {
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

    fn derive_context(self: Arc<Self>, memory_type: MemoryType) -> Option<ContextRef> {
        match memory_type {
            MemoryType::Dma => {
                let dma: ContextRef = self.dma_context();
                Some(dma)
            }
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── DMA context ────────────────────────────────────────────────────────────

/// Shareable-handle domain derived from a [`TextureContext`].
pub struct DmaContext {
    base: BaseContext,
}

impl DmaContext {
    pub fn as_context(self: &Arc<Self>) -> ContextRef {
        self.clone()
    }
}

impl Context for DmaContext {
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
