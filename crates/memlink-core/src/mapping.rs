//! Mapping orchestration.
//!
//! # Resolution
//!
//! `map(src, output, mode)`:
//!
//! 1. `src.context() == output` (both `None` included): return `src` itself.
//! 2. Ask the output context for an `(input, output)` mapper.
//! 3. Otherwise ask the input context.
//! 4. Otherwise fail [`MemError::MappingUnavailable`] naming both types.
//!
//! The destination is asked first because a conversion is usually only
//! implementable by the side that owns the device handle.
//!
//! # Composition
//!
//! [`create_mapper`] builds a [`MapperChain`] over an explicit list of
//! contexts (A -> DMA -> B) and registers it on both ends, so later
//! top-level `map()` calls resolve the chain like any direct mapper.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::{ContextId, ContextRef, memory_type_of, same_context};
use crate::error::{MemError, Result};
use crate::frame::{Frame, FrameRef};
use crate::mapper::{MapperEndpoints, MapperRef, MemoryMapper};
use crate::tensor::{Tensor, TensorRef};
use crate::tensor_info::TensorInfo;
use crate::types::{AccessMode, Fourcc, Handle};

/// Destination-first registry lookup.
pub fn find_mapper(input: Option<&ContextRef>, output: Option<&ContextRef>) -> Result<MapperRef> {
    let key = (ContextId::of_opt(input), ContextId::of_opt(output));
    if let Some(out) = output
        && let Some(mapper) = out.get_mapper(key.0, key.1)
    {
        return Ok(mapper);
    }
    if let Some(inp) = input
        && let Some(mapper) = inp.get_mapper(key.0, key.1)
    {
        return Ok(mapper);
    }
    Err(MemError::MappingUnavailable {
        from: memory_type_of(input),
        to: memory_type_of(output),
    })
}

pub fn map_tensor(src: &TensorRef, output: Option<&ContextRef>, mode: AccessMode) -> Result<TensorRef> {
    if same_context(src.context(), output) {
        return Ok(Arc::clone(src));
    }
    let mapper = find_mapper(src.context(), output)?;
    let mapped = mapper.map_tensor(src, mode)?;
    debug!(
        from = %src.memory_type(),
        to = %mapped.memory_type(),
        ?mode,
        "Tensor mapped"
    );
    Ok(mapped)
}

pub fn map_frame(src: &FrameRef, output: Option<&ContextRef>, mode: AccessMode) -> Result<FrameRef> {
    if same_context(src.context(), output) {
        return Ok(Arc::clone(src));
    }
    let mapper = find_mapper(src.context(), output)?;
    let mapped = mapper.map_frame(src, mode)?;
    debug!(
        from = %src.memory_type(),
        to = %mapped.memory_type(),
        planes = mapped.num_tensors(),
        ?mode,
        "Frame mapped"
    );
    Ok(mapped)
}

// ─── Identity ───────────────────────────────────────────────────────────────

/// Mapper between a context and itself.
pub struct IdentityMapper {
    endpoints: MapperEndpoints,
}

impl IdentityMapper {
    pub fn new(context: &ContextRef) -> Self {
        Self {
            endpoints: MapperEndpoints::new(Some(context), Some(context)),
        }
    }
}

impl MemoryMapper for IdentityMapper {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, _mode: AccessMode) -> Result<TensorRef> {
        Ok(Arc::clone(src))
    }

    fn map_frame(&self, src: &FrameRef, _mode: AccessMode) -> Result<FrameRef> {
        Ok(Arc::clone(src))
    }
}

// ─── Chains ─────────────────────────────────────────────────────────────────

/// Composite mapper folding several hops into one `(first, last)` identity.
///
/// Each intermediate stays reachable through the next hop's `parent()`, so
/// the final result keeps the whole chain (and the source) alive.  A failing
/// hop drops the intermediates produced so far before its error is returned.
pub struct MapperChain {
    endpoints: MapperEndpoints,
    hops: Vec<MapperRef>,
}

impl MapperChain {
    pub fn new(hops: Vec<MapperRef>) -> Result<Self> {
        let (Some(first), Some(last)) = (hops.first(), hops.last()) else {
            return Err(MemError::invalid("mapper chain needs at least one hop"));
        };
        for (i, pair) in hops.windows(2).enumerate() {
            if pair[0].endpoints().output_id() != pair[1].endpoints().input_id() {
                return Err(MemError::invalid(format!(
                    "hop {i} outputs {} but hop {} expects {}",
                    pair[0].endpoints().output_memory_type(),
                    i + 1,
                    pair[1].endpoints().input_memory_type()
                )));
            }
        }
        let input = first.endpoints().input();
        let output = last.endpoints().output();
        if first.endpoints().input_id().is_some() != input.is_some()
            || last.endpoints().output_id().is_some() != output.is_some()
        {
            return Err(MemError::NotFound(
                "chain endpoint context was dropped".into(),
            ));
        }
        Ok(Self {
            endpoints: MapperEndpoints::new(input.as_ref(), output.as_ref()),
            hops,
        })
    }

    pub fn hops(&self) -> &[MapperRef] {
        &self.hops
    }
}

impl MemoryMapper for MapperChain {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, mode: AccessMode) -> Result<TensorRef> {
        let mut current = Arc::clone(src);
        for (i, hop) in self.hops.iter().enumerate() {
            current = hop.map_tensor(&current, mode).inspect_err(|e| {
                warn!(
                    hop = i,
                    from = %hop.endpoints().input_memory_type(),
                    to = %hop.endpoints().output_memory_type(),
                    error = %e,
                    "Mapper chain hop failed"
                );
            })?;
        }
        Ok(current)
    }

    fn map_frame(&self, src: &FrameRef, mode: AccessMode) -> Result<FrameRef> {
        let mut current = Arc::clone(src);
        for (i, hop) in self.hops.iter().enumerate() {
            current = hop.map_frame(&current, mode).inspect_err(|e| {
                warn!(
                    hop = i,
                    from = %hop.endpoints().input_memory_type(),
                    to = %hop.endpoints().output_memory_type(),
                    error = %e,
                    "Mapper chain hop failed"
                );
            })?;
        }
        Ok(current)
    }
}

// ─── Cache ──────────────────────────────────────────────────────────────────

/// Identity of one source view.  Planes of a frame share their storage, so
/// the layout and handles are part of the identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ViewKey {
    storage: usize,
    info: TensorInfo,
    handles: Vec<(String, Handle)>,
}

impl ViewKey {
    fn of(src: &Tensor) -> Self {
        let mut handles: Vec<_> = src.handles().iter().map(|(k, v)| (k.clone(), *v)).collect();
        handles.sort_unstable();
        Self {
            storage: Arc::as_ptr(src.storage()) as *const () as usize,
            info: src.info().clone(),
            handles,
        }
    }
}

type TensorKey = (ViewKey, AccessMode);
type FrameKey = (Fourcc, Vec<ViewKey>, AccessMode);

/// Memoizes mapped views per source view while the previous result is
/// still alive.
///
/// Results are held weakly: a strong cache inside a context's registry would
/// keep the context alive through the result's own context reference.
pub struct MapperCache {
    inner: MapperRef,
    endpoints: MapperEndpoints,
    tensors: Mutex<HashMap<TensorKey, Weak<Tensor>>>,
    frames: Mutex<HashMap<FrameKey, Weak<Frame>>>,
}

impl MapperCache {
    pub fn new(inner: MapperRef) -> Self {
        let endpoints = MapperEndpoints::new(
            inner.endpoints().input().as_ref(),
            inner.endpoints().output().as_ref(),
        );
        Self {
            inner,
            endpoints,
            tensors: Mutex::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &MapperRef {
        &self.inner
    }

    /// Live cached entries (tensors + frames).
    pub fn len(&self) -> usize {
        let tensors = self.tensors.lock().values().filter(|w| w.strong_count() > 0).count();
        let frames = self.frames.lock().values().filter(|w| w.strong_count() > 0).count();
        tensors + frames
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryMapper for MapperCache {
    fn endpoints(&self) -> &MapperEndpoints {
        &self.endpoints
    }

    fn map_tensor(&self, src: &TensorRef, mode: AccessMode) -> Result<TensorRef> {
        let key: TensorKey = (ViewKey::of(src), mode);
        if let Some(hit) = self.tensors.lock().get(&key).and_then(Weak::upgrade) {
            debug!(?mode, "Mapper cache hit");
            return Ok(hit);
        }
        let mapped = self.inner.map_tensor(src, mode)?;
        let mut entries = self.tensors.lock();
        entries.retain(|_, w| w.strong_count() > 0);
        entries.insert(key, Arc::downgrade(&mapped));
        Ok(mapped)
    }

    fn map_frame(&self, src: &FrameRef, mode: AccessMode) -> Result<FrameRef> {
        if src.num_tensors() == 0 {
            return self.inner.map_frame(src, mode);
        }
        let planes = src.iter().map(|t| ViewKey::of(t)).collect();
        let key: FrameKey = (src.format(), planes, mode);
        if let Some(hit) = self.frames.lock().get(&key).and_then(Weak::upgrade) {
            debug!(?mode, "Mapper cache hit");
            return Ok(hit);
        }
        let mapped = self.inner.map_frame(src, mode)?;
        let mut entries = self.frames.lock();
        entries.retain(|_, w| w.strong_count() > 0);
        entries.insert(key, Arc::downgrade(&mapped));
        Ok(mapped)
    }
}

// ─── Construction ───────────────────────────────────────────────────────────

/// Build a mapper across `contexts` (at least two), hop by hop.
///
/// Every hop is resolved with [`find_mapper`]; a missing hop fails
/// `MappingUnavailable`.  Newly composed mappers are attached to the first
/// and last contexts.
pub fn create_mapper(contexts: &[ContextRef], use_cache: bool) -> Result<MapperRef> {
    let (Some(first), Some(last)) = (contexts.first(), contexts.last()) else {
        return Err(MemError::invalid("create_mapper needs at least two contexts"));
    };
    if contexts.len() < 2 {
        return Err(MemError::invalid("create_mapper needs at least two contexts"));
    }

    let mut hops = Vec::with_capacity(contexts.len() - 1);
    for pair in contexts.windows(2) {
        if same_context(Some(&pair[0]), Some(&pair[1])) {
            continue;
        }
        hops.push(find_mapper(Some(&pair[0]), Some(&pair[1]))?);
    }

    let (mapper, composed): (MapperRef, bool) = match hops.len() {
        0 => (Arc::new(IdentityMapper::new(first)), true),
        1 => (hops.remove(0), false),
        _ => (Arc::new(MapperChain::new(hops)?), true),
    };
    let (mapper, composed) = if use_cache {
        (Arc::new(MapperCache::new(mapper)) as MapperRef, true)
    } else {
        (mapper, composed)
    };

    if composed {
        first.attach_mapper(Arc::clone(&mapper));
        if !same_context(Some(first), Some(last)) {
            last.attach_mapper(Arc::clone(&mapper));
        }
    }
    debug!(
        from = %first.memory_type(),
        to = %last.memory_type(),
        contexts = contexts.len(),
        cached = use_cache,
        "Mapper created"
    );
    Ok(mapper)
}
