//! Memory-domain contexts and their mapper registries.
//!
//! A [`Context`] identifies one memory-domain instance: a device handle plus
//! a fixed [`MemoryType`].  Contexts are shared as [`ContextRef`] and keyed by
//! instance identity ([`ContextId`]), never by value, so two devices with
//! identical properties are never confused.
//!
//! # Lifetime
//!
//! Mappers hold their endpoint contexts weakly.  A context therefore owns its
//! registry without forming a cycle, and an endpoint's allocation (and hence
//! its [`ContextId`]) cannot be reused while any mapper still refers to it.
//! When a [`BaseContext`] is dropped it drains its registry and asks the
//! surviving partner of every mapper to drop its own entry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MemError, Result};
use crate::mapper::{MapperRef, same_mapper};
use crate::types::{Handle, MemoryType};

pub type ContextRef = Arc<dyn Context>;

/// Instance identity of a context (its shared allocation address).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(usize);

impl ContextId {
    pub fn of<T: ?Sized>(ctx: &Arc<T>) -> Self {
        Self(Arc::as_ptr(ctx) as *const () as usize)
    }

    pub fn of_weak<T: ?Sized>(ctx: &Weak<T>) -> Self {
        Self(Weak::as_ptr(ctx) as *const () as usize)
    }

    pub fn of_opt(ctx: Option<&ContextRef>) -> Option<Self> {
        ctx.map(Self::of)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({:#x})", self.0)
    }
}

/// One memory-domain instance.
///
/// Backends may embed [`BaseContext`] and delegate to it, or implement the
/// trait directly.
pub trait Context: Send + Sync + 'static {
    fn memory_type(&self) -> MemoryType;

    /// Named native handle, `None` when the key is not present.
    fn handle(&self, key: &str) -> Option<Handle>;

    /// Context this one was derived from, if it is still alive.
    fn parent(&self) -> Option<ContextRef>;

    /// Registry lookup for the `(input, output)` pair.  Never creates.
    fn get_mapper(&self, input: Option<ContextId>, output: Option<ContextId>)
    -> Option<MapperRef>;

    fn attach_mapper(&self, mapper: MapperRef);

    fn remove_mapper(&self, mapper: &MapperRef);

    /// Sibling context of another memory type on the same device.
    fn derive_context(self: Arc<Self>, memory_type: MemoryType) -> Option<ContextRef> {
        let _ = memory_type;
        None
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn Context {
    /// Mandatory handle lookup.
    pub fn require_handle(&self, key: &str) -> Result<Handle> {
        self.handle(key).ok_or_else(|| {
            MemError::NotFound(format!(
                "handle '{key}' on {} context",
                self.memory_type()
            ))
        })
    }

    pub fn downcast_ref<T: Context>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Whether two optional contexts are the same instance (both `None` counts).
pub fn same_context(a: Option<&ContextRef>, b: Option<&ContextRef>) -> bool {
    ContextId::of_opt(a) == ContextId::of_opt(b)
}

/// Memory type of an optional context; no context means host memory.
pub fn memory_type_of(ctx: Option<&ContextRef>) -> MemoryType {
    ctx.map_or(MemoryType::Cpu, |c| c.memory_type())
}

// ─── Mapper registry ────────────────────────────────────────────────────────

pub type MapperKey = (Option<ContextId>, Option<ContextId>);

/// `(input, output) -> mapper` table owned by one context.
///
/// Mutation is expected at setup time; lookups happen per map call.
#[derive(Default)]
pub struct MapperRegistry {
    entries: Mutex<HashMap<MapperKey, MapperRef>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MapperKey) -> Option<MapperRef> {
        self.entries.lock().get(&key).cloned()
    }

    /// Insert under the mapper's own endpoint key; returns any mapper it
    /// replaced.
    pub fn attach(&self, mapper: MapperRef) -> Option<MapperRef> {
        let key = mapper.endpoints().key();
        let previous = self.entries.lock().insert(key, mapper);
        debug!(
            input = ?key.0,
            output = ?key.1,
            replaced = previous.is_some(),
            "Mapper attached"
        );
        previous
    }

    /// Remove every entry holding this exact mapper instance.
    pub fn remove(&self, mapper: &MapperRef) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, m| !same_mapper(m, mapper));
        before != entries.len()
    }

    pub fn drain(&self) -> Vec<MapperRef> {
        self.entries.lock().drain().map(|(_, m)| m).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("len", &self.len())
            .finish()
    }
}

// ─── Base context ───────────────────────────────────────────────────────────

/// Default context state: memory type, handles, weak parent, registry.
pub struct BaseContext {
    memory_type: MemoryType,
    handles: HashMap<String, Handle>,
    parent: Option<Weak<dyn Context>>,
    mappers: MapperRegistry,
}

impl BaseContext {
    pub fn new(memory_type: MemoryType) -> Self {
        Self {
            memory_type,
            handles: HashMap::new(),
            parent: None,
            mappers: MapperRegistry::new(),
        }
    }

    pub fn with_handle(mut self, key: impl Into<String>, handle: Handle) -> Self {
        self.handles.insert(key.into(), handle);
        self
    }

    pub fn with_parent(mut self, parent: &ContextRef) -> Self {
        self.parent = Some(Arc::downgrade(parent));
        self
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn handle(&self, key: &str) -> Option<Handle> {
        self.handles.get(key).copied()
    }

    pub fn parent(&self) -> Option<ContextRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn mappers(&self) -> &MapperRegistry {
        &self.mappers
    }

    pub fn get_mapper(
        &self,
        input: Option<ContextId>,
        output: Option<ContextId>,
    ) -> Option<MapperRef> {
        self.mappers.get((input, output))
    }

    pub fn attach_mapper(&self, mapper: MapperRef) {
        self.mappers.attach(mapper);
    }

    pub fn remove_mapper(&self, mapper: &MapperRef) {
        self.mappers.remove(mapper);
    }
}

impl Drop for BaseContext {
    fn drop(&mut self) {
        let drained = self.mappers.drain();
        if drained.is_empty() {
            return;
        }
        debug!(
            memory_type = %self.memory_type,
            mappers = drained.len(),
            "Context dropped; deregistering mappers from partners"
        );
        for mapper in drained {
            // The dropping side no longer upgrades, so only the partner
            // (if alive) is notified.
            let endpoints = mapper.endpoints();
            for partner in [endpoints.input(), endpoints.output()].into_iter().flatten() {
                partner.remove_mapper(&mapper);
            }
        }
    }
}

impl fmt::Debug for BaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseContext")
            .field("memory_type", &self.memory_type)
            .field("handles", &self.handles)
            .field("mappers", &self.mappers)
            .finish()
    }
}

impl Context for BaseContext {
    fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    fn handle(&self, key: &str) -> Option<Handle> {
        BaseContext::handle(self, key)
    }

    fn parent(&self) -> Option<ContextRef> {
        BaseContext::parent(self)
    }

    fn get_mapper(
        &self,
        input: Option<ContextId>,
        output: Option<ContextId>,
    ) -> Option<MapperRef> {
        BaseContext::get_mapper(self, input, output)
    }

    fn attach_mapper(&self, mapper: MapperRef) {
        BaseContext::attach_mapper(self, mapper);
    }

    fn remove_mapper(&self, mapper: &MapperRef) {
        BaseContext::remove_mapper(self, mapper);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
