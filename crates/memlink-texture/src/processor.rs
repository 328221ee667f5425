//! Processor cache.
//!
//! Creating a scale/convert processor costs far more than one blit, so
//! processors are kept per [`ProcessorKey`] for the device's lifetime.  The
//! cache is unbounded; `len()` and the hit/miss counters expose its growth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use memlink_core::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::driver::{ProcessorId, ProcessorKey};

#[derive(Default)]
pub struct ProcessorCache {
    entries: Mutex<HashMap<ProcessorKey, ProcessorId>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProcessorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached processor for `key`, or the one `create` builds.  A failed
    /// creation is not cached.
    pub fn get_or_create(
        &self,
        key: ProcessorKey,
        create: impl FnOnce() -> Result<ProcessorId>,
    ) -> Result<ProcessorId> {
        let mut entries = self.entries.lock();
        if let Some(&id) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(?key, "Processor cache HIT");
            return Ok(id);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(?key, "Processor cache MISS");
        let id = create()?;
        entries.insert(key, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Forget every processor; the caller destroys the returned ids.
    pub fn clear(&self) -> Vec<ProcessorId> {
        self.entries.lock().drain().map(|(_, id)| id).collect()
    }
}
