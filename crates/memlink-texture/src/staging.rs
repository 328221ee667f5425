//! Staging texture pool.
//!
//! CPU-readable staging textures are expensive to create, so idle ones are
//! kept per `(width, height, format)` and handed out again.  The pool is
//! capacity-bounded; returning a texture to a full pool evicts the oldest
//! idle entry, which the caller destroys under the device lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::driver::{TextureDesc, TextureFormat, TextureId, TextureUsage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StagingKey {
    pub width: usize,
    pub height: usize,
    pub format: TextureFormat,
}

impl StagingKey {
    pub const fn of(desc: &TextureDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
        }
    }

    pub const fn desc(&self) -> TextureDesc {
        TextureDesc::new(self.width, self.height, self.format).with_usage(TextureUsage::Staging)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingTexture {
    pub id: TextureId,
    pub key: StagingKey,
}

// ─── Pool statistics ────────────────────────────────────────────────────────

/// Lock-free pool access counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub recycled: AtomicU64,
    pub evictions: AtomicU64,
}

impl PoolStats {
    /// Hit rate as a percentage (0.0–100.0).
    pub fn hit_rate(&self) -> f64 {
        let h = self.hits.load(Ordering::Relaxed) as f64;
        let m = self.misses.load(Ordering::Relaxed) as f64;
        let total = h + m;
        if total == 0.0 {
            0.0
        } else {
            (h / total) * 100.0
        }
    }
}

// ─── Pool ───────────────────────────────────────────────────────────────────

pub struct StagingPool {
    capacity: usize,
    idle: Mutex<VecDeque<StagingTexture>>,
    stats: PoolStats,
}

impl StagingPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            idle: Mutex::new(VecDeque::new()),
            stats: PoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take an idle texture matching `key`; `None` is a miss and the caller
    /// creates one.
    pub fn take(&self, key: StagingKey) -> Option<StagingTexture> {
        let mut idle = self.idle.lock();
        match idle.iter().position(|t| t.key == key) {
            Some(index) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                idle.remove(index)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Return a texture.  At capacity the oldest idle entry is evicted and
    /// handed back for destruction.
    pub fn put(&self, texture: StagingTexture) -> Option<StagingTexture> {
        let mut idle = self.idle.lock();
        let evicted = if idle.len() >= self.capacity {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            idle.pop_front()
        } else {
            None
        };
        idle.push_back(texture);
        self.stats.recycled.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Remove every idle texture.
    pub fn drain(&self) -> Vec<StagingTexture> {
        self.idle.lock().drain(..).collect()
    }
}
