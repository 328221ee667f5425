//! One physical texture device: driver, lock and resource pools.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use memlink_core::{MemError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::completion::{CompletionPolicy, poll_until_complete};
use crate::driver::{FenceId, ProcessorId, ProcessorKey, TextureDesc, TextureDriver, TextureId};
use crate::lock::{DeviceGuard, DeviceLock, MutexDeviceLock};
use crate::processor::ProcessorCache;
use crate::staging::{StagingKey, StagingPool, StagingTexture};

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Idle staging textures kept for reuse.
    pub staging_capacity: usize,
    pub completion: CompletionPolicy,
    /// Row pitch alignment for drivers that let the caller choose it.
    ///
    /// A driver-construction hint: [`TextureDevice`] receives a built driver
    /// and does not apply it.  See [`SoftwareDriver::for_config`].
    ///
    /// [`SoftwareDriver::for_config`]: crate::software::SoftwareDriver::for_config
    pub row_pitch_alignment: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            staging_capacity: 8,
            completion: CompletionPolicy::default(),
            row_pitch_alignment: 64,
        }
    }
}

impl DeviceConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MemError::InvalidArgument(format!("device config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.staging_capacity == 0 {
            return Err(MemError::InvalidArgument(
                "staging_capacity must be at least 1".into(),
            ));
        }
        if self.completion.max_polls == 0 {
            return Err(MemError::InvalidArgument(
                "completion.max_polls must be at least 1".into(),
            ));
        }
        if !self.row_pitch_alignment.is_power_of_two() {
            return Err(MemError::InvalidArgument(format!(
                "row_pitch_alignment {} is not a power of two",
                self.row_pitch_alignment
            )));
        }
        Ok(())
    }
}

// ─── Device ─────────────────────────────────────────────────────────────────

/// Shared by every context and mapper on the device.
///
/// Pools use their own mutexes, distinct from the device lock.  Lock order is
/// always device lock first, then a pool.
pub struct TextureDevice {
    driver: Arc<dyn TextureDriver>,
    lock: Arc<dyn DeviceLock>,
    staging: StagingPool,
    processors: ProcessorCache,
    config: DeviceConfig,
}

impl TextureDevice {
    pub fn new(driver: Arc<dyn TextureDriver>, config: DeviceConfig) -> Result<Arc<Self>> {
        Self::with_lock(driver, Arc::new(MutexDeviceLock::new()), config)
    }

    /// Use a caller-supplied lock, e.g. one shared with other users of the
    /// same native device context.
    pub fn with_lock(
        driver: Arc<dyn TextureDriver>,
        lock: Arc<dyn DeviceLock>,
        config: DeviceConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            driver = driver.name(),
            staging_capacity = config.staging_capacity,
            max_polls = config.completion.max_polls,
            "Texture device ready"
        );
        Ok(Arc::new(Self {
            driver,
            lock,
            staging: StagingPool::new(config.staging_capacity),
            processors: ProcessorCache::new(),
            config,
        }))
    }

    #[inline]
    pub fn driver(&self) -> &dyn TextureDriver {
        self.driver.as_ref()
    }

    /// Block until the device lock is held.
    #[inline]
    pub fn lock(&self) -> DeviceGuard<'_> {
        DeviceGuard::acquire(self.lock.as_ref())
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn staging_pool(&self) -> &StagingPool {
        &self.staging
    }

    pub fn processors(&self) -> &ProcessorCache {
        &self.processors
    }

    /// Pooled staging texture for `key`, created on a miss.
    pub fn acquire_staging(&self, guard: &DeviceGuard<'_>, key: StagingKey) -> Result<StagingTexture> {
        if let Some(texture) = self.staging.take(key) {
            debug!(id = texture.id.0, ?key, "Staging pool hit");
            return Ok(texture);
        }
        let id = self.driver.create_texture(guard, &key.desc())?;
        debug!(id = id.0, ?key, "Staging pool miss");
        Ok(StagingTexture { id, key })
    }

    /// Return a staging texture; an evicted one is destroyed under `guard`.
    pub fn recycle_staging(&self, guard: &DeviceGuard<'_>, texture: StagingTexture) {
        if let Some(evicted) = self.staging.put(texture) {
            debug!(id = evicted.id.0, key = ?evicted.key, "Staging pool eviction");
            self.destroy_quietly(guard, evicted.id);
        }
    }

    pub fn processor(&self, guard: &DeviceGuard<'_>, key: ProcessorKey) -> Result<ProcessorId> {
        self.processors
            .get_or_create(key, || self.driver.create_processor(guard, &key))
    }

    pub fn create_texture(&self, guard: &DeviceGuard<'_>, desc: &TextureDesc) -> Result<TextureId> {
        self.driver.create_texture(guard, desc)
    }

    /// Destroy on a cleanup path; failures are logged, never raised.
    pub fn destroy_quietly(&self, guard: &DeviceGuard<'_>, texture: TextureId) {
        if let Err(e) = self.driver.destroy_texture(guard, texture) {
            warn!(id = texture.0, error = %e, "Texture destroy failed");
        }
    }

    /// Busy-poll `fence` under the configured [`CompletionPolicy`].
    ///
    /// Takes the lock per query; must not be called while holding a guard.
    pub fn wait_fence(&self, fence: FenceId) -> Result<()> {
        poll_until_complete(&self.config.completion, "blt", || {
            let guard = self.lock();
            self.driver.query_fence(&guard, fence)
        })
        .map(|_| ())
    }

    /// Log pool and cache statistics.
    pub fn report_pool_stats(&self) {
        let stats = self.staging.stats();
        info!(
            hits = stats.hits.load(Ordering::Relaxed),
            misses = stats.misses.load(Ordering::Relaxed),
            recycled = stats.recycled.load(Ordering::Relaxed),
            evictions = stats.evictions.load(Ordering::Relaxed),
            hit_rate_pct = stats.hit_rate(),
            idle = self.staging.idle_len(),
            processors = self.processors.len(),
            processor_hits = self.processors.hits(),
            processor_misses = self.processors.misses(),
            "Staging pool report"
        );
    }
}

impl fmt::Debug for TextureDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureDevice")
            .field("driver", &self.driver.name())
            .field("staging_idle", &self.staging.idle_len())
            .field("processors", &self.processors.len())
            .finish()
    }
}

impl Drop for TextureDevice {
    fn drop(&mut self) {
        let staging = self.staging.drain();
        let processors = self.processors.clear();
        if staging.is_empty() && processors.is_empty() {
            return;
        }
        let guard = DeviceGuard::acquire(self.lock.as_ref());
        for texture in staging {
            self.destroy_quietly(&guard, texture.id);
        }
        for processor in processors {
            if let Err(e) = self.driver.destroy_processor(&guard, processor) {
                warn!(id = processor.0, error = %e, "Processor destroy failed");
            }
        }
        debug!("Texture device released");
    }
}
