//! Device serialization.
//!
//! The device context of a texture driver is not thread-safe.  A
//! [`DeviceLock`] is owned by the [`TextureDevice`](crate::TextureDevice) and
//! every driver call requires a live [`DeviceGuard`].  Hold one guard across
//! a whole read-modify sequence (copy to staging *and* map staging); taking
//! it per call lets another thread slip in between.

use std::marker::PhantomData;

use parking_lot::lock_api::RawMutex as _;

/// Non-reentrant device mutex.
pub trait DeviceLock: Send + Sync {
    fn lock(&self);

    fn try_lock(&self) -> bool;

    /// # Safety
    ///
    /// The lock must be held by the current context, acquired through
    /// `lock()` or a successful `try_lock()`.
    unsafe fn unlock(&self);
}

/// Proof that the device lock is held.  Unlocks on drop.
#[must_use = "the device lock is released when the guard is dropped"]
pub struct DeviceGuard<'a> {
    lock: &'a dyn DeviceLock,
    // Unlock must happen on the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a> DeviceGuard<'a> {
    pub fn acquire(lock: &'a dyn DeviceLock) -> Self {
        lock.lock();
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    pub fn try_acquire(lock: &'a dyn DeviceLock) -> Option<Self> {
        lock.try_lock().then(|| Self {
            lock,
            _not_send: PhantomData,
        })
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: constructed only after lock()/try_lock() succeeded.
        unsafe { self.lock.unlock() }
    }
}

/// Default lock: a parking_lot raw mutex.
pub struct MutexDeviceLock {
    raw: parking_lot::RawMutex,
}

impl MutexDeviceLock {
    pub const fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
        }
    }
}

impl Default for MutexDeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLock for MutexDeviceLock {
    fn lock(&self) {
        self.raw.lock();
    }

    fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    unsafe fn unlock(&self) {
        // SAFETY: forwarded caller contract.
        unsafe { self.raw.unlock() }
    }
}
