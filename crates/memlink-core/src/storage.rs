//! Owners of the bytes behind a tensor.
//!
//! A [`Storage`] is shared by every view onto the same memory.  Backends
//! define their own storage types (a mapped staging texture, an exported
//! handle) and recover them from a tensor through [`Storage::as_any`].

use std::alloc::{self, Layout};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{MemError, Result};
use crate::types::Handle;

/// Alignment of host allocations; one cache line on every target we ship.
pub const HOST_ALIGNMENT: usize = 64;

pub type StorageRef = Arc<dyn Storage>;

/// Memory backing one or more tensor views.
pub trait Storage: Send + Sync + fmt::Debug + 'static {
    /// Host-addressable base pointer, `None` for handle-only memory.
    fn data(&self) -> Option<NonNull<u8>>;

    /// Addressable length in bytes (0 for handle-only memory).
    fn byte_len(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

// ─── Host allocation ────────────────────────────────────────────────────────

/// Zero-initialised, cache-line aligned host allocation.
pub struct HostBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: HostBuffer exclusively owns its allocation; concurrent access to
// the bytes is governed by the views handed out, same as a `Vec<u8>` behind
// a raw pointer.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    pub fn zeroed(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), HOST_ALIGNMENT)
            .map_err(|e| MemError::invalid(format!("host allocation of {len} bytes: {e}")))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| MemError::DeviceOperationFailed {
            call: "alloc_zeroed".into(),
            status: -1,
        })?;
        Ok(Self { ptr, len, layout })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let buf = Self::zeroed(bytes.len())?;
        // SAFETY: buf owns at least bytes.len() writable bytes and cannot
        // overlap a borrowed slice.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.ptr.as_ptr(), bytes.len());
        }
        Ok(buf)
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl Storage for HostBuffer {
    fn data(&self) -> Option<NonNull<u8>> {
        Some(self.ptr)
    }

    fn byte_len(&self) -> usize {
        self.len
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Externally owned memory ────────────────────────────────────────────────

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Memory owned by a host pipeline framework.
///
/// The release callback runs exactly once, when the last view referencing
/// this storage is dropped.  A panicking callback is logged, not propagated.
pub struct ExternalMemory {
    ptr: Option<NonNull<u8>>,
    len: usize,
    handle: Option<Handle>,
    release: Mutex<Option<ReleaseFn>>,
}

// SAFETY: the producer of the raw pointer guarantees it stays valid until
// the release callback runs; the callback itself is `Send`.
unsafe impl Send for ExternalMemory {}
unsafe impl Sync for ExternalMemory {}

impl ExternalMemory {
    /// Wrap a host-addressable buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until
    /// `release` is invoked.
    pub unsafe fn new(
        ptr: *mut u8,
        len: usize,
        release: impl FnOnce() + Send + 'static,
    ) -> Result<Self> {
        let ptr = match NonNull::new(ptr) {
            Some(p) => Some(p),
            None if len == 0 => None,
            None => {
                return Err(MemError::invalid(format!(
                    "null external pointer with length {len}"
                )));
            }
        };
        Ok(Self {
            ptr,
            len,
            handle: None,
            release: Mutex::new(Some(Box::new(release))),
        })
    }

    /// Wrap a native handle that has no host address (dma-buf fd, surface id).
    pub fn handle_only(handle: Handle, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            ptr: None,
            len: 0,
            handle: Some(handle),
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn native_handle(&self) -> Option<Handle> {
        self.handle
    }
}

impl Drop for ExternalMemory {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take()
            && panic::catch_unwind(AssertUnwindSafe(release)).is_err()
        {
            warn!(len = self.len, "External memory release callback panicked");
        }
    }
}

impl fmt::Debug for ExternalMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalMemory")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Storage for ExternalMemory {
    fn data(&self) -> Option<NonNull<u8>> {
        self.ptr
    }

    fn byte_len(&self) -> usize {
        self.len
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Views ──────────────────────────────────────────────────────────────────

/// Byte window into another storage, used for sub-region slices.
#[derive(Debug)]
pub struct StorageView {
    base: StorageRef,
    offset: usize,
    len: usize,
}

impl StorageView {
    pub fn new(base: StorageRef, offset: usize, len: usize) -> Result<Self> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| MemError::invalid("storage view overflows usize"))?;
        if end > base.byte_len() {
            return Err(MemError::invalid(format!(
                "storage view {offset}..{end} exceeds base length {}",
                base.byte_len()
            )));
        }
        Ok(Self { base, offset, len })
    }

    pub fn base(&self) -> &StorageRef {
        &self.base
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Storage for StorageView {
    fn data(&self) -> Option<NonNull<u8>> {
        // SAFETY: offset + len <= base.byte_len() was checked at construction.
        self.base
            .data()
            .map(|p| unsafe { NonNull::new_unchecked(p.as_ptr().add(self.offset)) })
    }

    fn byte_len(&self) -> usize {
        self.len
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
