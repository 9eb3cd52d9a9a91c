/*!
 * Core Types
 * Common types used across the allocator
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;

/// Byte size or offset within device memory
pub type DeviceSize = u64;

/// Index into the device's ordered memory-type table
pub type MemoryTypeIndex = u32;

/// Opaque handle to one native device memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceMemoryHandle(u64);

impl DeviceMemoryHandle {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceMemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mem:0x{:x}", self.0)
    }
}

/// Resource a dedicated allocation is bound to
///
/// Owner-tied allocations have no neighbours in their native allocation,
/// so they skip placement-granularity rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DedicatedOwner {
    Buffer(u64),
    Image(u64),
}

/// Host-visible view of a persistently mapped native allocation
///
/// Covers the whole native allocation and is only valid while that allocation
/// is live. The span cannot observe its allocation being released, so copying
/// through it is `unsafe`; `DeviceMemoryManager::write_mapped` and
/// `read_mapped` are the checked entry points.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MappedSpan {
    ptr: NonNull<u8>,
    len: DeviceSize,
}

// SAFETY: the span is a plain address range into device memory that the
// driver keeps mapped for the allocation's lifetime; synchronizing access to
// the bytes is the resource layer's job.
unsafe impl Send for MappedSpan {}
unsafe impl Sync for MappedSpan {}

impl MappedSpan {
    /// Wrap a mapped pointer
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the owning native allocation lives.
    #[inline]
    pub const unsafe fn new(ptr: NonNull<u8>, len: DeviceSize) -> Self {
        Self { ptr, len }
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> DeviceSize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer `offset` bytes into the span, if in bounds
    #[inline]
    pub fn ptr_at(&self, offset: DeviceSize) -> Option<NonNull<u8>> {
        if offset > self.len {
            return None;
        }
        let offset = usize::try_from(offset).ok()?;
        // SAFETY: offset is within the mapped range checked above.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) })
    }

    /// Copy `data` into the span at `offset`; false if out of bounds
    ///
    /// # Safety
    /// The native allocation this span was created for must not have been
    /// released.
    pub unsafe fn write(&self, offset: DeviceSize, data: &[u8]) -> bool {
        if !self.contains(offset, data.len() as DeviceSize) {
            return false;
        }
        match self.ptr_at(offset) {
            Some(dst) => {
                // SAFETY: range checked by `contains`, allocation live per the
                // caller; caller data cannot alias device memory.
                std::ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len());
                true
            }
            None => false,
        }
    }

    /// Copy bytes at `offset` into `out`; false if out of bounds
    ///
    /// # Safety
    /// The native allocation this span was created for must not have been
    /// released.
    pub unsafe fn read(&self, offset: DeviceSize, out: &mut [u8]) -> bool {
        if !self.contains(offset, out.len() as DeviceSize) {
            return false;
        }
        match self.ptr_at(offset) {
            Some(src) => {
                // SAFETY: range checked by `contains`, allocation live per the
                // caller.
                std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr(), out.len());
                true
            }
            None => false,
        }
    }

    #[inline]
    fn contains(&self, offset: DeviceSize, len: DeviceSize) -> bool {
        offset
            .checked_add(len)
            .map_or(false, |end| end <= self.len)
    }
}

impl fmt::Debug for MappedSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MappedSpan")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Round `value` up to the next multiple of `granularity`
///
/// A granularity of 0 or 1 leaves the value unchanged.
#[inline]
pub const fn align_up(value: DeviceSize, granularity: DeviceSize) -> DeviceSize {
    if granularity <= 1 {
        return value;
    }
    value.div_ceil(granularity) * granularity
}
