/*!
 * Memory Types
 * Blocks, requests and statistics for device memory management
 */

use crate::core::types::{
    DedicatedOwner, DeviceMemoryHandle, DeviceSize, MappedSpan, MemoryTypeIndex,
};
use crate::device::MemoryPropertyFlags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;

/// A contiguous byte range inside one native allocation
///
/// Owned exclusively by the resource that requested it until it is handed
/// back to `free`, which consumes it.
#[derive(PartialEq, Eq)]
pub struct MemoryBlock {
    pub(crate) memory: DeviceMemoryHandle,
    pub(crate) offset: DeviceSize,
    pub(crate) size: DeviceSize,
    pub(crate) memory_type_index: MemoryTypeIndex,
    pub(crate) mapped: Option<MappedSpan>,
    pub(crate) dedicated: bool,
}

impl MemoryBlock {
    pub(crate) fn new(
        memory: DeviceMemoryHandle,
        offset: DeviceSize,
        size: DeviceSize,
        memory_type_index: MemoryTypeIndex,
        mapped: Option<MappedSpan>,
        dedicated: bool,
    ) -> Self {
        debug_assert!(size > 0, "memory blocks are never empty");
        Self {
            memory,
            offset,
            size,
            memory_type_index,
            mapped,
            dedicated,
        }
    }

    /// Native allocation backing this block
    #[inline]
    pub fn memory(&self) -> DeviceMemoryHandle {
        self.memory
    }

    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn end(&self) -> DeviceSize {
        self.offset + self.size
    }

    #[inline]
    pub fn memory_type_index(&self) -> MemoryTypeIndex {
        self.memory_type_index
    }

    #[inline]
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    #[inline]
    pub fn is_persistent_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Mapped span of the whole owning allocation
    #[inline]
    pub fn base_mapping(&self) -> Option<MappedSpan> {
        self.mapped
    }

    /// Host pointer to the first byte of this block
    #[inline]
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped.and_then(|span| span.ptr_at(self.offset))
    }

    /// Copy `data` into the block at `offset` (relative to the block)
    ///
    /// Returns false when the block is not mapped or the range does not fit.
    ///
    /// # Safety
    /// The block's native allocation must still be live: the block has not
    /// been freed and its manager has not been disposed. Prefer
    /// `DeviceMemoryManager::write_mapped`, which checks both.
    pub unsafe fn write(&self, offset: DeviceSize, data: &[u8]) -> bool {
        match (self.mapped, self.absolute(offset, data.len() as DeviceSize)) {
            (Some(span), Some(start)) => span.write(start, data),
            _ => false,
        }
    }

    /// Copy bytes at `offset` (relative to the block) into `out`
    ///
    /// # Safety
    /// Same contract as [`MemoryBlock::write`].
    pub unsafe fn read(&self, offset: DeviceSize, out: &mut [u8]) -> bool {
        match (self.mapped, self.absolute(offset, out.len() as DeviceSize)) {
            (Some(span), Some(start)) => span.read(start, out),
            _ => false,
        }
    }

    /// Absolute span offset of a block-relative range, if it fits the block
    pub(crate) fn absolute(&self, offset: DeviceSize, len: DeviceSize) -> Option<DeviceSize> {
        let end = offset.checked_add(len)?;
        if end > self.size {
            return None;
        }
        Some(self.offset + offset)
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}] Off:{}, Size:{}, End:{}, Type:{}{}{}",
            self.memory,
            self.offset,
            self.size,
            self.end(),
            self.memory_type_index,
            if self.dedicated { ", dedicated" } else { "" },
            if self.mapped.is_some() { ", mapped" } else { "" },
        )
    }
}

/// Device memory allocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    pub memory_type_bits: u32,
    pub property_flags: MemoryPropertyFlags,
    pub persistent_mapped: bool,
    pub dedicated: bool,
    pub owner: Option<DedicatedOwner>,
}

impl AllocationRequest {
    pub fn new(size: DeviceSize, alignment: DeviceSize, memory_type_bits: u32) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits,
            property_flags: MemoryPropertyFlags::empty(),
            persistent_mapped: false,
            dedicated: false,
            owner: None,
        }
    }

    pub fn with_flags(mut self, flags: MemoryPropertyFlags) -> Self {
        self.property_flags = flags;
        self
    }

    pub fn persistent_mapped(mut self, mapped: bool) -> Self {
        self.persistent_mapped = mapped;
        self
    }

    /// Request a standalone native allocation
    pub fn dedicated(mut self) -> Self {
        self.dedicated = true;
        self
    }

    /// Request a standalone native allocation bound to `owner`
    pub fn dedicated_to(mut self, owner: DedicatedOwner) -> Self {
        self.dedicated = true;
        self.owner = Some(owner);
        self
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.size > 0 && self.alignment.is_power_of_two()
    }
}

/// Device memory statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Running counter of bytes handed out (chunk requests at chunk granularity)
    pub allocated_bytes: u64,
    /// Live chunks across all sets
    pub chunk_count: usize,
    /// Bytes reserved by live chunks
    pub chunk_reserved_bytes: u64,
    /// Bytes still free inside live chunks
    pub chunk_free_bytes: u64,
    /// Live dedicated allocations
    pub dedicated_count: usize,
    /// Bytes held by live dedicated allocations
    pub dedicated_bytes: u64,
    /// Number of (memory type, mapped-ness) sets created
    pub allocator_sets: usize,
}

impl MemoryStats {
    /// Fraction of chunk space in use, 0.0 when no chunks exist
    pub fn chunk_utilization(&self) -> f64 {
        if self.chunk_reserved_bytes == 0 {
            return 0.0;
        }
        (self.chunk_reserved_bytes - self.chunk_free_bytes) as f64 / self.chunk_reserved_bytes as f64
    }
}
