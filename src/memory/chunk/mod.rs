/*!
 * Chunk Allocator
 *
 * Sub-allocates byte ranges out of one fixed-size native allocation.
 *
 * ## Allocation
 *
 * - **First-fit** scan of an offset-ordered free list
 * - **Alignment correction**: a free block's start is advanced to the next
 *   multiple of the requested alignment; the skipped bytes stay free
 * - **Split**: the residual tail of the chosen block goes back to the list
 *
 * ## Deallocation
 *
 * Freed ranges are inserted in offset order by binary search. Coalescing is
 * deferred: adjacent ranges are only merged when a scan fails, then the scan
 * is retried once. This keeps `free` cheap and amortizes merging across
 * failed allocations.
 */

mod free_list;
mod set;
#[cfg(feature = "alloc-track")]
mod tracking;

pub use free_list::FreeBlock;
pub use set::{ChunkAllocatorSet, ChunkSetUsage};

use super::types::MemoryBlock;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::types::{DeviceMemoryHandle, DeviceSize, MappedSpan, MemoryTypeIndex};
use crate::device::MemoryDevice;
use crate::monitoring::NativeCallSpan;
use free_list::FreeList;
use tracing::{debug, error, info};

/// One coarse native allocation subdivided by a free list
pub struct ChunkAllocator {
    memory: DeviceMemoryHandle,
    memory_type_index: MemoryTypeIndex,
    total_size: DeviceSize,
    mapped: Option<MappedSpan>,
    free: FreeList,
    #[cfg(feature = "alloc-track")]
    tracker: tracking::AllocationTracker,
}

impl ChunkAllocator {
    /// Allocate (and map, if `persistent_mapped`) a fresh chunk
    ///
    /// The chunk starts with a single free block spanning its whole size.
    pub fn new<D: MemoryDevice + ?Sized>(
        device: &D,
        memory_type_index: MemoryTypeIndex,
        persistent_mapped: bool,
        total_size: DeviceSize,
    ) -> MemoryResult<Self> {
        let native = {
            let _call = NativeCallSpan::new("allocate_memory", memory_type_index, total_size);
            device.allocate_memory(memory_type_index, total_size, None)
        };
        let memory = native.map_err(|source| {
            error!(
                memory_type_index,
                size = total_size,
                error = %source,
                "Chunk allocation refused by device"
            );
            MemoryError::NativeAllocationFailure {
                memory_type_index,
                size: total_size,
                source,
            }
        })?;

        let mapped = if persistent_mapped {
            let _call = NativeCallSpan::new("map_memory", memory_type_index, total_size);
            match device.map_memory(memory, 0, total_size) {
                // SAFETY: the device keeps the mapping valid until `free_memory`,
                // which only `dispose` calls.
                Ok(ptr) => Some(unsafe { MappedSpan::new(ptr, total_size) }),
                Err(source) => {
                    device.free_memory(memory);
                    error!(
                        memory_type_index,
                        size = total_size,
                        error = %source,
                        "Unable to map newly allocated chunk"
                    );
                    return Err(MemoryError::NativeMappingFailure {
                        memory_type_index,
                        size: total_size,
                        source,
                    });
                }
            }
        } else {
            None
        };

        info!(
            %memory,
            memory_type_index,
            size = total_size,
            persistent_mapped,
            "Created memory chunk"
        );

        Ok(Self {
            memory,
            memory_type_index,
            total_size,
            mapped,
            free: FreeList::new(total_size),
            #[cfg(feature = "alloc-track")]
            tracker: tracking::AllocationTracker::new(),
        })
    }

    /// Allocate `size` bytes aligned to `alignment`
    ///
    /// Scans the free list; if nothing fits, merges contiguous free blocks
    /// and scans once more. `alignment` must be a power of two.
    pub fn allocate(&mut self, size: DeviceSize, alignment: DeviceSize) -> Option<MemoryBlock> {
        debug_assert!(size > 0 && alignment.is_power_of_two());

        if let Some(block) = self.try_allocate(size, alignment) {
            return Some(block);
        }
        if self.merge_contiguous_blocks() {
            return self.try_allocate(size, alignment);
        }
        None
    }

    fn try_allocate(&mut self, size: DeviceSize, alignment: DeviceSize) -> Option<MemoryBlock> {
        let (index, offset) = self.free.find_first_fit(size, alignment)?;
        self.free.take(index, offset, size);

        let block = MemoryBlock::new(
            self.memory,
            offset,
            size,
            self.memory_type_index,
            self.mapped,
            false,
        );

        #[cfg(feature = "alloc-track")]
        self.tracker.track_allocate(block.offset, block.size, size);

        debug!(
            memory = %self.memory,
            offset,
            size,
            alignment,
            free_bytes = self.free.free_bytes(),
            "Chunk allocation"
        );
        Some(block)
    }

    /// Return a block to the free list without coalescing
    pub fn free(&mut self, block: MemoryBlock) {
        debug_assert_eq!(block.memory, self.memory, "block freed to the wrong chunk");
        debug_assert!(block.end() <= self.total_size, "block outside chunk bounds");
        debug_assert!(
            !self.free.overlaps(block.offset, block.size),
            "double free of [{}, {})",
            block.offset,
            block.end()
        );

        #[cfg(feature = "alloc-track")]
        self.tracker.track_free(block.offset, block.size);

        self.free
            .insert(FreeBlock::new(block.offset, block.size));

        debug!(
            memory = %self.memory,
            offset = block.offset,
            size = block.size,
            free_blocks = self.free.len(),
            "Chunk free"
        );
    }

    /// Collapse runs of touching free blocks; true if any merged
    pub fn merge_contiguous_blocks(&mut self) -> bool {
        let before = self.free.len();
        let merged = self.free.merge_contiguous();
        if merged {
            debug!(
                memory = %self.memory,
                before,
                after = self.free.len(),
                "Merged contiguous free blocks"
            );
        }
        merged
    }

    /// True iff the free list is one block spanning the whole chunk
    #[inline]
    pub fn is_full_free_block(&self) -> bool {
        self.free.is_single_span(self.total_size)
    }

    /// True when no bytes are allocated, merged or not
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.free.free_bytes() == self.total_size
    }

    #[inline]
    pub fn memory(&self) -> DeviceMemoryHandle {
        self.memory
    }

    #[inline]
    pub fn memory_type_index(&self) -> MemoryTypeIndex {
        self.memory_type_index
    }

    #[inline]
    pub fn total_size(&self) -> DeviceSize {
        self.total_size
    }

    #[inline]
    pub fn is_persistent_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Span of the whole chunk when persistently mapped
    #[inline]
    pub fn mapping(&self) -> Option<MappedSpan> {
        self.mapped
    }

    #[inline]
    pub fn free_bytes(&self) -> DeviceSize {
        self.free.free_bytes()
    }

    #[inline]
    pub fn live_bytes(&self) -> DeviceSize {
        self.total_size - self.free.free_bytes()
    }

    #[inline]
    pub fn free_block_count(&self) -> usize {
        self.free.len()
    }

    /// Free list in offset order
    #[inline]
    pub fn free_blocks(&self) -> &[FreeBlock] {
        self.free.as_slice()
    }

    /// Release the native allocation; outstanding blocks become invalid
    pub fn dispose<D: MemoryDevice + ?Sized>(self, device: &D) {
        info!(
            memory = %self.memory,
            memory_type_index = self.memory_type_index,
            size = self.total_size,
            live_bytes = self.live_bytes(),
            "Disposing memory chunk"
        );
        device.free_memory(self.memory);
    }
}

impl std::fmt::Debug for ChunkAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ChunkAllocator")
            .field("memory", &self.memory)
            .field("memory_type_index", &self.memory_type_index)
            .field("total_size", &self.total_size)
            .field("persistent_mapped", &self.mapped.is_some())
            .field("free_blocks", &self.free.len())
            .field("free_bytes", &self.free.free_bytes())
            .finish()
    }
}
