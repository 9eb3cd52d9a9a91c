/*!
 * Device Memory Allocation
 * Request routing, chunk path and symmetric free
 */

use super::DeviceMemoryManager;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::types::{align_up, DeviceSize, MemoryTypeIndex};
use crate::device::{MemoryDevice, MemoryProperties};
use crate::memory::selector::find_memory_type;
use crate::memory::types::{AllocationRequest, MemoryBlock};
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

impl<D: MemoryDevice> DeviceMemoryManager<D> {
    /// Allocate device memory for a resource
    ///
    /// Resolves the memory type, then either performs a dedicated native
    /// allocation or sub-allocates from the matching chunk set.
    pub fn allocate(
        &self,
        properties: &MemoryProperties,
        request: &AllocationRequest,
    ) -> MemoryResult<MemoryBlock> {
        let _live = self.enter()?;

        if !request.is_valid() {
            return Err(MemoryError::InvalidRequest {
                size: request.size,
                alignment: request.alignment,
            });
        }

        let memory_type_index =
            find_memory_type(properties, request.memory_type_bits, request.property_flags)
                .ok_or_else(|| {
                    warn!(
                        type_bits = request.memory_type_bits,
                        required = ?request.property_flags,
                        "No suitable memory type"
                    );
                    MemoryError::NoSuitableMemoryType {
                        type_bits: request.memory_type_bits,
                        required: request.property_flags,
                    }
                })?;

        if self.routes_dedicated(request) {
            self.allocate_dedicated(memory_type_index, request)
        } else {
            self.allocate_from_chunks(memory_type_index, request)
        }
    }

    /// Whether a request bypasses the chunk sets
    #[inline]
    pub fn routes_dedicated(&self, request: &AllocationRequest) -> bool {
        request.dedicated
            || request.size >= self.config.dedicated_threshold(request.persistent_mapped)
    }

    fn allocate_from_chunks(
        &self,
        memory_type_index: MemoryTypeIndex,
        request: &AllocationRequest,
    ) -> MemoryResult<MemoryBlock> {
        let set = self.set_for(memory_type_index, request.persistent_mapped);
        let block = set
            .allocate(self.device.as_ref(), request.size, request.alignment)
            .map_err(|e| {
                error!(
                    memory_type_index,
                    size = request.size,
                    alignment = request.alignment,
                    persistent_mapped = request.persistent_mapped,
                    error = %e,
                    "Chunk allocation failed"
                );
                e
            })?;

        let charged = self.charged_size(block.size());
        self.allocated_bytes.fetch_add(charged, Ordering::Relaxed);

        debug!(
            memory = %block.memory(),
            offset = block.offset(),
            size = block.size(),
            memory_type_index,
            charged,
            "Allocated from chunk"
        );
        Ok(block)
    }

    /// Return a block to the allocator it came from
    ///
    /// Dedicated blocks release their native allocation immediately; chunk
    /// blocks go back to their chunk's free list.
    pub fn free(&self, block: MemoryBlock) -> MemoryResult<()> {
        let _live = self.enter()?;

        if block.is_dedicated() {
            return self.free_dedicated(block);
        }

        let key = (block.memory_type_index(), block.is_persistent_mapped());
        let set = match self.sets.get(&key) {
            Some(set) => std::sync::Arc::clone(set.value()),
            None => {
                warn!(
                    memory = %block.memory(),
                    memory_type_index = block.memory_type_index(),
                    "Free of block with no matching chunk set"
                );
                return Err(MemoryError::UnknownAllocation(block.memory()));
            }
        };

        let charged = self.charged_size(block.size());
        set.free(block)?;
        self.allocated_bytes.fetch_sub(charged, Ordering::Relaxed);
        Ok(())
    }

    /// Bytes a chunk allocation adds to the running counter
    #[inline]
    fn charged_size(&self, size: DeviceSize) -> DeviceSize {
        align_up(size, self.config.chunk_granularity)
    }
}
