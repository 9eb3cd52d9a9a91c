/*!
 * Dedicated Allocations
 * One native allocation per block for oversized or owner-tied resources
 */

use super::{DedicatedAllocation, DeviceMemoryManager};
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::types::{align_up, MappedSpan, MemoryTypeIndex};
use crate::device::MemoryDevice;
use crate::memory::types::{AllocationRequest, MemoryBlock};
use crate::monitoring::NativeCallSpan;
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

impl<D: MemoryDevice> DeviceMemoryManager<D> {
    pub(super) fn allocate_dedicated(
        &self,
        memory_type_index: MemoryTypeIndex,
        request: &AllocationRequest,
    ) -> MemoryResult<MemoryBlock> {
        // Unowned allocations may end up next to other resources
        let size = if self
            .config
            .placement_rounding
            .applies(request.owner.is_some())
        {
            align_up(request.size, self.buffer_image_granularity)
        } else {
            request.size
        };

        let native = {
            let _call = NativeCallSpan::new("allocate_memory", memory_type_index, size);
            self.device
                .allocate_memory(memory_type_index, size, request.owner)
        };
        let memory = native.map_err(|source| {
            error!(
                memory_type_index,
                size,
                owner = ?request.owner,
                error = %source,
                "Dedicated allocation refused by device"
            );
            MemoryError::NativeAllocationFailure {
                memory_type_index,
                size,
                source,
            }
        })?;

        let mapped = if request.persistent_mapped {
            let _call = NativeCallSpan::new("map_memory", memory_type_index, size);
            match self.device.map_memory(memory, 0, size) {
                // SAFETY: the mapping lives until `free_memory` for this handle,
                // which only runs when the block is freed or the manager disposed.
                Ok(ptr) => Some(unsafe { MappedSpan::new(ptr, size) }),
                Err(source) => {
                    self.device.free_memory(memory);
                    error!(
                        memory_type_index,
                        size,
                        error = %source,
                        "Unable to map dedicated allocation"
                    );
                    return Err(MemoryError::NativeMappingFailure {
                        memory_type_index,
                        size,
                        source,
                    });
                }
            }
        } else {
            None
        };

        self.dedicated.insert(
            memory,
            DedicatedAllocation {
                memory_type_index,
                size,
                owner: request.owner,
                mapped,
            },
        );
        self.allocated_bytes.fetch_add(size, Ordering::Relaxed);

        debug!(
            %memory,
            memory_type_index,
            requested = request.size,
            size,
            owner = ?request.owner,
            persistent_mapped = request.persistent_mapped,
            "Dedicated allocation"
        );

        Ok(MemoryBlock::new(
            memory,
            0,
            size,
            memory_type_index,
            mapped,
            true,
        ))
    }

    pub(super) fn free_dedicated(&self, block: MemoryBlock) -> MemoryResult<()> {
        let Some((memory, allocation)) = self.dedicated.remove(&block.memory()) else {
            warn!(
                memory = %block.memory(),
                size = block.size(),
                "Free of unknown dedicated allocation"
            );
            return Err(MemoryError::UnknownAllocation(block.memory()));
        };

        debug_assert_eq!(allocation.size, block.size());
        self.device.free_memory(memory);
        self.allocated_bytes
            .fetch_sub(allocation.size, Ordering::Relaxed);

        debug!(
            %memory,
            memory_type_index = allocation.memory_type_index,
            size = allocation.size,
            owner = ?allocation.owner,
            "Released dedicated allocation"
        );
        Ok(())
    }
}
