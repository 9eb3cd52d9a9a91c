/*!
 * Memory Traits
 * Device memory management abstractions
 */

use super::types::*;
use crate::core::errors::MemoryResult;
use crate::device::MemoryProperties;

/// Device memory allocator interface used by the resource layer
pub trait DeviceAllocator: Send + Sync {
    /// Allocate a block satisfying `request`
    fn allocate(
        &self,
        properties: &MemoryProperties,
        request: &AllocationRequest,
    ) -> MemoryResult<MemoryBlock>;

    /// Return a block to the allocator
    fn free(&self, block: MemoryBlock) -> MemoryResult<()>;
}

/// Memory statistics provider
pub trait MemoryInfo: Send + Sync {
    /// Get overall memory statistics
    fn stats(&self) -> MemoryStats;

    /// Running total of allocated bytes
    fn allocated_bytes(&self) -> u64 {
        self.stats().allocated_bytes
    }
}
