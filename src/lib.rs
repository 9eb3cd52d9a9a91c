/*!
 * Device Memory Kernel Library
 * Sub-allocation of GPU device memory out of large native chunks
 */

pub mod core;
pub mod device;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::config::{AllocatorConfig, PlacementRounding};
pub use crate::core::errors::{DeviceError, MemoryError, MemoryResult};
pub use crate::core::types::{
    align_up, DedicatedOwner, DeviceMemoryHandle, DeviceSize, MappedSpan, MemoryTypeIndex,
};
pub use device::{
    HostDeviceCounters, HostMemoryDevice, MemoryDevice, MemoryProperties, MemoryPropertyFlags,
    MemoryType,
};
pub use memory::{
    find_memory_type, AllocationRequest, ChunkAllocator, ChunkAllocatorSet, DeviceAllocator,
    DeviceMemoryManager, MemoryBlock, MemoryInfo, MemoryStats,
};
pub use monitoring::{init_tracing, NativeCallSpan};
