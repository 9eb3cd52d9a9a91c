/*!
 * Device Module
 * Native memory API boundary consumed by the allocator
 */

mod host;

pub use host::{HostDeviceCounters, HostMemoryDevice};

use crate::core::errors::DeviceError;
use crate::core::limits::{DEFAULT_BUFFER_IMAGE_GRANULARITY, MAX_MEMORY_TYPES};
use crate::core::types::{DedicatedOwner, DeviceMemoryHandle, DeviceSize, MemoryTypeIndex};
use serde::{Deserialize, Serialize};
use std::ptr::NonNull;

bitflags::bitflags! {
    /// Memory type property flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MemoryPropertyFlags: u32 {
        /// Memory is device-local (VRAM)
        const DEVICE_LOCAL = 1 << 0;
        /// Memory can be mapped for host access
        const HOST_VISIBLE = 1 << 1;
        /// Host writes need no explicit flush
        const HOST_COHERENT = 1 << 2;
        /// Memory is cached on the host
        const HOST_CACHED = 1 << 3;
        /// Backing may be committed lazily
        const LAZILY_ALLOCATED = 1 << 4;
        /// Memory is protected
        const PROTECTED = 1 << 5;
    }
}

/// One entry of the device's memory-type table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

impl MemoryType {
    pub const fn new(property_flags: MemoryPropertyFlags, heap_index: u32) -> Self {
        Self {
            property_flags,
            heap_index,
        }
    }
}

/// Memory properties reported by the device
///
/// Type order is significant: lower indices are preferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryProperties {
    pub memory_types: Vec<MemoryType>,
    pub buffer_image_granularity: DeviceSize,
}

impl MemoryProperties {
    pub fn new(memory_types: Vec<MemoryType>, buffer_image_granularity: DeviceSize) -> Self {
        debug_assert!(memory_types.len() <= MAX_MEMORY_TYPES);
        Self {
            memory_types,
            buffer_image_granularity: buffer_image_granularity.max(DEFAULT_BUFFER_IMAGE_GRANULARITY),
        }
    }

    /// Typical discrete GPU layout: device-local, host upload, host readback
    pub fn discrete() -> Self {
        Self::new(
            vec![
                MemoryType::new(MemoryPropertyFlags::DEVICE_LOCAL, 0),
                MemoryType::new(
                    MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                    1,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    2,
                ),
            ],
            1024,
        )
    }

    /// Flags of a memory type, if the index exists
    #[inline]
    pub fn flags(&self, memory_type_index: MemoryTypeIndex) -> Option<MemoryPropertyFlags> {
        self.memory_types
            .get(memory_type_index as usize)
            .map(|t| t.property_flags)
    }

    /// Bitmask with one bit per reported memory type
    #[inline]
    pub fn all_types_mask(&self) -> u32 {
        match self.memory_types.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }
}

/// Native device memory interface
///
/// Allocation through this trait is expensive and may be limited in count,
/// which is the reason the allocator sub-allocates.
pub trait MemoryDevice: Send + Sync {
    /// Allocate one native memory object
    fn allocate_memory(
        &self,
        memory_type_index: MemoryTypeIndex,
        size: DeviceSize,
        owner: Option<DedicatedOwner>,
    ) -> Result<DeviceMemoryHandle, DeviceError>;

    /// Release a native memory object (implicitly unmaps it)
    fn free_memory(&self, memory: DeviceMemoryHandle);

    /// Map `[offset, offset + size)` of a native memory object for host access
    fn map_memory(
        &self,
        memory: DeviceMemoryHandle,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<NonNull<u8>, DeviceError>;

    /// Ordered memory types and placement granularity
    fn memory_properties(&self) -> MemoryProperties;
}

impl<D: MemoryDevice + ?Sized> MemoryDevice for std::sync::Arc<D> {
    fn allocate_memory(
        &self,
        memory_type_index: MemoryTypeIndex,
        size: DeviceSize,
        owner: Option<DedicatedOwner>,
    ) -> Result<DeviceMemoryHandle, DeviceError> {
        (**self).allocate_memory(memory_type_index, size, owner)
    }

    fn free_memory(&self, memory: DeviceMemoryHandle) {
        (**self).free_memory(memory)
    }

    fn map_memory(
        &self,
        memory: DeviceMemoryHandle,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<NonNull<u8>, DeviceError> {
        (**self).map_memory(memory, offset, size)
    }

    fn memory_properties(&self) -> MemoryProperties {
        (**self).memory_properties()
    }
}
