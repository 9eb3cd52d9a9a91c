/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{DeviceMemoryHandle, DeviceSize, MemoryTypeIndex};
use crate::device::MemoryPropertyFlags;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Failures reported by the native memory API
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum DeviceError {
    #[error("Out of device memory")]
    #[diagnostic(code(device::out_of_device_memory))]
    OutOfDeviceMemory,

    #[error("Out of host memory")]
    #[diagnostic(code(device::out_of_host_memory))]
    OutOfHostMemory,

    #[error("Memory map failed")]
    #[diagnostic(code(device::memory_map_failed))]
    MemoryMapFailed,

    #[error("Memory type {0} is not host visible")]
    #[diagnostic(
        code(device::not_host_visible),
        help("Persistently mapped allocations need a HOST_VISIBLE memory type.")
    )]
    NotHostVisible(MemoryTypeIndex),

    #[error("Invalid memory type index {0}")]
    #[diagnostic(code(device::invalid_memory_type))]
    InvalidMemoryType(MemoryTypeIndex),

    #[error("Invalid device memory handle {0}")]
    #[diagnostic(code(device::invalid_handle))]
    InvalidHandle(DeviceMemoryHandle),
}

/// Allocator errors
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum MemoryError {
    #[error("No suitable memory type for type bits {type_bits:#b} with flags {required:?}")]
    #[diagnostic(
        code(memory::no_suitable_memory_type),
        help("The resource cannot be created with the requested memory properties. Relax the required flags.")
    )]
    NoSuitableMemoryType {
        type_bits: u32,
        required: MemoryPropertyFlags,
    },

    #[error("Unable to allocate {size} bytes of memory type {memory_type_index}: {source}")]
    #[diagnostic(
        code(memory::native_allocation_failure),
        help("The device refused the allocation. Free resources before retrying.")
    )]
    NativeAllocationFailure {
        memory_type_index: MemoryTypeIndex,
        size: DeviceSize,
        #[source]
        source: DeviceError,
    },

    #[error("Unable to map {size} bytes of memory type {memory_type_index}: {source}")]
    #[diagnostic(code(memory::native_mapping_failure))]
    NativeMappingFailure {
        memory_type_index: MemoryTypeIndex,
        size: DeviceSize,
        #[source]
        source: DeviceError,
    },

    #[error("Invalid allocation request: size {size}, alignment {alignment}")]
    #[diagnostic(
        code(memory::invalid_request),
        help("Size must be non-zero and alignment a power of two.")
    )]
    InvalidRequest {
        size: DeviceSize,
        alignment: DeviceSize,
    },

    #[error("Block does not belong to any live allocation: {0}")]
    #[diagnostic(
        code(memory::unknown_allocation),
        help("The block was already freed or came from another manager.")
    )]
    UnknownAllocation(DeviceMemoryHandle),

    #[error("Block in {0} is not persistently mapped")]
    #[diagnostic(
        code(memory::not_mapped),
        help("Request the allocation with persistent_mapped(true) to access it from the host.")
    )]
    NotMapped(DeviceMemoryHandle),

    #[error("Mapped range [{offset}, {offset} + {len}) exceeds block of {size} bytes")]
    #[diagnostic(code(memory::mapped_range_out_of_bounds))]
    MappedRangeOutOfBounds {
        offset: DeviceSize,
        len: DeviceSize,
        size: DeviceSize,
    },

    #[error("Memory manager has been disposed")]
    #[diagnostic(code(memory::disposed))]
    Disposed,

    #[error("Invalid allocator configuration: {0}")]
    #[diagnostic(code(memory::invalid_config))]
    InvalidConfig(String),

    #[error("Allocator invariant violated: {0}")]
    #[diagnostic(code(memory::invariant_violation))]
    InvariantViolation(String),
}

impl MemoryError {
    /// Whether the error came from the native API rather than the caller
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            MemoryError::NativeAllocationFailure { .. } | MemoryError::NativeMappingFailure { .. }
        )
    }
}
