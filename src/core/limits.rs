/*!
 * Allocator Limits and Constants
 *
 * Centralized location for chunk sizes, dedicated-allocation thresholds and
 * granularities. Values are grouped by concern.
 */

use super::types::DeviceSize;

// =============================================================================
// CHUNK SIZES
// =============================================================================

/// Chunk size for persistently mapped memory (1MB)
/// Host-visible heaps are small on most devices, so mapped chunks stay small
pub const PERSISTENT_MAPPED_CHUNK_SIZE: DeviceSize = 1024 * 1024;

/// Chunk size for unmapped memory (8MB)
/// [PERF] Larger chunks amortize the native allocation call
pub const UNMAPPED_CHUNK_SIZE: DeviceSize = 8 * 1024 * 1024;

// =============================================================================
// DEDICATED ALLOCATION THRESHOLDS
// =============================================================================

/// Mapped requests at or above this size get their own native allocation
pub const PERSISTENT_MAPPED_DEDICATED_THRESHOLD: DeviceSize = PERSISTENT_MAPPED_CHUNK_SIZE;

/// Unmapped requests at or above this size get their own native allocation
pub const UNMAPPED_DEDICATED_THRESHOLD: DeviceSize = UNMAPPED_CHUNK_SIZE;

// =============================================================================
// GRANULARITY
// =============================================================================

/// Granularity used when charging chunk allocations to the running byte counter
pub const DEFAULT_CHUNK_GRANULARITY: DeviceSize = 256;

/// Fallback buffer/image placement granularity when the device reports none
pub const DEFAULT_BUFFER_IMAGE_GRANULARITY: DeviceSize = 1;

/// Maximum number of memory types a device can report
pub const MAX_MEMORY_TYPES: usize = 32;
