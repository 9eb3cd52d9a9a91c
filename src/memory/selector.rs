/*!
 * Memory Type Selection
 */

use crate::core::limits::MAX_MEMORY_TYPES;
use crate::core::types::MemoryTypeIndex;
use crate::device::{MemoryProperties, MemoryPropertyFlags};

/// First memory type allowed by `type_bits` whose flags contain `required`
///
/// Types are scanned in the order the device reports them, which puts the
/// preferred types first.
pub fn find_memory_type(
    properties: &MemoryProperties,
    type_bits: u32,
    required: MemoryPropertyFlags,
) -> Option<MemoryTypeIndex> {
    properties
        .memory_types
        .iter()
        .enumerate()
        .take(MAX_MEMORY_TYPES)
        .find(|(i, memory_type)| {
            type_bits & (1u32 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as MemoryTypeIndex)
}
