/*!
 * Memory Module
 * Device memory sub-allocation
 */

pub mod chunk;
pub mod manager;
pub mod selector;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use chunk::{ChunkAllocator, ChunkAllocatorSet, ChunkSetUsage, FreeBlock};
pub use manager::DeviceMemoryManager;
pub use selector::find_memory_type;
pub use traits::*;
pub use types::*;
