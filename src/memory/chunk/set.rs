/*!
 * Chunk Allocator Set
 * All chunks for one (memory type, mapped-ness) pair behind one lock
 */

use super::ChunkAllocator;
use crate::core::errors::{DeviceError, MemoryError, MemoryResult};
use crate::core::types::{DeviceMemoryHandle, DeviceSize, MappedSpan, MemoryTypeIndex};
use crate::device::MemoryDevice;
use crate::memory::types::MemoryBlock;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Snapshot of a set's chunk usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSetUsage {
    pub chunks: usize,
    pub reserved_bytes: DeviceSize,
    pub free_bytes: DeviceSize,
}

/// Growable collection of chunks sharing a memory type and mapped-ness
pub struct ChunkAllocatorSet {
    memory_type_index: MemoryTypeIndex,
    persistent_mapped: bool,
    chunk_size: DeviceSize,
    chunks: Mutex<Vec<ChunkAllocator>>,
}

impl ChunkAllocatorSet {
    pub fn new(
        memory_type_index: MemoryTypeIndex,
        persistent_mapped: bool,
        chunk_size: DeviceSize,
    ) -> Self {
        Self {
            memory_type_index,
            persistent_mapped,
            chunk_size,
            chunks: Mutex::new(Vec::new()),
        }
    }

    /// Allocate from the first chunk that fits, creating one if none does
    ///
    /// Chunks emptied by earlier frees are reclaimed on the way: before the
    /// scan every unused chunk is disposed (one is kept if all are unused).
    /// A chunk that fails the request while forming one full free block is
    /// disposed as well; after the pre-scan pass that can only be the kept
    /// chunk facing a request larger than any chunk of this set.
    pub fn allocate<D: MemoryDevice + ?Sized>(
        &self,
        device: &D,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<MemoryBlock> {
        let mut chunks = self.chunks.lock();
        Self::reclaim_unused(&mut chunks, device);

        let mut index = 0;
        while index < chunks.len() {
            if let Some(block) = chunks[index].allocate(size, alignment) {
                return Ok(block);
            }

            // The failed attempt may have merged the chunk into one free block
            if chunks[index].is_full_free_block() {
                let chunk = chunks.remove(index);
                chunk.dispose(device);
                continue;
            }
            index += 1;
        }

        let mut chunk = ChunkAllocator::new(
            device,
            self.memory_type_index,
            self.persistent_mapped,
            self.chunk_size,
        )?;

        match chunk.allocate(size, alignment) {
            Some(block) => {
                chunks.push(chunk);
                debug!(
                    memory_type_index = self.memory_type_index,
                    persistent_mapped = self.persistent_mapped,
                    chunks = chunks.len(),
                    "Allocated from new chunk"
                );
                Ok(block)
            }
            None => {
                chunk.dispose(device);
                warn!(
                    memory_type_index = self.memory_type_index,
                    size,
                    alignment,
                    chunk_size = self.chunk_size,
                    "Request does not fit a fresh chunk"
                );
                Err(MemoryError::NativeAllocationFailure {
                    memory_type_index: self.memory_type_index,
                    size,
                    source: DeviceError::OutOfDeviceMemory,
                })
            }
        }
    }

    /// Return a block to the chunk that owns its native allocation
    pub fn free(&self, block: MemoryBlock) -> MemoryResult<()> {
        let mut chunks = self.chunks.lock();
        match chunks.iter_mut().find(|c| c.memory() == block.memory()) {
            Some(chunk) => {
                chunk.free(block);
                Ok(())
            }
            None => {
                warn!(
                    memory = %block.memory(),
                    offset = block.offset(),
                    memory_type_index = self.memory_type_index,
                    "Free of block from unknown chunk"
                );
                Err(MemoryError::UnknownAllocation(block.memory()))
            }
        }
    }

    /// Whether a live chunk of this set is `memory` mapped at `span`
    pub fn owns_mapping(&self, memory: DeviceMemoryHandle, span: MappedSpan) -> bool {
        self.chunks
            .lock()
            .iter()
            .any(|c| c.memory() == memory && c.mapping() == Some(span))
    }

    /// Release every chunk; returns how many were released
    pub fn dispose<D: MemoryDevice + ?Sized>(&self, device: &D) -> usize {
        let mut chunks = self.chunks.lock();
        let count = chunks.len();
        for chunk in chunks.drain(..) {
            chunk.dispose(device);
        }
        count
    }

    fn reclaim_unused<D: MemoryDevice + ?Sized>(chunks: &mut Vec<ChunkAllocator>, device: &D) {
        // Keep one chunk around when nothing else would remain
        let mut keep_one = chunks.iter().all(ChunkAllocator::is_unused);
        let mut reclaimed = 0;
        let mut index = 0;

        while index < chunks.len() {
            if chunks[index].is_unused() {
                if keep_one {
                    keep_one = false;
                } else {
                    let chunk = chunks.remove(index);
                    chunk.dispose(device);
                    reclaimed += 1;
                    continue;
                }
            }
            index += 1;
        }

        if reclaimed > 0 {
            info!(reclaimed, remaining = chunks.len(), "Reclaimed unused chunks");
        }
    }

    #[inline]
    pub fn memory_type_index(&self) -> MemoryTypeIndex {
        self.memory_type_index
    }

    #[inline]
    pub fn is_persistent_mapped(&self) -> bool {
        self.persistent_mapped
    }

    #[inline]
    pub fn chunk_size(&self) -> DeviceSize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn usage(&self) -> ChunkSetUsage {
        let chunks = self.chunks.lock();
        ChunkSetUsage {
            chunks: chunks.len(),
            reserved_bytes: chunks.iter().map(ChunkAllocator::total_size).sum(),
            free_bytes: chunks.iter().map(ChunkAllocator::free_bytes).sum(),
        }
    }
}

impl std::fmt::Debug for ChunkAllocatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ChunkAllocatorSet")
            .field("memory_type_index", &self.memory_type_index)
            .field("persistent_mapped", &self.persistent_mapped)
            .field("chunk_size", &self.chunk_size)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}
