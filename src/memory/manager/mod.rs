/*!
 * Device Memory Manager
 *
 * Façade the resource layer allocates device memory through.
 *
 * ## Routing
 *
 * - **Dedicated path**: requests that ask for standalone backing, or whose
 *   size reaches the threshold for their mapped-ness, get exactly one native
 *   allocation (mapped immediately when persistently mapped)
 * - **Chunk path**: everything else is sub-allocated from the chunk set for
 *   its (memory type, mapped-ness) pair; sets create chunks on demand
 *
 * ## Concurrency
 *
 * - Each chunk set has its own lock, so distinct pairs never contend
 * - The set map is a sharded `DashMap`; set handles are cloned out of it
 *   before any native call is made
 * - The allocated-byte counter is a plain atomic, independent of set locks
 * - `allocate`, `free` and mapped host access hold a shared lifecycle lock;
 *   `dispose` takes it exclusively, so teardown never interleaves with an
 *   in-flight native allocation or a copy into mapped memory
 */

mod allocator;
mod dedicated;
mod mapped;

use super::chunk::ChunkAllocatorSet;
use super::traits::{DeviceAllocator, MemoryInfo};
use super::types::{AllocationRequest, MemoryBlock, MemoryStats};
use crate::core::config::AllocatorConfig;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::types::{
    DedicatedOwner, DeviceMemoryHandle, DeviceSize, MappedSpan, MemoryTypeIndex,
};
use crate::device::{MemoryDevice, MemoryProperties};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Chunk sets are keyed by memory type and mapped-ness
type SetKey = (MemoryTypeIndex, bool);

/// Bookkeeping for one live dedicated allocation
#[derive(Debug, Clone, Copy)]
struct DedicatedAllocation {
    memory_type_index: MemoryTypeIndex,
    size: DeviceSize,
    owner: Option<DedicatedOwner>,
    mapped: Option<MappedSpan>,
}

/// Device-scoped memory manager
///
/// Created at device initialization and disposed at teardown; disposal (or
/// drop) releases every chunk and dedicated allocation still alive.
pub struct DeviceMemoryManager<D: MemoryDevice> {
    device: Arc<D>,
    config: AllocatorConfig,
    buffer_image_granularity: DeviceSize,
    sets: DashMap<SetKey, Arc<ChunkAllocatorSet>, RandomState>,
    dedicated: DashMap<DeviceMemoryHandle, DedicatedAllocation, RandomState>,
    allocated_bytes: AtomicU64,
    disposed: AtomicBool,
    lifecycle: RwLock<()>,
}

impl<D: MemoryDevice> DeviceMemoryManager<D> {
    /// Create a manager with the default configuration
    pub fn new(device: Arc<D>) -> Self {
        Self::build(device, AllocatorConfig::default())
    }

    /// Create a manager with a custom configuration
    pub fn with_config(device: Arc<D>, config: AllocatorConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self::build(device, config))
    }

    fn build(device: Arc<D>, config: AllocatorConfig) -> Self {
        let properties = device.memory_properties();
        info!(
            memory_types = properties.memory_types.len(),
            buffer_image_granularity = properties.buffer_image_granularity,
            mapped_chunk_size = config.persistent_mapped_chunk_size,
            unmapped_chunk_size = config.unmapped_chunk_size,
            "Device memory manager initialized"
        );
        Self {
            device,
            buffer_image_granularity: properties.buffer_image_granularity,
            config,
            sets: DashMap::with_hasher(RandomState::new()),
            dedicated: DashMap::with_hasher(RandomState::new()),
            allocated_bytes: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            lifecycle: RwLock::new(()),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[inline]
    pub fn buffer_image_granularity(&self) -> DeviceSize {
        self.buffer_image_granularity
    }

    /// Memory properties as currently reported by the device
    pub fn memory_properties(&self) -> MemoryProperties {
        self.device.memory_properties()
    }

    /// Running total of allocated bytes
    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Number of live chunks for one (memory type, mapped-ness) pair
    pub fn chunk_count(&self, memory_type_index: MemoryTypeIndex, persistent_mapped: bool) -> usize {
        self.sets
            .get(&(memory_type_index, persistent_mapped))
            .map_or(0, |set| set.chunk_count())
    }

    /// Number of live dedicated allocations
    pub fn dedicated_count(&self) -> usize {
        self.dedicated.len()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            allocated_bytes: self.allocated_bytes(),
            allocator_sets: self.sets.len(),
            ..Default::default()
        };

        for entry in self.sets.iter() {
            let usage = entry.value().usage();
            stats.chunk_count += usage.chunks;
            stats.chunk_reserved_bytes += usage.reserved_bytes;
            stats.chunk_free_bytes += usage.free_bytes;
        }
        for entry in self.dedicated.iter() {
            stats.dedicated_count += 1;
            stats.dedicated_bytes += entry.value().size;
        }
        stats
    }

    /// Release every chunk and dedicated allocation
    ///
    /// Blocks not freed beforehand become invalid. Later calls are no-ops and
    /// later allocations fail with `Disposed`. Waits for in-flight
    /// allocations, frees and mapped copies to finish.
    pub fn dispose(&self) {
        let _exclusive = self.lifecycle.write();
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut chunks = 0;
        for entry in self.sets.iter() {
            chunks += entry.value().dispose(self.device.as_ref());
        }
        self.sets.clear();

        let handles: Vec<DeviceMemoryHandle> = self.dedicated.iter().map(|e| *e.key()).collect();
        for handle in &handles {
            if self.dedicated.remove(handle).is_some() {
                self.device.free_memory(*handle);
            }
        }

        let outstanding = self.allocated_bytes.swap(0, Ordering::SeqCst);
        info!(
            chunks,
            dedicated = handles.len(),
            outstanding_bytes = outstanding,
            "Device memory manager disposed"
        );
    }

    /// Shared lifecycle guard, held for the whole operation
    ///
    /// Fails with `Disposed` once teardown has happened; while the guard is
    /// held `dispose` cannot start.
    #[inline]
    fn enter(&self) -> MemoryResult<RwLockReadGuard<'_, ()>> {
        let guard = self.lifecycle.read();
        if self.is_disposed() {
            return Err(MemoryError::Disposed);
        }
        Ok(guard)
    }

    /// Shared chunk set for a pair, created on first use
    fn set_for(&self, memory_type_index: MemoryTypeIndex, persistent_mapped: bool) -> Arc<ChunkAllocatorSet> {
        let key = (memory_type_index, persistent_mapped);
        if let Some(set) = self.sets.get(&key) {
            return Arc::clone(set.value());
        }
        let set = self.sets.entry(key).or_insert_with(|| {
            Arc::new(ChunkAllocatorSet::new(
                memory_type_index,
                persistent_mapped,
                self.config.chunk_size(persistent_mapped),
            ))
        });
        Arc::clone(set.value())
    }
}

impl<D: MemoryDevice> DeviceAllocator for DeviceMemoryManager<D> {
    fn allocate(
        &self,
        properties: &MemoryProperties,
        request: &AllocationRequest,
    ) -> MemoryResult<MemoryBlock> {
        DeviceMemoryManager::allocate(self, properties, request)
    }

    fn free(&self, block: MemoryBlock) -> MemoryResult<()> {
        DeviceMemoryManager::free(self, block)
    }
}

impl<D: MemoryDevice> MemoryInfo for DeviceMemoryManager<D> {
    fn stats(&self) -> MemoryStats {
        DeviceMemoryManager::stats(self)
    }

    fn allocated_bytes(&self) -> u64 {
        DeviceMemoryManager::allocated_bytes(self)
    }
}

impl<D: MemoryDevice> Drop for DeviceMemoryManager<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<D: MemoryDevice> std::fmt::Debug for DeviceMemoryManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DeviceMemoryManager")
            .field("config", &self.config)
            .field("buffer_image_granularity", &self.buffer_image_granularity)
            .field("allocator_sets", &self.sets.len())
            .field("dedicated", &self.dedicated.len())
            .field("allocated_bytes", &self.allocated_bytes())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
