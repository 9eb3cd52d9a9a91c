/*!
 * Chunk Reclamation Tests
 * Emptied chunks are released on the next allocation in their set
 */

use devmem_kernel::{
    AllocationRequest, AllocatorConfig, DeviceMemoryManager, HostMemoryDevice, MemoryProperties,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const CHUNK: u64 = 256 * 1024;

fn setup() -> (Arc<HostMemoryDevice>, DeviceMemoryManager<HostMemoryDevice>, MemoryProperties) {
    let device = Arc::new(HostMemoryDevice::default());
    let manager = DeviceMemoryManager::with_config(Arc::clone(&device), AllocatorConfig::compact())
        .expect("compact config is valid");
    (device, manager, MemoryProperties::discrete())
}

fn request(size: u64) -> AllocationRequest {
    AllocationRequest::new(size, 256, 0b1)
}

#[test]
fn test_emptied_chunk_released_on_next_allocate() {
    let (device, manager, props) = setup();

    // Two chunks: the first completely full, the second half used
    let full = manager.allocate(&props, &request(CHUNK - 1)).unwrap();
    let first_half = manager.allocate(&props, &request(CHUNK / 4)).unwrap();
    let second_half = manager.allocate(&props, &request(CHUNK / 4)).unwrap();
    let emptied = first_half.memory();
    assert_eq!(second_half.memory(), emptied);
    assert_eq!(manager.chunk_count(0, false), 2);

    manager.free(first_half).unwrap();
    manager.free(second_half).unwrap();
    // Nothing is released until the set is used again
    assert_eq!(manager.chunk_count(0, false), 2);
    assert_eq!(device.allocation_size(emptied), Some(CHUNK));

    let next = manager.allocate(&props, &request(64)).unwrap();
    assert_eq!(device.allocation_size(emptied), None);
    assert_ne!(next.memory(), emptied);

    manager.free(full).unwrap();
    manager.free(next).unwrap();
}

#[test]
fn test_sole_chunk_is_kept_and_reused() {
    let (device, manager, props) = setup();

    let blocks: Vec<_> = (0..16)
        .map(|_| manager.allocate(&props, &request(1024)).unwrap())
        .collect();
    let memory = blocks[0].memory();
    for block in blocks {
        manager.free(block).unwrap();
    }

    // Too large for the tail, so the scan only succeeds after coalescing
    let reused = manager.allocate(&props, &request(CHUNK - 1024)).unwrap();
    assert_eq!(reused.memory(), memory);
    assert_eq!(reused.offset(), 0);
    assert_eq!(manager.chunk_count(0, false), 1);
    assert_eq!(device.counters().allocations, 1);
    assert_eq!(device.counters().frees, 0);

    manager.free(reused).unwrap();
}

#[test]
fn test_all_unused_chunks_collapse_to_one() {
    let (device, manager, props) = setup();

    let blocks: Vec<_> = (0..4)
        .map(|_| manager.allocate(&props, &request(CHUNK - 1024)).unwrap())
        .collect();
    assert_eq!(manager.chunk_count(0, false), 4);
    for block in blocks {
        manager.free(block).unwrap();
    }

    let block = manager.allocate(&props, &request(512)).unwrap();
    assert_eq!(manager.chunk_count(0, false), 1);
    assert_eq!(device.counters().frees, 3);
    assert_eq!(device.counters().live_objects, 1);

    manager.free(block).unwrap();
}

#[test]
fn test_reclamation_is_per_set() {
    let (device, manager, props) = setup();

    let unmapped_full = manager.allocate(&props, &request(CHUNK - 1)).unwrap();
    let unmapped_spare = manager.allocate(&props, &request(1024)).unwrap();
    manager.free(unmapped_spare).unwrap();
    assert_eq!(manager.chunk_count(0, false), 2);

    // Another set's allocation leaves this set untouched
    let other = manager
        .allocate(&props, &AllocationRequest::new(1024, 256, 0b1000))
        .unwrap();
    assert_eq!(other.memory_type_index(), 3);
    assert_eq!(manager.chunk_count(0, false), 2);
    assert_eq!(device.counters().frees, 0);

    manager.free(unmapped_full).unwrap();
    manager.free(other).unwrap();
}
