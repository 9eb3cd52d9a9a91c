/*!
 * Device Memory Manager Tests
 * Routing, accounting, mapping and teardown through the public API
 */

use devmem_kernel::{
    AllocationRequest, AllocatorConfig, DedicatedOwner, DeviceAllocator, DeviceMemoryManager,
    HostMemoryDevice, MemoryError, MemoryInfo, MemoryProperties, MemoryPropertyFlags,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

fn setup() -> (Arc<HostMemoryDevice>, DeviceMemoryManager<HostMemoryDevice>, MemoryProperties) {
    let device = Arc::new(HostMemoryDevice::default());
    let manager = DeviceMemoryManager::new(Arc::clone(&device));
    let properties = MemoryProperties::discrete();
    (device, manager, properties)
}

fn host_visible(size: u64) -> AllocationRequest {
    AllocationRequest::new(size, 16, 0b0110)
        .with_flags(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT)
        .persistent_mapped(true)
}

#[test]
fn test_unmapped_threshold_routing() {
    let (device, manager, props) = setup();

    let small = manager
        .allocate(&props, &AllocationRequest::new(2_000_000, 256, 0b1))
        .expect("chunk allocation");
    assert!(!small.is_dedicated());
    assert_eq!(device.allocation_size(small.memory()), Some(8 * MIB));

    let large = manager
        .allocate(&props, &AllocationRequest::new(9_000_000, 256, 0b1))
        .expect("dedicated allocation");
    assert!(large.is_dedicated());
    assert_eq!(large.offset(), 0);
    assert_eq!(device.allocation_size(large.memory()), Some(large.size()));

    manager.free(small).unwrap();
    manager.free(large).unwrap();
}

#[test]
fn test_routing_follows_threshold_boundary() {
    let (_device, manager, props) = setup();

    let cases = [
        (8 * MIB - 1, false, false),
        (8 * MIB, false, true),
        (MIB - 1, true, false),
        (MIB, true, true),
    ];
    for (size, mapped, expect_dedicated) in cases {
        let request = if mapped {
            host_visible(size)
        } else {
            AllocationRequest::new(size, 1, 0b1)
        };
        assert_eq!(manager.routes_dedicated(&request), expect_dedicated);

        let block = manager.allocate(&props, &request).unwrap();
        assert_eq!(
            block.is_dedicated(),
            expect_dedicated,
            "size={} mapped={}",
            size,
            mapped
        );
        manager.free(block).unwrap();
    }
}

#[test]
fn test_explicit_dedicated_bypasses_chunks() {
    let (device, manager, props) = setup();

    let block = manager
        .allocate(
            &props,
            &AllocationRequest::new(4096, 256, 0b1).dedicated_to(DedicatedOwner::Buffer(7)),
        )
        .unwrap();
    assert!(block.is_dedicated());
    assert_eq!(block.size(), 4096);
    assert_eq!(manager.chunk_count(0, false), 0);
    assert_eq!(device.counters().dedicated_allocations, 1);
    assert_eq!(
        device.allocation_owner(block.memory()),
        Some(DedicatedOwner::Buffer(7))
    );

    manager.free(block).unwrap();
    assert_eq!(device.counters().live_objects, 0);
}

#[test]
fn test_memory_type_selection() {
    let (device, manager, props) = setup();

    // Cached host memory only exists as type 2
    let request = AllocationRequest::new(256, 16, props.all_types_mask())
        .with_flags(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED);
    let block = manager.allocate(&props, &request).unwrap();
    assert_eq!(block.memory_type_index(), 2);
    assert_eq!(device.allocation_memory_type(block.memory()), Some(2));
    manager.free(block).unwrap();

    let impossible = AllocationRequest::new(256, 16, 0b0001)
        .with_flags(MemoryPropertyFlags::HOST_CACHED);
    assert!(matches!(
        manager.allocate(&props, &impossible),
        Err(MemoryError::NoSuitableMemoryType { .. })
    ));
}

#[test]
fn test_persistent_mapping_round_trip() {
    let (device, manager, props) = setup();

    let first = manager.allocate(&props, &host_visible(64)).unwrap();
    let second = manager.allocate(&props, &host_visible(64)).unwrap();
    assert_eq!(first.memory(), second.memory());
    assert_eq!(device.counters().maps, 1);

    manager.write_mapped(&first, 0, b"first block").unwrap();
    manager.write_mapped(&second, 0, b"second block").unwrap();

    let mut out = [0u8; 11];
    manager.read_mapped(&first, 0, &mut out).unwrap();
    assert_eq!(&out, b"first block");

    // Block-relative access is bounded by the block, not the chunk
    assert!(matches!(
        manager.write_mapped(&first, 60, &[0u8; 8]),
        Err(MemoryError::MappedRangeOutOfBounds { .. })
    ));
    assert!(matches!(
        manager.read_mapped(&first, 64, &mut [0u8; 1]),
        Err(MemoryError::MappedRangeOutOfBounds { .. })
    ));

    let base = first.base_mapping().expect("chunk mapping");
    assert_eq!(base.len(), MIB);
    let mut raw = [0u8; 12];
    // SAFETY: both blocks are still allocated from a live manager.
    assert!(unsafe { base.read(second.offset(), &mut raw) });
    assert_eq!(&raw, b"second block");

    manager.free(first).unwrap();
    manager.free(second).unwrap();
}

#[test]
fn test_unmapped_blocks_have_no_mapping() {
    let (_device, manager, props) = setup();

    let block = manager
        .allocate(&props, &AllocationRequest::new(64, 16, 0b1))
        .unwrap();
    assert!(!block.is_persistent_mapped());
    assert!(block.mapped_ptr().is_none());
    assert!(matches!(
        manager.write_mapped(&block, 0, &[1]),
        Err(MemoryError::NotMapped(_))
    ));
    manager.free(block).unwrap();
}

#[test]
fn test_counter_tracks_live_allocations() {
    let (_device, manager, props) = setup();

    let a = manager
        .allocate(&props, &AllocationRequest::new(1, 1, 0b1))
        .unwrap();
    let b = manager
        .allocate(&props, &AllocationRequest::new(300, 4, 0b1))
        .unwrap();
    let c = manager
        .allocate(&props, &AllocationRequest::new(9 * MIB, 4, 0b1))
        .unwrap();
    assert_eq!(manager.allocated_bytes(), 256 + 512 + 9 * MIB);

    manager.free(b).unwrap();
    assert_eq!(manager.allocated_bytes(), 256 + 9 * MIB);
    manager.free(c).unwrap();
    manager.free(a).unwrap();
    assert_eq!(manager.allocated_bytes(), 0);
}

#[test]
fn test_stats_snapshot() {
    let (_device, manager, props) = setup();

    let chunked = manager
        .allocate(&props, &AllocationRequest::new(1000, 8, 0b1))
        .unwrap();
    let mapped = manager.allocate(&props, &host_visible(2000)).unwrap();
    let dedicated = manager
        .allocate(&props, &AllocationRequest::new(4096, 8, 0b1).dedicated())
        .unwrap();

    let stats = manager.stats();
    assert_eq!(stats.allocator_sets, 2);
    assert_eq!(stats.chunk_count, 2);
    assert_eq!(stats.chunk_reserved_bytes, 8 * MIB + MIB);
    assert_eq!(stats.chunk_free_bytes, 9 * MIB - 3000);
    assert_eq!(stats.dedicated_count, 1);
    assert_eq!(stats.dedicated_bytes, 4096);
    assert!(stats.chunk_utilization() > 0.0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["dedicated_count"], 1);

    manager.free(chunked).unwrap();
    manager.free(mapped).unwrap();
    manager.free(dedicated).unwrap();
}

#[test]
fn test_free_rejects_foreign_blocks() {
    let (_device, manager, props) = setup();
    let (_other_device, other, _) = setup();

    let chunked = other
        .allocate(&props, &AllocationRequest::new(64, 4, 0b1))
        .unwrap();
    let dedicated = other
        .allocate(&props, &AllocationRequest::new(64, 4, 0b1).dedicated())
        .unwrap();

    assert!(matches!(
        manager.free(chunked),
        Err(MemoryError::UnknownAllocation(_))
    ));
    assert!(matches!(
        manager.free(dedicated),
        Err(MemoryError::UnknownAllocation(_))
    ));
}

#[test]
fn test_dispose_releases_everything() {
    let (device, manager, props) = setup();

    let mut leaked = Vec::new();
    for i in 0..8u64 {
        leaked.push(
            manager
                .allocate(&props, &AllocationRequest::new(1024 * (i + 1), 64, 0b1))
                .unwrap(),
        );
    }
    leaked.push(manager.allocate(&props, &host_visible(512)).unwrap());
    leaked.push(
        manager
            .allocate(&props, &AllocationRequest::new(12 * MIB, 64, 0b1))
            .unwrap(),
    );
    assert!(device.counters().live_objects >= 3);

    manager.dispose();
    assert!(manager.is_disposed());
    assert_eq!(device.counters().live_objects, 0);
    assert_eq!(device.counters().live_bytes, 0);
    assert_eq!(manager.allocated_bytes(), 0);

    // Idempotent
    manager.dispose();
    assert_eq!(
        device.counters().frees,
        device.counters().allocations
    );
}

#[test]
fn test_mapped_write_after_dispose_fails() {
    let (device, manager, props) = setup();

    let block = manager.allocate(&props, &host_visible(64)).unwrap();
    manager.write_mapped(&block, 0, &[0xAB; 64]).unwrap();

    manager.dispose();
    assert_eq!(device.counters().live_objects, 0);
    assert!(matches!(
        manager.write_mapped(&block, 0, &[0xAB; 64]),
        Err(MemoryError::Disposed)
    ));
    assert!(matches!(
        manager.read_mapped(&block, 0, &mut [0u8; 64]),
        Err(MemoryError::Disposed)
    ));
}

#[test]
fn test_drop_disposes() {
    let device = Arc::new(HostMemoryDevice::default());
    let props = MemoryProperties::discrete();
    {
        let manager = DeviceMemoryManager::new(Arc::clone(&device));
        let _block = manager
            .allocate(&props, &AllocationRequest::new(64, 4, 0b1))
            .unwrap();
        assert_eq!(device.counters().live_objects, 1);
    }
    assert_eq!(device.counters().live_objects, 0);
}

#[test]
fn test_trait_object_access() {
    let device = Arc::new(HostMemoryDevice::default());
    let manager = DeviceMemoryManager::with_config(device, AllocatorConfig::compact()).unwrap();
    let props = MemoryProperties::discrete();

    let allocator: &dyn DeviceAllocator = &manager;
    let block = allocator
        .allocate(&props, &AllocationRequest::new(128, 8, 0b1))
        .unwrap();

    let info: &dyn MemoryInfo = &manager;
    assert_eq!(info.allocated_bytes(), 256);
    assert_eq!(info.stats().chunk_reserved_bytes, 256 * 1024);

    allocator.free(block).unwrap();
    assert_eq!(info.allocated_bytes(), 0);
}
