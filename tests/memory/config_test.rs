/*!
 * Allocator Configuration Tests
 * JSON and environment configuration feeding a manager
 */

use devmem_kernel::{
    AllocationRequest, AllocatorConfig, DeviceMemoryManager, HostMemoryDevice, MemoryError,
    MemoryProperties, PlacementRounding,
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;

#[test]
fn test_json_config_changes_routing() {
    let config = AllocatorConfig::from_json(
        r#"{
            "unmapped_chunk_size": 65536,
            "unmapped_dedicated_threshold": 4096,
            "placement_rounding": "never"
        }"#,
    )
    .unwrap();
    assert_eq!(config.placement_rounding, PlacementRounding::Never);

    let device = Arc::new(HostMemoryDevice::default());
    let manager = DeviceMemoryManager::with_config(Arc::clone(&device), config).unwrap();
    let props = MemoryProperties::discrete();

    let block = manager
        .allocate(&props, &AllocationRequest::new(4095, 4, 0b1))
        .unwrap();
    assert!(!block.is_dedicated());
    assert_eq!(device.allocation_size(block.memory()), Some(65536));

    let dedicated = manager
        .allocate(&props, &AllocationRequest::new(4097, 4, 0b1))
        .unwrap();
    assert!(dedicated.is_dedicated());
    assert_eq!(dedicated.size(), 4097);

    manager.free(block).unwrap();
    manager.free(dedicated).unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let device = Arc::new(HostMemoryDevice::default());
    let config = AllocatorConfig {
        unmapped_dedicated_threshold: 16 * 1024 * 1024,
        ..Default::default()
    };
    assert!(matches!(
        DeviceMemoryManager::with_config(device, config),
        Err(MemoryError::InvalidConfig(_))
    ));
    assert!(matches!(
        AllocatorConfig::from_json("{ \"chunk_granularity\": 0 }"),
        Err(MemoryError::InvalidConfig(_))
    ));
}

#[test]
#[serial]
fn test_env_config_feeds_manager() {
    std::env::set_var("DEVMEM_MAPPED_CHUNK_SIZE", "131072");
    std::env::set_var("DEVMEM_MAPPED_DEDICATED_THRESHOLD", "131072");
    std::env::set_var("DEVMEM_PLACEMENT_ROUNDING", "always");
    let config = AllocatorConfig::from_env();
    std::env::remove_var("DEVMEM_MAPPED_CHUNK_SIZE");
    std::env::remove_var("DEVMEM_MAPPED_DEDICATED_THRESHOLD");
    std::env::remove_var("DEVMEM_PLACEMENT_ROUNDING");

    let config = config.unwrap();
    assert_eq!(config.chunk_size(true), 131072);
    assert_eq!(config.placement_rounding, PlacementRounding::Always);

    let device = Arc::new(HostMemoryDevice::default());
    let manager = DeviceMemoryManager::with_config(device, config).unwrap();
    let request = AllocationRequest::new(200_000, 16, 0b0110)
        .with_flags(devmem_kernel::MemoryPropertyFlags::HOST_VISIBLE)
        .persistent_mapped(true);
    assert!(manager.routes_dedicated(&request));
}
