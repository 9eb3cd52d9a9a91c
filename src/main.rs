/*!
 * Device Memory Simulator - Main Entry Point
 *
 * Drives the allocator against a host-backed device:
 * - Mixed buffer/image workload across worker threads
 * - Persistently mapped staging uploads
 * - Oversized and owner-tied dedicated allocations
 */

use anyhow::Context;
use devmem_kernel::{
    init_tracing, AllocationRequest, AllocatorConfig, DedicatedOwner, DeviceMemoryManager,
    HostMemoryDevice, MemoryBlock, MemoryProperties, MemoryPropertyFlags,
};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

const WORKERS: usize = 4;
const ROUNDS: usize = 2_000;
const LIVE_WINDOW: usize = 64;

fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Device memory simulator starting...");

    let config = AllocatorConfig::from_env().context("Invalid DEVMEM_* configuration")?;
    let properties = MemoryProperties::discrete();
    let device = Arc::new(HostMemoryDevice::new(properties.clone()));
    let manager = Arc::new(
        DeviceMemoryManager::with_config(Arc::clone(&device), config)
            .context("Unable to create device memory manager")?,
    );

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let manager = Arc::clone(&manager);
            let properties = properties.clone();
            thread::Builder::new()
                .name(format!("devmem-worker-{}", worker))
                .spawn(move || run_worker(worker, &manager, &properties))
        })
        .collect::<Result<_, _>>()
        .context("Unable to spawn worker thread")?;

    let mut failures = 0usize;
    for handle in workers {
        match handle.join() {
            Ok(worker_failures) => failures += worker_failures,
            Err(_) => anyhow::bail!("Worker thread panicked"),
        }
    }

    let stats = manager.stats();
    info!(
        allocated_bytes = stats.allocated_bytes,
        chunks = stats.chunk_count,
        dedicated = stats.dedicated_count,
        failures,
        "Workload complete"
    );

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&device.counters())?);

    manager.dispose();
    let after = device.counters();
    if after.live_objects != 0 {
        anyhow::bail!("{} native allocations survived dispose", after.live_objects);
    }
    info!("Device memory simulator finished");
    Ok(())
}

/// Returns the number of failed allocations
fn run_worker(
    worker: usize,
    manager: &DeviceMemoryManager<HostMemoryDevice>,
    properties: &MemoryProperties,
) -> usize {
    let mut live: Vec<MemoryBlock> = Vec::with_capacity(LIVE_WINDOW);
    let mut failures = 0;
    let mut state = (worker as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);

    for round in 0..ROUNDS {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;

        let request = request_for(round, state);
        match manager.allocate(properties, &request) {
            Ok(block) => {
                if block.is_persistent_mapped() {
                    if let Err(e) =
                        manager.write_mapped(&block, 0, &(round as u32).to_le_bytes())
                    {
                        warn!(worker, round, error = %e, "Staging upload failed");
                    }
                }
                live.push(block);
            }
            Err(e) => {
                warn!(worker, round, error = %e, "Allocation failed");
                failures += 1;
            }
        }

        if live.len() >= LIVE_WINDOW {
            let victim = (state as usize) % live.len();
            let block = live.swap_remove(victim);
            if let Err(e) = manager.free(block) {
                warn!(worker, round, error = %e, "Free failed");
            }
        }
    }

    for block in live {
        if let Err(e) = manager.free(block) {
            warn!(worker, error = %e, "Free failed");
        }
    }
    failures
}

fn request_for(round: usize, state: u64) -> AllocationRequest {
    let alignment = 1u64 << (state % 9);
    match round % 16 {
        // Staging uploads
        0..=3 => AllocationRequest::new(256 + state % (64 * 1024), alignment, 0b0110)
            .with_flags(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT)
            .persistent_mapped(true),
        // Render targets
        4 => AllocationRequest::new(512 * 1024 + state % (512 * 1024), 1024, 0b0001)
            .dedicated_to(DedicatedOwner::Image(round as u64)),
        // Large textures
        5 => AllocationRequest::new(9 * 1024 * 1024 + state % (1024 * 1024), 4096, 0b0001),
        // Vertex and uniform buffers
        _ => AllocationRequest::new(64 + state % (256 * 1024), alignment, 0b1111)
            .with_flags(MemoryPropertyFlags::DEVICE_LOCAL),
    }
}
