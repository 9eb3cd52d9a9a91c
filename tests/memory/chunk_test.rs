/*!
 * Chunk Allocator Tests
 * First-fit placement, alignment correction and deferred coalescing
 */

use devmem_kernel::memory::FreeBlock;
use devmem_kernel::{ChunkAllocator, HostMemoryDevice};
use pretty_assertions::assert_eq;

fn chunk(device: &HostMemoryDevice, total: u64) -> ChunkAllocator {
    ChunkAllocator::new(device, 0, false, total).expect("Failed to create chunk")
}

#[test]
fn test_alignment_correction_and_reuse() {
    let device = HostMemoryDevice::default();
    let mut chunk = chunk(&device, 1024);

    let first = chunk.allocate(100, 16).expect("first allocation");
    assert_eq!((first.offset(), first.size()), (0, 100));

    let second = chunk.allocate(200, 16).expect("second allocation");
    assert_eq!((second.offset(), second.size()), (112, 200));

    // Padding before the aligned offset stays free
    assert_eq!(
        chunk.free_blocks(),
        &[FreeBlock::new(100, 12), FreeBlock::new(312, 712)]
    );

    chunk.free(first);
    let third = chunk.allocate(50, 16).expect("third allocation");
    assert_eq!((third.offset(), third.size()), (0, 50));

    // [50, 100) and [100, 112) touch but are only merged after a failed scan
    assert_eq!(
        chunk.free_blocks(),
        &[
            FreeBlock::new(50, 50),
            FreeBlock::new(100, 12),
            FreeBlock::new(312, 712)
        ]
    );

    chunk.free(third);
    chunk.free(second);
    chunk.dispose(&device);
}

#[test]
fn test_failed_scan_coalesces_and_retries() {
    let device = HostMemoryDevice::default();
    let mut chunk = chunk(&device, 1024);

    let blocks: Vec<_> = (0..4)
        .map(|_| chunk.allocate(256, 1).expect("quarter allocation"))
        .collect();
    let mut blocks = blocks.into_iter();
    let a = blocks.next().unwrap();
    let b = blocks.next().unwrap();
    let rest: Vec<_> = blocks.collect();

    chunk.free(a);
    chunk.free(b);
    assert_eq!(chunk.free_block_count(), 2);

    // Neither 256-byte hole fits 512 until they are merged
    let merged = chunk.allocate(512, 1).expect("allocation after merge");
    assert_eq!((merged.offset(), merged.size()), (0, 512));
    assert_eq!(chunk.free_block_count(), 0);

    chunk.free(merged);
    for block in rest {
        chunk.free(block);
    }
    chunk.dispose(&device);
}

#[test]
fn test_round_trip_restores_full_free_block() {
    let device = HostMemoryDevice::default();

    for (size, alignment) in [(1, 1), (100, 16), (1000, 8), (1024, 1024), (7, 64)] {
        let mut chunk = chunk(&device, 1024);
        assert!(chunk.is_full_free_block());

        let block = chunk.allocate(size, alignment).expect("allocation");
        chunk.free(block);

        // Splits may leave touching pieces; the merge pass restores one span
        chunk.merge_contiguous_blocks();
        assert!(chunk.is_full_free_block(), "size={} alignment={}", size, alignment);
        chunk.dispose(&device);
    }
}

#[test]
fn test_exact_fit_consumes_block() {
    let device = HostMemoryDevice::default();
    let mut chunk = chunk(&device, 512);

    let block = chunk.allocate(512, 512).expect("whole chunk");
    assert_eq!(chunk.free_block_count(), 0);
    assert_eq!(chunk.free_bytes(), 0);
    assert!(chunk.allocate(1, 1).is_none());

    chunk.free(block);
    assert!(chunk.is_full_free_block());
    chunk.dispose(&device);
}

#[test]
fn test_oversized_request_fails() {
    let device = HostMemoryDevice::default();
    let mut chunk = chunk(&device, 256);

    assert!(chunk.allocate(257, 1).is_none());
    assert!(chunk.is_full_free_block());
    chunk.dispose(&device);
}

#[test]
fn test_dispose_releases_native_memory() {
    let device = HostMemoryDevice::default();
    let mut chunk = chunk(&device, 4096);
    let _leaked = chunk.allocate(64, 4).expect("allocation");

    assert_eq!(device.counters().live_objects, 1);
    chunk.dispose(&device);
    assert_eq!(device.counters().live_objects, 0);
    assert_eq!(device.counters().live_bytes, 0);
}
