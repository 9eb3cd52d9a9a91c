/*!
 * Chunk Allocator Property Tests
 * Random allocate/free sequences checked against free-list invariants
 */

use devmem_kernel::{ChunkAllocator, HostMemoryDevice, MemoryBlock};
use proptest::prelude::*;

const CHUNK_SIZE: u64 = 4096;

#[derive(Debug, Clone)]
enum Op {
    Allocate { size: u64, alignment: u64 },
    Free(usize),
    Merge,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u64..=768, 0u32..=8).prop_map(|(size, shift)| Op::Allocate {
            size,
            alignment: 1u64 << shift,
        }),
        3 => any::<usize>().prop_map(Op::Free),
        1 => Just(Op::Merge),
    ]
}

fn check_invariants(chunk: &ChunkAllocator, live: &[MemoryBlock]) {
    // Live ranges are inside the chunk and pairwise disjoint
    let mut ranges: Vec<(u64, u64)> = live.iter().map(|b| (b.offset(), b.end())).collect();
    ranges.sort_unstable();
    for window in ranges.windows(2) {
        assert!(
            window[0].1 <= window[1].0,
            "live ranges overlap: {:?} and {:?}",
            window[0],
            window[1]
        );
    }
    if let Some(last) = ranges.last() {
        assert!(last.1 <= CHUNK_SIZE);
    }

    // Free list stays sorted and never overlaps live ranges
    let free = chunk.free_blocks();
    for window in free.windows(2) {
        assert!(window[0].end() <= window[1].offset);
    }
    for block in free {
        for &(start, end) in &ranges {
            assert!(
                block.end() <= start || end <= block.offset,
                "free block [{}, {}) overlaps live [{}, {})",
                block.offset,
                block.end(),
                start,
                end
            );
        }
    }

    // Every byte is either free or live
    let free_sum: u64 = free.iter().map(|b| b.size).sum();
    let live_sum: u64 = live.iter().map(MemoryBlock::size).sum();
    assert_eq!(free_sum, chunk.free_bytes());
    assert_eq!(free_sum + live_sum, CHUNK_SIZE);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_chunk_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let device = HostMemoryDevice::default();
        let mut chunk = ChunkAllocator::new(&device, 0, false, CHUNK_SIZE).unwrap();
        let mut live: Vec<MemoryBlock> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate { size, alignment } => {
                    if let Some(block) = chunk.allocate(size, alignment) {
                        prop_assert_eq!(block.offset() % alignment, 0);
                        prop_assert!(block.size() >= size);
                        prop_assert!(!block.is_dedicated());
                        live.push(block);
                    }
                }
                Op::Free(index) => {
                    if !live.is_empty() {
                        let block = live.swap_remove(index % live.len());
                        chunk.free(block);
                    }
                }
                Op::Merge => {
                    chunk.merge_contiguous_blocks();
                }
            }
            check_invariants(&chunk, &live);
        }

        for block in live.drain(..) {
            chunk.free(block);
        }
        chunk.merge_contiguous_blocks();
        prop_assert!(chunk.is_full_free_block());
        chunk.dispose(&device);
    }

    #[test]
    fn prop_merge_is_idempotent(ops in prop::collection::vec(op_strategy(), 1..48)) {
        let device = HostMemoryDevice::default();
        let mut chunk = ChunkAllocator::new(&device, 0, false, CHUNK_SIZE).unwrap();
        let mut live: Vec<MemoryBlock> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate { size, alignment } => {
                    if let Some(block) = chunk.allocate(size, alignment) {
                        live.push(block);
                    }
                }
                Op::Free(index) if !live.is_empty() => {
                    let block = live.swap_remove(index % live.len());
                    chunk.free(block);
                }
                _ => {}
            }
        }

        chunk.merge_contiguous_blocks();
        let once = chunk.free_blocks().to_vec();
        prop_assert!(!chunk.merge_contiguous_blocks());
        prop_assert_eq!(chunk.free_blocks(), once.as_slice());

        chunk.dispose(&device);
    }
}
