/*!
 * Offset-Ordered Free List
 * Free ranges of one chunk, sorted ascending by offset
 */

use crate::core::types::{align_up, DeviceSize};
use serde::{Deserialize, Serialize};

/// Unused byte range inside a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBlock {
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

impl FreeBlock {
    #[inline]
    pub const fn new(offset: DeviceSize, size: DeviceSize) -> Self {
        Self { offset, size }
    }

    #[inline]
    pub const fn end(&self) -> DeviceSize {
        self.offset + self.size
    }
}

/// First-fit free list with deferred coalescing
///
/// Entries never overlap and stay sorted by offset. Adjacent entries are only
/// merged by `merge_contiguous`, never on insert.
#[derive(Debug, Clone)]
pub(crate) struct FreeList {
    blocks: Vec<FreeBlock>,
    free_bytes: DeviceSize,
}

impl FreeList {
    /// One free block spanning `[0, total)`
    pub fn new(total: DeviceSize) -> Self {
        Self {
            blocks: vec![FreeBlock::new(0, total)],
            free_bytes: total,
        }
    }

    /// First block that fits `size` once its start is moved up to `alignment`
    ///
    /// Returns the entry index and the aligned offset.
    pub fn find_first_fit(
        &self,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> Option<(usize, DeviceSize)> {
        self.blocks.iter().enumerate().find_map(|(i, block)| {
            let aligned = align_up(block.offset, alignment);
            let correction = aligned - block.offset;
            match block.size.checked_sub(correction) {
                Some(usable) if usable >= size => Some((i, aligned)),
                _ => None,
            }
        })
    }

    /// Carve `[aligned, aligned + size)` out of entry `index`
    ///
    /// Alignment padding in front of the range stays free as its own entry;
    /// the residual tail replaces the rest of the entry.
    pub fn take(&mut self, index: usize, aligned: DeviceSize, size: DeviceSize) {
        let block = self.blocks[index];
        debug_assert!(aligned >= block.offset && aligned + size <= block.end());

        let head = FreeBlock::new(block.offset, aligned - block.offset);
        let tail = FreeBlock::new(aligned + size, block.end() - (aligned + size));

        match (head.size > 0, tail.size > 0) {
            (false, false) => {
                self.blocks.remove(index);
            }
            (false, true) => self.blocks[index] = tail,
            (true, false) => self.blocks[index] = head,
            (true, true) => {
                self.blocks[index] = head;
                self.blocks.insert(index + 1, tail);
            }
        }
        self.free_bytes -= size;
    }

    /// Insert a range before the first entry with `offset >= block.offset`
    ///
    /// Returns the insertion index.
    pub fn insert(&mut self, block: FreeBlock) -> usize {
        let index = self.blocks.partition_point(|b| b.offset < block.offset);
        self.blocks.insert(index, block);
        self.free_bytes += block.size;
        index
    }

    /// Collapse every run of touching entries into one entry
    ///
    /// Single forward pass; returns whether anything merged.
    pub fn merge_contiguous(&mut self) -> bool {
        if self.blocks.len() < 2 {
            return false;
        }

        let mut merged = false;
        let mut write = 0;
        for read in 1..self.blocks.len() {
            let next = self.blocks[read];
            if self.blocks[write].end() == next.offset {
                self.blocks[write].size += next.size;
                merged = true;
            } else {
                write += 1;
                self.blocks[write] = next;
            }
        }
        self.blocks.truncate(write + 1);
        merged
    }

    /// Whether the list is exactly one entry spanning `[0, total)`
    #[inline]
    pub fn is_single_span(&self, total: DeviceSize) -> bool {
        matches!(self.blocks.as_slice(), [only] if only.offset == 0 && only.size == total)
    }

    /// Whether `[offset, offset + size)` intersects any free entry
    pub fn overlaps(&self, offset: DeviceSize, size: DeviceSize) -> bool {
        let end = offset + size;
        let index = self.blocks.partition_point(|b| b.end() <= offset);
        self.blocks
            .get(index)
            .map_or(false, |block| block.offset < end)
    }

    #[inline]
    pub fn free_bytes(&self) -> DeviceSize {
        self.free_bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[FreeBlock] {
        &self.blocks
    }
}
