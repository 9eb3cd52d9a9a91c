/*!
 * Allocation Tracking
 * Shadow set of live chunk allocations, enabled by the `alloc-track` feature
 */

use crate::core::errors::MemoryError;
use crate::core::types::DeviceSize;
use std::collections::BTreeMap;

/// Live allocations keyed by offset
#[derive(Debug, Default)]
pub(crate) struct AllocationTracker {
    live: BTreeMap<DeviceSize, TrackedAllocation>,
}

#[derive(Debug, Clone, Copy)]
struct TrackedAllocation {
    size: DeviceSize,
    requested: DeviceSize,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new allocation; panics if it overlaps a live one
    pub fn track_allocate(&mut self, offset: DeviceSize, size: DeviceSize, requested: DeviceSize) {
        track_assert(size >= requested, || {
            format!("allocation at {} is {} bytes, {} requested", offset, size, requested)
        });

        let end = offset + size;
        if let Some((&left, left_live)) = self.live.range(..=offset).next_back() {
            let left_size = left_live.size;
            track_assert(left + left_size <= offset, || {
                format!(
                    "allocated segments overlapped: [{}, {}) and [{}, {})",
                    left,
                    left + left_size,
                    offset,
                    end
                )
            });
        }
        if let Some((&right, right_live)) = self.live.range(offset..).next() {
            let right_size = right_live.size;
            track_assert(end <= right, || {
                format!(
                    "allocated segments overlapped: [{}, {}) and [{}, {})",
                    offset,
                    end,
                    right,
                    right + right_size
                )
            });
        }
        self.live.insert(offset, TrackedAllocation { size, requested });
    }

    /// Forget an allocation; panics if it was not live with that size
    pub fn track_free(&mut self, offset: DeviceSize, size: DeviceSize) {
        match self.live.remove(&offset) {
            Some(live) => track_assert(live.size == size, || {
                format!(
                    "freed block at {} has size {}, allocated size was {}",
                    offset, size, live.size
                )
            }),
            None => track_assert(false, || {
                format!("unable to remove a supposedly allocated block at {}", offset)
            }),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Size the caller asked for at a live offset
    pub fn requested_at(&self, offset: DeviceSize) -> Option<DeviceSize> {
        self.live.get(&offset).map(|live| live.requested)
    }
}

fn track_assert(condition: bool, message: impl FnOnce() -> String) {
    if !condition {
        let err = MemoryError::InvariantViolation(message());
        tracing::error!(error = %err, "Chunk allocation tracking failed");
        panic!("{}", err);
    }
}
