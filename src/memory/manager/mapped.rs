/*!
 * Host Access
 * Checked copies into and out of persistently mapped blocks
 */

use super::DeviceMemoryManager;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::types::{DeviceSize, MappedSpan};
use crate::device::MemoryDevice;
use crate::memory::types::MemoryBlock;
use tracing::warn;

impl<D: MemoryDevice> DeviceMemoryManager<D> {
    /// Copy `data` into a mapped block at `offset` (relative to the block)
    ///
    /// Fails with `Disposed` after teardown, `UnknownAllocation` when the
    /// block's allocation is not live in this manager, `NotMapped` for
    /// unmapped blocks and `MappedRangeOutOfBounds` when the range does not
    /// fit the block.
    pub fn write_mapped(
        &self,
        block: &MemoryBlock,
        offset: DeviceSize,
        data: &[u8],
    ) -> MemoryResult<()> {
        let _live = self.enter()?;
        let (span, start) = self.checked_range(block, offset, data.len() as DeviceSize)?;
        // SAFETY: the lifecycle guard keeps dispose out, the allocation was
        // found live in this manager, and the borrowed block cannot be freed
        // while the copy runs.
        let copied = unsafe { span.write(start, data) };
        debug_assert!(copied);
        Ok(())
    }

    /// Copy bytes at `offset` (relative to the block) into `out`
    ///
    /// Same failure modes as [`DeviceMemoryManager::write_mapped`].
    pub fn read_mapped(
        &self,
        block: &MemoryBlock,
        offset: DeviceSize,
        out: &mut [u8],
    ) -> MemoryResult<()> {
        let _live = self.enter()?;
        let (span, start) = self.checked_range(block, offset, out.len() as DeviceSize)?;
        // SAFETY: see `write_mapped`.
        let copied = unsafe { span.read(start, out) };
        debug_assert!(copied);
        Ok(())
    }

    /// Resolve a block-relative range to its live span and absolute offset
    fn checked_range(
        &self,
        block: &MemoryBlock,
        offset: DeviceSize,
        len: DeviceSize,
    ) -> MemoryResult<(MappedSpan, DeviceSize)> {
        let span = block
            .base_mapping()
            .ok_or(MemoryError::NotMapped(block.memory()))?;

        let live = if block.is_dedicated() {
            self.dedicated
                .get(&block.memory())
                .is_some_and(|a| a.mapped == Some(span))
        } else {
            self.sets
                .get(&(block.memory_type_index(), true))
                .is_some_and(|set| set.owns_mapping(block.memory(), span))
        };
        if !live {
            warn!(
                memory = %block.memory(),
                dedicated = block.is_dedicated(),
                "Host access to block with no live allocation"
            );
            return Err(MemoryError::UnknownAllocation(block.memory()));
        }

        let start = block
            .absolute(offset, len)
            .ok_or(MemoryError::MappedRangeOutOfBounds {
                offset,
                len,
                size: block.size(),
            })?;
        Ok((span, start))
    }
}
