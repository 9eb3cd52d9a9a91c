/*!
 * Host Memory Device
 * In-process device backed by host heap buffers
 *
 * Stands in for a native graphics API: every "device allocation" is a zeroed
 * host buffer, and mapping returns a pointer into it. Supports a byte budget
 * and mapping-failure injection so error paths can be exercised.
 */

use super::{MemoryDevice, MemoryProperties, MemoryPropertyFlags};
use crate::core::errors::DeviceError;
use crate::core::types::{DedicatedOwner, DeviceMemoryHandle, DeviceSize, MemoryTypeIndex};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

struct HostAllocation {
    ptr: NonNull<u8>,
    len: usize,
    memory_type_index: MemoryTypeIndex,
    owner: Option<DedicatedOwner>,
}

// SAFETY: the buffer is exclusively owned by the device and only released in
// `free_memory` or on drop.
unsafe impl Send for HostAllocation {}
unsafe impl Sync for HostAllocation {}

impl HostAllocation {
    fn new(len: usize, memory_type_index: MemoryTypeIndex, owner: Option<DedicatedOwner>) -> Self {
        let buffer = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(buffer) as *mut u8;
        Self {
            // SAFETY: Box::into_raw never returns null.
            ptr: unsafe { NonNull::new_unchecked(raw) },
            len,
            memory_type_index,
            owner,
        }
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from the boxed slice leaked in `new`.
        unsafe {
            let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            drop(Box::from_raw(slice));
        }
    }
}

/// Native call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDeviceCounters {
    pub allocations: u64,
    pub frees: u64,
    pub maps: u64,
    pub dedicated_allocations: u64,
    pub live_objects: u64,
    pub live_bytes: u64,
}

/// Host-backed memory device
pub struct HostMemoryDevice {
    properties: MemoryProperties,
    allocations: DashMap<DeviceMemoryHandle, HostAllocation, RandomState>,
    next_handle: AtomicU64,
    budget: Option<DeviceSize>,
    live_bytes: AtomicU64,
    allocation_calls: AtomicU64,
    free_calls: AtomicU64,
    map_calls: AtomicU64,
    dedicated_calls: AtomicU64,
    fail_maps: AtomicBool,
}

impl HostMemoryDevice {
    pub fn new(properties: MemoryProperties) -> Self {
        Self {
            properties,
            allocations: DashMap::with_hasher(RandomState::new()),
            next_handle: AtomicU64::new(1),
            budget: None,
            live_bytes: AtomicU64::new(0),
            allocation_calls: AtomicU64::new(0),
            free_calls: AtomicU64::new(0),
            map_calls: AtomicU64::new(0),
            dedicated_calls: AtomicU64::new(0),
            fail_maps: AtomicBool::new(false),
        }
    }

    /// Limit the total bytes of live native allocations
    pub fn with_budget(mut self, budget: DeviceSize) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Make every subsequent map call fail (or succeed again)
    pub fn set_fail_maps(&self, fail: bool) {
        self.fail_maps.store(fail, Ordering::SeqCst);
    }

    pub fn counters(&self) -> HostDeviceCounters {
        HostDeviceCounters {
            allocations: self.allocation_calls.load(Ordering::SeqCst),
            frees: self.free_calls.load(Ordering::SeqCst),
            maps: self.map_calls.load(Ordering::SeqCst),
            dedicated_allocations: self.dedicated_calls.load(Ordering::SeqCst),
            live_objects: self.allocations.len() as u64,
            live_bytes: self.live_bytes.load(Ordering::SeqCst),
        }
    }

    /// Size of a live native allocation
    pub fn allocation_size(&self, memory: DeviceMemoryHandle) -> Option<DeviceSize> {
        self.allocations.get(&memory).map(|a| a.len as DeviceSize)
    }

    /// Owner a live native allocation was created for
    pub fn allocation_owner(&self, memory: DeviceMemoryHandle) -> Option<DedicatedOwner> {
        self.allocations.get(&memory).and_then(|a| a.owner)
    }

    /// Memory type of a live native allocation
    pub fn allocation_memory_type(&self, memory: DeviceMemoryHandle) -> Option<MemoryTypeIndex> {
        self.allocations.get(&memory).map(|a| a.memory_type_index)
    }

    fn reserve(&self, size: DeviceSize) -> Result<(), DeviceError> {
        let previous = self.live_bytes.fetch_add(size, Ordering::SeqCst);
        if let Some(budget) = self.budget {
            if previous + size > budget {
                self.live_bytes.fetch_sub(size, Ordering::SeqCst);
                return Err(DeviceError::OutOfDeviceMemory);
            }
        }
        Ok(())
    }
}

impl MemoryDevice for HostMemoryDevice {
    fn allocate_memory(
        &self,
        memory_type_index: MemoryTypeIndex,
        size: DeviceSize,
        owner: Option<DedicatedOwner>,
    ) -> Result<DeviceMemoryHandle, DeviceError> {
        if self.properties.flags(memory_type_index).is_none() {
            return Err(DeviceError::InvalidMemoryType(memory_type_index));
        }
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfHostMemory)?;
        if len == 0 {
            return Err(DeviceError::OutOfDeviceMemory);
        }

        self.allocation_calls.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.reserve(size) {
            warn!(
                memory_type_index,
                size,
                budget = ?self.budget,
                "Host device budget exhausted"
            );
            return Err(e);
        }

        let handle = DeviceMemoryHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.allocations
            .insert(handle, HostAllocation::new(len, memory_type_index, owner));
        if owner.is_some() {
            self.dedicated_calls.fetch_add(1, Ordering::SeqCst);
        }

        debug!(%handle, memory_type_index, size, "Host device allocation");
        Ok(handle)
    }

    fn free_memory(&self, memory: DeviceMemoryHandle) {
        self.free_calls.fetch_add(1, Ordering::SeqCst);
        match self.allocations.remove(&memory) {
            Some((_, allocation)) => {
                self.live_bytes
                    .fetch_sub(allocation.len as DeviceSize, Ordering::SeqCst);
                debug!(handle = %memory, size = allocation.len, "Host device free");
            }
            None => warn!(handle = %memory, "Free of unknown host device allocation"),
        }
    }

    fn map_memory(
        &self,
        memory: DeviceMemoryHandle,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<NonNull<u8>, DeviceError> {
        self.map_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_maps.load(Ordering::SeqCst) {
            return Err(DeviceError::MemoryMapFailed);
        }

        let allocation = self
            .allocations
            .get(&memory)
            .ok_or(DeviceError::InvalidHandle(memory))?;

        let host_visible = self
            .properties
            .flags(allocation.memory_type_index)
            .map_or(false, |f| f.contains(MemoryPropertyFlags::HOST_VISIBLE));
        if !host_visible {
            return Err(DeviceError::NotHostVisible(allocation.memory_type_index));
        }

        let end = offset.checked_add(size).ok_or(DeviceError::MemoryMapFailed)?;
        if end > allocation.len as DeviceSize {
            return Err(DeviceError::MemoryMapFailed);
        }

        // SAFETY: offset is within the buffer checked above.
        Ok(unsafe { NonNull::new_unchecked(allocation.ptr.as_ptr().add(offset as usize)) })
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.properties.clone()
    }
}

impl Default for HostMemoryDevice {
    fn default() -> Self {
        Self::new(MemoryProperties::discrete())
    }
}
