//! Session memory pool.
//!
//! Allocations are handed out as opaque [`DeviceAllocation`] handles indexing
//! a slot table, never as raw addresses. A slot's generation is bumped when it
//! is freed, so a stale handle (or one minted by another session) is rejected
//! instead of aliasing whatever now lives in that slot.
//!
//! # Strategy
//!
//! - Freed buffers are kept in per-size free lists and reused for the next
//!   request of the same size (zero-filled first)
//! - A buffer still referenced by an in-flight launch is never cached; it is
//!   released when that launch drops its reference
//! - `release_cached` hands every cached buffer back to the device

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::{DeviceBuffer, DeviceHandle, SessionId};
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult};

/// Default number of buffers kept per size class
pub const DEFAULT_MAX_CACHED_PER_SIZE: usize = 16;

/// Opaque handle to a region of device memory owned by a [`MemoryPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAllocation {
    session: SessionId,
    index: u32,
    generation: u32,
    size: usize,
}

impl DeviceAllocation {
    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Session whose pool created this handle
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(size: usize) -> Self {
        DeviceAllocation {
            session: SessionId::MAX,
            index: 0,
            generation: 0,
            size,
        }
    }
}

impl fmt::Display for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocation#{}.{} ({} bytes, session {})",
            self.index, self.generation, self.size, self.session
        )
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    buffer: Option<DeviceBuffer>,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
    /// Allocation requests served since the pool was created
    pub total_allocations: u64,
    /// Requests served from the free lists
    pub reused_allocations: u64,
    pub cached_buffers: usize,
    pub cached_bytes: usize,
}

impl PoolStats {
    /// Percentage of requests served from the free lists
    pub fn reuse_rate(&self) -> f64 {
        if self.total_allocations == 0 {
            0.0
        } else {
            self.reused_allocations as f64 / self.total_allocations as f64 * 100.0
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolStats {{ live: {} allocations / {} bytes, peak: {} bytes, requests: {} ({:.1}% reused), cached: {} buffers / {} bytes }}",
            self.live_allocations,
            self.live_bytes,
            self.peak_bytes,
            self.total_allocations,
            self.reuse_rate(),
            self.cached_buffers,
            self.cached_bytes
        )
    }
}

/// Allocator for one session's device
#[derive(Debug)]
pub struct MemoryPool {
    handle: DeviceHandle,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    free_lists: HashMap<usize, Vec<DeviceBuffer>>,
    max_cached_per_size: usize,
    capacity_limit: Option<usize>,
    stats: PoolStats,
}

impl MemoryPool {
    /// Build a pool for the session behind `handle`.
    ///
    /// Must be created before the program is materialized; the device does
    /// not need to be initialized yet.
    pub fn new(arch: Arch, handle: &DeviceHandle) -> ForgeResult<Self> {
        if arch != handle.arch() {
            return Err(AotForgeError::InvalidConfiguration(format!(
                "memory pool for {} cannot serve a {} device",
                arch,
                handle.arch()
            )));
        }
        tracing::debug!(
            "MemoryPool::new: session {} on {}",
            handle.session(),
            handle.arch()
        );
        Ok(MemoryPool {
            handle: handle.clone(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            free_lists: HashMap::new(),
            max_cached_per_size: DEFAULT_MAX_CACHED_PER_SIZE,
            capacity_limit: None,
            stats: PoolStats::default(),
        })
    }

    /// Cap device memory held by the pool (live plus cached)
    pub fn with_capacity_limit(mut self, bytes: usize) -> Self {
        self.capacity_limit = Some(bytes);
        self
    }

    /// Buffers kept per size class; 0 disables reuse
    pub fn with_max_cached_per_size(mut self, max: usize) -> Self {
        self.max_cached_per_size = max;
        self
    }

    pub fn session(&self) -> SessionId {
        self.handle.session()
    }

    pub fn arch(&self) -> Arch {
        self.handle.arch()
    }

    pub fn capacity_limit(&self) -> Option<usize> {
        self.capacity_limit
    }

    /// Allocate `size` zeroed bytes
    pub fn allocate(&mut self, size: usize) -> ForgeResult<DeviceAllocation> {
        if size == 0 {
            return Err(AotForgeError::InvalidAllocation(
                "allocation size must be greater than zero".to_string(),
            ));
        }

        let buffer = match self.take_cached(size)? {
            Some(buffer) => buffer,
            None => {
                self.ensure_capacity(size)?;
                self.handle.device().allocate(size)?
            }
        };

        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| {
                    AotForgeError::OutOfDeviceMemory {
                        requested: size,
                        reason: "allocation table is full".to_string(),
                    }
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    buffer: None,
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.buffer = Some(buffer);
        let generation = slot.generation;

        self.stats.total_allocations += 1;
        self.stats.live_allocations += 1;
        self.stats.live_bytes += size;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.live_bytes);

        let allocation = DeviceAllocation {
            session: self.session(),
            index,
            generation,
            size,
        };
        tracing::debug!("MemoryPool::allocate: {}", allocation);
        Ok(allocation)
    }

    /// Release an allocation. The handle, and every copy of it, becomes invalid.
    pub fn free(&mut self, allocation: DeviceAllocation) -> ForgeResult<()> {
        self.check(&allocation)?;
        let slot = &mut self.slots[allocation.index as usize];
        let buffer = slot.buffer.take().ok_or_else(|| {
            AotForgeError::InvalidAllocation(format!("{} is not live", allocation))
        })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(allocation.index);

        self.stats.live_allocations -= 1;
        self.stats.live_bytes -= allocation.size;

        let list = self.free_lists.entry(allocation.size).or_default();
        if Arc::strong_count(&buffer) == 1 && list.len() < self.max_cached_per_size {
            list.push(buffer);
            self.stats.cached_buffers += 1;
            self.stats.cached_bytes += allocation.size;
        }
        tracing::debug!("MemoryPool::free: {}", allocation);
        Ok(())
    }

    /// Device buffer behind a live handle
    pub fn resolve(&self, allocation: &DeviceAllocation) -> ForgeResult<DeviceBuffer> {
        self.check(allocation)?;
        self.slots[allocation.index as usize]
            .buffer
            .clone()
            .ok_or_else(|| AotForgeError::InvalidAllocation(format!("{} is not live", allocation)))
    }

    pub fn is_live(&self, allocation: &DeviceAllocation) -> bool {
        self.resolve(allocation).is_ok()
    }

    /// Return every cached buffer to the device
    pub fn release_cached(&mut self) {
        let released = self.stats.cached_bytes;
        self.free_lists.clear();
        self.stats.cached_buffers = 0;
        self.stats.cached_bytes = 0;
        if released > 0 {
            tracing::debug!("MemoryPool::release_cached: released {} bytes", released);
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    fn check(&self, allocation: &DeviceAllocation) -> ForgeResult<()> {
        if allocation.session != self.session() {
            return Err(AotForgeError::InvalidAllocation(format!(
                "{} belongs to another session (this is session {})",
                allocation,
                self.session()
            )));
        }
        match self.slots.get(allocation.index as usize) {
            Some(slot) if slot.generation == allocation.generation && slot.buffer.is_some() => {
                if slot.buffer.as_ref().map(|b| b.size()) == Some(allocation.size) {
                    Ok(())
                } else {
                    Err(AotForgeError::InvalidAllocation(format!(
                        "{} does not match its slot",
                        allocation
                    )))
                }
            }
            _ => Err(AotForgeError::InvalidAllocation(format!(
                "{} was freed or never allocated",
                allocation
            ))),
        }
    }

    fn take_cached(&mut self, size: usize) -> ForgeResult<Option<DeviceBuffer>> {
        let Some(buffer) = self.free_lists.get_mut(&size).and_then(|list| list.pop()) else {
            return Ok(None);
        };
        self.stats.cached_buffers -= 1;
        self.stats.cached_bytes -= size;
        buffer.fill_zero()?;
        self.stats.reused_allocations += 1;
        Ok(Some(buffer))
    }

    fn ensure_capacity(&mut self, size: usize) -> ForgeResult<()> {
        let Some(limit) = self.capacity_limit else {
            return Ok(());
        };
        let exceeds = |bytes: Option<usize>| bytes.map_or(true, |b| b > limit);
        let held = self.stats.live_bytes.checked_add(self.stats.cached_bytes);
        if exceeds(held.and_then(|h| h.checked_add(size))) {
            self.release_cached();
        }
        if exceeds(self.stats.live_bytes.checked_add(size)) {
            return Err(AotForgeError::OutOfDeviceMemory {
                requested: size,
                reason: format!(
                    "pool limit {} bytes, {} bytes live",
                    limit, self.stats.live_bytes
                ),
            });
        }
        Ok(())
    }
}
