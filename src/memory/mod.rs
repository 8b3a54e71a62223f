//! Device memory management
//!
//! Every session owns one [`MemoryPool`]. Callers only ever see opaque
//! [`DeviceAllocation`] handles; the pool maps them to device buffers.

pub mod pool;

pub use pool::{DeviceAllocation, MemoryPool, PoolStats, DEFAULT_MAX_CACHED_PER_SIZE};
