//! Host memory standing in for device memory on the CPU backend

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::backend::{check_copy_range, DeviceMemory};
use crate::error::{AotForgeError, ForgeResult};

/// Alignment of every host allocation (one cache line, enough for AVX-512)
pub const HOST_ALIGNMENT: usize = 64;

// SAFETY: HostMemory owns its allocation exclusively and exposes it only
// through copies or through kernel launches serialized on the session queue.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

/// Zero-initialized, 64-byte aligned heap block
#[derive(Debug)]
pub struct HostMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HostMemory {
    pub fn new(size: usize) -> ForgeResult<Self> {
        if size == 0 {
            return Err(AotForgeError::InvalidAllocation(
                "zero-sized host allocation".to_string(),
            ));
        }
        let layout = Layout::from_size_align(size, HOST_ALIGNMENT).map_err(|e| {
            AotForgeError::OutOfDeviceMemory {
                requested: size,
                reason: e.to_string(),
            }
        })?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| AotForgeError::OutOfDeviceMemory {
            requested: size,
            reason: "host allocator returned null".to_string(),
        })?;

        tracing::trace!("HostMemory::new: {} bytes at {:p}", size, ptr);
        Ok(HostMemory { ptr, layout })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl DeviceMemory for HostMemory {
    fn size(&self) -> usize {
        self.layout.size()
    }

    fn device_ptr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    fn copy_from_host(&self, offset: usize, data: &[u8]) -> ForgeResult<()> {
        check_copy_range(self.size(), offset, data.len())?;
        // SAFETY: range checked above; source and destination cannot overlap
        // because `data` is borrowed from the caller.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    fn copy_to_host(&self, offset: usize, out: &mut [u8]) -> ForgeResult<()> {
        check_copy_range(self.size(), offset, out.len())?;
        // SAFETY: range checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn fill_zero(&self) -> ForgeResult<()> {
        // SAFETY: the whole block belongs to us.
        unsafe { std::ptr::write_bytes(self.as_ptr(), 0, self.size()) };
        Ok(())
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
