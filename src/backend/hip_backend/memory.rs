//! Device memory on AMD GPUs

use std::ptr;

use crate::backend::hip_backend::error::{check, HipError, HipResult};
use crate::backend::hip_backend::ffi;
use crate::backend::{check_copy_range, DeviceMemory};
use crate::error::ForgeResult;

// SAFETY: HipMemory owns its device pointer exclusively; HIP memory calls
// are thread-safe.
unsafe impl Send for HipMemory {}
unsafe impl Sync for HipMemory {}

/// One `hipMalloc` region, freed on drop
#[derive(Debug)]
pub struct HipMemory {
    ptr: *mut std::ffi::c_void,
    size: usize,
}

impl HipMemory {
    /// Allocate `size` bytes and zero them
    pub fn new(size: usize) -> HipResult<Self> {
        let mut ptr: *mut std::ffi::c_void = ptr::null_mut();
        check(unsafe { ffi::hipMalloc(&mut ptr, size) }, |e| {
            HipError::MemoryAllocationFailed(format!("hipMalloc of {} bytes: {}", size, e))
        })?;
        if ptr.is_null() {
            return Err(HipError::MemoryAllocationFailed(format!(
                "hipMalloc returned null pointer for {} bytes",
                size
            )));
        }
        let memory = HipMemory { ptr, size };
        memory.memset_zero()?;
        tracing::trace!("HipMemory::new: {} bytes at {:?}", size, ptr);
        Ok(memory)
    }

    fn memset_zero(&self) -> HipResult<()> {
        check(unsafe { ffi::hipMemset(self.ptr, 0, self.size) }, |e| {
            HipError::DeviceError(format!("hipMemset failed: {}", e))
        })
    }

    fn at(&self, offset: usize) -> *mut std::ffi::c_void {
        (self.ptr as usize + offset) as *mut std::ffi::c_void
    }
}

impl DeviceMemory for HipMemory {
    fn size(&self) -> usize {
        self.size
    }

    fn device_ptr(&self) -> u64 {
        self.ptr as u64
    }

    fn copy_from_host(&self, offset: usize, data: &[u8]) -> ForgeResult<()> {
        check_copy_range(self.size, offset, data.len())?;
        check(
            unsafe {
                ffi::hipMemcpy(
                    self.at(offset),
                    data.as_ptr() as *const std::ffi::c_void,
                    data.len(),
                    ffi::HIP_MEMCPY_HOST_TO_DEVICE,
                )
            },
            |e| HipError::MemoryCopyFailed(format!("hipMemcpy HtoD: {}", e)),
        )?;
        Ok(())
    }

    fn copy_to_host(&self, offset: usize, out: &mut [u8]) -> ForgeResult<()> {
        check_copy_range(self.size, offset, out.len())?;
        check(
            unsafe {
                ffi::hipMemcpy(
                    out.as_mut_ptr() as *mut std::ffi::c_void,
                    self.at(offset),
                    out.len(),
                    ffi::HIP_MEMCPY_DEVICE_TO_HOST,
                )
            },
            |e| HipError::MemoryCopyFailed(format!("hipMemcpy DtoH: {}", e)),
        )?;
        Ok(())
    }

    fn fill_zero(&self) -> ForgeResult<()> {
        Ok(self.memset_zero()?)
    }
}

impl Drop for HipMemory {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                ffi::hipFree(self.ptr);
            }
        }
    }
}
