//! HIP stream wrapper

use std::ptr;

use crate::backend::hip_backend::error::{check, HipError, HipResult};
use crate::backend::hip_backend::ffi;

// SAFETY: HipStream only holds the stream handle; HIP streams may be used
// from any host thread. HipStream is deliberately not Clone so the handle is
// destroyed exactly once.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// The session's in-order launch stream
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    pub fn new() -> HipResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();
        check(unsafe { ffi::hipStreamCreate(&mut stream) }, |e| {
            HipError::DeviceError(format!("Failed to create HIP stream: {}", e))
        })?;
        if stream.is_null() {
            return Err(HipError::DeviceError(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }
        tracing::debug!("HipStream::new: created {:?}", stream);
        Ok(HipStream { stream })
    }

    /// Block until all work on the stream has completed
    pub fn synchronize(&self) -> HipResult<()> {
        check(unsafe { ffi::hipStreamSynchronize(self.stream) }, |e| {
            HipError::KernelLaunchFailed(format!("Stream synchronization failed: {}", e))
        })
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
