//! HIP error types

use std::ffi::CStr;

use thiserror::Error;

use crate::backend::hip_backend::ffi;
use crate::error::AotForgeError;

/// HIP error types
#[derive(Error, Debug, Clone)]
pub enum HipError {
    #[error("HIP initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Kernel loading failed: {0}")]
    KernelLoadFailed(String),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Device error: {0}")]
    DeviceError(String),
}

/// HIP result type
pub type HipResult<T> = Result<T, HipError>;

impl From<HipError> for AotForgeError {
    fn from(err: HipError) -> Self {
        match err {
            HipError::InitializationFailed(_) | HipError::DeviceNotFound => {
                AotForgeError::UnsupportedBackend(err.to_string())
            }
            HipError::MemoryAllocationFailed(reason) => AotForgeError::OutOfDeviceMemory {
                requested: 0,
                reason,
            },
            HipError::KernelLaunchFailed(msg) => AotForgeError::KernelLaunchFailed(msg),
            HipError::KernelLoadFailed(_)
            | HipError::MemoryCopyFailed(_)
            | HipError::DeviceError(_) => AotForgeError::DeviceError(err.to_string()),
        }
    }
}

/// Human readable text for a HIP status code
pub fn get_error_string(error: i32) -> String {
    // SAFETY: hipGetErrorString returns a static string or null.
    unsafe {
        let error_ptr = ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

/// Map a HIP status code to `Ok(())` or the error built by `make`
pub(crate) fn check(code: i32, make: impl FnOnce(String) -> HipError) -> HipResult<()> {
    if code == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(make(format!("{} (code {})", get_error_string(code), code)))
    }
}
