//! HIP code objects and kernel functions

use std::ffi::CString;
use std::fs::File;
use std::path::Path;
use std::ptr;

use memmap2::Mmap;

use crate::backend::hip_backend::error::{check, HipError, HipResult};
use crate::backend::hip_backend::ffi;

// SAFETY: HipModule only holds the module handle, which HIP allows to be
// used from any thread.
unsafe impl Send for HipModule {}
unsafe impl Sync for HipModule {}

/// A loaded HSACO code object
#[derive(Debug)]
pub struct HipModule {
    module: *mut std::ffi::c_void,
}

impl HipModule {
    /// Map an HSACO file and hand the image to the runtime
    pub fn load_from_file(path: &Path) -> HipResult<Self> {
        let file = File::open(path).map_err(|e| {
            HipError::KernelLoadFailed(format!("cannot open '{}': {}", path.display(), e))
        })?;
        // SAFETY: the image is only read during hipModuleLoadData; artifact
        // files are not modified while a module is loading.
        let image = unsafe { Mmap::map(&file) }.map_err(|e| {
            HipError::KernelLoadFailed(format!("cannot map '{}': {}", path.display(), e))
        })?;
        Self::load_from_data(&image).map_err(|e| {
            HipError::KernelLoadFailed(format!("'{}': {}", path.display(), e))
        })
    }

    pub fn load_from_data(data: &[u8]) -> HipResult<Self> {
        let mut module: *mut std::ffi::c_void = ptr::null_mut();
        check(
            unsafe { ffi::hipModuleLoadData(&mut module, data.as_ptr() as *const std::ffi::c_void) },
            |e| HipError::KernelLoadFailed(format!("Failed to load module from data: {}", e)),
        )?;
        Ok(HipModule { module })
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.module
    }
}

impl Drop for HipModule {
    fn drop(&mut self) {
        if !self.module.is_null() {
            unsafe {
                ffi::hipModuleUnload(self.module);
            }
        }
    }
}

// SAFETY: see HipModule.
unsafe impl Send for HipKernel {}
unsafe impl Sync for HipKernel {}

/// A kernel function inside a [`HipModule`]; valid while the module is loaded
#[derive(Debug)]
pub struct HipKernel {
    func: *mut std::ffi::c_void,
    name: String,
}

impl HipKernel {
    pub fn from_module(module: &HipModule, kernel_name: &str) -> HipResult<Self> {
        let kernel_name_cstr = CString::new(kernel_name)
            .map_err(|e| HipError::KernelLoadFailed(format!("Invalid kernel name: {}", e)))?;

        let mut func: *mut std::ffi::c_void = ptr::null_mut();
        check(
            unsafe { ffi::hipModuleGetFunction(&mut func, module.as_ptr(), kernel_name_cstr.as_ptr()) },
            |e| HipError::KernelLoadFailed(format!("Failed to get kernel '{}': {}", kernel_name, e)),
        )?;

        Ok(HipKernel {
            func,
            name: kernel_name.to_string(),
        })
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.func
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
