//! AMD GPU compute device

use std::any::Any;
use std::ptr;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::backend::hip_backend::error::{check, HipError};
use crate::backend::hip_backend::ffi;
use crate::backend::hip_backend::memory::HipMemory;
use crate::backend::hip_backend::module::HipKernel;
use crate::backend::hip_backend::stream::HipStream;
use crate::backend::{ComputeDevice, DeviceBuffer};
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult};

/// One AMD GPU driven through the HIP runtime
#[derive(Debug)]
pub struct HipComputeDevice {
    ordinal: usize,
    stream: OnceCell<HipStream>,
}

impl HipComputeDevice {
    pub fn new(ordinal: usize) -> Self {
        HipComputeDevice {
            ordinal,
            stream: OnceCell::new(),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn stream(&self) -> ForgeResult<&HipStream> {
        self.stream.get().ok_or_else(|| {
            AotForgeError::DeviceError("AMDGPU device used before initialization".to_string())
        })
    }

    /// Make this device current on the calling thread
    fn bind(&self) -> ForgeResult<()> {
        check(unsafe { ffi::hipSetDevice(self.ordinal as i32) }, |e| {
            HipError::DeviceError(format!("hipSetDevice({}): {}", self.ordinal, e))
        })?;
        Ok(())
    }

    /// Enqueue one kernel with flattened 64-bit parameters on the session stream
    pub fn launch(
        &self,
        kernel: &HipKernel,
        grid_dim: [u32; 3],
        block_dim: [u32; 3],
        shared_mem_bytes: u32,
        words: &[u64],
        result_buffer: u64,
    ) -> ForgeResult<()> {
        if grid_dim.contains(&0) || block_dim.contains(&0) {
            return Err(AotForgeError::KernelLaunchFailed(format!(
                "{}: grid {:?} / block {:?} has a zero dimension",
                kernel.name(),
                grid_dim,
                block_dim
            )));
        }
        let stream = self.stream()?;
        self.bind()?;

        let mut storage: Vec<u64> = Vec::with_capacity(words.len() + 1);
        storage.extend_from_slice(words);
        storage.push(result_buffer);
        let mut params: Vec<*mut std::ffi::c_void> = storage
            .iter_mut()
            .map(|w| w as *mut u64 as *mut std::ffi::c_void)
            .collect();

        tracing::trace!(
            "hip launch {} grid={:?} block={:?} shared={} args={}",
            kernel.name(),
            grid_dim,
            block_dim,
            shared_mem_bytes,
            params.len()
        );
        let result = unsafe {
            ffi::hipModuleLaunchKernel(
                kernel.as_ptr(),
                grid_dim[0],
                grid_dim[1],
                grid_dim[2],
                block_dim[0],
                block_dim[1],
                block_dim[2],
                shared_mem_bytes,
                stream.as_ptr(),
                params.as_mut_ptr(),
                ptr::null_mut(),
            )
        };
        check(result, |e| {
            HipError::KernelLaunchFailed(format!("{}: {}", kernel.name(), e))
        })?;
        Ok(())
    }
}

impl ComputeDevice for HipComputeDevice {
    fn arch(&self) -> Arch {
        Arch::Amdgpu
    }

    fn name(&self) -> String {
        format!("amdgpu:{}", self.ordinal)
    }

    fn initialize(&self) -> ForgeResult<()> {
        self.stream.get_or_try_init(|| {
            check(unsafe { ffi::hipInit(0) }, HipError::InitializationFailed)?;

            let mut count: i32 = 0;
            check(
                unsafe { ffi::hipGetDeviceCount(&mut count) },
                HipError::InitializationFailed,
            )?;
            if count <= 0 || self.ordinal >= count as usize {
                return Err(AotForgeError::from(HipError::DeviceNotFound));
            }
            self.bind()?;
            let stream = HipStream::new()?;
            tracing::info!("AMDGPU device {} initialized ({} visible)", self.ordinal, count);
            Ok(stream)
        })?;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.stream.get().is_some()
    }

    fn allocate(&self, size: usize) -> ForgeResult<DeviceBuffer> {
        self.bind()?;
        let memory = HipMemory::new(size).map_err(|e| match e {
            HipError::MemoryAllocationFailed(reason) => AotForgeError::OutOfDeviceMemory {
                requested: size,
                reason,
            },
            other => other.into(),
        })?;
        Ok(Arc::new(memory))
    }

    fn synchronize(&self) -> ForgeResult<()> {
        match self.stream.get() {
            Some(stream) => Ok(stream.synchronize()?),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
