//! NVIDIA backend through the CUDA driver API (`cudarc`)
//!
//! Kernels arrive as PTX text. Every kernel parameter is one 64-bit word
//! (device pointer or scalar bits) followed by the result-buffer pointer,
//! and launches go to the device's default stream in submission order.

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use cudarc::driver::{CudaFunction, CudaSlice, DevicePtr, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::Ptx;
use once_cell::sync::OnceCell;

use crate::backend::{check_copy_range, ComputeDevice, DeviceBuffer, DeviceMemory};
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult};

type Driver = Arc<cudarc::driver::CudaDevice>;

/// One CUDA GPU
#[derive(Debug)]
pub struct CudaComputeDevice {
    ordinal: usize,
    driver: OnceCell<Driver>,
}

impl CudaComputeDevice {
    pub fn new(ordinal: usize) -> Self {
        CudaComputeDevice {
            ordinal,
            driver: OnceCell::new(),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub(crate) fn driver(&self) -> ForgeResult<&Driver> {
        self.driver.get().ok_or_else(|| {
            AotForgeError::DeviceError("CUDA device used before initialization".to_string())
        })
    }

    /// Load a PTX image and resolve `symbols` from it.
    ///
    /// `module_name` must be unique per device.
    pub fn load_ptx(
        &self,
        module_name: &str,
        ptx_source: String,
        symbols: &[String],
    ) -> ForgeResult<Vec<CudaFunction>> {
        let driver = self.driver()?;
        // cudarc keys functions by &'static str; modules live for the session.
        let names: Vec<&'static str> = symbols
            .iter()
            .map(|s| &*Box::leak(s.clone().into_boxed_str()))
            .collect();
        let module: &'static str = Box::leak(module_name.to_string().into_boxed_str());

        driver
            .load_ptx(Ptx::from_src(ptx_source), module, &names)
            .map_err(|e| AotForgeError::DeviceError(format!("PTX load failed: {}", e)))?;

        names
            .iter()
            .map(|name| {
                driver.get_func(module, name).ok_or_else(|| {
                    AotForgeError::DeviceError(format!("CUDA function '{}' not found", name))
                })
            })
            .collect()
    }

    /// Enqueue one task with flattened 64-bit parameters
    pub fn launch(
        &self,
        func: &CudaFunction,
        grid_dim: [u32; 3],
        block_dim: [u32; 3],
        shared_mem_bytes: u32,
        words: &[u64],
        result_buffer: u64,
    ) -> ForgeResult<()> {
        self.driver()?
            .bind_to_thread()
            .map_err(|e| AotForgeError::DeviceError(format!("bind context: {}", e)))?;

        let mut storage: Vec<u64> = Vec::with_capacity(words.len() + 1);
        storage.extend_from_slice(words);
        storage.push(result_buffer);
        let mut params: Vec<*mut c_void> = storage
            .iter_mut()
            .map(|w| w as *mut u64 as *mut c_void)
            .collect();

        let cfg = LaunchConfig {
            grid_dim: (grid_dim[0], grid_dim[1], grid_dim[2]),
            block_dim: (block_dim[0], block_dim[1], block_dim[2]),
            shared_mem_bytes,
        };
        // SAFETY: `params` points at `storage`, which outlives the call; the
        // driver copies parameter values at launch time.
        unsafe { func.clone().launch(cfg, &mut params) }
            .map_err(|e| AotForgeError::KernelLaunchFailed(e.to_string()))
    }
}

impl ComputeDevice for CudaComputeDevice {
    fn arch(&self) -> Arch {
        Arch::Cuda
    }

    fn name(&self) -> String {
        format!("cuda:{}", self.ordinal)
    }

    fn initialize(&self) -> ForgeResult<()> {
        self.driver.get_or_try_init(|| {
            let driver = cudarc::driver::CudaDevice::new(self.ordinal).map_err(|e| {
                AotForgeError::UnsupportedBackend(format!(
                    "CUDA device {} unavailable: {}",
                    self.ordinal, e
                ))
            })?;
            tracing::info!("CUDA device {} initialized", self.ordinal);
            Ok::<_, AotForgeError>(driver)
        })?;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.driver.get().is_some()
    }

    fn allocate(&self, size: usize) -> ForgeResult<DeviceBuffer> {
        let driver = self.driver()?;
        let slice = driver
            .alloc_zeros::<u8>(size)
            .map_err(|e| AotForgeError::OutOfDeviceMemory {
                requested: size,
                reason: e.to_string(),
            })?;
        Ok(Arc::new(CudaMemory {
            driver: Arc::clone(driver),
            slice,
            size,
        }))
    }

    fn synchronize(&self) -> ForgeResult<()> {
        match self.driver.get() {
            Some(driver) => driver
                .synchronize()
                .map_err(|e| AotForgeError::KernelLaunchFailed(format!("synchronize: {}", e))),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Device memory on a CUDA GPU
pub struct CudaMemory {
    driver: Driver,
    slice: CudaSlice<u8>,
    size: usize,
}

impl fmt::Debug for CudaMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaMemory")
            .field("ptr", &format_args!("{:#x}", self.device_ptr()))
            .field("size", &self.size)
            .finish()
    }
}

impl CudaMemory {
    fn bind(&self) -> ForgeResult<()> {
        self.driver
            .bind_to_thread()
            .map_err(|e| AotForgeError::DeviceError(format!("bind context: {}", e)))
    }
}

impl DeviceMemory for CudaMemory {
    fn size(&self) -> usize {
        self.size
    }

    fn device_ptr(&self) -> u64 {
        *self.slice.device_ptr()
    }

    fn copy_from_host(&self, offset: usize, data: &[u8]) -> ForgeResult<()> {
        check_copy_range(self.size, offset, data.len())?;
        self.bind()?;
        // SAFETY: destination range checked above.
        unsafe { cudarc::driver::result::memcpy_htod_sync(self.device_ptr() + offset as u64, data) }
            .map_err(|e| AotForgeError::DeviceError(format!("htod copy: {}", e)))
    }

    fn copy_to_host(&self, offset: usize, out: &mut [u8]) -> ForgeResult<()> {
        check_copy_range(self.size, offset, out.len())?;
        self.bind()?;
        // SAFETY: source range checked above.
        unsafe { cudarc::driver::result::memcpy_dtoh_sync(out, self.device_ptr() + offset as u64) }
            .map_err(|e| AotForgeError::DeviceError(format!("dtoh copy: {}", e)))
    }

    fn fill_zero(&self) -> ForgeResult<()> {
        self.bind()?;
        // SAFETY: the whole slice belongs to us.
        unsafe { cudarc::driver::result::memset_d8_sync(self.device_ptr(), 0, self.size) }
            .map_err(|e| AotForgeError::DeviceError(format!("memset: {}", e)))
    }
}
