//! Compute backends
//!
//! A backend is a [`ComputeDevice`] (one per session) handing out
//! [`DeviceMemory`] buffers. Kernel launching is backend specific and lives
//! next to each device; the module loaders downcast the session device to
//! the concrete type they target.
//!
//! - [`cpu`] - host reference backend, always built
//! - [`cuda`] - NVIDIA backend through `cudarc` (feature `cuda`)
//! - [`hip_backend`] - AMD backend through the HIP runtime (feature `rocm`)

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "rocm")]
pub mod hip_backend;

use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::{Arch, CompileConfig};
use crate::error::{AotForgeError, ForgeResult};

pub use cpu::CpuDevice;

/// Identity of one runtime session
pub type SessionId = u32;

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_session_id() -> SessionId {
    NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
}

/// A contiguous region of device memory.
///
/// Copies are ordered with respect to launches already enqueued on the
/// owning session's queue only after `synchronize`; the runtime synchronizes
/// before reads.
pub trait DeviceMemory: Send + Sync + Debug {
    fn size(&self) -> usize;

    /// Address as seen by kernels on this backend
    fn device_ptr(&self) -> u64;

    fn copy_from_host(&self, offset: usize, data: &[u8]) -> ForgeResult<()>;

    fn copy_to_host(&self, offset: usize, out: &mut [u8]) -> ForgeResult<()>;

    fn fill_zero(&self) -> ForgeResult<()>;
}

/// Shared handle to a device buffer. In-flight launches hold a clone so the
/// memory outlives them.
pub type DeviceBuffer = Arc<dyn DeviceMemory>;

/// One device driven by one session
pub trait ComputeDevice: Send + Sync + Debug {
    fn arch(&self) -> Arch;

    fn name(&self) -> String;

    /// Probe and bring up the device and its command queue. Idempotent.
    fn initialize(&self) -> ForgeResult<()>;

    fn is_initialized(&self) -> bool;

    /// Allocate `size` zeroed bytes
    fn allocate(&self, size: usize) -> ForgeResult<DeviceBuffer>;

    /// Block until every launch enqueued so far has completed
    fn synchronize(&self) -> ForgeResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Non-owning view of the session device, available before materialization
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    session: SessionId,
    device: Arc<dyn ComputeDevice>,
}

impl DeviceHandle {
    pub(crate) fn new(session: SessionId, device: Arc<dyn ComputeDevice>) -> Self {
        DeviceHandle { session, device }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn arch(&self) -> Arch {
        self.device.arch()
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }
}

/// Select the device implementation for `config` without touching hardware
pub(crate) fn create_device(config: &CompileConfig) -> Arc<dyn ComputeDevice> {
    match config.arch {
        Arch::Cpu => Arc::new(CpuDevice::new(config.cpu_max_num_threads)),
        #[cfg(feature = "cuda")]
        Arch::Cuda => Arc::new(cuda::CudaComputeDevice::new(config.device_ordinal)),
        #[cfg(feature = "rocm")]
        Arch::Amdgpu => Arc::new(hip_backend::HipComputeDevice::new(config.device_ordinal)),
        #[allow(unreachable_patterns)]
        arch => Arc::new(UnavailableDevice { arch }),
    }
}

/// Stand-in for a backend compiled out of this build. Construction succeeds;
/// bringing it up fails.
#[derive(Debug)]
pub(crate) struct UnavailableDevice {
    arch: Arch,
}

impl UnavailableDevice {
    fn unsupported(&self) -> AotForgeError {
        AotForgeError::UnsupportedBackend(format!(
            "{} backend is not available in this build (enable the '{}' feature)",
            self.arch,
            match self.arch {
                Arch::Amdgpu => "rocm",
                other => other.as_str(),
            }
        ))
    }
}

impl ComputeDevice for UnavailableDevice {
    fn arch(&self) -> Arch {
        self.arch
    }

    fn name(&self) -> String {
        format!("{} (unavailable)", self.arch)
    }

    fn initialize(&self) -> ForgeResult<()> {
        Err(self.unsupported())
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn allocate(&self, _size: usize) -> ForgeResult<DeviceBuffer> {
        Err(self.unsupported())
    }

    fn synchronize(&self) -> ForgeResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Bounds check shared by the backends' host copy paths
pub(crate) fn check_copy_range(size: usize, offset: usize, len: usize) -> ForgeResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(AotForgeError::InvalidArgument(format!(
            "copy of {} bytes at offset {} exceeds buffer of {} bytes",
            len, offset, size
        ))),
    }
}
