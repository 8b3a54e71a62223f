//! CPU backend
//!
//! Host memory plays the role of device memory and an in-order worker queue
//! plays the role of the device stream. This is the reference backend: it is
//! always built and needs no driver.

pub mod launch;
pub mod memory;
pub mod module;
pub mod queue;

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::backend::{ComputeDevice, DeviceBuffer};
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult};
use crate::profiling::KernelProfiler;

pub use launch::{
    ArgShape, CpuLaunch, CpuTask, KernelEntry, LaunchContext, MAX_ARG_DIMS, RESULT_BUFFER_SLOTS,
};
pub use memory::HostMemory;
pub use module::{CpuLibrary, HostSymbolTable};
pub use queue::CommandQueue;

/// The host as a compute device
#[derive(Debug)]
pub struct CpuDevice {
    max_threads: Option<usize>,
    queue: OnceCell<CommandQueue>,
}

impl CpuDevice {
    pub fn new(max_threads: Option<usize>) -> Self {
        CpuDevice {
            max_threads,
            queue: OnceCell::new(),
        }
    }

    pub(crate) fn queue(&self) -> ForgeResult<&CommandQueue> {
        self.queue.get().ok_or_else(|| {
            AotForgeError::DeviceError("CPU device used before initialization".to_string())
        })
    }

    /// Queue a kernel launch behind everything already enqueued
    pub fn enqueue_launch(
        &self,
        launch: CpuLaunch,
        profiler: Option<Arc<dyn KernelProfiler>>,
    ) -> ForgeResult<()> {
        let kernel = launch.kernel.clone();
        self.queue()?
            .enqueue(move || launch.execute(profiler.as_ref()))
            .map_err(|e| AotForgeError::KernelLaunchFailed(format!("{}: {}", kernel, e)))
    }
}

impl ComputeDevice for CpuDevice {
    fn arch(&self) -> Arch {
        Arch::Cpu
    }

    fn name(&self) -> String {
        match self.queue.get() {
            Some(queue) => format!("cpu ({} threads)", queue.num_threads()),
            None => "cpu".to_string(),
        }
    }

    fn initialize(&self) -> ForgeResult<()> {
        let queue = self
            .queue
            .get_or_try_init(|| CommandQueue::new(self.max_threads))?;
        tracing::debug!("CpuDevice::initialize: {} kernel threads", queue.num_threads());
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.queue.get().is_some()
    }

    fn allocate(&self, size: usize) -> ForgeResult<DeviceBuffer> {
        Ok(Arc::new(HostMemory::new(size)?))
    }

    fn synchronize(&self) -> ForgeResult<()> {
        match self.queue.get() {
            Some(queue) => queue.synchronize(),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Run `body(i)` for every `i` in `0..n` on the session's kernel threads.
///
/// Meant for use inside CPU kernels; outside a launch it runs on rayon's
/// global pool.
pub fn parallel_for<F>(n: usize, body: F)
where
    F: Fn(usize) + Sync + Send,
{
    (0..n).into_par_iter().for_each(body);
}
