//! Session lifecycle: [`Program`] (constructed) and [`RuntimeExecutor`]
//! (materialized).
//!
//! Startup is two-phase because the memory pool needs the device handle
//! before the runtime can be finalized:
//!
//! ```rust,no_run
//! use aotforge::config::CompileConfig;
//! use aotforge::memory::MemoryPool;
//! use aotforge::program::Program;
//!
//! # fn main() -> aotforge::error::ForgeResult<()> {
//! let config = CompileConfig::default();
//! let program = Program::new(config.clone());
//! let pool = MemoryPool::new(config.arch, &program.compute_device())?;
//! let runtime = program.materialize_runtime(pool, None)?;
//!
//! let x = runtime.allocate_memory_ndarray(8192 * 2 * 4)?;
//! runtime.synchronize()?;
//! # let _ = x;
//! # Ok(())
//! # }
//! ```
//!
//! Allocation, module loading and dispatch only exist on
//! [`RuntimeExecutor`], so they cannot be reached before materialization.

use std::sync::{Arc, Mutex};

use crate::backend::cpu::RESULT_BUFFER_SLOTS;
use crate::backend::{
    create_device, next_session_id, ComputeDevice, DeviceBuffer, DeviceHandle, SessionId,
};
use crate::config::{Arch, CompileConfig};
use crate::error::{AotForgeError, ForgeResult};
use crate::memory::{DeviceAllocation, MemoryPool, PoolStats};
use crate::profiling::{KernelProfiler, LaunchStatsProfiler};
use crate::value::dtype::{as_bytes, as_bytes_mut};
use crate::value::{Ndarray, PrimitiveType, ScalarBits};

/// A session that has picked its backend but not touched the hardware yet
#[derive(Debug)]
pub struct Program {
    config: CompileConfig,
    session: SessionId,
    device: Arc<dyn ComputeDevice>,
}

impl Program {
    /// Select the backend named by `config`. Availability is not checked
    /// until [`materialize_runtime`](Self::materialize_runtime).
    pub fn new(config: CompileConfig) -> Self {
        let session = next_session_id();
        let device = create_device(&config);
        tracing::debug!("Program::new: session {} targeting {}", session, config.arch);
        Program {
            config,
            session,
            device,
        }
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Device handle for building the session's [`MemoryPool`]
    pub fn compute_device(&self) -> DeviceHandle {
        DeviceHandle::new(self.session, Arc::clone(&self.device))
    }

    /// Bring up the device, bind `pool` and `profiler`, and allocate the
    /// result buffer.
    ///
    /// When `profiler` is `None` and the config asks for kernel profiling, a
    /// [`LaunchStatsProfiler`] is created.
    pub fn materialize_runtime(
        self,
        pool: MemoryPool,
        profiler: Option<Arc<dyn KernelProfiler>>,
    ) -> ForgeResult<RuntimeExecutor> {
        self.device.initialize().map_err(|e| match e {
            AotForgeError::UnsupportedBackend(_) => e,
            other => AotForgeError::UnsupportedBackend(format!(
                "{} backend failed to initialize: {}",
                self.config.arch, other
            )),
        })?;

        if pool.session() != self.session {
            return Err(AotForgeError::InvalidConfiguration(format!(
                "memory pool belongs to session {}, program is session {}",
                pool.session(),
                self.session
            )));
        }

        let result_buffer = ResultBuffer {
            buffer: self.device.allocate(RESULT_BUFFER_SLOTS * std::mem::size_of::<u64>())?,
        };

        let profiler = match profiler {
            Some(p) => Some(p),
            None if self.config.kernel_profiler => {
                Some(Arc::new(LaunchStatsProfiler::new()) as Arc<dyn KernelProfiler>)
            }
            None => None,
        };

        tracing::info!(
            "Runtime materialized: session {} on {} (profiler: {})",
            self.session,
            self.device.name(),
            profiler.is_some()
        );

        Ok(RuntimeExecutor {
            config: self.config,
            session: self.session,
            device: self.device,
            pool: Mutex::new(pool),
            result_buffer,
            profiler,
        })
    }
}

/// Host-visible slots where kernels return scalar values
#[derive(Debug)]
pub struct ResultBuffer {
    buffer: DeviceBuffer,
}

impl ResultBuffer {
    /// Address passed to every kernel launch
    pub fn device_ptr(&self) -> u64 {
        self.buffer.device_ptr()
    }

    pub fn slots(&self) -> usize {
        RESULT_BUFFER_SLOTS
    }

    pub(crate) fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }
}

/// A materialized session: device, queue, memory pool, result buffer and
/// optional profiler.
///
/// Dropping the executor waits for outstanding launches before releasing
/// device memory.
#[derive(Debug)]
pub struct RuntimeExecutor {
    config: CompileConfig,
    session: SessionId,
    device: Arc<dyn ComputeDevice>,
    pool: Mutex<MemoryPool>,
    result_buffer: ResultBuffer,
    profiler: Option<Arc<dyn KernelProfiler>>,
}

impl RuntimeExecutor {
    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    pub fn arch(&self) -> Arch {
        self.config.arch
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub(crate) fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    /// Allocate `byte_size` zeroed bytes of device memory
    pub fn allocate_memory_ndarray(&self, byte_size: usize) -> ForgeResult<DeviceAllocation> {
        self.pool.lock()?.allocate(byte_size)
    }

    /// Allocate storage sized for the given shape and wrap it in an [`Ndarray`]
    pub fn allocate_ndarray(
        &self,
        dtype: PrimitiveType,
        shape: &[usize],
        element_shape: &[usize],
    ) -> ForgeResult<Ndarray> {
        let bytes = shape
            .iter()
            .chain(element_shape)
            .try_fold(dtype.size_of(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                AotForgeError::InvalidArgument(format!(
                    "ndarray {:?}x{:?} of {} overflows usize",
                    shape, element_shape, dtype
                ))
            })?;
        let allocation = self.allocate_memory_ndarray(bytes)?;
        Ok(Ndarray::with_element_shape(
            allocation,
            dtype,
            shape.to_vec(),
            element_shape.to_vec(),
        ))
    }

    /// Release an allocation.
    ///
    /// Memory still referenced by launches that have not completed is kept
    /// alive until they finish on the CPU backend; on GPU backends the
    /// caller must synchronize first.
    pub fn deallocate_memory_ndarray(&self, allocation: DeviceAllocation) -> ForgeResult<()> {
        self.pool.lock()?.free(allocation)
    }

    /// Block until every launch enqueued so far has completed
    pub fn synchronize(&self) -> ForgeResult<()> {
        self.device.synchronize()
    }

    pub fn result_buffer(&self) -> &ResultBuffer {
        &self.result_buffer
    }

    /// Read scalar result slot `index` after waiting for outstanding launches
    pub fn fetch_result<T: ScalarBits>(&self, index: usize) -> ForgeResult<T> {
        if index >= RESULT_BUFFER_SLOTS {
            return Err(AotForgeError::InvalidArgument(format!(
                "result slot {} out of range (0..{})",
                index, RESULT_BUFFER_SLOTS
            )));
        }
        self.synchronize()?;
        let mut word = [0u8; 8];
        self.result_buffer
            .buffer()
            .copy_to_host(index * std::mem::size_of::<u64>(), &mut word)?;
        Ok(T::from_bits(u64::from_le_bytes(word)))
    }

    /// Upload `data` into the array's storage, after outstanding launches
    pub fn write_ndarray<T: ScalarBits>(&self, ndarray: &Ndarray, data: &[T]) -> ForgeResult<()> {
        self.check_host_view::<T>(ndarray, data.len())?;
        let buffer = self.resolve_allocation(&ndarray.allocation())?;
        self.synchronize()?;
        buffer.copy_from_host(0, as_bytes(data))
    }

    /// Download the array's contents, after outstanding launches
    pub fn read_ndarray<T: ScalarBits>(&self, ndarray: &Ndarray) -> ForgeResult<Vec<T>> {
        let len = ndarray.num_elements();
        self.check_host_view::<T>(ndarray, len)?;
        let buffer = self.resolve_allocation(&ndarray.allocation())?;
        self.synchronize()?;
        let mut out = vec![T::from_bits(0); len];
        buffer.copy_to_host(0, as_bytes_mut(&mut out))?;
        Ok(out)
    }

    pub fn pool_stats(&self) -> ForgeResult<PoolStats> {
        Ok(self.pool.lock()?.stats())
    }

    /// Give cached free buffers back to the device
    pub fn release_cached_memory(&self) -> ForgeResult<()> {
        self.pool.lock()?.release_cached();
        Ok(())
    }

    pub fn profiler(&self) -> Option<&Arc<dyn KernelProfiler>> {
        self.profiler.as_ref()
    }

    pub(crate) fn resolve_allocation(&self, allocation: &DeviceAllocation) -> ForgeResult<DeviceBuffer> {
        self.pool.lock()?.resolve(allocation)
    }

    fn check_host_view<T: ScalarBits>(&self, ndarray: &Ndarray, len: usize) -> ForgeResult<()> {
        if T::DTYPE != ndarray.dtype() {
            return Err(AotForgeError::InvalidArgument(format!(
                "host element type {} does not match {}",
                T::DTYPE,
                ndarray
            )));
        }
        if len != ndarray.num_elements() {
            return Err(AotForgeError::InvalidArgument(format!(
                "{} has {} elements, host data has {}",
                ndarray,
                ndarray.num_elements(),
                len
            )));
        }
        if !ndarray.fits_allocation() {
            return Err(AotForgeError::AllocationTooSmall {
                parameter: ndarray.to_string(),
                required: ndarray.byte_size(),
                available: ndarray.allocation().size(),
            });
        }
        Ok(())
    }
}

impl Drop for RuntimeExecutor {
    fn drop(&mut self) {
        if let Err(e) = self.device.synchronize() {
            tracing::warn!("session {} teardown: {}", self.session, e);
        }
        tracing::debug!("RuntimeExecutor dropped: session {}", self.session);
    }
}
