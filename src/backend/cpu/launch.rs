//! Calling convention of ahead-of-time compiled CPU kernels.
//!
//! Every task entry point has the signature
//!
//! ```c
//! void task(const LaunchContext *ctx);
//! ```
//!
//! `ctx->args[i]` is the i-th launch word in the kernel's parameter order:
//! the data pointer of an ndarray argument, or the bit pattern of a scalar
//! in the low bytes. `ctx->arg_shapes[i]` carries the total shape (field
//! extents then element extents) of ndarray arguments and is empty for
//! scalars. `ctx->result_buffer` points at the session's result slots.
//!
//! Rust kernels are declared `unsafe extern "C-unwind" fn(*const LaunchContext)`.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::cpu::module::CpuLibrary;
use crate::backend::DeviceBuffer;
use crate::config::Arch;
use crate::profiling::{KernelProfiler, LaunchRecord};
use crate::value::ScalarBits;

/// Maximum total rank of an ndarray argument
pub const MAX_ARG_DIMS: usize = 8;

/// Number of 64-bit slots in the result buffer
pub const RESULT_BUFFER_SLOTS: usize = 32;

/// Shape of one launch argument
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgShape {
    pub ndim: u32,
    pub dims: [u32; MAX_ARG_DIMS],
}

impl ArgShape {
    pub const SCALAR: ArgShape = ArgShape {
        ndim: 0,
        dims: [0; MAX_ARG_DIMS],
    };

    /// Returns `None` when the rank exceeds [`MAX_ARG_DIMS`] or an extent
    /// does not fit in 32 bits.
    pub fn from_dims(dims: &[usize]) -> Option<Self> {
        if dims.len() > MAX_ARG_DIMS {
            return None;
        }
        let mut shape = ArgShape {
            ndim: dims.len() as u32,
            dims: [0; MAX_ARG_DIMS],
        };
        for (slot, &d) in shape.dims.iter_mut().zip(dims) {
            *slot = u32::try_from(d).ok()?;
        }
        Some(shape)
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims[..self.ndim as usize]
    }

    pub fn num_elements(&self) -> usize {
        self.dims().iter().map(|&d| d as usize).product()
    }
}

/// Launch arguments as seen by a CPU kernel
#[repr(C)]
#[derive(Debug)]
pub struct LaunchContext {
    pub args: *const u64,
    pub arg_shapes: *const ArgShape,
    pub num_args: u32,
    pub result_buffer: *mut u64,
}

impl LaunchContext {
    pub fn num_args(&self) -> usize {
        self.num_args as usize
    }

    /// # Safety
    /// `index` must be below `num_args` and the context must come from a
    /// launch in progress.
    pub unsafe fn word(&self, index: usize) -> u64 {
        *self.args.add(index)
    }

    /// # Safety
    /// As [`word`](Self::word); the argument must be a scalar of type `T`.
    pub unsafe fn scalar<T: ScalarBits>(&self, index: usize) -> T {
        T::from_bits(self.word(index))
    }

    /// # Safety
    /// As [`word`](Self::word).
    pub unsafe fn shape(&self, index: usize) -> &ArgShape {
        &*self.arg_shapes.add(index)
    }

    /// # Safety
    /// As [`word`](Self::word); the argument must be an ndarray of element
    /// type `T` and no other live reference may alias the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn array_slice_mut<'a, T: ScalarBits>(&self, index: usize) -> &'a mut [T] {
        let len = self.shape(index).num_elements();
        std::slice::from_raw_parts_mut(self.word(index) as *mut T, len)
    }

    /// # Safety
    /// As [`array_slice_mut`](Self::array_slice_mut) but shared.
    pub unsafe fn array_slice<'a, T: ScalarBits>(&self, index: usize) -> &'a [T] {
        let len = self.shape(index).num_elements();
        std::slice::from_raw_parts(self.word(index) as *const T, len)
    }

    /// Write a scalar return value into result slot `slot`
    ///
    /// # Safety
    /// `slot` must be below [`RESULT_BUFFER_SLOTS`].
    pub unsafe fn set_result<T: ScalarBits>(&self, slot: usize, value: T) {
        *self.result_buffer.add(slot) = value.to_bits();
    }
}

/// Entry point of one compiled task.
///
/// Uses the `C-unwind` ABI: a panic raised inside a task unwinds back to the
/// queue worker and is reported by the next `synchronize`.
pub type KernelEntry = unsafe extern "C-unwind" fn(*const LaunchContext);

/// A bound task: symbol name plus resolved entry point
#[derive(Debug, Clone)]
pub struct CpuTask {
    pub symbol: String,
    pub entry: KernelEntry,
    /// Library `entry` lives in; `None` for host-linked symbols
    pub library: Option<Arc<CpuLibrary>>,
}

impl CpuTask {
    pub fn host(symbol: impl Into<String>, entry: KernelEntry) -> Self {
        CpuTask {
            symbol: symbol.into(),
            entry,
            library: None,
        }
    }
}

/// Everything one kernel launch needs, owned so it can cross to the queue
#[derive(Debug)]
pub struct CpuLaunch {
    pub kernel: String,
    pub tasks: Arc<[CpuTask]>,
    pub words: Vec<u64>,
    pub shapes: Vec<ArgShape>,
    /// Buffers referenced by `words`; held until the launch has run
    pub buffers: Vec<DeviceBuffer>,
    pub result_buffer: DeviceBuffer,
}

impl CpuLaunch {
    /// Run every task in order on the calling thread
    pub(crate) fn execute(self, profiler: Option<&Arc<dyn KernelProfiler>>) {
        let ctx = LaunchContext {
            args: self.words.as_ptr(),
            arg_shapes: self.shapes.as_ptr(),
            num_args: self.words.len() as u32,
            result_buffer: self.result_buffer.device_ptr() as *mut u64,
        };
        for task in self.tasks.iter() {
            let start = Instant::now();
            // SAFETY: the entry point was resolved for this kernel's metadata,
            // words and shapes are parallel arrays of num_args entries, and the
            // buffers they point into are kept alive by `self.buffers`.
            unsafe { (task.entry)(&ctx) };
            if let Some(profiler) = profiler {
                profiler.record_launch(LaunchRecord::new(
                    self.kernel.as_str(),
                    task.symbol.as_str(),
                    Arch::Cpu,
                    start.elapsed(),
                ));
            }
            tracing::trace!("cpu task {}::{} done", self.kernel, task.symbol);
        }
        drop(self.buffers);
    }
}
