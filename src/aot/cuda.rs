//! CUDA module loader (PTX payloads)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use cudarc::driver::CudaFunction;

use crate::aot::kernel::{KernelLauncher, LaunchArg};
use crate::aot::loader::{AotModuleLoader, AotModuleParams, LoadContext};
use crate::aot::metadata::KernelMetadata;
use crate::aot::module::Module;
use crate::backend::cuda::CudaComputeDevice;
use crate::config::Arch;
use crate::error::ForgeResult;
use crate::internal_error;
use crate::profiling::LaunchRecord;
use crate::program::RuntimeExecutor;

static NEXT_PTX_MODULE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default, Clone, Copy)]
pub struct CudaAotModuleLoader;

fn cuda_device<'a>(runtime: &'a RuntimeExecutor, what: &str) -> ForgeResult<&'a CudaComputeDevice> {
    runtime
        .device()
        .as_any()
        .downcast_ref::<CudaComputeDevice>()
        .ok_or_else(|| internal_error!("{} on a non-cuda device", what))
}

impl AotModuleLoader for CudaAotModuleLoader {
    fn arch(&self) -> Arch {
        Arch::Cuda
    }

    fn load_kernels(
        &self,
        ctx: &LoadContext<'_>,
        kernels: &[KernelMetadata],
    ) -> ForgeResult<Vec<Box<dyn KernelLauncher>>> {
        let device = cuda_device(ctx.executor, "cuda loader")?;

        // Every PTX file is loaded once with all symbols any kernel needs from it.
        let mut symbols_by_file: HashMap<&str, Vec<String>> = HashMap::new();
        for kernel in kernels {
            for task in &kernel.tasks {
                let file = task.file.as_deref().ok_or_else(|| {
                    ctx.invalid_payload(format!(
                        "task '{}' of kernel '{}' names no PTX file",
                        task.symbol, kernel.name
                    ))
                })?;
                let symbols = symbols_by_file.entry(file).or_default();
                if !symbols.contains(&task.symbol) {
                    symbols.push(task.symbol.clone());
                }
            }
        }

        let mut functions: HashMap<(&str, &str), CudaFunction> = HashMap::new();
        for (file, symbols) in &symbols_by_file {
            let path = ctx.payload_path(file)?;
            let ptx = std::fs::read_to_string(&path)
                .map_err(|e| ctx.invalid_payload(format!("cannot read '{}': {}", file, e)))?;
            let module_name = format!(
                "aotforge_{}_{}",
                NEXT_PTX_MODULE.fetch_add(1, Ordering::Relaxed),
                file
            );
            let loaded = device
                .load_ptx(&module_name, ptx, symbols)
                .map_err(|e| ctx.invalid_payload(format!("'{}': {}", file, e)))?;
            for (symbol, func) in symbols.iter().zip(loaded) {
                functions.insert((*file, symbol.as_str()), func);
            }
        }

        kernels
            .iter()
            .map(|kernel| {
                let tasks = kernel
                    .tasks
                    .iter()
                    .map(|task| {
                        let file = task.file.as_deref().unwrap_or_default();
                        let func = functions
                            .get(&(file, task.symbol.as_str()))
                            .cloned()
                            .ok_or_else(|| internal_error!("PTX symbol '{}' vanished", task.symbol))?;
                        Ok(CudaTask {
                            symbol: task.symbol.clone(),
                            func,
                            grid_dim: task.grid_dim,
                            block_dim: task.block_dim,
                            shared_mem_bytes: task.shared_mem_bytes,
                        })
                    })
                    .collect::<ForgeResult<Vec<_>>>()?;
                Ok(Box::new(CudaKernelLauncher { tasks }) as Box<dyn KernelLauncher>)
            })
            .collect()
    }
}

#[derive(Debug)]
struct CudaTask {
    symbol: String,
    func: CudaFunction,
    grid_dim: [u32; 3],
    block_dim: [u32; 3],
    shared_mem_bytes: u32,
}

#[derive(Debug)]
struct CudaKernelLauncher {
    tasks: Vec<CudaTask>,
}

impl KernelLauncher for CudaKernelLauncher {
    fn launch(&self, runtime: &RuntimeExecutor, kernel: &str, args: Vec<LaunchArg>) -> ForgeResult<()> {
        let device = cuda_device(runtime, kernel)?;
        let words: Vec<u64> = args.iter().map(|a| a.word).collect();
        let result_buffer = runtime.result_buffer().device_ptr();

        for task in &self.tasks {
            let start = Instant::now();
            device.launch(
                &task.func,
                task.grid_dim,
                task.block_dim,
                task.shared_mem_bytes,
                &words,
                result_buffer,
            )?;
            // Timing a GPU launch means waiting for it.
            if let Some(profiler) = runtime.profiler() {
                runtime.synchronize()?;
                profiler.record_launch(LaunchRecord::new(
                    kernel,
                    task.symbol.as_str(),
                    Arch::Cuda,
                    start.elapsed(),
                ));
            }
        }
        Ok(())
    }

    fn num_tasks(&self) -> usize {
        self.tasks.len()
    }
}

/// Load a CUDA artifact directory
pub fn make_aot_module(params: AotModuleParams<'_>) -> ForgeResult<Module<'_>> {
    CudaAotModuleLoader.load(params)
}
