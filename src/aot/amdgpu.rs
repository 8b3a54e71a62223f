//! AMDGPU module loader (HSACO payloads)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::aot::kernel::{KernelLauncher, LaunchArg};
use crate::aot::loader::{AotModuleLoader, AotModuleParams, LoadContext};
use crate::aot::metadata::KernelMetadata;
use crate::aot::module::Module;
use crate::backend::hip_backend::{HipComputeDevice, HipKernel, HipModule};
use crate::config::Arch;
use crate::error::ForgeResult;
use crate::internal_error;
use crate::profiling::LaunchRecord;
use crate::program::RuntimeExecutor;

#[derive(Debug, Default, Clone, Copy)]
pub struct AmdgpuAotModuleLoader;

fn hip_device<'a>(runtime: &'a RuntimeExecutor, what: &str) -> ForgeResult<&'a HipComputeDevice> {
    runtime
        .device()
        .as_any()
        .downcast_ref::<HipComputeDevice>()
        .ok_or_else(|| internal_error!("{} on a non-amdgpu device", what))
}

impl AotModuleLoader for AmdgpuAotModuleLoader {
    fn arch(&self) -> Arch {
        Arch::Amdgpu
    }

    fn load_kernels(
        &self,
        ctx: &LoadContext<'_>,
        kernels: &[KernelMetadata],
    ) -> ForgeResult<Vec<Box<dyn KernelLauncher>>> {
        // Code objects need a current device.
        hip_device(ctx.executor, "amdgpu loader")?;

        let mut modules: HashMap<&str, Arc<HipModule>> = HashMap::new();
        let mut launchers: Vec<Box<dyn KernelLauncher>> = Vec::with_capacity(kernels.len());

        for kernel in kernels {
            let mut tasks = Vec::with_capacity(kernel.tasks.len());
            for task in &kernel.tasks {
                let file = task.file.as_deref().ok_or_else(|| {
                    ctx.invalid_payload(format!(
                        "task '{}' of kernel '{}' names no code object",
                        task.symbol, kernel.name
                    ))
                })?;
                let module = match modules.get(file) {
                    Some(module) => Arc::clone(module),
                    None => {
                        let module = HipModule::load_from_file(&ctx.payload_path(file)?)
                            .map(Arc::new)
                            .map_err(|e| ctx.invalid_payload(e.to_string()))?;
                        modules.insert(file, Arc::clone(&module));
                        module
                    }
                };
                let function = HipKernel::from_module(&module, &task.symbol)
                    .map_err(|e| ctx.invalid_payload(e.to_string()))?;
                tasks.push(HipTask {
                    function,
                    _module: module,
                    grid_dim: task.grid_dim,
                    block_dim: task.block_dim,
                    shared_mem_bytes: task.shared_mem_bytes,
                });
            }
            launchers.push(Box::new(HipKernelLauncher { tasks }));
        }
        Ok(launchers)
    }
}

#[derive(Debug)]
struct HipTask {
    function: HipKernel,
    /// Keeps the code object loaded while `function` is reachable
    _module: Arc<HipModule>,
    grid_dim: [u32; 3],
    block_dim: [u32; 3],
    shared_mem_bytes: u32,
}

#[derive(Debug)]
struct HipKernelLauncher {
    tasks: Vec<HipTask>,
}

impl KernelLauncher for HipKernelLauncher {
    fn launch(&self, runtime: &RuntimeExecutor, kernel: &str, args: Vec<LaunchArg>) -> ForgeResult<()> {
        let device = hip_device(runtime, kernel)?;
        let words: Vec<u64> = args.iter().map(|a| a.word).collect();
        let result_buffer = runtime.result_buffer().device_ptr();

        for task in &self.tasks {
            let start = Instant::now();
            device.launch(
                &task.function,
                task.grid_dim,
                task.block_dim,
                task.shared_mem_bytes,
                &words,
                result_buffer,
            )?;
            if let Some(profiler) = runtime.profiler() {
                runtime.synchronize()?;
                profiler.record_launch(LaunchRecord::new(
                    kernel,
                    task.function.name(),
                    Arch::Amdgpu,
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

/// Load an AMDGPU artifact directory
pub fn make_aot_module(params: AotModuleParams<'_>) -> ForgeResult<Module<'_>> {
    AmdgpuAotModuleLoader.load(params)
}
