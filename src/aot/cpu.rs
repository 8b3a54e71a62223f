//! CPU module loader

use std::collections::HashMap;
use std::sync::Arc;

use crate::aot::kernel::{KernelLauncher, LaunchArg};
use crate::aot::loader::{AotModuleLoader, AotModuleParams, LoadContext};
use crate::aot::metadata::KernelMetadata;
use crate::aot::module::Module;
use crate::backend::cpu::{CpuDevice, CpuLaunch, CpuLibrary, CpuTask};
use crate::config::Arch;
use crate::error::ForgeResult;
use crate::internal_error;
use crate::program::RuntimeExecutor;

/// Binds tasks from shared libraries in the artifact directory or from the
/// host symbol table
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuAotModuleLoader;

impl AotModuleLoader for CpuAotModuleLoader {
    fn arch(&self) -> Arch {
        Arch::Cpu
    }

    fn load_kernels(
        &self,
        ctx: &LoadContext<'_>,
        kernels: &[KernelMetadata],
    ) -> ForgeResult<Vec<Box<dyn KernelLauncher>>> {
        let mut libraries: HashMap<&str, Arc<CpuLibrary>> = HashMap::new();
        let mut launchers: Vec<Box<dyn KernelLauncher>> = Vec::with_capacity(kernels.len());

        for kernel in kernels {
            let mut tasks = Vec::with_capacity(kernel.tasks.len());
            for task in &kernel.tasks {
                let bound = match task.file.as_deref() {
                    Some(file) => {
                        let library = match libraries.get(file) {
                            Some(lib) => Arc::clone(lib),
                            None => {
                                let lib = Arc::new(CpuLibrary::open(
                                    ctx.module_path,
                                    &ctx.payload_path(file)?,
                                )?);
                                libraries.insert(file, Arc::clone(&lib));
                                lib
                            }
                        };
                        CpuTask {
                            symbol: task.symbol.clone(),
                            entry: library.entry(ctx.module_path, &task.symbol)?,
                            library: Some(library),
                        }
                    }
                    None => {
                        let entry = ctx
                            .host_symbols
                            .and_then(|table| table.get(&task.symbol))
                            .ok_or_else(|| {
                                ctx.invalid_payload(format!(
                                    "task '{}' of kernel '{}' has no library and no host symbol",
                                    task.symbol, kernel.name
                                ))
                            })?;
                        CpuTask::host(task.symbol.clone(), entry)
                    }
                };
                tasks.push(bound);
            }
            tracing::debug!("bound cpu kernel {} ({} tasks)", kernel.name, tasks.len());
            launchers.push(Box::new(CpuKernelLauncher {
                tasks: tasks.into(),
            }));
        }
        Ok(launchers)
    }
}

#[derive(Debug)]
struct CpuKernelLauncher {
    tasks: Arc<[CpuTask]>,
}

impl KernelLauncher for CpuKernelLauncher {
    fn launch(&self, runtime: &RuntimeExecutor, kernel: &str, args: Vec<LaunchArg>) -> ForgeResult<()> {
        let device = runtime
            .device()
            .as_any()
            .downcast_ref::<CpuDevice>()
            .ok_or_else(|| internal_error!("cpu kernel '{}' on a non-cpu device", kernel))?;

        let mut words = Vec::with_capacity(args.len());
        let mut shapes = Vec::with_capacity(args.len());
        let mut buffers = Vec::new();
        for arg in args {
            words.push(arg.word);
            shapes.push(arg.shape);
            buffers.extend(arg.buffer);
        }

        device.enqueue_launch(
            CpuLaunch {
                kernel: kernel.to_string(),
                tasks: Arc::clone(&self.tasks),
                words,
                shapes,
                buffers,
                result_buffer: Arc::clone(runtime.result_buffer().buffer()),
            },
            runtime.profiler().cloned(),
        )
    }

    fn num_tasks(&self) -> usize {
        self.tasks.len()
    }
}

/// Load a CPU artifact directory
pub fn make_aot_module(params: AotModuleParams<'_>) -> ForgeResult<Module<'_>> {
    CpuAotModuleLoader.load(params)
}
