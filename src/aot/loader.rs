//! Backend-independent half of module loading
//!
//! Every backend loader shares one pipeline: check the executor and
//! directory, parse and validate `metadata.json`, then hand the kernel list
//! to the backend to bind payloads. Nothing is returned until every kernel
//! and graph is built.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::aot::graph::Graph;
use crate::aot::kernel::{Kernel, KernelLauncher};
use crate::aot::metadata::{KernelMetadata, ModuleMetadata, METADATA_FILE};
use crate::aot::module::Module;
use crate::backend::cpu::HostSymbolTable;
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult, ModuleLoadErrorKind};
use crate::internal_error;
use crate::program::RuntimeExecutor;

/// Input of a module load
#[derive(Debug)]
pub struct AotModuleParams<'rt> {
    pub module_path: PathBuf,
    pub executor: &'rt RuntimeExecutor,
    /// Entry points for CPU tasks whose metadata names no library file
    pub host_symbols: Option<HostSymbolTable>,
}

impl<'rt> AotModuleParams<'rt> {
    pub fn new(module_path: impl Into<PathBuf>, executor: &'rt RuntimeExecutor) -> Self {
        AotModuleParams {
            module_path: module_path.into(),
            executor,
            host_symbols: None,
        }
    }

    pub fn with_host_symbols(mut self, symbols: HostSymbolTable) -> Self {
        self.host_symbols = Some(symbols);
        self
    }
}

/// What a backend sees while binding payloads
#[derive(Debug)]
pub struct LoadContext<'a> {
    pub module_path: &'a Path,
    pub executor: &'a RuntimeExecutor,
    pub host_symbols: Option<&'a HostSymbolTable>,
}

impl LoadContext<'_> {
    /// Shorthand for an `InvalidPayload` error on this module
    pub fn invalid_payload(&self, message: impl Into<String>) -> AotForgeError {
        AotForgeError::module_load(
            self.module_path,
            ModuleLoadErrorKind::InvalidPayload(message.into()),
        )
    }

    /// Resolve a payload file named by metadata
    pub fn payload_path(&self, file: &str) -> ForgeResult<PathBuf> {
        let path = self.module_path.join(file);
        if !path.is_file() {
            return Err(self.invalid_payload(format!("payload '{}' not found", file)));
        }
        Ok(path)
    }
}

/// One module loader per backend
pub trait AotModuleLoader {
    /// Backend this loader binds payloads for
    fn arch(&self) -> Arch;

    /// Bind the compiled tasks of every kernel, in order
    fn load_kernels(
        &self,
        ctx: &LoadContext<'_>,
        kernels: &[KernelMetadata],
    ) -> ForgeResult<Vec<Box<dyn KernelLauncher>>>;

    fn load<'rt>(&self, params: AotModuleParams<'rt>) -> ForgeResult<Module<'rt>> {
        load_module(self, params)
    }
}

fn load_module<'rt, L: AotModuleLoader + ?Sized>(
    loader: &L,
    params: AotModuleParams<'rt>,
) -> ForgeResult<Module<'rt>> {
    let start = Instant::now();
    let module_path = params.module_path.as_path();
    let arch = loader.arch();

    if params.executor.arch() != arch {
        return Err(AotForgeError::module_load(
            module_path,
            ModuleLoadErrorKind::BackendMismatch {
                expected: arch.to_string(),
                found: params.executor.arch().to_string(),
            },
        ));
    }
    if !module_path.is_dir() {
        return Err(AotForgeError::module_load(
            module_path,
            ModuleLoadErrorKind::PathNotFound(module_path.display().to_string()),
        ));
    }
    let metadata_path = module_path.join(METADATA_FILE);
    if !metadata_path.is_file() {
        return Err(AotForgeError::module_load(
            module_path,
            ModuleLoadErrorKind::PathNotFound(metadata_path.display().to_string()),
        ));
    }

    let metadata = ModuleMetadata::read_from_dir(module_path)?;
    metadata.check_arch(module_path, arch)?;
    metadata.validate(module_path)?;

    let ctx = LoadContext {
        module_path,
        executor: params.executor,
        host_symbols: params.host_symbols.as_ref(),
    };
    let launchers = loader.load_kernels(&ctx, &metadata.kernels)?;
    if launchers.len() != metadata.kernels.len() {
        return Err(internal_error!(
            "{} loader bound {} of {} kernels",
            arch,
            launchers.len(),
            metadata.kernels.len()
        ));
    }

    let kernels: HashMap<String, Arc<Kernel>> = metadata
        .kernels
        .iter()
        .zip(launchers)
        .map(|(meta, launcher)| {
            (
                meta.name.clone(),
                Arc::new(Kernel::new(meta.name.clone(), meta.params.clone(), launcher)),
            )
        })
        .collect();

    let graphs = metadata
        .graphs
        .iter()
        .map(|meta| Ok((meta.name.clone(), Graph::from_metadata(params.executor, meta, &kernels)?)))
        .collect::<ForgeResult<HashMap<_, _>>>()?;

    tracing::info!(
        "Loaded {} module {}: {} kernels, {} graphs in {:?}",
        arch,
        module_path.display(),
        kernels.len(),
        graphs.len(),
        start.elapsed()
    );

    Ok(Module::new(
        params.module_path.clone(),
        arch,
        params.executor,
        kernels,
        graphs,
    ))
}
