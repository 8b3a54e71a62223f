//! Ahead-of-time compiled modules
//!
//! An artifact directory holds `metadata.json` plus backend payloads. A
//! backend loader turns it into a [`Module`]: kernels bound to the session
//! device and graphs built from them.
//!
//! - [`metadata`] - on-disk format and its validation
//! - [`kernel`] / [`graph`] / [`module`] - the loaded objects
//! - [`loader`] - the [`AotModuleLoader`] contract and shared pipeline
//! - [`cpu`], [`cuda`], [`amdgpu`] - per-backend loaders

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "rocm")]
pub mod amdgpu;
pub mod graph;
pub mod kernel;
pub mod loader;
pub mod metadata;
pub mod module;

pub use graph::{DispatchNode, Graph, GraphArgument};
pub use kernel::{Kernel, KernelLauncher, LaunchArg};
pub use loader::{AotModuleLoader, AotModuleParams, LoadContext};
pub use metadata::{ModuleMetadata, ParamMetadata, ParamSignature, METADATA_FILE, METADATA_VERSION};
pub use module::Module;

use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult};

/// Load an artifact directory with the loader for `arch`.
///
/// Fails with `UnsupportedBackend` when that loader was not built in.
pub fn make_aot_module(arch: Arch, params: AotModuleParams<'_>) -> ForgeResult<Module<'_>> {
    match arch {
        Arch::Cpu => cpu::make_aot_module(params),
        #[cfg(feature = "cuda")]
        Arch::Cuda => cuda::make_aot_module(params),
        #[cfg(feature = "rocm")]
        Arch::Amdgpu => amdgpu::make_aot_module(params),
        #[allow(unreachable_patterns)]
        other => Err(AotForgeError::UnsupportedBackend(format!(
            "aotforge was built without the {} module loader",
            other
        ))),
    }
}
