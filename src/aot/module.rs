//! A loaded artifact directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aot::graph::Graph;
use crate::aot::kernel::Kernel;
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult, LookupKind};
use crate::program::RuntimeExecutor;
use crate::value::ArgMap;

/// Read-only registry of the kernels and graphs of one artifact directory
#[derive(Debug)]
pub struct Module<'rt> {
    path: PathBuf,
    arch: Arch,
    runtime: &'rt RuntimeExecutor,
    kernels: HashMap<String, Arc<Kernel>>,
    graphs: HashMap<String, Graph<'rt>>,
}

impl<'rt> Module<'rt> {
    pub(crate) fn new(
        path: PathBuf,
        arch: Arch,
        runtime: &'rt RuntimeExecutor,
        kernels: HashMap<String, Arc<Kernel>>,
        graphs: HashMap<String, Graph<'rt>>,
    ) -> Self {
        Module {
            path,
            arch,
            runtime,
            kernels,
            graphs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn get_kernel(&self, name: &str) -> ForgeResult<&Kernel> {
        self.kernels
            .get(name)
            .map(|k| k.as_ref())
            .ok_or_else(|| AotForgeError::NotFound {
                kind: LookupKind::Kernel,
                name: name.to_string(),
            })
    }

    pub fn get_graph(&self, name: &str) -> ForgeResult<&Graph<'rt>> {
        self.graphs.get(name).ok_or_else(|| AotForgeError::NotFound {
            kind: LookupKind::Graph,
            name: name.to_string(),
        })
    }

    /// Sorted kernel names
    pub fn kernel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted graph names
    pub fn graph_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.graphs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Enqueue a single kernel outside any graph. `args` is keyed by
    /// parameter name.
    pub fn launch_kernel(&self, name: &str, args: &ArgMap<'_>) -> ForgeResult<()> {
        let kernel = self.get_kernel(name)?;
        let launch_args = kernel
            .params()
            .iter()
            .map(|param| {
                let value = args
                    .get(&param.name)
                    .ok_or_else(|| AotForgeError::MissingArgument(param.name.clone()))?;
                kernel.bind(self.runtime, param, value)
            })
            .collect::<ForgeResult<Vec<_>>>()?;
        kernel.launch(self.runtime, launch_args)
    }
}
