//! Graphs: ordered kernel dispatches with symbolic argument bindings
//!
//! A run walks the nodes in declaration order. Each node resolves its
//! bindings against the caller's [`ArgMap`], type-checks them against the
//! target kernel and is enqueued before the next node is looked at. The
//! first failure aborts the run; nodes enqueued before it stay enqueued.

use std::collections::HashMap;
use std::sync::Arc;

use crate::aot::kernel::{Kernel, LaunchArg};
use crate::aot::metadata::{ArgBinding, GraphMetadata, ParamSignature};
use crate::error::{AotForgeError, ForgeResult};
use crate::internal_error;
use crate::program::RuntimeExecutor;
use crate::value::ArgMap;

/// One kernel invocation inside a graph
#[derive(Debug, Clone)]
pub struct DispatchNode {
    kernel: Arc<Kernel>,
    /// Bindings in declaration order, each with the index of the kernel
    /// parameter it fills
    bindings: Vec<(ArgBinding, usize)>,
}

impl DispatchNode {
    pub fn kernel_name(&self) -> &str {
        self.kernel.name()
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn bindings(&self) -> impl Iterator<Item = &ArgBinding> {
        self.bindings.iter().map(|(b, _)| b)
    }

    fn resolve(&self, runtime: &RuntimeExecutor, args: &ArgMap<'_>) -> ForgeResult<Vec<LaunchArg>> {
        let params = self.kernel.params();
        let mut slots: Vec<Option<LaunchArg>> = vec![None; params.len()];

        for (binding, index) in &self.bindings {
            let value = args
                .get(&binding.symbol)
                .ok_or_else(|| AotForgeError::MissingArgument(binding.symbol.clone()))?;
            slots[*index] = Some(self.kernel.bind(runtime, &params[*index], value)?);
        }

        slots
            .into_iter()
            .zip(params)
            .map(|(slot, param)| {
                slot.ok_or_else(|| {
                    internal_error!(
                        "parameter '{}' of kernel '{}' has no binding",
                        param.name,
                        self.kernel.name()
                    )
                })
            })
            .collect()
    }
}

/// A caller-facing argument of a graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphArgument {
    pub symbol: String,
    pub signature: ParamSignature,
}

/// A named, immutable sequence of dispatches bound to one session
#[derive(Debug)]
pub struct Graph<'rt> {
    name: String,
    runtime: &'rt RuntimeExecutor,
    nodes: Vec<DispatchNode>,
    arguments: Vec<GraphArgument>,
}

impl<'rt> Graph<'rt> {
    /// Build from validated metadata
    pub(crate) fn from_metadata(
        runtime: &'rt RuntimeExecutor,
        meta: &GraphMetadata,
        kernels: &HashMap<String, Arc<Kernel>>,
    ) -> ForgeResult<Self> {
        let mut nodes = Vec::with_capacity(meta.dispatches.len());
        let mut arguments: Vec<GraphArgument> = Vec::new();

        for dispatch in &meta.dispatches {
            let kernel = kernels.get(&dispatch.kernel).ok_or_else(|| {
                internal_error!("graph '{}' names unloaded kernel '{}'", meta.name, dispatch.kernel)
            })?;
            let mut bindings = Vec::with_capacity(dispatch.args.len());
            for binding in &dispatch.args {
                let index = kernel
                    .params()
                    .iter()
                    .position(|p| p.name == binding.param)
                    .ok_or_else(|| {
                        internal_error!(
                            "kernel '{}' has no parameter '{}'",
                            kernel.name(),
                            binding.param
                        )
                    })?;
                if !arguments.iter().any(|a| a.symbol == binding.symbol) {
                    arguments.push(GraphArgument {
                        symbol: binding.symbol.clone(),
                        signature: kernel.params()[index].signature.clone(),
                    });
                }
                bindings.push((binding.clone(), index));
            }
            nodes.push(DispatchNode {
                kernel: Arc::clone(kernel),
                bindings,
            });
        }

        Ok(Graph {
            name: meta.name.clone(),
            runtime,
            nodes,
            arguments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[DispatchNode] {
        &self.nodes
    }

    /// Argument symbols in first-use order, with the signature they must match
    pub fn arguments(&self) -> &[GraphArgument] {
        &self.arguments
    }

    /// Enqueue every node in order. Returns once the last node is enqueued;
    /// call [`RuntimeExecutor::synchronize`] to observe completion.
    pub fn run(&self, args: &ArgMap<'_>) -> ForgeResult<()> {
        let _span = tracing::debug_span!("graph_run", graph = %self.name).entered();

        for (index, node) in self.nodes.iter().enumerate() {
            let launch_args = node.resolve(self.runtime, args).map_err(|e| {
                tracing::debug!(
                    "graph '{}' aborted at node {} ({}): {}",
                    self.name,
                    index,
                    node.kernel_name(),
                    e
                );
                e
            })?;
            node.kernel.launch(self.runtime, launch_args)?;
        }

        tracing::debug!("graph '{}' enqueued {} nodes", self.name, self.nodes.len());
        Ok(())
    }
}
