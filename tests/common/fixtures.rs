//! Artifact directory fixtures
//!
//! Builds `metadata.json` from the crate's own metadata types so fixtures
//! stay in sync with the format.

use std::path::Path;

use aotforge::aot::metadata::{
    ArgBinding, DispatchMetadata, GraphMetadata, KernelMetadata, ModuleMetadata, ParamMetadata,
    ParamSignature, TaskMetadata, METADATA_FILE, METADATA_VERSION,
};
use aotforge::backend::cpu::{HostSymbolTable, LaunchContext};
use aotforge::config::Arch;
use aotforge::value::PrimitiveType;

pub fn ndarray(name: &str, dtype: PrimitiveType, field_dim: usize, element_shape: &[usize]) -> ParamMetadata {
    ParamMetadata {
        name: name.to_string(),
        signature: ParamSignature::Ndarray {
            dtype,
            field_dim,
            element_shape: element_shape.to_vec(),
            shape: None,
        },
    }
}

/// Ndarray parameter compiled for exact field extents
pub fn pinned_ndarray(
    name: &str,
    dtype: PrimitiveType,
    shape: &[usize],
    element_shape: &[usize],
) -> ParamMetadata {
    ParamMetadata {
        name: name.to_string(),
        signature: ParamSignature::Ndarray {
            dtype,
            field_dim: shape.len(),
            element_shape: element_shape.to_vec(),
            shape: Some(shape.to_vec()),
        },
    }
}

pub fn scalar(name: &str, dtype: PrimitiveType) -> ParamMetadata {
    ParamMetadata {
        name: name.to_string(),
        signature: ParamSignature::Scalar { dtype },
    }
}

pub fn host_task(symbol: &str) -> TaskMetadata {
    TaskMetadata {
        symbol: symbol.to_string(),
        file: None,
        grid_dim: [1, 1, 1],
        block_dim: [1, 1, 1],
        shared_mem_bytes: 0,
    }
}

/// Dispatch binding every parameter to a symbol, given as `(param, symbol)`
pub fn dispatch(kernel: &str, bindings: &[(&str, &str)]) -> DispatchMetadata {
    DispatchMetadata {
        kernel: kernel.to_string(),
        args: bindings
            .iter()
            .map(|(param, symbol)| ArgBinding {
                param: param.to_string(),
                symbol: symbol.to_string(),
            })
            .collect(),
    }
}

/// Dispatch binding each parameter to the symbol of the same name
pub fn dispatch_same(kernel: &str, params: &[&str]) -> DispatchMetadata {
    let pairs: Vec<(&str, &str)> = params.iter().map(|p| (*p, *p)).collect();
    dispatch(kernel, &pairs)
}

/// Builder for an artifact directory
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    metadata: ModuleMetadata,
}

impl ArtifactBuilder {
    pub fn new(arch: Arch) -> Self {
        ArtifactBuilder {
            metadata: ModuleMetadata {
                version: METADATA_VERSION,
                arch,
                kernels: Vec::new(),
                graphs: Vec::new(),
            },
        }
    }

    pub fn cpu() -> Self {
        Self::new(Arch::Cpu)
    }

    /// Kernel with one host-linked task per symbol
    pub fn kernel(mut self, name: &str, params: Vec<ParamMetadata>, symbols: &[&str]) -> Self {
        self.metadata.kernels.push(KernelMetadata {
            name: name.to_string(),
            params,
            tasks: symbols.iter().map(|s| host_task(s)).collect(),
        });
        self
    }

    pub fn kernel_with_tasks(mut self, name: &str, params: Vec<ParamMetadata>, tasks: Vec<TaskMetadata>) -> Self {
        self.metadata.kernels.push(KernelMetadata {
            name: name.to_string(),
            params,
            tasks,
        });
        self
    }

    pub fn graph(mut self, name: &str, dispatches: Vec<DispatchMetadata>) -> Self {
        self.metadata.graphs.push(GraphMetadata {
            name: name.to_string(),
            dispatches,
        });
        self
    }

    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    pub fn write(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::write(dir.join(METADATA_FILE), self.metadata.to_json_pretty()?)?;
        Ok(())
    }
}

/// Write raw metadata text, for malformed-input tests
pub fn write_raw_metadata(dir: &Path, text: &str) -> anyhow::Result<()> {
    std::fs::write(dir.join(METADATA_FILE), text)?;
    Ok(())
}

// ============================================================================
// Small host kernels
// ============================================================================

/// `fill(x: ndarray<i32>, value: i32)`: x[:] = value
pub unsafe extern "C-unwind" fn fill_i32(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let value: i32 = ctx.scalar(1);
    ctx.array_slice_mut::<i32>(0).fill(value);
}

/// `add(x: ndarray<i32>, y: ndarray<i32>)`: y[i] += x[i]
pub unsafe extern "C-unwind" fn add_i32(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let x = ctx.array_slice::<i32>(0);
    let y = ctx.array_slice_mut::<i32>(1);
    for (dst, src) in y.iter_mut().zip(x) {
        *dst += *src;
    }
}

/// `scale(x: ndarray<i32>, k: i32)`: x[i] *= k
pub unsafe extern "C-unwind" fn scale_i32(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let k: i32 = ctx.scalar(1);
    for v in ctx.array_slice_mut::<i32>(0) {
        *v *= k;
    }
}

/// `sum(x: ndarray<i32>)`: result slot 0 = sum(x)
pub unsafe extern "C-unwind" fn sum_i32(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let total: i64 = ctx.array_slice::<i32>(0).iter().map(|&v| v as i64).sum();
    ctx.set_result(0, total);
}

/// Symbols of the small kernels above
pub fn arith_symbols() -> HostSymbolTable {
    HostSymbolTable::new()
        .with("fill_c0", fill_i32)
        .with("add_c0", add_i32)
        .with("scale_c0", scale_i32)
        .with("sum_c0", sum_i32)
}

/// `fill`, `add`, `scale` and `sum` over `[n]` i32 arrays plus graphs
/// exercising them:
///
/// - `pipeline(a, b, k, seed)`: a = seed; b = seed; b += a; b *= k
/// - `reduce(b)`: result[0] = sum(b)
pub fn arith_module() -> ArtifactBuilder {
    use PrimitiveType::I32;
    ArtifactBuilder::cpu()
        .kernel("fill", vec![ndarray("x", I32, 1, &[]), scalar("value", I32)], &["fill_c0"])
        .kernel("add", vec![ndarray("x", I32, 1, &[]), ndarray("y", I32, 1, &[])], &["add_c0"])
        .kernel("scale", vec![ndarray("x", I32, 1, &[]), scalar("k", I32)], &["scale_c0"])
        .kernel("sum", vec![ndarray("x", I32, 1, &[])], &["sum_c0"])
        .graph(
            "pipeline",
            vec![
                dispatch("fill", &[("x", "a"), ("value", "seed")]),
                dispatch("fill", &[("x", "b"), ("value", "seed")]),
                dispatch("add", &[("x", "a"), ("y", "b")]),
                dispatch("scale", &[("x", "b"), ("k", "k")]),
            ],
        )
        .graph("reduce", vec![dispatch("sum", &[("x", "b")])])
}
