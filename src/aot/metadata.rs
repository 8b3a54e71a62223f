//! On-disk module description (`metadata.json`).
//!
//! The metadata is the whole contract between the offline compiler and the
//! runtime: kernel signatures, where each kernel's compiled tasks live, and
//! the graphs built from them. It is parsed and validated completely before
//! any payload is touched.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::cpu::MAX_ARG_DIMS;
use crate::config::Arch;
use crate::error::{AotForgeError, ForgeResult, ModuleLoadErrorKind};
use crate::malformed_metadata;
use crate::value::PrimitiveType;

/// File name of the metadata inside an artifact directory
pub const METADATA_FILE: &str = "metadata.json";

/// Metadata format version understood by this runtime
pub const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub version: u32,
    /// Backend the payloads were compiled for
    pub arch: Arch,
    #[serde(default)]
    pub kernels: Vec<KernelMetadata>,
    #[serde(default)]
    pub graphs: Vec<GraphMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelMetadata {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamMetadata>,
    pub tasks: Vec<TaskMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMetadata {
    pub name: String,
    #[serde(flatten)]
    pub signature: ParamSignature,
}

/// Declared type of a kernel parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParamSignature {
    Scalar {
        dtype: PrimitiveType,
    },
    Ndarray {
        dtype: PrimitiveType,
        /// Number of field (outer) dimensions
        field_dim: usize,
        /// Per-cell shape; empty for scalar cells
        #[serde(default)]
        element_shape: Vec<usize>,
        /// Exact field extents, when the kernel was compiled for one shape
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<Vec<usize>>,
    },
}

impl ParamSignature {
    pub fn dtype(&self) -> PrimitiveType {
        match self {
            ParamSignature::Scalar { dtype } | ParamSignature::Ndarray { dtype, .. } => *dtype,
        }
    }

    pub fn is_ndarray(&self) -> bool {
        matches!(self, ParamSignature::Ndarray { .. })
    }

    /// Field plus element dimensions
    pub fn total_dims(&self) -> usize {
        match self {
            ParamSignature::Scalar { .. } => 0,
            ParamSignature::Ndarray {
                field_dim,
                element_shape,
                ..
            } => field_dim + element_shape.len(),
        }
    }

    /// Two signatures can be fed from one argument symbol
    pub fn is_compatible_with(&self, other: &ParamSignature) -> bool {
        match (self, other) {
            (ParamSignature::Scalar { dtype: a }, ParamSignature::Scalar { dtype: b }) => a == b,
            (
                ParamSignature::Ndarray {
                    dtype: da,
                    field_dim: fa,
                    element_shape: ea,
                    shape: sa,
                },
                ParamSignature::Ndarray {
                    dtype: db,
                    field_dim: fb,
                    element_shape: eb,
                    shape: sb,
                },
            ) => {
                da == db
                    && fa == fb
                    && ea == eb
                    && match (sa, sb) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            }
            _ => false,
        }
    }
}

impl fmt::Display for ParamSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSignature::Scalar { dtype } => write!(f, "scalar<{}>", dtype),
            ParamSignature::Ndarray {
                dtype,
                field_dim,
                element_shape,
                shape,
            } => {
                match shape {
                    Some(shape) => write!(f, "ndarray<{}, shape={:?}", dtype, shape)?,
                    None => write!(f, "ndarray<{}, field_dim={}", dtype, field_dim)?,
                }
                if !element_shape.is_empty() {
                    write!(f, ", element_shape={:?}", element_shape)?;
                }
                write!(f, ">")
            }
        }
    }
}

fn unit_dim() -> [u32; 3] {
    [1, 1, 1]
}

/// One compiled entry point of a kernel. Tasks of a kernel run in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub symbol: String,
    /// Payload file relative to the artifact directory. CPU tasks without a
    /// file are resolved from the host symbol table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default = "unit_dim")]
    pub grid_dim: [u32; 3],
    #[serde(default = "unit_dim")]
    pub block_dim: [u32; 3],
    #[serde(default)]
    pub shared_mem_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub name: String,
    pub dispatches: Vec<DispatchMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetadata {
    pub kernel: String,
    pub args: Vec<ArgBinding>,
}

/// Fill kernel parameter `param` from caller argument `symbol`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgBinding {
    pub param: String,
    pub symbol: String,
}

impl ModuleMetadata {
    /// Read `metadata.json` from an artifact directory
    pub fn read_from_dir(module_path: &Path) -> ForgeResult<Self> {
        let file = module_path.join(METADATA_FILE);
        let text = std::fs::read_to_string(&file).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                malformed_metadata!(module_path, "{} is not UTF-8: {}", file.display(), e)
            }
            _ => AotForgeError::module_load(
                module_path,
                ModuleLoadErrorKind::PathNotFound(format!("{}: {}", file.display(), e)),
            ),
        })?;
        Self::parse(module_path, &text)
    }

    /// Parse metadata text; `module_path` is only used for error reporting
    pub fn parse(module_path: &Path, text: &str) -> ForgeResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| malformed_metadata!(module_path, "invalid {}: {}", METADATA_FILE, e))
    }

    pub fn to_json_pretty(&self) -> ForgeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AotForgeError::InternalError(format!("metadata serialization: {}", e)))
    }

    pub fn kernel(&self, name: &str) -> Option<&KernelMetadata> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Fail with `BackendMismatch` unless the payloads target `arch`
    pub fn check_arch(&self, module_path: &Path, arch: Arch) -> ForgeResult<()> {
        if self.arch != arch {
            return Err(AotForgeError::module_load(
                module_path,
                ModuleLoadErrorKind::BackendMismatch {
                    expected: arch.to_string(),
                    found: self.arch.to_string(),
                },
            ));
        }
        Ok(())
    }

    /// Structural checks; every failure is `MalformedMetadata`
    pub fn validate(&self, module_path: &Path) -> ForgeResult<()> {
        if self.version != METADATA_VERSION {
            return Err(malformed_metadata!(
                module_path,
                "unsupported metadata version {} (expected {})",
                self.version,
                METADATA_VERSION
            ));
        }

        let mut kernels: HashMap<&str, &KernelMetadata> = HashMap::new();
        for kernel in &self.kernels {
            if kernels.insert(kernel.name.as_str(), kernel).is_some() {
                return Err(malformed_metadata!(module_path, "duplicate kernel '{}'", kernel.name));
            }
            validate_kernel(module_path, kernel)?;
        }

        let mut graph_names = HashSet::new();
        for graph in &self.graphs {
            if !graph_names.insert(graph.name.as_str()) {
                return Err(malformed_metadata!(module_path, "duplicate graph '{}'", graph.name));
            }
            validate_graph(module_path, graph, &kernels)?;
        }
        Ok(())
    }
}

fn validate_kernel(module_path: &Path, kernel: &KernelMetadata) -> ForgeResult<()> {
    if kernel.tasks.is_empty() {
        return Err(malformed_metadata!(module_path, "kernel '{}' has no tasks", kernel.name));
    }
    let mut names = HashSet::new();
    for param in &kernel.params {
        if !names.insert(param.name.as_str()) {
            return Err(malformed_metadata!(
                module_path,
                "kernel '{}' declares parameter '{}' twice",
                kernel.name,
                param.name
            ));
        }
        if param.signature.total_dims() > MAX_ARG_DIMS {
            return Err(malformed_metadata!(
                module_path,
                "parameter '{}' of kernel '{}' has {} dimensions (max {})",
                param.name,
                kernel.name,
                param.signature.total_dims(),
                MAX_ARG_DIMS
            ));
        }
        if let ParamSignature::Ndarray {
            field_dim,
            shape: Some(shape),
            ..
        } = &param.signature
        {
            if shape.len() != *field_dim {
                return Err(malformed_metadata!(
                    module_path,
                    "parameter '{}' of kernel '{}' pins {} extents for field_dim {}",
                    param.name,
                    kernel.name,
                    shape.len(),
                    field_dim
                ));
            }
        }
    }
    for task in &kernel.tasks {
        if task.symbol.is_empty() {
            return Err(malformed_metadata!(module_path, "kernel '{}' has a task without symbol", kernel.name));
        }
    }
    Ok(())
}

fn validate_graph(
    module_path: &Path,
    graph: &GraphMetadata,
    kernels: &HashMap<&str, &KernelMetadata>,
) -> ForgeResult<()> {
    let mut symbols: HashMap<&str, &ParamSignature> = HashMap::new();

    for (index, dispatch) in graph.dispatches.iter().enumerate() {
        let kernel = kernels.get(dispatch.kernel.as_str()).ok_or_else(|| {
            malformed_metadata!(
                module_path,
                "graph '{}' node {} dispatches unknown kernel '{}'",
                graph.name,
                index,
                dispatch.kernel
            )
        })?;

        let mut bound = HashSet::new();
        for binding in &dispatch.args {
            let param = kernel
                .params
                .iter()
                .find(|p| p.name == binding.param)
                .ok_or_else(|| {
                    malformed_metadata!(
                        module_path,
                        "graph '{}' node {} binds unknown parameter '{}' of kernel '{}'",
                        graph.name,
                        index,
                        binding.param,
                        kernel.name
                    )
                })?;
            if !bound.insert(binding.param.as_str()) {
                return Err(malformed_metadata!(
                    module_path,
                    "graph '{}' node {} binds parameter '{}' twice",
                    graph.name,
                    index,
                    binding.param
                ));
            }
            match symbols.get(binding.symbol.as_str()) {
                Some(previous) if !previous.is_compatible_with(&param.signature) => {
                    return Err(malformed_metadata!(
                        module_path,
                        "graph '{}' uses symbol '{}' as both {} and {}",
                        graph.name,
                        binding.symbol,
                        previous,
                        param.signature
                    ));
                }
                Some(_) => {}
                None => {
                    symbols.insert(binding.symbol.as_str(), &param.signature);
                }
            }
        }

        if let Some(unbound) = kernel.params.iter().find(|p| !bound.contains(p.name.as_str())) {
            return Err(malformed_metadata!(
                module_path,
                "graph '{}' node {} leaves parameter '{}' of kernel '{}' unbound",
                graph.name,
                index,
                unbound.name,
                kernel.name
            ));
        }
    }
    Ok(())
}
