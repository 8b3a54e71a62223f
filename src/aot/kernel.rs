//! Loaded kernels and argument binding

use std::fmt::{self, Debug};

use crate::aot::metadata::{ParamMetadata, ParamSignature};
use crate::backend::cpu::ArgShape;
use crate::backend::DeviceBuffer;
use crate::error::{AotForgeError, ForgeResult};
use crate::program::RuntimeExecutor;
use crate::value::IValue;

/// One resolved kernel argument
#[derive(Debug, Clone)]
pub struct LaunchArg {
    /// Device address of an ndarray, or scalar bits
    pub word: u64,
    pub shape: ArgShape,
    /// Backing buffer of an ndarray argument
    pub buffer: Option<DeviceBuffer>,
}

/// Backend half of a kernel: enqueues launches on the session's queue.
///
/// `args` are already type-checked and in declared parameter order.
pub trait KernelLauncher: Send + Sync + Debug {
    fn launch(&self, runtime: &RuntimeExecutor, kernel: &str, args: Vec<LaunchArg>)
        -> ForgeResult<()>;

    /// Number of compiled tasks run per launch
    fn num_tasks(&self) -> usize;
}

/// A compiled kernel bound to a device
pub struct Kernel {
    name: String,
    params: Vec<ParamMetadata>,
    launcher: Box<dyn KernelLauncher>,
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("launcher", &self.launcher)
            .finish()
    }
}

impl Kernel {
    pub(crate) fn new(
        name: impl Into<String>,
        params: Vec<ParamMetadata>,
        launcher: Box<dyn KernelLauncher>,
    ) -> Self {
        Kernel {
            name: name.into(),
            params,
            launcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters, in launch order
    pub fn params(&self) -> &[ParamMetadata] {
        &self.params
    }

    pub fn num_tasks(&self) -> usize {
        self.launcher.num_tasks()
    }

    /// Check `value` against `param` and turn it into a launch argument
    pub(crate) fn bind(
        &self,
        runtime: &RuntimeExecutor,
        param: &ParamMetadata,
        value: &IValue<'_>,
    ) -> ForgeResult<LaunchArg> {
        let mismatch = || AotForgeError::ArgumentTypeMismatch {
            parameter: param.name.clone(),
            expected: param.signature.to_string(),
            actual: value.to_string(),
        };

        match (&param.signature, value) {
            (ParamSignature::Scalar { dtype }, IValue::Scalar(scalar)) => {
                if scalar.dtype() != *dtype {
                    return Err(mismatch());
                }
                Ok(LaunchArg {
                    word: scalar.to_bits(),
                    shape: ArgShape::SCALAR,
                    buffer: None,
                })
            }
            (
                ParamSignature::Ndarray {
                    dtype,
                    field_dim,
                    element_shape,
                    shape,
                },
                IValue::Ndarray(nd),
            ) => {
                let shape_matches = match shape {
                    Some(pinned) => nd.shape() == pinned.as_slice(),
                    None => nd.shape().len() == *field_dim,
                };
                if nd.dtype() != *dtype || !shape_matches || nd.element_shape() != element_shape.as_slice() {
                    return Err(mismatch());
                }
                if !nd.fits_allocation() {
                    return Err(AotForgeError::AllocationTooSmall {
                        parameter: param.name.clone(),
                        required: nd.byte_size(),
                        available: nd.allocation().size(),
                    });
                }
                let buffer = runtime.resolve_allocation(&nd.allocation())?;
                let shape = ArgShape::from_dims(&nd.total_shape()).ok_or_else(|| {
                    AotForgeError::InvalidArgument(format!(
                        "parameter '{}': {} extents do not fit the launch ABI",
                        param.name, nd
                    ))
                })?;
                Ok(LaunchArg {
                    word: buffer.device_ptr(),
                    shape,
                    buffer: Some(buffer),
                })
            }
            _ => Err(mismatch()),
        }
    }

    pub(crate) fn launch(&self, runtime: &RuntimeExecutor, args: Vec<LaunchArg>) -> ForgeResult<()> {
        tracing::debug!("dispatch {} ({} args)", self.name, args.len());
        self.launcher.launch(runtime, &self.name, args)
    }
}
