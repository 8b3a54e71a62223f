//! aotforge - ahead-of-time compute-graph runtime
//!
//! Loads kernel modules produced by an offline compiler and runs their
//! dispatch graphs on the host CPU, NVIDIA GPUs (feature `cuda`) or AMD GPUs
//! (feature `rocm`), without a compiler present at run time.
//!
//! A session goes through [`Program`] (backend selected) to
//! [`RuntimeExecutor`] (device live, memory pool bound). Modules are loaded
//! against a runtime and their graphs run against caller-supplied
//! [`IValue`] arguments.

#![allow(clippy::too_many_arguments)] // Kernel launches carry grid, block and parameter words
#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level
#![allow(clippy::type_complexity)]

pub mod aot;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod profiling;
pub mod program;
pub mod value;

pub use aot::{make_aot_module, AotModuleLoader, AotModuleParams, Graph, Kernel, Module};
pub use backend::cpu::HostSymbolTable;
pub use config::{Arch, CompileConfig};
pub use error::{AotForgeError, ErrorCategory, ForgeResult};
pub use memory::{DeviceAllocation, MemoryPool};
pub use profiling::{KernelProfiler, LaunchStatsProfiler};
pub use program::{Program, RuntimeExecutor};
pub use value::{ArgMap, IValue, Ndarray, PrimitiveType, Scalar};
