//! AMDGPU backend through the HIP runtime
//!
//! Kernels arrive as HSACO code objects. Every kernel parameter is one
//! 64-bit word (device pointer or scalar bits) followed by the result-buffer
//! pointer; launches go to one stream per session.

mod device;
mod error;
mod ffi;
mod memory;
mod module;
mod stream;

pub use device::HipComputeDevice;
pub use error::{get_error_string, HipError, HipResult};
pub use memory::HipMemory;
pub use module::{HipKernel, HipModule};
pub use stream::HipStream;
