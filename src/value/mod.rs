//! Value and array types passed between callers and graphs.

pub mod dtype;
pub mod ivalue;
pub mod ndarray;

pub use dtype::{PrimitiveType, ScalarBits};
pub use ivalue::{ArgMap, IValue, Scalar};
pub use ndarray::Ndarray;
