//! Tagged values crossing the caller/graph boundary.

use std::collections::HashMap;
use std::fmt;

use half::f16;

use crate::value::{Ndarray, PrimitiveType, ScalarBits};

/// A scalar argument held by value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F16(f16),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn dtype(&self) -> PrimitiveType {
        match self {
            Scalar::I8(_) => PrimitiveType::I8,
            Scalar::I16(_) => PrimitiveType::I16,
            Scalar::I32(_) => PrimitiveType::I32,
            Scalar::I64(_) => PrimitiveType::I64,
            Scalar::U8(_) => PrimitiveType::U8,
            Scalar::U16(_) => PrimitiveType::U16,
            Scalar::U32(_) => PrimitiveType::U32,
            Scalar::U64(_) => PrimitiveType::U64,
            Scalar::F16(_) => PrimitiveType::F16,
            Scalar::F32(_) => PrimitiveType::F32,
            Scalar::F64(_) => PrimitiveType::F64,
        }
    }

    /// Launch-word encoding of the value
    pub fn to_bits(&self) -> u64 {
        match *self {
            Scalar::I8(v) => v.to_bits(),
            Scalar::I16(v) => v.to_bits(),
            Scalar::I32(v) => v.to_bits(),
            Scalar::I64(v) => v.to_bits(),
            Scalar::U8(v) => v.to_bits(),
            Scalar::U16(v) => v.to_bits(),
            Scalar::U32(v) => v.to_bits(),
            Scalar::U64(v) => v.to_bits(),
            Scalar::F16(v) => ScalarBits::to_bits(v),
            Scalar::F32(v) => ScalarBits::to_bits(v),
            Scalar::F64(v) => ScalarBits::to_bits(v),
        }
    }
}

macro_rules! impl_scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Scalar::$variant(value)
                }
            }

            impl<'a> From<$ty> for IValue<'a> {
                fn from(value: $ty) -> Self {
                    IValue::Scalar(Scalar::$variant(value))
                }
            }
        )*
    };
}

impl_scalar_from! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f16 => F16,
    f32 => F32,
    f64 => F64,
}

/// Argument value for a graph run: a scalar by value or a borrowed ndarray.
///
/// IValues are cheap and transient; build a fresh map per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IValue<'a> {
    Scalar(Scalar),
    Ndarray(&'a Ndarray),
}

impl<'a> IValue<'a> {
    /// Wrap a scalar or an ndarray reference
    pub fn create(value: impl Into<IValue<'a>>) -> Self {
        value.into()
    }

    pub fn dtype(&self) -> PrimitiveType {
        match self {
            IValue::Scalar(s) => s.dtype(),
            IValue::Ndarray(nd) => nd.dtype(),
        }
    }

    pub fn as_ndarray(&self) -> Option<&'a Ndarray> {
        match self {
            IValue::Ndarray(nd) => Some(nd),
            IValue::Scalar(_) => None,
        }
    }
}

impl<'a> From<&'a Ndarray> for IValue<'a> {
    fn from(value: &'a Ndarray) -> Self {
        IValue::Ndarray(value)
    }
}

impl<'a> From<Scalar> for IValue<'a> {
    fn from(value: Scalar) -> Self {
        IValue::Scalar(value)
    }
}

impl fmt::Display for IValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IValue::Scalar(s) => write!(f, "scalar<{}>", s.dtype()),
            IValue::Ndarray(nd) => write!(f, "{}", nd),
        }
    }
}

/// Argument map consumed by `Graph::run`, keyed by argument symbol
pub type ArgMap<'a> = HashMap<String, IValue<'a>>;
