//! Primitive element types and their launch-word encoding.

use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

/// Scalar element type of kernel parameters and ndarrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
}

impl PrimitiveType {
    /// Size of one element in bytes
    pub fn size_of(&self) -> usize {
        match self {
            PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 | PrimitiveType::F16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            PrimitiveType::F16 | PrimitiveType::F32 | PrimitiveType::F64
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F16 => "f16",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host types that map onto a [`PrimitiveType`].
///
/// Scalars travel to kernels as one 64-bit launch word holding the value's
/// bit pattern in the low bytes (little-endian), which is also how kernels
/// write scalar returns into the result buffer.
pub trait ScalarBits: Copy + Send + Sync + 'static {
    const DTYPE: PrimitiveType;

    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_scalar_bits_int {
    ($($ty:ty => $dtype:ident, $unsigned:ty);* $(;)?) => {
        $(
            impl ScalarBits for $ty {
                const DTYPE: PrimitiveType = PrimitiveType::$dtype;

                fn to_bits(self) -> u64 {
                    self as $unsigned as u64
                }

                fn from_bits(bits: u64) -> Self {
                    bits as $unsigned as $ty
                }
            }
        )*
    };
}

impl_scalar_bits_int! {
    i8 => I8, u8;
    i16 => I16, u16;
    i32 => I32, u32;
    i64 => I64, u64;
    u8 => U8, u8;
    u16 => U16, u16;
    u32 => U32, u32;
    u64 => U64, u64;
}

impl ScalarBits for f16 {
    const DTYPE: PrimitiveType = PrimitiveType::F16;

    fn to_bits(self) -> u64 {
        f16::to_bits(self) as u64
    }

    fn from_bits(bits: u64) -> Self {
        f16::from_bits(bits as u16)
    }
}

impl ScalarBits for f32 {
    const DTYPE: PrimitiveType = PrimitiveType::F32;

    fn to_bits(self) -> u64 {
        f32::to_bits(self) as u64
    }

    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl ScalarBits for f64 {
    const DTYPE: PrimitiveType = PrimitiveType::F64;

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// Reinterpret a slice of scalars as raw bytes for host/device copies.
pub(crate) fn as_bytes<T: ScalarBits>(data: &[T]) -> &[u8] {
    // SAFETY: every ScalarBits implementor is a plain numeric type without
    // padding or invalid bit patterns.
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}

pub(crate) fn as_bytes_mut<T: ScalarBits>(data: &mut [T]) -> &mut [u8] {
    // SAFETY: see `as_bytes`; any byte pattern is a valid numeric value.
    unsafe {
        std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, std::mem::size_of_val(data))
    }
}
