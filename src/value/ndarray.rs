//! Typed, shaped views over device allocations.

use std::fmt;

use crate::memory::DeviceAllocation;
use crate::value::PrimitiveType;

/// A device array: an allocation plus element type, field extents and
/// per-cell element shape.
///
/// Construction is pure bookkeeping. It neither touches the device nor
/// checks that the allocation is large enough for the declared shape; the
/// footprint is compared against the allocation when the array is bound to a
/// kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ndarray {
    allocation: DeviceAllocation,
    dtype: PrimitiveType,
    shape: Vec<usize>,
    element_shape: Vec<usize>,
}

impl Ndarray {
    /// Array of scalar cells
    pub fn new(allocation: DeviceAllocation, dtype: PrimitiveType, shape: impl Into<Vec<usize>>) -> Self {
        Self::with_element_shape(allocation, dtype, shape, Vec::new())
    }

    /// Array whose cells are vectors or matrices (`element_shape` = `[2]`, `[2, 2]`, ...)
    pub fn with_element_shape(
        allocation: DeviceAllocation,
        dtype: PrimitiveType,
        shape: impl Into<Vec<usize>>,
        element_shape: impl Into<Vec<usize>>,
    ) -> Self {
        Ndarray {
            allocation,
            dtype,
            shape: shape.into(),
            element_shape: element_shape.into(),
        }
    }

    pub fn allocation(&self) -> DeviceAllocation {
        self.allocation
    }

    pub fn dtype(&self) -> PrimitiveType {
        self.dtype
    }

    /// Field (outer) extents
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Per-cell (inner) extents; empty for scalar cells
    pub fn element_shape(&self) -> &[usize] {
        &self.element_shape
    }

    /// Field extents followed by element extents
    pub fn total_shape(&self) -> Vec<usize> {
        self.shape.iter().chain(self.element_shape.iter()).copied().collect()
    }

    pub fn num_cells(&self) -> usize {
        self.shape.iter().product()
    }

    /// Scalar elements across all cells
    pub fn num_elements(&self) -> usize {
        self.num_cells()
            .saturating_mul(self.element_shape.iter().product::<usize>())
    }

    /// product(shape) x product(element_shape) x dtype size
    pub fn byte_size(&self) -> usize {
        self.num_elements().saturating_mul(self.dtype.size_of())
    }

    /// Whether the backing allocation covers the declared footprint
    pub fn fits_allocation(&self) -> bool {
        self.byte_size() <= self.allocation.size()
    }
}

impl fmt::Display for Ndarray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ndarray<{}, shape={:?}", self.dtype, self.shape)?;
        if !self.element_shape.is_empty() {
            write!(f, ", element_shape={:?}", self.element_shape)?;
        }
        write!(f, ">")
    }
}
