//! Helper traits for allocator trait bounds.
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Scalar};

/// Allocator for node coordinates of dimension `D`.
///
/// Besides the scalar type of the node set, spatial search works on `f64` copies of the
/// coordinates, so both allocators are required wherever nodes are indexed.
pub trait NodeAllocator<T: Scalar, D: DimName>:
    Allocator<T, D>
    // Coordinates stored in the R-tree
    + Allocator<f64, D>
{
}

impl<T, D> NodeAllocator<T, D> for DefaultAllocator
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D> + Allocator<f64, D>,
{
}
