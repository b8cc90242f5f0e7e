//! Monomial bases used to augment RBF-FD systems.
//!
//! The monomials of total degree `≤ d` in `D` variables are ordered first by total degree
//! and then in descending lexicographic order of their exponents, so that in 2D and for
//! degree 2 the exponents are
//!
//! ```text
//! [0, 0], [1, 0], [0, 1], [2, 0], [1, 1], [0, 2]
//! ```
use crate::differential::MultiIndex;
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DefaultAllocator, DimName, OPoint};
use num::integer::binomial;

/// The number of monomials of total degree at most `degree` in `dim` variables.
///
/// This is `C(dim + degree, dim)`, or zero if `degree` is negative.
pub fn monomial_count(dim: usize, degree: i32) -> usize {
    if degree < 0 {
        0
    } else {
        binomial(dim + degree as usize, dim)
    }
}

/// The exponents of all monomials of total degree at most `degree` in `dim` variables.
///
/// A negative degree gives an empty basis (no polynomial augmentation).
pub fn monomial_exponents(dim: usize, degree: i32) -> Vec<MultiIndex> {
    let mut exponents = Vec::with_capacity(monomial_count(dim, degree));
    if dim == 0 || degree < 0 {
        return exponents;
    }
    let mut current = vec![0; dim];
    for total in 0..=degree as usize {
        push_exponents_with_total(total, 0, &mut current, &mut exponents);
    }
    exponents
}

fn push_exponents_with_total(remaining: usize, axis: usize, current: &mut [usize], out: &mut Vec<MultiIndex>) {
    if axis + 1 == current.len() {
        current[axis] = remaining;
        out.push(MultiIndex::new(current.to_vec()));
    } else {
        for e in (0..=remaining).rev() {
            current[axis] = e;
            push_exponents_with_total(remaining - e, axis + 1, current, out);
        }
        current[axis] = 0;
    }
}

/// Evaluates `∂^order x^exponent` at `x`.
///
/// # Panics
///
/// Panics if the dimensions of `x`, `exponent` and `order` differ.
pub fn monomial_derivative<T: Real>(x: &[T], exponent: &MultiIndex, order: &MultiIndex) -> T {
    assert_eq!(x.len(), exponent.dim(), "Point and exponent dimensions must match");
    assert_eq!(x.len(), order.dim(), "Point and derivative dimensions must match");
    let mut result = T::one();
    for (&x_i, &e_i, &a_i) in itertools::izip!(x, exponent.iter(), order.iter()) {
        if a_i > e_i {
            return T::zero();
        }
        let coefficient = ((e_i - a_i + 1)..=e_i).fold(T::one(), |acc, j| acc * T::from_usize(j).unwrap());
        result *= coefficient * x_i.powi((e_i - a_i) as i32);
    }
    result
}

/// Evaluates the derivative `order` of each monomial at each point.
///
/// Returns a matrix with one row per point and one column per exponent.
pub fn evaluate_monomials<T, D>(points: &[OPoint<T, D>], exponents: &[MultiIndex], order: &MultiIndex) -> DMatrix<T>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    DMatrix::from_fn(points.len(), exponents.len(), |i, k| {
        monomial_derivative(points[i].coords.as_slice(), &exponents[k], order)
    })
}
