//! Policies that determine per-center stencil sizes, shape parameters and the polynomial
//! degree.
use crate::error::RbfFdError;
use crate::polynomial::monomial_count;
use crate::Real;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Shape parameter `ε` of the basis function at each center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShapeParameter<T> {
    /// The same `ε` for every center.
    Constant(T),
    /// One `ε` per center.
    PerNode(Vec<T>),
    /// `ε_i = factor / h_i`, where `h_i` is the distance from center `i` to its nearest
    /// node at nonzero distance.
    Spacing { factor: T },
}

impl<T: Real> Default for ShapeParameter<T> {
    fn default() -> Self {
        ShapeParameter::Constant(T::one())
    }
}

/// Number of neighbors in the stencil of each center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StencilSize {
    /// Twice the number of monomials of degree `max(d, 1)`, see [`default_stencil_size`].
    Auto,
    Fixed(usize),
    PerNode(Vec<usize>),
}

impl Default for StencilSize {
    fn default() -> Self {
        StencilSize::Auto
    }
}

/// The default stencil size `2 · C(dim + max(degree, 1), dim)`.
pub fn default_stencil_size(dim: usize, degree: i32) -> usize {
    2 * monomial_count(dim, degree.max(1))
}

/// Determines the polynomial degree used for augmentation.
///
/// Without an explicit degree, the degree is the larger of the highest requested
/// derivative order and the minimum degree required by the basis. An explicit degree below
/// the basis minimum is accepted, but the resulting systems may be singular.
pub fn resolve_polynomial_degree(requested: Option<i32>, basis_min_degree: i32, max_order: usize) -> Result<i32, RbfFdError> {
    match requested {
        Some(degree) if degree < -1 => Err(RbfFdError::invalid_policy(format!(
            "polynomial degree must be at least -1, got {}",
            degree
        ))),
        Some(degree) => {
            if degree < basis_min_degree {
                warn!(
                    "Polynomial degree {} is below the minimum degree {} of the basis",
                    degree, basis_min_degree
                );
            }
            if (degree.max(0) as usize) < max_order {
                debug!(
                    "Polynomial degree {} is below the derivative order {}, \
                     operators are not exact for polynomials of that order",
                    degree, max_order
                );
            }
            Ok(degree)
        }
        None => Ok((max_order as i32).max(basis_min_degree)),
    }
}

/// Resolves the stencil size of each of `num_centers` centers.
///
/// `available` is the number of reference nodes that neighbors are selected from.
pub fn resolve_stencil_sizes(
    policy: &StencilSize,
    num_centers: usize,
    dim: usize,
    degree: i32,
    available: usize,
) -> Result<Vec<usize>, RbfFdError> {
    let check_size = |size: usize| {
        if size == 0 {
            Err(RbfFdError::invalid_policy("stencil size must be positive"))
        } else if size > available {
            Err(RbfFdError::InsufficientNeighbors {
                requested: size,
                available,
            })
        } else {
            Ok(size)
        }
    };

    match policy {
        StencilSize::Auto => {
            let size = default_stencil_size(dim, degree);
            // The augmented system needs strictly more nodes than monomials
            let min_size = monomial_count(dim, degree) + 1;
            if size <= available {
                Ok(vec![size; num_centers])
            } else if min_size <= available {
                debug!(
                    "Default stencil size {} exceeds the number of nodes, using {} instead",
                    size, available
                );
                Ok(vec![available; num_centers])
            } else {
                Err(RbfFdError::InsufficientNeighbors {
                    requested: min_size,
                    available,
                })
            }
        }
        StencilSize::Fixed(size) => Ok(vec![check_size(*size)?; num_centers]),
        StencilSize::PerNode(sizes) => {
            if sizes.len() != num_centers {
                return Err(RbfFdError::invalid_policy(format!(
                    "got {} stencil sizes for {} centers",
                    sizes.len(),
                    num_centers
                )));
            }
            sizes.iter().map(|&size| check_size(size)).collect()
        }
    }
}

/// Resolves the shape parameter of each of `num_centers` centers.
///
/// `spacing(i)` must return the nearest nonzero node spacing of center `i`, and is only
/// called for [`ShapeParameter::Spacing`].
pub fn resolve_shape_parameters<T, F>(
    policy: &ShapeParameter<T>,
    num_centers: usize,
    spacing: F,
) -> Result<Vec<T>, RbfFdError>
where
    T: Real,
    F: Fn(usize) -> Option<T> + Sync,
{
    let check_shape = |center: usize, shape: T| {
        if shape > T::zero() && shape.is_finite() {
            Ok(shape)
        } else {
            Err(RbfFdError::invalid_policy(format!(
                "shape parameter of center {} must be positive and finite, got {:?}",
                center, shape
            )))
        }
    };

    match policy {
        ShapeParameter::Constant(shape) => {
            check_shape(0, *shape)?;
            Ok(vec![*shape; num_centers])
        }
        ShapeParameter::PerNode(shapes) => {
            if shapes.len() != num_centers {
                return Err(RbfFdError::invalid_policy(format!(
                    "got {} shape parameters for {} centers",
                    shapes.len(),
                    num_centers
                )));
            }
            shapes
                .iter()
                .enumerate()
                .map(|(i, &shape)| check_shape(i, shape))
                .collect()
        }
        ShapeParameter::Spacing { factor } => (0..num_centers)
            .into_par_iter()
            .map(|i| {
                let h = spacing(i).ok_or_else(|| {
                    RbfFdError::invalid_policy(format!(
                        "center {} has no node at nonzero distance to derive a shape parameter from",
                        i
                    ))
                })?;
                check_shape(i, *factor / h)
            })
            .collect(),
    }
}
