//! Meshless differential operators on scattered nodes, based on radial basis function
//! generated finite differences (RBF-FD).
//!
//! For every center, a stencil of nearby nodes is selected and a small augmented
//! RBF + polynomial system is solved for weights that approximate a linear differential
//! operator at the center. The weights of all centers are assembled into a sparse matrix,
//! so that applying the operator to nodal values is a sparse matrix-vector product.
//!
//! ```
//! use rbf_fd::assembly::OperatorBuilder;
//! use rbf_fd::differential::DifferentialOperator;
//! use rbf_fd::nalgebra::{DVector, Point1};
//! use rbf_fd::policy::StencilSize;
//!
//! let nodes: Vec<_> = (0..5).map(|i| Point1::new(i as f64)).collect();
//! let second_derivative = DifferentialOperator::partial([2]);
//! let operator = OperatorBuilder::new(&nodes)
//!     .with_stencil_size(StencilSize::Fixed(3))
//!     .with_polynomial_degree(2)
//!     .build(&second_derivative)
//!     .unwrap();
//!
//! // The second derivative of x² is 2 everywhere
//! let u = DVector::from_iterator(5, nodes.iter().map(|x| x[0] * x[0]));
//! let u_xx = &operator * &u;
//! assert!(u_xx.iter().all(|v| (v - 2.0).abs() < 1e-8));
//! ```
use nalgebra::RealField;

pub mod allocators;
pub mod assembly;
pub mod basis;
pub mod differential;
pub mod error;
pub mod neighbors;
pub mod policy;
pub mod polynomial;
pub mod stencil;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use error::RbfFdError;

/// Scalar type used for node coordinates and weights.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
