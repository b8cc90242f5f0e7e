//! Computation of RBF-FD weights for a single stencil.
//!
//! For a center `x_c` with neighbors `x_1, ..., x_n`, the weights `w` approximating a
//! linear operator `L` at the center solve the augmented system
//!
//! ```text
//! [ A   P ] [ w ]   [ b ]
//! [ Pᵀ  0 ] [ λ ] = [ c ]
//! ```
//!
//! with `A[i, j] = φ(‖x_i − x_j‖)`, `P[i, k] = p_k(x_i)`, `b[i] = L φ(‖x − x_i‖)` and
//! `c[k] = L p_k` evaluated at the center. The polynomial constraints make the weights
//! exact for all polynomials of the chosen degree.
//!
//! Coordinates are shifted so that the center is at the origin, the monomials are
//! evaluated in coordinates scaled by the stencil radius, and the RBF block is normalized
//! by its largest entry. None of these transformations change `w`.
use crate::basis::RadialBasis;
use crate::differential::{DifferentialOperator, MultiIndex};
use crate::error::RbfFdError;
use crate::polynomial::{monomial_derivative, monomial_exponents};
use crate::Real;
use log::debug;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DVector, DefaultAllocator, DimName, OPoint, OVector, Scalar};
use serde::{Deserialize, Serialize};
use std::slice;

/// Upper bound on SVD iterations. Systems that do not converge are treated as ill-conditioned.
const MAX_SVD_ITERATIONS: usize = 10_000;

/// What to do when a stencil system is too ill-conditioned to be solved reliably.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fallback {
    /// Fail with [`RbfFdError::IllConditionedStencil`].
    Abort,
    /// Solve in the least-squares sense with a truncated SVD, discarding singular values
    /// below `σ_max / max_condition_number`.
    LeastSquares,
    /// Retry with successively lower polynomial degrees, down to no augmentation.
    ReduceDegree,
    /// Retry with one more neighbor at a time, up to `max_size` neighbors.
    ///
    /// Only available through the operator assembler, which owns the neighbor queries.
    GrowStencil { max_size: usize },
}

impl Default for Fallback {
    fn default() -> Self {
        Fallback::Abort
    }
}

/// A fallback that was applied to obtain the weights of a stencil.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedFallback {
    LeastSquares,
    ReducedDegree { from: i32, to: i32 },
    GrewStencil { from: usize, to: usize },
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StencilSettings {
    /// Largest accepted ratio `σ_max / σ_min` of the augmented system.
    pub max_condition_number: f64,
    pub fallback: Fallback,
}

impl Default for StencilSettings {
    fn default() -> Self {
        Self {
            max_condition_number: 1e12,
            fallback: Fallback::default(),
        }
    }
}

impl StencilSettings {
    pub fn with_max_condition_number(self, max_condition_number: f64) -> Self {
        Self {
            max_condition_number,
            ..self
        }
    }

    pub fn with_fallback(self, fallback: Fallback) -> Self {
        Self { fallback, ..self }
    }
}

/// The neighbors and weights of the stencil of a single center.
///
/// Neighbors are ordered by ascending distance to the center, and `weights[i]` belongs to
/// `neighbors[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil<T> {
    pub center: usize,
    pub neighbors: Vec<usize>,
    pub weights: Vec<T>,
}

/// Weights of a stencil for one or more operators.
#[derive(Debug, Clone, PartialEq)]
pub struct StencilWeights<T: Scalar> {
    /// One row per neighbor and one column per operator.
    pub weights: DMatrix<T>,
    pub condition_number: f64,
    /// The polynomial degree that was eventually used.
    pub degree: i32,
    pub fallback: Option<AppliedFallback>,
}

/// Solution of a [`StencilSystem`].
#[derive(Debug, Clone, PartialEq)]
pub struct StencilSolution<T: Scalar> {
    /// One row per neighbor and one column per right-hand side.
    pub weights: DMatrix<T>,
    pub condition_number: f64,
    /// Whether small singular values were discarded.
    pub truncated: bool,
}

/// The local augmented RBF-FD system of a single stencil.
#[derive(Debug, Clone)]
pub struct StencilSystem<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// Neighbor coordinates relative to the center
    offsets: Vec<OVector<T, D>>,
    radius: T,
    shape: T,
    rbf_scale: T,
    rbf_block: DMatrix<T>,
    poly_block: DMatrix<T>,
    exponents: Vec<MultiIndex>,
    degree: i32,
}

impl<T, D> StencilSystem<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn assemble<B>(
        basis: &B,
        center: &OPoint<T, D>,
        neighbors: &[OPoint<T, D>],
        degree: i32,
        shape: T,
    ) -> Result<Self, RbfFdError>
    where
        B: RadialBasis<T> + ?Sized,
    {
        if degree < -1 {
            return Err(RbfFdError::invalid_policy(format!(
                "polynomial degree must be at least -1, got {}",
                degree
            )));
        }

        let offsets: Vec<_> = neighbors.iter().map(|x| x - center).collect();
        let radius = offsets
            .iter()
            .map(|y| y.norm())
            .fold(T::zero(), |max, r| max.max(r));
        let radius = if radius > T::zero() { radius } else { T::one() };

        let n = offsets.len();
        let mut rbf_block = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let phi = basis.value((&offsets[i] - &offsets[j]).norm(), shape);
                rbf_block[(i, j)] = phi;
                rbf_block[(j, i)] = phi;
            }
        }
        let max_abs = rbf_block
            .iter()
            .fold(T::zero(), |max, a| max.max(a.abs()));
        let rbf_scale = if max_abs > T::zero() && max_abs.is_finite() {
            T::one() / max_abs
        } else {
            T::one()
        };
        rbf_block *= rbf_scale;

        let mut system = Self {
            offsets,
            radius,
            shape,
            rbf_scale,
            rbf_block,
            poly_block: DMatrix::zeros(n, 0),
            exponents: Vec::new(),
            degree: -1,
        };
        system.set_degree(degree);
        Ok(system)
    }

    /// Replaces the polynomial augmentation by the monomials of total degree `≤ degree`.
    ///
    /// # Panics
    ///
    /// Panics if `degree < -1`.
    pub fn set_degree(&mut self, degree: i32) {
        assert!(degree >= -1, "Polynomial degree must be at least -1");
        let zero_order = MultiIndex::zeros(D::dim());
        self.exponents = monomial_exponents(D::dim(), degree);
        let scaled: Vec<_> = self.offsets.iter().map(|y| y / self.radius).collect();
        let exponents = &self.exponents;
        self.poly_block = DMatrix::from_fn(scaled.len(), exponents.len(), |i, k| {
            monomial_derivative(scaled[i].as_slice(), &exponents[k], &zero_order)
        });
        self.degree = degree;
    }

    pub fn degree(&self) -> i32 {
        self.degree
    }

    pub fn num_neighbors(&self) -> usize {
        self.offsets.len()
    }

    pub fn num_monomials(&self) -> usize {
        self.exponents.len()
    }

    /// The stencil radius used to scale the polynomial block.
    pub fn radius(&self) -> T {
        self.radius
    }

    /// The normalized RBF block `A`.
    pub fn rbf_block(&self) -> &DMatrix<T> {
        &self.rbf_block
    }

    /// The scaled polynomial block `P`.
    pub fn poly_block(&self) -> &DMatrix<T> {
        &self.poly_block
    }

    /// The full augmented matrix `[[A, P], [Pᵀ, 0]]`.
    pub fn matrix(&self) -> DMatrix<T> {
        let n = self.num_neighbors();
        let m = self.num_monomials();
        DMatrix::from_fn(n + m, n + m, |i, j| match (i < n, j < n) {
            (true, true) => self.rbf_block[(i, j)],
            (true, false) => self.poly_block[(i, j - n)],
            (false, true) => self.poly_block[(j, i - n)],
            (false, false) => T::zero(),
        })
    }

    /// Right-hand sides `[b; c]` of the system, one column per operator.
    pub fn right_hand_sides<B>(&self, basis: &B, operators: &[DifferentialOperator<T>]) -> Result<DMatrix<T>, RbfFdError>
    where
        B: RadialBasis<T> + ?Sized,
    {
        let n = self.num_neighbors();
        let m = self.num_monomials();
        let origin = OVector::<T, D>::zeros();
        let mut rhs = DMatrix::zeros(n + m, operators.len());
        for (q, operator) in operators.iter().enumerate() {
            operator.validate(D::dim())?;
            for term in operator.terms() {
                for (i, y) in self.offsets.iter().enumerate() {
                    // Derivative with respect to the evaluation point (the center) of φ(‖x − x_i‖)
                    let displacement = -y;
                    let d = basis.derivative(&term.order, displacement.as_slice(), self.shape)?;
                    rhs[(i, q)] += term.coefficient * self.rbf_scale * d;
                }
                let h_scale = self.radius.powi(-(term.order.total_order() as i32));
                for (k, exponent) in self.exponents.iter().enumerate() {
                    let p = monomial_derivative(origin.as_slice(), exponent, &term.order);
                    rhs[(n + k, q)] += term.coefficient * h_scale * p;
                }
            }
        }
        Ok(rhs)
    }

    /// Solves the system for the given right-hand sides with a single SVD.
    pub fn solve(&self, rhs: &DMatrix<T>, settings: &StencilSettings) -> Result<StencilSolution<T>, RbfFdError> {
        let n = self.num_neighbors();
        let m = self.num_monomials();
        let ill_conditioned = |condition_number| RbfFdError::IllConditionedStencil {
            center: None,
            condition_number,
        };

        let matrix = self.matrix();
        if matrix.iter().chain(rhs.iter()).any(|x| !x.is_finite()) {
            return Err(ill_conditioned(f64::INFINITY));
        }
        // Fewer neighbors than monomials leaves the polynomial constraints unsatisfiable
        if n < m && settings.fallback != Fallback::LeastSquares {
            return Err(ill_conditioned(f64::INFINITY));
        }

        let svd = matrix
            .try_svd(true, true, T::default_epsilon(), MAX_SVD_ITERATIONS)
            .ok_or_else(|| ill_conditioned(f64::INFINITY))?;
        let sigma_max = svd.singular_values.max();
        let sigma_min = svd.singular_values.min();
        let condition_number = if n < m || sigma_min <= T::zero() {
            f64::INFINITY
        } else {
            (sigma_max / sigma_min)
                .to_subset()
                .unwrap_or(f64::INFINITY)
        };

        let (solution, truncated) = if condition_number <= settings.max_condition_number {
            (svd.solve(rhs, T::zero()), false)
        } else if settings.fallback == Fallback::LeastSquares {
            let cutoff = sigma_max / T::from_f64(settings.max_condition_number).unwrap();
            (svd.solve(rhs, cutoff), true)
        } else {
            return Err(ill_conditioned(condition_number));
        };

        let weights = solution
            .map_err(|_| ill_conditioned(condition_number))?
            .rows(0, n)
            .into_owned();
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(ill_conditioned(condition_number));
        }

        Ok(StencilSolution {
            weights,
            condition_number,
            truncated,
        })
    }
}

/// Computes the weights of a stencil for several operators with a single factorization.
///
/// The `ReduceDegree` and `LeastSquares` fallbacks of `settings` are handled here. The
/// `GrowStencil` fallback requires new neighbors and is left to the caller: with it, an
/// ill-conditioned system is reported as an error.
pub fn solve_many<T, D, B>(
    basis: &B,
    center: &OPoint<T, D>,
    neighbors: &[OPoint<T, D>],
    operators: &[DifferentialOperator<T>],
    degree: i32,
    shape: T,
    settings: &StencilSettings,
) -> Result<StencilWeights<T>, RbfFdError>
where
    T: Real,
    D: DimName,
    B: RadialBasis<T> + ?Sized,
    DefaultAllocator: Allocator<T, D>,
{
    let mut system = StencilSystem::assemble(basis, center, neighbors, degree, shape)?;
    loop {
        let rhs = system.right_hand_sides(basis, operators)?;
        match system.solve(&rhs, settings) {
            Ok(solution) => {
                let fallback = if system.degree() < degree {
                    Some(AppliedFallback::ReducedDegree {
                        from: degree,
                        to: system.degree(),
                    })
                } else if solution.truncated {
                    Some(AppliedFallback::LeastSquares)
                } else {
                    None
                };
                return Ok(StencilWeights {
                    weights: solution.weights,
                    condition_number: solution.condition_number,
                    degree: system.degree(),
                    fallback,
                });
            }
            Err(RbfFdError::IllConditionedStencil { condition_number, .. })
                if settings.fallback == Fallback::ReduceDegree && system.degree() >= 0 =>
            {
                debug!(
                    "Stencil system with degree {} has condition number {:e}, retrying with degree {}",
                    system.degree(),
                    condition_number,
                    system.degree() - 1
                );
                system.set_degree(system.degree() - 1);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Computes the weights of a single stencil for a single operator.
///
/// Weights are ordered like `neighbors`.
pub fn stencil_weights<T, D, B>(
    basis: &B,
    center: &OPoint<T, D>,
    neighbors: &[OPoint<T, D>],
    operator: &DifferentialOperator<T>,
    degree: i32,
    shape: T,
    settings: &StencilSettings,
) -> Result<DVector<T>, RbfFdError>
where
    T: Real,
    D: DimName,
    B: RadialBasis<T> + ?Sized,
    DefaultAllocator: Allocator<T, D>,
{
    let solved = solve_many(
        basis,
        center,
        neighbors,
        slice::from_ref(operator),
        degree,
        shape,
        settings,
    )?;
    Ok(solved.weights.column(0).into_owned())
}
