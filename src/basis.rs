//! Radial basis functions and their closed-form partial derivatives.
//!
//! Every kernel `φ(r)` is represented through its *profile* `ψ(s) = φ(√s)`, a function of
//! the squared distance `s = r²`. All partial derivatives of `ψ(‖d‖²)` with respect to the
//! components of the displacement `d` then follow from the derivatives `ψ⁽ᵐ⁾(s)` through
//!
//! ```text
//! ∂^α ψ(‖d‖²) = Σ_{k ≤ α/2} Π_i [α_i! / (k_i! (α_i − 2 k_i)!)] (2 d_i)^(α_i − 2 k_i) ψ^(|α| − |k|)(s),
//! ```
//!
//! so each kernel only needs a closed form for `ψ⁽ᵐ⁾`.
use crate::differential::MultiIndex;
use crate::error::RbfFdError;
use crate::Real;
use itertools::{izip, Itertools};
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DefaultAllocator, DimName, OPoint};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Separations below this value are treated as coincident points.
///
/// Polyharmonic splines compare the raw distance `r`. Other kernels compare the scaled
/// separation: `εr` for kernels of the form `φ(εr)` and `r/ε` for the exponential,
/// squared exponential and Matérn kernels.
pub const ZERO_SEPARATION_TOLERANCE: f64 = 1e-10;

/// A radial basis function that can be used to generate RBF-FD stencils.
pub trait RadialBasis<T: Real>: Sync {
    /// Short name of the basis, used in diagnostics.
    fn name(&self) -> &str;

    /// Evaluates `φ(r)` for the shape parameter `shape`.
    fn value(&self, r: T, shape: T) -> T;

    /// Evaluates `∂^α φ(‖x − c‖)` with respect to the evaluation point `x`, given the
    /// displacement `x − c`.
    ///
    /// At zero separation the analytic limit must be returned, or
    /// [`RbfFdError::UnsupportedDerivative`] if it does not exist.
    fn derivative(&self, order: &MultiIndex, displacement: &[T], shape: T) -> Result<T, RbfFdError>;

    /// The smallest polynomial degree that makes the augmented system well-posed, or `-1`
    /// if the basis is positive definite and needs no augmentation.
    fn min_polynomial_degree(&self) -> i32;
}

/// The built-in radial basis functions.
///
/// | Kernel          | `φ(r)`                                   |
/// |-----------------|------------------------------------------|
/// | `Phs1/3/5/7`    | `(εr)^k`                                 |
/// | `Phs2/4/6/8`    | `(εr)^k log(εr)`                         |
/// | `Mq`            | `(1 + (εr)²)^(1/2)`                      |
/// | `Imq`           | `(1 + (εr)²)^(-1/2)`                     |
/// | `Iq`            | `(1 + (εr)²)^(-1)`                       |
/// | `Ga`            | `exp(-(εr)²)`                            |
/// | `Exp`           | `exp(-r/ε)`                              |
/// | `Se`            | `exp(-r²/(2ε²))`                         |
/// | `Mat32`         | `(1 + √3 r/ε) exp(-√3 r/ε)`              |
/// | `Mat52`         | `(1 + √5 r/ε + 5r²/(3ε²)) exp(-√5 r/ε)`  |
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Phs1,
    Phs2,
    Phs3,
    Phs4,
    Phs5,
    Phs6,
    Phs7,
    Phs8,
    Mq,
    Imq,
    Iq,
    Ga,
    Exp,
    Se,
    Mat32,
    Mat52,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Phs3
    }
}

impl Kernel {
    pub const ALL: [Kernel; 16] = [
        Kernel::Phs1,
        Kernel::Phs2,
        Kernel::Phs3,
        Kernel::Phs4,
        Kernel::Phs5,
        Kernel::Phs6,
        Kernel::Phs7,
        Kernel::Phs8,
        Kernel::Mq,
        Kernel::Imq,
        Kernel::Iq,
        Kernel::Ga,
        Kernel::Exp,
        Kernel::Se,
        Kernel::Mat32,
        Kernel::Mat52,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Phs1 => "phs1",
            Kernel::Phs2 => "phs2",
            Kernel::Phs3 => "phs3",
            Kernel::Phs4 => "phs4",
            Kernel::Phs5 => "phs5",
            Kernel::Phs6 => "phs6",
            Kernel::Phs7 => "phs7",
            Kernel::Phs8 => "phs8",
            Kernel::Mq => "mq",
            Kernel::Imq => "imq",
            Kernel::Iq => "iq",
            Kernel::Ga => "ga",
            Kernel::Exp => "exp",
            Kernel::Se => "se",
            Kernel::Mat32 => "mat32",
            Kernel::Mat52 => "mat52",
        }
    }

    /// The exponent `k` of a polyharmonic spline.
    fn phs_exponent(&self) -> Option<i32> {
        match self {
            Kernel::Phs1 => Some(1),
            Kernel::Phs2 => Some(2),
            Kernel::Phs3 => Some(3),
            Kernel::Phs4 => Some(4),
            Kernel::Phs5 => Some(5),
            Kernel::Phs6 => Some(6),
            Kernel::Phs7 => Some(7),
            Kernel::Phs8 => Some(8),
            _ => None,
        }
    }

    pub fn is_positive_definite(&self) -> bool {
        self.min_polynomial_degree() < 0
    }

    /// The order of conditional positive definiteness minus one.
    ///
    /// Polyharmonic splines `r^k` need degree `(k - 1) / 2` for odd `k` and `k / 2` for
    /// even `k`, the multiquadric needs constants and all other kernels are positive
    /// definite (`-1`).
    pub fn min_polynomial_degree(&self) -> i32 {
        match self.phs_exponent() {
            Some(k) if k % 2 == 1 => (k - 1) / 2,
            Some(k) => k / 2,
            None if *self == Kernel::Mq => 0,
            None => -1,
        }
    }

    /// The largest total derivative order that has a limit at zero separation.
    ///
    /// Returns `None` for kernels that are smooth at the origin.
    pub fn zero_limit_order(&self) -> Option<usize> {
        match self {
            Kernel::Exp => Some(0),
            Kernel::Mat32 => Some(2),
            Kernel::Mat52 => Some(4),
            _ => self.phs_exponent().map(|k| (k - 1) as usize),
        }
    }

    fn scales_by_division(&self) -> bool {
        matches!(self, Kernel::Exp | Kernel::Se | Kernel::Mat32 | Kernel::Mat52)
    }

    fn is_zero_separation<T: Real>(&self, r: T, shape: T) -> bool {
        let scaled = if self.phs_exponent().is_some() {
            r
        } else if self.scales_by_division() {
            r / shape
        } else {
            r * shape
        };
        scaled.abs() < T::from_f64(ZERO_SEPARATION_TOLERANCE).unwrap()
    }

    /// Evaluates `φ(r)`.
    pub fn value<T: Real>(&self, r: T, shape: T) -> T {
        if self.is_zero_separation(r, shape) {
            self.profile_derivative_at_zero(0, shape)
        } else {
            self.profile_derivative(0, r, shape)
        }
    }

    /// Evaluates `∂^α φ(‖d‖)` with respect to the components of the displacement `d`.
    pub fn derivative<T: Real>(&self, order: &MultiIndex, displacement: &[T], shape: T) -> Result<T, RbfFdError> {
        if order.dim() != displacement.len() {
            return Err(RbfFdError::invalid_input(format!(
                "multi-index {} does not match displacement of dimension {}",
                order,
                displacement.len()
            )));
        }

        let s = displacement.iter().fold(T::zero(), |acc, &d| acc + d * d);
        let r = s.sqrt();
        if self.is_zero_separation(r, shape) {
            return self.zero_separation_limit(order, shape);
        }

        // profile[j] = ψ^(|α| - j)(s)
        let total = order.total_order();
        let max_half: usize = order.iter().map(|a| a / 2).sum();
        let profile: Vec<T> = (0..=max_half)
            .map(|j| self.profile_derivative(total - j, r, shape))
            .collect();

        let two = T::one() + T::one();
        let mut result = T::zero();
        for k in order.iter().map(|&a| 0..=a / 2).multi_cartesian_product() {
            let k_total: usize = k.iter().sum();
            let mut term = profile[k_total];
            for (&a_i, &k_i, &d_i) in izip!(order.iter(), &k, displacement) {
                let coefficient = factorial::<T>(a_i) / (factorial::<T>(k_i) * factorial::<T>(a_i - 2 * k_i));
                term *= coefficient * (two * d_i).powi((a_i - 2 * k_i) as i32);
            }
            result += term;
        }
        Ok(result)
    }

    fn zero_separation_limit<T: Real>(&self, order: &MultiIndex, shape: T) -> Result<T, RbfFdError> {
        let total = order.total_order();
        if let Some(max_order) = self.zero_limit_order() {
            if total > max_order {
                return Err(RbfFdError::UnsupportedDerivative {
                    kernel: self.name().to_string(),
                    order: total,
                    center: None,
                });
            }
        }
        if order.iter().any(|a| a % 2 == 1) {
            return Ok(T::zero());
        }
        let coefficient = order
            .iter()
            .fold(T::one(), |acc, &a| acc * factorial::<T>(a) / factorial::<T>(a / 2));
        Ok(coefficient * self.profile_derivative_at_zero(total / 2, shape))
    }

    /// Evaluates `ψ⁽ᵐ⁾(r²)` for `r > 0`.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn profile_derivative<T: Real>(&self, m: usize, r: T, shape: T) -> T {
        let eps = shape;
        let s = r * r;
        let m_as_t = T::from_usize(m).unwrap();
        match self {
            Kernel::Phs1 | Kernel::Phs3 | Kernel::Phs5 | Kernel::Phs7 => {
                let k = self.phs_exponent().expect("Internal error: kernel must be a PHS");
                let half_k = T::from_i32(k).unwrap() / 2.0;
                eps.powi(k) * falling_factorial(half_k, m) * r.powi(k - 2 * m as i32)
            }
            Kernel::Phs2 | Kernel::Phs4 | Kernel::Phs6 | Kernel::Phs8 => {
                let k = self.phs_exponent().expect("Internal error: kernel must be a PHS");
                // ψ⁽ᵐ⁾(s) = s^q (A ln(εr) + B)
                let mut q = T::from_i32(k / 2).unwrap();
                let mut a = T::one();
                let mut b = T::zero();
                for _ in 0..m {
                    b = q * b + a / 2.0;
                    a = q * a;
                    q -= 1.0;
                }
                eps.powi(k) * r.powi(k - 2 * m as i32) * (a * (eps * r).ln() + b)
            }
            Kernel::Mq | Kernel::Imq | Kernel::Iq => {
                let beta = match self {
                    Kernel::Mq => 0.5,
                    Kernel::Imq => -0.5,
                    _ => -1.0,
                };
                let eps2 = eps * eps;
                falling_factorial(beta, m) * eps2.powi(m as i32) * (1.0 + eps2 * s).powf(beta - m_as_t)
            }
            Kernel::Ga => {
                let eps2 = eps * eps;
                (-eps2).powi(m as i32) * (-eps2 * s).exp()
            }
            Kernel::Se => {
                let c = -1.0 / (2.0 * eps * eps);
                c.powi(m as i32) * (c * s).exp()
            }
            Kernel::Exp | Kernel::Mat32 | Kernel::Mat52 if m == 0 => {
                let a = self.exponential_rate(eps);
                let poly = match self {
                    Kernel::Exp => 1.0,
                    Kernel::Mat32 => 1.0 + a * r,
                    _ => 1.0 + a * r + a * a * s / 3.0,
                };
                poly * (-a * r).exp()
            }
            Kernel::Exp | Kernel::Mat32 | Kernel::Mat52 => {
                let (a, terms) = self.exponential_profile_terms(m, eps);
                let poly = terms
                    .iter()
                    .fold(T::zero(), |acc, &(n, c)| acc + c * r.powi(n));
                poly * (-a * r).exp()
            }
        }
    }

    /// Evaluates `lim_{s→0} ψ⁽ᵐ⁾(s)`, assuming that the limit exists.
    fn profile_derivative_at_zero<T: Real>(&self, m: usize, shape: T) -> T {
        match self {
            Kernel::Exp | Kernel::Mat32 | Kernel::Mat52 => {
                let (_, terms) = self.exponential_profile_terms(m, shape);
                terms
                    .iter()
                    .find(|(n, _)| *n == 0)
                    .map(|&(_, c)| c)
                    .unwrap_or_else(T::zero)
            }
            _ if self.phs_exponent().is_some() => T::zero(),
            _ => self.profile_derivative(m, T::zero(), shape),
        }
    }

    /// The decay rate `a` in `exp(-a r)` of the exponential-type kernels.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn exponential_rate<T: Real>(&self, shape: T) -> T {
        match self {
            Kernel::Mat32 => T::sqrt(3.0) / shape,
            Kernel::Mat52 => T::sqrt(5.0) / shape,
            _ => 1.0 / shape,
        }
    }

    /// Represents `ψ⁽ᵐ⁾` of the exponential-type kernels as `Σ c_n r^n exp(-a r)`.
    ///
    /// Returns `a` and the terms `(n, c_n)` sorted by power.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn exponential_profile_terms<T: Real>(&self, m: usize, shape: T) -> (T, Vec<(i32, T)>) {
        let a = self.exponential_rate(shape);
        let mut terms = match self {
            Kernel::Exp => vec![(0, 1.0)],
            Kernel::Mat32 => vec![(0, 1.0), (1, a)],
            _ => vec![(0, 1.0), (1, a), (2, a * a / 3.0)],
        };
        for _ in 0..m {
            terms = differentiate_exponential_terms(&terms, a);
        }
        (a, terms)
    }
}

/// Applies `d/ds = (1 / 2r) d/dr` to `Σ c_n r^n exp(-a r)`.
#[replace_float_literals(T::from_f64(literal).unwrap())]
fn differentiate_exponential_terms<T: Real>(terms: &[(i32, T)], a: T) -> Vec<(i32, T)> {
    let mut result = BTreeMap::new();
    for &(n, c) in terms {
        if n != 0 {
            *result.entry(n - 2).or_insert_with(T::zero) += c * T::from_i32(n).unwrap() / 2.0;
        }
        *result.entry(n - 1).or_insert_with(T::zero) -= c * a / 2.0;
    }
    result.into_iter().collect()
}

fn factorial<T: Real>(n: usize) -> T {
    (1..=n).fold(T::one(), |acc, j| acc * T::from_usize(j).unwrap())
}

/// `x (x - 1) ... (x - m + 1)`
fn falling_factorial<T: Real>(x: T, m: usize) -> T {
    (0..m).fold(T::one(), |acc, j| acc * (x - T::from_usize(j).unwrap()))
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Kernel {
    type Err = RbfFdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Kernel::ALL
            .iter()
            .copied()
            .find(|kernel| kernel.name() == name)
            .ok_or_else(|| RbfFdError::invalid_input(format!("unknown kernel \"{}\"", s)))
    }
}

impl<T: Real> RadialBasis<T> for Kernel {
    fn name(&self) -> &str {
        Kernel::name(self)
    }

    fn value(&self, r: T, shape: T) -> T {
        Kernel::value(self, r, shape)
    }

    fn derivative(&self, order: &MultiIndex, displacement: &[T], shape: T) -> Result<T, RbfFdError> {
        Kernel::derivative(self, order, displacement, shape)
    }

    fn min_polynomial_degree(&self) -> i32 {
        Kernel::min_polynomial_degree(self)
    }
}

/// Shape parameters used by [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CenterShapes<'a, T> {
    /// The same shape parameter for every center.
    Uniform(T),
    /// One shape parameter per center.
    PerCenter(&'a [T]),
}

impl<'a, T: Real> CenterShapes<'a, T> {
    fn check(&self, num_centers: usize) -> Result<(), RbfFdError> {
        match self {
            CenterShapes::PerCenter(shapes) if shapes.len() != num_centers => Err(RbfFdError::invalid_policy(format!(
                "{} shape parameters given for {} centers",
                shapes.len(),
                num_centers
            ))),
            _ => Ok(()),
        }
    }

    fn get(&self, center: usize) -> T {
        match self {
            CenterShapes::Uniform(shape) => *shape,
            CenterShapes::PerCenter(shapes) => shapes[center],
        }
    }
}

/// Evaluates the derivative `order` of the basis centered at each of `centers` at each of
/// `eval_points`.
///
/// Returns a matrix with one row per evaluation point and one column per center.
pub fn evaluate<T, D, B>(
    basis: &B,
    eval_points: &[OPoint<T, D>],
    centers: &[OPoint<T, D>],
    order: &MultiIndex,
    shapes: CenterShapes<T>,
) -> Result<DMatrix<T>, RbfFdError>
where
    T: Real,
    D: DimName,
    B: RadialBasis<T> + ?Sized,
    DefaultAllocator: Allocator<T, D>,
{
    if order.dim() != D::dim() {
        return Err(RbfFdError::invalid_input(format!(
            "multi-index {} does not match the point dimension {}",
            order,
            D::dim()
        )));
    }
    shapes.check(centers.len())?;
    let mut matrix = DMatrix::zeros(eval_points.len(), centers.len());
    for (i, x) in eval_points.iter().enumerate() {
        for (j, c) in centers.iter().enumerate() {
            let d = x - c;
            matrix[(i, j)] = basis.derivative(order, d.as_slice(), shapes.get(j))?;
        }
    }
    Ok(matrix)
}
