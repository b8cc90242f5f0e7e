//! Linear differential operators as sums of weighted partial derivatives.
use crate::error::RbfFdError;
use crate::Real;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Derivative orders, one per spatial axis.
///
/// `[2, 0]` is the second derivative with respect to `x` in 2D, and the all-zero index
/// denotes plain evaluation (interpolation).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiIndex(Vec<usize>);

impl MultiIndex {
    pub fn new(orders: impl Into<Vec<usize>>) -> Self {
        Self(orders.into())
    }

    pub fn zeros(dim: usize) -> Self {
        Self(vec![0; dim])
    }

    /// The derivative of the given order along a single axis.
    ///
    /// # Panics
    ///
    /// Panics if `axis >= dim`.
    pub fn unit(dim: usize, axis: usize, order: usize) -> Self {
        assert!(axis < dim, "Axis must be smaller than dimension");
        let mut orders = vec![0; dim];
        orders[axis] = order;
        Self(orders)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// The total order `|α| = Σ α_i`.
    pub fn total_order(&self) -> usize {
        self.0.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&a| a == 0)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.0.iter()
    }
}

impl Index<usize> for MultiIndex {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.0[axis]
    }
}

impl From<Vec<usize>> for MultiIndex {
    fn from(orders: Vec<usize>) -> Self {
        Self(orders)
    }
}

impl<const N: usize> From<[usize; N]> for MultiIndex {
    fn from(orders: [usize; N]) -> Self {
        Self(orders.to_vec())
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, order) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", order)?;
        }
        write!(f, ")")
    }
}

/// A single term `coefficient * ∂^order` of a differential operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term<T> {
    pub order: MultiIndex,
    pub coefficient: T,
}

/// A linear differential operator `L = Σ_α c_α ∂^α`.
///
/// Terms are kept sorted by multi-index, and adding a multi-index that is already present
/// accumulates its coefficient. This also holds for deserialized operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SerializedOperator<T>")]
#[serde(bound(deserialize = "T: Real + Deserialize<'de>"))]
pub struct DifferentialOperator<T> {
    terms: Vec<Term<T>>,
}

#[derive(Deserialize)]
struct SerializedOperator<T> {
    terms: Vec<Term<T>>,
}

impl<T: Real> From<SerializedOperator<T>> for DifferentialOperator<T> {
    fn from(serialized: SerializedOperator<T>) -> Self {
        serialized
            .terms
            .into_iter()
            .fold(Self::new(), |op, term| op.with_term(term.order, term.coefficient))
    }
}

impl<T> Default for DifferentialOperator<T> {
    fn default() -> Self {
        Self { terms: Vec::new() }
    }
}

impl<T: Real> DifferentialOperator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The operator that evaluates a function, i.e. interpolation at the center.
    pub fn identity(dim: usize) -> Self {
        Self::partial(MultiIndex::zeros(dim))
    }

    /// A single partial derivative with unit coefficient.
    pub fn partial(order: impl Into<MultiIndex>) -> Self {
        Self::new().with_term(order, T::one())
    }

    /// The Laplacian `Σ_i ∂²/∂x_i²`.
    pub fn laplacian(dim: usize) -> Self {
        (0..dim).fold(Self::new(), |op, axis| op.with_term(MultiIndex::unit(dim, axis, 2), T::one()))
    }

    /// One first-derivative operator per axis.
    pub fn gradient(dim: usize) -> Vec<Self> {
        (0..dim)
            .map(|axis| Self::partial(MultiIndex::unit(dim, axis, 1)))
            .collect()
    }

    pub fn with_term(mut self, order: impl Into<MultiIndex>, coefficient: T) -> Self {
        self.add_term(order, coefficient);
        self
    }

    pub fn add_term(&mut self, order: impl Into<MultiIndex>, coefficient: T) {
        let order = order.into();
        match self.terms.binary_search_by(|term| term.order.cmp(&order)) {
            Ok(idx) => self.terms[idx].coefficient += coefficient,
            Err(idx) => self.terms.insert(idx, Term { order, coefficient }),
        }
    }

    pub fn terms(&self) -> &[Term<T>] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The largest total order among the terms, or zero for an empty operator.
    pub fn max_order(&self) -> usize {
        self.terms
            .iter()
            .map(|term| term.order.total_order())
            .max()
            .unwrap_or(0)
    }

    /// Checks that the operator has at least one term and that every multi-index has
    /// dimension `dim`.
    pub fn validate(&self, dim: usize) -> Result<(), RbfFdError> {
        if self.terms.is_empty() {
            return Err(RbfFdError::invalid_input("differential operator has no terms"));
        }
        for term in &self.terms {
            if term.order.dim() != dim {
                return Err(RbfFdError::invalid_input(format!(
                    "multi-index {} does not match the node dimension {}",
                    term.order, dim
                )));
            }
            if !term.coefficient.is_finite() {
                return Err(RbfFdError::invalid_input(format!(
                    "coefficient of term {} is not finite",
                    term.order
                )));
            }
        }
        Ok(())
    }
}
