//! Error type shared by stencil construction and operator assembly.
use std::error::Error;
use std::fmt;

/// Errors produced while computing stencils or assembling operators.
///
/// Errors raised for a specific stencil carry the index of the offending center (the row
/// of the operator) once they have passed through the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum RbfFdError {
    /// The derivative of the basis function has no limit at zero separation.
    UnsupportedDerivative {
        kernel: String,
        order: usize,
        center: Option<usize>,
    },
    /// More neighbors were requested than there are reference nodes.
    InsufficientNeighbors { requested: usize, available: usize },
    /// The local RBF-FD system is singular or too badly conditioned to be solved.
    IllConditionedStencil {
        center: Option<usize>,
        condition_number: f64,
    },
    /// A policy (stencil size, shape parameter, degree) is inconsistent with the input.
    InvalidPolicy { message: String },
    /// The nodes, centers or operators are malformed.
    InvalidInput { message: String },
}

impl RbfFdError {
    pub(crate) fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Attaches the index of the center that produced this error, if the variant has one.
    pub fn at_center(self, index: usize) -> Self {
        match self {
            Self::UnsupportedDerivative { kernel, order, .. } => Self::UnsupportedDerivative {
                kernel,
                order,
                center: Some(index),
            },
            Self::IllConditionedStencil { condition_number, .. } => Self::IllConditionedStencil {
                center: Some(index),
                condition_number,
            },
            other => other,
        }
    }

    /// The center index associated with the error, if known.
    pub fn center(&self) -> Option<usize> {
        match self {
            Self::UnsupportedDerivative { center, .. } | Self::IllConditionedStencil { center, .. } => *center,
            _ => None,
        }
    }
}

impl fmt::Display for RbfFdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedDerivative { kernel, order, center } => {
                write!(
                    f,
                    "derivative of order {order} of kernel {kernel} has no limit at zero separation"
                )?;
                if let Some(center) = center {
                    write!(f, " (center {center})")?;
                }
                Ok(())
            }
            Self::InsufficientNeighbors { requested, available } => {
                write!(f, "requested {requested} neighbors, but only {available} nodes are available")
            }
            Self::IllConditionedStencil {
                center,
                condition_number,
            } => {
                write!(f, "ill-conditioned stencil system (condition number {condition_number:e})")?;
                if let Some(center) = center {
                    write!(f, " at center {center}")?;
                }
                Ok(())
            }
            Self::InvalidPolicy { message } => write!(f, "invalid policy: {message}"),
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
        }
    }
}

impl Error for RbfFdError {}
