//! Symbolic expression trees for weak form integrands.
//!
//! Leaves are operands (test functions, trial solutions, field solutions, user functors and
//! geometric quantities); inner nodes are tensor operators. Every node carries a
//! [`Signature`] that is checked when the node is built, so an [`Expr`] that exists is always
//! well-formed. Illegal combinations (such as the determinant of a vector) are reported as
//! [`SymbolicError`]s at construction time rather than at evaluation time.
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

mod derivative;
mod evaluate;
mod expr;
mod operands;
mod operators;

pub use evaluate::{EvaluationContext, QuadraturePoint, QuadraturePointRange};
pub use expr::Expr;
pub use operands::*;
pub use operators::*;

pub(crate) use evaluate::{evaluate_field, Bindings};
pub(crate) use operands::{constant_scalar_in, constant_tensor_in};

/// The tensor kind of a value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Scalar,
    Vector,
    Tensor,
    SymmetricTensor,
}

impl ValueKind {
    /// The general kind of a value of the given rank.
    pub fn for_rank(rank: usize) -> Self {
        match rank {
            0 => Self::Scalar,
            1 => Self::Vector,
            _ => Self::Tensor,
        }
    }
}

/// The compile-time-checked type of an expression: rank, spatial dimension and kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    rank: usize,
    dim: usize,
    kind: ValueKind,
}

impl Signature {
    pub fn scalar(dim: usize) -> Self {
        Self::tensor(0, dim)
    }

    pub fn vector(dim: usize) -> Self {
        Self::tensor(1, dim)
    }

    pub fn tensor(rank: usize, dim: usize) -> Self {
        Self {
            rank,
            dim,
            kind: ValueKind::for_rank(rank),
        }
    }

    /// A symmetric tensor of even rank (at least 2).
    pub fn symmetric_tensor(rank: usize, dim: usize) -> Self {
        assert!(
            rank >= 2 && rank % 2 == 0,
            "Symmetric tensors must have even rank >= 2, got {rank}"
        );
        Self {
            rank,
            dim,
            kind: ValueKind::SymmetricTensor,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_scalar(&self) -> bool {
        self.rank == 0
    }

    /// The number of tensor entries of a value with this signature.
    pub fn n_components(&self) -> usize {
        self.dim.pow(self.rank as u32)
    }

    pub(crate) fn with_kind(self, kind: ValueKind) -> Self {
        Self { kind, ..self }
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(rank {}, dim {})", self.kind, self.rank, self.dim)
    }
}

/// Errors raised while building symbolic expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SymbolicError {
    /// The operator cannot be applied to an operand of this rank.
    IllegalRank {
        operation: &'static str,
        rank: usize,
        requirement: &'static str,
    },
    /// The two operands cannot be combined by the operator.
    IncompatibleOperands {
        operation: &'static str,
        lhs: Signature,
        rhs: Signature,
    },
    /// The operator is only implemented for a limited set of spatial dimensions.
    UnsupportedDimension { operation: &'static str, dim: usize },
    /// The index pairs of a contraction are out of bounds or reuse an index.
    InvalidIndexPairs {
        lhs_rank: usize,
        rhs_rank: usize,
        pairs: Vec<(usize, usize)>,
    },
}

impl Display for SymbolicError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalRank {
                operation,
                rank,
                requirement,
            } => write!(
                f,
                "cannot apply {operation} to an operand of rank {rank}: {operation} requires {requirement}"
            ),
            Self::IncompatibleOperands { operation, lhs, rhs } => {
                write!(f, "incompatible operands for {operation}: {lhs} and {rhs}")
            }
            Self::UnsupportedDimension { operation, dim } => {
                write!(f, "{operation} is not supported in dimension {dim}")
            }
            Self::InvalidIndexPairs {
                lhs_rank,
                rhs_rank,
                pairs,
            } => write!(
                f,
                "invalid contraction index pairs {pairs:?} for operands of rank {lhs_rank} and {rhs_rank}"
            ),
        }
    }
}

impl Error for SymbolicError {}
