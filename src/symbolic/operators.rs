use std::ops::Neg;

use crate::symbolic::expr::Node;
use crate::symbolic::{Expr, Signature, SymbolicError, ValueKind};

/// Unary operators on expressions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Transpose,
    Invert,
    Determinant,
    Symmetrize,
    Trace,
    Norm,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
}

/// Binary operators on expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    /// Scaling of an expression by a scalar expression.
    Multiply,
    /// Division by a scalar expression.
    Divide,
    /// Contraction of the given index pairs (lhs index, rhs index).
    Contract(Vec<(usize, usize)>),
    OuterProduct,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Negate => "negation",
            Self::Transpose => "transpose",
            Self::Invert => "inverse",
            Self::Determinant => "determinant",
            Self::Symmetrize => "symmetrization",
            Self::Trace => "trace",
            Self::Norm => "norm",
            Self::Sqrt => "square root",
            Self::Exp => "exponential",
            Self::Log => "logarithm",
            Self::Sin => "sine",
            Self::Cos => "cosine",
        }
    }

    /// The signature of the result, or an error if the operand is illegal for this operator.
    pub fn result_signature(&self, operand: Signature) -> Result<Signature, SymbolicError> {
        let rank = operand.rank();
        let illegal = |requirement| SymbolicError::IllegalRank {
            operation: self.name(),
            rank,
            requirement,
        };
        match self {
            Self::Negate => Ok(operand),
            Self::Transpose => {
                if rank >= 2 && rank % 2 == 0 {
                    Ok(operand)
                } else {
                    Err(illegal("a tensor of even rank"))
                }
            }
            Self::Symmetrize => {
                if rank >= 2 && rank % 2 == 0 {
                    Ok(operand.with_kind(ValueKind::SymmetricTensor))
                } else {
                    Err(illegal("a tensor of even rank"))
                }
            }
            Self::Invert | Self::Determinant => {
                if rank != 2 {
                    Err(illegal("a rank-2 tensor"))
                } else if !(1..=3).contains(&operand.dim()) {
                    Err(SymbolicError::UnsupportedDimension {
                        operation: self.name(),
                        dim: operand.dim(),
                    })
                } else if *self == Self::Invert {
                    Ok(operand)
                } else {
                    Ok(Signature::scalar(operand.dim()))
                }
            }
            Self::Trace => {
                if rank == 2 {
                    Ok(Signature::scalar(operand.dim()))
                } else {
                    Err(illegal("a rank-2 tensor"))
                }
            }
            Self::Norm => Ok(Signature::scalar(operand.dim())),
            Self::Sqrt | Self::Exp | Self::Log | Self::Sin | Self::Cos => {
                if rank == 0 {
                    Ok(operand)
                } else {
                    Err(illegal("a scalar"))
                }
            }
        }
    }
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "addition",
            Self::Subtract => "subtraction",
            Self::Multiply => "multiplication",
            Self::Divide => "division",
            Self::Contract(_) => "contraction",
            Self::OuterProduct => "outer product",
        }
    }

    /// Whether `pairs` contracts the last `pairs.len()` indices of the lhs with the leading
    /// indices of the rhs, in order.
    pub fn is_trailing_contraction(pairs: &[(usize, usize)], lhs_rank: usize) -> bool {
        let n = pairs.len();
        n <= lhs_rank
            && pairs
                .iter()
                .enumerate()
                .all(|(k, &(i, j))| i == lhs_rank - n + k && j == k)
    }

    /// The signature of the result, or an error if the operands cannot be combined.
    pub fn result_signature(&self, lhs: Signature, rhs: Signature) -> Result<Signature, SymbolicError> {
        let incompatible = || SymbolicError::IncompatibleOperands {
            operation: self.name(),
            lhs,
            rhs,
        };
        if lhs.dim() != rhs.dim() {
            return Err(incompatible());
        }
        let dim = lhs.dim();
        match self {
            Self::Add | Self::Subtract => {
                if lhs.rank() != rhs.rank() {
                    return Err(incompatible());
                }
                let both_symmetric =
                    lhs.kind() == ValueKind::SymmetricTensor && rhs.kind() == ValueKind::SymmetricTensor;
                if both_symmetric {
                    Ok(lhs)
                } else {
                    Ok(Signature::tensor(lhs.rank(), dim))
                }
            }
            Self::Multiply => match (lhs.is_scalar(), rhs.is_scalar()) {
                (true, _) => Ok(rhs),
                (false, true) => Ok(lhs),
                (false, false) => Err(incompatible()),
            },
            Self::Divide => {
                if rhs.is_scalar() {
                    Ok(lhs)
                } else {
                    Err(incompatible())
                }
            }
            Self::Contract(pairs) => {
                let out_of_bounds = pairs.iter().any(|&(i, j)| i >= lhs.rank() || j >= rhs.rank());
                let lhs_reused = (0..pairs.len()).any(|a| pairs[a + 1..].iter().any(|p| p.0 == pairs[a].0));
                let rhs_reused = (0..pairs.len()).any(|a| pairs[a + 1..].iter().any(|p| p.1 == pairs[a].1));
                if pairs.is_empty() || out_of_bounds || lhs_reused || rhs_reused {
                    return Err(SymbolicError::InvalidIndexPairs {
                        lhs_rank: lhs.rank(),
                        rhs_rank: rhs.rank(),
                        pairs: pairs.clone(),
                    });
                }
                Ok(Signature::tensor(lhs.rank() + rhs.rank() - 2 * pairs.len(), dim))
            }
            Self::OuterProduct => Ok(Signature::tensor(lhs.rank() + rhs.rank(), dim)),
        }
    }
}

impl Expr {
    pub(crate) fn unary(op: UnaryOp, operand: &Expr) -> Result<Expr, SymbolicError> {
        let signature = op.result_signature(operand.signature())?;
        Ok(Expr::new(
            Node::Unary(op, operand.clone()),
            signature,
            operand.update_flags(),
        ))
    }

    pub(crate) fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
        let signature = op.result_signature(lhs.signature(), rhs.signature())?;
        let flags = lhs.update_flags() | rhs.update_flags();
        Ok(Expr::new(Node::Binary(op, lhs.clone(), rhs.clone()), signature, flags))
    }

    /// Negation is legal for every operand.
    pub fn negate(&self) -> Expr {
        Expr::new(
            Node::Unary(UnaryOp::Negate, self.clone()),
            self.signature(),
            self.update_flags(),
        )
    }

    pub fn transpose(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Transpose, self)
    }

    pub fn invert(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Invert, self)
    }

    pub fn determinant(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Determinant, self)
    }

    pub fn symmetrize(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Symmetrize, self)
    }

    pub fn trace(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Trace, self)
    }

    pub fn norm(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Norm, self)
    }

    pub fn sqrt(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Sqrt, self)
    }

    pub fn exp(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Exp, self)
    }

    pub fn log(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Log, self)
    }

    pub fn sin(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Sin, self)
    }

    pub fn cos(&self) -> Result<Expr, SymbolicError> {
        Expr::unary(UnaryOp::Cos, self)
    }

    pub fn add(&self, other: &Expr) -> Result<Expr, SymbolicError> {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn subtract(&self, other: &Expr) -> Result<Expr, SymbolicError> {
        Expr::binary(BinaryOp::Subtract, self, other)
    }

    /// Scaling if either operand is a scalar, otherwise a single contraction of the last index
    /// of `self` with the first index of `other`.
    pub fn multiply(&self, other: &Expr) -> Result<Expr, SymbolicError> {
        if self.rank() == 0 || other.rank() == 0 {
            Expr::binary(BinaryOp::Multiply, self, other)
        } else {
            self.contract(other, &[(self.rank() - 1, 0)])
        }
    }

    pub fn divide(&self, other: &Expr) -> Result<Expr, SymbolicError> {
        Expr::binary(BinaryOp::Divide, self, other)
    }

    /// Contract index `pairs[k].0` of `self` with index `pairs[k].1` of `other`.
    pub fn contract(&self, other: &Expr, pairs: &[(usize, usize)]) -> Result<Expr, SymbolicError> {
        Expr::binary(BinaryOp::Contract(pairs.to_vec()), self, other)
    }

    /// Contract the last two indices of `self` with the first two indices of `other`.
    pub fn double_contract(&self, other: &Expr) -> Result<Expr, SymbolicError> {
        if self.rank() < 2 || other.rank() < 2 {
            return Err(SymbolicError::IncompatibleOperands {
                operation: "double contraction",
                lhs: self.signature(),
                rhs: other.signature(),
            });
        }
        let r = self.rank();
        self.contract(other, &[(r - 2, 0), (r - 1, 1)])
    }

    pub fn outer_product(&self, other: &Expr) -> Result<Expr, SymbolicError> {
        Expr::binary(BinaryOp::OuterProduct, self, other)
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        self.negate()
    }
}

impl<'a> Neg for &'a Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        self.negate()
    }
}

pub fn negate(operand: &Expr) -> Expr {
    operand.negate()
}

pub fn transpose(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.transpose()
}

pub fn invert(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.invert()
}

pub fn determinant(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.determinant()
}

pub fn symmetrize(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.symmetrize()
}

pub fn trace(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.trace()
}

pub fn norm(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.norm()
}

pub fn sqrt(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.sqrt()
}

pub fn exp(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.exp()
}

pub fn log(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.log()
}

pub fn sin(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.sin()
}

pub fn cos(operand: &Expr) -> Result<Expr, SymbolicError> {
    operand.cos()
}

pub fn add(lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
    lhs.add(rhs)
}

pub fn subtract(lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
    lhs.subtract(rhs)
}

pub fn multiply(lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
    lhs.multiply(rhs)
}

pub fn divide(lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
    lhs.divide(rhs)
}

pub fn contract(lhs: &Expr, rhs: &Expr, pairs: &[(usize, usize)]) -> Result<Expr, SymbolicError> {
    lhs.contract(rhs, pairs)
}

pub fn double_contract(lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
    lhs.double_contract(rhs)
}

pub fn outer_product(lhs: &Expr, rhs: &Expr) -> Result<Expr, SymbolicError> {
    lhs.outer_product(rhs)
}
