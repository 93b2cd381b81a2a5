//! Symbolic directional derivatives of expressions with respect to field solution operands.
use crate::symbolic::expr::{Node, Operand};
use crate::symbolic::operands::constant_scalar_in;
use crate::symbolic::{BinaryOp, Expr, Signature, SpaceOperand, SymbolicError, UnaryOp};

fn zero_like(expr: &Expr) -> Expr {
    Expr::zero(expr.signature())
}

/// `a + b`, folding zero operands.
fn sum(a: Expr, b: Expr, signature: Signature) -> Result<Expr, SymbolicError> {
    match (a.is_zero(), b.is_zero()) {
        (true, true) => Ok(Expr::zero(signature)),
        (true, false) => Ok(b),
        (false, true) => Ok(a),
        (false, false) => a.add(&b),
    }
}

/// `a - b`, folding zero operands.
fn difference(a: Expr, b: Expr, signature: Signature) -> Result<Expr, SymbolicError> {
    match (a.is_zero(), b.is_zero()) {
        (true, true) => Ok(Expr::zero(signature)),
        (true, false) => Ok(b.negate()),
        (false, true) => Ok(a),
        (false, false) => a.subtract(&b),
    }
}

/// `op(a, b)` for an operator that is linear in each argument, folding zero operands.
fn bilinear(op: &BinaryOp, a: &Expr, b: &Expr, signature: Signature) -> Result<Expr, SymbolicError> {
    if a.is_zero() || b.is_zero() {
        Ok(Expr::zero(signature))
    } else {
        Expr::binary(op.clone(), a, b)
    }
}

/// `op(a)` for a linear unary operator, folding a zero operand.
fn linear(op: UnaryOp, a: &Expr, signature: Signature) -> Result<Expr, SymbolicError> {
    if a.is_zero() {
        Ok(Expr::zero(signature))
    } else {
        Expr::unary(op, a)
    }
}

/// `scale * da`, folding a zero derivative.
fn chain(scale: Expr, da: &Expr, signature: Signature) -> Result<Expr, SymbolicError> {
    bilinear(&BinaryOp::Multiply, &scale, da, signature)
}

impl Expr {
    /// The directional derivative of the expression with respect to `argument`.
    ///
    /// Every occurrence of `argument` is replaced by the direction leaf with index `index`,
    /// so the result is linear in that direction. Subtrees that do not depend on the argument
    /// collapse to zero.
    pub(crate) fn directional_derivative(&self, argument: &SpaceOperand, index: usize) -> Result<Expr, SymbolicError> {
        let signature = self.signature();
        match self.node() {
            Node::Leaf(Operand::Space(operand)) if operand == argument => Ok(Expr::direction(index, signature)),
            Node::Leaf(_) => Ok(zero_like(self)),
            Node::Unary(op, a) => {
                let da = a.directional_derivative(argument, index)?;
                if da.is_zero() {
                    return Ok(zero_like(self));
                }
                match op {
                    UnaryOp::Negate => Ok(da.negate()),
                    UnaryOp::Transpose | UnaryOp::Symmetrize | UnaryOp::Trace => linear(*op, &da, signature),
                    UnaryOp::Invert => {
                        // d(A^-1) = -A^-1 dA A^-1
                        let inverse = a.invert()?;
                        Ok(inverse.multiply(&da)?.multiply(&inverse)?.negate())
                    }
                    UnaryOp::Determinant => {
                        // d(det A) = det A tr(A^-1 dA)
                        let inverse = a.invert()?;
                        let trace = inverse.multiply(&da)?.trace()?;
                        a.determinant()?.multiply(&trace)
                    }
                    UnaryOp::Norm => {
                        // d|A| = (A : dA) / |A|
                        let inner = if a.rank() == 0 {
                            a.multiply(&da)?
                        } else {
                            let pairs: Vec<_> = (0..a.rank()).map(|i| (i, i)).collect();
                            a.contract(&da, &pairs)?
                        };
                        inner.divide(&self.clone())
                    }
                    UnaryOp::Sqrt => {
                        let two = constant_scalar_in(2.0, self.dim());
                        da.divide(&two.multiply(self)?)
                    }
                    UnaryOp::Exp => chain(self.clone(), &da, signature),
                    UnaryOp::Log => da.divide(a),
                    UnaryOp::Sin => chain(a.cos()?, &da, signature),
                    UnaryOp::Cos => Ok(chain(a.sin()?, &da, signature)?.negate()),
                }
            }
            Node::Binary(op, a, b) => {
                let da = a.directional_derivative(argument, index)?;
                let db = b.directional_derivative(argument, index)?;
                match op {
                    BinaryOp::Add => sum(da, db, signature),
                    BinaryOp::Subtract => difference(da, db, signature),
                    BinaryOp::Multiply | BinaryOp::Contract(_) | BinaryOp::OuterProduct => {
                        let left = bilinear(op, &da, b, signature)?;
                        let right = bilinear(op, a, &db, signature)?;
                        sum(left, right, signature)
                    }
                    BinaryOp::Divide => {
                        // d(a / b) = da / b - (a db) / b^2
                        let left = if da.is_zero() {
                            Expr::zero(signature)
                        } else {
                            da.divide(b)?
                        };
                        let right = if db.is_zero() {
                            Expr::zero(signature)
                        } else {
                            a.multiply(&db)?.divide(&b.multiply(b)?)?
                        };
                        difference(left, right, signature)
                    }
                }
            }
        }
    }
}
