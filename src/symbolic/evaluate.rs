use eyre::{eyre, WrapErr};
use nalgebra::DVector;

use crate::solution::LocalSolution;
use crate::symbolic::expr::{Node, Operand};
use crate::symbolic::{BinaryOp, Expr, GeometricQuantity, SpaceOperand, SpaceRole, UnaryOp};
use crate::tensor::Tensor;
use crate::values::FeValuesBase;
use crate::Scalar;

/// A quadrature point of the current cell or face, as seen by user functors.
#[derive(Clone, Copy)]
pub struct QuadraturePoint<'a> {
    values: &'a dyn FeValuesBase,
    index: usize,
}

impl<'a> QuadraturePoint<'a> {
    pub fn new(values: &'a dyn FeValuesBase, index: usize) -> Self {
        Self { values, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &'a dyn FeValuesBase {
        self.values
    }

    /// The physical position. Requires [`UpdateFlags::QUADRATURE_POINTS`](crate::UpdateFlags).
    pub fn position(&self) -> &'a DVector<f64> {
        self.values.quadrature_point(self.index)
    }

    /// The outward unit normal, if the point lies on a face.
    pub fn normal(&self) -> Option<&'a DVector<f64>> {
        self.values.normal_vector(self.index)
    }

    pub fn jxw(&self) -> f64 {
        self.values.jxw(self.index)
    }
}

/// Everything an expression needs to be evaluated on the current cell or face.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    values: &'a dyn FeValuesBase,
    solution: Option<&'a LocalSolution>,
    test_dof: Option<usize>,
    trial_dof: Option<usize>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(values: &'a dyn FeValuesBase) -> Self {
        Self {
            values,
            solution: None,
            test_dof: None,
            trial_dof: None,
        }
    }

    /// Local dof values of the solution vectors, used to evaluate field solutions.
    pub fn with_solution(self, solution: &'a LocalSolution) -> Self {
        Self {
            solution: Some(solution),
            ..self
        }
    }

    /// The local dof whose shape function is substituted for test functions.
    pub fn with_test_dof(self, dof: usize) -> Self {
        Self {
            test_dof: Some(dof),
            ..self
        }
    }

    /// The local dof whose shape function is substituted for trial solutions.
    pub fn with_trial_dof(self, dof: usize) -> Self {
        Self {
            trial_dof: Some(dof),
            ..self
        }
    }

    pub fn values(&self) -> &'a dyn FeValuesBase {
        self.values
    }

    pub fn solution(&self) -> Option<&'a LocalSolution> {
        self.solution
    }

    pub fn n_quadrature_points(&self) -> usize {
        self.values.n_quadrature_points()
    }
}

/// A half-open range `start .. end` of quadrature point indices processed as one batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuadraturePointRange {
    start: usize,
    end: usize,
}

impl QuadraturePointRange {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "Quadrature point range must satisfy start <= end");
        Self { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn iter(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Values substituted for parts of an expression during evaluation.
///
/// `arguments` replaces field solution operands, `directions` replaces the perturbation
/// directions of symbolic derivatives.
pub(crate) struct Bindings<'a, S> {
    pub arguments: &'a [(SpaceOperand, Tensor<S>)],
    pub directions: &'a [Tensor<S>],
}

impl<'a, S> Bindings<'a, S> {
    pub fn none() -> Self {
        Self {
            arguments: &[],
            directions: &[],
        }
    }
}

/// The operand applied to the local solution: `sum_i U_i op(phi_i)`.
pub(crate) fn evaluate_field(
    operand: &SpaceOperand,
    context: &EvaluationContext<'_>,
    solution_index: usize,
    q: usize,
) -> eyre::Result<Tensor<f64>> {
    let solution = context
        .solution
        .ok_or_else(|| eyre!("field solution operand evaluated without a solution"))?;
    let dof_values = solution
        .get(solution_index)
        .ok_or_else(|| eyre!("no solution vector stored at solution index {solution_index}"))?;
    let values = context.values;
    if dof_values.len() != values.dofs_per_cell() {
        return Err(eyre!(
            "local solution has {} dof values, but the cell has {} dofs",
            dof_values.len(),
            values.dofs_per_cell()
        ));
    }
    let signature = operand.signature();
    let mut result = Tensor::zeros(signature.rank(), signature.dim());
    for (dof, &u) in dof_values.iter().enumerate() {
        if u != 0.0 {
            let contribution = operand.evaluate_shape(values, dof, q).scaled(u);
            result = result.add_tensor(&contribution);
        }
    }
    Ok(result)
}

fn evaluate_operand<S: Scalar>(
    operand: &Operand,
    expr: &Expr,
    context: &EvaluationContext<'_>,
    q: usize,
    bindings: &Bindings<'_, S>,
) -> eyre::Result<Tensor<S>> {
    let values = context.values;
    match operand {
        Operand::Functor(functor) => Ok(functor.evaluate(&QuadraturePoint::new(values, q))?.lift()),
        Operand::Space(space) => {
            if let Some((_, value)) = bindings.arguments.iter().find(|(arg, _)| arg == space) {
                return Ok(value.clone());
            }
            let value = match space.role() {
                SpaceRole::TestFunction => {
                    let dof = context
                        .test_dof
                        .ok_or_else(|| eyre!("test function evaluated without a test dof"))?;
                    space.evaluate_shape(values, dof, q)
                }
                SpaceRole::TrialSolution => {
                    let dof = context
                        .trial_dof
                        .ok_or_else(|| eyre!("trial solution evaluated without a trial dof"))?;
                    space.evaluate_shape(values, dof, q)
                }
                SpaceRole::FieldSolution { solution_index } => evaluate_field(space, context, solution_index, q)?,
            };
            Ok(value.lift())
        }
        Operand::Geometry(quantity) => {
            let value = match quantity {
                GeometricQuantity::Position => Tensor::from_vector(values.quadrature_point(q)),
                GeometricQuantity::Normal => {
                    let normal = values
                        .normal_vector(q)
                        .ok_or_else(|| eyre!("normal vectors are only available on faces"))?;
                    Tensor::from_vector(normal)
                }
                GeometricQuantity::Jacobian => Tensor::from_matrix(values.jacobian(q)),
            };
            Ok(value.lift())
        }
        Operand::Zero => Ok(Tensor::zeros(expr.rank(), expr.dim())),
        Operand::Direction(index) => bindings
            .directions
            .get(*index)
            .cloned()
            .ok_or_else(|| eyre!("no direction bound for residual argument {index}")),
    }
}

fn apply_unary<S: Scalar>(op: UnaryOp, x: Tensor<S>) -> eyre::Result<Tensor<S>> {
    let scalar = |x: &Tensor<S>| x.scalar_value();
    Ok(match op {
        UnaryOp::Negate => -x,
        UnaryOp::Transpose => x.transpose(),
        UnaryOp::Invert => x
            .try_inverse()
            .ok_or_else(|| eyre!("cannot invert a singular tensor"))?,
        UnaryOp::Determinant => Tensor::scalar(x.determinant()),
        UnaryOp::Symmetrize => x.symmetrize(),
        UnaryOp::Trace => Tensor::scalar(x.trace()),
        UnaryOp::Norm => Tensor::scalar(x.norm()),
        UnaryOp::Sqrt => Tensor::scalar(scalar(&x).sqrt()),
        UnaryOp::Exp => Tensor::scalar(scalar(&x).exp()),
        UnaryOp::Log => Tensor::scalar(scalar(&x).ln()),
        UnaryOp::Sin => Tensor::scalar(scalar(&x).sin()),
        UnaryOp::Cos => Tensor::scalar(scalar(&x).cos()),
    })
}

fn apply_binary<S: Scalar>(op: &BinaryOp, a: Tensor<S>, b: Tensor<S>) -> Tensor<S> {
    match op {
        BinaryOp::Add => a.add_tensor(&b),
        BinaryOp::Subtract => a.sub_tensor(&b),
        BinaryOp::Multiply => {
            if a.rank() == 0 {
                b.scaled(a.scalar_value())
            } else {
                a.scaled(b.scalar_value())
            }
        }
        BinaryOp::Divide => {
            let divisor = b.scalar_value();
            a.map(|&x| x / divisor)
        }
        BinaryOp::Contract(pairs) => a.contract_pairs(&b, pairs),
        BinaryOp::OuterProduct => a.outer(&b),
    }
}

impl Expr {
    pub(crate) fn evaluate_with<S: Scalar>(
        &self,
        context: &EvaluationContext<'_>,
        q: usize,
        bindings: &Bindings<'_, S>,
    ) -> eyre::Result<Tensor<S>> {
        match self.node() {
            Node::Leaf(operand) => evaluate_operand(operand, self, context, q, bindings),
            Node::Unary(op, child) => apply_unary(*op, child.evaluate_with(context, q, bindings)?),
            Node::Binary(op, lhs, rhs) => {
                let a = lhs.evaluate_with(context, q, bindings)?;
                let b = rhs.evaluate_with(context, q, bindings)?;
                Ok(apply_binary(op, a, b))
            }
        }
    }

    /// Evaluate the expression at quadrature point `q`.
    ///
    /// Panics if `q` is not a valid quadrature point index of the context.
    pub fn evaluate(&self, context: &EvaluationContext<'_>, q: usize) -> eyre::Result<Tensor<f64>> {
        let n_q = context.n_quadrature_points();
        assert!(q < n_q, "Quadrature point index {q} out of bounds ({n_q} points)");
        self.evaluate_with(context, q, &Bindings::none())
    }

    /// Evaluate the expression at every quadrature point of the context.
    pub fn evaluate_all(&self, context: &EvaluationContext<'_>) -> eyre::Result<Vec<Tensor<f64>>> {
        (0..context.n_quadrature_points())
            .map(|q| {
                self.evaluate(context, q)
                    .wrap_err_with(|| format!("failed to evaluate expression at quadrature point {q}"))
            })
            .collect()
    }

    /// Evaluate a batch of quadrature points into lanes of `output`.
    ///
    /// Lane `k` receives the value at quadrature point `range.start() + k`. Lanes whose
    /// quadrature point index is not below the number of quadrature points are left untouched.
    ///
    /// Panics if the range is longer than `WIDTH`.
    pub fn evaluate_batch_into<const WIDTH: usize>(
        &self,
        context: &EvaluationContext<'_>,
        range: QuadraturePointRange,
        output: &mut [Tensor<f64>; WIDTH],
    ) -> eyre::Result<()> {
        assert!(
            range.len() <= WIDTH,
            "Quadrature point range of length {} does not fit into {WIDTH} lanes",
            range.len()
        );
        let n_q = context.n_quadrature_points();
        for (lane, q) in range.iter().enumerate() {
            if q < n_q {
                output[lane] = self.evaluate_with(context, q, &Bindings::none())?;
            }
        }
        Ok(())
    }

    /// Like [`evaluate_batch_into`](Self::evaluate_batch_into), with unused lanes set to zero.
    pub fn evaluate_batch<const WIDTH: usize>(
        &self,
        context: &EvaluationContext<'_>,
        range: QuadraturePointRange,
    ) -> eyre::Result<[Tensor<f64>; WIDTH]> {
        let mut output = std::array::from_fn(|_| Tensor::zeros(self.rank(), self.dim()));
        self.evaluate_batch_into(context, range, &mut output)?;
        Ok(output)
    }
}
