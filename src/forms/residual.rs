use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use eyre::eyre;
use num_dual::Dual64;

use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::differentiation::DifferentiationBackend;
use crate::flags::UpdateFlags;
use crate::forms::{validate_functor, validate_test_operand, FormError};
use crate::integral::Integrand;
use crate::symbolic::{
    Bindings, EvaluationContext, Expr, FunctorId, QuadraturePoint, Signature, SpaceOperand, SpaceRole, Symbol,
};
use crate::tensor::Tensor;

/// A residual evaluated from the values of its arguments at a quadrature point.
///
/// The arguments are passed in the order they were declared, as dual numbers so that the
/// residual can be differentiated automatically.
pub type ResidualFunction = dyn Fn(&QuadraturePoint<'_>, &[Tensor<Dual64>]) -> Tensor<Dual64> + Send + Sync;

#[derive(Clone)]
pub(crate) enum ResidualDefinition {
    Expression(Expr),
    Function(Arc<ResidualFunction>),
}

/// A (possibly nonlinear) function of field solution operands whose linearization is needed.
#[derive(Clone)]
pub struct ResidualFunctor {
    id: FunctorId,
    symbol: Symbol,
    signature: Signature,
    arguments: Vec<SpaceOperand>,
    flags: UpdateFlags,
    definition: ResidualDefinition,
}

impl Debug for ResidualFunctor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResidualFunctor")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .field("signature", &self.signature)
            .field("n_arguments", &self.arguments.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl ResidualFunctor {
    /// A residual given as an expression of field solution operands.
    ///
    /// The arguments are the distinct operands of the current solution in the expression.
    pub fn from_expression(
        ascii: impl Into<String>,
        latex: impl Into<String>,
        expression: &Expr,
    ) -> Result<Self, FormError> {
        validate_functor(expression, "residual")?;
        Ok(Self {
            id: FunctorId::next(),
            symbol: Symbol::new(ascii, latex),
            signature: expression.signature(),
            arguments: expression.field_arguments(),
            flags: expression.update_flags(),
            definition: ResidualDefinition::Expression(expression.clone()),
        })
    }

    /// A residual given as a function of its arguments.
    ///
    /// Every argument must be a bare operand of the current field solution, e.g. the
    /// gradient of a field. `signature` is the shape of the returned tensor.
    pub fn from_function<F>(
        ascii: impl Into<String>,
        latex: impl Into<String>,
        signature: Signature,
        arguments: &[Expr],
        function: F,
    ) -> Result<Self, FormError>
    where
        F: Fn(&QuadraturePoint<'_>, &[Tensor<Dual64>]) -> Tensor<Dual64> + Send + Sync + 'static,
    {
        let mut operands = Vec::with_capacity(arguments.len());
        let mut flags = UpdateFlags::DEFAULT;
        for (index, argument) in arguments.iter().enumerate() {
            let operand = argument
                .as_space_operand()
                .filter(|operand| operand.role() == SpaceRole::FieldSolution { solution_index: 0 })
                .ok_or(FormError::InvalidResidualArgument { index })?;
            flags |= operand.update_flags();
            operands.push(operand.clone());
        }
        Ok(Self {
            id: FunctorId::next(),
            symbol: Symbol::new(ascii, latex),
            signature,
            arguments: operands,
            flags,
            definition: ResidualDefinition::Function(Arc::new(function)),
        })
    }

    /// Additional quantities a function residual reads from the quadrature point.
    pub fn with_update_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn id(&self) -> FunctorId {
        self.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn arguments(&self) -> &[SpaceOperand] {
        &self.arguments
    }

    pub fn update_flags(&self) -> UpdateFlags {
        self.flags
    }

    /// The defining expression, if the residual was built from one.
    pub fn expression(&self) -> Option<&Expr> {
        match &self.definition {
            ResidualDefinition::Expression(expr) => Some(expr),
            ResidualDefinition::Function(_) => None,
        }
    }

    /// Evaluate the residual with the given argument values substituted.
    pub(crate) fn evaluate_dual(
        &self,
        context: &EvaluationContext<'_>,
        q: usize,
        arguments: &[Tensor<Dual64>],
    ) -> eyre::Result<Tensor<Dual64>> {
        assert_eq!(arguments.len(), self.arguments.len());
        let value = match &self.definition {
            ResidualDefinition::Expression(expr) => {
                let bound: Vec<_> = self
                    .arguments
                    .iter()
                    .cloned()
                    .zip(arguments.iter().cloned())
                    .collect();
                let bindings = Bindings {
                    arguments: &bound,
                    directions: &[],
                };
                expr.evaluate_with(context, q, &bindings)?
            }
            ResidualDefinition::Function(function) => function(&QuadraturePoint::new(context.values(), q), arguments),
        };
        let dim_ok = value.rank() == 0 || value.dim() == self.signature.dim();
        if value.rank() != self.signature.rank() || !dim_ok {
            return Err(eyre!(
                "residual {} returned a tensor of rank {} and dim {}, but was declared as {}",
                self.symbol.ascii(),
                value.rank(),
                value.dim(),
                self.signature
            ));
        }
        Ok(value)
    }

    fn render_call(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        let arguments = self
            .arguments
            .iter()
            .map(|argument| argument.clone().into_expr().render(decorations, format))
            .collect::<Vec<_>>()
            .join(", ");
        decorations.decorate_with_operator(format, self.symbol.get(format), &arguments)
    }
}

/// `∫ test · R(u)`, together with its linearization `∫ test · dR/du [trial]`.
#[derive(Debug, Clone)]
pub struct ResidualForm {
    test: Expr,
    residual: ResidualFunctor,
    backend: DifferentiationBackend,
}

/// Build a residual form. The residual must have the same rank and dimension as `test`.
///
/// Forms use automatic differentiation unless another backend is selected with
/// [`ResidualForm::with_backend`].
pub fn residual_form(test: &Expr, residual: &ResidualFunctor) -> Result<ResidualForm, FormError> {
    validate_test_operand(test)?;
    let signature = residual.signature();
    if signature.rank() != test.rank() || signature.dim() != test.dim() {
        return Err(FormError::IncompatibleShapes {
            form: "residual form",
            test: test.signature(),
            functor: signature,
            trial: None,
        });
    }
    Ok(ResidualForm {
        test: test.clone(),
        residual: residual.clone(),
        backend: DifferentiationBackend::default(),
    })
}

impl ResidualForm {
    /// Select the differentiation backend.
    ///
    /// The symbolic backend requires a residual defined by an expression.
    pub fn with_backend(self, backend: DifferentiationBackend) -> Result<Self, FormError> {
        if backend == DifferentiationBackend::Symbolic && self.residual.expression().is_none() {
            return Err(FormError::SymbolicBackendRequiresExpression);
        }
        Ok(Self { backend, ..self })
    }

    pub fn backend(&self) -> DifferentiationBackend {
        self.backend
    }

    pub fn test(&self) -> &Expr {
        &self.test
    }

    pub fn residual(&self) -> &ResidualFunctor {
        &self.residual
    }
}

impl Render for ResidualForm {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        let test = self.test.render(decorations, format);
        let residual = self.residual.render_call(decorations, format);
        match format {
            Format::Ascii => format!("({test}, {residual})"),
            Format::Latex => {
                let symbol = decorations.naming(format).contraction(self.test.rank());
                decorations.bracket(format, &format!("{test} {symbol} {residual}"))
            }
        }
    }
}

impl Integrand for ResidualForm {
    fn integrand_update_flags(&self) -> UpdateFlags {
        self.test.update_flags() | self.residual.update_flags()
    }
}
