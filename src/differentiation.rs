//! Linearization of residuals with respect to their field solution arguments.
//!
//! Two backends are provided: [`AutomaticDifferentiation`] evaluates the residual with
//! forward-mode dual numbers, seeding one argument component at a time, and
//! [`SymbolicDifferentiation`] builds the directional derivative of the residual expression once
//! and evaluates it for unit directions. Both produce the same [`Linearization`].
use eyre::eyre;
use num_dual::Dual64;
use serde::{Deserialize, Serialize};

use crate::forms::ResidualFunctor;
use crate::symbolic::{evaluate_field, Bindings, EvaluationContext, Expr};
use crate::tensor::Tensor;

/// The choice of differentiation backend for a residual form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DifferentiationBackend {
    #[default]
    Automatic,
    Symbolic,
}

/// The value of a residual `R` and its derivatives with respect to each argument `u_k`.
///
/// The tangent for argument `k` has rank `rank(R) + rank(u_k)`: its leading indices are those
/// of `R` and its trailing indices those of `u_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    dim: usize,
    value: Tensor<f64>,
    tangents: Vec<Tensor<f64>>,
}

impl Linearization {
    pub fn new(dim: usize, value: Tensor<f64>, tangents: Vec<Tensor<f64>>) -> Self {
        Self { dim, value, tangents }
    }

    pub fn value(&self) -> &Tensor<f64> {
        &self.value
    }

    pub fn tangents(&self) -> &[Tensor<f64>] {
        &self.tangents
    }

    /// `sum_k tangent_k [h_k]` for one direction `h_k` per argument.
    pub fn directional_derivative(&self, directions: &[Tensor<f64>]) -> Tensor<f64> {
        assert_eq!(
            directions.len(),
            self.tangents.len(),
            "Need exactly one direction per residual argument"
        );
        self.tangents.iter().zip(directions).fold(
            Tensor::zeros(self.value.rank(), self.dim),
            |acc, (tangent, direction)| {
                acc.add_tensor(&tangent.contract_trailing(direction, direction.rank()))
            },
        )
    }
}

/// A differentiation backend.
///
/// `prepare` runs once per residual and its result is kept in the differentiation cache;
/// `linearize` runs once per quadrature point.
pub trait Differentiation {
    type Prepared: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn prepare(&self, residual: &ResidualFunctor) -> eyre::Result<Self::Prepared>;

    /// Linearize the residual at quadrature point `q`, where `arguments` holds the current
    /// values of the residual's arguments.
    fn linearize(
        &self,
        prepared: &Self::Prepared,
        residual: &ResidualFunctor,
        context: &EvaluationContext<'_>,
        q: usize,
        arguments: &[Tensor<f64>],
    ) -> eyre::Result<Linearization>;
}

/// The current values of the residual's arguments at quadrature point `q`.
pub fn evaluate_arguments(
    residual: &ResidualFunctor,
    context: &EvaluationContext<'_>,
    q: usize,
) -> eyre::Result<Vec<Tensor<f64>>> {
    residual
        .arguments()
        .iter()
        .map(|argument| evaluate_field(argument, context, 0, q))
        .collect()
}

/// Forward-mode automatic differentiation with dual numbers.
#[derive(Debug, Copy, Clone, Default)]
pub struct AutomaticDifferentiation;

impl Differentiation for AutomaticDifferentiation {
    type Prepared = ();

    fn name(&self) -> &'static str {
        "automatic"
    }

    fn prepare(&self, _residual: &ResidualFunctor) -> eyre::Result<()> {
        Ok(())
    }

    fn linearize(
        &self,
        _prepared: &(),
        residual: &ResidualFunctor,
        context: &EvaluationContext<'_>,
        q: usize,
        arguments: &[Tensor<f64>],
    ) -> eyre::Result<Linearization> {
        let dim = residual.signature().dim();
        let unseeded: Vec<Tensor<Dual64>> = arguments
            .iter()
            .map(|argument| argument.map(|&x| Dual64::new(x, 0.0)))
            .collect();
        let value = residual.evaluate_dual(context, q, &unseeded)?.real_part();

        let mut tangents = Vec::with_capacity(arguments.len());
        for (k, argument) in arguments.iter().enumerate() {
            let n_components = argument.len();
            let mut data = vec![0.0; value.len() * n_components];
            let mut seeded = unseeded.clone();
            for c in 0..n_components {
                seeded[k].as_mut_slice()[c].eps = 1.0;
                let perturbed = residual.evaluate_dual(context, q, &seeded)?;
                for (i, entry) in perturbed.as_slice().iter().enumerate() {
                    data[i * n_components + c] = entry.eps;
                }
                seeded[k].as_mut_slice()[c].eps = 0.0;
            }
            tangents.push(Tensor::from_data(value.rank() + argument.rank(), dim, data));
        }
        Ok(Linearization::new(dim, value, tangents))
    }
}

/// Symbolic differentiation of the residual expression.
#[derive(Debug, Copy, Clone, Default)]
pub struct SymbolicDifferentiation;

/// The directional derivative of a residual expression with respect to each argument.
#[derive(Debug, Clone)]
pub struct SymbolicDerivatives {
    derivatives: Vec<Expr>,
}

impl SymbolicDerivatives {
    pub fn derivatives(&self) -> &[Expr] {
        &self.derivatives
    }
}

impl Differentiation for SymbolicDifferentiation {
    type Prepared = SymbolicDerivatives;

    fn name(&self) -> &'static str {
        "symbolic"
    }

    fn prepare(&self, residual: &ResidualFunctor) -> eyre::Result<SymbolicDerivatives> {
        let expression = residual
            .expression()
            .ok_or_else(|| eyre!("symbolic differentiation requires a residual defined by an expression"))?;
        let derivatives = residual
            .arguments()
            .iter()
            .enumerate()
            .map(|(k, argument)| expression.directional_derivative(argument, k))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "Prepared {} symbolic derivative(s) of residual {}",
            derivatives.len(),
            residual.symbol().ascii()
        );
        Ok(SymbolicDerivatives { derivatives })
    }

    fn linearize(
        &self,
        prepared: &SymbolicDerivatives,
        residual: &ResidualFunctor,
        context: &EvaluationContext<'_>,
        q: usize,
        arguments: &[Tensor<f64>],
    ) -> eyre::Result<Linearization> {
        let expression = residual
            .expression()
            .ok_or_else(|| eyre!("symbolic differentiation requires a residual defined by an expression"))?;
        let dim = residual.signature().dim();
        let bound: Vec<_> = residual
            .arguments()
            .iter()
            .cloned()
            .zip(arguments.iter().cloned())
            .collect();
        let value = expression.evaluate_with(
            context,
            q,
            &Bindings {
                arguments: &bound,
                directions: &[],
            },
        )?;

        let mut directions: Vec<Tensor<f64>> = arguments
            .iter()
            .map(|argument| Tensor::zeros(argument.rank(), dim))
            .collect();
        let mut tangents = Vec::with_capacity(arguments.len());
        for (k, (argument, derivative)) in arguments.iter().zip(&prepared.derivatives).enumerate() {
            let n_components = argument.len();
            let mut data = vec![0.0; value.len() * n_components];
            for c in 0..n_components {
                directions[k] = Tensor::unit(argument.rank(), dim, c);
                let bindings = Bindings {
                    arguments: &bound,
                    directions: &directions,
                };
                let perturbed = derivative.evaluate_with(context, q, &bindings)?;
                for (i, entry) in perturbed.as_slice().iter().enumerate() {
                    data[i * n_components + c] = *entry;
                }
            }
            directions[k] = Tensor::zeros(argument.rank(), dim);
            tangents.push(Tensor::from_data(value.rank() + argument.rank(), dim, data));
        }
        Ok(Linearization::new(dim, value, tangents))
    }
}
