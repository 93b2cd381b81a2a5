//! Local contributions of assembly terms on one cell, boundary face or interface.
use std::sync::Arc;

use davenport::{define_thread_local_workspace, with_thread_local_workspace};
use eyre::{eyre, WrapErr};
use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::assembly::AssemblyTerm;
use crate::cache::{CacheKey, CacheScope, FunctorCache};
use crate::differentiation::{
    evaluate_arguments, AutomaticDifferentiation, Differentiation, DifferentiationBackend, Linearization,
    SymbolicDifferentiation, SymbolicDerivatives,
};
use crate::forms::{BilinearForm, LinearForm, ResidualForm, ResidualFunctor};
use crate::solution::LocalSolution;
use crate::symbolic::{EvaluationContext, Expr, SpaceRole};
use crate::tensor::Tensor;
use crate::values::FeValuesBase;

/// The setup data of a residual for the differentiation backend of its form.
#[derive(Debug, Clone)]
pub(crate) enum PreparedResidual {
    Automatic(Arc<()>),
    Symbolic(Arc<SymbolicDerivatives>),
}

impl PreparedResidual {
    fn linearization_tag(&self) -> &'static str {
        match self {
            Self::Automatic(_) => "linearization/automatic",
            Self::Symbolic(_) => "linearization/symbolic",
        }
    }

    fn linearize(
        &self,
        residual: &ResidualFunctor,
        context: &EvaluationContext<'_>,
        q: usize,
    ) -> eyre::Result<Linearization> {
        let arguments = evaluate_arguments(residual, context, q)?;
        match self {
            Self::Automatic(prepared) => AutomaticDifferentiation.linearize(prepared, residual, context, q, &arguments),
            Self::Symbolic(prepared) => SymbolicDifferentiation.linearize(prepared, residual, context, q, &arguments),
        }
    }
}

fn prepare_cached<D: Differentiation>(
    backend: &D,
    residual: &ResidualFunctor,
    cache: &mut FunctorCache<'_>,
) -> eyre::Result<Arc<D::Prepared>> {
    let key = CacheKey::setup(residual.id(), backend.name());
    let slot = cache.slot();
    let mut storage = cache.get(CacheScope::Setup);
    let prepared = storage.get_or_try_insert_with(key, || {
        trace!(
            "Preparing {} differentiation of residual {} in cache slot {slot}",
            backend.name(),
            residual.symbol().ascii()
        );
        backend.prepare(residual).map(Arc::new)
    })?;
    Ok(Arc::clone(prepared))
}

/// Prepare the residual of a form for its backend, reusing setup data found in the cache.
pub(crate) fn prepare_residual(form: &ResidualForm, cache: &mut FunctorCache<'_>) -> eyre::Result<PreparedResidual> {
    let residual = form.residual();
    let prepared = match form.backend() {
        DifferentiationBackend::Automatic => {
            PreparedResidual::Automatic(prepare_cached(&AutomaticDifferentiation, residual, cache)?)
        }
        DifferentiationBackend::Symbolic => {
            PreparedResidual::Symbolic(prepare_cached(&SymbolicDifferentiation, residual, cache)?)
        }
    };
    Ok(prepared)
}

/// Which parts of the local system are needed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct LocalOutputs {
    pub matrix: bool,
    pub rhs: bool,
}

/// The local matrix and right-hand side of one visit.
#[derive(Debug, Clone)]
pub(crate) struct LocalSystem {
    pub matrix: DMatrix<f64>,
    pub rhs: DVector<f64>,
}

impl LocalSystem {
    pub fn new() -> Self {
        Self {
            matrix: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
        }
    }

    pub fn reset(&mut self, n_dofs: usize) {
        self.matrix.resize_mut(n_dofs, n_dofs, 0.0);
        self.matrix.fill(0.0);
        self.rhs.resize_vertically_mut(n_dofs, 0.0);
        self.rhs.fill(0.0);
    }
}

#[derive(Debug, Default)]
struct LocalAssemblyWorkspace {
    test_values: Vec<Tensor<f64>>,
    trial_values: Vec<Tensor<f64>>,
}

define_thread_local_workspace!(WORKSPACE);

fn evaluate_test_values(
    test: &Expr,
    context: &EvaluationContext<'_>,
    q: usize,
    output: &mut Vec<Tensor<f64>>,
) -> eyre::Result<()> {
    output.clear();
    for i in 0..context.values().dofs_per_cell() {
        output.push(test.evaluate(&context.with_test_dof(i), q)?);
    }
    Ok(())
}

/// Everything a term needs to compute its local contribution on the current visit.
pub(crate) struct LocalAssembler<'a, 'c> {
    pub values: &'a dyn FeValuesBase,
    pub solution: Option<&'a LocalSolution>,
    pub cache: &'a mut FunctorCache<'c>,
    pub outputs: LocalOutputs,
}

impl<'a, 'c> LocalAssembler<'a, 'c> {
    fn context(&self) -> EvaluationContext<'a> {
        let context = EvaluationContext::new(self.values);
        match self.solution {
            Some(solution) => context.with_solution(solution),
            None => context,
        }
    }

    /// Add the contribution of `term` to `local`.
    ///
    /// `prepared` must be given for residual terms.
    pub fn assemble_term(
        &mut self,
        term: &AssemblyTerm,
        prepared: Option<&PreparedResidual>,
        local: &mut LocalSystem,
    ) -> eyre::Result<()> {
        let sign = term.sign();
        match term {
            AssemblyTerm::Linear(integral) => {
                if self.outputs.rhs {
                    self.assemble_linear(integral.integrand(), sign, local)
                        .wrap_err("failed to assemble linear form")?;
                }
            }
            AssemblyTerm::Bilinear(integral) => {
                if self.outputs.matrix {
                    self.assemble_bilinear(integral.integrand(), sign, local)
                        .wrap_err("failed to assemble bilinear form")?;
                }
            }
            AssemblyTerm::Residual(integral) => {
                let prepared =
                    prepared.ok_or_else(|| eyre!("residual term assembled without prepared differentiation data"))?;
                self.assemble_residual(integral.integrand(), prepared, sign, local)
                    .wrap_err("failed to assemble residual form")?;
            }
        }
        Ok(())
    }

    /// `rhs[i] -= sign * ∫ test_i · f`.
    fn assemble_linear(&mut self, form: &LinearForm, sign: f64, local: &mut LocalSystem) -> eyre::Result<()> {
        let context = self.context();
        with_thread_local_workspace(&WORKSPACE, |ws: &mut LocalAssemblyWorkspace| -> eyre::Result<()> {
            for q in 0..context.n_quadrature_points() {
                let jxw = self.values.jxw(q);
                let f = form.functor().evaluate(&context, q)?;
                evaluate_test_values(form.test(), &context, q, &mut ws.test_values)?;
                for (i, test) in ws.test_values.iter().enumerate() {
                    local.rhs[i] -= sign * test.full_contract(&f) * jxw;
                }
            }
            Ok(())
        })
    }

    /// `matrix[i, j] += sign * ∫ test_i · F · trial_j`.
    fn assemble_bilinear(&mut self, form: &BilinearForm, sign: f64, local: &mut LocalSystem) -> eyre::Result<()> {
        let context = self.context();
        let n = self.values.dofs_per_cell();
        let scalar_functor = form.functor().rank() == 0;
        with_thread_local_workspace(&WORKSPACE, |ws: &mut LocalAssemblyWorkspace| -> eyre::Result<()> {
            for q in 0..context.n_quadrature_points() {
                let jxw = self.values.jxw(q);
                let functor = form.functor().evaluate(&context, q)?;
                evaluate_test_values(form.test(), &context, q, &mut ws.test_values)?;

                // Apply the functor to the trial values once, so that each entry is a single
                // full contraction with a test value
                ws.trial_values.clear();
                for j in 0..n {
                    let trial = form.trial().evaluate(&context.with_trial_dof(j), q)?;
                    let applied = if scalar_functor {
                        trial.scaled(functor.scalar_value())
                    } else {
                        functor.contract_trailing(&trial, trial.rank())
                    };
                    ws.trial_values.push(applied);
                }

                for i in 0..n {
                    let first_column = if form.is_symmetric() { i } else { 0 };
                    for j in first_column..n {
                        let value = sign * ws.test_values[i].full_contract(&ws.trial_values[j]) * jxw;
                        local.matrix[(i, j)] += value;
                        if form.is_symmetric() && j != i {
                            local.matrix[(j, i)] += value;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// `matrix[i, j] += sign * ∫ test_i · dR[trial_j]` and `rhs[i] -= sign * ∫ test_i · R`.
    fn assemble_residual(
        &mut self,
        form: &ResidualForm,
        prepared: &PreparedResidual,
        sign: f64,
        local: &mut LocalSystem,
    ) -> eyre::Result<()> {
        let context = self.context();
        let values = self.values;
        let n = values.dofs_per_cell();
        let residual = form.residual();
        let trial_arguments: Vec<_> = residual
            .arguments()
            .iter()
            .map(|argument| argument.with_role(SpaceRole::TrialSolution))
            .collect();
        let outputs = self.outputs;
        let cache = &mut *self.cache;

        with_thread_local_workspace(&WORKSPACE, |ws: &mut LocalAssemblyWorkspace| -> eyre::Result<()> {
            for q in 0..context.n_quadrature_points() {
                let jxw = values.jxw(q);
                let key = CacheKey::quadrature_point(residual.id(), prepared.linearization_tag(), q);
                let mut storage = cache.get(CacheScope::Visitation);
                let linearization: &mut Linearization =
                    storage.get_or_try_insert_with(key, || prepared.linearize(residual, &context, q))?;
                evaluate_test_values(form.test(), &context, q, &mut ws.test_values)?;

                if outputs.rhs {
                    for (i, test) in ws.test_values.iter().enumerate() {
                        local.rhs[i] -= sign * test.full_contract(linearization.value()) * jxw;
                    }
                }

                if outputs.matrix {
                    ws.trial_values.clear();
                    for j in 0..n {
                        let directions: Vec<_> = trial_arguments
                            .iter()
                            .map(|argument| argument.evaluate_shape(values, j, q))
                            .collect();
                        ws.trial_values.push(linearization.directional_derivative(&directions));
                    }
                    for i in 0..n {
                        for j in 0..n {
                            local.matrix[(i, j)] += sign * ws.test_values[i].full_contract(&ws.trial_values[j]) * jxw;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
