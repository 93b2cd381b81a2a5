//! Integration of scalar expressions, e.g. to compute errors, energies or fluxes.
use eyre::{eyre, WrapErr};
use log::debug;

use crate::dofs::DofHandler;
use crate::flags::UpdateFlags;
use crate::integral::{DomainKind, Integrand, SymbolicIntegral};
use crate::quadrature::QuadratureRule;
use crate::solution::{LocalSolution, SolutionStorage};
use crate::symbolic::{EvaluationContext, Expr};
use crate::values::{FeFaceValues, FeInterfaceValues, FeValues, FeValuesBase};

impl Integrand for Expr {
    fn integrand_update_flags(&self) -> UpdateFlags {
        self.update_flags()
    }
}

/// Integrates scalar expressions of functors, geometric quantities and field solutions.
#[derive(Debug, Clone)]
pub struct Integrator<'a> {
    dof_handler: &'a DofHandler,
    cell_quadrature: &'a QuadratureRule,
    face_quadrature: Option<&'a QuadratureRule>,
    solution: Option<SolutionStorage<'a>>,
}

impl<'a> Integrator<'a> {
    pub fn new(dof_handler: &'a DofHandler, cell_quadrature: &'a QuadratureRule) -> Self {
        Self {
            dof_handler,
            cell_quadrature,
            face_quadrature: None,
            solution: None,
        }
    }

    pub fn with_face_quadrature(self, face_quadrature: &'a QuadratureRule) -> Self {
        Self {
            face_quadrature: Some(face_quadrature),
            ..self
        }
    }

    pub fn with_solution(self, solution: SolutionStorage<'a>) -> Self {
        Self {
            solution: Some(solution),
            ..self
        }
    }

    /// The value of the integral, including its sign.
    ///
    /// The integrand must be a scalar without test functions or trial solutions.
    pub fn integrate(&self, integral: &SymbolicIntegral<Expr>) -> eyre::Result<f64> {
        let expr = integral.integrand();
        if expr.rank() != 0 {
            return Err(eyre!("only scalar expressions can be integrated, got {}", expr.signature()));
        }
        if expr.contains_test_function() || expr.contains_trial_solution() {
            return Err(eyre!("integrated expressions must not contain test functions or trial solutions"));
        }
        if expr.contains_field_solution() {
            let solution = self
                .solution
                .as_ref()
                .ok_or_else(|| eyre!("the expression reads a field solution, but none was given"))?;
            let needed = expr.max_solution_index().map_or(0, |index| index + 1);
            if solution.n_solutions() < needed {
                return Err(eyre!(
                    "the expression reads {needed} solution vector(s), but {} were given",
                    solution.n_solutions()
                ));
            }
            solution.check_size(self.dof_handler.n_dofs())?;
        }

        let flags = integral.update_flags();
        let value = match integral.domain().kind() {
            DomainKind::Volume => self.integrate_cells(integral, flags),
            DomainKind::Boundary => self.integrate_boundary(integral, flags),
            DomainKind::Interface => self.integrate_interfaces(integral, flags),
        }?;
        debug!("Integrated {:?} term with flags {flags}: {value}", integral.domain().kind());
        Ok(integral.sign() * value)
    }

    fn face_quadrature(&self) -> eyre::Result<&'a QuadratureRule> {
        self.face_quadrature
            .ok_or_else(|| eyre!("face integrals require a face quadrature rule"))
    }

    fn integrate_cells(&self, integral: &SymbolicIntegral<Expr>, flags: UpdateFlags) -> eyre::Result<f64> {
        let mesh = self.dof_handler.mesh();
        let mut values = FeValues::new(self.dof_handler.element(), self.cell_quadrature, flags)?;
        let mut local = LocalSolution::default();
        let mut dofs = vec![0; self.dof_handler.dofs_per_cell()];
        let mut total = 0.0;
        for cell in mesh.cells() {
            if !integral.domain().admits(&cell, None) {
                continue;
            }
            values.reinit(mesh, cell.index());
            self.dof_handler.populate_cell_dofs(cell.index(), &mut dofs);
            total += self
                .sum_over_points(integral.integrand(), &values, &dofs, &mut local)
                .wrap_err_with(|| format!("failed to integrate on cell {}", cell.index()))?;
        }
        Ok(total)
    }

    fn integrate_boundary(&self, integral: &SymbolicIntegral<Expr>, flags: UpdateFlags) -> eyre::Result<f64> {
        let mesh = self.dof_handler.mesh();
        let mut values = FeFaceValues::new(self.dof_handler.element(), self.face_quadrature()?, flags)?;
        let mut local = LocalSolution::default();
        let mut dofs = vec![0; self.dof_handler.dofs_per_cell()];
        let mut total = 0.0;
        for cell in mesh.cells() {
            for face in 0..mesh.n_faces_per_cell() {
                if !mesh.face_at_boundary(cell.index(), face) || !integral.domain().admits(&cell, Some(face)) {
                    continue;
                }
                values.reinit(mesh, cell.index(), face);
                self.dof_handler.populate_cell_dofs(cell.index(), &mut dofs);
                total += self.sum_over_points(integral.integrand(), &values, &dofs, &mut local)?;
            }
        }
        Ok(total)
    }

    fn integrate_interfaces(&self, integral: &SymbolicIntegral<Expr>, flags: UpdateFlags) -> eyre::Result<f64> {
        let mesh = self.dof_handler.mesh();
        let mut values = FeInterfaceValues::new(self.dof_handler.element(), self.face_quadrature()?, flags)?;
        let mut local = LocalSolution::default();
        let n = self.dof_handler.dofs_per_cell();
        let mut dofs = vec![0; 2 * n];
        let mut total = 0.0;
        for cell in mesh.cells() {
            for face in 0..mesh.n_faces_per_cell() {
                let neighbour = match cell.neighbour(face) {
                    Some(neighbour) if neighbour.index() > cell.index() => neighbour,
                    _ => continue,
                };
                if !integral.domain().admits(&cell, Some(face)) {
                    continue;
                }
                values.reinit(mesh, cell.index(), face);
                let (this_dofs, neighbour_dofs) = dofs.split_at_mut(n);
                self.dof_handler.populate_cell_dofs(cell.index(), this_dofs);
                self.dof_handler.populate_cell_dofs(neighbour.index(), neighbour_dofs);
                total += self.sum_over_points(integral.integrand(), &values, &dofs, &mut local)?;
            }
        }
        Ok(total)
    }

    fn sum_over_points(
        &self,
        expr: &Expr,
        values: &dyn FeValuesBase,
        dofs: &[usize],
        local: &mut LocalSolution,
    ) -> eyre::Result<f64> {
        let mut context = EvaluationContext::new(values);
        if let Some(solution) = &self.solution {
            solution.extract_local_dof_values_into(dofs, local);
            context = context.with_solution(local);
        }
        let mut sum = 0.0;
        for q in 0..values.n_quadrature_points() {
            sum += expr.evaluate(&context, q)?.scalar_value() * values.jxw(q);
        }
        Ok(sum)
    }
}
