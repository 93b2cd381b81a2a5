use fenris_weakforms::assembly::{AssemblyInput, IntoAssemblyTerms, MatrixBasedAssembler};
use fenris_weakforms::differentiation::{
    evaluate_arguments, AutomaticDifferentiation, Differentiation, DifferentiationBackend, Linearization,
    SymbolicDifferentiation,
};
use fenris_weakforms::dofs::{Constraints, DofHandler};
use fenris_weakforms::element::LagrangeElement;
use fenris_weakforms::forms::{bilinear_form, residual_form, ResidualFunctor};
use fenris_weakforms::integral::Integrand;
use fenris_weakforms::mesh::BoxMesh;
use fenris_weakforms::num_dual::DualNum;
use fenris_weakforms::quadrature::QuadratureRule;
use fenris_weakforms::solution::{LocalSolution, SolutionStorage};
use fenris_weakforms::symbolic::{
    constant_tensor, EvaluationContext, FieldSolution, ScalarExtractor, Signature, TestFunction, TrialSolution,
    VectorExtractor,
};
use fenris_weakforms::values::FeValuesBase;
use fenris_weakforms::{Tensor, UpdateFlags};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use util::{assert_approx_tensor_eq, assert_panics};

use crate::unit_cell_values;

fn u() -> ScalarExtractor {
    ScalarExtractor::new(0, "u", "u")
}

/// `exp(u) grad u`
fn nonlinear_flux() -> ResidualFunctor {
    let field = FieldSolution::<2>::new().scalar(&u());
    let flux = field
        .value()
        .exp()
        .unwrap()
        .multiply(&field.gradient())
        .unwrap();
    ResidualFunctor::from_expression("q", "q", &flux).unwrap()
}

fn nonlinear_flux_function() -> ResidualFunctor {
    let field = FieldSolution::<2>::new().scalar(&u());
    ResidualFunctor::from_function(
        "q",
        "q",
        Signature::vector(2),
        &[field.value(), field.gradient()],
        |_, args| args[1].scaled(args[0].scalar_value().exp()),
    )
    .unwrap()
}

/// Linearize `residual` at every quadrature point of the unit square, where the field is
/// `u = 0.1 + 0.2 x + 0.3 y`.
fn linearize_on_unit_square<D: Differentiation>(backend: D, residual: &ResidualFunctor) -> Vec<(f64, Linearization)> {
    let flags = UpdateFlags::VALUES | UpdateFlags::GRADIENTS | UpdateFlags::QUADRATURE_POINTS;
    let values = unit_cell_values(2, 2, flags);
    let solution = LocalSolution::from_values(vec![vec![0.1, 0.3, 0.4, 0.6]]);
    let context = EvaluationContext::new(&values).with_solution(&solution);
    let prepared = backend.prepare(residual).unwrap();
    (0..values.n_quadrature_points())
        .map(|q| {
            let x = values.quadrature_point(q);
            let u = 0.1 + 0.2 * x[0] + 0.3 * x[1];
            let arguments = evaluate_arguments(residual, &context, q).unwrap();
            let linearization = backend
                .linearize(&prepared, residual, &context, q, &arguments)
                .unwrap();
            (u, linearization)
        })
        .collect()
}

fn assert_linearizes_nonlinear_flux(linearizations: &[(f64, Linearization)]) {
    assert_eq!(linearizations.len(), 4);
    for (u, linearization) in linearizations {
        let e = u.exp();
        let flux = Tensor::from_data(1, 2, vec![0.2 * e, 0.3 * e]);
        assert_approx_tensor_eq!(linearization.value(), &flux, abstol = 1e-12);

        let tangents = linearization.tangents();
        assert_eq!(tangents.len(), 2);
        // d/du [exp(u) g] = exp(u) g
        assert_approx_tensor_eq!(tangents[0], flux, abstol = 1e-12);
        // d/dg [exp(u) g] = exp(u) I
        assert_approx_tensor_eq!(tangents[1], Tensor::<f64>::identity(2).scaled(e), abstol = 1e-12);

        let directions = [Tensor::scalar(2.0), Tensor::from_data(1, 2, vec![0.0, 1.0])];
        let expected = Tensor::from_data(1, 2, vec![0.4 * e, 1.6 * e]);
        assert_approx_tensor_eq!(linearization.directional_derivative(&directions), expected, abstol = 1e-12);
    }
}

#[test]
fn residual_arguments_are_the_distinct_field_operands() {
    let field = FieldSolution::<2>::new().scalar(&u());
    let residual = nonlinear_flux();
    let arguments = residual.arguments();
    assert_eq!(arguments.len(), 2);
    assert_eq!(Some(&arguments[0]), field.value().as_space_operand());
    assert_eq!(Some(&arguments[1]), field.gradient().as_space_operand());
    assert_eq!(residual.signature(), Signature::vector(2));
    assert!(residual.update_flags().contains(UpdateFlags::GRADIENTS));
}

#[test]
fn automatic_differentiation_of_expression() {
    let linearizations = linearize_on_unit_square(AutomaticDifferentiation, &nonlinear_flux());
    assert_linearizes_nonlinear_flux(&linearizations);
}

#[test]
fn automatic_differentiation_of_function() {
    let linearizations = linearize_on_unit_square(AutomaticDifferentiation, &nonlinear_flux_function());
    assert_linearizes_nonlinear_flux(&linearizations);
}

#[test]
fn symbolic_differentiation_of_expression() {
    let residual = nonlinear_flux();
    let prepared = SymbolicDifferentiation.prepare(&residual).unwrap();
    assert_eq!(prepared.derivatives().len(), 2);

    let linearizations = linearize_on_unit_square(SymbolicDifferentiation, &residual);
    assert_linearizes_nonlinear_flux(&linearizations);
}

#[test]
fn symbolic_differentiation_requires_expression() {
    assert!(SymbolicDifferentiation.prepare(&nonlinear_flux_function()).is_err());
    assert_eq!(SymbolicDifferentiation.name(), "symbolic");
    assert_eq!(AutomaticDifferentiation.name(), "automatic");
}

#[test]
fn directional_derivative_needs_one_direction_per_argument() {
    let linearization = Linearization::new(
        2,
        Tensor::scalar(1.0),
        vec![Tensor::from_data(1, 2, vec![1.0, 2.0])],
    );
    let derivative = linearization.directional_derivative(&[Tensor::from_data(1, 2, vec![3.0, 4.0])]);
    assert_eq!(derivative.scalar_value(), 11.0);
    assert_panics!(linearization.directional_derivative(&[]));
}

fn assemble_on_two_by_two(terms: impl IntoAssemblyTerms, solution: &DVector<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let mesh = BoxMesh::hyper_cube(2, 2).unwrap();
    let dof_handler = DofHandler::new(mesh, LagrangeElement::scalar(2, 1).unwrap()).unwrap();
    assemble(&dof_handler, &QuadratureRule::gauss(2, 2).unwrap(), terms, solution)
}

fn assemble(
    dof_handler: &DofHandler,
    quadrature: &QuadratureRule,
    terms: impl IntoAssemblyTerms,
    solution: &DVector<f64>,
) -> (DMatrix<f64>, DVector<f64>) {
    let constraints = Constraints::new();
    let mut assembler = MatrixBasedAssembler::new();
    assembler += terms;

    let input = AssemblyInput::new(dof_handler, &constraints, quadrature).with_solution(SolutionStorage::new(solution));
    let mut matrix = assembler.create_system_matrix(dof_handler).unwrap();
    let mut rhs = DVector::zeros(dof_handler.n_dofs());
    assembler.assemble_system(&input, &mut matrix, &mut rhs).unwrap();
    (DMatrix::from(&matrix), rhs)
}

fn some_solution() -> DVector<f64> {
    DVector::from_fn(9, |i, _| 0.1 * (i as f64).sin())
}

#[test]
fn linear_residual_assembles_like_the_bilinear_form() {
    let v = TestFunction::<2>::new().scalar(&u());
    let du = TrialSolution::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());
    let conductivity = constant_tensor::<2>(Tensor::from_data(2, 2, vec![2.0, 0.5, 0.5, 1.0]));
    let solution = some_solution();

    let (stiffness, zero_rhs) = assemble_on_two_by_two(
        bilinear_form(&v.gradient(), &conductivity, &du.gradient())
            .unwrap()
            .dv(),
        &solution,
    );
    assert_eq!(zero_rhs, DVector::zeros(9));

    let flux = conductivity.multiply(&field.gradient()).unwrap();
    let residual = ResidualFunctor::from_expression("q", "q", &flux).unwrap();
    for backend in [DifferentiationBackend::Automatic, DifferentiationBackend::Symbolic] {
        let form = residual_form(&v.gradient(), &residual)
            .unwrap()
            .with_backend(backend)
            .unwrap();
        let (matrix, rhs) = assemble_on_two_by_two(form.dv(), &solution);
        assert_matrix_eq!(matrix, stiffness, comp = abs, tol = 1e-12);
        // 0 = R(u) + dR[δu] gives the Newton system K δu = -K u
        let expected_rhs = -(&stiffness * &solution);
        assert_matrix_eq!(rhs, expected_rhs, comp = abs, tol = 1e-12);
    }
}

#[test]
fn fourth_order_linear_residual_assembles_like_the_bilinear_form() {
    let mesh = BoxMesh::hyper_cube(2, 1).unwrap();
    let dof_handler = DofHandler::new(mesh, LagrangeElement::vector(2, 1).unwrap()).unwrap();
    let quadrature = QuadratureRule::gauss(2, 1).unwrap();
    let solution = DVector::from_fn(dof_handler.n_dofs(), |i, _| 0.1 * (i as f64 + 1.0).sin());

    let displacement = VectorExtractor::new(0, "u", "u");
    let v = TestFunction::<2>::new().vector(&displacement);
    let du = TrialSolution::<2>::new().vector(&displacement);
    let field = FieldSolution::<2>::new().vector(&displacement);
    // Distinct entries, so that neither minor nor major symmetry holds
    let stiffness_tensor = Tensor::from_data(4, 2, (1..=16).map(|i| i as f64 + 0.25 * (i * i) as f64).collect());
    let elasticity = constant_tensor::<2>(stiffness_tensor);

    let (stiffness, zero_rhs) = assemble(
        &dof_handler,
        &quadrature,
        bilinear_form(&v.gradient(), &elasticity, &du.gradient())
            .unwrap()
            .dv(),
        &solution,
    );
    assert_eq!(stiffness.shape(), (8, 8));
    assert_eq!(zero_rhs, DVector::zeros(8));
    assert_ne!(stiffness, stiffness.transpose());

    let stress = elasticity.double_contract(&field.gradient()).unwrap();
    let residual = ResidualFunctor::from_expression("sigma", "\\sigma", &stress).unwrap();
    for backend in [DifferentiationBackend::Automatic, DifferentiationBackend::Symbolic] {
        let form = residual_form(&v.gradient(), &residual)
            .unwrap()
            .with_backend(backend)
            .unwrap();
        let (matrix, rhs) = assemble(&dof_handler, &quadrature, form.dv(), &solution);
        assert_matrix_eq!(matrix, stiffness, comp = abs, tol = 1e-12);
        let expected_rhs = -(&stiffness * &solution);
        assert_matrix_eq!(rhs, expected_rhs, comp = abs, tol = 1e-12);
    }
}

#[test]
fn nonlinear_residual_assembles_identically_with_both_backends() {
    let v = TestFunction::<2>::new().scalar(&u());
    let solution = some_solution();
    let automatic = residual_form(&v.gradient(), &nonlinear_flux()).unwrap();
    let symbolic = automatic
        .clone()
        .with_backend(DifferentiationBackend::Symbolic)
        .unwrap();
    let function = residual_form(&v.gradient(), &nonlinear_flux_function()).unwrap();

    let (matrix_automatic, rhs_automatic) = assemble_on_two_by_two(automatic.dv(), &solution);
    let (matrix_symbolic, rhs_symbolic) = assemble_on_two_by_two(symbolic.dv(), &solution);
    let (matrix_function, rhs_function) = assemble_on_two_by_two(function.dv(), &solution);

    assert_matrix_eq!(matrix_symbolic, matrix_automatic, comp = abs, tol = 1e-12);
    assert_matrix_eq!(rhs_symbolic, rhs_automatic, comp = abs, tol = 1e-12);
    assert_matrix_eq!(matrix_function, matrix_automatic, comp = abs, tol = 1e-12);
    assert_matrix_eq!(rhs_function, rhs_automatic, comp = abs, tol = 1e-12);

    // Column j of the matrix is the derivative of -rhs with respect to solution entry j
    let h = 1e-6;
    for j in [0, 4, 7] {
        let mut perturbed = solution.clone();
        perturbed[j] += h;
        let (_, rhs_perturbed) = assemble_on_two_by_two(automatic.dv(), &perturbed);
        let column = -(rhs_perturbed - &rhs_automatic) / h;
        assert_matrix_eq!(column, matrix_automatic.column(j).into_owned(), comp = abs, tol = 1e-5);
    }
}
