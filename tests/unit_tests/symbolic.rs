use fenris_weakforms::decorations::{Render, SymbolicDecorations};
use fenris_weakforms::solution::LocalSolution;
use fenris_weakforms::symbolic::{
    constant_scalar, constant_tensor, constant_vector, determinant, symmetrize, transpose, EvaluationContext,
    FieldSolution, Jacobian, Normal, Position, QuadraturePointRange, ScalarExtractor, ScalarFunctor, SymbolicError,
    TensorFunctor, TestFunction, TrialSolution, ValueKind, VectorExtractor,
};
use fenris_weakforms::values::FeValuesBase;
use fenris_weakforms::{Tensor, UpdateFlags};
use insta::assert_snapshot;
use proptest::prelude::*;
use util::assert_approx_tensor_eq;

use crate::unit_cell_values;

fn u() -> ScalarExtractor {
    ScalarExtractor::new(0, "u", "u")
}

fn all_flags() -> UpdateFlags {
    UpdateFlags::VALUES | UpdateFlags::GRADIENTS | UpdateFlags::QUADRATURE_POINTS | UpdateFlags::JXW_VALUES
}

#[test]
fn determinant_of_vector_is_rejected() {
    let v = constant_vector::<2>([1.0, 2.0]);
    let err = v.determinant().unwrap_err();
    assert_eq!(
        err,
        SymbolicError::IllegalRank {
            operation: "determinant",
            rank: 1,
            requirement: "a rank-2 tensor",
        }
    );
    assert_eq!(
        err.to_string(),
        "cannot apply determinant to an operand of rank 1: determinant requires a rank-2 tensor"
    );
    assert!(determinant(&v).is_err());
}

#[test]
fn illegal_operand_combinations_are_rejected() {
    let s = constant_scalar::<2>(1.0);
    let v = constant_vector::<2>([1.0, 2.0]);
    let a = constant_tensor::<2>(Tensor::identity(2));

    assert!(matches!(s.add(&v), Err(SymbolicError::IncompatibleOperands { .. })));
    assert!(matches!(v.divide(&v), Err(SymbolicError::IncompatibleOperands { .. })));
    assert!(matches!(v.transpose(), Err(SymbolicError::IllegalRank { rank: 1, .. })));
    assert!(matches!(a.exp(), Err(SymbolicError::IllegalRank { rank: 2, .. })));
    assert!(matches!(
        a.contract(&v, &[(2, 0)]),
        Err(SymbolicError::InvalidIndexPairs { lhs_rank: 2, rhs_rank: 1, .. })
    ));
    assert!(matches!(
        a.contract(&a, &[(0, 0), (1, 0)]),
        Err(SymbolicError::InvalidIndexPairs { .. })
    ));
    assert!(matches!(v.double_contract(&a), Err(SymbolicError::IncompatibleOperands { .. })));

    let a4 = constant_tensor::<4>(Tensor::identity(4));
    assert_eq!(
        a4.determinant().unwrap_err(),
        SymbolicError::UnsupportedDimension {
            operation: "determinant",
            dim: 4
        }
    );

    // Dimensions of operands must agree
    let v3 = constant_vector::<3>([1.0, 2.0, 3.0]);
    assert!(v.add(&v3).is_err());
}

#[test]
fn result_signatures() {
    let scalar = ScalarExtractor::new(0, "p", "p");
    let vector = VectorExtractor::new(0, "u", "\\mathbf{u}");
    let trial = TrialSolution::<3>::new();

    let grad = trial.vector(&vector).gradient();
    assert_eq!((grad.rank(), grad.dim()), (2, 3));
    assert_eq!(grad.value_kind(), ValueKind::Tensor);

    let symmetric = trial.vector(&vector).symmetric_gradient();
    assert_eq!(symmetric.value_kind(), ValueKind::SymmetricTensor);
    assert_eq!(symmetric.add(&symmetric).unwrap().value_kind(), ValueKind::SymmetricTensor);
    assert_eq!(symmetric.add(&grad).unwrap().value_kind(), ValueKind::Tensor);
    assert_eq!(symmetrize(&grad).unwrap().value_kind(), ValueKind::SymmetricTensor);

    assert_eq!(trial.vector(&vector).divergence().rank(), 0);
    assert_eq!(trial.vector(&vector).hessian().rank(), 3);
    assert_eq!(trial.vector(&vector).third_derivative().rank(), 4);
    assert_eq!(trial.scalar(&scalar).hessian().value_kind(), ValueKind::SymmetricTensor);
    assert_eq!(trial.scalar(&scalar).laplacian().rank(), 0);

    assert_eq!(grad.double_contract(&grad).unwrap().rank(), 0);
    assert_eq!(grad.multiply(&grad).unwrap().rank(), 2);
    assert_eq!(grad.outer_product(&grad).unwrap().rank(), 4);
    assert_eq!(grad.trace().unwrap().rank(), 0);
    assert_eq!(grad.norm().unwrap().rank(), 0);
    assert_eq!(Jacobian::<3>::new().value().rank(), 2);
}

#[test]
fn update_flags_are_the_union_of_operand_flags() {
    let v = TestFunction::<2>::new().scalar(&u());
    assert_eq!(v.value().update_flags(), UpdateFlags::VALUES);
    assert_eq!(v.hessian().update_flags(), UpdateFlags::HESSIANS);
    assert_eq!(v.laplacian().update_flags(), UpdateFlags::HESSIANS);
    assert_eq!(v.third_derivative().update_flags(), UpdateFlags::THIRD_DERIVATIVES);

    let x = Position::<2>::new().value();
    let combined = v.gradient().multiply(&x).unwrap();
    assert_eq!(
        combined.update_flags(),
        UpdateFlags::GRADIENTS | UpdateFlags::QUADRATURE_POINTS
    );
    assert_eq!(Normal::<2>::new().value().update_flags(), UpdateFlags::NORMAL_VECTORS);

    let k = ScalarFunctor::new("k", "k")
        .with_update_flags(UpdateFlags::QUADRATURE_POINTS)
        .value::<2, _>(|p| p.position()[0]);
    assert_eq!(k.negate().update_flags(), UpdateFlags::QUADRATURE_POINTS);
}

#[test]
fn operand_roles_are_tracked() {
    let v = TestFunction::<2>::new().scalar(&u()).gradient();
    let du = TrialSolution::<2>::new().scalar(&u()).gradient();
    let field = FieldSolution::<2>::new().scalar(&u());
    let previous = FieldSolution::<2>::at_index(2).scalar(&u()).value();

    assert!(v.contains_test_function() && !v.contains_trial_solution());
    assert!(du.contains_trial_solution() && !du.contains_field_solution());

    let expr = field
        .gradient()
        .multiply(&field.gradient())
        .unwrap()
        .multiply(&field.value())
        .unwrap()
        .add(&previous)
        .unwrap();
    assert!(expr.contains_field_solution());
    assert_eq!(expr.max_solution_index(), Some(2));

    // Only operands of the current solution, each once, in order of first appearance
    let arguments = expr.field_arguments();
    assert_eq!(arguments.len(), 2);
    assert_eq!(arguments[0], *field.gradient().as_space_operand().unwrap());
    assert_eq!(arguments[1], *field.value().as_space_operand().unwrap());
}

#[test]
fn double_negation_evaluates_to_the_original_value() {
    let values = unit_cell_values(2, 2, all_flags());
    let context = EvaluationContext::new(&values);
    let expr = -(-constant_scalar::<2>(2.0));
    for q in 0..values.n_quadrature_points() {
        assert_eq!(expr.evaluate(&context, q).unwrap().scalar_value(), 2.0);
    }
}

#[test]
fn transposed_symmetrization_is_symmetrization() {
    let values = unit_cell_values(2, 1, all_flags());
    let context = EvaluationContext::new(&values);
    let x = constant_tensor::<2>(Tensor::from_data(2, 2, vec![1.0, 2.0, 3.0, 4.0]));

    let lhs = transpose(&symmetrize(&x).unwrap()).unwrap();
    let rhs = x.symmetrize().unwrap().transpose().unwrap();
    let expected = Tensor::from_data(2, 2, vec![1.0, 2.5, 2.5, 4.0]);
    assert_approx_tensor_eq!(lhs.evaluate(&context, 0).unwrap(), expected, abstol = 1e-15);
    assert_approx_tensor_eq!(rhs.evaluate(&context, 0).unwrap(), expected, abstol = 1e-15);
}

#[test]
fn functors_see_the_quadrature_point() {
    let values = unit_cell_values(2, 2, all_flags());
    let context = EvaluationContext::new(&values);
    let f = ScalarFunctor::new("f", "f")
        .with_update_flags(UpdateFlags::QUADRATURE_POINTS)
        .value::<2, _>(|p| p.position()[0] + 2.0 * p.position()[1]);
    let x = Position::<2>::new().value();

    for q in 0..values.n_quadrature_points() {
        let point = values.quadrature_point(q);
        let expected = point[0] + 2.0 * point[1];
        assert!((f.evaluate(&context, q).unwrap().scalar_value() - expected).abs() < 1e-14);
        assert_approx_tensor_eq!(x.evaluate(&context, q).unwrap(), Tensor::from_vector(point), abstol = 0.0);
    }
}

#[test]
fn functor_returning_wrong_shape_is_an_evaluation_error() {
    let values = unit_cell_values(2, 1, all_flags());
    let context = EvaluationContext::new(&values);
    let bad = TensorFunctor::<2, 2>::new("A", "A").value(|_| Tensor::identity(3));
    assert!(bad.evaluate(&context, 0).is_err());
}

#[test]
fn normal_is_unavailable_on_cells() {
    let values = unit_cell_values(2, 1, all_flags());
    let context = EvaluationContext::new(&values);
    assert!(Normal::<2>::new().value().evaluate(&context, 0).is_err());
}

#[test]
fn test_function_gradient_matches_bilinear_basis() {
    let values = unit_cell_values(2, 2, all_flags());
    let context = EvaluationContext::new(&values);
    let grad_v = TestFunction::<2>::new().scalar(&u()).gradient();

    // Evaluating a test function needs a test dof
    assert!(grad_v.evaluate(&context, 0).is_err());

    for q in 0..values.n_quadrature_points() {
        let point = values.quadrature_point(q);
        let (x, y) = (point[0], point[1]);
        // Basis function 0 is (1 - x)(1 - y)
        let expected = Tensor::from_data(1, 2, vec![-(1.0 - y), -(1.0 - x)]);
        let gradient = grad_v.evaluate(&context.with_test_dof(0), q).unwrap();
        assert_approx_tensor_eq!(gradient, expected, abstol = 1e-14);
    }
}

#[test]
fn field_solution_interpolates_linear_function() {
    let values = unit_cell_values(2, 2, all_flags());
    // Nodal values of 1 + 2x + 3y, nodes ordered (0, 0), (1, 0), (0, 1), (1, 1)
    let solution = LocalSolution::from_values(vec![vec![1.0, 3.0, 4.0, 6.0]]);
    let context = EvaluationContext::new(&values).with_solution(&solution);
    let field = FieldSolution::<2>::new().scalar(&u());

    for q in 0..values.n_quadrature_points() {
        let point = values.quadrature_point(q);
        let expected = 1.0 + 2.0 * point[0] + 3.0 * point[1];
        let value = field.value().evaluate(&context, q).unwrap();
        assert!((value.scalar_value() - expected).abs() < 1e-13);
        let gradient = field.gradient().evaluate(&context, q).unwrap();
        assert_approx_tensor_eq!(gradient, Tensor::from_data(1, 2, vec![2.0, 3.0]), abstol = 1e-13);
    }

    // Solution index 1 does not exist
    let previous = FieldSolution::<2>::at_index(1).scalar(&u()).value();
    assert!(previous.evaluate(&context, 0).is_err());
}

#[test]
fn batch_evaluation_leaves_lanes_past_the_last_point_untouched() {
    let values = unit_cell_values(2, 2, all_flags());
    let context = EvaluationContext::new(&values);
    let x = Position::<2>::new().value();
    let first = x.evaluate_all(&context).unwrap();
    assert_eq!(first.len(), 4);

    let marker = Tensor::scalar(-1.0);
    let mut lanes: [Tensor<f64>; 4] = std::array::from_fn(|_| marker.clone());
    x.evaluate_batch_into(&context, QuadraturePointRange::new(2, 6), &mut lanes)
        .unwrap();
    assert_eq!(lanes[0], first[2]);
    assert_eq!(lanes[1], first[3]);
    assert_eq!(lanes[2], marker);
    assert_eq!(lanes[3], marker);

    let batch: [Tensor<f64>; 4] = x.evaluate_batch(&context, QuadraturePointRange::new(0, 4)).unwrap();
    assert_eq!(batch.to_vec(), first);
}

#[test]
fn operands_render_with_default_decorations() {
    let decorations = SymbolicDecorations::default();
    let v = TestFunction::<2>::new().scalar(&u());
    let du = TrialSolution::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());

    assert_eq!(v.gradient().as_ascii(&decorations), "Grad(d{u})");
    assert_eq!(v.gradient().as_latex(&decorations), r"\nabla\left(\delta{u}\right)");
    assert_eq!(du.value().as_ascii(&decorations), "D{u}");
    assert_eq!(field.laplacian().as_ascii(&decorations), "Lap(U{u})");
    assert_eq!(
        FieldSolution::<2>::at_index(1).scalar(&u()).value().as_ascii(&decorations),
        "U{u}(t-1)"
    );
    assert_eq!(Normal::<2>::new().value().as_ascii(&decorations), "N");
    assert_eq!(constant_scalar::<2>(2.5).as_ascii(&decorations), "2.5");
}

#[test]
fn operators_render_with_default_decorations() {
    let decorations = SymbolicDecorations::default();
    let v = TestFunction::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());
    let k = ScalarFunctor::new("k", r"\kappa").value::<2, _>(|_| 1.0);
    let a = TensorFunctor::<2, 2>::new("A", r"\mathbf{A}").value(|_| Tensor::identity(2));

    let scaled = k.multiply(&v.gradient()).unwrap();
    assert_eq!(scaled.as_ascii(&decorations), "[k * Grad(d{u})]");
    assert_eq!(scaled.as_latex(&decorations), r"\left[\kappa \, \nabla\left(\delta{u}\right)\right]");

    let dot = v.gradient().multiply(&field.gradient()).unwrap();
    assert_eq!(dot.as_ascii(&decorations), "[Grad(d{u}) . Grad(U{u})]");
    assert_eq!(a.double_contract(&a).unwrap().as_ascii(&decorations), "[A : A]");
    assert_eq!(a.contract(&a, &[(0, 0)]).unwrap().as_ascii(&decorations), "contract<(0,0)>(A, A)");

    assert_eq!(a.transpose().unwrap().as_ascii(&decorations), "trans(A)");
    assert_eq!(a.transpose().unwrap().as_latex(&decorations), r"\left[\mathbf{A}\right]^{T}");
    assert_eq!(a.determinant().unwrap().as_latex(&decorations), r"\det\left(\mathbf{A}\right)");
    assert_eq!(k.divide(&k).unwrap().as_latex(&decorations), r"\frac{\kappa}{\kappa}");
    assert_eq!(k.sqrt().unwrap().as_latex(&decorations), r"\sqrt{\kappa}");
    assert_eq!((-k.clone()).as_ascii(&decorations), "-k");

    let energy = a
        .transpose()
        .unwrap()
        .double_contract(&a)
        .unwrap()
        .subtract(&a.trace().unwrap())
        .unwrap();
    assert_snapshot!(energy.as_ascii(&decorations), @"[[trans(A) : A] - tr(A)]");
}

proptest! {
    #[test]
    fn rendering_is_pure(expr in fenris_weakforms::proptest::constant_expression::<2>()) {
        let decorations = SymbolicDecorations::default();
        let copy = expr.clone();
        prop_assert_eq!(expr.as_ascii(&decorations), copy.as_ascii(&decorations));
        prop_assert_eq!(expr.as_latex(&decorations), expr.as_latex(&decorations));
        let negated = expr.negate();
        prop_assert_eq!(negated.as_ascii(&decorations), format!("-{}", expr.as_ascii(&decorations)));
    }
}
