use fenris_weakforms::decorations::{Render, SymbolicDecorations};
use fenris_weakforms::differentiation::DifferentiationBackend;
use fenris_weakforms::forms::{
    bilinear_form, linear_form, linear_form_scalar, linear_form_tensor, residual_form, FormError, ResidualFunctor,
};
use fenris_weakforms::num_dual::{Dual64, DualNum};
use fenris_weakforms::symbolic::{
    constant_scalar, constant_tensor, FieldSolution, QuadraturePoint, ScalarExtractor, ScalarFunctor, Signature,
    TensorFunctor, TestFunction, TrialSolution, VectorExtractor,
};
use fenris_weakforms::Tensor;
use std::error::Error;

fn u() -> ScalarExtractor {
    ScalarExtractor::new(0, "u", "u")
}

fn identity(_: &QuadraturePoint<'_>, arguments: &[Tensor<Dual64>]) -> Tensor<Dual64> {
    arguments[0].clone()
}

#[test]
fn linear_forms_validate_roles() {
    let v = TestFunction::<2>::new().scalar(&u());
    let du = TrialSolution::<2>::new().scalar(&u());
    let f = constant_scalar::<2>(1.0);

    assert_eq!(linear_form(&du.value(), &f).unwrap_err(), FormError::MissingTestFunction);
    assert_eq!(
        linear_form(&v.value(), &v.value()).unwrap_err(),
        FormError::UnexpectedTestFunction { position: "functor" }
    );
    assert_eq!(
        linear_form(&v.value(), &du.value()).unwrap_err(),
        FormError::UnexpectedTrialSolution { position: "functor" }
    );
    let mixed = v.value().multiply(&du.value()).unwrap();
    assert_eq!(
        linear_form(&mixed, &f).unwrap_err(),
        FormError::UnexpectedTrialSolution {
            position: "test operand"
        }
    );
    assert!(linear_form(&v.value(), &f).is_ok());
    assert!(linear_form_scalar(&v.value(), 2.0).is_ok());
}

#[test]
fn linear_forms_validate_shapes() {
    let v = TestFunction::<2>::new().scalar(&u());
    let f = constant_scalar::<2>(1.0);

    assert!(matches!(
        linear_form(&v.gradient(), &f),
        Err(FormError::IncompatibleShapes { form: "linear form", trial: None, .. })
    ));
    assert!(matches!(
        linear_form_tensor(&v.gradient(), Tensor::from_data(1, 3, vec![1.0, 2.0, 3.0])),
        Err(FormError::IncompatibleShapes { .. })
    ));
    let traction = linear_form_tensor(&v.gradient(), Tensor::from_data(1, 2, vec![1.0, 2.0])).unwrap();
    assert_eq!(traction.functor().rank(), 1);
}

#[test]
fn bilinear_forms_validate_roles_and_shapes() {
    let v = TestFunction::<2>::new().scalar(&u());
    let du = TrialSolution::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());
    let k = constant_scalar::<2>(1.0);

    assert!(bilinear_form(&v.gradient(), &k, &du.gradient()).is_ok());
    assert_eq!(
        bilinear_form(&v.value(), &k, &field.value()).unwrap_err(),
        FormError::MissingTrialSolution
    );
    let mixed = du.value().multiply(&v.value()).unwrap();
    assert_eq!(
        bilinear_form(&v.value(), &k, &mixed).unwrap_err(),
        FormError::UnexpectedTestFunction {
            position: "trial operand"
        }
    );
    assert!(matches!(
        bilinear_form(&v.gradient(), &k, &du.value()),
        Err(FormError::IncompatibleShapes { trial: Some(_), .. })
    ));

    // A tensor functor must bridge the ranks of test and trial operands
    let conductivity = constant_tensor::<2>(Tensor::identity(2));
    assert!(bilinear_form(&v.gradient(), &conductivity, &du.gradient()).is_ok());
    assert!(bilinear_form(&v.gradient(), &conductivity, &du.value()).is_err());
}

#[test]
fn vector_valued_bilinear_forms() {
    let displacement = VectorExtractor::new(0, "u", "u");
    let v = TestFunction::<2>::new().vector(&displacement);
    let du = TrialSolution::<2>::new().vector(&displacement);
    let c = TensorFunctor::<4, 2>::new("C", "C").value(|_| Tensor::zeros(4, 2));

    let form = bilinear_form(&v.symmetric_gradient(), &c, &du.symmetric_gradient()).unwrap();
    assert!(!form.is_symmetric());
    assert!(form.symmetrize().is_symmetric());
    assert!(bilinear_form(&v.gradient(), &c, &du.value()).is_err());
}

#[test]
fn residual_arguments_must_be_bare_current_solution_operands() {
    let v = TestFunction::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());
    let previous = FieldSolution::<2>::at_index(1).scalar(&u());

    assert!(ResidualFunctor::from_function("R", "R", Signature::scalar(2), &[field.value()], identity).is_ok());
    assert_eq!(
        ResidualFunctor::from_function("R", "R", Signature::scalar(2), &[v.value()], identity).unwrap_err(),
        FormError::InvalidResidualArgument { index: 0 }
    );
    assert_eq!(
        ResidualFunctor::from_function(
            "R",
            "R",
            Signature::scalar(2),
            &[field.value(), previous.value()],
            identity
        )
        .unwrap_err(),
        FormError::InvalidResidualArgument { index: 1 }
    );
    let squared = field.value().multiply(&field.value()).unwrap();
    assert_eq!(
        ResidualFunctor::from_function("R", "R", Signature::scalar(2), &[squared], identity).unwrap_err(),
        FormError::InvalidResidualArgument { index: 0 }
    );

    let with_test = field.value().multiply(&v.value()).unwrap();
    assert_eq!(
        ResidualFunctor::from_expression("R", "R", &with_test).unwrap_err(),
        FormError::UnexpectedTestFunction { position: "residual" }
    );
}

#[test]
fn residual_forms_select_backends() {
    let v = TestFunction::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());

    let expression = field.value().exp().unwrap();
    let from_expression = ResidualFunctor::from_expression("R", "R", &expression).unwrap();
    assert_eq!(from_expression.arguments().len(), 1);
    let form = residual_form(&v.value(), &from_expression).unwrap();
    assert_eq!(form.backend(), DifferentiationBackend::Automatic);
    let symbolic = form.with_backend(DifferentiationBackend::Symbolic).unwrap();
    assert_eq!(symbolic.backend(), DifferentiationBackend::Symbolic);

    let from_function = ResidualFunctor::from_function("R", "R", Signature::scalar(2), &[field.value()], |_, args| {
        args[0].map(|x| x.exp())
    })
    .unwrap();
    let form = residual_form(&v.value(), &from_function).unwrap();
    assert_eq!(
        form.clone()
            .with_backend(DifferentiationBackend::Symbolic)
            .unwrap_err(),
        FormError::SymbolicBackendRequiresExpression
    );
    assert!(form.with_backend(DifferentiationBackend::Automatic).is_ok());

    assert!(matches!(
        residual_form(&v.gradient(), &from_expression),
        Err(FormError::IncompatibleShapes { form: "residual form", .. })
    ));
}

#[test]
fn forms_render_operands_in_order() {
    let decorations = SymbolicDecorations::default();
    let v = TestFunction::<2>::new().scalar(&u());
    let du = TrialSolution::<2>::new().scalar(&u());
    let field = FieldSolution::<2>::new().scalar(&u());
    let k = ScalarFunctor::new("k", r"\kappa").value::<2, _>(|_| 1.0);

    let stiffness = bilinear_form(&v.gradient(), &k, &du.gradient()).unwrap();
    assert_eq!(stiffness.as_ascii(&decorations), "(Grad(d{u}), k, Grad(D{u}))");
    assert_eq!(
        stiffness.as_latex(&decorations),
        r"\left[\nabla\left(\delta{u}\right) \, \kappa \cdot \nabla\left(\Delta{u}\right)\right]"
    );

    let load = linear_form(&v.value(), &k).unwrap();
    assert_eq!(load.as_ascii(&decorations), "(d{u}, k)");

    let flux = field.value().multiply(&field.gradient()).unwrap();
    let residual = ResidualFunctor::from_expression("q", "q", &flux).unwrap();
    let form = residual_form(&v.gradient(), &residual).unwrap();
    assert_eq!(form.as_ascii(&decorations), "(Grad(d{u}), q(U{u}, Grad(U{u})))");
}

#[test]
fn symbolic_errors_are_the_source_of_form_errors() {
    let v = constant_scalar::<2>(1.0).determinant().unwrap_err();
    let err = FormError::from(v.clone());
    assert_eq!(err.to_string(), v.to_string());
    assert!(err.source().is_some());
    assert!(FormError::MissingTrialSolution.source().is_none());
    assert_eq!(
        FormError::MissingTestFunction.to_string(),
        "the test operand does not contain a test function"
    );
}
