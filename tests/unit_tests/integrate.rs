use fenris_weakforms::dofs::DofHandler;
use fenris_weakforms::element::LagrangeElement;
use fenris_weakforms::integral::Integrand;
use fenris_weakforms::integrate::Integrator;
use fenris_weakforms::mesh::BoxMesh;
use fenris_weakforms::quadrature::QuadratureRule;
use fenris_weakforms::solution::SolutionStorage;
use fenris_weakforms::symbolic::{
    constant_scalar, constant_vector, FieldSolution, Position, ScalarExtractor, ScalarFunctor, TestFunction,
};
use fenris_weakforms::UpdateFlags;
use nalgebra::DVector;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "expected {expected}, got {actual}"
    );
}

fn unit_square(cells_per_axis: usize) -> DofHandler {
    let mut mesh = BoxMesh::hyper_cube(2, cells_per_axis).unwrap();
    mesh.colorize_boundaries();
    DofHandler::new(mesh, LagrangeElement::scalar(2, 1).unwrap()).unwrap()
}

/// The nodal values of `x + y`, which bilinear elements represent exactly.
fn linear_field(dof_handler: &DofHandler) -> DVector<f64> {
    DVector::from_fn(dof_handler.n_dofs(), |dof, _| {
        let x = dof_handler.support_point(dof);
        x[0] + x[1]
    })
}

#[test]
fn volume_integrals_of_geometric_quantities() {
    let mesh = BoxMesh::hyper_rectangle(&[0.0, 0.0], &[2.0, 1.0], &[4, 2]).unwrap();
    let dof_handler = DofHandler::new(mesh, LagrangeElement::scalar(2, 1).unwrap()).unwrap();
    let quadrature = QuadratureRule::gauss(2, 2).unwrap();
    let integrator = Integrator::new(&dof_handler, &quadrature);

    assert_close(integrator.integrate(&constant_scalar::<2>(1.0).dv()).unwrap(), 2.0);

    // x = position . e_x
    let x = Position::<2>::new()
        .value()
        .multiply(&constant_vector::<2>([1.0, 0.0]))
        .unwrap();
    assert_close(integrator.integrate(&x.dv()).unwrap(), 2.0);

    let y_squared = ScalarFunctor::new("f", "f")
        .with_update_flags(UpdateFlags::QUADRATURE_POINTS)
        .value::<2, _>(|p| p.position()[1] * p.position()[1]);
    assert_close(integrator.integrate(&y_squared.dv()).unwrap(), 2.0 / 3.0);
    assert_close(integrator.integrate(&-y_squared.dv()).unwrap(), -2.0 / 3.0);
}

#[test]
fn volume_integrals_respect_material_ids() {
    let mut mesh = BoxMesh::hyper_cube(2, 2).unwrap();
    mesh.set_material_ids_where(|x| x[0] > 0.5, 1);
    let dof_handler = DofHandler::new(mesh, LagrangeElement::scalar(2, 1).unwrap()).unwrap();
    let quadrature = QuadratureRule::gauss(2, 1).unwrap();
    let integrator = Integrator::new(&dof_handler, &quadrature);

    let one = constant_scalar::<2>(1.0);
    assert_close(integrator.integrate(&one.dv_on([1])).unwrap(), 0.5);
    assert_close(integrator.integrate(&one.dv_on([0, 1])).unwrap(), 1.0);
    assert_close(integrator.integrate(&one.dv_on([7])).unwrap(), 0.0);
}

#[test]
fn integrals_of_field_solutions() {
    let dof_handler = unit_square(2);
    let quadrature = QuadratureRule::gauss(2, 2).unwrap();
    let solution = linear_field(&dof_handler);
    let integrator = Integrator::new(&dof_handler, &quadrature).with_solution(SolutionStorage::new(&solution));

    let field = FieldSolution::<2>::new().scalar(&ScalarExtractor::new(0, "u", "u"));
    assert_close(integrator.integrate(&field.value().dv()).unwrap(), 1.0);

    let squared = field.value().multiply(&field.value()).unwrap();
    assert_close(integrator.integrate(&squared.dv()).unwrap(), 7.0 / 6.0);

    // |grad u|^2 = 2 everywhere
    let gradient = field.gradient();
    let energy = gradient.multiply(&gradient).unwrap();
    assert_close(integrator.integrate(&energy.dv()).unwrap(), 2.0);
}

#[test]
fn integrals_over_previous_solutions() {
    let dof_handler = unit_square(1);
    let quadrature = QuadratureRule::gauss(2, 2).unwrap();
    let current = linear_field(&dof_handler);
    let previous = DVector::from_element(dof_handler.n_dofs(), 3.0);
    let mut storage = SolutionStorage::new(&current);
    storage.push("previous", &previous);
    assert_eq!(storage.n_solutions(), 2);
    assert_eq!(storage.name(1), Some("previous"));

    let extractor = ScalarExtractor::new(0, "u", "u");
    let old = FieldSolution::<2>::at_index(1).scalar(&extractor);
    let integrator = Integrator::new(&dof_handler, &quadrature).with_solution(storage.clone());
    assert_close(integrator.integrate(&old.value().dv()).unwrap(), 3.0);

    let only_current = Integrator::new(&dof_handler, &quadrature).with_solution(SolutionStorage::new(&current));
    assert!(only_current.integrate(&old.value().dv()).is_err());
}

#[test]
fn boundary_and_interface_integrals() {
    let dof_handler = unit_square(2);
    let quadrature = QuadratureRule::gauss(2, 2).unwrap();
    let face_quadrature = QuadratureRule::gauss(1, 2).unwrap();
    let solution = linear_field(&dof_handler);
    let integrator = Integrator::new(&dof_handler, &quadrature)
        .with_face_quadrature(&face_quadrature)
        .with_solution(SolutionStorage::new(&solution));

    let one = constant_scalar::<2>(1.0);
    assert_close(integrator.integrate(&one.da()).unwrap(), 4.0);
    assert_close(integrator.integrate(&one.da_on([0, 3])).unwrap(), 2.0);
    assert_close(integrator.integrate(&one.di()).unwrap(), 2.0);

    // The average of a continuous field across an interface is the field itself
    let field = FieldSolution::<2>::new().scalar(&ScalarExtractor::new(0, "u", "u"));
    assert_close(integrator.integrate(&field.value().di()).unwrap(), 2.0);
    // On x = 1 the field is 1 + y
    assert_close(integrator.integrate(&field.value().da_on([1])).unwrap(), 1.5);
}

#[test]
fn invalid_integrands_are_rejected() {
    let dof_handler = unit_square(1);
    let quadrature = QuadratureRule::gauss(2, 2).unwrap();
    let solution = linear_field(&dof_handler);
    let integrator = Integrator::new(&dof_handler, &quadrature);
    let extractor = ScalarExtractor::new(0, "u", "u");
    let field = FieldSolution::<2>::new().scalar(&extractor);

    // Only scalars integrate to a number
    assert!(integrator.integrate(&constant_vector::<2>([1.0, 1.0]).dv()).is_err());
    let v = TestFunction::<2>::new().scalar(&extractor);
    assert!(integrator.integrate(&v.value().dv()).is_err());
    // Field solutions need a solution vector of the right size
    assert!(integrator.integrate(&field.value().dv()).is_err());
    let short = DVector::zeros(2);
    let with_short = integrator.clone().with_solution(SolutionStorage::new(&short));
    assert!(with_short.integrate(&field.value().dv()).is_err());
    let with_solution = integrator.clone().with_solution(SolutionStorage::new(&solution));
    assert!(with_solution.integrate(&field.value().dv()).is_ok());
    // Face integrals need a face quadrature
    assert!(integrator.integrate(&constant_scalar::<2>(1.0).da()).is_err());
}
