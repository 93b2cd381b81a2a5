use std::sync::Arc;

use fenris_weakforms::assembly::{AssemblyInput, MatrixBasedAssembler};
use fenris_weakforms::cache::{CacheKey, CacheScope, DataStorage, DifferentiationCache, FunctorCache};
use fenris_weakforms::differentiation::{DifferentiationBackend, SymbolicDerivatives};
use fenris_weakforms::dofs::{Constraints, DofHandler};
use fenris_weakforms::element::LagrangeElement;
use fenris_weakforms::forms::{residual_form, ResidualFunctor};
use fenris_weakforms::integral::Integrand;
use fenris_weakforms::mesh::BoxMesh;
use fenris_weakforms::quadrature::QuadratureRule;
use fenris_weakforms::solution::SolutionStorage;
use fenris_weakforms::symbolic::{FieldSolution, FunctorId, ScalarExtractor, TestFunction};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use util::assert_panics;

fn some_functor_id() -> FunctorId {
    let field = FieldSolution::<2>::new().scalar(&ScalarExtractor::new(0, "u", "u"));
    ResidualFunctor::from_expression("R", "R", &field.value())
        .unwrap()
        .id()
}

#[test]
fn add_unique_keeps_the_first_value() {
    let id = some_functor_id();
    let key = CacheKey::setup(id, "value");
    let mut storage = DataStorage::new();
    assert_eq!(*storage.add_unique(key, 1.0_f64), 1.0);
    assert_eq!(*storage.add_unique(key, 2.0_f64), 1.0);
    assert_eq!(storage.len(), 1);
    assert_eq!(storage.get::<f64>(&key), Some(&1.0));
    // Lookups with a different type find nothing
    assert_eq!(storage.get::<usize>(&key), None);
}

#[test]
fn stored_values_can_be_mutated_in_place() {
    let key = CacheKey::setup(some_functor_id(), "accumulator");
    let mut storage = DataStorage::new();
    storage
        .get_or_insert_with(key, Vec::<f64>::new)
        .push(1.0);
    storage
        .get_or_insert_with(key, || vec![-1.0])
        .push(2.0);
    if let Some(values) = storage.get_mut::<Vec<f64>>(&key) {
        values.push(3.0);
    }
    assert_eq!(storage.get::<Vec<f64>>(&key), Some(&vec![1.0, 2.0, 3.0]));
    assert!(storage.get_mut::<Vec<usize>>(&key).is_none());
}

#[test]
#[should_panic]
fn inserting_with_a_different_type_panics() {
    let key = CacheKey::setup(some_functor_id(), "typed");
    let mut storage = DataStorage::new();
    storage.add_unique(key, 1.0_f64);
    storage.add_unique(key, 1_usize);
}

#[test]
fn functor_ids_are_distinct() {
    assert_ne!(some_functor_id(), some_functor_id());
}

#[test]
fn failed_creation_stores_nothing() {
    let key = CacheKey::setup(some_functor_id(), "fallible");
    let mut storage = DataStorage::new();
    let result: Result<&mut Vec<f64>, &str> = storage.get_or_try_insert_with(key, || Err("creation failed"));
    assert_eq!(result.unwrap_err(), "creation failed");
    assert!(!storage.contains(&key));

    let value: Result<&mut Vec<f64>, &str> = storage.get_or_try_insert_with(key, || Ok(vec![1.0]));
    assert_eq!(value.unwrap(), &vec![1.0]);
    // An existing entry is returned without calling the closure
    let value: Result<&mut Vec<f64>, &str> = storage.get_or_try_insert_with(key, || Err("not called"));
    assert_eq!(value.unwrap(), &vec![1.0]);
}

#[test]
fn visitation_drops_only_quadrature_point_entries() {
    let id = some_functor_id();
    let setup = CacheKey::setup(id, "setup");
    let per_point = CacheKey::quadrature_point(id, "value", 3);
    assert_eq!(per_point.q_point(), Some(3));
    assert_eq!(per_point.functor(), id);

    let mut storage = DataStorage::new();
    storage.add_unique(setup, 1_usize);
    storage.add_unique(per_point, 2_usize);
    assert_eq!(storage.visitations(), 0);

    storage.begin_visitation();
    assert_eq!(storage.visitations(), 1);
    assert!(storage.contains(&setup));
    assert!(!storage.contains(&per_point));

    storage.clear();
    assert!(storage.is_empty());
}

#[test]
fn differentiation_cache_slots() {
    assert_eq!(DifferentiationCache::default().queue_length(), 1);
    let cache = DifferentiationCache::new(3);
    assert_eq!(cache.queue_length(), 3);

    let key = CacheKey::setup(some_functor_id(), "slot");
    cache.lock(2).add_unique(key, 5_i32);
    assert!(cache.lock(2).contains(&key));
    assert!(!cache.lock(0).contains(&key));
    cache.clear();
    assert!(cache.lock(2).is_empty());

    assert_panics!(DifferentiationCache::new(0));
}

#[test]
#[should_panic(expected = "out of range")]
fn locking_a_slot_beyond_the_queue_length_panics() {
    let cache = DifferentiationCache::new(3);
    let _ = cache.lock(3);
}

#[test]
fn setup_entries_go_to_the_persistent_slot() {
    let key = CacheKey::setup(some_functor_id(), "scoped");
    let persistent = DifferentiationCache::new(2);
    let mut local = DataStorage::new();
    {
        let mut cache = FunctorCache::new(&mut local, Some(&persistent), 1);
        assert!(cache.has_persistent_cache());
        assert_eq!(cache.slot(), 1);
        cache.get(CacheScope::Setup).add_unique(key, 1_u8);
        cache.get(CacheScope::Visitation).add_unique(key, 2_u8);
        assert_eq!(cache.destination().get::<u8>(&key), Some(&2));
    }
    assert_eq!(persistent.lock(1).get::<u8>(&key), Some(&1));
    assert_eq!(local.get::<u8>(&key), Some(&2));

    // Without a persistent cache every scope uses the local storage
    let mut local = DataStorage::new();
    let mut cache = FunctorCache::new(&mut local, None, 7);
    assert!(!cache.has_persistent_cache());
    cache.get(CacheScope::Setup).add_unique(key, 3_u8);
    assert_eq!(cache.get(CacheScope::Visitation).get::<u8>(&key), Some(&3));
}

#[test]
#[should_panic(expected = "exceeds the cache queue length")]
fn functor_cache_rejects_slots_beyond_queue_length() {
    let persistent = DifferentiationCache::new(2);
    let mut local = DataStorage::new();
    FunctorCache::new(&mut local, Some(&persistent), 2);
}

struct NonlinearProblem {
    dof_handler: DofHandler,
    constraints: Constraints,
    quadrature: QuadratureRule,
    solution: DVector<f64>,
    residual: ResidualFunctor,
}

impl NonlinearProblem {
    fn new() -> Self {
        let mesh = BoxMesh::hyper_cube(2, 3).unwrap();
        let dof_handler = DofHandler::new(mesh, LagrangeElement::scalar(2, 1).unwrap()).unwrap();
        let solution = DVector::from_fn(dof_handler.n_dofs(), |i, _| 0.05 * i as f64);
        let field = FieldSolution::<2>::new().scalar(&ScalarExtractor::new(0, "u", "u"));
        let flux = field
            .value()
            .sin()
            .unwrap()
            .multiply(&field.gradient())
            .unwrap();
        Self {
            dof_handler,
            constraints: Constraints::new(),
            quadrature: QuadratureRule::gauss(2, 2).unwrap(),
            solution,
            residual: ResidualFunctor::from_expression("q", "q", &flux).unwrap(),
        }
    }

    fn assembler(&self, n_workers: usize) -> MatrixBasedAssembler {
        let v = TestFunction::<2>::new().scalar(&ScalarExtractor::new(0, "u", "u"));
        let form = residual_form(&v.gradient(), &self.residual)
            .unwrap()
            .with_backend(DifferentiationBackend::Symbolic)
            .unwrap();
        let mut assembler = MatrixBasedAssembler::new().with_workers(n_workers);
        assembler += form.dv();
        assembler
    }

    fn assemble(&self, assembler: &MatrixBasedAssembler) -> eyre::Result<(DMatrix<f64>, DVector<f64>)> {
        let input = AssemblyInput::new(&self.dof_handler, &self.constraints, &self.quadrature)
            .with_solution(SolutionStorage::new(&self.solution));
        let mut matrix = assembler.create_system_matrix(&self.dof_handler)?;
        let mut rhs = DVector::zeros(self.dof_handler.n_dofs());
        assembler.assemble_system(&input, &mut matrix, &mut rhs)?;
        Ok((DMatrix::from(&matrix), rhs))
    }
}

#[test]
fn persistent_cache_keeps_prepared_derivatives_across_passes() {
    let problem = NonlinearProblem::new();
    let cache = Arc::new(DifferentiationCache::new(2));
    let assembler = problem.assembler(2).with_persistent_cache(Arc::clone(&cache));
    let key = CacheKey::setup(problem.residual.id(), "symbolic");

    let (first_matrix, first_rhs) = problem.assemble(&assembler).unwrap();
    for slot in 0..2 {
        assert!(cache.lock(slot).get::<Arc<SymbolicDerivatives>>(&key).is_some());
    }
    let prepared = Arc::clone(cache.lock(0).get::<Arc<SymbolicDerivatives>>(&key).unwrap());

    let (second_matrix, second_rhs) = problem.assemble(&assembler).unwrap();
    let reused = cache.lock(0).get::<Arc<SymbolicDerivatives>>(&key).cloned().unwrap();
    assert!(Arc::ptr_eq(&prepared, &reused));
    assert_matrix_eq!(first_matrix, second_matrix, comp = abs, tol = 1e-14);
    assert_matrix_eq!(first_rhs, second_rhs, comp = abs, tol = 1e-14);

    // Results do not depend on whether a persistent cache is used
    let (uncached_matrix, uncached_rhs) = problem.assemble(&problem.assembler(2)).unwrap();
    assert_matrix_eq!(uncached_matrix, first_matrix, comp = abs, tol = 1e-14);
    assert_matrix_eq!(uncached_rhs, first_rhs, comp = abs, tol = 1e-14);
}

#[test]
fn too_few_cache_slots_for_the_workers_is_an_error() {
    let problem = NonlinearProblem::new();
    let cache = Arc::new(DifferentiationCache::new(2));
    let assembler = problem.assembler(3).with_persistent_cache(cache);

    let input = AssemblyInput::new(&problem.dof_handler, &problem.constraints, &problem.quadrature)
        .with_solution(SolutionStorage::new(&problem.solution));
    let mut rhs = DVector::from_element(problem.dof_handler.n_dofs(), 42.0);
    assert!(assembler.assemble_rhs_vector(&input, &mut rhs).is_err());
    // Setup errors leave the outputs untouched
    assert!(rhs.iter().all(|&x| x == 42.0));
}
