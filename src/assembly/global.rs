use std::fmt;
use std::fmt::{Debug, Formatter};
use std::ops::{AddAssign, Range, SubAssign};
use std::sync::Arc;

use eyre::{eyre, WrapErr};
use log::{debug, info, trace};
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use parking_lot::Mutex;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::assembly::local::{prepare_residual, LocalAssembler, LocalOutputs, LocalSystem, PreparedResidual};
use crate::assembly::terms::{render_sum, AssemblyTerm, IntoAssemblyTerms};
use crate::cache::{DataStorage, DifferentiationCache, FunctorCache};
use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::dofs::{Constraints, DofHandler};
use crate::flags::UpdateFlags;
use crate::integral::DomainKind;
use crate::quadrature::QuadratureRule;
use crate::solution::{LocalSolution, SolutionStorage};
use crate::symbolic::{Extractor, SpaceRole};
use crate::values::{FeFaceValues, FeInterfaceValues, FeValues, FeValuesBase};

/// The data an assembly pass runs on.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    dof_handler: &'a DofHandler,
    constraints: &'a Constraints,
    cell_quadrature: &'a QuadratureRule,
    face_quadrature: Option<&'a QuadratureRule>,
    solution: Option<SolutionStorage<'a>>,
}

impl<'a> AssemblyInput<'a> {
    pub fn new(dof_handler: &'a DofHandler, constraints: &'a Constraints, cell_quadrature: &'a QuadratureRule) -> Self {
        Self {
            dof_handler,
            constraints,
            cell_quadrature,
            face_quadrature: None,
            solution: None,
        }
    }

    /// The quadrature rule on faces, required by boundary and interface integrals.
    pub fn with_face_quadrature(self, face_quadrature: &'a QuadratureRule) -> Self {
        Self {
            face_quadrature: Some(face_quadrature),
            ..self
        }
    }

    /// The solution vectors read by field solution operands and residuals.
    pub fn with_solution(self, solution: SolutionStorage<'a>) -> Self {
        Self {
            solution: Some(solution),
            ..self
        }
    }

    pub fn dof_handler(&self) -> &'a DofHandler {
        self.dof_handler
    }

    pub fn constraints(&self) -> &'a Constraints {
        self.constraints
    }
}

/// The number of cells and faces that contributed to an assembly pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AssemblyStatistics {
    pub cells: usize,
    pub boundary_faces: usize,
    pub interfaces: usize,
}

impl AddAssign for AssemblyStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.cells += rhs.cells;
        self.boundary_faces += rhs.boundary_faces;
        self.interfaces += rhs.interfaces;
    }
}

/// Assembles a global sparse system from a weak form `0 = Σ terms`.
///
/// Bilinear terms contribute `+a(v, u)` to the matrix and linear terms `-l(v)` to the
/// right-hand side, so that `l(v) = a(v, u)` is written as `assembler += a.dv(); assembler -= l.dv();`.
/// Residual terms contribute their linearization `+dR[δu]` to the matrix and `-R` to the
/// right-hand side, which makes the assembled system a Newton step for the increment `δu`.
///
/// Cells are split into contiguous ranges, one per worker, and processed in parallel. Worker
/// `w` uses slot `w` of the persistent differentiation cache, if one is attached.
pub struct MatrixBasedAssembler {
    terms: Vec<AssemblyTerm>,
    n_workers: usize,
    persistent_cache: Option<Arc<DifferentiationCache>>,
}

impl Debug for MatrixBasedAssembler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixBasedAssembler")
            .field("n_terms", &self.terms.len())
            .field("n_workers", &self.n_workers)
            .field("persistent_cache", &self.persistent_cache)
            .finish()
    }
}

impl Default for MatrixBasedAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixBasedAssembler {
    pub fn new() -> Self {
        Self {
            terms: Vec::new(),
            n_workers: 1,
            persistent_cache: None,
        }
    }

    /// The number of workers cells are distributed over.
    pub fn with_workers(self, n_workers: usize) -> Self {
        assert!(n_workers > 0, "An assembler needs at least one worker");
        Self { n_workers, ..self }
    }

    /// Keep prepared differentiation data in `cache` across assembly passes.
    ///
    /// The cache needs at least one slot per worker.
    pub fn with_persistent_cache(self, cache: Arc<DifferentiationCache>) -> Self {
        Self {
            persistent_cache: Some(cache),
            ..self
        }
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    pub fn persistent_cache(&self) -> Option<&Arc<DifferentiationCache>> {
        self.persistent_cache.as_ref()
    }

    pub fn terms(&self) -> &[AssemblyTerm] {
        &self.terms
    }

    /// The union of the update flags of every term.
    pub fn update_flags(&self) -> UpdateFlags {
        self.terms
            .iter()
            .fold(UpdateFlags::DEFAULT, |flags, term| flags | term.update_flags())
    }

    fn update_flags_on(&self, kind: DomainKind) -> UpdateFlags {
        self.terms
            .iter()
            .filter(|term| term.domain().kind() == kind)
            .fold(UpdateFlags::DEFAULT, |flags, term| flags | term.update_flags())
    }

    fn has_terms_on(&self, kind: DomainKind) -> bool {
        self.terms.iter().any(|term| term.domain().kind() == kind)
    }

    pub fn has_interface_terms(&self) -> bool {
        self.has_terms_on(DomainKind::Interface)
    }

    /// The sparsity pattern of the system matrix, with couplings across interior faces if
    /// there are interface terms.
    pub fn create_sparsity_pattern(&self, dof_handler: &DofHandler) -> eyre::Result<SparsityPattern> {
        dof_handler.sparsity_pattern(self.has_interface_terms())
    }

    /// A zero matrix with the pattern of [`create_sparsity_pattern`](Self::create_sparsity_pattern).
    pub fn create_system_matrix(&self, dof_handler: &DofHandler) -> eyre::Result<CsrMatrix<f64>> {
        let pattern = self.create_sparsity_pattern(dof_handler)?;
        let nnz = pattern.nnz();
        CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .map_err(|err| eyre!("failed to create system matrix: {err}"))
    }

    /// Assemble both the system matrix and the right-hand side. Both are overwritten.
    pub fn assemble_system(
        &self,
        input: &AssemblyInput<'_>,
        matrix: &mut CsrMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> eyre::Result<AssemblyStatistics> {
        self.assemble(input, Some(matrix), Some(rhs))
    }

    /// Assemble only the system matrix, which is overwritten.
    pub fn assemble_matrix(
        &self,
        input: &AssemblyInput<'_>,
        matrix: &mut CsrMatrix<f64>,
    ) -> eyre::Result<AssemblyStatistics> {
        self.assemble(input, Some(matrix), None)
    }

    /// Assemble only the right-hand side, which is overwritten.
    pub fn assemble_rhs_vector(
        &self,
        input: &AssemblyInput<'_>,
        rhs: &mut DVector<f64>,
    ) -> eyre::Result<AssemblyStatistics> {
        self.assemble(input, None, Some(rhs))
    }

    fn validate(&self, input: &AssemblyInput<'_>) -> eyre::Result<()> {
        let element = input.dof_handler.element();
        let dim = element.dim();
        let n_components = element.n_components();
        let n_solutions = input.solution.as_ref().map_or(0, SolutionStorage::n_solutions);

        for (index, term) in self.terms.iter().enumerate() {
            let term_name = || term.as_ascii(&SymbolicDecorations::default());
            if term.test().dim() != dim {
                return Err(eyre!(
                    "term {index} ({}) is posed in {} dimensions, but the finite element has dimension {dim}",
                    term_name(),
                    term.test().dim()
                ));
            }
            for expression in term.expressions() {
                let mut error = None;
                expression.visit_space_operands(&mut |operand| {
                    if error.is_some() {
                        return;
                    }
                    let out_of_range = match operand.extractor() {
                        Extractor::Scalar(extractor) => extractor.component() >= n_components,
                        Extractor::Vector(extractor) => extractor.first_component() + dim > n_components,
                    };
                    if out_of_range {
                        error = Some(eyre!(
                            "operand {} extracts components the finite element with {n_components} component(s) does not have",
                            operand.extractor().symbol().ascii()
                        ));
                    } else if let SpaceRole::FieldSolution { solution_index } = operand.role() {
                        if solution_index >= n_solutions {
                            error = Some(eyre!(
                                "operand {} reads solution index {solution_index}, but {n_solutions} solution vector(s) were given",
                                operand.extractor().symbol().ascii()
                            ));
                        }
                    }
                });
                if let Some(error) = error {
                    return Err(error.wrap_err(format!("invalid term {index} ({})", term_name())));
                }
            }
            if let AssemblyTerm::Residual(integral) = term {
                if n_solutions == 0 {
                    return Err(eyre!(
                        "residual term {index} ({}) requires a solution vector",
                        term_name()
                    ));
                }
                let residual = integral.integrand().residual();
                for argument in residual.arguments() {
                    let out_of_range = match argument.extractor() {
                        Extractor::Scalar(extractor) => extractor.component() >= n_components,
                        Extractor::Vector(extractor) => extractor.first_component() + dim > n_components,
                    };
                    if out_of_range {
                        return Err(eyre!(
                            "residual {} has an argument outside the components of the finite element",
                            residual.symbol().ascii()
                        ));
                    }
                }
            }
        }

        if let Some(solution) = &input.solution {
            solution.check_size(input.dof_handler.n_dofs())?;
        }

        let has_face_terms = self.has_terms_on(DomainKind::Boundary) || self.has_interface_terms();
        if has_face_terms {
            let face_quadrature = input
                .face_quadrature
                .ok_or_else(|| eyre!("boundary and interface integrals require a face quadrature rule"))?;
            if face_quadrature.dim() + 1 != dim {
                return Err(eyre!(
                    "face quadrature of dimension {} does not fit cells of dimension {dim}",
                    face_quadrature.dim()
                ));
            }
        }

        if let Some(cache) = &self.persistent_cache {
            if cache.queue_length() < self.n_workers {
                return Err(eyre!(
                    "the differentiation cache has {} slot(s), but the assembler runs {} workers",
                    cache.queue_length(),
                    self.n_workers
                ));
            }
        }
        Ok(())
    }

    fn assemble(
        &self,
        input: &AssemblyInput<'_>,
        mut matrix: Option<&mut CsrMatrix<f64>>,
        mut rhs: Option<&mut DVector<f64>>,
    ) -> eyre::Result<AssemblyStatistics> {
        let dof_handler = input.dof_handler;
        let n_dofs = dof_handler.n_dofs();
        let element = dof_handler.element();
        self.validate(input).wrap_err("assembly setup failed")?;

        if let Some(matrix) = &matrix {
            if matrix.nrows() != n_dofs || matrix.ncols() != n_dofs {
                return Err(eyre!(
                    "system matrix is {}x{}, but there are {n_dofs} dofs",
                    matrix.nrows(),
                    matrix.ncols()
                ));
            }
        }
        if let Some(rhs) = &rhs {
            if rhs.len() != n_dofs {
                return Err(eyre!(
                    "right-hand side has {} entries, but there are {n_dofs} dofs",
                    rhs.len()
                ));
            }
        }

        let volume_flags = self.update_flags_on(DomainKind::Volume);
        let boundary_flags = self.update_flags_on(DomainKind::Boundary);
        let interface_flags = self.update_flags_on(DomainKind::Interface);
        let values = self
            .has_terms_on(DomainKind::Volume)
            .then(|| FeValues::new(element, input.cell_quadrature, volume_flags))
            .transpose()
            .wrap_err("the finite element cannot provide the values required by the volume integrals")?;
        let face_values = match (self.has_terms_on(DomainKind::Boundary), input.face_quadrature) {
            (true, Some(quadrature)) => Some(
                FeFaceValues::new(element, quadrature, boundary_flags)
                    .wrap_err("the finite element cannot provide the values required by the boundary integrals")?,
            ),
            _ => None,
        };
        let interface_values = match (self.has_interface_terms(), input.face_quadrature) {
            (true, Some(quadrature)) => Some(
                FeInterfaceValues::new(element, quadrature, interface_flags)
                    .wrap_err("the finite element cannot provide the values required by the interface integrals")?,
            ),
            _ => None,
        };

        let want_matrix = matrix.is_some();
        let want_rhs = rhs.is_some();
        let outputs = LocalOutputs {
            // Inhomogeneous constraints move matrix columns into the right-hand side
            matrix: want_matrix || (want_rhs && input.constraints.has_inhomogeneities()),
            rhs: want_rhs,
        };

        // Prepare residual differentiation for every worker before any cell is touched, so
        // that preparation errors leave the outputs untouched
        let persistent = self.persistent_cache.as_deref();
        let mut storages: Vec<DataStorage> = (0..self.n_workers).map(|_| DataStorage::new()).collect();
        let mut prepared = Vec::with_capacity(self.n_workers);
        for (slot, storage) in storages.iter_mut().enumerate() {
            let mut cache = FunctorCache::new(storage, persistent, slot);
            let prepared_terms = self
                .terms
                .iter()
                .map(|term| match term {
                    AssemblyTerm::Residual(integral) => prepare_residual(integral.integrand(), &mut cache).map(Some),
                    _ => Ok(None),
                })
                .collect::<eyre::Result<Vec<_>>>()
                .wrap_err("failed to prepare residual differentiation")?;
            prepared.push(prepared_terms);
        }

        debug!(
            "Assembling {} term(s) on {} cells with {} worker(s): volume flags {volume_flags}, \
             boundary flags {boundary_flags}, interface flags {interface_flags}",
            self.terms.len(),
            dof_handler.mesh().n_cells(),
            self.n_workers
        );

        if let Some(matrix) = matrix.as_deref_mut() {
            matrix.values_mut().fill(0.0);
        }
        if let Some(rhs) = rhs.as_deref_mut() {
            rhs.fill(0.0);
        }

        let n_cells = dof_handler.mesh().n_cells();
        let workers: Vec<_> = storages
            .into_iter()
            .zip(prepared)
            .enumerate()
            .map(|(slot, (storage, prepared))| Worker {
                slot,
                cells: (slot * n_cells / self.n_workers)..((slot + 1) * n_cells / self.n_workers),
                storage,
                prepared,
                values: values.clone(),
                face_values: face_values.clone(),
                interface_values: interface_values.clone(),
                local_solution: LocalSolution::default(),
                dofs: Vec::new(),
                local: LocalSystem::new(),
                admitted: Vec::new(),
            })
            .collect();

        let context = PassContext {
            terms: &self.terms,
            input,
            persistent,
            outputs,
            global: Mutex::new(GlobalSystem { matrix, rhs }),
        };

        let statistics = workers
            .into_par_iter()
            .map(|mut worker| worker.run(&context))
            .collect::<eyre::Result<Vec<_>>>()?
            .into_iter()
            .fold(AssemblyStatistics::default(), |mut total, statistics| {
                total += statistics;
                total
            });

        info!(
            "Assembled {} cell(s), {} boundary face(s) and {} interface(s)",
            statistics.cells, statistics.boundary_faces, statistics.interfaces
        );
        Ok(statistics)
    }
}

impl<T: IntoAssemblyTerms> AddAssign<T> for MatrixBasedAssembler {
    fn add_assign(&mut self, terms: T) {
        self.terms.extend(terms.into_assembly_terms());
    }
}

impl<T: IntoAssemblyTerms> SubAssign<T> for MatrixBasedAssembler {
    fn sub_assign(&mut self, terms: T) {
        self.terms
            .extend(terms.into_assembly_terms().into_iter().map(|term| -term));
    }
}

impl Render for MatrixBasedAssembler {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        format!("0 = {}", render_sum(&self.terms, decorations, format))
    }
}

struct GlobalSystem<'a> {
    matrix: Option<&'a mut CsrMatrix<f64>>,
    rhs: Option<&'a mut DVector<f64>>,
}

/// Read-only data shared by all workers, plus the global system behind a lock.
struct PassContext<'a, 'i> {
    terms: &'a [AssemblyTerm],
    input: &'a AssemblyInput<'i>,
    persistent: Option<&'a DifferentiationCache>,
    outputs: LocalOutputs,
    global: Mutex<GlobalSystem<'a>>,
}

impl<'a, 'i> PassContext<'a, 'i> {
    fn term_is_needed(&self, term: &AssemblyTerm) -> bool {
        (self.outputs.matrix && term.contributes_to_matrix()) || (self.outputs.rhs && term.contributes_to_rhs())
    }

    fn distribute(&self, local: &LocalSystem, dofs: &[usize]) -> eyre::Result<()> {
        let mut global = self.global.lock();
        let GlobalSystem { matrix, rhs } = &mut *global;
        self.input
            .constraints
            .distribute_local_to_global(&local.matrix, &local.rhs, dofs, matrix.as_deref_mut(), rhs.as_deref_mut())
    }
}

/// The state of one worker: its cells, cache slot and scratch buffers.
struct Worker {
    slot: usize,
    cells: Range<usize>,
    storage: DataStorage,
    prepared: Vec<Option<PreparedResidual>>,
    values: Option<FeValues>,
    face_values: Option<FeFaceValues>,
    interface_values: Option<FeInterfaceValues>,
    local_solution: LocalSolution,
    dofs: Vec<usize>,
    local: LocalSystem,
    admitted: Vec<usize>,
}

impl Worker {
    fn run(&mut self, context: &PassContext<'_, '_>) -> eyre::Result<AssemblyStatistics> {
        trace!("Worker {} assembling cells {:?}", self.slot, self.cells);
        let mut statistics = AssemblyStatistics::default();
        for cell in self.cells.clone() {
            self.assemble_cell(context, cell, &mut statistics)
                .wrap_err_with(|| format!("failed to assemble cell {cell}"))?;
        }
        Ok(statistics)
    }

    /// Collect the terms admitted by the cell, or a face of the cell, into `self.admitted`.
    fn collect_admitted(&mut self, context: &PassContext<'_, '_>, cell: usize, face: Option<usize>, kind: DomainKind) {
        let cell_ref = context.input.dof_handler.mesh().cell(cell);
        self.admitted.clear();
        self.admitted.extend(
            context
                .terms
                .iter()
                .enumerate()
                .filter(|(_, term)| term.domain().kind() == kind)
                .filter(|(_, term)| context.term_is_needed(term))
                .filter(|(_, term)| term.domain().admits(&cell_ref, face))
                .map(|(index, _)| index),
        );
    }

    fn assemble_cell(
        &mut self,
        context: &PassContext<'_, '_>,
        cell: usize,
        statistics: &mut AssemblyStatistics,
    ) -> eyre::Result<()> {
        let dof_handler = context.input.dof_handler;
        let mesh = dof_handler.mesh();
        let n = dof_handler.dofs_per_cell();

        if self.values.is_some() {
            self.collect_admitted(context, cell, None, DomainKind::Volume);
            if let (false, Some(values)) = (self.admitted.is_empty(), self.values.as_mut()) {
                values.reinit(mesh, cell);
                self.dofs.resize(n, 0);
                dof_handler.populate_cell_dofs(cell, &mut self.dofs);
                self.visit(context, VisitValues::Cell)?;
                statistics.cells += 1;
            }
        }

        for face in 0..mesh.n_faces_per_cell() {
            match mesh.neighbour(cell, face) {
                None if self.face_values.is_some() => {
                    self.collect_admitted(context, cell, Some(face), DomainKind::Boundary);
                    if let (false, Some(values)) = (self.admitted.is_empty(), self.face_values.as_mut()) {
                        values.reinit(mesh, cell, face);
                        self.dofs.resize(n, 0);
                        dof_handler.populate_cell_dofs(cell, &mut self.dofs);
                        self.visit(context, VisitValues::Face)?;
                        statistics.boundary_faces += 1;
                    }
                }
                // Each interface is visited once, from the cell with the lower index
                Some(neighbour) if neighbour > cell && self.interface_values.is_some() => {
                    self.collect_admitted(context, cell, Some(face), DomainKind::Interface);
                    if let (false, Some(values)) = (self.admitted.is_empty(), self.interface_values.as_mut()) {
                        values.reinit(mesh, cell, face);
                        self.dofs.resize(2 * n, 0);
                        let (this_dofs, neighbour_dofs) = self.dofs.split_at_mut(n);
                        dof_handler.populate_cell_dofs(cell, this_dofs);
                        dof_handler.populate_cell_dofs(neighbour, neighbour_dofs);
                        self.visit(context, VisitValues::Interface)?;
                        statistics.interfaces += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Assemble the admitted terms on the reinitialized values and distribute the result.
    fn visit(&mut self, context: &PassContext<'_, '_>, which: VisitValues) -> eyre::Result<()> {
        let Self {
            slot,
            storage,
            prepared,
            values,
            face_values,
            interface_values,
            local_solution,
            dofs,
            local,
            admitted,
            ..
        } = self;

        let values: &dyn FeValuesBase = match which {
            VisitValues::Cell => values.as_ref().map(|v| v as &dyn FeValuesBase),
            VisitValues::Face => face_values.as_ref().map(|v| v as &dyn FeValuesBase),
            VisitValues::Interface => interface_values.as_ref().map(|v| v as &dyn FeValuesBase),
        }
        .ok_or_else(|| eyre!("no finite element values were set up for this visit"))?;

        let solution = match &context.input.solution {
            Some(solutions) => {
                solutions.extract_local_dof_values_into(dofs, local_solution);
                Some(&*local_solution)
            }
            None => None,
        };

        let mut cache = FunctorCache::new(storage, context.persistent, *slot);
        cache.begin_visitation();
        local.reset(dofs.len());
        let mut assembler = LocalAssembler {
            values,
            solution,
            cache: &mut cache,
            outputs: context.outputs,
        };
        for &index in admitted.iter() {
            let term = &context.terms[index];
            assembler
                .assemble_term(term, prepared[index].as_ref(), local)
                .wrap_err_with(|| format!("failed to assemble term {index}"))?;
        }
        context.distribute(local, dofs)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum VisitValues {
    Cell,
    Face,
    Interface,
}
