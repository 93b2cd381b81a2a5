//! Degree-of-freedom numbering and constraints.
use std::collections::{BTreeMap, BTreeSet};

use eyre::{eyre, WrapErr};
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;

use crate::element::LagrangeElement;
use crate::integral::{CellAccessor, SubDomains};
use crate::mesh::{face_axis_and_side, BoxMesh};

/// Continuous numbering of the dofs of a Lagrange element on a box mesh.
///
/// Nodes form a global grid with `degree * cells + 1` nodes along each axis (first axis
/// fastest) and global dof `node * n_components + component`.
#[derive(Debug, Clone)]
pub struct DofHandler {
    mesh: BoxMesh,
    element: LagrangeElement,
    nodes_per_axis: Vec<usize>,
}

impl DofHandler {
    pub fn new(mesh: BoxMesh, element: LagrangeElement) -> eyre::Result<Self> {
        if mesh.dim() != element.dim() {
            return Err(eyre!(
                "Mesh of dimension {} cannot carry an element of dimension {}",
                mesh.dim(),
                element.dim()
            ));
        }
        let nodes_per_axis = mesh
            .cells_per_axis()
            .iter()
            .map(|&n| element.degree() * n + 1)
            .collect();
        Ok(Self {
            mesh,
            element,
            nodes_per_axis,
        })
    }

    pub fn mesh(&self) -> &BoxMesh {
        &self.mesh
    }

    pub fn element(&self) -> &LagrangeElement {
        &self.element
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes_per_axis.iter().product()
    }

    pub fn n_dofs(&self) -> usize {
        self.n_nodes() * self.element.n_components()
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.element.dofs_per_cell()
    }

    /// Write the global indices of the local dofs of a cell into `output`.
    pub fn populate_cell_dofs(&self, cell: usize, output: &mut [usize]) {
        assert_eq!(output.len(), self.dofs_per_cell(), "Output buffer has wrong length");
        let cell_index = self.mesh.cell_multi_index(cell);
        let n_components = self.element.n_components();
        let degree = self.element.degree();
        for basis in 0..self.element.n_scalar_basis() {
            let local = self.element.basis_multi_index(basis);
            let node = local
                .iter()
                .zip(&cell_index)
                .zip(&self.nodes_per_axis)
                .rev()
                .fold(0, |node, ((&i, &c), &n)| node * n + c * degree + i);
            for component in 0..n_components {
                output[basis * n_components + component] = node * n_components + component;
            }
        }
    }

    pub fn cell_dofs(&self, cell: usize) -> Vec<usize> {
        let mut dofs = vec![0; self.dofs_per_cell()];
        self.populate_cell_dofs(cell, &mut dofs);
        dofs
    }

    /// The physical position of the node a global dof belongs to.
    pub fn support_point(&self, dof: usize) -> DVector<f64> {
        assert!(dof < self.n_dofs(), "Dof {dof} out of bounds");
        let mut rest = dof / self.element.n_components();
        let size = self.mesh.cell_size();
        let lower = self.mesh.cell_lower_corner(0);
        let degree = self.element.degree() as f64;
        DVector::from_iterator(
            self.mesh.dim(),
            self.nodes_per_axis.iter().enumerate().map(|(axis, &n)| {
                let i = rest % n;
                rest /= n;
                lower[axis] + i as f64 * size[axis] / degree
            }),
        )
    }

    /// The dofs on boundary faces whose boundary id is in `boundary_ids`.
    ///
    /// With `component == Some(c)` only dofs of component `c` are returned.
    pub fn boundary_dofs(&self, boundary_ids: &SubDomains, component: Option<usize>) -> BTreeSet<usize> {
        let mut dofs = BTreeSet::new();
        let mut cell_dofs = vec![0; self.dofs_per_cell()];
        for cell in self.mesh.cells() {
            for face in 0..cell.n_faces() {
                if !cell.face_at_boundary(face) || !boundary_ids.contains(cell.face_boundary_id(face)) {
                    continue;
                }
                let (axis, side) = face_axis_and_side(face);
                let boundary_node = side * self.element.degree();
                self.populate_cell_dofs(cell.index(), &mut cell_dofs);
                for (local, &global) in cell_dofs.iter().enumerate() {
                    let (basis, c) = self.element.dof_to_basis_and_component(local);
                    let on_face = self.element.basis_multi_index(basis)[axis] == boundary_node;
                    if on_face && component.map_or(true, |wanted| wanted == c) {
                        dofs.insert(global);
                    }
                }
            }
        }
        dofs
    }

    /// The sparsity pattern of the system matrix.
    ///
    /// Dofs couple when they share a cell. With `include_face_couplings`, the dofs of two cells
    /// sharing an interior face also couple, as needed by interface integrals.
    pub fn sparsity_pattern(&self, include_face_couplings: bool) -> eyre::Result<SparsityPattern> {
        // Collecting into a BTreeSet stores each entry exactly once and sorts the entries
        let mut matrix_entries = BTreeSet::new();
        let mut dofs_i = vec![0; self.dofs_per_cell()];
        let mut dofs_j = vec![0; self.dofs_per_cell()];
        for cell in 0..self.mesh.n_cells() {
            self.populate_cell_dofs(cell, &mut dofs_i);
            for &i in &dofs_i {
                for &j in &dofs_i {
                    matrix_entries.insert((i, j));
                }
            }
            if include_face_couplings {
                for face in 0..self.mesh.n_faces_per_cell() {
                    if let Some(neighbour) = self.mesh.neighbour(cell, face) {
                        self.populate_cell_dofs(neighbour, &mut dofs_j);
                        for &i in &dofs_i {
                            for &j in &dofs_j {
                                matrix_entries.insert((i, j));
                            }
                        }
                    }
                }
            }
        }

        let num_rows = self.n_dofs();
        let mut offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(matrix_entries.len());
        offsets.push(0);
        for (i, j) in matrix_entries {
            // Loop to handle consecutive empty rows
            while i + 1 > offsets.len() {
                offsets.push(column_indices.len());
            }
            column_indices.push(j);
        }
        while offsets.len() < num_rows + 1 {
            offsets.push(column_indices.len());
        }
        debug!(
            "Sparsity pattern with {} rows and {} entries",
            num_rows,
            column_indices.len()
        );
        SparsityPattern::try_from_offsets_and_indices(num_rows, num_rows, offsets, column_indices)
            .wrap_err("failed to build sparsity pattern")
    }
}

/// Dirichlet constraints `u_i = g_i` on individual dofs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    inhomogeneities: BTreeMap<usize, f64>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain `dof` to `value`. A later constraint on the same dof replaces an earlier one.
    pub fn add_constraint(&mut self, dof: usize, value: f64) {
        self.inhomogeneities.insert(dof, value);
    }

    pub fn add_homogeneous(&mut self, dof: usize) {
        self.add_constraint(dof, 0.0);
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.inhomogeneities.contains_key(&dof)
    }

    pub fn inhomogeneity(&self, dof: usize) -> Option<f64> {
        self.inhomogeneities.get(&dof).copied()
    }

    pub fn has_inhomogeneities(&self) -> bool {
        self.inhomogeneities.values().any(|&g| g != 0.0)
    }

    pub fn n_constraints(&self) -> usize {
        self.inhomogeneities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inhomogeneities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.inhomogeneities.iter().map(|(&dof, &g)| (dof, g))
    }

    /// Constrain the boundary dofs on the given boundary ids to `f(x, component)`, where `x` is
    /// the support point of the dof.
    pub fn interpolate_boundary_values(
        &mut self,
        dof_handler: &DofHandler,
        boundary_ids: &SubDomains,
        f: impl Fn(&DVector<f64>, usize) -> f64,
    ) {
        let n_components = dof_handler.element().n_components();
        for dof in dof_handler.boundary_dofs(boundary_ids, None) {
            let x = dof_handler.support_point(dof);
            self.add_constraint(dof, f(&x, dof % n_components));
        }
    }

    /// Overwrite the constrained entries of a solution vector with their prescribed values.
    pub fn distribute(&self, solution: &mut DVector<f64>) {
        for (dof, g) in self.iter() {
            solution[dof] = g;
        }
    }

    /// Transfer a local matrix and right-hand side into the global system.
    ///
    /// A constrained row `i` receives only a diagonal entry `s` and right-hand side `s * g_i`,
    /// where `s` is the magnitude of the local diagonal (or the mean local diagonal if that
    /// vanishes). An unconstrained row moves the couplings to constrained columns to the
    /// right-hand side. Either output may be omitted.
    ///
    /// Returns an error if the matrix lacks an entry of the local block.
    pub fn distribute_local_to_global(
        &self,
        local_matrix: &DMatrix<f64>,
        local_rhs: &DVector<f64>,
        dofs: &[usize],
        mut matrix: Option<&mut CsrMatrix<f64>>,
        mut rhs: Option<&mut DVector<f64>>,
    ) -> eyre::Result<()> {
        let n = dofs.len();
        assert_eq!(local_matrix.nrows(), n, "Local matrix has wrong number of rows");
        assert_eq!(local_matrix.ncols(), n, "Local matrix has wrong number of columns");
        assert_eq!(local_rhs.len(), n, "Local right-hand side has wrong length");

        let mean_diagonal = {
            let (sum, count) = local_matrix
                .diagonal()
                .iter()
                .filter(|d| **d != 0.0)
                .fold((0.0, 0), |(sum, count), d| (sum + d.abs(), count + 1));
            if count > 0 {
                sum / count as f64
            } else {
                1.0
            }
        };

        for (local_i, &global_i) in dofs.iter().enumerate() {
            if let Some(g_i) = self.inhomogeneity(global_i) {
                let diagonal = local_matrix[(local_i, local_i)].abs();
                let scale = if diagonal != 0.0 { diagonal } else { mean_diagonal };
                if let Some(matrix) = matrix.as_deref_mut() {
                    add_to_csr_row(matrix, global_i, &[global_i], |_| scale)?;
                }
                if let Some(rhs) = rhs.as_deref_mut() {
                    rhs[global_i] += scale * g_i;
                }
                continue;
            }

            if let Some(rhs) = rhs.as_deref_mut() {
                let mut value = local_rhs[local_i];
                for (local_j, &global_j) in dofs.iter().enumerate() {
                    if let Some(g_j) = self.inhomogeneity(global_j) {
                        value -= local_matrix[(local_i, local_j)] * g_j;
                    }
                }
                rhs[global_i] += value;
            }
            if let Some(matrix) = matrix.as_deref_mut() {
                add_to_csr_row(matrix, global_i, dofs, |local_j| {
                    if self.is_constrained(dofs[local_j]) {
                        0.0
                    } else {
                        local_matrix[(local_i, local_j)]
                    }
                })?;
            }
        }
        Ok(())
    }
}

/// Add `value(k)` to entry `(row, columns[k])` of a CSR matrix for every `k`.
///
/// Columns may repeat; their values accumulate.
fn add_to_csr_row(
    matrix: &mut CsrMatrix<f64>,
    row: usize,
    columns: &[usize],
    value: impl Fn(usize) -> f64,
) -> eyre::Result<()> {
    let mut csr_row = matrix.row_mut(row);
    let (column_indices, values) = csr_row.cols_and_values_mut();
    for (k, &column) in columns.iter().enumerate() {
        let v = value(k);
        if v == 0.0 {
            continue;
        }
        let index = column_indices
            .binary_search(&column)
            .map_err(|_| eyre!("Entry ({row}, {column}) is not in the sparsity pattern of the matrix"))?;
        values[index] += v;
    }
    Ok(())
}
