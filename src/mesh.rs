//! Structured meshes of axis-aligned boxes.
//!
//! Cells are numbered with the first axis varying fastest. Face `f` of a cell is normal to
//! axis `f / 2` and lies on the lower (`f % 2 == 0`) or upper (`f % 2 == 1`) side of the cell.
use eyre::eyre;
use nalgebra::DVector;

use crate::integral::{BoundaryId, CellAccessor, ManifoldId, MaterialId};

#[derive(Debug, Clone, PartialEq)]
pub struct BoxMesh {
    dim: usize,
    lower: DVector<f64>,
    cells_per_axis: Vec<usize>,
    cell_size: DVector<f64>,
    material_ids: Vec<MaterialId>,
    /// Indexed by `cell * n_faces + face`. Only meaningful for boundary faces.
    boundary_ids: Vec<BoundaryId>,
    /// Indexed by `cell * n_faces + face`.
    manifold_ids: Vec<ManifoldId>,
}

impl BoxMesh {
    /// A mesh of the box `[lower, upper]` with the given number of cells along each axis.
    ///
    /// All material, boundary and manifold ids are 0.
    pub fn hyper_rectangle(lower: &[f64], upper: &[f64], cells_per_axis: &[usize]) -> eyre::Result<Self> {
        let dim = lower.len();
        if !(1..=3).contains(&dim) {
            return Err(eyre!("Box meshes exist in dimensions 1 to 3, got {dim}"));
        }
        if upper.len() != dim || cells_per_axis.len() != dim {
            return Err(eyre!("Corners and cell counts must all have {dim} entries"));
        }
        if cells_per_axis.iter().any(|&n| n == 0) {
            return Err(eyre!("Every axis needs at least one cell"));
        }
        if lower.iter().zip(upper).any(|(l, u)| l >= u) {
            return Err(eyre!("Lower corner must be strictly below the upper corner"));
        }
        let cell_size = DVector::from_iterator(
            dim,
            (0..dim).map(|axis| (upper[axis] - lower[axis]) / cells_per_axis[axis] as f64),
        );
        let n_cells = cells_per_axis.iter().product::<usize>();
        let n_faces = 2 * dim;
        Ok(Self {
            dim,
            lower: DVector::from_column_slice(lower),
            cells_per_axis: cells_per_axis.to_vec(),
            cell_size,
            material_ids: vec![0; n_cells],
            boundary_ids: vec![0; n_cells * n_faces],
            manifold_ids: vec![0; n_cells * n_faces],
        })
    }

    /// The unit cube `[0, 1]^dim` with `cells_per_axis` cells along every axis.
    pub fn hyper_cube(dim: usize, cells_per_axis: usize) -> eyre::Result<Self> {
        Self::hyper_rectangle(&vec![0.0; dim], &vec![1.0; dim], &vec![cells_per_axis; dim])
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_cells(&self) -> usize {
        self.material_ids.len()
    }

    pub fn n_faces_per_cell(&self) -> usize {
        2 * self.dim
    }

    pub fn cells_per_axis(&self) -> &[usize] {
        &self.cells_per_axis
    }

    pub fn cell_size(&self) -> &DVector<f64> {
        &self.cell_size
    }

    pub fn cell_multi_index(&self, cell: usize) -> Vec<usize> {
        assert!(cell < self.n_cells(), "Cell index {cell} out of bounds");
        self.cells_per_axis
            .iter()
            .scan(cell, |rest, &n| {
                let i = *rest % n;
                *rest /= n;
                Some(i)
            })
            .collect()
    }

    fn cell_index(&self, multi_index: &[usize]) -> usize {
        multi_index
            .iter()
            .zip(&self.cells_per_axis)
            .rev()
            .fold(0, |index, (&i, &n)| index * n + i)
    }

    pub fn cell_lower_corner(&self, cell: usize) -> DVector<f64> {
        let index = self.cell_multi_index(cell);
        DVector::from_iterator(
            self.dim,
            (0..self.dim).map(|axis| self.lower[axis] + index[axis] as f64 * self.cell_size[axis]),
        )
    }

    pub fn cell_center(&self, cell: usize) -> DVector<f64> {
        self.cell_lower_corner(cell) + 0.5 * &self.cell_size
    }

    pub fn face_center(&self, cell: usize, face: usize) -> DVector<f64> {
        let (axis, side) = face_axis_and_side(face);
        let mut center = self.cell_center(cell);
        let offset = 0.5 * self.cell_size[axis];
        center[axis] += if side == 0 { -offset } else { offset };
        center
    }

    pub fn face_at_boundary(&self, cell: usize, face: usize) -> bool {
        self.neighbour(cell, face).is_none()
    }

    /// The cell on the other side of a face, or `None` at the boundary.
    pub fn neighbour(&self, cell: usize, face: usize) -> Option<usize> {
        assert!(face < self.n_faces_per_cell(), "Face index {face} out of bounds");
        let (axis, side) = face_axis_and_side(face);
        let mut index = self.cell_multi_index(cell);
        if side == 0 {
            index[axis] = index[axis].checked_sub(1)?;
        } else if index[axis] + 1 < self.cells_per_axis[axis] {
            index[axis] += 1;
        } else {
            return None;
        }
        Some(self.cell_index(&index))
    }

    /// The face of `neighbour(cell, face)` that coincides with `face`.
    pub fn opposite_face(face: usize) -> usize {
        face ^ 1
    }

    pub fn cell(&self, index: usize) -> CellRef<'_> {
        assert!(index < self.n_cells(), "Cell index {index} out of bounds");
        CellRef { mesh: self, index }
    }

    pub fn cells(&self) -> impl Iterator<Item = CellRef<'_>> {
        (0..self.n_cells()).map(move |index| CellRef { mesh: self, index })
    }

    pub fn material_id(&self, cell: usize) -> MaterialId {
        self.material_ids[cell]
    }

    pub fn boundary_id(&self, cell: usize, face: usize) -> BoundaryId {
        self.boundary_ids[cell * self.n_faces_per_cell() + face]
    }

    pub fn manifold_id(&self, cell: usize, face: usize) -> ManifoldId {
        self.manifold_ids[cell * self.n_faces_per_cell() + face]
    }

    pub fn set_material_id(&mut self, cell: usize, id: MaterialId) {
        self.material_ids[cell] = id;
    }

    /// Set the material id of every cell whose center satisfies the predicate.
    pub fn set_material_ids_where(&mut self, predicate: impl Fn(&DVector<f64>) -> bool, id: MaterialId) {
        for cell in 0..self.n_cells() {
            if predicate(&self.cell_center(cell)) {
                self.material_ids[cell] = id;
            }
        }
    }

    /// Give every boundary face the id of its face number, so that face `2 * axis` is the lower
    /// end of `axis` and face `2 * axis + 1` the upper end.
    pub fn colorize_boundaries(&mut self) {
        let n_faces = self.n_faces_per_cell();
        for cell in 0..self.n_cells() {
            for face in 0..n_faces {
                if self.face_at_boundary(cell, face) {
                    self.boundary_ids[cell * n_faces + face] = face as BoundaryId;
                }
            }
        }
    }

    /// Set the boundary id of every boundary face whose center satisfies the predicate.
    pub fn set_boundary_ids_where(&mut self, predicate: impl Fn(&DVector<f64>) -> bool, id: BoundaryId) {
        let n_faces = self.n_faces_per_cell();
        for cell in 0..self.n_cells() {
            for face in 0..n_faces {
                if self.face_at_boundary(cell, face) && predicate(&self.face_center(cell, face)) {
                    self.boundary_ids[cell * n_faces + face] = id;
                }
            }
        }
    }

    /// Set the manifold id of every face whose center satisfies the predicate.
    ///
    /// Interior faces are seen from both adjacent cells, and both sides receive the id.
    pub fn set_manifold_ids_where(&mut self, predicate: impl Fn(&DVector<f64>) -> bool, id: ManifoldId) {
        let n_faces = self.n_faces_per_cell();
        for cell in 0..self.n_cells() {
            for face in 0..n_faces {
                if predicate(&self.face_center(cell, face)) {
                    self.manifold_ids[cell * n_faces + face] = id;
                }
            }
        }
    }
}

/// The axis a face is normal to and the side of the cell it lies on.
pub fn face_axis_and_side(face: usize) -> (usize, usize) {
    (face / 2, face % 2)
}

/// A cell of a [`BoxMesh`].
#[derive(Debug, Copy, Clone)]
pub struct CellRef<'a> {
    mesh: &'a BoxMesh,
    index: usize,
}

impl<'a> CellRef<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mesh(&self) -> &'a BoxMesh {
        self.mesh
    }

    pub fn neighbour(&self, face: usize) -> Option<CellRef<'a>> {
        self.mesh
            .neighbour(self.index, face)
            .map(|index| CellRef { mesh: self.mesh, index })
    }
}

impl<'a> CellAccessor for CellRef<'a> {
    fn material_id(&self) -> MaterialId {
        self.mesh.material_id(self.index)
    }

    fn n_faces(&self) -> usize {
        self.mesh.n_faces_per_cell()
    }

    fn face_at_boundary(&self, face: usize) -> bool {
        self.mesh.face_at_boundary(self.index, face)
    }

    fn face_boundary_id(&self, face: usize) -> BoundaryId {
        self.mesh.boundary_id(self.index, face)
    }

    fn face_manifold_id(&self, face: usize) -> ManifoldId {
        self.mesh.manifold_id(self.index, face)
    }
}
