//! Finite element values: shape function derivatives, quadrature points and weights on the
//! current cell, boundary face or interior interface.
//!
//! Shape function tables are computed on the reference cell once, and scaled to the physical
//! cell by [`FeValues::reinit`] and friends. Only the derivative orders requested through
//! [`UpdateFlags`] are tabulated.
use eyre::eyre;
use nalgebra::{DMatrix, DVector};

use crate::element::LagrangeElement;
use crate::flags::UpdateFlags;
use crate::mesh::{face_axis_and_side, BoxMesh};
use crate::quadrature::QuadratureRule;
use crate::tensor::Tensor;

/// A derivative of one shape function at one quadrature point.
///
/// `derivative` is the derivative of the scalar basis function, taken in physical coordinates,
/// and belongs to field component `component`. The shape function is `factor` times the scalar
/// basis function, e.g. `0.5` for the averages taken on interfaces.
#[derive(Debug, Clone, Copy)]
pub struct ShapeDerivative<'a> {
    pub component: usize,
    pub factor: f64,
    pub derivative: &'a Tensor<f64>,
}

/// Read access to finite element values reinitialized on a cell, face or interface.
///
/// Quadrature point and dof indices out of range are programming errors and panic.
pub trait FeValuesBase {
    fn dimension(&self) -> usize;

    fn n_quadrature_points(&self) -> usize;

    fn dofs_per_cell(&self) -> usize;

    fn update_flags(&self) -> UpdateFlags;

    fn jxw(&self, q: usize) -> f64;

    fn jxw_values(&self) -> &[f64];

    /// The physical position of quadrature point `q`.
    fn quadrature_point(&self, q: usize) -> &DVector<f64>;

    /// The outward unit normal at quadrature point `q`, or `None` on cells.
    fn normal_vector(&self, q: usize) -> Option<&DVector<f64>>;

    /// The Jacobian of the map from the reference cell to the physical cell.
    fn jacobian(&self, q: usize) -> &DMatrix<f64>;

    /// The derivative of order `order` of the shape function of local dof `dof` at point `q`.
    ///
    /// Panics if the order was not requested through the update flags.
    fn shape_derivative(&self, dof: usize, order: usize, q: usize) -> ShapeDerivative<'_>;
}

fn check_supported(element: &LagrangeElement, flags: UpdateFlags, on_face: bool) -> eyre::Result<()> {
    let missing = flags.missing_from(element.supported_update_flags(on_face));
    if missing.is_empty() {
        Ok(())
    } else {
        Err(eyre!(
            "a Lagrange element of degree {} in {} dimensions cannot provide {missing}",
            element.degree(),
            element.dim()
        ))
    }
}

/// Shape function derivatives of every scalar basis function at a set of points.
///
/// `tables[order][q * n_basis + b]`.
#[derive(Debug, Clone)]
struct ShapeTables {
    n_basis: usize,
    tables: Vec<Vec<Tensor<f64>>>,
}

impl ShapeTables {
    fn on_reference(element: &LagrangeElement, points: &[DVector<f64>], max_order: Option<usize>) -> Self {
        let n_basis = element.n_scalar_basis();
        let tables = match max_order {
            None => Vec::new(),
            Some(max_order) => (0..=max_order)
                .map(|order| {
                    points
                        .iter()
                        .flat_map(|xi| (0..n_basis).map(move |b| element.reference_derivative(b, order, xi)))
                        .collect()
                })
                .collect(),
        };
        Self { n_basis, tables }
    }

    /// Map reference derivatives to a box with edge lengths `cell_size`.
    fn scale_into(&self, cell_size: &DVector<f64>, output: &mut ShapeTables) {
        output.n_basis = self.n_basis;
        output.tables.clear();
        for table in &self.tables {
            let scaled = table
                .iter()
                .map(|reference| {
                    Tensor::from_fn(reference.rank(), reference.dim(), |idx| {
                        let scale: f64 = idx.iter().map(|&axis| 1.0 / cell_size[axis]).product();
                        *reference.get(idx) * scale
                    })
                })
                .collect();
            output.tables.push(scaled);
        }
    }

    fn get(&self, basis: usize, order: usize, q: usize) -> &Tensor<f64> {
        let table = self
            .tables
            .get(order)
            .unwrap_or_else(|| panic!("Shape function derivatives of order {order} were not requested"));
        &table[q * self.n_basis + basis]
    }
}

/// Finite element values on cells.
#[derive(Debug, Clone)]
pub struct FeValues {
    element: LagrangeElement,
    flags: UpdateFlags,
    weights: Vec<f64>,
    reference_points: Vec<DVector<f64>>,
    reference: ShapeTables,
    physical: ShapeTables,
    points: Vec<DVector<f64>>,
    jxw: Vec<f64>,
    jacobian: DMatrix<f64>,
    cell: Option<usize>,
}

impl FeValues {
    /// Returns an error if the element cannot provide the requested flags, or the quadrature
    /// rule does not match the element dimension.
    pub fn new(element: &LagrangeElement, quadrature: &QuadratureRule, flags: UpdateFlags) -> eyre::Result<Self> {
        if quadrature.dim() != element.dim() {
            return Err(eyre!(
                "cell quadrature of dimension {} does not match element dimension {}",
                quadrature.dim(),
                element.dim()
            ));
        }
        if flags.contains(UpdateFlags::NORMAL_VECTORS) {
            return Err(eyre!("normal vectors are only available on faces"));
        }
        check_supported(element, flags, false)?;
        let reference = ShapeTables::on_reference(element, quadrature.points(), flags.max_derivative_order());
        Ok(Self {
            element: element.clone(),
            flags,
            weights: quadrature.weights().to_vec(),
            reference_points: quadrature.points().to_vec(),
            physical: reference.clone(),
            reference,
            points: quadrature.points().to_vec(),
            jxw: quadrature.weights().to_vec(),
            jacobian: DMatrix::identity(element.dim(), element.dim()),
            cell: None,
        })
    }

    pub fn element(&self) -> &LagrangeElement {
        &self.element
    }

    /// The cell the values were last reinitialized on.
    pub fn cell(&self) -> Option<usize> {
        self.cell
    }

    pub fn reinit(&mut self, mesh: &BoxMesh, cell: usize) {
        assert_eq!(mesh.dim(), self.element.dim(), "Mesh dimension does not match element");
        let size = mesh.cell_size();
        let lower = mesh.cell_lower_corner(cell);
        let volume: f64 = size.iter().product();
        for (point, xi) in self.points.iter_mut().zip(&self.reference_points) {
            *point = &lower + size.component_mul(xi);
        }
        for (jxw, w) in self.jxw.iter_mut().zip(&self.weights) {
            *jxw = w * volume;
        }
        self.jacobian = DMatrix::from_diagonal(size);
        self.reference.scale_into(size, &mut self.physical);
        self.cell = Some(cell);
    }
}

impl FeValuesBase for FeValues {
    fn dimension(&self) -> usize {
        self.element.dim()
    }

    fn n_quadrature_points(&self) -> usize {
        self.weights.len()
    }

    fn dofs_per_cell(&self) -> usize {
        self.element.dofs_per_cell()
    }

    fn update_flags(&self) -> UpdateFlags {
        self.flags
    }

    fn jxw(&self, q: usize) -> f64 {
        self.jxw[q]
    }

    fn jxw_values(&self) -> &[f64] {
        &self.jxw
    }

    fn quadrature_point(&self, q: usize) -> &DVector<f64> {
        &self.points[q]
    }

    fn normal_vector(&self, _q: usize) -> Option<&DVector<f64>> {
        None
    }

    fn jacobian(&self, _q: usize) -> &DMatrix<f64> {
        &self.jacobian
    }

    fn shape_derivative(&self, dof: usize, order: usize, q: usize) -> ShapeDerivative<'_> {
        assert!(q < self.n_quadrature_points(), "Quadrature point {q} out of bounds");
        let (basis, component) = self.element.dof_to_basis_and_component(dof);
        ShapeDerivative {
            component,
            factor: 1.0,
            derivative: self.physical.get(basis, order, q),
        }
    }
}

/// Finite element values on the faces of cells.
#[derive(Debug, Clone)]
pub struct FeFaceValues {
    element: LagrangeElement,
    flags: UpdateFlags,
    weights: Vec<f64>,
    /// Per face, the face quadrature points embedded into the reference cell.
    reference_points: Vec<Vec<DVector<f64>>>,
    reference: Vec<ShapeTables>,
    physical: ShapeTables,
    points: Vec<DVector<f64>>,
    normals: Vec<DVector<f64>>,
    jxw: Vec<f64>,
    jacobian: DMatrix<f64>,
    cell_and_face: Option<(usize, usize)>,
}

/// Embed a point of the reference face into the reference cell.
fn embed_face_point(face: usize, dim: usize, point: &DVector<f64>) -> DVector<f64> {
    let (axis, side) = face_axis_and_side(face);
    let mut tangential = point.iter();
    DVector::from_iterator(
        dim,
        (0..dim).map(|a| {
            if a == axis {
                side as f64
            } else {
                *tangential.next().unwrap_or(&0.0)
            }
        }),
    )
}

impl FeFaceValues {
    /// `quadrature` is a rule on the reference face, of dimension one less than the element.
    pub fn new(element: &LagrangeElement, quadrature: &QuadratureRule, flags: UpdateFlags) -> eyre::Result<Self> {
        let dim = element.dim();
        if quadrature.dim() + 1 != dim {
            return Err(eyre!(
                "face quadrature of dimension {} does not match element dimension {dim}",
                quadrature.dim()
            ));
        }
        check_supported(element, flags, true)?;
        let max_order = flags.max_derivative_order();
        let reference_points: Vec<Vec<_>> = (0..2 * dim)
            .map(|face| {
                quadrature
                    .points()
                    .iter()
                    .map(|p| embed_face_point(face, dim, p))
                    .collect()
            })
            .collect();
        let reference: Vec<_> = reference_points
            .iter()
            .map(|points| ShapeTables::on_reference(element, points, max_order))
            .collect();
        let n_q = quadrature.n_points();
        Ok(Self {
            element: element.clone(),
            flags,
            weights: quadrature.weights().to_vec(),
            physical: reference[0].clone(),
            reference_points,
            reference,
            points: vec![DVector::zeros(dim); n_q],
            normals: vec![DVector::zeros(dim); n_q],
            jxw: vec![0.0; n_q],
            jacobian: DMatrix::identity(dim, dim),
            cell_and_face: None,
        })
    }

    pub fn element(&self) -> &LagrangeElement {
        &self.element
    }

    pub fn cell_and_face(&self) -> Option<(usize, usize)> {
        self.cell_and_face
    }

    pub fn reinit(&mut self, mesh: &BoxMesh, cell: usize, face: usize) {
        let dim = self.element.dim();
        assert_eq!(mesh.dim(), dim, "Mesh dimension does not match element");
        assert!(face < 2 * dim, "Face index {face} out of bounds");
        let (axis, side) = face_axis_and_side(face);
        let size = mesh.cell_size();
        let lower = mesh.cell_lower_corner(cell);
        let area: f64 = (0..dim).filter(|&a| a != axis).map(|a| size[a]).product();
        let mut normal = DVector::zeros(dim);
        normal[axis] = if side == 0 { -1.0 } else { 1.0 };

        for (point, xi) in self.points.iter_mut().zip(&self.reference_points[face]) {
            *point = &lower + size.component_mul(xi);
        }
        for n in &mut self.normals {
            n.copy_from(&normal);
        }
        for (jxw, w) in self.jxw.iter_mut().zip(&self.weights) {
            *jxw = w * area;
        }
        self.jacobian = DMatrix::from_diagonal(size);
        self.reference[face].scale_into(size, &mut self.physical);
        self.cell_and_face = Some((cell, face));
    }
}

impl FeValuesBase for FeFaceValues {
    fn dimension(&self) -> usize {
        self.element.dim()
    }

    fn n_quadrature_points(&self) -> usize {
        self.weights.len()
    }

    fn dofs_per_cell(&self) -> usize {
        self.element.dofs_per_cell()
    }

    fn update_flags(&self) -> UpdateFlags {
        self.flags
    }

    fn jxw(&self, q: usize) -> f64 {
        self.jxw[q]
    }

    fn jxw_values(&self) -> &[f64] {
        &self.jxw
    }

    fn quadrature_point(&self, q: usize) -> &DVector<f64> {
        &self.points[q]
    }

    fn normal_vector(&self, q: usize) -> Option<&DVector<f64>> {
        Some(&self.normals[q])
    }

    fn jacobian(&self, _q: usize) -> &DMatrix<f64> {
        &self.jacobian
    }

    fn shape_derivative(&self, dof: usize, order: usize, q: usize) -> ShapeDerivative<'_> {
        assert!(q < self.n_quadrature_points(), "Quadrature point {q} out of bounds");
        let (basis, component) = self.element.dof_to_basis_and_component(dof);
        ShapeDerivative {
            component,
            factor: 1.0,
            derivative: self.physical.get(basis, order, q),
        }
    }
}

/// Finite element values on an interior face, seen from both adjacent cells.
///
/// The local dofs are those of the cell followed by those of its neighbour. Shape functions
/// are averaged across the interface: each side contributes half of its basis function.
/// Positions, weights and normals are taken from the first cell.
#[derive(Debug, Clone)]
pub struct FeInterfaceValues {
    this: FeFaceValues,
    neighbour: FeFaceValues,
    cells: Option<(usize, usize)>,
}

impl FeInterfaceValues {
    pub fn new(element: &LagrangeElement, quadrature: &QuadratureRule, flags: UpdateFlags) -> eyre::Result<Self> {
        let this = FeFaceValues::new(element, quadrature, flags)?;
        Ok(Self {
            neighbour: this.clone(),
            this,
            cells: None,
        })
    }

    /// The cell and its neighbour across the face the values were last reinitialized on.
    pub fn cells(&self) -> Option<(usize, usize)> {
        self.cells
    }

    /// Panics if the face lies on the boundary.
    pub fn reinit(&mut self, mesh: &BoxMesh, cell: usize, face: usize) {
        let neighbour = mesh
            .neighbour(cell, face)
            .unwrap_or_else(|| panic!("Face {face} of cell {cell} lies on the boundary"));
        self.this.reinit(mesh, cell, face);
        self.neighbour
            .reinit(mesh, neighbour, BoxMesh::opposite_face(face));
        self.cells = Some((cell, neighbour));
    }
}

impl FeValuesBase for FeInterfaceValues {
    fn dimension(&self) -> usize {
        self.this.dimension()
    }

    fn n_quadrature_points(&self) -> usize {
        self.this.n_quadrature_points()
    }

    fn dofs_per_cell(&self) -> usize {
        2 * self.this.dofs_per_cell()
    }

    fn update_flags(&self) -> UpdateFlags {
        self.this.update_flags()
    }

    fn jxw(&self, q: usize) -> f64 {
        self.this.jxw(q)
    }

    fn jxw_values(&self) -> &[f64] {
        self.this.jxw_values()
    }

    fn quadrature_point(&self, q: usize) -> &DVector<f64> {
        self.this.quadrature_point(q)
    }

    fn normal_vector(&self, q: usize) -> Option<&DVector<f64>> {
        self.this.normal_vector(q)
    }

    fn jacobian(&self, q: usize) -> &DMatrix<f64> {
        self.this.jacobian(q)
    }

    fn shape_derivative(&self, dof: usize, order: usize, q: usize) -> ShapeDerivative<'_> {
        let n = self.this.dofs_per_cell();
        assert!(dof < 2 * n, "Interface dof {dof} out of bounds");
        let shape = if dof < n {
            self.this.shape_derivative(dof, order, q)
        } else {
            self.neighbour.shape_derivative(dof - n, order, q)
        };
        ShapeDerivative { factor: 0.5, ..shape }
    }
}
