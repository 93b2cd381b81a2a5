//! Tensor-product Lagrange elements on the reference cell `[0, 1]^dim`.
//!
//! Scalar basis functions are products of one-dimensional Lagrange polynomials on equispaced
//! nodes. A vector-valued element repeats the scalar basis once per component; local dof
//! `b * n_components + c` is scalar basis function `b` in component `c`.
use eyre::eyre;
use itertools::Itertools;
use nalgebra::DVector;

use crate::flags::UpdateFlags;
use crate::tensor::Tensor;

/// A polynomial in one variable, stored by its monomial coefficients (lowest degree first).
#[derive(Debug, Clone, PartialEq)]
struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    fn constant(value: f64) -> Self {
        Self {
            coefficients: vec![value],
        }
    }

    /// Multiply by `(x - root) * scale`.
    fn times_linear(&self, root: f64, scale: f64) -> Self {
        let mut coefficients = vec![0.0; self.coefficients.len() + 1];
        for (k, &c) in self.coefficients.iter().enumerate() {
            coefficients[k + 1] += scale * c;
            coefficients[k] -= scale * root * c;
        }
        Self { coefficients }
    }

    fn derivative(&self) -> Self {
        let coefficients = self
            .coefficients
            .iter()
            .enumerate()
            .skip(1)
            .map(|(k, &c)| k as f64 * c)
            .collect_vec();
        if coefficients.is_empty() {
            Self::constant(0.0)
        } else {
            Self { coefficients }
        }
    }

    fn evaluate(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }
}

/// The highest derivative order elements provide.
pub const MAX_DERIVATIVE_ORDER: usize = 3;

/// A continuous Lagrange element of degree 1 to 3 on a line, square or cube.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeElement {
    dim: usize,
    degree: usize,
    n_components: usize,
    /// `basis_1d[m][order]` is the derivative of the given order of the 1D polynomial of node `m`.
    basis_1d: Vec<Vec<Polynomial>>,
}

impl LagrangeElement {
    pub fn new(dim: usize, degree: usize, n_components: usize) -> eyre::Result<Self> {
        if !(1..=3).contains(&dim) {
            return Err(eyre!("Lagrange elements exist in dimensions 1 to 3, got {dim}"));
        }
        if !(1..=3).contains(&degree) {
            return Err(eyre!("Lagrange elements of degree {degree} are not supported (1 to 3)"));
        }
        if n_components == 0 {
            return Err(eyre!("An element needs at least one component"));
        }

        let nodes = (0..=degree).map(|m| m as f64 / degree as f64).collect_vec();
        let basis_1d = nodes
            .iter()
            .enumerate()
            .map(|(m, &x_m)| {
                let mut polynomial = Polynomial::constant(1.0);
                for (j, &x_j) in nodes.iter().enumerate() {
                    if j != m {
                        polynomial = polynomial.times_linear(x_j, 1.0 / (x_m - x_j));
                    }
                }
                let mut derivatives = vec![polynomial];
                for order in 0..MAX_DERIVATIVE_ORDER {
                    let next = derivatives[order].derivative();
                    derivatives.push(next);
                }
                derivatives
            })
            .collect();

        Ok(Self {
            dim,
            degree,
            n_components,
            basis_1d,
        })
    }

    /// A scalar-valued element.
    pub fn scalar(dim: usize, degree: usize) -> eyre::Result<Self> {
        Self::new(dim, degree, 1)
    }

    /// A vector-valued element with one component per spatial dimension.
    pub fn vector(dim: usize, degree: usize) -> eyre::Result<Self> {
        Self::new(dim, degree, dim)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// The number of nodes along each axis.
    pub fn nodes_per_axis(&self) -> usize {
        self.degree + 1
    }

    pub fn n_scalar_basis(&self) -> usize {
        self.nodes_per_axis().pow(self.dim as u32)
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.n_scalar_basis() * self.n_components
    }

    /// The scalar basis function and component of a local dof.
    pub fn dof_to_basis_and_component(&self, dof: usize) -> (usize, usize) {
        assert!(dof < self.dofs_per_cell(), "Local dof {dof} out of bounds");
        (dof / self.n_components, dof % self.n_components)
    }

    /// The per-axis node indices of a scalar basis function. Axis 0 varies fastest.
    pub fn basis_multi_index(&self, basis: usize) -> Vec<usize> {
        assert!(basis < self.n_scalar_basis(), "Basis function {basis} out of bounds");
        let n = self.nodes_per_axis();
        (0..self.dim)
            .scan(basis, |rest, _| {
                let i = *rest % n;
                *rest /= n;
                Some(i)
            })
            .collect()
    }

    /// The reference coordinates of the node of a scalar basis function.
    pub fn support_point(&self, basis: usize) -> DVector<f64> {
        let index = self.basis_multi_index(basis);
        DVector::from_iterator(self.dim, index.iter().map(|&i| i as f64 / self.degree as f64))
    }

    /// The derivative of the given order of scalar basis function `basis` at reference point `xi`,
    /// with respect to reference coordinates.
    ///
    /// The result has rank `order`. Derivatives beyond the polynomial degree vanish.
    pub fn reference_derivative(&self, basis: usize, order: usize, xi: &DVector<f64>) -> Tensor<f64> {
        assert_eq!(xi.len(), self.dim, "Reference point has wrong dimension");
        let index = self.basis_multi_index(basis);
        let mut counts = vec![0; self.dim];
        Tensor::from_fn(order, self.dim, |derivative_axes| {
            counts.iter_mut().for_each(|c| *c = 0);
            for &axis in derivative_axes {
                counts[axis] += 1;
            }
            (0..self.dim)
                .map(|axis| {
                    let derivatives = &self.basis_1d[index[axis]];
                    derivatives
                        .get(counts[axis])
                        .map(|p| p.evaluate(xi[axis]))
                        .unwrap_or(0.0)
                })
                .product()
        })
    }

    /// The quantities finite element values of this element can compute.
    ///
    /// Hessians need degree 2 and third derivatives degree 3; for lower degrees they vanish
    /// identically and requesting them is treated as a setup error. Normal vectors exist on faces.
    pub fn supported_update_flags(&self, on_face: bool) -> UpdateFlags {
        let mut flags = UpdateFlags::VALUES
            | UpdateFlags::GRADIENTS
            | UpdateFlags::QUADRATURE_POINTS
            | UpdateFlags::JXW_VALUES
            | UpdateFlags::JACOBIANS;
        if self.degree >= 2 {
            flags |= UpdateFlags::HESSIANS;
        }
        if self.degree >= 3 {
            flags |= UpdateFlags::THIRD_DERIVATIVES;
        }
        if on_face {
            flags |= UpdateFlags::NORMAL_VECTORS;
        }
        flags
    }
}
