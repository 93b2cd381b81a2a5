//! Tensor-product Gauss quadrature on the unit reference cell `[0, 1]^dim`.
use eyre::eyre;
use fenris_quadrature::univariate;
use nalgebra::DVector;

/// A quadrature rule on the reference cell `[0, 1]^dim`.
///
/// Rules of dimension 0 consist of a single point with unit weight. They are used for the
/// faces of one-dimensional cells.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    dim: usize,
    weights: Vec<f64>,
    points: Vec<DVector<f64>>,
}

impl QuadratureRule {
    pub fn from_parts(dim: usize, weights: Vec<f64>, points: Vec<DVector<f64>>) -> eyre::Result<Self> {
        if weights.len() != points.len() {
            return Err(eyre!(
                "quadrature rule has {} weights but {} points",
                weights.len(),
                points.len()
            ));
        }
        if let Some(point) = points.iter().find(|p| p.len() != dim) {
            return Err(eyre!("quadrature point of dimension {} in a rule of dimension {dim}", point.len()));
        }
        Ok(Self { dim, weights, points })
    }

    /// The tensor product of `points_per_dim`-point Gauss rules.
    ///
    /// A rule with `n` points per dimension integrates polynomials of degree `2n - 1` in each
    /// variable exactly.
    pub fn gauss(dim: usize, points_per_dim: usize) -> eyre::Result<Self> {
        if points_per_dim == 0 {
            return Err(eyre!("Gauss quadrature needs at least one point per dimension"));
        }
        if dim > 3 {
            return Err(eyre!("Gauss quadrature is only supported up to dimension 3, got {dim}"));
        }
        // Map the rule from [-1, 1] onto [0, 1]
        let (weights_1d, points_1d) = univariate::gauss(points_per_dim);
        let weights_1d: Vec<f64> = weights_1d.iter().map(|w| 0.5 * w).collect();
        let points_1d: Vec<f64> = points_1d.iter().map(|[x]| 0.5 * (x + 1.0)).collect();

        let n = points_per_dim.pow(dim as u32);
        let mut weights = Vec::with_capacity(n);
        let mut points = Vec::with_capacity(n);
        for i in 0..n {
            let mut weight = 1.0;
            let mut point = DVector::zeros(dim);
            let mut rest = i;
            // The first coordinate varies fastest
            for axis in 0..dim {
                let k = rest % points_per_dim;
                rest /= points_per_dim;
                weight *= weights_1d[k];
                point[axis] = points_1d[k];
            }
            weights.push(weight);
            points.push(point);
        }
        Ok(Self { dim, weights, points })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_points(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[DVector<f64>] {
        &self.points
    }
}
