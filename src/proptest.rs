//! Proptest strategies for tensors, meshes and symbolic expressions.
use ::proptest::prelude::*;

use crate::mesh::BoxMesh;
use crate::symbolic::{constant_tensor, Expr};
use crate::tensor::Tensor;

/// Tensors of the given shape with entries in a moderate range.
pub fn tensor(rank: usize, dim: usize) -> impl Strategy<Value = Tensor<f64>> {
    // Pick a reasonably small range, so that products of several entries stay well
    // within the precision of comparisons in tests
    let n_entries = dim.pow(rank as u32);
    prop::collection::vec(-10.0..10.0, n_entries).prop_map(move |data| Tensor::from_data(rank, dim, data))
}

/// Rank-2 tensors of the given dimension that are far from singular.
pub fn invertible_rank2_tensor(dim: usize) -> impl Strategy<Value = Tensor<f64>> {
    tensor(2, dim).prop_map(move |t| {
        // Diagonal dominance guarantees invertibility
        let shift = 1.0 + t.as_slice().iter().map(|x| x.abs()).sum::<f64>();
        Tensor::from_fn(2, dim, |idx| *t.get(idx) + if idx[0] == idx[1] { shift } else { 0.0 })
    })
}

/// Constant expressions of rank at most 2 in `DIM` dimensions.
pub fn constant_expression<const DIM: usize>() -> impl Strategy<Value = Expr> {
    (0..=2usize)
        .prop_flat_map(|rank| tensor(rank, DIM))
        .prop_map(|value| constant_tensor::<DIM>(value))
}

/// Unit box meshes in 1 to 3 dimensions with 1 to 3 cells per axis.
pub fn box_mesh() -> impl Strategy<Value = BoxMesh> {
    (1..=3usize).prop_flat_map(|dim| {
        prop::collection::vec(1..=3usize, dim).prop_map(move |cells_per_axis| {
            let lower = vec![0.0; dim];
            let upper = vec![1.0; dim];
            BoxMesh::hyper_rectangle(&lower, &upper, &cells_per_axis)
                .unwrap_or_else(|err| panic!("generated mesh parameters are valid: {err}"))
        })
    })
}
