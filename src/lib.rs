//! Symbolic weak forms for finite element assembly.
//!
//! Integrands are written as trees of symbolic operands (test functions, trial solutions,
//! field solutions, user functors, geometric quantities) combined with tensor operators.
//! Integrands are wrapped in integrals over cells, boundary faces or interior interfaces,
//! and collected in a [`MatrixBasedAssembler`](assembly::MatrixBasedAssembler) that computes
//! the global system matrix and right-hand side. Nonlinear residuals are linearized either with
//! forward-mode automatic differentiation or with symbolic differentiation of the residual
//! expression.
//!
//! The finite element machinery the assembler runs on (tensor-product Lagrange elements on
//! axis-aligned box meshes) lives in [`element`], [`mesh`], [`dofs`] and [`values`].

use num_dual::DualNum;
use std::fmt::Debug;

pub mod assembly;
pub mod cache;
pub mod decorations;
pub mod differentiation;
pub mod dofs;
pub mod element;
pub mod flags;
pub mod forms;
pub mod integral;
pub mod integrate;
pub mod mesh;
pub mod quadrature;
pub mod solution;
pub mod symbolic;
pub mod tensor;
pub mod values;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate eyre;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
pub extern crate num_dual;

pub use flags::UpdateFlags;
pub use tensor::Tensor;

/// Scalar types that symbolic expressions can be evaluated with.
///
/// Implemented by `f64` for plain evaluation and by the dual numbers of `num_dual`
/// for forward-mode automatic differentiation.
pub trait Scalar: DualNum<f64> + From<f64> + Copy + Debug + Send + Sync + 'static {}

impl<T> Scalar for T where T: DualNum<f64> + From<f64> + Copy + Debug + Send + Sync + 'static {}
