//! Assembly of weak forms into global sparse systems.
//!
//! Symbolic integrals of linear, bilinear and residual forms are collected in a
//! [`MatrixBasedAssembler`] with `+=` and `-=`, or summed into a [`WeakForm`] first.
//! An assembly pass validates every term against the finite element and inputs, tabulates
//! the union of the required update flags once per kind of integration domain, and then
//! visits cells, boundary faces and interfaces in parallel.
mod global;
mod local;
mod terms;

pub use global::{AssemblyInput, AssemblyStatistics, MatrixBasedAssembler};
pub use terms::{AssemblyTerm, IntoAssemblyTerms, WeakForm};
