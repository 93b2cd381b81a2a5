//! Dense tensors of arbitrary rank over a fixed spatial dimension.
//!
//! Values of symbolic expressions are represented as [`Tensor`]s. Entries are stored in
//! row-major order, so for a rank-2 tensor the entry `(i, j)` is stored at `i * dim + j`.
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Add, Neg, Sub};

use nalgebra::{DMatrix, DVector};
use numeric_literals::replace_float_literals;

use crate::Scalar;

/// A dense tensor with `rank` indices, each ranging over `0 .. dim`.
///
/// Rank-0 tensors hold a single entry regardless of `dim`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    rank: usize,
    dim: usize,
    data: Vec<T>,
}

fn num_entries(rank: usize, dim: usize) -> usize {
    dim.pow(rank as u32)
}

impl<T> Tensor<T> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// The flat (row-major) storage index of the given multi-index.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        assert_eq!(index.len(), self.rank, "Multi-index length must match tensor rank");
        index.iter().fold(0, |flat, &i| {
            assert!(i < self.dim.max(1), "Tensor index {i} out of bounds (dim {})", self.dim);
            flat * self.dim + i
        })
    }

    /// The multi-index corresponding to the given flat storage index.
    pub fn multi_index(&self, mut flat: usize) -> Vec<usize> {
        let mut index = vec![0; self.rank];
        for i in index.iter_mut().rev() {
            *i = flat % self.dim;
            flat /= self.dim;
        }
        index
    }

    pub fn get(&self, index: &[usize]) -> &T {
        &self.data[self.flat_index(index)]
    }

    pub fn get_mut(&mut self, index: &[usize]) -> &mut T {
        let flat = self.flat_index(index);
        &mut self.data[flat]
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Tensor<U> {
        Tensor {
            rank: self.rank,
            dim: self.dim,
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Construct a tensor from raw row-major storage.
    ///
    /// Panics if the number of entries does not match `dim^rank`.
    pub fn from_data(rank: usize, dim: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            num_entries(rank, dim),
            "Data length must be dim^rank for a tensor of rank {rank} and dim {dim}"
        );
        Self { rank, dim, data }
    }

    pub fn from_fn(rank: usize, dim: usize, mut f: impl FnMut(&[usize]) -> T) -> Self {
        let mut index = vec![0; rank];
        let n = num_entries(rank, dim);
        let mut data = Vec::with_capacity(n);
        for _ in 0..n {
            data.push(f(&index));
            // Increment the multi-index, last index fastest
            for i in index.iter_mut().rev() {
                *i += 1;
                if *i < dim {
                    break;
                }
                *i = 0;
            }
        }
        Self { rank, dim, data }
    }
}

impl<T: Scalar> Tensor<T> {
    pub fn zeros(rank: usize, dim: usize) -> Self {
        Self {
            rank,
            dim,
            data: vec![T::zero(); num_entries(rank, dim)],
        }
    }

    pub fn scalar(value: T) -> Self {
        Self {
            rank: 0,
            dim: 0,
            data: vec![value],
        }
    }

    pub fn identity(dim: usize) -> Self {
        Self::from_fn(2, dim, |idx| if idx[0] == idx[1] { T::one() } else { T::zero() })
    }

    /// The tensor whose only non-zero entry is a one at the given flat index.
    pub fn unit(rank: usize, dim: usize, flat: usize) -> Self {
        let mut tensor = Self::zeros(rank, dim);
        tensor.data[flat] = T::one();
        tensor
    }

    /// The single entry of a rank-0 tensor.
    pub fn scalar_value(&self) -> T {
        assert_eq!(self.rank, 0, "Only rank-0 tensors have a scalar value");
        self.data[0]
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|x| *x == T::zero())
    }

    /// The real part of every entry.
    pub fn real_part(&self) -> Tensor<f64> {
        self.map(|x| x.re())
    }

    pub fn scaled(&self, factor: T) -> Self {
        self.map(|&x| x * factor)
    }

    /// The entry-wise sum.
    ///
    /// Panics if ranks differ, or dimensions differ for non-scalar tensors.
    pub fn add_tensor(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub_tensor(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a - b)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(T, T) -> T) -> Self {
        assert_eq!(self.rank, other.rank, "Tensor ranks must be equal");
        assert!(
            self.rank == 0 || self.dim == other.dim,
            "Tensor dimensions must be equal ({} != {})",
            self.dim,
            other.dim
        );
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Self {
            rank: self.rank,
            dim: self.dim.max(other.dim),
            data,
        }
    }

    /// Contract the given index pairs: index `pairs[k].0` of `self` with index `pairs[k].1`
    /// of `other`.
    ///
    /// The free indices of `self` (in order) followed by the free indices of `other`
    /// make up the indices of the result.
    pub fn contract_pairs(&self, other: &Self, pairs: &[(usize, usize)]) -> Self {
        for &(a, b) in pairs {
            assert!(a < self.rank && b < other.rank, "Contraction index out of bounds");
        }
        if self.rank == 0 || other.rank == 0 {
            assert!(pairs.is_empty(), "Rank-0 tensors have no indices to contract");
            return self.outer(other);
        }
        assert_eq!(self.dim, other.dim, "Contracted tensors must have equal dimension");
        let dim = self.dim;
        let free_a: Vec<usize> = (0..self.rank)
            .filter(|i| !pairs.iter().any(|p| p.0 == *i))
            .collect();
        let free_b: Vec<usize> = (0..other.rank)
            .filter(|i| !pairs.iter().any(|p| p.1 == *i))
            .collect();
        let n_contracted = num_entries(pairs.len(), dim);

        let mut idx_a = vec![0; self.rank];
        let mut idx_b = vec![0; other.rank];
        Tensor::from_fn(free_a.len() + free_b.len(), dim, |result_idx| {
            for (k, &i) in free_a.iter().enumerate() {
                idx_a[i] = result_idx[k];
            }
            for (k, &i) in free_b.iter().enumerate() {
                idx_b[i] = result_idx[free_a.len() + k];
            }
            let mut acc = T::zero();
            for c in 0..n_contracted {
                let mut rest = c;
                for &(a, b) in pairs.iter().rev() {
                    idx_a[a] = rest % dim;
                    idx_b[b] = rest % dim;
                    rest /= dim;
                }
                acc = acc + *self.get(&idx_a) * *other.get(&idx_b);
            }
            acc
        })
    }

    /// Contract the last `n` indices of `self` with the first `n` indices of `other`.
    pub fn contract_trailing(&self, other: &Self, n: usize) -> Self {
        assert!(n <= self.rank && n <= other.rank);
        let pairs: Vec<_> = (0..n).map(|k| (self.rank - n + k, k)).collect();
        self.contract_pairs(other, &pairs)
    }

    /// Contract every index of `self` with the corresponding index of `other`.
    pub fn full_contract(&self, other: &Self) -> T {
        assert_eq!(self.rank, other.rank, "Full contraction requires equal ranks");
        self.data
            .iter()
            .zip(&other.data)
            .fold(T::zero(), |acc, (&a, &b)| acc + a * b)
    }

    pub fn outer(&self, other: &Self) -> Self {
        if self.rank > 0 && other.rank > 0 {
            assert_eq!(self.dim, other.dim, "Outer product requires equal dimensions");
        }
        let mut data = Vec::with_capacity(self.data.len() * other.data.len());
        for &a in &self.data {
            for &b in &other.data {
                data.push(a * b);
            }
        }
        Self {
            rank: self.rank + other.rank,
            dim: self.dim.max(other.dim),
            data,
        }
    }

    /// Swap the leading and trailing halves of the indices of an even-rank tensor.
    ///
    /// For rank 2 this is the ordinary matrix transpose.
    pub fn transpose(&self) -> Self {
        assert!(
            self.rank >= 2 && self.rank % 2 == 0,
            "Transpose requires a tensor of even rank, got rank {}",
            self.rank
        );
        let half = self.rank / 2;
        let mut source = vec![0; self.rank];
        Tensor::from_fn(self.rank, self.dim, |idx| {
            source[..half].copy_from_slice(&idx[half..]);
            source[half..].copy_from_slice(&idx[..half]);
            *self.get(&source)
        })
    }

    /// `(A + transpose(A)) / 2`.
    #[replace_float_literals(T::from(literal))]
    pub fn symmetrize(&self) -> Self {
        self.add_tensor(&self.transpose()).scaled(0.5)
    }

    pub fn trace(&self) -> T {
        assert_eq!(self.rank, 2, "Trace requires a rank-2 tensor");
        (0..self.dim).fold(T::zero(), |acc, i| acc + *self.get(&[i, i]))
    }

    pub fn norm(&self) -> T {
        self.full_contract(self).sqrt()
    }

    pub fn determinant(&self) -> T {
        assert_eq!(self.rank, 2, "Determinant requires a rank-2 tensor");
        let a = |i: usize, j: usize| self.data[i * self.dim + j];
        match self.dim {
            1 => a(0, 0),
            2 => a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0),
            3 => {
                a(0, 0) * (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1))
                    - a(0, 1) * (a(1, 0) * a(2, 2) - a(1, 2) * a(2, 0))
                    + a(0, 2) * (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0))
            }
            d => panic!("Determinant is only implemented for dimensions 1 to 3, got {d}"),
        }
    }

    /// The inverse of a rank-2 tensor, or `None` if the tensor is singular.
    pub fn try_inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.re() == 0.0 {
            return None;
        }
        let a = |i: usize, j: usize| self.data[i * self.dim + j];
        let cofactor_transposed: Vec<T> = match self.dim {
            1 => vec![T::one()],
            2 => vec![a(1, 1), -a(0, 1), -a(1, 0), a(0, 0)],
            3 => vec![
                a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1),
                a(0, 2) * a(2, 1) - a(0, 1) * a(2, 2),
                a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1),
                a(1, 2) * a(2, 0) - a(1, 0) * a(2, 2),
                a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0),
                a(0, 2) * a(1, 0) - a(0, 0) * a(1, 2),
                a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0),
                a(0, 1) * a(2, 0) - a(0, 0) * a(2, 1),
                a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0),
            ],
            d => panic!("Inverse is only implemented for dimensions 1 to 3, got {d}"),
        };
        let data = cofactor_transposed.into_iter().map(|c| c / det).collect();
        Some(Self::from_data(2, self.dim, data))
    }
}

impl Tensor<f64> {
    pub fn from_vector(vector: &DVector<f64>) -> Self {
        Self::from_data(1, vector.len(), vector.as_slice().to_vec())
    }

    pub fn from_matrix(matrix: &DMatrix<f64>) -> Self {
        assert_eq!(matrix.nrows(), matrix.ncols(), "Only square matrices map to rank-2 tensors");
        let dim = matrix.nrows();
        Self::from_fn(2, dim, |idx| matrix[(idx[0], idx[1])])
    }

    pub fn to_vector(&self) -> DVector<f64> {
        assert_eq!(self.rank, 1);
        DVector::from_column_slice(&self.data)
    }

    pub fn to_matrix(&self) -> DMatrix<f64> {
        assert_eq!(self.rank, 2);
        DMatrix::from_row_slice(self.dim, self.dim, &self.data)
    }

    /// Lift every entry into another scalar type.
    pub fn lift<S: Scalar>(&self) -> Tensor<S> {
        self.map(|&x| S::from(x))
    }
}

impl<T: Scalar> Add for Tensor<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        self.add_tensor(&rhs)
    }
}

impl<T: Scalar> Sub for Tensor<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self.sub_tensor(&rhs)
    }
}

impl<T: Scalar> Neg for Tensor<T> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.map(|&x| -x)
    }
}

impl<'a, T: Scalar> Neg for &'a Tensor<T> {
    type Output = Tensor<T>;

    fn neg(self) -> Self::Output {
        self.map(|&x| -x)
    }
}

impl<T: Display> Display for Tensor<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn write_block<T: Display>(f: &mut Formatter<'_>, data: &[T], rank: usize, dim: usize) -> fmt::Result {
            if rank == 0 {
                return write!(f, "{}", data[0]);
            }
            let stride = data.len() / dim.max(1);
            write!(f, "[")?;
            for i in 0..dim {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_block(f, &data[i * stride..(i + 1) * stride], rank - 1, dim)?;
            }
            write!(f, "]")
        }
        write_block(f, &self.data, self.rank, self.dim)
    }
}
