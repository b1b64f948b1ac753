use std::fmt::Debug;

use crate::error::IvpsolError;
use crate::{matrix_error, IndexType, Scalar, Vector};

pub mod band;
pub mod dense_nalgebra_serial;
pub mod sparse_serial;

pub use band::{BandLu, BandMatrix};
pub use dense_nalgebra_serial::{DenseLu, DenseMatrix};
pub use sparse_serial::{SparseLu, SparseMatrix};

/// The result of [Matrix::factorize], used to solve `A x = b` for any number of right-hand sides.
pub trait Factorization<V: Vector>: Debug + Clone + Send + Sync {
    fn nrows(&self) -> IndexType;

    /// Overwrite `b` with the solution of `A x = b`.
    fn solve_in_place(&self, b: &mut V) -> Result<(), IvpsolError>;

    fn solve(&self, b: &V) -> Result<V, IvpsolError> {
        let mut x = b.clone();
        self.solve_in_place(&mut x)?;
        Ok(x)
    }

    fn check_rhs(&self, b: &V) -> Result<(), IvpsolError> {
        if b.len() != self.nrows() {
            return Err(matrix_error!(DimensionMismatch, expected: self.nrows(), found: b.len()));
        }
        Ok(())
    }
}

/// A real matrix with a fixed structure (dense, banded or sparse) acting on vectors of type `V`.
///
/// Entries are addressed by `(row, column)`. Structured matrices only store the entries in their
/// pattern: writing outside it is an error, reading outside it returns zero for sparse matrices
/// and an error for band matrices.
pub trait Matrix: Clone + Debug + Send + Sync + 'static {
    type V: Vector;
    type Factorization: Factorization<Self::V>;

    fn zeros(nrows: IndexType, ncols: IndexType) -> Self;

    /// Create a zero matrix able to hold at least the entries in `pattern`.
    fn new_from_pattern(
        nrows: IndexType,
        ncols: IndexType,
        pattern: &[(IndexType, IndexType)],
    ) -> Result<Self, IvpsolError>;

    /// True if only a subset of the entries is stored, in which case Jacobians are best
    /// assembled by column coloring.
    fn is_sparse() -> bool;

    fn nrows(&self) -> IndexType;
    fn ncols(&self) -> IndexType;

    /// The stored entries in column-major order.
    fn pattern(&self) -> Vec<(IndexType, IndexType)>;

    fn fill_zero(&mut self);
    fn get_entry(&self, i: IndexType, j: IndexType) -> Result<Scalar, IvpsolError>;
    fn set_entry(&mut self, i: IndexType, j: IndexType, value: Scalar) -> Result<(), IvpsolError>;
    fn scale(&mut self, alpha: Scalar);

    /// y = alpha * A * x + beta * y
    fn gemv(
        &self,
        alpha: Scalar,
        x: &Self::V,
        beta: Scalar,
        y: &mut Self::V,
    ) -> Result<(), IvpsolError>;

    /// LU-factorize the matrix, failing with
    /// [crate::error::LinearSolverError::SingularMatrix] on a zero pivot.
    fn factorize(&self) -> Result<Self::Factorization, IvpsolError>;

    fn add_to_entry(
        &mut self,
        i: IndexType,
        j: IndexType,
        value: Scalar,
    ) -> Result<(), IvpsolError> {
        let current = self.get_entry(i, j)?;
        self.set_entry(i, j, current + value)
    }

    /// A += diag(d)
    fn add_diagonal(&mut self, d: &Self::V) -> Result<(), IvpsolError> {
        let n = self.nrows().min(self.ncols());
        if d.len() != n {
            return Err(matrix_error!(DimensionMismatch, expected: n, found: d.len()));
        }
        for i in 0..n {
            if d[i] != 0.0 {
                self.add_to_entry(i, i, d[i])?;
            }
        }
        Ok(())
    }

    /// Build a matrix from `(row, column, value)` triplets, summing duplicates.
    fn from_triplets(
        nrows: IndexType,
        ncols: IndexType,
        triplets: &[(IndexType, IndexType, Scalar)],
    ) -> Result<Self, IvpsolError> {
        let pattern = triplets.iter().map(|(i, j, _)| (*i, *j)).collect::<Vec<_>>();
        let mut m = Self::new_from_pattern(nrows, ncols, &pattern)?;
        for &(i, j, v) in triplets {
            m.add_to_entry(i, j, v)?;
        }
        Ok(m)
    }

    fn matvec(&self, x: &Self::V) -> Result<Self::V, IvpsolError> {
        let mut y = Self::V::zeros(self.nrows());
        self.gemv(1.0, x, 0.0, &mut y)?;
        Ok(y)
    }

    fn check_index(&self, i: IndexType, j: IndexType) -> Result<(), IvpsolError> {
        if i >= self.nrows() || j >= self.ncols() {
            return Err(matrix_error!(
                IndexOutOfBounds,
                row: i,
                col: j,
                nrows: self.nrows(),
                ncols: self.ncols()
            ));
        }
        Ok(())
    }

    fn check_gemv(&self, x: &Self::V, y: &Self::V) -> Result<(), IvpsolError> {
        if x.len() != self.ncols() {
            return Err(matrix_error!(DimensionMismatch, expected: self.ncols(), found: x.len()));
        }
        if y.len() != self.nrows() {
            return Err(matrix_error!(DimensionMismatch, expected: self.nrows(), found: y.len()));
        }
        Ok(())
    }

    fn check_square(&self) -> Result<(), IvpsolError> {
        if self.nrows() != self.ncols() {
            return Err(matrix_error!(NotSquare, nrows: self.nrows(), ncols: self.ncols()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use nalgebra::DVector;

    /// Deterministic pseudo-random numbers in [-1, 1).
    pub(crate) fn lcg_sequence(seed: u64, n: usize) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
            })
            .collect()
    }

    /// A diagonally dominant tridiagonal test matrix with a non-symmetric band.
    pub(crate) fn tridiagonal_triplets(n: usize) -> Vec<(usize, usize, f64)> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 4.0 + i as f64 * 0.1));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -2.0));
            }
        }
        triplets
    }

    pub(crate) fn check_solve_round_trip<M: Matrix>(m: &M, b: &M::V, tol: f64) {
        let lu = m.factorize().unwrap();
        let x = lu.solve(b).unwrap();
        let ax = m.matvec(&x).unwrap();
        ax.assert_eq_st(b, tol);
    }

    pub(crate) fn check_matrix_contract<M: Matrix<V = DVector<f64>>>() {
        let n = 6;
        let m = M::from_triplets(n, n, &tridiagonal_triplets(n)).unwrap();
        assert_eq!(m.get_entry(2, 1).unwrap(), -1.0);
        assert_eq!(m.get_entry(2, 3).unwrap(), -2.0);

        let x = DVector::from_vec(lcg_sequence(1, n));
        let mut y = DVector::from_element(n, 1.0);
        m.gemv(2.0, &x, 0.5, &mut y).unwrap();
        for i in 0..n {
            let mut expect = 0.5;
            for j in 0..n {
                if (i as i64 - j as i64).abs() <= 1 {
                    expect += 2.0 * m.get_entry(i, j).unwrap() * x[j];
                }
            }
            assert!((y[i] - expect).abs() < 1e-14);
        }

        let b = DVector::from_vec(lcg_sequence(2, n));
        check_solve_round_trip(&m, &b, 1e-12);

        let mut scaled = m.clone();
        scaled.scale(-2.0);
        scaled.add_diagonal(&DVector::from_element(n, 1.0)).unwrap();
        assert_eq!(scaled.get_entry(0, 0).unwrap(), -7.0);
        assert_eq!(scaled.get_entry(0, 1).unwrap(), 4.0);

        let short = DVector::zeros(n - 1);
        let mut y = DVector::zeros(n);
        let err = m.gemv(1.0, &short, 0.0, &mut y).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

        let mut singular = m.clone();
        singular.fill_zero();
        let err = singular.factorize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SingularMatrix);
        assert!(err.is_recoverable());
    }
}
