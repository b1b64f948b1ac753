use std::marker::PhantomData;

use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Dyn, LU};

use crate::error::IvpsolError;
use crate::{linear_solver_error, IndexType, Scalar, Vector};

use super::{Factorization, Matrix};

/// A dense column-major matrix backed by a nalgebra [DMatrix].
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix<V: Vector = DVector<Scalar>> {
    data: DMatrix<Scalar>,
    _phantom: PhantomData<V>,
}

impl<V: Vector> DenseMatrix<V> {
    pub fn from_nalgebra(data: DMatrix<Scalar>) -> Self {
        Self {
            data,
            _phantom: PhantomData,
        }
    }
}

/// LU factorization with partial pivoting of a [DenseMatrix].
#[derive(Debug, Clone)]
pub struct DenseLu<V: Vector> {
    lu: LU<Scalar, Dyn, Dyn>,
    n: IndexType,
    _phantom: PhantomData<V>,
}

impl<V: Vector> Factorization<V> for DenseLu<V> {
    fn nrows(&self) -> IndexType {
        self.n
    }

    fn solve_in_place(&self, b: &mut V) -> Result<(), IvpsolError> {
        self.check_rhs(b)?;
        let n = b.len();
        let mut b = DVectorViewMut::from_slice(b.as_mut_slice(), n);
        if !self.lu.solve_mut(&mut b) {
            return Err(linear_solver_error!(SingularMatrix, column: 0));
        }
        Ok(())
    }
}

impl<V: Vector> Matrix for DenseMatrix<V> {
    type V = V;
    type Factorization = DenseLu<V>;

    fn zeros(nrows: IndexType, ncols: IndexType) -> Self {
        Self::from_nalgebra(DMatrix::zeros(nrows, ncols))
    }

    fn new_from_pattern(
        nrows: IndexType,
        ncols: IndexType,
        pattern: &[(IndexType, IndexType)],
    ) -> Result<Self, IvpsolError> {
        let ret = Self::zeros(nrows, ncols);
        for &(i, j) in pattern {
            ret.check_index(i, j)?;
        }
        Ok(ret)
    }

    fn is_sparse() -> bool {
        false
    }

    fn nrows(&self) -> IndexType {
        self.data.nrows()
    }

    fn ncols(&self) -> IndexType {
        self.data.ncols()
    }

    fn pattern(&self) -> Vec<(IndexType, IndexType)> {
        let mut ret = Vec::with_capacity(self.data.len());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                ret.push((i, j));
            }
        }
        ret
    }

    fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    fn get_entry(&self, i: IndexType, j: IndexType) -> Result<Scalar, IvpsolError> {
        self.check_index(i, j)?;
        Ok(self.data[(i, j)])
    }

    fn set_entry(&mut self, i: IndexType, j: IndexType, value: Scalar) -> Result<(), IvpsolError> {
        self.check_index(i, j)?;
        self.data[(i, j)] = value;
        Ok(())
    }

    fn scale(&mut self, alpha: Scalar) {
        self.data *= alpha;
    }

    fn gemv(&self, alpha: Scalar, x: &V, beta: Scalar, y: &mut V) -> Result<(), IvpsolError> {
        self.check_gemv(x, y)?;
        let x = DVectorView::from_slice(x.as_slice(), self.ncols());
        let mut y = DVectorViewMut::from_slice(y.as_mut_slice(), self.nrows());
        y.gemv(alpha, &self.data, &x, beta);
        Ok(())
    }

    fn factorize(&self) -> Result<DenseLu<V>, IvpsolError> {
        self.check_square()?;
        let lu = self.data.clone().lu();
        let u = lu.u();
        if let Some(column) = (0..u.nrows()).find(|&i| {
            let pivot = u[(i, i)];
            pivot == 0.0 || !pivot.is_finite()
        }) {
            return Err(linear_solver_error!(SingularMatrix, column: column));
        }
        Ok(DenseLu {
            lu,
            n: self.nrows(),
            _phantom: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::matrix::tests::{check_matrix_contract, check_solve_round_trip, lcg_sequence};

    #[test]
    fn dense_contract() {
        check_matrix_contract::<DenseMatrix>();
    }

    #[test]
    fn random_dense_solve_round_trip() {
        for (seed, n) in [(3, 2), (5, 7), (11, 20)] {
            let mut m = DMatrix::from_vec(n, n, lcg_sequence(seed, n * n));
            // shift the diagonal so the random matrix is safely nonsingular
            for i in 0..n {
                m[(i, i)] += n as f64;
            }
            let m = DenseMatrix::<DVector<f64>>::from_nalgebra(m);
            let b = DVector::from_vec(lcg_sequence(seed + 1, n));
            check_solve_round_trip(&m, &b, 1e-10);
        }
    }

    #[test]
    fn singular_column_is_reported() {
        let m = DenseMatrix::<DVector<f64>>::from_triplets(
            2,
            2,
            &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 4.0)],
        )
        .unwrap();
        let err = m.factorize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SingularMatrix);
    }

    #[test]
    fn out_of_bounds_entry() {
        let mut m = DenseMatrix::<DVector<f64>>::zeros(2, 2);
        let err = m.set_entry(2, 0, 1.0).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Matrix error: Index (2, 0) out of bounds for a 2x2 matrix");
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn dense_with_parallel_vector() {
        use crate::vector::ParallelVector;
        let m = DenseMatrix::<ParallelVector>::from_triplets(
            2,
            2,
            &[(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)],
        )
        .unwrap();
        let b = ParallelVector::from_vec(vec![3.0, 3.0]);
        let x = m.factorize().unwrap().solve(&b).unwrap();
        x.assert_eq_st(&ParallelVector::from_vec(vec![1.0, 1.0]), 1e-15);
    }
}
