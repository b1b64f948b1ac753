use std::marker::PhantomData;

use nalgebra::DVector;

use crate::error::IvpsolError;
use crate::{linear_solver_error, matrix_error, IndexType, Scalar, Vector};

use super::{Factorization, Matrix};

/// A square band matrix with `lower` sub-diagonals and `upper` super-diagonals.
///
/// Storage is column-major with room for `lower` extra super-diagonals, so that the LU
/// factorization with row pivoting can be computed without reallocating. Entry `(i, j)` of
/// the stored band lives at `data[j * ldim + i + smu - j]`, where `smu = min(n - 1, lower + upper)`
/// and `ldim = smu + lower + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMatrix<V: Vector = DVector<Scalar>> {
    n: IndexType,
    lower: IndexType,
    upper: IndexType,
    smu: IndexType,
    ldim: IndexType,
    data: Vec<Scalar>,
    _phantom: PhantomData<V>,
}

impl<V: Vector> BandMatrix<V> {
    pub fn new(n: IndexType, lower: IndexType, upper: IndexType) -> Self {
        let max_band = n.saturating_sub(1);
        let lower = lower.min(max_band);
        let upper = upper.min(max_band);
        let smu = (lower + upper).min(max_band);
        let ldim = smu + lower + 1;
        Self {
            n,
            lower,
            upper,
            smu,
            ldim,
            data: vec![0.0; ldim * n],
            _phantom: PhantomData,
        }
    }

    pub fn lower_bandwidth(&self) -> IndexType {
        self.lower
    }

    pub fn upper_bandwidth(&self) -> IndexType {
        self.upper
    }

    fn in_band(&self, i: IndexType, j: IndexType) -> bool {
        i <= j + self.lower && j <= i + self.upper
    }

    fn check_band(&self, i: IndexType, j: IndexType) -> Result<(), IvpsolError> {
        self.check_index(i, j)?;
        if !self.in_band(i, j) {
            return Err(matrix_error!(
                BandwidthViolation,
                row: i,
                col: j,
                lower: self.lower,
                upper: self.upper
            ));
        }
        Ok(())
    }

    #[inline]
    fn offset(&self, i: IndexType, j: IndexType) -> usize {
        j * self.ldim + i + self.smu - j
    }
}

/// LU factorization of a [BandMatrix] with partial pivoting.
///
/// The multipliers are stored in the sub-diagonals and the row interchanges are applied
/// column by column during the forward solve.
#[derive(Debug, Clone)]
pub struct BandLu<V: Vector> {
    lu: BandMatrix<V>,
    pivots: Vec<IndexType>,
}

impl<V: Vector> BandLu<V> {
    fn new(mut lu: BandMatrix<V>) -> Result<Self, IvpsolError> {
        let n = lu.n;
        let ml = lu.lower;
        let smu = lu.smu;
        let mut pivots = vec![0; n];
        for k in 0..n {
            let last_row = (k + ml).min(n - 1);
            let last_col = (k + smu).min(n - 1);

            let mut p = k;
            let mut max_val = lu.data[lu.offset(k, k)].abs();
            for i in k + 1..=last_row {
                let val = lu.data[lu.offset(i, k)].abs();
                if val > max_val {
                    max_val = val;
                    p = i;
                }
            }
            pivots[k] = p;
            if max_val == 0.0 || !max_val.is_finite() {
                return Err(linear_solver_error!(SingularMatrix, column: k));
            }

            if p != k {
                for j in k..=last_col {
                    let (a, b) = (lu.offset(k, j), lu.offset(p, j));
                    lu.data.swap(a, b);
                }
            }

            let pivot = lu.data[lu.offset(k, k)];
            for i in k + 1..=last_row {
                let idx = lu.offset(i, k);
                lu.data[idx] /= pivot;
            }

            for j in k + 1..=last_col {
                let akj = lu.data[lu.offset(k, j)];
                if akj == 0.0 {
                    continue;
                }
                for i in k + 1..=last_row {
                    let lik = lu.data[lu.offset(i, k)];
                    let idx = lu.offset(i, j);
                    lu.data[idx] -= lik * akj;
                }
            }
        }
        Ok(Self { lu, pivots })
    }
}

impl<V: Vector> Factorization<V> for BandLu<V> {
    fn nrows(&self) -> IndexType {
        self.lu.n
    }

    fn solve_in_place(&self, b: &mut V) -> Result<(), IvpsolError> {
        self.check_rhs(b)?;
        let n = self.lu.n;
        let ml = self.lu.lower;
        let smu = self.lu.smu;
        let b = b.as_mut_slice();

        // forward: L^{-1} P b
        for k in 0..n {
            let p = self.pivots[k];
            if p != k {
                b.swap(k, p);
            }
            let bk = b[k];
            if bk != 0.0 {
                for i in k + 1..=(k + ml).min(n - 1) {
                    b[i] -= self.lu.data[self.lu.offset(i, k)] * bk;
                }
            }
        }

        // backward: U^{-1}
        for k in (0..n).rev() {
            b[k] /= self.lu.data[self.lu.offset(k, k)];
            let bk = b[k];
            if bk != 0.0 {
                for i in k.saturating_sub(smu)..k {
                    b[i] -= self.lu.data[self.lu.offset(i, k)] * bk;
                }
            }
        }
        Ok(())
    }
}

impl<V: Vector> Matrix for BandMatrix<V> {
    type V = V;
    type Factorization = BandLu<V>;

    /// A zero matrix with only the main diagonal in its band.
    fn zeros(nrows: IndexType, _ncols: IndexType) -> Self {
        Self::new(nrows, 0, 0)
    }

    /// The bandwidths are the smallest that contain every entry of `pattern`.
    fn new_from_pattern(
        nrows: IndexType,
        ncols: IndexType,
        pattern: &[(IndexType, IndexType)],
    ) -> Result<Self, IvpsolError> {
        if nrows != ncols {
            return Err(matrix_error!(NotSquare, nrows: nrows, ncols: ncols));
        }
        let mut lower = 0;
        let mut upper = 0;
        for &(i, j) in pattern {
            if i >= nrows || j >= ncols {
                return Err(matrix_error!(
                    IndexOutOfBounds,
                    row: i,
                    col: j,
                    nrows: nrows,
                    ncols: ncols
                ));
            }
            if i > j {
                lower = lower.max(i - j);
            } else {
                upper = upper.max(j - i);
            }
        }
        Ok(Self::new(nrows, lower, upper))
    }

    fn is_sparse() -> bool {
        true
    }

    fn nrows(&self) -> IndexType {
        self.n
    }

    fn ncols(&self) -> IndexType {
        self.n
    }

    fn pattern(&self) -> Vec<(IndexType, IndexType)> {
        let mut ret = Vec::new();
        for j in 0..self.n {
            let first = j.saturating_sub(self.upper);
            let last = (j + self.lower).min(self.n.saturating_sub(1));
            for i in first..=last {
                ret.push((i, j));
            }
        }
        ret
    }

    fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    fn get_entry(&self, i: IndexType, j: IndexType) -> Result<Scalar, IvpsolError> {
        self.check_band(i, j)?;
        Ok(self.data[self.offset(i, j)])
    }

    fn set_entry(&mut self, i: IndexType, j: IndexType, value: Scalar) -> Result<(), IvpsolError> {
        self.check_band(i, j)?;
        let idx = self.offset(i, j);
        self.data[idx] = value;
        Ok(())
    }

    fn add_to_entry(
        &mut self,
        i: IndexType,
        j: IndexType,
        value: Scalar,
    ) -> Result<(), IvpsolError> {
        self.check_band(i, j)?;
        let idx = self.offset(i, j);
        self.data[idx] += value;
        Ok(())
    }

    fn scale(&mut self, alpha: Scalar) {
        self.data.iter_mut().for_each(|x| *x *= alpha);
    }

    fn gemv(&self, alpha: Scalar, x: &V, beta: Scalar, y: &mut V) -> Result<(), IvpsolError> {
        self.check_gemv(x, y)?;
        if beta == 0.0 {
            y.fill(0.0);
        } else {
            y.scale_mut(beta);
        }
        let xs = x.as_slice();
        let ys = y.as_mut_slice();
        for (j, &xj) in xs.iter().enumerate() {
            let axj = alpha * xj;
            if axj == 0.0 {
                continue;
            }
            let first = j.saturating_sub(self.upper);
            let last = (j + self.lower).min(self.n - 1);
            for (i, yi) in ys.iter_mut().enumerate().take(last + 1).skip(first) {
                *yi += self.data[self.offset(i, j)] * axj;
            }
        }
        Ok(())
    }

    fn factorize(&self) -> Result<BandLu<V>, IvpsolError> {
        BandLu::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::matrix::tests::{check_matrix_contract, check_solve_round_trip, lcg_sequence};
    use crate::matrix::DenseMatrix;

    #[test]
    fn band_contract() {
        check_matrix_contract::<BandMatrix>();
    }

    #[test]
    fn wide_band_round_trip() {
        let n = 12;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 10.0));
            for d in 1..=3 {
                if i + d < n {
                    triplets.push((i + d, i, -1.0 / d as f64));
                    triplets.push((i, i + d, 2.0 / d as f64));
                }
            }
        }
        let m = BandMatrix::<DVector<f64>>::from_triplets(n, n, &triplets).unwrap();
        let b = DVector::from_vec(lcg_sequence(4, n));
        check_solve_round_trip(&m, &b, 1e-12);
    }

    #[test]
    fn out_of_band_access_fails() {
        let mut m = BandMatrix::<DVector<f64>>::new(5, 1, 2);
        m.set_entry(0, 2, 1.0).unwrap();
        m.set_entry(3, 2, 1.0).unwrap();

        let err = m.set_entry(4, 2, 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BandwidthViolation);
        insta::assert_snapshot!(err.to_string(), @"Matrix error: Entry (4, 2) is outside the band (lower = 1, upper = 2)");

        let err = m.get_entry(0, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BandwidthViolation);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn pivoting_band_solve_matches_dense() {
        // small diagonal entries force row interchanges, which fill the extra super-diagonals
        let n = 9;
        let (lower, upper) = (2, 1);
        let values = lcg_sequence(7, n * (lower + upper + 1));
        let mut triplets = Vec::new();
        let mut k = 0;
        for j in 0..n {
            for i in j.saturating_sub(upper)..=(j + lower).min(n - 1) {
                let v = if i == j { 1e-3 * values[k] } else { values[k] };
                triplets.push((i, j, v));
                k += 1;
            }
        }
        let band = BandMatrix::<DVector<f64>>::from_triplets(n, n, &triplets).unwrap();
        assert_eq!(band.lower_bandwidth(), lower);
        assert_eq!(band.upper_bandwidth(), upper);
        let dense = DenseMatrix::<DVector<f64>>::from_triplets(n, n, &triplets).unwrap();

        let b = DVector::from_vec(lcg_sequence(8, n));
        let x_band = band.factorize().unwrap().solve(&b).unwrap();
        let x_dense = dense.factorize().unwrap().solve(&b).unwrap();
        x_band.assert_eq_st(&x_dense, 1e-8 * Vector::max_abs(&x_dense));
    }

    #[test]
    fn pattern_lists_band_entries() {
        let m = BandMatrix::<DVector<f64>>::new(3, 1, 0);
        assert_eq!(m.pattern(), vec![(0, 0), (1, 0), (1, 1), (2, 1), (2, 2)]);
    }
}
