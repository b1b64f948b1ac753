use std::marker::PhantomData;

use nalgebra::DVector;
use nalgebra_sparse::{pattern::SparsityPattern, CscMatrix};

use crate::error::IvpsolError;
use crate::{linear_solver_error, matrix_error, IndexType, Scalar, Vector};

use super::{Factorization, Matrix};

/// A sparse matrix in compressed sparse column format backed by nalgebra-sparse.
///
/// The pattern is fixed at construction. Square matrices always store their diagonal so that
/// shifted systems `diag(d) + c * A` keep the same structure.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<V: Vector = DVector<Scalar>> {
    data: CscMatrix<Scalar>,
    _phantom: PhantomData<V>,
}

impl<V: Vector> SparseMatrix<V> {
    pub fn from_csc(data: CscMatrix<Scalar>) -> Self {
        Self {
            data,
            _phantom: PhantomData,
        }
    }

    pub fn nnz(&self) -> usize {
        self.data.nnz()
    }

    fn position(&self, i: IndexType, j: IndexType) -> Option<usize> {
        let start = self.data.col_offsets()[j];
        let end = self.data.col_offsets()[j + 1];
        self.data.row_indices()[start..end]
            .binary_search(&i)
            .ok()
            .map(|k| start + k)
    }
}

impl<V: Vector> Matrix for SparseMatrix<V> {
    type V = V;
    type Factorization = SparseLu<V>;

    fn zeros(nrows: IndexType, ncols: IndexType) -> Self {
        Self::from_csc(CscMatrix::zeros(nrows, ncols))
    }

    fn new_from_pattern(
        nrows: IndexType,
        ncols: IndexType,
        pattern: &[(IndexType, IndexType)],
    ) -> Result<Self, IvpsolError> {
        let mut rows_per_col = vec![Vec::new(); ncols];
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
            rows_per_col[j].push(i);
        }
        if nrows == ncols {
            for (j, rows) in rows_per_col.iter_mut().enumerate() {
                rows.push(j);
            }
        }
        let mut col_offsets = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::new();
        col_offsets.push(0);
        for mut rows in rows_per_col {
            rows.sort_unstable();
            rows.dedup();
            row_indices.extend(rows);
            col_offsets.push(row_indices.len());
        }
        let nnz = row_indices.len();
        let pattern =
            SparsityPattern::try_from_offsets_and_indices(ncols, nrows, col_offsets, row_indices)
                .map_err(|e| matrix_error!(InvalidPattern, e))?;
        let data = CscMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .map_err(|e| matrix_error!(InvalidPattern, e))?;
        Ok(Self::from_csc(data))
    }

    fn is_sparse() -> bool {
        true
    }

    fn nrows(&self) -> IndexType {
        self.data.nrows()
    }

    fn ncols(&self) -> IndexType {
        self.data.ncols()
    }

    fn pattern(&self) -> Vec<(IndexType, IndexType)> {
        let offsets = self.data.col_offsets();
        let rows = self.data.row_indices();
        let mut ret = Vec::with_capacity(self.nnz());
        for j in 0..self.ncols() {
            for &i in &rows[offsets[j]..offsets[j + 1]] {
                ret.push((i, j));
            }
        }
        ret
    }

    fn fill_zero(&mut self) {
        self.data.values_mut().fill(0.0);
    }

    /// Entries outside the pattern are structural zeros.
    fn get_entry(&self, i: IndexType, j: IndexType) -> Result<Scalar, IvpsolError> {
        self.check_index(i, j)?;
        Ok(self
            .position(i, j)
            .map(|k| self.data.values()[k])
            .unwrap_or(0.0))
    }

    fn set_entry(&mut self, i: IndexType, j: IndexType, value: Scalar) -> Result<(), IvpsolError> {
        self.check_index(i, j)?;
        match self.position(i, j) {
            Some(k) => {
                self.data.values_mut()[k] = value;
                Ok(())
            }
            None => Err(matrix_error!(EntryNotInPattern, row: i, col: j)),
        }
    }

    fn add_to_entry(
        &mut self,
        i: IndexType,
        j: IndexType,
        value: Scalar,
    ) -> Result<(), IvpsolError> {
        self.check_index(i, j)?;
        match self.position(i, j) {
            Some(k) => {
                self.data.values_mut()[k] += value;
                Ok(())
            }
            None => Err(matrix_error!(EntryNotInPattern, row: i, col: j)),
        }
    }

    fn scale(&mut self, alpha: Scalar) {
        self.data.values_mut().iter_mut().for_each(|x| *x *= alpha);
    }

    fn gemv(&self, alpha: Scalar, x: &V, beta: Scalar, y: &mut V) -> Result<(), IvpsolError> {
        self.check_gemv(x, y)?;
        if beta == 0.0 {
            y.fill(0.0);
        } else {
            y.scale_mut(beta);
        }
        let offsets = self.data.col_offsets();
        let rows = self.data.row_indices();
        let values = self.data.values();
        let ys = y.as_mut_slice();
        for (j, &xj) in x.as_slice().iter().enumerate() {
            let axj = alpha * xj;
            if axj == 0.0 {
                continue;
            }
            for k in offsets[j]..offsets[j + 1] {
                ys[rows[k]] += values[k] * axj;
            }
        }
        Ok(())
    }

    fn factorize(&self) -> Result<SparseLu<V>, IvpsolError> {
        self.check_square()?;
        SparseLu::new(&self.data)
    }
}

/// Left-looking sparse LU factorization with partial row pivoting.
///
/// Columns are eliminated in order of increasing non-zero count to limit fill-in. The result
/// satisfies `A Q = M U`, where `Q` is the column ordering, `U` is upper triangular in
/// elimination order and `M` is unit lower triangular after permuting its rows by the pivot
/// sequence.
#[derive(Debug, Clone)]
pub struct SparseLu<V: Vector> {
    n: IndexType,
    col_order: Vec<IndexType>,
    pivot_row: Vec<IndexType>,
    // multipliers of each elimination step, keyed by original row
    l_cols: Vec<Vec<(IndexType, Scalar)>>,
    // strictly upper part of each column, keyed by elimination step
    u_cols: Vec<Vec<(IndexType, Scalar)>>,
    u_diag: Vec<Scalar>,
    _phantom: PhantomData<V>,
}

impl<V: Vector> SparseLu<V> {
    fn new(a: &CscMatrix<Scalar>) -> Result<Self, IvpsolError> {
        let n = a.ncols();
        let offsets = a.col_offsets();
        let rows = a.row_indices();
        let values = a.values();

        let mut col_order: Vec<IndexType> = (0..n).collect();
        col_order.sort_by_key(|&j| offsets[j + 1] - offsets[j]);

        let mut pivot_row = Vec::with_capacity(n);
        let mut row_step: Vec<Option<IndexType>> = vec![None; n];
        let mut l_cols = Vec::with_capacity(n);
        let mut u_cols = Vec::with_capacity(n);
        let mut u_diag = Vec::with_capacity(n);
        let mut work = vec![0.0; n];

        for (step, &j) in col_order.iter().enumerate() {
            for k in offsets[j]..offsets[j + 1] {
                work[rows[k]] = values[k];
            }

            let mut u_col = Vec::new();
            for (k, &r) in pivot_row.iter().enumerate().take(step) {
                let u = work[r];
                if u == 0.0 {
                    continue;
                }
                work[r] = 0.0;
                let l_col: &Vec<(IndexType, Scalar)> = &l_cols[k];
                for &(i, l) in l_col {
                    work[i] -= l * u;
                }
                u_col.push((k, u));
            }

            let mut p = None;
            let mut max_val = 0.0;
            for (i, w) in work.iter().enumerate() {
                if row_step[i].is_none() && w.abs() > max_val {
                    max_val = w.abs();
                    p = Some(i);
                }
            }
            let p = match p {
                Some(p) if max_val.is_finite() => p,
                _ => return Err(linear_solver_error!(SingularMatrix, column: j)),
            };

            let pivot = work[p];
            work[p] = 0.0;
            let mut l_col = Vec::new();
            for (i, w) in work.iter_mut().enumerate() {
                if *w != 0.0 {
                    if row_step[i].is_none() {
                        l_col.push((i, *w / pivot));
                    }
                    *w = 0.0;
                }
            }
            row_step[p] = Some(step);
            pivot_row.push(p);
            l_cols.push(l_col);
            u_cols.push(u_col);
            u_diag.push(pivot);
        }

        Ok(Self {
            n,
            col_order,
            pivot_row,
            l_cols,
            u_cols,
            u_diag,
            _phantom: PhantomData,
        })
    }

    /// Number of stored entries in the factors, including the diagonal of `U`.
    pub fn nnz(&self) -> usize {
        self.n
            + self.l_cols.iter().map(Vec::len).sum::<usize>()
            + self.u_cols.iter().map(Vec::len).sum::<usize>()
    }
}

impl<V: Vector> Factorization<V> for SparseLu<V> {
    fn nrows(&self) -> IndexType {
        self.n
    }

    fn solve_in_place(&self, b: &mut V) -> Result<(), IvpsolError> {
        self.check_rhs(b)?;
        let b = b.as_mut_slice();

        // forward: M y = b
        let mut y = vec![0.0; self.n];
        for (k, &r) in self.pivot_row.iter().enumerate() {
            let yk = b[r];
            y[k] = yk;
            if yk != 0.0 {
                for &(i, l) in &self.l_cols[k] {
                    b[i] -= l * yk;
                }
            }
        }

        // backward: U z = y
        for k in (0..self.n).rev() {
            let zk = y[k] / self.u_diag[k];
            y[k] = zk;
            if zk != 0.0 {
                for &(i, u) in &self.u_cols[k] {
                    y[i] -= u * zk;
                }
            }
        }

        // x = Q z
        for (k, &j) in self.col_order.iter().enumerate() {
            b[j] = y[k];
        }
        Ok(())
    }
}
