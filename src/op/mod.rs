use serde::Serialize;

use crate::error::IvpsolError;
use crate::{Matrix, Scalar, Vector};

pub mod bdf;
pub mod closure;
pub mod init;

/// A generic operator trait.
///
/// An operator maps an input vector `x` of length [Op::nstates] to an output vector `y` of
/// length [Op::nout], and fixes the vector and matrix types used to do so.
pub trait Op {
    type V: Vector;
    type M: Matrix<V = Self::V>;

    /// Return the number of input states of the operator.
    fn nstates(&self) -> usize;

    /// Return the number of outputs of the operator.
    fn nout(&self) -> usize;

    /// Return statistics about the operator (e.g. how many times it was called, how many times the jacobian was computed, etc.)
    fn statistics(&self) -> OpStatistics {
        OpStatistics::default()
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OpStatistics {
    pub number_of_calls: usize,
    pub number_of_jac_muls: usize,
    pub number_of_matrix_evals: usize,
}

impl OpStatistics {
    pub fn increment_call(&mut self) {
        self.number_of_calls += 1;
    }

    pub fn increment_jac_mul(&mut self) {
        self.number_of_jac_muls += 1;
    }

    pub fn increment_matrix(&mut self) {
        self.number_of_matrix_evals += 1;
    }
}

/// An operator `F` that maps `x` to `y = F(x, t)`.
pub trait NonLinearOp: Op {
    /// Compute the operator `F(x, t)` at a given state and time.
    fn call_inplace(&self, x: &Self::V, t: Scalar, y: &mut Self::V) -> Result<(), IvpsolError>;

    /// Compute the operator `F(x, t)` at a given state and time, and return the result.
    /// Use [Self::call_inplace] for a non-allocating version.
    fn call(&self, x: &Self::V, t: Scalar) -> Result<Self::V, IvpsolError> {
        let mut y = Self::V::zeros(self.nout());
        self.call_inplace(x, t, &mut y)?;
        Ok(y)
    }
}

/// A [NonLinearOp] whose Jacobian `J = dF/dx` is available, either through its action on a
/// vector or as a matrix.
pub trait NonLinearOpJacobian: NonLinearOp {
    /// Compute the product of the Jacobian with a given vector `J(x, t) * v`.
    fn jac_mul_inplace(
        &self,
        x: &Self::V,
        t: Scalar,
        v: &Self::V,
        y: &mut Self::V,
    ) -> Result<(), IvpsolError>;

    /// Compute the product of the Jacobian with a given vector `J(x, t) * v`, and return the result.
    fn jac_mul(&self, x: &Self::V, t: Scalar, v: &Self::V) -> Result<Self::V, IvpsolError> {
        let mut y = Self::V::zeros(self.nout());
        self.jac_mul_inplace(x, t, v, &mut y)?;
        Ok(y)
    }

    /// The structural non-zeros of the Jacobian (if known).
    fn jacobian_sparsity(&self) -> Option<Vec<(usize, usize)>> {
        None
    }

    /// A zero matrix with the structure of the Jacobian.
    fn jacobian_template(&self) -> Result<Self::M, IvpsolError> {
        match self.jacobian_sparsity() {
            Some(pattern) => Self::M::new_from_pattern(self.nout(), self.nstates(), &pattern),
            None => Self::M::new_from_pattern(
                self.nout(),
                self.nstates(),
                &dense_pattern(self.nout(), self.nstates()),
            ),
        }
    }

    /// Compute the Jacobian matrix `J(x, t)` of the operator and store it in the matrix `y`.
    /// `y` should have been created with [Self::jacobian_template].
    /// The default implementation of this method computes the Jacobian using [Self::jac_mul_inplace],
    /// but it can be overriden for more efficient implementations.
    fn jacobian_inplace(
        &self,
        x: &Self::V,
        t: Scalar,
        y: &mut Self::M,
    ) -> Result<(), IvpsolError> {
        self._default_jacobian_inplace(x, t, y)
    }

    /// Default implementation of the Jacobian computation (this is the default for [Self::jacobian_inplace]).
    /// Only the entries stored in `y` are written.
    fn _default_jacobian_inplace(
        &self,
        x: &Self::V,
        t: Scalar,
        y: &mut Self::M,
    ) -> Result<(), IvpsolError> {
        let pattern = y.pattern();
        let mut v = Self::V::zeros(self.nstates());
        let mut col = Self::V::zeros(self.nout());
        let mut entries = pattern.iter().peekable();
        for j in 0..self.nstates() {
            v[j] = 1.0;
            self.jac_mul_inplace(x, t, &v, &mut col)?;
            while let Some(&&(i, jj)) = entries.peek() {
                if jj != j {
                    break;
                }
                y.set_entry(i, j, col[i])?;
                entries.next();
            }
            v[j] = 0.0;
        }
        Ok(())
    }

    /// Compute the Jacobian matrix `J(x, t)` of the operator and return it.
    /// See [Self::jacobian_inplace] for a non-allocating version.
    fn jacobian(&self, x: &Self::V, t: Scalar) -> Result<Self::M, IvpsolError> {
        let mut y = self.jacobian_template()?;
        self.jacobian_inplace(x, t, &mut y)?;
        Ok(y)
    }
}

/// Every `(i, j)` of an `nrows x ncols` matrix in column-major order.
fn dense_pattern(nrows: usize, ncols: usize) -> Vec<(usize, usize)> {
    (0..ncols)
        .flat_map(|j| (0..nrows).map(move |i| (i, j)))
        .collect()
}
