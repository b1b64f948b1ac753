use log::trace;

use crate::error::IvpsolError;
use crate::matrix::Factorization;
use crate::{linear_solver_error, Matrix, NonLinearOpJacobian, Scalar, Vector};

use super::{LinearSolveSolution, LinearSolver};

/// A [LinearSolver] that assembles the Jacobian into a matrix of type `M` and factorizes it
/// with the matrix's own LU decomposition (dense, band or sparse).
#[derive(Debug, Clone)]
pub struct DirectSolver<M: Matrix> {
    matrix: Option<M>,
    lu: Option<M::Factorization>,
}

impl<M: Matrix> Default for DirectSolver<M> {
    fn default() -> Self {
        Self {
            matrix: None,
            lu: None,
        }
    }
}

impl<M: Matrix> DirectSolver<M> {
    /// Factorize `a` for subsequent calls to [Self::solve_system].
    pub fn setup(&mut self, a: &M) -> Result<(), IvpsolError> {
        a.check_square()?;
        self.lu = None;
        let lu = a.factorize()?;
        self.matrix = Some(a.clone());
        self.lu = Some(lu);
        Ok(())
    }

    /// Solve `Ax = b` with the matrix given to [Self::setup] (or assembled by the last
    /// linearisation), reporting the achieved residual.
    pub fn solve_system(&self, b: &M::V) -> Result<LinearSolveSolution<M::V>, IvpsolError> {
        let (matrix, lu) = match (self.matrix.as_ref(), self.lu.as_ref()) {
            (Some(matrix), Some(lu)) => (matrix, lu),
            _ => return Err(linear_solver_error!(LinearSolverNotSetup)),
        };
        let x = lu.solve(b)?;
        let mut r = b.clone();
        matrix.gemv(-1.0, &x, 1.0, &mut r)?;
        Ok(LinearSolveSolution {
            x,
            residual_norm: r.norm(),
            iterations: 0,
        })
    }

    /// The most recently assembled matrix.
    pub fn matrix(&self) -> Option<&M> {
        self.matrix.as_ref()
    }
}

impl<M: Matrix> LinearSolver<M> for DirectSolver<M> {
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError> {
        self.matrix = Some(op.jacobian_template()?);
        self.lu = None;
        Ok(())
    }

    fn clear_problem(&mut self) {
        self.matrix = None;
        self.lu = None;
    }

    fn set_linearisation<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
    ) -> Result<(), IvpsolError> {
        if self.matrix.is_none() {
            self.set_problem(op)?;
        }
        self.lu = None;
        let matrix = match self.matrix.as_mut() {
            Some(m) => m,
            None => return Err(linear_solver_error!(LinearSolverNotSetup)),
        };
        matrix.fill_zero();
        op.jacobian_inplace(x, t, matrix)?;
        trace!("factorizing {}x{} matrix at t = {}", matrix.nrows(), matrix.ncols(), t);
        self.lu = Some(matrix.factorize()?);
        Ok(())
    }

    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &self,
        _op: &C,
        b: &mut M::V,
    ) -> Result<(), IvpsolError> {
        match self.lu.as_ref() {
            Some(lu) => lu.solve_in_place(b),
            None => Err(linear_solver_error!(LinearSolverNotSetup)),
        }
    }

    fn is_setup(&self) -> bool {
        self.lu.is_some()
    }
}
