use crate::error::IvpsolError;
use crate::linear_solver::AnyLinearSolver;
use crate::{Matrix, NonLinearOpJacobian, Scalar};

pub mod convergence;
pub mod fixed_point;
pub mod line_search;
pub mod newton;
pub mod root;

pub use convergence::{Convergence, ConvergenceStatus};
pub use fixed_point::FixedPointSolver;
pub use line_search::{BacktrackingLineSearch, LineSearch, NoLineSearch};
pub use newton::NewtonNonlinearSolver;
pub use root::RootFinder;

/// Where a nonlinear solve currently stands. `Converged`, `Diverged` and `MaxIters` are terminal
/// until the next call to [NonLinearSolver::solve_in_place].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonLinearSolverStatus {
    Init,
    Iterating,
    Converged,
    Diverged,
    MaxIters,
}

/// A solver for the nonlinear problem `F(x) = 0`.
pub trait NonLinearSolver<M: Matrix>: Default {
    /// Set the problem to be solved, any previous problem is discarded.
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError>;

    /// Has the Jacobian been set since the last [Self::clear_jacobian]?
    fn is_jacobian_set(&self) -> bool;

    /// Request that the Jacobian be evaluated at `(x, t)` before the next iteration.
    fn reset_jacobian<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
    );

    /// Forget the current Jacobian, the next solve fails until [Self::reset_jacobian] is called.
    fn clear_jacobian(&mut self);

    fn status(&self) -> NonLinearSolverStatus;

    /// Does this solver use the Jacobian of the problem at all?
    fn requires_jacobian(&self) -> bool;

    fn number_of_linear_iterations(&self) -> usize {
        0
    }

    /// Solve `F(x) = 0` in place, starting from the value of `x`. `error_y` supplies the
    /// weights of the convergence norm.
    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &mut M::V,
        t: Scalar,
        error_y: &M::V,
        convergence: &mut Convergence<'_, M::V>,
    ) -> Result<(), IvpsolError>;

    fn solve<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
        error_y: &M::V,
        convergence: &mut Convergence<'_, M::V>,
    ) -> Result<M::V, IvpsolError> {
        let mut x = x.clone();
        self.solve_in_place(op, &mut x, t, error_y, convergence)?;
        Ok(x)
    }
}

/// Nonlinear solver chosen at run time.
pub enum AnyNonLinearSolver<M: Matrix> {
    Newton(NewtonNonlinearSolver<M, AnyLinearSolver<M>>),
    FixedPoint(FixedPointSolver<M>),
}

impl<M: Matrix> Default for AnyNonLinearSolver<M> {
    fn default() -> Self {
        Self::Newton(NewtonNonlinearSolver::default())
    }
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $body:expr) => {
        match $self {
            AnyNonLinearSolver::Newton($s) => $body,
            AnyNonLinearSolver::FixedPoint($s) => $body,
        }
    };
}

impl<M: Matrix> NonLinearSolver<M> for AnyNonLinearSolver<M> {
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError> {
        dispatch!(self, s => s.set_problem(op))
    }

    fn is_jacobian_set(&self) -> bool {
        dispatch!(self, s => s.is_jacobian_set())
    }

    fn reset_jacobian<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
    ) {
        dispatch!(self, s => s.reset_jacobian(op, x, t))
    }

    fn clear_jacobian(&mut self) {
        dispatch!(self, s => s.clear_jacobian())
    }

    fn status(&self) -> NonLinearSolverStatus {
        dispatch!(self, s => s.status())
    }

    fn requires_jacobian(&self) -> bool {
        dispatch!(self, s => s.requires_jacobian())
    }

    fn number_of_linear_iterations(&self) -> usize {
        dispatch!(self, s => s.number_of_linear_iterations())
    }

    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &mut M::V,
        t: Scalar,
        error_y: &M::V,
        convergence: &mut Convergence<'_, M::V>,
    ) -> Result<(), IvpsolError> {
        dispatch!(self, s => s.solve_in_place(op, x, t, error_y, convergence))
    }
}
