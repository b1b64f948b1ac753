use log::{debug, trace};

use crate::error::IvpsolError;
use crate::linear_solver::LinearSolver;
use crate::vector::check_length;
use crate::{non_linear_solver_error, Matrix, NonLinearOpJacobian, Scalar, Vector};

use super::convergence::{Convergence, ConvergenceStatus};
use super::line_search::{BacktrackingLineSearch, LineSearch};
use super::{NonLinearSolver, NonLinearSolverStatus};

/// Damped Newton iteration for `F(x) = 0`.
///
/// Each iteration solves `J delta = F(x)` with the linear solver `Ls` (`J` is only refreshed by
/// [NonLinearSolver::reset_jacobian], so this is a modified Newton method between refreshes) and
/// lets the line search `L` pick how far to move along `-delta`.
pub struct NewtonNonlinearSolver<
    M: Matrix,
    Ls: LinearSolver<M>,
    L: LineSearch<M::V> = BacktrackingLineSearch<<M as Matrix>::V>,
> {
    linear_solver: Ls,
    line_search: L,
    pending_linearisation: Option<(M::V, Scalar)>,
    is_jacobian_set: bool,
    status: NonLinearSolverStatus,
    tmp: M::V,
}

impl<M: Matrix, Ls: LinearSolver<M>, L: LineSearch<M::V>> NewtonNonlinearSolver<M, Ls, L> {
    pub fn new(linear_solver: Ls) -> Self {
        Self {
            linear_solver,
            line_search: L::default(),
            pending_linearisation: None,
            is_jacobian_set: false,
            status: NonLinearSolverStatus::Init,
            tmp: M::V::zeros(0),
        }
    }

    pub fn with_line_search(mut self, line_search: L) -> Self {
        self.line_search = line_search;
        self
    }

    fn linearise_if_pending<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError> {
        if let Some((x, t)) = self.pending_linearisation.take() {
            trace!("newton: linearising at t = {}", t);
            self.linear_solver.set_linearisation(op, &x, t)?;
        }
        Ok(())
    }
}

impl<M: Matrix, Ls: LinearSolver<M>, L: LineSearch<M::V>> Default
    for NewtonNonlinearSolver<M, Ls, L>
{
    fn default() -> Self {
        Self::new(Ls::default())
    }
}

impl<M: Matrix, Ls: LinearSolver<M>, L: LineSearch<M::V>> NonLinearSolver<M>
    for NewtonNonlinearSolver<M, Ls, L>
{
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError> {
        self.linear_solver.set_problem(op)?;
        self.pending_linearisation = None;
        self.is_jacobian_set = false;
        self.status = NonLinearSolverStatus::Init;
        self.tmp = M::V::zeros(op.nstates());
        Ok(())
    }

    fn is_jacobian_set(&self) -> bool {
        self.is_jacobian_set
    }

    fn reset_jacobian<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        _op: &C,
        x: &M::V,
        t: Scalar,
    ) {
        self.pending_linearisation = Some((x.clone(), t));
        self.is_jacobian_set = true;
    }

    fn clear_jacobian(&mut self) {
        self.pending_linearisation = None;
        self.is_jacobian_set = false;
    }

    fn status(&self) -> NonLinearSolverStatus {
        self.status
    }

    fn requires_jacobian(&self) -> bool {
        true
    }

    fn number_of_linear_iterations(&self) -> usize {
        self.linear_solver.number_of_linear_iterations()
    }

    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &mut M::V,
        t: Scalar,
        error_y: &M::V,
        convergence: &mut Convergence<'_, M::V>,
    ) -> Result<(), IvpsolError> {
        self.status = NonLinearSolverStatus::Init;
        if !self.is_jacobian_set {
            return Err(non_linear_solver_error!(JacobianNotReset));
        }
        if x.len() != op.nstates() {
            return Err(non_linear_solver_error!(
                WrongStateLength,
                expected: op.nstates(),
                found: x.len()
            ));
        }
        check_length(x.len(), error_y.len())?;
        if self.tmp.len() != x.len() {
            self.tmp = M::V::zeros(x.len());
        }
        if let Err(err) = self.linearise_if_pending(op) {
            self.status = NonLinearSolverStatus::Diverged;
            return Err(err);
        }

        convergence.reset();
        self.status = NonLinearSolverStatus::Iterating;
        let linear_solver = &self.linear_solver;
        let solve = |b: &mut M::V| linear_solver.solve_in_place(op, b);
        let fun = |x: &M::V, y: &mut M::V| op.call_inplace(x, t, y);

        let delta = &mut self.tmp;
        fun(x, delta)?;
        solve(delta)?;
        let mut norm = convergence.norm(delta, error_y)?;
        loop {
            match convergence.check_new_iteration(norm) {
                ConvergenceStatus::Continue => {}
                ConvergenceStatus::Converged => {
                    x.axpy(-1.0, delta, 1.0)?;
                    self.status = NonLinearSolverStatus::Converged;
                    return Ok(());
                }
                ConvergenceStatus::Diverged => {
                    debug!("newton diverged after {} iterations", convergence.niter());
                    self.status = NonLinearSolverStatus::Diverged;
                    return Err(non_linear_solver_error!(
                        NoConvergence,
                        iterations: convergence.niter()
                    ));
                }
                ConvergenceStatus::MaximumIterations => {
                    debug!("newton reached {} iterations", convergence.niter());
                    self.status = NonLinearSolverStatus::MaxIters;
                    return Err(non_linear_solver_error!(
                        NoConvergence,
                        iterations: convergence.niter()
                    ));
                }
            }
            let step = self.line_search.take_step(
                x,
                &mut norm,
                delta,
                error_y,
                &fun,
                &solve,
                convergence,
            );
            if let Err(err) = step {
                self.status = NonLinearSolverStatus::Diverged;
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::error::ErrorKind;
    use crate::linear_solver::{DirectSolver, KrylovMethod, KrylovSolver};
    use crate::matrix::DenseMatrix;
    use crate::nonlinear_solver::line_search::{BacktrackingLineSearch, NoLineSearch};
    use crate::nonlinear_solver::tests::{check_nonlinear_solver, square_problem};
    use crate::op::closure::Closure;
    use nalgebra::DVector;

    type M = DenseMatrix;

    type Newton = NewtonNonlinearSolver<M, DirectSolver<M>>;

    #[test]
    fn newton_direct_square() {
        check_nonlinear_solver(Newton::default());
    }

    #[test]
    fn newton_krylov_square() {
        let solver: NewtonNonlinearSolver<M, KrylovSolver<M>> =
            NewtonNonlinearSolver::new(KrylovSolver::new(KrylovMethod::Gmres));
        check_nonlinear_solver(solver);
    }

    #[test]
    fn newton_without_line_search() {
        let solver = NewtonNonlinearSolver::<M, DirectSolver<M>, NoLineSearch>::default();
        check_nonlinear_solver(solver);
    }

    #[test]
    fn newton_with_shorter_backtracking() {
        let mut line_search = BacktrackingLineSearch::default();
        line_search.tau = 0.25;
        check_nonlinear_solver(Newton::default().with_line_search(line_search));
    }

    #[test]
    fn requires_reset_jacobian() {
        let (op, rtol, atol, x0, _) = square_problem();
        let mut solver = Newton::default();
        solver.set_problem(&op).unwrap();
        let mut convergence = Convergence::new(rtol, &atol);
        let err = solver
            .solve(&op, &x0, 0.0, &x0, &mut convergence)
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Non-linear solver error: Jacobian not reset before calling solve");

        solver.reset_jacobian(&op, &x0, 0.0);
        let err = solver
            .solve(&op, &DVector::zeros(3), 0.0, &x0, &mut convergence)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[test]
    fn linear_problem_needs_two_small_corrections() {
        // F(x) = 2x - 4: the first Newton step is exact, but convergence is only declared
        // after a second (zero) correction confirms it
        let calls = Rc::new(Cell::new(0));
        let calls_f = calls.clone();
        let op = Closure::<M>::new(
            move |x: &DVector<f64>, _p: &DVector<f64>, _t, y: &mut DVector<f64>| {
                calls_f.set(calls_f.get() + 1);
                y[0] = 2.0 * x[0] - 4.0;
            },
            1,
            1,
        )
        .with_jacobian_action(
            |_x: &DVector<f64>, _p: &DVector<f64>, _t, v: &DVector<f64>, y: &mut DVector<f64>| {
                y[0] = 2.0 * v[0];
            },
        );
        let atol = DVector::from_element(1, 1e-8);
        let mut convergence = Convergence::new(1e-8, &atol);
        let mut solver = Newton::default();
        solver.set_problem(&op).unwrap();
        let x0 = DVector::from_element(1, 10.0);
        solver.reset_jacobian(&op, &x0, 0.0);
        let x = solver.solve(&op, &x0, 0.0, &x0, &mut convergence).unwrap();
        assert_eq!(x[0], 2.0);
        assert_eq!(convergence.niter(), 3);
        assert_eq!(solver.status(), NonLinearSolverStatus::Converged);
        assert_eq!(calls.get(), 3);
    }
}
