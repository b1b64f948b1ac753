use std::collections::VecDeque;

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use crate::error::IvpsolError;
use crate::vector::check_length;
use crate::{non_linear_solver_error, Matrix, NonLinearOpJacobian, Scalar, Vector};

use super::convergence::{Convergence, ConvergenceStatus};
use super::{NonLinearSolver, NonLinearSolverStatus};

/// Fixed-point iteration `x <- g(x) = x - F(x)` with Anderson acceleration.
///
/// With an acceleration depth `m > 0` the next iterate mixes the last `m + 1` values of `g`,
/// choosing the weights that minimise the norm of the mixed residual. Depth zero is plain
/// fixed-point iteration. Only converges when `g` is contractive, two consecutive increases of
/// the residual norm abort the solve with `DivergenceDetected`.
pub struct FixedPointSolver<M: Matrix> {
    depth: usize,
    status: NonLinearSolverStatus,
    df: VecDeque<M::V>,
    dg: VecDeque<M::V>,
    f: M::V,
    g: M::V,
    f_old: M::V,
    g_old: M::V,
}

impl<M: Matrix> Default for FixedPointSolver<M> {
    fn default() -> Self {
        Self::new(3)
    }
}

impl<M: Matrix> FixedPointSolver<M> {
    pub fn new(anderson_depth: usize) -> Self {
        Self {
            depth: anderson_depth,
            status: NonLinearSolverStatus::Init,
            df: VecDeque::with_capacity(anderson_depth),
            dg: VecDeque::with_capacity(anderson_depth),
            f: M::V::zeros(0),
            g: M::V::zeros(0),
            f_old: M::V::zeros(0),
            g_old: M::V::zeros(0),
        }
    }

    pub fn anderson_depth(&self) -> usize {
        self.depth
    }

    fn allocate(&mut self, n: usize) {
        self.df.clear();
        self.dg.clear();
        if self.f.len() != n {
            self.f = M::V::zeros(n);
            self.g = M::V::zeros(n);
            self.f_old = M::V::zeros(n);
            self.g_old = M::V::zeros(n);
        }
    }

    /// Append the latest differences of `f` and `g`, dropping the oldest pair once the history
    /// is full.
    fn push_history(&mut self) -> Result<(), IvpsolError> {
        let (mut df, mut dg) = if self.df.len() >= self.depth {
            match (self.df.pop_front(), self.dg.pop_front()) {
                (Some(df), Some(dg)) => (df, dg),
                _ => (M::V::zeros(self.f.len()), M::V::zeros(self.f.len())),
            }
        } else {
            (M::V::zeros(self.f.len()), M::V::zeros(self.f.len()))
        };
        df.copy_from(&self.f)?;
        df.axpy(-1.0, &self.f_old, 1.0)?;
        dg.copy_from(&self.g)?;
        dg.axpy(-1.0, &self.g_old, 1.0)?;
        self.df.push_back(df);
        self.dg.push_back(dg);
        Ok(())
    }

    /// Least-squares weights `gamma = argmin ||f - sum_i gamma_i df_i||`, from the normal
    /// equations. `None` if they cannot be solved reliably.
    fn mixing_weights(&self) -> Result<Option<DVector<Scalar>>, IvpsolError> {
        let m = self.df.len();
        let mut gram = DMatrix::<Scalar>::zeros(m, m);
        let mut rhs = DVector::<Scalar>::zeros(m);
        for i in 0..m {
            for j in 0..=i {
                let dot = self.df[i].dot(&self.df[j])?;
                gram[(i, j)] = dot;
                gram[(j, i)] = dot;
            }
            rhs[i] = self.df[i].dot(&self.f)?;
        }
        let max_diag = gram.diagonal().max();
        if max_diag <= 0.0 {
            return Ok(None);
        }
        for i in 0..m {
            gram[(i, i)] += 1e-10 * max_diag;
        }
        Ok(gram
            .lu()
            .solve(&rhs)
            .filter(|gamma| gamma.iter().all(|g| g.is_finite())))
    }
}

impl<M: Matrix> NonLinearSolver<M> for FixedPointSolver<M> {
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError> {
        check_length(op.nstates(), op.nout())?;
        self.allocate(op.nstates());
        self.status = NonLinearSolverStatus::Init;
        Ok(())
    }

    fn is_jacobian_set(&self) -> bool {
        true
    }

    fn reset_jacobian<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        _op: &C,
        _x: &M::V,
        _t: Scalar,
    ) {
    }

    fn clear_jacobian(&mut self) {}

    fn status(&self) -> NonLinearSolverStatus {
        self.status
    }

    fn requires_jacobian(&self) -> bool {
        false
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
        if x.len() != op.nstates() {
            return Err(non_linear_solver_error!(
                WrongStateLength,
                expected: op.nstates(),
                found: x.len()
            ));
        }
        check_length(x.len(), error_y.len())?;
        self.allocate(x.len());
        convergence.reset();
        self.status = NonLinearSolverStatus::Iterating;

        let mut have_old = false;
        loop {
            // f = -F(x), g = x + f
            op.call_inplace(x, t, &mut self.f)?;
            self.f.scale_mut(-1.0);
            self.g.copy_from(x)?;
            self.g.axpy(1.0, &self.f, 1.0)?;
            if have_old {
                self.push_history()?;
            }
            if self.depth > 0 {
                self.f_old.copy_from(&self.f)?;
                self.g_old.copy_from(&self.g)?;
                have_old = true;
            }
            let norm = convergence.norm(&self.f, error_y)?;

            x.copy_from(&self.g)?;
            if !self.df.is_empty() {
                match self.mixing_weights()? {
                    Some(gamma) => {
                        for (gamma_i, dg_i) in gamma.iter().zip(self.dg.iter()) {
                            x.axpy(-gamma_i, dg_i, 1.0)?;
                        }
                    }
                    None => {
                        trace!("fixed point: dropping Anderson history");
                        self.df.clear();
                        self.dg.clear();
                    }
                }
            }

            match convergence.check_new_iteration(norm) {
                ConvergenceStatus::Continue => {}
                ConvergenceStatus::Converged => {
                    self.status = NonLinearSolverStatus::Converged;
                    return Ok(());
                }
                ConvergenceStatus::Diverged => {
                    debug!("fixed point diverged after {} iterations", convergence.niter());
                    self.status = NonLinearSolverStatus::Diverged;
                    return Err(non_linear_solver_error!(
                        DivergenceDetected,
                        iterations: convergence.niter()
                    ));
                }
                ConvergenceStatus::MaximumIterations => {
                    debug!("fixed point reached {} iterations", convergence.niter());
                    self.status = NonLinearSolverStatus::MaxIters;
                    return Err(non_linear_solver_error!(
                        NoConvergence,
                        iterations: convergence.niter()
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::matrix::DenseMatrix;
    use crate::op::closure::Closure;

    type M = DenseMatrix;

    fn solve_with_depth(
        op: &Closure<M>,
        depth: usize,
        x0: &DVector<f64>,
    ) -> (Result<DVector<f64>, IvpsolError>, usize) {
        let atol = DVector::from_element(x0.len(), 1e-10);
        let mut convergence = Convergence::new(0.0, &atol).with_max_iter(500);
        let mut solver = FixedPointSolver::<M>::new(depth);
        solver.set_problem(op).unwrap();
        let x = solver.solve(op, x0, 0.0, x0, &mut convergence);
        (x, convergence.niter())
    }

    #[test]
    fn contractive_cosine() {
        let op = Closure::<M>::new(
            |x: &DVector<f64>, _p: &DVector<f64>, _t, y: &mut DVector<f64>| {
                y[0] = x[0] - 0.5 * x[0].cos();
            },
            1,
            1,
        );
        let x0 = DVector::from_element(1, 0.0);
        for depth in [0, 1, 3] {
            let (x, _) = solve_with_depth(&op, depth, &x0);
            let x = x.unwrap();
            assert!((x[0] - 0.4501836112948736).abs() < 1e-9, "depth {depth}: {x}");
        }
    }

    #[test]
    fn anderson_accelerates_slow_contraction() {
        // g(x) = A x + 1 with A = diag(0.9, 0.8, 0.5)
        let op = Closure::<M>::new(
            |x: &DVector<f64>, _p: &DVector<f64>, _t, y: &mut DVector<f64>| {
                let rates = [0.9, 0.8, 0.5];
                for i in 0..3 {
                    y[i] = x[i] - (rates[i] * x[i] + 1.0);
                }
            },
            3,
            3,
        );
        let x0 = DVector::zeros(3);
        let solution = DVector::from_vec(vec![10.0, 5.0, 2.0]);

        let (plain, plain_iters) = solve_with_depth(&op, 0, &x0);
        plain.unwrap().assert_eq_st(&solution, 1e-8);
        let (anderson, anderson_iters) = solve_with_depth(&op, 3, &x0);
        anderson.unwrap().assert_eq_st(&solution, 1e-8);
        assert!(plain_iters > 100, "{plain_iters}");
        assert!(anderson_iters < plain_iters / 4, "{anderson_iters}");
    }

    #[test]
    fn growing_residual_is_divergence() {
        // g(x) = 2x + 1 doubles the residual on each iteration
        let op = Closure::<M>::new(
            |x: &DVector<f64>, _p: &DVector<f64>, _t, y: &mut DVector<f64>| {
                y[0] = -x[0] - 1.0;
            },
            1,
            1,
        );
        let atol = DVector::from_element(1, 1.0);
        let mut convergence = Convergence::new(0.0, &atol);
        let mut solver = FixedPointSolver::<M>::new(0);
        solver.set_problem(&op).unwrap();
        let x0 = DVector::zeros(1);
        let err = solver
            .solve(&op, &x0, 0.0, &x0, &mut convergence)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DivergenceDetected);
        assert!(err.is_recoverable());
        assert_eq!(convergence.niter(), 3);
        assert_eq!(solver.status(), NonLinearSolverStatus::Diverged);
        insta::assert_snapshot!(err.to_string(), @"Non-linear solver error: Fixed-point iteration diverged after 3 iterations");
    }

    #[test]
    fn no_jacobian_needed() {
        let solver = FixedPointSolver::<M>::new(2);
        assert!(!solver.requires_jacobian());
        assert!(solver.is_jacobian_set());
        assert_eq!(solver.anderson_depth(), 2);
    }
}
