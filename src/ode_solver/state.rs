use log::debug;

use crate::error::IvpsolError;
use crate::linear_solver::DirectSolver;
use crate::nonlinear_solver::{Convergence, NewtonNonlinearSolver, NonLinearSolver};
use crate::op::init::InitOp;
use crate::{ode_solver_error, NonLinearOp, Scalar, Vector};

use super::equations::OdeEquations;
use super::problem::OdeSolverProblem;

/// State of a run:
/// - the current solution `y`
/// - its time derivative `dy`
/// - the current time `t`
/// - the size `h` of the next step
#[derive(Debug, Clone)]
pub struct OdeSolverState<V: Vector> {
    pub y: V,
    pub dy: V,
    pub t: Scalar,
    pub h: Scalar,
}

impl<V: Vector> OdeSolverState<V> {
    /// Create a state from the initial condition of `problem`, with algebraic components made
    /// consistent and the first step size chosen for a method of order `solver_order`.
    pub fn new<Eqn>(problem: &OdeSolverProblem<Eqn>, solver_order: usize) -> Result<Self, IvpsolError>
    where
        Eqn: OdeEquations<V = V>,
    {
        let mut state = Self::new_without_initialise(problem);
        state.set_consistent(problem)?;
        state.set_step_size(problem, solver_order)?;
        Ok(state)
    }

    /// `y = y0(t0)`, `dy = 0` and `h = h0` (or one if not configured), nothing else.
    pub fn new_without_initialise<Eqn>(problem: &OdeSolverProblem<Eqn>) -> Self
    where
        Eqn: OdeEquations<V = V>,
    {
        let t = problem.t0;
        let y = problem.eqn.init(t);
        let dy = V::zeros(y.len());
        let h = problem.config.h0.unwrap_or(1.0);
        Self { y, dy, t, h }
    }

    pub fn check_consistent_with_problem<Eqn>(
        &self,
        problem: &OdeSolverProblem<Eqn>,
    ) -> Result<(), IvpsolError>
    where
        Eqn: OdeEquations<V = V>,
    {
        let n = problem.eqn.nstates();
        if self.y.len() != n || self.dy.len() != n {
            return Err(ode_solver_error!(StateProblemMismatch));
        }
        if self.h == 0.0 || !self.h.is_finite() {
            return Err(ode_solver_error!(
                InvalidConfiguration,
                format!("step size must be finite and non-zero, got {}", self.h)
            ));
        }
        Ok(())
    }

    /// Compute `dy` from the equations and, for a DAE, solve for the algebraic components of
    /// `y` with Newton's method.
    pub fn set_consistent<Eqn>(&mut self, problem: &OdeSolverProblem<Eqn>) -> Result<(), IvpsolError>
    where
        Eqn: OdeEquations<V = V>,
    {
        problem
            .eqn
            .rhs()
            .call_inplace(&self.y, self.t, &mut self.dy)?;
        divide_by_mass(&problem.eqn, &mut self.dy);
        let algebraic_indices = problem.eqn.algebraic_indices();
        if algebraic_indices.is_empty() {
            return Ok(());
        }
        debug!(
            "computing consistent initial values for {} algebraic states",
            algebraic_indices.len()
        );
        let op = InitOp::new(&problem.eqn, &self.y, algebraic_indices);
        let mut solver = NewtonNonlinearSolver::<Eqn::M, DirectSolver<Eqn::M>>::default();
        let mut x = V::zeros(self.y.len());
        op.gather(&self.y, &self.dy, &mut x)?;
        solver.set_problem(&op)?;
        solver.reset_jacobian(&op, &x, self.t);
        let mut convergence = Convergence::new(problem.rtol(), &problem.atol)
            .with_tolerance(1e-2)
            .with_max_iter(20);
        let error_x = x.clone();
        solver.solve_in_place(&op, &mut x, self.t, &error_x, &mut convergence)?;
        op.scatter(&x, &mut self.y, &mut self.dy)
    }

    /// Set `h` to the configured `h0`, or else estimate it following Hairer, Norsett and
    /// Wanner, Solving Ordinary Differential Equations I, Section II.4.2. `h` is clamped to the
    /// configured step bounds.
    ///
    /// Assumes `y` and `dy` are consistent.
    pub fn set_step_size<Eqn>(
        &mut self,
        problem: &OdeSolverProblem<Eqn>,
        solver_order: usize,
    ) -> Result<(), IvpsolError>
    where
        Eqn: OdeEquations<V = V>,
    {
        let h = match problem.config.h0 {
            Some(h0) => h0,
            None => self.estimate_step_size(problem, solver_order)?,
        };
        self.h = problem.config.clamp_step(h);
        debug!("initial step size h = {:.3e}", self.h);
        Ok(())
    }

    fn estimate_step_size<Eqn>(
        &self,
        problem: &OdeSolverProblem<Eqn>,
        solver_order: usize,
    ) -> Result<Scalar, IvpsolError>
    where
        Eqn: OdeEquations<V = V>,
    {
        let y0 = &self.y;
        let f0 = &self.dy;
        let rtol = problem.rtol();
        let atol = &problem.atol;

        let d0 = y0.squared_norm(y0, atol, rtol)?.sqrt();
        let d1 = f0.squared_norm(y0, atol, rtol)?.sqrt();

        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * (d0 / d1)
        };

        let mut y1 = y0.clone();
        y1.axpy(h0, f0, 1.0)?;
        let mut df = problem.eqn.rhs().call(&y1, self.t + h0)?;
        divide_by_mass(&problem.eqn, &mut df);
        df.axpy(-1.0, f0, 1.0)?;
        let d2 = df.squared_norm(y0, atol, rtol)?.sqrt() / h0;

        let max_d = d1.max(d2);
        let h1 = if max_d < 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / max_d).powf(1.0 / (1.0 + solver_order as Scalar))
        };
        Ok((100.0 * h0).min(h1))
    }
}

/// `f -> M^{-1} f` on the differential components, zero on the algebraic ones.
pub(crate) fn divide_by_mass<Eqn: OdeEquations>(eqn: &Eqn, f: &mut Eqn::V) {
    if let Some(mass) = eqn.mass() {
        for i in 0..f.len() {
            f[i] = if mass[i] == 0.0 { 0.0 } else { f[i] / mass[i] };
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::*;
    use crate::error::ErrorKind;
    use crate::matrix::DenseMatrix;
    use crate::ode_solver::builder::OdeBuilder;
    use crate::ode_solver::test_models::exponential_decay::exponential_decay_problem;
    use crate::ode_solver::test_models::exponential_decay_with_algebraic::exponential_decay_with_algebraic_problem;

    #[test]
    fn explicit_state_is_unchanged_by_consistency() {
        let (problem, _) = exponential_decay_problem::<DenseMatrix>(false);
        let state = OdeSolverState::new(&problem, 1).unwrap();
        state.y.assert_eq_st(&DVector::from_vec(vec![1.0, 1.0]), 0.0);
        state.dy.assert_eq_st(&DVector::from_vec(vec![-0.1, -0.1]), 1e-15);
        assert!(state.h > 0.0 && state.h.is_finite());
        state.check_consistent_with_problem(&problem).unwrap();
    }

    #[test]
    fn algebraic_components_are_made_consistent() {
        let (problem, _) = exponential_decay_with_algebraic_problem::<DenseMatrix>();
        let mut state = OdeSolverState::new_without_initialise(&problem);
        assert_eq!(state.y[2], 0.0);
        state.set_consistent(&problem).unwrap();
        state
            .y
            .assert_eq_st(&DVector::from_vec(vec![1.0, 1.0, 1.0]), 1e-10);
        state
            .dy
            .assert_eq_st(&DVector::from_vec(vec![-0.1, -0.1, 0.0]), 1e-10);
    }

    #[test]
    fn configured_initial_step_is_clamped() {
        let problem = OdeBuilder::<DenseMatrix>::new()
            .h0(0.5)
            .h_max(0.25)
            .rhs(|x: &DVector<f64>, _p: &DVector<f64>, _t, y: &mut DVector<f64>| y[0] = -x[0])
            .init(|_p: &DVector<f64>, _t, y: &mut DVector<f64>| y[0] = 1.0, 1)
            .build()
            .unwrap();
        let state = OdeSolverState::new(&problem, 1).unwrap();
        assert_eq!(state.h, 0.25);

        let wrong = OdeSolverState {
            y: DVector::zeros(2),
            dy: DVector::zeros(2),
            t: 0.0,
            h: 0.1,
        };
        let err = wrong.check_consistent_with_problem(&problem).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: State is not consistent with the problem equations");
    }
}
