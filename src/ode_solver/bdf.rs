use log::{debug, trace};
use nalgebra::DMatrix;

use crate::error::IvpsolError;
use crate::nonlinear_solver::{AnyNonLinearSolver, Convergence, NonLinearSolver, RootFinder};
use crate::op::bdf::BdfCallable;
use crate::scalar::EPSILON;
use crate::{ode_solver_error, Op, Scalar, Vector};

use super::config::BDF_MAX_ORDER;
use super::equations::OdeEquations;
use super::jacobian_update::{JacobianUpdate, SolverState};
use super::method::{OdeSolverMethod, OdeSolverStopReason, RunStatus};
use super::problem::OdeSolverProblem;
use super::state::OdeSolverState;
use super::statistics::{OdeSolverStatistics, StepHistory, StepRecord};

/// Implements a variable order Backward Difference Formula (BDF) integrator.
///
/// The basic algorithm is derived in \[1\]. This particular implementation follows the one in the
/// Matlab routine ode15s described in \[2\] and the SciPy implementation \[3\], which features the
/// NDF formulas for improved stability with associated differences in the error constants, and
/// evaluates the Jacobian at `J(t_{n+1}, y^0_{n+1})`.
///
/// The solution history is kept as a table of modified divided differences `D`, which is
/// rescaled whenever the step size changes.
///
/// # References
///
/// \[1\] Byrne, G. D., & Hindmarsh, A. C. (1975). A polyalgorithm for the numerical solution of ordinary differential equations. ACM Transactions on Mathematical Software (TOMS), 1(1), 71-96.
/// \[2\] Shampine, L. F., & Reichelt, M. W. (1997). The matlab ode suite. SIAM journal on scientific computing, 18(1), 1-22.
/// \[3\] Virtanen, P., Gommers, R., Oliphant, T. E., Haberland, M., Reddy, T., Cournapeau, D., ... & Van Mulbregt, P. (2020). SciPy 1.0: fundamental algorithms for scientific computing in Python. Nature methods, 17(3), 261-272.
pub struct Bdf<
    'a,
    Eqn: OdeEquations,
    Nls: NonLinearSolver<Eqn::M> = AnyNonLinearSolver<<Eqn as OdeEquations>::M>,
> {
    problem: &'a OdeSolverProblem<Eqn>,
    op: BdfCallable<'a, Eqn>,
    nonlinear_solver: Nls,
    convergence: Convergence<'a, Eqn::V>,
    state: OdeSolverState<Eqn::V>,
    status: RunStatus,
    order: usize,
    max_order: usize,
    n_equal_steps: usize,
    diff: Vec<Eqn::V>,
    diff_tmp: Vec<Eqn::V>,
    y_new: Eqn::V,
    y_delta: Eqn::V,
    y_predict: Eqn::V,
    t_predict: Scalar,
    alpha: Vec<Scalar>,
    gamma: Vec<Scalar>,
    error_const2: Vec<Scalar>,
    jacobian_update: JacobianUpdate,
    statistics: OdeSolverStatistics,
    history: StepHistory,
    root_finder: Option<RootFinder<Eqn::V>>,
    tstop: Option<Scalar>,
    is_state_modified: bool,
}

impl<'a, Eqn, Nls> Bdf<'a, Eqn, Nls>
where
    Eqn: OdeEquations,
    Nls: NonLinearSolver<Eqn::M>,
{
    /// Create a solver starting from the (consistent) initial state of `problem`.
    pub fn new(problem: &'a OdeSolverProblem<Eqn>, nonlinear_solver: Nls) -> Result<Self, IvpsolError> {
        let state = OdeSolverState::new(problem, 1)?;
        Self::new_with_state(problem, state, nonlinear_solver)
    }

    /// Create a solver starting from `state`, which is assumed to be consistent.
    pub fn new_with_state(
        problem: &'a OdeSolverProblem<Eqn>,
        state: OdeSolverState<Eqn::V>,
        mut nonlinear_solver: Nls,
    ) -> Result<Self, IvpsolError> {
        state.check_consistent_with_problem(problem)?;
        if problem.eqn.mass().is_some() && !nonlinear_solver.requires_jacobian() {
            return Err(ode_solver_error!(MassMatrixNotSupported));
        }
        let n = problem.eqn.nstates();
        let max_order = problem.config.bdf_max_order();
        let (gamma, alpha, error_const2) = Self::coefficients();

        let op = BdfCallable::new(&problem.eqn);
        op.set_c(state.h, alpha[1]);
        nonlinear_solver.set_problem(&op)?;

        let config = &problem.config.bdf;
        let convergence = Convergence::new(problem.rtol(), &problem.atol)
            .with_tolerance(config.newton_tolerance)
            .with_max_iter(config.maximum_newton_iterations);
        let root_finder = problem
            .eqn
            .root()
            .map(|root| RootFinder::new(root.nout(), n));

        let mut ret = Self {
            problem,
            op,
            nonlinear_solver,
            convergence,
            state,
            status: RunStatus::Setup,
            order: 1,
            max_order,
            n_equal_steps: 0,
            diff: vec![Eqn::V::zeros(n); BDF_MAX_ORDER + 3],
            diff_tmp: vec![Eqn::V::zeros(n); BDF_MAX_ORDER + 3],
            y_new: Eqn::V::zeros(n),
            y_delta: Eqn::V::zeros(n),
            y_predict: Eqn::V::zeros(n),
            t_predict: 0.0,
            alpha,
            gamma,
            error_const2,
            jacobian_update: JacobianUpdate::default(),
            statistics: OdeSolverStatistics::default(),
            history: StepHistory::new(max_order),
            root_finder,
            tstop: None,
            is_state_modified: false,
        };
        ret.initialise_history()?;
        Ok(ret)
    }

    /// `gamma`, `alpha` and the squared error constants for orders `0..=BDF_MAX_ORDER`.
    fn coefficients() -> (Vec<Scalar>, Vec<Scalar>, Vec<Scalar>) {
        // kappa values for difference orders, taken from Table 1 of [1]
        let kappa = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];
        let mut gamma = vec![0.0];
        let mut alpha = vec![0.0];
        let mut error_const2 = vec![1.0];
        for i in 1..=BDF_MAX_ORDER {
            let i_t = i as Scalar;
            gamma.push(gamma[i - 1] + 1.0 / i_t);
            alpha.push(1.0 / ((1.0 - kappa[i]) * gamma[i]));
            error_const2.push((kappa[i] * gamma[i] + 1.0 / (i_t + 1.0)).powi(2));
        }
        (gamma, alpha, error_const2)
    }

    /// Computes the R matrix with entries given by the first equation on page 8 of \[1\].
    ///
    /// This is used to update the differences when the step size is varied according to
    /// `factor = h_{n+1} / h_n`. The U matrix is R with `factor = 1`.
    fn compute_r(order: usize, factor: Scalar) -> DMatrix<Scalar> {
        let mut r = DMatrix::zeros(order + 1, order + 1);
        for j in 0..=order {
            r[(0, j)] = 1.0;
        }
        for i in 1..=order {
            for j in 1..=order {
                let i_t = i as Scalar;
                let j_t = j as Scalar;
                r[(i, j)] = r[(i - 1, j)] * (i_t - 1.0 - factor * j_t) / i_t;
            }
        }
        r
    }

    /// Restart at first order from the current state.
    fn initialise_history(&mut self) -> Result<(), IvpsolError> {
        self.order = 1;
        self.n_equal_steps = 0;
        for d in self.diff.iter_mut() {
            d.fill(0.0);
        }
        self.diff[0].copy_from(&self.state.y)?;
        self.diff[1].copy_from(&self.state.dy)?;
        self.diff[1].scale_mut(self.state.h);

        self.op.set_c(self.state.h, self.alpha[self.order]);
        self.op.set_jacobian_is_stale();
        self.nonlinear_solver
            .reset_jacobian(&self.op, &self.state.y, self.state.t);
        self.jacobian_update.update_rhs_jacobian();
        self.jacobian_update.update_jacobian(self.op.c());
        self.statistics.number_of_linear_solver_setups += 1;

        if let (Some(root_finder), Some(root_fn)) = (self.root_finder.as_ref(), self.problem.eqn.root()) {
            root_finder.init(root_fn, &self.state.y, self.state.t)?;
        }
        Ok(())
    }

    /// Pick up a state modified through [OdeSolverMethod::state_mut].
    fn reinitialise(&mut self) -> Result<(), IvpsolError> {
        self.state.check_consistent_with_problem(self.problem)?;
        self.state.set_consistent(self.problem)?;
        self.is_state_modified = false;
        self.initialise_history()?;
        if let Some(tstop) = self.tstop {
            self.handle_tstop(tstop)?;
        }
        Ok(())
    }

    /// Scale the step size by `factor` and the differences with it (section 3.2 of \[1\]).
    fn rescale_step(&mut self, factor: Scalar) -> Result<(), IvpsolError> {
        self.state.h *= factor;
        self.n_equal_steps = 0;

        let order = self.order;
        let u = Self::compute_r(order, 1.0);
        let ru = Self::compute_r(order, factor) * u;
        // D[0:order+1] = D[0:order+1] * R * U
        for j in 0..=order {
            let d = &mut self.diff_tmp[j];
            d.fill(0.0);
            for i in 0..=order {
                d.axpy(ru[(i, j)], &self.diff[i], 1.0)?;
            }
        }
        self.diff[..=order].swap_with_slice(&mut self.diff_tmp[..=order]);

        self.op.set_c(self.state.h, self.alpha[order]);
        Ok(())
    }

    /// [Self::rescale_step], failing if the new step is below the minimum.
    fn update_step_size(&mut self, factor: Scalar) -> Result<(), IvpsolError> {
        self.rescale_step(factor)?;
        let config = &self.problem.config;
        let h_min = config.bdf.minimum_timestep.max(config.h_min.unwrap_or(0.0));
        if self.state.h.abs() < h_min {
            return Err(ode_solver_error!(StepSizeTooSmall, time: self.state.t));
        }
        Ok(())
    }

    /// Predict forward to the new step (eq 2 in \[1\]) and set up the stage equation there.
    fn predict_forward(&mut self) -> Result<(), IvpsolError> {
        self.y_predict.copy_from(&self.diff[0])?;
        for i in 1..=self.order {
            self.y_predict.axpy(1.0, &self.diff[i], 1.0)?;
        }
        self.op.set_psi_and_y0(
            &self.diff,
            &self.gamma,
            &self.alpha,
            self.order,
            &self.y_predict,
        )?;
        self.t_predict = self.state.t + self.state.h;
        Ok(())
    }

    fn jacobian_updates(&mut self, state: SolverState) {
        let c = self.op.c();
        if self.jacobian_update.check_rhs_jacobian_update(state) {
            trace!("re-evaluating the Jacobian at t = {} ({state:?})", self.t_predict);
            self.jacobian_update.update_rhs_jacobian();
            self.jacobian_update.update_jacobian(c);
            self.op.set_jacobian_is_stale();
            self.nonlinear_solver
                .reset_jacobian(&self.op, &self.y_predict, self.t_predict);
            self.statistics.number_of_linear_solver_setups += 1;
        } else if self.jacobian_update.check_jacobian_update(c, state) {
            trace!("refactorizing the iteration matrix at t = {} ({state:?})", self.t_predict);
            self.jacobian_update.update_jacobian(c);
            self.nonlinear_solver
                .reset_jacobian(&self.op, &self.y_predict, self.t_predict);
            self.statistics.number_of_linear_solver_setups += 1;
        }
    }

    /// Update the differences with `d = y_new - y_predict`.
    ///
    /// From the first equation on page 4 of \[1\], `d = D^{k + 1} y_n`, and the standard
    /// backwards difference gives `D^{j + 1} y_n = D^{j} y_n - D^{j} y_{n - 1}`.
    fn update_differences(&mut self) -> Result<(), IvpsolError> {
        let order = self.order;
        let (lower, upper) = self.diff.split_at_mut(order + 2);
        upper[0].linear_combination(1.0, &self.y_delta, -1.0, &lower[order + 1])?;
        lower[order + 1].copy_from(&self.y_delta)?;
        for i in (0..=order).rev() {
            let (lower, upper) = self.diff.split_at_mut(i + 1);
            lower[i].axpy(1.0, &upper[0], 1.0)?;
        }
        Ok(())
    }

    /// Squared error estimate had the step just taken been of order `order`.
    fn predict_error_control(&self, order: usize) -> Result<Scalar, IvpsolError> {
        Ok(self.diff[order + 1].squared_norm(&self.state.y, &self.problem.atol, self.problem.rtol())?
            * self.error_const2[order])
    }

    /// Interpolate the solution at `t` from the differences (page 7 of \[1\]).
    fn interpolate_from_diff(&self, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        let state = &self.state;
        y.copy_from(&self.diff[0])?;
        let mut time_factor = 1.0;
        for i in 0..self.order {
            let i_t = i as Scalar;
            time_factor *= (t - (state.t - state.h * i_t)) / (state.h * (1.0 + i_t));
            y.axpy(time_factor, &self.diff[i + 1], 1.0)?;
        }
        Ok(())
    }

    /// Stop at `tstop` if the state is there, or shorten the next step so it ends there.
    fn handle_tstop(&mut self, tstop: Scalar) -> Result<Option<OdeSolverStopReason>, IvpsolError> {
        let t = self.state.t;
        let h = self.state.h;
        let troundoff = 100.0 * EPSILON * (t.abs() + h.abs());
        if (t - tstop).abs() <= troundoff {
            self.tstop = None;
            self.state.t = tstop;
            return Ok(Some(OdeSolverStopReason::TstopReached));
        } else if (h > 0.0 && tstop < t - troundoff) || (h < 0.0 && tstop > t + troundoff) {
            return Err(ode_solver_error!(
                StopTimeBeforeCurrentTime,
                stop_time: tstop,
                state_time: t
            ));
        }
        if (h > 0.0 && t + h > tstop + troundoff) || (h < 0.0 && t + h < tstop - troundoff) {
            self.rescale_step((tstop - t) / h)?;
        }
        Ok(None)
    }

    fn try_step(&mut self) -> Result<OdeSolverStopReason, IvpsolError> {
        if self.is_state_modified {
            self.reinitialise()?;
        }
        let config = &self.problem.config.bdf;
        let mut error_test_fails = 0;
        let mut nonlinear_fails = 0;
        let mut refreshed_jacobian = false;

        self.predict_forward()?;
        self.jacobian_updates(SolverState::StepSuccess);

        // loop until the step is accepted, reducing the step size on every failure
        let (error_norm, safety) = loop {
            self.y_new.copy_from(&self.y_predict)?;
            let result = self.nonlinear_solver.solve_in_place(
                &self.op,
                &mut self.y_new,
                self.t_predict,
                &self.y_predict,
                &mut self.convergence,
            );
            self.statistics.number_of_nonlinear_solver_iterations += self.convergence.niter();
            match result {
                Ok(()) => {
                    // combine eq 3, 4 and 6 from [1] to obtain the error
                    // Note that error = C_k * h^{k+1} y^{k+1}
                    // and d = D^{k+1} y_{n+1} \approx h^{k+1} y^{k+1}
                    self.y_delta.copy_from(&self.y_new)?;
                    self.y_delta.axpy(-1.0, &self.y_predict, 1.0)?;
                    let error_norm = self.y_delta.squared_norm(
                        &self.y_new,
                        &self.problem.atol,
                        self.problem.rtol(),
                    )? * self.error_const2[self.order];
                    let maxiter = self.convergence.max_iter() as Scalar;
                    let niter = self.convergence.niter() as Scalar;
                    let safety = 0.9 * (2.0 * maxiter + 1.0) / (2.0 * maxiter + niter);
                    if error_norm <= 1.0 {
                        break (error_norm, safety);
                    }

                    // calculate the optimal step size factor as per eq 2.46 of [2]
                    error_test_fails += 1;
                    self.statistics.number_of_error_test_failures += 1;
                    if error_test_fails >= config.maximum_error_test_failures {
                        return Err(ode_solver_error!(
                            RepeatedStepFailure,
                            time: self.state.t,
                            failures: error_test_fails + nonlinear_fails
                        ));
                    }
                    let factor = safety * error_norm.powf(-0.5 / (self.order as Scalar + 1.0));
                    let factor = if factor.is_nan() {
                        config.minimum_timestep_shrink
                    } else {
                        factor.clamp(config.minimum_timestep_shrink, config.maximum_timestep_shrink)
                    };
                    debug!(
                        "error test failed at t = {}: error = {:.3e}, h = {:.3e} -> {:.3e}",
                        self.state.t,
                        error_norm.sqrt(),
                        self.state.h,
                        self.state.h * factor
                    );
                    self.update_step_size(factor)?;
                    self.predict_forward()?;
                    self.jacobian_updates(SolverState::ErrorTestFail);
                }
                Err(err) if !err.is_recoverable() => return Err(err),
                Err(err) => {
                    nonlinear_fails += 1;
                    self.statistics.number_of_nonlinear_solver_fails += 1;
                    if nonlinear_fails >= config.maximum_nonlinear_solver_failures {
                        return Err(ode_solver_error!(
                            RepeatedStepFailure,
                            time: self.state.t,
                            failures: error_test_fails + nonlinear_fails
                        ));
                    }
                    if !refreshed_jacobian && self.nonlinear_solver.requires_jacobian() {
                        // a fresh Jacobian at the same step is the cheaper retry
                        debug!(
                            "nonlinear solver failed at t = {}: {err}, refreshing the Jacobian",
                            self.state.t
                        );
                        refreshed_jacobian = true;
                        self.jacobian_updates(SolverState::FirstConvergenceFail);
                    } else {
                        debug!(
                            "nonlinear solver failed at t = {}: {err}, h = {:.3e} -> {:.3e}",
                            self.state.t,
                            self.state.h,
                            self.state.h * 0.3
                        );
                        self.update_step_size(0.3)?;
                        self.predict_forward()?;
                        self.jacobian_updates(SolverState::SecondConvergenceFail);
                    }
                }
            }
        };
        let rejections = error_test_fails + nonlinear_fails;

        // take the accepted step
        let h = self.state.h;
        let order = self.order;
        self.state.y.copy_from(&self.y_new)?;
        self.state.t = self.t_predict;
        self.update_differences()?;
        self.state.dy.copy_from(&self.diff[1])?;
        self.state.dy.scale_mut(1.0 / h);
        self.jacobian_update.step();
        self.statistics.number_of_steps += 1;

        // a change in order is only done after running at order k for k + 1 steps
        // (see page 83 of [2])
        self.n_equal_steps += 1;
        if self.n_equal_steps > order {
            // the optimal step size factors for orders k - 1 and k + 1 follow from
            // error = C_k * D^{k+1} y_n
            let error_m_norm = if order > 1 {
                self.predict_error_control(order - 1)?
            } else {
                Scalar::INFINITY
            };
            let error_p_norm = if order < self.max_order {
                self.predict_error_control(order + 1)?
            } else {
                Scalar::INFINITY
            };
            let error_norms = [error_m_norm, error_norm, error_p_norm];
            let factors: Vec<Scalar> = error_norms
                .iter()
                .enumerate()
                .map(|(i, e)| e.powf(-0.5 / (i + order) as Scalar))
                .collect();

            // pick the order with the largest resulting step, staying put on ties
            let mut max_index = 1;
            for (i, factor) in factors.iter().enumerate() {
                if *factor > factors[max_index] {
                    max_index = i;
                }
            }
            let new_order = order + max_index - 1;

            let mut factor = (safety * factors[max_index]).clamp(
                config.minimum_timestep_shrink,
                config.maximum_timestep_growth,
            );
            if rejections > 0 {
                factor = factor.min(1.0);
            }
            if new_order != order
                || factor >= config.minimum_timestep_growth
                || factor < config.maximum_timestep_shrink
            {
                if new_order != order {
                    debug!("order {order} -> {new_order} at t = {}", self.state.t);
                }
                self.order = new_order;
                self.rescale_step(factor)?;
            }
        }
        if let Some(h_max) = self.problem.config.h_max {
            if self.state.h.abs() > h_max {
                self.rescale_step(h_max / self.state.h.abs())?;
            }
        }

        self.history.push(StepRecord {
            t: self.state.t,
            h,
            order,
            error_norm: error_norm.sqrt(),
            rejections,
            h_next: self.state.h,
        });
        self.statistics.number_of_jacobian_evals = self.op.number_of_jac_evals();
        self.statistics.number_of_linear_iterations =
            self.nonlinear_solver.number_of_linear_iterations();

        if let (Some(root_finder), Some(root_fn)) = (self.root_finder.as_ref(), self.problem.eqn.root()) {
            let interpolate = |t: Scalar, y: &mut Eqn::V| self.interpolate_from_diff(t, y);
            if let Some(t_root) =
                root_finder.check_root(&interpolate, root_fn, &self.state.y, self.state.t)?
            {
                return Ok(OdeSolverStopReason::RootFound(t_root));
            }
        }
        if let Some(tstop) = self.tstop {
            if let Some(reason) = self.handle_tstop(tstop)? {
                return Ok(reason);
            }
        }
        Ok(OdeSolverStopReason::InternalTimestep)
    }
}

impl<'a, Eqn, Nls> OdeSolverMethod<'a, Eqn> for Bdf<'a, Eqn, Nls>
where
    Eqn: OdeEquations,
    Nls: NonLinearSolver<Eqn::M>,
{
    fn problem(&self) -> &'a OdeSolverProblem<Eqn> {
        self.problem
    }

    fn state(&self) -> &OdeSolverState<Eqn::V> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut OdeSolverState<Eqn::V> {
        self.is_state_modified = true;
        &mut self.state
    }

    fn status(&self) -> RunStatus {
        self.status
    }

    fn order(&self) -> usize {
        self.order
    }

    fn statistics(&self) -> &OdeSolverStatistics {
        &self.statistics
    }

    fn step_records(&self) -> &StepHistory {
        &self.history
    }

    fn step(&mut self) -> Result<OdeSolverStopReason, IvpsolError> {
        self.status.begin_step()?;
        let result = self.try_step();
        self.status.end_step(&result, self.state.t);
        result
    }

    fn set_stop_time(&mut self, tstop: Scalar) -> Result<(), IvpsolError> {
        self.status.begin_stop_time()?;
        self.tstop = Some(tstop);
        match self.handle_tstop(tstop) {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err(ode_solver_error!(StopTimeAtCurrentTime)),
            Err(err) => {
                self.tstop = None;
                Err(err)
            }
        }
    }

    fn interpolate_inplace(&self, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        let state = &self.state;
        if y.len() != state.y.len() {
            return Err(ode_solver_error!(
                InterpolationVectorWrongSize,
                expected: state.y.len(),
                found: y.len()
            ));
        }
        if self.is_state_modified {
            // the differences no longer describe the state
            if t == state.t {
                return y.copy_from(&state.y);
            }
            return Err(ode_solver_error!(InterpolationTimeOutsideCurrentStep));
        }
        if (t - state.t) * state.h.signum() > 0.0 {
            return Err(ode_solver_error!(InterpolationTimeAfterCurrentTime));
        }
        self.interpolate_from_diff(t, y)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::*;
    use crate::error::ErrorKind;
    use crate::matrix::{BandMatrix, DenseMatrix, SparseMatrix};
    use crate::nonlinear_solver::FixedPointSolver;
    use crate::ode_solver::builder::OdeBuilder;
    use crate::ode_solver::config::{LinearSolverKind, NonLinearSolverKind};
    use crate::ode_solver::test_models::exponential_decay::exponential_decay_problem;
    use crate::ode_solver::test_models::exponential_decay_with_algebraic::exponential_decay_with_algebraic_problem;
    use crate::ode_solver::test_models::heat1d::heat1d_problem;
    use crate::ode_solver::test_models::robertson::robertson_problem;
    use crate::ode_solver::tests::{check_solution, test_ode_solver};

    type V = DVector<f64>;

    #[test]
    fn difference_rescaling_is_exact_for_polynomials() {
        // differences of y(t) = t^2 on the grid t = 0, -1, -2 with h = 1:
        // D0 = y_n = 0, D1 = y_n - y_{n-1} = -1, D2 = D1_n - D1_{n-1} = -1 - (-3) = 2
        let r = Bdf::<'_, crate::ode_solver::equations::OdeSolverEquations<DenseMatrix>>::compute_r(2, 0.5);
        let u = Bdf::<'_, crate::ode_solver::equations::OdeSolverEquations<DenseMatrix>>::compute_r(2, 1.0);
        let ru = r * u;
        let d = [0.0, -1.0, 2.0];
        let scaled: Vec<f64> = (0..3)
            .map(|j| (0..3).map(|i| d[i] * ru[(i, j)]).sum())
            .collect();
        // on the grid t = 0, -0.5, -1: D0 = 0, D1 = 0 - 0.25, D2 = -0.25 - (0.25 - 1) = 0.5
        assert!((scaled[0] - 0.0).abs() < 1e-14);
        assert!((scaled[1] + 0.25).abs() < 1e-14);
        assert!((scaled[2] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn bdf_exponential_decay() {
        let (problem, soln) = exponential_decay_problem::<DenseMatrix>(false);
        let mut s = problem.bdf().unwrap();
        test_ode_solver(&mut s, &soln, None, false);
        assert_eq!(s.statistics().number_of_nonlinear_solver_fails, 0);
        assert!(s.statistics().number_of_steps > 0);
        assert!(s.statistics().number_of_jacobian_evals >= 1);
    }

    #[test]
    fn bdf_exponential_decay_tstop_and_coloring() {
        let (problem, soln) = exponential_decay_problem::<DenseMatrix>(true);
        let mut s = problem.bdf().unwrap();
        test_ode_solver(&mut s, &soln, None, true);
        assert_eq!(s.status(), RunStatus::Completed);
    }

    #[test]
    fn bdf_exponential_decay_sparse() {
        let (problem, soln) = exponential_decay_problem::<SparseMatrix>(false);
        let mut s = problem.bdf().unwrap();
        test_ode_solver(&mut s, &soln, None, false);
    }

    #[test]
    fn bdf_algebraic_constraint() {
        let (problem, soln) = exponential_decay_with_algebraic_problem::<DenseMatrix>();
        let mut s = problem.bdf().unwrap();
        // the inconsistent v(0) = 0 is corrected before the first step
        assert!((s.state().y[2] - 1.0).abs() < 1e-10);
        test_ode_solver(&mut s, &soln, None, false);
    }

    #[test]
    fn bdf_robertson_is_stiff_but_cheap() {
        let (problem, soln) = robertson_problem::<DenseMatrix>();
        let mut s = problem.bdf().unwrap();
        for point in soln.solution_points.iter() {
            s.set_stop_time(point.t).unwrap();
            while s.step().unwrap() != OdeSolverStopReason::TstopReached {}
            let y = &s.state().y;
            for i in 0..3 {
                let rel = (y[i] - point.state[i]).abs() / point.state[i];
                assert!(rel < 2e-2, "component {i} at t = {}: {} vs {}", point.t, y[i], point.state[i]);
            }
        }
        // implicit steps are not limited by stability
        assert!(s.statistics().number_of_steps < 1000);
        assert!(s.order() > 1);
        let mass_conservation: f64 = s.state().y.iter().sum();
        assert!((mass_conservation - 1.0).abs() < 1e-6);
    }

    #[test]
    fn bdf_heat_equation_band() {
        let (problem, soln) = heat1d_problem::<BandMatrix>(20);
        let mut s = problem.bdf().unwrap();
        test_ode_solver(&mut s, &soln, None, false);
    }

    #[test]
    fn bdf_krylov_linear_solvers() {
        for kind in [LinearSolverKind::Gmres, LinearSolverKind::BiCgStab, LinearSolverKind::Tfqmr] {
            let (mut problem, soln) = heat1d_problem::<DenseMatrix>(10);
            problem.config.linear_solver = kind;
            let mut s = problem.bdf().unwrap();
            test_ode_solver(&mut s, &soln, None, false);
            assert!(s.statistics().number_of_linear_iterations > 0, "{kind:?}");
        }
    }

    #[test]
    fn bdf_fixed_point() {
        let (mut problem, soln) = exponential_decay_problem::<DenseMatrix>(false);
        problem.config.nonlinear_solver = NonLinearSolverKind::FixedPoint { anderson_depth: 2 };
        let mut s = problem.bdf().unwrap();
        test_ode_solver(&mut s, &soln, None, false);
        assert_eq!(s.statistics().number_of_jacobian_evals, 0);
    }

    #[test]
    fn fixed_point_rejects_mass() {
        let (problem, _) = exponential_decay_with_algebraic_problem::<DenseMatrix>();
        let err = Bdf::new(&problem, FixedPointSolver::<DenseMatrix>::new(1))
            .err()
            .unwrap();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Mass matrix not supported for this solver");
    }

    #[test]
    fn order_is_bounded_by_configuration() {
        let (mut problem, _) = robertson_problem::<DenseMatrix>();
        problem.config.max_order = Some(2);
        let mut s = problem.bdf().unwrap();
        s.solve(40.0).unwrap();
        assert!(s.step_records().iter().all(|r| r.order <= 2));
        assert!(s.step_records().len() <= 2);
    }

    #[test]
    fn state_modification_restarts_at_first_order() {
        let (problem, _) = exponential_decay_problem::<DenseMatrix>(false);
        let mut s = problem.bdf().unwrap();
        s.set_stop_time(5.0).unwrap();
        for _ in 0..20 {
            s.step().unwrap();
        }
        let t = s.state().t;
        s.state_mut().y.fill(2.0);
        // only the current time can be interpolated until the next step
        assert_eq!(s.interpolate(t).unwrap(), V::from_element(2, 2.0));
        assert!(s.interpolate(t - 1e-3).is_err());

        s.step().unwrap();
        assert_eq!(s.step_records().last().unwrap().order, 1);
        let expect = 2.0 * (-0.1 * (s.state().t - t)).exp();
        assert!((s.state().y[0] - expect).abs() < 1e-4);
    }

    #[test]
    fn stop_time_validation() {
        let (problem, _) = exponential_decay_problem::<DenseMatrix>(false);
        let mut s = problem.bdf().unwrap();
        let err = s.set_stop_time(0.0).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Stop time is at the current state time");
        let err = s.set_stop_time(-1.0).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Stop time = -1 is less than current state time = 0");
        // failed requests leave the run untouched
        assert_eq!(s.status(), RunStatus::Setup);
        s.step().unwrap();
        assert_eq!(s.status(), RunStatus::Stepping);
    }

    #[test]
    fn interpolation_bounds() {
        let (problem, _) = exponential_decay_problem::<DenseMatrix>(false);
        let mut s = problem.bdf().unwrap();
        s.step().unwrap();
        s.step().unwrap();
        let t = s.state().t;
        let err = s.interpolate(t + 1.0).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Interpolation time is after current time");
        let mut y = V::zeros(3);
        let err = s.interpolate_inplace(t, &mut y).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        check_solution(&s.interpolate(t).unwrap(), &s.state().y, 1e-14);
    }

    #[test]
    fn root_stops_the_run() {
        let problem = OdeBuilder::<DenseMatrix>::new()
            .rhs(|x: &V, _p: &V, _t, y: &mut V| y[0] = -x[0])
            .jacobian_action(|_x: &V, _p: &V, _t, v: &V, y: &mut V| y[0] = -v[0])
            .root(|x: &V, _p: &V, _t, g: &mut V| g[0] = x[0] - 0.5, 1)
            .init(|_p: &V, _t, y: &mut V| y[0] = 1.0, 1)
            .build()
            .unwrap();
        let mut s = problem.bdf().unwrap();
        let (ys, ts) = s.solve(10.0).unwrap();
        let t_root = *ts.last().unwrap();
        assert!((t_root - 2f64.ln()).abs() < 1e-3, "{t_root}");
        assert!((ys.last().unwrap()[0] - 0.5).abs() < 1e-3);
        assert!(s.state().t >= t_root);
    }

    /// `y' = -(y - 1)` whose right-hand side gives NaN until the Jacobian has been
    /// re-evaluated `blocked` more times, after the solver has reached `t = 0.2`. Returns the
    /// times of those Jacobian evaluations, the time of the step that was attempted and the
    /// step size it was planned with.
    fn recover_from_nonlinear_failures(blocked: usize) -> (Vec<f64>, f64, f64, usize) {
        use std::cell::{Cell, RefCell};
        use std::rc::Rc;

        use crate::Matrix;

        let remaining = Rc::new(Cell::new(0usize));
        let jacobian_times = Rc::new(RefCell::new(Vec::new()));
        let (rhs_remaining, jac_remaining, times) =
            (remaining.clone(), remaining.clone(), jacobian_times.clone());
        let problem = OdeBuilder::<DenseMatrix>::new()
            .rhs(move |x: &V, _p: &V, _t, y: &mut V| {
                y[0] = if rhs_remaining.get() > 0 {
                    f64::NAN
                } else {
                    1.0 - x[0]
                };
            })
            .jacobian_matrix(move |_x: &V, _p: &V, t, j: &mut DenseMatrix| {
                times.borrow_mut().push(t);
                jac_remaining.set(jac_remaining.get().saturating_sub(1));
                j.set_entry(0, 0, -1.0).unwrap();
            })
            .init(|_p: &V, _t, y: &mut V| y[0] = 2.0, 1)
            .build()
            .unwrap();
        let mut s = problem.bdf().unwrap();
        while s.state().t < 0.2 {
            s.step().unwrap();
        }
        assert_eq!(s.statistics().number_of_nonlinear_solver_fails, 0);

        remaining.set(blocked);
        jacobian_times.borrow_mut().clear();
        let (t, h) = (s.state().t, s.state().h);
        s.step().unwrap();
        assert_eq!(remaining.get(), 0);
        let times = jacobian_times.borrow().clone();
        (times, t, h, s.statistics().number_of_nonlinear_solver_fails)
    }

    #[test]
    fn first_nonlinear_failure_refreshes_the_jacobian_at_the_same_step() {
        let (times, t, h, fails) = recover_from_nonlinear_failures(1);
        assert_eq!(fails, 1);
        assert_eq!(times, vec![t + h]);
    }

    #[test]
    fn second_nonlinear_failure_shrinks_the_step() {
        let (times, t, h, fails) = recover_from_nonlinear_failures(2);
        assert_eq!(fails, 2);
        assert_eq!(times.len(), 2);
        assert_eq!(times[0], t + h);
        assert!((times[1] - (t + 0.3 * h)).abs() < 1e-12 * (t + h), "{times:?}");
    }

    #[test]
    fn run_fails_after_repeated_step_failures() {
        // y' = y^2 from y = 1 blows up at t = 1
        let problem = OdeBuilder::<DenseMatrix>::new()
            .rhs(|x: &V, _p: &V, _t, y: &mut V| y[0] = x[0] * x[0])
            .jacobian_action(|x: &V, _p: &V, _t, v: &V, y: &mut V| y[0] = 2.0 * x[0] * v[0])
            .init(|_p: &V, _t, y: &mut V| y[0] = 1.0, 1)
            .build()
            .unwrap();
        let mut s = problem.bdf().unwrap();
        s.set_stop_time(2.0).unwrap();
        let err = loop {
            match s.step() {
                Ok(_) => continue,
                Err(err) => break err,
            }
        };
        assert!(
            matches!(
                err.kind(),
                ErrorKind::RepeatedStepFailure | ErrorKind::StepSizeTooSmall
            ),
            "{err}"
        );
        assert!(s.state().t < 1.0);
        assert_eq!(s.status(), RunStatus::Failed);
        let err = s.step().unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: The run has failed, create a new solver to continue");
        assert!(s.set_stop_time(3.0).is_err());
    }
}
