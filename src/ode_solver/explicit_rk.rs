use log::debug;

use crate::error::IvpsolError;
use crate::nonlinear_solver::RootFinder;
use crate::scalar::EPSILON;
use crate::{ode_solver_error, NonLinearOp, Op, Scalar, Vector};

use super::equations::OdeEquations;
use super::method::{OdeSolverMethod, OdeSolverStopReason, RunStatus};
use super::problem::OdeSolverProblem;
use super::state::OdeSolverState;
use super::statistics::{OdeSolverStatistics, StepHistory, StepRecord};
use super::tableau::Tableau;

/// An adaptive explicit Runge-Kutta integrator built on an embedded pair.
///
/// The step size is chosen by a PI controller on the embedded error estimate (Hairer and
/// Wanner, Solving Ordinary Differential Equations II, Section IV.2). Dense output between
/// steps is a cubic Hermite interpolant through the solution and its derivative at both ends
/// of the last step.
///
/// Only explicit ODEs are supported, a problem with a mass is refused.
pub struct ExplicitRk<'a, Eqn: OdeEquations> {
    problem: &'a OdeSolverProblem<Eqn>,
    tableau: Tableau,
    state: OdeSolverState<Eqn::V>,
    status: RunStatus,
    k: Vec<Eqn::V>,
    y_new: Eqn::V,
    dy_new: Eqn::V,
    y_stage: Eqn::V,
    error: Eqn::V,
    y_prev: Eqn::V,
    dy_prev: Eqn::V,
    t_prev: Scalar,
    err_prev: Scalar,
    statistics: OdeSolverStatistics,
    history: StepHistory,
    root_finder: Option<RootFinder<Eqn::V>>,
    tstop: Option<Scalar>,
    is_state_modified: bool,
}

impl<'a, Eqn: OdeEquations> ExplicitRk<'a, Eqn> {
    pub fn new(problem: &'a OdeSolverProblem<Eqn>, tableau: Tableau) -> Result<Self, IvpsolError> {
        if problem.eqn.mass().is_some() {
            return Err(ode_solver_error!(MassMatrixNotSupported));
        }
        let state = OdeSolverState::new(problem, tableau.order())?;
        Self::new_with_state(problem, state, tableau)
    }

    /// Create a solver starting from `state`, whose `dy` is assumed to be `f(y, t)`.
    pub fn new_with_state(
        problem: &'a OdeSolverProblem<Eqn>,
        state: OdeSolverState<Eqn::V>,
        tableau: Tableau,
    ) -> Result<Self, IvpsolError> {
        if problem.eqn.mass().is_some() {
            return Err(ode_solver_error!(MassMatrixNotSupported));
        }
        state.check_consistent_with_problem(problem)?;
        let n = problem.eqn.nstates();
        let root_finder = problem
            .eqn
            .root()
            .map(|root| RootFinder::new(root.nout(), n));
        let ret = Self {
            problem,
            k: vec![Eqn::V::zeros(n); tableau.s()],
            history: StepHistory::new(tableau.order()),
            tableau,
            y_new: Eqn::V::zeros(n),
            dy_new: Eqn::V::zeros(n),
            y_stage: Eqn::V::zeros(n),
            error: Eqn::V::zeros(n),
            y_prev: state.y.clone(),
            dy_prev: state.dy.clone(),
            t_prev: state.t,
            state,
            status: RunStatus::Setup,
            err_prev: 1.0,
            statistics: OdeSolverStatistics::default(),
            root_finder,
            tstop: None,
            is_state_modified: false,
        };
        ret.init_root_finder()?;
        Ok(ret)
    }

    fn init_root_finder(&self) -> Result<(), IvpsolError> {
        if let (Some(root_finder), Some(root_fn)) = (self.root_finder.as_ref(), self.problem.eqn.root()) {
            root_finder.init(root_fn, &self.state.y, self.state.t)?;
        }
        Ok(())
    }

    /// Pick up a state modified through [OdeSolverMethod::state_mut].
    fn reinitialise(&mut self) -> Result<(), IvpsolError> {
        self.state.check_consistent_with_problem(self.problem)?;
        self.problem
            .eqn
            .rhs()
            .call_inplace(&self.state.y, self.state.t, &mut self.state.dy)?;
        self.y_prev.copy_from(&self.state.y)?;
        self.dy_prev.copy_from(&self.state.dy)?;
        self.t_prev = self.state.t;
        self.err_prev = 1.0;
        self.is_state_modified = false;
        self.init_root_finder()?;
        if let Some(tstop) = self.tstop {
            self.handle_tstop(tstop)?;
        }
        Ok(())
    }

    fn min_step(&self) -> Scalar {
        let config = &self.problem.config;
        config
            .explicit_rk
            .minimum_timestep
            .max(config.h_min.unwrap_or(0.0))
    }

    /// Evaluate the stages for a step of size `h` from the current state, leaving the new
    /// solution in `y_new` and the embedded error estimate in `error`.
    fn attempt(&mut self, h: Scalar) -> Result<(), IvpsolError> {
        let t = self.state.t;
        let s = self.tableau.s();
        let rhs = self.problem.eqn.rhs();
        self.k[0].copy_from(&self.state.dy)?;
        for i in 1..s {
            self.y_stage.copy_from(&self.state.y)?;
            for (j, &a) in self.tableau.a(i).iter().enumerate() {
                if a != 0.0 {
                    self.y_stage.axpy(h * a, &self.k[j], 1.0)?;
                }
            }
            let t_stage = t + self.tableau.c()[i] * h;
            rhs.call_inplace(&self.y_stage, t_stage, &mut self.k[i])?;
        }

        if self.tableau.is_fsal() {
            // the last stage was evaluated at the new solution
            self.y_new.copy_from(&self.y_stage)?;
        } else {
            self.y_new.copy_from(&self.state.y)?;
            for (j, &b) in self.tableau.b().iter().enumerate() {
                if b != 0.0 {
                    self.y_new.axpy(h * b, &self.k[j], 1.0)?;
                }
            }
        }

        self.error.fill(0.0);
        for (j, &d) in self.tableau.d().iter().enumerate() {
            if d != 0.0 {
                self.error.axpy(h * d, &self.k[j], 1.0)?;
            }
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
            self.state.h = tstop - t;
        }
        Ok(None)
    }

    /// `y(t)` from the cubic Hermite interpolant over the last step.
    fn interpolate_hermite(&self, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        let h = self.state.t - self.t_prev;
        if h == 0.0 {
            return y.copy_from(&self.state.y);
        }
        let s = (t - self.t_prev) / h;
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        y.copy_from(&self.y_prev)?;
        y.scale_mut(h00);
        y.axpy(h10 * h, &self.dy_prev, 1.0)?;
        y.axpy(h01, &self.state.y, 1.0)?;
        y.axpy(h11 * h, &self.state.dy, 1.0)
    }

    fn try_step(&mut self) -> Result<OdeSolverStopReason, IvpsolError> {
        if self.is_state_modified {
            self.reinitialise()?;
        }
        let config = &self.problem.config.explicit_rk;
        let order = self.tableau.order() as Scalar;
        let mut rejections = 0;

        let error_norm = loop {
            let h = self.state.h;
            self.attempt(h)?;
            let error_norm = self
                .error
                .squared_norm(&self.y_new, &self.problem.atol, self.problem.rtol())?
                .sqrt();
            if error_norm <= 1.0 {
                break error_norm;
            }

            rejections += 1;
            self.statistics.number_of_error_test_failures += 1;
            if rejections >= config.maximum_error_test_failures {
                return Err(ode_solver_error!(
                    RepeatedStepFailure,
                    time: self.state.t,
                    failures: rejections
                ));
            }
            let factor = config.safety * error_norm.powf(-1.0 / order);
            let factor = if factor.is_nan() {
                config.minimum_timestep_shrink
            } else {
                factor.clamp(config.minimum_timestep_shrink, config.safety)
            };
            debug!(
                "error test failed at t = {}: error = {error_norm:.3e}, h = {h:.3e} -> {:.3e}",
                self.state.t,
                h * factor
            );
            self.state.h = h * factor;
            if self.state.h.abs() < self.min_step() {
                return Err(ode_solver_error!(StepSizeTooSmall, time: self.state.t));
            }
        };

        // take the accepted step, keeping the old end point for dense output
        let h = self.state.h;
        let t_new = self.state.t + h;
        if self.tableau.is_fsal() {
            let last = self.tableau.s() - 1;
            self.dy_new.copy_from(&self.k[last])?;
        } else {
            self.problem
                .eqn
                .rhs()
                .call_inplace(&self.y_new, t_new, &mut self.dy_new)?;
        }
        std::mem::swap(&mut self.y_prev, &mut self.state.y);
        std::mem::swap(&mut self.dy_prev, &mut self.state.dy);
        std::mem::swap(&mut self.state.y, &mut self.y_new);
        std::mem::swap(&mut self.state.dy, &mut self.dy_new);
        self.t_prev = self.state.t;
        self.state.t = t_new;
        self.statistics.number_of_steps += 1;

        // PI step size control
        let mut factor = config.safety
            * error_norm.powf(-0.7 / order)
            * self.err_prev.powf(0.4 / order);
        factor = if factor.is_nan() {
            1.0
        } else {
            factor.clamp(config.minimum_timestep_shrink, config.maximum_timestep_growth)
        };
        if rejections > 0 {
            factor = factor.min(1.0);
        }
        self.err_prev = error_norm.max(1e-4);
        let mut h_next = h * factor;
        if let Some(h_max) = self.problem.config.h_max {
            if h_next.abs() > h_max {
                h_next = h_max.copysign(h_next);
            }
        }
        self.state.h = h_next;

        self.history.push(StepRecord {
            t: self.state.t,
            h,
            order: self.tableau.order(),
            error_norm,
            rejections,
            h_next,
        });

        if let (Some(root_finder), Some(root_fn)) = (self.root_finder.as_ref(), self.problem.eqn.root()) {
            let interpolate = |t: Scalar, y: &mut Eqn::V| self.interpolate_hermite(t, y);
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

impl<'a, Eqn: OdeEquations> OdeSolverMethod<'a, Eqn> for ExplicitRk<'a, Eqn> {
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
        self.tableau.order()
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
        if t == state.t {
            return y.copy_from(&state.y);
        }
        if self.is_state_modified {
            return Err(ode_solver_error!(InterpolationTimeOutsideCurrentStep));
        }
        let direction = state.h.signum();
        if (t - state.t) * direction > 0.0 {
            return Err(ode_solver_error!(InterpolationTimeAfterCurrentTime));
        }
        if (t - self.t_prev) * direction < 0.0 {
            return Err(ode_solver_error!(InterpolationTimeOutsideCurrentStep));
        }
        self.interpolate_hermite(t, y)
    }
}
