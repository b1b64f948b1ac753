use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::IvpsolError;
use crate::{ode_solver_error, Scalar, Vector};

use super::equations::OdeEquations;
use super::problem::OdeSolverProblem;
use super::state::OdeSolverState;
use super::statistics::{OdeSolverStatistics, StepHistory};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OdeSolverStopReason {
    InternalTimestep,
    RootFound(Scalar),
    TstopReached,
}

/// Where a run stands.
///
/// A solver starts in `Setup`, moves to `Stepping` on the first step and to `Completed` when
/// it reaches the stop time (a new stop time resumes `Stepping`). An error from a step moves it
/// to `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Setup,
    Stepping,
    Completed,
    Failed,
}

impl RunStatus {
    /// Check that another step may be taken.
    pub(crate) fn begin_step(&mut self) -> Result<(), IvpsolError> {
        if *self == RunStatus::Failed {
            return Err(ode_solver_error!(RunFailed));
        }
        *self = RunStatus::Stepping;
        Ok(())
    }

    /// Record the outcome of a step taken at time `t`.
    pub(crate) fn end_step(
        &mut self,
        result: &Result<OdeSolverStopReason, IvpsolError>,
        t: Scalar,
    ) {
        match result {
            Ok(OdeSolverStopReason::TstopReached) => *self = RunStatus::Completed,
            Ok(_) => {}
            Err(err) => {
                warn!("run failed at t = {t}: {err}");
                *self = RunStatus::Failed;
            }
        }
    }

    pub(crate) fn begin_stop_time(&mut self) -> Result<(), IvpsolError> {
        match self {
            RunStatus::Failed => Err(ode_solver_error!(RunFailed)),
            RunStatus::Completed => {
                *self = RunStatus::Stepping;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Trait for ODE solver methods. This is the main user interface for the ODE solvers.
///
/// A solver borrows its problem for the whole run and owns the state, which it advances one
/// adaptive step at a time.
///
/// # Example
///
/// ```
/// use ivpsol::{OdeEquations, OdeSolverMethod, OdeSolverStopReason};
///
/// fn solve_to<'a, Eqn: OdeEquations + 'a>(
///     solver: &mut impl OdeSolverMethod<'a, Eqn>,
///     t: f64,
/// ) -> Eqn::V {
///     solver.set_stop_time(t).unwrap();
///     while solver.step().unwrap() != OdeSolverStopReason::TstopReached {}
///     solver.state().y.clone()
/// }
/// ```
pub trait OdeSolverMethod<'a, Eqn: OdeEquations + 'a> {
    fn problem(&self) -> &'a OdeSolverProblem<Eqn>;

    fn state(&self) -> &OdeSolverState<Eqn::V>;

    /// Mutable access to the state. The next call to [Self::step] re-initialises the solver
    /// from the (possibly) modified state, which can be expensive for multistep methods.
    fn state_mut(&mut self) -> &mut OdeSolverState<Eqn::V>;

    fn status(&self) -> RunStatus;

    /// Current order of accuracy of the method.
    fn order(&self) -> usize;

    fn statistics(&self) -> &OdeSolverStatistics;

    /// The most recent accepted steps.
    fn step_records(&self) -> &StepHistory;

    /// Step the solution forward by one accepted step. Possible reasons for returning are:
    /// - `InternalTimestep`: the solver has taken a step to `self.state().t`
    /// - `RootFound(t_root)`: the event function has a zero at `t_root`. The state stays at the
    ///   end of the internal step, use [Self::interpolate] to get the solution at `t_root`.
    /// - `TstopReached`: the solver has stopped exactly at the time set by
    ///   [Self::set_stop_time]
    ///
    /// Once a step fails the run is over and every further call returns
    /// [crate::error::OdeSolverError::RunFailed].
    fn step(&mut self) -> Result<OdeSolverStopReason, IvpsolError>;

    /// Stop at `tstop`, which must lie after the current time. Once reached the stop time is
    /// unset.
    fn set_stop_time(&mut self, tstop: Scalar) -> Result<(), IvpsolError>;

    /// The solution at `t`, which must lie within the last step.
    fn interpolate_inplace(&self, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError>;

    fn interpolate(&self, t: Scalar) -> Result<Eqn::V, IvpsolError> {
        let mut y = Eqn::V::zeros(self.state().y.len());
        self.interpolate_inplace(t, &mut y)?;
        Ok(y)
    }

    /// Integrate to `final_time`, returning the solution at every internal step (the current
    /// state first). Stops early at the first root of the event function, whose interpolated
    /// solution is the last entry.
    #[allow(clippy::type_complexity)]
    fn solve(&mut self, final_time: Scalar) -> Result<(Vec<Eqn::V>, Vec<Scalar>), IvpsolError>
    where
        Self: Sized,
    {
        let mut ys = vec![self.state().y.clone()];
        let mut ts = vec![self.state().t];
        self.set_stop_time(final_time)?;
        loop {
            match self.step()? {
                OdeSolverStopReason::InternalTimestep => {
                    ys.push(self.state().y.clone());
                    ts.push(self.state().t);
                }
                OdeSolverStopReason::RootFound(t_root) => {
                    ys.push(self.interpolate(t_root)?);
                    ts.push(t_root);
                    break;
                }
                OdeSolverStopReason::TstopReached => {
                    ys.push(self.state().y.clone());
                    ts.push(self.state().t);
                    break;
                }
            }
        }
        Ok((ys, ts))
    }

    /// Integrate to the last entry of `t_eval`, returning the solution at each time in
    /// `t_eval`, which must be non-decreasing and not before the current time. Stops early at
    /// the first root of the event function, returning the solution up to it.
    fn solve_dense(&mut self, t_eval: &[Scalar]) -> Result<Vec<Eqn::V>, IvpsolError>
    where
        Self: Sized,
    {
        let t0 = self.state().t;
        let Some(&t_last) = t_eval.last() else {
            return Err(ode_solver_error!(InvalidTEval));
        };
        if t_eval[0] < t0 || t_eval.windows(2).any(|w| w[0] > w[1]) {
            return Err(ode_solver_error!(InvalidTEval));
        }
        if t_last > t0 {
            self.set_stop_time(t_last)?;
        }
        let mut ret = Vec::with_capacity(t_eval.len());
        for (i, &t) in t_eval.iter().enumerate() {
            while self.state().t < t {
                if let OdeSolverStopReason::RootFound(t_root) = self.step()? {
                    // the step that found the root covers every remaining time up to it
                    for &t in t_eval[i..].iter().take_while(|&&t| t <= t_root) {
                        ret.push(self.interpolate(t)?);
                    }
                    return Ok(ret);
                }
            }
            ret.push(self.interpolate(t)?);
        }
        Ok(ret)
    }
}
