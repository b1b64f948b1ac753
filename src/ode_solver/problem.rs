use crate::error::IvpsolError;
use crate::{Scalar, Vector};

use super::config::SolverConfiguration;
use super::equations::OdeEquations;

/// An initial value problem together with the configuration it is solved with.
///
/// The configuration is validated against the equations on construction and is read-only
/// afterwards; solvers borrow the problem for the duration of a run.
pub struct OdeSolverProblem<Eqn: OdeEquations> {
    pub eqn: Eqn,
    pub config: SolverConfiguration,
    /// `atol` expanded to one entry per state.
    pub atol: Eqn::V,
    pub t0: Scalar,
}

impl<Eqn: OdeEquations> OdeSolverProblem<Eqn> {
    pub fn new(eqn: Eqn, config: SolverConfiguration, t0: Scalar) -> Result<Self, IvpsolError> {
        let nstates = eqn.nstates();
        config.validate(nstates, eqn.mass().is_some())?;
        let atol = config.atol.expand(nstates)?;
        Ok(Self {
            eqn,
            config,
            atol,
            t0,
        })
    }

    pub fn rtol(&self) -> Scalar {
        self.config.rtol
    }

    pub fn set_params(&mut self, p: Eqn::V) -> Result<(), IvpsolError> {
        self.eqn.set_params(p)
    }
}

#[derive(Debug, Clone)]
pub struct OdeSolverSolutionPoint<V: Vector> {
    pub state: V,
    pub t: Scalar,
}

/// Reference values of a solution, kept sorted by time.
pub struct OdeSolverSolution<V: Vector> {
    pub solution_points: Vec<OdeSolverSolutionPoint<V>>,
}

impl<V: Vector> OdeSolverSolution<V> {
    pub fn push(&mut self, state: V, t: Scalar) {
        let index = self
            .solution_points
            .iter()
            .position(|x| x.t > t)
            .unwrap_or(self.solution_points.len());
        self.solution_points
            .insert(index, OdeSolverSolutionPoint { state, t });
    }
}

impl<V: Vector> Default for OdeSolverSolution<V> {
    fn default() -> Self {
        Self {
            solution_points: Vec::new(),
        }
    }
}
