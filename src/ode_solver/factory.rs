use serde::{Deserialize, Serialize};

use crate::error::IvpsolError;
use crate::linear_solver::{AnyLinearSolver, DirectSolver, KrylovSolver};
use crate::nonlinear_solver::{AnyNonLinearSolver, FixedPointSolver, NewtonNonlinearSolver};
use crate::vector::VectorBackend;
use crate::Scalar;

use super::bdf::Bdf;
use super::config::{LinearSolverKind, MethodFamily, NonLinearSolverKind, SolverConfiguration};
use super::equations::OdeEquations;
use super::explicit_rk::ExplicitRk;
use super::method::{OdeSolverMethod, OdeSolverStopReason, RunStatus};
use super::problem::OdeSolverProblem;
use super::state::OdeSolverState;
use super::statistics::{OdeSolverStatistics, StepHistory};
use super::tableau::RkTableau;

impl SolverConfiguration {
    /// The nonlinear solver (and, for Newton, the linear solver) this configuration asks for.
    pub fn nonlinear_solver_for<M: crate::Matrix>(&self) -> AnyNonLinearSolver<M> {
        match self.nonlinear_solver {
            NonLinearSolverKind::Newton => {
                let linear_solver = match self.linear_solver.krylov_method() {
                    None => AnyLinearSolver::Direct(DirectSolver::default()),
                    Some(method) => AnyLinearSolver::Krylov(
                        KrylovSolver::new(method).with_config(self.krylov.clone()),
                    ),
                };
                AnyNonLinearSolver::Newton(NewtonNonlinearSolver::new(linear_solver))
            }
            NonLinearSolverKind::FixedPoint { anderson_depth } => {
                AnyNonLinearSolver::FixedPoint(FixedPointSolver::new(anderson_depth))
            }
        }
    }
}

impl<Eqn: OdeEquations> OdeSolverProblem<Eqn> {
    /// A BDF solver with the nonlinear and linear solvers named by the configuration.
    pub fn bdf(&self) -> Result<Bdf<'_, Eqn>, IvpsolError> {
        Bdf::new(self, self.config.nonlinear_solver_for())
    }

    /// An explicit Runge-Kutta solver with the configured tableau, Dormand-Prince 5(4) unless
    /// the configured method is an explicit Runge-Kutta one.
    pub fn explicit_rk(&self) -> Result<ExplicitRk<'_, Eqn>, IvpsolError> {
        let tableau = match self.config.method {
            MethodFamily::ExplicitRk(tableau) => tableau,
            MethodFamily::Bdf => RkTableau::DormandPrince54,
        };
        ExplicitRk::new(self, tableau.tableau())
    }

    /// The solver for the configured method family.
    pub fn solver(&self) -> Result<OdeSolver<'_, Eqn>, IvpsolError> {
        match self.config.method {
            MethodFamily::Bdf => Ok(OdeSolver::Bdf(self.bdf()?)),
            MethodFamily::ExplicitRk(_) => Ok(OdeSolver::ExplicitRk(self.explicit_rk()?)),
        }
    }
}

/// A solver whose method family is chosen at run time, see [OdeSolverProblem::solver].
pub enum OdeSolver<'a, Eqn: OdeEquations> {
    Bdf(Bdf<'a, Eqn>),
    ExplicitRk(ExplicitRk<'a, Eqn>),
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $body:expr) => {
        match $self {
            OdeSolver::Bdf($s) => $body,
            OdeSolver::ExplicitRk($s) => $body,
        }
    };
}

impl<'a, Eqn: OdeEquations> OdeSolverMethod<'a, Eqn> for OdeSolver<'a, Eqn> {
    fn problem(&self) -> &'a OdeSolverProblem<Eqn> {
        dispatch!(self, s => s.problem())
    }

    fn state(&self) -> &OdeSolverState<Eqn::V> {
        dispatch!(self, s => s.state())
    }

    fn state_mut(&mut self) -> &mut OdeSolverState<Eqn::V> {
        dispatch!(self, s => s.state_mut())
    }

    fn status(&self) -> RunStatus {
        dispatch!(self, s => s.status())
    }

    fn order(&self) -> usize {
        dispatch!(self, s => s.order())
    }

    fn statistics(&self) -> &OdeSolverStatistics {
        dispatch!(self, s => s.statistics())
    }

    fn step_records(&self) -> &StepHistory {
        dispatch!(self, s => s.step_records())
    }

    fn step(&mut self) -> Result<OdeSolverStopReason, IvpsolError> {
        dispatch!(self, s => s.step())
    }

    fn set_stop_time(&mut self, tstop: Scalar) -> Result<(), IvpsolError> {
        dispatch!(self, s => s.set_stop_time(tstop))
    }

    fn interpolate_inplace(&self, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        dispatch!(self, s => s.interpolate_inplace(t, y))
    }
}

/// What this build of the crate can be configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub vector_backends: Vec<VectorBackend>,
    pub methods: Vec<MethodFamily>,
    pub nonlinear_solvers: Vec<NonLinearSolverKind>,
    pub linear_solvers: Vec<LinearSolverKind>,
}

impl Capabilities {
    pub fn new() -> Self {
        let mut vector_backends = vec![VectorBackend::Serial];
        if cfg!(feature = "parallel") {
            vector_backends.push(VectorBackend::Parallel);
        }
        Self {
            vector_backends,
            methods: vec![
                MethodFamily::Bdf,
                MethodFamily::ExplicitRk(RkTableau::DormandPrince54),
                MethodFamily::ExplicitRk(RkTableau::BogackiShampine32),
                MethodFamily::ExplicitRk(RkTableau::Tsitouras54),
            ],
            nonlinear_solvers: vec![
                NonLinearSolverKind::Newton,
                NonLinearSolverKind::FixedPoint { anderson_depth: 0 },
            ],
            linear_solvers: LinearSolverKind::ALL.to_vec(),
        }
    }

    pub fn supports_method(&self, method: &MethodFamily) -> bool {
        self.methods.contains(method)
    }

    pub fn supports_linear_solver(&self, kind: LinearSolverKind) -> bool {
        self.linear_solvers.contains(&kind)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use crate::ode_solver::test_models::exponential_decay::exponential_decay_problem;
    use crate::ode_solver::test_models::exponential_decay_with_algebraic::exponential_decay_with_algebraic_problem;
    use crate::ode_solver::tests::test_ode_solver;

    #[test]
    fn configured_solvers_are_built() {
        let config = SolverConfiguration {
            linear_solver: LinearSolverKind::Gmres,
            ..Default::default()
        };
        match config.nonlinear_solver_for::<DenseMatrix>() {
            AnyNonLinearSolver::Newton(_) => {}
            AnyNonLinearSolver::FixedPoint(_) => panic!("expected Newton"),
        }
        let config = SolverConfiguration {
            nonlinear_solver: NonLinearSolverKind::FixedPoint { anderson_depth: 3 },
            ..Default::default()
        };
        assert!(matches!(
            config.nonlinear_solver_for::<DenseMatrix>(),
            AnyNonLinearSolver::FixedPoint(_)
        ));
    }

    #[test]
    fn solver_follows_the_method_family() {
        let (mut problem, soln) = exponential_decay_problem::<DenseMatrix>(false);
        {
            let mut s = problem.solver().unwrap();
            assert!(matches!(s, OdeSolver::Bdf(_)));
            test_ode_solver(&mut s, &soln, None, false);
        }
        problem.config.method = MethodFamily::ExplicitRk(RkTableau::Tsitouras54);
        let mut s = problem.solver().unwrap();
        assert!(matches!(s, OdeSolver::ExplicitRk(_)));
        assert_eq!(s.order(), 5);
        test_ode_solver(&mut s, &soln, None, true);
        assert_eq!(s.status(), RunStatus::Completed);
    }

    #[test]
    fn explicit_method_refuses_a_mass() {
        let (mut problem, _) = exponential_decay_with_algebraic_problem::<DenseMatrix>();
        assert!(problem.solver().is_ok());
        problem.config.method = MethodFamily::ExplicitRk(RkTableau::DormandPrince54);
        let err = problem.solver().err().unwrap();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Mass matrix not supported for this solver");
    }

    #[test]
    fn capabilities() {
        let caps = Capabilities::new();
        assert!(caps.supports_method(&MethodFamily::Bdf));
        assert!(caps.supports_method(&MethodFamily::ExplicitRk(RkTableau::BogackiShampine32)));
        for kind in LinearSolverKind::ALL {
            assert!(caps.supports_linear_solver(kind));
        }
        assert_eq!(caps.vector_backends[0], VectorBackend::Serial);
        assert_eq!(
            caps.vector_backends.contains(&VectorBackend::Parallel),
            cfg!(feature = "parallel")
        );
        insta::assert_debug_snapshot!(caps.linear_solvers, @r"
        [
            Direct,
            Gmres,
            FlexibleGmres,
            BiCgStab,
            Pcg,
            Tfqmr,
        ]
        ");
    }
}
