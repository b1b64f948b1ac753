//! # ivpsol
//!
//! Adaptive integrators for initial value problems `m y' = f(y, p, t)`, where the diagonal
//! mass `m` may have zero entries (a semi-explicit DAE).
//!
//! A problem is assembled with [OdeBuilder] from closures for the right-hand side, its
//! Jacobian (as an action `v -> J v` or as a matrix) and the initial condition, together with
//! the [SolverConfiguration] it is solved with. The problem then hands out solvers:
//!
//! - [Bdf]: variable order, variable step BDF (NDF) formulas, for stiff problems and DAEs. The
//!   stage equations are solved by Newton's method with a direct or Krylov linear solver, or by
//!   an Anderson accelerated fixed point iteration.
//! - [ExplicitRk]: embedded explicit Runge-Kutta pairs for non-stiff problems.
//! - [OdeSolver]: either of the above, chosen by the configured [MethodFamily].
//!
//! Jacobians can be stored dense ([DenseMatrix]), banded ([BandMatrix]) or sparse
//! ([SparseMatrix]), and the vector operations can run on the rayon pool (the `parallel`
//! feature). Runs are deterministic, repeating one gives bit-identical results.
//!
//! ```
//! use ivpsol::{DenseMatrix, OdeBuilder, OdeSolverMethod};
//! type V = nalgebra::DVector<f64>;
//!
//! let problem = OdeBuilder::<DenseMatrix>::new()
//!     .p([0.1])
//!     .rhs(|x: &V, p: &V, _t: f64, y: &mut V| y[0] = -p[0] * x[0])
//!     .jacobian_action(|_x: &V, p: &V, _t: f64, v: &V, y: &mut V| y[0] = -p[0] * v[0])
//!     .init(|_p: &V, _t: f64, y: &mut V| y[0] = 1.0, 1)
//!     .build()
//!     .unwrap();
//! let mut solver = problem.bdf().unwrap();
//! let (ys, ts) = solver.solve(10.0).unwrap();
//! assert_eq!(*ts.last().unwrap(), 10.0);
//! assert!((ys.last().unwrap()[0] - (-1.0f64).exp()).abs() < 1e-4);
//! ```

pub mod error;
pub mod jacobian;
pub mod linear_solver;
pub mod matrix;
pub mod nonlinear_solver;
pub mod ode_solver;
pub mod op;
pub mod scalar;
pub mod vector;

pub use error::{ErrorKind, IvpsolError};
pub use linear_solver::{
    AnyLinearSolver, DirectSolver, KrylovConfig, KrylovMethod, KrylovSolver, LinearSolver,
};
pub use matrix::{BandMatrix, DenseMatrix, Matrix, SparseMatrix};
pub use nonlinear_solver::{
    AnyNonLinearSolver, Convergence, FixedPointSolver, NewtonNonlinearSolver, NonLinearSolver,
    NonLinearSolverStatus,
};
pub use ode_solver::{
    bdf::Bdf,
    builder::OdeBuilder,
    config::{
        AbsoluteTolerance, BdfConfig, ExplicitRkConfig, LinearSolverKind, MethodFamily,
        NonLinearSolverKind, SolverConfiguration,
    },
    equations::{OdeEquations, OdeSolverEquations},
    explicit_rk::ExplicitRk,
    factory::{Capabilities, OdeSolver},
    method::{OdeSolverMethod, OdeSolverStopReason, RunStatus},
    problem::{OdeSolverProblem, OdeSolverSolution},
    state::OdeSolverState,
    statistics::{OdeSolverStatistics, StepHistory, StepRecord},
    tableau::{RkTableau, Tableau},
};
pub use op::{closure::Closure, NonLinearOp, NonLinearOpJacobian, Op};
pub use scalar::{IndexType, Scalar};
#[cfg(feature = "parallel")]
pub use vector::ParallelVector;
pub use vector::{Vector, VectorBackend};
