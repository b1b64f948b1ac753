//! Matrix-free Krylov solvers.
//!
//! Every method works on a [LinearOperator] and a [Preconditioner], takes `x` as the initial
//! guess and overwrites it with the solution. Convergence is declared once the residual 2-norm
//! drops below `tolerance * ||b||`.

use std::cell::Cell;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IvpsolError;
use crate::{linear_solver_error, Matrix, NonLinearOpJacobian, Scalar, Vector};

use super::{
    IdentityPreconditioner, JacobianOperator, LinearOperator, LinearSolveSolution, LinearSolver,
    Preconditioner,
};

mod bicgstab;
mod gmres;
mod pcg;
mod tfqmr;

pub use bicgstab::bicgstab;
pub use gmres::{fgmres, gmres};
pub use pcg::pcg;
pub use tfqmr::tfqmr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrylovMethod {
    Gmres,
    /// GMRES with a preconditioner that may change between iterations.
    FlexibleGmres,
    BiCgStab,
    /// Only for symmetric positive definite operators.
    Pcg,
    Tfqmr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrylovConfig {
    /// Maximum number of operator applications in the inner iteration.
    pub max_iterations: usize,
    /// Krylov subspace dimension before a GMRES restart.
    pub restart: usize,
    /// Relative tolerance on the residual 2-norm.
    pub tolerance: Scalar,
}

impl Default for KrylovConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            restart: 30,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrylovStats {
    pub iterations: usize,
    pub residual_norm: Scalar,
}

/// Run `method` on `A x = b`.
pub fn solve_krylov<V: Vector>(
    method: KrylovMethod,
    op: &dyn LinearOperator<V>,
    precon: &dyn Preconditioner<V>,
    b: &V,
    x: &mut V,
    config: &KrylovConfig,
) -> Result<KrylovStats, IvpsolError> {
    crate::vector::check_length(op.nrows(), b.len())?;
    crate::vector::check_length(op.nrows(), x.len())?;
    match method {
        KrylovMethod::Gmres => gmres(op, precon, b, x, config),
        KrylovMethod::FlexibleGmres => fgmres(op, precon, b, x, config),
        KrylovMethod::BiCgStab => bicgstab(op, precon, b, x, config),
        KrylovMethod::Pcg => pcg(op, precon, b, x, config),
        KrylovMethod::Tfqmr => tfqmr(op, precon, b, x, config),
    }
}

/// The absolute residual target, or `None` if `b = 0` (in which case `x` is set to zero).
pub(crate) fn target_residual<V: Vector>(
    b: &V,
    x: &mut V,
    config: &KrylovConfig,
) -> Option<Scalar> {
    let bnorm = b.norm();
    if bnorm == 0.0 {
        x.fill(0.0);
        None
    } else {
        Some(config.tolerance * bnorm)
    }
}

pub(crate) fn not_converged(iterations: usize, residual: Scalar) -> IvpsolError {
    linear_solver_error!(NoConvergence, iterations: iterations, residual: residual)
}

/// A [LinearSolver] that solves with the Jacobian action of the operator, never assembling it.
pub struct KrylovSolver<M: Matrix> {
    method: KrylovMethod,
    config: KrylovConfig,
    preconditioner: Box<dyn Preconditioner<M::V>>,
    linearisation: Option<(M::V, Scalar)>,
    iterations: Cell<usize>,
}

impl<M: Matrix> fmt::Debug for KrylovSolver<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KrylovSolver")
            .field("method", &self.method)
            .field("config", &self.config)
            .field("iterations", &self.iterations.get())
            .finish()
    }
}

impl<M: Matrix> Default for KrylovSolver<M> {
    fn default() -> Self {
        Self::new(KrylovMethod::Gmres)
    }
}

impl<M: Matrix> KrylovSolver<M> {
    pub fn new(method: KrylovMethod) -> Self {
        Self {
            method,
            config: KrylovConfig::default(),
            preconditioner: Box::new(IdentityPreconditioner),
            linearisation: None,
            iterations: Cell::new(0),
        }
    }

    pub fn with_config(mut self, config: KrylovConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_preconditioner(
        mut self,
        preconditioner: impl Preconditioner<M::V> + 'static,
    ) -> Self {
        self.preconditioner = Box::new(preconditioner);
        self
    }

    pub fn method(&self) -> KrylovMethod {
        self.method
    }

    pub fn config(&self) -> &KrylovConfig {
        &self.config
    }

    /// Prepare the preconditioner for `op`, ahead of [Self::solve_system].
    pub fn setup(&mut self, op: &dyn LinearOperator<M::V>) -> Result<(), IvpsolError> {
        self.preconditioner.setup(op)
    }

    /// Solve `op x = b` from a zero initial guess.
    pub fn solve_system(
        &self,
        op: &dyn LinearOperator<M::V>,
        b: &M::V,
    ) -> Result<LinearSolveSolution<M::V>, IvpsolError> {
        let mut x = M::V::zeros(b.len());
        let stats = solve_krylov(
            self.method,
            op,
            self.preconditioner.as_ref(),
            b,
            &mut x,
            &self.config,
        )?;
        self.iterations.set(self.iterations.get() + stats.iterations);
        Ok(LinearSolveSolution {
            x,
            residual_norm: stats.residual_norm,
            iterations: stats.iterations,
        })
    }
}

impl<M: Matrix> LinearSolver<M> for KrylovSolver<M> {
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        _op: &C,
    ) -> Result<(), IvpsolError> {
        self.linearisation = None;
        Ok(())
    }

    fn clear_problem(&mut self) {
        self.linearisation = None;
    }

    fn set_linearisation<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
    ) -> Result<(), IvpsolError> {
        self.linearisation = None;
        self.preconditioner.setup(&JacobianOperator::new(op, x, t))?;
        self.linearisation = Some((x.clone(), t));
        Ok(())
    }

    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &self,
        op: &C,
        b: &mut M::V,
    ) -> Result<(), IvpsolError> {
        let (x, t) = self
            .linearisation
            .as_ref()
            .ok_or_else(|| linear_solver_error!(LinearSolverNotSetup))?;
        let jac = JacobianOperator::new(op, x, *t);
        let soln = self.solve_system(&jac, b)?;
        b.copy_from(&soln.x)
    }

    fn is_setup(&self) -> bool {
        self.linearisation.is_some()
    }

    fn number_of_linear_iterations(&self) -> usize {
        self.iterations.get()
    }
}
