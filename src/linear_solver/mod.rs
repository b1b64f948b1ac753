use crate::error::IvpsolError;
use crate::{Matrix, NonLinearOpJacobian, Scalar, Vector};

pub mod direct;
pub mod krylov;
pub mod preconditioner;

pub use direct::DirectSolver;
pub use krylov::{KrylovConfig, KrylovMethod, KrylovSolver};
pub use preconditioner::{
    FnPreconditioner, IdentityPreconditioner, JacobiPreconditioner, Preconditioner,
};

/// A solver for the linear problem `Ax = b`, where `A` is the linearisation `dF/dx(x, t)` of a
/// nonlinear operator `F`.
///
/// The operator is passed to every call rather than stored, so one solver can be reused for
/// any operator with the same matrix type.
pub trait LinearSolver<M: Matrix>: Default {
    /// Prepare the solver for operators with the structure of `op`. Any previous state is reset.
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError>;

    /// Clear the current problem, any internal state of the solver is reset.
    fn clear_problem(&mut self);

    /// Set the point `(x, t)` at which the operator is linearised.
    ///
    /// Direct solvers assemble and factorize the Jacobian here, so a singular matrix is reported
    /// by this call rather than by [Self::solve_in_place].
    fn set_linearisation<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
    ) -> Result<(), IvpsolError>;

    /// Solve `Ax = b` in place, overwriting `b` with `x`.
    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &self,
        op: &C,
        b: &mut M::V,
    ) -> Result<(), IvpsolError>;

    /// Solve `Ax = b` and return `x`.
    fn solve<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &self,
        op: &C,
        b: &M::V,
    ) -> Result<M::V, IvpsolError> {
        let mut b = b.clone();
        self.solve_in_place(op, &mut b)?;
        Ok(b)
    }

    /// True once [Self::set_linearisation] has succeeded.
    fn is_setup(&self) -> bool;

    /// Total number of inner iterations performed (zero for direct solvers).
    fn number_of_linear_iterations(&self) -> usize {
        0
    }
}

/// The result of a standalone linear solve.
#[derive(Debug, Clone)]
pub struct LinearSolveSolution<V> {
    pub x: V,
    /// `||b - A x||_2` for the returned `x`.
    pub residual_norm: Scalar,
    pub iterations: usize,
}

/// Anything that can compute `y = A x` for a square `A`.
pub trait LinearOperator<V: Vector> {
    fn nrows(&self) -> usize;
    fn apply(&self, x: &V, y: &mut V) -> Result<(), IvpsolError>;

    /// `r = b - A x`
    fn residual(&self, x: &V, b: &V, r: &mut V) -> Result<(), IvpsolError> {
        self.apply(x, r)?;
        r.axpy(1.0, b, -1.0)
    }
}

/// A [LinearOperator] backed by an assembled matrix.
pub struct MatrixOperator<'a, M: Matrix>(pub &'a M);

impl<M: Matrix> LinearOperator<M::V> for MatrixOperator<'_, M> {
    fn nrows(&self) -> usize {
        self.0.nrows()
    }
    fn apply(&self, x: &M::V, y: &mut M::V) -> Result<(), IvpsolError> {
        self.0.gemv(1.0, x, 0.0, y)
    }
}

/// A matrix-free [LinearOperator] given by a closure `(x, y) -> y = A x`.
pub struct FnOperator<F> {
    n: usize,
    f: F,
}

impl<F> FnOperator<F> {
    pub fn new(n: usize, f: F) -> Self {
        Self { n, f }
    }
}

impl<V: Vector, F: Fn(&V, &mut V)> LinearOperator<V> for FnOperator<F> {
    fn nrows(&self) -> usize {
        self.n
    }
    fn apply(&self, x: &V, y: &mut V) -> Result<(), IvpsolError> {
        crate::vector::check_length(self.n, x.len())?;
        crate::vector::check_length(self.n, y.len())?;
        (self.f)(x, y);
        Ok(())
    }
}

/// The Jacobian of `op` at `(x, t)`, applied through [NonLinearOpJacobian::jac_mul_inplace].
pub struct JacobianOperator<'a, C: NonLinearOpJacobian> {
    op: &'a C,
    x: &'a C::V,
    t: Scalar,
}

impl<'a, C: NonLinearOpJacobian> JacobianOperator<'a, C> {
    pub fn new(op: &'a C, x: &'a C::V, t: Scalar) -> Self {
        Self { op, x, t }
    }
}

impl<C: NonLinearOpJacobian> LinearOperator<C::V> for JacobianOperator<'_, C> {
    fn nrows(&self) -> usize {
        self.op.nout()
    }
    fn apply(&self, v: &C::V, y: &mut C::V) -> Result<(), IvpsolError> {
        self.op.jac_mul_inplace(self.x, self.t, v, y)
    }
}

/// Either solver family, selected at runtime.
#[derive(Debug)]
pub enum AnyLinearSolver<M: Matrix> {
    Direct(DirectSolver<M>),
    Krylov(KrylovSolver<M>),
}

impl<M: Matrix> Default for AnyLinearSolver<M> {
    fn default() -> Self {
        Self::Direct(DirectSolver::default())
    }
}

impl<M: Matrix> LinearSolver<M> for AnyLinearSolver<M> {
    fn set_problem<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
    ) -> Result<(), IvpsolError> {
        match self {
            Self::Direct(s) => s.set_problem(op),
            Self::Krylov(s) => s.set_problem(op),
        }
    }

    fn clear_problem(&mut self) {
        match self {
            Self::Direct(s) => s.clear_problem(),
            Self::Krylov(s) => s.clear_problem(),
        }
    }

    fn set_linearisation<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &mut self,
        op: &C,
        x: &M::V,
        t: Scalar,
    ) -> Result<(), IvpsolError> {
        match self {
            Self::Direct(s) => s.set_linearisation(op, x, t),
            Self::Krylov(s) => s.set_linearisation(op, x, t),
        }
    }

    fn solve_in_place<C: NonLinearOpJacobian<V = M::V, M = M>>(
        &self,
        op: &C,
        b: &mut M::V,
    ) -> Result<(), IvpsolError> {
        match self {
            Self::Direct(s) => s.solve_in_place(op, b),
            Self::Krylov(s) => s.solve_in_place(op, b),
        }
    }

    fn is_setup(&self) -> bool {
        match self {
            Self::Direct(s) => s.is_setup(),
            Self::Krylov(s) => s.is_setup(),
        }
    }

    fn number_of_linear_iterations(&self) -> usize {
        match self {
            Self::Direct(s) => s.number_of_linear_iterations(),
            Self::Krylov(s) => s.number_of_linear_iterations(),
        }
    }
}
