use crate::error::IvpsolError;
use crate::{non_linear_solver_error, scalar::EPSILON, Scalar, Vector};

use super::convergence::Convergence;

/// Chooses the damping `alpha <= 1` of a Newton step `x <- x - alpha * delta`.
///
/// On entry `delta` holds the Newton correction at `x` and `norm` its weighted norm. On exit `x`
/// has been moved, `delta` holds the Newton correction at the new `x` and `norm` its norm. The
/// step length taken is returned.
pub trait LineSearch<V: Vector>: Default {
    #[allow(clippy::too_many_arguments)]
    fn take_step(
        &mut self,
        x: &mut V,
        norm: &mut Scalar,
        delta: &mut V,
        error_y: &V,
        fun: &impl Fn(&V, &mut V) -> Result<(), IvpsolError>,
        linear_solver: &impl Fn(&mut V) -> Result<(), IvpsolError>,
        convergence: &Convergence<V>,
    ) -> Result<Scalar, IvpsolError>;

    /// Number of backtracking steps taken during the last call.
    fn n_iters(&self) -> usize {
        0
    }
}

/// Always takes the full Newton step.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoLineSearch;

impl<V: Vector> LineSearch<V> for NoLineSearch {
    fn take_step(
        &mut self,
        x: &mut V,
        norm: &mut Scalar,
        delta: &mut V,
        error_y: &V,
        fun: &impl Fn(&V, &mut V) -> Result<(), IvpsolError>,
        linear_solver: &impl Fn(&mut V) -> Result<(), IvpsolError>,
        convergence: &Convergence<V>,
    ) -> Result<Scalar, IvpsolError> {
        x.axpy(-1.0, delta, 1.0)?;
        fun(x, delta)?;
        linear_solver(delta)?;
        *norm = convergence.norm(delta, error_y)?;
        Ok(1.0)
    }
}

/// Backtracking on the merit function `phi = ||delta||^2 / 2`, accepting the first `alpha` in
/// `1, tau, tau^2, ...` that satisfies the Armijo condition. Along the Newton direction the
/// derivative of `phi` is `-||delta||^2`, so the condition reads
/// `phi(x - alpha delta) <= phi(x) - c alpha ||delta||^2`.
///
/// Steps whose norm is already below the convergence tolerance are taken in full.
#[derive(Debug, Clone)]
pub struct BacktrackingLineSearch<V: Vector> {
    pub tau: Scalar,
    pub c: Scalar,
    /// Smallest allowed `alpha * norm`.
    pub steptol: Scalar,
    pub max_iter: usize,
    n_iters: usize,
    x0: V,
    delta0: V,
}

impl<V: Vector> Default for BacktrackingLineSearch<V> {
    fn default() -> Self {
        Self {
            tau: 0.5,
            c: 1e-4,
            steptol: EPSILON.powf(2.0 / 3.0),
            max_iter: 100,
            n_iters: 0,
            x0: V::zeros(0),
            delta0: V::zeros(0),
        }
    }
}

impl<V: Vector> LineSearch<V> for BacktrackingLineSearch<V> {
    fn take_step(
        &mut self,
        x: &mut V,
        norm: &mut Scalar,
        delta: &mut V,
        error_y: &V,
        fun: &impl Fn(&V, &mut V) -> Result<(), IvpsolError>,
        linear_solver: &impl Fn(&mut V) -> Result<(), IvpsolError>,
        convergence: &Convergence<V>,
    ) -> Result<Scalar, IvpsolError> {
        self.n_iters = 0;
        if *norm <= convergence.tol() {
            return NoLineSearch.take_step(
                x,
                norm,
                delta,
                error_y,
                fun,
                linear_solver,
                convergence,
            );
        }
        if self.x0.len() != x.len() {
            self.x0 = V::zeros(x.len());
            self.delta0 = V::zeros(x.len());
        }
        self.x0.copy_from(x)?;
        self.delta0.copy_from(delta)?;

        let phi0 = 0.5 * *norm * *norm;
        let min_alpha = self.steptol / *norm;
        let mut alpha = 1.0;
        for i in 0..self.max_iter {
            self.n_iters = i;
            x.axpy(-alpha, &self.delta0, 1.0)?;
            fun(x, delta)?;
            linear_solver(delta)?;
            let new_norm = convergence.norm(delta, error_y)?;
            let phi1 = 0.5 * new_norm * new_norm;
            if phi1 <= phi0 - self.c * alpha * 2.0 * phi0 {
                *norm = new_norm;
                return Ok(alpha);
            }
            alpha *= self.tau;
            if alpha < min_alpha {
                break;
            }
            x.copy_from(&self.x0)?;
        }
        x.copy_from(&self.x0)?;
        Err(non_linear_solver_error!(LineSearchFailed, alpha: alpha))
    }

    fn n_iters(&self) -> usize {
        self.n_iters
    }
}
