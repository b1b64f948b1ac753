//! Preconditioned conjugate gradients for symmetric positive definite operators.

use log::trace;

use crate::error::IvpsolError;
use crate::linear_solver::{LinearOperator, Preconditioner};
use crate::{linear_solver_error, Vector};

use super::{not_converged, target_residual, KrylovConfig, KrylovStats};

/// Fails with `NotPositiveDefinite` as soon as a search direction has `p^T A p <= 0`.
pub fn pcg<V: Vector>(
    op: &dyn LinearOperator<V>,
    precon: &dyn Preconditioner<V>,
    b: &V,
    x: &mut V,
    config: &KrylovConfig,
) -> Result<KrylovStats, IvpsolError> {
    let target = match target_residual(b, x, config) {
        Some(target) => target,
        None => {
            return Ok(KrylovStats {
                iterations: 0,
                residual_norm: 0.0,
            })
        }
    };
    let n = b.len();
    let mut r = V::zeros(n);
    op.residual(x, b, &mut r)?;
    let mut rnorm = r.norm();
    if rnorm <= target {
        return Ok(KrylovStats {
            iterations: 0,
            residual_norm: rnorm,
        });
    }
    let mut z = V::zeros(n);
    precon.apply(&r, &mut z)?;
    let mut p = z.clone();
    let mut ap = V::zeros(n);
    let mut rz = r.dot(&z)?;

    for i in 1..=config.max_iterations {
        op.apply(&p, &mut ap)?;
        let pap = p.dot(&ap)?;
        if pap <= 0.0 {
            return Err(linear_solver_error!(NotPositiveDefinite));
        }
        let alpha = rz / pap;
        x.axpy(alpha, &p, 1.0)?;
        r.axpy(-alpha, &ap, 1.0)?;
        rnorm = r.norm();
        trace!("pcg iteration {}: residual {:.3e}", i, rnorm);
        if rnorm <= target {
            return Ok(KrylovStats {
                iterations: i,
                residual_norm: rnorm,
            });
        }
        precon.apply(&r, &mut z)?;
        let rz_new = r.dot(&z)?;
        p.axpy(1.0, &z, rz_new / rz)?;
        rz = rz_new;
    }
    Err(not_converged(config.max_iterations, rnorm))
}
