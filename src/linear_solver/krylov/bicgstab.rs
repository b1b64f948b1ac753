//! Right-preconditioned BiCGStab (van der Vorst, 1992).

use log::trace;

use crate::error::IvpsolError;
use crate::linear_solver::{LinearOperator, Preconditioner};
use crate::{linear_solver_error, Vector};

use super::{not_converged, target_residual, KrylovConfig, KrylovStats};

pub fn bicgstab<V: Vector>(
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
    let r_hat = r.clone();
    let mut p = V::zeros(n);
    let mut v = V::zeros(n);
    let mut p_hat = V::zeros(n);
    let mut s_hat = V::zeros(n);
    let mut t = V::zeros(n);
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);

    for i in 1..=config.max_iterations {
        let rho_new = r_hat.dot(&r)?;
        if rho_new == 0.0 {
            return Err(linear_solver_error!(Breakdown, iterations: i));
        }
        let beta = (rho_new / rho) * (alpha / omega);
        // p = r + beta (p - omega v)
        p.axpy(-omega, &v, 1.0)?;
        p.axpy(1.0, &r, beta)?;

        precon.apply(&p, &mut p_hat)?;
        op.apply(&p_hat, &mut v)?;
        let r_hat_v = r_hat.dot(&v)?;
        if r_hat_v == 0.0 {
            return Err(linear_solver_error!(Breakdown, iterations: i));
        }
        alpha = rho_new / r_hat_v;

        // s is stored in r
        r.axpy(-alpha, &v, 1.0)?;
        let snorm = r.norm();
        if snorm <= target {
            x.axpy(alpha, &p_hat, 1.0)?;
            trace!("bicgstab iteration {}: residual {:.3e}", i, snorm);
            return Ok(KrylovStats {
                iterations: i,
                residual_norm: snorm,
            });
        }

        precon.apply(&r, &mut s_hat)?;
        op.apply(&s_hat, &mut t)?;
        let tt = t.dot(&t)?;
        omega = if tt == 0.0 { 0.0 } else { t.dot(&r)? / tt };

        x.axpy(alpha, &p_hat, 1.0)?;
        x.axpy(omega, &s_hat, 1.0)?;
        r.axpy(-omega, &t, 1.0)?;
        rnorm = r.norm();
        trace!("bicgstab iteration {}: residual {:.3e}", i, rnorm);
        if rnorm <= target {
            return Ok(KrylovStats {
                iterations: i,
                residual_norm: rnorm,
            });
        }
        if omega == 0.0 {
            return Err(linear_solver_error!(Breakdown, iterations: i));
        }
        rho = rho_new;
    }
    Err(not_converged(config.max_iterations, rnorm))
}
