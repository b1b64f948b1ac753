//! Transpose-free QMR (Freund, 1993), following Saad's "Iterative Methods for Sparse Linear
//! Systems", Algorithm 7.8, applied to the right-preconditioned operator `A P^{-1}`.

use log::trace;

use crate::error::IvpsolError;
use crate::linear_solver::{LinearOperator, Preconditioner};
use crate::{linear_solver_error, Vector};

use super::{not_converged, target_residual, KrylovConfig, KrylovStats};

pub fn tfqmr<V: Vector>(
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
    let mut tmp = V::zeros(n);
    let apply = |u: &V, out: &mut V, tmp: &mut V| -> Result<(), IvpsolError> {
        precon.apply(u, tmp)?;
        op.apply(tmp, out)
    };

    let mut r0 = V::zeros(n);
    op.residual(x, b, &mut r0)?;
    let mut tau = r0.norm();
    if tau <= target {
        return Ok(KrylovStats {
            iterations: 0,
            residual_norm: tau,
        });
    }

    // the iterate of the preconditioned system, x = x0 + P^{-1} y
    let mut y = V::zeros(n);
    let mut w = r0.clone();
    let mut u = r0.clone();
    let mut au = V::zeros(n);
    apply(&u, &mut au, &mut tmp)?;
    let mut v = au.clone();
    let mut d = V::zeros(n);
    let mut u_next = V::zeros(n);
    let (mut theta, mut eta, mut alpha): (f64, f64, f64) = (0.0, 0.0, 0.0);
    let mut rho = r0.dot(&r0)?;
    let mut estimate = tau;

    for m in 0..config.max_iterations {
        let even = m % 2 == 0;
        if even {
            let sigma = v.dot(&r0)?;
            if sigma == 0.0 {
                return Err(linear_solver_error!(Breakdown, iterations: m));
            }
            alpha = rho / sigma;
            u_next.copy_from(&u)?;
            u_next.axpy(-alpha, &v, 1.0)?;
        }
        w.axpy(-alpha, &au, 1.0)?;
        // d = u + (theta^2 eta / alpha) d
        d.axpy(1.0, &u, theta * theta * eta / alpha)?;
        theta = w.norm() / tau;
        let c = 1.0 / (1.0 + theta * theta).sqrt();
        tau *= theta * c;
        eta = c * c * alpha;
        y.axpy(eta, &d, 1.0)?;

        estimate = tau * ((m + 2) as f64).sqrt();
        trace!("tfqmr iteration {}: residual estimate {:.3e}", m + 1, estimate);
        if estimate <= target {
            precon.apply(&y, &mut tmp)?;
            x.axpy(1.0, &tmp, 1.0)?;
            op.residual(x, b, &mut r0)?;
            return Ok(KrylovStats {
                iterations: m + 1,
                residual_norm: r0.norm(),
            });
        }

        if even {
            std::mem::swap(&mut u, &mut u_next);
            apply(&u, &mut au, &mut tmp)?;
        } else {
            if rho == 0.0 {
                return Err(linear_solver_error!(Breakdown, iterations: m + 1));
            }
            let rho_new = w.dot(&r0)?;
            let beta = rho_new / rho;
            rho = rho_new;
            // v = A u_new + beta (A u + beta v), with u_new = w + beta u
            v.axpy(1.0, &au, beta)?;
            u.axpy(1.0, &w, beta)?;
            apply(&u, &mut au, &mut tmp)?;
            v.axpy(1.0, &au, beta)?;
        }
    }
    precon.apply(&y, &mut tmp)?;
    x.axpy(1.0, &tmp, 1.0)?;
    Err(not_converged(config.max_iterations, estimate))
}
