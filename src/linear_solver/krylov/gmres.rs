//! Restarted GMRES with right preconditioning (Saad & Schultz, 1986), and its flexible variant
//! (Saad, 1993) which keeps the preconditioned basis so the preconditioner may vary.

use log::trace;

use crate::error::IvpsolError;
use crate::linear_solver::{LinearOperator, Preconditioner};
use crate::{linear_solver_error, Scalar, Vector};

use super::{not_converged, target_residual, KrylovConfig, KrylovStats};

pub fn gmres<V: Vector>(
    op: &dyn LinearOperator<V>,
    precon: &dyn Preconditioner<V>,
    b: &V,
    x: &mut V,
    config: &KrylovConfig,
) -> Result<KrylovStats, IvpsolError> {
    restarted_gmres(op, precon, b, x, config, false)
}

pub fn fgmres<V: Vector>(
    op: &dyn LinearOperator<V>,
    precon: &dyn Preconditioner<V>,
    b: &V,
    x: &mut V,
    config: &KrylovConfig,
) -> Result<KrylovStats, IvpsolError> {
    restarted_gmres(op, precon, b, x, config, true)
}

fn restarted_gmres<V: Vector>(
    op: &dyn LinearOperator<V>,
    precon: &dyn Preconditioner<V>,
    b: &V,
    x: &mut V,
    config: &KrylovConfig,
    flexible: bool,
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
    let m = config.restart.max(1).min(n.max(1));

    let mut r = V::zeros(n);
    op.residual(x, b, &mut r)?;
    let mut beta = r.norm();
    let mut iterations = 0;

    loop {
        if beta <= target {
            return Ok(KrylovStats {
                iterations,
                residual_norm: beta,
            });
        }
        if iterations >= config.max_iterations {
            return Err(not_converged(iterations, beta));
        }

        // Arnoldi basis, and the preconditioned basis for the flexible variant
        let mut basis: Vec<V> = Vec::with_capacity(m + 1);
        let mut z_basis: Vec<V> = Vec::with_capacity(if flexible { m } else { 0 });
        let mut v0 = r.clone();
        v0.scale_mut(1.0 / beta);
        basis.push(v0);

        // column j of the Hessenberg matrix is h[j], with j + 2 entries
        let mut h: Vec<Vec<Scalar>> = Vec::with_capacity(m);
        let mut cs: Vec<Scalar> = Vec::with_capacity(m);
        let mut sn: Vec<Scalar> = Vec::with_capacity(m);
        let mut g = vec![0.0; m + 1];
        g[0] = beta;

        let mut z = V::zeros(n);
        let mut w = V::zeros(n);
        let mut k = 0;
        let mut resid = beta;
        while k < m && iterations < config.max_iterations {
            precon.apply(&basis[k], &mut z)?;
            op.apply(&z, &mut w)?;
            if flexible {
                z_basis.push(z.clone());
            }

            let mut col = vec![0.0; k + 2];
            for (i, vi) in basis.iter().enumerate() {
                col[i] = w.dot(vi)?;
                w.axpy(-col[i], vi, 1.0)?;
            }
            let hnext = w.norm();
            col[k + 1] = hnext;

            for i in 0..k {
                let tmp = cs[i] * col[i] + sn[i] * col[i + 1];
                col[i + 1] = -sn[i] * col[i] + cs[i] * col[i + 1];
                col[i] = tmp;
            }
            let denom = col[k].hypot(col[k + 1]);
            if denom == 0.0 {
                return Err(linear_solver_error!(Breakdown, iterations: iterations));
            }
            cs.push(col[k] / denom);
            sn.push(col[k + 1] / denom);
            col[k] = denom;
            col[k + 1] = 0.0;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];
            h.push(col);

            iterations += 1;
            k += 1;
            resid = g[k].abs();
            trace!("gmres iteration {}: residual {:.3e}", iterations, resid);

            if resid <= target || hnext == 0.0 {
                break;
            }
            let mut vnext = w.clone();
            vnext.scale_mut(1.0 / hnext);
            basis.push(vnext);
        }

        // back substitution for the least squares coefficients
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut s = g[i];
            for (j, yj) in y.iter().enumerate().take(k).skip(i + 1) {
                s -= h[j][i] * yj;
            }
            y[i] = s / h[i][i];
        }

        if flexible {
            for (yi, zi) in y.iter().zip(z_basis.iter()) {
                x.axpy(*yi, zi, 1.0)?;
            }
        } else {
            let mut update = V::zeros(n);
            for (yi, vi) in y.iter().zip(basis.iter()) {
                update.axpy(*yi, vi, 1.0)?;
            }
            precon.apply(&update, &mut z)?;
            x.axpy(1.0, &z, 1.0)?;
        }

        if resid <= target {
            return Ok(KrylovStats {
                iterations,
                residual_norm: resid,
            });
        }
        op.residual(x, b, &mut r)?;
        beta = r.norm();
        trace!("gmres restart after {} iterations: residual {:.3e}", iterations, beta);
    }
}
