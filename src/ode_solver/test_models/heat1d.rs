use std::f64::consts::PI;

use crate::ode_solver::builder::OdeBuilder;
use crate::ode_solver::equations::OdeSolverEquations;
use crate::ode_solver::problem::{OdeSolverProblem, OdeSolverSolution};
use crate::{Matrix, Scalar, Vector};

// u_t = D u_xx on (0, 1) with u = 0 at both ends, central differences on n interior points,
// p = [D]
fn heat1d<M: Matrix>(x: &M::V, p: &M::V, _t: Scalar, y: &mut M::V) {
    let n = x.len();
    let dx = 1.0 / (n as Scalar + 1.0);
    let k = p[0] / (dx * dx);
    for i in 0..n {
        let left = if i > 0 { x[i - 1] } else { 0.0 };
        let right = if i + 1 < n { x[i + 1] } else { 0.0 };
        y[i] = k * (left - 2.0 * x[i] + right);
    }
}

/// The semi-discrete heat equation with initial profile `sin(pi x)`, whose exact solution decays
/// with the smallest eigenvalue of the discrete Laplacian. The Jacobian is tridiagonal and
/// assembled from finite differences by coloring.
pub fn heat1d_problem<M: Matrix>(
    n: usize,
) -> (
    OdeSolverProblem<OdeSolverEquations<M>>,
    OdeSolverSolution<M::V>,
) {
    let diffusivity = 0.1;
    let dx = 1.0 / (n as Scalar + 1.0);
    let profile = move |y: &mut M::V| {
        for i in 0..n {
            y[i] = (PI * (i as Scalar + 1.0) * dx).sin();
        }
    };
    let problem = OdeBuilder::<M>::new()
        .p([diffusivity])
        .rtol(1e-6)
        .atol([1e-8])
        .bandwidth(1, 1)
        .rhs(heat1d::<M>)
        .init(move |_p: &M::V, _t: Scalar, y: &mut M::V| profile(y), n)
        .build();
    let problem = match problem {
        Ok(problem) => problem,
        Err(err) => panic!("invalid test model: {err}"),
    };

    let lambda = -4.0 * diffusivity / (dx * dx) * (PI * dx / 2.0).sin().powi(2);
    let mut soln = OdeSolverSolution::default();
    for i in 1..=5 {
        let t = 0.2 * i as Scalar;
        let mut y = M::V::zeros(n);
        profile(&mut y);
        y.scale_mut((lambda * t).exp());
        soln.push(y, t);
    }
    (problem, soln)
}
