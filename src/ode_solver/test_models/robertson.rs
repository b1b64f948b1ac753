use crate::ode_solver::builder::OdeBuilder;
use crate::ode_solver::equations::OdeSolverEquations;
use crate::ode_solver::problem::{OdeSolverProblem, OdeSolverSolution};
use crate::{Matrix, Scalar, Vector};

// Robertson's chemical kinetics, a classic stiff problem
// dy1/dt = -k1 y1 + k3 y2 y3
// dy2/dt =  k1 y1 - k3 y2 y3 - k2 y2^2
// dy3/dt =  k2 y2^2
// p = [k1, k2, k3]
fn robertson<M: Matrix>(x: &M::V, p: &M::V, _t: Scalar, y: &mut M::V) {
    y[0] = -p[0] * x[0] + p[2] * x[1] * x[2];
    y[1] = p[0] * x[0] - p[2] * x[1] * x[2] - p[1] * x[1] * x[1];
    y[2] = p[1] * x[1] * x[1];
}

fn robertson_jacobian<M: Matrix>(x: &M::V, p: &M::V, _t: Scalar, v: &M::V, y: &mut M::V) {
    y[0] = -p[0] * v[0] + p[2] * x[2] * v[1] + p[2] * x[1] * v[2];
    y[1] = p[0] * v[0] - (p[2] * x[2] + 2.0 * p[1] * x[1]) * v[1] - p[2] * x[1] * v[2];
    y[2] = 2.0 * p[1] * x[1] * v[1];
}

/// Robertson's problem from `y = (1, 0, 0)`, with reference values at t = 0.4, 4, 40 and 400.
pub fn robertson_problem<M: Matrix>() -> (
    OdeSolverProblem<OdeSolverEquations<M>>,
    OdeSolverSolution<M::V>,
) {
    let problem = OdeBuilder::<M>::new()
        .p([0.04, 3.0e7, 1.0e4])
        .rtol(1e-4)
        .atol([1e-8, 1e-12, 1e-8])
        .rhs(robertson::<M>)
        .jacobian_action(robertson_jacobian::<M>)
        .init(
            |_p: &M::V, _t: Scalar, y: &mut M::V| {
                y.fill(0.0);
                y[0] = 1.0;
            },
            3,
        )
        .build();
    let problem = match problem {
        Ok(problem) => problem,
        Err(err) => panic!("invalid test model: {err}"),
    };

    let mut soln = OdeSolverSolution::default();
    let reference = [
        (0.4, [9.8517e-01, 3.3864e-05, 1.4794e-02]),
        (4.0, [9.0552e-01, 2.2405e-05, 9.4459e-02]),
        (40.0, [7.1583e-01, 9.1856e-06, 2.8416e-01]),
        (400.0, [4.5052e-01, 3.2229e-06, 5.4948e-01]),
    ];
    for (t, y) in reference {
        soln.push(M::V::from_slice(&y), t);
    }
    (problem, soln)
}
