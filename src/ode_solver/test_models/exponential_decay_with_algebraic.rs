use crate::ode_solver::builder::OdeBuilder;
use crate::ode_solver::equations::OdeSolverEquations;
use crate::ode_solver::problem::{OdeSolverProblem, OdeSolverSolution};
use crate::{Matrix, Scalar, Vector};

// du/dt = -a u
// 0 = v - u_0
fn exponential_decay_with_algebraic<M: Matrix>(x: &M::V, p: &M::V, _t: Scalar, y: &mut M::V) {
    let n = x.len();
    for i in 0..n - 1 {
        y[i] = -p[0] * x[i];
    }
    y[n - 1] = x[n - 1] - x[0];
}

fn exponential_decay_with_algebraic_jacobian<M: Matrix>(
    _x: &M::V,
    p: &M::V,
    _t: Scalar,
    v: &M::V,
    y: &mut M::V,
) {
    let n = v.len();
    for i in 0..n - 1 {
        y[i] = -p[0] * v[i];
    }
    y[n - 1] = v[n - 1] - v[0];
}

/// Two decays `u' = -0.1 u` and an algebraic state `v = u_0`, starting from the inconsistent
/// `v(0) = 0`.
pub fn exponential_decay_with_algebraic_problem<M: Matrix>() -> (
    OdeSolverProblem<OdeSolverEquations<M>>,
    OdeSolverSolution<M::V>,
) {
    let problem = OdeBuilder::<M>::new()
        .p([0.1])
        .mass([1.0, 1.0, 0.0])
        .rhs(exponential_decay_with_algebraic::<M>)
        .jacobian_action(exponential_decay_with_algebraic_jacobian::<M>)
        .init(
            |_p: &M::V, _t: Scalar, y: &mut M::V| {
                y[0] = 1.0;
                y[1] = 1.0;
                y[2] = 0.0;
            },
            3,
        )
        .build();
    let problem = match problem {
        Ok(problem) => problem,
        Err(err) => panic!("invalid test model: {err}"),
    };

    let mut soln = OdeSolverSolution::default();
    for i in 0..10 {
        let t = i as Scalar;
        soln.push(M::V::from_element(3, (-0.1 * t).exp()), t);
    }
    (problem, soln)
}
