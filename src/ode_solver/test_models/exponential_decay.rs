use crate::ode_solver::builder::OdeBuilder;
use crate::ode_solver::equations::OdeSolverEquations;
use crate::ode_solver::problem::{OdeSolverProblem, OdeSolverSolution};
use crate::{Matrix, Scalar, Vector};

// dy/dt = -a y, p = [a, y0]
fn exponential_decay<M: Matrix>(x: &M::V, p: &M::V, _t: Scalar, y: &mut M::V) {
    for i in 0..x.len() {
        y[i] = -p[0] * x[i];
    }
}

// Jv = -a v
fn exponential_decay_jacobian<M: Matrix>(_x: &M::V, p: &M::V, _t: Scalar, v: &M::V, y: &mut M::V) {
    for i in 0..v.len() {
        y[i] = -p[0] * v[i];
    }
}

fn exponential_decay_init<M: Matrix>(p: &M::V, _t: Scalar, y: &mut M::V) {
    y.fill(p[1]);
}

/// Two uncoupled decays `y' = -0.1 y`, `y(0) = 1`. With `use_coloring` the diagonal Jacobian
/// structure is given up front and assembled by coloring.
pub fn exponential_decay_problem<M: Matrix>(
    use_coloring: bool,
) -> (
    OdeSolverProblem<OdeSolverEquations<M>>,
    OdeSolverSolution<M::V>,
) {
    let nstates = 2;
    let mut builder = OdeBuilder::<M>::new()
        .p([0.1, 1.0])
        .rhs(exponential_decay::<M>)
        .jacobian_action(exponential_decay_jacobian::<M>)
        .init(exponential_decay_init::<M>, nstates);
    if use_coloring {
        builder = builder.sparsity((0..nstates).map(|i| (i, i)).collect());
    }
    let problem = match builder.build() {
        Ok(problem) => problem,
        Err(err) => panic!("invalid test model: {err}"),
    };

    let mut soln = OdeSolverSolution::default();
    for i in 0..10 {
        let t = i as Scalar;
        soln.push(M::V::from_element(nstates, (-0.1 * t).exp()), t);
    }
    (problem, soln)
}
