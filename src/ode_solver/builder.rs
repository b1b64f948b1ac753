use crate::error::IvpsolError;
use crate::linear_solver::KrylovConfig;
use crate::matrix::DenseMatrix;
use crate::op::closure::{Closure, ClosureFn, ClosureJacFn, ClosureMatrixFn};
use crate::{ode_solver_error, Matrix, Scalar, Vector};

use super::config::{
    AbsoluteTolerance, BdfConfig, ExplicitRkConfig, LinearSolverKind, MethodFamily,
    NonLinearSolverKind, SolverConfiguration,
};
use super::equations::{InitFn, OdeSolverEquations};
use super::problem::OdeSolverProblem;

enum SparsityHint {
    Band { lower: usize, upper: usize },
    Pattern(Vec<(usize, usize)>),
}

/// Builder for ODE problems. Use methods to set parameters and then call [OdeBuilder::build].
///
/// # Example
///
/// ```rust
/// use ivpsol::{DenseMatrix, OdeBuilder, OdeSolverMethod};
/// use nalgebra::DVector;
///
/// let problem = OdeBuilder::<DenseMatrix>::new()
///     .rtol(1e-6)
///     .p([0.1])
///     // dy/dt = -ay
///     .rhs(|x: &DVector<f64>, p: &DVector<f64>, _t, y: &mut DVector<f64>| {
///         y[0] = -p[0] * x[0];
///     })
///     // Jv = -av
///     .jacobian_action(|_x: &DVector<f64>, p: &DVector<f64>, _t, v: &DVector<f64>, y: &mut DVector<f64>| {
///         y[0] = -p[0] * v[0];
///     })
///     // y(0) = 1
///     .init(|_p: &DVector<f64>, _t, y: &mut DVector<f64>| y[0] = 1.0, 1)
///     .build()
///     .unwrap();
///
/// let mut solver = problem.bdf().unwrap();
/// let (ys, ts) = solver.solve(1.0).unwrap();
/// assert_eq!(ts.last(), Some(&1.0));
/// assert!((ys.last().unwrap()[0] - (-0.1f64).exp()).abs() < 1e-4);
/// ```
pub struct OdeBuilder<M: Matrix = DenseMatrix> {
    t0: Scalar,
    p: Vec<Scalar>,
    config: SolverConfiguration,
    rhs: Option<ClosureFn<M::V>>,
    jacobian_action: Option<ClosureJacFn<M::V>>,
    jacobian_matrix: Option<ClosureMatrixFn<M>>,
    mass: Option<Vec<Scalar>>,
    init: Option<(InitFn<M::V>, usize)>,
    root: Option<(ClosureFn<M::V>, usize)>,
    sparsity: Option<SparsityHint>,
}

impl<M: Matrix> Default for OdeBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Matrix> OdeBuilder<M> {
    /// Create a new builder with default parameters:
    /// - t0 = 0.0
    /// - rtol = 1e-6, atol = 1e-6
    /// - p = []
    /// - BDF with Newton and a direct linear solver
    pub fn new() -> Self {
        Self {
            t0: 0.0,
            p: Vec::new(),
            config: SolverConfiguration::default(),
            rhs: None,
            jacobian_action: None,
            jacobian_matrix: None,
            mass: None,
            init: None,
            root: None,
            sparsity: None,
        }
    }

    /// Set the initial time.
    pub fn t0(mut self, t0: Scalar) -> Self {
        self.t0 = t0;
        self
    }

    /// Set the initial step size, otherwise it is estimated from the problem.
    pub fn h0(mut self, h0: Scalar) -> Self {
        self.config.h0 = Some(h0);
        self
    }

    pub fn rtol(mut self, rtol: Scalar) -> Self {
        self.config.rtol = rtol;
        self
    }

    /// Set the absolute tolerance, either one value for every state or one per state.
    pub fn atol<I, T>(mut self, atol: I) -> Self
    where
        I: IntoIterator<Item = T>,
        f64: From<T>,
    {
        let atol: Vec<f64> = atol.into_iter().map(f64::from).collect();
        self.config.atol = match atol.as_slice() {
            [atol] => AbsoluteTolerance::Scalar(*atol),
            _ => AbsoluteTolerance::PerComponent(atol),
        };
        self
    }

    /// Set the parameters.
    pub fn p<I, T>(mut self, p: I) -> Self
    where
        I: IntoIterator<Item = T>,
        f64: From<T>,
    {
        self.p = p.into_iter().map(f64::from).collect();
        self
    }

    pub fn method(mut self, method: MethodFamily) -> Self {
        self.config.method = method;
        self
    }

    pub fn h_min(mut self, h_min: Scalar) -> Self {
        self.config.h_min = Some(h_min);
        self
    }

    pub fn h_max(mut self, h_max: Scalar) -> Self {
        self.config.h_max = Some(h_max);
        self
    }

    pub fn max_order(mut self, max_order: usize) -> Self {
        self.config.max_order = Some(max_order);
        self
    }

    pub fn nonlinear_solver(mut self, kind: NonLinearSolverKind) -> Self {
        self.config.nonlinear_solver = kind;
        self
    }

    pub fn linear_solver(mut self, kind: LinearSolverKind) -> Self {
        self.config.linear_solver = kind;
        self
    }

    pub fn krylov(mut self, krylov: KrylovConfig) -> Self {
        self.config.krylov = krylov;
        self
    }

    pub fn bdf_config(mut self, bdf: BdfConfig) -> Self {
        self.config.bdf = bdf;
        self
    }

    pub fn explicit_rk_config(mut self, explicit_rk: ExplicitRkConfig) -> Self {
        self.config.explicit_rk = explicit_rk;
        self
    }

    /// Replace the whole solver configuration, e.g. one read from a file.
    pub fn config(mut self, config: SolverConfiguration) -> Self {
        self.config = config;
        self
    }

    /// The right-hand side `f(x, p, t, y)`, writing `y = f`.
    pub fn rhs(mut self, rhs: impl Fn(&M::V, &M::V, Scalar, &mut M::V) + 'static) -> Self {
        self.rhs = Some(Box::new(rhs));
        self
    }

    /// The Jacobian action `f(x, p, t, v, y)`, writing `y = df/dx v`. Finite differences are
    /// used if this is not given.
    pub fn jacobian_action(
        mut self,
        jacobian_action: impl Fn(&M::V, &M::V, Scalar, &M::V, &mut M::V) + 'static,
    ) -> Self {
        self.jacobian_action = Some(Box::new(jacobian_action));
        self
    }

    /// Assemble the Jacobian `df/dx` directly into a matrix with the rhs sparsity.
    pub fn jacobian_matrix(
        mut self,
        jacobian: impl Fn(&M::V, &M::V, Scalar, &mut M) + 'static,
    ) -> Self {
        self.jacobian_matrix = Some(Box::new(jacobian));
        self
    }

    /// The diagonal of the mass matrix. Zero entries make the corresponding equations algebraic.
    pub fn mass<I, T>(mut self, mass: I) -> Self
    where
        I: IntoIterator<Item = T>,
        f64: From<T>,
    {
        self.mass = Some(mass.into_iter().map(f64::from).collect());
        self
    }

    /// The initial state `y0(p, t)`, which also fixes the number of states.
    pub fn init(
        mut self,
        init: impl Fn(&M::V, Scalar, &mut M::V) + 'static,
        nstates: usize,
    ) -> Self {
        self.init = Some((Box::new(init), nstates));
        self
    }

    /// An event function `g(x, p, t, y)` with `nroots` outputs. The solver stops at the first
    /// zero crossing of any output.
    pub fn root(
        mut self,
        root: impl Fn(&M::V, &M::V, Scalar, &mut M::V) + 'static,
        nroots: usize,
    ) -> Self {
        self.root = Some((Box::new(root), nroots));
        self
    }

    /// The Jacobian of the rhs is banded with `lower` sub- and `upper` super-diagonals.
    pub fn bandwidth(mut self, lower: usize, upper: usize) -> Self {
        self.sparsity = Some(SparsityHint::Band { lower, upper });
        self
    }

    /// The structural non-zeros `(row, column)` of the Jacobian of the rhs.
    pub fn sparsity(mut self, pattern: Vec<(usize, usize)>) -> Self {
        self.sparsity = Some(SparsityHint::Pattern(pattern));
        self
    }

    /// Build the problem. Band and sparse matrix types without a sparsity hint detect the
    /// Jacobian structure from the initial state.
    pub fn build(self) -> Result<OdeSolverProblem<OdeSolverEquations<M>>, IvpsolError> {
        let rhs_fn = self
            .rhs
            .ok_or_else(|| ode_solver_error!(BuilderError, "right-hand side not set"))?;
        let (init, nstates) = self
            .init
            .ok_or_else(|| ode_solver_error!(BuilderError, "initial condition not set"))?;
        if nstates == 0 {
            return Err(ode_solver_error!(BuilderError, "problem has no states"));
        }
        let p = M::V::from_vec(self.p);

        let mut rhs = Closure::new(rhs_fn, nstates, nstates).with_params(p.clone());
        if let Some(jacobian_action) = self.jacobian_action {
            rhs = rhs.with_jacobian_action(jacobian_action);
        }
        if let Some(jacobian_matrix) = self.jacobian_matrix {
            rhs = rhs.with_jacobian_matrix(jacobian_matrix);
        }
        match self.sparsity {
            Some(SparsityHint::Band { lower, upper }) => {
                rhs.set_sparsity(band_pattern(nstates, lower, upper))
            }
            Some(SparsityHint::Pattern(pattern)) => {
                if let Some(&(i, j)) = pattern.iter().find(|&&(i, j)| i >= nstates || j >= nstates)
                {
                    return Err(ode_solver_error!(
                        BuilderError,
                        format!("sparsity entry ({i}, {j}) is outside a {nstates}x{nstates} Jacobian")
                    ));
                }
                rhs.set_sparsity(pattern)
            }
            None if M::is_sparse() => {
                let mut y0 = M::V::zeros(nstates);
                init(&p, self.t0, &mut y0);
                rhs.calculate_sparsity(&y0, self.t0)?;
            }
            None => {}
        }

        let mass = self.mass.map(M::V::from_vec);
        let root = self
            .root
            .map(|(root, nroots)| Closure::new(root, nstates, nroots));
        let eqn = OdeSolverEquations::new(rhs, mass, root, init, p)?;
        OdeSolverProblem::new(eqn, self.config, self.t0)
    }
}

/// Column-major pattern of an `n x n` band with `lower` sub- and `upper` super-diagonals.
fn band_pattern(n: usize, lower: usize, upper: usize) -> Vec<(usize, usize)> {
    (0..n)
        .flat_map(|j| (j.saturating_sub(upper)..(j + lower + 1).min(n)).map(move |i| (i, j)))
        .collect()
}
