use crate::error::IvpsolError;
use crate::op::closure::Closure;
use crate::vector::check_length;
use crate::{Matrix, NonLinearOp, NonLinearOpJacobian, Op, Scalar, Vector};

/// `y = y0(p, t)`
pub type InitFn<V> = Box<dyn Fn(&V, Scalar, &mut V)>;

/// The semi-explicit system `m y' = f(y, p, t)`, `y(t0) = y0(p, t0)`.
///
/// The mass `m` is diagonal; where an entry is zero the corresponding equation is algebraic.
/// Without a mass the system is an explicit ODE `y' = f(y, p, t)`.
pub trait OdeEquations {
    type V: Vector;
    type M: Matrix<V = Self::V>;
    type Rhs: NonLinearOpJacobian<V = Self::V, M = Self::M>;
    type Root: NonLinearOp<V = Self::V, M = Self::M>;

    /// The right-hand side `f`.
    fn rhs(&self) -> &Self::Rhs;

    /// The diagonal of the mass matrix, if any.
    fn mass(&self) -> Option<&Self::V>;

    /// The event function whose zero crossings stop the integration, if any.
    fn root(&self) -> Option<&Self::Root>;

    fn init(&self, t: Scalar) -> Self::V;

    fn set_params(&mut self, p: Self::V) -> Result<(), IvpsolError>;

    fn nstates(&self) -> usize {
        self.rhs().nstates()
    }

    /// Indices of the states whose mass entry is zero.
    fn algebraic_indices(&self) -> Vec<usize> {
        match self.mass() {
            Some(mass) => (0..mass.len()).filter(|&i| mass[i] == 0.0).collect(),
            None => Vec::new(),
        }
    }
}

/// [OdeEquations] assembled from user closures by [super::builder::OdeBuilder].
pub struct OdeSolverEquations<M: Matrix> {
    rhs: Closure<M>,
    mass: Option<M::V>,
    root: Option<Closure<M>>,
    init: InitFn<M::V>,
    nstates: usize,
    p: M::V,
}

impl<M: Matrix> OdeSolverEquations<M> {
    pub fn new(
        rhs: Closure<M>,
        mass: Option<M::V>,
        root: Option<Closure<M>>,
        init: InitFn<M::V>,
        p: M::V,
    ) -> Result<Self, IvpsolError> {
        let nstates = rhs.nstates();
        check_length(nstates, rhs.nout())?;
        if let Some(mass) = mass.as_ref() {
            check_length(nstates, mass.len())?;
        }
        if let Some(root) = root.as_ref() {
            check_length(nstates, root.nstates())?;
        }
        let mut eqn = Self {
            rhs,
            mass,
            root,
            init,
            nstates,
            p: M::V::zeros(0),
        };
        eqn.set_params(p)?;
        Ok(eqn)
    }

    pub fn params(&self) -> &M::V {
        &self.p
    }
}

impl<M: Matrix> OdeEquations for OdeSolverEquations<M> {
    type V = M::V;
    type M = M;
    type Rhs = Closure<M>;
    type Root = Closure<M>;

    fn rhs(&self) -> &Closure<M> {
        &self.rhs
    }

    fn mass(&self) -> Option<&M::V> {
        self.mass.as_ref()
    }

    fn root(&self) -> Option<&Closure<M>> {
        self.root.as_ref()
    }

    fn init(&self, t: Scalar) -> M::V {
        let mut y = M::V::zeros(self.nstates);
        (self.init)(&self.p, t, &mut y);
        y
    }

    fn set_params(&mut self, p: M::V) -> Result<(), IvpsolError> {
        if !self.p.is_empty() {
            check_length(self.p.len(), p.len())?;
        }
        self.rhs.set_params(p.clone());
        if let Some(root) = self.root.as_mut() {
            root.set_params(p.clone());
        }
        self.p = p;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::*;
    use crate::matrix::DenseMatrix;

    type V = DVector<f64>;

    fn decay() -> OdeSolverEquations<DenseMatrix> {
        let rhs = Closure::<DenseMatrix>::new(
            |y: &V, p: &V, _t, f: &mut V| {
                f[0] = -p[0] * y[0];
                f[1] = y[0] - y[1];
            },
            2,
            2,
        );
        OdeSolverEquations::new(
            rhs,
            Some(V::from_vec(vec![1.0, 0.0])),
            None,
            Box::new(|p: &V, _t: f64, y: &mut V| y.fill(p[1])),
            V::from_vec(vec![0.5, 2.0]),
        )
        .unwrap()
    }

    #[test]
    fn parameters_reach_every_closure() {
        let mut eqn = decay();
        assert_eq!(eqn.nstates(), 2);
        assert_eq!(eqn.init(0.0), V::from_vec(vec![2.0, 2.0]));
        let y = V::from_vec(vec![1.0, 3.0]);
        assert_eq!(eqn.rhs().call(&y, 0.0).unwrap(), V::from_vec(vec![-0.5, -2.0]));

        eqn.set_params(V::from_vec(vec![1.0, 4.0])).unwrap();
        assert_eq!(eqn.params()[1], 4.0);
        assert_eq!(eqn.init(0.0), V::from_vec(vec![4.0, 4.0]));
        assert_eq!(eqn.rhs().call(&y, 0.0).unwrap()[0], -1.0);
        assert!(eqn.set_params(V::from_vec(vec![1.0])).is_err());
    }

    #[test]
    fn zero_mass_entries_are_algebraic() {
        let eqn = decay();
        assert_eq!(eqn.algebraic_indices(), vec![1]);
        assert!(eqn.root().is_none());
    }
}
