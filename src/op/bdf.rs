use std::cell::{Cell, RefCell};

use crate::error::IvpsolError;
use crate::ode_solver::equations::OdeEquations;
use crate::{Matrix, NonLinearOp, NonLinearOpJacobian, Op, Scalar, Vector};

use super::OpStatistics;

/// The implicit stage equation of a BDF step,
/// `F(y) = M (y - y0 + psi) - c f(y) = 0`, with a diagonal mass `M` (the identity if the
/// equations have none).
///
/// The Jacobian `M - c J` is assembled from a cached `J = df/dy`, which is only re-evaluated
/// after [BdfCallable::set_jacobian_is_stale]; a change of `c` alone just re-combines the cached
/// matrix.
pub struct BdfCallable<'a, Eqn: OdeEquations> {
    eqn: &'a Eqn,
    psi_neg_y0: RefCell<Eqn::V>,
    c: Cell<Scalar>,
    tmp: RefCell<Eqn::V>,
    rhs_jac: RefCell<Option<Eqn::M>>,
    jacobian_is_stale: Cell<bool>,
    number_of_jac_evals: Cell<usize>,
    statistics: RefCell<OpStatistics>,
}

impl<'a, Eqn: OdeEquations> BdfCallable<'a, Eqn> {
    pub fn new(eqn: &'a Eqn) -> Self {
        let n = eqn.nstates();
        Self {
            eqn,
            psi_neg_y0: RefCell::new(Eqn::V::zeros(n)),
            c: Cell::new(0.0),
            tmp: RefCell::new(Eqn::V::zeros(n)),
            rhs_jac: RefCell::new(None),
            jacobian_is_stale: Cell::new(true),
            number_of_jac_evals: Cell::new(0),
            statistics: RefCell::new(OpStatistics::default()),
        }
    }

    pub fn c(&self) -> Scalar {
        self.c.get()
    }

    pub fn set_c(&self, h: Scalar, alpha: Scalar) {
        self.c.set(h * alpha);
    }

    /// Number of times the rhs Jacobian `J` has been evaluated.
    pub fn number_of_jac_evals(&self) -> usize {
        self.number_of_jac_evals.get()
    }

    pub fn set_jacobian_is_stale(&self) {
        self.jacobian_is_stale.set(true);
    }

    /// `psi = alpha_k sum_{i=1}^{k} gamma_i D_i`, stored as `psi - y0`.
    pub fn set_psi_and_y0(
        &self,
        diff: &[Eqn::V],
        gamma: &[Scalar],
        alpha: &[Scalar],
        order: usize,
        y0: &Eqn::V,
    ) -> Result<(), IvpsolError> {
        let mut psi = self.psi_neg_y0.borrow_mut();
        psi.fill(0.0);
        for i in 1..=order {
            psi.axpy(gamma[i], &diff[i], 1.0)?;
        }
        psi.scale_mut(alpha[order]);
        psi.axpy(-1.0, y0, 1.0)
    }

    fn apply_mass(&self, v: &Eqn::V, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        // y = M v - c y
        let c = self.c.get();
        match self.eqn.mass() {
            Some(mass) => {
                y.scale_mut(-c);
                for i in 0..y.len() {
                    y[i] += mass[i] * v[i];
                }
                Ok(())
            }
            None => y.axpy(1.0, v, -c),
        }
    }
}

impl<Eqn: OdeEquations> Op for BdfCallable<'_, Eqn> {
    type V = Eqn::V;
    type M = Eqn::M;
    fn nstates(&self) -> usize {
        self.eqn.nstates()
    }
    fn nout(&self) -> usize {
        self.eqn.nstates()
    }
    fn statistics(&self) -> OpStatistics {
        self.statistics.borrow().clone()
    }
}

impl<Eqn: OdeEquations> NonLinearOp for BdfCallable<'_, Eqn> {
    fn call_inplace(&self, x: &Eqn::V, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_call();
        self.eqn.rhs().call_inplace(x, t, y)?;
        let mut tmp = self.tmp.borrow_mut();
        tmp.copy_from(x)?;
        tmp.axpy(1.0, &self.psi_neg_y0.borrow(), 1.0)?;
        self.apply_mass(&tmp, y)
    }
}

impl<Eqn: OdeEquations> NonLinearOpJacobian for BdfCallable<'_, Eqn> {
    fn jac_mul_inplace(
        &self,
        x: &Eqn::V,
        t: Scalar,
        v: &Eqn::V,
        y: &mut Eqn::V,
    ) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_jac_mul();
        self.eqn.rhs().jac_mul_inplace(x, t, v, y)?;
        self.apply_mass(v, y)
    }

    fn jacobian_sparsity(&self) -> Option<Vec<(usize, usize)>> {
        let mut pattern = self.eqn.rhs().jacobian_sparsity()?;
        pattern.extend((0..self.nstates()).map(|i| (i, i)));
        pattern.sort_unstable_by_key(|&(i, j)| (j, i));
        pattern.dedup();
        Some(pattern)
    }

    fn jacobian_inplace(&self, x: &Eqn::V, t: Scalar, y: &mut Eqn::M) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_matrix();
        let mut rhs_jac = self.rhs_jac.borrow_mut();
        if self.jacobian_is_stale.get() || rhs_jac.is_none() {
            let jac = match rhs_jac.take() {
                Some(mut jac) => {
                    jac.fill_zero();
                    self.eqn.rhs().jacobian_inplace(x, t, &mut jac)?;
                    jac
                }
                None => self.eqn.rhs().jacobian(x, t)?,
            };
            *rhs_jac = Some(jac);
            self.jacobian_is_stale.set(false);
            self.number_of_jac_evals.set(self.number_of_jac_evals.get() + 1);
        }
        let Some(jac) = rhs_jac.as_ref() else {
            return Ok(());
        };

        // y = M - c J
        let c = self.c.get();
        y.fill_zero();
        for (i, j) in jac.pattern() {
            y.set_entry(i, j, -c * jac.get_entry(i, j)?)?;
        }
        match self.eqn.mass() {
            Some(mass) => y.add_diagonal(mass),
            None => y.add_diagonal(&Eqn::V::from_element(self.nstates(), 1.0)),
        }
    }
}
