use std::cell::RefCell;

use crate::error::IvpsolError;
use crate::ode_solver::equations::OdeEquations;
use crate::{NonLinearOp, NonLinearOpJacobian, Op, Scalar, Vector};

use super::OpStatistics;

/// Consistent initial conditions for a semi-explicit DAE `m y' = f(y, t)` with a diagonal mass.
///
/// Splitting the state into differential parts `u` (`m_i != 0`) and algebraic parts `v`
/// (`m_i = 0`), the unknown `x` holds `du` in the differential slots and `v` in the algebraic
/// ones, and the residual is `F(x) = f(u, v) - m du`. The differential states stay at their
/// initial values.
pub struct InitOp<'a, Eqn: OdeEquations> {
    eqn: &'a Eqn,
    mass: Eqn::V,
    y0: RefCell<Eqn::V>,
    tmp: RefCell<Eqn::V>,
    algebraic_indices: Vec<usize>,
    statistics: RefCell<OpStatistics>,
}

impl<'a, Eqn: OdeEquations> InitOp<'a, Eqn> {
    pub fn new(eqn: &'a Eqn, y0: &Eqn::V, algebraic_indices: Vec<usize>) -> Self {
        let n = eqn.nstates();
        let mass = match eqn.mass() {
            Some(mass) => mass.clone(),
            None => Eqn::V::from_element(n, 1.0),
        };
        Self {
            eqn,
            mass,
            y0: RefCell::new(y0.clone()),
            tmp: RefCell::new(Eqn::V::zeros(n)),
            algebraic_indices,
            statistics: RefCell::new(OpStatistics::default()),
        }
    }

    /// Pack `(y, dy)` into the unknown `x = (du, v)`.
    pub fn gather(&self, y: &Eqn::V, dy: &Eqn::V, x: &mut Eqn::V) -> Result<(), IvpsolError> {
        x.copy_from(dy)?;
        for &i in &self.algebraic_indices {
            x[i] = y[i];
        }
        Ok(())
    }

    /// Unpack a solution `x = (du, v)` into `y` and `dy`. `dv` is not determined here and is set
    /// to zero.
    pub fn scatter(&self, x: &Eqn::V, y: &mut Eqn::V, dy: &mut Eqn::V) -> Result<(), IvpsolError> {
        dy.copy_from(x)?;
        for &i in &self.algebraic_indices {
            y[i] = x[i];
            dy[i] = 0.0;
        }
        Ok(())
    }

    fn is_algebraic(&self, i: usize) -> bool {
        self.mass[i] == 0.0
    }
}

impl<Eqn: OdeEquations> Op for InitOp<'_, Eqn> {
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

impl<Eqn: OdeEquations> NonLinearOp for InitOp<'_, Eqn> {
    fn call_inplace(&self, x: &Eqn::V, t: Scalar, y: &mut Eqn::V) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_call();
        let mut y0 = self.y0.borrow_mut();
        for &i in &self.algebraic_indices {
            y0[i] = x[i];
        }
        self.eqn.rhs().call_inplace(&y0, t, y)?;
        for i in 0..y.len() {
            y[i] -= self.mass[i] * x[i];
        }
        Ok(())
    }
}

impl<Eqn: OdeEquations> NonLinearOpJacobian for InitOp<'_, Eqn> {
    // J v = df/dv v_v - m v_u
    fn jac_mul_inplace(
        &self,
        _x: &Eqn::V,
        t: Scalar,
        v: &Eqn::V,
        y: &mut Eqn::V,
    ) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_jac_mul();
        let mut v_alg = self.tmp.borrow_mut();
        for i in 0..v.len() {
            v_alg[i] = if self.is_algebraic(i) { v[i] } else { 0.0 };
        }
        let y0 = self.y0.borrow();
        self.eqn.rhs().jac_mul_inplace(&y0, t, &v_alg, y)?;
        for i in 0..y.len() {
            y[i] -= self.mass[i] * v[i];
        }
        Ok(())
    }

    fn jacobian_sparsity(&self) -> Option<Vec<(usize, usize)>> {
        let mut pattern = self.eqn.rhs().jacobian_sparsity()?;
        pattern.extend((0..self.nstates()).map(|i| (i, i)));
        pattern.sort_unstable_by_key(|&(i, j)| (j, i));
        pattern.dedup();
        Some(pattern)
    }
}
