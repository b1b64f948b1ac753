use std::cell::RefCell;

use crate::error::IvpsolError;
use crate::jacobian::{find_jacobian_non_zeros, finite_difference_jac_mul, JacobianColoring};
use crate::vector::check_length;
use crate::{Matrix, NonLinearOp, NonLinearOpJacobian, Op, Scalar, Vector};

use super::OpStatistics;

/// `y = F(x, p, t)`
pub type ClosureFn<V> = Box<dyn Fn(&V, &V, Scalar, &mut V)>;
/// `y = J(x, p, t) v`
pub type ClosureJacFn<V> = Box<dyn Fn(&V, &V, Scalar, &V, &mut V)>;
/// `J = J(x, p, t)` written into a matrix created from the operator's sparsity
pub type ClosureMatrixFn<M> = Box<dyn Fn(&<M as Matrix>::V, &<M as Matrix>::V, Scalar, &mut M)>;

/// A [NonLinearOpJacobian] built from user closures.
///
/// The closures receive the state `x`, the parameters `p` stored in the operator, and the time.
/// If no Jacobian action is given it is approximated by finite differences; if a full Jacobian
/// closure is given it is used to assemble matrices, otherwise they are assembled from the
/// Jacobian action (with column coloring once a sparsity pattern is known).
pub struct Closure<M: Matrix> {
    func: ClosureFn<M::V>,
    jacobian_action: Option<ClosureJacFn<M::V>>,
    jacobian_matrix: Option<ClosureMatrixFn<M>>,
    nstates: usize,
    nout: usize,
    p: M::V,
    sparsity: Option<Vec<(usize, usize)>>,
    coloring: Option<JacobianColoring<M>>,
    statistics: RefCell<OpStatistics>,
}

impl<M: Matrix> Closure<M> {
    pub fn new(
        func: impl Fn(&M::V, &M::V, Scalar, &mut M::V) + 'static,
        nstates: usize,
        nout: usize,
    ) -> Self {
        Self {
            func: Box::new(func),
            jacobian_action: None,
            jacobian_matrix: None,
            nstates,
            nout,
            p: M::V::zeros(0),
            sparsity: None,
            coloring: None,
            statistics: RefCell::new(OpStatistics::default()),
        }
    }

    pub fn with_jacobian_action(
        mut self,
        jacobian_action: impl Fn(&M::V, &M::V, Scalar, &M::V, &mut M::V) + 'static,
    ) -> Self {
        self.jacobian_action = Some(Box::new(jacobian_action));
        self
    }

    pub fn with_jacobian_matrix(
        mut self,
        jacobian: impl Fn(&M::V, &M::V, Scalar, &mut M) + 'static,
    ) -> Self {
        self.jacobian_matrix = Some(Box::new(jacobian));
        self
    }

    pub fn with_params(mut self, p: M::V) -> Self {
        self.p = p;
        self
    }

    pub fn set_params(&mut self, p: M::V) {
        self.p = p;
    }

    /// Fix the Jacobian sparsity to `pattern` (column-major) and build its coloring.
    pub fn set_sparsity(&mut self, mut pattern: Vec<(usize, usize)>) {
        pattern.sort_by_key(|&(i, j)| (j, i));
        pattern.dedup();
        self.coloring = Some(JacobianColoring::new(self.nout, self.nstates, &pattern));
        self.sparsity = Some(pattern);
    }

    /// Detect the Jacobian sparsity by NaN probing at `(x0, t0)`.
    pub fn calculate_sparsity(&mut self, x0: &M::V, t0: Scalar) -> Result<(), IvpsolError> {
        let non_zeros = find_jacobian_non_zeros(self, x0, t0)?;
        self.set_sparsity(non_zeros);
        Ok(())
    }
}

impl<M: Matrix> Op for Closure<M> {
    type V = M::V;
    type M = M;

    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        self.nout
    }
    fn statistics(&self) -> OpStatistics {
        self.statistics.borrow().clone()
    }
}

impl<M: Matrix> NonLinearOp for Closure<M> {
    fn call_inplace(&self, x: &M::V, t: Scalar, y: &mut M::V) -> Result<(), IvpsolError> {
        check_length(self.nstates, x.len())?;
        check_length(self.nout, y.len())?;
        self.statistics.borrow_mut().increment_call();
        (self.func)(x, &self.p, t, y);
        Ok(())
    }
}

impl<M: Matrix> NonLinearOpJacobian for Closure<M> {
    fn jac_mul_inplace(
        &self,
        x: &M::V,
        t: Scalar,
        v: &M::V,
        y: &mut M::V,
    ) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_jac_mul();
        match &self.jacobian_action {
            Some(jac) => {
                check_length(self.nstates, v.len())?;
                check_length(self.nout, y.len())?;
                jac(x, &self.p, t, v, y);
                Ok(())
            }
            None => {
                let fx = self.call(x, t)?;
                finite_difference_jac_mul(
                    |xp: &M::V, yp: &mut M::V| {
                        (self.func)(xp, &self.p, t, yp);
                        Ok(())
                    },
                    x,
                    &fx,
                    v,
                    y,
                )
            }
        }
    }

    fn jacobian_sparsity(&self) -> Option<Vec<(usize, usize)>> {
        self.sparsity.clone()
    }

    fn jacobian_inplace(&self, x: &M::V, t: Scalar, y: &mut M) -> Result<(), IvpsolError> {
        self.statistics.borrow_mut().increment_matrix();
        if let Some(jac) = &self.jacobian_matrix {
            jac(x, &self.p, t, y);
            Ok(())
        } else if let Some(coloring) = self.coloring.as_ref() {
            coloring.jacobian_inplace(self, x, t, y)
        } else {
            self._default_jacobian_inplace(x, t, y)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{DenseMatrix, SparseMatrix};
    use nalgebra::DVector;

    fn logistic() -> Closure<DenseMatrix> {
        Closure::new(
            |x: &DVector<f64>, p: &DVector<f64>, _t, y: &mut DVector<f64>| {
                y[0] = p[0] * x[0] * (1.0 - x[0]);
                y[1] = x[0] - x[1];
            },
            2,
            2,
        )
        .with_params(DVector::from_vec(vec![2.0]))
    }

    #[test]
    fn finite_difference_jacobian_without_action() {
        let op = logistic();
        let x = DVector::from_vec(vec![0.25, 1.0]);
        let jac = op.jacobian(&x, 0.0).unwrap();
        assert!((jac.get_entry(0, 0).unwrap() - 2.0 * (1.0 - 0.5)).abs() < 1e-6);
        assert!((jac.get_entry(1, 0).unwrap() - 1.0).abs() < 1e-6);
        assert!((jac.get_entry(1, 1).unwrap() + 1.0).abs() < 1e-6);
        assert!(jac.get_entry(0, 1).unwrap().abs() < 1e-6);
        let stats = op.statistics();
        assert_eq!(stats.number_of_matrix_evals, 1);
        assert_eq!(stats.number_of_jac_muls, 2);
    }

    #[test]
    fn wrong_state_length() {
        let op = logistic();
        let err = op.call(&DVector::zeros(3), 0.0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DimensionMismatch);
    }

    #[test]
    fn detected_sparsity_drives_assembly() {
        let mut op = Closure::<SparseMatrix>::new(
            |x: &DVector<f64>, _p: &DVector<f64>, _t, y: &mut DVector<f64>| {
                y[0] = -x[0];
                y[1] = x[0] * x[2];
                y[2] = -2.0 * x[2];
            },
            3,
            3,
        );
        op.calculate_sparsity(&DVector::from_element(3, 1.0), 0.0)
            .unwrap();
        assert_eq!(
            op.jacobian_sparsity().unwrap(),
            vec![(0, 0), (1, 0), (1, 2), (2, 2)]
        );
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let jac = op.jacobian(&x, 0.0).unwrap();
        assert!((jac.get_entry(1, 0).unwrap() - 3.0).abs() < 1e-6);
        assert!((jac.get_entry(1, 2).unwrap() - 1.0).abs() < 1e-6);
        assert!((jac.get_entry(2, 2).unwrap() + 2.0).abs() < 1e-6);
    }
}
