use crate::error::IvpsolError;
use crate::{linear_solver_error, Matrix, Vector};

use super::LinearOperator;

/// An approximate inverse `P^{-1}` of a linear operator, applied as `z = P^{-1} r`.
///
/// [Preconditioner::setup] is called whenever the operator is relinearised.
pub trait Preconditioner<V: Vector> {
    fn setup(&mut self, _op: &dyn LinearOperator<V>) -> Result<(), IvpsolError> {
        Ok(())
    }

    fn apply(&self, r: &V, z: &mut V) -> Result<(), IvpsolError>;
}

/// `P = I`
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl<V: Vector> Preconditioner<V> for IdentityPreconditioner {
    fn apply(&self, r: &V, z: &mut V) -> Result<(), IvpsolError> {
        z.copy_from(r)
    }
}

/// `P = diag(A)`.
///
/// The diagonal is either taken from an assembled matrix or, in [Preconditioner::setup], sampled
/// from the operator one unit vector at a time. Zero diagonal entries are left unscaled.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<V: Vector> {
    inv_diag: Option<V>,
    from_operator: bool,
}

impl<V: Vector> Default for JacobiPreconditioner<V> {
    fn default() -> Self {
        Self {
            inv_diag: None,
            from_operator: true,
        }
    }
}

impl<V: Vector> JacobiPreconditioner<V> {
    /// Build from the diagonal of `a`. The preconditioner then ignores later setups.
    pub fn from_matrix<M: Matrix<V = V>>(a: &M) -> Result<Self, IvpsolError> {
        a.check_square()?;
        let mut diag = V::zeros(a.nrows());
        for i in 0..a.nrows() {
            diag[i] = a.get_entry(i, i)?;
        }
        Ok(Self {
            inv_diag: Some(Self::invert(diag)),
            from_operator: false,
        })
    }

    fn invert(mut diag: V) -> V {
        diag.as_mut_slice()
            .iter_mut()
            .for_each(|d| *d = if *d == 0.0 { 1.0 } else { 1.0 / *d });
        diag
    }
}

impl<V: Vector> Preconditioner<V> for JacobiPreconditioner<V> {
    fn setup(&mut self, op: &dyn LinearOperator<V>) -> Result<(), IvpsolError> {
        if !self.from_operator {
            return Ok(());
        }
        let n = op.nrows();
        let mut e = V::zeros(n);
        let mut col = V::zeros(n);
        let mut diag = V::zeros(n);
        for i in 0..n {
            e[i] = 1.0;
            op.apply(&e, &mut col)?;
            diag[i] = col[i];
            e[i] = 0.0;
        }
        self.inv_diag = Some(Self::invert(diag));
        Ok(())
    }

    fn apply(&self, r: &V, z: &mut V) -> Result<(), IvpsolError> {
        let inv_diag = self
            .inv_diag
            .as_ref()
            .ok_or_else(|| linear_solver_error!(LinearSolverNotSetup))?;
        z.copy_from(r)?;
        z.component_mul_assign(inv_diag)
    }
}

/// A user supplied preconditioner `(r, z) -> z = P^{-1} r`, with an optional setup hook.
pub struct FnPreconditioner<V: Vector> {
    apply: Box<dyn Fn(&V, &mut V)>,
    setup: Option<Box<dyn FnMut(&dyn LinearOperator<V>)>>,
}

impl<V: Vector> FnPreconditioner<V> {
    pub fn new(apply: impl Fn(&V, &mut V) + 'static) -> Self {
        Self {
            apply: Box::new(apply),
            setup: None,
        }
    }

    pub fn with_setup(mut self, setup: impl FnMut(&dyn LinearOperator<V>) + 'static) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }
}

impl<V: Vector> Preconditioner<V> for FnPreconditioner<V> {
    fn setup(&mut self, op: &dyn LinearOperator<V>) -> Result<(), IvpsolError> {
        if let Some(setup) = self.setup.as_mut() {
            setup(op);
        }
        Ok(())
    }

    fn apply(&self, r: &V, z: &mut V) -> Result<(), IvpsolError> {
        crate::vector::check_length(r.len(), z.len())?;
        (self.apply)(r, z);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::linear_solver::MatrixOperator;
    use crate::matrix::tests::tridiagonal_triplets;
    use crate::matrix::DenseMatrix;
    use nalgebra::DVector;

    #[test]
    fn jacobi_sampled_matches_matrix_diagonal() {
        let n = 5;
        let a = DenseMatrix::<DVector<f64>>::from_triplets(n, n, &tridiagonal_triplets(n)).unwrap();
        let from_matrix = JacobiPreconditioner::from_matrix(&a).unwrap();
        let mut sampled = JacobiPreconditioner::<DVector<f64>>::default();
        sampled.setup(&MatrixOperator(&a)).unwrap();

        let r = DVector::from_element(n, 2.0);
        let mut z1 = DVector::zeros(n);
        let mut z2 = DVector::zeros(n);
        from_matrix.apply(&r, &mut z1).unwrap();
        sampled.apply(&r, &mut z2).unwrap();
        z1.assert_eq_st(&z2, 1e-15);
        assert!((z1[0] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn jacobi_requires_setup() {
        let jacobi = JacobiPreconditioner::<DVector<f64>>::default();
        let err = jacobi
            .apply(&DVector::zeros(2), &mut DVector::zeros(2))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn fn_preconditioner_runs_setup_hook() {
        let calls = Rc::new(Cell::new(0));
        let calls_hook = calls.clone();
        let mut p = FnPreconditioner::new(|r: &DVector<f64>, z: &mut DVector<f64>| {
            z.copy_from(&(r * 0.5))
        })
        .with_setup(move |_op| calls_hook.set(calls_hook.get() + 1));
        let a = DenseMatrix::<DVector<f64>>::from_triplets(1, 1, &[(0, 0, 2.0)]).unwrap();
        p.setup(&MatrixOperator(&a)).unwrap();
        assert_eq!(calls.get(), 1);
        let mut z = DVector::zeros(1);
        p.apply(&DVector::from_element(1, 3.0), &mut z).unwrap();
        assert_eq!(z[0], 1.5);
    }
}
