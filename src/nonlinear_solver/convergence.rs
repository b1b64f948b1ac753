use log::trace;

use crate::error::IvpsolError;
use crate::{IndexType, Scalar, Vector};

/// Convergence test shared by the nonlinear solvers.
///
/// Corrections are measured in the weighted RMS norm with weights `rtol * |y| + atol`. An
/// iteration has converged once two consecutive corrections are at most `tol`, and has diverged
/// once the correction norm has grown (while above `tol`) on two consecutive iterations.
#[derive(Clone, Debug)]
pub struct Convergence<'a, V: Vector> {
    pub rtol: Scalar,
    pub atol: &'a V,
    tol: Scalar,
    max_iter: IndexType,
    niter: IndexType,
    small_in_a_row: IndexType,
    growth_in_a_row: IndexType,
    old_norm: Option<Scalar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Continue,
    Converged,
    Diverged,
    MaximumIterations,
}

impl<'a, V: Vector> Convergence<'a, V> {
    pub fn new(rtol: Scalar, atol: &'a V) -> Self {
        Self {
            rtol,
            atol,
            tol: 0.33,
            max_iter: 10,
            niter: 0,
            small_in_a_row: 0,
            growth_in_a_row: 0,
            old_norm: None,
        }
    }

    pub fn with_tolerance(mut self, tol: Scalar) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: IndexType) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tol(&self) -> Scalar {
        self.tol
    }
    pub fn max_iter(&self) -> IndexType {
        self.max_iter
    }
    pub fn niter(&self) -> IndexType {
        self.niter
    }

    pub fn reset(&mut self) {
        self.niter = 0;
        self.small_in_a_row = 0;
        self.growth_in_a_row = 0;
        self.old_norm = None;
    }

    /// Weighted RMS norm of the correction `dy`, with weights taken from `y`.
    pub fn norm(&self, dy: &V, y: &V) -> Result<Scalar, IvpsolError> {
        Ok(dy.squared_norm(y, self.atol, self.rtol)?.sqrt())
    }

    /// Record the norm of the latest correction and classify the iteration.
    pub fn check_new_iteration(&mut self, norm: Scalar) -> ConvergenceStatus {
        self.niter += 1;
        trace!("  iteration {}, correction norm = {:.3e}", self.niter, norm);
        if norm.is_nan() {
            return ConvergenceStatus::Diverged;
        }
        if norm <= self.tol {
            self.small_in_a_row += 1;
            self.growth_in_a_row = 0;
        } else {
            self.small_in_a_row = 0;
            match self.old_norm {
                Some(old_norm) if norm > old_norm => self.growth_in_a_row += 1,
                _ => self.growth_in_a_row = 0,
            }
        }
        self.old_norm = Some(norm);

        if self.small_in_a_row >= 2 {
            ConvergenceStatus::Converged
        } else if self.growth_in_a_row >= 2 {
            ConvergenceStatus::Diverged
        } else if self.niter >= self.max_iter {
            ConvergenceStatus::MaximumIterations
        } else {
            ConvergenceStatus::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn two_consecutive_small_corrections() {
        let atol = DVector::from_element(1, 1e-6);
        let mut c = Convergence::new(1e-6, &atol).with_tolerance(0.1);

        // a lucky small correction followed by a large one is not convergence
        assert_eq!(c.check_new_iteration(1e-8), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(5.0), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(1e-3), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(1e-5), ConvergenceStatus::Converged);
        assert_eq!(c.niter(), 4);

        c.reset();
        assert_eq!(c.niter(), 0);
        assert_eq!(c.check_new_iteration(0.0), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(0.0), ConvergenceStatus::Converged);
    }

    #[test]
    fn two_consecutive_growths_diverge() {
        let atol = DVector::from_element(1, 1e-6);
        let mut c = Convergence::new(1e-6, &atol).with_tolerance(0.1);
        assert_eq!(c.check_new_iteration(1.0), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(2.0), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(1.5), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(3.0), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(4.0), ConvergenceStatus::Diverged);
    }

    #[test]
    fn iteration_limit() {
        let atol = DVector::from_element(1, 1e-6);
        let mut c = Convergence::new(1e-6, &atol).with_max_iter(3);
        assert_eq!(c.check_new_iteration(1.0), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(0.9), ConvergenceStatus::Continue);
        assert_eq!(c.check_new_iteration(0.8), ConvergenceStatus::MaximumIterations);
    }

    #[test]
    fn weighted_norm() {
        let atol = DVector::from_vec(vec![1.0, 1.0]);
        let c = Convergence::new(0.0, &atol);
        let dy = DVector::from_vec(vec![3.0, 4.0]);
        let y = DVector::zeros(2);
        let norm = c.norm(&dy, &y).unwrap();
        assert!((norm - (12.5f64).sqrt()).abs() < 1e-14);
    }
}
