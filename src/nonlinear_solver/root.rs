use std::cell::RefCell;

use crate::error::IvpsolError;
use crate::scalar::EPSILON;
use crate::{IndexType, NonLinearOp, Scalar, Vector};

/// Locates zero crossings of an event function `g(y, t)` between successive solver steps.
///
/// The crossing is bracketed by the values of `g` at the start and end of the step and refined
/// with the Illinois variant of the secant method on the component whose crossing lies closest to
/// the start of the step, see the SUNDIALS CVODE documentation on rootfinding.
#[derive(Clone, Debug)]
pub struct RootFinder<V: Vector> {
    t0: RefCell<Scalar>,
    g0: RefCell<V>,
    g1: RefCell<V>,
    gmid: RefCell<V>,
    ymid: RefCell<V>,
}

impl<V: Vector> RootFinder<V> {
    pub fn new(nroots: usize, nstates: usize) -> Self {
        Self {
            t0: RefCell::new(0.0),
            g0: RefCell::new(V::zeros(nroots)),
            g1: RefCell::new(V::zeros(nroots)),
            gmid: RefCell::new(V::zeros(nroots)),
            ymid: RefCell::new(V::zeros(nstates)),
        }
    }

    /// Set the lower end of the search interval, call before the first [Self::check_root].
    pub fn init(
        &self,
        root_fn: &impl NonLinearOp<V = V>,
        y: &V,
        t: Scalar,
    ) -> Result<(), IvpsolError> {
        root_fn.call_inplace(y, t, &mut self.g0.borrow_mut())?;
        self.t0.replace(t);
        Ok(())
    }

    /// Extend the search interval to `t` (where the state is `y`) and return the earliest root
    /// in it, if any. The upper end becomes the lower end of the next search.
    pub fn check_root(
        &self,
        interpolate_inplace: &impl Fn(Scalar, &mut V) -> Result<(), IvpsolError>,
        root_fn: &impl NonLinearOp<V = V>,
        y: &V,
        t: Scalar,
    ) -> Result<Option<Scalar>, IvpsolError> {
        let g0 = &mut *self.g0.borrow_mut();
        let g1 = &mut *self.g1.borrow_mut();
        let gmid = &mut *self.gmid.borrow_mut();
        let ymid = &mut *self.ymid.borrow_mut();
        root_fn.call_inplace(y, t, g1)?;

        let (found_root, _, imax) = g0.root_finding(g1)?;
        if imax < 0 {
            std::mem::swap(g0, g1);
            self.t0.replace(t);
            return Ok(found_root.then_some(t));
        }

        let mut imax = imax as IndexType;
        let mut alpha: Scalar = 1.0;
        let mut sign_change = [false, true];
        let mut i = 0;
        let mut t1 = t;
        let mut t0 = *self.t0.borrow();
        let tol = 100.0 * EPSILON * (t1.abs() + (t1 - t0).abs());
        let away_from_ends = |t0: Scalar, t1: Scalar| {
            let fracint = (t1 - t0).abs() / tol;
            if fracint > 5.0 {
                0.1
            } else {
                0.5 / fracint
            }
        };
        while (t1 - t0).abs() > tol {
            let mut t_mid = t1 - (t1 - t0) * g1[imax] / (g1[imax] - alpha * g0[imax]);
            if (t_mid - t0).abs() < 0.5 * tol {
                t_mid = t0 + away_from_ends(t0, t1) * (t1 - t0);
            }
            if (t1 - t_mid).abs() < 0.5 * tol {
                t_mid = t1 - away_from_ends(t0, t1) * (t1 - t0);
            }

            interpolate_inplace(t_mid, ymid)?;
            root_fn.call_inplace(ymid, t_mid, gmid)?;

            let (found_root, _, imax_mid) = g0.root_finding(gmid)?;
            let lower = imax_mid >= 0;
            if lower {
                // crossing in (t0, t_mid)
                t1 = t_mid;
                imax = imax_mid as IndexType;
                std::mem::swap(g1, gmid);
            } else if found_root {
                root_fn.call_inplace(y, t, g0)?;
                self.t0.replace(t);
                return Ok(Some(t_mid));
            } else {
                // crossing in (t_mid, t1)
                t0 = t_mid;
                std::mem::swap(g0, gmid);
            }

            // Illinois: scale the retained end point when the same end is kept twice
            sign_change[i % 2] = lower;
            if i >= 2 {
                alpha = if sign_change[0] != sign_change[1] {
                    1.0
                } else if sign_change[0] {
                    0.5 * alpha
                } else {
                    2.0 * alpha
                };
            }
            i += 1;
        }
        root_fn.call_inplace(y, t, g0)?;
        self.t0.replace(t);
        Ok(Some(t1))
    }
}
