use std::cell::RefCell;

use log::trace;

use crate::error::IvpsolError;
use crate::{scalar::sqrt_epsilon, Matrix, NonLinearOp, NonLinearOpJacobian, Scalar, Vector};

use self::coloring::{column_intersection_graph, greedy_coloring};

pub mod coloring;

/// Find the non-zero entries of the Jacobian of `op` at `(x, t)`.
///
/// Each state is set to NaN in turn and the outputs that become NaN are recorded. This relies on
/// NaN propagating through `op`, so it will miss dependencies hidden behind control flow on the
/// state. It is only used once during setup.
pub fn find_jacobian_non_zeros<F: NonLinearOp + ?Sized>(
    op: &F,
    x: &F::V,
    t: Scalar,
) -> Result<Vec<(usize, usize)>, IvpsolError> {
    let mut xp = x.clone();
    let mut col = F::V::zeros(op.nout());
    let mut triplets = Vec::with_capacity(op.nstates());
    for j in 0..op.nstates() {
        xp[j] = Scalar::NAN;
        op.call_inplace(&xp, t, &mut col)?;
        for i in 0..op.nout() {
            if col[i].is_nan() {
                triplets.push((i, j));
            }
        }
        xp[j] = x[j];
    }
    // column-major, matching Matrix::pattern
    triplets.sort_by_key(|&(i, j)| (j, i));
    Ok(triplets)
}

/// Approximate `y = J(x) v` by a forward difference of `f`.
///
/// The perturbation is `sigma = sqrt(eps) * (1 + max|x|) / max|v|`; `fx` must hold `f(x)`.
pub fn finite_difference_jac_mul<V, F>(
    f: F,
    x: &V,
    fx: &V,
    v: &V,
    y: &mut V,
) -> Result<(), IvpsolError>
where
    V: Vector,
    F: Fn(&V, &mut V) -> Result<(), IvpsolError>,
{
    let vmax = v.max_abs();
    if vmax == 0.0 {
        y.fill(0.0);
        return Ok(());
    }
    let sigma = sqrt_epsilon() * (1.0 + x.max_abs()) / vmax;
    let mut xp = x.clone();
    xp.axpy(sigma, v, 1.0)?;
    f(&xp, y)?;
    y.axpy(-1.0 / sigma, fx, 1.0 / sigma)?;
    Ok(())
}

/// Assembles a structured Jacobian with one Jacobian-vector product per column color.
///
/// Columns in the same color group have no row in common, so the product of the Jacobian with
/// the sum of their unit vectors can be scattered back into the individual entries.
pub struct JacobianColoring<M: Matrix> {
    input_indices_per_color: Vec<Vec<usize>>,
    entries_per_color: Vec<Vec<(usize, usize)>>,
    scratch_v: RefCell<M::V>,
    scratch_col: RefCell<M::V>,
}

impl<M: Matrix> Clone for JacobianColoring<M> {
    fn clone(&self) -> Self {
        Self {
            input_indices_per_color: self.input_indices_per_color.clone(),
            entries_per_color: self.entries_per_color.clone(),
            scratch_v: RefCell::new(self.scratch_v.borrow().clone()),
            scratch_col: RefCell::new(self.scratch_col.borrow().clone()),
        }
    }
}

impl<M: Matrix> JacobianColoring<M> {
    pub fn new(nrows: usize, ncols: usize, non_zeros: &[(usize, usize)]) -> Self {
        let graph = column_intersection_graph(non_zeros, ncols);
        let coloring = greedy_coloring(&graph);
        let max_color = coloring.iter().max().copied().unwrap_or(0);
        let mut input_indices_per_color = vec![Vec::new(); max_color];
        let mut entries_per_color = vec![Vec::new(); max_color];
        for (j, &c) in coloring.iter().enumerate() {
            input_indices_per_color[c - 1].push(j);
        }
        for &(i, j) in non_zeros {
            entries_per_color[coloring[j] - 1].push((i, j));
        }
        trace!("jacobian coloring: {} columns in {} colors", ncols, max_color);
        Self {
            input_indices_per_color,
            entries_per_color,
            scratch_v: RefCell::new(M::V::zeros(ncols)),
            scratch_col: RefCell::new(M::V::zeros(nrows)),
        }
    }

    pub fn ncolors(&self) -> usize {
        self.input_indices_per_color.len()
    }

    pub fn jacobian_inplace<F: NonLinearOpJacobian<M = M, V = M::V>>(
        &self,
        op: &F,
        x: &F::V,
        t: Scalar,
        y: &mut F::M,
    ) -> Result<(), IvpsolError> {
        let mut v = self.scratch_v.borrow_mut();
        let mut col = self.scratch_col.borrow_mut();
        for (inputs, entries) in self
            .input_indices_per_color
            .iter()
            .zip(self.entries_per_color.iter())
        {
            inputs.iter().for_each(|&j| v[j] = 1.0);
            op.jac_mul_inplace(x, t, &v, &mut col)?;
            for &(i, j) in entries {
                y.set_entry(i, j, col[i])?;
            }
            inputs.iter().for_each(|&j| v[j] = 0.0);
        }
        Ok(())
    }
}
