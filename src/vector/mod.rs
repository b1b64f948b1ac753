use std::fmt::Debug;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::IvpsolError;
use crate::{vector_error, IndexType, Scalar};

mod nalgebra_serial;
#[cfg(feature = "parallel")]
mod parallel;

#[cfg(feature = "parallel")]
pub use parallel::ParallelVector;

/// Returns an error unless `found == expected`.
pub fn check_length(expected: IndexType, found: IndexType) -> Result<(), IvpsolError> {
    if expected != found {
        return Err(vector_error!(DimensionMismatch, expected: expected, found: found));
    }
    Ok(())
}

/// Storage backing a [Vector] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorBackend {
    /// A contiguous array operated on by a single thread.
    Serial,
    /// A contiguous array whose elementwise operations and reductions run on the rayon pool.
    Parallel,
}

/// A mutable array of [Scalar]s with the arithmetic the solvers need.
///
/// Binary operations require equal-length operands and fail with
/// [crate::error::VectorError::DimensionMismatch] otherwise. Only the storage
/// primitives are required; everything else is provided on top of [Vector::as_slice]
/// and [Vector::as_mut_slice], and backends may override the hot paths.
pub trait Vector:
    Clone
    + Debug
    + PartialEq
    + Index<IndexType, Output = Scalar>
    + IndexMut<IndexType, Output = Scalar>
    + Send
    + Sync
    + 'static
{
    fn zeros(len: IndexType) -> Self;
    fn from_element(len: IndexType, value: Scalar) -> Self;
    fn from_vec(vec: Vec<Scalar>) -> Self;
    fn len(&self) -> IndexType;
    fn as_slice(&self) -> &[Scalar];
    fn as_mut_slice(&mut self) -> &mut [Scalar];
    fn backend() -> VectorBackend;

    fn from_slice(slice: &[Scalar]) -> Self {
        Self::from_vec(slice.to_vec())
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an error unless `other` has the same length as `self`.
    fn check_len(&self, other: &Self) -> Result<(), IvpsolError> {
        check_length(self.len(), other.len())
    }

    fn fill(&mut self, value: Scalar) {
        self.as_mut_slice().iter_mut().for_each(|x| *x = value);
    }

    fn copy_from(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        self.as_mut_slice().copy_from_slice(other.as_slice());
        Ok(())
    }

    /// self = alpha * x + beta * self
    fn axpy(&mut self, alpha: Scalar, x: &Self, beta: Scalar) -> Result<(), IvpsolError> {
        self.check_len(x)?;
        for (s, xi) in self.as_mut_slice().iter_mut().zip(x.as_slice()) {
            *s = alpha * xi + beta * *s;
        }
        Ok(())
    }

    /// self = a * x + b * y
    fn linear_combination(
        &mut self,
        a: Scalar,
        x: &Self,
        b: Scalar,
        y: &Self,
    ) -> Result<(), IvpsolError> {
        self.check_len(x)?;
        self.check_len(y)?;
        for ((s, xi), yi) in self
            .as_mut_slice()
            .iter_mut()
            .zip(x.as_slice())
            .zip(y.as_slice())
        {
            *s = a * xi + b * yi;
        }
        Ok(())
    }

    fn scale_mut(&mut self, alpha: Scalar) {
        self.as_mut_slice().iter_mut().for_each(|x| *x *= alpha);
    }

    fn dot(&self, other: &Self) -> Result<Scalar, IvpsolError> {
        self.check_len(other)?;
        Ok(self
            .as_slice()
            .iter()
            .zip(other.as_slice())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Euclidean norm
    fn norm(&self) -> Scalar {
        self.as_slice().iter().map(|x| x * x).sum::<Scalar>().sqrt()
    }

    /// Largest absolute entry, NaN entries are ignored.
    fn max_abs(&self) -> Scalar {
        self.as_slice()
            .iter()
            .filter(|x| !x.is_nan())
            .fold(0.0, |acc, x| acc.max(x.abs()))
    }

    /// sqrt(1/n * sum_i (x_i * w_i)^2)
    fn weighted_rms_norm(&self, weights: &Self) -> Result<Scalar, IvpsolError> {
        self.check_len(weights)?;
        if self.is_empty() {
            return Ok(0.0);
        }
        let acc: Scalar = self
            .as_slice()
            .iter()
            .zip(weights.as_slice())
            .map(|(x, w)| (x * w).powi(2))
            .sum();
        Ok((acc / self.len() as Scalar).sqrt())
    }

    /// Mean of (x_i / (rtol * |y_i| + atol_i))^2, the square of the error norm used
    /// for step acceptance and nonlinear convergence.
    fn squared_norm(&self, y: &Self, atol: &Self, rtol: Scalar) -> Result<Scalar, IvpsolError> {
        self.check_len(y)?;
        self.check_len(atol)?;
        if self.is_empty() {
            return Ok(0.0);
        }
        let acc: Scalar = self
            .as_slice()
            .iter()
            .zip(y.as_slice())
            .zip(atol.as_slice())
            .map(|((xi, yi), ai)| (xi / (yi.abs() * rtol + ai)).powi(2))
            .sum();
        Ok(acc / self.len() as Scalar)
    }

    fn component_mul_assign(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        for (s, o) in self.as_mut_slice().iter_mut().zip(other.as_slice()) {
            *s *= o;
        }
        Ok(())
    }

    fn component_div_assign(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        for (s, o) in self.as_mut_slice().iter_mut().zip(other.as_slice()) {
            *s /= o;
        }
        Ok(())
    }

    fn abs(&self) -> Self {
        let mut ret = self.clone();
        ret.as_mut_slice().iter_mut().for_each(|x| *x = x.abs());
        ret
    }

    /// self - other as a new vector
    fn difference(&self, other: &Self) -> Result<Self, IvpsolError> {
        let mut ret = self.clone();
        ret.axpy(-1.0, other, 1.0)?;
        Ok(ret)
    }

    /// Compares two evaluations of an event function `self = g(t0)` and `g1 = g(t1)`.
    ///
    /// Returns whether any component of `g1` is exactly zero, and for the components that
    /// change sign the largest `|g1 / (g1 - g0)|` together with its index (or -1 if none).
    fn root_finding(&self, g1: &Self) -> Result<(bool, Scalar, i32), IvpsolError> {
        self.check_len(g1)?;
        let mut max_frac = 0.0;
        let mut max_frac_index = -1;
        let mut found_root = false;
        for (i, (&g0, &g1)) in self.as_slice().iter().zip(g1.as_slice()).enumerate() {
            if g1 == 0.0 {
                found_root = true;
            }
            if g0 * g1 < 0.0 {
                let frac = (g1 / (g1 - g0)).abs();
                if frac > max_frac {
                    max_frac = frac;
                    max_frac_index = i as i32;
                }
            }
        }
        Ok((found_root, max_frac, max_frac_index))
    }

    fn assert_eq_st(&self, other: &Self, tol: Scalar) {
        assert_eq!(
            self.len(),
            other.len(),
            "Vector length mismatch: {} != {}",
            self.len(),
            other.len()
        );
        for i in 0..self.len() {
            assert!(
                (self[i] - other[i]).abs() <= tol,
                "Vector element mismatch at index {}: {} != {} (left: {:?}, right: {:?})",
                i,
                self[i],
                other[i],
                self,
                other
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use nalgebra::DVector;

    fn check_contract<V: Vector>() {
        let x = V::from_vec(vec![1.0, -2.0, 3.0]);
        let y = V::from_vec(vec![4.0, 5.0, -6.0]);

        let mut z = V::zeros(3);
        z.linear_combination(2.0, &x, -1.0, &y).unwrap();
        z.assert_eq_st(&V::from_vec(vec![-2.0, -9.0, 12.0]), 1e-15);

        let mut w = y.clone();
        w.axpy(1.0, &x, 2.0).unwrap();
        w.assert_eq_st(&V::from_vec(vec![9.0, 8.0, -9.0]), 1e-15);

        assert_eq!(x.dot(&y).unwrap(), 4.0 - 10.0 - 18.0);
        assert!((x.norm() - 14.0f64.sqrt()).abs() < 1e-15);
        assert_eq!(x.max_abs(), 3.0);

        let weights = V::from_element(3, 0.5);
        let expect = ((0.25 + 1.0 + 2.25) / 3.0f64).sqrt();
        assert!((x.weighted_rms_norm(&weights).unwrap() - expect).abs() < 1e-15);

        let atol = V::from_element(3, 1.0);
        let sq = x.squared_norm(&V::zeros(3), &atol, 0.1).unwrap();
        assert!((sq - 14.0 / 3.0).abs() < 1e-14);

        let short = V::zeros(2);
        let err = x.dot(&short).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        let mut z = V::zeros(3);
        assert!(z.linear_combination(1.0, &x, 1.0, &short).is_err());
        assert!(x.weighted_rms_norm(&short).is_err());
    }

    #[test]
    fn dvector_contract() {
        check_contract::<DVector<f64>>();
        assert_eq!(<DVector<f64> as Vector>::backend(), VectorBackend::Serial);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_vector_contract() {
        check_contract::<ParallelVector>();
        assert_eq!(ParallelVector::backend(), VectorBackend::Parallel);
    }

    #[test]
    fn root_finding_reports_largest_crossing() {
        let g0 = DVector::from_vec(vec![1.0, -1.0, 2.0]);
        let g1 = DVector::from_vec(vec![-1.0, -0.5, -0.5]);
        let (found, frac, index) = g0.root_finding(&g1).unwrap();
        assert!(!found);
        assert_eq!(index, 0);
        assert!((frac - 0.5).abs() < 1e-15);

        let g1 = DVector::from_vec(vec![0.0, -0.5, 1.0]);
        let (found, _, index) = g0.root_finding(&g1).unwrap();
        assert!(found);
        assert_eq!(index, -1);
    }

    #[test]
    fn max_abs_ignores_nan() {
        let x = DVector::from_vec(vec![f64::NAN, -3.0, 2.0]);
        assert_eq!(x.max_abs(), 3.0);
    }
}
