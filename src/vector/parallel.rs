//! A vector whose elementwise operations and reductions run on the rayon thread pool.
//!
//! Reductions are computed as partial sums over fixed-size chunks which are then combined
//! in chunk order, so the result does not depend on how rayon schedules the work and
//! repeated runs are bit-identical.

use std::ops::{Index, IndexMut};

use rayon::prelude::*;

use crate::error::IvpsolError;
use crate::{IndexType, Scalar};

use super::{Vector, VectorBackend};

const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelVector {
    data: Vec<Scalar>,
}

impl ParallelVector {
    fn chunked_sum<F>(&self, f: F) -> Scalar
    where
        F: Fn(usize, &[Scalar]) -> Scalar + Sync + Send,
    {
        let partial: Vec<Scalar> = self
            .data
            .par_chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(i, chunk)| f(i * CHUNK_SIZE, chunk))
            .collect();
        partial.iter().sum()
    }
}

impl From<Vec<Scalar>> for ParallelVector {
    fn from(data: Vec<Scalar>) -> Self {
        Self { data }
    }
}

impl Index<IndexType> for ParallelVector {
    type Output = Scalar;
    fn index(&self, index: IndexType) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<IndexType> for ParallelVector {
    fn index_mut(&mut self, index: IndexType) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Vector for ParallelVector {
    fn zeros(len: IndexType) -> Self {
        Self::from_element(len, 0.0)
    }
    fn from_element(len: IndexType, value: Scalar) -> Self {
        Self {
            data: vec![value; len],
        }
    }
    fn from_vec(vec: Vec<Scalar>) -> Self {
        Self { data: vec }
    }
    fn len(&self) -> IndexType {
        self.data.len()
    }
    fn as_slice(&self) -> &[Scalar] {
        &self.data
    }
    fn as_mut_slice(&mut self) -> &mut [Scalar] {
        &mut self.data
    }
    fn backend() -> VectorBackend {
        VectorBackend::Parallel
    }

    fn fill(&mut self, value: Scalar) {
        self.data.par_iter_mut().for_each(|x| *x = value);
    }

    fn axpy(&mut self, alpha: Scalar, x: &Self, beta: Scalar) -> Result<(), IvpsolError> {
        self.check_len(x)?;
        self.data
            .par_iter_mut()
            .zip(x.data.par_iter())
            .for_each(|(s, xi)| *s = alpha * xi + beta * *s);
        Ok(())
    }

    fn linear_combination(
        &mut self,
        a: Scalar,
        x: &Self,
        b: Scalar,
        y: &Self,
    ) -> Result<(), IvpsolError> {
        self.check_len(x)?;
        self.check_len(y)?;
        self.data
            .par_iter_mut()
            .zip(x.data.par_iter().zip(y.data.par_iter()))
            .for_each(|(s, (xi, yi))| *s = a * xi + b * yi);
        Ok(())
    }

    fn scale_mut(&mut self, alpha: Scalar) {
        self.data.par_iter_mut().for_each(|x| *x *= alpha);
    }

    fn dot(&self, other: &Self) -> Result<Scalar, IvpsolError> {
        self.check_len(other)?;
        Ok(self.chunked_sum(|start, chunk| {
            chunk
                .iter()
                .zip(&other.data[start..start + chunk.len()])
                .map(|(a, b)| a * b)
                .sum()
        }))
    }

    fn norm(&self) -> Scalar {
        self.chunked_sum(|_, chunk| chunk.iter().map(|x| x * x).sum())
            .sqrt()
    }

    fn weighted_rms_norm(&self, weights: &Self) -> Result<Scalar, IvpsolError> {
        self.check_len(weights)?;
        if self.is_empty() {
            return Ok(0.0);
        }
        let acc = self.chunked_sum(|start, chunk| {
            chunk
                .iter()
                .zip(&weights.data[start..start + chunk.len()])
                .map(|(x, w)| (x * w).powi(2))
                .sum()
        });
        Ok((acc / self.len() as Scalar).sqrt())
    }

    fn squared_norm(&self, y: &Self, atol: &Self, rtol: Scalar) -> Result<Scalar, IvpsolError> {
        self.check_len(y)?;
        self.check_len(atol)?;
        if self.is_empty() {
            return Ok(0.0);
        }
        let acc = self.chunked_sum(|start, chunk| {
            let end = start + chunk.len();
            chunk
                .iter()
                .zip(&y.data[start..end])
                .zip(&atol.data[start..end])
                .map(|((xi, yi), ai)| (xi / (yi.abs() * rtol + ai)).powi(2))
                .sum()
        });
        Ok(acc / self.len() as Scalar)
    }

    fn component_mul_assign(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(s, o)| *s *= o);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn reductions_are_deterministic() {
        let n = 10 * CHUNK_SIZE + 17;
        let data: Vec<f64> = (0..n).map(|i| ((i as f64) * 0.37).sin() * 1e3).collect();
        let x = ParallelVector::from_vec(data.clone());
        let first = x.dot(&x).unwrap();
        for _ in 0..10 {
            assert_eq!(x.dot(&x).unwrap().to_bits(), first.to_bits());
        }
        let serial = DVector::from_vec(data);
        assert!((Vector::norm(&serial) - x.norm()).abs() < 1e-9 * x.norm());
    }
}
