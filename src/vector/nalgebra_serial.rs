use nalgebra::DVector;

use crate::error::IvpsolError;
use crate::{IndexType, Scalar};

use super::{Vector, VectorBackend};

impl Vector for DVector<Scalar> {
    fn zeros(len: IndexType) -> Self {
        DVector::zeros(len)
    }
    fn from_element(len: IndexType, value: Scalar) -> Self {
        DVector::from_element(len, value)
    }
    fn from_vec(vec: Vec<Scalar>) -> Self {
        DVector::from_vec(vec)
    }
    fn len(&self) -> IndexType {
        self.nrows()
    }
    fn as_slice(&self) -> &[Scalar] {
        self.as_slice()
    }
    fn as_mut_slice(&mut self) -> &mut [Scalar] {
        self.as_mut_slice()
    }
    fn backend() -> VectorBackend {
        VectorBackend::Serial
    }
    fn fill(&mut self, value: Scalar) {
        DVector::fill(self, value);
    }
    fn copy_from(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        DVector::copy_from(self, other);
        Ok(())
    }
    fn axpy(&mut self, alpha: Scalar, x: &Self, beta: Scalar) -> Result<(), IvpsolError> {
        self.check_len(x)?;
        DVector::axpy(self, alpha, x, beta);
        Ok(())
    }
    fn scale_mut(&mut self, alpha: Scalar) {
        *self *= alpha;
    }
    fn dot(&self, other: &Self) -> Result<Scalar, IvpsolError> {
        self.check_len(other)?;
        Ok(DVector::dot(self, other))
    }
    fn norm(&self) -> Scalar {
        DVector::norm(self)
    }
    fn component_mul_assign(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        DVector::component_mul_assign(self, other);
        Ok(())
    }
    fn component_div_assign(&mut self, other: &Self) -> Result<(), IvpsolError> {
        self.check_len(other)?;
        DVector::component_div_assign(self, other);
        Ok(())
    }
}
