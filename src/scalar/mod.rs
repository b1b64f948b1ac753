//! Scalar and index types used throughout the crate.
//!
//! All back-ends work in double precision.

pub type Scalar = f64;
pub type IndexType = usize;

/// Unit roundoff of [Scalar].
pub const EPSILON: Scalar = f64::EPSILON;

/// Square root of the unit roundoff, the default perturbation scale for finite differences.
pub fn sqrt_epsilon() -> Scalar {
    EPSILON.sqrt()
}
