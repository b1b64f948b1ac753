//! Small problems with known solutions, shared by the tests and benchmarks.

pub mod exponential_decay;
pub mod exponential_decay_with_algebraic;
pub mod heat1d;
pub mod robertson;
