use thiserror::Error;

/// Custom error type for ivpsol
///
/// This error type wraps all possible errors that can occur when using ivpsol.
/// Use [IvpsolError::kind] to classify an error, and [IvpsolError::is_recoverable]
/// to decide whether a retry (Jacobian refresh or smaller step) may help.
#[derive(Error, Debug)]
pub enum IvpsolError {
    #[error("Vector error: {0}")]
    VectorError(#[from] VectorError),
    #[error("Matrix error: {0}")]
    MatrixError(#[from] MatrixError),
    #[error("Linear solver error: {0}")]
    LinearSolverError(#[from] LinearSolverError),
    #[error("Non-linear solver error: {0}")]
    NonLinearSolverError(#[from] NonLinearSolverError),
    #[error("ODE solver error: {0}")]
    OdeSolverError(#[from] OdeSolverError),
    #[error("Error: {0}")]
    Other(String),
}

/// Possible errors for vector operations
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Vector length mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Possible errors for matrix operations
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Matrix and vector dimensions do not match: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Entry ({row}, {col}) is outside the band (lower = {lower}, upper = {upper})")]
    BandwidthViolation {
        row: usize,
        col: usize,
        lower: usize,
        upper: usize,
    },
    #[error("Index ({row}, {col}) out of bounds for a {nrows}x{ncols} matrix")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("Entry ({row}, {col}) is not in the sparsity pattern")]
    EntryNotInPattern { row: usize, col: usize },
    #[error("Matrix is not square: {nrows}x{ncols}")]
    NotSquare { nrows: usize, ncols: usize },
    #[error("Matrices have different structure")]
    StructureMismatch,
    #[error("Invalid sparsity pattern: {0}")]
    InvalidPattern(String),
    #[error("Error: {0}")]
    Other(String),
}

/// Possible errors that can occur when solving a linear problem
#[derive(Error, Debug)]
pub enum LinearSolverError {
    #[error("Matrix is singular (zero pivot in column {column})")]
    SingularMatrix { column: usize },
    #[error("Iterative solver did not converge after {iterations} iterations (residual = {residual:.3e})")]
    NoConvergence { iterations: usize, residual: f64 },
    #[error("Iterative solver broke down after {iterations} iterations")]
    Breakdown { iterations: usize },
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,
    #[error("Linear solver not setup")]
    LinearSolverNotSetup,
    #[error("Error: {0}")]
    Other(String),
}

/// Possible errors that can occur when solving a non-linear problem
#[derive(Error, Debug)]
pub enum NonLinearSolverError {
    #[error("Non-linear iteration did not converge after {iterations} iterations")]
    NoConvergence { iterations: usize },
    #[error("Fixed-point iteration diverged after {iterations} iterations")]
    DivergenceDetected { iterations: usize },
    #[error("Line search step length fell below the minimum (alpha = {alpha:.3e})")]
    LineSearchFailed { alpha: f64 },
    #[error("Jacobian not reset before calling solve")]
    JacobianNotReset,
    #[error("State has wrong length: expected {expected}, got {found}")]
    WrongStateLength { expected: usize, found: usize },
    #[error("Error: {0}")]
    Other(String),
}

/// Possible errors that can occur when solving an ODE
#[derive(Debug, Error)]
pub enum OdeSolverError {
    #[error("Exceeded maximum number of consecutive step failures ({failures}) at time = {time}")]
    RepeatedStepFailure { time: f64, failures: usize },
    #[error("Step size is too small at time = {time}")]
    StepSizeTooSmall { time: f64 },
    #[error(
        "Stop time = {} is less than current state time = {}",
        stop_time,
        state_time
    )]
    StopTimeBeforeCurrentTime { stop_time: f64, state_time: f64 },
    #[error("Stop time is at the current state time")]
    StopTimeAtCurrentTime,
    #[error("Interpolation vector is not the correct length, expected {expected}, got {found}")]
    InterpolationVectorWrongSize { expected: usize, found: usize },
    #[error("Interpolation time is after current time")]
    InterpolationTimeAfterCurrentTime,
    #[error("Interpolation time is not within the current step")]
    InterpolationTimeOutsideCurrentStep,
    #[error("The run has failed, create a new solver to continue")]
    RunFailed,
    #[error("Mass matrix not supported for this solver")]
    MassMatrixNotSupported,
    #[error("Jacobian not available")]
    JacobianNotAvailable,
    #[error("State is not consistent with the problem equations")]
    StateProblemMismatch,
    #[error("t_eval must be increasing and all values must be greater than or equal to the current time")]
    InvalidTEval,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Builder error: {0}")]
    BuilderError(String),
    #[error("Invalid Tableau: {0}")]
    InvalidTableau(String),
    #[error("Error: {0}")]
    Other(String),
}

/// Classification of an [IvpsolError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DimensionMismatch,
    BandwidthViolation,
    SingularMatrix,
    NoConvergence,
    DivergenceDetected,
    RepeatedStepFailure,
    StepSizeTooSmall,
    InvalidInput,
    Other,
}

impl IvpsolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IvpsolError::VectorError(VectorError::DimensionMismatch { .. }) => {
                ErrorKind::DimensionMismatch
            }
            IvpsolError::MatrixError(err) => match err {
                MatrixError::DimensionMismatch { .. } | MatrixError::NotSquare { .. } => {
                    ErrorKind::DimensionMismatch
                }
                MatrixError::BandwidthViolation { .. } => ErrorKind::BandwidthViolation,
                MatrixError::IndexOutOfBounds { .. }
                | MatrixError::EntryNotInPattern { .. }
                | MatrixError::StructureMismatch
                | MatrixError::InvalidPattern(_) => ErrorKind::InvalidInput,
                MatrixError::Other(_) => ErrorKind::Other,
            },
            IvpsolError::LinearSolverError(err) => match err {
                LinearSolverError::SingularMatrix { .. } => ErrorKind::SingularMatrix,
                LinearSolverError::NoConvergence { .. }
                | LinearSolverError::Breakdown { .. }
                | LinearSolverError::NotPositiveDefinite => ErrorKind::NoConvergence,
                LinearSolverError::LinearSolverNotSetup => ErrorKind::InvalidInput,
                LinearSolverError::Other(_) => ErrorKind::Other,
            },
            IvpsolError::NonLinearSolverError(err) => match err {
                NonLinearSolverError::NoConvergence { .. }
                | NonLinearSolverError::LineSearchFailed { .. } => ErrorKind::NoConvergence,
                NonLinearSolverError::DivergenceDetected { .. } => ErrorKind::DivergenceDetected,
                NonLinearSolverError::WrongStateLength { .. } => ErrorKind::DimensionMismatch,
                NonLinearSolverError::JacobianNotReset => ErrorKind::InvalidInput,
                NonLinearSolverError::Other(_) => ErrorKind::Other,
            },
            IvpsolError::OdeSolverError(err) => match err {
                OdeSolverError::RepeatedStepFailure { .. } => ErrorKind::RepeatedStepFailure,
                OdeSolverError::StepSizeTooSmall { .. } => ErrorKind::StepSizeTooSmall,
                OdeSolverError::InterpolationVectorWrongSize { .. } => {
                    ErrorKind::DimensionMismatch
                }
                OdeSolverError::Other(_) => ErrorKind::Other,
                _ => ErrorKind::InvalidInput,
            },
            IvpsolError::Other(_) => ErrorKind::Other,
        }
    }

    /// Numerical failures that a caller (usually the integrator) can recover from by
    /// refreshing the Jacobian or shrinking the step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SingularMatrix | ErrorKind::NoConvergence | ErrorKind::DivergenceDetected
        )
    }
}

#[macro_export]
macro_rules! vector_error {
    ($variant:ident, $($field:ident : $value:expr),+ $(,)?) => {
        $crate::error::IvpsolError::from($crate::error::VectorError::$variant { $($field: $value),+ })
    };
}

#[macro_export]
macro_rules! matrix_error {
    ($variant:ident) => {
        $crate::error::IvpsolError::from($crate::error::MatrixError::$variant)
    };
    ($variant:ident, $($field:ident : $value:expr),+ $(,)?) => {
        $crate::error::IvpsolError::from($crate::error::MatrixError::$variant { $($field: $value),+ })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::IvpsolError::from($crate::error::MatrixError::$variant($($arg)*.to_string()))
    };
}

#[macro_export]
macro_rules! linear_solver_error {
    ($variant:ident) => {
        $crate::error::IvpsolError::from($crate::error::LinearSolverError::$variant)
    };
    ($variant:ident, $($field:ident : $value:expr),+ $(,)?) => {
        $crate::error::IvpsolError::from($crate::error::LinearSolverError::$variant { $($field: $value),+ })
    };
}

#[macro_export]
macro_rules! non_linear_solver_error {
    ($variant:ident) => {
        $crate::error::IvpsolError::from($crate::error::NonLinearSolverError::$variant)
    };
    ($variant:ident, $($field:ident : $value:expr),+ $(,)?) => {
        $crate::error::IvpsolError::from($crate::error::NonLinearSolverError::$variant { $($field: $value),+ })
    };
}

#[macro_export]
macro_rules! ode_solver_error {
    ($variant:ident) => {
        $crate::error::IvpsolError::from($crate::error::OdeSolverError::$variant)
    };
    ($variant:ident, $($field:ident : $value:expr),+ $(,)?) => {
        $crate::error::IvpsolError::from($crate::error::OdeSolverError::$variant { $($field: $value),+ })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::IvpsolError::from($crate::error::OdeSolverError::$variant($($arg)*.to_string()))
    };
}

#[macro_export]
macro_rules! other_error {
    ($msg:expr) => {
        $crate::error::IvpsolError::Other($msg.to_string())
    };
}
