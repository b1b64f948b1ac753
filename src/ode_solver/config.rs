use serde::{Deserialize, Serialize};

use crate::error::IvpsolError;
use crate::linear_solver::{KrylovConfig, KrylovMethod};
use crate::vector::check_length;
use crate::{ode_solver_error, Scalar, Vector};

use super::tableau::RkTableau;

/// Highest order of the BDF family.
pub const BDF_MAX_ORDER: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BdfConfig {
    pub minimum_timestep: Scalar,
    pub maximum_error_test_failures: usize,
    pub maximum_nonlinear_solver_failures: usize,
    pub maximum_timestep_growth: Scalar,
    pub minimum_timestep_growth: Scalar,
    pub maximum_timestep_shrink: Scalar,
    pub minimum_timestep_shrink: Scalar,
    pub maximum_newton_iterations: usize,
    pub newton_tolerance: Scalar,
}

impl Default for BdfConfig {
    fn default() -> Self {
        Self {
            minimum_timestep: 1e-32,
            maximum_error_test_failures: 40,
            maximum_nonlinear_solver_failures: 10,
            maximum_timestep_growth: 2.1,
            minimum_timestep_growth: 2.0,
            maximum_timestep_shrink: 0.9,
            minimum_timestep_shrink: 0.5,
            maximum_newton_iterations: 5,
            newton_tolerance: 0.33,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplicitRkConfig {
    pub minimum_timestep: Scalar,
    pub maximum_error_test_failures: usize,
    pub maximum_timestep_growth: Scalar,
    pub minimum_timestep_shrink: Scalar,
    pub safety: Scalar,
}

impl Default for ExplicitRkConfig {
    fn default() -> Self {
        Self {
            minimum_timestep: 1e-13,
            maximum_error_test_failures: 40,
            maximum_timestep_growth: 10.0,
            minimum_timestep_shrink: 0.2,
            safety: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AbsoluteTolerance {
    Scalar(Scalar),
    PerComponent(Vec<Scalar>),
}

impl AbsoluteTolerance {
    /// Expand to one tolerance per state.
    pub fn expand<V: Vector>(&self, nstates: usize) -> Result<V, IvpsolError> {
        match self {
            Self::Scalar(atol) => Ok(V::from_element(nstates, *atol)),
            Self::PerComponent(atol) => {
                check_length(nstates, atol.len())?;
                Ok(V::from_slice(atol))
            }
        }
    }

    fn is_positive(&self) -> bool {
        match self {
            Self::Scalar(atol) => *atol > 0.0,
            Self::PerComponent(atol) => atol.iter().all(|a| *a > 0.0),
        }
    }
}

impl Default for AbsoluteTolerance {
    fn default() -> Self {
        Self::Scalar(1e-6)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodFamily {
    /// Variable order backward differentiation (NDF) formulas, implicit.
    Bdf,
    /// Embedded explicit Runge-Kutta pair.
    ExplicitRk(RkTableau),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonLinearSolverKind {
    Newton,
    FixedPoint { anderson_depth: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverKind {
    Direct,
    Gmres,
    FlexibleGmres,
    BiCgStab,
    Pcg,
    Tfqmr,
}

impl LinearSolverKind {
    pub const ALL: [LinearSolverKind; 6] = [
        Self::Direct,
        Self::Gmres,
        Self::FlexibleGmres,
        Self::BiCgStab,
        Self::Pcg,
        Self::Tfqmr,
    ];

    /// The Krylov method behind this kind, `None` for the direct solver.
    pub fn krylov_method(&self) -> Option<KrylovMethod> {
        match self {
            Self::Direct => None,
            Self::Gmres => Some(KrylovMethod::Gmres),
            Self::FlexibleGmres => Some(KrylovMethod::FlexibleGmres),
            Self::BiCgStab => Some(KrylovMethod::BiCgStab),
            Self::Pcg => Some(KrylovMethod::Pcg),
            Self::Tfqmr => Some(KrylovMethod::Tfqmr),
        }
    }
}

/// Everything a run needs to know up front. Read once when a solver is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfiguration {
    pub rtol: Scalar,
    pub atol: AbsoluteTolerance,
    pub method: MethodFamily,
    /// Initial step, estimated from the problem if not given. Its sign sets the direction of
    /// integration.
    pub h0: Option<Scalar>,
    pub h_min: Option<Scalar>,
    pub h_max: Option<Scalar>,
    pub max_order: Option<usize>,
    pub nonlinear_solver: NonLinearSolverKind,
    pub linear_solver: LinearSolverKind,
    pub krylov: KrylovConfig,
    pub bdf: BdfConfig,
    pub explicit_rk: ExplicitRkConfig,
}

impl Default for SolverConfiguration {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: AbsoluteTolerance::default(),
            method: MethodFamily::Bdf,
            h0: None,
            h_min: None,
            h_max: None,
            max_order: None,
            nonlinear_solver: NonLinearSolverKind::Newton,
            linear_solver: LinearSolverKind::Direct,
            krylov: KrylovConfig::default(),
            bdf: BdfConfig::default(),
            explicit_rk: ExplicitRkConfig::default(),
        }
    }
}

impl SolverConfiguration {
    /// Check the configuration against a problem with `nstates` states, with or without a mass.
    pub fn validate(&self, nstates: usize, has_mass: bool) -> Result<(), IvpsolError> {
        if self.rtol.is_nan() || self.rtol <= 0.0 {
            return Err(ode_solver_error!(
                InvalidConfiguration,
                format!("rtol must be positive, got {}", self.rtol)
            ));
        }
        if !self.atol.is_positive() {
            return Err(ode_solver_error!(
                InvalidConfiguration,
                "atol must be positive"
            ));
        }
        if let AbsoluteTolerance::PerComponent(atol) = &self.atol {
            check_length(nstates, atol.len())?;
        }
        if let Some(h0) = self.h0 {
            if h0 == 0.0 || !h0.is_finite() {
                return Err(ode_solver_error!(
                    InvalidConfiguration,
                    format!("h0 must be finite and non-zero, got {h0}")
                ));
            }
        }
        let h_min = self.h_min.unwrap_or(0.0);
        let h_max = self.h_max.unwrap_or(Scalar::INFINITY);
        if h_min < 0.0 || h_max.is_nan() || h_max <= 0.0 || h_min > h_max {
            return Err(ode_solver_error!(
                InvalidConfiguration,
                format!("step bounds must satisfy 0 <= h_min <= h_max, got [{h_min}, {h_max}]")
            ));
        }
        if let Some(max_order) = self.max_order {
            let limit = match self.method {
                MethodFamily::Bdf => BDF_MAX_ORDER,
                MethodFamily::ExplicitRk(tableau) => tableau.order(),
            };
            if max_order == 0 || max_order > limit {
                return Err(ode_solver_error!(
                    InvalidConfiguration,
                    format!("max_order must be in 1..={limit}, got {max_order}")
                ));
            }
        }
        if has_mass {
            let fixed_point = matches!(self.nonlinear_solver, NonLinearSolverKind::FixedPoint { .. });
            let explicit = matches!(self.method, MethodFamily::ExplicitRk(_));
            if fixed_point || explicit {
                return Err(ode_solver_error!(MassMatrixNotSupported));
            }
        }
        Ok(())
    }

    /// `|h|` clamped to `[h_min, h_max]`, keeping the sign of `h`.
    pub fn clamp_step(&self, h: Scalar) -> Scalar {
        let h_min = self.h_min.unwrap_or(0.0);
        let h_max = self.h_max.unwrap_or(Scalar::INFINITY);
        h.abs().clamp(h_min, h_max).copysign(h)
    }

    /// Order used by the BDF family.
    pub fn bdf_max_order(&self) -> usize {
        self.max_order.unwrap_or(BDF_MAX_ORDER).min(BDF_MAX_ORDER)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_are_valid() {
        let config = SolverConfiguration::default();
        config.validate(3, false).unwrap();
        config.validate(3, true).unwrap();
        assert_eq!(config.bdf_max_order(), 5);
        assert_eq!(config.bdf.maximum_newton_iterations, 5);
        assert_eq!(config.explicit_rk.minimum_timestep_shrink, 0.2);
    }

    #[test]
    fn rejects_bad_configurations() {
        let config = SolverConfiguration {
            rtol: 0.0,
            ..Default::default()
        };
        let err = config.validate(1, false).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Invalid configuration: rtol must be positive, got 0");

        let config = SolverConfiguration {
            h_min: Some(1.0),
            h_max: Some(0.1),
            ..Default::default()
        };
        let err = config.validate(1, false).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Invalid configuration: step bounds must satisfy 0 <= h_min <= h_max, got [1, 0.1]");

        let config = SolverConfiguration {
            max_order: Some(6),
            ..Default::default()
        };
        assert_eq!(config.validate(1, false).unwrap_err().kind(), ErrorKind::InvalidInput);

        let config = SolverConfiguration {
            atol: AbsoluteTolerance::PerComponent(vec![1e-6, 1e-6]),
            ..Default::default()
        };
        assert_eq!(config.validate(3, false).unwrap_err().kind(), ErrorKind::DimensionMismatch);

        let config = SolverConfiguration {
            nonlinear_solver: NonLinearSolverKind::FixedPoint { anderson_depth: 2 },
            ..Default::default()
        };
        config.validate(2, false).unwrap();
        let err = config.validate(2, true).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Mass matrix not supported for this solver");
    }

    #[test]
    fn tolerances_and_step_bounds() {
        let atol = AbsoluteTolerance::Scalar(1e-8).expand::<DVector<f64>>(3).unwrap();
        assert_eq!(atol, DVector::from_element(3, 1e-8));
        let atol = AbsoluteTolerance::PerComponent(vec![1.0, 2.0])
            .expand::<DVector<f64>>(2)
            .unwrap();
        assert_eq!(atol[1], 2.0);

        let config = SolverConfiguration {
            h_min: Some(1e-3),
            h_max: Some(0.5),
            ..Default::default()
        };
        assert_eq!(config.clamp_step(1.0), 0.5);
        assert_eq!(config.clamp_step(-1e-6), -1e-3);
        assert_eq!(config.clamp_step(0.1), 0.1);
    }
}
