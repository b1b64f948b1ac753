use crate::Scalar;

/// Why the Jacobian policy is being consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    StepSuccess,
    FirstConvergenceFail,
    SecondConvergenceFail,
    ErrorTestFail,
}

/// When to refactorize the iteration matrix `M - c J` and when to re-evaluate `J` itself.
///
/// The factorization is refreshed once `c` has drifted by more than 30% from the value it was
/// built with, or after 20 steps; `J` is re-evaluated every 50 steps and after any nonlinear
/// solver failure.
pub struct JacobianUpdate {
    steps_since_jacobian_eval: usize,
    steps_since_rhs_jacobian_eval: usize,
    c_at_last_jacobian_update: Scalar,
    threshold_to_update_jacobian: Scalar,
    update_jacobian_after_steps: usize,
    update_rhs_jacobian_after_steps: usize,
}

impl JacobianUpdate {
    pub fn new() -> Self {
        Self {
            steps_since_jacobian_eval: 0,
            steps_since_rhs_jacobian_eval: 0,
            c_at_last_jacobian_update: 1.0,
            threshold_to_update_jacobian: 0.3,
            update_jacobian_after_steps: 20,
            update_rhs_jacobian_after_steps: 50,
        }
    }

    pub fn update_jacobian(&mut self, c: Scalar) {
        self.steps_since_jacobian_eval = 0;
        self.c_at_last_jacobian_update = c;
    }

    pub fn update_rhs_jacobian(&mut self) {
        self.steps_since_rhs_jacobian_eval = 0;
    }

    pub fn step(&mut self) {
        self.steps_since_jacobian_eval += 1;
        self.steps_since_rhs_jacobian_eval += 1;
    }

    fn c_has_drifted(&self, c: Scalar) -> bool {
        (c / self.c_at_last_jacobian_update - 1.0).abs() > self.threshold_to_update_jacobian
    }

    pub fn check_jacobian_update(&self, c: Scalar, state: SolverState) -> bool {
        match state {
            SolverState::StepSuccess => {
                self.steps_since_jacobian_eval >= self.update_jacobian_after_steps
                    || self.c_has_drifted(c)
            }
            SolverState::ErrorTestFail => self.c_has_drifted(c),
            SolverState::FirstConvergenceFail | SolverState::SecondConvergenceFail => true,
        }
    }

    pub fn check_rhs_jacobian_update(&self, state: SolverState) -> bool {
        match state {
            SolverState::StepSuccess => {
                self.steps_since_rhs_jacobian_eval >= self.update_rhs_jacobian_after_steps
            }
            SolverState::ErrorTestFail => false,
            SolverState::FirstConvergenceFail | SolverState::SecondConvergenceFail => true,
        }
    }
}

impl Default for JacobianUpdate {
    fn default() -> Self {
        Self::new()
    }
}
