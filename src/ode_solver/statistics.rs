use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::Scalar;

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdeSolverStatistics {
    pub number_of_steps: usize,
    pub number_of_error_test_failures: usize,
    pub number_of_nonlinear_solver_iterations: usize,
    pub number_of_nonlinear_solver_fails: usize,
    pub number_of_jacobian_evals: usize,
    pub number_of_linear_solver_setups: usize,
    pub number_of_linear_iterations: usize,
}

/// What happened on one accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Time at the end of the step.
    pub t: Scalar,
    /// The step size that was accepted.
    pub h: Scalar,
    pub order: usize,
    /// Normalised error estimate of the step, at most one.
    pub error_norm: Scalar,
    /// Attempts rejected (error test or nonlinear failure) before this one was accepted.
    pub rejections: usize,
    /// Step size scheduled for the next step.
    pub h_next: Scalar,
}

/// The most recent [StepRecord]s, oldest first, in a window of fixed capacity.
#[derive(Debug, Clone)]
pub struct StepHistory {
    records: VecDeque<StepRecord>,
    capacity: usize,
}

impl StepHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
