//! Intermediate-state checkpoints used by interactive fraud proofs

use l1_integration::Hash256;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Checkpoint sequence of one execution
///
/// `checkpoints[0]` is the pre-state root and `checkpoints[i]` the root after
/// `i * step_size` transactions (the last step may be shorter). A failed
/// transaction poisons its checkpoint and every later one with
/// `Hash256::ZERO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub step_size: usize,
    pub tx_count: usize,
    pub checkpoints: Vec<Hash256>,
}

impl ExecutionTrace {
    /// Number of steps (checkpoints minus the pre-state)
    pub fn steps(&self) -> usize {
        self.checkpoints.len().saturating_sub(1)
    }

    pub fn checkpoint(&self, index: usize) -> Option<Hash256> {
        self.checkpoints.get(index).copied()
    }

    pub fn final_root(&self) -> Hash256 {
        self.checkpoints.last().copied().unwrap_or(Hash256::ZERO)
    }

    /// Transactions executed between checkpoint `step - 1` and `step`
    pub fn step_range(&self, step: usize) -> Option<Range<usize>> {
        if step == 0 || step > self.steps() {
            return None;
        }
        let start = (step - 1) * self.step_size;
        let end = (start + self.step_size).min(self.tx_count);
        Some(start..end)
    }

    /// Index of the first checkpoint that failed, if any
    pub fn first_failure(&self) -> Option<usize> {
        self.checkpoints.iter().position(|c| c.is_zero())
    }
}

/// Number of steps needed for `tx_count` transactions
pub fn step_count(tx_count: usize, step_size: usize) -> usize {
    let step_size = step_size.max(1);
    (tx_count + step_size - 1) / step_size
}
