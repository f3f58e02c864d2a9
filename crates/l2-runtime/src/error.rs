//! State manager errors

use l1_integration::{Address, Amount, Classify, ErrorKind, Hash256};
use thiserror::Error;

/// Errors returned by state transitions and state queries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("insufficient balance for {address}: need {needed}, have {available}")]
    InsufficientBalance {
        address: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("gas exceeded: limit {limit}, used {used}")]
    GasExceeded { limit: u64, used: u64 },

    #[error("malformed transaction: {0}")]
    Malformed(String),

    #[error("batch of {size} transactions exceeds limit {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("transaction {index} of batch failed: {source}")]
    BatchFailed {
        index: usize,
        source: Box<StateError>,
    },

    #[error("unknown snapshot {0}")]
    UnknownSnapshot(u64),

    #[error("unknown state root {0}")]
    UnknownStateRoot(Hash256),

    #[error("account {0} is not archived")]
    NotArchived(Address),

    #[error("state inconsistency: {0}")]
    Consistency(String),
}

impl Classify for StateError {
    fn kind(&self) -> ErrorKind {
        match self {
            StateError::Malformed(_) => ErrorKind::Malformed,
            StateError::BatchFailed { source, .. } => source.kind(),
            StateError::Consistency(_) => ErrorKind::Consistency,
            _ => ErrorKind::Policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(StateError::NonceMismatch { expected: 1, got: 2 }.kind(), ErrorKind::Policy);
        assert_eq!(StateError::Malformed("x".into()).kind(), ErrorKind::Malformed);
        assert!(StateError::Consistency("x".into()).is_fatal());

        let nested = StateError::BatchFailed {
            index: 3,
            source: Box::new(StateError::Consistency("overflow".into())),
        };
        assert!(nested.is_fatal());
    }
}
