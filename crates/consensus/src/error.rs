//! Consensus and minting errors

use crate::types::MintStatus;
use l1_bridge::RegistryError;
use l1_integration::{Address, Classify, ErrorKind, Hash256};
use l2_runtime::StateError;
use thiserror::Error;

/// Rejected consensus input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("malformed confirmation: {0}")]
    Malformed(String),

    #[error("invalid signature from sequencer {0}")]
    InvalidSignature(Address),

    #[error("unknown sequencer {0}")]
    UnknownSequencer(Address),

    #[error("sequencer {0} is jailed")]
    Jailed(Address),

    #[error("sequencer {0} already registered")]
    DuplicateSequencer(Address),

    #[error("sequencer {0} has no stake under the stake-weighted policy")]
    ZeroStake(Address),

    #[error("burn {0} is not tracked")]
    UnknownBurn(Hash256),

    #[error("burn {hash} cannot move from {from} to {to}")]
    InvalidTransition { hash: Hash256, from: MintStatus, to: MintStatus },

    #[error("tracking {0} burns, no room for more")]
    AtCapacity(usize),
}

impl Classify for ConsensusError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::Malformed(_) | ConsensusError::InvalidSignature(_) => ErrorKind::Malformed,
            _ => ErrorKind::Policy,
        }
    }
}

/// Mint failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MintError {
    #[error("burn {0} has no quorum")]
    QuorumNotReached(Hash256),

    #[error("burn {0} already minted")]
    DoubleMint(Hash256),

    #[error("decision for burn {0} differs from the agreed one")]
    DecisionMismatch(Hash256),

    #[error("supply invariant violated: balances {supply}, burned {burned}")]
    SupplyInvariantViolated { supply: u128, burned: u128 },

    #[error("mint transaction failed: {0}")]
    State(#[from] StateError),

    #[error("burn record rejected: {0}")]
    Registry(#[from] RegistryError),
}

impl Classify for MintError {
    fn kind(&self) -> ErrorKind {
        match self {
            MintError::QuorumNotReached(_) => ErrorKind::Policy,
            MintError::DoubleMint(_) | MintError::DecisionMismatch(_) | MintError::SupplyInvariantViolated { .. } => {
                ErrorKind::Consistency
            }
            MintError::State(e) => e.kind(),
            MintError::Registry(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ConsensusError::InvalidSignature(Address::ZERO).kind(), ErrorKind::Malformed);
        assert_eq!(ConsensusError::Jailed(Address::ZERO).kind(), ErrorKind::Policy);
        assert!(MintError::DoubleMint(Hash256::ZERO).is_fatal());
        assert!(MintError::SupplyInvariantViolated { supply: 1, burned: 2 }.is_fatal());
        assert!(!MintError::QuorumNotReached(Hash256::ZERO).is_fatal());
        assert!(!MintError::State(StateError::Malformed("x".into())).is_fatal());
    }
}
