//! Fraud proof and challenge errors

use crate::withdrawal::WithdrawalStatus;
use l1_bridge::RegistryError;
use l1_integration::{Address, Amount, Classify, ErrorKind, Hash256};
use l2_consensus::ConsensusError;
use l2_runtime::StateError;
use thiserror::Error;

/// Rejected or failed fraud proof operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FraudProofError {
    #[error("malformed fraud proof: {0}")]
    Malformed(String),

    #[error("invalid challenger signature on proof {0}")]
    InvalidSignature(Hash256),

    #[error("bond {have} below minimum {need}")]
    InsufficientBond { have: Amount, need: Amount },

    #[error("state root {0} was never committed")]
    UnknownStateRoot(Hash256),

    #[error("challenge period for state root {0} has ended")]
    ChallengePeriodEnded(Hash256),

    #[error("fraud proof {0} already submitted")]
    Duplicate(Hash256),

    #[error("fraud proof {0} not found")]
    UnknownProof(Hash256),

    #[error("fraud proof {0} already resolved")]
    AlreadyResolved(Hash256),

    #[error("interactive session {0} not found")]
    UnknownSession(u64),

    #[error("interactive session {session}: {reason}")]
    SessionState { session: u64, reason: String },

    #[error("L2 block {0} is not in the block log")]
    BlockNotRetained(u64),

    #[error("proof transactions differ from those committed for L2 block {0}")]
    TransactionsMismatch(u64),

    #[error("sequencer {0} is not registered")]
    UnknownSequencer(Address),

    #[error("state proof does not verify against the replayed root {0}")]
    StateProofMismatch(Hash256),

    #[error("state replay failed: {0}")]
    State(#[from] StateError),

    #[error("sequencer set update failed: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("burn registry update failed: {0}")]
    Registry(#[from] RegistryError),
}

impl Classify for FraudProofError {
    fn kind(&self) -> ErrorKind {
        match self {
            FraudProofError::Malformed(_) | FraudProofError::InvalidSignature(_) => ErrorKind::Malformed,
            FraudProofError::StateProofMismatch(_) => ErrorKind::Consistency,
            FraudProofError::State(e) => e.kind(),
            FraudProofError::Consensus(e) => e.kind(),
            FraudProofError::Registry(e) => e.kind(),
            _ => ErrorKind::Policy,
        }
    }
}

/// Rejected withdrawal or challenge operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("withdrawal {0} not found")]
    UnknownWithdrawal(Hash256),

    #[error("challenge {0} not found")]
    UnknownChallenge(Hash256),

    #[error("withdrawal {id} is {status:?}")]
    InvalidStatus { id: Hash256, status: WithdrawalStatus },

    #[error("challenge deadline for withdrawal {0} has passed")]
    DeadlinePassed(Hash256),

    #[error("withdrawal {id} was made at root {expected}, proof disputes {got}")]
    RootMismatch { id: Hash256, expected: Hash256, got: Hash256 },

    #[error("withdrawal {id} is still in its challenge period until {deadline}")]
    ChallengePeriodActive { id: Hash256, deadline: u64 },

    #[error("challenger {address} is banned until {until}")]
    Banned { address: Address, until: u64 },

    #[error("challenger {0} has too many active challenges")]
    TooManyChallenges(Address),

    #[error("bond {have} below minimum {need}")]
    InsufficientBond { have: Amount, need: Amount },

    #[error("{0} does not own this withdrawal")]
    NotOwner(Address),

    #[error("malformed withdrawal: {0}")]
    Malformed(String),

    #[error("challenge {0} already resolved")]
    AlreadyResolved(Hash256),

    #[error("fraud proof rejected: {0}")]
    FraudProof(#[from] FraudProofError),

    #[error("withdrawal transaction failed: {0}")]
    State(#[from] StateError),
}

impl Classify for ChallengeError {
    fn kind(&self) -> ErrorKind {
        match self {
            ChallengeError::Malformed(_) => ErrorKind::Malformed,
            ChallengeError::FraudProof(e) => e.kind(),
            ChallengeError::State(e) => e.kind(),
            _ => ErrorKind::Policy,
        }
    }
}
