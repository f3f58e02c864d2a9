//! Bridge errors

use l1_integration::{Amount, ChainId, Classify, ErrorKind, Hash256};
use l2_runtime::StateError;
use thiserror::Error;

/// Burn script or payload that does not match the burn layout
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("script does not start with OP_RETURN")]
    NotOpReturn,

    #[error("unexpected push opcode {0:#04x}")]
    BadPush(u8),

    #[error("burn payload must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("{0} trailing bytes after burn payload")]
    TrailingBytes(usize),

    #[error("missing L2BURN tag")]
    BadMagic,

    #[error("chain id must be non-zero")]
    ZeroChainId,

    #[error("recipient key has invalid prefix {0:#04x}")]
    BadPubkeyPrefix(u8),

    #[error("burn amount must be non-zero")]
    ZeroAmount,

    #[error("transaction carries {0} burn outputs")]
    MultipleBurnOutputs(usize),
}

impl Classify for ParseError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Malformed
    }
}

/// Burn rejected by the validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BurnValidationError {
    #[error("burn has {have} confirmations, {need} required")]
    InsufficientConfirmations { have: u32, need: u32 },

    #[error("burn targets chain {got}, expected {expected}")]
    ChainIdMismatch { expected: ChainId, got: ChainId },

    #[error("burn amount {amount} outside [{min}, {max}]")]
    AmountOutOfRange { amount: Amount, min: Amount, max: Amount },

    #[error("burn {0} already processed")]
    AlreadyProcessed(Hash256),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Classify for BurnValidationError {
    fn kind(&self) -> ErrorKind {
        match self {
            BurnValidationError::AlreadyProcessed(_) => ErrorKind::Consistency,
            BurnValidationError::Parse(_) => ErrorKind::Malformed,
            _ => ErrorKind::Policy,
        }
    }
}

/// Registry rejection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid burn record {hash}: {reason}")]
    InvalidRecord { hash: Hash256, reason: String },
}

impl Classify for RegistryError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Malformed
    }
}

/// Reorg handling failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReorgError {
    #[error("reorg monitor halted after an unrecoverable reorg")]
    Halted,

    #[error("reorg depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u64, max: u64 },

    #[error("cannot locate fork point for L1 block {number}")]
    AncestorUnknown { number: u64 },

    #[error("L1 block {got} does not follow tip {tip}")]
    Gap { tip: u64, got: u64 },

    #[error("no anchor at or below L1 block {0}")]
    NoAnchor(u64),

    #[error("state rollback failed: {0}")]
    State(#[from] StateError),

    #[error("registry rollback failed: {0}")]
    Registry(#[from] RegistryError),
}

impl Classify for ReorgError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReorgError::AncestorUnknown { .. } | ReorgError::Gap { .. } => ErrorKind::Policy,
            // anything failing mid-rollback leaves services out of step
            _ => ErrorKind::Consistency,
        }
    }
}
