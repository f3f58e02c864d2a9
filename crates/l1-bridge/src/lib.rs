//! L1 Bridge - burn intake and L1 chain tracking
//!
//! Connects the rollup to the L1 chain:
//! - Parsing OP_RETURN burn outputs
//! - Validating burns against confirmations, chain id and amount bounds
//! - The registry of processed burns (double-mint guard)
//! - Following the L1 chain, anchoring L2 state and rolling back on reorgs

pub mod burn_parser;
pub mod burn_registry;
pub mod burn_validator;
pub mod error;
pub mod gate;
pub mod l1_source;
pub mod persistence;
pub mod reorg_monitor;

pub use burn_parser::{
    build_burn_script, find_burn_output, parse_burn_payload, parse_burn_script, BurnIntent, BURN_MAGIC,
    BURN_PAYLOAD_LEN, PUBKEY_LEN,
};
pub use burn_registry::{BurnRecord, BurnRegistry, RecordOutcome};
pub use burn_validator::{
    confirmations, BurnObservation, BurnValidator, BurnValidatorConfig, DetectedBurn, ValidatedBurn,
    MIN_BURN_AMOUNT, REQUIRED_CONFIRMATIONS,
};
pub use error::{BurnValidationError, ParseError, RegistryError, ReorgError};
pub use gate::WriteGate;
pub use l1_source::{InboundEvent, L1ChainSource, MemorySource};
pub use persistence::{BurnRegistryPersistence, BURNS_TREE};
pub use reorg_monitor::{
    AnchorPoint, BlockOutcome, ReorgMonitor, ReorgMonitorConfig, ReorgReport, ReorgStats, DEFAULT_L1_FINALITY_DEPTH,
    MAX_REORG_DEPTH, MIN_ANCHOR_INTERVAL,
};
