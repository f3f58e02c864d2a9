//! L2 Runtime - account state engine
//!
//! This crate provides the state side of the rollup:
//! - Sparse Merkle Tree with compressed proofs
//! - Account State Manager with snapshots, block log and replay
//! - Contract executor seam for an external VM
//! - Sled persistence of the world state

pub mod account;
pub mod error;
pub mod executor;
pub mod persistence;
pub mod smt;
pub mod state_manager;
pub mod trace;
pub mod transaction;
pub mod world;

pub use account::{AccountState, ArchivedAccount, MAX_REPUTATION};
pub use error::StateError;
pub use executor::{
    BalanceChange, ContractCall, ContractExecutor, ExecutionError, NoopExecutor, StateDelta, StateView, StorageWrite,
};
pub use persistence::{ChainMetadata, PersistentStore, StateManagerPersistence};
pub use smt::{SmtProof, SparseMerkleTree};
pub use state_manager::{
    AccountProof, BlockRecord, Rebuild, RewindTarget, SnapshotHandle, StateManager, StateManagerConfig, MAX_BATCH_SIZE,
    MAX_STATE_SNAPSHOTS,
};
pub use trace::ExecutionTrace;
pub use transaction::{contract_address, transactions_root, L2Transaction, TransactionKind, BASE_GAS, CODE_BYTE_GAS};
pub use world::{ExecContext, ExecOutcome, StateCommitment, WorldState};
