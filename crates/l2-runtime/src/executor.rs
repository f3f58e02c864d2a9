//! Contract execution seam
//!
//! Contract bytecode is interpreted by an external VM. The state manager hands
//! it a read-only view of the pre-state and commits the delta it returns.

use crate::account::AccountState;
use l1_integration::{Address, Amount, Hash256};
use thiserror::Error;

/// Read-only view of account state handed to the executor
pub trait StateView {
    fn account(&self, address: &Address) -> AccountState;

    fn storage(&self, address: &Address, slot: &Hash256) -> Option<Vec<u8>>;
}

/// A contract invocation
#[derive(Debug, Clone)]
pub struct ContractCall<'a> {
    pub caller: Address,
    pub contract: Address,
    /// Value already moved from caller to contract before execution
    pub value: Amount,
    pub input: &'a [u8],
    pub code: &'a [u8],
    /// Gas left after the base charge
    pub gas_limit: u64,
    pub block_number: u64,
}

/// Signed balance adjustment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub address: Address,
    pub delta: i128,
}

/// Write to the called contract's storage; `None` clears the slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWrite {
    pub slot: Hash256,
    pub value: Option<Vec<u8>>,
}

/// Effects of a contract call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    /// Must sum to zero
    pub balance_changes: Vec<BalanceChange>,
    pub storage_writes: Vec<StorageWrite>,
    pub gas_used: u64,
    pub logs: Vec<Vec<u8>>,
}

/// Executor failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("contract reverted: {0}")]
    Reverted(String),

    #[error("out of gas")]
    OutOfGas,

    #[error("contract execution unsupported: {0}")]
    Unsupported(String),
}

/// The VM interface
pub trait ContractExecutor: Send + Sync {
    fn execute(&self, call: &ContractCall<'_>, view: &dyn StateView) -> Result<StateDelta, ExecutionError>;
}

/// Executor for nodes running without a VM: every call is rejected
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl ContractExecutor for NoopExecutor {
    fn execute(&self, call: &ContractCall<'_>, _view: &dyn StateView) -> Result<StateDelta, ExecutionError> {
        Err(ExecutionError::Unsupported(format!(
            "no executor configured for contract {}",
            call.contract
        )))
    }
}
