//! Account records stored in the global state tree

use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::{Amount, Hash256};
use serde::{Deserialize, Serialize};

/// Highest reputation score an account can carry
pub const MAX_REPUTATION: u8 = 100;

/// State of a single L2 account
///
/// The borsh encoding of this struct is the leaf value in the state tree, so
/// field order is part of the state root and must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Amount,
    pub nonce: u64,
    /// Zero for externally owned accounts
    pub code_hash: Hash256,
    /// Root of the account's storage tree, zero when it has no storage
    pub storage_root: Hash256,
    /// 0-100
    pub reputation: u8,
    pub last_activity_block: u64,
}

impl AccountState {
    /// Account holding only a balance
    pub fn with_balance(balance: Amount) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    /// True if this account carries no state and should not occupy a leaf
    pub fn is_empty(&self) -> bool {
        self.balance == 0
            && self.nonce == 0
            && self.code_hash.is_zero()
            && self.storage_root.is_zero()
    }

    pub fn is_contract(&self) -> bool {
        !self.code_hash.is_zero()
    }

    /// Leaf encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// An account moved out of the active tree after a period of inactivity
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ArchivedAccount {
    pub state: AccountState,
    pub archived_at_block: u64,
    /// Account tree root at the moment the account was archived
    pub archive_root: Hash256,
    /// Inclusion proof of `state` under `archive_root`
    pub proof: crate::smt::SmtProof,
}

impl ArchivedAccount {
    /// Leaf value in the archive tree
    pub fn leaf(&self) -> Vec<u8> {
        let mut leaf = self.state.to_bytes();
        leaf.extend_from_slice(&self.archived_at_block.to_le_bytes());
        leaf.extend_from_slice(self.archive_root.as_ref());
        leaf
    }
}
