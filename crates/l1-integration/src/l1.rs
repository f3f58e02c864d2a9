//! The view of the L1 chain the bridge works with
//!
//! Headers and transactions are delivered by an external chain observer that
//! already performed full L1 validation. Only the fields the burn pipeline
//! and reorg tracking need are kept.

use crate::{Amount, Hash256};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// L1 block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct L1BlockHeader {
    pub number: u64,
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub timestamp: u64,
}

impl L1BlockHeader {
    /// True if `self` directly extends `parent`
    pub fn extends(&self, parent: &L1BlockHeader) -> bool {
        parent.number.checked_add(1) == Some(self.number) && self.prev_hash == parent.hash
    }
}

/// A single transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct L1TxOutput {
    pub value: Amount,
    pub script: Vec<u8>,
}

/// L1 transaction, reduced to its id and outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct L1Transaction {
    pub txid: Hash256,
    pub outputs: Vec<L1TxOutput>,
}

/// Event pushed by the L1 chain observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum L1Event {
    /// New block on what the observer considers the best chain
    Block {
        header: L1BlockHeader,
        transactions: Vec<L1Transaction>,
    },
    /// The observer switched chains; blocks above the ancestor are orphaned
    Reorg { common_ancestor: u64 },
}
