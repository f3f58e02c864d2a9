//! L2 transaction format

use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::{Address, Amount, Hash256};
use serde::{Deserialize, Serialize};

/// Gas charged for every user transaction
pub const BASE_GAS: u64 = 21_000;

/// Gas charged per byte of deployed code
pub const CODE_BYTE_GAS: u64 = 200;

/// What a transaction does
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Move balance between two accounts
    Transfer { to: Address, amount: Amount },
    /// Create a contract account at an address derived from sender and nonce
    Deploy { code: Vec<u8>, value: Amount },
    /// Call a contract; the external executor produces the state delta
    ContractCall {
        contract: Address,
        value: Amount,
        input: Vec<u8>,
    },
    /// Set an account's reputation score (reputation authority only)
    SetReputation { subject: Address, score: u8 },

    // System kinds, applied by the minter, the challenge handler and replay
    /// Credit a recipient for a burn that reached mint consensus
    Mint {
        l1_tx_hash: Hash256,
        recipient: Address,
        amount: Amount,
    },
    /// Move a withdrawal's funds into escrow
    Withdraw {
        withdrawal_id: Hash256,
        owner: Address,
        amount: Amount,
    },
    /// Release escrowed funds of a completed withdrawal
    ReleaseWithdrawal { withdrawal_id: Hash256, amount: Amount },
    /// Return escrowed funds of a cancelled withdrawal
    RefundWithdrawal {
        withdrawal_id: Hash256,
        owner: Address,
        amount: Amount,
    },
    /// Move an inactive account out of the active tree
    ArchiveAccount { address: Address },
    /// Bring an archived account back into the active tree
    RestoreAccount { address: Address },
}

impl TransactionKind {
    /// System kinds bypass nonce and gas accounting and are never accepted
    /// from users
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            TransactionKind::Mint { .. }
                | TransactionKind::Withdraw { .. }
                | TransactionKind::ReleaseWithdrawal { .. }
                | TransactionKind::RefundWithdrawal { .. }
                | TransactionKind::ArchiveAccount { .. }
                | TransactionKind::RestoreAccount { .. }
        )
    }
}

/// An L2 transaction
///
/// Authentication of `sender` happens before a transaction reaches the
/// state manager.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct L2Transaction {
    pub sender: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub kind: TransactionKind,
}

impl L2Transaction {
    /// Plain value transfer with exactly the base gas
    pub fn transfer(sender: Address, nonce: u64, to: Address, amount: Amount) -> Self {
        Self {
            sender,
            nonce,
            gas_limit: BASE_GAS,
            kind: TransactionKind::Transfer { to, amount },
        }
    }

    /// Transaction issued by the protocol itself
    pub fn system(kind: TransactionKind) -> Self {
        Self {
            sender: Address::ZERO,
            nonce: 0,
            gas_limit: 0,
            kind,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind.is_system()
    }

    /// Transaction hash
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Commitment to an ordered list of transactions
pub fn transactions_root(txs: &[L2Transaction]) -> Hash256 {
    let hashes: Vec<Hash256> = txs.iter().map(|tx| tx.hash()).collect();
    let parts: Vec<&[u8]> = hashes.iter().map(|h| h.as_ref()).collect();
    Hash256::digest_parts(&parts)
}

/// Address of a contract deployed by `sender` at `nonce`
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let digest = Hash256::digest_parts(&[b"contract", sender.as_ref(), &nonce.to_le_bytes()]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.0[..20]);
    Address(out)
}
