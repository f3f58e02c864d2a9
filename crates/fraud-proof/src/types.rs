//! Fraud proof types

use crate::error::FraudProofError;
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use l1_integration::{Address, Amount, ChainId, Hash256, COIN, DEFAULT_L2_CHAIN_ID};
use l2_runtime::{AccountState, L2Transaction, SmtProof, StateCommitment};
use serde::{Deserialize, Serialize};

/// Minimum bond a challenger posts with a fraud proof
pub const FRAUD_PROOF_CHALLENGE_BOND: Amount = 10 * COIN;

/// Lower bound on a sequencer slash when its stake allows it
pub const MIN_SLASHING_AMOUNT: Amount = 50 * COIN;

/// Share of a slashed amount paid to the winning party
pub const CHALLENGER_REWARD_PERCENT: u8 = 50;

/// Bisection moves allowed per interactive session
pub const MAX_INTERACTIVE_STEPS: u32 = 256;

/// Seconds a party has to make its interactive move
pub const INTERACTIVE_STEP_TIMEOUT: u64 = 3600;

/// Transactions a proof may carry
pub const MAX_FRAUD_PROOF_TRANSACTIONS: usize = 100;

/// Encoded state proof size limit
pub const MAX_STATE_PROOF_SIZE: usize = 100 * 1024;

/// What the challenger claims went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum FraudProofType {
    InvalidStateTransition,
    InvalidTransaction,
    InvalidSignature,
    DataWithholding,
    TimestampManipulation,
    DoubleSpend,
}

impl FraudProofType {
    /// Wire id
    pub fn id(self) -> u8 {
        match self {
            FraudProofType::InvalidStateTransition => 0,
            FraudProofType::InvalidTransaction => 1,
            FraudProofType::InvalidSignature => 2,
            FraudProofType::DataWithholding => 3,
            FraudProofType::TimestampManipulation => 4,
            FraudProofType::DoubleSpend => 5,
        }
    }

    /// Share of the sequencer's stake taken when proven
    pub fn slash_percent(self) -> u8 {
        match self {
            FraudProofType::InvalidStateTransition | FraudProofType::DoubleSpend => 100,
            FraudProofType::InvalidTransaction | FraudProofType::DataWithholding => 75,
            FraudProofType::InvalidSignature | FraudProofType::TimestampManipulation => 50,
        }
    }

    /// Reputation points the sequencer loses when proven
    pub fn reputation_penalty(self) -> u8 {
        match self {
            FraudProofType::InvalidStateTransition => 50,
            FraudProofType::InvalidTransaction => 25,
            FraudProofType::InvalidSignature => 20,
            FraudProofType::DataWithholding => 30,
            FraudProofType::TimestampManipulation => 15,
            FraudProofType::DoubleSpend => 40,
        }
    }
}

/// An account inclusion (or absence) claim checked against the replayed root
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct StateClaim {
    pub address: Address,
    pub account: Option<AccountState>,
    /// Tree roots the claimed root is made of
    pub commitment: StateCommitment,
    pub proof: SmtProof,
}

impl StateClaim {
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// A challenger's claim that a committed state root is wrong
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FraudProof {
    pub proof_type: FraudProofType,
    pub disputed_state_root: Hash256,
    pub disputed_block_number: u64,
    pub previous_state_root: Hash256,
    pub chain_id: ChainId,
    /// Transactions to replay; empty means "the block as logged"
    pub transactions: Vec<L2Transaction>,
    /// Encoded `StateClaim`, or empty
    pub state_proof: Vec<u8>,
    pub challenger: Address,
    pub sequencer: Address,
    pub challenge_bond: Amount,
    pub submitted_at: u64,
    /// Ed25519 key the challenger address is derived from
    pub challenger_key: [u8; 32],
    pub signature: Vec<u8>,
}

impl FraudProof {
    /// Unsigned proof against `disputed_state_root`
    pub fn new(
        proof_type: FraudProofType,
        disputed_state_root: Hash256,
        disputed_block_number: u64,
        previous_state_root: Hash256,
        sequencer: Address,
        challenge_bond: Amount,
        submitted_at: u64,
    ) -> Self {
        Self {
            proof_type,
            disputed_state_root,
            disputed_block_number,
            previous_state_root,
            chain_id: DEFAULT_L2_CHAIN_ID,
            transactions: Vec::new(),
            state_proof: Vec::new(),
            challenger: Address::ZERO,
            sequencer,
            challenge_bond,
            submitted_at,
            challenger_key: [0u8; 32],
            signature: Vec::new(),
        }
    }

    /// Proof id
    pub fn hash(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.proof_type.id()]);
        hasher.update(self.disputed_state_root.as_ref());
        hasher.update(&self.disputed_block_number.to_le_bytes());
        hasher.update(self.previous_state_root.as_ref());
        hasher.update(&self.chain_id.to_le_bytes());
        hasher.update(self.challenger.as_ref());
        hasher.update(&self.submitted_at.to_le_bytes());
        hasher.update(self.sequencer.as_ref());
        Hash256(*hasher.finalize().as_bytes())
    }

    /// Digest covered by the challenger signature
    pub fn signing_hash(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.hash().as_ref());
        hasher.update(&self.challenge_bond.to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.hash().as_ref());
        }
        hasher.update(blake3::hash(&self.state_proof).as_bytes());
        hasher.update(&self.challenger_key);
        Hash256(*hasher.finalize().as_bytes())
    }

    /// Set the challenger from `key` and sign
    pub fn sign(&mut self, key: &SigningKey) {
        let verifying = key.verifying_key();
        self.challenger_key = verifying.to_bytes();
        self.challenger = Address::from_pubkey(verifying.as_bytes());
        let digest = self.signing_hash();
        self.signature = key.sign(digest.as_ref()).to_bytes().to_vec();
    }

    /// True if the signature is valid and matches the challenger address
    pub fn verify_signature(&self) -> bool {
        if Address::from_pubkey(&self.challenger_key) != self.challenger {
            return false;
        }
        let key = match VerifyingKey::from_bytes(&self.challenger_key) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let signature = match Signature::from_slice(&self.signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        key.verify(self.signing_hash().as_ref(), &signature).is_ok()
    }

    /// Decoded state claim, if one is attached
    pub fn state_claim(&self) -> Result<Option<StateClaim>, FraudProofError> {
        if self.state_proof.is_empty() {
            return Ok(None);
        }
        StateClaim::from_bytes(&self.state_proof)
            .map(Some)
            .map_err(|e| FraudProofError::Malformed(format!("state proof: {}", e)))
    }

    /// Shape checks that need no state
    pub fn validate_structure(&self, chain_id: ChainId) -> Result<(), FraudProofError> {
        let malformed = |reason: &str| Err(FraudProofError::Malformed(reason.to_string()));
        if self.disputed_state_root.is_zero() {
            return malformed("zero disputed state root");
        }
        if self.previous_state_root.is_zero() {
            return malformed("zero previous state root");
        }
        if self.challenger.is_zero() {
            return malformed("zero challenger address");
        }
        if self.sequencer.is_zero() {
            return malformed("zero sequencer address");
        }
        if self.chain_id != chain_id {
            return Err(FraudProofError::Malformed(format!(
                "proof for chain {}, expected {}",
                self.chain_id, chain_id
            )));
        }
        if self.transactions.len() > MAX_FRAUD_PROOF_TRANSACTIONS {
            return Err(FraudProofError::Malformed(format!(
                "{} transactions, at most {}",
                self.transactions.len(),
                MAX_FRAUD_PROOF_TRANSACTIONS
            )));
        }
        if self.state_proof.len() > MAX_STATE_PROOF_SIZE {
            return Err(FraudProofError::Malformed(format!(
                "state proof of {} bytes, at most {}",
                self.state_proof.len(),
                MAX_STATE_PROOF_SIZE
            )));
        }
        self.state_claim()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Adjudication status of a fraud proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudProofResult {
    Pending,
    /// Claimed by a settlement that has not finished yet
    Settling,
    /// Fraud proven
    Valid,
    /// The disputed root replays correctly
    Invalid,
    /// Withdrawn after its challenge timed out
    Expired,
}

impl FraudProofResult {
    /// Still holding its disputed root open
    pub fn is_open(&self) -> bool {
        matches!(self, FraudProofResult::Pending | FraudProofResult::Settling)
    }
}

/// Outcome of replaying a proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub result: FraudProofResult,
    /// Root the sequencer committed to
    pub claimed_root: Hash256,
    /// Root the replay produced; `None` if a transaction failed
    pub replayed_root: Option<Hash256>,
    /// Index of the first failing transaction
    pub failed_transaction: Option<usize>,
    pub reason: String,
}

/// A sequencer slash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingRecord {
    pub sequencer: Address,
    pub slashed_amount: Amount,
    pub fraud_proof_hash: Hash256,
    pub proof_type: FraudProofType,
    pub challenger: Address,
    pub challenger_reward: Amount,
    pub slashed_at: u64,
    pub block_number: u64,
    pub reputation_penalty: u8,
}

/// Economic outcome of a resolved fraud proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudProofResolution {
    /// The sequencer was slashed and state rolled back
    Proven {
        record: SlashingRecord,
        bond_returned: Amount,
        /// Root live state was rolled back to, if it was still retained
        reverted_to: Option<Hash256>,
        /// Mints undone by the rollback and applied again
        remints: usize,
    },
    /// The challenger's bond was slashed
    NotProven {
        challenger: Address,
        bond_slashed: Amount,
        sequencer_reward: Amount,
        burned: Amount,
    },
}

impl FraudProofResolution {
    pub fn is_proven(&self) -> bool {
        matches!(self, FraudProofResolution::Proven { .. })
    }
}

/// Fraud proof system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudProofConfig {
    pub chain_id: ChainId,
    pub min_bond: Amount,
    pub min_slashing_amount: Amount,
    pub challenger_reward_percent: u8,
    pub max_interactive_steps: u32,
    pub step_timeout_secs: u64,
}

impl Default for FraudProofConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_L2_CHAIN_ID,
            min_bond: FRAUD_PROOF_CHALLENGE_BOND,
            min_slashing_amount: MIN_SLASHING_AMOUNT,
            challenger_reward_percent: CHALLENGER_REWARD_PERCENT,
            max_interactive_steps: MAX_INTERACTIVE_STEPS,
            step_timeout_secs: INTERACTIVE_STEP_TIMEOUT,
        }
    }
}
