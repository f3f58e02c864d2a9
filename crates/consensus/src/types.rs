//! Core types for mint consensus

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use l1_bridge::ValidatedBurn;
use l1_integration::{Address, Amount, Hash256};
use serde::{Deserialize, Serialize};

/// Confirmation window for a burn in `Confirming`
pub const MINT_CONSENSUS_TIMEOUT_SECS: u64 = 600;

/// Fewest eligible sequencers that can form a quorum
pub const MIN_SEQUENCERS_FOR_CONSENSUS: usize = 3;

/// Mint states kept at most
pub const MAX_CONSENSUS_STATES: usize = 10_000;

/// Domain tag mixed into every confirmation digest
const CONFIRMATION_DOMAIN: &[u8] = b"L2MINT/confirmation/v1";

/// A sequencer's signed vote that a burn should be minted
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MintConfirmation {
    /// L1 burn transaction
    pub l1_tx_hash: Hash256,
    /// Recipient the sequencer would credit
    pub l2_recipient: Address,
    /// Amount the sequencer would credit
    pub amount: Amount,
    /// Signing sequencer
    pub sequencer: Address,
    /// L2 block height the sequencer was at
    pub block_height: u64,
    /// Unix seconds
    pub timestamp: u64,
    /// Ed25519 signature over `signing_hash()`
    pub signature: Vec<u8>,
}

impl MintConfirmation {
    /// Build and sign a confirmation for `burn`
    pub fn signed(burn: &ValidatedBurn, key: &SigningKey, block_height: u64, timestamp: u64) -> Self {
        let mut confirmation = Self {
            l1_tx_hash: burn.l1_tx_hash,
            l2_recipient: burn.recipient,
            amount: burn.amount,
            sequencer: sequencer_address(&key.verifying_key()),
            block_height,
            timestamp,
            signature: Vec::new(),
        };
        confirmation.sign(key);
        confirmation
    }

    /// Digest covered by the signature
    pub fn signing_hash(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(CONFIRMATION_DOMAIN);
        hasher.update(self.l1_tx_hash.as_ref());
        hasher.update(self.l2_recipient.as_ref());
        hasher.update(&self.amount.to_le_bytes());
        hasher.update(self.sequencer.as_ref());
        hasher.update(&self.block_height.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        Hash256(*hasher.finalize().as_bytes())
    }

    /// Sign in place
    pub fn sign(&mut self, key: &SigningKey) {
        let digest = self.signing_hash();
        self.signature = key.sign(digest.as_ref()).to_bytes().to_vec();
    }

    /// Check the signature against `key`
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let signature = match Signature::from_slice(&self.signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        key.verify(self.signing_hash().as_ref(), &signature).is_ok()
    }

    /// Non-zero hash, recipient, sequencer and amount, and a timestamp
    pub fn is_well_formed(&self) -> bool {
        !self.l1_tx_hash.is_zero()
            && !self.l2_recipient.is_zero()
            && !self.sequencer.is_zero()
            && self.amount > 0
            && self.timestamp > 0
    }

    /// True if both confirmations vote for the same credit
    pub fn agrees_with(&self, recipient: &Address, amount: Amount) -> bool {
        self.l2_recipient == *recipient && self.amount == amount
    }

    /// Serialize for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    /// Deserialize from the wire
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// L2 address of a sequencer key
pub fn sequencer_address(key: &VerifyingKey) -> Address {
    Address::from_pubkey(key.as_bytes())
}

/// Where a burn is in the mint pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MintStatus {
    /// Seen on L1, or only known from peer confirmations
    Detected,
    /// Passed local validation
    Validated,
    /// Collecting confirmations
    Confirming,
    /// Credited on L2
    Minted,
    /// Dropped: reorg, timeout or invalidation
    Rejected,
}

impl MintStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MintStatus::Minted | MintStatus::Rejected)
    }
}

impl std::fmt::Display for MintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MintStatus::Detected => "DETECTED",
            MintStatus::Validated => "VALIDATED",
            MintStatus::Confirming => "CONFIRMING",
            MintStatus::Minted => "MINTED",
            MintStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Two conflicting confirmations signed by one sequencer for one burn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisbehaviorEvidence {
    pub sequencer: Address,
    pub l1_tx_hash: Hash256,
    pub first: MintConfirmation,
    pub second: MintConfirmation,
}

/// Quorum outcome handed to the minter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintDecision {
    pub burn: ValidatedBurn,
    /// Confirmations agreeing with the burn, ordered by sequencer
    pub confirmations: Vec<MintConfirmation>,
    pub agreeing_weight: u128,
    pub total_weight: u128,
    pub reached_at: u64,
}

impl MintDecision {
    pub fn l1_tx_hash(&self) -> Hash256 {
        self.burn.l1_tx_hash
    }

    pub fn signers(&self) -> Vec<Address> {
        self.confirmations.iter().map(|c| c.sequencer).collect()
    }
}

/// Result of submitting a confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Stored and counted; quorum not reached yet
    Accepted { weight: u128, total: u128 },
    /// Stored until the local node starts confirming the burn
    Buffered,
    /// Already stored
    Duplicate,
    /// This confirmation completed the quorum
    QuorumReached(MintDecision),
    /// The sequencer signed a different payload for the same burn
    Conflicting(MisbehaviorEvidence),
    /// The burn is already minted or rejected
    Ignored(MintStatus),
}

/// Mint consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Seconds a burn may stay in `Confirming`
    pub confirmation_window_secs: u64,
    /// Fewest eligible sequencers for a quorum
    pub min_sequencers: usize,
    /// Mint states kept at most
    pub max_states: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            confirmation_window_secs: MINT_CONSENSUS_TIMEOUT_SECS,
            min_sequencers: MIN_SEQUENCERS_FOR_CONSENSUS,
            max_states: MAX_CONSENSUS_STATES,
        }
    }
}

/// Counters over the tracked burns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsensusStats {
    pub detected: usize,
    pub validated: usize,
    pub confirming: usize,
    pub minted: usize,
    pub rejected: usize,
    pub pending_evidence: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn burn() -> ValidatedBurn {
        ValidatedBurn {
            l1_tx_hash: Hash256([1; 32]),
            l1_block_number: 100,
            l1_block_hash: Hash256([2; 32]),
            recipient: Address([3; 20]),
            amount: 100,
            chain_id: 1,
            confirmations: 6,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let conf = MintConfirmation::signed(&burn(), &key, 7, 1_700_000_100);
        assert!(conf.is_well_formed());
        assert_eq!(conf.sequencer, sequencer_address(&key.verifying_key()));
        assert!(conf.verify(&key.verifying_key()));

        let other = SigningKey::generate(&mut OsRng);
        assert!(!conf.verify(&other.verifying_key()));

        let mut tampered = conf.clone();
        tampered.amount += 1;
        assert!(!tampered.verify(&key.verifying_key()));

        let mut truncated = conf.clone();
        truncated.signature.truncate(10);
        assert!(!truncated.verify(&key.verifying_key()));
    }

    #[test]
    fn test_wire_format() {
        let key = SigningKey::generate(&mut OsRng);
        let conf = MintConfirmation::signed(&burn(), &key, 7, 1_700_000_100);
        let back = MintConfirmation::from_bytes(&conf.to_bytes().unwrap()).unwrap();
        assert_eq!(back, conf);
        assert!(back.verify(&key.verifying_key()));
        assert!(MintConfirmation::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(MintStatus::Minted.is_terminal());
        assert!(MintStatus::Rejected.is_terminal());
        assert!(!MintStatus::Confirming.is_terminal());
        assert_eq!(MintStatus::Confirming.to_string(), "CONFIRMING");
    }
}
