//! Burn validation
//!
//! Turns a parsed burn intent plus what the L1 observer knows about its
//! transaction into a `ValidatedBurn` ready for mint consensus.

use crate::burn_parser::{find_burn_output, BurnIntent, PUBKEY_LEN};
use crate::burn_registry::{BurnRecord, BurnRegistry};
use crate::error::BurnValidationError;
use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::{
    Address, Amount, ChainId, Hash256, L1BlockHeader, L1Transaction, DEFAULT_L2_CHAIN_ID, MAX_MONEY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// L1 confirmations required before a burn is minted
pub const REQUIRED_CONFIRMATIONS: u32 = 6;

/// Smallest burn accepted
pub const MIN_BURN_AMOUNT: Amount = 1;

/// Validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnValidatorConfig {
    pub chain_id: ChainId,
    pub required_confirmations: u32,
    pub min_amount: Amount,
    pub max_amount: Amount,
}

impl Default for BurnValidatorConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_L2_CHAIN_ID,
            required_confirmations: REQUIRED_CONFIRMATIONS,
            min_amount: MIN_BURN_AMOUNT,
            max_amount: MAX_MONEY,
        }
    }
}

/// Where and when a burn was observed on L1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnObservation {
    pub l1_tx_hash: Hash256,
    pub l1_block_number: u64,
    pub l1_block_hash: Hash256,
    pub confirmations: u32,
    /// Chain id the observer is running against
    pub observed_chain_id: ChainId,
    pub timestamp: u64,
}

/// A burn that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ValidatedBurn {
    pub l1_tx_hash: Hash256,
    pub l1_block_number: u64,
    pub l1_block_hash: Hash256,
    pub recipient: Address,
    pub amount: Amount,
    pub chain_id: ChainId,
    pub confirmations: u32,
    pub timestamp: u64,
}

impl ValidatedBurn {
    /// Registry record for this burn once minted
    pub fn to_record(&self, l2_mint_block: u64, l2_mint_tx_hash: Hash256) -> BurnRecord {
        BurnRecord {
            l1_tx_hash: self.l1_tx_hash,
            l1_block_number: self.l1_block_number,
            l1_block_hash: self.l1_block_hash,
            l2_recipient: self.recipient,
            amount: self.amount,
            l2_mint_block,
            l2_mint_tx_hash,
            timestamp: self.timestamp,
        }
    }
}

/// A burn found in an L1 block, waiting for confirmations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedBurn {
    pub intent: BurnIntent,
    pub output_index: usize,
    pub l1_tx_hash: Hash256,
    pub l1_block_number: u64,
    pub l1_block_hash: Hash256,
    pub timestamp: u64,
}

impl DetectedBurn {
    /// Observation of this burn with the L1 tip at `tip`
    pub fn observe(&self, tip: u64, observed_chain_id: ChainId) -> BurnObservation {
        BurnObservation {
            l1_tx_hash: self.l1_tx_hash,
            l1_block_number: self.l1_block_number,
            l1_block_hash: self.l1_block_hash,
            confirmations: confirmations(tip, self.l1_block_number),
            observed_chain_id,
            timestamp: self.timestamp,
        }
    }
}

/// Confirmations of a block at `block_number` when the tip is `tip`
pub fn confirmations(tip: u64, block_number: u64) -> u32 {
    if tip < block_number {
        return 0;
    }
    u32::try_from(tip - block_number + 1).unwrap_or(u32::MAX)
}

/// Validates burns against confirmations, chain id, amount bounds and the
/// registry
pub struct BurnValidator {
    config: BurnValidatorConfig,
    registry: Arc<BurnRegistry>,
}

impl BurnValidator {
    /// Create a validator
    pub fn new(config: BurnValidatorConfig, registry: Arc<BurnRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &BurnValidatorConfig {
        &self.config
    }

    /// Validate a parsed burn
    pub fn validate(
        &self,
        intent: &BurnIntent,
        observation: &BurnObservation,
    ) -> Result<ValidatedBurn, BurnValidationError> {
        if self.registry.is_processed(&observation.l1_tx_hash) {
            return Err(BurnValidationError::AlreadyProcessed(observation.l1_tx_hash));
        }

        if intent.amount < self.config.min_amount || intent.amount > self.config.max_amount {
            return Err(BurnValidationError::AmountOutOfRange {
                amount: intent.amount,
                min: self.config.min_amount,
                max: self.config.max_amount,
            });
        }

        if observation.observed_chain_id != self.config.chain_id {
            return Err(BurnValidationError::ChainIdMismatch {
                expected: self.config.chain_id,
                got: observation.observed_chain_id,
            });
        }
        if intent.chain_id != self.config.chain_id {
            return Err(BurnValidationError::ChainIdMismatch {
                expected: self.config.chain_id,
                got: intent.chain_id,
            });
        }

        if observation.confirmations < self.config.required_confirmations {
            return Err(BurnValidationError::InsufficientConfirmations {
                have: observation.confirmations,
                need: self.config.required_confirmations,
            });
        }

        tracing::debug!(
            "Validated burn {} of {} for chain {} with {} confirmations",
            observation.l1_tx_hash,
            intent.amount,
            intent.chain_id,
            observation.confirmations
        );

        Ok(ValidatedBurn {
            l1_tx_hash: observation.l1_tx_hash,
            l1_block_number: observation.l1_block_number,
            l1_block_hash: observation.l1_block_hash,
            recipient: intent.recipient_address(),
            amount: intent.amount,
            chain_id: intent.chain_id,
            confirmations: observation.confirmations,
            timestamp: observation.timestamp,
        })
    }

    /// Scan a block for burn outputs; malformed burns are logged and skipped
    pub fn scan_block(&self, header: &L1BlockHeader, transactions: &[L1Transaction]) -> Vec<DetectedBurn> {
        let mut found = Vec::new();
        for tx in transactions {
            match find_burn_output(tx) {
                Ok(Some((output_index, intent))) => {
                    tracing::info!(
                        "Detected burn {} of {} in L1 block {} (recipient key {})",
                        tx.txid,
                        intent.amount,
                        header.number,
                        short_key(&intent.recipient_pubkey)
                    );
                    found.push(DetectedBurn {
                        intent,
                        output_index,
                        l1_tx_hash: tx.txid,
                        l1_block_number: header.number,
                        l1_block_hash: header.hash,
                        timestamp: header.timestamp,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Ignoring malformed burn in {}: {}", tx.txid, e),
            }
        }
        found
    }
}

fn short_key(key: &[u8; PUBKEY_LEN]) -> String {
    hex::encode(&key[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burn_parser::build_burn_script;
    use l1_integration::{L1TxOutput, COIN};

    fn intent(amount: Amount) -> BurnIntent {
        let mut recipient_pubkey = [3u8; PUBKEY_LEN];
        recipient_pubkey[0] = 0x03;
        BurnIntent {
            chain_id: 1,
            recipient_pubkey,
            amount,
        }
    }

    fn observation(confirmations: u32) -> BurnObservation {
        BurnObservation {
            l1_tx_hash: Hash256([1; 32]),
            l1_block_number: 100,
            l1_block_hash: Hash256([2; 32]),
            confirmations,
            observed_chain_id: 1,
            timestamp: 1_700_000_000,
        }
    }

    fn validator() -> (BurnValidator, Arc<BurnRegistry>) {
        let registry = Arc::new(BurnRegistry::new());
        (BurnValidator::new(BurnValidatorConfig::default(), registry.clone()), registry)
    }

    #[test]
    fn test_accepts_confirmed_burn() {
        let (validator, _) = validator();
        let burn = validator.validate(&intent(100 * COIN), &observation(6)).unwrap();
        assert_eq!(burn.amount, 100 * COIN);
        assert_eq!(burn.recipient, intent(1).recipient_address());
        assert_eq!(burn.to_record(4, Hash256([9; 32])).l2_mint_block, 4);
    }

    #[test]
    fn test_rejections() {
        let (validator, registry) = validator();

        assert!(matches!(
            validator.validate(&intent(COIN), &observation(5)),
            Err(BurnValidationError::InsufficientConfirmations { have: 5, need: 6 })
        ));

        let mut other_chain = intent(COIN);
        other_chain.chain_id = 2;
        assert!(matches!(
            validator.validate(&other_chain, &observation(6)),
            Err(BurnValidationError::ChainIdMismatch { expected: 1, got: 2 })
        ));

        let mut wrong_network = observation(6);
        wrong_network.observed_chain_id = 7;
        assert!(matches!(
            validator.validate(&intent(COIN), &wrong_network),
            Err(BurnValidationError::ChainIdMismatch { got: 7, .. })
        ));

        assert!(matches!(
            validator.validate(&intent(MAX_MONEY + 1), &observation(6)),
            Err(BurnValidationError::AmountOutOfRange { .. })
        ));

        let burn = validator.validate(&intent(COIN), &observation(6)).unwrap();
        registry.record_burn(burn.to_record(1, Hash256([5; 32]))).unwrap();
        assert!(matches!(
            validator.validate(&intent(COIN), &observation(6)),
            Err(BurnValidationError::AlreadyProcessed(_))
        ));
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(confirmations(105, 100), 6);
        assert_eq!(confirmations(100, 100), 1);
        assert_eq!(confirmations(99, 100), 0);
    }

    #[test]
    fn test_scan_block() {
        let (validator, _) = validator();
        let header = L1BlockHeader {
            number: 100,
            hash: Hash256([2; 32]),
            prev_hash: Hash256([1; 32]),
            timestamp: 1_700_000_000,
        };
        let burn_tx = L1Transaction {
            txid: Hash256([7; 32]),
            outputs: vec![L1TxOutput {
                value: COIN,
                script: build_burn_script(&intent(COIN)),
            }],
        };
        let mut broken_script = build_burn_script(&intent(COIN));
        broken_script.push(0);
        let broken_tx = L1Transaction {
            txid: Hash256([8; 32]),
            outputs: vec![L1TxOutput {
                value: COIN,
                script: broken_script,
            }],
        };

        let found = validator.scan_block(&header, &[burn_tx, broken_tx]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].l1_tx_hash, Hash256([7; 32]));
        assert_eq!(found[0].observe(105, 1).confirmations, 6);
    }
}
