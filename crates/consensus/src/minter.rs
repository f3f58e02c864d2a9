//! Token minter
//!
//! Turns a quorum decision into L2 balance. Only the burn the consensus
//! manager agreed on is minted; the caller's decision names which burn.
//! The mint transaction, the burn record and the supply check form one unit:
//! the supply is compared against the candidate state before it goes live,
//! and the record is published right after the swap under the same state
//! lock. A failure leaves neither the credit nor the record behind.

use crate::error::MintError;
use crate::mint::MintConsensusManager;
use crate::types::MintDecision;
use l1_bridge::{BurnRegistry, RecordOutcome, WriteGate};
use l1_integration::{Address, Amount, Hash256};
use l2_runtime::{L2Transaction, StateManager, TransactionKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Proof of a completed mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    pub l1_tx_hash: Hash256,
    pub recipient: Address,
    pub amount: Amount,
    pub l2_block: u64,
    pub l2_tx_hash: Hash256,
    pub state_root: Hash256,
}

/// Minter counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MinterStats {
    pub mints: u64,
    pub minted_amount: u128,
    pub failures: u64,
}

/// Credits recipients of burns that reached quorum
pub struct TokenMinter {
    state: Arc<StateManager>,
    registry: Arc<BurnRegistry>,
    consensus: Arc<MintConsensusManager>,
    gate: WriteGate,
    stats: Mutex<MinterStats>,
}

impl TokenMinter {
    pub fn new(
        state: Arc<StateManager>,
        registry: Arc<BurnRegistry>,
        consensus: Arc<MintConsensusManager>,
        gate: WriteGate,
    ) -> Self {
        Self {
            state,
            registry,
            consensus,
            gate,
            stats: Mutex::new(MinterStats::default()),
        }
    }

    /// Mint the burn behind `decision`
    pub fn mint(&self, decision: &MintDecision, now: u64) -> Result<MintReceipt, MintError> {
        let result = self.try_mint(decision, now);
        let mut stats = self.stats.lock();
        match &result {
            Ok(receipt) => {
                stats.mints += 1;
                stats.minted_amount += receipt.amount as u128;
            }
            Err(e) => {
                stats.failures += 1;
                tracing::error!("Mint of burn {} failed: {}", decision.l1_tx_hash(), e);
            }
        }
        result
    }

    fn try_mint(&self, decision: &MintDecision, now: u64) -> Result<MintReceipt, MintError> {
        let hash = decision.l1_tx_hash();

        let _gate = self.gate.lock();

        if self.registry.is_processed(&hash) {
            return Err(MintError::DoubleMint(hash));
        }
        let agreed = self
            .consensus
            .decision(&hash)
            .ok_or(MintError::QuorumNotReached(hash))?;
        if agreed.burn != decision.burn {
            return Err(MintError::DecisionMismatch(hash));
        }
        let burn = &agreed.burn;

        let tx = L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: hash,
            recipient: burn.recipient,
            amount: burn.amount,
        });
        let l2_tx_hash = tx.hash();
        let l2_block = self.state.block_number();
        let record = burn.to_record(l2_block, l2_tx_hash);

        let (state_root, published) = self.state.apply_system_with(
            &tx,
            |world| {
                if self.registry.check_record(&record)? == RecordOutcome::Duplicate {
                    return Err(MintError::DoubleMint(hash));
                }
                let supply = world.total_supply()?;
                let burned = self.registry.total_burned() + burn.amount as u128;
                if supply != burned {
                    return Err(MintError::SupplyInvariantViolated { supply, burned });
                }
                Ok(record)
            },
            |record| self.registry.record_burn(record),
        )?;
        // the gate keeps other writers out, so the check above still holds
        if let Err(e) = published {
            tracing::error!("Burn {} minted but its record was refused: {}", hash, e);
            return Err(e.into());
        }

        if let Err(e) = self.consensus.mark_minted(&hash, now) {
            tracing::warn!("Minted burn {} but could not mark it: {}", hash, e);
        }

        tracing::info!(
            "Minted {} to {} for burn {} in L2 block {} (tx {}, root {})",
            burn.amount,
            burn.recipient,
            hash,
            l2_block,
            l2_tx_hash,
            state_root
        );

        Ok(MintReceipt {
            l1_tx_hash: hash,
            recipient: burn.recipient,
            amount: burn.amount,
            l2_block,
            l2_tx_hash,
            state_root,
        })
    }

    /// Compare live balances with recorded burns
    pub fn verify_supply(&self) -> Result<u128, MintError> {
        let _gate = self.gate.read();
        let supply = self.state.total_supply()?;
        let burned = self.registry.total_burned();
        if supply != burned {
            return Err(MintError::SupplyInvariantViolated { supply, burned });
        }
        Ok(supply)
    }

    pub fn stats(&self) -> MinterStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{SequencerInfo, SequencerSet};
    use crate::types::{ConfirmationOutcome, ConsensusConfig, MintConfirmation, MintStatus};
    use ed25519_dalek::SigningKey;
    use l1_bridge::{BurnRecord, ValidatedBurn};
    use l1_integration::{Classify, COIN};
    use l2_runtime::StateManagerConfig;
    use rand::rngs::OsRng;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        keys: Vec<SigningKey>,
        state: Arc<StateManager>,
        registry: Arc<BurnRegistry>,
        consensus: Arc<MintConsensusManager>,
        minter: TokenMinter,
    }

    fn fixture() -> Fixture {
        let keys: Vec<SigningKey> = (0..3).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let members = keys.iter().map(|k| SequencerInfo::new(k.verifying_key(), 0)).collect();
        let set = Arc::new(SequencerSet::with_members(members).unwrap());
        let state = Arc::new(StateManager::new(StateManagerConfig::default()));
        let registry = Arc::new(BurnRegistry::new());
        let consensus = Arc::new(MintConsensusManager::new(ConsensusConfig::default(), set));
        let minter = TokenMinter::new(state.clone(), registry.clone(), consensus.clone(), WriteGate::new());
        Fixture {
            keys,
            state,
            registry,
            consensus,
            minter,
        }
    }

    fn burn(tag: u8) -> ValidatedBurn {
        ValidatedBurn {
            l1_tx_hash: Hash256([tag; 32]),
            l1_block_number: 100,
            l1_block_hash: Hash256([2; 32]),
            recipient: Address([3; 20]),
            amount: 100 * COIN,
            chain_id: 1,
            confirmations: 6,
            timestamp: NOW,
        }
    }

    /// Drive a burn to quorum with the first `signers` sequencers
    fn decide(f: &Fixture, b: &ValidatedBurn, signers: usize) -> Option<MintDecision> {
        f.consensus.observe(b.l1_tx_hash, b.l1_block_number, NOW).unwrap();
        f.consensus.validate(b.clone(), NOW).unwrap();
        f.consensus.start_confirming(&b.l1_tx_hash, NOW).unwrap();
        let mut decision = None;
        for key in &f.keys[..signers] {
            let conf = MintConfirmation::signed(b, key, 0, NOW);
            if let ConfirmationOutcome::QuorumReached(d) = f.consensus.submit_confirmation(conf, NOW).unwrap() {
                decision = Some(d);
            }
        }
        decision
    }

    #[test]
    fn test_burn_to_mint() {
        let f = fixture();
        let b = burn(1);
        let decision = decide(&f, &b, 2).unwrap();

        let receipt = f.minter.mint(&decision, NOW).unwrap();
        assert_eq!(receipt.amount, 100 * COIN);
        assert_eq!(receipt.state_root, f.state.state_root());
        assert_eq!(f.state.get_account(&b.recipient).balance, 100 * COIN);
        assert!(f.registry.is_processed(&b.l1_tx_hash));
        assert_eq!(f.registry.get(&b.l1_tx_hash).unwrap().l2_mint_tx_hash, receipt.l2_tx_hash);
        assert_eq!(f.consensus.status(&b.l1_tx_hash), Some(MintStatus::Minted));
        assert_eq!(f.minter.verify_supply().unwrap(), (100 * COIN) as u128);

        // a replayed burn record is a no-op
        let again = b.to_record(9, Hash256([9; 32]));
        assert_eq!(f.registry.record_burn(again).unwrap(), RecordOutcome::Duplicate);
    }

    #[test]
    fn test_double_mint_is_refused() {
        let f = fixture();
        let b = burn(2);
        let decision = decide(&f, &b, 3).unwrap();

        f.minter.mint(&decision, NOW).unwrap();
        let root = f.state.state_root();

        let err = f.minter.mint(&decision, NOW).unwrap_err();
        assert_eq!(err, MintError::DoubleMint(b.l1_tx_hash));
        assert!(err.is_fatal());
        assert_eq!(f.state.state_root(), root);
        assert_eq!(f.state.get_account(&b.recipient).balance, 100 * COIN);
        assert_eq!(f.minter.stats().mints, 1);
        assert_eq!(f.minter.stats().failures, 1);
    }

    #[test]
    fn test_no_quorum() {
        let f = fixture();
        let b = burn(3);
        assert!(decide(&f, &b, 1).is_none());

        let decision = MintDecision {
            burn: b.clone(),
            confirmations: Vec::new(),
            agreeing_weight: 0,
            total_weight: 3,
            reached_at: NOW,
        };
        assert_eq!(
            f.minter.mint(&decision, NOW),
            Err(MintError::QuorumNotReached(b.l1_tx_hash))
        );
        assert_eq!(f.state.get_account(&b.recipient).balance, 0);
        assert!(!f.registry.is_processed(&b.l1_tx_hash));
    }

    #[test]
    fn test_tampered_decision_is_refused() {
        let f = fixture();
        let b = burn(6);
        let decision = decide(&f, &b, 2).unwrap();

        let mut inflated = decision.clone();
        inflated.burn.amount = 1_000 * COIN;
        let err = f.minter.mint(&inflated, NOW).unwrap_err();
        assert_eq!(err, MintError::DecisionMismatch(b.l1_tx_hash));
        assert!(err.is_fatal());

        let mut redirected = decision.clone();
        redirected.burn.recipient = Address([9; 20]);
        assert_eq!(
            f.minter.mint(&redirected, NOW),
            Err(MintError::DecisionMismatch(b.l1_tx_hash))
        );

        assert_eq!(f.state.get_account(&Address([9; 20])).balance, 0);
        assert_eq!(f.state.get_account(&b.recipient).balance, 0);
        assert!(!f.registry.is_processed(&b.l1_tx_hash));

        // the agreed burn still mints
        let receipt = f.minter.mint(&decision, NOW).unwrap();
        assert_eq!(receipt.amount, 100 * COIN);
        assert_eq!(f.minter.verify_supply().unwrap(), (100 * COIN) as u128);
    }

    #[test]
    fn test_record_appears_with_the_credit() {
        let f = fixture();
        let b = burn(7);
        let decision = decide(&f, &b, 2).unwrap();
        let gate = f.minter.gate.clone();

        std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut seen = 0;
                while seen == 0 {
                    let _gate = gate.read();
                    let credited = f.state.get_account(&b.recipient).balance;
                    assert_eq!(credited > 0, f.registry.is_processed(&b.l1_tx_hash));
                    seen = credited;
                }
            });
            f.minter.mint(&decision, NOW).unwrap();
            reader.join().unwrap();
        });
    }

    #[test]
    fn test_supply_violation_leaves_nothing_behind() {
        let f = fixture();
        // a record with no matching credit breaks the invariant
        f.registry
            .record_burn(BurnRecord {
                l1_tx_hash: Hash256([50; 32]),
                l1_block_number: 1,
                l1_block_hash: Hash256([1; 32]),
                l2_recipient: Address([5; 20]),
                amount: 7,
                l2_mint_block: 0,
                l2_mint_tx_hash: Hash256([51; 32]),
                timestamp: NOW,
            })
            .unwrap();

        let b = burn(4);
        let decision = decide(&f, &b, 2).unwrap();
        let root = f.state.state_root();

        let err = f.minter.mint(&decision, NOW).unwrap_err();
        assert!(matches!(err, MintError::SupplyInvariantViolated { .. }));
        assert!(err.is_fatal());
        assert_eq!(f.state.state_root(), root);
        assert!(!f.registry.is_processed(&b.l1_tx_hash));
        assert_eq!(f.consensus.status(&b.l1_tx_hash), Some(MintStatus::Confirming));
    }

    #[test]
    fn test_rejected_mint_transaction_is_not_recorded() {
        let f = fixture();
        let mut b = burn(5);
        // reserved addresses cannot receive mints
        b.recipient = Address::WITHDRAWAL_ESCROW;
        let decision = decide(&f, &b, 2).unwrap();

        assert!(matches!(f.minter.mint(&decision, NOW), Err(MintError::State(_))));
        assert!(!f.registry.is_processed(&b.l1_tx_hash));
        assert_eq!(f.minter.verify_supply().unwrap(), 0);
    }
}
