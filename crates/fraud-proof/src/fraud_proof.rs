//! Fraud Proof System
//!
//! Sequencers commit state roots with a challenge deadline. A challenger
//! disputes one by posting a bonded, signed proof; the proof is adjudicated
//! by replaying the disputed block from its pre-state. A proven fraud slashes
//! the sequencer and rolls live state back to the pre-state root.
//!
//! The transactions replayed are the ones the sequencer committed to: the
//! logged block when it is retained, otherwise the proof's own list, which
//! must hash to the committed transactions root.

use crate::error::FraudProofError;
use crate::interactive::InteractiveSession;
use crate::ledger::BondLedger;
use crate::types::{
    FraudProof, FraudProofConfig, FraudProofResolution, FraudProofResult, SlashingRecord, VerificationReport,
};
use l1_bridge::{BurnRecord, BurnRegistry, WriteGate};
use l1_integration::{Address, Amount, Hash256};
use l2_consensus::SequencerSet;
use l2_runtime::{transactions_root, L2Transaction, RewindTarget, StateError, StateManager, TransactionKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A state root a sequencer committed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRoot {
    pub state_root: Hash256,
    pub block_number: u64,
    pub challenge_deadline: u64,
    /// Root of the transactions the block was built from, when known
    #[serde(default)]
    pub transactions_root: Option<Hash256>,
}

/// A submitted proof and what became of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProof {
    pub proof: FraudProof,
    pub result: FraudProofResult,
    pub report: Option<VerificationReport>,
    pub resolution: Option<FraudProofResolution>,
}

/// Fraud proof counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FraudProofStats {
    pub committed_roots: usize,
    pub pending: usize,
    pub settling: usize,
    pub proven: usize,
    pub rejected: usize,
    pub expired: usize,
    pub active_sessions: usize,
    pub total_slashed: Amount,
}

#[derive(Default)]
pub(crate) struct SystemInner {
    pub(crate) roots: HashMap<Hash256, CommittedRoot>,
    pub(crate) proofs: HashMap<Hash256, StoredProof>,
    pub(crate) sessions: BTreeMap<u64, InteractiveSession>,
    pub(crate) next_session: u64,
}

/// Adjudicates fraud proofs against committed state roots
pub struct FraudProofSystem {
    pub(crate) config: FraudProofConfig,
    pub(crate) state: Arc<StateManager>,
    sequencers: Arc<SequencerSet>,
    registry: Arc<BurnRegistry>,
    gate: WriteGate,
    ledger: BondLedger,
    pub(crate) inner: RwLock<SystemInner>,
}

impl FraudProofSystem {
    pub fn new(
        config: FraudProofConfig,
        state: Arc<StateManager>,
        sequencers: Arc<SequencerSet>,
        registry: Arc<BurnRegistry>,
        gate: WriteGate,
    ) -> Self {
        Self {
            config,
            state,
            sequencers,
            registry,
            gate,
            ledger: BondLedger::new(),
            inner: RwLock::new(SystemInner {
                next_session: 1,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &FraudProofConfig {
        &self.config
    }

    /// Bond and reward ledger
    pub fn ledger(&self) -> &BondLedger {
        &self.ledger
    }

    /// Record a sequencer commitment open to challenge until `deadline`.
    /// The transactions root is taken from the block log.
    pub fn register_state_root(&self, state_root: Hash256, block_number: u64, deadline: u64) {
        self.register_commitment(CommittedRoot {
            state_root,
            block_number,
            challenge_deadline: deadline,
            transactions_root: self.state.block(block_number).map(|b| b.transactions_root()),
        });
    }

    /// Record a commitment as observed, such as one posted by another
    /// sequencer or loaded from disk
    pub fn register_commitment(&self, committed: CommittedRoot) {
        tracing::debug!(
            "Registered state root {} for block {}, challengeable until {}",
            committed.state_root,
            committed.block_number,
            committed.challenge_deadline
        );
        self.inner.write().roots.insert(committed.state_root, committed);
    }

    pub fn committed_root(&self, state_root: &Hash256) -> Option<CommittedRoot> {
        self.inner.read().roots.get(state_root).copied()
    }

    pub fn challenge_deadline(&self, state_root: &Hash256) -> Option<u64> {
        self.committed_root(state_root).map(|c| c.challenge_deadline)
    }

    /// True once the challenge period is over and no proof against the
    /// root is still open
    pub fn is_state_root_finalized(&self, state_root: &Hash256, now: u64) -> bool {
        let inner = self.inner.read();
        let Some(committed) = inner.roots.get(state_root) else {
            return false;
        };
        now > committed.challenge_deadline
            && !inner
                .proofs
                .values()
                .any(|p| p.result.is_open() && p.proof.disputed_state_root == *state_root)
    }

    /// Accept a fraud proof and lock its bond
    pub fn submit_fraud_proof(&self, proof: FraudProof, now: u64) -> Result<Hash256, FraudProofError> {
        proof.validate_structure(self.config.chain_id)?;

        let hash = proof.hash();
        if !proof.verify_signature() {
            return Err(FraudProofError::InvalidSignature(hash));
        }

        if proof.challenge_bond < self.config.min_bond {
            return Err(FraudProofError::InsufficientBond {
                have: proof.challenge_bond,
                need: self.config.min_bond,
            });
        }
        if !self.sequencers.contains(&proof.sequencer) {
            return Err(FraudProofError::UnknownSequencer(proof.sequencer));
        }

        let mut inner = self.inner.write();
        let committed = inner
            .roots
            .get(&proof.disputed_state_root)
            .copied()
            .ok_or(FraudProofError::UnknownStateRoot(proof.disputed_state_root))?;
        if now > committed.challenge_deadline {
            return Err(FraudProofError::ChallengePeriodEnded(proof.disputed_state_root));
        }
        if committed.block_number != proof.disputed_block_number {
            return Err(FraudProofError::Malformed(format!(
                "state root {} belongs to block {}, not {}",
                committed.state_root, committed.block_number, proof.disputed_block_number
            )));
        }
        if inner.proofs.contains_key(&hash) {
            return Err(FraudProofError::Duplicate(hash));
        }

        self.ledger.lock_bond(hash, proof.challenger, proof.challenge_bond);
        tracing::info!(
            "Fraud proof {} ({:?}) from {} against root {} of block {}",
            hash,
            proof.proof_type,
            proof.challenger,
            proof.disputed_state_root,
            proof.disputed_block_number
        );
        inner.proofs.insert(
            hash,
            StoredProof {
                proof,
                result: FraudProofResult::Pending,
                report: None,
                resolution: None,
            },
        );
        Ok(hash)
    }

    /// Transactions a proof disputes. A retained block is replayed as
    /// logged; a proof may only repeat it. Otherwise the proof's list must
    /// match the committed transactions root.
    pub(crate) fn disputed_transactions(&self, proof: &FraudProof) -> Result<Vec<L2Transaction>, FraudProofError> {
        let number = proof.disputed_block_number;
        let supplied = (!proof.transactions.is_empty()).then(|| transactions_root(&proof.transactions));

        if let Some(block) = self.state.block(number) {
            if supplied.is_some_and(|root| root != block.transactions_root()) {
                return Err(FraudProofError::TransactionsMismatch(number));
            }
            return Ok(block.transactions);
        }

        let Some(supplied) = supplied else {
            return Err(FraudProofError::BlockNotRetained(number));
        };
        let committed = self
            .committed_root(&proof.disputed_state_root)
            .and_then(|c| c.transactions_root)
            .ok_or(FraudProofError::BlockNotRetained(number))?;
        if supplied != committed {
            return Err(FraudProofError::TransactionsMismatch(number));
        }
        Ok(proof.transactions.clone())
    }

    /// Replay the disputed block and decide whether fraud is proven
    pub fn verify_fraud_proof(&self, hash: &Hash256) -> Result<VerificationReport, FraudProofError> {
        let proof = self.pending_proof(hash)?;
        let report = self.replay_proof(&proof)?;

        tracing::info!("Fraud proof {} verified as {:?}: {}", hash, report.result, report.reason);
        if let Some(stored) = self.inner.write().proofs.get_mut(hash) {
            stored.report = Some(report.clone());
        }
        Ok(report)
    }

    fn replay_proof(&self, proof: &FraudProof) -> Result<VerificationReport, FraudProofError> {
        let invalid = |replayed_root, reason: String| VerificationReport {
            result: FraudProofResult::Invalid,
            claimed_root: proof.disputed_state_root,
            replayed_root,
            failed_transaction: None,
            reason,
        };

        if let Some(block) = self.state.block(proof.disputed_block_number) {
            if block.pre_state_root != proof.previous_state_root {
                return Ok(invalid(
                    None,
                    format!(
                        "block {} starts from {}, not {}",
                        block.number, block.pre_state_root, proof.previous_state_root
                    ),
                ));
            }
        }

        let txs = match self.disputed_transactions(proof) {
            Ok(txs) => txs,
            Err(e @ FraudProofError::TransactionsMismatch(_)) => {
                tracing::warn!("Fraud proof {}: {}", proof.hash(), e);
                return Ok(invalid(None, e.to_string()));
            }
            Err(e) => return Err(e),
        };
        let replayed = match self
            .state
            .replay(&proof.previous_state_root, proof.disputed_block_number, &txs)
        {
            Ok(root) => root,
            Err(StateError::BatchFailed { index, source }) => {
                return Ok(VerificationReport {
                    result: FraudProofResult::Valid,
                    claimed_root: proof.disputed_state_root,
                    replayed_root: None,
                    failed_transaction: Some(index),
                    reason: format!("transaction {} fails: {}", index, source),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(claim) = proof.state_claim()? {
            if !StateManager::verify_account_proof(
                &replayed,
                &claim.address,
                claim.account.as_ref(),
                &claim.commitment,
                &claim.proof,
            ) {
                let reason = FraudProofError::StateProofMismatch(replayed).to_string();
                tracing::error!("Fraud proof {}: {}", proof.hash(), reason);
                return Ok(invalid(Some(replayed), reason));
            }
        }

        if replayed == proof.disputed_state_root {
            return Ok(invalid(Some(replayed), "disputed root replays correctly".to_string()));
        }
        Ok(VerificationReport {
            result: FraudProofResult::Valid,
            claimed_root: proof.disputed_state_root,
            replayed_root: Some(replayed),
            failed_transaction: None,
            reason: format!("replay gives {}", replayed),
        })
    }

    /// Verify a pending proof and settle its economics
    pub fn resolve(&self, hash: &Hash256, now: u64) -> Result<FraudProofResolution, FraudProofError> {
        let report = self.verify_fraud_proof(hash)?;
        self.settle(hash, report.result == FraudProofResult::Valid, now)
    }

    /// Apply the slashing and reward path for a decided proof. Only one
    /// caller gets to settle a proof; the rest see `AlreadyResolved`.
    pub(crate) fn settle(&self, hash: &Hash256, proven: bool, now: u64) -> Result<FraudProofResolution, FraudProofError> {
        let proof = self.claim_for_settlement(hash)?;
        let outcome = if proven {
            self.settle_proven(hash, &proof, now)
        } else {
            Ok(self.settle_rejected(hash, &proof))
        };
        let resolution = match outcome {
            Ok(resolution) => resolution,
            Err(e) => {
                if let Some(stored) = self.inner.write().proofs.get_mut(hash) {
                    stored.result = FraudProofResult::Pending;
                }
                return Err(e);
            }
        };

        let mut inner = self.inner.write();
        if proven {
            // later commitments build on the rolled-back state
            inner
                .roots
                .retain(|_, c| c.block_number < proof.disputed_block_number);
        }
        if let Some(stored) = inner.proofs.get_mut(hash) {
            stored.result = if proven {
                FraudProofResult::Valid
            } else {
                FraudProofResult::Invalid
            };
            stored.resolution = Some(resolution.clone());
        }
        Ok(resolution)
    }

    /// Move a pending proof to `Settling`
    fn claim_for_settlement(&self, hash: &Hash256) -> Result<FraudProof, FraudProofError> {
        let mut inner = self.inner.write();
        let stored = inner.proofs.get_mut(hash).ok_or(FraudProofError::UnknownProof(*hash))?;
        if stored.result != FraudProofResult::Pending {
            return Err(FraudProofError::AlreadyResolved(*hash));
        }
        stored.result = FraudProofResult::Settling;
        Ok(stored.proof.clone())
    }

    fn settle_proven(&self, hash: &Hash256, proof: &FraudProof, now: u64) -> Result<FraudProofResolution, FraudProofError> {
        let ty = proof.proof_type;
        let slashed = self
            .sequencers
            .slash(&proof.sequencer, ty.slash_percent(), self.config.min_slashing_amount)?;
        self.sequencers.penalize(&proof.sequencer, ty.reputation_penalty())?;

        let reward = ((slashed as u128 * self.config.challenger_reward_percent.min(100) as u128) / 100) as Amount;
        self.ledger.credit_reward(proof.challenger, reward);
        let bond_returned = self.ledger.return_bond(hash).map(|(_, amount)| amount).unwrap_or(0);

        let record = SlashingRecord {
            sequencer: proof.sequencer,
            slashed_amount: slashed,
            fraud_proof_hash: *hash,
            proof_type: ty,
            challenger: proof.challenger,
            challenger_reward: reward,
            slashed_at: now,
            block_number: proof.disputed_block_number,
            reputation_penalty: ty.reputation_penalty(),
        };
        self.ledger.record_slashing(record.clone());

        let (reverted_to, remints) = self.roll_back(&proof.previous_state_root)?;

        tracing::warn!(
            "Fraud proven by {}: sequencer {} slashed {}, challenger rewarded {}, state rolled back to {:?}",
            proof.challenger,
            proof.sequencer,
            slashed,
            reward,
            reverted_to
        );
        Ok(FraudProofResolution::Proven {
            record,
            bond_returned,
            reverted_to,
            remints,
        })
    }

    fn settle_rejected(&self, hash: &Hash256, proof: &FraudProof) -> FraudProofResolution {
        let (reward, burned) = self
            .ledger
            .slash_bond(hash, proof.sequencer, self.config.challenger_reward_percent)
            .unwrap_or((0, 0));
        tracing::info!(
            "Fraud proof {} rejected: bond of {} slashed, {} to sequencer {}",
            hash,
            reward + burned,
            reward,
            proof.sequencer
        );
        FraudProofResolution::NotProven {
            challenger: proof.challenger,
            bond_slashed: reward + burned,
            sequencer_reward: reward,
            burned,
        }
    }

    /// Revert live state to `root` and re-apply the mints the revert undid,
    /// publishing state and registry together. Returns `None` when the root
    /// is no longer retained.
    fn roll_back(&self, root: &Hash256) -> Result<(Option<Hash256>, usize), FraudProofError> {
        let _gate = self.gate.lock();

        let rebuilt = self.state.rebuild(
            RewindTarget::Root(*root),
            |rb| {
                let undone = self.registry.reverted_by(rb.block_number(), rb.kept());
                let mut restored = Vec::with_capacity(undone.len());
                for record in &undone {
                    let tx = L2Transaction::system(TransactionKind::Mint {
                        l1_tx_hash: record.l1_tx_hash,
                        recipient: record.l2_recipient,
                        amount: record.amount,
                    });
                    match rb.apply(&tx) {
                        Ok(_) => restored.push(BurnRecord {
                            l2_mint_block: rb.block_number(),
                            l2_mint_tx_hash: tx.hash(),
                            ..record.clone()
                        }),
                        Err(e) => tracing::error!("Re-mint of burn {} after rollback failed: {}", record.l1_tx_hash, e),
                    }
                }
                Ok::<_, FraudProofError>((undone, restored))
            },
            |(undone, restored)| {
                let removed: Vec<Hash256> = undone.iter().map(|r| r.l1_tx_hash).collect();
                let remints = restored.len();
                self.registry.apply_rollback(&removed, restored);
                remints
            },
        );

        match rebuilt {
            Ok((_, remints)) => Ok((Some(*root), remints)),
            Err(FraudProofError::State(StateError::UnknownStateRoot(_))) => {
                tracing::error!("Cannot roll back to {}: root no longer retained", root);
                Ok((None, 0))
            }
            Err(e) => Err(e),
        }
    }

    /// Withdraw a pending proof whose challenge timed out; the bond is
    /// returned
    pub fn expire_proof(&self, hash: &Hash256) -> Result<Amount, FraudProofError> {
        let mut inner = self.inner.write();
        let stored = inner.proofs.get_mut(hash).ok_or(FraudProofError::UnknownProof(*hash))?;
        if stored.result != FraudProofResult::Pending {
            return Err(FraudProofError::AlreadyResolved(*hash));
        }
        stored.result = FraudProofResult::Expired;
        let returned = self.ledger.return_bond(hash).map(|(_, amount)| amount).unwrap_or(0);
        tracing::info!("Fraud proof {} expired, returned bond {}", hash, returned);
        Ok(returned)
    }

    pub(crate) fn pending_proof(&self, hash: &Hash256) -> Result<FraudProof, FraudProofError> {
        let inner = self.inner.read();
        let stored = inner.proofs.get(hash).ok_or(FraudProofError::UnknownProof(*hash))?;
        if stored.result != FraudProofResult::Pending {
            return Err(FraudProofError::AlreadyResolved(*hash));
        }
        Ok(stored.proof.clone())
    }

    pub fn fraud_proof(&self, hash: &Hash256) -> Option<FraudProof> {
        self.inner.read().proofs.get(hash).map(|s| s.proof.clone())
    }

    pub fn result(&self, hash: &Hash256) -> Option<FraudProofResult> {
        self.inner.read().proofs.get(hash).map(|s| s.result)
    }

    pub fn resolution(&self, hash: &Hash256) -> Option<FraudProofResolution> {
        self.inner.read().proofs.get(hash).and_then(|s| s.resolution.clone())
    }

    /// Hashes of proofs awaiting resolution
    pub fn pending_proofs(&self) -> Vec<Hash256> {
        self.inner
            .read()
            .proofs
            .iter()
            .filter(|(_, s)| s.result == FraudProofResult::Pending)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn slashing_records(&self, sequencer: &Address) -> Vec<SlashingRecord> {
        self.ledger.slashing_records(sequencer)
    }

    pub fn total_slashed(&self) -> Amount {
        self.ledger.total_slashed()
    }

    pub fn stored_proofs(&self) -> Vec<StoredProof> {
        self.inner.read().proofs.values().cloned().collect()
    }

    pub fn committed_roots(&self) -> Vec<CommittedRoot> {
        self.inner.read().roots.values().copied().collect()
    }

    /// Put back a proof loaded from disk. A settlement cut short is
    /// reopened.
    pub fn restore_proof(&self, mut stored: StoredProof) {
        let hash = stored.proof.hash();
        if stored.result == FraudProofResult::Settling {
            tracing::warn!("Fraud proof {} was mid-settlement, reopening", hash);
            stored.result = FraudProofResult::Pending;
        }
        self.inner.write().proofs.insert(hash, stored);
    }

    /// Drop commitments whose challenge period ended before `now`
    pub fn prune_finalized(&self, now: u64) -> usize {
        let mut inner = self.inner.write();
        let before = inner.roots.len();
        let disputed: Vec<Hash256> = inner
            .proofs
            .values()
            .filter(|p| p.result.is_open())
            .map(|p| p.proof.disputed_state_root)
            .collect();
        inner
            .roots
            .retain(|root, c| now <= c.challenge_deadline || disputed.contains(root));
        before - inner.roots.len()
    }

    pub fn stats(&self) -> FraudProofStats {
        let inner = self.inner.read();
        let count = |result| inner.proofs.values().filter(|p| p.result == result).count();
        FraudProofStats {
            committed_roots: inner.roots.len(),
            pending: count(FraudProofResult::Pending),
            settling: count(FraudProofResult::Settling),
            proven: count(FraudProofResult::Valid),
            rejected: count(FraudProofResult::Invalid),
            expired: count(FraudProofResult::Expired),
            active_sessions: inner.sessions.values().filter(|s| s.is_active()).count(),
            total_slashed: self.ledger.total_slashed(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{FraudProofType, StateClaim, FRAUD_PROOF_CHALLENGE_BOND};
    use ed25519_dalek::SigningKey;
    use l1_integration::{Classify, COIN};
    use l2_consensus::SequencerInfo;
    use l2_runtime::StateManagerConfig;
    use rand::rngs::OsRng;

    pub(crate) const NOW: u64 = 1_700_000_000;
    pub(crate) const DEADLINE: u64 = NOW + 7 * 24 * 3600;

    pub(crate) struct Fixture {
        pub state: Arc<StateManager>,
        pub registry: Arc<BurnRegistry>,
        pub set: Arc<SequencerSet>,
        pub system: FraudProofSystem,
        pub sequencer: Address,
        pub challenger: SigningKey,
    }

    pub(crate) fn fixture_with(trace_step_size: usize) -> Fixture {
        let keys: Vec<SigningKey> = (0..3).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let members = keys
            .iter()
            .map(|k| SequencerInfo::new(k.verifying_key(), 1_000 * COIN))
            .collect();
        let set = Arc::new(SequencerSet::with_members(members).unwrap());
        let sequencer = set.members()[0].address;
        let state = Arc::new(StateManager::new(StateManagerConfig {
            trace_step_size,
            ..Default::default()
        }));
        let registry = Arc::new(BurnRegistry::new());
        let system = FraudProofSystem::new(
            FraudProofConfig::default(),
            state.clone(),
            set.clone(),
            registry.clone(),
            WriteGate::new(),
        );
        Fixture {
            state,
            registry,
            set,
            system,
            sequencer,
            challenger: SigningKey::generate(&mut OsRng),
        }
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(1)
    }

    pub(crate) fn alice() -> Address {
        Address([0xa1; 20])
    }

    pub(crate) fn bob() -> Address {
        Address([0xb0; 20])
    }

    /// Mint to alice in block 0, then log `transfers` alice -> bob in block 1
    pub(crate) fn build_block(f: &Fixture, transfers: u64) -> (Hash256, Hash256) {
        let mint = L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: Hash256([7; 32]),
            recipient: alice(),
            amount: 100 * COIN,
        });
        let l2_mint_tx_hash = mint.hash();
        f.state.apply_system(&mint).unwrap();
        f.registry
            .record_burn(BurnRecord {
                l1_tx_hash: Hash256([7; 32]),
                l1_block_number: 10,
                l1_block_hash: Hash256([8; 32]),
                l2_recipient: alice(),
                amount: 100 * COIN,
                l2_mint_block: 0,
                l2_mint_tx_hash,
                timestamp: NOW,
            })
            .unwrap();
        let genesis = f.state.seal_block();

        for nonce in 0..transfers {
            let tx = L2Transaction::transfer(alice(), nonce, bob(), COIN);
            f.state.apply_transaction(&tx).unwrap();
        }
        let block = f.state.seal_block();
        (genesis.post_state_root, block.post_state_root)
    }

    pub(crate) fn signed_proof(f: &Fixture, disputed: Hash256, previous: Hash256, block: u64) -> FraudProof {
        let mut proof = FraudProof::new(
            FraudProofType::InvalidStateTransition,
            disputed,
            block,
            previous,
            f.sequencer,
            FRAUD_PROOF_CHALLENGE_BOND,
            NOW,
        );
        proof.sign(&f.challenger);
        proof
    }

    #[test]
    fn test_proven_fraud_slashes_and_rolls_back() {
        let f = fixture();
        let (pre, honest) = build_block(&f, 2);
        let forged = Hash256([0xee; 32]);
        f.system.register_state_root(forged, 1, DEADLINE);

        let proof = signed_proof(&f, forged, pre, 1);
        let challenger = proof.challenger;
        let hash = f.system.submit_fraud_proof(proof, NOW).unwrap();
        assert_eq!(f.system.ledger().bonds_held(&challenger), FRAUD_PROOF_CHALLENGE_BOND);
        assert!(!f.system.is_state_root_finalized(&forged, DEADLINE + 1));

        let report = f.system.verify_fraud_proof(&hash).unwrap();
        assert_eq!(report.result, FraudProofResult::Valid);
        assert_eq!(report.replayed_root, Some(honest));

        let resolution = f.system.resolve(&hash, NOW + 10).unwrap();
        let FraudProofResolution::Proven {
            record,
            bond_returned,
            reverted_to,
            ..
        } = resolution
        else {
            panic!("expected proven fraud");
        };
        assert_eq!(record.slashed_amount, 1_000 * COIN);
        assert_eq!(record.challenger_reward, 500 * COIN);
        assert_eq!(bond_returned, FRAUD_PROOF_CHALLENGE_BOND);
        assert_eq!(reverted_to, Some(pre));

        assert_eq!(f.state.state_root(), pre);
        assert_eq!(f.state.get_account(&bob()).balance, 0);
        assert_eq!(f.state.get_account(&alice()).balance, 100 * COIN);

        let info = f.set.get(&f.sequencer).unwrap();
        assert_eq!(info.stake, 0);
        assert!(info.jailed);
        assert_eq!(f.system.ledger().rewards(&challenger), 500 * COIN);
        assert_eq!(f.system.total_slashed(), 1_000 * COIN);
        assert_eq!(f.system.slashing_records(&f.sequencer).len(), 1);
        assert_eq!(f.system.result(&hash), Some(FraudProofResult::Valid));
        assert!(f.system.committed_root(&forged).is_none());

        assert_eq!(f.system.resolve(&hash, NOW), Err(FraudProofError::AlreadyResolved(hash)));
    }

    #[test]
    fn test_honest_root_slashes_challenger_bond() {
        let f = fixture();
        let (pre, honest) = build_block(&f, 2);
        f.system.register_state_root(honest, 1, DEADLINE);

        let hash = f.system.submit_fraud_proof(signed_proof(&f, honest, pre, 1), NOW).unwrap();
        let resolution = f.system.resolve(&hash, NOW).unwrap();
        assert_eq!(
            resolution,
            FraudProofResolution::NotProven {
                challenger: Address::from_pubkey(f.challenger.verifying_key().as_bytes()),
                bond_slashed: FRAUD_PROOF_CHALLENGE_BOND,
                sequencer_reward: FRAUD_PROOF_CHALLENGE_BOND / 2,
                burned: FRAUD_PROOF_CHALLENGE_BOND / 2,
            }
        );
        assert_eq!(f.state.state_root(), honest);
        assert_eq!(f.set.get(&f.sequencer).unwrap().stake, 1_000 * COIN);
        assert_eq!(f.system.ledger().rewards(&f.sequencer), FRAUD_PROOF_CHALLENGE_BOND / 2);
        assert!(f.system.is_state_root_finalized(&honest, DEADLINE + 1));
    }

    #[test]
    fn test_failing_transaction_proves_fraud() {
        let f = fixture();
        let (pre, _) = build_block(&f, 1);
        let forged = Hash256([0xdd; 32]);

        // a block this node never logged, committed over an overspend of alice
        let overspend = vec![L2Transaction::transfer(alice(), 0, bob(), 1_000 * COIN)];
        f.system.register_commitment(CommittedRoot {
            state_root: forged,
            block_number: 5,
            challenge_deadline: DEADLINE,
            transactions_root: Some(transactions_root(&overspend)),
        });

        let mut proof = FraudProof::new(
            FraudProofType::InvalidTransaction,
            forged,
            5,
            pre,
            f.sequencer,
            FRAUD_PROOF_CHALLENGE_BOND,
            NOW,
        );
        proof.transactions = overspend;
        proof.sign(&f.challenger);

        let hash = f.system.submit_fraud_proof(proof, NOW).unwrap();
        let report = f.system.verify_fraud_proof(&hash).unwrap();
        assert_eq!(report.result, FraudProofResult::Valid);
        assert_eq!(report.failed_transaction, Some(0));

        let FraudProofResolution::Proven { record, .. } = f.system.resolve(&hash, NOW).unwrap() else {
            panic!("expected proven fraud");
        };
        // 75% of 1000 COIN
        assert_eq!(record.slashed_amount, 750 * COIN);
        assert_eq!(f.set.get(&f.sequencer).unwrap().reputation, 100 - 25);
    }

    #[test]
    fn test_substituted_transactions_do_not_prove_fraud() {
        let f = fixture();
        let (pre, honest) = build_block(&f, 1);
        f.system.register_state_root(honest, 1, DEADLINE);
        let stake = f.set.get(&f.sequencer).unwrap().stake;

        // block 1 is logged; the challenger swaps in an overspend
        let mut proof = signed_proof(&f, honest, pre, 1);
        proof.transactions = vec![L2Transaction::transfer(alice(), 0, bob(), 1_000 * COIN)];
        proof.sign(&f.challenger);
        let hash = f.system.submit_fraud_proof(proof, NOW).unwrap();

        let report = f.system.verify_fraud_proof(&hash).unwrap();
        assert_eq!(report.result, FraudProofResult::Invalid);
        assert!(matches!(
            f.system.resolve(&hash, NOW).unwrap(),
            FraudProofResolution::NotProven { .. }
        ));
        assert_eq!(f.set.get(&f.sequencer).unwrap().stake, stake);
        assert_eq!(f.state.state_root(), honest);

        // an unlogged block: the list must match the committed root
        let elsewhere = Hash256([0xc1; 32]);
        let committed = vec![L2Transaction::transfer(alice(), 0, bob(), COIN)];
        f.system.register_commitment(CommittedRoot {
            state_root: elsewhere,
            block_number: 7,
            challenge_deadline: DEADLINE,
            transactions_root: Some(transactions_root(&committed)),
        });
        let mut proof = signed_proof(&f, elsewhere, pre, 7);
        proof.transactions = vec![L2Transaction::transfer(alice(), 0, bob(), 1_000 * COIN)];
        assert_eq!(
            f.system.disputed_transactions(&proof),
            Err(FraudProofError::TransactionsMismatch(7))
        );
        proof.transactions = committed.clone();
        assert_eq!(f.system.disputed_transactions(&proof).unwrap(), committed);
        proof.transactions.clear();
        assert_eq!(
            f.system.disputed_transactions(&proof),
            Err(FraudProofError::BlockNotRetained(7))
        );
    }

    #[test]
    fn test_proof_settles_once() {
        let f = fixture();
        let (pre, _) = build_block(&f, 2);
        let forged = Hash256([0xef; 32]);
        f.system.register_state_root(forged, 1, DEADLINE);
        let hash = f.system.submit_fraud_proof(signed_proof(&f, forged, pre, 1), NOW).unwrap();

        let results: Vec<Result<FraudProofResolution, FraudProofError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| f.system.settle(&hash, true, NOW))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_eq!(result, &Err(FraudProofError::AlreadyResolved(hash)));
        }
        assert_eq!(f.system.slashing_records(&f.sequencer).len(), 1);
        assert_eq!(f.system.total_slashed(), 1_000 * COIN);
        assert_eq!(f.system.result(&hash), Some(FraudProofResult::Valid));
    }

    #[test]
    fn test_settling_proof_keeps_its_root_open() {
        let f = fixture();
        let (pre, honest) = build_block(&f, 1);
        f.system.register_state_root(honest, 1, DEADLINE);
        let hash = f.system.submit_fraud_proof(signed_proof(&f, honest, pre, 1), NOW).unwrap();

        f.system.claim_for_settlement(&hash).unwrap();
        assert_eq!(f.system.result(&hash), Some(FraudProofResult::Settling));
        assert_eq!(f.system.settle(&hash, false, NOW), Err(FraudProofError::AlreadyResolved(hash)));
        assert!(matches!(f.system.expire_proof(&hash), Err(FraudProofError::AlreadyResolved(_))));
        assert!(!f.system.is_state_root_finalized(&honest, DEADLINE + 1));
        assert_eq!(f.system.prune_finalized(DEADLINE + 1), 0);
        assert_eq!(f.system.stats().settling, 1);
    }

    #[test]
    fn test_submission_checks() {
        let f = fixture();
        let (pre, honest) = build_block(&f, 1);
        f.system.register_state_root(honest, 1, DEADLINE);

        let mut unsigned = signed_proof(&f, honest, pre, 1);
        unsigned.signature = vec![0; 64];
        assert!(matches!(
            f.system.submit_fraud_proof(unsigned, NOW),
            Err(FraudProofError::InvalidSignature(_))
        ));

        let mut cheap = signed_proof(&f, honest, pre, 1);
        cheap.challenge_bond = COIN;
        cheap.sign(&f.challenger);
        let err = f.system.submit_fraud_proof(cheap, NOW).unwrap_err();
        assert!(matches!(err, FraudProofError::InsufficientBond { .. }));
        assert!(!err.is_fatal());

        let unknown = signed_proof(&f, Hash256([0x42; 32]), pre, 1);
        assert!(matches!(
            f.system.submit_fraud_proof(unknown, NOW),
            Err(FraudProofError::UnknownStateRoot(_))
        ));

        let late = signed_proof(&f, honest, pre, 1);
        assert!(matches!(
            f.system.submit_fraud_proof(late, DEADLINE + 1),
            Err(FraudProofError::ChallengePeriodEnded(_))
        ));

        let proof = signed_proof(&f, honest, pre, 1);
        f.system.submit_fraud_proof(proof.clone(), NOW).unwrap();
        assert!(matches!(
            f.system.submit_fraud_proof(proof, NOW),
            Err(FraudProofError::Duplicate(_))
        ));
    }

    #[test]
    fn test_state_claim_must_match_replay() {
        let f = fixture();
        let (pre, _) = build_block(&f, 1);
        let forged = Hash256([0xcc; 32]);
        f.system.register_state_root(forged, 1, DEADLINE);

        let mut proof = signed_proof(&f, forged, pre, 1);
        let honest = f.state.generate_proof(&bob()).unwrap();
        let bogus = StateClaim {
            address: bob(),
            account: Some(l2_runtime::AccountState {
                balance: 999 * COIN,
                ..Default::default()
            }),
            commitment: honest.commitment,
            proof: honest.proof,
        };
        proof.state_proof = bogus.to_bytes().unwrap();
        proof.sign(&f.challenger);

        let hash = f.system.submit_fraud_proof(proof, NOW).unwrap();
        let report = f.system.verify_fraud_proof(&hash).unwrap();
        assert_eq!(report.result, FraudProofResult::Invalid);
    }

    #[test]
    fn test_rollback_reapplies_undone_mints() {
        let f = fixture();
        let (pre, _) = build_block(&f, 1);

        // a second burn minted after the disputed block
        let mint = L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: Hash256([9; 32]),
            recipient: bob(),
            amount: 5 * COIN,
        });
        let block = f.state.block_number();
        f.state.apply_system(&mint).unwrap();
        f.registry
            .record_burn(BurnRecord {
                l1_tx_hash: Hash256([9; 32]),
                l1_block_number: 11,
                l1_block_hash: Hash256([8; 32]),
                l2_recipient: bob(),
                amount: 5 * COIN,
                l2_mint_block: block,
                l2_mint_tx_hash: mint.hash(),
                timestamp: NOW,
            })
            .unwrap();

        let forged = Hash256([0xbb; 32]);
        f.system.register_state_root(forged, 1, DEADLINE);
        let hash = f.system.submit_fraud_proof(signed_proof(&f, forged, pre, 1), NOW).unwrap();
        let FraudProofResolution::Proven { remints, .. } = f.system.resolve(&hash, NOW).unwrap() else {
            panic!("expected proven fraud");
        };

        assert_eq!(remints, 1);
        assert_eq!(f.state.get_account(&bob()).balance, 5 * COIN);
        assert_eq!(f.state.get_account(&alice()).balance, 100 * COIN);
        assert!(f.registry.is_processed(&Hash256([9; 32])));
        assert_eq!(f.state.total_supply().unwrap(), f.registry.total_burned());
    }

    #[test]
    fn test_expire_returns_bond() {
        let f = fixture();
        let (pre, honest) = build_block(&f, 1);
        f.system.register_state_root(honest, 1, DEADLINE);
        let hash = f.system.submit_fraud_proof(signed_proof(&f, honest, pre, 1), NOW).unwrap();

        assert_eq!(f.system.expire_proof(&hash).unwrap(), FRAUD_PROOF_CHALLENGE_BOND);
        assert_eq!(f.system.result(&hash), Some(FraudProofResult::Expired));
        assert_eq!(f.system.ledger().total_bonds_held(), 0);
        assert!(matches!(f.system.resolve(&hash, NOW), Err(FraudProofError::AlreadyResolved(_))));
        assert_eq!(f.system.stats().expired, 1);
    }
}
