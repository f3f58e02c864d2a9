//! Fraud proof and withdrawal persistence on top of the runtime's sled store
//!
//! Interactive sessions are short-lived and are not persisted; a session
//! interrupted by a restart times out and settles through its proof.

use crate::challenge::{ChallengeHandler, ChallengerStats, WithdrawalChallenge};
use crate::fraud_proof::{CommittedRoot, FraudProofSystem, StoredProof};
use crate::ledger::LedgerSnapshot;
use crate::withdrawal::WithdrawalRequest;
use l1_integration::Address;
use l2_runtime::PersistentStore;

pub const WITHDRAWALS_TREE: &str = "withdrawals";
pub const CHALLENGES_TREE: &str = "challenges";
pub const CHALLENGERS_TREE: &str = "challengers";
pub const FRAUD_PROOFS_TREE: &str = "fraud_proofs";
pub const SLASHING_TREE: &str = "slashing";
pub const STATE_ROOTS_TREE: &str = "state_roots";

const LEDGER_KEY: &[u8] = b"ledger";

/// Extension trait to add persistence to ChallengeHandler
pub trait ChallengePersistence {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;
}

impl ChallengePersistence for ChallengeHandler {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let withdrawals = self.all_withdrawals();
        let challenges = self.all_challenges();
        let challengers = self.all_challenger_stats();

        store.clear_tree(WITHDRAWALS_TREE)?;
        for w in &withdrawals {
            store.put_record(WITHDRAWALS_TREE, w.withdrawal_id.as_ref(), w)?;
        }
        store.clear_tree(CHALLENGES_TREE)?;
        for c in &challenges {
            store.put_record(CHALLENGES_TREE, c.challenge_id.as_ref(), c)?;
        }
        store.clear_tree(CHALLENGERS_TREE)?;
        for entry in &challengers {
            store.put_record(CHALLENGERS_TREE, entry.0.as_ref(), entry)?;
        }
        store.flush()?;

        tracing::info!(
            "Saved {} withdrawals, {} challenges, {} challengers to disk",
            withdrawals.len(),
            challenges.len(),
            challengers.len()
        );
        Ok(withdrawals.len() + challenges.len())
    }

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let withdrawals: Vec<WithdrawalRequest> = store.records(WITHDRAWALS_TREE)?;
        let challenges: Vec<WithdrawalChallenge> = store.records(CHALLENGES_TREE)?;
        let challengers: Vec<(Address, ChallengerStats)> = store.records(CHALLENGERS_TREE)?;
        let count = withdrawals.len() + challenges.len();

        for w in withdrawals {
            self.restore_withdrawal(w);
        }
        for c in challenges {
            self.restore_challenge(c);
        }
        for (address, stats) in challengers {
            self.restore_challenger(address, stats);
        }
        tracing::info!("Loaded {} withdrawals and challenges from disk", count);
        Ok(count)
    }
}

/// Extension trait to add persistence to FraudProofSystem
pub trait FraudProofPersistence {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;
}

impl FraudProofPersistence for FraudProofSystem {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let proofs = self.stored_proofs();
        let roots = self.committed_roots();

        store.clear_tree(FRAUD_PROOFS_TREE)?;
        for stored in &proofs {
            store.put_record(FRAUD_PROOFS_TREE, stored.proof.hash().as_ref(), stored)?;
        }
        store.clear_tree(STATE_ROOTS_TREE)?;
        for root in &roots {
            store.put_record(STATE_ROOTS_TREE, root.state_root.as_ref(), root)?;
        }
        store.put_record(SLASHING_TREE, LEDGER_KEY, &self.ledger().snapshot())?;
        store.flush()?;

        tracing::info!("Saved {} fraud proofs and {} committed roots to disk", proofs.len(), roots.len());
        Ok(proofs.len())
    }

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let proofs: Vec<StoredProof> = store.records(FRAUD_PROOFS_TREE)?;
        let roots: Vec<CommittedRoot> = store.records(STATE_ROOTS_TREE)?;
        let count = proofs.len();

        for stored in proofs {
            self.restore_proof(stored);
        }
        for root in roots {
            self.register_commitment(root);
        }
        if let Some(ledger) = store.get_record::<LedgerSnapshot>(SLASHING_TREE, LEDGER_KEY)? {
            self.ledger().restore(ledger);
        }
        tracing::info!("Loaded {} fraud proofs from disk", count);
        Ok(count)
    }
}
