//! Bond and reward ledger
//!
//! Bonds, rewards and slashes are accounted here and settled on L1; they
//! never touch L2 balances, so the supply invariant is unaffected.

use crate::types::SlashingRecord;
use l1_integration::{Address, Amount, Hash256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Serializable view of the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Bond locked per fraud proof
    pub bonds: BTreeMap<Hash256, (Address, Amount)>,
    /// Rewards owed per address
    pub rewards: BTreeMap<Address, Amount>,
    pub slashing: Vec<SlashingRecord>,
    pub total_bonds_slashed: Amount,
    pub total_burned: Amount,
}

#[derive(Default)]
struct LedgerInner {
    bonds: HashMap<Hash256, (Address, Amount)>,
    rewards: HashMap<Address, Amount>,
    slashing: Vec<SlashingRecord>,
    total_bonds_slashed: Amount,
    total_burned: Amount,
}

/// Tracks challenge bonds, owed rewards and slashing history
#[derive(Default)]
pub struct BondLedger {
    inner: RwLock<LedgerInner>,
}

impl BondLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `amount` from `owner` against proof `id`
    pub fn lock_bond(&self, id: Hash256, owner: Address, amount: Amount) {
        self.inner.write().bonds.insert(id, (owner, amount));
        tracing::debug!("Locked bond of {} from {} for {}", amount, owner, id);
    }

    /// Release a bond to its owner
    pub fn return_bond(&self, id: &Hash256) -> Option<(Address, Amount)> {
        let released = self.inner.write().bonds.remove(id);
        if let Some((owner, amount)) = released {
            tracing::debug!("Returned bond of {} to {} for {}", amount, owner, id);
        }
        released
    }

    /// Slash a bond: `reward_percent` of it goes to `winner`, the rest is
    /// burned. Returns `(reward, burned)`.
    pub fn slash_bond(&self, id: &Hash256, winner: Address, reward_percent: u8) -> Option<(Amount, Amount)> {
        let mut inner = self.inner.write();
        let (loser, amount) = inner.bonds.remove(id)?;

        let reward = ((amount as u128 * reward_percent.min(100) as u128) / 100) as Amount;
        let burned = amount - reward;
        *inner.rewards.entry(winner).or_default() += reward;
        inner.total_bonds_slashed = inner.total_bonds_slashed.saturating_add(amount);
        inner.total_burned = inner.total_burned.saturating_add(burned);

        tracing::info!(
            "Slashed bond of {} from {}: {} to {}, {} burned",
            amount,
            loser,
            reward,
            winner,
            burned
        );
        Some((reward, burned))
    }

    /// Owe `amount` to `address`
    pub fn credit_reward(&self, address: Address, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.inner.write().rewards.entry(address).or_default() += amount;
    }

    pub fn record_slashing(&self, record: SlashingRecord) {
        self.inner.write().slashing.push(record);
    }

    pub fn slashing_records(&self, sequencer: &Address) -> Vec<SlashingRecord> {
        self.inner
            .read()
            .slashing
            .iter()
            .filter(|r| r.sequencer == *sequencer)
            .cloned()
            .collect()
    }

    pub fn all_slashing_records(&self) -> Vec<SlashingRecord> {
        self.inner.read().slashing.clone()
    }

    /// Stake taken from sequencers so far
    pub fn total_slashed(&self) -> Amount {
        self.inner.read().slashing.iter().map(|r| r.slashed_amount).sum()
    }

    pub fn bond(&self, id: &Hash256) -> Option<(Address, Amount)> {
        self.inner.read().bonds.get(id).copied()
    }

    /// Bonds currently locked by `address`
    pub fn bonds_held(&self, address: &Address) -> Amount {
        self.inner
            .read()
            .bonds
            .values()
            .filter(|(owner, _)| owner == address)
            .map(|(_, amount)| *amount)
            .sum()
    }

    pub fn total_bonds_held(&self) -> Amount {
        self.inner.read().bonds.values().map(|(_, amount)| *amount).sum()
    }

    pub fn rewards(&self, address: &Address) -> Amount {
        self.inner.read().rewards.get(address).copied().unwrap_or(0)
    }

    pub fn total_burned(&self) -> Amount {
        self.inner.read().total_burned
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.read();
        LedgerSnapshot {
            bonds: inner.bonds.iter().map(|(k, v)| (*k, *v)).collect(),
            rewards: inner.rewards.iter().map(|(k, v)| (*k, *v)).collect(),
            slashing: inner.slashing.clone(),
            total_bonds_slashed: inner.total_bonds_slashed,
            total_burned: inner.total_burned,
        }
    }

    /// Replace the ledger with a saved snapshot
    pub fn restore(&self, snapshot: LedgerSnapshot) {
        let mut inner = self.inner.write();
        inner.bonds = snapshot.bonds.into_iter().collect();
        inner.rewards = snapshot.rewards.into_iter().collect();
        inner.slashing = snapshot.slashing;
        inner.total_bonds_slashed = snapshot.total_bonds_slashed;
        inner.total_burned = snapshot.total_burned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FraudProofType;

    #[test]
    fn test_bond_lifecycle() {
        let ledger = BondLedger::new();
        let alice = Address([1; 20]);
        let bob = Address([2; 20]);

        ledger.lock_bond(Hash256([1; 32]), alice, 1_000);
        ledger.lock_bond(Hash256([2; 32]), alice, 500);
        assert_eq!(ledger.bonds_held(&alice), 1_500);

        assert_eq!(ledger.return_bond(&Hash256([1; 32])), Some((alice, 1_000)));
        assert_eq!(ledger.return_bond(&Hash256([1; 32])), None);

        assert_eq!(ledger.slash_bond(&Hash256([2; 32]), bob, 50), Some((250, 250)));
        assert_eq!(ledger.rewards(&bob), 250);
        assert_eq!(ledger.total_burned(), 250);
        assert_eq!(ledger.total_bonds_held(), 0);
        assert_eq!(ledger.slash_bond(&Hash256([2; 32]), bob, 50), None);
    }

    #[test]
    fn test_slashing_records_and_restore() {
        let ledger = BondLedger::new();
        let seq = Address([3; 20]);
        ledger.record_slashing(SlashingRecord {
            sequencer: seq,
            slashed_amount: 70,
            fraud_proof_hash: Hash256([4; 32]),
            proof_type: FraudProofType::DoubleSpend,
            challenger: Address([5; 20]),
            challenger_reward: 35,
            slashed_at: 10,
            block_number: 2,
            reputation_penalty: 40,
        });
        ledger.credit_reward(Address([5; 20]), 35);
        ledger.lock_bond(Hash256([6; 32]), Address([5; 20]), 9);

        assert_eq!(ledger.total_slashed(), 70);
        assert_eq!(ledger.slashing_records(&seq).len(), 1);
        assert!(ledger.slashing_records(&Address([9; 20])).is_empty());

        let restored = BondLedger::new();
        restored.restore(ledger.snapshot());
        assert_eq!(restored.snapshot(), ledger.snapshot());
        assert_eq!(restored.rewards(&Address([5; 20])), 35);
    }
}
