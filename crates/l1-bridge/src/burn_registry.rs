//! Registry of processed burns
//!
//! The registry is the double-mint guard: a burn hash is recorded at most
//! once. Records only disappear through reorg rollback or when a mint that
//! recorded them is undone.

use crate::error::RegistryError;
use l1_integration::{Address, Amount, Hash256};
use l2_runtime::L2Transaction;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A burn that has been minted on L2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    pub l1_tx_hash: Hash256,
    pub l1_block_number: u64,
    pub l1_block_hash: Hash256,
    pub l2_recipient: Address,
    pub amount: Amount,
    pub l2_mint_block: u64,
    pub l2_mint_tx_hash: Hash256,
    pub timestamp: u64,
}

/// Outcome of `record_burn`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The hash was already recorded; nothing changed
    Duplicate,
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<Hash256, BurnRecord>,
    by_address: HashMap<Address, BTreeSet<Hash256>>,
    by_l2_block: BTreeMap<u64, BTreeSet<Hash256>>,
}

impl RegistryInner {
    fn insert(&mut self, record: BurnRecord) {
        self.by_address
            .entry(record.l2_recipient)
            .or_default()
            .insert(record.l1_tx_hash);
        self.by_l2_block
            .entry(record.l2_mint_block)
            .or_default()
            .insert(record.l1_tx_hash);
        self.records.insert(record.l1_tx_hash, record);
    }

    fn remove(&mut self, hash: &Hash256) -> Option<BurnRecord> {
        let record = self.records.remove(hash)?;
        if let Some(set) = self.by_address.get_mut(&record.l2_recipient) {
            set.remove(hash);
            if set.is_empty() {
                self.by_address.remove(&record.l2_recipient);
            }
        }
        if let Some(set) = self.by_l2_block.get_mut(&record.l2_mint_block) {
            set.remove(hash);
            if set.is_empty() {
                self.by_l2_block.remove(&record.l2_mint_block);
            }
        }
        Some(record)
    }
}

/// Thread-safe registry of processed burns
#[derive(Default)]
pub struct BurnRegistry {
    inner: RwLock<RegistryInner>,
}

impl BurnRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the burn has already been minted
    pub fn is_processed(&self, l1_tx_hash: &Hash256) -> bool {
        self.inner.read().records.contains_key(l1_tx_hash)
    }

    fn validate(record: &BurnRecord) -> Result<(), RegistryError> {
        if record.amount == 0 {
            return Err(RegistryError::InvalidRecord {
                hash: record.l1_tx_hash,
                reason: "zero amount".to_string(),
            });
        }
        if record.l1_tx_hash.is_zero() {
            return Err(RegistryError::InvalidRecord {
                hash: record.l1_tx_hash,
                reason: "zero L1 transaction hash".to_string(),
            });
        }
        Ok(())
    }

    /// What `record_burn` would do with `record`, without recording it
    pub fn check_record(&self, record: &BurnRecord) -> Result<RecordOutcome, RegistryError> {
        Self::validate(record)?;
        if self.is_processed(&record.l1_tx_hash) {
            return Ok(RecordOutcome::Duplicate);
        }
        Ok(RecordOutcome::Recorded)
    }

    /// Record a minted burn; recording the same hash twice is a no-op
    pub fn record_burn(&self, record: BurnRecord) -> Result<RecordOutcome, RegistryError> {
        Self::validate(&record)?;

        let mut inner = self.inner.write();
        if inner.records.contains_key(&record.l1_tx_hash) {
            tracing::warn!("Burn {} already recorded, ignoring duplicate", record.l1_tx_hash);
            return Ok(RecordOutcome::Duplicate);
        }

        tracing::info!(
            "Recorded burn {} ({} to {}) at L2 block {}",
            record.l1_tx_hash,
            record.amount,
            record.l2_recipient,
            record.l2_mint_block
        );
        inner.insert(record);
        Ok(RecordOutcome::Recorded)
    }

    /// Remove every record the predicate selects
    pub fn rollback_where<F>(&self, mut predicate: F) -> Vec<BurnRecord>
    where
        F: FnMut(&BurnRecord) -> bool,
    {
        let mut inner = self.inner.write();
        let doomed: Vec<Hash256> = inner
            .records
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.l1_tx_hash)
            .collect();

        let mut removed: Vec<BurnRecord> = doomed.iter().filter_map(|h| inner.remove(h)).collect();
        removed.sort_by_key(|r| (r.l2_mint_block, r.l1_tx_hash));
        removed
    }

    /// Records whose mint does not survive a rewind to `open_block` with
    /// `kept` still logged in it: anything minted after the open block, and
    /// mints in it that are no longer logged. Nothing is removed.
    pub fn reverted_by(&self, open_block: u64, kept: &[L2Transaction]) -> Vec<BurnRecord> {
        let kept: HashSet<Hash256> = kept.iter().map(|tx| tx.hash()).collect();
        let inner = self.inner.read();
        let mut reverted: Vec<BurnRecord> = inner
            .by_l2_block
            .range(open_block..)
            .flat_map(|(_, set)| set.iter())
            .filter_map(|h| inner.records.get(h))
            .filter(|r| r.l2_mint_block > open_block || !kept.contains(&r.l2_mint_tx_hash))
            .cloned()
            .collect();
        reverted.sort_by_key(|r| (r.l2_mint_block, r.l1_tx_hash));
        reverted
    }

    /// Drop `removed` and insert `restored` as one step, so no reader sees
    /// the registry between the two. Returns the records dropped.
    pub fn apply_rollback(&self, removed: &[Hash256], restored: Vec<BurnRecord>) -> Vec<BurnRecord> {
        let mut inner = self.inner.write();
        let dropped: Vec<BurnRecord> = removed.iter().filter_map(|h| inner.remove(h)).collect();
        for record in restored {
            if inner.records.contains_key(&record.l1_tx_hash) {
                tracing::warn!("Burn {} already recorded, not restoring", record.l1_tx_hash);
                continue;
            }
            inner.insert(record);
        }
        dropped
    }

    /// Remove records minted at or after `l2_block`
    pub fn rollback_after(&self, l2_block: u64) -> Vec<BurnRecord> {
        let removed = self.rollback_where(|r| r.l2_mint_block >= l2_block);
        if !removed.is_empty() {
            tracing::warn!("Rolled back {} burns minted at or after L2 block {}", removed.len(), l2_block);
        }
        removed
    }

    /// Remove records whose burn sits above `l1_block`
    pub fn rollback_l1_after(&self, l1_block: u64) -> Vec<BurnRecord> {
        let removed = self.rollback_where(|r| r.l1_block_number > l1_block);
        if !removed.is_empty() {
            tracing::warn!("Rolled back {} burns from L1 blocks above {}", removed.len(), l1_block);
        }
        removed
    }

    /// Get a record
    pub fn get(&self, l1_tx_hash: &Hash256) -> Option<BurnRecord> {
        self.inner.read().records.get(l1_tx_hash).cloned()
    }

    /// Burns credited to an address
    pub fn burns_for_address(&self, address: &Address) -> Vec<BurnRecord> {
        let inner = self.inner.read();
        inner
            .by_address
            .get(address)
            .map(|set| set.iter().filter_map(|h| inner.records.get(h).cloned()).collect())
            .unwrap_or_default()
    }

    /// Burns minted in L2 blocks `from..=to`
    pub fn burns_in_l2_range(&self, from: u64, to: u64) -> Vec<BurnRecord> {
        if from > to {
            return Vec::new();
        }
        let inner = self.inner.read();
        inner
            .by_l2_block
            .range(from..=to)
            .flat_map(|(_, set)| set.iter())
            .filter_map(|h| inner.records.get(h).cloned())
            .collect()
    }

    /// Sum of all recorded burns
    pub fn total_burned(&self) -> u128 {
        self.inner.read().records.values().map(|r| r.amount as u128).sum()
    }

    /// Number of recorded burns
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Remove a single record
    pub fn remove(&self, l1_tx_hash: &Hash256) -> Option<BurnRecord> {
        self.inner.write().remove(l1_tx_hash)
    }

    /// All records ordered by mint block
    pub fn records(&self) -> Vec<BurnRecord> {
        let inner = self.inner.read();
        inner
            .by_l2_block
            .values()
            .flat_map(|set| set.iter())
            .filter_map(|h| inner.records.get(h).cloned())
            .collect()
    }

    /// Clear all records (for testing)
    pub fn clear(&self) {
        *self.inner.write() = RegistryInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l1_integration::COIN;

    fn record(tag: u8, l1_block: u64, l2_block: u64, amount: Amount) -> BurnRecord {
        BurnRecord {
            l1_tx_hash: Hash256([tag; 32]),
            l1_block_number: l1_block,
            l1_block_hash: Hash256([l1_block as u8; 32]),
            l2_recipient: Address([tag % 3 + 1; 20]),
            amount,
            l2_mint_block: l2_block,
            l2_mint_tx_hash: Hash256([tag.wrapping_add(100); 32]),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_record_is_idempotent() {
        let registry = BurnRegistry::new();
        let h1 = record(1, 100, 5, 100 * COIN);

        assert!(!registry.is_processed(&h1.l1_tx_hash));
        assert_eq!(registry.record_burn(h1.clone()).unwrap(), RecordOutcome::Recorded);
        assert!(registry.is_processed(&h1.l1_tx_hash));

        let mut again = h1.clone();
        again.amount = 1;
        assert_eq!(registry.record_burn(again).unwrap(), RecordOutcome::Duplicate);
        assert_eq!(registry.get(&h1.l1_tx_hash).unwrap().amount, 100 * COIN);
        assert_eq!(registry.total_burned(), (100 * COIN) as u128);
    }

    #[test]
    fn test_rejects_invalid_records() {
        let registry = BurnRegistry::new();
        assert!(registry.record_burn(record(1, 1, 1, 0)).is_err());
        assert!(registry.record_burn(record(0, 1, 1, 5)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rollback_after() {
        let registry = BurnRegistry::new();
        for (tag, l2) in [(1u8, 3u64), (2, 5), (3, 5), (4, 8)] {
            registry.record_burn(record(tag, 100 + tag as u64, l2, 10)).unwrap();
        }

        let removed = registry.rollback_after(5);
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[0].l2_mint_block, 5);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_processed(&Hash256([1; 32])));
        assert!(!registry.is_processed(&Hash256([4; 32])));
    }

    #[test]
    fn test_reverted_by_and_apply_rollback() {
        use l2_runtime::TransactionKind;

        let registry = BurnRegistry::new();
        let mint = |tag: u8| {
            L2Transaction::system(TransactionKind::Mint {
                l1_tx_hash: Hash256([tag; 32]),
                recipient: Address([tag; 20]),
                amount: 10,
            })
        };

        // block 0 keeps the first mint, the second is rewound away
        let (first, second, third) = (mint(1), mint(2), mint(3));
        for (tag, tx, l2_block) in [(1u8, &first, 0u64), (2, &second, 0), (3, &third, 1)] {
            let mut r = record(tag, 100, l2_block, 10);
            r.l2_mint_tx_hash = tx.hash();
            registry.record_burn(r).unwrap();
        }

        let reverted = registry.reverted_by(0, std::slice::from_ref(&first));
        let hashes: Vec<Hash256> = reverted.iter().map(|r| r.l1_tx_hash).collect();
        assert_eq!(hashes, vec![Hash256([2; 32]), Hash256([3; 32])]);
        assert_eq!(registry.len(), 3);

        // the second mint comes back in block 0 under the same burn
        let mut again = reverted[0].clone();
        again.l2_mint_block = 0;
        let dropped = registry.apply_rollback(&hashes, vec![again]);
        assert_eq!(dropped.len(), 2);
        assert!(registry.is_processed(&Hash256([1; 32])));
        assert!(registry.is_processed(&Hash256([2; 32])));
        assert!(!registry.is_processed(&Hash256([3; 32])));
        assert_eq!(registry.total_burned(), 20);
    }

    #[test]
    fn test_check_record_does_not_record() {
        let registry = BurnRegistry::new();
        let r = record(1, 100, 5, 10);
        assert_eq!(registry.check_record(&r).unwrap(), RecordOutcome::Recorded);
        assert!(registry.is_empty());

        registry.record_burn(r.clone()).unwrap();
        assert_eq!(registry.check_record(&r).unwrap(), RecordOutcome::Duplicate);
        assert!(registry.check_record(&record(2, 1, 1, 0)).is_err());
    }

    #[test]
    fn test_rollback_l1_after() {
        let registry = BurnRegistry::new();
        registry.record_burn(record(1, 100, 1, 10)).unwrap();
        registry.record_burn(record(2, 105, 2, 10)).unwrap();
        let removed = registry.rollback_l1_after(102);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].l1_block_number, 105);
    }

    #[test]
    fn test_queries() {
        let registry = BurnRegistry::new();
        registry.record_burn(record(1, 100, 1, 10)).unwrap();
        registry.record_burn(record(4, 101, 2, 20)).unwrap();
        registry.record_burn(record(2, 102, 3, 30)).unwrap();

        // tags 1 and 4 share a recipient
        let alice = Address([2; 20]);
        assert_eq!(registry.burns_for_address(&alice).len(), 2);
        assert_eq!(registry.burns_in_l2_range(2, 3).len(), 2);
        assert!(registry.burns_in_l2_range(3, 2).is_empty());
        assert_eq!(registry.total_burned(), 60);

        let ordered: Vec<u64> = registry.records().iter().map(|r| r.l2_mint_block).collect();
        assert_eq!(ordered, vec![1, 2, 3]);

        assert!(registry.remove(&Hash256([4; 32])).is_some());
        assert_eq!(registry.burns_for_address(&alice).len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
