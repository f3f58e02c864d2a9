//! Registry persistence on top of the runtime's sled store

use crate::burn_registry::{BurnRecord, BurnRegistry, RecordOutcome};
use l2_runtime::PersistentStore;

/// Tree holding burn records keyed by L1 transaction hash
pub const BURNS_TREE: &str = "burns";

/// Extension trait to add persistence to BurnRegistry
pub trait BurnRegistryPersistence {
    /// Replace the stored records with the registry's records
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;

    /// Load stored records into the registry
    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;
}

impl BurnRegistryPersistence for BurnRegistry {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let records = self.records();
        store.clear_tree(BURNS_TREE)?;
        for record in &records {
            store.put_record(BURNS_TREE, record.l1_tx_hash.as_ref(), record)?;
        }
        store.flush()?;
        tracing::info!("Saved {} burn records to disk", records.len());
        Ok(records.len())
    }

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let records: Vec<BurnRecord> = store.records(BURNS_TREE)?;
        let mut count = 0;
        for record in records {
            if self.record_burn(record)? == RecordOutcome::Recorded {
                count += 1;
            }
        }
        tracing::info!("Loaded {} burn records from disk", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l1_integration::{Address, Hash256};
    use tempfile::tempdir;

    #[test]
    fn test_registry_round_trip() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();

        let registry = BurnRegistry::new();
        for tag in 1..=3u8 {
            registry
                .record_burn(BurnRecord {
                    l1_tx_hash: Hash256([tag; 32]),
                    l1_block_number: 100 + tag as u64,
                    l1_block_hash: Hash256([tag + 10; 32]),
                    l2_recipient: Address([tag; 20]),
                    amount: 1_000 * tag as u64,
                    l2_mint_block: tag as u64,
                    l2_mint_tx_hash: Hash256([tag + 20; 32]),
                    timestamp: 1_700_000_000,
                })
                .unwrap();
        }
        assert_eq!(registry.save_to_disk(&store).unwrap(), 3);

        let loaded = BurnRegistry::new();
        assert_eq!(loaded.load_from_disk(&store).unwrap(), 3);
        assert_eq!(loaded.records(), registry.records());
        assert_eq!(loaded.total_burned(), 6_000);

        registry.rollback_after(2);
        registry.save_to_disk(&store).unwrap();
        let reloaded = BurnRegistry::new();
        assert_eq!(reloaded.load_from_disk(&store).unwrap(), 1);
    }
}
