//! Persistence Layer for L2 State
//!
//! Uses sled embedded database to persist account state across restarts.
//! State is saved periodically and on shutdown. Other services keep their
//! records in named trees of the same database through the generic record
//! helpers.

use crate::account::{AccountState, ArchivedAccount};
use crate::smt::SparseMerkleTree;
use crate::state_manager::StateManager;
use crate::world::WorldState;
use l1_integration::{Address, Hash256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::Db;
use std::collections::BTreeMap;
use std::path::Path;

const ACCOUNTS_TREE: &str = "accounts";
const STORAGE_TREE: &str = "storage";
const CODE_TREE: &str = "code";
const ARCHIVED_TREE: &str = "archived";
const METADATA_TREE: &str = "metadata";

/// Metadata about the chain state
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainMetadata {
    /// Open L2 block at save time
    pub block_number: u64,
    /// State root the loaded accounts must reproduce
    pub state_root: Hash256,
    /// Live accounts stored
    pub account_count: u64,
    /// Highest L1 block fully processed
    pub last_l1_block: u64,
    /// Last save timestamp
    pub last_save_ts: i64,
}

/// Persistent storage for L2 state
pub struct PersistentStore {
    /// Sled database instance
    db: Db,
    /// Account records keyed by address
    accounts: sled::Tree,
    /// Contract storage keyed by address ‖ slot
    storage: sled::Tree,
    /// Contract code keyed by code hash
    code: sled::Tree,
    /// Archived accounts keyed by address
    archived: sled::Tree,
    /// Metadata tree
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let accounts = db.open_tree(ACCOUNTS_TREE)?;
        let storage = db.open_tree(STORAGE_TREE)?;
        let code = db.open_tree(CODE_TREE)?;
        let archived = db.open_tree(ARCHIVED_TREE)?;
        let metadata = db.open_tree(METADATA_TREE)?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self {
            db,
            accounts,
            storage,
            code,
            archived,
            metadata,
        })
    }

    /// Store an account
    pub fn store_account(&self, address: &Address, account: &AccountState) -> anyhow::Result<()> {
        let bytes = bincode::serialize(account)?;
        self.accounts.insert(address.as_ref(), bytes)?;
        Ok(())
    }

    /// Get an account
    pub fn get_account(&self, address: &Address) -> anyhow::Result<Option<AccountState>> {
        match self.accounts.get(address.as_ref())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get all accounts (for loading into memory)
    pub fn get_all_accounts(&self) -> anyhow::Result<Vec<(Address, AccountState)>> {
        let mut accounts = Vec::new();
        for result in self.accounts.iter() {
            let (key, value) = result?;
            let address = Address::from_slice(&key).ok_or_else(|| anyhow::anyhow!("Invalid address length"))?;
            let account: AccountState = bincode::deserialize(&value)?;
            accounts.push((address, account));
        }
        Ok(accounts)
    }

    fn get_all_storage(&self) -> anyhow::Result<BTreeMap<Address, SparseMerkleTree>> {
        let mut storage: BTreeMap<Address, SparseMerkleTree> = BTreeMap::new();
        for result in self.storage.iter() {
            let (key, value) = result?;
            if key.len() != Address::LEN + Hash256::LEN {
                anyhow::bail!("Invalid storage key length {}", key.len());
            }
            let address = Address::from_slice(&key[..Address::LEN])
                .ok_or_else(|| anyhow::anyhow!("Invalid storage address"))?;
            let slot = Hash256::from_slice(&key[Address::LEN..])
                .ok_or_else(|| anyhow::anyhow!("Invalid storage slot"))?;
            storage.entry(address).or_default().put(&slot, &value);
        }
        Ok(storage)
    }

    fn get_all_code(&self) -> anyhow::Result<BTreeMap<Hash256, Vec<u8>>> {
        let mut code = BTreeMap::new();
        for result in self.code.iter() {
            let (key, value) = result?;
            let hash = Hash256::from_slice(&key).ok_or_else(|| anyhow::anyhow!("Invalid code hash length"))?;
            code.insert(hash, value.to_vec());
        }
        Ok(code)
    }

    fn get_all_archived(&self) -> anyhow::Result<BTreeMap<Address, ArchivedAccount>> {
        let mut archived = BTreeMap::new();
        for result in self.archived.iter() {
            let (key, value) = result?;
            let address = Address::from_slice(&key).ok_or_else(|| anyhow::anyhow!("Invalid address length"))?;
            archived.insert(address, bincode::deserialize(&value)?);
        }
        Ok(archived)
    }

    /// Write a complete world, replacing whatever was stored
    pub fn store_world(&self, world: &WorldState) -> anyhow::Result<usize> {
        self.accounts.clear()?;
        self.storage.clear()?;
        self.code.clear()?;
        self.archived.clear()?;

        let accounts = world.accounts()?;
        for (address, account) in &accounts {
            self.store_account(address, account)?;
        }

        for (address, tree) in world.storage_entries() {
            for (slot, value) in tree.entries() {
                let mut key = Vec::with_capacity(Address::LEN + Hash256::LEN);
                key.extend_from_slice(address.as_ref());
                key.extend_from_slice(slot.as_ref());
                self.storage.insert(key, value)?;
            }
        }

        for (hash, code) in world.code_entries() {
            self.code.insert(hash.as_ref(), code.as_slice())?;
        }

        for (address, archived) in world.archived_accounts() {
            self.archived.insert(address.as_ref(), bincode::serialize(archived)?)?;
        }

        Ok(accounts.len())
    }

    /// Rebuild the stored world
    pub fn load_world(&self, block_number: u64) -> anyhow::Result<WorldState> {
        Ok(WorldState::from_parts(
            self.get_all_accounts()?,
            self.get_all_storage()?,
            self.get_all_code()?,
            self.get_all_archived()?,
            block_number,
        ))
    }

    /// Save chain metadata
    pub fn save_metadata(&self, metadata: &ChainMetadata) -> anyhow::Result<()> {
        let bytes = bincode::serialize(metadata)?;
        self.metadata.insert("chain", bytes)?;
        Ok(())
    }

    /// Load chain metadata
    pub fn load_metadata(&self) -> anyhow::Result<Option<ChainMetadata>> {
        match self.metadata.get("chain")? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record the highest processed L1 block
    pub fn set_last_l1_block(&self, l1_block: u64) -> anyhow::Result<()> {
        let mut metadata = self.load_metadata()?.unwrap_or_default();
        metadata.last_l1_block = l1_block;
        self.save_metadata(&metadata)
    }

    /// Store a serde record in a named tree
    pub fn put_record<T: Serialize>(&self, tree: &str, key: &[u8], value: &T) -> anyhow::Result<()> {
        let bytes = bincode::serialize(value)?;
        self.db.open_tree(tree)?.insert(key, bytes)?;
        Ok(())
    }

    /// Load a serde record from a named tree
    pub fn get_record<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> anyhow::Result<Option<T>> {
        match self.db.open_tree(tree)?.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a record from a named tree
    pub fn remove_record(&self, tree: &str, key: &[u8]) -> anyhow::Result<()> {
        self.db.open_tree(tree)?.remove(key)?;
        Ok(())
    }

    /// All records of a named tree in key order
    pub fn records<T: DeserializeOwned>(&self, tree: &str) -> anyhow::Result<Vec<T>> {
        let mut out = Vec::new();
        for result in self.db.open_tree(tree)?.iter() {
            let (_, value) = result?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Remove every record of a named tree
    pub fn clear_tree(&self, tree: &str) -> anyhow::Result<()> {
        self.db.open_tree(tree)?.clear()?;
        Ok(())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the number of stored accounts
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Clear all state data (for testing)
    pub fn clear(&self) -> anyhow::Result<()> {
        self.accounts.clear()?;
        self.storage.clear()?;
        self.code.clear()?;
        self.archived.clear()?;
        self.metadata.clear()?;
        Ok(())
    }
}

/// Extension trait to add persistence to StateManager
pub trait StateManagerPersistence {
    /// Save the current world to persistent storage
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;

    /// Load the world from persistent storage, verifying its root
    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;
}

impl StateManagerPersistence for StateManager {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let world = self.view();
        let block_number = self.block_number();
        let count = store.store_world(&world)?;

        let previous = store.load_metadata()?.unwrap_or_default();
        store.save_metadata(&ChainMetadata {
            block_number,
            state_root: world.root(),
            account_count: count as u64,
            last_l1_block: previous.last_l1_block,
            last_save_ts: chrono::Utc::now().timestamp(),
        })?;

        store.flush()?;
        tracing::info!("Saved {} accounts to disk at block {}, root {}", count, block_number, world.root());

        Ok(count)
    }

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let metadata = match store.load_metadata()? {
            Some(metadata) => metadata,
            None => {
                tracing::info!("No saved state found, starting from genesis");
                return Ok(0);
            }
        };

        let world = store.load_world(metadata.block_number)?;
        if world.root() != metadata.state_root {
            anyhow::bail!(
                "Loaded state root {} does not match saved root {}",
                world.root(),
                metadata.state_root
            );
        }

        let count = store.account_count();
        self.load_world(world);
        tracing::info!("Loaded {} accounts from disk at block {}", count, metadata.block_number);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{L2Transaction, TransactionKind};
    use tempfile::tempdir;

    fn populated() -> StateManager {
        let sm = StateManager::default();
        for (i, amount) in [100u64, 250, 7].iter().enumerate() {
            sm.apply_system(&L2Transaction::system(TransactionKind::Mint {
                l1_tx_hash: Hash256([i as u8; 32]),
                recipient: Address([i as u8 + 1; 20]),
                amount: *amount,
            }))
            .unwrap();
        }
        sm.seal_block();
        sm
    }

    #[test]
    fn test_store_and_load_account() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();

        let address = Address([7; 20]);
        let account = AccountState {
            balance: 1000,
            nonce: 4,
            reputation: 55,
            last_activity_block: 42,
            ..AccountState::default()
        };

        store.store_account(&address, &account).unwrap();
        store.flush().unwrap();

        assert_eq!(store.get_account(&address).unwrap(), Some(account));
        assert_eq!(store.get_account(&Address([8; 20])).unwrap(), None);
    }

    #[test]
    fn test_state_round_trip() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();

        let sm = populated();
        sm.archive_inactive(100, 10).unwrap();
        sm.apply_system(&L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: Hash256([9; 32]),
            recipient: Address([9; 20]),
            amount: 1,
        }))
        .unwrap();
        assert_eq!(sm.save_to_disk(&store).unwrap(), 1);

        let loaded = StateManager::default();
        loaded.load_from_disk(&store).unwrap();
        assert_eq!(loaded.state_root(), sm.state_root());
        assert_eq!(loaded.block_number(), sm.block_number());
        assert_eq!(loaded.archived_count(), 3);
        assert_eq!(loaded.total_supply().unwrap(), 358);
    }

    #[test]
    fn test_load_rejects_root_mismatch() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        populated().save_to_disk(&store).unwrap();

        store
            .store_account(&Address([1; 20]), &AccountState::with_balance(1_000_000))
            .unwrap();

        let loaded = StateManager::default();
        assert!(loaded.load_from_disk(&store).is_err());
        assert_eq!(loaded.state_root(), crate::world::WorldState::new(0).root());
    }

    #[test]
    fn test_metadata_and_records() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        assert!(store.load_metadata().unwrap().is_none());

        store.set_last_l1_block(812).unwrap();
        let loaded = store.load_metadata().unwrap().unwrap();
        assert_eq!(loaded.last_l1_block, 812);

        store.put_record("notes", b"a", &(1u64, "one".to_string())).unwrap();
        store.put_record("notes", b"b", &(2u64, "two".to_string())).unwrap();
        let all: Vec<(u64, String)> = store.records("notes").unwrap();
        assert_eq!(all.len(), 2);
        store.remove_record("notes", b"a").unwrap();
        let one: Option<(u64, String)> = store.get_record("notes", b"a").unwrap();
        assert!(one.is_none());
        store.clear_tree("notes").unwrap();
        assert!(store.records::<(u64, String)>("notes").unwrap().is_empty());
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        assert_eq!(StateManager::default().load_from_disk(&store).unwrap(), 0);
    }
}
