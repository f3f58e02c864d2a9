//! Account State Manager
//!
//! Owns the live `WorldState` and every historical handle into it: snapshots,
//! sealed block roots and the block log. All writes go through one
//! `parking_lot::RwLock`; readers clone the persistent world and never hold
//! the lock while they work.

use crate::account::{AccountState, ArchivedAccount};
use crate::error::StateError;
use crate::executor::{ContractExecutor, NoopExecutor, StateView};
use crate::smt::{SmtProof, SparseMerkleTree};
use crate::trace::{step_count, ExecutionTrace};
use crate::transaction::{transactions_root, L2Transaction, TransactionKind};
use crate::world::{ExecContext, ExecOutcome, StateCommitment, WorldState};
use l1_integration::{Address, Hash256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Snapshots kept before the oldest is evicted
pub const MAX_STATE_SNAPSHOTS: usize = 100;

/// Largest batch accepted by `apply_batch`
pub const MAX_BATCH_SIZE: usize = 1000;

/// Sealed blocks kept in the block log
pub const MAX_RETAINED_BLOCKS: usize = 10_000;

/// State manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateManagerConfig {
    pub max_snapshots: usize,
    pub max_batch_size: usize,
    pub max_retained_blocks: usize,
    /// Transactions per checkpoint in execution traces
    pub trace_step_size: usize,
    /// Only sender allowed to submit `SetReputation`
    pub reputation_authority: Option<Address>,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            max_snapshots: MAX_STATE_SNAPSHOTS,
            max_batch_size: MAX_BATCH_SIZE,
            max_retained_blocks: MAX_RETAINED_BLOCKS,
            trace_step_size: 1,
            reputation_authority: None,
        }
    }
}

/// Handle returned by `snapshot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub id: u64,
    pub state_root: Hash256,
    pub block_number: u64,
}

/// One L2 block of the transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub pre_state_root: Hash256,
    pub post_state_root: Hash256,
    pub transactions: Vec<L2Transaction>,
}

impl BlockRecord {
    /// Commitment to the block's transactions
    pub fn transactions_root(&self) -> Hash256 {
        transactions_root(&self.transactions)
    }

    fn open(number: u64, pre_state_root: Hash256) -> Self {
        Self {
            number,
            pre_state_root,
            post_state_root: pre_state_root,
            transactions: Vec::new(),
        }
    }
}

/// Account together with its inclusion (or absence) proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProof {
    pub address: Address,
    pub account: Option<AccountState>,
    pub state_root: Hash256,
    /// Tree roots behind `state_root`; `proof` is against `commitment.accounts`
    pub commitment: StateCommitment,
    pub proof: SmtProof,
}

/// Where `rebuild` starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindTarget {
    Snapshot(SnapshotHandle),
    Root(Hash256),
}

/// Working copy handed to the `rebuild` closure
///
/// It starts at the rewind point with the open block as it was then.
/// Nothing applied here is visible to readers until `rebuild` swaps it in.
pub struct Rebuild<'a> {
    world: WorldState,
    open_block: BlockRecord,
    reverted_root: Hash256,
    kept: usize,
    logged: Vec<L2Transaction>,
    user: ExecContext<'a>,
    system: ExecContext<'a>,
}

impl Rebuild<'_> {
    /// Number of the open block at the rewind point
    pub fn block_number(&self) -> u64 {
        self.open_block.number
    }

    /// Root at the rewind point
    pub fn reverted_root(&self) -> Hash256 {
        self.reverted_root
    }

    /// Transactions of the open block that survive the rewind
    pub fn kept(&self) -> &[L2Transaction] {
        &self.open_block.transactions[..self.kept]
    }

    /// Transactions logged after the rewind point, in order
    pub fn logged(&self) -> &[L2Transaction] {
        &self.logged
    }

    pub fn take_logged(&mut self) -> Vec<L2Transaction> {
        std::mem::take(&mut self.logged)
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Execute `tx` on the working copy and log it in the open block. A
    /// failed transaction leaves the copy untouched.
    pub fn apply(&mut self, tx: &L2Transaction) -> Result<Hash256, StateError> {
        let ctx = if tx.is_system() { &self.system } else { &self.user };
        let mut next = self.world.clone();
        next.execute(tx, ctx)?;
        let root = next.root();

        self.world = next;
        self.open_block.transactions.push(tx.clone());
        self.open_block.post_state_root = root;
        Ok(root)
    }
}

/// Restorable point: the world plus the block being built at that moment
#[derive(Clone)]
struct Checkpoint {
    world: WorldState,
    open_block: BlockRecord,
}

struct Inner {
    current: WorldState,
    open_block: BlockRecord,
    blocks: BTreeMap<u64, BlockRecord>,
    snapshots: BTreeMap<u64, Checkpoint>,
    roots: HashMap<Hash256, Checkpoint>,
    root_order: VecDeque<Hash256>,
    next_snapshot_id: u64,
}

impl Inner {
    fn new(world: WorldState) -> Self {
        let open_block = BlockRecord::open(world.block_number(), world.root());
        Self {
            current: world,
            open_block,
            blocks: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            roots: HashMap::new(),
            root_order: VecDeque::new(),
            next_snapshot_id: 1,
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            world: self.current.clone(),
            open_block: self.open_block.clone(),
        }
    }

    fn remember_root(&mut self, limit: usize) {
        let root = self.current.root();
        let checkpoint = self.checkpoint();
        if self.roots.insert(root, checkpoint).is_some() {
            self.root_order.retain(|r| *r != root);
        }
        self.root_order.push_back(root);
        while self.root_order.len() > limit.max(1) {
            if let Some(old) = self.root_order.pop_front() {
                self.roots.remove(&old);
            }
        }
    }

    fn checkpoint_for_root(&self, root: &Hash256) -> Option<Checkpoint> {
        if self.current.root() == *root {
            return Some(self.checkpoint());
        }
        if let Some(cp) = self.roots.get(root) {
            return Some(cp.clone());
        }
        self.snapshots
            .values()
            .rev()
            .find(|cp| cp.world.root() == *root)
            .cloned()
    }

    /// Transactions logged after `checkpoint`, in order
    fn logged_since(&self, checkpoint: &Checkpoint) -> Vec<L2Transaction> {
        let start_block = checkpoint.open_block.number;
        let already = checkpoint.open_block.transactions.len();

        let mut txs = Vec::new();
        let logged = self
            .blocks
            .range(start_block..)
            .map(|(_, b)| b)
            .chain(std::iter::once(&self.open_block));
        for block in logged {
            let skip = if block.number == start_block { already } else { 0 };
            txs.extend(block.transactions.iter().skip(skip).cloned());
        }
        txs
    }

    fn world_at(&self, root: &Hash256) -> Option<WorldState> {
        if self.current.root() == *root {
            return Some(self.current.clone());
        }
        if let Some(cp) = self.roots.get(root) {
            return Some(cp.world.clone());
        }
        self.snapshots
            .values()
            .rev()
            .find(|cp| cp.world.root() == *root)
            .map(|cp| cp.world.clone())
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        let open_number = checkpoint.open_block.number;
        self.current = checkpoint.world;
        self.open_block = checkpoint.open_block;
        // the block log beyond the restored open block never happened
        self.blocks.retain(|number, _| *number < open_number);
    }
}

/// Account State Manager
pub struct StateManager {
    inner: RwLock<Inner>,
    executor: Arc<dyn ContractExecutor>,
    config: StateManagerConfig,
}

impl StateManager {
    /// Create an empty state manager without a contract executor
    pub fn new(config: StateManagerConfig) -> Self {
        Self::with_executor(config, Arc::new(NoopExecutor))
    }

    /// Create an empty state manager that runs contract calls on `executor`
    pub fn with_executor(config: StateManagerConfig, executor: Arc<dyn ContractExecutor>) -> Self {
        let mut inner = Inner::new(WorldState::new(0));
        inner.remember_root(config.max_snapshots);
        Self {
            inner: RwLock::new(inner),
            executor,
            config,
        }
    }

    pub fn config(&self) -> &StateManagerConfig {
        &self.config
    }

    fn context(&self, allow_system: bool) -> ExecContext<'_> {
        ExecContext {
            executor: self.executor.as_ref(),
            reputation_authority: self.config.reputation_authority,
            allow_system,
        }
    }

    fn apply(&self, tx: &L2Transaction, allow_system: bool) -> Result<(Hash256, ExecOutcome), StateError> {
        let ctx = self.context(allow_system);
        let mut inner = self.inner.write();

        let mut next = inner.current.clone();
        let outcome = next.execute(tx, &ctx)?;
        let root = next.root();

        inner.current = next;
        inner.open_block.transactions.push(tx.clone());
        inner.open_block.post_state_root = root;

        tracing::debug!(
            "Applied transaction {} from {} in block {}, root {}",
            tx.hash(),
            tx.sender,
            inner.open_block.number,
            root
        );
        Ok((root, outcome))
    }

    /// Apply a user transaction atomically and return the new state root
    pub fn apply_transaction(&self, tx: &L2Transaction) -> Result<Hash256, StateError> {
        self.apply(tx, false).map(|(root, _)| root)
    }

    /// Apply a user transaction and return its execution outcome too
    pub fn apply_transaction_with_outcome(&self, tx: &L2Transaction) -> Result<(Hash256, ExecOutcome), StateError> {
        self.apply(tx, false)
    }

    /// Apply a protocol-issued transaction (mint, withdrawal escrow, archive)
    pub fn apply_system(&self, tx: &L2Transaction) -> Result<Hash256, StateError> {
        self.apply(tx, true).map(|(root, _)| root)
    }

    /// Apply a protocol-issued transaction together with a change in another
    /// service.
    ///
    /// `check` runs against the resulting world before it becomes live; if
    /// it fails the transaction is discarded. `publish` receives what `check`
    /// returned and runs after the swap, while the write lock is still held,
    /// so no reader sees its effect without the new state.
    pub fn apply_system_with<T, R, E, C, P>(&self, tx: &L2Transaction, check: C, publish: P) -> Result<(Hash256, R), E>
    where
        E: From<StateError>,
        C: FnOnce(&WorldState) -> Result<T, E>,
        P: FnOnce(T) -> R,
    {
        let ctx = self.context(true);
        let mut inner = self.inner.write();

        let mut next = inner.current.clone();
        next.execute(tx, &ctx)?;
        let staged = check(&next)?;
        let root = next.root();

        inner.current = next;
        inner.open_block.transactions.push(tx.clone());
        inner.open_block.post_state_root = root;
        let value = publish(staged);

        tracing::debug!(
            "Applied system transaction {} in block {}, root {}",
            tx.hash(),
            inner.open_block.number,
            root
        );
        Ok((root, value))
    }

    /// Apply user transactions as one atomic unit
    pub fn apply_batch(&self, txs: &[L2Transaction]) -> Result<Hash256, StateError> {
        if txs.len() > self.config.max_batch_size {
            return Err(StateError::BatchTooLarge {
                size: txs.len(),
                limit: self.config.max_batch_size,
            });
        }

        let ctx = self.context(false);
        let mut inner = self.inner.write();

        let mut next = inner.current.clone();
        for (index, tx) in txs.iter().enumerate() {
            next.execute(tx, &ctx).map_err(|e| StateError::BatchFailed {
                index,
                source: Box::new(e),
            })?;
        }
        let root = next.root();

        inner.current = next;
        inner.open_block.transactions.extend_from_slice(txs);
        inner.open_block.post_state_root = root;

        tracing::debug!("Applied batch of {} transactions, root {}", txs.len(), root);
        Ok(root)
    }

    /// Account at `address`; absent accounts are the empty default
    pub fn get_account(&self, address: &Address) -> AccountState {
        self.inner.read().current.account(address)
    }

    /// Value of a contract storage slot
    pub fn get_storage(&self, address: &Address, slot: &Hash256) -> Option<Vec<u8>> {
        self.inner.read().current.storage(address, slot)
    }

    /// Current state root
    pub fn state_root(&self) -> Hash256 {
        self.inner.read().current.root()
    }

    /// Number of the block currently being built
    pub fn block_number(&self) -> u64 {
        self.inner.read().open_block.number
    }

    /// Cheap copy of the current world for concurrent readers
    pub fn view(&self) -> WorldState {
        self.inner.read().current.clone()
    }

    /// All live accounts
    pub fn accounts(&self) -> Result<Vec<(Address, AccountState)>, StateError> {
        self.view().accounts()
    }

    /// Sum of live and archived balances
    pub fn total_supply(&self) -> Result<u128, StateError> {
        self.view().total_supply()
    }

    /// Inclusion or absence proof for `address` under the current root
    pub fn generate_proof(&self, address: &Address) -> Result<AccountProof, StateError> {
        let world = self.view();
        let account = world.load(address)?;
        let commitment = world.commitment();
        Ok(AccountProof {
            address: *address,
            account: (!account.is_empty()).then_some(account),
            state_root: commitment.root(),
            commitment,
            proof: world.account_tree().generate_proof(&address.to_key()),
        })
    }

    /// Check an account proof against `root`
    pub fn verify_account_proof(
        root: &Hash256,
        address: &Address,
        account: Option<&AccountState>,
        commitment: &StateCommitment,
        proof: &SmtProof,
    ) -> bool {
        if commitment.root() != *root {
            return false;
        }
        let value = account.map(|a| a.to_bytes());
        SparseMerkleTree::verify_proof(&commitment.accounts, &address.to_key(), value.as_deref(), proof)
    }

    /// Take an O(1) snapshot of the current state
    pub fn snapshot(&self) -> SnapshotHandle {
        let mut inner = self.inner.write();
        let id = inner.next_snapshot_id;
        inner.next_snapshot_id += 1;

        let checkpoint = inner.checkpoint();
        let handle = SnapshotHandle {
            id,
            state_root: checkpoint.world.root(),
            block_number: checkpoint.open_block.number,
        };
        inner.snapshots.insert(id, checkpoint);
        while inner.snapshots.len() > self.config.max_snapshots.max(1) {
            inner.snapshots.pop_first();
        }
        inner.remember_root(self.config.max_snapshots);

        tracing::debug!("Snapshot {} at block {}, root {}", id, handle.block_number, handle.state_root);
        handle
    }

    /// True if the snapshot is still retained
    pub fn has_snapshot(&self, handle: &SnapshotHandle) -> bool {
        self.inner.read().snapshots.contains_key(&handle.id)
    }

    /// Revert to a snapshot; newer snapshots and blocks are discarded
    pub fn revert_to(&self, handle: &SnapshotHandle) -> Result<Hash256, StateError> {
        let mut inner = self.inner.write();
        let checkpoint = inner
            .snapshots
            .get(&handle.id)
            .cloned()
            .ok_or(StateError::UnknownSnapshot(handle.id))?;

        inner.restore(checkpoint);
        inner.snapshots.retain(|id, _| *id <= handle.id);

        let root = inner.current.root();
        tracing::info!(
            "Reverted to snapshot {} (block {}, root {})",
            handle.id,
            inner.open_block.number,
            root
        );
        Ok(root)
    }

    /// Revert to a retained state with the given root
    pub fn revert_to_root(&self, root: &Hash256) -> Result<Hash256, StateError> {
        let mut inner = self.inner.write();
        if inner.current.root() == *root {
            return Ok(*root);
        }

        let checkpoint = inner
            .checkpoint_for_root(root)
            .ok_or(StateError::UnknownStateRoot(*root))?;

        let block = checkpoint.open_block.number;
        inner.restore(checkpoint);
        inner.snapshots.retain(|_, cp| cp.open_block.number <= block);

        tracing::warn!("Reverted state to root {} at block {}", root, block);
        Ok(*root)
    }

    /// Close the open block, log it and open the next one
    pub fn seal_block(&self) -> BlockRecord {
        let mut inner = self.inner.write();

        let mut sealed = inner.open_block.clone();
        sealed.post_state_root = inner.current.root();
        let next_number = sealed.number + 1;

        inner.blocks.insert(sealed.number, sealed.clone());
        while inner.blocks.len() > self.config.max_retained_blocks.max(1) {
            inner.blocks.pop_first();
        }

        inner.current.set_block_number(next_number);
        inner.open_block = BlockRecord::open(next_number, sealed.post_state_root);
        inner.remember_root(self.config.max_snapshots);

        tracing::info!(
            "Sealed L2 block {} with {} transactions, root {}",
            sealed.number,
            sealed.transactions.len(),
            sealed.post_state_root
        );
        sealed
    }

    /// Sealed or open block by number
    pub fn block(&self, number: u64) -> Option<BlockRecord> {
        let inner = self.inner.read();
        if inner.open_block.number == number {
            return Some(inner.open_block.clone());
        }
        inner.blocks.get(&number).cloned()
    }

    /// Transactions logged after `handle` was taken, in order
    pub fn transactions_since(&self, handle: &SnapshotHandle) -> Result<Vec<L2Transaction>, StateError> {
        let inner = self.inner.read();
        let checkpoint = inner
            .snapshots
            .get(&handle.id)
            .ok_or(StateError::UnknownSnapshot(handle.id))?;
        Ok(inner.logged_since(checkpoint))
    }

    /// Rewind to `target`, let `build` re-apply history on a working copy,
    /// then swap the result in as one step.
    ///
    /// The whole operation holds the write lock, so readers see either the
    /// state before the rewind or the rebuilt one. `publish` runs after the
    /// swap under the same lock and receives what `build` returned. If
    /// `build` fails nothing changes.
    pub fn rebuild<T, R, E, F, P>(&self, target: RewindTarget, build: F, publish: P) -> Result<(Hash256, R), E>
    where
        E: From<StateError>,
        F: FnOnce(&mut Rebuild<'_>) -> Result<T, E>,
        P: FnOnce(T) -> R,
    {
        let mut inner = self.inner.write();
        let checkpoint = match target {
            RewindTarget::Snapshot(handle) => inner
                .snapshots
                .get(&handle.id)
                .cloned()
                .ok_or(StateError::UnknownSnapshot(handle.id))?,
            RewindTarget::Root(root) => inner
                .checkpoint_for_root(&root)
                .ok_or(StateError::UnknownStateRoot(root))?,
        };

        let logged = inner.logged_since(&checkpoint);
        let mut draft = Rebuild {
            reverted_root: checkpoint.world.root(),
            kept: checkpoint.open_block.transactions.len(),
            world: checkpoint.world,
            open_block: checkpoint.open_block,
            logged,
            user: self.context(false),
            system: self.context(true),
        };
        let staged = build(&mut draft)?;

        let Rebuild {
            world,
            open_block,
            reverted_root,
            ..
        } = draft;
        let open_number = open_block.number;
        let root = world.root();

        inner.current = world;
        inner.open_block = open_block;
        inner.blocks.retain(|number, _| *number < open_number);
        match target {
            RewindTarget::Snapshot(handle) => inner.snapshots.retain(|id, _| *id <= handle.id),
            RewindTarget::Root(_) => inner.snapshots.retain(|_, cp| cp.open_block.number <= open_number),
        }
        let value = publish(staged);

        tracing::warn!(
            "Rebuilt state from root {} at block {}, now {}",
            reverted_root,
            open_number,
            root
        );
        Ok((root, value))
    }

    /// Execute `txs` from the state with `pre_root` without touching live
    /// state and return the resulting root
    pub fn replay(&self, pre_root: &Hash256, block_number: u64, txs: &[L2Transaction]) -> Result<Hash256, StateError> {
        let mut world = self
            .inner
            .read()
            .world_at(pre_root)
            .ok_or(StateError::UnknownStateRoot(*pre_root))?;
        world.set_block_number(block_number);

        let ctx = self.context(true);
        for (index, tx) in txs.iter().enumerate() {
            world.execute(tx, &ctx).map_err(|e| StateError::BatchFailed {
                index,
                source: Box::new(e),
            })?;
        }
        Ok(world.root())
    }

    /// Execute `txs` from `pre_root` recording a checkpoint every
    /// `trace_step_size` transactions
    pub fn trace(&self, pre_root: &Hash256, block_number: u64, txs: &[L2Transaction]) -> Result<ExecutionTrace, StateError> {
        let mut world = self
            .inner
            .read()
            .world_at(pre_root)
            .ok_or(StateError::UnknownStateRoot(*pre_root))?;
        world.set_block_number(block_number);

        let step_size = self.config.trace_step_size.max(1);
        let steps = step_count(txs.len(), step_size);
        let ctx = self.context(true);

        let mut checkpoints = Vec::with_capacity(steps + 1);
        checkpoints.push(world.root());
        let mut failed = false;
        for chunk in txs.chunks(step_size) {
            if !failed {
                for tx in chunk {
                    if let Err(e) = world.execute(tx, &ctx) {
                        tracing::debug!("Trace step failed at transaction {}: {}", tx.hash(), e);
                        failed = true;
                        break;
                    }
                }
            }
            checkpoints.push(if failed { Hash256::ZERO } else { world.root() });
        }

        Ok(ExecutionTrace {
            step_size,
            tx_count: txs.len(),
            checkpoints,
        })
    }

    /// Archive accounts idle for at least `threshold` blocks
    pub fn archive_inactive(&self, current_block: u64, threshold: u64) -> Result<usize, StateError> {
        let ctx = self.context(true);
        let mut inner = self.inner.write();

        let candidates: Vec<Address> = inner
            .current
            .accounts()?
            .into_iter()
            .filter(|(address, account)| {
                !address.is_reserved()
                    && !account.is_contract()
                    && current_block.saturating_sub(account.last_activity_block) >= threshold
            })
            .map(|(address, _)| address)
            .collect();

        if candidates.is_empty() {
            return Ok(0);
        }

        let mut next = inner.current.clone();
        let mut logged = Vec::with_capacity(candidates.len());
        for address in &candidates {
            let tx = L2Transaction::system(TransactionKind::ArchiveAccount { address: *address });
            next.execute(&tx, &ctx)?;
            logged.push(tx);
        }
        let root = next.root();

        inner.current = next;
        inner.open_block.transactions.extend(logged);
        inner.open_block.post_state_root = root;

        tracing::info!(
            "Archived {} accounts inactive since block {}",
            candidates.len(),
            current_block.saturating_sub(threshold)
        );
        Ok(candidates.len())
    }

    /// Bring an archived account back after checking its archive proof
    pub fn restore_archived(&self, address: &Address) -> Result<Hash256, StateError> {
        if !self.is_archived(address) {
            return Err(StateError::NotArchived(*address));
        }
        let root = self.apply_system(&L2Transaction::system(TransactionKind::RestoreAccount { address: *address }))?;
        tracing::info!("Restored archived account {}", address);
        Ok(root)
    }

    pub fn archived(&self, address: &Address) -> Option<ArchivedAccount> {
        self.inner.read().current.archived(address).cloned()
    }

    pub fn is_archived(&self, address: &Address) -> bool {
        self.inner.read().current.archived(address).is_some()
    }

    pub fn archived_count(&self) -> usize {
        self.inner.read().current.archived_accounts().count()
    }

    /// Replace the live state with a loaded world; history is reset
    pub fn load_world(&self, world: WorldState) {
        let mut inner = self.inner.write();
        *inner = Inner::new(world);
        inner.remember_root(self.config.max_snapshots);
        tracing::info!(
            "Loaded world at block {} with root {}",
            inner.open_block.number,
            inner.current.root()
        );
    }

    /// Reset to the empty genesis state
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::new(WorldState::new(0));
        inner.remember_root(self.config.max_snapshots);
        tracing::info!("State manager cleared");
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(StateManagerConfig::default())
    }
}
