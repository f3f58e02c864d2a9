//! L1 reorg monitor
//!
//! Tracks a window of L1 headers, anchors L2 state snapshots to L1 heights
//! and, when the L1 chain is reorganized, rolls the state manager and the
//! burn registry back to the last anchor at or below the fork point before
//! replaying the L2 transactions logged since. The rollback and the replay
//! are built off to the side and published in one step.

use crate::burn_registry::{BurnRecord, BurnRegistry};
use crate::error::ReorgError;
use crate::gate::WriteGate;
use crossbeam_channel::{unbounded, Receiver, Sender};
use l1_integration::{Hash256, L1BlockHeader};
use l2_runtime::{Rebuild, RewindTarget, SnapshotHandle, StateManager, TransactionKind};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Confirmations after which an anchor is final
pub const DEFAULT_L1_FINALITY_DEPTH: u64 = 6;

/// Deepest reorg handled before the node halts
pub const MAX_REORG_DEPTH: u64 = 100;

/// L1 headers kept for fork-point search
pub const MAX_L1_HISTORY: usize = 1000;

/// Anchors kept
pub const MAX_ANCHOR_POINTS: usize = 500;

/// Expected L1 blocks between anchors
pub const MIN_ANCHOR_INTERVAL: u64 = 10;

/// Reorg monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorgMonitorConfig {
    pub finality_depth: u64,
    pub max_reorg_depth: u64,
    pub max_headers: usize,
    pub max_anchors: usize,
    pub anchor_interval: u64,
}

impl Default for ReorgMonitorConfig {
    fn default() -> Self {
        Self {
            finality_depth: DEFAULT_L1_FINALITY_DEPTH,
            max_reorg_depth: MAX_REORG_DEPTH,
            max_headers: MAX_L1_HISTORY,
            max_anchors: MAX_ANCHOR_POINTS,
            anchor_interval: MIN_ANCHOR_INTERVAL,
        }
    }
}

/// L2 state pinned to an L1 block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub l1_block: u64,
    pub l1_hash: Hash256,
    pub l2_block: u64,
    pub state_root: Hash256,
    pub snapshot: SnapshotHandle,
    pub finalized: bool,
}

/// Summary of a handled reorg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgReport {
    pub common_ancestor: u64,
    pub old_tip: u64,
    pub depth: u64,
    /// Anchor the state was reverted to
    pub anchor_l1_block: u64,
    pub reverted_to_root: Hash256,
    /// Transactions re-applied after the revert
    pub replayed: usize,
    /// Logged transactions that no longer apply
    pub failed: usize,
    /// Burns whose mint was undone and not re-applied
    pub orphaned_burns: Vec<BurnRecord>,
    pub final_root: Hash256,
}

/// Result of feeding one header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The header became the new tip
    Extended,
    /// Already known
    Duplicate,
    /// The header replaced part of the chain; rollback ran
    Reorged(ReorgReport),
}

/// Monitor statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgStats {
    pub tip: Option<u64>,
    pub headers: usize,
    pub anchors: usize,
    pub finalized_anchors: usize,
    pub reorg_count: u64,
    pub deepest_reorg: u64,
}

#[derive(Default)]
struct Replay {
    replayed: usize,
    failed: usize,
    /// Burns re-minted under their new mint transaction
    restored: Vec<BurnRecord>,
    orphaned: Vec<BurnRecord>,
}

#[derive(Default)]
struct MonitorInner {
    headers: BTreeMap<u64, L1BlockHeader>,
    anchors: BTreeMap<u64, AnchorPoint>,
    first_block: Option<u64>,
    reorg_count: u64,
    deepest_reorg: u64,
}

impl MonitorInner {
    fn tip(&self) -> Option<&L1BlockHeader> {
        self.headers.values().next_back()
    }

    fn finalize(&mut self, finality_depth: u64) {
        let tip = match self.tip() {
            Some(tip) => tip.number,
            None => return,
        };
        for anchor in self.anchors.values_mut() {
            if !anchor.finalized && tip >= anchor.l1_block + finality_depth {
                anchor.finalized = true;
                tracing::debug!("Anchor at L1 block {} finalized", anchor.l1_block);
            }
        }
    }
}

/// Watches L1 for reorganizations and rolls L2 back when they happen
pub struct ReorgMonitor {
    config: ReorgMonitorConfig,
    state: Arc<StateManager>,
    registry: Arc<BurnRegistry>,
    gate: WriteGate,
    inner: RwLock<MonitorInner>,
    halted: AtomicBool,
    subscribers: Mutex<Vec<Sender<ReorgReport>>>,
}

impl ReorgMonitor {
    /// Create a monitor over the given state and registry
    pub fn new(
        config: ReorgMonitorConfig,
        state: Arc<StateManager>,
        registry: Arc<BurnRegistry>,
        gate: WriteGate,
    ) -> Self {
        Self {
            config,
            state,
            registry,
            gate,
            inner: RwLock::new(MonitorInner::default()),
            halted: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ReorgMonitorConfig {
        &self.config
    }

    /// Feed the next header from the L1 observer
    pub fn process_block(&self, header: L1BlockHeader) -> Result<BlockOutcome, ReorgError> {
        if self.is_halted() {
            return Err(ReorgError::Halted);
        }

        let ancestor = {
            let mut inner = self.inner.write();
            let tip = match inner.tip().cloned() {
                Some(tip) => tip,
                None => {
                    inner.first_block = Some(header.number);
                    self.insert_header(&mut inner, header);
                    return Ok(BlockOutcome::Extended);
                }
            };

            if header.extends(&tip) {
                self.insert_header(&mut inner, header);
                inner.finalize(self.config.finality_depth);
                return Ok(BlockOutcome::Extended);
            }

            if inner.headers.get(&header.number).map(|h| h.hash) == Some(header.hash) {
                return Ok(BlockOutcome::Duplicate);
            }

            if header.number > tip.number + 1 {
                return Err(ReorgError::Gap {
                    tip: tip.number,
                    got: header.number,
                });
            }

            // the header replaces a stored block; its parent is the fork point
            let parent = header.number.checked_sub(1);
            match parent.and_then(|p| inner.headers.get(&p)) {
                Some(parent) if parent.hash == header.prev_hash => parent.number,
                _ => {
                    tracing::warn!(
                        "L1 block {} ({}) does not connect to the stored chain",
                        header.number,
                        header.hash
                    );
                    return Err(ReorgError::AncestorUnknown { number: header.number });
                }
            }
        };

        tracing::warn!(
            "L1 reorg detected: block {} ({}) replaces the chain above {}",
            header.number,
            header.hash,
            ancestor
        );
        let report = self.handle_reorg(ancestor)?;

        let mut inner = self.inner.write();
        self.insert_header(&mut inner, header);
        inner.finalize(self.config.finality_depth);
        Ok(BlockOutcome::Reorged(report))
    }

    fn insert_header(&self, inner: &mut MonitorInner, header: L1BlockHeader) {
        inner.headers.insert(header.number, header);
        while inner.headers.len() > self.config.max_headers.max(1) {
            inner.headers.pop_first();
        }
    }

    /// Roll L2 back to the last anchor at or below `common_ancestor`
    pub fn handle_reorg(&self, common_ancestor: u64) -> Result<ReorgReport, ReorgError> {
        if self.is_halted() {
            return Err(ReorgError::Halted);
        }

        let (old_tip, anchor) = {
            let inner = self.inner.read();
            let old_tip = inner.tip().map(|t| t.number).unwrap_or(common_ancestor);
            let anchor = inner
                .anchors
                .range(..=common_ancestor)
                .next_back()
                .map(|(_, a)| a.clone());
            (old_tip, anchor)
        };

        let depth = old_tip.saturating_sub(common_ancestor);
        if depth > self.config.max_reorg_depth {
            self.halted.store(true, Ordering::SeqCst);
            tracing::error!(
                "Reorg of depth {} exceeds maximum {}, halting",
                depth,
                self.config.max_reorg_depth
            );
            return Err(ReorgError::DepthExceeded {
                depth,
                max: self.config.max_reorg_depth,
            });
        }

        let anchor = anchor.ok_or(ReorgError::NoAnchor(common_ancestor))?;

        let _gate = self.gate.lock();
        let reverted_to_root = anchor.snapshot.state_root;

        let (final_root, (replayed, failed, orphaned_burns)) = self.state.rebuild(
            RewindTarget::Snapshot(anchor.snapshot),
            |rb| {
                let reverted = self.registry.reverted_by(rb.block_number(), rb.kept());
                let replay = Self::replay(rb, &reverted, common_ancestor);
                Ok::<_, ReorgError>((reverted, replay))
            },
            |(reverted, replay)| {
                let removed: Vec<Hash256> = reverted.iter().map(|r| r.l1_tx_hash).collect();
                self.registry.apply_rollback(&removed, replay.restored);
                (replay.replayed, replay.failed, replay.orphaned)
            },
        )?;

        {
            let mut inner = self.inner.write();
            inner.headers.retain(|n, _| *n <= common_ancestor);
            inner.anchors.retain(|n, _| *n <= common_ancestor);
            inner.reorg_count += 1;
            inner.deepest_reorg = inner.deepest_reorg.max(depth);
        }

        let report = ReorgReport {
            common_ancestor,
            old_tip,
            depth,
            anchor_l1_block: anchor.l1_block,
            reverted_to_root,
            replayed,
            failed,
            orphaned_burns,
            final_root,
        };

        tracing::warn!(
            "Reorg to L1 block {} handled: reverted to anchor {} (root {}), replayed {}, failed {}, orphaned burns {}",
            common_ancestor,
            anchor.l1_block,
            reverted_to_root,
            replayed,
            failed,
            report.orphaned_burns.len()
        );

        self.notify(&report);
        Ok(report)
    }

    /// Re-apply logged transactions on the rebuild. Mints are re-applied
    /// only while their burn is still on the canonical chain.
    fn replay(rb: &mut Rebuild<'_>, reverted: &[BurnRecord], common_ancestor: u64) -> Replay {
        let mut pending: HashMap<Hash256, &BurnRecord> = reverted.iter().map(|r| (r.l1_tx_hash, r)).collect();
        let mut replay = Replay::default();

        for tx in rb.take_logged() {
            let burn = match &tx.kind {
                TransactionKind::Mint { l1_tx_hash, .. } => match pending.get(l1_tx_hash) {
                    Some(r) if r.l1_block_number <= common_ancestor => Some(*l1_tx_hash),
                    _ => continue,
                },
                _ => None,
            };

            match rb.apply(&tx) {
                Ok(_) => {
                    replay.replayed += 1;
                    if let Some(record) = burn.and_then(|h| pending.remove(&h)) {
                        replay.restored.push(BurnRecord {
                            l2_mint_block: rb.block_number(),
                            l2_mint_tx_hash: tx.hash(),
                            ..record.clone()
                        });
                    }
                }
                Err(e) => {
                    tracing::debug!("Replay of {} failed: {}", tx.hash(), e);
                    replay.failed += 1;
                }
            }
        }

        replay.orphaned = pending.into_values().cloned().collect();
        replay.orphaned.sort_by_key(|r| (r.l1_block_number, r.l1_tx_hash));
        replay
    }

    /// Pin the current L2 state to an L1 block
    pub fn add_anchor(&self, l1_block: u64, l1_hash: Hash256) -> AnchorPoint {
        let snapshot = self.state.snapshot();
        let mut inner = self.inner.write();
        let finalized = inner
            .tip()
            .map(|t| t.number >= l1_block + self.config.finality_depth)
            .unwrap_or(false);

        let anchor = AnchorPoint {
            l1_block,
            l1_hash,
            l2_block: snapshot.block_number,
            state_root: snapshot.state_root,
            snapshot,
            finalized,
        };
        inner.anchors.insert(l1_block, anchor.clone());
        while inner.anchors.len() > self.config.max_anchors.max(1) {
            inner.anchors.pop_first();
        }

        tracing::debug!(
            "Anchored L2 block {} (root {}) at L1 block {}",
            anchor.l2_block,
            anchor.state_root,
            l1_block
        );
        anchor
    }

    /// Newest finalized anchor
    pub fn latest_finalized_anchor(&self) -> Option<AnchorPoint> {
        self.inner
            .read()
            .anchors
            .values()
            .rev()
            .find(|a| a.finalized)
            .cloned()
    }

    /// Newest anchor at or below `l1_block`
    pub fn last_anchor_at_or_before(&self, l1_block: u64) -> Option<AnchorPoint> {
        self.inner
            .read()
            .anchors
            .range(..=l1_block)
            .next_back()
            .map(|(_, a)| a.clone())
    }

    /// True once the anchor at `l1_block` is final
    pub fn is_anchor_finalized(&self, l1_block: u64) -> bool {
        self.inner
            .read()
            .anchors
            .get(&l1_block)
            .map(|a| a.finalized)
            .unwrap_or(false)
    }

    pub fn anchors(&self) -> Vec<AnchorPoint> {
        self.inner.read().anchors.values().cloned().collect()
    }

    /// Hashes of L2 transactions that a reorg to `fork_point` would revert
    pub fn affected_transactions(&self, fork_point: u64) -> Vec<Hash256> {
        match self.last_anchor_at_or_before(fork_point) {
            Some(anchor) => self
                .state
                .transactions_since(&anchor.snapshot)
                .map(|txs| txs.iter().map(|tx| tx.hash()).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Current L1 tip
    pub fn tip(&self) -> Option<L1BlockHeader> {
        self.inner.read().tip().cloned()
    }

    /// Stored header at `number`
    pub fn header(&self, number: u64) -> Option<L1BlockHeader> {
        self.inner.read().headers.get(&number).cloned()
    }

    /// Receive a report for every handled reorg
    pub fn subscribe(&self) -> Receiver<ReorgReport> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, report: &ReorgReport) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(report.clone()).is_ok());
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Not halted, and anchors are being taken once the chain is under way
    pub fn is_healthy(&self) -> bool {
        if self.is_halted() {
            return false;
        }
        let inner = self.inner.read();
        match (inner.tip(), inner.first_block) {
            (Some(tip), Some(first)) => {
                !(tip.number.saturating_sub(first) > self.config.anchor_interval && inner.anchors.is_empty())
            }
            _ => true,
        }
    }

    pub fn stats(&self) -> ReorgStats {
        let inner = self.inner.read();
        ReorgStats {
            tip: inner.tip().map(|t| t.number),
            headers: inner.headers.len(),
            anchors: inner.anchors.len(),
            finalized_anchors: inner.anchors.values().filter(|a| a.finalized).count(),
            reorg_count: inner.reorg_count,
            deepest_reorg: inner.deepest_reorg,
        }
    }

    /// Forget headers and anchors (for testing)
    pub fn clear(&self) {
        *self.inner.write() = MonitorInner::default();
        self.halted.store(false, Ordering::SeqCst);
    }
}
