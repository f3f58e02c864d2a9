//! Sequencer node: owns the rollup services and drives them from the
//! inbound event feed

use crate::config::NodeConfig;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::SigningKey;
use l1_bridge::{
    BlockOutcome, BurnRegistry, BurnRegistryPersistence, BurnValidationError, BurnValidator, DetectedBurn,
    InboundEvent, L1ChainSource, ReorgMonitor, ReorgReport, ValidatedBurn, WriteGate,
};
use l1_integration::{Classify, Hash256, L1BlockHeader, L1Event, L1Transaction};
use l2_consensus::{
    sequencer_address, ConfirmationOutcome, MintConfirmation, MintConsensusManager, MintDecision, MintStatus,
    SequencerSet, TokenMinter,
};
use l2_fraud_proof::{
    ChallengeHandler, ChallengePersistence, FraudProof, FraudProofPersistence, FraudProofResolution, FraudProofSystem,
};
use l2_runtime::{PersistentStore, StateManager, StateManagerPersistence};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Log node statistics every this many L1 blocks
const STATS_INTERVAL: u64 = 100;

/// What handling one L1 block did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub l1_block: u64,
    /// Burns found in the block and now tracked
    pub detected: usize,
    /// L1 hashes of the burns minted while handling the block
    pub minted: Vec<Hash256>,
    /// L2 block sealed at the end, if it had transactions
    pub sealed: Option<u64>,
    pub reorg: Option<ReorgReport>,
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

pub struct SequencerNode {
    config: NodeConfig,
    store: Arc<PersistentStore>,
    gate: WriteGate,
    state: Arc<StateManager>,
    registry: Arc<BurnRegistry>,
    validator: BurnValidator,
    monitor: ReorgMonitor,
    consensus: Arc<MintConsensusManager>,
    minter: TokenMinter,
    fraud: Arc<FraudProofSystem>,
    challenges: ChallengeHandler,
    signing_key: Option<SigningKey>,
    /// Detected burns still short of confirmations
    pending: BTreeMap<Hash256, DetectedBurn>,
    last_anchor: Option<u64>,
    last_l1_block: Option<u64>,
    /// Blocks at or below this were handled before a restart
    resume_after: Option<u64>,
}

impl SequencerNode {
    /// Build every service over `store` and load what it holds
    pub fn open(config: NodeConfig, store: Arc<PersistentStore>) -> anyhow::Result<Self> {
        let gate = WriteGate::new();
        let state = Arc::new(StateManager::new(config.state.clone()));
        let registry = Arc::new(BurnRegistry::new());
        let sequencers = Arc::new(SequencerSet::new(
            config.sequencer_infos()?,
            config.consensus.min_sequencers,
        )?);

        let mut signing_key = config.signing_key()?;
        if let Some(key) = &signing_key {
            let address = sequencer_address(&key.verifying_key());
            if sequencers.contains(&address) {
                tracing::info!("Signing confirmations as sequencer {}", address);
            } else {
                tracing::warn!("Key {} is not in the sequencer set, running as observer", address);
                signing_key = None;
            }
        }

        let validator = BurnValidator::new(config.burns.clone(), registry.clone());
        let monitor = ReorgMonitor::new(config.reorg.clone(), state.clone(), registry.clone(), gate.clone());
        let consensus = Arc::new(MintConsensusManager::new(config.consensus.clone(), sequencers.clone()));
        let minter = TokenMinter::new(state.clone(), registry.clone(), consensus.clone(), gate.clone());
        let fraud = Arc::new(FraudProofSystem::new(
            config.fraud.clone(),
            state.clone(),
            sequencers,
            registry.clone(),
            gate.clone(),
        ));
        let challenges = ChallengeHandler::new(config.challenges.clone(), state.clone(), fraud.clone(), gate.clone());

        let mut node = Self {
            config,
            store,
            gate,
            state,
            registry,
            validator,
            monitor,
            consensus,
            minter,
            fraud,
            challenges,
            signing_key,
            pending: BTreeMap::new(),
            last_anchor: None,
            last_l1_block: None,
            resume_after: None,
        };
        node.load()?;
        Ok(node)
    }

    fn load(&mut self) -> anyhow::Result<()> {
        let metadata = match self.store.load_metadata()? {
            Some(metadata) => metadata,
            None => {
                tracing::info!("No existing state found, starting fresh");
                return Ok(());
            }
        };
        tracing::info!(
            "Loading state from disk: L2 block {}, {} accounts, last L1 block {}",
            metadata.block_number,
            metadata.account_count,
            metadata.last_l1_block
        );

        self.state.load_from_disk(&self.store)?;
        self.registry.load_from_disk(&self.store)?;
        self.fraud.load_from_disk(&self.store)?;
        self.challenges.load_from_disk(&self.store)?;

        if metadata.last_l1_block > 0 {
            self.last_l1_block = Some(metadata.last_l1_block);
            self.resume_after = Some(metadata.last_l1_block);
        }
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<BurnRegistry> {
        &self.registry
    }

    pub fn consensus(&self) -> &Arc<MintConsensusManager> {
        &self.consensus
    }

    pub fn monitor(&self) -> &ReorgMonitor {
        &self.monitor
    }

    pub fn fraud(&self) -> &Arc<FraudProofSystem> {
        &self.fraud
    }

    pub fn challenges(&self) -> &ChallengeHandler {
        &self.challenges
    }

    pub fn pending_burns(&self) -> usize {
        self.pending.len()
    }

    /// Handle one inbound event
    ///
    /// Only errors that must stop the node are returned. Bad P2P payloads are
    /// logged and dropped.
    pub fn handle_event(&mut self, event: InboundEvent, now: u64) -> anyhow::Result<()> {
        match event {
            InboundEvent::L1 {
                event: L1Event::Block { header, transactions },
            } => {
                self.on_l1_block(header, transactions, now)?;
            }
            InboundEvent::L1 {
                event: L1Event::Reorg { common_ancestor },
            } => {
                self.on_reorg(common_ancestor, now)?;
            }
            InboundEvent::Confirmation { payload } => {
                if let Err(e) = self.on_confirmation(&payload, now) {
                    tracing::warn!("Dropping confirmation payload: {}", e);
                }
            }
            InboundEvent::FraudProof { payload } => {
                if let Err(e) = self.on_fraud_proof(&payload, now) {
                    tracing::warn!("Dropping fraud proof payload: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Run one L1 block through the pipeline
    pub fn on_l1_block(
        &mut self,
        header: L1BlockHeader,
        transactions: Vec<L1Transaction>,
        now: u64,
    ) -> anyhow::Result<BlockSummary> {
        let mut summary = BlockSummary {
            l1_block: header.number,
            ..Default::default()
        };

        if let Some(last) = self.resume_after {
            if header.number <= last {
                tracing::debug!("Skipping L1 block {}, handled before restart", header.number);
                return Ok(summary);
            }
            self.resume_after = None;
        }

        match self.monitor.process_block(header.clone()) {
            Ok(BlockOutcome::Extended) => {}
            Ok(BlockOutcome::Duplicate) => {
                tracing::debug!("L1 block {} already known", header.number);
                return Ok(summary);
            }
            Ok(BlockOutcome::Reorged(report)) => {
                self.after_reorg(&report, now);
                summary.reorg = Some(report);
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("L1 block {} cannot be handled: {}", header.number, e);
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!("Ignoring L1 block {}: {}", header.number, e);
                return Ok(summary);
            }
        }

        for burn in self.validator.scan_block(&header, &transactions) {
            let hash = burn.l1_tx_hash;
            if self.registry.is_processed(&hash) {
                tracing::debug!("Burn {} already minted", hash);
                continue;
            }
            match self.consensus.observe(hash, header.number, now) {
                Ok(MintStatus::Detected) => {
                    self.pending.insert(hash, burn);
                    summary.detected += 1;
                }
                Ok(status) => tracing::debug!("Burn {} seen again in status {:?}", hash, status),
                Err(e) => tracing::warn!("Cannot track burn {}: {}", hash, e),
            }
        }

        summary.minted = self.advance_pending(header.number, now);

        let open = self.state.block_number();
        if self.state.block(open).is_some_and(|b| !b.transactions.is_empty()) {
            let sealed = self.state.seal_block();
            self.fraud.register_state_root(
                sealed.post_state_root,
                sealed.number,
                now + self.config.state_root_challenge_period,
            );
            summary.sealed = Some(sealed.number);
        }

        let anchor_due = self
            .last_anchor
            .map_or(true, |last| header.number >= last + self.config.reorg.anchor_interval);
        if anchor_due {
            let anchor = self.monitor.add_anchor(header.number, header.hash);
            tracing::debug!("Anchored L2 block {} to L1 block {}", anchor.l2_block, anchor.l1_block);
            self.last_anchor = Some(header.number);
        }

        self.last_l1_block = Some(header.number);
        if header.number % STATS_INTERVAL == 0 {
            self.log_stats();
        }
        Ok(summary)
    }

    /// Re-check every pending burn against the tip
    fn advance_pending(&mut self, tip: u64, now: u64) -> Vec<Hash256> {
        let mut minted = Vec::new();
        let hashes: Vec<Hash256> = self.pending.keys().copied().collect();
        for hash in hashes {
            let Some(detected) = self.pending.get(&hash) else {
                continue;
            };
            let observation = detected.observe(tip, self.config.chain_id);
            match self.validator.validate(&detected.intent, &observation) {
                Ok(burn) => {
                    self.pending.remove(&hash);
                    if let Some(receipt) = self.confirm(burn, now) {
                        minted.push(receipt);
                    }
                }
                Err(BurnValidationError::InsufficientConfirmations { .. }) => {}
                Err(e) => {
                    self.pending.remove(&hash);
                    tracing::warn!("Burn {} failed validation: {}", hash, e);
                    if let Err(e) = self.consensus.reject(&hash, &e.to_string(), now) {
                        tracing::debug!("Could not reject burn {}: {}", hash, e);
                    }
                }
            }
        }
        minted
    }

    /// Move a validated burn into confirmation and add this node's signature
    fn confirm(&self, burn: ValidatedBurn, now: u64) -> Option<Hash256> {
        let hash = burn.l1_tx_hash;
        if let Err(e) = self.consensus.validate(burn.clone(), now) {
            tracing::warn!("Consensus refused burn {}: {}", hash, e);
            return None;
        }

        if let Some(key) = &self.signing_key {
            let confirmation = MintConfirmation::signed(&burn, key, self.state.block_number(), now);
            if let Ok(bytes) = confirmation.to_bytes() {
                tracing::debug!("Own confirmation for burn {}: {}", hash, BASE64.encode(bytes));
            }
            if let Err(e) = self.consensus.submit_confirmation(confirmation, now) {
                tracing::warn!("Own confirmation for burn {} refused: {}", hash, e);
            }
        }

        match self.consensus.start_confirming(&hash, now) {
            Ok(Some(decision)) => self.mint(&decision, now),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cannot start confirming burn {}: {}", hash, e);
                None
            }
        }
    }

    fn mint(&self, decision: &MintDecision, now: u64) -> Option<Hash256> {
        // failures are logged by the minter
        self.minter.mint(decision, now).ok().map(|receipt| receipt.l1_tx_hash)
    }

    /// L1 observer reported a switch to another chain
    pub fn on_reorg(&mut self, common_ancestor: u64, now: u64) -> anyhow::Result<Option<ReorgReport>> {
        match self.monitor.handle_reorg(common_ancestor) {
            Ok(report) => {
                self.after_reorg(&report, now);
                Ok(Some(report))
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("Reorg to L1 block {} cannot be handled: {}", common_ancestor, e);
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!("Ignoring reorg to L1 block {}: {}", common_ancestor, e);
                Ok(None)
            }
        }
    }

    fn after_reorg(&mut self, report: &ReorgReport, now: u64) {
        let rejected = self.consensus.reject_l1_blocks_after(report.common_ancestor, now);
        self.pending.retain(|_, d| d.l1_block_number <= report.common_ancestor);
        self.last_anchor = Some(report.anchor_l1_block);
        self.last_l1_block = Some(report.common_ancestor);
        tracing::info!(
            "Reorg to L1 block {}: {} burns rejected, {} still pending, root {}",
            report.common_ancestor,
            rejected.len(),
            self.pending.len(),
            report.final_root
        );
    }

    /// Submit a relayed confirmation; returns the burn hash if it got minted
    pub fn on_confirmation(&self, payload: &str, now: u64) -> anyhow::Result<Option<Hash256>> {
        let confirmation = MintConfirmation::from_bytes(&BASE64.decode(payload)?)?;
        let hash = confirmation.l1_tx_hash;
        match self.consensus.submit_confirmation(confirmation, now)? {
            ConfirmationOutcome::QuorumReached(decision) => Ok(self.mint(&decision, now)),
            outcome => {
                tracing::debug!("Confirmation for burn {}: {:?}", hash, outcome);
                Ok(None)
            }
        }
    }

    /// Submit a relayed fraud proof and settle it by replay
    pub fn on_fraud_proof(&self, payload: &str, now: u64) -> anyhow::Result<FraudProofResolution> {
        let proof = FraudProof::from_bytes(&BASE64.decode(payload)?)?;
        let hash = self.fraud.submit_fraud_proof(proof, now)?;
        let resolution = self.fraud.resolve(&hash, now)?;
        if resolution.is_proven() {
            tracing::warn!("Fraud proof {} proven, state root now {}", hash, self.state.state_root());
        }
        Ok(resolution)
    }

    /// Expire whatever ran out of time
    pub fn tick(&self, now: u64) {
        let timed_out = self.consensus.process_timeouts(now);
        let pruned = self.consensus.prune(now);
        let expiry = self.challenges.process_expired(now);
        let sessions = self.fraud.process_timeouts(now);

        if !timed_out.is_empty() || !expiry.expired_challenges.is_empty() || !sessions.is_empty() {
            tracing::info!(
                "Timeouts: {} burns, {} challenges, {} bisection sessions; {} withdrawals ready, {} states pruned",
                timed_out.len(),
                expiry.expired_challenges.len(),
                sessions.len(),
                expiry.ready_withdrawals.len(),
                pruned
            );
        }
    }

    /// Persist every service
    pub fn save(&self) -> anyhow::Result<()> {
        let _gate = self.gate.read();
        self.state.save_to_disk(&self.store)?;
        self.registry.save_to_disk(&self.store)?;
        self.fraud.save_to_disk(&self.store)?;
        self.challenges.save_to_disk(&self.store)?;
        if let Some(l1_block) = self.last_l1_block {
            self.store.set_last_l1_block(l1_block)?;
        }
        self.store.flush()?;
        tracing::info!(
            "Saved state at L2 block {} (root {}), last L1 block {:?}",
            self.state.block_number(),
            self.state.state_root(),
            self.last_l1_block
        );
        Ok(())
    }

    fn log_stats(&self) {
        let consensus = self.consensus.stats();
        let minter = self.minter.stats();
        let fraud = self.fraud.stats();
        tracing::info!(
            "L1 block {:?}: L2 block {}, supply {:?}, {} mints, {} confirming, {} pending burns, {} open fraud proofs",
            self.last_l1_block,
            self.state.block_number(),
            self.state.total_supply().ok(),
            minter.mints,
            consensus.confirming,
            self.pending.len(),
            fraud.pending
        );
    }

    /// Drive the node from `source` until it is exhausted, a fatal error
    /// occurs or ctrl-c is pressed. State is saved every `save_interval` L1
    /// blocks (0 = only on shutdown).
    pub async fn run<S: L1ChainSource>(&mut self, mut source: S, save_interval: u64, tick: Duration) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut blocks = 0u64;

        let result = loop {
            tokio::select! {
                event = source.next_event() => match event {
                    Ok(Some(event)) => {
                        let is_block = matches!(event, InboundEvent::L1 { event: L1Event::Block { .. } });
                        if let Err(e) = self.handle_event(event, unix_now()) {
                            tracing::error!("Halting: {}", e);
                            break Err(e);
                        }
                        if is_block {
                            blocks += 1;
                            if save_interval > 0 && blocks % save_interval == 0 {
                                if let Err(e) = self.save() {
                                    tracing::error!("Failed to save state: {}", e);
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Event feed exhausted after {} L1 blocks", blocks);
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::error!("Event feed failed: {}", e);
                        break Err(e);
                    }
                },
                _ = ticker.tick() => self.tick(unix_now()),
                _ = &mut shutdown => {
                    tracing::info!("Shutting down...");
                    break Ok(());
                }
            }
        };

        // a halted node keeps its last good save
        if result.is_ok() {
            self.tick(unix_now());
            self.save()?;
        }
        result
    }
}
