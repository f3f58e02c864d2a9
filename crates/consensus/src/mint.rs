//! Mint consensus manager
//!
//! Drives every burn through `Detected → Validated → Confirming → Minted`
//! (or `Rejected`) and collects sequencer confirmations until the agreeing
//! weight reaches two thirds of the set.
//!
//! Signatures are checked before any map entry is locked. Storing a
//! confirmation and evaluating the quorum happen under the one entry lock,
//! so the first quorum for a burn is reported exactly once.

use crate::error::ConsensusError;
use crate::sequencer::SequencerSet;
use crate::types::{
    ConfirmationOutcome, ConsensusConfig, ConsensusStats, MintConfirmation, MintDecision, MintStatus,
    MisbehaviorEvidence,
};
use dashmap::DashMap;
use l1_bridge::ValidatedBurn;
use l1_integration::{Address, Hash256};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-burn consensus state
#[derive(Debug, Clone)]
pub struct MintEntry {
    pub status: MintStatus,
    /// L1 block the burn was seen in, once observed locally
    pub l1_block: Option<u64>,
    /// Set once the burn passes local validation
    pub burn: Option<ValidatedBurn>,
    pub confirmations: BTreeMap<Address, MintConfirmation>,
    pub first_seen: u64,
    pub confirming_since: Option<u64>,
    pub updated_at: u64,
    pub decision: Option<MintDecision>,
    pub reject_reason: Option<String>,
}

impl MintEntry {
    fn new(now: u64) -> Self {
        Self {
            status: MintStatus::Detected,
            l1_block: None,
            burn: None,
            confirmations: BTreeMap::new(),
            first_seen: now,
            confirming_since: None,
            updated_at: now,
            decision: None,
            reject_reason: None,
        }
    }

    fn reject(&mut self, reason: &str, now: u64) {
        self.status = MintStatus::Rejected;
        self.reject_reason = Some(reason.to_string());
        self.updated_at = now;
    }
}

/// Collects confirmations and decides when a burn may be minted
pub struct MintConsensusManager {
    config: ConsensusConfig,
    sequencers: Arc<SequencerSet>,
    entries: DashMap<Hash256, MintEntry>,
    evidence: Mutex<Vec<MisbehaviorEvidence>>,
}

impl MintConsensusManager {
    pub fn new(config: ConsensusConfig, sequencers: Arc<SequencerSet>) -> Self {
        Self {
            config,
            sequencers,
            entries: DashMap::new(),
            evidence: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn sequencers(&self) -> &Arc<SequencerSet> {
        &self.sequencers
    }

    /// Make room for one more entry
    fn ensure_capacity(&self, hash: &Hash256, now: u64) -> Result<(), ConsensusError> {
        if self.entries.contains_key(hash) || self.entries.len() < self.config.max_states {
            return Ok(());
        }
        self.prune(now);
        if self.entries.len() >= self.config.max_states {
            return Err(ConsensusError::AtCapacity(self.entries.len()));
        }
        Ok(())
    }

    /// Note a burn found on L1
    ///
    /// A burn rejected earlier is tracked afresh when it shows up in a
    /// different L1 block, which happens when a reorg re-includes it.
    pub fn observe(&self, hash: Hash256, l1_block: u64, now: u64) -> Result<MintStatus, ConsensusError> {
        self.ensure_capacity(&hash, now)?;
        let mut entry = self.entries.entry(hash).or_insert_with(|| MintEntry::new(now));

        if entry.status == MintStatus::Rejected && entry.l1_block != Some(l1_block) {
            tracing::info!("Burn {} re-included in L1 block {}, tracking again", hash, l1_block);
            let confirmations = std::mem::take(&mut entry.confirmations);
            *entry = MintEntry::new(now);
            entry.confirmations = confirmations;
        }
        if entry.status == MintStatus::Detected {
            entry.l1_block = Some(l1_block);
            entry.updated_at = now;
        }
        Ok(entry.status)
    }

    /// Attach the locally validated burn
    pub fn validate(&self, burn: ValidatedBurn, now: u64) -> Result<(), ConsensusError> {
        let hash = burn.l1_tx_hash;
        self.ensure_capacity(&hash, now)?;
        let mut entry = self.entries.entry(hash).or_insert_with(|| MintEntry::new(now));

        if entry.status != MintStatus::Detected {
            return Err(ConsensusError::InvalidTransition {
                hash,
                from: entry.status,
                to: MintStatus::Validated,
            });
        }

        tracing::debug!("Burn {} validated: {} to {}", hash, burn.amount, burn.recipient);
        entry.l1_block = Some(burn.l1_block_number);
        entry.burn = Some(burn);
        entry.status = MintStatus::Validated;
        entry.updated_at = now;
        Ok(())
    }

    /// Open the confirmation window. Buffered confirmations are counted
    /// right away, so this can already complete the quorum.
    pub fn start_confirming(&self, hash: &Hash256, now: u64) -> Result<Option<MintDecision>, ConsensusError> {
        let mut entry = self
            .entries
            .get_mut(hash)
            .ok_or(ConsensusError::UnknownBurn(*hash))?;

        if entry.status != MintStatus::Validated {
            return Err(ConsensusError::InvalidTransition {
                hash: *hash,
                from: entry.status,
                to: MintStatus::Confirming,
            });
        }

        entry.status = MintStatus::Confirming;
        entry.confirming_since = Some(now);
        entry.updated_at = now;
        tracing::info!(
            "Burn {} confirming with {} buffered confirmations",
            hash,
            entry.confirmations.len()
        );

        Ok(self.evaluate(&mut entry, now))
    }

    /// Submit a sequencer confirmation
    pub fn submit_confirmation(
        &self,
        confirmation: MintConfirmation,
        now: u64,
    ) -> Result<ConfirmationOutcome, ConsensusError> {
        if !confirmation.is_well_formed() {
            return Err(ConsensusError::Malformed(format!(
                "confirmation for {} from {}",
                confirmation.l1_tx_hash, confirmation.sequencer
            )));
        }

        let sequencer = confirmation.sequencer;
        let member = self
            .sequencers
            .get(&sequencer)
            .ok_or(ConsensusError::UnknownSequencer(sequencer))?;
        if member.jailed {
            return Err(ConsensusError::Jailed(sequencer));
        }
        if !confirmation.verify(&member.verifying_key) {
            return Err(ConsensusError::InvalidSignature(sequencer));
        }

        let hash = confirmation.l1_tx_hash;
        self.ensure_capacity(&hash, now)?;
        let mut entry = self.entries.entry(hash).or_insert_with(|| MintEntry::new(now));

        if let Some(existing) = entry.confirmations.get(&sequencer) {
            if existing.signing_hash() == confirmation.signing_hash() {
                return Ok(ConfirmationOutcome::Duplicate);
            }
            let evidence = MisbehaviorEvidence {
                sequencer,
                l1_tx_hash: hash,
                first: existing.clone(),
                second: confirmation,
            };
            tracing::warn!("Sequencer {} signed conflicting confirmations for burn {}", sequencer, hash);
            self.evidence.lock().push(evidence.clone());
            return Ok(ConfirmationOutcome::Conflicting(evidence));
        }

        if entry.status.is_terminal() {
            return Ok(ConfirmationOutcome::Ignored(entry.status));
        }

        if self.window_expired(&entry, now) {
            entry.reject("confirmation window expired", now);
            tracing::warn!("Burn {} rejected: confirmation window expired", hash);
            return Ok(ConfirmationOutcome::Ignored(MintStatus::Rejected));
        }

        if let Some(burn) = &entry.burn {
            if !confirmation.agrees_with(&burn.recipient, burn.amount) {
                tracing::warn!(
                    "Sequencer {} confirms burn {} as {} to {}, local view is {} to {}",
                    sequencer,
                    hash,
                    confirmation.amount,
                    confirmation.l2_recipient,
                    burn.amount,
                    burn.recipient
                );
            }
        }

        entry.confirmations.insert(sequencer, confirmation);
        entry.updated_at = now;

        if entry.status != MintStatus::Confirming {
            tracing::debug!("Buffered confirmation from {} for burn {}", sequencer, hash);
            return Ok(ConfirmationOutcome::Buffered);
        }

        if entry.decision.is_some() {
            let (weight, total) = self.sequencers.tally(&agreeing_signers(&entry));
            return Ok(ConfirmationOutcome::Accepted { weight, total });
        }

        match self.evaluate(&mut entry, now) {
            Some(decision) => Ok(ConfirmationOutcome::QuorumReached(decision)),
            None => {
                let (weight, total) = self.sequencers.tally(&agreeing_signers(&entry));
                Ok(ConfirmationOutcome::Accepted { weight, total })
            }
        }
    }

    /// Record the decision if the agreeing confirmations form a quorum
    fn evaluate(&self, entry: &mut MintEntry, now: u64) -> Option<MintDecision> {
        if entry.status != MintStatus::Confirming || entry.decision.is_some() {
            return None;
        }
        let burn = entry.burn.clone()?;

        let signers = agreeing_signers(entry);
        if !self.sequencers.has_quorum(&signers) {
            return None;
        }

        let (agreeing_weight, total_weight) = self.sequencers.tally(&signers);
        let confirmations = entry
            .confirmations
            .values()
            .filter(|c| c.agrees_with(&burn.recipient, burn.amount))
            .cloned()
            .collect();
        let decision = MintDecision {
            burn,
            confirmations,
            agreeing_weight,
            total_weight,
            reached_at: now,
        };

        tracing::info!(
            "Quorum reached for burn {}: weight {} of {}",
            decision.l1_tx_hash(),
            agreeing_weight,
            total_weight
        );
        entry.decision = Some(decision.clone());
        entry.updated_at = now;
        Some(decision)
    }

    fn window_expired(&self, entry: &MintEntry, now: u64) -> bool {
        match (entry.status, entry.confirming_since) {
            (MintStatus::Confirming, Some(since)) if entry.decision.is_none() => {
                now.saturating_sub(since) > self.config.confirmation_window_secs
            }
            _ => false,
        }
    }

    /// True once the burn has a quorum decision
    pub fn has_quorum(&self, hash: &Hash256) -> bool {
        self.entries
            .get(hash)
            .map(|e| e.decision.is_some() && e.status != MintStatus::Rejected)
            .unwrap_or(false)
    }

    /// The quorum decision, while the burn is still live
    pub fn decision(&self, hash: &Hash256) -> Option<MintDecision> {
        self.entries
            .get(hash)
            .filter(|e| e.status == MintStatus::Confirming)
            .and_then(|e| e.decision.clone())
    }

    /// Move a decided burn to `Minted`
    pub fn mark_minted(&self, hash: &Hash256, now: u64) -> Result<(), ConsensusError> {
        let mut entry = self
            .entries
            .get_mut(hash)
            .ok_or(ConsensusError::UnknownBurn(*hash))?;
        if entry.status != MintStatus::Confirming || entry.decision.is_none() {
            return Err(ConsensusError::InvalidTransition {
                hash: *hash,
                from: entry.status,
                to: MintStatus::Minted,
            });
        }
        entry.status = MintStatus::Minted;
        entry.updated_at = now;
        tracing::info!("Burn {} marked minted", hash);
        Ok(())
    }

    /// Drop a burn that is not minted
    pub fn reject(&self, hash: &Hash256, reason: &str, now: u64) -> Result<(), ConsensusError> {
        let mut entry = self
            .entries
            .get_mut(hash)
            .ok_or(ConsensusError::UnknownBurn(*hash))?;
        if entry.status.is_terminal() {
            return Err(ConsensusError::InvalidTransition {
                hash: *hash,
                from: entry.status,
                to: MintStatus::Rejected,
            });
        }
        entry.reject(reason, now);
        tracing::warn!("Burn {} rejected: {}", hash, reason);
        Ok(())
    }

    /// Reject burns from L1 blocks above `l1_block`, minted ones included
    pub fn reject_l1_blocks_after(&self, l1_block: u64, now: u64) -> Vec<Hash256> {
        let mut rejected = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let orphaned = matches!(entry.l1_block, Some(b) if b > l1_block);
            if orphaned && entry.status != MintStatus::Rejected {
                entry.reject("L1 reorg", now);
                rejected.push(*entry.key());
            }
        }
        if !rejected.is_empty() {
            tracing::warn!("Rejected {} burns from L1 blocks above {}", rejected.len(), l1_block);
        }
        rejected
    }

    /// Reject burns whose confirmation window has passed without quorum
    pub fn process_timeouts(&self, now: u64) -> Vec<Hash256> {
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if self.window_expired(&entry, now) {
                entry.reject("confirmation window expired", now);
                expired.push(*entry.key());
            }
        }
        for hash in &expired {
            tracing::warn!("Burn {} timed out without quorum", hash);
        }
        expired
    }

    /// Remove settled burns older than the window, then the oldest states
    /// while above the limit. Returns the number removed.
    pub fn prune(&self, now: u64) -> usize {
        let window = self.config.confirmation_window_secs;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !(e.status.is_terminal() && now.saturating_sub(e.updated_at) > window));

        if self.entries.len() > self.config.max_states {
            // settled states go first, then the oldest by first sighting
            let mut order: Vec<(bool, u64, Hash256)> = self
                .entries
                .iter()
                .map(|e| (!e.status.is_terminal(), e.first_seen, *e.key()))
                .collect();
            order.sort();
            let excess = self.entries.len() - self.config.max_states;
            for (_, _, hash) in order.into_iter().take(excess) {
                self.entries.remove(&hash);
            }
        }

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!("Pruned {} mint states", removed);
        }
        removed
    }

    /// Drain the misbehavior evidence pool
    pub fn take_evidence(&self) -> Vec<MisbehaviorEvidence> {
        std::mem::take(&mut *self.evidence.lock())
    }

    pub fn status(&self, hash: &Hash256) -> Option<MintStatus> {
        self.entries.get(hash).map(|e| e.status)
    }

    /// Copy of a burn's consensus state
    pub fn entry(&self, hash: &Hash256) -> Option<MintEntry> {
        self.entries.get(hash).map(|e| e.clone())
    }

    /// Burns waiting on confirmations
    pub fn confirming(&self) -> Vec<Hash256> {
        let mut hashes: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|e| e.status == MintStatus::Confirming)
            .map(|e| *e.key())
            .collect();
        hashes.sort();
        hashes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ConsensusStats {
        let mut stats = ConsensusStats {
            pending_evidence: self.evidence.lock().len(),
            ..ConsensusStats::default()
        };
        for entry in self.entries.iter() {
            match entry.status {
                MintStatus::Detected => stats.detected += 1,
                MintStatus::Validated => stats.validated += 1,
                MintStatus::Confirming => stats.confirming += 1,
                MintStatus::Minted => stats.minted += 1,
                MintStatus::Rejected => stats.rejected += 1,
            }
        }
        stats
    }

    /// Forget every burn (for testing)
    pub fn clear(&self) {
        self.entries.clear();
        self.evidence.lock().clear();
    }
}

fn agreeing_signers(entry: &MintEntry) -> Vec<Address> {
    match &entry.burn {
        Some(burn) => entry
            .confirmations
            .values()
            .filter(|c| c.agrees_with(&burn.recipient, burn.amount))
            .map(|c| c.sequencer)
            .collect(),
        None => Vec::new(),
    }
}
