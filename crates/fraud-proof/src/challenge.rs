//! Withdrawal challenge handler
//!
//! Withdrawals escrow their funds for a challenge period. Anyone may
//! challenge one by posting a bonded fraud proof; the proof's outcome
//! decides whether the withdrawal is cancelled or goes ahead.

use crate::error::ChallengeError;
use crate::fraud_proof::FraudProofSystem;
use crate::types::{FraudProof, FraudProofResolution, FRAUD_PROOF_CHALLENGE_BOND};
use crate::withdrawal::{
    WithdrawalRequest, WithdrawalStatus, FAST_CHALLENGE_PERIOD, FAST_WITHDRAWAL_MIN_REPUTATION,
    STANDARD_CHALLENGE_PERIOD,
};
use l1_bridge::WriteGate;
use l1_integration::{Address, Amount, Hash256};
use l2_runtime::{L2Transaction, StateManager, TransactionKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Bond required to challenge a withdrawal
pub const WITHDRAWAL_CHALLENGE_BOND: Amount = FRAUD_PROOF_CHALLENGE_BOND;

/// Active challenges one address may hold
pub const MAX_CHALLENGES_PER_ADDRESS: usize = 10;

/// Seconds a challenge may stay unresolved
pub const CHALLENGE_RESOLUTION_TIMEOUT: u64 = 24 * 3600;

/// Invalid challenges that get a challenger banned
pub const INVALID_CHALLENGE_BAN_THRESHOLD: u32 = 5;

pub const CHALLENGER_BAN_DURATION: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Pending,
    /// The fraud proof is being adjudicated
    Validating,
    /// Fraud proven; the withdrawal was cancelled
    Valid,
    /// Fraud not proven; the bond was slashed
    Invalid,
    /// Not resolved in time; the bond was returned
    Expired,
    /// Superseded by another valid challenge
    Cancelled,
}

impl ChallengeStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ChallengeStatus::Pending | ChallengeStatus::Validating)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalChallenge {
    pub challenge_id: Hash256,
    pub withdrawal_id: Hash256,
    pub challenger: Address,
    pub fraud_proof_hash: Hash256,
    pub bond: Amount,
    pub reason: String,
    pub created_at: u64,
    pub status: ChallengeStatus,
    pub resolved_at: Option<u64>,
}

/// Track record of one challenger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengerStats {
    pub total: u32,
    pub valid: u32,
    pub invalid: u32,
    pub expired: u32,
    pub bonds_lost: Amount,
    pub bonds_returned: Amount,
    pub banned_until: Option<u64>,
}

impl ChallengerStats {
    pub fn is_banned(&self, now: u64) -> bool {
        self.banned_until.is_some_and(|until| now < until)
    }
}

/// Outcome of `resolve_challenge`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeResult {
    /// Fraud proven; the withdrawal is cancelled
    FraudProven {
        challenge_id: Hash256,
        withdrawal_id: Hash256,
        resolution: FraudProofResolution,
        /// Escrow returned to the sender; zero when the rollback already
        /// undid the escrow
        refunded: Amount,
    },
    /// Fraud not proven; the withdrawal goes on
    Rejected {
        challenge_id: Hash256,
        withdrawal_id: Hash256,
        resolution: FraudProofResolution,
        withdrawal_status: WithdrawalStatus,
    },
}

/// What `process_expired` changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub expired_challenges: Vec<Hash256>,
    pub ready_withdrawals: Vec<Hash256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    pub standard_period: u64,
    pub fast_period: u64,
    pub fast_min_reputation: u8,
    pub min_bond: Amount,
    pub max_active_per_address: usize,
    pub resolution_timeout: u64,
    pub ban_threshold: u32,
    pub ban_duration: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            standard_period: STANDARD_CHALLENGE_PERIOD,
            fast_period: FAST_CHALLENGE_PERIOD,
            fast_min_reputation: FAST_WITHDRAWAL_MIN_REPUTATION,
            min_bond: WITHDRAWAL_CHALLENGE_BOND,
            max_active_per_address: MAX_CHALLENGES_PER_ADDRESS,
            resolution_timeout: CHALLENGE_RESOLUTION_TIMEOUT,
            ban_threshold: INVALID_CHALLENGE_BAN_THRESHOLD,
            ban_duration: CHALLENGER_BAN_DURATION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChallengeStats {
    pub pending_withdrawals: usize,
    pub challenged_withdrawals: usize,
    pub ready_withdrawals: usize,
    pub archived_withdrawals: usize,
    pub active_challenges: usize,
    pub escrowed: u128,
}

#[derive(Default)]
struct HandlerInner {
    withdrawals: HashMap<Hash256, WithdrawalRequest>,
    /// Completed and cancelled withdrawals
    archived: HashMap<Hash256, WithdrawalRequest>,
    challenges: HashMap<Hash256, WithdrawalChallenge>,
    challengers: HashMap<Address, ChallengerStats>,
    sequence: u64,
}

impl HandlerInner {
    fn active_challenges_on(&self, withdrawal_id: &Hash256) -> usize {
        self.challenges
            .values()
            .filter(|c| c.withdrawal_id == *withdrawal_id && c.status.is_active())
            .count()
    }

    fn archive(&mut self, id: &Hash256) {
        if let Some(w) = self.withdrawals.remove(id) {
            self.archived.insert(*id, w);
        }
    }

    /// Put a challenged withdrawal back in the queue once nothing disputes it
    fn release_if_unchallenged(&mut self, id: &Hash256) -> Option<WithdrawalStatus> {
        let open = self.active_challenges_on(id);
        let w = self.withdrawals.get_mut(id)?;
        if w.status == WithdrawalStatus::Challenged && open == 0 {
            w.status = WithdrawalStatus::Pending;
        }
        Some(w.status)
    }
}

/// Manages withdrawals and the challenges against them
pub struct ChallengeHandler {
    config: ChallengeConfig,
    state: Arc<StateManager>,
    fraud: Arc<FraudProofSystem>,
    gate: WriteGate,
    inner: RwLock<HandlerInner>,
}

impl ChallengeHandler {
    pub fn new(config: ChallengeConfig, state: Arc<StateManager>, fraud: Arc<FraudProofSystem>, gate: WriteGate) -> Self {
        Self {
            config,
            state,
            fraud,
            gate,
            inner: RwLock::new(HandlerInner::default()),
        }
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    /// Escrow `amount` of the sender's balance for withdrawal to L1
    pub fn initiate_withdrawal(
        &self,
        sender: Address,
        l1_recipient: Address,
        amount: Amount,
        now: u64,
    ) -> Result<WithdrawalRequest, ChallengeError> {
        if amount == 0 {
            return Err(ChallengeError::Malformed("zero-value withdrawal".to_string()));
        }
        if sender.is_reserved() {
            return Err(ChallengeError::Malformed(format!("reserved sender {}", sender)));
        }

        let reputation = self.state.get_account(&sender).reputation;
        let period = WithdrawalRequest::challenge_period(
            reputation,
            self.config.standard_period,
            self.config.fast_period,
            self.config.fast_min_reputation,
        );

        let sequence = {
            let mut inner = self.inner.write();
            inner.sequence += 1;
            inner.sequence
        };
        let withdrawal_id = WithdrawalRequest::compute_id(&sender, &l1_recipient, amount, now, sequence);
        let tx = L2Transaction::system(TransactionKind::Withdraw {
            withdrawal_id,
            owner: sender,
            amount,
        });

        let (state_root, l2_block_number) = {
            let _gate = self.gate.lock();
            let block = self.state.block_number();
            (self.state.apply_system(&tx)?, block)
        };

        let request = WithdrawalRequest {
            withdrawal_id,
            l2_sender: sender,
            l1_recipient,
            amount,
            l2_block_number,
            l2_tx_hash: tx.hash(),
            state_root,
            initiated_at: now,
            challenge_deadline: now.saturating_add(period),
            status: WithdrawalStatus::Pending,
            reputation_score: reputation,
        };
        self.inner.write().withdrawals.insert(withdrawal_id, request.clone());

        tracing::info!(
            "Withdrawal {} of {} from {} to {}, challengeable until {}",
            withdrawal_id,
            amount,
            sender,
            l1_recipient,
            request.challenge_deadline
        );
        Ok(request)
    }

    /// Dispute a withdrawal with a bonded fraud proof
    pub fn challenge_withdrawal(
        &self,
        withdrawal_id: &Hash256,
        proof: FraudProof,
        reason: String,
        now: u64,
    ) -> Result<WithdrawalChallenge, ChallengeError> {
        let challenger = proof.challenger;
        {
            let inner = self.inner.read();
            let w = inner
                .withdrawals
                .get(withdrawal_id)
                .ok_or(ChallengeError::UnknownWithdrawal(*withdrawal_id))?;
            if !matches!(w.status, WithdrawalStatus::Pending | WithdrawalStatus::Challenged) {
                return Err(ChallengeError::InvalidStatus {
                    id: *withdrawal_id,
                    status: w.status,
                });
            }
            if w.is_past_deadline(now) {
                return Err(ChallengeError::DeadlinePassed(*withdrawal_id));
            }
            if proof.disputed_state_root != w.state_root {
                return Err(ChallengeError::RootMismatch {
                    id: *withdrawal_id,
                    expected: w.state_root,
                    got: proof.disputed_state_root,
                });
            }
            if let Some(stats) = inner.challengers.get(&challenger) {
                if stats.is_banned(now) {
                    return Err(ChallengeError::Banned {
                        address: challenger,
                        until: stats.banned_until.unwrap_or(now),
                    });
                }
            }
            let active = inner
                .challenges
                .values()
                .filter(|c| c.challenger == challenger && c.status.is_active())
                .count();
            if active >= self.config.max_active_per_address {
                return Err(ChallengeError::TooManyChallenges(challenger));
            }
        }
        if proof.challenge_bond < self.config.min_bond {
            return Err(ChallengeError::InsufficientBond {
                have: proof.challenge_bond,
                need: self.config.min_bond,
            });
        }

        let bond = proof.challenge_bond;
        let fraud_proof_hash = self.fraud.submit_fraud_proof(proof, now)?;
        let challenge_id = Hash256::digest_parts(&[b"challenge", withdrawal_id.as_ref(), fraud_proof_hash.as_ref()]);
        let challenge = WithdrawalChallenge {
            challenge_id,
            withdrawal_id: *withdrawal_id,
            challenger,
            fraud_proof_hash,
            bond,
            reason,
            created_at: now,
            status: ChallengeStatus::Pending,
            resolved_at: None,
        };

        let mut inner = self.inner.write();
        if let Some(w) = inner.withdrawals.get_mut(withdrawal_id) {
            w.status = WithdrawalStatus::Challenged;
        }
        inner.challengers.entry(challenger).or_default().total += 1;
        inner.challenges.insert(challenge_id, challenge.clone());

        tracing::info!(
            "Withdrawal {} challenged by {} with proof {}: {}",
            withdrawal_id,
            challenger,
            fraud_proof_hash,
            challenge.reason
        );
        Ok(challenge)
    }

    /// Adjudicate a challenge through its fraud proof
    pub fn resolve_challenge(&self, challenge_id: &Hash256, now: u64) -> Result<ChallengeResult, ChallengeError> {
        let challenge = {
            let mut inner = self.inner.write();
            let c = inner
                .challenges
                .get_mut(challenge_id)
                .ok_or(ChallengeError::UnknownChallenge(*challenge_id))?;
            if c.status != ChallengeStatus::Pending {
                return Err(ChallengeError::AlreadyResolved(*challenge_id));
            }
            c.status = ChallengeStatus::Validating;
            c.clone()
        };

        let resolution = match self.fraud.resolve(&challenge.fraud_proof_hash, now) {
            Ok(resolution) => resolution,
            Err(e) => {
                if let Some(c) = self.inner.write().challenges.get_mut(challenge_id) {
                    c.status = ChallengeStatus::Pending;
                }
                return Err(e.into());
            }
        };

        if resolution.is_proven() {
            self.challenge_upheld(&challenge, resolution, now)
        } else {
            Ok(self.challenge_rejected(&challenge, resolution, now))
        }
    }

    fn challenge_upheld(
        &self,
        challenge: &WithdrawalChallenge,
        resolution: FraudProofResolution,
        now: u64,
    ) -> Result<ChallengeResult, ChallengeError> {
        let withdrawal = self.inner.read().withdrawals.get(&challenge.withdrawal_id).cloned();

        let refunded = match &withdrawal {
            Some(w) if self.escrow_survived(w) => {
                let _gate = self.gate.lock();
                self.state.apply_system(&L2Transaction::system(TransactionKind::RefundWithdrawal {
                    withdrawal_id: w.withdrawal_id,
                    owner: w.l2_sender,
                    amount: w.amount,
                }))?;
                w.amount
            }
            _ => 0,
        };

        let mut superseded = Vec::new();
        {
            let mut inner = self.inner.write();
            if let Some(c) = inner.challenges.get_mut(&challenge.challenge_id) {
                c.status = ChallengeStatus::Valid;
                c.resolved_at = Some(now);
            }
            let stats = inner.challengers.entry(challenge.challenger).or_default();
            stats.valid += 1;
            stats.bonds_returned += challenge.bond;

            for c in inner.challenges.values_mut() {
                if c.withdrawal_id == challenge.withdrawal_id && c.status == ChallengeStatus::Pending {
                    c.status = ChallengeStatus::Cancelled;
                    c.resolved_at = Some(now);
                    superseded.push((c.fraud_proof_hash, c.challenger, c.bond));
                }
            }
            if let Some(w) = inner.withdrawals.get_mut(&challenge.withdrawal_id) {
                w.status = WithdrawalStatus::Cancelled;
            }
            inner.archive(&challenge.withdrawal_id);
        }

        for (proof_hash, challenger, bond) in superseded {
            match self.fraud.expire_proof(&proof_hash) {
                Ok(_) => self.inner.write().challengers.entry(challenger).or_default().bonds_returned += bond,
                Err(e) => tracing::warn!("Could not return bond of superseded proof {}: {}", proof_hash, e),
            }
        }

        tracing::warn!(
            "Challenge {} upheld: withdrawal {} cancelled, refunded {}",
            challenge.challenge_id,
            challenge.withdrawal_id,
            refunded
        );
        Ok(ChallengeResult::FraudProven {
            challenge_id: challenge.challenge_id,
            withdrawal_id: challenge.withdrawal_id,
            resolution,
            refunded,
        })
    }

    fn challenge_rejected(
        &self,
        challenge: &WithdrawalChallenge,
        resolution: FraudProofResolution,
        now: u64,
    ) -> ChallengeResult {
        let mut inner = self.inner.write();
        if let Some(c) = inner.challenges.get_mut(&challenge.challenge_id) {
            c.status = ChallengeStatus::Invalid;
            c.resolved_at = Some(now);
        }

        let threshold = self.config.ban_threshold;
        let ban_until = now.saturating_add(self.config.ban_duration);
        let stats = inner.challengers.entry(challenge.challenger).or_default();
        stats.invalid += 1;
        stats.bonds_lost += challenge.bond;
        if stats.invalid >= threshold && !stats.is_banned(now) {
            stats.banned_until = Some(ban_until);
            tracing::warn!(
                "Challenger {} banned until {} after {} invalid challenges",
                challenge.challenger,
                ban_until,
                stats.invalid
            );
        }

        let withdrawal_status = inner
            .release_if_unchallenged(&challenge.withdrawal_id)
            .unwrap_or(WithdrawalStatus::Cancelled);

        tracing::info!(
            "Challenge {} rejected, withdrawal {} is {:?}",
            challenge.challenge_id,
            challenge.withdrawal_id,
            withdrawal_status
        );
        ChallengeResult::Rejected {
            challenge_id: challenge.challenge_id,
            withdrawal_id: challenge.withdrawal_id,
            resolution,
            withdrawal_status,
        }
    }

    /// True if the escrow transaction is still part of live state
    fn escrow_survived(&self, w: &WithdrawalRequest) -> bool {
        let open = self.state.block_number();
        if w.l2_block_number < open {
            return true;
        }
        w.l2_block_number == open
            && self
                .state
                .block(open)
                .is_some_and(|b| b.transactions.iter().any(|tx| tx.hash() == w.l2_tx_hash))
    }

    /// Expire stale challenges and release withdrawals past their deadline
    pub fn process_expired(&self, now: u64) -> ExpiryReport {
        let mut report = ExpiryReport::default();
        let mut expired = Vec::new();
        {
            let mut inner = self.inner.write();
            let timeout = self.config.resolution_timeout;
            for c in inner.challenges.values_mut() {
                if c.status == ChallengeStatus::Pending && now > c.created_at.saturating_add(timeout) {
                    c.status = ChallengeStatus::Expired;
                    c.resolved_at = Some(now);
                    expired.push((c.challenge_id, c.withdrawal_id, c.fraud_proof_hash, c.challenger, c.bond));
                }
            }
        }

        for (challenge_id, withdrawal_id, proof_hash, challenger, bond) in expired {
            if let Err(e) = self.fraud.expire_proof(&proof_hash) {
                tracing::warn!("Expiring proof {} of challenge {}: {}", proof_hash, challenge_id, e);
            }
            let mut inner = self.inner.write();
            let stats = inner.challengers.entry(challenger).or_default();
            stats.expired += 1;
            stats.bonds_returned += bond;
            inner.release_if_unchallenged(&withdrawal_id);
            report.expired_challenges.push(challenge_id);
            tracing::info!("Challenge {} expired unresolved, bond returned", challenge_id);
        }

        let mut inner = self.inner.write();
        for w in inner.withdrawals.values_mut() {
            if w.status == WithdrawalStatus::Pending && w.is_past_deadline(now) {
                w.status = WithdrawalStatus::Ready;
                report.ready_withdrawals.push(w.withdrawal_id);
                tracing::info!("Withdrawal {} is ready", w.withdrawal_id);
            }
        }
        report
    }

    /// Release a ready withdrawal's escrow
    pub fn complete_withdrawal(&self, withdrawal_id: &Hash256, now: u64) -> Result<WithdrawalRequest, ChallengeError> {
        let w = self.active_withdrawal(withdrawal_id)?;
        match w.status {
            WithdrawalStatus::Ready => {}
            WithdrawalStatus::Pending if !w.is_past_deadline(now) => {
                return Err(ChallengeError::ChallengePeriodActive {
                    id: *withdrawal_id,
                    deadline: w.challenge_deadline,
                })
            }
            status => {
                return Err(ChallengeError::InvalidStatus {
                    id: *withdrawal_id,
                    status,
                })
            }
        }

        {
            let _gate = self.gate.lock();
            self.state.apply_system(&L2Transaction::system(TransactionKind::ReleaseWithdrawal {
                withdrawal_id: *withdrawal_id,
                amount: w.amount,
            }))?;
        }

        let mut inner = self.inner.write();
        let completed = inner.withdrawals.get_mut(withdrawal_id).map(|w| {
            w.status = WithdrawalStatus::Completed;
            w.clone()
        });
        inner.archive(withdrawal_id);
        tracing::info!("Withdrawal {} of {} completed", withdrawal_id, w.amount);
        completed.ok_or(ChallengeError::UnknownWithdrawal(*withdrawal_id))
    }

    /// Sender cancels its own pending withdrawal and gets the escrow back
    pub fn cancel_withdrawal(&self, withdrawal_id: &Hash256, sender: &Address) -> Result<WithdrawalRequest, ChallengeError> {
        let w = self.active_withdrawal(withdrawal_id)?;
        if w.l2_sender != *sender {
            return Err(ChallengeError::NotOwner(*sender));
        }
        if w.status != WithdrawalStatus::Pending {
            return Err(ChallengeError::InvalidStatus {
                id: *withdrawal_id,
                status: w.status,
            });
        }

        {
            let _gate = self.gate.lock();
            self.state.apply_system(&L2Transaction::system(TransactionKind::RefundWithdrawal {
                withdrawal_id: *withdrawal_id,
                owner: w.l2_sender,
                amount: w.amount,
            }))?;
        }

        let mut inner = self.inner.write();
        let cancelled = inner.withdrawals.get_mut(withdrawal_id).map(|w| {
            w.status = WithdrawalStatus::Cancelled;
            w.clone()
        });
        inner.archive(withdrawal_id);
        tracing::info!("Withdrawal {} cancelled by its sender", withdrawal_id);
        cancelled.ok_or(ChallengeError::UnknownWithdrawal(*withdrawal_id))
    }

    fn active_withdrawal(&self, id: &Hash256) -> Result<WithdrawalRequest, ChallengeError> {
        self.inner
            .read()
            .withdrawals
            .get(id)
            .cloned()
            .ok_or(ChallengeError::UnknownWithdrawal(*id))
    }

    /// Active or archived withdrawal
    pub fn withdrawal(&self, id: &Hash256) -> Option<WithdrawalRequest> {
        let inner = self.inner.read();
        inner.withdrawals.get(id).or_else(|| inner.archived.get(id)).cloned()
    }

    pub fn withdrawals_for(&self, sender: &Address) -> Vec<WithdrawalRequest> {
        let inner = self.inner.read();
        let mut found: Vec<WithdrawalRequest> = inner
            .withdrawals
            .values()
            .chain(inner.archived.values())
            .filter(|w| w.l2_sender == *sender)
            .cloned()
            .collect();
        found.sort_by_key(|w| (w.initiated_at, w.withdrawal_id));
        found
    }

    pub fn all_withdrawals(&self) -> Vec<WithdrawalRequest> {
        let inner = self.inner.read();
        inner.withdrawals.values().chain(inner.archived.values()).cloned().collect()
    }

    pub fn challenge(&self, id: &Hash256) -> Option<WithdrawalChallenge> {
        self.inner.read().challenges.get(id).cloned()
    }

    pub fn challenges_for(&self, withdrawal_id: &Hash256) -> Vec<WithdrawalChallenge> {
        self.inner
            .read()
            .challenges
            .values()
            .filter(|c| c.withdrawal_id == *withdrawal_id)
            .cloned()
            .collect()
    }

    pub fn all_challenges(&self) -> Vec<WithdrawalChallenge> {
        self.inner.read().challenges.values().cloned().collect()
    }

    pub fn challenger_stats(&self, address: &Address) -> ChallengerStats {
        self.inner.read().challengers.get(address).cloned().unwrap_or_default()
    }

    pub fn all_challenger_stats(&self) -> Vec<(Address, ChallengerStats)> {
        self.inner
            .read()
            .challengers
            .iter()
            .map(|(a, s)| (*a, s.clone()))
            .collect()
    }

    pub fn is_banned(&self, address: &Address, now: u64) -> bool {
        self.inner
            .read()
            .challengers
            .get(address)
            .is_some_and(|s| s.is_banned(now))
    }

    /// Put back a withdrawal loaded from disk
    pub fn restore_withdrawal(&self, w: WithdrawalRequest) {
        let mut inner = self.inner.write();
        inner.sequence += 1;
        if w.status.is_final() {
            inner.archived.insert(w.withdrawal_id, w);
        } else {
            inner.withdrawals.insert(w.withdrawal_id, w);
        }
    }

    pub fn restore_challenge(&self, c: WithdrawalChallenge) {
        self.inner.write().challenges.insert(c.challenge_id, c);
    }

    pub fn restore_challenger(&self, address: Address, stats: ChallengerStats) {
        self.inner.write().challengers.insert(address, stats);
    }

    pub fn stats(&self) -> ChallengeStats {
        let inner = self.inner.read();
        let count = |status| inner.withdrawals.values().filter(|w| w.status == status).count();
        ChallengeStats {
            pending_withdrawals: count(WithdrawalStatus::Pending),
            challenged_withdrawals: count(WithdrawalStatus::Challenged),
            ready_withdrawals: count(WithdrawalStatus::Ready),
            archived_withdrawals: inner.archived.len(),
            active_challenges: inner.challenges.values().filter(|c| c.status.is_active()).count(),
            escrowed: inner.withdrawals.values().map(|w| w.amount as u128).sum(),
        }
    }
}
