//! Interactive bisection over execution checkpoints
//!
//! The sequencer and the challenger narrow a disputed block down to a single
//! step: the sequencer claims the root at the midpoint of the disputed range
//! and the challenger says whether it agrees. Once the range is one step
//! wide, that step alone is re-executed to decide who lied.

use crate::error::FraudProofError;
use crate::fraud_proof::FraudProofSystem;
use crate::types::FraudProofResolution;
use l1_integration::{Address, Hash256};
use l2_runtime::{ExecutionTrace, L2Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Waiting for the sequencer's midpoint claim
    SequencerTurn,
    /// Waiting for the challenger to agree or disagree
    ChallengerTurn,
    /// One step left; ready for `resolve_interactive`
    Converged,
    Resolved { challenger_won: bool },
    TimedOut { challenger_won: bool },
}

/// One bisection game over a fraud proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveSession {
    pub id: u64,
    pub proof_hash: Hash256,
    pub sequencer: Address,
    pub challenger: Address,
    pub previous_state_root: Hash256,
    pub block_number: u64,
    pub transactions: Vec<L2Transaction>,
    /// Honest checkpoints computed when the session opened
    pub trace: ExecutionTrace,
    /// Last checkpoint both parties agree on
    pub lower: usize,
    /// First checkpoint under dispute
    pub upper: usize,
    /// Roots the sequencer stands behind, by checkpoint
    pub claims: BTreeMap<usize, Hash256>,
    pub pending_midpoint: Option<usize>,
    pub moves: u32,
    pub deadline: u64,
    pub status: SessionStatus,
}

impl InteractiveSession {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::SequencerTurn | SessionStatus::ChallengerTurn | SessionStatus::Converged
        )
    }

    fn converged(&self) -> bool {
        self.upper - self.lower <= 1
    }

    fn advance(&mut self, now: u64, timeout: u64) {
        self.status = if self.converged() {
            SessionStatus::Converged
        } else {
            SessionStatus::SequencerTurn
        };
        self.deadline = now.saturating_add(timeout);
    }
}

impl FraudProofSystem {
    /// Open a bisection session over a pending proof
    pub fn start_interactive(&self, proof_hash: &Hash256, now: u64) -> Result<u64, FraudProofError> {
        let proof = self.pending_proof(proof_hash)?;
        let transactions = self.disputed_transactions(&proof)?;
        let trace = self
            .state
            .trace(&proof.previous_state_root, proof.disputed_block_number, &transactions)?;
        let steps = trace.steps();
        if steps == 0 {
            return Err(FraudProofError::Malformed("no transactions to bisect".to_string()));
        }

        let mut inner = self.inner.write();
        if let Some(open) = inner
            .sessions
            .values()
            .find(|s| s.proof_hash == *proof_hash && s.is_active())
        {
            return Err(FraudProofError::SessionState {
                session: open.id,
                reason: "proof already has an open session".to_string(),
            });
        }

        let id = inner.next_session;
        inner.next_session += 1;

        let claims = BTreeMap::from([(0, proof.previous_state_root), (steps, proof.disputed_state_root)]);
        let mut session = InteractiveSession {
            id,
            proof_hash: *proof_hash,
            sequencer: proof.sequencer,
            challenger: proof.challenger,
            previous_state_root: proof.previous_state_root,
            block_number: proof.disputed_block_number,
            transactions,
            trace,
            lower: 0,
            upper: steps,
            claims,
            pending_midpoint: None,
            moves: 0,
            deadline: 0,
            status: SessionStatus::SequencerTurn,
        };
        session.advance(now, self.config.step_timeout_secs);

        tracing::info!(
            "Interactive session {} opened for proof {} over {} steps",
            id,
            proof_hash,
            steps
        );
        inner.sessions.insert(id, session);
        Ok(id)
    }

    /// Sequencer's claimed root at the midpoint of the disputed range
    pub fn submit_midpoint(&self, session: u64, root: Hash256, now: u64) -> Result<usize, FraudProofError> {
        let max_moves = self.config.max_interactive_steps;
        let mut inner = self.inner.write();
        let s = inner
            .sessions
            .get_mut(&session)
            .ok_or(FraudProofError::UnknownSession(session))?;
        check_turn(s, SessionStatus::SequencerTurn, now, max_moves)?;

        let mid = (s.lower + s.upper) / 2;
        s.claims.insert(mid, root);
        s.pending_midpoint = Some(mid);
        s.moves += 1;
        s.status = SessionStatus::ChallengerTurn;
        s.deadline = now.saturating_add(self.config.step_timeout_secs);

        tracing::debug!("Session {}: sequencer claims {} at checkpoint {}", session, root, mid);
        Ok(mid)
    }

    /// Challenger's answer to the pending midpoint claim
    pub fn respond(&self, session: u64, agrees: bool, now: u64) -> Result<SessionStatus, FraudProofError> {
        let max_moves = self.config.max_interactive_steps;
        let mut inner = self.inner.write();
        let s = inner
            .sessions
            .get_mut(&session)
            .ok_or(FraudProofError::UnknownSession(session))?;
        check_turn(s, SessionStatus::ChallengerTurn, now, max_moves)?;

        let mid = s.pending_midpoint.take().ok_or(FraudProofError::SessionState {
            session,
            reason: "no midpoint to answer".to_string(),
        })?;
        if agrees {
            s.lower = mid;
        } else {
            s.upper = mid;
        }
        s.moves += 1;
        s.advance(now, self.config.step_timeout_secs);

        tracing::debug!(
            "Session {}: challenger {} checkpoint {}, range now {}..{}",
            session,
            if agrees { "agrees with" } else { "disputes" },
            mid,
            s.lower,
            s.upper
        );
        Ok(s.status)
    }

    pub fn session(&self, session: u64) -> Option<InteractiveSession> {
        self.inner.read().sessions.get(&session).cloned()
    }

    /// Re-execute the single remaining step and settle the proof
    pub fn resolve_interactive(&self, session: u64, now: u64) -> Result<FraudProofResolution, FraudProofError> {
        let s = self.session(session).ok_or(FraudProofError::UnknownSession(session))?;
        if s.status != SessionStatus::Converged {
            return Err(FraudProofError::SessionState {
                session,
                reason: format!("cannot resolve while {:?}", s.status),
            });
        }

        let challenger_won = self.step_is_wrong(&s)?;
        let resolution = self.settle(&s.proof_hash, challenger_won, now)?;
        if let Some(stored) = self.inner.write().sessions.get_mut(&session) {
            stored.status = SessionStatus::Resolved { challenger_won };
        }
        tracing::info!(
            "Session {} resolved for the {}",
            session,
            if challenger_won { "challenger" } else { "sequencer" }
        );
        Ok(resolution)
    }

    /// True if the sequencer's claim at `upper` does not follow from the
    /// agreed root at `lower`
    fn step_is_wrong(&self, s: &InteractiveSession) -> Result<bool, FraudProofError> {
        let agreed = s.claims.get(&s.lower).copied().unwrap_or(Hash256::ZERO);
        if s.trace.checkpoint(s.lower) != Some(agreed) {
            // the challenger accepted a wrong root
            return Ok(false);
        }

        let range = s.trace.step_range(s.upper).ok_or(FraudProofError::SessionState {
            session: s.id,
            reason: format!("no step ends at checkpoint {}", s.upper),
        })?;
        let honest = match self
            .state
            .replay(&s.previous_state_root, s.block_number, &s.transactions[..range.end])
        {
            Ok(root) => root,
            Err(l2_runtime::StateError::BatchFailed { .. }) => Hash256::ZERO,
            Err(e) => return Err(e.into()),
        };

        let claimed = s.claims.get(&s.upper).copied().unwrap_or(Hash256::ZERO);
        Ok(claimed != honest)
    }

    /// Settle sessions whose party on turn missed its deadline; that party
    /// loses
    pub fn process_timeouts(&self, now: u64) -> Vec<(u64, FraudProofResolution)> {
        let expired: Vec<(u64, Hash256, bool)> = self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| now > s.deadline)
            .filter_map(|s| match s.status {
                SessionStatus::SequencerTurn => Some((s.id, s.proof_hash, true)),
                SessionStatus::ChallengerTurn => Some((s.id, s.proof_hash, false)),
                _ => None,
            })
            .collect();

        let mut settled = Vec::new();
        for (id, proof_hash, challenger_won) in expired {
            tracing::warn!(
                "Session {} timed out on the {}'s turn",
                id,
                if challenger_won { "sequencer" } else { "challenger" }
            );
            if let Some(s) = self.inner.write().sessions.get_mut(&id) {
                s.status = SessionStatus::TimedOut { challenger_won };
            }
            match self.settle(&proof_hash, challenger_won, now) {
                Ok(resolution) => settled.push((id, resolution)),
                Err(e) => tracing::error!("Settling timed-out session {} failed: {}", id, e),
            }
        }
        settled
    }
}

fn check_turn(s: &InteractiveSession, expected: SessionStatus, now: u64, max_moves: u32) -> Result<(), FraudProofError> {
    if s.status != expected {
        return Err(FraudProofError::SessionState {
            session: s.id,
            reason: format!("expected {:?}, session is {:?}", expected, s.status),
        });
    }
    if now > s.deadline {
        return Err(FraudProofError::SessionState {
            session: s.id,
            reason: "turn deadline passed".to_string(),
        });
    }
    if s.moves >= max_moves {
        return Err(FraudProofError::SessionState {
            session: s.id,
            reason: format!("move limit {} reached", max_moves),
        });
    }
    Ok(())
}
