//! L2 → L1 withdrawal requests

use l1_integration::{Address, Amount, Hash256};
use serde::{Deserialize, Serialize};

/// Challenge period of an ordinary withdrawal
pub const STANDARD_CHALLENGE_PERIOD: u64 = 7 * 24 * 3600;

/// Challenge period for senders with a high reputation
pub const FAST_CHALLENGE_PERIOD: u64 = 24 * 3600;

/// Reputation needed for the fast period
pub const FAST_WITHDRAWAL_MIN_REPUTATION: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    /// Inside its challenge period
    Pending,
    /// At least one challenge is open
    Challenged,
    /// Challenge period over; may be completed
    Ready,
    Completed,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn can_transition_to(self, to: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, to),
            (Pending, Challenged)
                | (Pending, Ready)
                | (Pending, Cancelled)
                | (Challenged, Pending)
                | (Challenged, Cancelled)
                | (Ready, Completed)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Cancelled)
    }
}

/// A withdrawal whose funds sit in escrow until it completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub withdrawal_id: Hash256,
    pub l2_sender: Address,
    pub l1_recipient: Address,
    pub amount: Amount,
    /// L2 block the escrow transaction was logged in
    pub l2_block_number: u64,
    pub l2_tx_hash: Hash256,
    /// Root right after the escrow transaction
    pub state_root: Hash256,
    pub initiated_at: u64,
    pub challenge_deadline: u64,
    pub status: WithdrawalStatus,
    /// Sender reputation when the withdrawal was made
    pub reputation_score: u8,
}

impl WithdrawalRequest {
    /// Withdrawal id over the request fields and a per-handler sequence
    pub fn compute_id(sender: &Address, l1_recipient: &Address, amount: Amount, initiated_at: u64, sequence: u64) -> Hash256 {
        Hash256::digest_parts(&[
            b"withdrawal",
            sender.as_ref(),
            l1_recipient.as_ref(),
            &amount.to_le_bytes(),
            &initiated_at.to_le_bytes(),
            &sequence.to_le_bytes(),
        ])
    }

    /// Challenge period granted to a sender with `reputation`
    pub fn challenge_period(reputation: u8, standard: u64, fast: u64, fast_min_reputation: u8) -> u64 {
        if reputation >= fast_min_reputation {
            fast
        } else {
            standard
        }
    }

    pub fn is_past_deadline(&self, now: u64) -> bool {
        now > self.challenge_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use WithdrawalStatus::*;
        assert!(Pending.can_transition_to(Challenged));
        assert!(Challenged.can_transition_to(Pending));
        assert!(Ready.can_transition_to(Completed));
        assert!(!Challenged.can_transition_to(Ready));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Ready.can_transition_to(Cancelled));
        assert!(Cancelled.is_final());
        assert!(!Ready.is_final());
    }

    #[test]
    fn test_period_and_id() {
        let period = |rep| {
            WithdrawalRequest::challenge_period(
                rep,
                STANDARD_CHALLENGE_PERIOD,
                FAST_CHALLENGE_PERIOD,
                FAST_WITHDRAWAL_MIN_REPUTATION,
            )
        };
        assert_eq!(period(80), FAST_CHALLENGE_PERIOD);
        assert_eq!(period(79), STANDARD_CHALLENGE_PERIOD);

        let a = Address([1; 20]);
        let b = Address([2; 20]);
        let id = WithdrawalRequest::compute_id(&a, &b, 5, 10, 0);
        assert_eq!(id, WithdrawalRequest::compute_id(&a, &b, 5, 10, 0));
        assert_ne!(id, WithdrawalRequest::compute_id(&a, &b, 5, 10, 1));
    }
}
