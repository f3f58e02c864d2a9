//! L2 Fraud Proofs - optimistic verification of sequencer commitments
//!
//! Architecture:
//! - Sequencers commit state roots that stay challengeable for a period
//! - Challengers post bonded, signed proofs that are settled by replay
//! - Disputes over long blocks can be narrowed down by bisection
//! - Proven fraud slashes the sequencer and rolls state back
//! - Withdrawals wait out a challenge period in escrow

pub mod challenge;
pub mod error;
pub mod fraud_proof;
pub mod interactive;
pub mod ledger;
pub mod persistence;
pub mod types;
pub mod withdrawal;

pub use challenge::{
    ChallengeConfig, ChallengeHandler, ChallengeResult, ChallengeStats, ChallengeStatus, ChallengerStats,
    ExpiryReport, WithdrawalChallenge, CHALLENGER_BAN_DURATION, CHALLENGE_RESOLUTION_TIMEOUT,
    INVALID_CHALLENGE_BAN_THRESHOLD, MAX_CHALLENGES_PER_ADDRESS, WITHDRAWAL_CHALLENGE_BOND,
};
pub use error::{ChallengeError, FraudProofError};
pub use fraud_proof::{CommittedRoot, FraudProofStats, FraudProofSystem, StoredProof};
pub use interactive::{InteractiveSession, SessionStatus};
pub use ledger::{BondLedger, LedgerSnapshot};
pub use persistence::{ChallengePersistence, FraudProofPersistence};
pub use types::*;
pub use withdrawal::{
    WithdrawalRequest, WithdrawalStatus, FAST_CHALLENGE_PERIOD, FAST_WITHDRAWAL_MIN_REPUTATION,
    STANDARD_CHALLENGE_PERIOD,
};
