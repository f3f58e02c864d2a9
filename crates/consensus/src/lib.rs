//! L2 Consensus - burn-to-mint agreement among the sequencer set
//!
//! Architecture:
//! - A permissioned sequencer set with stake, reputation and jail status
//! - Sequencers sign confirmations for each validated burn
//! - A burn is minted once confirmations cover two thirds of the weight
//! - The minter credits the recipient and records the burn as one unit

pub mod error;
pub mod mint;
pub mod minter;
pub mod sequencer;
pub mod types;

pub use error::{ConsensusError, MintError};
pub use mint::{MintConsensusManager, MintEntry};
pub use minter::{MintReceipt, MinterStats, TokenMinter};
pub use sequencer::{QuorumPolicy, SequencerInfo, SequencerSet};
pub use types::*;
