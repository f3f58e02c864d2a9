//! Sequencer node configuration
//!
//! Read from an optional JSON file; a few fields can be overridden on the
//! command line.

use anyhow::Context;
use ed25519_dalek::{SigningKey, VerifyingKey};
use l1_bridge::{BurnValidatorConfig, ReorgMonitorConfig};
use l1_integration::{Amount, ChainId, COIN};
use l2_consensus::{ConsensusConfig, SequencerInfo};
use l2_fraud_proof::{ChallengeConfig, FraudProofConfig, STANDARD_CHALLENGE_PERIOD};
use l2_runtime::StateManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stake assumed for a sequencer entry without one
pub const DEFAULT_SEQUENCER_STAKE: Amount = 1_000 * COIN;

/// A sequencer set member as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerEntry {
    /// Hex ed25519 public key
    pub public_key: String,
    #[serde(default = "default_stake")]
    pub stake: Amount,
}

fn default_stake() -> Amount {
    DEFAULT_SEQUENCER_STAKE
}

/// Sequencer node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: ChainId,
    /// Hex ed25519 secret key of this node; without one the node only observes
    pub secret_key: Option<String>,
    pub sequencers: Vec<SequencerEntry>,
    /// How long a sealed state root stays open to fraud proofs
    pub state_root_challenge_period: u64,
    pub state: StateManagerConfig,
    pub burns: BurnValidatorConfig,
    pub reorg: ReorgMonitorConfig,
    pub consensus: ConsensusConfig,
    pub fraud: FraudProofConfig,
    pub challenges: ChallengeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let burns = BurnValidatorConfig::default();
        Self {
            chain_id: burns.chain_id,
            secret_key: None,
            sequencers: Vec::new(),
            state_root_challenge_period: STANDARD_CHALLENGE_PERIOD,
            state: StateManagerConfig::default(),
            burns,
            reorg: ReorgMonitorConfig::default(),
            consensus: ConsensusConfig::default(),
            fraud: FraudProofConfig::default(),
            challenges: ChallengeConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: NodeConfig =
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        let chain_id = config.chain_id;
        Ok(config.with_chain_id(chain_id))
    }

    /// Set the chain id on every service that checks it
    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = chain_id;
        self.burns.chain_id = chain_id;
        self.fraud.chain_id = chain_id;
        self
    }

    /// Decode the configured sequencer set
    pub fn sequencer_infos(&self) -> anyhow::Result<Vec<SequencerInfo>> {
        self.sequencers
            .iter()
            .map(|entry| {
                let bytes = decode_key(&entry.public_key).context("sequencer public key")?;
                let key = VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| anyhow::anyhow!("invalid sequencer public key {}: {}", entry.public_key, e))?;
                Ok(SequencerInfo::new(key, entry.stake))
            })
            .collect()
    }

    /// Decode the node's own signing key, if any
    pub fn signing_key(&self) -> anyhow::Result<Option<SigningKey>> {
        match &self.secret_key {
            Some(hex_key) => Ok(Some(SigningKey::from_bytes(&decode_key(hex_key).context("node secret key")?))),
            None => Ok(None),
        }
    }
}

fn decode_key(hex_key: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim_start_matches("0x"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("expected 32 key bytes, got {}", b.len()))
}
