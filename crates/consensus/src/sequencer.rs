//! Permissioned sequencer set
//!
//! Tracks stake, reputation and jail status per sequencer and answers the
//! quorum question for mint consensus. The quorum policy is fixed when the
//! set is built: stake-weighted if every initial member has stake,
//! one-member-one-vote otherwise.

use crate::error::ConsensusError;
use crate::types::{sequencer_address, MIN_SEQUENCERS_FOR_CONSENSUS};
use ed25519_dalek::VerifyingKey;
use l1_integration::{Address, Amount};
use l2_runtime::MAX_REPUTATION;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// How agreeing sequencers are weighed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuorumPolicy {
    /// Weight is bonded stake
    Stake,
    /// Every eligible member weighs one
    Count,
}

/// A member of the sequencer set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerInfo {
    pub address: Address,
    pub verifying_key: VerifyingKey,
    pub stake: Amount,
    pub reputation: u8,
    pub jailed: bool,
    /// Stake lost to slashing so far
    pub slashed_total: Amount,
}

impl SequencerInfo {
    /// Member with full reputation; the address is derived from the key
    pub fn new(verifying_key: VerifyingKey, stake: Amount) -> Self {
        Self {
            address: sequencer_address(&verifying_key),
            verifying_key,
            stake,
            reputation: MAX_REPUTATION,
            jailed: false,
            slashed_total: 0,
        }
    }
}

/// The sequencer set
pub struct SequencerSet {
    members: RwLock<BTreeMap<Address, SequencerInfo>>,
    policy: QuorumPolicy,
    min_sequencers: usize,
}

impl SequencerSet {
    /// Build the set and fix its quorum policy
    pub fn new(members: Vec<SequencerInfo>, min_sequencers: usize) -> Result<Self, ConsensusError> {
        let policy = if !members.is_empty() && members.iter().all(|m| m.stake > 0) {
            QuorumPolicy::Stake
        } else {
            QuorumPolicy::Count
        };

        let mut map = BTreeMap::new();
        for member in members {
            if map.contains_key(&member.address) {
                return Err(ConsensusError::DuplicateSequencer(member.address));
            }
            map.insert(member.address, member);
        }

        tracing::info!(
            "Sequencer set with {} members, {:?} quorum, minimum {}",
            map.len(),
            policy,
            min_sequencers
        );

        Ok(Self {
            members: RwLock::new(map),
            policy,
            min_sequencers,
        })
    }

    /// Set with the default minimum size
    pub fn with_members(members: Vec<SequencerInfo>) -> Result<Self, ConsensusError> {
        Self::new(members, MIN_SEQUENCERS_FOR_CONSENSUS)
    }

    pub fn policy(&self) -> QuorumPolicy {
        self.policy
    }

    pub fn min_sequencers(&self) -> usize {
        self.min_sequencers
    }

    /// Add a member
    pub fn register(&self, info: SequencerInfo) -> Result<(), ConsensusError> {
        if self.policy == QuorumPolicy::Stake && info.stake == 0 {
            return Err(ConsensusError::ZeroStake(info.address));
        }
        let mut members = self.members.write();
        if members.contains_key(&info.address) {
            return Err(ConsensusError::DuplicateSequencer(info.address));
        }
        tracing::info!("Registered sequencer {} with stake {}", info.address, info.stake);
        members.insert(info.address, info);
        Ok(())
    }

    /// Remove a member
    pub fn remove(&self, address: &Address) -> Option<SequencerInfo> {
        let removed = self.members.write().remove(address);
        if removed.is_some() {
            tracing::info!("Removed sequencer {}", address);
        }
        removed
    }

    pub fn get(&self, address: &Address) -> Option<SequencerInfo> {
        self.members.read().get(address).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.read().contains_key(address)
    }

    /// Key for signature checks
    pub fn verifying_key(&self, address: &Address) -> Option<VerifyingKey> {
        self.members.read().get(address).map(|m| m.verifying_key)
    }

    /// Known and not jailed
    pub fn is_eligible(&self, address: &Address) -> bool {
        self.members
            .read()
            .get(address)
            .map(|m| !m.jailed)
            .unwrap_or(false)
    }

    fn weight(&self, member: &SequencerInfo) -> u128 {
        if member.jailed {
            return 0;
        }
        match self.policy {
            QuorumPolicy::Stake => member.stake as u128,
            QuorumPolicy::Count => 1,
        }
    }

    /// Voting weight of a member; zero if unknown or jailed
    pub fn weight_of(&self, address: &Address) -> u128 {
        self.members
            .read()
            .get(address)
            .map(|m| self.weight(m))
            .unwrap_or(0)
    }

    /// Combined weight of all eligible members
    pub fn total_weight(&self) -> u128 {
        self.members.read().values().map(|m| self.weight(m)).sum()
    }

    pub fn eligible_count(&self) -> usize {
        self.members.read().values().filter(|m| !m.jailed).count()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Weight of the distinct eligible members among `signers`, and the
    /// total eligible weight
    pub fn tally(&self, signers: &[Address]) -> (u128, u128) {
        let members = self.members.read();
        let distinct: BTreeSet<&Address> = signers.iter().collect();
        let agreeing = distinct
            .into_iter()
            .filter_map(|a| members.get(a))
            .map(|m| self.weight(m))
            .sum();
        let total = members.values().map(|m| self.weight(m)).sum();
        (agreeing, total)
    }

    /// True if `signers` hold at least two thirds of the eligible weight
    pub fn has_quorum(&self, signers: &[Address]) -> bool {
        if self.eligible_count() < self.min_sequencers {
            return false;
        }
        let (agreeing, total) = self.tally(signers);
        total > 0 && agreeing * 3 >= total * 2
    }

    /// Cut `percent` of a member's stake, at least `min_amount` when the
    /// stake allows it. Returns the amount taken. A member left without
    /// stake under the stake-weighted policy is jailed.
    pub fn slash(&self, address: &Address, percent: u8, min_amount: Amount) -> Result<Amount, ConsensusError> {
        let mut members = self.members.write();
        let member = members
            .get_mut(address)
            .ok_or(ConsensusError::UnknownSequencer(*address))?;

        let proportional = ((member.stake as u128 * percent.min(100) as u128) / 100) as Amount;
        let amount = proportional.max(min_amount).min(member.stake);

        member.stake -= amount;
        member.slashed_total = member.slashed_total.saturating_add(amount);
        if self.policy == QuorumPolicy::Stake && member.stake == 0 {
            member.jailed = true;
        }

        tracing::warn!(
            "Slashed sequencer {} by {} ({}%), remaining stake {}{}",
            address,
            amount,
            percent,
            member.stake,
            if member.jailed { ", jailed" } else { "" }
        );
        Ok(amount)
    }

    /// Lower a member's reputation
    pub fn penalize(&self, address: &Address, penalty: u8) -> Result<u8, ConsensusError> {
        let mut members = self.members.write();
        let member = members
            .get_mut(address)
            .ok_or(ConsensusError::UnknownSequencer(*address))?;
        member.reputation = member.reputation.saturating_sub(penalty);
        tracing::info!("Sequencer {} reputation now {}", address, member.reputation);
        Ok(member.reputation)
    }

    /// Credit stake to a member
    pub fn add_stake(&self, address: &Address, amount: Amount) -> Result<Amount, ConsensusError> {
        let mut members = self.members.write();
        let member = members
            .get_mut(address)
            .ok_or(ConsensusError::UnknownSequencer(*address))?;
        member.stake = member.stake.saturating_add(amount);
        Ok(member.stake)
    }

    pub fn jail(&self, address: &Address) -> Result<(), ConsensusError> {
        self.set_jailed(address, true)
    }

    pub fn unjail(&self, address: &Address) -> Result<(), ConsensusError> {
        self.set_jailed(address, false)
    }

    fn set_jailed(&self, address: &Address, jailed: bool) -> Result<(), ConsensusError> {
        let mut members = self.members.write();
        let member = members
            .get_mut(address)
            .ok_or(ConsensusError::UnknownSequencer(*address))?;
        member.jailed = jailed;
        tracing::info!("Sequencer {} {}", address, if jailed { "jailed" } else { "released" });
        Ok(())
    }

    /// Members ordered by address
    pub fn members(&self) -> Vec<SequencerInfo> {
        self.members.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use l1_integration::COIN;
    use rand::rngs::OsRng;

    fn member(stake: Amount) -> SequencerInfo {
        SequencerInfo::new(SigningKey::generate(&mut OsRng).verifying_key(), stake)
    }

    #[test]
    fn test_policy_is_fixed_at_construction() {
        let staked = SequencerSet::with_members(vec![member(10), member(20), member(30)]).unwrap();
        assert_eq!(staked.policy(), QuorumPolicy::Stake);
        assert!(matches!(staked.register(member(0)), Err(ConsensusError::ZeroStake(_))));
        staked.register(member(5)).unwrap();
        assert_eq!(staked.total_weight(), 65);

        let counted = SequencerSet::with_members(vec![member(10), member(0), member(30)]).unwrap();
        assert_eq!(counted.policy(), QuorumPolicy::Count);
        counted.register(member(0)).unwrap();
        assert_eq!(counted.total_weight(), 4);
    }

    #[test]
    fn test_duplicate_member() {
        let m = member(1);
        assert!(matches!(
            SequencerSet::with_members(vec![m.clone(), m.clone()]),
            Err(ConsensusError::DuplicateSequencer(_))
        ));
        let set = SequencerSet::with_members(vec![m.clone()]).unwrap();
        assert!(set.register(m).is_err());
    }

    #[test]
    fn test_count_quorum() {
        let members = vec![member(0), member(0), member(0)];
        let addrs: Vec<Address> = members.iter().map(|m| m.address).collect();
        let set = SequencerSet::with_members(members).unwrap();

        assert!(!set.has_quorum(&addrs[..1]));
        assert!(set.has_quorum(&addrs[..2]));
        // repeated signers count once
        assert!(!set.has_quorum(&[addrs[0], addrs[0], addrs[0]]));
        // outsiders weigh nothing
        assert!(!set.has_quorum(&[addrs[0], Address([9; 20])]));
    }

    #[test]
    fn test_stake_quorum() {
        let members = vec![member(60), member(20), member(20)];
        let addrs: Vec<Address> = members.iter().map(|m| m.address).collect();
        let set = SequencerSet::with_members(members).unwrap();

        // 60 of 100 is short of two thirds
        assert!(!set.has_quorum(&addrs[..1]));
        assert!(set.has_quorum(&addrs[..2]));
        // 40 of 100
        assert!(!set.has_quorum(&addrs[1..]));
    }

    #[test]
    fn test_minimum_size_and_jail() {
        let members = vec![member(0), member(0), member(0)];
        let addrs: Vec<Address> = members.iter().map(|m| m.address).collect();
        let set = SequencerSet::with_members(members).unwrap();

        set.jail(&addrs[2]).unwrap();
        assert!(!set.is_eligible(&addrs[2]));
        assert_eq!(set.weight_of(&addrs[2]), 0);
        // two eligible members is below the minimum of three
        assert!(!set.has_quorum(&addrs[..2]));

        set.unjail(&addrs[2]).unwrap();
        assert!(set.has_quorum(&addrs[..2]));
    }

    #[test]
    fn test_slash() {
        let members = vec![member(100 * COIN), member(40 * COIN), member(COIN)];
        let addrs: Vec<Address> = members.iter().map(|m| m.address).collect();
        let set = SequencerSet::with_members(members).unwrap();

        // 75% of 100 COIN
        assert_eq!(set.slash(&addrs[0], 75, 50 * COIN).unwrap(), 75 * COIN);
        // 50% of 40 is raised to the minimum, capped at the stake
        assert_eq!(set.slash(&addrs[1], 50, 50 * COIN).unwrap(), 40 * COIN);
        let slashed = set.get(&addrs[1]).unwrap();
        assert_eq!(slashed.stake, 0);
        assert_eq!(slashed.slashed_total, 40 * COIN);
        assert!(slashed.jailed);

        assert_eq!(set.penalize(&addrs[0], 50).unwrap(), 50);
        assert_eq!(set.penalize(&addrs[0], 80).unwrap(), 0);
        assert!(matches!(
            set.slash(&Address([7; 20]), 10, 0),
            Err(ConsensusError::UnknownSequencer(_))
        ));
    }
}
