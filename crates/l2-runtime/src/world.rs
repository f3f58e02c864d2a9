//! World state and the transaction state-transition function
//!
//! `WorldState` is a value: cloning it is O(1) because every component is
//! either a persistent tree or an `Arc`-shared map. Transactions execute
//! against a clone which replaces the original only on success, which is
//! what makes every state transition atomic.

use crate::account::{AccountState, ArchivedAccount, MAX_REPUTATION};
use crate::error::StateError;
use crate::executor::{ContractCall, ContractExecutor, ExecutionError, StateDelta, StateView};
use crate::smt::SparseMerkleTree;
use crate::transaction::{contract_address, L2Transaction, TransactionKind, BASE_GAS, CODE_BYTE_GAS};
use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::{Address, Amount, Hash256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameters of a single execution
pub struct ExecContext<'a> {
    pub executor: &'a dyn ContractExecutor,
    pub reputation_authority: Option<Address>,
    /// Accept system kinds (minter, challenge handler, replay)
    pub allow_system: bool,
}

/// Result of a successful execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub gas_used: u64,
    pub logs: Vec<Vec<u8>>,
}

/// The tree roots the state root is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct StateCommitment {
    pub accounts: Hash256,
    pub archive: Hash256,
    pub code: Hash256,
}

impl StateCommitment {
    /// State root: `H(accounts || archive || code)`
    pub fn root(&self) -> Hash256 {
        Hash256::digest_parts(&[self.accounts.as_ref(), self.archive.as_ref(), self.code.as_ref()])
    }
}

/// Complete L2 state at one point in time
#[derive(Clone, Default)]
pub struct WorldState {
    accounts: SparseMerkleTree,
    storage: Arc<BTreeMap<Address, SparseMerkleTree>>,
    code: Arc<BTreeMap<Hash256, Vec<u8>>>,
    /// Code hash -> code hash; the hash already binds the bytes
    code_tree: SparseMerkleTree,
    archived: Arc<BTreeMap<Address, ArchivedAccount>>,
    archive_tree: SparseMerkleTree,
    block_number: u64,
}

impl WorldState {
    /// Empty state positioned at `block_number`
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            ..Self::default()
        }
    }

    /// Roots of the account, archive and code trees
    pub fn commitment(&self) -> StateCommitment {
        StateCommitment {
            accounts: self.accounts.root(),
            archive: self.archive_tree.root(),
            code: self.code_tree.root(),
        }
    }

    /// State root over accounts, archived accounts and contract code
    pub fn root(&self) -> Hash256 {
        self.commitment().root()
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn set_block_number(&mut self, block_number: u64) {
        self.block_number = block_number;
    }

    /// The account tree itself, for proofs
    pub fn account_tree(&self) -> &SparseMerkleTree {
        &self.accounts
    }

    /// Decode an account; absent accounts are empty
    pub fn load(&self, address: &Address) -> Result<AccountState, StateError> {
        match self.accounts.get(&address.to_key()) {
            Some(bytes) => AccountState::from_bytes(bytes).map_err(|e| {
                StateError::Consistency(format!("undecodable account {}: {}", address, e))
            }),
            None => Ok(AccountState::default()),
        }
    }

    fn store(&mut self, address: &Address, account: &AccountState) {
        if account.is_empty() {
            self.accounts.delete(&address.to_key());
        } else {
            self.accounts.put(&address.to_key(), &account.to_bytes());
        }
    }

    /// Raw storage tree of a contract
    pub fn storage_tree(&self, address: &Address) -> Option<&SparseMerkleTree> {
        self.storage.get(address)
    }

    pub fn code(&self, code_hash: &Hash256) -> Option<&[u8]> {
        self.code.get(code_hash).map(|c| c.as_slice())
    }

    pub fn archived(&self, address: &Address) -> Option<&ArchivedAccount> {
        self.archived.get(address)
    }

    pub fn archived_accounts(&self) -> impl Iterator<Item = (&Address, &ArchivedAccount)> {
        self.archived.iter()
    }

    pub fn code_entries(&self) -> impl Iterator<Item = (&Hash256, &Vec<u8>)> {
        self.code.iter()
    }

    pub fn storage_entries(&self) -> impl Iterator<Item = (&Address, &SparseMerkleTree)> {
        self.storage.iter()
    }

    /// All live accounts in key order
    pub fn accounts(&self) -> Result<Vec<(Address, AccountState)>, StateError> {
        self.accounts
            .entries()
            .into_iter()
            .map(|(key, bytes)| {
                let address = Address::from_slice(&key.0[..20])
                    .ok_or_else(|| StateError::Consistency("bad account key".to_string()))?;
                let account = AccountState::from_bytes(&bytes).map_err(|e| {
                    StateError::Consistency(format!("undecodable account {}: {}", address, e))
                })?;
                Ok((address, account))
            })
            .collect()
    }

    /// Sum of live and archived balances
    pub fn total_supply(&self) -> Result<u128, StateError> {
        let live: u128 = self
            .accounts()?
            .iter()
            .map(|(_, a)| a.balance as u128)
            .sum();
        let archived: u128 = self.archived.values().map(|a| a.state.balance as u128).sum();
        Ok(live + archived)
    }

    /// Rebuild a state from persisted parts
    pub fn from_parts(
        accounts: Vec<(Address, AccountState)>,
        storage: BTreeMap<Address, SparseMerkleTree>,
        code: BTreeMap<Hash256, Vec<u8>>,
        archived: BTreeMap<Address, ArchivedAccount>,
        block_number: u64,
    ) -> Self {
        let code_tree = SparseMerkleTree::from_entries(code.keys().map(|hash| (*hash, hash.0.to_vec())));
        let archive_tree =
            SparseMerkleTree::from_entries(archived.iter().map(|(address, entry)| (address.to_key(), entry.leaf())));
        let mut state = Self {
            accounts: SparseMerkleTree::new(),
            storage: Arc::new(storage),
            code: Arc::new(code),
            code_tree,
            archived: Arc::new(archived),
            archive_tree,
            block_number,
        };
        for (address, account) in accounts {
            state.store(&address, &account);
        }
        state
    }

    /// Execute `tx` in place. On error `self` may be partially modified, so
    /// callers run this on a clone and keep the clone only on success.
    pub fn execute(&mut self, tx: &L2Transaction, ctx: &ExecContext<'_>) -> Result<ExecOutcome, StateError> {
        if tx.kind.is_system() {
            if !ctx.allow_system {
                return Err(StateError::Malformed(
                    "system transaction submitted through the user path".to_string(),
                ));
            }
            self.execute_system(&tx.kind)?;
            return Ok(ExecOutcome::default());
        }

        if tx.sender.is_reserved() {
            return Err(StateError::Malformed(format!(
                "reserved address {} cannot send transactions",
                tx.sender
            )));
        }

        let mut sender = self.load(&tx.sender)?;
        if tx.nonce != sender.nonce {
            return Err(StateError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }

        match &tx.kind {
            TransactionKind::Transfer { to, amount } => {
                if *amount == 0 {
                    return Err(StateError::Malformed("zero-value transfer".to_string()));
                }
                if *to == tx.sender {
                    return Err(StateError::Malformed("self transfer".to_string()));
                }
                if to.is_reserved() {
                    return Err(StateError::Malformed(format!("transfer to reserved address {}", to)));
                }
                charge_gas(tx.gas_limit, BASE_GAS)?;
                debit(&tx.sender, &mut sender, *amount)?;
                self.bump_sender(&tx.sender, sender);
                self.credit(to, *amount)?;
                Ok(ExecOutcome {
                    gas_used: BASE_GAS,
                    logs: Vec::new(),
                })
            }

            TransactionKind::Deploy { code, value } => {
                if code.is_empty() {
                    return Err(StateError::Malformed("empty contract code".to_string()));
                }
                let gas = BASE_GAS + CODE_BYTE_GAS * code.len() as u64;
                charge_gas(tx.gas_limit, gas)?;

                let address = contract_address(&tx.sender, tx.nonce);
                let mut contract = self.load(&address)?;
                if contract.is_contract() {
                    return Err(StateError::Malformed(format!("contract address {} is occupied", address)));
                }

                debit(&tx.sender, &mut sender, *value)?;
                self.bump_sender(&tx.sender, sender);

                let code_hash = Hash256::digest(code);
                Arc::make_mut(&mut self.code).insert(code_hash, code.clone());
                self.code_tree.put(&code_hash, code_hash.as_ref());
                contract.code_hash = code_hash;
                contract.balance = add_balance(&address, contract.balance, *value)?;
                contract.last_activity_block = self.block_number;
                self.store(&address, &contract);

                Ok(ExecOutcome {
                    gas_used: gas,
                    logs: vec![address.0.to_vec()],
                })
            }

            TransactionKind::ContractCall { contract, value, input } => {
                charge_gas(tx.gas_limit, BASE_GAS)?;
                let target = self.load(contract)?;
                if !target.is_contract() {
                    return Err(StateError::Malformed(format!("{} is not a contract", contract)));
                }

                debit(&tx.sender, &mut sender, *value)?;
                self.bump_sender(&tx.sender, sender);
                if *value > 0 {
                    self.credit(contract, *value)?;
                }

                let code = self.code(&target.code_hash).map(|c| c.to_vec()).unwrap_or_default();
                let call = ContractCall {
                    caller: tx.sender,
                    contract: *contract,
                    value: *value,
                    input,
                    code: &code,
                    gas_limit: tx.gas_limit - BASE_GAS,
                    block_number: self.block_number,
                };

                let delta = ctx.executor.execute(&call, &*self).map_err(|e| match e {
                    ExecutionError::OutOfGas => StateError::GasExceeded {
                        limit: tx.gas_limit,
                        used: tx.gas_limit,
                    },
                    other => StateError::Malformed(other.to_string()),
                })?;

                let gas_used = BASE_GAS.saturating_add(delta.gas_used);
                charge_gas(tx.gas_limit, gas_used)?;
                self.apply_delta(contract, &delta)?;

                Ok(ExecOutcome {
                    gas_used,
                    logs: delta.logs,
                })
            }

            TransactionKind::SetReputation { subject, score } => {
                if ctx.reputation_authority != Some(tx.sender) {
                    return Err(StateError::Malformed(format!(
                        "{} is not the reputation authority",
                        tx.sender
                    )));
                }
                charge_gas(tx.gas_limit, BASE_GAS)?;
                self.bump_sender(&tx.sender, sender);

                let mut account = self.load(subject)?;
                account.reputation = (*score).min(MAX_REPUTATION);
                self.store(subject, &account);

                Ok(ExecOutcome {
                    gas_used: BASE_GAS,
                    logs: Vec::new(),
                })
            }

            _ => Err(StateError::Malformed("unexpected transaction kind".to_string())),
        }
    }

    fn execute_system(&mut self, kind: &TransactionKind) -> Result<(), StateError> {
        match kind {
            TransactionKind::Mint { recipient, amount, .. } => {
                if *amount == 0 {
                    return Err(StateError::Malformed("zero-value mint".to_string()));
                }
                if recipient.is_reserved() {
                    return Err(StateError::Malformed(format!("mint to reserved address {}", recipient)));
                }
                self.credit(recipient, *amount)
            }

            TransactionKind::Withdraw { owner, amount, .. } => {
                if *amount == 0 {
                    return Err(StateError::Malformed("zero-value withdrawal".to_string()));
                }
                self.move_balance(owner, &Address::WITHDRAWAL_ESCROW, *amount)
            }

            TransactionKind::ReleaseWithdrawal { amount, .. } => self
                .move_balance(&Address::WITHDRAWAL_ESCROW, &Address::RELEASED_SUPPLY, *amount)
                .map_err(escrow_underfunded),

            TransactionKind::RefundWithdrawal { owner, amount, .. } => self
                .move_balance(&Address::WITHDRAWAL_ESCROW, owner, *amount)
                .map_err(escrow_underfunded),

            TransactionKind::ArchiveAccount { address } => self.archive(address),

            TransactionKind::RestoreAccount { address } => self.restore(address),

            _ => Err(StateError::Malformed("not a system transaction".to_string())),
        }
    }

    fn bump_sender(&mut self, address: &Address, mut sender: AccountState) {
        sender.nonce += 1;
        sender.last_activity_block = self.block_number;
        self.store(address, &sender);
    }

    fn credit(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let mut account = self.load(address)?;
        account.balance = add_balance(address, account.balance, amount)?;
        account.last_activity_block = self.block_number;
        self.store(address, &account);
        Ok(())
    }

    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), StateError> {
        let mut source = self.load(from)?;
        debit(from, &mut source, amount)?;
        source.last_activity_block = self.block_number;
        self.store(from, &source);
        self.credit(to, amount)
    }

    fn apply_delta(&mut self, contract: &Address, delta: &StateDelta) -> Result<(), StateError> {
        let net: i128 = delta.balance_changes.iter().map(|c| c.delta).sum();
        if net != 0 {
            return Err(StateError::Malformed(format!(
                "contract delta creates or destroys {} units",
                net
            )));
        }

        for change in &delta.balance_changes {
            if change.address.is_reserved() {
                return Err(StateError::Malformed(format!(
                    "contract delta touches reserved address {}",
                    change.address
                )));
            }
            let mut account = self.load(&change.address)?;
            let updated = account.balance as i128 + change.delta;
            if updated < 0 {
                return Err(StateError::InsufficientBalance {
                    address: change.address,
                    needed: change.delta.unsigned_abs().min(u64::MAX as u128) as Amount,
                    available: account.balance,
                });
            }
            account.balance = Amount::try_from(updated)
                .map_err(|_| StateError::Consistency(format!("balance overflow for {}", change.address)))?;
            account.last_activity_block = self.block_number;
            self.store(&change.address, &account);
        }

        if !delta.storage_writes.is_empty() {
            let storage = Arc::make_mut(&mut self.storage);
            let tree = storage.entry(*contract).or_default();
            for write in &delta.storage_writes {
                match &write.value {
                    Some(value) => tree.put(&write.slot, value),
                    None => tree.delete(&write.slot),
                };
            }
            let storage_root = if tree.is_empty() {
                Hash256::ZERO
            } else {
                tree.root()
            };
            if tree.is_empty() {
                storage.remove(contract);
            }

            let mut account = self.load(contract)?;
            account.storage_root = storage_root;
            account.last_activity_block = self.block_number;
            self.store(contract, &account);
        }

        Ok(())
    }

    fn archive(&mut self, address: &Address) -> Result<(), StateError> {
        let account = self.load(address)?;
        if account.is_empty() {
            return Err(StateError::Malformed(format!("account {} does not exist", address)));
        }
        if account.is_contract() || address.is_reserved() {
            return Err(StateError::Malformed(format!("account {} cannot be archived", address)));
        }
        if self.archived.contains_key(address) {
            return Err(StateError::Malformed(format!("account {} is already archived", address)));
        }

        let entry = ArchivedAccount {
            state: account,
            archived_at_block: self.block_number,
            archive_root: self.accounts.root(),
            proof: self.accounts.generate_proof(&address.to_key()),
        };
        self.archive_tree.put(&address.to_key(), &entry.leaf());
        Arc::make_mut(&mut self.archived).insert(*address, entry);
        self.accounts.delete(&address.to_key());
        Ok(())
    }

    fn restore(&mut self, address: &Address) -> Result<(), StateError> {
        let archived = self
            .archived
            .get(address)
            .cloned()
            .ok_or(StateError::NotArchived(*address))?;

        if !SparseMerkleTree::verify_proof(
            &archived.archive_root,
            &address.to_key(),
            Some(&archived.state.to_bytes()),
            &archived.proof,
        ) {
            return Err(StateError::Consistency(format!(
                "archive proof for {} does not match root {}",
                address, archived.archive_root
            )));
        }

        // funds may have arrived after archiving; merge instead of overwrite
        let live = self.load(address)?;
        let merged = AccountState {
            balance: add_balance(address, live.balance, archived.state.balance)?,
            nonce: live.nonce.max(archived.state.nonce),
            code_hash: archived.state.code_hash,
            storage_root: archived.state.storage_root,
            reputation: archived.state.reputation,
            last_activity_block: self.block_number,
        };
        self.store(address, &merged);
        Arc::make_mut(&mut self.archived).remove(address);
        self.archive_tree.delete(&address.to_key());
        Ok(())
    }
}

impl StateView for WorldState {
    fn account(&self, address: &Address) -> AccountState {
        self.load(address).unwrap_or_else(|e| {
            tracing::error!("State view failed to load {}: {}", address, e);
            AccountState::default()
        })
    }

    fn storage(&self, address: &Address, slot: &Hash256) -> Option<Vec<u8>> {
        self.storage
            .get(address)
            .and_then(|tree| tree.get(slot))
            .map(|v| v.to_vec())
    }
}

fn charge_gas(limit: u64, used: u64) -> Result<(), StateError> {
    if used > limit {
        return Err(StateError::GasExceeded { limit, used });
    }
    Ok(())
}

fn debit(address: &Address, account: &mut AccountState, amount: Amount) -> Result<(), StateError> {
    if account.balance < amount {
        return Err(StateError::InsufficientBalance {
            address: *address,
            needed: amount,
            available: account.balance,
        });
    }
    account.balance -= amount;
    Ok(())
}

fn add_balance(address: &Address, balance: Amount, amount: Amount) -> Result<Amount, StateError> {
    balance
        .checked_add(amount)
        .ok_or_else(|| StateError::Consistency(format!("balance overflow for {}", address)))
}

fn escrow_underfunded(e: StateError) -> StateError {
    match e {
        StateError::InsufficientBalance { needed, available, .. } => StateError::Consistency(format!(
            "withdrawal escrow holds {} but {} was requested",
            available, needed
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{BalanceChange, NoopExecutor, StorageWrite};

    /// Test VM: input[0] selects the behaviour
    struct ScriptedExecutor;

    impl ContractExecutor for ScriptedExecutor {
        fn execute(&self, call: &ContractCall<'_>, _view: &dyn StateView) -> Result<StateDelta, ExecutionError> {
            match call.input.first() {
                // store input[1..] at slot 0
                Some(0) => Ok(StateDelta {
                    storage_writes: vec![StorageWrite {
                        slot: Hash256::ZERO,
                        value: Some(call.input[1..].to_vec()),
                    }],
                    gas_used: 5_000,
                    ..StateDelta::default()
                }),
                // pay the full value back to the caller
                Some(1) => Ok(StateDelta {
                    balance_changes: vec![
                        BalanceChange { address: call.contract, delta: -(call.value as i128) },
                        BalanceChange { address: call.caller, delta: call.value as i128 },
                    ],
                    gas_used: 1_000,
                    ..StateDelta::default()
                }),
                // print money
                Some(2) => Ok(StateDelta {
                    balance_changes: vec![BalanceChange { address: call.caller, delta: 1 }],
                    ..StateDelta::default()
                }),
                Some(3) => Err(ExecutionError::OutOfGas),
                _ => Err(ExecutionError::Reverted("bad selector".to_string())),
            }
        }
    }

    fn user_ctx(executor: &dyn ContractExecutor) -> ExecContext<'_> {
        ExecContext {
            executor,
            reputation_authority: Some(Address([0xaa; 20])),
            allow_system: false,
        }
    }

    fn system_ctx(executor: &dyn ContractExecutor) -> ExecContext<'_> {
        ExecContext {
            executor,
            reputation_authority: None,
            allow_system: true,
        }
    }

    fn funded(address: Address, amount: Amount) -> WorldState {
        let mut world = WorldState::new(1);
        let mint = L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: Hash256([1; 32]),
            recipient: address,
            amount,
        });
        world.execute(&mint, &system_ctx(&NoopExecutor)).unwrap();
        world
    }

    #[test]
    fn test_transfer() {
        let alice = Address([1; 20]);
        let bob = Address([2; 20]);
        let mut world = funded(alice, 100);

        let tx = L2Transaction::transfer(alice, 0, bob, 40);
        let outcome = world.execute(&tx, &user_ctx(&NoopExecutor)).unwrap();
        assert_eq!(outcome.gas_used, BASE_GAS);
        assert_eq!(world.load(&alice).unwrap().balance, 60);
        assert_eq!(world.load(&alice).unwrap().nonce, 1);
        assert_eq!(world.load(&bob).unwrap().balance, 40);
        assert_eq!(world.total_supply().unwrap(), 100);
    }

    #[test]
    fn test_transfer_errors() {
        let alice = Address([1; 20]);
        let bob = Address([2; 20]);
        let world = funded(alice, 100);
        let ctx = user_ctx(&NoopExecutor);

        let cases = vec![
            (L2Transaction::transfer(alice, 1, bob, 10), "nonce"),
            (L2Transaction::transfer(alice, 0, bob, 1_000), "balance"),
            (L2Transaction::transfer(alice, 0, alice, 1), "self"),
            (L2Transaction::transfer(alice, 0, Address::WITHDRAWAL_ESCROW, 1), "reserved"),
            (L2Transaction { gas_limit: 10, ..L2Transaction::transfer(alice, 0, bob, 1) }, "gas"),
        ];
        for (tx, label) in cases {
            let mut copy = world.clone();
            let err = copy.execute(&tx, &ctx).unwrap_err();
            match label {
                "nonce" => assert!(matches!(err, StateError::NonceMismatch { expected: 0, got: 1 })),
                "balance" => assert!(matches!(err, StateError::InsufficientBalance { .. })),
                "gas" => assert!(matches!(err, StateError::GasExceeded { .. })),
                _ => assert!(matches!(err, StateError::Malformed(_))),
            }
        }
    }

    #[test]
    fn test_system_kinds_rejected_on_user_path() {
        let mut world = WorldState::new(1);
        let mint = L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: Hash256([1; 32]),
            recipient: Address([1; 20]),
            amount: 5,
        });
        let err = world.execute(&mint, &user_ctx(&NoopExecutor)).unwrap_err();
        assert!(matches!(err, StateError::Malformed(_)));
    }

    #[test]
    fn test_contract_storage_and_refund() {
        let alice = Address([1; 20]);
        let mut world = funded(alice, 1_000);
        let ctx = user_ctx(&ScriptedExecutor);

        let deploy = L2Transaction {
            sender: alice,
            nonce: 0,
            gas_limit: 100_000,
            kind: TransactionKind::Deploy { code: vec![0x60, 0x00], value: 0 },
        };
        world.execute(&deploy, &ctx).unwrap();
        let contract = contract_address(&alice, 0);
        assert!(world.load(&contract).unwrap().is_contract());

        let store = L2Transaction {
            sender: alice,
            nonce: 1,
            gas_limit: 100_000,
            kind: TransactionKind::ContractCall { contract, value: 0, input: vec![0, 7, 7] },
        };
        world.execute(&store, &ctx).unwrap();
        assert_eq!(world.storage(&contract, &Hash256::ZERO), Some(vec![7, 7]));
        let account = world.load(&contract).unwrap();
        assert_eq!(account.storage_root, world.storage_tree(&contract).unwrap().root());

        let refund = L2Transaction {
            sender: alice,
            nonce: 2,
            gas_limit: 100_000,
            kind: TransactionKind::ContractCall { contract, value: 300, input: vec![1] },
        };
        world.execute(&refund, &ctx).unwrap();
        assert_eq!(world.load(&alice).unwrap().balance, 1_000);
        assert_eq!(world.total_supply().unwrap(), 1_000);
    }

    #[test]
    fn test_contract_delta_must_conserve() {
        let alice = Address([1; 20]);
        let mut world = funded(alice, 1_000);
        let ctx = user_ctx(&ScriptedExecutor);
        let deploy = L2Transaction {
            sender: alice,
            nonce: 0,
            gas_limit: 100_000,
            kind: TransactionKind::Deploy { code: vec![1], value: 0 },
        };
        world.execute(&deploy, &ctx).unwrap();
        let contract = contract_address(&alice, 0);

        let mut copy = world.clone();
        let print = L2Transaction {
            sender: alice,
            nonce: 1,
            gas_limit: 100_000,
            kind: TransactionKind::ContractCall { contract, value: 0, input: vec![2] },
        };
        assert!(matches!(copy.execute(&print, &ctx), Err(StateError::Malformed(_))));

        let mut copy = world.clone();
        let oog = L2Transaction {
            sender: alice,
            nonce: 1,
            gas_limit: 100_000,
            kind: TransactionKind::ContractCall { contract, value: 0, input: vec![3] },
        };
        assert!(matches!(copy.execute(&oog, &ctx), Err(StateError::GasExceeded { .. })));
    }

    #[test]
    fn test_set_reputation_requires_authority() {
        let authority = Address([0xaa; 20]);
        let alice = Address([1; 20]);
        let mut world = funded(alice, 10);
        let ctx = user_ctx(&NoopExecutor);

        let forged = L2Transaction {
            sender: alice,
            nonce: 0,
            gas_limit: BASE_GAS,
            kind: TransactionKind::SetReputation { subject: alice, score: 100 },
        };
        assert!(world.clone().execute(&forged, &ctx).is_err());

        let tx = L2Transaction {
            sender: authority,
            nonce: 0,
            gas_limit: BASE_GAS,
            kind: TransactionKind::SetReputation { subject: alice, score: 250 },
        };
        world.execute(&tx, &ctx).unwrap();
        assert_eq!(world.load(&alice).unwrap().reputation, MAX_REPUTATION);
    }

    #[test]
    fn test_withdrawal_escrow_flow_conserves_supply() {
        let alice = Address([1; 20]);
        let mut world = funded(alice, 100);
        let ctx = system_ctx(&NoopExecutor);
        let id = Hash256([5; 32]);

        world
            .execute(&L2Transaction::system(TransactionKind::Withdraw { withdrawal_id: id, owner: alice, amount: 30 }), &ctx)
            .unwrap();
        assert_eq!(world.load(&Address::WITHDRAWAL_ESCROW).unwrap().balance, 30);

        world
            .execute(&L2Transaction::system(TransactionKind::ReleaseWithdrawal { withdrawal_id: id, amount: 30 }), &ctx)
            .unwrap();
        assert_eq!(world.load(&Address::RELEASED_SUPPLY).unwrap().balance, 30);
        assert_eq!(world.total_supply().unwrap(), 100);

        let err = world
            .execute(&L2Transaction::system(TransactionKind::RefundWithdrawal { withdrawal_id: id, owner: alice, amount: 1 }), &ctx)
            .unwrap_err();
        assert!(matches!(err, StateError::Consistency(_)));
    }

    #[test]
    fn test_archive_and_restore() {
        let alice = Address([1; 20]);
        let mut world = funded(alice, 100);
        let ctx = system_ctx(&NoopExecutor);
        let before = world.root();

        world
            .execute(&L2Transaction::system(TransactionKind::ArchiveAccount { address: alice }), &ctx)
            .unwrap();
        assert!(world.load(&alice).unwrap().is_empty());
        assert!(world.archived(&alice).is_some());
        assert_eq!(world.total_supply().unwrap(), 100);
        assert_eq!(world.commitment().accounts, SparseMerkleTree::new().root());
        assert_ne!(world.root(), WorldState::new(1).root());

        world
            .execute(&L2Transaction::system(TransactionKind::RestoreAccount { address: alice }), &ctx)
            .unwrap();
        assert_eq!(world.load(&alice).unwrap().balance, 100);
        assert!(world.archived(&alice).is_none());
        // same block, so the restored leaf is identical
        assert_eq!(world.root(), before);
    }

    #[test]
    fn test_archive_is_part_of_the_root() {
        let alice = Address([1; 20]);
        let bob = Address([2; 20]);
        let ctx = system_ctx(&NoopExecutor);

        // same live accounts, different archives
        let mut one = funded(alice, 100);
        let mut other = funded(alice, 100);
        let bob_mint = L2Transaction::system(TransactionKind::Mint {
            l1_tx_hash: Hash256([2; 32]),
            recipient: bob,
            amount: 7,
        });
        one.execute(&bob_mint, &ctx).unwrap();
        one.execute(&L2Transaction::system(TransactionKind::ArchiveAccount { address: bob }), &ctx)
            .unwrap();
        assert_eq!(one.commitment().accounts, other.commitment().accounts);
        assert_ne!(one.root(), other.root());

        // archived balances are bound by the root
        other.execute(&bob_mint, &ctx).unwrap();
        other
            .execute(&L2Transaction::system(TransactionKind::ArchiveAccount { address: bob }), &ctx)
            .unwrap();
        assert_eq!(one.root(), other.root());
    }

    #[test]
    fn test_code_is_part_of_the_root() {
        let alice = Address([1; 20]);
        let mut world = funded(alice, 1_000);
        let deploy = L2Transaction {
            sender: alice,
            nonce: 0,
            gas_limit: 100_000,
            kind: TransactionKind::Deploy { code: vec![0x60, 0x01], value: 0 },
        };
        let before = world.commitment();
        world.execute(&deploy, &user_ctx(&NoopExecutor)).unwrap();
        assert_ne!(world.commitment().code, before.code);
        assert_eq!(world.commitment().root(), world.root());
    }

    #[test]
    fn test_rebuilt_world_keeps_its_root() {
        let alice = Address([1; 20]);
        let bob = Address([2; 20]);
        let ctx = system_ctx(&NoopExecutor);
        let mut world = funded(alice, 100);
        world
            .execute(&L2Transaction::system(TransactionKind::Mint { l1_tx_hash: Hash256([2; 32]), recipient: bob, amount: 3 }), &ctx)
            .unwrap();
        world
            .execute(&L2Transaction::system(TransactionKind::ArchiveAccount { address: bob }), &ctx)
            .unwrap();

        let rebuilt = WorldState::from_parts(
            world.accounts().unwrap(),
            world.storage_entries().map(|(a, t)| (*a, t.clone())).collect(),
            world.code_entries().map(|(h, c)| (*h, c.clone())).collect(),
            world.archived_accounts().map(|(a, e)| (*a, e.clone())).collect(),
            world.block_number(),
        );
        assert_eq!(rebuilt.root(), world.root());
    }
}
