use std::collections::BTreeMap;

use log::warn;
use thiserror::Error;

use crate::core::{
    account::Account,
    block::Block,
    chain::ChainError,
    vm::{self, VmInput},
};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Anything accounts can be looked up in: the persistent store, an overlay
/// mid-execution, or an in-memory fixture in tests
pub trait AccountSource {
    fn account(&self, address: &str) -> Result<Option<Account>, StateError>;
}

/// The persistent account state, keyed by 64-hex address.
/// Values are JSON so external tooling can read the store directly.
pub struct StateStore {
    tree: sled::Tree,
}

impl StateStore {
    pub fn new(tree: sled::Tree) -> StateStore {
        StateStore { tree }
    }

    pub fn accounts(&self) -> Result<Vec<(String, Account)>, StateError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            let address = String::from_utf8_lossy(&key).to_string();
            out.push((address, serde_json::from_slice(&value)?));
        }
        Ok(out)
    }
}

impl AccountSource for StateStore {
    fn account(&self, address: &str) -> Result<Option<Account>, StateError> {
        match self.tree.get(address.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

/// All block execution runs against an overlay and commits in one batch:
/// a failing transaction aborts the whole block with the store untouched,
/// and readers never observe a partially applied block.
pub struct StateOverlay<'a> {
    base: &'a StateStore,
    touched: BTreeMap<String, Account>,
}

impl AccountSource for StateOverlay<'_> {
    fn account(&self, address: &str) -> Result<Option<Account>, StateError> {
        match self.touched.get(address) {
            Some(account) => Ok(Some(account.clone())),
            None => self.base.account(address),
        }
    }
}

impl<'a> StateOverlay<'a> {
    pub fn new(base: &'a StateStore) -> StateOverlay<'a> {
        StateOverlay {
            base,
            touched: BTreeMap::new(),
        }
    }

    fn exists(&self, address: &str) -> Result<bool, StateError> {
        Ok(self.account(address)?.is_some())
    }

    /// Load an account into the overlay, creating it if absent
    fn entry(&mut self, address: &str) -> Result<&mut Account, StateError> {
        if !self.touched.contains_key(address) {
            let account = self
                .base
                .account(address)?
                .unwrap_or_else(Account::new_empty);
            self.touched.insert(address.to_string(), account);
        }
        Ok(self
            .touched
            .get_mut(address)
            .expect("entry inserted just above"))
    }

    /// Apply every transaction of `block` in order. The coinbase (index 0)
    /// is credit-only; each later transaction is validated against the
    /// overlay, so balance and replay constraints hold cumulatively.
    pub fn execute_block(&mut self, block: &Block, log_contracts: bool) -> Result<(), ChainError> {
        for (index, tx) in block.transactions.iter().enumerate() {
            if index == 0 {
                let recipient = self.entry(&tx.recipient)?;
                recipient.balance += &tx.amount;
                continue;
            }

            tx.validate(&*self)?;
            let sender_address = tx.sender_address()?;
            let recipient_existed = self.exists(&tx.recipient)?;

            let spend = tx.total_spend();
            let sender = self.entry(&sender_address)?;
            sender.balance -= &spend;
            sender.timestamps.push(tx.timestamp);

            let recipient = self.entry(&tx.recipient)?;
            recipient.balance += &tx.amount;

            if tx.additional_data.sc_body.is_some() && !recipient_existed {
                // contract deployment: the body binds on first touch
                recipient.set_body(tx.additional_data.sc_body.clone().unwrap_or_default());
            } else if recipient.has_code() {
                let gas_limit = tx.contract_gas();
                let mut storage = recipient.storage.clone();
                match vm::execute(
                    &recipient.body,
                    &mut storage,
                    &VmInput {
                        caller: &sender_address,
                        value: &tx.amount,
                        gas_limit: &gas_limit,
                    },
                    log_contracts,
                ) {
                    Ok(()) => recipient.storage = storage,
                    // the transfer stands and the gas is spent; only the
                    // storage writes are discarded
                    Err(e) => {
                        if log_contracts {
                            warn!("[vm] contract {} reverted: {e}", tx.recipient);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Persist every touched account in one atomic batch
    pub fn commit(self) -> Result<(), StateError> {
        let mut batch = sled::Batch::default();
        for (address, account) in &self.touched {
            batch.insert(address.as_bytes(), serde_json::to_vec(account)?);
        }
        self.base.tree.apply_batch(batch)?;
        Ok(())
    }
}
