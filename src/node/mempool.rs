use std::collections::HashMap;

use log::debug;
use num_bigint::BigUint;
use num_traits::Zero;
use tokio::sync::RwLock;

use crate::core::{
    params,
    state::{AccountSource, StateStore},
    transaction::{Transaction, TransactionError},
};

/// In-memory ordered pool of pending, validated transactions. Admission
/// additionally enforces that a sender cannot overspend across its pooled
/// transactions, and that no two pooled transactions of one sender share a
/// timestamp.
pub struct Mempool {
    transactions: RwLock<Vec<Transaction>>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool {
            transactions: RwLock::new(Vec::new()),
        }
    }

    pub async fn add(&self, tx: Transaction, state: &StateStore) -> Result<(), TransactionError> {
        tx.validate(state)?;

        let sender = tx.sender_address()?;
        let balance = state
            .account(&sender)?
            .map(|account| account.balance)
            .unwrap_or_else(BigUint::zero);

        let mut pool = self.transactions.write().await;
        let mut pooled_spend = BigUint::zero();
        for pooled in pool.iter() {
            if pooled.sender_address().ok().as_deref() == Some(sender.as_str()) {
                if pooled.timestamp == tx.timestamp {
                    return Err(TransactionError::DuplicatePooledTimestamp(tx.timestamp));
                }
                pooled_spend += pooled.total_spend();
            }
        }
        if balance < pooled_spend + tx.total_spend() {
            return Err(TransactionError::PooledOverspend);
        }

        pool.push(tx);
        Ok(())
    }

    /// Re-check every pooled transaction against the state at the new head,
    /// dropping entries that no longer hold (consumed timestamps, spent
    /// balances). Per-sender cumulative feasibility is rebuilt in pool order.
    pub async fn revalidate(&self, state: &StateStore) {
        let mut pool = self.transactions.write().await;
        let previous = std::mem::take(&mut *pool);
        let mut pooled_spend: HashMap<String, BigUint> = HashMap::new();

        for tx in previous {
            let keep = match (tx.validate(state), tx.sender_address()) {
                (Ok(()), Ok(sender)) => {
                    let spent = pooled_spend.entry(sender.clone()).or_default();
                    let balance = state
                        .account(&sender)
                        .ok()
                        .flatten()
                        .map(|account| account.balance)
                        .unwrap_or_else(BigUint::zero);
                    if balance >= &*spent + tx.total_spend() {
                        *spent += tx.total_spend();
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };

            if keep {
                pool.push(tx);
            } else if let Ok(hash) = tx.hash_hex() {
                debug!("Dropping stale pooled transaction {hash}");
            }
        }
    }

    /// Select transactions greedily in pool order, keeping the summed
    /// contract gas under the block gas limit. The pool is left untouched;
    /// consumed entries fall out at the next revalidation.
    pub async fn take_candidates(&self) -> Vec<Transaction> {
        let limit = params::block_gas_limit();
        let mut used = BigUint::zero();
        let mut candidates = Vec::new();

        for tx in self.transactions.read().await.iter() {
            let contract_gas = tx.contract_gas();
            if &used + &contract_gas > limit {
                continue;
            }
            used += contract_gas;
            candidates.push(tx.clone());
        }
        candidates
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.read().await.clone()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new()
    }
}
