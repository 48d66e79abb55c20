use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::{params, transaction::Transaction},
    crypto,
};

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("expected block number {expected}, got {got}")]
    NotNextNumber { expected: u64, got: u64 },

    #[error("parent hash does not match the current head")]
    ParentMismatch,

    #[error("block timestamp out of range")]
    TimestampOutOfRange,

    #[error("expected difficulty {expected}, got {got}")]
    WrongDifficulty { expected: u64, got: u64 },

    #[error("stored hash does not match the block contents")]
    HashMismatch,

    #[error("block hash does not meet the difficulty target")]
    InsufficientWork,

    #[error("malformed coinbase: {0}")]
    BadCoinbase(String),

    #[error("block exceeds the contract gas limit")]
    GasLimitExceeded,

    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A block. `hash` commits to every other field through the canonical
/// serialization; the miner varies `nonce` until the hash meets `difficulty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub block_number: u64,

    /// Millisecond epoch; non-decreasing along the chain
    pub timestamp: u64,

    /// Index 0 is always the coinbase
    pub transactions: Vec<Transaction>,

    /// Required count of leading hex-zero nibbles in `hash`
    pub difficulty: u64,

    pub parent_hash: String,

    pub nonce: u64,

    #[serde(default)]
    pub hash: String,
}

impl Block {
    pub fn new(
        block_number: u64,
        timestamp: u64,
        transactions: Vec<Transaction>,
        difficulty: u64,
        parent_hash: String,
    ) -> Block {
        Block {
            block_number,
            timestamp,
            transactions,
            difficulty,
            parent_hash,
            nonce: 0,
            hash: String::new(),
        }
    }

    /// The canonical pre-image fed to SHA-256, excluding `nonce` and `hash`.
    /// The block hash is SHA-256 over this pre-image with the decimal nonce
    /// appended, so the miner recomputes only the final hash per attempt.
    pub fn mining_preimage(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{}{}{}{}{}",
            self.block_number,
            self.timestamp,
            serde_json::to_string(&self.transactions)?,
            self.difficulty,
            self.parent_hash
        ))
    }

    pub fn hash_for_nonce(preimage: &str, nonce: u64) -> String {
        crypto::sha256_hex(format!("{preimage}{nonce}").as_bytes())
    }

    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        Ok(Block::hash_for_nonce(&self.mining_preimage()?, self.nonce))
    }

    /// Set `hash` from the current contents
    pub fn seal(&mut self) -> Result<(), serde_json::Error> {
        self.hash = self.compute_hash()?;
        Ok(())
    }

    /// Leading hex-zero-nibble count ≥ difficulty
    pub fn meets_difficulty(hash: &str, difficulty: u64) -> bool {
        hash.chars().take(difficulty as usize).all(|c| c == '0')
            && hash.len() as u64 >= difficulty
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Non-coinbase transactions
    pub fn body_transactions(&self) -> &[Transaction] {
        if self.transactions.is_empty() {
            &[]
        } else {
            &self.transactions[1..]
        }
    }

    pub fn total_gas(&self) -> BigUint {
        self.body_transactions()
            .iter()
            .fold(BigUint::zero(), |sum, tx| sum + &tx.gas)
    }

    pub fn total_contract_gas(&self) -> BigUint {
        self.body_transactions()
            .iter()
            .fold(BigUint::zero(), |sum, tx| sum + tx.contract_gas())
    }

    /// Reward the coinbase must pay: block reward plus all declared fees
    pub fn expected_coinbase_amount(&self) -> BigUint {
        params::block_reward() + self.total_gas() + self.total_contract_gas()
    }

    /// The coinbase must be the first transaction, signed by MINT, carrying
    /// no fee or payload of its own, and paying exactly the block reward
    /// plus the fees of every other transaction.
    pub fn check_coinbase(&self) -> Result<(), BlockError> {
        let coinbase = self
            .coinbase()
            .ok_or_else(|| BlockError::BadCoinbase("block has no transactions".to_string()))?;

        let signer = coinbase
            .sender_public_key()
            .map_err(|e| BlockError::BadCoinbase(format!("unrecoverable signer: {e}")))?;
        if signer != params::mint_keypair().public_hex() {
            return Err(BlockError::BadCoinbase("not signed by mint".to_string()));
        }
        if !coinbase.gas.is_zero() || !coinbase.additional_data.is_empty() {
            return Err(BlockError::BadCoinbase(
                "coinbase must not carry gas or payload".to_string(),
            ));
        }
        if coinbase.amount != self.expected_coinbase_amount() {
            return Err(BlockError::BadCoinbase(format!(
                "amount {} != reward + fees {}",
                coinbase.amount,
                self.expected_coinbase_amount()
            )));
        }
        Ok(())
    }
}
