use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::{
        params,
        state::{AccountSource, StateError},
        utils,
    },
    crypto::{self, CryptoError, KeyPair},
};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("recipient is not a 64-hex address: {0}")]
    MalformedRecipient(String),

    #[error("transaction is not signed")]
    Unsigned,

    #[error("gas below minimum transaction fee")]
    FeeTooLow,

    #[error("contract gas below minimum contract fee")]
    ContractFeeTooLow,

    #[error("mint key is only valid as the coinbase signer")]
    MintOutsideCoinbase,

    #[error("unknown sender: {0}")]
    UnknownSender(String),

    #[error("balance too low: have {have}, need {need}")]
    InsufficientBalance { have: BigUint, need: BigUint },

    #[error("timestamp {0} already consumed by sender")]
    ReplayedTimestamp(u64),

    #[error("sender overspends across pooled transactions")]
    PooledOverspend,

    #[error("sender already has a pooled transaction with timestamp {0}")]
    DuplicatePooledTimestamp(u64),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Optional transaction payload. Field order is lexicographic by wire name
/// (contractGas, scBody, storageMap) so the canonical JSON used for hashing
/// needs no post-sorting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalData {
    #[serde(with = "utils::dec_str_opt", skip_serializing_if = "Option::is_none")]
    pub contract_gas: Option<BigUint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sc_body: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_map: Option<BTreeMap<String, String>>,
}

impl AdditionalData {
    pub fn is_empty(&self) -> bool {
        self.contract_gas.is_none() && self.sc_body.is_none() && self.storage_map.is_none()
    }
}

/// A value transfer, optionally deploying or invoking a contract.
/// `timestamp` doubles as the sender nonce: unique per sender, forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// 64-hex account address of the recipient
    pub recipient: String,

    #[serde(with = "utils::dec_str")]
    pub amount: BigUint,

    /// Declared transaction fee, paid to the miner
    #[serde(with = "utils::dec_str")]
    pub gas: BigUint,

    #[serde(default)]
    pub additional_data: AdditionalData,

    /// Millisecond epoch; also the sender replay nonce
    pub timestamp: u64,

    /// Recoverable ECDSA signature (r ‖ s ‖ recovery id), 130 hex chars.
    /// Excluded from the signing hash.
    #[serde(default)]
    pub signature: String,
}

impl Transaction {
    pub fn new(
        recipient: String,
        amount: BigUint,
        gas: BigUint,
        additional_data: AdditionalData,
        timestamp: u64,
    ) -> Transaction {
        Transaction {
            recipient,
            amount,
            gas,
            additional_data,
            timestamp,
            signature: String::new(),
        }
    }

    /// The canonical signing pre-image: fields in fixed order, numbers as
    /// decimal strings, mappings in lexicographic key order, signature
    /// excluded. Any deviation breaks hash compatibility across nodes.
    pub fn signing_payload(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{}{}{}{}{}",
            self.recipient,
            self.amount.to_str_radix(10),
            self.gas.to_str_radix(10),
            serde_json::to_string(&self.additional_data)?,
            self.timestamp
        ))
    }

    /// Canonical transaction hash (64 hex)
    pub fn hash_hex(&self) -> Result<String, serde_json::Error> {
        Ok(crypto::sha256_hex(self.signing_payload()?.as_bytes()))
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), TransactionError> {
        let hash = self.hash_hex()?;
        self.signature = keypair.sign_hash(&hash)?;
        Ok(())
    }

    /// Recover the sender public key from the signature
    pub fn sender_public_key(&self) -> Result<String, TransactionError> {
        if self.signature.is_empty() {
            return Err(TransactionError::Unsigned);
        }
        let hash = self.hash_hex()?;
        Ok(crypto::recover_public_hex(&hash, &self.signature)?)
    }

    pub fn sender_address(&self) -> Result<String, TransactionError> {
        Ok(crypto::address_of(&self.sender_public_key()?))
    }

    pub fn contract_gas(&self) -> BigUint {
        self.additional_data
            .contract_gas
            .clone()
            .unwrap_or_else(BigUint::zero)
    }

    /// What the sender must cover: amount + gas + contract gas
    pub fn total_spend(&self) -> BigUint {
        &self.amount + &self.gas + self.contract_gas()
    }

    pub fn is_signed_by_mint(&self) -> Result<bool, TransactionError> {
        Ok(self.sender_public_key()? == params::mint_keypair().public_hex())
    }

    /// Build and sign the coinbase paying `amount` to `miner_address`
    pub fn coinbase(
        miner_address: String,
        amount: BigUint,
        timestamp: u64,
    ) -> Result<Transaction, TransactionError> {
        let mut tx = Transaction::new(
            miner_address,
            amount,
            BigUint::zero(),
            AdditionalData::default(),
            timestamp,
        );
        tx.sign(&params::mint_keypair())?;
        Ok(tx)
    }

    /// Full stateful validation of a non-coinbase transaction (§4.2 rules):
    /// shape, signature, known sender, balance, replay, fee floors.
    pub fn validate<S: AccountSource>(&self, state: &S) -> Result<(), TransactionError> {
        if !utils::is_hex_64(&self.recipient) {
            return Err(TransactionError::MalformedRecipient(self.recipient.clone()));
        }
        if self.gas < params::min_tx_fee() {
            return Err(TransactionError::FeeTooLow);
        }
        if let Some(contract_gas) = &self.additional_data.contract_gas {
            if *contract_gas < params::min_contract_fee() {
                return Err(TransactionError::ContractFeeTooLow);
            }
        }

        let public_key = self.sender_public_key()?;
        if public_key == params::mint_keypair().public_hex() {
            return Err(TransactionError::MintOutsideCoinbase);
        }

        let address = crypto::address_of(&public_key);
        let sender = state
            .account(&address)?
            .ok_or(TransactionError::UnknownSender(address))?;

        let need = self.total_spend();
        if sender.balance < need {
            return Err(TransactionError::InsufficientBalance {
                have: sender.balance,
                need,
            });
        }
        if sender.has_consumed(self.timestamp) {
            return Err(TransactionError::ReplayedTimestamp(self.timestamp));
        }
        Ok(())
    }
}
