use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;

/// An account record in the state store, keyed by its 64-hex address.
/// Created on the first inbound transfer, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(with = "crate::core::utils::dec_str")]
    pub balance: BigUint,

    /// Contract source; empty for externally owned accounts
    pub body: String,

    /// Contract storage
    pub storage: BTreeMap<String, String>,

    /// Transaction timestamps consumed by this sender, for replay protection
    pub timestamps: Vec<u64>,

    /// Hash of `body`
    pub code_hash: String,
}

impl Account {
    pub fn new_empty() -> Account {
        Account {
            balance: BigUint::zero(),
            body: String::new(),
            storage: BTreeMap::new(),
            timestamps: Vec::new(),
            code_hash: sha256_hex(b""),
        }
    }

    pub fn has_code(&self) -> bool {
        !self.body.is_empty()
    }

    /// Install contract source; `code_hash` tracks `body`
    pub fn set_body(&mut self, body: String) {
        self.code_hash = sha256_hex(body.as_bytes());
        self.body = body;
    }

    pub fn has_consumed(&self, timestamp: u64) -> bool {
        self.timestamps.contains(&timestamp)
    }
}
