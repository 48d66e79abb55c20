use serde::{Deserialize, Serialize};

use crate::core::{block::Block, transaction::Transaction};

/// One gossip frame: `{"type": <tag>, "data": <payload>}` as a single JSON
/// object per WebSocket text frame. Tags and payload field names are a
/// cross-implementation compatibility surface; schema violations are
/// rejected at the deserialization boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// Advertise a peer address, ours or a forwarded one
    #[serde(rename = "HANDSHAKE")]
    Handshake(String),

    /// Gossip a pending transaction
    #[serde(rename = "CREATE_TRANSACTION")]
    CreateTransaction(Transaction),

    /// Gossip a freshly mined block
    #[serde(rename = "NEW_BLOCK")]
    NewBlock(Block),

    /// Ask a peer for a stored block; the answer goes to `request_address`
    #[serde(rename = "REQUEST_BLOCK")]
    #[serde(rename_all = "camelCase")]
    RequestBlock {
        block_number: u64,
        request_address: String,
    },

    /// Answer to `RequestBlock`
    #[serde(rename = "SEND_BLOCK")]
    SendBlock(Block),
}

impl Message {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Message, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
