/// Core chain implementation: blocks, transactions, accounts, state
/// transitions, contract execution and consensus rules
pub mod core;

/// Hashing, ECDSA keys and signatures
pub mod crypto;

/// The node: peer gossip, chain sync, mining and the public data surface
pub mod node;

/// Per-node runtime options, read once at startup
pub mod config;
