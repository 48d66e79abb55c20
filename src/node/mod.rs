/// The node: wiring, startup daemons and the public data surface
pub mod node;

/// Stores all currently pending transactions, waiting to be mined
pub mod mempool;

/// Stores current node state, shared between tasks
pub mod node_state;

pub mod message;

pub mod peer;

/// Single owner of the peer table
pub mod peer_manager;

mod gossip;

mod sync;

pub mod server;

/// Mining coordinator and nonce search
pub mod miner;
