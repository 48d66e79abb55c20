use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::{
    crypto::KeyPair,
    node::{mempool::Mempool, peer_manager::PeerManager},
};

pub type SharedNodeState = Arc<NodeState>;

/// Everything the node shares between its tasks: identity, peer table,
/// mempool, sync progress and the mining pre-emption token
pub struct NodeState {
    /// Our advertised gossip address
    pub my_address: String,

    pub keypair: KeyPair,

    /// Emit contract-interpreter log events
    pub contract_logging: bool,

    pub peers: PeerManager,

    pub mempool: Mempool,

    pub sync: SyncState,

    /// Whether the mining coordinator is running
    pub mining: AtomicBool,

    /// Cancellation token of the in-flight nonce search, if any
    miner_interrupt: Mutex<Option<Arc<AtomicBool>>>,

    last_seen_block: Mutex<String>,
    last_seen_transaction: Mutex<String>,
}

impl NodeState {
    pub fn new(
        my_address: String,
        keypair: KeyPair,
        contract_logging: bool,
        chain_request: bool,
    ) -> SharedNodeState {
        Arc::new(NodeState {
            my_address,
            keypair,
            contract_logging,
            peers: PeerManager::new(),
            mempool: Mempool::new(),
            sync: SyncState::new(chain_request),
            mining: AtomicBool::new(false),
            miner_interrupt: Mutex::new(None),
            last_seen_block: Mutex::new(String::new()),
            last_seen_transaction: Mutex::new(String::new()),
        })
    }

    /// Register the cancellation token of a fresh nonce search
    pub fn install_miner_interrupt(&self, token: Arc<AtomicBool>) {
        *self.miner_interrupt.lock().unwrap() = Some(token);
    }

    pub fn clear_miner_interrupt(&self) {
        *self.miner_interrupt.lock().unwrap() = None;
    }

    /// Pre-empt the in-flight nonce search; the coordinator resumes on the
    /// new head on its next pass
    pub fn preempt_mining(&self) {
        if let Some(token) = self.miner_interrupt.lock().unwrap().as_ref() {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// Check-and-mark: true when this block hash was processed already
    pub fn already_seen_block(&self, hash: &str) -> bool {
        let mut last = self.last_seen_block.lock().unwrap();
        if *last == hash {
            return true;
        }
        *last = hash.to_string();
        false
    }

    /// Check-and-mark: true when this transaction hash was processed already
    pub fn already_seen_transaction(&self, hash: &str) -> bool {
        let mut last = self.last_seen_transaction.lock().unwrap();
        if *last == hash {
            return true;
        }
        *last = hash.to_string();
        false
    }
}

/// Initial-sync state machine: `Syncing` until the chain-request loop
/// concludes or the first live block is accepted, `Synced` after
pub struct SyncState {
    syncing: AtomicBool,
    current_block: AtomicU64,
    progressed: AtomicBool,
}

impl SyncState {
    pub fn new(chain_request: bool) -> SyncState {
        SyncState {
            syncing: AtomicBool::new(chain_request),
            current_block: AtomicU64::new(1),
            progressed: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Relaxed)
    }

    /// Switch to `Synced`; idempotent
    pub fn finish(&self) {
        self.syncing.store(false, Ordering::Relaxed);
    }

    /// Height the sync loop is currently requesting
    pub fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::Relaxed)
    }

    pub fn set_current_block(&self, block_number: u64) {
        self.current_block.store(block_number, Ordering::Relaxed);
    }

    pub fn note_progress(&self) {
        self.progressed.store(true, Ordering::Relaxed);
    }

    /// Read and clear the progress marker for the finished request round
    pub fn take_progress(&self) -> bool {
        self.progressed.swap(false, Ordering::Relaxed)
    }
}
