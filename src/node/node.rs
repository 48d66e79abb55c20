use std::sync::{atomic::Ordering, Arc, Once};

use async_trait::async_trait;
use flexi_logger::{Duplicate, FileSpec, Logger};
use log::{error, info};

use crate::{
    config::Config,
    core::{
        account::Account,
        block::Block,
        chain::{Chain, ChainError, SharedChain},
        transaction::{Transaction, TransactionError},
    },
    crypto::KeyPair,
    node::{message::Message, miner, node_state::{NodeState, SharedNodeState}, peer, server, sync},
};

static LOGGER_INIT: Once = Once::new();

/// The node: chain storage, shared runtime state and the startup daemons
pub struct Node {
    pub chain: SharedChain,
    pub node_state: SharedNodeState,
    config: Config,
}

impl Node {
    pub fn new(config: Config) -> anyhow::Result<Node> {
        // Only initialize the logger once
        LOGGER_INIT.call_once(|| {
            let log_path = config.data_dir.join("logs");
            std::fs::create_dir_all(&log_path).expect("Failed to create log directory");

            Logger::try_with_str("info")
                .unwrap()
                .log_to_file(FileSpec::default().directory(&log_path))
                .duplicate_to_stderr(Duplicate::Info)
                .start()
                .ok(); // Ignore errors if logger is already set

            info!("Logger initialized for node at {:?}", config.data_dir);
        });

        let keypair = match &config.private_key {
            Some(private_hex) => KeyPair::from_private_hex(private_hex)?,
            None => {
                let keypair = KeyPair::generate();
                info!(
                    "No private key configured; generated one for address {}",
                    keypair.address()
                );
                keypair
            }
        };

        let chain = Arc::new(Chain::open(&config.data_dir.join("chain"))?);
        let node_state = NodeState::new(
            config.my_address.clone(),
            keypair,
            config.enable_logging,
            config.enable_chain_request,
        );

        Ok(Node {
            chain,
            node_state,
            config,
        })
    }

    /// Start the gossip server, dial the configured peers and launch the
    /// sync and mining daemons
    pub async fn start(&self) -> anyhow::Result<()> {
        let _listener =
            server::start(self.config.port, self.chain.clone(), self.node_state.clone()).await?;

        for address in &self.config.peers {
            let address = address.clone();
            let chain = self.chain.clone();
            let node_state = self.node_state.clone();
            tokio::spawn(async move {
                if let Err(e) = peer::connect_peer(address.clone(), chain, node_state).await {
                    error!("Failed to dial configured peer {address}: {e}");
                }
            });
        }

        if self.config.enable_chain_request {
            tokio::spawn(sync::run_chain_request(
                self.chain.clone(),
                self.node_state.clone(),
            ));
        }
        if self.config.enable_mining {
            tokio::spawn(miner::run_miner(
                self.chain.clone(),
                self.node_state.clone(),
            ));
        }
        Ok(())
    }

    /// Submission entry point for the query collaborator: validates
    /// synchronously, admits to the pool and gossips. The error, if any,
    /// is the submitter's answer.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), TransactionError> {
        self.node_state
            .mempool
            .add(tx.clone(), self.chain.state_store())
            .await?;
        if let Ok(hash) = tx.hash_hex() {
            self.node_state.already_seen_transaction(&hash);
            info!("Transaction submitted locally: {hash}");
        }
        self.node_state
            .peers
            .broadcast(Message::CreateTransaction(tx))
            .await;
        Ok(())
    }
}

/// Read-only surface consumed by the query server collaborator
#[async_trait]
pub trait NodeDataProvider {
    async fn height(&self) -> u64;

    async fn latest_block(&self) -> Block;

    /// Head observed by the initial sync, if one is running; lets the
    /// query surface report catch-up progress
    async fn latest_sync_block(&self) -> Option<Block>;

    async fn block_by_number(&self, block_number: u64) -> Result<Option<Block>, ChainError>;

    async fn account(&self, address: &str) -> Result<Option<Account>, ChainError>;

    async fn public_key(&self) -> String;

    async fn is_mining(&self) -> bool;
}

#[async_trait]
impl NodeDataProvider for Node {
    async fn height(&self) -> u64 {
        self.chain.height()
    }

    async fn latest_block(&self) -> Block {
        self.chain.latest_block()
    }

    async fn latest_sync_block(&self) -> Option<Block> {
        self.chain.latest_sync_block()
    }

    async fn block_by_number(&self, block_number: u64) -> Result<Option<Block>, ChainError> {
        self.chain.block_by_number(block_number)
    }

    async fn account(&self, address: &str) -> Result<Option<Account>, ChainError> {
        self.chain.account(address)
    }

    async fn public_key(&self) -> String {
        self.node_state.keypair.public_hex()
    }

    async fn is_mining(&self) -> bool {
        self.node_state.mining.load(Ordering::Relaxed)
    }
}
