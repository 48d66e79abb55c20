use std::{
    path::Path,
    sync::{Mutex, RwLock},
};

use log::{debug, info};
use thiserror::Error;

use crate::core::{
    account::Account,
    block::{Block, BlockError},
    block_store::BlockStore,
    params,
    state::{AccountSource, StateError, StateOverlay, StateStore},
    transaction::TransactionError,
    utils,
};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("invalid block: {0}")]
    Block(#[from] BlockError),

    #[error("invalid transaction: {0}")]
    Transaction(#[from] TransactionError),

    #[error("block {0} missing from the block store")]
    MissingBlock(u64),

    #[error("stored genesis does not match the chain parameters")]
    CorruptGenesis,
}

/// In-memory view of the chain head
pub struct ChainInfo {
    pub latest_block: Block,

    /// Head observed during an active initial sync
    pub latest_sync_block: Option<Block>,

    /// Required difficulty for the next block
    pub difficulty: u64,
}

/// The chain: block store, account state and head bookkeeping.
/// Writes are serialized; readers see either pre-block or post-block state.
pub struct Chain {
    _db: sled::Db,
    blocks: BlockStore,
    state: StateStore,
    info: RwLock<ChainInfo>,
    write_lock: Mutex<()>,
}

pub type SharedChain = std::sync::Arc<Chain>;

impl Chain {
    /// Open (or create) the chain at `path`, installing the genesis block
    /// on first run
    pub fn open(path: &Path) -> Result<Chain, ChainError> {
        Chain::open_db(sled::open(path)?)
    }

    pub fn open_db(db: sled::Db) -> Result<Chain, ChainError> {
        let blocks = BlockStore::new(db.open_tree("blocks")?);
        let state = StateStore::new(db.open_tree("state")?);

        if blocks.is_empty() {
            let genesis = params::genesis_block();
            let mut overlay = StateOverlay::new(&state);
            overlay.execute_block(&genesis, false)?;
            blocks.put(&genesis)?;
            overlay.commit()?;
            info!("Genesis installed: {}", genesis.hash);
        } else if blocks.get(0)?.as_ref() != Some(&params::genesis_block()) {
            return Err(ChainError::CorruptGenesis);
        }

        let head_number = blocks
            .max_block_number()?
            .ok_or(ChainError::MissingBlock(0))?;
        let latest_block = blocks
            .get(head_number)?
            .ok_or(ChainError::MissingBlock(head_number))?;
        let difficulty = Chain::retargeted_difficulty(&blocks, &latest_block)?;

        Ok(Chain {
            _db: db,
            blocks,
            state,
            info: RwLock::new(ChainInfo {
                latest_block,
                latest_sync_block: None,
                difficulty,
            }),
            write_lock: Mutex::new(()),
        })
    }

    pub fn latest_block(&self) -> Block {
        self.info.read().unwrap().latest_block.clone()
    }

    pub fn height(&self) -> u64 {
        self.info.read().unwrap().latest_block.block_number
    }

    pub fn difficulty(&self) -> u64 {
        self.info.read().unwrap().difficulty
    }

    pub fn latest_sync_block(&self) -> Option<Block> {
        self.info.read().unwrap().latest_sync_block.clone()
    }

    pub fn set_latest_sync_block(&self, block: Option<Block>) {
        self.info.write().unwrap().latest_sync_block = block;
    }

    pub fn block_by_number(&self, block_number: u64) -> Result<Option<Block>, ChainError> {
        Ok(self.blocks.get(block_number)?)
    }

    pub fn account(&self, address: &str) -> Result<Option<Account>, ChainError> {
        Ok(self.state.account(address)?)
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state
    }

    /// Full block verification against the current head. On success the
    /// returned overlay holds the post-block state, ready to commit.
    pub fn verify_block(
        &self,
        block: &Block,
        log_contracts: bool,
    ) -> Result<StateOverlay<'_>, ChainError> {
        let (head, expected_difficulty) = {
            let info = self.info.read().unwrap();
            (info.latest_block.clone(), info.difficulty)
        };

        if block.block_number != head.block_number + 1 {
            return Err(BlockError::NotNextNumber {
                expected: head.block_number + 1,
                got: block.block_number,
            }
            .into());
        }
        if block.parent_hash != head.hash {
            return Err(BlockError::ParentMismatch.into());
        }
        if block.timestamp < head.timestamp
            || block.timestamp > utils::now_ms() + params::MAX_CLOCK_SKEW_MS
        {
            return Err(BlockError::TimestampOutOfRange.into());
        }
        if block.difficulty != expected_difficulty {
            return Err(BlockError::WrongDifficulty {
                expected: expected_difficulty,
                got: block.difficulty,
            }
            .into());
        }
        let recomputed = block.compute_hash().map_err(BlockError::Codec)?;
        if recomputed != block.hash {
            return Err(BlockError::HashMismatch.into());
        }
        if !Block::meets_difficulty(&block.hash, block.difficulty) {
            return Err(BlockError::InsufficientWork.into());
        }
        block.check_coinbase()?;
        if block.total_contract_gas() > params::block_gas_limit() {
            return Err(BlockError::GasLimitExceeded.into());
        }

        let mut overlay = StateOverlay::new(&self.state);
        overlay.execute_block(block, log_contracts)?;
        Ok(overlay)
    }

    /// Verify `block`, persist it, commit its state transition and advance
    /// the head. All-or-nothing: a failed storage write leaves the
    /// in-memory head untouched so the node stays consistent.
    pub fn accept_block(&self, block: &Block, log_contracts: bool) -> Result<(), ChainError> {
        let _writer = self.write_lock.lock().unwrap();

        let overlay = self.verify_block(block, log_contracts)?;
        self.blocks.put(block)?;
        overlay.commit()?;

        let next_difficulty = Chain::retargeted_difficulty(&self.blocks, block)?;
        let mut info = self.info.write().unwrap();
        info.latest_block = block.clone();
        info.difficulty = next_difficulty;
        Ok(())
    }

    /// Difficulty required for the block after `head`. Every
    /// `RETARGET_WINDOW` blocks, compare the window's elapsed wall time to
    /// the target spacing and step the difficulty by one (floor 1).
    fn retargeted_difficulty(blocks: &BlockStore, head: &Block) -> Result<u64, ChainError> {
        let current = head.difficulty;
        if head.block_number < params::RETARGET_WINDOW
            || head.block_number % params::RETARGET_WINDOW != 0
        {
            return Ok(current);
        }

        let window_start_number = head.block_number - params::RETARGET_WINDOW;
        let window_start = blocks
            .get(window_start_number)?
            .ok_or(ChainError::MissingBlock(window_start_number))?;
        let elapsed = head.timestamp.saturating_sub(window_start.timestamp);
        let target = params::RETARGET_WINDOW * params::TARGET_BLOCK_TIME_MS;

        let next = if elapsed < target {
            current + 1
        } else if elapsed > target {
            (current - 1).max(1)
        } else {
            current
        };
        if next != current {
            debug!(
                "Difficulty retarget at block {}: {current} -> {next} (window {elapsed}ms, target {target}ms)",
                head.block_number
            );
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::Transaction;
    use crate::crypto::KeyPair;
    use num_bigint::BigUint;
    use num_traits::Zero;

    fn temp_chain() -> Chain {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary sled db");
        Chain::open_db(db).unwrap()
    }

    /// Assemble and mine the next block on `chain`'s head
    fn mine_next(chain: &Chain, miner: &KeyPair, transactions: Vec<Transaction>, timestamp: u64) -> Block {
        let head = chain.latest_block();
        let mut block = Block::new(
            head.block_number + 1,
            timestamp,
            Vec::new(),
            chain.difficulty(),
            head.hash,
        );
        block.transactions = {
            let mut all = Vec::with_capacity(transactions.len() + 1);
            all.push(Transaction::coinbase(miner.address(), BigUint::zero(), timestamp).unwrap());
            all.extend(transactions);
            all
        };
        // fix the coinbase amount now that fees are known
        let amount = block.expected_coinbase_amount();
        block.transactions[0] =
            Transaction::coinbase(miner.address(), amount, timestamp).unwrap();

        let preimage = block.mining_preimage().unwrap();
        loop {
            let hash = Block::hash_for_nonce(&preimage, block.nonce);
            if Block::meets_difficulty(&hash, block.difficulty) {
                block.hash = hash;
                return block;
            }
            block.nonce += 1;
        }
    }

    #[test]
    fn open_installs_genesis_and_funds_faucet() {
        let chain = temp_chain();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.difficulty(), params::INITIAL_DIFFICULTY);

        let faucet = chain
            .account(&params::faucet_keypair().address())
            .unwrap()
            .unwrap();
        assert_eq!(faucet.balance, params::initial_supply());
    }

    #[test]
    fn mined_block_is_accepted_and_rewards_miner() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        let block = mine_next(&chain, &miner, vec![], utils::now_ms());

        chain.accept_block(&block, false).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.latest_block().hash, block.hash);

        let miner_account = chain.account(&miner.address()).unwrap().unwrap();
        assert_eq!(miner_account.balance, params::block_reward());
    }

    #[test]
    fn supply_grows_by_reward_per_block() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        for _ in 0..3 {
            let block = mine_next(&chain, &miner, vec![], utils::now_ms());
            chain.accept_block(&block, false).unwrap();
        }

        let total: BigUint = chain
            .state_store()
            .accounts()
            .unwrap()
            .into_iter()
            .fold(BigUint::zero(), |sum, (_, account)| sum + account.balance);
        assert_eq!(
            total,
            params::initial_supply() + params::block_reward() * 3u8
        );
    }

    #[test]
    fn rejects_wrong_parent() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        let mut block = mine_next(&chain, &miner, vec![], utils::now_ms());
        block.parent_hash = "f".repeat(64);
        // re-mine so only the linkage is wrong
        let preimage = block.mining_preimage().unwrap();
        block.nonce = 0;
        loop {
            let hash = Block::hash_for_nonce(&preimage, block.nonce);
            if Block::meets_difficulty(&hash, block.difficulty) {
                block.hash = hash;
                break;
            }
            block.nonce += 1;
        }
        assert!(matches!(
            chain.accept_block(&block, false),
            Err(ChainError::Block(BlockError::ParentMismatch))
        ));
    }

    #[test]
    fn rejects_tampered_hash() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        let mut block = mine_next(&chain, &miner, vec![], utils::now_ms());
        block.hash = "0".repeat(64); // meets any difficulty but not the contents
        assert!(matches!(
            chain.accept_block(&block, false),
            Err(ChainError::Block(BlockError::HashMismatch))
        ));
    }

    #[test]
    fn duplicate_head_is_rejected_by_linkage() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        let block = mine_next(&chain, &miner, vec![], utils::now_ms());
        chain.accept_block(&block, false).unwrap();
        // replaying the same block fails the next-number and linkage checks
        assert!(chain.accept_block(&block, false).is_err());
    }

    #[test]
    fn sync_head_is_tracked_separately_from_the_chain_head() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        assert!(chain.latest_sync_block().is_none());

        let block = mine_next(&chain, &miner, vec![], utils::now_ms());
        chain.accept_block(&block, false).unwrap();
        chain.set_latest_sync_block(Some(block.clone()));

        assert_eq!(chain.latest_sync_block(), Some(block));
    }

    #[test]
    fn retarget_raises_difficulty_after_fast_window() {
        let chain = temp_chain();
        let miner = KeyPair::generate();
        // the window is measured from the genesis timestamp, so pin the
        // five blocks right after it to simulate a too-fast window
        let base = params::GENESIS_TIMESTAMP_MS;
        for i in 0..params::RETARGET_WINDOW {
            let block = mine_next(&chain, &miner, vec![], base + i);
            chain.accept_block(&block, false).unwrap();
        }
        assert_eq!(chain.difficulty(), params::INITIAL_DIFFICULTY + 1);

        // a block still carrying the old difficulty is now rejected
        let mut stale = mine_next(&chain, &miner, vec![], base + 10);
        stale.difficulty = params::INITIAL_DIFFICULTY;
        assert!(chain.accept_block(&stale, false).is_err());
    }
}
