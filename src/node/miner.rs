use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use log::{debug, error, info};
use tokio::time::sleep;

use crate::{
    core::{block::Block, chain::SharedChain, params, transaction::Transaction, utils},
    node::{message::Message, node_state::SharedNodeState},
};

/// Nonces tried between cancellation checks
const NONCE_BATCH: u64 = 5_000;

const IDLE_RETRY: Duration = Duration::from_secs(1);

/// Search for a nonce satisfying the block's difficulty. Polls `cancel`
/// between batches; a pre-empted search returns `None` and the caller
/// re-assembles on the new head.
pub fn search_nonce(
    mut block: Block,
    cancel: &AtomicBool,
) -> Result<Option<Block>, serde_json::Error> {
    let preimage = block.mining_preimage()?;
    let mut nonce = 0u64;

    loop {
        for _ in 0..NONCE_BATCH {
            let hash = Block::hash_for_nonce(&preimage, nonce);
            if Block::meets_difficulty(&hash, block.difficulty) {
                block.nonce = nonce;
                block.hash = hash;
                return Ok(Some(block));
            }
            nonce = nonce.wrapping_add(1);
        }
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
    }
}

/// Mining coordinator. Each pass assembles a candidate from the pool,
/// hands the nonce search to a blocking worker, and adopts the result
/// unless a remote block pre-empted it in the meantime.
pub async fn run_miner(chain: SharedChain, node_state: SharedNodeState) {
    node_state.mining.store(true, Ordering::Relaxed);
    info!("Mining for {}", node_state.keypair.address());

    loop {
        if node_state.sync.is_syncing() {
            sleep(IDLE_RETRY).await;
            continue;
        }
        if let Err(e) = mine_once(&chain, &node_state).await {
            error!("Mining attempt failed: {e}");
            sleep(IDLE_RETRY).await;
        }
    }
}

async fn mine_once(chain: &SharedChain, node_state: &SharedNodeState) -> anyhow::Result<()> {
    let head = chain.latest_block();
    let difficulty = chain.difficulty();
    let candidates = node_state.mempool.take_candidates().await;

    // timestamps must be non-decreasing along the chain
    let timestamp = utils::now_ms().max(head.timestamp);

    // the coinbase pays the block reward plus every declared fee
    let reward = candidates.iter().fold(params::block_reward(), |sum, tx| {
        sum + &tx.gas + tx.contract_gas()
    });
    let coinbase = Transaction::coinbase(node_state.keypair.address(), reward, timestamp)?;

    let mut transactions = Vec::with_capacity(candidates.len() + 1);
    transactions.push(coinbase);
    transactions.extend(candidates);

    let block = Block::new(
        head.block_number + 1,
        timestamp,
        transactions,
        difficulty,
        head.hash,
    );

    let cancel = Arc::new(AtomicBool::new(false));
    node_state.install_miner_interrupt(cancel.clone());

    let worker = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || search_nonce(block, &cancel))
    };
    let mined = worker.await??;
    node_state.clear_miner_interrupt();

    let Some(block) = mined else {
        debug!("Nonce search pre-empted by a remote block");
        return Ok(());
    };

    match chain.accept_block(&block, node_state.contract_logging) {
        Ok(()) => {
            info!("Mined block #{} {}", block.block_number, block.hash);
            node_state.already_seen_block(&block.hash);
            node_state.mempool.revalidate(chain.state_store()).await;
            node_state.peers.broadcast(Message::NewBlock(block)).await;
        }
        Err(e) => {
            // a remote block won the race while we were searching
            debug!("Discarding stale mined block: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn candidate(difficulty: u64) -> Block {
        let miner = KeyPair::generate();
        let coinbase =
            Transaction::coinbase(miner.address(), params::block_reward(), 1_000).unwrap();
        Block::new(1, 1_000, vec![coinbase], difficulty, "0".repeat(64))
    }

    #[test]
    fn finds_nonce_at_low_difficulty() {
        let cancel = AtomicBool::new(false);
        let mined = search_nonce(candidate(1), &cancel).unwrap().unwrap();
        assert!(Block::meets_difficulty(&mined.hash, 1));
        assert_eq!(mined.hash, mined.compute_hash().unwrap());
    }

    #[test]
    fn cancellation_stops_the_search() {
        let cancel = AtomicBool::new(true);
        // difficulty far beyond reach: only the cancel check can end this
        let result = search_nonce(candidate(32), &cancel).unwrap();
        assert!(result.is_none());
    }
}
