use std::time::Duration;

use log::{info, warn};
use tokio::time::sleep;

use crate::{
    core::{block::Block, chain::SharedChain},
    node::{message::Message, node_state::SharedNodeState},
};

/// Fixed delay between per-peer block requests, leaving the previous
/// response time to arrive and verify
const REQUEST_SPACING: Duration = Duration::from_secs(5);

/// A round visits every open peer once; this many rounds without an
/// accepted block means no peer can serve the next height
const STALLED_ROUNDS_TO_FINISH: u32 = 2;

/// Initial chain-request loop. Starting from the first missing height,
/// ask every open peer for the current block with a fixed delay between
/// requests. The loop ends when a live `NEW_BLOCK` is accepted elsewhere
/// or when repeated rounds make no progress.
pub async fn run_chain_request(chain: SharedChain, node_state: SharedNodeState) {
    if !node_state.sync.is_syncing() {
        return;
    }

    let start = (chain.height() + 1).max(1);
    node_state.sync.set_current_block(start);
    info!("[sync] Requesting chain from block {start}");

    let mut stalled_rounds = 0;
    while node_state.sync.is_syncing() {
        let peers = node_state.peers.open_handles().await;

        for peer in &peers {
            if !node_state.sync.is_syncing() {
                return;
            }
            let request = Message::RequestBlock {
                block_number: node_state.sync.current_block(),
                request_address: node_state.my_address.clone(),
            };
            if let Err(e) = peer.send(request).await {
                warn!("[sync] Request to {} failed: {e}", peer.address);
            }
            sleep(REQUEST_SPACING).await;
        }
        if peers.is_empty() {
            sleep(REQUEST_SPACING).await;
        }

        if node_state.sync.take_progress() {
            stalled_rounds = 0;
        } else {
            stalled_rounds += 1;
        }
        if stalled_rounds >= STALLED_ROUNDS_TO_FINISH {
            info!(
                "[sync] No peer serves block {}; chain is up to date at height {}",
                node_state.sync.current_block(),
                chain.height()
            );
            node_state.sync.finish();
        }
    }
}

/// Handle a `SEND_BLOCK` response while syncing. Only the height we are
/// currently requesting is considered; anything else is a stale response.
pub async fn on_send_block(block: Block, chain: &SharedChain, node_state: &SharedNodeState) {
    if !node_state.sync.is_syncing() {
        return;
    }
    let expected = node_state.sync.current_block();
    if block.block_number != expected {
        return;
    }

    match chain.accept_block(&block, node_state.contract_logging) {
        Ok(()) => {
            info!("[sync] Block {expected} accepted");
            chain.set_latest_sync_block(Some(block));
            node_state.sync.set_current_block(expected + 1);
            node_state.sync.note_progress();
        }
        Err(e) => warn!("[sync] Block {expected} rejected: {e}"),
    }
}
