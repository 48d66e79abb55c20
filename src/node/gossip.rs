use log::{debug, info, warn};

use crate::{
    core::{block::Block, chain::SharedChain, transaction::Transaction},
    node::{message::Message, node_state::SharedNodeState, peer, sync},
};

/// Route one inbound gossip message. Invalid payloads are logged and
/// dropped; the sending peer is not punished.
pub async fn handle_message(message: Message, chain: &SharedChain, node_state: &SharedNodeState) {
    match message {
        Message::Handshake(address) => handle_handshake(address, chain, node_state).await,
        Message::CreateTransaction(tx) => handle_new_transaction(tx, chain, node_state).await,
        Message::NewBlock(block) => {
            accept_remote_block(block, chain, node_state).await;
        }
        Message::RequestBlock {
            block_number,
            request_address,
        } => serve_block_request(block_number, request_address, chain, node_state).await,
        Message::SendBlock(block) => sync::on_send_block(block, chain, node_state).await,
    }
}

/// Transitive peer discovery: dial every address we have not seen yet.
/// The address is only marked connected once the dial succeeds, so a
/// failed dial can be retried on the next handshake.
async fn handle_handshake(address: String, chain: &SharedChain, node_state: &SharedNodeState) {
    if address == node_state.my_address || node_state.peers.is_known(&address).await {
        return;
    }

    let chain = chain.clone();
    let node_state = node_state.clone();
    tokio::spawn(async move {
        if let Err(e) = peer::connect_peer(address.clone(), chain, node_state).await {
            warn!("Dial-back to {address} failed: {e}");
        }
    });
}

async fn handle_new_transaction(tx: Transaction, chain: &SharedChain, node_state: &SharedNodeState) {
    // transactions are not admitted while the chain is still catching up
    if node_state.sync.is_syncing() {
        return;
    }
    let hash = match tx.hash_hex() {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Unhashable transaction: {e}");
            return;
        }
    };
    if node_state.already_seen_transaction(&hash) {
        return;
    }

    match node_state.mempool.add(tx.clone(), chain.state_store()).await {
        Ok(()) => {
            info!("New transaction accepted: {hash}");
            node_state
                .peers
                .broadcast(Message::CreateTransaction(tx))
                .await;
        }
        Err(e) => debug!("Incoming transaction rejected: {e}"),
    }
}

/// Verify and adopt a block gossiped at the next height. On success the
/// initial sync (if any) is over, the in-flight nonce search is pre-empted,
/// the pool is re-validated, and the block is forwarded to all peers.
pub async fn accept_remote_block(
    block: Block,
    chain: &SharedChain,
    node_state: &SharedNodeState,
) -> bool {
    if node_state.already_seen_block(&block.hash) {
        return false;
    }

    match chain.accept_block(&block, node_state.contract_logging) {
        Ok(()) => {
            info!(
                "New block accepted: #{} {}",
                block.block_number, block.hash
            );
            node_state.sync.finish();
            node_state.preempt_mining();
            node_state.mempool.revalidate(chain.state_store()).await;
            node_state.peers.broadcast(Message::NewBlock(block)).await;
            true
        }
        Err(e) => {
            warn!("Incoming block is invalid: {e}");
            false
        }
    }
}

/// Serve a stored block to the requesting peer, only once synced and only
/// for heights we actually have
async fn serve_block_request(
    block_number: u64,
    request_address: String,
    chain: &SharedChain,
    node_state: &SharedNodeState,
) {
    if node_state.sync.is_syncing() {
        return;
    }
    if block_number < 1 || block_number > chain.height() {
        return;
    }

    match chain.block_by_number(block_number) {
        Ok(Some(block)) => {
            if !node_state
                .peers
                .send_to(&request_address, Message::SendBlock(block))
                .await
            {
                debug!("No open socket to {request_address} for block {block_number}");
            }
        }
        Ok(None) => debug!("Requested block {block_number} not found"),
        Err(e) => warn!("Failed to load block {block_number}: {e}"),
    }
}
