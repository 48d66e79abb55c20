use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures::StreamExt;
use log::{error, info, warn};
use thiserror::Error;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::{
    core::chain::SharedChain,
    node::{gossip, message::Message, node_state::SharedNodeState},
};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listen for inbound gossip connections. Inbound sockets are read-only:
/// replies travel over the outbound socket we open to the address a peer
/// advertises in its handshake.
pub async fn start(
    port: u16,
    chain: SharedChain,
    node_state: SharedNodeState,
) -> Result<JoinHandle<()>, ServerError> {
    let listener =
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await?;
    info!("Gossip server listening on port {port}");

    Ok(tokio::spawn(async move {
        while let Ok((stream, address)) = listener.accept().await {
            let chain = chain.clone();
            let node_state = node_state.clone();

            tokio::spawn(async move {
                let mut socket = match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => socket,
                    Err(e) => {
                        error!("WebSocket handshake with {address} failed: {e}");
                        return;
                    }
                };

                while let Some(frame) = socket.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => match Message::decode(&text) {
                            Ok(message) => {
                                gossip::handle_message(message, &chain, &node_state).await
                            }
                            Err(e) => warn!("Undecodable frame from {address}: {e}"),
                        },
                        Ok(WsMessage::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });
        }
    }))
}
