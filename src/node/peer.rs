use std::sync::Arc;

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use log::{error, warn};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, Receiver},
        oneshot, Mutex,
    },
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use crate::{
    core::chain::SharedChain,
    node::{gossip, message::Message, node_state::SharedNodeState},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type KillSignal = String;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("failed to queue message for peer: {0}")]
    Send(String),

    #[error("message encoding error: {0}")]
    Encode(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("peer killed: {0}")]
    Killed(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("already connected to {0}")]
    AlreadyConnected(String),
}

/// Used to reference, write to, and kill one outbound peer socket
#[derive(Clone, Debug)]
pub struct PeerHandle {
    /// The peer's advertised address, e.g. `ws://127.0.0.1:3000`
    pub address: String,
    sender: mpsc::Sender<Message>,
    kill: Arc<Mutex<Option<oneshot::Sender<KillSignal>>>>,
}

impl PeerHandle {
    /// Queue a message for the writer task
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| PeerError::Send(e.to_string()))
    }

    pub async fn kill(&self, reason: String) {
        if let Some(kill) = self.kill.lock().await.take() {
            let _ = kill.send(reason);
        }
    }
}

/// Dial `address`, register the peer and run the handshake: introduce
/// ourselves, then forward every peer we already know (transitive
/// discovery).
pub async fn connect_peer(
    address: String,
    chain: SharedChain,
    node_state: SharedNodeState,
) -> Result<PeerHandle, PeerError> {
    if node_state.peers.is_open(&address).await {
        return Err(PeerError::AlreadyConnected(address));
    }

    let (socket, _) = connect_async(address.as_str())
        .await
        .map_err(|e| PeerError::Connect(e.to_string()))?;

    let handle = spawn_peer(address.clone(), socket, chain, node_state.clone());
    if !node_state.peers.insert(handle.clone()).await {
        // a concurrent dial won the race for this address
        handle.kill("duplicate socket".to_string()).await;
        return Err(PeerError::AlreadyConnected(address));
    }

    let known = node_state.peers.connected_addresses().await;
    node_state.peers.mark_connected(&address).await;

    handle
        .send(Message::Handshake(node_state.my_address.clone()))
        .await?;
    for peer_address in known {
        if peer_address != address {
            handle.send(Message::Handshake(peer_address)).await?;
        }
    }

    Ok(handle)
}

/// Start the peer's internal tasks and return its handle. The socket dies
/// with the first failing task; the peer is then dropped from the table and
/// may be re-added on the next handshake.
fn spawn_peer(
    address: String,
    socket: Socket,
    chain: SharedChain,
    node_state: SharedNodeState,
) -> PeerHandle {
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Message>(64);
    let (kill, should_kill) = oneshot::channel::<KillSignal>();

    let handle = PeerHandle {
        address: address.clone(),
        sender: outgoing_tx,
        kill: Arc::new(Mutex::new(Some(kill))),
    };

    tokio::spawn(async move {
        let (sink, stream) = socket.split();

        let result = tokio::select! {
            res = writer_task(sink, outgoing_rx) => res,
            res = reader_task(stream, chain, node_state.clone()) => res,
            res = async {
                let reason = should_kill
                    .await
                    .map_err(|_| PeerError::Killed("kill channel closed".to_string()))?;
                Err(PeerError::Killed(reason))
            } => res,
        };

        if let Err(e) = result {
            error!("Peer {address} dropped: {e}");
        }
        node_state.peers.remove(&address).await;
    });

    handle
}

async fn writer_task(
    mut sink: SplitSink<Socket, WsMessage>,
    mut outgoing: Receiver<Message>,
) -> Result<(), PeerError> {
    while let Some(message) = outgoing.recv().await {
        let frame = message.encode().map_err(|e| PeerError::Encode(e.to_string()))?;
        sink.send(WsMessage::text(frame))
            .await
            .map_err(|e| PeerError::Socket(e.to_string()))?;
    }
    Err(PeerError::Disconnected)
}

async fn reader_task(
    mut stream: SplitStream<Socket>,
    chain: SharedChain,
    node_state: SharedNodeState,
) -> Result<(), PeerError> {
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| PeerError::Socket(e.to_string()))?;
        match frame {
            WsMessage::Text(text) => match Message::decode(&text) {
                Ok(message) => gossip::handle_message(message, &chain, &node_state).await,
                Err(e) => warn!("Undecodable frame from peer: {e}"),
            },
            WsMessage::Close(_) => return Err(PeerError::Disconnected),
            _ => {}
        }
    }
    Err(PeerError::Disconnected)
}
