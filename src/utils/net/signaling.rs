//! Auxiliary multi-party signaling
//!
//! Browser clients exchange opaque JSON documents through the hub. Every
//! message is relayed verbatim to all other registered clients; the sender
//! never receives its own message back.

use async_tungstenite::tokio::accept_async;
use async_tungstenite::tungstenite::{Error as WsError, Message};
use chrono::{DateTime, Local};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::SignalingError;
use crate::utils::helpers::try_send_log;

/// Per-client outbound queue depth; a full queue drops the message for that client.
const OUTBOUND_QUEUE: usize = 64;

/// How long a departing client's writer may take to flush and send Close.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

struct SignalingClient {
    registered_at: DateTime<Local>,
    outbound: mpsc::Sender<Message>,
}

#[derive(Default)]
pub struct SignalingHub {
    clients: Mutex<HashMap<u64, SignalingClient>>,
    next_id: AtomicU64,
}

impl SignalingHub {
    pub fn new() -> SignalingHub {
        SignalingHub::default()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Serve one client until it disconnects, sends something undecodable or
    /// `cancel` fires. The client is unregistered on every exit path.
    pub async fn handle_connection<S>(
        &self,
        ws: S,
        cancel: &CancellationToken,
    ) -> Result<(), SignalingError>
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let id = self.register(outbound).await;

        let mut writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    debug!("Signaling client {}: write failed: {}", id, e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let result = self.read_loop(id, &mut ws_receiver, cancel).await;

        // dropping the registry entry closes the queue, the writer then sends Close
        self.unregister(id).await;
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }

        if let Err(e) = &result {
            warn!("Signaling client {} dropped: {}", id, e);
        }
        result
    }

    async fn read_loop<R>(
        &self,
        id: u64,
        ws_receiver: &mut R,
        cancel: &CancellationToken,
    ) -> Result<(), SignalingError>
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Signaling client {}: server shutting down", id);
                    break;
                }
                message = ws_receiver.next() => match message {
                    Some(message) => message?,
                    None => break,
                }
            };
            match &message {
                Message::Text(text) => {
                    serde_json::from_str::<serde_json::Value>(text.as_str())?;
                }
                Message::Binary(data) => {
                    serde_json::from_slice::<serde_json::Value>(data)?;
                }
                Message::Close(_) => break,
                _ => continue,
            }
            self.broadcast(id, message).await;
        }
        Ok(())
    }

    async fn register(&self, outbound: mpsc::Sender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut clients = self.clients.lock().await;
        clients.insert(
            id,
            SignalingClient {
                registered_at: Local::now(),
                outbound,
            },
        );
        info!("Signaling client {} registered ({} connected)", id, clients.len());
        id
    }

    async fn unregister(&self, id: u64) {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.remove(&id) {
            info!(
                "Signaling client {} disconnected (registered at {}, {} remaining)",
                id,
                client.registered_at.format("%H:%M:%S"),
                clients.len()
            );
        }
    }

    async fn broadcast(&self, from: u64, message: Message) {
        let clients = self.clients.lock().await;
        for (id, client) in clients.iter().filter(|(id, _)| **id != from) {
            if try_send_log(&client.outbound, message.clone(), "signaling broadcast").is_full() {
                warn!("Signaling client {}: outbound queue full, message dropped", id);
            }
        }
    }
}

/// Accepts WebSocket upgrades and hands every connection to the hub.
pub struct SignalingServer {
    hub: Arc<SignalingHub>,
}

impl SignalingServer {
    pub fn new(hub: Arc<SignalingHub>) -> SignalingServer {
        SignalingServer { hub }
    }

    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!("Signaling listening on ws://{}", addr);
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Signaling accept failed: {}", e);
                        continue;
                    }
                }
            };

            let hub = Arc::clone(&self.hub);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        debug!("Signaling handshake with {} failed: {}", peer, e);
                        return;
                    }
                };
                let _ = hub.handle_connection(ws, &cancel).await;
            });
        }

        info!("Signaling server stopped");
    }
}
