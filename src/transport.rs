//! WebSocket transport.
//!
//! Accepts client connections, enforces the connection limit and turns
//! connection activity into bridge events. Each connection task owns its
//! socket and drains the queue the gateway writes into.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bridge::BridgeEvent;
use crate::config::CLIENT_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::gateway::{ClientConnection, ClientId};

/// Listening WebSocket server.
pub struct WebSocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    slots: Arc<Semaphore>,
    max_clients: usize,
}

impl WebSocketListener {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, max_clients: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            "WebSocket server listening on {} (max {} clients)",
            local_addr, max_clients
        );

        Ok(Self {
            listener,
            local_addr,
            slots: Arc::new(Semaphore::new(max_clients)),
            max_clients,
        })
    }

    /// Get the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the connection limit.
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Accept connections until the bridge goes away.
    pub async fn run(self, events: mpsc::Sender<BridgeEvent>) {
        let mut next_id = 0u64;

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            if events.is_closed() {
                debug!("Bridge stopped, closing listener");
                return;
            }

            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                warn!(
                    "Rejecting connection from {}: {} clients already connected",
                    addr, self.max_clients
                );
                drop(stream);
                continue;
            };

            next_id += 1;
            let id = ClientId(next_id);
            let events = events.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, id, permit, events).await {
                    warn!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Serve one WebSocket client.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: ClientId,
    _permit: OwnedSemaphorePermit,
    events: mpsc::Sender<BridgeEvent>,
) -> Result<()> {
    debug!("New connection from {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
    let client = ClientConnection::new(id, Some(addr), outbound_tx);

    if events
        .send(BridgeEvent::ClientConnected { client })
        .await
        .is_err()
    {
        return Ok(());
    }

    let result = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(batch) = outbound else {
                    // Gateway dropped this client
                    break Ok(());
                };
                let mut texts = futures::stream::iter(batch.into_iter().map(|text| Ok(Message::Text(text))));
                if let Err(e) = ws_tx.send_all(&mut texts).await {
                    break Err(Error::WebSocket(e));
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let data = Bytes::from(text.into_bytes());
                        let _ = events.send(BridgeEvent::ClientMessageReceived { id, data }).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let data = Bytes::from(data);
                        let _ = events.send(BridgeEvent::ClientMessageReceived { id, data }).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} closed connection", addr);
                        break Ok(());
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Flush the pong tungstenite queued while reading
                        if let Err(e) = ws_tx.flush().await {
                            break Err(Error::WebSocket(e));
                        }
                    }
                    Some(Err(e)) => break Err(Error::WebSocket(e)),
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    let _ = events.send(BridgeEvent::ClientDisconnected { id }).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), 2)
            .await
            .unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert_eq!(listener.max_clients(), 2);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), 1)
            .await
            .unwrap();
        let err = WebSocketListener::bind(first.local_addr(), 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Bind { .. }));
    }
}
