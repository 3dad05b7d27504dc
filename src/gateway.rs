//! Fan-out of device updates to connected WebSocket clients.
//!
//! The gateway owns the set of registered clients. Each client is reached
//! through a bounded queue of message batches drained by its connection
//! task, so every handler here completes without waiting on the network.
//! The connect snapshot travels as one batch. A client whose queue is full
//! is dropped like one whose connection is gone.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use crate::data::{device_message, DeviceKey, DeviceTable, SensorRecord};

/// Identifier assigned to a client connection by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to one connected client.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ClientId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Vec<String>>,
}

impl ClientConnection {
    /// Create a handle delivering into `outbound`.
    pub fn new(id: ClientId, peer: Option<SocketAddr>, outbound: mpsc::Sender<Vec<String>>) -> Self {
        Self { id, peer, outbound }
    }

    /// Get the client identifier.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Get the remote address, if known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue one batch without waiting.
    fn deliver(&self, batch: Vec<String>) -> std::result::Result<(), TrySendError<Vec<String>>> {
        self.outbound.try_send(batch)
    }
}

/// Delivers device messages to registered clients.
#[derive(Debug, Default)]
pub struct BroadcastGateway {
    clients: HashMap<ClientId, ClientConnection>,
}

impl BroadcastGateway {
    /// Create a gateway with no clients.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and send it one message per known device.
    ///
    /// Returns the number of snapshot messages queued.
    pub fn on_client_connected(&mut self, client: ClientConnection, table: &DeviceTable) -> usize {
        info!("WebSocket opened: client {} ({:?})", client.id, client.peer);

        let snapshot: Vec<String> = table
            .snapshot()
            .map(|(key, record)| device_message(key, record))
            .collect();
        let sent = snapshot.len();

        if sent > 0 {
            if let Err(e) = client.deliver(snapshot) {
                warn!("Failed to send snapshot to client {}: {}", client.id, e);
                return 0;
            }
        }
        debug!("Sent {} snapshot messages to client {}", sent, client.id);

        self.clients.insert(client.id, client);
        sent
    }

    /// Deregister a client.
    pub fn on_client_disconnected(&mut self, id: ClientId) {
        if self.clients.remove(&id).is_some() {
            info!("WebSocket closed: client {}", id);
        }
    }

    /// Inbound data is ignored.
    pub fn on_client_message_received(&mut self, id: ClientId, data: &[u8]) {
        trace!("Ignoring {} bytes from client {}", data.len(), id);
    }

    /// Send `key ++ record` to every registered client.
    ///
    /// A failed delivery drops that client and continues with the rest. A
    /// full queue counts as a failed delivery.
    /// Returns the number of clients the message was queued for.
    pub fn broadcast(&mut self, key: &DeviceKey, record: &SensorRecord) -> usize {
        let message = device_message(key, record);
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (id, client) in &self.clients {
            match client.deliver(vec![message.clone()]) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} is not keeping up, dropping it", id);
                    gone.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Failed to deliver update for {} to client {}", key, id);
                    gone.push(*id);
                }
            }
        }

        for id in gone {
            self.clients.remove(&id);
        }

        trace!("Broadcast {} to {} clients", message, delivered);
        delivered
    }

    /// Get the number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Check if a client is registered.
    pub fn is_registered(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }
}
