//! Event dispatcher tying the scanner, the device table and the gateway
//! together.
//!
//! One task owns the [`DeviceTable`] and the [`BroadcastGateway`]. Radio and
//! transport tasks only ever talk to it through [`BridgeEvent`]s, and every
//! event is handled to completion before the next one is taken.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::ble::advertising::AdvertisementFilter;
use crate::ble::scanner::BleScanner;
use crate::config::BridgeConfig;
use crate::data::{DeviceKey, DeviceTable, SensorRecord};
use crate::error::{Error, Result};
use crate::gateway::{BroadcastGateway, ClientConnection, ClientId};
use crate::link::{connect_with_retry, NetworkLink, ReconnectThrottle, RetryPolicy, StationLink};
use crate::transport::WebSocketListener;

/// Capacity of the bridge event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Events processed by the bridge.
#[derive(Debug)]
pub enum BridgeEvent {
    /// An advertisement passed the filter.
    AdvertisementMatched {
        /// Device the advertisement came from.
        key: DeviceKey,
        /// Extracted sensor payload.
        record: SensorRecord,
    },
    /// A client finished the WebSocket handshake.
    ClientConnected {
        /// Handle used to reach the client.
        client: ClientConnection,
    },
    /// A client went away.
    ClientDisconnected {
        /// The client that disconnected.
        id: ClientId,
    },
    /// A client sent data.
    ClientMessageReceived {
        /// The sending client.
        id: ClientId,
        /// Raw message payload.
        data: Bytes,
    },
    /// Periodic link-health check.
    LinkHealthTick,
}

/// The event dispatcher.
pub struct Bridge<L: NetworkLink> {
    table: DeviceTable,
    gateway: BroadcastGateway,
    link: L,
    throttle: ReconnectThrottle,
    poll_interval: Duration,
    event_tx: mpsc::Sender<BridgeEvent>,
    event_rx: mpsc::Receiver<BridgeEvent>,
}

impl<L: NetworkLink> Bridge<L> {
    /// Create a bridge with an empty device table.
    pub fn new(config: &BridgeConfig, link: L) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Self {
            table: DeviceTable::new(),
            gateway: BroadcastGateway::new(),
            link,
            throttle: ReconnectThrottle::new(config.link_poll_interval),
            poll_interval: config.link_poll_interval,
            event_tx,
            event_rx,
        }
    }

    /// Get a sender for submitting events to the bridge.
    pub fn event_sender(&self) -> mpsc::Sender<BridgeEvent> {
        self.event_tx.clone()
    }

    /// Get the device table.
    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    /// Get the gateway.
    pub fn gateway(&self) -> &BroadcastGateway {
        &self.gateway
    }

    /// Get the network link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Handle one event to completion.
    pub fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::AdvertisementMatched { key, record } => {
                if self.table.update(key.clone(), record.clone()) {
                    debug!(
                        "New device {} with {}-byte payload ({} known)",
                        key,
                        record.byte_len(),
                        self.table.len()
                    );
                }
                self.gateway.broadcast(&key, &record);
            }
            BridgeEvent::ClientConnected { client } => {
                self.gateway.on_client_connected(client, &self.table);
            }
            BridgeEvent::ClientDisconnected { id } => {
                self.gateway.on_client_disconnected(id);
            }
            BridgeEvent::ClientMessageReceived { id, data } => {
                self.gateway.on_client_message_received(id, &data);
            }
            BridgeEvent::LinkHealthTick => {
                self.check_link(Instant::now());
            }
        }
    }

    /// Ask for a reconnect if the link is down and the last request is old enough.
    fn check_link(&mut self, now: Instant) {
        let state = self.link.state();
        if state.is_up() || !self.throttle.should_attempt(now) {
            return;
        }

        warn!("Network link {}, requesting reconnect", state);
        if let Err(e) = self.link.request_reconnect() {
            warn!("Reconnect request failed: {}", e);
        }
        self.throttle.record_attempt(now);
    }

    /// Process events forever.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => self.handle_event(event),
                _ = ticker.tick() => self.handle_event(BridgeEvent::LinkHealthTick),
            }
        }
    }
}

/// Bring the bridge up and serve clients forever.
///
/// Startup order: Bluetooth scanning, the blocking link connection, then the
/// WebSocket listener.
///
/// # Errors
///
/// Returns an error if Bluetooth or the listener cannot be brought up.
pub async fn run(config: BridgeConfig) -> Result<()> {
    let link = StationLink::new(config.link.clone(), config.connect_timeout);
    let mut bridge = Bridge::new(&config, link);

    let scanner = BleScanner::new().await?;
    scanner
        .start_scanning(
            AdvertisementFilter::new(config.template),
            config.assumed_flags,
            bridge.event_sender(),
        )
        .await?;

    let policy = RetryPolicy::unbounded(config.connect_retry_delay);
    connect_with_retry(bridge.link_mut(), &policy).await?;

    let listener = WebSocketListener::bind(config.bind_addr, config.max_clients).await?;
    info!("WebSocket server started on {}", listener.local_addr());
    tokio::spawn(listener.run(bridge.event_sender()));

    bridge.run().await;

    drop(scanner);
    Ok(())
}

/// Park forever after a fatal startup error.
pub async fn halt(error: &Error) {
    error!("Fatal: {}; halting", error);
    std::future::pending::<()>().await;
}
