//! # bthome-ws-bridge
//!
//! Bridges BTHome sensor advertisements received over Bluetooth Low Energy
//! to any number of WebSocket clients.
//!
//! The bridge scans continuously, keeps the latest payload per sensor and
//! pushes every update to all connected clients. A newly connected client
//! first receives one message per known sensor.
//!
//! ## Wire format
//!
//! Every WebSocket text message is the 12-character hex device address
//! followed directly by the hex-encoded payload, for example
//! `112233445566d2fc4002c409`. The payload starts at byte 5 of the
//! advertising data, so it carries the service UUID ahead of the BTHome
//! measurements.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bthome_ws_bridge::{BridgeConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = BridgeConfig::from_env()?;
//!     bthome_ws_bridge::run(config).await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group. The
//! station link is managed through NetworkManager (`nmcli`).
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and config types

// Public modules
pub mod ble;
pub mod bridge;
pub mod config;
pub mod data;
pub mod error;
pub mod gateway;
pub mod link;
pub mod transport;
pub mod utils;

// Re-exports for convenience
pub use bridge::{halt, run, Bridge, BridgeEvent};
pub use config::{AuthMode, BridgeConfig, LinkCredentials, CLIENT_QUEUE_CAPACITY, MAX_CLIENTS};
pub use error::{Error, Result};
pub use gateway::{BroadcastGateway, ClientConnection, ClientId};
pub use link::{LinkState, NetworkLink, StationLink};
pub use utils::to_hex_string;

pub use ble::advertising::{AdvertisementFilter, AdvertisementReport, MagicTemplate};
pub use data::{DeviceKey, DeviceTable, SensorRecord};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<BroadcastGateway>();
        let _ = std::any::TypeId::of::<DeviceTable>();
        let _ = std::any::TypeId::of::<AdvertisementFilter>();
        let _ = std::any::TypeId::of::<Bridge<StationLink>>();
        let _ = std::any::TypeId::of::<Error>();
    }

    #[test]
    fn test_reference_scenario() {
        let mut data = MagicTemplate::bthome().as_bytes().to_vec();
        data.push(0x40);
        let report = AdvertisementReport::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], data);

        let (key, record) = AdvertisementFilter::default().parse(&report).unwrap();
        assert_eq!(data::device_message(&key, &record), "112233445566d2fc40");
    }
}
