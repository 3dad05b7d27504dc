//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy side of the bridge:
//! scanning and recognising BTHome advertisements.

pub mod advertising;
pub mod scanner;
pub mod uuids;

pub use advertising::{AdvertisementFilter, AdvertisementReport, MagicTemplate};
pub use scanner::BleScanner;
pub use uuids::*;
