//! BLE scanning functionality.
//!
//! Listens for service-data advertisements, rebuilds the advertising data
//! and forwards every report that passes the filter to the bridge.

use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::ble::advertising::{AdvertisementFilter, AdvertisementReport};
use crate::ble::uuids::is_bthome_service;
use crate::bridge::BridgeEvent;
use crate::data::{DeviceKey, SensorRecord};
use crate::error::{Error, Result};

/// Scan settings that travel with the scanning task.
#[derive(Debug, Clone, Copy)]
struct ScanContext {
    filter: AdvertisementFilter,
    flags: u8,
}

/// BLE scanner feeding matched advertisements into the bridge.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Handle to the scanning task.
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BleScanner {
    /// Create a new BLE scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            scan_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start continuous scanning.
    ///
    /// # Arguments
    ///
    /// * `filter` - Filter applied to every rebuilt advertisement
    /// * `flags` - Flags value assumed for rebuilt advertisements
    /// * `events` - Bridge event channel receiving matches
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(
        &self,
        filter: AdvertisementFilter,
        flags: u8,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Listening for BLE advertisements");

        // Subscribe before starting the scan so no early report is lost
        let mut adapter_events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let context = ScanContext { filter, flags };

        let handle = tokio::spawn(async move {
            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = adapter_events.next() => {
                        if !Self::handle_event(event, &adapter, context, &events).await {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if !*is_scanning.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Handle a BLE central event.
    ///
    /// Returns `false` once the bridge has stopped listening.
    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        context: ScanContext,
        events: &mpsc::Sender<BridgeEvent>,
    ) -> bool {
        match event {
            CentralEvent::ServiceDataAdvertisement { id, service_data } => {
                Self::process_service_data(adapter, id, service_data, context, events).await
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
                true
            }
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state changed: {:?}", state);
                true
            }
            _ => true,
        }
    }

    /// Rebuild and filter every service-data entry of one advertisement.
    async fn process_service_data(
        adapter: &Adapter,
        id: PeripheralId,
        service_data: HashMap<Uuid, Vec<u8>>,
        context: ScanContext,
        events: &mpsc::Sender<BridgeEvent>,
    ) -> bool {
        let address = match adapter.peripheral(&id).await {
            Ok(peripheral) => match peripheral.properties().await {
                Ok(Some(properties)) => properties.address.into_inner(),
                _ => return true,
            },
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return true;
            }
        };

        for (key, record) in context.matches(address, &service_data) {
            if events
                .send(BridgeEvent::AdvertisementMatched { key, record })
                .await
                .is_err()
            {
                error!("Bridge event channel closed, stopping scan loop");
                return false;
            }
        }

        true
    }
}

impl ScanContext {
    /// Rebuild every service-data entry of one advertisement and keep those
    /// that pass the filter.
    fn matches(
        &self,
        address: [u8; 6],
        service_data: &HashMap<Uuid, Vec<u8>>,
    ) -> Vec<(DeviceKey, SensorRecord)> {
        service_data
            .iter()
            .filter_map(|(uuid, data)| {
                let report =
                    AdvertisementReport::from_service_data(address, self.flags, uuid, data)?;
                let parsed = self.filter.parse(&report);
                if parsed.is_none() && is_bthome_service(uuid) {
                    trace!(
                        "BTHome data from {} ({} bytes) does not match template",
                        BDAddr::from(address),
                        data.len()
                    );
                }
                parsed
            })
            .collect()
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::MagicTemplate;
    use crate::ble::uuids::{from_short_uuid, BTHOME_SERVICE_UUID, FLAGS_LE_GENERAL_DISCOVERABLE};
    use pretty_assertions::assert_eq;

    const ADDRESS: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    /// Service data sized to fill the 0x11-byte structure the template expects.
    fn bthome_data(head: &[u8]) -> Vec<u8> {
        let mut data = head.to_vec();
        data.resize(14, 0x00);
        data
    }

    fn context(flags: u8) -> ScanContext {
        ScanContext {
            filter: AdvertisementFilter::new(MagicTemplate::bthome()),
            flags,
        }
    }

    #[test]
    fn test_bthome_service_data_matches() {
        let service_data = HashMap::from([(BTHOME_SERVICE_UUID, bthome_data(&[0x40, 0x02, 0xC4, 0x09]))]);

        let matches = context(FLAGS_LE_GENERAL_DISCOVERABLE).matches(ADDRESS, &service_data);

        assert_eq!(matches.len(), 1);
        let (key, record) = &matches[0];
        assert_eq!(key.as_str(), "112233445566");
        assert_eq!(record.as_str(), format!("d2fc4002c409{}", "00".repeat(10)));
    }

    #[test]
    fn test_other_services_are_dropped() {
        let service_data = HashMap::from([
            (from_short_uuid(0x181A), bthome_data(&[0x01, 0x02])),
            (BTHOME_SERVICE_UUID, bthome_data(&[0x40])),
        ]);

        let matches = context(FLAGS_LE_GENERAL_DISCOVERABLE).matches(ADDRESS, &service_data);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1.as_str(), format!("d2fc40{}", "00".repeat(13)));
    }

    #[test]
    fn test_bthome_data_with_wrong_length_is_dropped() {
        // Template expects a 16-byte service data AD structure
        let service_data = HashMap::from([(BTHOME_SERVICE_UUID, vec![0x40, 0x01, 0x64])]);
        assert!(context(FLAGS_LE_GENERAL_DISCOVERABLE)
            .matches(ADDRESS, &service_data)
            .is_empty());
    }

    #[test]
    fn test_assumed_flags_must_match_template() {
        let service_data = HashMap::from([(BTHOME_SERVICE_UUID, bthome_data(&[0x40]))]);
        assert!(context(0x04).matches(ADDRESS, &service_data).is_empty());
    }
}
