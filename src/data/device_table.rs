//! Latest-known sensor payload per device.
//!
//! The table is owned by the event dispatcher and is only ever touched from
//! its task, so it carries no lock. Entries are never removed.

use std::collections::HashMap;

use super::device::{DeviceKey, SensorRecord};

/// Mapping from device key to the most recently received sensor record.
#[derive(Debug, Default)]
pub struct DeviceTable {
    entries: HashMap<DeviceKey, SensorRecord>,
}

impl DeviceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `key`.
    ///
    /// Returns `true` if this is the first record seen for the device.
    pub fn update(&mut self, key: DeviceKey, record: SensorRecord) -> bool {
        self.entries.insert(key, record).is_none()
    }

    /// Iterate over the current contents. Order is unspecified.
    pub fn snapshot(&self) -> impl Iterator<Item = (&DeviceKey, &SensorRecord)> + '_ {
        self.entries.iter()
    }

    /// Get the record for a single device.
    pub fn get(&self, key: &DeviceKey) -> Option<&SensorRecord> {
        self.entries.get(key)
    }

    /// Get the number of known devices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no device has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
