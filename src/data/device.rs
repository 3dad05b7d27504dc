//! Device identity and sensor payload types.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::utils::to_hex_string;

/// Hex-encoded 6-byte device address, e.g. `"112233445566"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Number of bytes in a device address.
    pub const ADDRESS_LEN: usize = 6;

    /// Create a key from raw address bytes.
    pub fn from_address(address: &[u8; Self::ADDRESS_LEN]) -> Self {
        Self(to_hex_string(address))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded sensor payload, opaque to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorRecord(String);

impl SensorRecord {
    /// Create a record from raw payload bytes.
    pub fn from_bytes(payload: &[u8]) -> Self {
        Self(to_hex_string(payload))
    }

    /// Get the record as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of payload bytes this record encodes.
    pub fn byte_len(&self) -> usize {
        self.0.len() / 2
    }
}

impl fmt::Display for SensorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the wire message for one device: key and record with no delimiter.
pub fn device_message(key: &DeviceKey, record: &SensorRecord) -> String {
    let mut message = String::with_capacity(key.0.len() + record.0.len());
    message.push_str(&key.0);
    message.push_str(&record.0);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_key() {
        let key = DeviceKey::from_address(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(key.as_str(), "112233445566");
        assert_eq!(key.to_string(), "112233445566");
    }

    #[test]
    fn test_sensor_record() {
        let record = SensorRecord::from_bytes(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(record.as_str(), "aabbcc");
        assert_eq!(record.byte_len(), 3);
        assert_eq!(SensorRecord::default().byte_len(), 0);
    }

    #[test]
    fn test_device_message() {
        let key = DeviceKey::from_address(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let record = SensorRecord::from_bytes(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(device_message(&key, &record), "112233445566aabbcc");
    }
}
