//! BLE UUIDs and advertising constants.
//!
//! Contains the identifiers used to recognise BTHome sensor broadcasts.

use uuid::Uuid;

/// Bluetooth Base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// 16-bit BTHome service UUID (allocated by the Bluetooth SIG).
pub const BTHOME_SERVICE_UUID16: u16 = 0xFCD2;

/// Full 128-bit BTHome service UUID.
pub const BTHOME_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fcd2_0000_1000_8000_00805f9b34fb);

// AD structure types (Bluetooth Core Supplement, Part A, 1.x)
/// AD type for the Flags structure.
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type for Service Data with a 16-bit UUID.
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// Flags value for "LE General Discoverable, BR/EDR not supported".
pub const FLAGS_LE_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Mask selecting everything but the 16-bit short-UUID field of a UUID.
const SHORT_UUID_MASK: u128 = !(0xFFFF_u128 << 96);

/// Expand a 16-bit UUID onto the Bluetooth Base UUID.
pub fn from_short_uuid(uuid16: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((uuid16 as u128) << 96))
}

/// Return the 16-bit form of `uuid`, if it is derived from the Bluetooth Base UUID.
pub fn to_short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & SHORT_UUID_MASK == BLUETOOTH_BASE_UUID.as_u128() {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

/// Check if a service UUID is the BTHome service.
pub fn is_bthome_service(uuid: &Uuid) -> bool {
    *uuid == BTHOME_SERVICE_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        let bthome = BTHOME_SERVICE_UUID.to_string();
        assert_eq!(bthome, "0000fcd2-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_short_uuid_conversion() {
        assert_eq!(from_short_uuid(BTHOME_SERVICE_UUID16), BTHOME_SERVICE_UUID);
        assert_eq!(to_short_uuid(&BTHOME_SERVICE_UUID), Some(0xFCD2));
        assert_eq!(to_short_uuid(&from_short_uuid(0x180A)), Some(0x180A));

        let vendor = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        assert_eq!(to_short_uuid(&vendor), None);
    }

    #[test]
    fn test_is_bthome_service() {
        assert!(is_bthome_service(&BTHOME_SERVICE_UUID));
        assert!(!is_bthome_service(&from_short_uuid(0x180A)));
    }
}
