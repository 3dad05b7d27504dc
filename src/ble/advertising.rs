//! Advertising data filtering.
//!
//! Recognises BTHome sensor broadcasts by an exact match on the leading AD
//! structures and extracts the sensor payload that follows.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ble::uuids::{
    to_short_uuid, AD_TYPE_FLAGS, AD_TYPE_SERVICE_DATA_16, BTHOME_SERVICE_UUID16,
    FLAGS_LE_GENERAL_DISCOVERABLE,
};
use crate::data::{DeviceKey, SensorRecord};

const TEMPLATE_LEN: usize = 7;

/// Leading bytes an advertisement must carry to be accepted.
///
/// Layout: `[flags_len, flags_type, flags_value, sd_len, sd_type, uuid_lo, uuid_hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MagicTemplate([u8; TEMPLATE_LEN]);

impl MagicTemplate {
    /// Length of the template in bytes.
    pub const LEN: usize = TEMPLATE_LEN;

    /// Service data length used by the reference BTHome sensors.
    pub const BTHOME_SERVICE_DATA_LEN: u8 = 0x11;

    /// Create a template from raw bytes.
    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Build a template from its variable fields.
    ///
    /// # Arguments
    ///
    /// * `flags` - Value byte of the Flags structure
    /// * `service_data_len` - Declared length of the Service Data structure
    /// * `uuid16` - 16-bit service UUID
    pub const fn from_parts(flags: u8, service_data_len: u8, uuid16: u16) -> Self {
        let uuid = uuid16.to_le_bytes();
        Self([
            0x02,
            AD_TYPE_FLAGS,
            flags,
            service_data_len,
            AD_TYPE_SERVICE_DATA_16,
            uuid[0],
            uuid[1],
        ])
    }

    /// The reference BTHome template: `02 01 06 11 16 D2 FC`.
    pub const fn bthome() -> Self {
        Self::from_parts(
            FLAGS_LE_GENERAL_DISCOVERABLE,
            Self::BTHOME_SERVICE_DATA_LEN,
            BTHOME_SERVICE_UUID16,
        )
    }

    /// Get the template bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Get the 16-bit service UUID the template selects.
    pub fn service_uuid(&self) -> u16 {
        u16::from_le_bytes([self.0[5], self.0[6]])
    }

    /// Check whether `data` starts with this template.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.get(..Self::LEN) == Some(&self.0[..])
    }
}

impl Default for MagicTemplate {
    fn default() -> Self {
        Self::bthome()
    }
}

/// One advertising report as delivered by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementReport {
    /// Advertiser address, most significant byte first.
    pub address: [u8; 6],
    /// Raw advertising data.
    pub data: Bytes,
    /// Data length reported by the radio.
    pub reported_length: usize,
}

impl AdvertisementReport {
    /// Create a report whose reported length equals the buffer length.
    pub fn new(address: [u8; 6], data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let reported_length = data.len();
        Self {
            address,
            data,
            reported_length,
        }
    }

    /// Re-assemble the on-air AD layout from a decoded service-data entry.
    ///
    /// Host stacks report service data already split by UUID and drop the
    /// Flags structure, so the buffer is rebuilt as
    /// `[02 01 flags] [len 16 uuid_lo uuid_hi data..]`.
    ///
    /// Returns `None` for UUIDs without a 16-bit form or data too long to
    /// fit a one-byte AD length.
    pub fn from_service_data(address: [u8; 6], flags: u8, uuid: &Uuid, data: &[u8]) -> Option<Self> {
        let uuid16 = to_short_uuid(uuid)?;
        let ad_len = u8::try_from(data.len() + 3).ok()?;

        let mut buf = BytesMut::with_capacity(5 + data.len() + 3);
        buf.put_slice(&[0x02, AD_TYPE_FLAGS, flags]);
        buf.put_u8(ad_len);
        buf.put_u8(AD_TYPE_SERVICE_DATA_16);
        buf.put_u16_le(uuid16);
        buf.put_slice(data);

        Some(Self::new(address, buf.freeze()))
    }
}

/// Filter turning advertising reports into device records.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvertisementFilter {
    template: MagicTemplate,
}

impl AdvertisementFilter {
    /// Offset at which the extracted payload starts.
    ///
    /// This sits inside the template, so the payload repeats the service
    /// UUID ahead of the sensor data. Clients read the UUID from there.
    pub const PAYLOAD_OFFSET: usize = 5;

    /// Create a filter for the given template.
    pub fn new(template: MagicTemplate) -> Self {
        Self { template }
    }

    /// Get the template this filter matches against.
    pub fn template(&self) -> &MagicTemplate {
        &self.template
    }

    /// Match and extract a report.
    ///
    /// Returns `None` when the template does not match or the reported
    /// length cannot hold a payload within the buffer.
    pub fn parse(&self, report: &AdvertisementReport) -> Option<(DeviceKey, SensorRecord)> {
        if !self.template.matches(&report.data) {
            return None;
        }

        let payload = report
            .data
            .get(Self::PAYLOAD_OFFSET..report.reported_length)?;

        Some((
            DeviceKey::from_address(&report.address),
            SensorRecord::from_bytes(payload),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{from_short_uuid, BTHOME_SERVICE_UUID};
    use proptest::prelude::*;

    const ADDRESS: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
    const MAGIC: [u8; 7] = [0x02, 0x01, 0x06, 0x11, 0x16, 0xD2, 0xFC];

    fn report_with(tail: &[u8]) -> AdvertisementReport {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(tail);
        AdvertisementReport::new(ADDRESS, data)
    }

    #[test]
    fn test_bthome_template() {
        assert_eq!(MagicTemplate::bthome().as_bytes(), &MAGIC);
        assert_eq!(MagicTemplate::default(), MagicTemplate::new(MAGIC));
        assert_eq!(MagicTemplate::bthome().service_uuid(), 0xFCD2);
    }

    #[test]
    fn test_parse_extracts_from_offset_five() {
        let filter = AdvertisementFilter::default();
        let report = report_with(&[0x40, 0x02, 0xC4, 0x09]);

        let (key, record) = filter.parse(&report).unwrap();
        assert_eq!(key.as_str(), "112233445566");
        assert_eq!(record.as_str(), "d2fc4002c409");
    }

    #[test]
    fn test_parse_honours_reported_length() {
        let filter = AdvertisementFilter::default();
        let mut report = report_with(&[0xAA, 0xBB, 0xCC, 0xDD]);
        report.reported_length = 8;

        let (_, record) = filter.parse(&report).unwrap();
        assert_eq!(record.as_str(), "d2fcaa");
    }

    #[test]
    fn test_parse_rejects_flipped_flags_value() {
        let filter = AdvertisementFilter::default();
        let mut data = MAGIC.to_vec();
        data[2] = 0x07;
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        assert!(filter.parse(&AdvertisementReport::new(ADDRESS, data)).is_none());
    }

    #[test]
    fn test_parse_rejects_short_buffers() {
        let filter = AdvertisementFilter::default();
        assert!(filter.parse(&AdvertisementReport::new(ADDRESS, Vec::new())).is_none());
        assert!(filter
            .parse(&AdvertisementReport::new(ADDRESS, MAGIC[..6].to_vec()))
            .is_none());
    }

    #[test]
    fn test_parse_rejects_bad_reported_length() {
        let filter = AdvertisementFilter::default();

        let mut report = report_with(&[0xAA]);
        report.reported_length = 4;
        assert!(filter.parse(&report).is_none());

        report.reported_length = 0;
        assert!(filter.parse(&report).is_none());

        // Longer than the buffer we actually hold
        report.reported_length = 64;
        assert!(filter.parse(&report).is_none());
    }

    #[test]
    fn test_reported_length_of_five_yields_empty_record() {
        let filter = AdvertisementFilter::default();
        let mut report = report_with(&[0xAA]);
        report.reported_length = 5;

        let (_, record) = filter.parse(&report).unwrap();
        assert_eq!(record.as_str(), "");
    }

    #[test]
    fn test_custom_template() {
        let template = MagicTemplate::from_parts(0x1A, 0x09, 0x181A);
        let filter = AdvertisementFilter::new(template);
        assert_eq!(filter.template().as_bytes(), &[0x02, 0x01, 0x1A, 0x09, 0x16, 0x1A, 0x18]);

        let report = AdvertisementReport::new(ADDRESS, template.as_bytes().to_vec());
        assert!(filter.parse(&report).is_some());
        assert!(AdvertisementFilter::default().parse(&report).is_none());
    }

    #[test]
    fn test_from_service_data_rebuilds_layout() {
        let data = [0x40; 14];
        let report = AdvertisementReport::from_service_data(
            ADDRESS,
            FLAGS_LE_GENERAL_DISCOVERABLE,
            &BTHOME_SERVICE_UUID,
            &data,
        )
        .unwrap();

        assert_eq!(&report.data[..7], &MAGIC);
        assert_eq!(report.reported_length, 7 + 14);
        assert!(AdvertisementFilter::default().parse(&report).is_some());
    }

    #[test]
    fn test_from_service_data_length_mismatch_is_filtered() {
        // 3 bytes of service data declare length 6, not 0x11
        let report = AdvertisementReport::from_service_data(
            ADDRESS,
            FLAGS_LE_GENERAL_DISCOVERABLE,
            &BTHOME_SERVICE_UUID,
            &[0x40, 0x01, 0x64],
        )
        .unwrap();

        assert_eq!(report.data[3], 0x06);
        assert!(AdvertisementFilter::default().parse(&report).is_none());
    }

    #[test]
    fn test_from_service_data_rejects_unsupported() {
        let vendor = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        assert!(AdvertisementReport::from_service_data(ADDRESS, 0x06, &vendor, &[0x00]).is_none());

        let oversized = vec![0u8; 253];
        assert!(AdvertisementReport::from_service_data(
            ADDRESS,
            0x06,
            &from_short_uuid(0xFCD2),
            &oversized
        )
        .is_none());
    }

    proptest! {
        #[test]
        fn matching_header_always_matches(tail in proptest::collection::vec(any::<u8>(), 0..24)) {
            let report = report_with(&tail);
            prop_assert!(AdvertisementFilter::default().parse(&report).is_some());
        }

        #[test]
        fn any_header_deviation_never_matches(
            index in 0usize..7,
            delta in 1u8..=255,
            tail in proptest::collection::vec(any::<u8>(), 0..24),
        ) {
            let mut report = report_with(&tail);
            let mut data = report.data.to_vec();
            data[index] = data[index].wrapping_add(delta);
            report.data = data.into();
            prop_assert!(AdvertisementFilter::default().parse(&report).is_none());
        }

        #[test]
        fn extracted_payload_is_bytes_five_to_length(
            tail in proptest::collection::vec(any::<u8>(), 0..24),
            cut in 0usize..24,
        ) {
            let mut report = report_with(&tail);
            let length = (AdvertisementFilter::PAYLOAD_OFFSET + cut).min(report.data.len());
            report.reported_length = length;

            let (_, record) = AdvertisementFilter::default().parse(&report).unwrap();
            prop_assert_eq!(record.as_str().len(), 2 * (length - 5));
            prop_assert_eq!(record.as_str(), crate::utils::to_hex_string(&report.data[5..length]));
        }
    }
}
