//! Utility functions for the bthome-ws-bridge crate.

/// Encode bytes as a lowercase hex string, high nibble first.
///
/// # Arguments
///
/// * `bytes` - Bytes to encode
///
/// # Returns
///
/// A string exactly twice as long as the input.
///
/// # Example
///
/// ```
/// use bthome_ws_bridge::to_hex_string;
///
/// assert_eq!(to_hex_string(&[0xAA, 0x0B, 0xC0]), "aa0bc0");
/// assert_eq!(to_hex_string(&[]), "");
/// ```
pub fn to_hex_string(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
