// storage/src/endian.rs

//! Byte order helpers. The database header is always big-endian,
//! whatever the host uses.

/// Converts a big-endian 16-bit field to host order.
#[inline]
pub fn ntoh16(field: [u8; 2]) -> u16 {
    u16::from_be_bytes(field)
}
