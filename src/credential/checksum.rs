//! Integrity check embedded in access credential ids.
//!
//! CRC-16 (reflected polynomial 0xA001, initial value 0xFFFF) over the ordinal
//! followed by the master key bytes. Catches malformed or mistyped ids before
//! they reach key derivation. It is not a MAC.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

pub fn checksum(ordinal: &str, master_key: &[u8]) -> u16 {
    let mut crc = INIT;
    for &byte in ordinal.as_bytes().iter().chain(master_key) {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // standard check input for this CRC-16 variant
        assert_eq!(checksum("123456789", &[]), 0x4B37);
    }

    #[test]
    fn test_key_bytes_change_checksum() {
        let a = checksum("4211", &[1u8; 32]);
        let b = checksum("4211", &[2u8; 32]);
        assert_ne!(a, b);
        assert_eq!(a, checksum("4211", &[1u8; 32]));
    }

    #[test]
    fn test_ordinal_then_key_order() {
        // the ordinal is hashed first, so moving bytes across the boundary matters
        assert_eq!(checksum("12", b"3"), checksum("123", b""));
        assert_ne!(checksum("12", b"3"), checksum("3", b"12"));
    }
}
