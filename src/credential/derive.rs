//! Access key derivation and master key generation
use ofb::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, Result};

type Aes256Ofb = ofb::Ofb<aes::Aes256>;

pub const MASTER_KEY_LEN: usize = 32;
pub const ACCESS_KEY_LEN: usize = 32;

pub fn generate_master_key() -> [u8; MASTER_KEY_LEN] {
    let mut key = [0u8; MASTER_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// `AES-256-OFB(SHA-256(access_id))` keyed by the master key, IV = first 16 key bytes.
///
/// Deterministic, so access keys never need to be stored.
pub fn derive_access_key(access_id: &str, master_key: &[u8]) -> Result<[u8; ACCESS_KEY_LEN]> {
    if master_key.len() != MASTER_KEY_LEN {
        return Err(GatewayError::IllegalState(format!(
            "master key must be {} bytes, got {}",
            MASTER_KEY_LEN,
            master_key.len()
        )));
    }
    let mut block: [u8; ACCESS_KEY_LEN] = Sha256::digest(access_id.as_bytes()).into();
    let mut cipher = Aes256Ofb::new_from_slices(master_key, &master_key[..16])
        .map_err(|e| GatewayError::IllegalState(format!("cipher init: {}", e)))?;
    cipher.apply_keystream(&mut block);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let master = generate_master_key();
        let a = derive_access_key("ak.mk1.beef42", &master).unwrap();
        let b = derive_access_key("ak.mk1.beef42", &master).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derivation_depends_on_id_and_key() {
        let master = [7u8; 32];
        let other = [8u8; 32];
        let a = derive_access_key("ak.mk1.beef42", &master).unwrap();
        assert_ne!(a, derive_access_key("ak.mk1.beef43", &master).unwrap());
        assert_ne!(a, derive_access_key("ak.mk1.beef42", &other).unwrap());
    }

    #[test]
    fn test_keystream_is_xor() {
        // OFB is a pure keystream: applying it again recovers the digest
        let master = [3u8; 32];
        let mut derived = derive_access_key("ak.mk9.00001", &master).unwrap();
        let mut cipher = Aes256Ofb::new_from_slices(&master, &master[..16]).unwrap();
        cipher.apply_keystream(&mut derived);
        let digest: [u8; 32] = Sha256::digest(b"ak.mk9.00001").into();
        assert_eq!(derived, digest);
    }

    #[test]
    fn test_rejects_short_master_key() {
        let err = derive_access_key("ak.mk1.beef42", &[1u8; 16]).unwrap_err();
        assert!(matches!(err, GatewayError::IllegalState(_)));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(generate_master_key(), generate_master_key());
    }
}
