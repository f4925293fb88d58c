//! The `KeyOracle` abstraction: how the header key is obtained when a
//! keyfile doesn't carry it directly.
//!
//! On a real console the header key is never stored anywhere — it's
//! derived on demand by the `spl` service from two fixed 16-byte sources
//! against the console's secret master key. This crate can't reach that
//! service, so derivation is modelled as a trait a caller can implement
//! against whatever key material they actually have access to; the
//! concrete [`FileKeyOracle`] below covers the common case of a keyfile
//! that carries `master_key_NN` entries directly (as most community
//! keyfiles do), using the same two-call `GenerateAesKek`/`GenerateAesKey`
//! shape the real service exposes.
//!
//! Grounded on `original_source/sphaira/source/yati/nx/keys.cpp`'s
//! `parse_keys`, which computes the header key as exactly this sequence
//! against `splCryptoGenerateAesKek`/`splCryptoGenerateAesKey`.

use aes::Aes128;
use cipher::{BlockDecrypt, KeyInit, generic_array::GenericArray};

use crate::error::Error;
use crate::formats::Keyset;

/// `HEADER_KEK_SRC` from `keys.cpp` — the fixed source material the
/// header-key-encryption-key is derived from.
pub const HEADER_KEK_SOURCE: [u8; 0x10] = [
    0x1F, 0x12, 0x91, 0x3A, 0x4A, 0xCB, 0xF0, 0x0D, 0x4C, 0xDE, 0x3A, 0xF6, 0xD5, 0x23, 0x88, 0x2A,
];

/// `HEADER_KEY_SRC` from `keys.cpp` — split into two 16-byte halves, each
/// separately run through `GenerateAesKey` to produce the 32-byte header key.
pub const HEADER_KEY_SOURCE: [u8; 0x20] = [
    0x5A, 0x3E, 0xD8, 0x4F, 0xDE, 0xC0, 0xD8, 0x26, 0x31, 0xF7, 0xE2, 0x5D, 0x19, 0x7B, 0xF5, 0xD0,
    0x1C, 0x9B, 0x7B, 0xFA, 0xF6, 0x28, 0x18, 0x3D, 0x71, 0xF6, 0x4D, 0x73, 0xF1, 0x50, 0xB9, 0xD2,
];

/// Abstracts the console's `spl` crypto service: deriving a key-encryption
/// key from a fixed source and a master-key generation, then unwrapping an
/// actual key against that KEK. Implementations that can't reach real
/// console-bound key material (e.g. a "hardware" oracle embedded contexts
/// would supply) are free to return [`Error::NotSupported`] for option bits
/// they can't honor.
pub trait KeyOracle: Send + Sync {
    fn generate_aes_kek(&self, kek_source: &[u8; 0x10], generation: u8, option: u32) -> Result<[u8; 0x10], Error>;
    fn generate_aes_key(&self, kek: &[u8; 0x10], key_source: &[u8; 0x10]) -> Result<[u8; 0x10], Error>;
}

fn aes128_ecb_decrypt(key: &[u8; 0x10], block: &[u8; 0x10]) -> [u8; 0x10] {
    let mut buf = GenericArray::clone_from_slice(block);
    Aes128::new(GenericArray::from_slice(key)).decrypt_block(&mut buf);
    *buf.as_ref()
}

/// A [`KeyOracle`] backed by a loaded keyfile's `master_key_NN` entries.
/// Only the standard (`option == 0`, non-device-unique) derivation path is
/// implemented — this is the documented `GenerateAesKek`/`GenerateAesKey`
/// behaviour and is all the header/KAEK/titlekek derivations in this crate
/// ever request. Any other option bit is rejected rather than guessed at.
pub struct FileKeyOracle<'a> {
    keyset: &'a Keyset,
}

impl<'a> FileKeyOracle<'a> {
    pub fn new(keyset: &'a Keyset) -> Self {
        Self { keyset }
    }
}

impl KeyOracle for FileKeyOracle<'_> {
    fn generate_aes_kek(&self, kek_source: &[u8; 0x10], generation: u8, option: u32) -> Result<[u8; 0x10], Error> {
        if option != 0 {
            return Err(Error::NotSupported(format!(
                "FileKeyOracle only supports option=0 aes-kek generation, got {option}"
            )));
        }
        let master_key = self
            .keyset
            .get_master_key(generation as usize)
            .ok_or(Error::KeyMissingMasterKey)?;
        Ok(aes128_ecb_decrypt(&master_key, kek_source))
    }

    fn generate_aes_key(&self, kek: &[u8; 0x10], key_source: &[u8; 0x10]) -> Result<[u8; 0x10], Error> {
        Ok(aes128_ecb_decrypt(kek, key_source))
    }
}

/// Derives the 32-byte NCA header key from `HEADER_KEK_SOURCE`/
/// `HEADER_KEY_SOURCE` via the supplied oracle, mirroring `keys.cpp`'s
/// `parse_keys` exactly: one `GenerateAesKek` call at generation 0, then
/// two `GenerateAesKey` calls (one per half of `HEADER_KEY_SOURCE`).
pub fn derive_header_key(oracle: &dyn KeyOracle) -> Result<[u8; 0x20], Error> {
    let kek = oracle.generate_aes_kek(&HEADER_KEK_SOURCE, 0, 0)?;

    let mut header_key = [0u8; 0x20];
    let lo: [u8; 0x10] = HEADER_KEY_SOURCE[..0x10].try_into().unwrap();
    let hi: [u8; 0x10] = HEADER_KEY_SOURCE[0x10..].try_into().unwrap();
    header_key[..0x10].copy_from_slice(&oracle.generate_aes_key(&kek, &lo)?);
    header_key[0x10..].copy_from_slice(&oracle.generate_aes_key(&kek, &hi)?);

    Ok(header_key)
}

/// Resolves the NCA header key: prefers a directly keyfile-supplied value
/// (the common case for community keyfiles, and the teacher's existing
/// `Keyset::header_key` path), falling back to deriving it through `oracle`
/// when present.
pub fn resolve_header_key(keyset: &Keyset, oracle: Option<&dyn KeyOracle>) -> Result<[u8; 0x20], Error> {
    if let Some(key) = keyset.header_key() {
        return Ok(*key);
    }
    let oracle = oracle.ok_or_else(|| Error::NotFound("header_key not present in keyfile and no KeyOracle supplied".to_string()))?;
    derive_header_key(oracle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn keyset_with_master_key(generation: u8, master_key: [u8; 0x10]) -> Keyset {
        let line = format!("master_key_{generation:02x} = {}\n", hex::encode(master_key));
        Keyset::from_reader(Cursor::new(line)).unwrap()
    }

    #[test]
    fn test_file_key_oracle_rejects_nonzero_option() {
        let keyset = keyset_with_master_key(0, [0x42; 0x10]);
        let oracle = FileKeyOracle::new(&keyset);
        assert!(oracle.generate_aes_kek(&HEADER_KEK_SOURCE, 0, 1).is_err());
    }

    #[test]
    fn test_file_key_oracle_missing_master_key() {
        let keyset = Keyset::from_reader(Cursor::new("")).unwrap();
        let oracle = FileKeyOracle::new(&keyset);
        assert!(matches!(
            oracle.generate_aes_kek(&HEADER_KEK_SOURCE, 0, 0),
            Err(Error::KeyMissingMasterKey)
        ));
    }

    #[test]
    fn test_derive_header_key_round_trips_through_oracle() {
        let keyset = keyset_with_master_key(0, [0x11; 0x10]);
        let oracle = FileKeyOracle::new(&keyset);

        let header_key = derive_header_key(&oracle).unwrap();
        assert_eq!(header_key.len(), 0x20);

        // Deterministic: deriving twice from the same keyset yields the same key.
        let again = derive_header_key(&oracle).unwrap();
        assert_eq!(header_key, again);
    }

    #[test]
    fn test_resolve_header_key_prefers_direct_keyfile_value() {
        let direct = format!("header_key = {}\n", "ab".repeat(0x20));
        let keyset = Keyset::from_reader(Cursor::new(direct)).unwrap();

        let resolved = resolve_header_key(&keyset, None).unwrap();
        assert_eq!(resolved, keyset.header_key().copied().unwrap());
    }

    #[test]
    fn test_resolve_header_key_errors_without_oracle_or_direct_value() {
        let keyset = Keyset::from_reader(Cursor::new("")).unwrap();
        assert!(resolve_header_key(&keyset, None).is_err());
    }
}
