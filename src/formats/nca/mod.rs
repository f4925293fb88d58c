//! NCA (Nintendo Content Archive) file format
//!
//! This module provides functionality for reading, decrypting, and rewriting
//! NCA files used in Nintendo Switch games.
//!
//! # Structure
//!
//! An NCA file consists of:
//! - An encrypted header (first 0xC00 bytes)
//!   - Main NCA header (0x400 bytes)
//!   - Section headers (0x200 bytes per section, up to 4 sections)
//! - Content sections containing file data
//!
//! # Encryption
//!
//! NCAs use several encryption mechanisms:
//! - AES-XTS with Nintendo's custom tweak for the header
//! - AES-CTR for content sections
//! - Rights management via titlekeys for (most) content
//!
//! # Key Hierarchy
//!
//! The module handles different encryption keys:
//! - Header key for decrypting the NCA header
//! - Key area keys (application, ocean, system)
//! - Title keys for DRM-protected content
//!
//! The title keys are generated by the Nintendo Switch's production keys (see [Keyset](crate::formats::keyset::Keyset)).

use binrw::prelude::*;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::io::{Read, Seek};

mod types;

use tracing::instrument;

use crate::io::{Aes128CtrReader, ReadSeek, SubFile};

use super::keyset::get_nintendo_tweak;
use super::pfs0::Pfs0;
use super::romfs::RomFs;
use super::{Keyset, TitleKeys};
pub use types::*;

// The first 0xC00 bytes are encrypted with AES-XTS with sector size 0x200
// with a non-standard "tweak" (endianness is reversed as big endian), this
// encrypted data is an 0x400 NCA header + an 0x200 header for each section
// in the section table.

/// Encrypts data with the NCA header key using AES-XTS with Nintendo's special tweak
pub fn encrypt_with_header_key(
    data: &[u8],
    keyset: &Keyset,
    sector_size: usize,
    first_sector_index: u128,
) -> Vec<u8> {
    let mut encrypted = data.to_vec();
    let xts = keyset.header_crypt();

    xts.unwrap().encrypt_area(
        &mut encrypted,
        sector_size,
        first_sector_index,
        get_nintendo_tweak,
    );

    encrypted
}

/// Decrypts data with the NCA header key using AES-XTS with Nintendo's special tweak
pub fn decrypt_with_header_key(
    data: &[u8],
    keyset: &Keyset,
    sector_size: usize,
    first_sector_index: u128,
) -> Vec<u8> {
    let mut decrypted = data.to_vec();
    let xts = keyset.header_crypt();

    if let Some(xts) = xts {
        xts.decrypt_area(
            &mut decrypted,
            sector_size,
            first_sector_index,
            get_nintendo_tweak,
        );
    } else {
        panic!("Failed to get header crypt");
    }

    decrypted
}

/// Verifies an RSA-2048 PKCS#1 v1.5 / SHA-256 signature over `signed_region`
/// using a known public-key modulus and exponent 0x10001. Used both for the
/// NCA header's own fixed-key signature and for the embedded NPDM signature.
pub fn verify_rsa_pkcs1_sha256(
    signed_region: &[u8],
    signature: &[u8],
    modulus: &[u8; 0x100],
) -> Result<(), crate::error::Error> {
    let n = BigUint::from_bytes_be(modulus);
    let e = BigUint::from_bytes_be(&[0x01, 0x00, 0x01]);
    let public_key = RsaPublicKey::new(n, e)?;
    let digest = Sha256::digest(signed_region);

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| crate::error::Error::InvalidNcaSignature0)
}

/// Represents the version of an NCA file
///
/// Is essentially a char, but is wrapped in a struct for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
#[binrw(repr = u8)]
pub struct NcaVersion(pub u8);

impl NcaVersion {
    /// Create a new NcaVersion from a character
    pub fn from_char(c: char) -> Self {
        Self(c as u8)
    }

    /// Get the version as a character
    pub fn as_char(&self) -> char {
        self.0 as char
    }

    /// Create from a u8 value
    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

impl From<char> for NcaVersion {
    fn from(c: char) -> Self {
        Self::from_char(c)
    }
}

impl From<u8> for NcaVersion {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

pub const BLOCK_SIZE: usize = 0x200;

/// Calculates the offset in bytes for a block offset
pub fn get_block_offset(offset: u64) -> u64 {
    BLOCK_SIZE as u64 * offset
}

#[binrw]
#[brw(little)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEntry {
    /// StartOffset (in blocks of 0x200 bytes) of the section
    pub start_offset: u32,
    /// EndOffset (in blocks of 0x200 bytes) of the section
    pub end_offset: u32,
    /// Unknown
    pub _reserved: u64,
}

/// The NCA key area: four independent 16-byte slots. By convention
/// (unrelated to the generic index here) slot 0/1 hold the AES-XTS key
/// pair used by pre-1.0 NCA2 content, slot 2 holds the AES-CTR content
/// key, and slot 3 holds the AES-CTR key used for patch (AesCtrEx)
/// sections.
#[binrw]
#[brw(little)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeyArea {
    pub keys: [[u8; 0x10]; 4],
}

pub const KEY_AREA_AES_CTR_SLOT: usize = 2;

impl KeyArea {
    pub fn as_bytes(&self) -> [u8; 0x40] {
        let mut out = [0u8; 0x40];
        for (i, key) in self.keys.iter().enumerate() {
            out[i * 0x10..(i + 1) * 0x10].copy_from_slice(key);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; 0x40]) -> Self {
        let mut keys = [[0u8; 0x10]; 4];
        for (i, key) in keys.iter_mut().enumerate() {
            key.copy_from_slice(&bytes[i * 0x10..(i + 1) * 0x10]);
        }
        Self { keys }
    }
}

/// NCA Header
///
/// The NCA header is the first 0x340 (832) bytes of an NCA file.
/// It contains metadata about the NCA file, such as the content size,
/// program ID, and other information.
/// However, the first 0xC00 (3072) bytes of the NCA file are encrypted.
#[binrw]
#[brw(little)]
#[derive(Debug)]
pub struct NcaHeader {
    #[brw(pad_size_to = 0x100)]
    pub header_sig: RSASignature,
    #[brw(pad_size_to = 0x100)]
    pub header_key_sig: RSASignature,
    #[brw(magic = b"NCA")]
    // The full magic is 4 bytes; the first 3 are guaranteed "NCA" and the
    // 4th is the version digit, modeled separately as `nca_version`.
    pub nca_version: NcaVersion,
    /// Distribution type
    pub distribution: DistributionType,
    /// Content type
    pub content_type: ContentType,
    /// key_generation_old
    pub key_generation_old: KeyGenerationOld,
    pub key_area_appkey_index: KeyAreaEncryptionKeyIndex,
    pub content_size: u64,
    pub program_id: u64,
    pub content_index: u32,
    pub sdk_version: u32,
    /// Key generation, added in 3.0.0. Effective generation is the larger
    /// of this and `key_generation_old`; see [`NcaHeader::get_key_generation`].
    pub key_generation: u8,
    pub signature_key_generation: u8,
    pub _reserved_e: [u8; 0xE],
    pub rights_id: [u8; 0x10],
    #[br(count = 4)]
    #[brw(pad_size_to = 0x10 * 4)]
    pub fs_entries: Vec<FsEntry>,
    #[br(count = 4)]
    #[brw(pad_size_to = 0x20 * 4)]
    pub sha256_hashes: Vec<[u8; 0x20]>,
    pub encrypted_keys: KeyArea,
}

impl NcaHeader {
    /// Takes an already-decrypted NCA header and parses it
    ///
    /// This will take only what is needed for the header, which is the first 0x340 bytes, and parse it.
    ///
    /// Note: If you would like to decrypt the header first, please use the `to_bytes_encrypt` method.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Self, crate::error::Error> {
        let mut decrypted = vec![0; 0x340];
        reader.read_exact(&mut decrypted)?;
        let header: NcaHeader = binrw::io::Cursor::new(&decrypted).read_le()?;
        Ok(header)
    }

    /// Parses an NCA header from a byte slice (0x340 bytes) of an already-decrypted header
    pub fn from_bytes(bytes: &[u8; 0x340]) -> Result<Self, crate::error::Error> {
        let header: NcaHeader = binrw::io::Cursor::new(bytes).read_le()?;
        Ok(header)
    }

    /// Encrypts the header data with the NCA header encryption
    ///
    /// The first 0xC00 bytes are encrypted with AES-XTS with sector size 0x200
    /// and a non-standard tweak. This encrypted data includes:
    /// - 0x400 bytes for the NCA header
    /// - 0x800 bytes for section headers (0x200 bytes per section)
    pub fn to_bytes_encrypt(&self, keyset: &Keyset) -> Vec<u8> {
        let header_data = self.to_bytes();

        let mut header_data_padded = vec![0u8; header_data.len().max(0xC00)];
        header_data_padded[..header_data.len()].copy_from_slice(&header_data);

        let mut encrypted = header_data_padded.clone();
        let xts = keyset.header_crypt();

        let sector_size = 0x200;
        let first_sector_index = 0;
        let encrypted_portion = &mut encrypted[..0xC00];

        xts.unwrap().encrypt_area(
            encrypted_portion,
            sector_size,
            first_sector_index,
            get_nintendo_tweak,
        );

        encrypted
    }

    /// Serializes the header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = binrw::io::Cursor::new(Vec::new());
        self.write_le(&mut cursor)
            .expect("Failed to serialize header");
        cursor.into_inner()
    }

    /// Get the key generation to use (accounting for old key_generation field)
    pub fn get_key_generation(&self) -> u8 {
        let key_gen_old = self.key_generation_old as u8;
        let key_gen = self.key_generation;

        let base_key_gen = key_gen_old.max(key_gen);

        // Both 0 and 1 are master key 0
        if base_key_gen > 0 {
            base_key_gen - 1
        } else {
            base_key_gen
        }
    }

    /// Rewrites a rights-ID NCA into a "standard crypto" NCA: the decrypted
    /// title key is placed directly into the key area and the rights ID is
    /// cleared, so the content no longer depends on a ticket being present
    /// on the target system. If `lower_master_key` is set, the key
    /// generation is additionally rewritten down to 0 so the content can be
    /// installed on consoles with an older master key.
    pub fn convert_to_standard_crypto(
        &mut self,
        title_key: [u8; 0x10],
        keyset: &Keyset,
        lower_master_key: bool,
    ) -> Result<(), crate::error::Error> {
        if lower_master_key {
            self.key_generation = 0;
            self.key_generation_old = KeyGenerationOld::Gen1_0_0;
        }

        let key_gen = self.get_key_generation();
        let kaek = keyset
            .get_key_area_key(self.key_area_appkey_index as u8, key_gen)
            .ok_or(crate::error::Error::KeyMissingNcaKeyArea)?;

        let mut key_area = KeyArea::default();
        key_area.keys[KEY_AREA_AES_CTR_SLOT] = title_key;

        let mut buf = key_area.as_bytes();
        type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
        let encryptor = Aes128EcbEnc::new_from_slice(&kaek)?;
        encryptor
            .encrypt_padded_mut::<NoPadding>(&mut buf, 0x40)
            .map_err(|_| {
                crate::error::Error::CryptoError("failed to re-encrypt key area".to_string())
            })?;

        self.encrypted_keys = KeyArea::from_bytes(&buf);
        self.rights_id = [0; 0x10];

        Ok(())
    }
}

pub struct Nca<R: Read + Seek> {
    reader: R,
    pub header: NcaHeader,
    pub fs_headers: Vec<FsHeader>,
    /// The decrypted 0xC00-byte header region, kept around for fixed-key
    /// signature verification.
    raw_header: Vec<u8>,
    dec_title_key: Option<[u8; 0x10]>,
    dec_key_area: KeyArea,
    key_status: bool,
}

impl<R: Read + Seek> Nca<R> {
    #[instrument(
        level = "trace",
        skip(reader, keyset, title_keys),
        fields(content_type, nca_version)
    )]
    pub fn from_reader(
        reader: R,
        keyset: &Keyset,
        title_keys: Option<&TitleKeys>,
    ) -> Result<Self, crate::error::Error> {
        let mut reader = reader;
        let mut encrypted_buf = vec![0; 0xC00];
        reader.read_exact(&mut encrypted_buf)?;

        let decrypted = decrypt_with_header_key(&encrypted_buf, keyset, 0x200, 0);

        let header = {
            let header_slice = &decrypted[..0x340];
            let header_array: &[u8; 0x340] = header_slice
                .try_into()
                .expect("Slice length doesn't match array length");
            NcaHeader::from_bytes(header_array)?
        };

        tracing::Span::current()
            .record("content_type", format!("{:?}", header.content_type))
            .record(
                "nca_version",
                format_args!("{}", header.nca_version.as_char()),
            );

        tracing::trace!(
            nca_version = %header.nca_version.as_char(),
            content_type = ?header.content_type,
            key_generation_old = ?header.key_generation_old,
            key_generation = header.key_generation,
            key_area_appkey_index = ?header.key_area_appkey_index,
            "NCA header decoded"
        );

        let mut fs_headers = Vec::new();

        for (i, entry) in header.fs_entries.iter().enumerate() {
            if entry.start_offset == 0 && entry.end_offset == 0 {
                continue;
            }

            let fs_header_offset = 0x400 + (i * 0x200);

            if fs_header_offset + 0x200 > decrypted.len() {
                tracing::warn!("FS header {} is out of bounds", i);
                break;
            }

            let fs_header_data = &decrypted[fs_header_offset..fs_header_offset + 0x200];
            let mut cursor = binrw::io::Cursor::new(fs_header_data);
            let fs_header: FsHeader = cursor.read_le()?;

            fs_headers.push(fs_header);
        }

        let mut dec_key_area = KeyArea::default();
        let mut key_status = true;

        let dec_title_key = if !header.rights_id.iter().all(|&b| b == 0) {
            let rights_id_hex = hex::encode(header.rights_id).to_uppercase();
            tracing::trace!(rights_id = %rights_id_hex, "NCA requires title key");

            let key_gen = header.get_key_generation();

            if let Some(title_keys_db) = title_keys {
                let title_kek = keyset.get_title_kek(key_gen as usize);
                tracing::trace!(
                    key_gen = %key_gen,
                    title_kek = ?title_kek,
                    "Title KEK obtained"
                );

                if let Some(title_kek) = title_kek {
                    match title_keys_db.decrypt_title_key(&rights_id_hex, &title_kek) {
                        Ok(dec_key) => Some(dec_key),
                        Err(e) => {
                            tracing::warn!("Failed to decrypt title key: {}", e);
                            key_status = false;
                            None
                        }
                    }
                } else {
                    tracing::warn!(
                        "Title key encryption key not present for key generation {}",
                        key_gen
                    );
                    key_status = false;
                    None
                }
            } else {
                tracing::warn!("NCA requires title key but no title keys database was supplied");
                key_status = false;
                None
            }
        } else {
            tracing::trace!("NCA does not require title key, attempting to get key area key");
            let key_gen = header.get_key_generation();

            let key_area_key = keyset.get_key_area_key(header.key_area_appkey_index as u8, key_gen);
            tracing::trace!(
                key_gen = %key_gen,
                key_type = ?header.key_area_appkey_index,
                key = ?key_area_key,
                "Key area key obtained"
            );

            if let Some(key) = key_area_key {
                tracing::trace!(
                    encrypted_key_area = %hex::encode(header.encrypted_keys.as_bytes()),
                    "Decrypting key area"
                );

                type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

                let decryptor = Aes128EcbDec::new_from_slice(&key).map_err(|_| {
                    crate::error::Error::CryptoError("Failed to create ECB decryptor".to_string())
                })?;

                let mut buf = header.encrypted_keys.as_bytes();
                decryptor
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(|_| {
                        crate::error::Error::CryptoError("Failed to decrypt key area".to_string())
                    })?;

                dec_key_area = KeyArea::from_bytes(&buf);

                tracing::trace!(
                    decrypted_key_area = %hex::encode(dec_key_area.as_bytes()),
                    "Key area decrypted"
                );
            } else {
                tracing::warn!(
                    key_type = ?header.key_area_appkey_index,
                    key_gen = %key_gen,
                    "Key area key not present"
                );
                key_status = false;
            }

            None
        };

        tracing::trace!(
            fs_header_count = fs_headers.len(),
            "NCA filesystem headers decoded"
        );

        for (i, fs_header) in fs_headers.iter().enumerate() {
            tracing::trace!(
                index = i,
                fs_type = ?fs_header.fs_type,
                encryption_type = ?fs_header.encryption_type,
                hash_type = ?fs_header.hash_type,
                "FS header details"
            );
        }

        Ok(Self {
            reader,
            header,
            fs_headers,
            raw_header: decrypted,
            dec_title_key,
            dec_key_area,
            key_status,
        })
    }

    /// Verifies the NCA header's fixed-key RSA signature (`header_sig`)
    /// against a public-key modulus supplied by the keyset, selected by
    /// `header.signature_key_generation`. If the keyset carries no such
    /// modulus, verification is skipped with a warning rather than failing
    /// outright, since this crate doesn't ship Nintendo's public keys.
    pub fn verify_fixed_key_signature(&self, keyset: &Keyset) -> Result<(), crate::error::Error> {
        let Some(modulus) =
            keyset.get_nca_header_fixed_key_modulus(self.header.signature_key_generation)
        else {
            tracing::warn!(
                "no fixed-key modulus configured for generation {}, skipping NCA header signature verification",
                self.header.signature_key_generation
            );
            return Ok(());
        };

        verify_rsa_pkcs1_sha256(&self.raw_header[0x100..0xC00], &self.raw_header[..0x100], &modulus)
    }

    /// Get the number of valid filesystems in this NCA
    #[inline]
    pub fn filesystem_count(&self) -> usize {
        self.fs_headers.len()
    }

    /// Get the filesystem offset in bytes
    pub fn get_fs_offset(&self, idx: usize) -> Option<u64> {
        if idx >= self.fs_headers.len() {
            return None;
        }

        let valid_entries: Vec<_> = self
            .header
            .fs_entries
            .iter()
            .filter(|entry| entry.start_offset != 0 || entry.end_offset != 0)
            .collect();

        if idx >= valid_entries.len() {
            return None;
        }

        let fs_entry = valid_entries[idx];
        Some(get_block_offset(fs_entry.start_offset as u64))
    }

    /// Check if the NCA needs a title key for decryption
    #[inline]
    pub fn has_rights_id(&self) -> bool {
        !self.header.rights_id.iter().all(|&b| b == 0)
    }

    /// Check if the NCA has valid keys for decryption
    #[inline]
    pub fn has_valid_keys(&self) -> bool {
        self.key_status
    }

    /// Get the key generation to use (accounting for old key_generation field)
    #[inline]
    pub fn get_key_generation(&self) -> u8 {
        self.header.get_key_generation()
    }

    /// Gets the AES-CTR key for decryption
    /// If the NCA has a rights ID, it uses the stored decrypted title key
    /// Otherwise, it uses the decrypted key area key
    #[inline]
    pub fn get_aes_ctr_decrypt_key(&self) -> Result<[u8; 0x10], crate::error::Error> {
        if self.has_rights_id() {
            if let Some(dec_key) = self.dec_title_key {
                tracing::trace!(key = %hex::encode(dec_key), "Using decrypted title key");
                return Ok(dec_key);
            }

            let rights_id_hex = hex::encode(self.header.rights_id).to_uppercase();
            return Err(crate::error::Error::KeyLookupError(format!(
                "NCA requires title key for rights ID {}, but it was not available or could not be decrypted",
                rights_id_hex
            )));
        }

        if !self.key_status {
            let key_gen = self.get_key_generation();
            let key_type = self.header.key_area_appkey_index;

            let key_name = match key_type {
                KeyAreaEncryptionKeyIndex::Application => "key_area_key_application",
                KeyAreaEncryptionKeyIndex::Ocean => "key_area_key_ocean",
                KeyAreaEncryptionKeyIndex::System => "key_area_key_system",
            };

            return Err(crate::error::Error::KeyLookupError(format!(
                "Key area could not be decrypted (missing {}_{:02x} in keys file)",
                key_name, key_gen
            )));
        }

        tracing::trace!(
            key = %hex::encode(self.dec_key_area.keys[KEY_AREA_AES_CTR_SLOT]),
            "Using decrypted key area key"
        );
        Ok(self.dec_key_area.keys[KEY_AREA_AES_CTR_SLOT])
    }

    /// Private helper method to prepare a reader for any filesystem type
    #[instrument(level = "trace", skip(self))]
    fn prepare_fs_reader(&mut self, idx: usize) -> Result<Box<dyn ReadSeek + '_>, crate::error::Error> {
        if idx >= self.fs_headers.len() {
            return Err(crate::error::Error::InvalidState(
                "Invalid filesystem index".to_string(),
            ));
        }

        let fs_header = &self.fs_headers[idx];

        let fs_start_offset = self
            .get_fs_offset(idx)
            .ok_or(crate::error::Error::InvalidState(
                "Failed to get filesystem offset".to_string(),
            ))?;

        tracing::trace!(
            fs_index = idx,
            fs_start_offset = format!("0x{:X}", fs_start_offset),
            fs_type = ?fs_header.fs_type,
            encryption_type = ?fs_header.encryption_type,
            hash_type = ?fs_header.hash_type,
            counter = format!("0x{:X}", fs_header.ctr),
            "Opening filesystem sector",
        );

        let (region_offset, fs_size) = fs_header.hash_data.data_region();
        let fs_offset_abs = region_offset + fs_start_offset;

        tracing::trace!(
            fs_offset_abs = format!("0x{:X}", fs_offset_abs),
            "Absolute filesystem offset",
        );

        match fs_header.encryption_type {
            EncryptionType::None => {
                tracing::trace!("No encryption detected");

                let reader = std::io::BufReader::new(self.reader.by_ref());
                let subfile = SubFile::new(reader, fs_offset_abs, fs_offset_abs + fs_size);

                Ok(Box::new(subfile))
            }
            EncryptionType::AesCtr => {
                tracing::trace!("Using AES-CTR decryption");

                let decrypt_key = self.get_aes_ctr_decrypt_key()?.to_vec();
                tracing::trace!(decrypt_key = %hex::encode(&decrypt_key), "Decryption key obtained");

                let reader = std::io::BufReader::new(self.reader.by_ref());

                let aes_reader =
                    Aes128CtrReader::new(reader, fs_offset_abs, fs_header.ctr, decrypt_key);

                Ok(Box::new(aes_reader))
            }
            _ => {
                tracing::trace!(encryption_type = ?fs_header.encryption_type, "Unsupported encryption type");
                Err(crate::error::Error::InvalidData(format!(
                    "Unsupported encryption type: {:?}",
                    fs_header.encryption_type
                )))
            }
        }
    }

    #[instrument(level = "trace", skip(self))]
    pub fn open_pfs0_filesystem(
        &mut self,
        idx: usize,
    ) -> Result<Pfs0<Box<dyn ReadSeek + '_>>, crate::error::Error> {
        let mut reader = self.prepare_fs_reader(idx)?;

        let mut magic = [0u8; 4];
        reader.seek(std::io::SeekFrom::Start(0))?;
        reader.read_exact(&mut magic)?;

        tracing::trace!(
            magic_bytes = %hex::encode(magic),
            magic_str = %String::from_utf8_lossy(&magic),
            "PFS0 magic bytes"
        );

        reader.seek(std::io::SeekFrom::Start(0))?;

        tracing::trace!("Attempting to open PFS0");
        match Pfs0::new(reader) {
            Ok(pfs0) => {
                if let Ok(files) = pfs0.list_files() {
                    tracing::trace!(files = ?files, "PFS0 opened successfully");
                } else {
                    tracing::trace!("PFS0 opened successfully but file listing failed");
                }
                Ok(pfs0)
            }
            Err(e) => {
                tracing::trace!(error = %e, "Failed to open PFS0");
                Err(crate::error::Error::InvalidData(format!(
                    "Failed to open PFS0: {}",
                    e
                )))
            }
        }
    }

    #[instrument(level = "trace", skip(self))]
    pub fn open_romfs_filesystem(
        &mut self,
        idx: usize,
    ) -> Result<RomFs<Box<dyn ReadSeek + '_>>, crate::error::Error> {
        tracing::trace!(idx, "Opening RomFS filesystem");

        if idx >= self.fs_headers.len() {
            return Err(crate::error::Error::InvalidState(
                "Invalid filesystem index".to_string(),
            ));
        }

        let fs_header = &self.fs_headers[idx];
        if fs_header.fs_type != FsType::RomFs {
            return Err(crate::error::Error::InvalidState(format!(
                "Invalid filesystem type: {:?}",
                fs_header.fs_type
            )));
        }

        let reader = self.prepare_fs_reader(idx)?;

        tracing::trace!("Attempting to open RomFS");

        RomFs::new(reader).map_err(|e| crate::error::Error::InvalidData(e.to_string()))
    }

    pub fn decrypt_and_dump_fs(&mut self, idx: usize) -> Result<Vec<u8>, crate::error::Error> {
        tracing::trace!("Decrypting and dumping filesystem {}", idx);
        let mut reader = self.prepare_fs_reader(idx)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xts_mode::get_tweak_default;

    #[test]
    fn test_nintendo_tweak_generation() {
        let sector = 0x01020304_u128;
        let tweak = get_nintendo_tweak(sector);
        let expected = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02,
            0x03, 0x04,
        ];
        assert_eq!(tweak.as_slice(), &expected);
    }

    #[test]
    fn test_standard_tweak_generation() {
        let sector = 0x01020304_u128;
        let tweak = get_tweak_default(sector);
        let expected = [
            0x04, 0x03, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        assert_eq!(tweak.as_slice(), &expected);
    }

    #[test]
    fn test_nintendo_standard_tweak_difference() {
        let sector = 0x0102030405060708_u128;
        let nintendo_tweak = get_nintendo_tweak(sector);
        let standard_tweak = get_tweak_default(sector);
        assert_ne!(nintendo_tweak, standard_tweak);
    }

    #[test]
    fn test_fs_entry_size() {
        let entry = FsEntry {
            start_offset: 0,
            end_offset: 100,
            _reserved: 0,
        };
        assert_eq!(std::mem::size_of_val(&entry), 16);
    }

    fn test_header() -> NcaHeader {
        NcaHeader {
            header_sig: RSASignature::default(),
            header_key_sig: RSASignature::default(),
            nca_version: NcaVersion::from_char('3'),
            distribution: DistributionType::System,
            content_type: ContentType::Program,
            key_generation_old: KeyGenerationOld::Gen3_0_0,
            key_area_appkey_index: KeyAreaEncryptionKeyIndex::Application,
            content_size: 0,
            program_id: 0,
            content_index: 0,
            sdk_version: 0,
            key_generation: 0,
            signature_key_generation: 0,
            _reserved_e: [0; 0xE],
            rights_id: [0; 0x10],
            fs_entries: vec![],
            sha256_hashes: vec![],
            encrypted_keys: KeyArea::default(),
        }
    }

    #[test]
    fn test_nca_header_size() {
        let header = test_header();
        let header_bytes = header.to_bytes();
        assert_eq!(header_bytes.len(), 0x340);
    }

    #[test]
    fn test_header_magic() {
        let header = test_header();
        let header_bytes = header.to_bytes();
        assert_eq!(&header_bytes[0x200..0x204], b"NCA3");
    }

    #[test]
    fn test_header_enc_dec() {
        let header = test_header();

        let keyset = Keyset {
            header_key_cache: Some([0; 0x20]),
            ..Default::default()
        };

        let header_bytes = header.to_bytes();
        assert_eq!(header_bytes.len(), 0x340);

        let mut to_be_encrypted = vec![0; 0xC00];
        to_be_encrypted[..0x340].copy_from_slice(&header_bytes);

        let encrypted = encrypt_with_header_key(&to_be_encrypted, &keyset, 0x200, 0);
        let decrypted = decrypt_with_header_key(&encrypted, &keyset, 0x200, 0);

        let decrypted_header = &decrypted[..0x340];

        assert_eq!(header_bytes, decrypted_header);
    }

    #[test]
    fn test_key_area_round_trip() {
        let mut area = KeyArea::default();
        area.keys[KEY_AREA_AES_CTR_SLOT] = [0xAB; 0x10];

        let bytes = area.as_bytes();
        let restored = KeyArea::from_bytes(&bytes);

        assert_eq!(area, restored);
    }

    #[test]
    fn test_convert_to_standard_crypto_clears_rights_id() {
        let mut header = test_header();
        header.rights_id = [0xAA; 0x10];

        let mut keyset = Keyset::default();
        keyset
            .raw_keys
            .insert("key_area_key_application_00".to_string(), vec![0u8; 0x10]);

        header
            .convert_to_standard_crypto([0x11; 0x10], &keyset, false)
            .unwrap();

        assert_eq!(header.rights_id, [0; 0x10]);
        assert_ne!(header.encrypted_keys, KeyArea::default());
    }
}
