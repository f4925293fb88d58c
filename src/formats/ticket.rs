//! Nintendo eTicket ("ES") ticket and certificate format.
//!
//! A ticket licenses a title to run on a console and carries the title key
//! used to unlock that title's NCA content — either directly (a `Common`
//! ticket, shared across every console) or RSA-OAEP-wrapped to one console's
//! eTicket device key (a `Personalized` ticket). A certificate authenticates
//! the issuer of a ticket or another certificate; both share the same
//! leading "signature block" shape, one of seven kinds identified by a
//! big-endian `sig_type` tag carried over from the original 3DS/Wii ES
//! format.
//!
//! Layout grounded in `original_source/sphaira/include/yati/nx/es.hpp`.

use std::io::{Read, Seek, SeekFrom};

use binrw::prelude::*;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;

use crate::error::Error;
use crate::formats::keyset::{EticketDeviceKey, Keyset};

/// Leading tag of a signature block. Stored big-endian regardless of the
/// rest of the ticket/certificate, a holdover from the original ES format.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big, repr = u32)]
pub enum SigType {
    Rsa4096Sha1 = 65536,
    Rsa2048Sha1 = 65537,
    Ecc480Sha1 = 65538,
    Rsa4096Sha256 = 65539,
    Rsa2048Sha256 = 65540,
    Ecc480Sha256 = 65541,
    Hmac160Sha1 = 65542,
}

impl SigType {
    /// Length of the signature payload itself, excluding the tag and the
    /// kind's trailing reserved padding.
    pub fn signature_len(self) -> usize {
        match self {
            SigType::Rsa4096Sha1 | SigType::Rsa4096Sha256 => 0x200,
            SigType::Rsa2048Sha1 | SigType::Rsa2048Sha256 => 0x100,
            SigType::Ecc480Sha1 | SigType::Ecc480Sha256 => 0x3C,
            SigType::Hmac160Sha1 => 0x14,
        }
    }

    /// Total size of the signature block this tag introduces (tag +
    /// signature + reserved padding). Each kind's size is already a multiple
    /// of 0x40, so the `data` that follows lands aligned with no extra
    /// padding needed.
    pub fn block_size(self) -> usize {
        match self {
            SigType::Rsa4096Sha1 | SigType::Rsa4096Sha256 => 0x240,
            SigType::Rsa2048Sha1 | SigType::Rsa2048Sha256 => 0x140,
            SigType::Ecc480Sha1 | SigType::Ecc480Sha256 => 0x80,
            SigType::Hmac160Sha1 => 0x40,
        }
    }
}

/// A signature block: a `sig_type` tag, the signature payload itself
/// (padding dropped), sized per [`SigType::block_size`].
#[derive(Debug, Clone)]
pub struct SignatureBlock {
    pub sig_type: SigType,
    pub signature: Vec<u8>,
}

impl SignatureBlock {
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, Error> {
        let sig_type: SigType = reader.read_type(binrw::Endian::Big)?;
        let sig_len = sig_type.signature_len();
        let block_len = sig_type.block_size();

        let mut signature = vec![0u8; sig_len];
        reader.read_exact(&mut signature)?;

        let reserved_len = block_len - 4 - sig_len;
        reader.seek(SeekFrom::Current(reserved_len as i64))?;

        Ok(Self { sig_type, signature })
    }
}

/// Public-key kind carried by a certificate's trailing public-key block.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little, repr = u32)]
pub enum PubKeyType {
    Rsa4096 = 0,
    Rsa2048 = 1,
    Ecc480 = 2,
}

/// Fixed-size header shared by all certificate shapes, between the
/// signature block and the public-key block.
#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(little)]
pub struct CertHeader {
    pub issuer: [u8; 0x40],
    pub pub_key_type: PubKeyType,
    pub subject: [u8; 0x40],
    pub date: u32,
}

/// A certificate: signature block, fixed header, and a public-key block
/// sized by `pub_key_type`. Only RSA-2048 public keys are extracted — the
/// only kind title-key decryption needs — but every kind is skipped over
/// correctly so certificate chains parse regardless of which issuer
/// certificate holds the RSA-2048 key this crate actually uses.
#[derive(Debug, Clone)]
pub struct Cert {
    pub signature_block: SignatureBlock,
    pub header: CertHeader,
    /// Present only when `header.pub_key_type == Rsa2048`.
    pub rsa2048_public_key: Option<[u8; 0x100]>,
}

impl Cert {
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, Error> {
        let signature_block = SignatureBlock::read(reader)?;
        let header: CertHeader = reader.read_le()?;

        let rsa2048_public_key = match header.pub_key_type {
            PubKeyType::Rsa2048 => {
                let mut public_key = [0u8; 0x100];
                reader.read_exact(&mut public_key)?;
                // public_exponent(4) + reserved(0x34), unused.
                reader.seek(SeekFrom::Current(0x4 + 0x34))?;
                Some(public_key)
            }
            PubKeyType::Rsa4096 => {
                // public_key(0x200) + public_exponent(4) + reserved(0x34), unused.
                reader.seek(SeekFrom::Current(0x200 + 0x4 + 0x34))?;
                None
            }
            PubKeyType::Ecc480 => {
                // public_key(0x3C) + reserved(0x3C), unused.
                reader.seek(SeekFrom::Current(0x3C + 0x3C))?;
                None
            }
        };

        Ok(Self {
            signature_block,
            header,
            rsa2048_public_key,
        })
    }
}

/// `TitleKeyType` per spec: `Common` tickets carry the raw title key,
/// `Personalized` tickets carry an RSA-OAEP-wrapped one bound to a console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleKeyType {
    Common = 0,
    Personalized = 1,
}

impl TryFrom<u8> for TitleKeyType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(TitleKeyType::Common),
            1 => Ok(TitleKeyType::Personalized),
            _ => Err(Error::InvalidTicketKeyType),
        }
    }
}

/// Fixed 0x180-byte ticket payload, immediately following the signature
/// block. Layout grounded in `original_source/sphaira/include/yati/nx/es.hpp`'s
/// `TicketData`.
#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(little)]
pub struct TicketData {
    pub issuer: [u8; 0x40],
    pub title_key_block: [u8; 0x100],
    pub format_version: u8,
    pub title_key_type: u8,
    pub ticket_version: u16,
    pub license_type: u8,
    pub master_key_revision: u8,
    pub properties_bitfield: u16,
    pub _reserved0: [u8; 0x8],
    pub ticket_id: u64,
    pub device_id: u64,
    pub rights_id: [u8; 0x10],
    pub account_id: u32,
    pub sect_total_size: u32,
    pub sect_hdr_offset: u32,
    pub sect_hdr_count: u16,
    pub sect_hdr_entry_size: u16,
}

/// A parsed, validated ticket: signature block + fixed data.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub signature_block: SignatureBlock,
    pub data: TicketData,
}

impl Ticket {
    pub fn from_reader<R: Read + Seek>(mut reader: R) -> Result<Self, Error> {
        let signature_block = SignatureBlock::read(&mut reader)?;
        let mut data: TicketData = reader.read_le()?;

        if data.format_version != 2 {
            return Err(Error::InvalidTicketFromatVersion);
        }
        let title_key_type = TitleKeyType::try_from(data.title_key_type)?;

        // Buggy-dump correction: some scene-release tools leave a Common
        // ticket's master_key_revision at 0 and stuff the real revision into
        // the rights id's trailing byte instead, along with a stray nonzero
        // properties_bitfield. Recover the intended revision and clear the
        // bitfield so downstream logic sees a clean ticket.
        if title_key_type == TitleKeyType::Common
            && data.master_key_revision == 0
            && data.rights_id[15] != 0
            && data.properties_bitfield != 0
        {
            data.master_key_revision = data.rights_id[15];
            data.properties_bitfield = 0;
        }

        if data.master_key_revision > 0x20 {
            return Err(Error::InvalidTicketKeyRevision);
        }

        Ok(Self {
            signature_block,
            data,
        })
    }

    pub fn title_key_type(&self) -> Result<TitleKeyType, Error> {
        TitleKeyType::try_from(self.data.title_key_type)
    }

    /// Confirms this ticket's rights id matches the `<hex>.tik` filename it
    /// was paired with, else `InvalidTicketBadRightsId`.
    pub fn verify_rights_id(&self, expected: [u8; 0x10]) -> Result<(), Error> {
        if self.data.rights_id != expected {
            return Err(Error::InvalidTicketBadRightsId);
        }
        Ok(())
    }

    /// `GetTitleKey`: extracts the raw 16-byte title key, decrypting an
    /// RSA-OAEP-wrapped Personalized key against `device_key` when present.
    pub fn get_title_key(&self, device_key: Option<&EticketDeviceKey>) -> Result<[u8; 0x10], Error> {
        match self.title_key_type()? {
            TitleKeyType::Common => {
                let mut key = [0u8; 0x10];
                key.copy_from_slice(&self.data.title_key_block[..0x10]);
                Ok(key)
            }
            TitleKeyType::Personalized => {
                let device_key =
                    device_key.ok_or(Error::KeyFailedDecyptETicketDeviceKey)?;
                if device_key.device_id.swap_bytes() != self.data.device_id {
                    return Err(Error::KeyFailedDecyptETicketDeviceKey);
                }

                let private_key = RsaPrivateKey::from_components(
                    rsa::BigUint::from_bytes_be(&device_key.modulus),
                    rsa::BigUint::from_bytes_be(&device_key.public_exponent.to_be_bytes()),
                    rsa::BigUint::from_bytes_be(&device_key.private_exponent),
                    vec![],
                )
                .map_err(|_| Error::KeyFailedDecyptETicketDeviceKey)?;

                let padding = Oaep::new::<Sha256>();
                let plaintext = private_key
                    .decrypt(padding, &self.data.title_key_block)
                    .map_err(|_| Error::KeyFailedDecyptETicketDeviceKey)?;

                if plaintext.len() < 0x10 {
                    return Err(Error::KeyFailedDecyptETicketDeviceKey);
                }
                let mut key = [0u8; 0x10];
                key.copy_from_slice(&plaintext[..0x10]);
                Ok(key)
            }
        }
    }

    /// `DecryptTitleKey(key, gen)`: AES-128-ECB-decrypts a raw title key
    /// against `titlekek[gen]`.
    pub fn decrypt_title_key(&self, raw_key: [u8; 0x10], keyset: &Keyset) -> Result<[u8; 0x10], Error> {
        let gen = self.data.master_key_revision;
        let kek = keyset
            .get_title_kek(gen as usize)
            .ok_or(Error::KeyMissingTitleKek)?;

        use aes::Aes128;
        use cipher::{BlockDecrypt, KeyInit, generic_array::GenericArray};

        let mut block = GenericArray::from(raw_key);
        Aes128::new(GenericArray::from_slice(&kek)).decrypt_block(&mut block);
        Ok(*block.as_ref())
    }

    /// Re-encrypts an already-decrypted title key back into a ticket's
    /// `title_key_block`, the inverse of `decrypt_title_key` — used by
    /// [`patch_to_common`] when rewrapping a Personalized ticket.
    fn encrypt_title_key(&self, title_key: [u8; 0x10], keyset: &Keyset) -> Result<[u8; 0x10], Error> {
        let gen = self.data.master_key_revision;
        let kek = keyset
            .get_title_kek(gen as usize)
            .ok_or(Error::KeyMissingTitleKek)?;

        use aes::Aes128;
        use cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};

        let mut block = GenericArray::from(title_key);
        Aes128::new(GenericArray::from_slice(&kek)).encrypt_block(&mut block);
        Ok(*block.as_ref())
    }
}

/// Rewraps a Personalized ticket as a Common one carrying the already
/// RSA-OAEP-decrypted title key directly, so the result no longer requires
/// console binding to install.
///
/// There is no working reference implementation of this upstream — the
/// original ships it as a stub (`// todo: patch the ticket.`); this follows
/// the scheme spec.md describes: zero `title_key_type`, place the
/// titlekek-encrypted raw title key directly into `title_key_block`, and
/// clear `properties_bitfield`'s console-binding bits.
pub fn patch_to_common(ticket: &Ticket, title_key: [u8; 0x10], keyset: &Keyset) -> Result<TicketData, Error> {
    let mut data = ticket.data.clone();
    let encrypted = ticket.encrypt_title_key(title_key, keyset)?;

    data.title_key_block = [0u8; 0x100];
    data.title_key_block[..0x10].copy_from_slice(&encrypted);
    data.title_key_type = TitleKeyType::Common as u8;

    // Clear ElicenseRequired (bit 0) / DeviceLinkIndependent (bit 1): the
    // rewritten ticket is no longer console-bound.
    data.properties_bitfield &= !0b11;

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_signature_block(out: &mut Vec<u8>, sig_type: SigType) {
        out.extend_from_slice(&(sig_type as u32).to_be_bytes());
        let sig_len = sig_type.signature_len();
        let block_len = sig_type.block_size();
        out.extend_from_slice(&vec![0u8; sig_len]);
        out.extend_from_slice(&vec![0u8; block_len - 4 - sig_len]);
    }

    fn write_ticket_data(
        out: &mut Vec<u8>,
        title_key: [u8; 0x10],
        title_key_type: u8,
        master_key_revision: u8,
        properties_bitfield: u16,
        rights_id: [u8; 0x10],
        device_id: u64,
    ) {
        out.extend_from_slice(&[0u8; 0x40]); // issuer
        let mut title_key_block = [0u8; 0x100];
        title_key_block[..0x10].copy_from_slice(&title_key);
        out.extend_from_slice(&title_key_block);
        out.push(2); // format_version
        out.push(title_key_type);
        out.extend_from_slice(&0u16.to_le_bytes()); // ticket_version
        out.push(0); // license_type
        out.push(master_key_revision);
        out.extend_from_slice(&properties_bitfield.to_le_bytes());
        out.extend_from_slice(&[0u8; 0x8]); // reserved
        out.extend_from_slice(&0u64.to_le_bytes()); // ticket_id
        out.extend_from_slice(&device_id.to_le_bytes());
        out.extend_from_slice(&rights_id);
        out.extend_from_slice(&0u32.to_le_bytes()); // account_id
        out.extend_from_slice(&0u32.to_le_bytes()); // sect_total_size
        out.extend_from_slice(&0u32.to_le_bytes()); // sect_hdr_offset
        out.extend_from_slice(&0u16.to_le_bytes()); // sect_hdr_count
        out.extend_from_slice(&0u16.to_le_bytes()); // sect_hdr_entry_size
    }

    #[test]
    fn test_parse_common_ticket() {
        let title_key = [0xAB; 0x10];
        let rights_id = [0x11; 0x10];

        let mut bytes = Vec::new();
        write_signature_block(&mut bytes, SigType::Rsa2048Sha256);
        write_ticket_data(&mut bytes, title_key, 0, 0x05, 0, rights_id, 0);

        let ticket = Ticket::from_reader(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(ticket.title_key_type().unwrap(), TitleKeyType::Common);
        assert_eq!(ticket.get_title_key(None).unwrap(), title_key);
        ticket.verify_rights_id(rights_id).unwrap();
    }

    #[test]
    fn test_buggy_dump_master_key_revision_recovered() {
        let title_key = [0xCD; 0x10];
        let mut rights_id = [0x22; 0x10];
        rights_id[15] = 0x07;

        let mut bytes = Vec::new();
        write_signature_block(&mut bytes, SigType::Hmac160Sha1);
        write_ticket_data(&mut bytes, title_key, 0, 0, 0xBEEF, rights_id, 0);

        let ticket = Ticket::from_reader(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(ticket.data.master_key_revision, 0x07);
        assert_eq!(ticket.data.properties_bitfield, 0);
    }

    #[test]
    fn test_invalid_format_version_rejected() {
        let mut bytes = Vec::new();
        write_signature_block(&mut bytes, SigType::Hmac160Sha1);
        write_ticket_data(&mut bytes, [0; 0x10], 0, 0, 0, [0; 0x10], 0);
        // Corrupt format_version byte (first byte right after the signature block).
        let format_version_offset = bytes.len() - 0x180;
        bytes[format_version_offset + 0x140] = 1;

        let err = Ticket::from_reader(std::io::Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidTicketFromatVersion));
    }

    #[test]
    fn test_master_key_revision_too_high_rejected() {
        let mut bytes = Vec::new();
        write_signature_block(&mut bytes, SigType::Hmac160Sha1);
        write_ticket_data(&mut bytes, [0; 0x10], 0, 0x21, 0, [0; 0x10], 0);

        let err = Ticket::from_reader(std::io::Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidTicketKeyRevision));
    }
}
