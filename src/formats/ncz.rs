//! NCZ/NSZ decoder — the zstd-compressed variant of an NCA used by
//! community distribution tools to shrink a title's footprint before
//! sharing it. An NCZ file is a regular NCA's header and filesystem-section
//! table, unmodified, followed by a section table and an optionally
//! block-chunked zstd stream covering the rest of the body.
//!
//! Layout grounded in `original_source/sphaira/include/yati/nx/ncz.hpp` and
//! cross-checked against `exefer-hakkit`'s `ncz.rs`. The two ASCII magics
//! (`"NCZSECTN"`, `"NCZBLOCK"`) are what the original's byte-swapped u64
//! constants decode to in file order.

use std::io::{Read, Seek, SeekFrom};

use binrw::prelude::*;
use cipher::{KeyIvInit, StreamCipher, generic_array::GenericArray};
use ctr::Ctr128BE;

use crate::error::Error;
use crate::formats::nca::EncryptionType;
use crate::io::get_nintendo_tweak;

/// Offset, relative to the start of the `.ncz` file, of the 16-byte
/// `{magic, total_sections}` record used both to detect the format and to
/// begin parsing the section table.
pub const NCZ_HEADER_DETECT_OFFSET: u64 = 0x4C00;

/// Offset at which the `NczSection` array itself begins — immediately
/// after the 16-byte section-header record.
pub const NCZ_SECTION_OFFSET: u64 = NCZ_HEADER_DETECT_OFFSET + 0x10;

#[derive(BinRead, Debug)]
#[brw(little, magic = b"NCZSECTN")]
struct NczSectionHeader {
    total_sections: u64,
}

/// One filesystem section's crypto parameters, carried over unmodified
/// from the source NCA so the installer can re-derive the exact AES-CTR
/// keystream after decompression.
#[derive(BinRead, Debug, Clone, Copy)]
#[brw(little)]
pub struct NczSection {
    pub offset: u64,
    pub size: u64,
    pub crypto_type: u64,
    pub _padding: u64,
    pub key: [u8; 0x10],
    pub counter: [u8; 0x10],
}

impl NczSection {
    /// Whether this section's body needs AES-128-CTR re-encryption after
    /// decompression — anything at or above `AesCtr` in the NCA encryption
    /// type ordering.
    pub fn is_encrypted(&self) -> bool {
        self.crypto_type >= EncryptionType::AesCtr as u64
    }
}

#[derive(BinRead, Debug)]
#[brw(little, magic = b"NCZBLOCK")]
pub struct NczBlockHeader {
    pub version: u8,
    pub block_type: u8,
    pub _padding: u8,
    pub block_size_exponent: u8,
    pub total_blocks: u32,
    pub decompressed_size: u64,
}

impl NczBlockHeader {
    pub fn block_size(&self) -> u64 {
        1u64 << self.block_size_exponent
    }
}

/// Block header plus the per-block compressed-size table that follows it.
#[derive(Debug)]
pub struct NczBlockTable {
    pub header: NczBlockHeader,
    pub compressed_sizes: Vec<u32>,
}

/// Peeks at [`NCZ_HEADER_DETECT_OFFSET`] without disturbing the reader's
/// prior position assumptions (callers should re-seek before further use).
pub fn detect<R: Read + Seek>(reader: &mut R) -> Result<bool, Error> {
    reader.seek(SeekFrom::Start(NCZ_HEADER_DETECT_OFFSET))?;
    let mut magic = [0u8; 8];
    match reader.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"NCZSECTN"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Reads the section-header record and the `NczSection` table that follows
/// it. Leaves the reader positioned right after the last section entry.
pub fn read_sections<R: Read + Seek>(reader: &mut R) -> Result<Vec<NczSection>, Error> {
    reader.seek(SeekFrom::Start(NCZ_HEADER_DETECT_OFFSET))?;
    let header: NczSectionHeader = reader.read_le()?;

    if header.total_sections == 0 || header.total_sections > 4 {
        return Err(Error::InvalidNczSectionCount);
    }

    (0..header.total_sections)
        .map(|_| reader.read_le::<NczSection>().map_err(Error::from))
        .collect()
}

/// Attempts to read a block table at the reader's current position. Returns
/// `Ok(None)` (restoring the original position) when the next 8 bytes are
/// not the block-header magic, meaning this is a plain (single zstd stream)
/// NCZ.
pub fn try_read_block_table<R: Read + Seek>(reader: &mut R) -> Result<Option<NczBlockTable>, Error> {
    let start = reader.stream_position()?;

    let mut magic = [0u8; 8];
    if reader.read_exact(&mut magic).is_err() {
        reader.seek(SeekFrom::Start(start))?;
        return Ok(None);
    }
    if &magic != b"NCZBLOCK" {
        reader.seek(SeekFrom::Start(start))?;
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(start))?;

    let header: NczBlockHeader = reader.read_le()?;
    if header.version != 2 {
        return Err(Error::InvalidNczBlockVersion);
    }
    if header.block_type != 1 {
        return Err(Error::InvalidNczBlockType);
    }
    if header.total_blocks == 0 {
        return Err(Error::InvalidNczBlockTotal);
    }
    if !(14..32).contains(&header.block_size_exponent) {
        return Err(Error::InvalidNczBlockSizeExponent);
    }

    let mut compressed_sizes = Vec::with_capacity(header.total_blocks as usize);
    for _ in 0..header.total_blocks {
        compressed_sizes.push(reader.read_le::<u32>()?);
    }

    Ok(Some(NczBlockTable {
        header,
        compressed_sizes,
    }))
}

/// Decompresses a plain (non-blocked) NCZ body: a single zstd stream
/// spanning the rest of the reader.
pub fn decompress_plain<R: Read>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    zstd::stream::copy_decode(reader, &mut out)
        .map_err(|e| Error::InvalidNczZstdError(e.to_string()))?;
    Ok(out)
}

/// Decompresses a blocked NCZ body: each entry is independently
/// zstd-compressed when its `compressed_size` is smaller than the block
/// size, otherwise the bytes are stored literally.
pub fn decompress_blocked<R: Read>(reader: &mut R, table: &NczBlockTable) -> Result<Vec<u8>, Error> {
    let block_size = table.header.block_size();
    let total = table.compressed_sizes.len() as u64;
    let mut out = Vec::with_capacity(table.header.decompressed_size as usize);

    for (i, &compressed_size) in table.compressed_sizes.iter().enumerate() {
        let is_last = i as u64 == total - 1;
        let remainder = table.header.decompressed_size % block_size;
        let logical_size = if is_last && remainder != 0 {
            remainder
        } else {
            block_size
        };

        let mut chunk = vec![0u8; compressed_size as usize];
        reader.read_exact(&mut chunk)?;

        if (compressed_size as u64) < block_size {
            let mut decoded = Vec::with_capacity(logical_size as usize);
            zstd::stream::copy_decode(&chunk[..], &mut decoded)
                .map_err(|e| Error::InvalidNczZstdError(e.to_string()))?;
            out.extend_from_slice(&decoded);
        } else {
            out.extend_from_slice(&chunk);
        }
    }

    Ok(out)
}

/// AES-128-CTR re-encrypts each byte range covered by an encrypted
/// `NczSection`, in place, over an already-decompressed NCA body.
pub fn reencrypt_sections(body: &mut [u8], sections: &[NczSection]) -> Result<(), Error> {
    for section in sections {
        if !section.is_encrypted() {
            continue;
        }

        let start = section.offset as usize;
        let end = start
            .checked_add(section.size as usize)
            .ok_or(Error::NczSectionNotFound(section.offset))?;
        if end > body.len() {
            return Err(Error::NczSectionNotFound(section.offset));
        }

        let ctr_hi = u64::from_be_bytes(section.counter[..8].try_into().unwrap());
        let iv = get_nintendo_tweak(((start as u128) >> 4) | ((ctr_hi as u128) << 64));

        let mut cipher = Ctr128BE::<aes::Aes128>::new(
            GenericArray::from_slice(&section.key),
            GenericArray::from_slice(&iv),
        );
        cipher.apply_keystream(&mut body[start..end]);
    }
    Ok(())
}

/// Decodes a full NCZ stream: reads the section table, the optional block
/// table, decompresses the body, and applies per-section CTR
/// re-encryption. The returned bytes are the NCA body exactly as it will
/// live on storage.
pub fn decode<R: Read + Seek>(mut reader: R) -> Result<(Vec<NczSection>, Vec<u8>), Error> {
    let sections = read_sections(&mut reader)?;
    let table = try_read_block_table(&mut reader)?;

    let mut body = match &table {
        Some(t) => decompress_blocked(&mut reader, t)?,
        None => decompress_plain(&mut reader)?,
    };

    reencrypt_sections(&mut body, &sections)?;
    Ok((sections, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_section(out: &mut Vec<u8>, section: &NczSectionFixture) {
        out.extend_from_slice(&section.offset.to_le_bytes());
        out.extend_from_slice(&section.size.to_le_bytes());
        out.extend_from_slice(&section.crypto_type.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&section.key);
        out.extend_from_slice(&section.counter);
    }

    struct NczSectionFixture {
        offset: u64,
        size: u64,
        crypto_type: u64,
        key: [u8; 0x10],
        counter: [u8; 0x10],
    }

    #[test]
    fn test_detect_and_read_sections() {
        let mut bytes = vec![0u8; NCZ_HEADER_DETECT_OFFSET as usize];
        bytes.extend_from_slice(b"NCZSECTN");
        bytes.extend_from_slice(&1u64.to_le_bytes());
        write_section(
            &mut bytes,
            &NczSectionFixture {
                offset: 0,
                size: 0x1000,
                crypto_type: EncryptionType::AesCtr as u64,
                key: [0xAA; 0x10],
                counter: [0xBB; 0x10],
            },
        );

        let mut cursor = std::io::Cursor::new(bytes);
        assert!(detect(&mut cursor).unwrap());

        let sections = read_sections(&mut cursor).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].size, 0x1000);
        assert!(sections[0].is_encrypted());
    }

    #[test]
    fn test_reencrypt_sections_round_trip() {
        let mut body = b"0123456789ABCDEF0123456789ABCDEF".to_vec();
        let section = NczSection {
            offset: 0,
            size: body.len() as u64,
            crypto_type: EncryptionType::AesCtr as u64,
            _padding: 0,
            key: [0x11; 0x10],
            counter: [0x22; 0x10],
        };

        let original = body.clone();
        reencrypt_sections(&mut body, std::slice::from_ref(&section)).unwrap();
        assert_ne!(body, original);

        // CTR is its own inverse: applying again recovers the plaintext.
        reencrypt_sections(&mut body, std::slice::from_ref(&section)).unwrap();
        assert_eq!(body, original);
    }

    #[test]
    fn test_decode_plain_zstd_stream() {
        let plaintext = b"a fake decompressed nca body, repeated a bit, repeated a bit".to_vec();
        let compressed = zstd::stream::encode_all(&plaintext[..], 0).unwrap();

        let mut bytes = vec![0u8; NCZ_HEADER_DETECT_OFFSET as usize];
        bytes.extend_from_slice(b"NCZSECTN");
        bytes.extend_from_slice(&1u64.to_le_bytes());
        write_section(
            &mut bytes,
            &NczSectionFixture {
                offset: 0,
                size: plaintext.len() as u64,
                crypto_type: EncryptionType::None as u64,
                key: [0; 0x10],
                counter: [0; 0x10],
            },
        );
        bytes.extend_from_slice(&compressed);

        let (sections, decoded) = decode(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn test_decompress_blocked_literal_blocks() {
        // Two literal blocks (compressed_size == block_size, so stored raw),
        // the second shorter than a full block per `decompressed_size`.
        let block_size_exponent = 4u8; // block size = 0x10
        let block_size = 1u64 << block_size_exponent;
        let first_block = vec![0x41u8; block_size as usize];
        let second_block = vec![0x42u8; 0x8]; // shorter than block_size

        let decompressed_size = block_size + second_block.len() as u64;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"NCZBLOCK");
        bytes.push(2); // version
        bytes.push(1); // type
        bytes.push(0); // padding
        bytes.push(block_size_exponent);
        bytes.extend_from_slice(&2u32.to_le_bytes()); // total_blocks
        bytes.extend_from_slice(&decompressed_size.to_le_bytes());
        bytes.extend_from_slice(&(block_size as u32).to_le_bytes());
        bytes.extend_from_slice(&(second_block.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&first_block);
        bytes.extend_from_slice(&second_block);

        let mut cursor = std::io::Cursor::new(bytes);
        let table = try_read_block_table(&mut cursor).unwrap().unwrap();
        assert_eq!(table.compressed_sizes, vec![block_size as u32, second_block.len() as u32]);

        let decoded = decompress_blocked(&mut cursor, &table).unwrap();
        let mut expected = first_block;
        expected.extend_from_slice(&second_block);
        assert_eq!(decoded, expected);
    }
}
