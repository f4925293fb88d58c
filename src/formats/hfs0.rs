//! The Nintendo Hashed filesystem (HFS0) is a filesystem used by the Nintendo Switch to store data in a hashed format.
//! This filesystem is used in the Nintendo Switch's game cards (the little bitter carts that you insert physically into the console).
//!
//! This module doesn't allow you to eat the game itself, but lets you dump data
//! from the game card.
//!
//! You still require the XCI module to read the game card image format, which in turn contains this filesystem.
//! For the game card image format, see [xci](crate::formats::xci).

use std::io::{Read, Seek, SeekFrom};

use binrw::prelude::*;
use sha2::{Digest, Sha256};

use crate::io::SubFile;

#[derive(BinRead, Debug)]
#[brw(little, magic = b"HFS0")]
/// HFS0 header. Structurally a PFS0 header plus a SHA-256 hash per entry,
/// so the game card's secure partition can be verified chunk-by-chunk as
/// it streams off an actual cartridge.
///
/// # Format layout
/// - 0x00: Magic "HFS0" (4 bytes)
/// - 0x04: Number of files (4 bytes)
/// - 0x08: String table size (4 bytes)
/// - 0x0C: Reserved (4 bytes)
pub struct Hfs0Header {
    pub num_files: u32,
    pub str_table_size: u32,
    pub reserved: [u8; 4],
}

impl Hfs0Header {
    pub const MAGIC: [u8; 4] = *b"HFS0";
}

#[derive(BinRead, Debug, Clone)]
#[brw(little)]
/// A single HFS0 entry, 0x40 bytes.
///
/// # Format layout
/// - 0x00: Data offset (8 bytes)
/// - 0x08: Data size (8 bytes)
/// - 0x10: String table offset (4 bytes)
/// - 0x14: Hashed region size (4 bytes) — only this many leading bytes of
///   the entry's data are covered by `hash`
/// - 0x18: Reserved (8 bytes)
/// - 0x20: SHA-256 hash of the first `hashed_size` bytes (32 bytes)
pub struct Hfs0Entry {
    pub data_offset: u64,
    pub data_size: u64,
    pub string_table_offset: u32,
    pub hashed_size: u32,
    pub _reserved: u64,
    pub hash: [u8; 0x20],
}

impl Hfs0Entry {
    pub fn get_name(&self, string_table: &[u8]) -> Result<String, std::str::Utf8Error> {
        let name_start = self.string_table_offset as usize;
        let name_end = string_table[name_start..]
            .iter()
            .position(|&x| x == 0)
            .map(|p| name_start + p)
            .unwrap_or(string_table.len());

        let name = std::str::from_utf8(&string_table[name_start..name_end])?.to_string();
        Ok(name)
    }
}

#[derive(Debug, Clone)]
pub struct Hfs0File {
    pub name: String,
    pub entry: Hfs0Entry,
}

/// Parser for Nintendo Switch HFS0 partitions, as found inside XCI images
/// (the root partition and, nested inside it, the `update`/`normal`/
/// `secure`/`logo` partitions).
pub struct Hfs0<R: Read + Seek> {
    pub reader: R,
    pub header: Hfs0Header,
    pub files: Vec<Hfs0File>,
    /// Absolute offset (relative to the start of `reader`) where file data begins.
    data_start: u64,
}

impl<R: Read + Seek> Hfs0<R> {
    pub fn new(mut reader: R) -> Result<Self, crate::error::Error> {
        let header: Hfs0Header = reader.read_le()?;

        let entries: Vec<Hfs0Entry> = (0..header.num_files)
            .map(|_| reader.read_le::<Hfs0Entry>())
            .collect::<BinResult<Vec<_>>>()?;

        let mut string_table = vec![0u8; header.str_table_size as usize];
        reader.read_exact(&mut string_table)?;

        let data_start = 0x10 + (0x40 * header.num_files as u64) + header.str_table_size as u64;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.get_name(&string_table)?;
            files.push(Hfs0File { name, entry });
        }

        Ok(Self {
            reader,
            header,
            files,
            data_start,
        })
    }

    pub fn list_files(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Every file's name, size, and absolute offset within this partition's
    /// own reader coordinate, mirroring [`Pfs0::entries_with_offsets`] —
    /// exposed for the container scanner, which needs raw offsets rather
    /// than verified file contents.
    pub fn entries_with_offsets(&self) -> Vec<(String, u64, u64)> {
        self.files
            .iter()
            .map(|f| (f.name.clone(), self.data_start + f.entry.data_offset, f.entry.data_size))
            .collect()
    }

    fn find(&self, name: &str) -> Result<&Hfs0File, crate::error::Error> {
        self.files
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| crate::error::Error::NotFound(format!("File not found: {name}")))
    }

    /// Returns a bounded sub-reader over the named partition/file, without
    /// reading its contents into memory.
    pub fn open(&mut self, name: &str) -> Result<SubFile<&mut R>, crate::error::Error>
    where
        R: Sized,
    {
        let file = self.find(name)?;
        let start = self.data_start + file.entry.data_offset;
        let end = start + file.entry.data_size;
        Ok(SubFile::new(&mut self.reader, start, end))
    }

    /// Reads a whole file/partition into memory and verifies the leading
    /// `hashed_size` bytes against the entry's SHA-256 hash.
    pub fn read_file_verified(&mut self, name: &str) -> Result<Vec<u8>, crate::error::Error> {
        let file = self.find(name)?.clone();
        let start = self.data_start + file.entry.data_offset;

        self.reader.seek(SeekFrom::Start(start))?;
        let mut data = vec![0u8; file.entry.data_size as usize];
        self.reader.read_exact(&mut data)?;

        let hashed_len = (file.entry.hashed_size as usize).min(data.len());
        let digest = Sha256::digest(&data[..hashed_len]);
        if digest.as_slice() != file.entry.hash.as_slice() {
            return Err(crate::error::Error::InvalidData(format!(
                "HFS0 entry '{}' failed hash verification",
                file.name
            )));
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_hfs0() -> Vec<u8> {
        let name = "secure";
        let content = b"pretend-secure-partition-bytes".to_vec();

        let hash = Sha256::digest(&content);

        let mut string_table = Vec::new();
        string_table.extend_from_slice(name.as_bytes());
        string_table.push(0);

        let mut out = Vec::new();
        out.extend_from_slice(b"HFS0");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(string_table.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);

        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(content.len() as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(content.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&hash);

        out.extend_from_slice(&string_table);
        out.extend_from_slice(&content);
        out
    }

    #[test]
    fn test_hfs0_reader_and_hash_verify() {
        let bytes = synthetic_hfs0();
        let mut hfs0 = Hfs0::new(std::io::Cursor::new(bytes)).unwrap();

        assert_eq!(hfs0.file_count(), 1);
        assert_eq!(hfs0.list_files(), vec!["secure".to_string()]);

        let data = hfs0.read_file_verified("secure").unwrap();
        assert_eq!(data, b"pretend-secure-partition-bytes");
    }

    #[test]
    fn test_hfs0_hash_mismatch_rejected() {
        let mut bytes = synthetic_hfs0();
        // Flip a byte inside the partition payload without touching its hash.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut hfs0 = Hfs0::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(hfs0.read_file_verified("secure").is_err());
    }
}
