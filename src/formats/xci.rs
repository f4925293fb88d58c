//! The XCI (eXtendable Card Image) format is a Nintendo Switch game card image format.
//!
//! This format is the raw data from a Nintendo Switch game card, those little bitter
//! SD card-like things that you insert physically on top of the console.
//!
//! The cards themselves physically have a similar footprint to an SD card, but are slightly thicker
//! and less wide. The data inside is stored in an eMMC chip, which is soldered onto the card.
//! They are also coated with Denatonium Benzoate, a bittering agent, to discourage consumption.
//! Just in case you (or your pet, or your little sibling) get any ideas. No, the game cards taste horrible (by design).
//!
//! An XCI image is a 0x100-byte RSA signature, followed by a 0x100-byte
//! plaintext header (magic `"HEAD"`), followed by the root [HFS0](crate::formats::hfs0)
//! partition table. The root partition holds, among others, the `secure`
//! partition — the one that actually contains the title's NCAs.

use std::io::{Read, Seek, SeekFrom};

use binrw::prelude::*;

use super::hfs0::Hfs0;

pub const SIGNATURE_SIZE: usize = 0x100;

#[derive(BinRead, Debug)]
#[brw(little, magic = b"HEAD")]
/// Plaintext portion of the XCI header, starting at offset 0x100.
pub struct XciHeader {
    pub secure_area_start_page: u32,
    pub backup_area_start_page: u32,
    pub kek_index_rom_size: u8,
    pub header_version: u8,
    pub header_flags: u8,
    pub package_id: u64,
    pub valid_data_end_page: u32,
    pub aes_ctr: [u8; 0x10],
    pub hfs0_offset: u64,
    pub hfs0_header_size: u64,
    pub hfs0_header_hash: [u8; 0x20],
    pub crypto_header_hash: [u8; 0x20],
    pub sel_sec: u32,
    pub sel_t1_key: u32,
    pub sel_key: u32,
    pub lim_area: u32,
}

/// Reader for a full XCI game card image.
pub struct Xci<R: Read + Seek> {
    reader: R,
    pub header: XciHeader,
}

impl<R: Read + Seek> Xci<R> {
    pub fn from_reader(mut reader: R) -> Result<Self, crate::error::Error> {
        reader.seek(SeekFrom::Start(SIGNATURE_SIZE as u64))?;
        let header: XciHeader = reader.read_le()?;
        Ok(Self { reader, header })
    }

    /// Opens the root HFS0 partition table, which lists the card's
    /// top-level partitions (`update`, `normal`, `logo`, `secure`).
    pub fn open_root_partition(&mut self) -> Result<Hfs0<&mut R>, crate::error::Error> {
        self.reader.seek(SeekFrom::Start(self.header.hfs0_offset))?;
        Hfs0::new(&mut self.reader)
    }

    /// Opens the `secure` partition directly — the one carrying the
    /// title's NCAs, and the only partition an installer actually needs.
    pub fn open_secure_partition(&mut self) -> Result<Hfs0<SecurePartitionReader<'_, R>>, crate::error::Error> {
        let (start, end) = {
            let mut root = self.open_root_partition()?;
            let file = root
                .files
                .iter()
                .find(|f| f.name == "secure")
                .ok_or_else(|| crate::error::Error::NotFound("secure partition not found in XCI".to_string()))?;
            let data_start = self.header.hfs0_offset
                + 0x10
                + (0x40 * root.header.num_files as u64)
                + root.header.str_table_size as u64;
            (
                data_start + file.entry.data_offset,
                data_start + file.entry.data_offset + file.entry.data_size,
            )
        };

        Hfs0::new(SecurePartitionReader {
            xci_reader: &mut self.reader,
            start,
            end,
            position: 0,
        })
    }
}

/// A bounded view over the `secure` partition's bytes within the XCI's
/// underlying reader, starting a fresh position count at the partition
/// boundary so [`Hfs0`] can parse it the same way it parses a standalone file.
pub struct SecurePartitionReader<'a, R> {
    xci_reader: &'a mut R,
    start: u64,
    end: u64,
    position: u64,
}

impl<R: Read + Seek> Read for SecurePartitionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.position >= self.end - self.start {
            return Ok(0);
        }
        self.xci_reader
            .seek(SeekFrom::Start(self.start + self.position))?;
        let max_read = std::cmp::min(buf.len() as u64, (self.end - self.start) - self.position) as usize;
        let n = self.xci_reader.read(&mut buf[..max_read])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SecurePartitionReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::End(offset) => ((self.end - self.start) as i64 + offset) as u64,
            SeekFrom::Current(offset) => (self.position as i64 + offset) as u64,
        };
        self.position = new_pos;
        Ok(new_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    /// Builds a minimal one-entry HFS0 image, used both for the root
    /// partition table and for the nested `secure` partition's own contents.
    fn build_hfs0(entry_name: &str, entry_content: &[u8]) -> Vec<u8> {
        let mut string_table = Vec::new();
        string_table.extend_from_slice(entry_name.as_bytes());
        string_table.push(0);

        let hash = Sha256::digest(entry_content);

        let mut out = Vec::new();
        out.extend_from_slice(b"HFS0");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(string_table.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(entry_content.len() as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(entry_content.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&hash);
        out.extend_from_slice(&string_table);
        out.extend_from_slice(entry_content);
        out
    }

    fn synthetic_xci() -> Vec<u8> {
        let partition_name = "secure";
        // The secure partition's own contents are themselves an HFS0 image
        // holding a single NCA, mirroring how a real card's secure partition
        // nests a PFS0-like listing of NCAs.
        let partition_content = build_hfs0("test.nca", b"fake-nca-bytes-inside-secure");

        // Root HFS0 with a single "secure" entry.
        let root_hfs0 = build_hfs0(partition_name, &partition_content);

        let hfs0_offset = 0x1000u64;

        let mut out = vec![0u8; SIGNATURE_SIZE];
        out.extend_from_slice(b"HEAD");
        out.extend_from_slice(&0u32.to_le_bytes()); // secure_area_start_page
        out.extend_from_slice(&0u32.to_le_bytes()); // backup_area_start_page
        out.push(0); // kek_index_rom_size
        out.push(0); // header_version
        out.push(0); // header_flags
        out.extend_from_slice(&0u64.to_le_bytes()); // package_id
        out.extend_from_slice(&0u32.to_le_bytes()); // valid_data_end_page
        out.extend_from_slice(&[0u8; 0x10]); // aes_ctr
        out.extend_from_slice(&hfs0_offset.to_le_bytes());
        out.extend_from_slice(&(root_hfs0.len() as u64).to_le_bytes());
        out.extend_from_slice(&[0u8; 0x20]); // hfs0_header_hash
        out.extend_from_slice(&[0u8; 0x20]); // crypto_header_hash
        out.extend_from_slice(&0u32.to_le_bytes()); // sel_sec
        out.extend_from_slice(&0u32.to_le_bytes()); // sel_t1_key
        out.extend_from_slice(&0u32.to_le_bytes()); // sel_key
        out.extend_from_slice(&0u32.to_le_bytes()); // lim_area

        out.resize(hfs0_offset as usize, 0);
        out.extend_from_slice(&root_hfs0);
        out
    }

    #[test]
    fn test_open_secure_partition() {
        let bytes = synthetic_xci();
        let mut xci = Xci::from_reader(std::io::Cursor::new(bytes)).unwrap();

        let mut secure = xci.open_secure_partition().unwrap();
        assert_eq!(secure.file_count(), 1);
        assert_eq!(secure.list_files(), vec!["test.nca".to_string()]);
        assert_eq!(
            secure.read_file_verified("test.nca").unwrap(),
            b"fake-nca-bytes-inside-secure"
        );
    }
}
