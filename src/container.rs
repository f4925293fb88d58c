//! Container parser: turns a raw NSP (PFS0) or XCI (HFS0 card image) into
//! a flat listing of top-level content entries with offsets absolute
//! within the originating [`Source`], generalizing the teacher's
//! `Pfs0`/`Hfs0`/`Xci` parsers the way SPEC_FULL.md §4.2's shared
//! `PartitionTable` concept describes.
//!
//! Grounded on `formats::pfs0::Pfs0`, `formats::hfs0::Hfs0`, and
//! `formats::xci::Xci`: this module never reimplements their binrw parsing,
//! it only drives them off a [`pipeline::SourceCursor`] and flattens their
//! entry lists into [`crate::install::CollectionEntry`].

use crate::error::Error;
use crate::formats::hfs0::Hfs0Entry;
use crate::formats::keys::TitleKeys;
use crate::formats::keyset::EticketDeviceKey;
use crate::formats::pfs0::Pfs0;
use crate::formats::xci::Xci;
use crate::formats::Keyset;
use crate::install::{self, CollectionEntry, InstallConfig, InstalledApplication};
use crate::pipeline::SourceCursor;
use crate::source::Source;
use crate::storage::{ContentMetaDb, ContentStorage, RecordService, TicketService};

/// The entries scanned out of one container, plus the name of the source
/// they came from (e.g. an NSP/XCI file name), mirroring SPEC_FULL.md
/// §4.2's `Collections` type.
#[derive(Debug)]
pub struct Collections {
    pub source_name: String,
    pub entries: Vec<CollectionEntry>,
}

/// Detects whether `source` holds a PFS0 (NSP) or an XCI (HFS0 card image)
/// and scans its top-level content listing into [`CollectionEntry`]s with
/// offsets absolute within `source`. XCI images are walked straight to the
/// `secure` partition — the root, `update`, `normal`, and `logo` partitions
/// carry nothing the installer needs.
///
/// Returns [`Error::ContainerNotFound`] if neither magic matches.
pub fn scan_container(source: &dyn Source, source_name: impl Into<String>) -> Result<Collections, Error> {
    let source_name = source_name.into();

    let mut magic = [0u8; 4];
    read_exact_at(source, &mut magic, 0)?;

    let entries = if &magic == b"PFS0" {
        scan_pfs0(source)?
    } else {
        let mut head_magic = [0u8; 4];
        read_exact_at(source, &mut head_magic, 0x100)?;
        if &head_magic == b"HEAD" {
            scan_xci_secure(source)?
        } else {
            return Err(Error::ContainerNotFound);
        }
    };

    Ok(Collections { source_name, entries })
}

fn read_exact_at(source: &dyn Source, dst: &mut [u8], offset: u64) -> Result<(), Error> {
    let mut filled = 0;
    while filled < dst.len() {
        let n = source.read(&mut dst[filled..], offset + filled as u64)?;
        if n == 0 {
            return Err(Error::ContainerNotFound);
        }
        filled += n;
    }
    Ok(())
}

fn scan_pfs0(source: &dyn Source) -> Result<Vec<CollectionEntry>, Error> {
    let cursor = SourceCursor::new(source, 0);
    let pfs0 = Pfs0::new(cursor)?;

    Ok(pfs0
        .entries_with_offsets()
        .into_iter()
        .map(|(name, offset, size)| CollectionEntry { name, offset, size })
        .collect())
}

fn scan_xci_secure(source: &dyn Source) -> Result<Vec<CollectionEntry>, Error> {
    let cursor = SourceCursor::new(source, 0);
    let mut xci = Xci::from_reader(cursor)?;
    let hfs0_offset = xci.header.hfs0_offset;

    let secure_base = {
        let root = xci.open_root_partition()?;
        let secure_entry: &Hfs0Entry = &root
            .files
            .iter()
            .find(|f| f.name == "secure")
            .ok_or(Error::ContainerNotFound)?
            .entry;
        let secure_data_start = hfs0_offset + 0x10 + (0x40 * root.header.num_files as u64) + root.header.str_table_size as u64;
        secure_data_start + secure_entry.data_offset
    };

    let secure = xci.open_secure_partition()?;

    Ok(secure
        .entries_with_offsets()
        .into_iter()
        .map(|(name, offset, size)| CollectionEntry {
            name,
            offset: secure_base + offset,
            size,
        })
        .collect())
}

/// Scans `source` as a container and installs everything it holds in one
/// call: [`scan_container`] → [`install::classify_entries`] →
/// [`install::load_tickets`] → [`install::install_container`]. This is the
/// top-level entry point SPEC_FULL.md §4.2's container parser feeds into
/// §4.8's install orchestration.
#[allow(clippy::too_many_arguments)]
pub fn install_source(
    source: &dyn Source,
    source_name: impl Into<String>,
    keyset: &Keyset,
    title_keys: Option<&TitleKeys>,
    device_key: Option<&EticketDeviceKey>,
    storage: &dyn ContentStorage,
    meta_db: &dyn ContentMetaDb,
    other_storage_db: (&dyn ContentStorage, &dyn ContentMetaDb),
    ticket_service: &dyn TicketService,
    record_service: &dyn RecordService,
    config: &InstallConfig,
) -> Result<Vec<InstalledApplication>, Error> {
    let collections = scan_container(source, source_name)?;
    let (metas, content_pool, ticket_pairs) = install::classify_entries(&collections.entries);
    let tickets = install::load_tickets(source, &ticket_pairs)?;

    install::install_container(
        source,
        &metas,
        &content_pool,
        &tickets,
        keyset,
        title_keys,
        device_key,
        storage,
        meta_db,
        other_storage_db,
        ticket_service,
        record_service,
        config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct MemorySource(StdMutex<Vec<u8>>);

    impl Source for MemorySource {
        fn read(&self, dst: &mut [u8], offset: u64) -> Result<usize, Error> {
            let data = self.0.lock().unwrap();
            let start = offset as usize;
            if start >= data.len() {
                return Ok(0);
            }
            let n = dst.len().min(data.len() - start);
            dst[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }

        fn signal_cancel(&self) {}
    }

    fn synthetic_pfs0(names: &[&str], contents: &[&[u8]]) -> Vec<u8> {
        let mut string_table = Vec::new();
        let mut str_offsets = Vec::new();
        for name in names {
            str_offsets.push(string_table.len() as u32);
            string_table.extend_from_slice(name.as_bytes());
            string_table.push(0);
        }

        let mut data_offsets = Vec::new();
        let mut data = Vec::new();
        for c in contents {
            data_offsets.push(data.len() as u64);
            data.extend_from_slice(c);
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"PFS0");
        out.extend_from_slice(&(names.len() as u32).to_le_bytes());
        out.extend_from_slice(&(string_table.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);

        for i in 0..names.len() {
            out.extend_from_slice(&data_offsets[i].to_le_bytes());
            out.extend_from_slice(&(contents[i].len() as u64).to_le_bytes());
            out.extend_from_slice(&str_offsets[i].to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
        }

        out.extend_from_slice(&string_table);
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn test_scan_container_detects_pfs0() {
        let bytes = synthetic_pfs0(&["a.cnmt.nca", "b.nca"], &[b"header-bytes", b"body-bytes-here"]);
        let source = MemorySource(StdMutex::new(bytes));

        let collections = scan_container(&source, "test.nsp").unwrap();
        assert_eq!(collections.source_name, "test.nsp");
        assert_eq!(collections.entries.len(), 2);
        assert_eq!(collections.entries[0].name, "a.cnmt.nca");
        assert_eq!(collections.entries[0].size, "header-bytes".len() as u64);
        assert_eq!(collections.entries[1].name, "b.nca");
        assert_eq!(collections.entries[1].size, "body-bytes-here".len() as u64);

        // Offsets must land exactly on the bytes they claim to describe.
        for entry in &collections.entries {
            let mut buf = vec![0u8; entry.size as usize];
            source.read(&mut buf, entry.offset).unwrap();
            let expected: &[u8] = if entry.name == "a.cnmt.nca" { b"header-bytes" } else { b"body-bytes-here" };
            assert_eq!(buf, expected);
        }
    }

    fn build_hfs0(entry_name: &str, entry_content: &[u8]) -> Vec<u8> {
        use sha2::{Digest, Sha256};

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

    fn synthetic_xci(nca_content: &[u8]) -> Vec<u8> {
        let secure_content = build_hfs0("game.nca", nca_content);
        let root_hfs0 = build_hfs0("secure", &secure_content);

        let hfs0_offset = 0x1000u64;

        let mut out = vec![0u8; crate::formats::xci::SIGNATURE_SIZE];
        out.extend_from_slice(b"HEAD");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(0);
        out.push(0);
        out.push(0);
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 0x10]);
        out.extend_from_slice(&hfs0_offset.to_le_bytes());
        out.extend_from_slice(&(root_hfs0.len() as u64).to_le_bytes());
        out.extend_from_slice(&[0u8; 0x20]);
        out.extend_from_slice(&[0u8; 0x20]);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        out.resize(hfs0_offset as usize, 0);
        out.extend_from_slice(&root_hfs0);
        out
    }

    #[test]
    fn test_scan_container_detects_xci_secure_partition() {
        let nca_bytes = b"pretend-full-nca-bytes-inside-secure-partition".to_vec();
        let image = synthetic_xci(&nca_bytes);
        let source = MemorySource(StdMutex::new(image));

        let collections = scan_container(&source, "test.xci").unwrap();
        assert_eq!(collections.entries.len(), 1);
        assert_eq!(collections.entries[0].name, "game.nca");
        assert_eq!(collections.entries[0].size, nca_bytes.len() as u64);

        let mut buf = vec![0u8; nca_bytes.len()];
        source.read(&mut buf, collections.entries[0].offset).unwrap();
        assert_eq!(buf, nca_bytes);
    }

    #[test]
    fn test_scan_container_feeds_classify_entries() {
        let meta_id = "00".repeat(15) + "aa";
        let content_id = "00".repeat(15) + "bb";
        let bytes = synthetic_pfs0(
            &[&format!("{meta_id}.cnmt.nca"), &format!("{content_id}.nca")],
            &[b"meta-nca-bytes", b"content-nca-bytes"],
        );
        let source = MemorySource(StdMutex::new(bytes));

        let collections = scan_container(&source, "test.nsp").unwrap();
        let (metas, content_pool, tickets) = crate::install::classify_entries(&collections.entries);

        assert_eq!(metas.len(), 1);
        assert_eq!(content_pool.len(), 1);
        assert!(tickets.is_empty());
        assert!(metas[0].name.ends_with(".cnmt.nca"));
    }

    #[test]
    fn test_scan_container_rejects_unknown_magic() {
        let source = MemorySource(StdMutex::new(vec![0xFFu8; 0x200]));
        let result = scan_container(&source, "junk.bin");
        assert!(matches!(result, Err(Error::ContainerNotFound)));
    }
}
