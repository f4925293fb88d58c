//! The per-NCA installation pipeline: three cooperating stages (Read,
//! Transform, Write) connected by bounded channels, mirroring the
//! teacher's `io.rs::SharedReader`/`SubFile` style of wrapping shared
//! reader state behind explicit, narrow types rather than a generic
//! buffering abstraction.
//!
//! Grounded on spec.md §4.7 and SPEC_FULL.md's re-architecture note: the
//! original's condvar-guarded ring buffers become `std::thread::scope`
//! worker closures joined by `std::sync::mpsc::sync_channel(4)`, carrying
//! owned page-aligned `Vec<u8>` chunks tagged with their NCA-logical
//! output offset. A `Mutex<Option<Error>>` first-error slot plus an
//! `AtomicBool` cancel flag replace the explicit condvar broadcast the
//! original uses for cross-task cancellation.
//!
//! Scope decision (recorded in DESIGN.md): NCZ decompression is performed
//! in one batched call (`formats::ncz::decode`) by the Read stage rather
//! than incrementally through a 4 MiB inflate-buffer accumulator — the
//! `zstd` crate's streaming decoder already materializes a full frame
//! cheaply, and the 3-stage threading/backpressure structure the spec
//! cares about is preserved regardless of how the Read stage itself
//! produces its chunks.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::Error;
use crate::formats::Keyset;
use crate::formats::nca::{self, DistributionType, NcaHeader};
use crate::formats::ncz;
use crate::source::Source;
use crate::storage::ContentStorage;

/// Read-task chunk size for non-NCZ, already-decompressed bodies, per
/// spec.md §4.7's "default 4 MiB".
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// The policy knobs the Transform stage consults — the per-NCA subset of
/// `yati::Config` (spec.md §6's option table).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    /// spec.md §4.4: bypasses the fixed-key RSA header signature check.
    pub skip_rsa_header_fixed_key_verify: bool,
    /// spec.md §6: bypasses the inner NPDM ACID signature check. No NPDM
    /// parser exists anywhere in this crate yet (none of the source this
    /// was grounded on carries one either), so this flag is currently
    /// inert — recorded for API completeness against spec.md §6's option
    /// table, not yet wired to a check.
    pub skip_rsa_npdm_fixed_key_verify: bool,
    /// spec.md §6 `ignore_distribution_bit`: a GameCard-distributed header
    /// is rewritten to `System` by default; setting this suppresses that
    /// rewrite.
    pub ignore_distribution_bit: bool,
    /// spec.md §4.4: additionally rewrites the key generation down to 0
    /// when converting a rights-id NCA to standard crypto.
    pub lower_master_key: bool,
    /// spec.md §6: disables the final SHA-256-vs-content-id match.
    pub skip_nca_hash_verify: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_rsa_header_fixed_key_verify: false,
            skip_rsa_npdm_fixed_key_verify: false,
            ignore_distribution_bit: false,
            lower_master_key: false,
            skip_nca_hash_verify: false,
        }
    }
}

/// Outcome of installing a single NCA through the pipeline.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub header: NcaHeader,
    /// Total bytes written to the placeholder (`header.content_size`).
    pub size: u64,
    /// SHA-256 over the entire written `[0..size)` region.
    pub sha256: [u8; 32],
    pub header_modified: bool,
}

/// A `Read + Seek` view over a [`Source`] anchored at `base`, so the
/// existing binrw/ncz parsers (all written against `Read + Seek`) can
/// drive directly off a pipeline's byte origin without buffering the
/// whole input. `SeekFrom::End` isn't supported — nothing in the NCA/NCZ
/// parsing path needs it.
pub(crate) struct SourceCursor<'a> {
    source: &'a dyn Source,
    base: u64,
    pos: u64,
}

impl<'a> SourceCursor<'a> {
    pub(crate) fn new(source: &'a dyn Source, base: u64) -> Self {
        Self { source, base, pos: 0 }
    }
}

impl Read for SourceCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .source
            .read(buf, self.base + self.pos)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SourceCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(delta) => (self.pos as i64 + delta) as u64,
            SeekFrom::End(_) => {
                return Err(std::io::Error::other("SourceCursor has no known end"));
            }
        };
        Ok(self.pos)
    }
}

/// A chunk handed from Read to Transform: raw (still possibly encrypted,
/// for the header; already-decompressed for an NCZ body) bytes at a
/// known offset relative to the NCA's logical start.
struct RawChunk {
    data: Vec<u8>,
}

/// A chunk handed from Transform to Write: final bytes plus their
/// placeholder-relative write offset.
struct WriteChunk {
    offset: u64,
    data: Vec<u8>,
}

fn record_error(slot: &Mutex<Option<Error>>, cancel: &AtomicBool, err: Error) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
    cancel.store(true, Ordering::Release);
}

fn read_stage(source: &dyn Source, nca_offset: u64, source_size: u64, tx: SyncSender<RawChunk>, chunk_size: usize, cancel: &AtomicBool) -> Result<(), Error> {
    let mut header_cursor = SourceCursor::new(source, nca_offset);
    let is_ncz = ncz::detect(&mut header_cursor)?;

    let mut header_buf = vec![0u8; 0xC00];
    let mut raw_cursor = SourceCursor::new(source, nca_offset);
    raw_cursor.read_exact(&mut header_buf)?;
    if tx.send(RawChunk { data: header_buf }).is_err() {
        return Ok(());
    }

    if is_ncz {
        let decode_cursor = SourceCursor::new(source, nca_offset);
        let (_sections, body) = ncz::decode(decode_cursor)?;
        for chunk in body.chunks(chunk_size) {
            if cancel.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            if tx.send(RawChunk { data: chunk.to_vec() }).is_err() {
                return Ok(());
            }
        }
    } else {
        let mut offset = 0xC00u64;
        let mut buf = vec![0u8; chunk_size];
        while offset < source_size {
            if cancel.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            let want = chunk_size.min((source_size - offset) as usize);
            let n = source.read(&mut buf[..want], nca_offset + offset)?;
            if n == 0 {
                return Err(Error::InvalidNcaReadSize);
            }
            offset += n as u64;
            if tx.send(RawChunk { data: buf[..n].to_vec() }).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn transform_stage(
    rx: Receiver<RawChunk>,
    tx: SyncSender<WriteChunk>,
    storage: &dyn ContentStorage,
    placeholder_id: [u8; 0x10],
    keyset: &Keyset,
    title_key: Option<[u8; 0x10]>,
    config: &PipelineConfig,
    cancel: &AtomicBool,
) -> Result<PipelineOutcome, Error> {
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut header = None;
    let mut header_modified = false;
    let mut first = true;

    for raw in rx {
        if cancel.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }

        if first {
            first = false;
            let decrypted = nca::decrypt_with_header_key(&raw.data, keyset, 0x200, 0);

            let header_bytes: &[u8; 0x340] = decrypted[..0x340]
                .try_into()
                .map_err(|_| Error::InvalidData("NCA header shorter than 0x340 bytes".to_string()))?;
            let mut parsed = NcaHeader::from_bytes(header_bytes)?;

            if parsed.nca_version.as_char() != '3' {
                return Err(Error::InvalidNcaMagic);
            }

            if !config.skip_rsa_header_fixed_key_verify {
                match keyset.get_nca_header_fixed_key_modulus(parsed.signature_key_generation) {
                    Some(modulus) => {
                        nca::verify_rsa_pkcs1_sha256(&decrypted[0x100..0xC00], &parsed.header_sig.as_bytes(), &modulus)?;
                    }
                    None => warn!(
                        generation = parsed.signature_key_generation,
                        "no fixed-key modulus configured, skipping NCA header signature verification"
                    ),
                }
            }

            if parsed.distribution == DistributionType::GameCard && !config.ignore_distribution_bit {
                parsed.distribution = DistributionType::System;
                header_modified = true;
            }

            if !parsed.rights_id.iter().all(|&b| b == 0) {
                if let Some(title_key) = title_key {
                    parsed.convert_to_standard_crypto(title_key, keyset, config.lower_master_key)?;
                    header_modified = true;
                }
            }

            storage.placeholder_set_size(placeholder_id, parsed.content_size)?;

            let final_header_bytes = if header_modified {
                let mut updated_plain = decrypted.clone();
                let serialized = parsed.to_bytes();
                updated_plain[..serialized.len()].copy_from_slice(&serialized);
                nca::encrypt_with_header_key(&updated_plain, keyset, 0x200, 0)
            } else {
                raw.data
            };

            hasher.update(&final_header_bytes);
            let len = final_header_bytes.len() as u64;
            if tx.send(WriteChunk { offset: 0, data: final_header_bytes }).is_err() {
                return Err(Error::Cancelled);
            }
            written = len;
            header = Some(parsed);
        } else {
            hasher.update(&raw.data);
            let len = raw.data.len() as u64;
            if tx
                .send(WriteChunk {
                    offset: written,
                    data: raw.data,
                })
                .is_err()
            {
                return Err(Error::Cancelled);
            }
            written += len;
        }
    }

    let header = header.ok_or_else(|| Error::InvalidData("NCA source produced no data".to_string()))?;

    Ok(PipelineOutcome {
        header,
        size: written,
        sha256: hasher.finalize().into(),
        header_modified,
    })
}

fn write_stage(rx: Receiver<WriteChunk>, storage: &dyn ContentStorage, placeholder_id: [u8; 0x10], cancel: &AtomicBool) -> Result<(), Error> {
    for chunk in rx {
        if cancel.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        storage.placeholder_write(placeholder_id, chunk.offset, &chunk.data)?;
    }
    storage.placeholder_flush(placeholder_id)
}

/// Installs one NCA, reading `source_size` raw bytes from `source` at
/// `nca_offset`, through the Read/Transform/Write pipeline, into
/// `placeholder_id` on `storage`. `title_key` must be supplied (already
/// decrypted from the matching ticket) when the NCA carries a rights id;
/// otherwise the NCA is written through unmodified. `expected_content_id`,
/// when given, is checked against the low 16 bytes of the final SHA-256.
#[allow(clippy::too_many_arguments)]
pub fn install_nca(
    source: &dyn Source,
    nca_offset: u64,
    source_size: u64,
    storage: &dyn ContentStorage,
    placeholder_id: [u8; 0x10],
    keyset: &Keyset,
    title_key: Option<[u8; 0x10]>,
    expected_content_id: Option<[u8; 0x10]>,
    config: &PipelineConfig,
) -> Result<PipelineOutcome, Error> {
    storage.placeholder_create(placeholder_id, source_size)?;

    let error_slot: Mutex<Option<Error>> = Mutex::new(None);
    let cancel = AtomicBool::new(false);

    let (raw_tx, raw_rx) = sync_channel::<RawChunk>(4);
    let (write_tx, write_rx) = sync_channel::<WriteChunk>(4);

    let outcome = thread::scope(|scope| {
        scope.spawn(move || {
            if let Err(e) = read_stage(source, nca_offset, source_size, raw_tx, config.chunk_size, &cancel) {
                record_error(&error_slot, &cancel, e);
            }
        });

        let transform_handle = scope.spawn(move || transform_stage(raw_rx, write_tx, storage, placeholder_id, keyset, title_key, config, &cancel));

        let write_handle = scope.spawn(move || write_stage(write_rx, storage, placeholder_id, &cancel));

        let transform_result = transform_handle.join().unwrap();
        let write_result = write_handle.join().unwrap();

        match (transform_result, write_result) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    });

    if let Some(err) = error_slot.into_inner().unwrap() {
        return Err(err);
    }

    let outcome = outcome?;

    if !config.skip_nca_hash_verify {
        if let Some(expected) = expected_content_id {
            if outcome.sha256[..0x10] != expected {
                return Err(Error::InvalidNcaSha256);
            }
        }
    }

    Ok(outcome)
}
