//! Yati install orchestration: turns a classified set of NCA/ticket
//! collections inside one container [`Source`] into committed
//! content-meta-db entries, content storage registrations and application
//! records. Grounded on spec.md §3 (data model), §4.8 (orchestration) and
//! §4.9 (storage abstractions); the per-NCA heavy lifting is delegated to
//! [`crate::pipeline::install_nca`].

use std::collections::HashMap;
use std::io::BufReader;

use tracing::{info, warn};

use crate::error::Error;
use crate::formats::cnmt::{Cnmt, ContentMetaType, PackagedContentType};
use crate::formats::keys::TitleKeys;
use crate::formats::nacp::ControlNacp;
use crate::formats::nca::Nca;
use crate::formats::keyset::EticketDeviceKey;
use crate::formats::ticket::{Ticket, TitleKeyType, patch_to_common};
use crate::formats::Keyset;
use crate::pipeline::{self, PipelineConfig};
use crate::source::Source;
use crate::storage::{ApplicationRecord, ContentMetaDb, ContentStorage, InstallType, MetaKey, RecordService, StorageId, TicketService};

/// One named byte range inside the container [`Source`], per spec.md §3's
/// `CollectionEntry`.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// A classified NCA entry awaiting installation.
#[derive(Debug, Clone)]
pub struct NcaCollection {
    pub entry: CollectionEntry,
    pub content_type: PackagedContentType,
    pub content_id: [u8; 0x10],
    pub placeholder_id: [u8; 0x10],
    pub sha256: [u8; 0x20],
    pub modified_flag: bool,
}

/// A meta-NCA collection, filled in once its inner `.cnmt` has been read
/// back out of the just-installed placeholder.
#[derive(Debug, Clone)]
pub struct CnmtCollection {
    pub nca: NcaCollection,
    pub cnmt: Cnmt,
    pub ncas: Vec<NcaCollection>,
}

/// A `<hex>.tik`/`<hex>.cert` pair, per spec.md §3's `TicketCollection`.
#[derive(Debug, Clone)]
pub struct TicketCollection {
    pub rights_id: [u8; 0x10],
    pub ticket: Vec<u8>,
    pub cert: Vec<u8>,
    pub required: bool,
}

/// Policy knobs for [`install_container`], the install-level subset of
/// spec.md §6's option table.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub storage_id: StorageId,
    pub skip_if_already_installed: bool,
    pub allow_downgrade: bool,
    pub skip_base: bool,
    pub skip_patch: bool,
    pub skip_addon: bool,
    /// spec.md §6: skip `DataPatch` metas by type.
    pub skip_data_patch: bool,
    /// spec.md §6: install only tickets, skipping every NCA body.
    pub ticket_only: bool,
    /// spec.md §6: ticket absence/import is non-fatal and title keys are
    /// never imported into the ticket service — title-key extraction
    /// (e.g. for `convert_to_standard_crypto`) still happens.
    pub skip_ticket: bool,
    /// spec.md §6: rewrap a Personalized ticket to Common before import
    /// rather than importing it as-is.
    pub convert_to_common_ticket: bool,
    /// spec.md §6 / §8 Scenario 4: embed the title key directly into the
    /// NCA's key area and zero `rights_id`, instead of importing a ticket.
    pub convert_to_standard_crypto: bool,
    /// spec.md §6: zero `required_system_version` in the extended header
    /// before it's written to the content-meta-db.
    pub lower_system_version: bool,
    pub os_version: (u8, u8, u8),
    pub pipeline: PipelineConfig,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            storage_id: StorageId::SdCard,
            skip_if_already_installed: false,
            allow_downgrade: false,
            skip_base: false,
            skip_patch: false,
            skip_addon: false,
            skip_data_patch: false,
            ticket_only: false,
            skip_ticket: false,
            convert_to_common_ticket: false,
            convert_to_standard_crypto: false,
            lower_system_version: false,
            os_version: (0, 0, 0),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// One fully-installed title's summary, returned to the caller for UI
/// display.
#[derive(Debug, Clone)]
pub struct InstalledApplication {
    pub app_id: u64,
    pub meta_key: MetaKey,
    pub display_name: Option<String>,
}

/// `GetAppId`: resolves the owning application id for a meta key's own
/// `(meta_type, title_id)`, per spec.md §4.8 step 4. Patches and add-ons
/// reference their base application by arithmetic on the title id itself
/// (independent of a parsed extended header, which some call sites won't
/// have parsed yet); everything else is its own id.
pub fn compute_app_id(meta_type: ContentMetaType, title_id: u64) -> u64 {
    match meta_type {
        ContentMetaType::Patch => title_id ^ 0x800,
        ContentMetaType::AddOnContent => (title_id ^ 0x1000) & !0xFFF,
        _ => title_id,
    }
}

/// Install-time priority ranking for a meta's content children, highest
/// first. spec.md's prose example ("Meta > Program > Control > Data > ...")
/// does not match `PackagedContentType`'s own wire discriminants (`Meta=0,
/// Program=1, Data=2, Control=3, ...`), so this is its own explicit mapping
/// rather than a raw numeric sort — recorded as an Open Question resolution
/// in DESIGN.md. `DeltaFragment` is unreachable here since callers filter
/// it out before sorting.
fn content_priority(content_type: PackagedContentType) -> u8 {
    match content_type {
        PackagedContentType::Meta => 0,
        PackagedContentType::Program => 1,
        PackagedContentType::Control => 2,
        PackagedContentType::HtmlDocument => 3,
        PackagedContentType::LegalInformation => 4,
        PackagedContentType::Data => 5,
        PackagedContentType::DeltaFragment => 6,
    }
}

/// Sorts content infos by install priority, highest first, the order in
/// which spec.md §4.8 step 2 says children should be installed.
fn sort_by_priority(infos: &mut [crate::formats::cnmt::PackagedContentInfo]) {
    infos.sort_by_key(|info| content_priority(info.content_type));
}

/// Parses the leading 32 lowercase hex characters of a filename stem into a
/// content/rights id, the naming convention every NSP/XCI packer uses for
/// `<hex>.nca`/`<hex>.cnmt.nca`/`<hex>.tik`/`<hex>.cert`.
fn parse_hex_id(stem: &str) -> Option<[u8; 0x10]> {
    if stem.len() < 32 {
        return None;
    }
    let bytes = hex::decode(&stem[..32]).ok()?;
    bytes.try_into().ok()
}

fn file_stem_and_suffix(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((stem, suffix)) => (stem, suffix),
        None => (name, ""),
    }
}

/// Splits a container's flat entry list into meta-NCAs, the content pool
/// they reference by content id, and ticket/cert pairs — spec.md §4.8 step
/// 1. Unrecognised entries (e.g. a stray `.xml`) are silently skipped, the
/// way any packer's own extra files are.
pub fn classify_entries(entries: &[CollectionEntry]) -> (Vec<CollectionEntry>, Vec<CollectionEntry>, Vec<TicketEntryPair>) {
    let mut metas = Vec::new();
    let mut content_pool = Vec::new();
    let mut tik_entries: HashMap<[u8; 0x10], CollectionEntry> = HashMap::new();
    let mut cert_entries: HashMap<[u8; 0x10], CollectionEntry> = HashMap::new();

    for entry in entries {
        let (stem, suffix) = file_stem_and_suffix(&entry.name);
        match suffix {
            "cnmt.nca" => metas.push(entry.clone()),
            "nca" => content_pool.push(entry.clone()),
            "tik" => {
                if let Some(id) = parse_hex_id(stem) {
                    tik_entries.insert(id, entry.clone());
                }
            }
            "cert" => {
                if let Some(id) = parse_hex_id(stem) {
                    cert_entries.insert(id, entry.clone());
                }
            }
            _ => {}
        }
    }

    let ticket_pairs = tik_entries
        .into_iter()
        .map(|(rights_id, tik)| {
            let cert = cert_entries.get(&rights_id).cloned();
            TicketEntryPair { rights_id, tik, cert }
        })
        .collect();

    (metas, content_pool, ticket_pairs)
}

/// A `<hex>.tik` entry paired with its `<hex>.cert` sibling, if the
/// container shipped one — pairing by filename stem, before either file's
/// bytes have been read off the container [`Source`].
#[derive(Debug, Clone)]
pub struct TicketEntryPair {
    pub rights_id: [u8; 0x10],
    pub tik: CollectionEntry,
    pub cert: Option<CollectionEntry>,
}

/// Reads every ticket/cert entry pair's bytes off `source`, producing the
/// fully-populated [`TicketCollection`]s [`install_meta`]/[`install_container`]
/// consume.
pub fn load_tickets(source: &dyn Source, pairs: &[TicketEntryPair]) -> Result<Vec<(TicketCollection, CollectionEntry, Option<CollectionEntry>)>, Error> {
    pairs
        .iter()
        .map(|pair| {
            let ticket_bytes = read_entry(source, &pair.tik)?;
            let cert_bytes = match &pair.cert {
                Some(cert) => read_entry(source, cert)?,
                None => Vec::new(),
            };
            Ok((
                TicketCollection {
                    rights_id: pair.rights_id,
                    ticket: ticket_bytes,
                    cert: cert_bytes,
                    required: true,
                },
                pair.tik.clone(),
                pair.cert.clone(),
            ))
        })
        .collect()
}

fn read_entry(source: &dyn Source, entry: &CollectionEntry) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; entry.size as usize];
    let mut read = 0usize;
    while read < buf.len() {
        let n = source.read(&mut buf[read..], entry.offset + read as u64)?;
        if n == 0 {
            return Err(Error::InvalidNcaReadSize);
        }
        read += n;
    }
    Ok(buf)
}

/// Finds the single file in an opened PFS0 whose name ends with `suffix`.
/// `pfs0::Pfs0` has no such lookup of its own (only exact-name `read_file`),
/// so this is install's own glue.
fn find_by_suffix<R: std::io::Read + std::io::Seek>(pfs0: &crate::formats::pfs0::Pfs0<R>, suffix: &str) -> Option<String> {
    pfs0.files.iter().map(|f| f.name.clone()).find(|name| name.ends_with(suffix))
}

/// Opens an already-installed placeholder's underlying storage as a
/// `Read + Seek` NCA reader, for reading the meta-NCA's own `.cnmt` or a
/// Control NCA's `control.nacp` back out post-install.
fn open_installed_nca(storage: &dyn ContentStorage, placeholder_id: [u8; 0x10], keyset: &Keyset, title_keys: Option<&TitleKeys>) -> Result<Nca<BufReader<std::fs::File>>, Error> {
    let path = storage.placeholder_path(placeholder_id)?;
    let file = std::fs::File::open(path)?;
    Nca::from_reader(BufReader::new(file), keyset, title_keys)
}

/// Decides whether an incoming meta should be skipped, per spec.md §4.8 step
/// 5: system meta types (high bit of `meta_type` clear) are always
/// rejected; the per-type policy flags (`skip_base`/`skip_patch`/
/// `skip_addon`/`skip_data_patch`) skip unconditionally, independent of any
/// existing record; patches only install over a strictly newer version
/// unless downgrades are allowed; and `skip_if_already_installed` skips a
/// meta already present at an equal-or-higher version.
fn should_skip(meta_type: ContentMetaType, existing_version: Option<u32>, new_version: u32, config: &InstallConfig) -> bool {
    if (meta_type as u8) & 0x80 == 0 {
        return true;
    }

    let type_skip_flag = match meta_type {
        ContentMetaType::Application => config.skip_base,
        ContentMetaType::Patch => config.skip_patch,
        ContentMetaType::AddOnContent => config.skip_addon,
        ContentMetaType::DataPatch => config.skip_data_patch,
        _ => false,
    };
    if type_skip_flag {
        return true;
    }

    let Some(existing_version) = existing_version else {
        return false;
    };

    if meta_type == ContentMetaType::Patch && !config.allow_downgrade && new_version <= existing_version {
        return true;
    }

    config.skip_if_already_installed && new_version <= existing_version
}

/// The `(type, app_id, id_range)` lookup spec.md §4.8 step 7 uses to find
/// every content-meta-db entry a newly-installed meta supersedes. A patch
/// supersedes any previously-installed patch for the same application
/// (full id range); every other type only supersedes an exact id match.
fn superseded_id_range(meta_type: ContentMetaType, id: u64) -> (u64, u64) {
    match meta_type {
        ContentMetaType::Patch => (0, u64::MAX),
        _ => (id, id),
    }
}

/// Removes every content-meta-db entry superseded by a freshly-installed
/// meta, deleting their content first, across both storages so a db
/// entry pointing at the other storage's NCA isn't left dangling.
fn remove_superseded(
    meta_type: ContentMetaType,
    id: u64,
    system_db: &dyn ContentMetaDb,
    system_storage: &dyn ContentStorage,
    sd_db: &dyn ContentMetaDb,
    sd_storage: &dyn ContentStorage,
) -> Result<(), Error> {
    let (lo, hi) = superseded_id_range(meta_type, id);

    for (db, storage) in [(system_db, system_storage), (sd_db, sd_storage)] {
        for key in db.list(Some(meta_type), (lo, hi), InstallType::Full)? {
            for info in db.list_content_info(key)? {
                storage.content_delete(info.content_id).ok();
            }
            db.remove(key)?;
        }
        db.commit()?;
    }

    Ok(())
}

/// Installs one meta-NCA and every content it references: runs the
/// pipeline on the meta-NCA itself, reads its inner `.cnmt` back out,
/// matches and installs each non-delta content entry in priority order,
/// then writes the resulting content-meta-db entry and application
/// record. Corresponds to spec.md §4.8 steps 2-10 for a single title.
#[allow(clippy::too_many_arguments)]
pub fn install_meta(
    source: &dyn Source,
    meta_entry: &CollectionEntry,
    content_pool: &[CollectionEntry],
    tickets: &[(TicketCollection, CollectionEntry, Option<CollectionEntry>)],
    keyset: &Keyset,
    title_keys: Option<&TitleKeys>,
    device_key: Option<&EticketDeviceKey>,
    storage: &dyn ContentStorage,
    meta_db: &dyn ContentMetaDb,
    ticket_service: &dyn TicketService,
    config: &InstallConfig,
) -> Result<CnmtCollection, Error> {
    let meta_content_id = parse_hex_id(file_stem_and_suffix(&meta_entry.name).0).ok_or_else(|| Error::InvalidData(format!("not a valid content id: {}", meta_entry.name)))?;

    // spec.md §8 Scenario 4: when converting to standard crypto, resolve the
    // title key once up front from whichever ticket is on hand, so it can be
    // embedded into every rights-id content NCA instead of importing a ticket.
    let resolved_title_key = if config.convert_to_standard_crypto {
        match tickets.first() {
            Some((collection, ..)) => {
                let ticket = Ticket::from_reader(std::io::Cursor::new(collection.ticket.clone()))?;
                Some(ticket.get_title_key(device_key)?)
            }
            None => None,
        }
    } else {
        None
    };

    let meta_placeholder = storage.placeholder_generate();
    let meta_outcome = pipeline::install_nca(source, meta_entry.offset, meta_entry.size, storage, meta_placeholder, keyset, None, Some(meta_content_id), &config.pipeline)?;

    let mut meta_nca = open_installed_nca(storage, meta_placeholder, keyset, title_keys)?;
    let meta_pfs0 = meta_nca.open_pfs0_filesystem(0)?;
    let cnmt_name = find_by_suffix(&meta_pfs0, ".cnmt").ok_or_else(|| Error::InvalidData("meta NCA has no .cnmt file".to_string()))?;
    drop(meta_pfs0);

    let mut meta_pfs0 = meta_nca.open_pfs0_filesystem(0)?;
    let cnmt_bytes = meta_pfs0.read_file(&cnmt_name)?;
    let cnmt = Cnmt::from_reader(&mut std::io::Cursor::new(cnmt_bytes))?;

    let mut infos: Vec<_> = cnmt.content_entries.iter().map(|c| c.info.clone()).filter(|info| info.content_type != PackagedContentType::DeltaFragment).collect();
    sort_by_priority(&mut infos);

    let content_by_id: HashMap<[u8; 0x10], &CollectionEntry> = content_pool
        .iter()
        .filter_map(|entry| parse_hex_id(file_stem_and_suffix(&entry.name).0).map(|id| (id, entry)))
        .collect();

    let mut installed_content = Vec::with_capacity(infos.len());
    let mut needs_title_key = false;

    for info in &infos {
        let content_entry = content_by_id.get(&info.content_id).ok_or_else(|| Error::NcaNotFound(hex::encode(info.content_id)))?;

        let content_placeholder = storage.placeholder_generate();
        let outcome = pipeline::install_nca(source, content_entry.offset, content_entry.size, storage, content_placeholder, keyset, resolved_title_key, Some(info.content_id), &config.pipeline)?;

        let has_rights_id = !outcome.header.rights_id.iter().all(|&b| b == 0);
        needs_title_key = needs_title_key || has_rights_id;

        installed_content.push(NcaCollection {
            entry: (*content_entry).clone(),
            content_type: info.content_type,
            content_id: info.content_id,
            placeholder_id: content_placeholder,
            sha256: outcome.sha256,
            modified_flag: outcome.header_modified,
        });

        if info.content_type == PackagedContentType::Control {
            if let Ok(mut content_nca) = open_installed_nca(storage, content_placeholder, keyset, title_keys) {
                if let Ok(control_pfs0) = content_nca.open_pfs0_filesystem(0) {
                    if let Some(nacp_name) = find_by_suffix(&control_pfs0, "control.nacp") {
                        drop(control_pfs0);
                        if let Ok(mut control_pfs0) = content_nca.open_pfs0_filesystem(0) {
                            if let Ok(nacp_bytes) = control_pfs0.read_file(&nacp_name) {
                                if let Ok(nacp) = ControlNacp::from_reader(std::io::Cursor::new(nacp_bytes)) {
                                    if let Some((name, author)) = nacp.localized_name() {
                                        info!(name, author, "read control.nacp for installed title");
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    if needs_title_key {
        install_required_ticket(cnmt.header.title_id, tickets, keyset, device_key, ticket_service, config)?;
    }

    let meta_nca_collection = NcaCollection {
        entry: meta_entry.clone(),
        content_type: PackagedContentType::Meta,
        content_id: meta_content_id,
        placeholder_id: meta_placeholder,
        sha256: meta_outcome.sha256,
        modified_flag: meta_outcome.header_modified,
    };

    let collection = CnmtCollection {
        nca: meta_nca_collection,
        cnmt,
        ncas: installed_content,
    };

    finalize_meta(&collection, storage, meta_db, config)?;

    Ok(collection)
}

/// Imports one ticket collection, rewrapping a Personalized ticket to
/// Common first when `config.convert_to_common_ticket` is set — the common
/// core of [`install_required_ticket`] and `ticket_only` mode.
fn import_ticket_collection(collection: &TicketCollection, keyset: &Keyset, device_key: Option<&EticketDeviceKey>, ticket_service: &dyn TicketService, config: &InstallConfig) -> Result<(), Error> {
    let ticket = Ticket::from_reader(std::io::Cursor::new(collection.ticket.clone()))?;
    ticket.verify_rights_id(collection.rights_id)?;

    let final_ticket_bytes = match ticket.title_key_type()? {
        TitleKeyType::Common => collection.ticket.clone(),
        TitleKeyType::Personalized if config.convert_to_common_ticket => {
            let title_key = ticket.get_title_key(device_key)?;
            let rewrapped = patch_to_common(&ticket, title_key, keyset)?;
            let mut out = Vec::new();
            {
                use binrw::BinWrite;
                let mut cursor = std::io::Cursor::new(&mut out);
                rewrapped.write_le(&mut cursor)?;
            }
            out
        }
        TitleKeyType::Personalized => collection.ticket.clone(),
    };

    ticket_service.import_ticket(&final_ticket_bytes, &collection.cert)
}

/// Imports whichever required ticket's rights id matches one of the
/// installed content's — spec.md §4.8 step 6. A no-op when
/// `config.skip_ticket` is set: absence of the ticket import is reported
/// but non-fatal, per spec.md §7.
fn install_required_ticket(
    _title_id: u64,
    tickets: &[(TicketCollection, CollectionEntry, Option<CollectionEntry>)],
    keyset: &Keyset,
    device_key: Option<&EticketDeviceKey>,
    ticket_service: &dyn TicketService,
    config: &InstallConfig,
) -> Result<(), Error> {
    if config.skip_ticket {
        warn!("skip_ticket set, not importing required ticket");
        return Ok(());
    }

    let Some((collection, _tik_entry, _cert_entry)) = tickets.first() else {
        warn!("title requires a rights-id NCA but no ticket was supplied");
        return Ok(());
    };

    import_ticket_collection(collection, keyset, device_key, ticket_service, config)
}

/// Re-serializes an extended header back to bytes, so it can be tucked
/// into the content-meta-db blob alongside the header and content infos.
fn serialize_extended_header(eh: &crate::formats::cnmt::ExtendedHeader) -> Result<Vec<u8>, Error> {
    use crate::formats::cnmt::ExtendedHeader;
    use binrw::BinWrite;

    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    match eh {
        ExtendedHeader::Application(h) => h.write_le(&mut cursor)?,
        ExtendedHeader::Patch(h) => h.write_le(&mut cursor)?,
        ExtendedHeader::Addon(h) => h.write_le(&mut cursor)?,
        ExtendedHeader::Delta(h) => h.write_le(&mut cursor)?,
        ExtendedHeader::SystemUpdate(h) => h.write_le(&mut cursor)?,
        ExtendedHeader::DataPatch(h) => h.write_le(&mut cursor)?,
        ExtendedHeader::Unknown(bytes) => return Ok(bytes.clone()),
    }
    Ok(out)
}

/// Writes the new meta-key's content-meta-db row and commits, plus
/// registering every installed NCA's placeholder under its content id —
/// spec.md §4.8 steps 8-9. The stored blob is `header || extended_header ||
/// content_infos`, mirroring what a real `ncm` content-meta-db entry holds.
/// When `config.lower_system_version` is set, zeroes `required_system_version`
/// in the extended header before it's serialized (only `Application` and
/// `Patch` extended headers carry that field).
fn finalize_meta(collection: &CnmtCollection, storage: &dyn ContentStorage, meta_db: &dyn ContentMetaDb, config: &InstallConfig) -> Result<(), Error> {
    storage.content_delete(collection.nca.content_id).ok();
    storage.register(collection.nca.content_id, collection.nca.placeholder_id)?;

    for nca in &collection.ncas {
        storage.content_delete(nca.content_id).ok();
        storage.register(nca.content_id, nca.placeholder_id)?;
    }

    let key = MetaKey {
        id: collection.cnmt.header.title_id,
        version: collection.cnmt.header.title_version,
        meta_type: collection.cnmt.header.meta_type,
        install_type: InstallType::Full,
    };

    let mut extended_header = collection.cnmt.extended_header.clone();
    if config.lower_system_version {
        use crate::formats::cnmt::ExtendedHeader;
        match &mut extended_header {
            ExtendedHeader::Application(h) => h.required_system_version = 0,
            ExtendedHeader::Patch(h) => h.required_system_version = 0,
            _ => {}
        }
    }

    let mut infos: Vec<_> = collection.ncas.iter().map(|n| crate::formats::cnmt::PackagedContentInfo {
        content_id: n.content_id,
        size: n.entry.size,
        content_type: n.content_type,
        id_offset: 0,
    }).collect();
    infos.insert(
        0,
        crate::formats::cnmt::PackagedContentInfo {
            content_id: collection.nca.content_id,
            size: collection.nca.entry.size,
            content_type: PackagedContentType::Meta,
            id_offset: 0,
        },
    );

    use binrw::BinWrite;
    let mut blob = Vec::new();
    {
        let mut cursor = std::io::Cursor::new(&mut blob);
        collection.cnmt.header.write_le(&mut cursor)?;
    }
    blob.extend_from_slice(&serialize_extended_header(&extended_header)?);
    for info in &infos {
        let pos = blob.len() as u64;
        let mut cursor = std::io::Cursor::new(&mut blob);
        cursor.set_position(pos);
        info.write_le(&mut cursor)?;
    }

    meta_db.set(key, blob)?;
    meta_db.commit()?;
    Ok(())
}

/// Top-level orchestration over one container's already-classified
/// entries: installs every meta-NCA, removes whatever it supersedes, and
/// pushes application/launch-version records. Corresponds to spec.md
/// §4.8 in full. When `config.ticket_only` is set, skips all of that and
/// just imports every ticket the container shipped, per spec.md §6.
#[allow(clippy::too_many_arguments)]
pub fn install_container(
    source: &dyn Source,
    metas: &[CollectionEntry],
    content_pool: &[CollectionEntry],
    tickets: &[(TicketCollection, CollectionEntry, Option<CollectionEntry>)],
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
    if config.ticket_only {
        if config.skip_ticket {
            warn!("ticket_only and skip_ticket both set, nothing to do");
            return Ok(Vec::new());
        }
        for (collection, ..) in tickets {
            import_ticket_collection(collection, keyset, device_key, ticket_service, config)?;
        }
        return Ok(Vec::new());
    }

    let mut installed = Vec::with_capacity(metas.len());

    for meta_entry in metas {
        let collection = install_meta(source, meta_entry, content_pool, tickets, keyset, title_keys, device_key, storage, meta_db, ticket_service, config)?;

        let meta_type = collection.cnmt.header.meta_type;
        let app_id = compute_app_id(meta_type, collection.cnmt.header.title_id);
        let new_version = collection.cnmt.header.title_version;

        let existing = meta_db.list(Some(meta_type), (collection.cnmt.header.title_id, collection.cnmt.header.title_id), InstallType::Full)?;
        let existing_version = existing.iter().map(|k| k.version).max();

        if should_skip(meta_type, existing_version, new_version, config) {
            info!(app_id, new_version, ?existing_version, "skipping already-installed title per policy");
            continue;
        }

        let (other_storage, other_db) = other_storage_db;
        remove_superseded(meta_type, collection.cnmt.header.title_id, meta_db, storage, other_db, other_storage)?;

        let meta_key = MetaKey {
            id: collection.cnmt.header.title_id,
            version: new_version,
            meta_type,
            install_type: InstallType::Full,
        };

        let record = ApplicationRecord {
            meta_key,
            storage_id: config.storage_id,
        };
        record_service.push(app_id, &[record])?;

        if config.os_version >= (6, 0, 0) {
            let latest_version = if meta_type == ContentMetaType::Patch { new_version } else { new_version.max(existing_version.unwrap_or(0)) };
            record_service.push_launch_version(app_id, latest_version)?;
        }

        installed.push(InstalledApplication {
            app_id,
            meta_key,
            display_name: None,
        });
    }

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_app_id() {
        assert_eq!(compute_app_id(ContentMetaType::Application, 0x0100000000001000), 0x0100000000001000);
        assert_eq!(compute_app_id(ContentMetaType::Patch, 0x0100000000001000), 0x0100000000001800);
        assert_eq!(compute_app_id(ContentMetaType::AddOnContent, 0x0100000000001000), 0x0100000000000000);
    }

    #[test]
    fn test_content_priority_orders_meta_first_delta_last() {
        let mut infos = vec![
            PackagedContentType::Data,
            PackagedContentType::Meta,
            PackagedContentType::DeltaFragment,
            PackagedContentType::Program,
            PackagedContentType::Control,
        ];
        infos.sort_by_key(|t| content_priority(*t));
        assert_eq!(
            infos,
            vec![
                PackagedContentType::Meta,
                PackagedContentType::Program,
                PackagedContentType::Control,
                PackagedContentType::Data,
                PackagedContentType::DeltaFragment,
            ]
        );
    }

    #[test]
    fn test_parse_hex_id() {
        let stem = "00112233445566778899aabbccddeeff";
        let id = parse_hex_id(stem).unwrap();
        assert_eq!(id, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!(parse_hex_id("not-hex").is_none());
    }

    #[test]
    fn test_classify_entries() {
        let entries = vec![
            CollectionEntry { name: "0000000000000000000000000000aa.cnmt.nca".to_string(), offset: 0, size: 10 },
            CollectionEntry { name: "0000000000000000000000000000bb.nca".to_string(), offset: 10, size: 20 },
            CollectionEntry { name: "0000000000000000000000000000cc.tik".to_string(), offset: 30, size: 0x2C0 },
            CollectionEntry { name: "0000000000000000000000000000cc.cert".to_string(), offset: 30 + 0x2C0, size: 0x200 },
        ];
        let (metas, content, tickets) = classify_entries(&entries);
        assert_eq!(metas.len(), 1);
        assert_eq!(content.len(), 1);
        assert_eq!(tickets.len(), 1);
    }

    #[test]
    fn test_should_skip_patch_downgrade() {
        let config = InstallConfig::default();
        assert!(should_skip(ContentMetaType::Patch, Some(5), 3, &config));
        assert!(!should_skip(ContentMetaType::Patch, Some(5), 7, &config));
        assert!(!should_skip(ContentMetaType::Patch, None, 1, &config));
    }

    #[test]
    fn test_should_skip_already_installed_flag() {
        let mut config = InstallConfig::default();
        config.skip_if_already_installed = true;
        assert!(should_skip(ContentMetaType::Application, Some(1), 1, &config));
        assert!(!should_skip(ContentMetaType::Application, Some(1), 2, &config));
    }

    #[test]
    fn test_should_skip_rejects_system_meta_types() {
        let config = InstallConfig::default();
        assert!(should_skip(ContentMetaType::SystemProgram, None, 1, &config));
        assert!(should_skip(ContentMetaType::SystemUpdate, Some(1), 2, &config));
    }

    #[test]
    fn test_should_skip_type_flag_is_unconditional() {
        let mut config = InstallConfig::default();
        config.skip_addon = true;
        assert!(should_skip(ContentMetaType::AddOnContent, None, 1, &config));
        assert!(should_skip(ContentMetaType::AddOnContent, Some(1), 2, &config));
    }

    #[test]
    fn test_superseded_id_range() {
        assert_eq!(superseded_id_range(ContentMetaType::Patch, 0x1234), (0, u64::MAX));
        assert_eq!(superseded_id_range(ContentMetaType::Application, 0x1234), (0x1234, 0x1234));
    }
}
