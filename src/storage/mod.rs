//! The host OS service interfaces the install pipeline consumes, modelled
//! as traits rather than direct IPC calls — there being no `ncm`/`ns`
//! service reachable from a hosted build. Grounded on spec.md §4.9's
//! operation table; [`mock`] provides an in-memory reference
//! implementation of each, used by the pipeline/install test suites the
//! same way `original_source`'s own test doubles stand in for the real
//! services.

pub mod mock;

use std::path::PathBuf;

use crate::error::Error;
use crate::formats::cnmt::{ContentMetaType, PackagedContentInfo};

/// Which of the two storage trees content lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageId {
    System,
    SdCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallType {
    Full,
    Unknown,
}

/// Identifies one content-meta-db entry: `(id, version, type, install_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetaKey {
    pub id: u64,
    pub version: u32,
    pub meta_type: ContentMetaType,
    pub install_type: InstallType,
}

/// Content placeholder/content-promotion contract — `ncm`'s `ContentStorage`.
pub trait ContentStorage: Send + Sync {
    fn placeholder_generate(&self) -> [u8; 0x10];
    fn placeholder_create(&self, id: [u8; 0x10], size: u64) -> Result<(), Error>;
    fn placeholder_set_size(&self, id: [u8; 0x10], size: u64) -> Result<(), Error>;
    fn placeholder_write(&self, id: [u8; 0x10], offset: u64, buf: &[u8]) -> Result<(), Error>;
    fn placeholder_flush(&self, id: [u8; 0x10]) -> Result<(), Error>;
    fn placeholder_path(&self, id: [u8; 0x10]) -> Result<PathBuf, Error>;
    fn placeholder_delete(&self, id: [u8; 0x10]) -> Result<(), Error>;
    fn register(&self, content_id: [u8; 0x10], placeholder_id: [u8; 0x10]) -> Result<(), Error>;
    fn content_delete(&self, content_id: [u8; 0x10]) -> Result<(), Error>;
    fn content_exists(&self, content_id: [u8; 0x10]) -> bool;
}

/// Content-meta-db contract — `ncm`'s `ContentMetaDatabase`.
pub trait ContentMetaDb: Send + Sync {
    fn set(&self, key: MetaKey, blob: Vec<u8>) -> Result<(), Error>;
    fn commit(&self) -> Result<(), Error>;
    /// Lists meta-keys matching `meta_type` (if given) and `app_id`'s id
    /// range, of the given install type.
    fn list(&self, meta_type: Option<ContentMetaType>, id_range: (u64, u64), install_type: InstallType) -> Result<Vec<MetaKey>, Error>;
    fn get(&self, key: MetaKey) -> Result<Vec<u8>, Error>;
    fn list_content_info(&self, key: MetaKey) -> Result<Vec<PackagedContentInfo>, Error>;
    fn remove(&self, key: MetaKey) -> Result<(), Error>;
}

/// One `ns` application record: a meta key plus the storage it targets.
#[derive(Debug, Clone, Copy)]
pub struct ApplicationRecord {
    pub meta_key: MetaKey,
    pub storage_id: StorageId,
}

/// `ns`'s application-record and launch-version-cache contract.
pub trait RecordService: Send + Sync {
    fn push(&self, app_id: u64, records: &[ApplicationRecord]) -> Result<(), Error>;
    /// Only called for OS versions >= 6.0.0, per spec.md §4.8 step 10.
    fn push_launch_version(&self, app_id: u64, version: u32) -> Result<(), Error>;
}

/// `es`'s ticket-import contract.
pub trait TicketService: Send + Sync {
    fn import_ticket(&self, tik: &[u8], cert: &[u8]) -> Result<(), Error>;
}
