//! In-memory reference implementations of the [`super`] service traits, used
//! by the pipeline/install test suites in place of the real `ncm`/`ns`/`es`
//! services. Grounded on the same `original_source` test-double role as
//! `formats::cnmt::tests`'s fixture-skip pattern, but implemented fully
//! in-process since there is no hardware dependency to route around here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Error;
use crate::formats::cnmt::{ContentMetaType, PackagedContentInfo};

use super::{ApplicationRecord, ContentMetaDb, ContentStorage, InstallType, MetaKey, RecordService, TicketService};

#[derive(Default)]
struct Placeholder {
    size: u64,
    data: Vec<u8>,
}

/// An in-memory [`ContentStorage`]. Placeholders are just growable buffers
/// keyed by their placeholder id; `register` moves a placeholder's bytes
/// under its final content id.
#[derive(Default)]
pub struct MockContentStorage {
    placeholders: Mutex<HashMap<[u8; 0x10], Placeholder>>,
    content: Mutex<HashMap<[u8; 0x10], Vec<u8>>>,
    next_id: Mutex<u64>,
}

impl MockContentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_bytes(&self, content_id: [u8; 0x10]) -> Option<Vec<u8>> {
        self.content.lock().unwrap().get(&content_id).cloned()
    }
}

impl ContentStorage for MockContentStorage {
    fn placeholder_generate(&self) -> [u8; 0x10] {
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;

        let mut out = [0u8; 0x10];
        out[..8].copy_from_slice(&id.to_le_bytes());
        out
    }

    fn placeholder_create(&self, id: [u8; 0x10], size: u64) -> Result<(), Error> {
        self.placeholders.lock().unwrap().insert(
            id,
            Placeholder {
                size,
                data: vec![0u8; size as usize],
            },
        );
        Ok(())
    }

    fn placeholder_set_size(&self, id: [u8; 0x10], size: u64) -> Result<(), Error> {
        let mut placeholders = self.placeholders.lock().unwrap();
        let placeholder = placeholders
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("placeholder not found".to_string()))?;
        placeholder.size = size;
        placeholder.data.resize(size as usize, 0);
        Ok(())
    }

    fn placeholder_write(&self, id: [u8; 0x10], offset: u64, buf: &[u8]) -> Result<(), Error> {
        let mut placeholders = self.placeholders.lock().unwrap();
        let placeholder = placeholders
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("placeholder not found".to_string()))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > placeholder.data.len() {
            placeholder.data.resize(end, 0);
        }
        placeholder.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn placeholder_flush(&self, _id: [u8; 0x10]) -> Result<(), Error> {
        Ok(())
    }

    fn placeholder_path(&self, id: [u8; 0x10]) -> Result<PathBuf, Error> {
        if self.placeholders.lock().unwrap().contains_key(&id) {
            Ok(PathBuf::from(format!("/mock/placeholder/{}", hex::encode(id))))
        } else {
            Err(Error::NotFound("placeholder not found".to_string()))
        }
    }

    fn placeholder_delete(&self, id: [u8; 0x10]) -> Result<(), Error> {
        self.placeholders.lock().unwrap().remove(&id);
        Ok(())
    }

    fn register(&self, content_id: [u8; 0x10], placeholder_id: [u8; 0x10]) -> Result<(), Error> {
        let placeholder = self
            .placeholders
            .lock()
            .unwrap()
            .remove(&placeholder_id)
            .ok_or_else(|| Error::NotFound("placeholder not found".to_string()))?;
        self.content.lock().unwrap().insert(content_id, placeholder.data);
        Ok(())
    }

    fn content_delete(&self, content_id: [u8; 0x10]) -> Result<(), Error> {
        self.content.lock().unwrap().remove(&content_id);
        Ok(())
    }

    fn content_exists(&self, content_id: [u8; 0x10]) -> bool {
        self.content.lock().unwrap().contains_key(&content_id)
    }
}

#[derive(Default)]
struct MetaRecord {
    blob: Vec<u8>,
    content_infos: Vec<PackagedContentInfo>,
}

/// An in-memory [`ContentMetaDb`]. `commit` is a no-op since there's no
/// separate staging/durable split to model here.
#[derive(Default)]
pub struct MockContentMetaDb {
    entries: Mutex<HashMap<MetaKey, MetaRecord>>,
}

impl MockContentMetaDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_content_info(&self, key: MetaKey, infos: Vec<PackagedContentInfo>) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key).or_default().content_infos = infos;
    }
}

impl ContentMetaDb for MockContentMetaDb {
    fn set(&self, key: MetaKey, blob: Vec<u8>) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key).or_default().blob = blob;
        Ok(())
    }

    fn commit(&self) -> Result<(), Error> {
        Ok(())
    }

    fn list(&self, meta_type: Option<ContentMetaType>, id_range: (u64, u64), install_type: InstallType) -> Result<Vec<MetaKey>, Error> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .keys()
            .filter(|key| meta_type.is_none_or(|t| key.meta_type == t))
            .filter(|key| key.id >= id_range.0 && key.id <= id_range.1)
            .filter(|key| key.install_type == install_type)
            .copied()
            .collect())
    }

    fn get(&self, key: MetaKey) -> Result<Vec<u8>, Error> {
        self.entries
            .lock()
            .unwrap()
            .get(&key)
            .map(|record| record.blob.clone())
            .ok_or(Error::NcmDbCorruptHeader)
    }

    fn list_content_info(&self, key: MetaKey) -> Result<Vec<PackagedContentInfo>, Error> {
        self.entries
            .lock()
            .unwrap()
            .get(&key)
            .map(|record| record.content_infos.clone())
            .ok_or(Error::NcmDbCorruptInfos)
    }

    fn remove(&self, key: MetaKey) -> Result<(), Error> {
        self.entries.lock().unwrap().remove(&key);
        Ok(())
    }
}

/// An in-memory [`RecordService`].
#[derive(Default)]
pub struct MockRecordService {
    records: Mutex<HashMap<u64, Vec<ApplicationRecord>>>,
    launch_versions: Mutex<HashMap<u64, u32>>,
}

impl MockRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_for(&self, app_id: u64) -> Vec<ApplicationRecord> {
        self.records.lock().unwrap().get(&app_id).cloned().unwrap_or_default()
    }
}

impl RecordService for MockRecordService {
    fn push(&self, app_id: u64, records: &[ApplicationRecord]) -> Result<(), Error> {
        self.records.lock().unwrap().insert(app_id, records.to_vec());
        Ok(())
    }

    fn push_launch_version(&self, app_id: u64, version: u32) -> Result<(), Error> {
        self.launch_versions.lock().unwrap().insert(app_id, version);
        Ok(())
    }
}

/// An in-memory [`TicketService`] that just records every import it's handed.
#[derive(Default)]
pub struct MockTicketService {
    imported: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl MockTicketService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_count(&self) -> usize {
        self.imported.lock().unwrap().len()
    }
}

impl TicketService for MockTicketService {
    fn import_ticket(&self, tik: &[u8], cert: &[u8]) -> Result<(), Error> {
        self.imported.lock().unwrap().push((tik.to_vec(), cert.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u64) -> MetaKey {
        MetaKey {
            id,
            version: 0,
            meta_type: ContentMetaType::Application,
            install_type: InstallType::Full,
        }
    }

    #[test]
    fn test_placeholder_lifecycle() {
        let storage = MockContentStorage::new();
        let placeholder_id = storage.placeholder_generate();
        storage.placeholder_create(placeholder_id, 4).unwrap();
        storage.placeholder_write(placeholder_id, 0, &[1, 2, 3, 4]).unwrap();

        let content_id = [0xAA; 0x10];
        storage.register(content_id, placeholder_id).unwrap();

        assert!(storage.content_exists(content_id));
        assert_eq!(storage.content_bytes(content_id).unwrap(), vec![1, 2, 3, 4]);
        assert!(storage.placeholder_path(placeholder_id).is_err());
    }

    #[test]
    fn test_meta_db_set_list_remove() {
        let db = MockContentMetaDb::new();
        db.set(key(1), vec![0xAB]).unwrap();
        db.set(key(2), vec![0xCD]).unwrap();

        let listed = db.list(Some(ContentMetaType::Application), (0, 10), InstallType::Full).unwrap();
        assert_eq!(listed.len(), 2);

        db.remove(key(1)).unwrap();
        let listed = db.list(Some(ContentMetaType::Application), (0, 10), InstallType::Full).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 2);
    }

    #[test]
    fn test_record_service_push() {
        let service = MockRecordService::new();
        let record = ApplicationRecord {
            meta_key: key(1),
            storage_id: super::StorageId::SdCard,
        };
        service.push(1, &[record]).unwrap();
        assert_eq!(service.records_for(1).len(), 1);
    }

    #[test]
    fn test_ticket_service_import() {
        let service = MockTicketService::new();
        service.import_ticket(&[1, 2], &[3, 4]).unwrap();
        assert_eq!(service.import_count(), 1);
    }
}
