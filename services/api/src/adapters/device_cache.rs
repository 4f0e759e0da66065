//! services/api/src/adapters/device_cache.rs
//!
//! A file-backed device cache. Each well-known key is one JSON array in
//! `<dir>/<key>.json`, replaced wholesale on every store.
//! It implements the `DeviceCache` port from the `core` crate.

use async_trait::async_trait;
use receipt_pipeline_core::{
    domain::{Collection, Record},
    ports::{DeviceCache, PortError, PortResult},
};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::web::dto::{FolderDto, ReceiptDto};

pub const FOLDERS_KEY: &str = "folders";
pub const RECEIPTS_KEY: &str = "receipts";

#[derive(Clone)]
pub struct JsonFileCache {
    dir: PathBuf,
}

impl JsonFileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// A missing file reads as an empty list.
    async fn read<T: DeserializeOwned>(&self, key: &str) -> PortResult<Vec<T>> {
        let path = self.path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortError::Unexpected(format!("read {:?}: {}", path, e))),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| PortError::Unexpected(format!("corrupt cache entry '{}': {}", key, e)))
    }

    async fn write<T: Serialize>(&self, key: &str, items: &[T]) -> PortResult<()> {
        let io = |e: std::io::Error| PortError::Unexpected(format!("write cache '{}': {}", key, e));
        fs::create_dir_all(&self.dir).await.map_err(io)?;

        let body = serde_json::to_vec(items)
            .map_err(|e| PortError::Unexpected(format!("encode cache '{}': {}", key, e)))?;

        // Write to a temp file first, then rename over the old list.
        let path = self.path(key);
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(io)?;
        file.write_all(&body).await.map_err(io)?;
        file.sync_all().await.map_err(io)?;
        fs::rename(&temp_path, &path).await.map_err(io)?;

        debug!(key, entries = items.len(), "Device cache replaced");
        Ok(())
    }
}

#[async_trait]
impl DeviceCache for JsonFileCache {
    async fn load_collections(&self) -> PortResult<Vec<Collection>> {
        let folders: Vec<FolderDto> = self.read(FOLDERS_KEY).await?;
        Ok(folders
            .into_iter()
            .filter_map(|dto| {
                let id = dto.folder_id.clone();
                Collection::try_from(dto)
                    .map_err(|e| warn!(folder_id = %id, error = %e, "Dropping cached folder"))
                    .ok()
            })
            .collect())
    }

    async fn store_collections(&self, collections: &[Collection]) -> PortResult<()> {
        let folders: Vec<FolderDto> = collections.iter().map(FolderDto::from).collect();
        self.write(FOLDERS_KEY, &folders).await
    }

    async fn load_records(&self) -> PortResult<Vec<Record>> {
        let receipts: Vec<ReceiptDto> = self.read(RECEIPTS_KEY).await?;
        Ok(receipts.into_iter().map(Record::from).collect())
    }

    async fn store_records(&self, records: &[Record]) -> PortResult<()> {
        let receipts: Vec<ReceiptDto> = records.iter().map(ReceiptDto::from).collect();
        self.write(RECEIPTS_KEY, &receipts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use receipt_pipeline_core::{Column, ColumnType};
    use tempfile::TempDir;

    fn folder(id: &str) -> Collection {
        let now = Utc::now();
        Collection {
            owner_id: "o1".into(),
            collection_id: id.into(),
            name: format!("Folder {id}"),
            description: Some("work".into()),
            columns: vec![Column::new("Vendor", ColumnType::Text, true)],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn empty_directory_reads_as_empty_lists() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache"));
        assert!(cache.load_collections().await.unwrap().is_empty());
        assert!(cache.load_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_replaces_the_whole_list() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::new(dir.path());
        cache
            .store_collections(&[folder("a"), folder("b")])
            .await
            .unwrap();
        cache.store_collections(&[folder("c")]).await.unwrap();

        let loaded = cache.load_collections().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].collection_id, "c");
        assert!(dir.path().join("folders.json").exists());
        assert!(!dir.path().join("folders.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("receipts.json"), b"{not json").unwrap();
        let cache = JsonFileCache::new(dir.path());
        assert!(cache.load_records().await.is_err());
    }
}
