//! crates/receipt_pipeline_core/src/memory.rs
//!
//! An in-memory implementation of the `DatabaseService` port for the test
//! suites of both crates. Other crates reach it through the `testing` feature.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{Collection, Record, SpreadsheetCredential};
use crate::ports::{DatabaseService, PortError, PortResult};

type OwnerKey = (String, String);

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<OwnerKey, Collection>>,
    records: RwLock<HashMap<OwnerKey, Record>>,
    credentials: RwLock<HashMap<OwnerKey, SpreadsheetCredential>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(owner_id: &str, id: &str) -> OwnerKey {
    (owner_id.to_string(), id.to_string())
}

fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn insert_collection(&self, collection: Collection) -> PortResult<Collection> {
        let mut collections = self.collections.write().await;
        let k = key(&collection.owner_id, &collection.collection_id);
        if collections.contains_key(&k) {
            return Err(PortError::Conflict(format!(
                "Collection {} already exists",
                collection.collection_id
            )));
        }
        collections.insert(k, collection.clone());
        Ok(collection)
    }

    async fn get_collection(&self, owner_id: &str, collection_id: &str) -> PortResult<Collection> {
        self.collections
            .read()
            .await
            .get(&key(owner_id, collection_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Collection {} not found", collection_id)))
    }

    async fn list_collections(&self, owner_id: &str) -> PortResult<Vec<Collection>> {
        let mut list: Vec<Collection> = self
            .collections
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.collection_id.cmp(&b.collection_id))
        });
        Ok(list)
    }

    async fn delete_collection(&self, owner_id: &str, collection_id: &str) -> PortResult<()> {
        let mut collections = self.collections.write().await;
        let mut records = self.records.write().await;
        collections
            .remove(&key(owner_id, collection_id))
            .ok_or_else(|| PortError::NotFound(format!("Collection {} not found", collection_id)))?;
        for record in records.values_mut() {
            if record.owner_id == owner_id && record.collection_id.as_deref() == Some(collection_id) {
                record.collection_id = None;
            }
        }
        Ok(())
    }

    async fn save_record(&self, record: Record) -> PortResult<Record> {
        self.records
            .write()
            .await
            .insert(key(&record.owner_id, &record.record_id), record.clone());
        Ok(record)
    }

    async fn get_record(&self, owner_id: &str, record_id: &str) -> PortResult<Record> {
        self.records
            .read()
            .await
            .get(&key(owner_id, record_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Receipt {} not found", record_id)))
    }

    async fn list_records_by_collection(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> PortResult<Vec<Record>> {
        let mut list: Vec<Record> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner_id == owner_id && r.collection_id.as_deref() == Some(collection_id))
            .cloned()
            .collect();
        sort_records(&mut list);
        Ok(list)
    }

    async fn list_records(&self, owner_id: &str) -> PortResult<Vec<Record>> {
        let mut list: Vec<Record> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        sort_records(&mut list);
        Ok(list)
    }

    async fn delete_record(&self, owner_id: &str, record_id: &str) -> PortResult<()> {
        self.records
            .write()
            .await
            .remove(&key(owner_id, record_id))
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Receipt {} not found", record_id)))
    }

    async fn get_spreadsheet_credential(
        &self,
        owner_id: &str,
        provider: &str,
    ) -> PortResult<Option<SpreadsheetCredential>> {
        Ok(self
            .credentials
            .read()
            .await
            .get(&key(owner_id, provider))
            .cloned())
    }

    async fn save_spreadsheet_credential(&self, credential: SpreadsheetCredential) -> PortResult<()> {
        self.credentials
            .write()
            .await
            .insert(key(&credential.owner_id, &credential.provider), credential);
        Ok(())
    }

    async fn delete_spreadsheet_credential(&self, owner_id: &str, provider: &str) -> PortResult<bool> {
        Ok(self
            .credentials
            .write()
            .await
            .remove(&key(owner_id, provider))
            .is_some())
    }
}
