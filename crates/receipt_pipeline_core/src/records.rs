//! crates/receipt_pipeline_core/src/records.rs
//!
//! The record store facade. Ordering and ownership rules live here so every
//! storage adapter behaves the same way from the pipeline's point of view.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::domain::Record;
use crate::error::{PipelineError, PipelineResult, Step};
use crate::ports::{DatabaseService, PortError};

#[derive(Clone)]
pub struct RecordStore {
    db: Arc<dyn DatabaseService>,
}

fn record_error(record_id: &str) -> impl FnOnce(PortError) -> PipelineError + '_ {
    move |e| match e {
        PortError::NotFound(_) => PipelineError::not_found("receipt", record_id),
        other => PipelineError::from_port(Step::Store, other),
    }
}

impl RecordStore {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Persists `record` for `owner_id` under `collection_id` (`None` = uncategorized).
    /// Saving an existing record id replaces it.
    pub async fn save(
        &self,
        owner_id: &str,
        collection_id: Option<&str>,
        mut record: Record,
    ) -> PipelineResult<Record> {
        record.owner_id = owner_id.to_string();
        record.collection_id = collection_id.map(str::to_string);
        self.db
            .save_record(record)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))
    }

    pub async fn get(&self, owner_id: &str, record_id: &str) -> PipelineResult<Record> {
        self.db
            .get_record(owner_id, record_id)
            .await
            .map_err(record_error(record_id))
    }

    /// Newest first; ties broken by record id so repeated exports are identical.
    pub async fn list_by_collection(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> PipelineResult<Vec<Record>> {
        self.db
            .list_records_by_collection(owner_id, collection_id)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))
    }

    pub async fn list_all(&self, owner_id: &str) -> PipelineResult<Vec<Record>> {
        self.db
            .list_records(owner_id)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))
    }

    /// Records without a collection. Rows still naming a missing collection
    /// are included too.
    pub async fn list_uncategorized(&self, owner_id: &str) -> PipelineResult<Vec<Record>> {
        let live: HashSet<String> = self
            .db
            .list_collections(owner_id)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))?
            .into_iter()
            .map(|c| c.collection_id)
            .collect();

        Ok(self
            .list_all(owner_id)
            .await?
            .into_iter()
            .filter(|r| match &r.collection_id {
                Some(id) => !live.contains(id),
                None => true,
            })
            .collect())
    }

    /// Moves a record into a collection, or out of any collection with `None`.
    pub async fn assign(
        &self,
        owner_id: &str,
        record_id: &str,
        collection_id: Option<&str>,
    ) -> PipelineResult<Record> {
        if let Some(id) = collection_id {
            self.db
                .get_collection(owner_id, id)
                .await
                .map_err(|e| match e {
                    PortError::NotFound(_) => PipelineError::not_found("folder", id),
                    other => PipelineError::from_port(Step::Store, other),
                })?;
        }
        let record = self.get(owner_id, record_id).await?;
        let saved = self.save(owner_id, collection_id, record).await?;
        info!(owner_id, record_id, collection_id = ?collection_id, "Receipt reassigned");
        Ok(saved)
    }

    /// Deletes one record. Siblings are untouched.
    pub async fn delete(&self, owner_id: &str, record_id: &str) -> PipelineResult<()> {
        self.db
            .delete_record(owner_id, record_id)
            .await
            .map_err(record_error(record_id))?;
        info!(owner_id, record_id, "Receipt deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Collection, Column, ColumnType, FieldMap};
    use crate::memory::InMemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: &str, minutes: i64) -> Record {
        Record {
            owner_id: String::new(),
            collection_id: None,
            record_id: id.to_string(),
            image_ref: format!("images/{id}.jpg"),
            original_filename: format!("{id}.jpg"),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
            field_maps: vec![FieldMap::default()],
        }
    }

    async fn store_with_folder() -> (RecordStore, Arc<InMemoryStore>) {
        let db = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        db.insert_collection(Collection {
            owner_id: "o1".into(),
            collection_id: "f1".into(),
            name: "Trips".into(),
            description: None,
            columns: vec![Column::new("Vendor", ColumnType::Text, true)],
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        (RecordStore::new(db.clone()), db)
    }

    #[tokio::test]
    async fn lists_newest_first_with_stable_ties() {
        let (store, _) = store_with_folder().await;
        store.save("o1", Some("f1"), record("b", 0)).await.unwrap();
        store.save("o1", Some("f1"), record("a", 0)).await.unwrap();
        store.save("o1", Some("f1"), record("c", 5)).await.unwrap();
        store.save("o1", None, record("d", 10)).await.unwrap();

        let ids: Vec<String> = store
            .list_by_collection("o1", "f1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.record_id)
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn deleting_a_folder_leaves_its_receipts_uncategorized() {
        let (store, db) = store_with_folder().await;
        store.save("o1", Some("f1"), record("a", 0)).await.unwrap();
        store.save("o1", None, record("b", 1)).await.unwrap();
        db.delete_collection("o1", "f1").await.unwrap();

        let uncategorized = store.list_uncategorized("o1").await.unwrap();
        let ids: Vec<&str> = uncategorized.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(store.get("o1", "a").await.unwrap().collection_id, None);
    }

    #[tokio::test]
    async fn recreated_folder_does_not_reclaim_old_receipts() {
        let (store, db) = store_with_folder().await;
        store.save("o1", Some("f1"), record("a", 0)).await.unwrap();
        let folder = db.get_collection("o1", "f1").await.unwrap();
        db.delete_collection("o1", "f1").await.unwrap();
        db.insert_collection(folder).await.unwrap();

        assert!(store.list_by_collection("o1", "f1").await.unwrap().is_empty());
        let ids: Vec<String> = store
            .list_uncategorized("o1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.record_id)
            .collect();
        assert_eq!(ids, ["a"]);
    }

    #[tokio::test]
    async fn assign_requires_an_existing_folder() {
        let (store, _) = store_with_folder().await;
        store.save("o1", None, record("a", 0)).await.unwrap();

        let err = store.assign("o1", "a", Some("missing")).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { entity: "folder", .. }));

        let moved = store.assign("o1", "a", Some("f1")).await.unwrap();
        assert_eq!(moved.collection_id.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn delete_unknown_receipt_is_not_found() {
        let (store, _) = store_with_folder().await;
        store.save("o1", Some("f1"), record("a", 0)).await.unwrap();
        store.save("o1", Some("f1"), record("b", 1)).await.unwrap();

        store.delete("o1", "a").await.unwrap();
        assert!(matches!(
            store.delete("o1", "a").await,
            Err(PipelineError::NotFound { entity: "receipt", .. })
        ));
        assert_eq!(store.list_by_collection("o1", "f1").await.unwrap().len(), 1);
    }
}
