//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use receipt_pipeline_core::domain::{
    Collection, Column, ColumnType, FieldMap, Record, SpreadsheetCredential,
};
use receipt_pipeline_core::ports::{DatabaseService, PortError, PortResult};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use std::collections::BTreeMap;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

/// The JSONB shape of one column.
#[derive(Serialize, Deserialize)]
struct StoredColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
    required: bool,
}

/// The JSONB shape of one field-map.
#[derive(Serialize, Deserialize)]
struct StoredFieldMap {
    values: BTreeMap<String, String>,
    #[serde(default)]
    incomplete: bool,
    #[serde(default)]
    missing_required: Vec<String>,
}

#[derive(FromRow)]
struct CollectionRow {
    owner_id: String,
    collection_id: String,
    name: String,
    description: Option<String>,
    columns: Json<Vec<StoredColumn>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl CollectionRow {
    fn to_domain(self) -> PortResult<Collection> {
        let columns = self
            .columns
            .0
            .into_iter()
            .map(|c| {
                let column_type = c.column_type.parse::<ColumnType>().map_err(|e| {
                    PortError::Unexpected(format!(
                        "collection {} has a corrupt column: {}",
                        self.collection_id, e
                    ))
                })?;
                Ok(Column::new(c.name, column_type, c.required))
            })
            .collect::<PortResult<Vec<_>>>()?;
        Ok(Collection {
            owner_id: self.owner_id,
            collection_id: self.collection_id,
            name: self.name,
            description: self.description,
            columns,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ReceiptRow {
    owner_id: String,
    receipt_id: String,
    collection_id: Option<String>,
    image_ref: String,
    original_filename: String,
    field_maps: Json<Vec<StoredFieldMap>>,
    created_at: DateTime<Utc>,
}
impl ReceiptRow {
    fn to_domain(self) -> Record {
        Record {
            owner_id: self.owner_id,
            collection_id: self.collection_id,
            record_id: self.receipt_id,
            image_ref: self.image_ref,
            original_filename: self.original_filename,
            created_at: self.created_at,
            field_maps: self
                .field_maps
                .0
                .into_iter()
                .map(|m| FieldMap {
                    values: m.values,
                    incomplete: m.incomplete,
                    missing_required: m.missing_required,
                })
                .collect(),
        }
    }
}

#[derive(FromRow)]
struct CredentialRow {
    owner_id: String,
    provider: String,
    refresh_token: String,
    created_at: DateTime<Utc>,
}
impl CredentialRow {
    fn to_domain(self) -> SpreadsheetCredential {
        SpreadsheetCredential {
            owner_id: self.owner_id,
            provider: self.provider,
            refresh_token: self.refresh_token,
            created_at: self.created_at,
        }
    }
}

fn stored_columns(columns: &[Column]) -> Json<Vec<StoredColumn>> {
    Json(
        columns
            .iter()
            .map(|c| StoredColumn {
                name: c.name.clone(),
                column_type: c.column_type.as_str().to_string(),
                required: c.required,
            })
            .collect(),
    )
}

fn stored_field_maps(maps: &[FieldMap]) -> Json<Vec<StoredFieldMap>> {
    Json(
        maps.iter()
            .map(|m| StoredFieldMap {
                values: m.values.clone(),
                incomplete: m.incomplete,
                missing_required: m.missing_required.clone(),
            })
            .collect(),
    )
}

const COLLECTION_COLUMNS: &str =
    "owner_id, collection_id, name, description, columns, created_at, updated_at";
const RECEIPT_COLUMNS: &str =
    "owner_id, receipt_id, collection_id, image_ref, original_filename, field_maps, created_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn insert_collection(&self, collection: Collection) -> PortResult<Collection> {
        let query = format!(
            "INSERT INTO collections ({COLLECTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (owner_id, collection_id) DO NOTHING RETURNING {COLLECTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CollectionRow>(&query)
            .bind(&collection.owner_id)
            .bind(&collection.collection_id)
            .bind(&collection.name)
            .bind(&collection.description)
            .bind(stored_columns(&collection.columns))
            .bind(collection.created_at)
            .bind(collection.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        match row {
            Some(row) => row.to_domain(),
            None => Err(PortError::Conflict(format!(
                "Collection {} already exists",
                collection.collection_id
            ))),
        }
    }

    async fn get_collection(&self, owner_id: &str, collection_id: &str) -> PortResult<Collection> {
        let query = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE owner_id = $1 AND collection_id = $2"
        );
        sqlx::query_as::<_, CollectionRow>(&query)
            .bind(owner_id)
            .bind(collection_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Collection {} not found", collection_id))
                }
                _ => PortError::Unexpected(e.to_string()),
            })?
            .to_domain()
    }

    async fn list_collections(&self, owner_id: &str) -> PortResult<Vec<Collection>> {
        let query = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE owner_id = $1 \
             ORDER BY updated_at DESC, collection_id ASC"
        );
        sqlx::query_as::<_, CollectionRow>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?
            .into_iter()
            .map(CollectionRow::to_domain)
            .collect()
    }

    async fn delete_collection(&self, owner_id: &str, collection_id: &str) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let result = sqlx::query("DELETE FROM collections WHERE owner_id = $1 AND collection_id = $2")
            .bind(owner_id)
            .bind(collection_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Collection {} not found",
                collection_id
            )));
        }
        // A folder recreated under the same id must not pick these receipts up again.
        let detached = sqlx::query(
            "UPDATE receipts SET collection_id = NULL WHERE owner_id = $1 AND collection_id = $2",
        )
        .bind(owner_id)
        .bind(collection_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;
        debug!(owner_id, collection_id, detached = detached.rows_affected(), "Collection deleted");
        Ok(())
    }

    async fn save_record(&self, record: Record) -> PortResult<Record> {
        let query = format!(
            "INSERT INTO receipts ({RECEIPT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (owner_id, receipt_id) DO UPDATE SET \
                collection_id = EXCLUDED.collection_id, \
                image_ref = EXCLUDED.image_ref, \
                original_filename = EXCLUDED.original_filename, \
                field_maps = EXCLUDED.field_maps, \
                created_at = EXCLUDED.created_at \
             RETURNING {RECEIPT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(&record.owner_id)
            .bind(&record.record_id)
            .bind(&record.collection_id)
            .bind(&record.image_ref)
            .bind(&record.original_filename)
            .bind(stored_field_maps(&record.field_maps))
            .bind(record.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(row.to_domain())
    }

    async fn get_record(&self, owner_id: &str, record_id: &str) -> PortResult<Record> {
        let query =
            format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE owner_id = $1 AND receipt_id = $2");
        let row = sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(owner_id)
            .bind(record_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Receipt {} not found", record_id))
                }
                _ => PortError::Unexpected(e.to_string()),
            })?;
        Ok(row.to_domain())
    }

    async fn list_records_by_collection(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> PortResult<Vec<Record>> {
        let query = format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE owner_id = $1 AND collection_id = $2 \
             ORDER BY created_at DESC, receipt_id ASC"
        );
        let rows = sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(owner_id)
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(rows.into_iter().map(ReceiptRow::to_domain).collect())
    }

    async fn list_records(&self, owner_id: &str) -> PortResult<Vec<Record>> {
        let query = format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE owner_id = $1 \
             ORDER BY created_at DESC, receipt_id ASC"
        );
        let rows = sqlx::query_as::<_, ReceiptRow>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(rows.into_iter().map(ReceiptRow::to_domain).collect())
    }

    async fn delete_record(&self, owner_id: &str, record_id: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM receipts WHERE owner_id = $1 AND receipt_id = $2")
            .bind(owner_id)
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Receipt {} not found", record_id)));
        }
        Ok(())
    }

    async fn get_spreadsheet_credential(
        &self,
        owner_id: &str,
        provider: &str,
    ) -> PortResult<Option<SpreadsheetCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT owner_id, provider, refresh_token, created_at FROM spreadsheet_credentials \
             WHERE owner_id = $1 AND provider = $2",
        )
        .bind(owner_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(CredentialRow::to_domain))
    }

    async fn save_spreadsheet_credential(&self, credential: SpreadsheetCredential) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO spreadsheet_credentials (owner_id, provider, refresh_token, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (owner_id, provider) DO UPDATE SET \
                refresh_token = EXCLUDED.refresh_token, created_at = EXCLUDED.created_at",
        )
        .bind(&credential.owner_id)
        .bind(&credential.provider)
        .bind(&credential.refresh_token)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_spreadsheet_credential(&self, owner_id: &str, provider: &str) -> PortResult<bool> {
        let result = sqlx::query(
            "DELETE FROM spreadsheet_credentials WHERE owner_id = $1 AND provider = $2",
        )
        .bind(owner_id)
        .bind(provider)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }
}
