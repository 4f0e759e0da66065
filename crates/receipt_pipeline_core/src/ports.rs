//! crates/receipt_pipeline_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the pipeline's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database, object store, vision model and
//! spreadsheet provider.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::{
    Collection, Column, Record, SheetCell, SpreadsheetCredential, SpreadsheetDocument,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Timed out: {0}")]
    Timeout(String),
    /// The external service understood the request and refused it.
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether re-invoking the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Timeout(_) | PortError::Unexpected(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Collections (schema registry storage) ---

    /// Inserts a new collection. Fails with `Conflict` if `(owner, id)` exists.
    async fn insert_collection(&self, collection: Collection) -> PortResult<Collection>;

    async fn get_collection(&self, owner_id: &str, collection_id: &str) -> PortResult<Collection>;

    /// All collections of an owner, most recently modified first.
    async fn list_collections(&self, owner_id: &str) -> PortResult<Vec<Collection>>;

    /// Removes the collection and, in the same unit of work, detaches its
    /// records (their collection becomes `None`). The records themselves stay.
    async fn delete_collection(&self, owner_id: &str, collection_id: &str) -> PortResult<()>;

    // --- Records ---

    /// Inserts or replaces a record keyed by `(owner, record_id)`.
    async fn save_record(&self, record: Record) -> PortResult<Record>;

    async fn get_record(&self, owner_id: &str, record_id: &str) -> PortResult<Record>;

    /// Records of one collection ordered by `created_at` DESC, then `record_id` ASC.
    async fn list_records_by_collection(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> PortResult<Vec<Record>>;

    /// Every record of the owner, same ordering as `list_records_by_collection`.
    async fn list_records(&self, owner_id: &str) -> PortResult<Vec<Record>>;

    async fn delete_record(&self, owner_id: &str, record_id: &str) -> PortResult<()>;

    // --- Spreadsheet credentials ---

    async fn get_spreadsheet_credential(
        &self,
        owner_id: &str,
        provider: &str,
    ) -> PortResult<Option<SpreadsheetCredential>>;

    async fn save_spreadsheet_credential(&self, credential: SpreadsheetCredential) -> PortResult<()>;

    /// Returns whether a credential existed.
    async fn delete_spreadsheet_credential(&self, owner_id: &str, provider: &str) -> PortResult<bool>;
}

//=========================================================================================
// External Services
//=========================================================================================

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the image and returns a stable reference key.
    async fn put(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> PortResult<String>;

    /// Mints a time-limited read URL for a stored image.
    async fn read_url(&self, image_ref: &str, ttl: Duration) -> PortResult<String>;
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Extracts zero or more line items from the image at `image_url`.
    ///
    /// The output is untrusted: keys may fall outside `columns` and required
    /// keys may be missing.
    async fn extract(
        &self,
        image_url: &str,
        columns: &[Column],
    ) -> PortResult<Vec<BTreeMap<String, String>>>;
}

#[async_trait]
pub trait SpreadsheetService: Send + Sync {
    /// Mints a short-lived access token from a stored refresh token.
    async fn access_token(&self, refresh_token: &str) -> PortResult<String>;

    async fn create_document(&self, access_token: &str, title: &str) -> PortResult<SpreadsheetDocument>;

    /// Writes all rows (header first) in a single bulk call.
    async fn write_rows(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        rows: Vec<Vec<SheetCell>>,
    ) -> PortResult<()>;

    async fn bold_header_row(&self, access_token: &str, spreadsheet_id: &str) -> PortResult<()>;
}

//=========================================================================================
// Device-side Ports (reconciliation)
//=========================================================================================

#[async_trait]
pub trait CollectionSource: Send + Sync {
    async fn fetch_collections(&self, session_token: &str) -> PortResult<Vec<Collection>>;

    async fn fetch_records(&self, session_token: &str) -> PortResult<Vec<Record>>;
}

/// The device cache: JSON arrays under well-known keys, replaced wholesale.
#[async_trait]
pub trait DeviceCache: Send + Sync {
    async fn load_collections(&self) -> PortResult<Vec<Collection>>;

    async fn store_collections(&self, collections: &[Collection]) -> PortResult<()>;

    async fn load_records(&self) -> PortResult<Vec<Record>>;

    async fn store_records(&self, records: &[Record]) -> PortResult<()>;
}
