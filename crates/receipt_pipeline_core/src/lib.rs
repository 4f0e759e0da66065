pub mod domain;
pub mod error;
pub mod export;
pub mod extraction;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod ports;
pub mod reconcile;
pub mod records;
pub mod schema;

#[cfg(test)]
mod testing;

pub use domain::{
    Collection, Column, ColumnType, ExportTable, FieldMap, ImageUpload, OwnerIdentity, Record,
    SheetCell, SpreadsheetCredential, SpreadsheetDocument,
};
pub use error::{ErrorKind, PipelineError, PipelineResult, Step};
pub use export::{CsvExport, Exporter, SpreadsheetExport};
pub use extraction::{BatchOutcome, ExtractionSettings, IngestOutcome, IngestStatus, Ingestor};
pub use ports::{
    BlobStore, CollectionSource, DatabaseService, DeviceCache, ExtractionService, PortError,
    PortResult, SpreadsheetService,
};
pub use reconcile::{FallbackReason, Reconciler, Reconciliation};
pub use records::RecordStore;
pub use schema::{CollectionDraft, ColumnDraft, SchemaRegistry};
