//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::web::auth::TokenVerifier;
use receipt_pipeline_core::{
    BlobStore, DatabaseService, Exporter, ExtractionService, ExtractionSettings, Ingestor,
    RecordStore, SchemaRegistry, SpreadsheetService,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub schemas: SchemaRegistry,
    pub records: RecordStore,
    pub ingestor: Ingestor,
    pub exporter: Exporter,
    pub tokens: TokenVerifier,
}

impl AppState {
    /// Wires the pipeline facades over the given ports.
    pub fn new(
        config: Arc<Config>,
        db: Arc<dyn DatabaseService>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn ExtractionService>,
        sheets: Arc<dyn SpreadsheetService>,
    ) -> Self {
        let schemas = SchemaRegistry::new(db.clone());
        let records = RecordStore::new(db.clone());
        let settings = ExtractionSettings {
            read_url_ttl: config.presigned_url_ttl,
            call_timeout: config.external_call_timeout,
            batch_concurrency: config.batch_concurrency,
        };
        let ingestor = Ingestor::new(blobs, extractor, schemas.clone(), records.clone(), settings);
        let exporter = Exporter::new(
            db,
            schemas.clone(),
            records.clone(),
            sheets,
            config.external_call_timeout,
        );
        let tokens = TokenVerifier::new(&config.session_secret, config.allow_guest_tokens);

        Self {
            config,
            schemas,
            records,
            ingestor,
            exporter,
            tokens,
        }
    }
}
