//! crates/receipt_pipeline_core/src/extraction.rs
//!
//! Extraction orchestration: image upload -> blob store -> vision extraction ->
//! schema conformance -> record store. Also drives reprocessing and batch
//! uploads.
//!
//! The orchestrator never retries on its own. A failed extraction is retried
//! by the caller through `reprocess`, which replaces the record's field-maps.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Collection, Column, FieldMap, ImageUpload, Record};
use crate::error::{bounded, PipelineError, PipelineResult, Step};
use crate::ports::{BlobStore, ExtractionService};
use crate::records::RecordStore;
use crate::schema::SchemaRegistry;

const SUPPORTED_IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("image/webp", &["webp"]),
    ("image/heic", &["heic"]),
    ("image/heif", &["heif"]),
    ("image/gif", &["gif"]),
];

//=========================================================================================
// Settings and Outcomes
//=========================================================================================

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    /// Lifetime of the read URL handed to the extraction service.
    pub read_url_ttl: Duration,
    /// Upper bound for every external call.
    pub call_timeout: Duration,
    /// How many batch items run at once.
    pub batch_concurrency: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            read_url_ttl: Duration::from_secs(15 * 60),
            call_timeout: Duration::from_secs(60),
            batch_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Extracted(Vec<FieldMap>),
    /// The service returned nothing usable (e.g. an unreadable image).
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Extracted,
    /// At least one field-map lacks a required column.
    Incomplete,
    NoData,
    /// Stored without a collection, so nothing was extracted.
    Uncategorized,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Extracted => "extracted",
            IngestStatus::Incomplete => "incomplete",
            IngestStatus::NoData => "no_data",
            IngestStatus::Uncategorized => "uncategorized",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: Record,
    pub status: IngestStatus,
}

#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub filename: String,
    pub error: PipelineError,
}

/// Per-item results of a batch, each list in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub completed: Vec<IngestOutcome>,
    pub failed: Vec<BatchFailure>,
}

//=========================================================================================
// Pure Helpers
//=========================================================================================

/// Conforms one untrusted field-map to the schema. Keys must match a column
/// name exactly; anything else is dropped, as are blank values. Missing
/// required columns mark the map incomplete.
pub fn conform_field_map(raw: BTreeMap<String, String>, columns: &[Column]) -> FieldMap {
    let mut values = BTreeMap::new();
    for (key, value) in raw {
        if !columns.iter().any(|c| c.name == key) {
            debug!(key = %key, "Dropping field outside the schema");
            continue;
        }
        let value = value.trim();
        if !value.is_empty() {
            values.insert(key, value.to_string());
        }
    }

    let missing_required: Vec<String> = columns
        .iter()
        .filter(|c| c.required && !values.contains_key(&c.name))
        .map(|c| c.name.clone())
        .collect();

    FieldMap {
        values,
        incomplete: !missing_required.is_empty(),
        missing_required,
    }
}

fn status_of(field_maps: &[FieldMap]) -> IngestStatus {
    if field_maps.is_empty() {
        IngestStatus::NoData
    } else if field_maps.iter().any(|m| m.incomplete) {
        IngestStatus::Incomplete
    } else {
        IngestStatus::Extracted
    }
}

/// Rejects empty files and anything that is not a supported image type.
pub fn validate_upload(upload: &ImageUpload) -> PipelineResult<()> {
    if upload.bytes.is_empty() {
        return Err(PipelineError::Validation(format!(
            "'{}' is empty",
            upload.filename
        )));
    }
    if let Some(id) = &upload.record_id {
        if id.trim().is_empty() {
            return Err(PipelineError::Validation("receiptId must not be blank".to_string()));
        }
    }

    let content_type = upload.content_type.to_ascii_lowercase();
    let extension = upload
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let supported = SUPPORTED_IMAGE_TYPES.iter().any(|(mime, exts)| {
        content_type == *mime
            || (content_type == "application/octet-stream" || content_type.is_empty())
                && extension.as_deref().is_some_and(|e| exts.contains(&e))
    });
    if supported {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "'{}' has unsupported file type '{}'",
            upload.filename, upload.content_type
        )))
    }
}

//=========================================================================================
// The Orchestrator
//=========================================================================================

#[derive(Clone)]
pub struct Ingestor {
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn ExtractionService>,
    schemas: SchemaRegistry,
    records: RecordStore,
    settings: ExtractionSettings,
}

/// Points the caller at the saved receipt when an external step failed.
fn kept_for_retry(error: PipelineError, record_id: &str) -> PipelineError {
    match error {
        PipelineError::External {
            step,
            message,
            retryable,
            timed_out,
        } => PipelineError::External {
            step,
            message: format!("{message} (receipt {record_id} was saved; reprocess it to retry)"),
            retryable,
            timed_out,
        },
        other => other,
    }
}

impl Ingestor {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn ExtractionService>,
        schemas: SchemaRegistry,
        records: RecordStore,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            blobs,
            extractor,
            schemas,
            records,
            settings,
        }
    }

    /// Extracts schema-conformant field-maps from a stored image.
    pub async fn extract_records(
        &self,
        image_ref: &str,
        schema: &Collection,
    ) -> PipelineResult<ExtractionOutcome> {
        let limit = self.settings.call_timeout;
        let url = bounded(
            Step::ReadUrl,
            limit,
            self.blobs.read_url(image_ref, self.settings.read_url_ttl),
        )
        .await?;

        let raw = bounded(
            Step::Extraction,
            limit,
            self.extractor.extract(&url, &schema.columns),
        )
        .await?;

        let field_maps: Vec<FieldMap> = raw
            .into_iter()
            .map(|m| conform_field_map(m, &schema.columns))
            .filter(|m| !m.values.is_empty())
            .collect();

        if field_maps.is_empty() {
            warn!(image_ref, collection_id = %schema.collection_id, "No data extracted");
            return Ok(ExtractionOutcome::NoData);
        }
        debug!(image_ref, line_items = field_maps.len(), "Extraction finished");
        Ok(ExtractionOutcome::Extracted(field_maps))
    }

    /// Stores one image, extracts it against its collection's schema when one
    /// is given, and persists the record.
    pub async fn ingest(
        &self,
        owner_id: &str,
        collection_id: Option<&str>,
        upload: ImageUpload,
    ) -> PipelineResult<IngestOutcome> {
        validate_upload(&upload)?;
        let schema = match collection_id {
            Some(id) => Some(self.schemas.get_schema(owner_id, id).await?),
            None => None,
        };

        let record_id = upload
            .record_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let image_ref = bounded(
            Step::BlobUpload,
            self.settings.call_timeout,
            self.blobs
                .put(owner_id, &upload.filename, &upload.content_type, upload.bytes),
        )
        .await?;

        // A failed extraction still saves the receipt, without line items, so
        // the stored image has a record that `reprocess` can retry.
        let mut failure = None;
        let (field_maps, status) = match &schema {
            Some(schema) => match self.extract_records(&image_ref, schema).await {
                Ok(ExtractionOutcome::Extracted(maps)) => {
                    let status = status_of(&maps);
                    (maps, status)
                }
                Ok(ExtractionOutcome::NoData) => (Vec::new(), IngestStatus::NoData),
                Err(e) => {
                    failure = Some(e);
                    (Vec::new(), IngestStatus::NoData)
                }
            },
            None => (Vec::new(), IngestStatus::Uncategorized),
        };

        let record = Record {
            owner_id: owner_id.to_string(),
            collection_id: collection_id.map(str::to_string),
            record_id,
            image_ref,
            original_filename: upload.filename,
            created_at: Utc::now(),
            field_maps,
        };
        let record = self.records.save(owner_id, collection_id, record).await?;
        if let Some(error) = failure {
            warn!(
                owner_id,
                record_id = %record.record_id,
                error = %error,
                "Extraction failed; receipt kept for reprocessing"
            );
            return Err(kept_for_retry(error, &record.record_id));
        }
        info!(
            owner_id,
            record_id = %record.record_id,
            status = status.as_str(),
            "Receipt ingested"
        );
        Ok(IngestOutcome { record, status })
    }

    /// Re-extracts a stored receipt against its collection's current schema.
    /// The previous field-maps are replaced, never appended to.
    pub async fn reprocess(&self, owner_id: &str, record_id: &str) -> PipelineResult<IngestOutcome> {
        let mut record = self.records.get(owner_id, record_id).await?;
        let collection_id = record.collection_id.clone().ok_or_else(|| {
            PipelineError::Validation(
                "assign the receipt to a folder before reprocessing it".to_string(),
            )
        })?;
        let schema = self.schemas.get_schema(owner_id, &collection_id).await?;

        let (field_maps, status) = match self.extract_records(&record.image_ref, &schema).await? {
            ExtractionOutcome::Extracted(maps) => {
                let status = status_of(&maps);
                (maps, status)
            }
            ExtractionOutcome::NoData => (Vec::new(), IngestStatus::NoData),
        };
        record.field_maps = field_maps;

        let record = self
            .records
            .save(owner_id, Some(&collection_id), record)
            .await?;
        info!(owner_id, record_id, status = status.as_str(), "Receipt reprocessed");
        Ok(IngestOutcome { record, status })
    }

    /// Ingests several images concurrently. Each item succeeds or fails on its
    /// own; completed items stay persisted whatever happens to their siblings.
    /// Once `cancel` fires, items that have not started are reported as
    /// cancelled while in-flight items run to completion.
    pub async fn ingest_batch(
        &self,
        owner_id: &str,
        collection_id: Option<&str>,
        uploads: Vec<ImageUpload>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let total = uploads.len();
        let concurrency = self.settings.batch_concurrency.max(1);

        let results: Vec<(usize, String, PipelineResult<IngestOutcome>)> =
            stream::iter(uploads.into_iter().enumerate())
                .map(|(index, upload)| {
                    let cancel = cancel.clone();
                    async move {
                        let filename = upload.filename.clone();
                        if cancel.is_cancelled() {
                            return (index, filename, Err(PipelineError::Cancelled));
                        }
                        let result = self.ingest(owner_id, collection_id, upload).await;
                        (index, filename, result)
                    }
                })
                .buffered(concurrency)
                .collect()
                .await;

        let mut outcome = BatchOutcome::default();
        for (index, filename, result) in results {
            match result {
                Ok(done) => outcome.completed.push(done),
                Err(error) => {
                    warn!(owner_id, index, filename = %filename, error = %error, "Batch item failed");
                    outcome.failed.push(BatchFailure {
                        index,
                        filename,
                        error,
                    });
                }
            }
        }
        info!(
            owner_id,
            total,
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            "Batch upload finished"
        );
        outcome
    }
}
