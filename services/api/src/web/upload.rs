//! services/api/src/web/upload.rs
//!
//! Handlers that take receipt images in, run them through extraction and
//! persist the resulting receipts.

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use receipt_pipeline_core::{ImageUpload, OwnerIdentity};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::web::auth::GUEST_PREFIX;
use crate::web::dto::{BatchFailureDto, BatchResponse, IngestResponse};
use crate::web::state::AppState;

//=========================================================================================
// Multipart Form Parsing
//=========================================================================================

#[derive(Default)]
struct UploadForm {
    files: Vec<ImageUpload>,
    owner_id: Option<String>,
    collection_id: Option<String>,
    receipt_id: Option<String>,
}

fn bad_multipart(e: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Failed to read multipart data: {}", e.body_text()))
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" | "image" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                form.files.push(ImageUpload {
                    record_id: None,
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "ownerId" => {
                form.owner_id = Some(field.text().await.map_err(bad_multipart)?.trim().to_string())
            }
            // An empty folder id from a form means "no folder".
            "collectionId" | "folderId" => {
                let value = field.text().await.map_err(bad_multipart)?;
                form.collection_id = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            "receiptId" => {
                form.receipt_id = Some(field.text().await.map_err(bad_multipart)?.trim().to_string())
            }
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }
    Ok(form)
}

/// An `ownerId` form field, when sent, must name the authenticated caller.
/// Guest clients may name themselves by the bare token subject.
fn claims_owner(claimed: &str, owner: &OwnerIdentity) -> bool {
    claimed == owner.owner_id
        || (owner.guest && owner.owner_id.strip_prefix(GUEST_PREFIX) == Some(claimed))
}

fn check_owner(form: &UploadForm, owner: &OwnerIdentity) -> Result<(), ApiError> {
    match &form.owner_id {
        Some(claimed) if !claims_owner(claimed, owner) => {
            warn!(owner_id = %owner.owner_id, claimed = %claimed, "Upload for another owner refused");
            Err(ApiError::Forbidden(
                "ownerId does not match the authenticated user".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Upload one receipt image.
///
/// Accepts a multipart/form-data request with a `file` part and optional
/// `collectionId`, `receiptId` and `ownerId` text parts. Without a
/// `collectionId` the image is stored uncategorized and not extracted.
#[utoipa::path(
    post,
    path = "/upload/single",
    request_body(content_type = "multipart/form-data", description = "The receipt image and its target folder."),
    responses(
        (status = 201, description = "Receipt stored", body = IngestResponse),
        (status = 400, description = "Missing or unsupported file"),
        (status = 403, description = "ownerId does not match the caller"),
        (status = 404, description = "Unknown folder"),
        (status = 502, description = "Storage or extraction failed"),
        (status = 504, description = "Storage or extraction timed out")
    ),
    security(("bearer" = []))
)]
pub async fn upload_single_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;
    check_owner(&form, &owner)?;

    let mut files = form.files.into_iter();
    let mut upload = files
        .next()
        .ok_or_else(|| ApiError::BadRequest("Multipart form must include a file".to_string()))?;
    if files.next().is_some() {
        return Err(ApiError::BadRequest(
            "Send one file per request, or use /upload/batch".to_string(),
        ));
    }
    upload.record_id = form.receipt_id;

    let outcome = state
        .ingestor
        .ingest(&owner.owner_id, form.collection_id.as_deref(), upload)
        .await?;
    Ok((StatusCode::CREATED, Json(IngestResponse::from(&outcome))))
}

/// Upload several receipt images into the same folder.
///
/// Each file succeeds or fails on its own. If the client disconnects, files
/// that have not started yet are abandoned.
#[utoipa::path(
    post,
    path = "/upload/batch",
    request_body(content_type = "multipart/form-data", description = "One or more `file` parts and an optional `collectionId`."),
    responses(
        (status = 200, description = "Per-file outcomes", body = BatchResponse),
        (status = 400, description = "No files"),
        (status = 404, description = "Unknown folder")
    ),
    security(("bearer" = []))
)]
pub async fn upload_batch_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
    let form = read_form(multipart).await?;
    check_owner(&form, &owner)?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest(
            "Multipart form must include at least one file".to_string(),
        ));
    }
    if let Some(folder_id) = form.collection_id.as_deref() {
        state.schemas.get_schema(&owner.owner_id, folder_id).await?;
    }

    // Dropping this handler's future (client gone) cancels unstarted items.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state
        .ingestor
        .ingest_batch(
            &owner.owner_id,
            form.collection_id.as_deref(),
            form.files,
            cancel,
        )
        .await;

    info!(
        owner_id = %owner.owner_id,
        completed = outcome.completed.len(),
        failed = outcome.failed.len(),
        "Batch upload answered"
    );
    Ok(Json(BatchResponse {
        completed: outcome.completed.iter().map(IngestResponse::from).collect(),
        failed: outcome
            .failed
            .into_iter()
            .map(|f| BatchFailureDto {
                index: f.index,
                filename: f.filename,
                kind: f.error.kind().as_str().to_string(),
                message: f.error.to_string(),
            })
            .collect(),
    }))
}

/// Re-run extraction on a stored receipt with its folder's current columns.
#[utoipa::path(
    post,
    path = "/upload/reprocess/{receiptId}",
    params(("receiptId" = String, Path, description = "The receipt to re-extract")),
    responses(
        (status = 200, description = "Receipt re-extracted", body = IngestResponse),
        (status = 400, description = "Receipt has no folder"),
        (status = 404, description = "Unknown receipt or folder")
    ),
    security(("bearer" = []))
)]
pub async fn reprocess_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Path(receipt_id): Path<String>,
) -> Result<Json<IngestResponse>, ApiError> {
    let outcome = state
        .ingestor
        .reprocess(&owner.owner_id, &receipt_id)
        .await?;
    Ok(Json(IngestResponse::from(&outcome)))
}
