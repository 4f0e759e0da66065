//! services/api/src/web/receipts.rs
//!
//! Handlers for listing, moving and deleting stored receipts.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use receipt_pipeline_core::{OwnerIdentity, Record};
use std::sync::Arc;

use crate::error::ApiError;
use crate::web::dto::{AssignFolderRequest, ReceiptDto, ReceiptList};
use crate::web::state::AppState;

fn list(records: &[Record]) -> Json<ReceiptList> {
    Json(ReceiptList {
        receipts: records.iter().map(ReceiptDto::from).collect(),
    })
}

/// Every receipt of the caller, newest first.
#[utoipa::path(
    get,
    path = "/receipts",
    responses((status = 200, description = "All receipts", body = ReceiptList)),
    security(("bearer" = []))
)]
pub async fn list_receipts_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
) -> Result<Json<ReceiptList>, ApiError> {
    let records = state.records.list_all(&owner.owner_id).await?;
    Ok(list(&records))
}

#[utoipa::path(
    get,
    path = "/receipts/folder/{folderId}",
    params(("folderId" = String, Path, description = "The folder to list")),
    responses(
        (status = 200, description = "Receipts of the folder, newest first", body = ReceiptList),
        (status = 404, description = "Unknown folder")
    ),
    security(("bearer" = []))
)]
pub async fn list_folder_receipts_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Path(folder_id): Path<String>,
) -> Result<Json<ReceiptList>, ApiError> {
    state.schemas.get_schema(&owner.owner_id, &folder_id).await?;
    let records = state
        .records
        .list_by_collection(&owner.owner_id, &folder_id)
        .await?;
    Ok(list(&records))
}

/// Receipts outside any folder, including those whose folder was deleted.
#[utoipa::path(
    get,
    path = "/receipts/uncategorized",
    responses((status = 200, description = "Uncategorized receipts", body = ReceiptList)),
    security(("bearer" = []))
)]
pub async fn list_uncategorized_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
) -> Result<Json<ReceiptList>, ApiError> {
    let records = state.records.list_uncategorized(&owner.owner_id).await?;
    Ok(list(&records))
}

/// Move a receipt into a folder, or out of any folder with `folderId: null`.
#[utoipa::path(
    put,
    path = "/receipts/{receiptId}/folder",
    params(("receiptId" = String, Path, description = "The receipt to move")),
    request_body = AssignFolderRequest,
    responses(
        (status = 200, description = "Receipt moved", body = ReceiptDto),
        (status = 404, description = "Unknown receipt or folder")
    ),
    security(("bearer" = []))
)]
pub async fn assign_folder_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Path(receipt_id): Path<String>,
    Json(req): Json<AssignFolderRequest>,
) -> Result<Json<ReceiptDto>, ApiError> {
    let folder_id = req.folder_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    let record = state
        .records
        .assign(&owner.owner_id, &receipt_id, folder_id)
        .await?;
    Ok(Json(ReceiptDto::from(&record)))
}

#[utoipa::path(
    delete,
    path = "/receipts/{receiptId}",
    params(("receiptId" = String, Path, description = "The receipt to delete")),
    responses(
        (status = 204, description = "Receipt deleted"),
        (status = 404, description = "Unknown receipt")
    ),
    security(("bearer" = []))
)]
pub async fn delete_receipt_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Path(receipt_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.records.delete(&owner.owner_id, &receipt_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
