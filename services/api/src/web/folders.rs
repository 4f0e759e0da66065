//! services/api/src/web/folders.rs
//!
//! Handlers for folder (collection) schema management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use receipt_pipeline_core::{CollectionDraft, ColumnDraft, OwnerIdentity};
use std::sync::Arc;

use crate::error::ApiError;
use crate::web::dto::{CreateFolderRequest, FolderDto, FolderList};
use crate::web::state::AppState;

/// Define a folder and its columns.
///
/// Replaying an identical definition returns the stored folder with 200.
#[utoipa::path(
    post,
    path = "/folders/create",
    request_body = CreateFolderRequest,
    responses(
        (status = 201, description = "Folder created", body = FolderDto),
        (status = 200, description = "Identical folder already exists", body = FolderDto),
        (status = 400, description = "Invalid schema"),
        (status = 409, description = "A different folder exists under this id")
    ),
    security(("bearer" = []))
)]
pub async fn create_folder_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = CollectionDraft {
        collection_id: req.folder_id,
        name: req.name,
        description: req.description,
        columns: req
            .categories
            .into_iter()
            .map(|c| ColumnDraft {
                name: c.name,
                column_type: c.column_type,
                required: c.required,
            })
            .collect(),
    };
    let defined = state.schemas.define_schema(&owner.owner_id, draft).await?;
    let status = if defined.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(FolderDto::from(&defined.collection))))
}

/// List the caller's folders, most recently modified first.
#[utoipa::path(
    get,
    path = "/folders/getFolders",
    responses((status = 200, description = "The caller's folders", body = FolderList)),
    security(("bearer" = []))
)]
pub async fn list_folders_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
) -> Result<Json<FolderList>, ApiError> {
    let folders = state.schemas.list_collections(&owner.owner_id).await?;
    Ok(Json(FolderList {
        folders: folders.iter().map(FolderDto::from).collect(),
    }))
}

/// Delete a folder. Its receipts become uncategorized.
#[utoipa::path(
    delete,
    path = "/folders/{folderId}",
    params(("folderId" = String, Path, description = "The folder to delete")),
    responses(
        (status = 204, description = "Folder deleted"),
        (status = 404, description = "Unknown folder")
    ),
    security(("bearer" = []))
)]
pub async fn delete_folder_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Path(folder_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .schemas
        .delete_collection(&owner.owner_id, &folder_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
